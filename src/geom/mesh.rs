//! Triangle containers passed between pipeline stages.
//!
//! [`TriangleSet`] is the value object every stage produces and the exporter
//! consumes. [`GeomMesh`] is the indexed form surface reconstruction emits
//! before it is gathered into a triangle set.

use super::core::{BBox, Point3, Transform, Vec3};

// ─────────────────────────────────────────────────────────────────────────────
// Triangle
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle(pub [Point3; 3]);

impl Triangle {
    #[must_use]
    pub const fn new(a: Point3, b: Point3, c: Point3) -> Self {
        Self([a, b, c])
    }

    #[must_use]
    pub const fn vertices(&self) -> &[Point3; 3] {
        &self.0
    }

    /// The loop form `[a, b, c, a]` used by closed-ring consumers.
    #[must_use]
    pub const fn closed(&self) -> [Point3; 4] {
        [self.0[0], self.0[1], self.0[2], self.0[0]]
    }

    /// Right-hand unit normal, `None` for a zero-area triangle.
    #[must_use]
    pub fn normal(&self) -> Option<Vec3> {
        let [a, b, c] = self.0;
        b.sub_point(a).cross(c.sub_point(a)).normalized()
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        let [a, b, c] = self.0;
        b.sub_point(a).cross(c.sub_point(a)).length() * 0.5
    }

    #[must_use]
    pub fn map(self, f: impl Fn(Point3) -> Point3) -> Self {
        let [a, b, c] = self.0;
        Self([f(a), f(b), f(c)])
    }
}

impl From<[[f64; 3]; 3]> for Triangle {
    fn from(value: [[f64; 3]; 3]) -> Self {
        Self(value.map(Point3::from_array))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TriangleSet
// ─────────────────────────────────────────────────────────────────────────────

/// All triangles of one output object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleSet(Vec<Triangle>);

impl TriangleSet {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, triangle: Triangle) {
        self.0.push(triangle);
    }

    pub fn append(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Triangle> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Triangle] {
        &self.0
    }

    pub fn vertices(&self) -> impl Iterator<Item = Point3> + '_ {
        self.0.iter().flat_map(|t| t.0)
    }

    #[must_use]
    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(&self.vertices().collect::<Vec<_>>())
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.0.iter().map(Triangle::area).sum()
    }

    /// Translate into the local frame anchored at `reference`, rounding every
    /// coordinate to millimetres.
    #[must_use]
    pub fn normalized(self, reference: Point3) -> Self {
        self.0
            .into_iter()
            .map(|t| {
                t.map(|p| {
                    Point3::new(p.x - reference.x, p.y - reference.y, p.z - reference.z)
                        .rounded(3)
                })
            })
            .collect()
    }

    #[must_use]
    pub fn transformed(self, transform: Transform) -> Self {
        self.0
            .into_iter()
            .map(|t| t.map(|p| transform.apply_point(p)))
            .collect()
    }
}

impl From<Vec<Triangle>> for TriangleSet {
    fn from(value: Vec<Triangle>) -> Self {
        Self(value)
    }
}

impl FromIterator<Triangle> for TriangleSet {
    fn from_iter<I: IntoIterator<Item = Triangle>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Triangle> for TriangleSet {
    fn extend<I: IntoIterator<Item = Triangle>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for TriangleSet {
    type Item = Triangle;
    type IntoIter = std::vec::IntoIter<Triangle>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TriangleSet {
    type Item = &'a Triangle;
    type IntoIter = std::slice::Iter<'a, Triangle>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GeomMesh
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeomMesh {
    pub positions: Vec<[f64; 3]>,
    pub indices: Vec<u32>,
}

impl GeomMesh {
    #[must_use]
    pub fn new(positions: Vec<[f64; 3]>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if any vertex position contains NaN or Inf values.
    #[must_use]
    pub fn has_invalid_vertices(&self) -> bool {
        self.positions
            .iter()
            .any(|p| !p[0].is_finite() || !p[1].is_finite() || !p[2].is_finite())
    }

    /// Returns true if all vertex indices are within bounds.
    #[must_use]
    pub fn has_valid_indices(&self) -> bool {
        let n = self.positions.len();
        self.indices.iter().all(|&i| (i as usize) < n)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.indices.len() % 3 != 0 {
            return Err("mesh indices are not a triangle list (len % 3 != 0)".to_string());
        }
        if self.has_invalid_vertices() {
            return Err("mesh has invalid vertex coordinates (NaN/Inf)".to_string());
        }
        if !self.has_valid_indices() {
            return Err("mesh has out-of-bounds vertex indices".to_string());
        }
        Ok(())
    }

    /// Gather positions through the index list, one triangle per index triple.
    /// Out-of-range triples are skipped.
    #[must_use]
    pub fn to_triangle_set(&self) -> TriangleSet {
        self.indices
            .chunks_exact(3)
            .filter_map(|tri| {
                let a = self.positions.get(tri[0] as usize)?;
                let b = self.positions.get(tri[1] as usize)?;
                let c = self.positions.get(tri[2] as usize)?;
                Some(Triangle::from([*a, *b, *c]))
            })
            .collect()
    }
}
