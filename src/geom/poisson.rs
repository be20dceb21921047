//! Poisson surface reconstruction on a regular grid.
//!
//! Oriented samples are splatted onto grid nodes, the divergence of that
//! vector field becomes the right-hand side of a Poisson problem for an
//! indicator function, and the surface is the level set of the indicator at
//! its mean sample value, extracted with marching tetrahedra and cropped to
//! the sample bounding box.

use std::collections::HashMap;

use super::core::{BBox, Point3, Tolerance, Vec3};
use super::mesh::GeomMesh;
use super::normals::{DEFAULT_NEIGHBOURS, estimate_normals};

pub const DEFAULT_DEPTH: u32 = 8;
pub const MAX_DEPTH: u32 = 10;

/// Ratio between the reconstruction cube and the sample bounding box.
const SCALE: f64 = 1.1;
/// Empty cells kept around the samples on every side.
const PADDING: usize = 4;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconstructionError {
    #[error("surface reconstruction needs at least 3 distinct points, got {points}")]
    InsufficientData { points: usize },
    #[error("octree depth {0} outside 1..={MAX_DEPTH}")]
    InvalidDepth(u32),
}

pub type ReconstructionResult<T> = Result<T, ReconstructionError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoissonOptions {
    pub depth: u32,
    pub neighbours: usize,
    pub max_iterations: usize,
    /// Relative residual at which the solver stops.
    pub tolerance: f64,
}

impl Default for PoissonOptions {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            neighbours: DEFAULT_NEIGHBOURS,
            max_iterations: 2000,
            tolerance: 1e-7,
        }
    }
}

/// Reconstruct a surface at the given depth with default solver settings.
pub fn reconstruct(points: &[Point3], depth: u32) -> ReconstructionResult<GeomMesh> {
    reconstruct_with(
        points,
        PoissonOptions {
            depth,
            ..PoissonOptions::default()
        },
    )
}

pub fn reconstruct_with(points: &[Point3], options: PoissonOptions) -> ReconstructionResult<GeomMesh> {
    if !(1..=MAX_DEPTH).contains(&options.depth) {
        return Err(ReconstructionError::InvalidDepth(options.depth));
    }
    let insufficient = ReconstructionError::InsufficientData {
        points: points.len(),
    };
    if points.len() < 3 {
        return Err(insufficient);
    }
    let bbox = BBox::from_points(points).ok_or_else(|| insufficient.clone())?;
    let size = bbox.size();
    let longest = size.x.max(size.y).max(size.z);
    if longest <= Tolerance::DEFAULT.eps {
        return Err(insufficient);
    }

    let normals = estimate_normals(points, options.neighbours);
    let grid = Grid::around(bbox, longest, options.depth);
    log::debug!(
        "poisson grid {}x{}x{} (cell {:.3} m) for {} samples",
        grid.dims[0],
        grid.dims[1],
        grid.dims[2],
        grid.cell,
        points.len()
    );

    let field = splat(&grid, points, &normals);
    let rhs = divergence_rhs(&grid, &field);
    let (chi, iterations) = solve_neumann(&grid, &rhs, options.max_iterations, options.tolerance);
    log::debug!("poisson solve finished after {iterations} iterations");

    let iso = points.iter().map(|p| grid.sample(&chi, *p)).sum::<f64>() / points.len() as f64;
    let mesh = marching_tetrahedra(&grid, &chi, iso);

    // The level set is quantized to the grid, so allow one cell of slack
    // along Z where flat terrain would otherwise be cut away entirely.
    let crop = BBox::new(
        Point3::new(
            bbox.min.x - Tolerance::CROP.eps,
            bbox.min.y - Tolerance::CROP.eps,
            bbox.min.z - grid.cell,
        ),
        Point3::new(
            bbox.max.x + Tolerance::CROP.eps,
            bbox.max.y + Tolerance::CROP.eps,
            bbox.max.z + grid.cell,
        ),
    );
    Ok(crop_mesh(&mesh, crop))
}

// ─────────────────────────────────────────────────────────────────────────────
// Grid
// ─────────────────────────────────────────────────────────────────────────────

/// Node-centred regular grid.
#[derive(Debug, Clone)]
struct Grid {
    origin: Point3,
    cell: f64,
    dims: [usize; 3],
}

impl Grid {
    fn around(bbox: BBox, longest: f64, depth: u32) -> Self {
        let cell = longest * SCALE / f64::from(1u32 << depth);
        let size = bbox.size();
        let axis_nodes = |extent: f64| {
            // Extents are finite and non-negative; the count is small.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let cells = (extent * SCALE / cell).ceil() as usize;
            cells + 2 * PADDING + 1
        };
        let dims = [axis_nodes(size.x), axis_nodes(size.y), axis_nodes(size.z)];
        let center = bbox.center();
        let half = |n: usize| (n - 1) as f64 * cell * 0.5;
        let origin = Point3::new(
            center.x - half(dims[0]),
            center.y - half(dims[1]),
            center.z - half(dims[2]),
        );
        Self { origin, cell, dims }
    }

    fn len(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    fn position(&self, i: usize, j: usize, k: usize) -> Point3 {
        Point3::new(
            self.origin.x + i as f64 * self.cell,
            self.origin.y + j as f64 * self.cell,
            self.origin.z + k as f64 * self.cell,
        )
    }

    /// Lower cell corner and fractional offsets of `p`, clamped into the grid.
    fn locate(&self, p: Point3) -> ([usize; 3], [f64; 3]) {
        let rel = [
            (p.x - self.origin.x) / self.cell,
            (p.y - self.origin.y) / self.cell,
            (p.z - self.origin.z) / self.cell,
        ];
        let mut base = [0usize; 3];
        let mut frac = [0.0; 3];
        for axis in 0..3 {
            let max_base = (self.dims[axis] - 2) as f64;
            let r = rel[axis].clamp(0.0, max_base + 1.0);
            let b = r.floor().min(max_base);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                base[axis] = b as usize;
            }
            frac[axis] = r - b;
        }
        (base, frac)
    }

    /// Trilinear weights of the eight nodes around `p`.
    fn stencil(&self, p: Point3) -> [(usize, f64); 8] {
        let (base, frac) = self.locate(p);
        let mut out = [(0usize, 0.0); 8];
        for (corner, slot) in out.iter_mut().enumerate() {
            let (dx, dy, dz) = (corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let w = axis_weight(frac[0], dx) * axis_weight(frac[1], dy) * axis_weight(frac[2], dz);
            *slot = (self.index(base[0] + dx, base[1] + dy, base[2] + dz), w);
        }
        out
    }

    fn sample(&self, values: &[f64], p: Point3) -> f64 {
        self.stencil(p).iter().map(|&(idx, w)| values[idx] * w).sum()
    }
}

fn axis_weight(frac: f64, upper: usize) -> f64 {
    if upper == 1 { frac } else { 1.0 - frac }
}

// ─────────────────────────────────────────────────────────────────────────────
// Poisson system
// ─────────────────────────────────────────────────────────────────────────────

fn splat(grid: &Grid, points: &[Point3], normals: &[Vec3]) -> Vec<Vec3> {
    let mut field = vec![Vec3::ZERO; grid.len()];
    for (p, n) in points.iter().zip(normals) {
        for (idx, w) in grid.stencil(*p) {
            field[idx] = field[idx] + *n * w;
        }
    }
    field
}

/// Right-hand side `-h² ∇·V` for the graph Laplacian, mean-free.
fn divergence_rhs(grid: &Grid, field: &[Vec3]) -> Vec<f64> {
    let [nx, ny, nz] = grid.dims;
    let at = |i: isize, j: isize, k: isize| -> Vec3 {
        if i < 0 || j < 0 || k < 0 {
            return Vec3::ZERO;
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if i >= nx || j >= ny || k >= nz {
            return Vec3::ZERO;
        }
        field[grid.index(i, j, k)]
    };
    let mut rhs = vec![0.0; grid.len()];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let (si, sj, sk) = (i as isize, j as isize, k as isize);
                let div_sum = (at(si + 1, sj, sk).x - at(si - 1, sj, sk).x)
                    + (at(si, sj + 1, sk).y - at(si, sj - 1, sk).y)
                    + (at(si, sj, sk + 1).z - at(si, sj, sk - 1).z);
                rhs[grid.index(i, j, k)] = -0.5 * grid.cell * div_sum;
            }
        }
    }
    let mean = rhs.iter().sum::<f64>() / rhs.len() as f64;
    rhs.iter_mut().for_each(|v| *v -= mean);
    rhs
}

/// Graph Laplacian with zero-flux boundaries: `(Lx)_i = Σ (x_i − x_nb)`.
fn apply_laplacian(grid: &Grid, x: &[f64], out: &mut [f64]) {
    let [nx, ny, nz] = grid.dims;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = grid.index(i, j, k);
                let centre = x[idx];
                let mut acc = 0.0;
                if i > 0 {
                    acc += centre - x[idx - 1];
                }
                if i + 1 < nx {
                    acc += centre - x[idx + 1];
                }
                if j > 0 {
                    acc += centre - x[idx - nx];
                }
                if j + 1 < ny {
                    acc += centre - x[idx + nx];
                }
                if k > 0 {
                    acc += centre - x[idx - nx * ny];
                }
                if k + 1 < nz {
                    acc += centre - x[idx + nx * ny];
                }
                out[idx] = acc;
            }
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Conjugate gradient on the (semi-definite) Neumann system. The right-hand
/// side is mean-free, so the iteration stays in the range of the operator.
fn solve_neumann(grid: &Grid, rhs: &[f64], max_iterations: usize, tolerance: f64) -> (Vec<f64>, usize) {
    let n = rhs.len();
    let mut x = vec![0.0; n];
    let mut r = rhs.to_vec();
    let mut p = r.clone();
    let mut ap = vec![0.0; n];
    let mut rr = dot(&r, &r);
    let target = tolerance * tolerance * rr.max(f64::MIN_POSITIVE);

    let mut iterations = 0;
    while iterations < max_iterations && rr > target {
        apply_laplacian(grid, &p, &mut ap);
        let pap = dot(&p, &ap);
        if pap.abs() <= f64::MIN_POSITIVE {
            break;
        }
        let alpha = rr / pap;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        let rr_next = dot(&r, &r);
        let beta = rr_next / rr;
        for i in 0..n {
            p[i] = r[i] + beta * p[i];
        }
        rr = rr_next;
        iterations += 1;
    }
    (x, iterations)
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Kuhn decomposition of a cube into six tetrahedra sharing the 0–7 diagonal.
/// Corner bits: 1 = +x, 2 = +y, 4 = +z.
const CUBE_TETS: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 3, 2, 7],
    [0, 2, 6, 7],
    [0, 6, 4, 7],
    [0, 4, 5, 7],
    [0, 5, 1, 7],
];

struct Extractor<'a> {
    values: &'a [f64],
    iso: f64,
    positions: Vec<[f64; 3]>,
    indices: Vec<u32>,
    welded: HashMap<(usize, usize), u32>,
}

impl Extractor<'_> {
    fn edge_vertex(&mut self, a: (usize, Point3), b: (usize, Point3)) -> u32 {
        let key = if a.0 < b.0 { (a.0, b.0) } else { (b.0, a.0) };
        if let Some(&idx) = self.welded.get(&key) {
            return idx;
        }
        let (va, vb) = (self.values[a.0], self.values[b.0]);
        let t = if (vb - va).abs() > f64::MIN_POSITIVE {
            ((self.iso - va) / (vb - va)).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let p = a.1.add_vec(b.1.sub_point(a.1) * t);
        #[allow(clippy::cast_possible_truncation)]
        let idx = self.positions.len() as u32;
        self.positions.push(p.to_array());
        self.welded.insert(key, idx);
        idx
    }

    /// Emit `tri` oriented so its normal points from low to high values.
    fn emit(&mut self, mut tri: [u32; 3], towards_high: Vec3) {
        let [a, b, c] = tri.map(|i| Point3::from_array(self.positions[i as usize]));
        let normal = b.sub_point(a).cross(c.sub_point(a));
        if normal.dot(towards_high) < 0.0 {
            tri.swap(1, 2);
        }
        self.indices.extend_from_slice(&tri);
    }

    fn tetrahedron(&mut self, corners: [(usize, Point3); 4]) {
        let (low, high): (Vec<_>, Vec<_>) =
            corners.iter().partition(|(idx, _)| self.values[*idx] < self.iso);
        if low.is_empty() || high.is_empty() {
            return;
        }
        let mean = |set: &[&(usize, Point3)]| {
            let n = set.len() as f64;
            set.iter()
                .fold(Vec3::ZERO, |acc, (_, p)| acc + p.to_vec3())
                .mul_scalar(1.0 / n)
        };
        let towards_high = mean(&high) - mean(&low);

        match (low.len(), high.len()) {
            (1, 3) => {
                let l = *low[0];
                let tri = [
                    self.edge_vertex(l, *high[0]),
                    self.edge_vertex(l, *high[1]),
                    self.edge_vertex(l, *high[2]),
                ];
                self.emit(tri, towards_high);
            }
            (3, 1) => {
                let h = *high[0];
                let tri = [
                    self.edge_vertex(*low[0], h),
                    self.edge_vertex(*low[1], h),
                    self.edge_vertex(*low[2], h),
                ];
                self.emit(tri, towards_high);
            }
            _ => {
                let (l0, l1, h0, h1) = (*low[0], *low[1], *high[0], *high[1]);
                let q = [
                    self.edge_vertex(l0, h0),
                    self.edge_vertex(l0, h1),
                    self.edge_vertex(l1, h1),
                    self.edge_vertex(l1, h0),
                ];
                self.emit([q[0], q[1], q[2]], towards_high);
                self.emit([q[0], q[2], q[3]], towards_high);
            }
        }
    }
}

fn marching_tetrahedra(grid: &Grid, values: &[f64], iso: f64) -> GeomMesh {
    let mut extractor = Extractor {
        values,
        iso,
        positions: Vec::new(),
        indices: Vec::new(),
        welded: HashMap::new(),
    };
    let [nx, ny, nz] = grid.dims;
    for k in 0..nz - 1 {
        for j in 0..ny - 1 {
            for i in 0..nx - 1 {
                let corner = |c: usize| {
                    let (ci, cj, ck) = (i + (c & 1), j + ((c >> 1) & 1), k + ((c >> 2) & 1));
                    (grid.index(ci, cj, ck), grid.position(ci, cj, ck))
                };
                let corners: [(usize, Point3); 8] = std::array::from_fn(corner);
                for tet in CUBE_TETS {
                    extractor.tetrahedron(tet.map(|c| corners[c]));
                }
            }
        }
    }
    GeomMesh::new(extractor.positions, extractor.indices)
}

/// Drop triangles with any vertex outside `bbox` and compact the vertices.
fn crop_mesh(mesh: &GeomMesh, bbox: BBox) -> GeomMesh {
    let mut remap: HashMap<u32, u32> = HashMap::new();
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    for tri in mesh.indices.chunks_exact(3) {
        let inside = tri
            .iter()
            .all(|&i| bbox.contains_point(Point3::from_array(mesh.positions[i as usize])));
        if !inside {
            continue;
        }
        for &i in tri {
            let next = remap.entry(i).or_insert_with(|| {
                positions.push(mesh.positions[i as usize]);
                #[allow(clippy::cast_possible_truncation)]
                let idx = (positions.len() - 1) as u32;
                idx
            });
            indices.push(*next);
        }
    }
    GeomMesh::new(positions, indices)
}
