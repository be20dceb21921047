//! Terrain posting against a store that rejects some records.

use geotwin_engine::parse::point_cloud::{CloudPoint, bucket_by_height};
use geotwin_engine::store::{
    MemoryStore, StoreError, StoreResult, StoredBuilding, StoredTerrain, SurroundingsStore,
};
use geotwin_engine::terrain::{DEFAULT_ALPHA, post_terrain_objects};

/// Forwards to a [`MemoryStore`] but refuses one terrain name.
struct RejectingStore {
    inner: MemoryStore,
    rejected: &'static str,
}

impl SurroundingsStore for RejectingStore {
    fn list_buildings(&self, project_id: u64, target: Option<bool>) -> StoreResult<Vec<StoredBuilding>> {
        self.inner.list_buildings(project_id, target)
    }

    fn create_building(&self, building: &StoredBuilding) -> StoreResult<StoredBuilding> {
        self.inner.create_building(building)
    }

    fn delete_building(&self, id: u64) -> StoreResult<()> {
        self.inner.delete_building(id)
    }

    fn list_terrain(&self, project_id: u64) -> StoreResult<Vec<StoredTerrain>> {
        self.inner.list_terrain(project_id)
    }

    fn create_terrain(&self, terrain: &StoredTerrain) -> StoreResult<StoredTerrain> {
        if terrain.name == self.rejected {
            return Err(StoreError::Status {
                status: 500,
                body: "database unavailable".into(),
            });
        }
        self.inner.create_terrain(terrain)
    }
}

fn slab(height: i64) -> Vec<CloudPoint> {
    (0..6)
        .flat_map(|i| {
            (0..6).map(move |j| CloudPoint {
                easting: 344_000 + 3 * i,
                northing: 5_676_000 + 3 * j,
                height,
            })
        })
        .collect()
}

#[test]
fn a_rejected_slice_is_reported_and_the_rest_are_posted() {
    let store = RejectingStore {
        inner: MemoryStore::new(),
        rejected: "TR_42",
    };
    let points: Vec<CloudPoint> = [40, 42, 44].into_iter().flat_map(slab).collect();

    let report = post_terrain_objects(&store, 5, &bucket_by_height(&points), DEFAULT_ALPHA).unwrap();

    assert_eq!(report.posted, vec!["TR_40", "TR_44"]);
    assert_eq!(report.failed_buckets.len(), 1);
    assert_eq!(report.failed_buckets[0].height, 42);
    assert!(report.failed_buckets[0].reason.contains("500"));
    assert_eq!(store.inner.terrain_names(5).unwrap(), vec!["TR_40", "TR_44"]);
}

#[test]
fn every_slice_partitions_the_points_by_height() {
    let store = MemoryStore::new();
    let points: Vec<CloudPoint> = [2, 4, 6].into_iter().flat_map(slab).collect();
    post_terrain_objects(&store, 9, &bucket_by_height(&points), DEFAULT_ALPHA).unwrap();

    for terrain in store.list_terrain(9).unwrap() {
        let height: i64 = terrain.name.trim_start_matches("TR_").parse().unwrap();
        assert!(!terrain.data.is_empty());
        for surface in &terrain.data {
            assert!(surface.polygon.iter().all(|v| v[2] == height));
            assert_eq!(surface.polygon.first(), surface.polygon.last());
        }
    }
}
