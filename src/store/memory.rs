use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{StoreError, StoreResult, StoredBuilding, StoredTerrain, SurroundingsStore};

/// In-process store; ids are handed out sequentially from 1.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buildings: Mutex<Vec<StoredBuilding>>,
    terrain: Mutex<Vec<StoredTerrain>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Names of every stored building of a project, in insertion order.
    pub fn building_names(&self, project_id: u64) -> StoreResult<Vec<String>> {
        Ok(self
            .list_buildings(project_id, None)?
            .into_iter()
            .map(|b| b.name)
            .collect())
    }

    /// Names of every stored terrain record of a project, in insertion order.
    pub fn terrain_names(&self, project_id: u64) -> StoreResult<Vec<String>> {
        Ok(self
            .list_terrain(project_id)?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }
}

impl SurroundingsStore for MemoryStore {
    fn list_buildings(
        &self,
        project_id: u64,
        target: Option<bool>,
    ) -> StoreResult<Vec<StoredBuilding>> {
        let guard = self.buildings.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .iter()
            .filter(|b| b.project_id == project_id)
            .filter(|b| target.is_none_or(|t| b.target == t))
            .cloned()
            .collect())
    }

    fn create_building(&self, building: &StoredBuilding) -> StoreResult<StoredBuilding> {
        let mut stored = building.clone();
        stored.id = Some(self.allocate_id());
        self.buildings
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(stored.clone());
        Ok(stored)
    }

    fn delete_building(&self, id: u64) -> StoreResult<()> {
        let mut guard = self.buildings.lock().map_err(|_| StoreError::Poisoned)?;
        let before = guard.len();
        guard.retain(|b| b.id != Some(id));
        if guard.len() == before {
            return Err(StoreError::Status {
                status: 404,
                body: format!("building {id} not found"),
            });
        }
        Ok(())
    }

    fn list_terrain(&self, project_id: u64) -> StoreResult<Vec<StoredTerrain>> {
        let guard = self.terrain.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect())
    }

    fn create_terrain(&self, terrain: &StoredTerrain) -> StoreResult<StoredTerrain> {
        let mut stored = terrain.clone();
        stored.id = Some(self.allocate_id());
        self.terrain
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terrain(name: &str, project_id: u64) -> StoredTerrain {
        StoredTerrain {
            id: None,
            project_id,
            name: name.to_owned(),
            data: Vec::new(),
        }
    }

    #[test]
    fn records_are_scoped_by_project_and_get_ids() {
        let store = MemoryStore::new();
        let a = store.create_terrain(&terrain("TR_2", 1)).expect("create");
        let b = store.create_terrain(&terrain("TR_4", 2)).expect("create");
        assert_eq!(a.id, Some(1));
        assert_eq!(b.id, Some(2));
        assert_eq!(store.terrain_names(1).expect("list"), vec!["TR_2"]);
    }

    #[test]
    fn deleting_an_unknown_building_is_a_404() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete_building(99),
            Err(StoreError::Status { status: 404, .. })
        ));
    }
}
