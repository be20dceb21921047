use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{StoreError, StoreResult, StoredBuilding, StoredTerrain, SurroundingsStore};

const BUILDINGS_PATH: &str = "surroundings/buildings";
const TERRAIN_PATH: &str = "surroundings/terrain";

/// Paged list envelope returned by the service.
#[derive(Debug, Deserialize)]
struct ListPage<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
    #[serde(rename = "maxItems", default)]
    max_items: u64,
}

/// Blocking client for the surroundings service using a bearer token.
pub struct HttpStore {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl HttpStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(60))
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> StoreResult<ListPage<T>> {
        let mut request = self.agent.get(&self.url(path)).set("Authorization", &self.bearer());
        for (key, value) in query {
            request = request.query(key, value);
        }
        log::debug!("GET {path} {query:?}");
        let response = request.call().map_err(map_error)?;
        response
            .into_json()
            .map_err(|err| StoreError::Decode(err.to_string()))
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: &impl serde::Serialize) -> StoreResult<T> {
        log::debug!("POST {path}");
        let response = self
            .agent
            .post(&self.url(path))
            .set("Authorization", &self.bearer())
            .set("Content-Type", "application/json")
            .send_json(body)
            .map_err(map_error)?;
        response
            .into_json()
            .map_err(|err| StoreError::Decode(err.to_string()))
    }
}

fn map_error(err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(status, response) => StoreError::Status {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => StoreError::Transport(transport.to_string()),
    }
}

impl SurroundingsStore for HttpStore {
    fn list_buildings(
        &self,
        project_id: u64,
        target: Option<bool>,
    ) -> StoreResult<Vec<StoredBuilding>> {
        let mut query = vec![("projectId", project_id.to_string())];
        if let Some(target) = target {
            query.push(("target", target.to_string()));
        }
        // The first page only reports how many items exist.
        let first_page: ListPage<serde_json::Value> = self.get_page(BUILDINGS_PATH, &query)?;
        query.push(("limit", first_page.max_items.max(1).to_string()));
        Ok(self.get_page(BUILDINGS_PATH, &query)?.list)
    }

    fn create_building(&self, building: &StoredBuilding) -> StoreResult<StoredBuilding> {
        self.post(BUILDINGS_PATH, building)
    }

    fn delete_building(&self, id: u64) -> StoreResult<()> {
        log::debug!("DELETE {BUILDINGS_PATH}/{id}");
        self.agent
            .delete(&self.url(&format!("{BUILDINGS_PATH}/{id}")))
            .set("Authorization", &self.bearer())
            .call()
            .map_err(map_error)?;
        Ok(())
    }

    fn list_terrain(&self, project_id: u64) -> StoreResult<Vec<StoredTerrain>> {
        let query = [("projectId", project_id.to_string())];
        Ok(self.get_page(TERRAIN_PATH, &query)?.list)
    }

    fn create_terrain(&self, terrain: &StoredTerrain) -> StoreResult<StoredTerrain> {
        self.post(TERRAIN_PATH, terrain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_joined_without_double_slashes() {
        let store = HttpStore::new("https://api.example.org/api/", "token");
        assert_eq!(
            store.url(BUILDINGS_PATH),
            "https://api.example.org/api/surroundings/buildings"
        );
        assert_eq!(store.bearer(), "Bearer token");
    }

    #[test]
    fn list_envelope_defaults_missing_fields() {
        let page: ListPage<StoredTerrain> =
            serde_json::from_str(r#"{"maxItems": 4}"#).expect("decode");
        assert!(page.list.is_empty());
        assert_eq!(page.max_items, 4);
    }
}
