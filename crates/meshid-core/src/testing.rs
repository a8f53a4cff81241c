//! In-memory backend used by the unit tests.

use crate::backend::{Backend, BackendError, BackendHealth, RawInference, RawMatch, RawVerification};
use crate::mesh::{Embedding, MeshData};
use crate::types::{Identity, IdentityId, ImageBlob, MeshReference};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct FakeState {
    inference: Option<Result<RawInference, BackendError>>,
    identities: Vec<Identity>,
    next_id: IdentityId,
    scores: HashMap<IdentityId, f64>,
    identify_rows: Option<Vec<RawMatch>>,
    register_during_identify: Option<Identity>,
    failure: Option<BackendError>,
    meshes: HashMap<String, String>,
    stall_compare: bool,
    calls: HashMap<&'static str, usize>,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

fn not_found(what: &str) -> BackendError {
    BackendError::Status {
        status: 404,
        detail: format!("{what} not found"),
    }
}

impl FakeBackend {
    pub fn with_identities(identities: &[(IdentityId, &str)]) -> Self {
        let backend = Self::default();
        {
            let mut state = backend.state.lock().unwrap();
            for &(id, name) in identities {
                state.identities.push(identity(id, name));
                state.next_id = state.next_id.max(id);
            }
        }
        backend
    }

    pub fn set_inference(&self, result: Result<RawInference, BackendError>) {
        self.state.lock().unwrap().inference = Some(result);
    }

    pub fn set_score(&self, id: IdentityId, score: f64) {
        self.state.lock().unwrap().scores.insert(id, score);
    }

    pub fn set_identify_rows(&self, rows: Vec<RawMatch>) {
        self.state.lock().unwrap().identify_rows = Some(rows);
    }

    /// Register `identity` as a side effect of the next identify call, to
    /// simulate a concurrent writer.
    pub fn register_during_identify(&self, identity: Identity) {
        self.state.lock().unwrap().register_during_identify = Some(identity);
    }

    pub fn fail_with(&self, error: BackendError) {
        self.state.lock().unwrap().failure = Some(error);
    }

    /// Make `compare` never answer, like a backend that hangs.
    pub fn stall_compare(&self, stall: bool) {
        self.state.lock().unwrap().stall_compare = stall;
    }

    pub fn recover(&self) {
        self.state.lock().unwrap().failure = None;
    }

    pub fn put_mesh(&self, reference: &str, text: &str) {
        self.state
            .lock()
            .unwrap()
            .meshes
            .insert(reference.to_string(), text.to_string());
    }

    pub fn identity_count(&self) -> usize {
        self.state.lock().unwrap().identities.len()
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state.lock().unwrap().calls.get(op).copied().unwrap_or(0)
    }

    fn enter(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, FakeState>, BackendError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(op).or_default() += 1;
        match &state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(state),
        }
    }
}

pub fn identity(id: IdentityId, name: &str) -> Identity {
    Identity {
        id,
        name: name.to_string(),
        mesh_reference: MeshReference::new(format!("meshes/{name}_{id}.obj")),
    }
}

pub fn triangle_mesh() -> MeshData {
    MeshData::new(
        vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        vec![[0, 1, 2]],
        Embedding::from_wire(vec![0.6, 0.8]),
    )
    .unwrap()
}

#[async_trait]
impl Backend for FakeBackend {
    async fn health(&self) -> BackendHealth {
        match self.enter("health") {
            Ok(_) => BackendHealth::Online,
            Err(error) => BackendHealth::Offline(error.to_string()),
        }
    }

    async fn infer(&self, _image: &ImageBlob) -> Result<RawInference, BackendError> {
        let state = self.enter("infer")?;
        state
            .inference
            .clone()
            .unwrap_or_else(|| Err(BackendError::Network("no inference configured".into())))
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, BackendError> {
        Ok(self.enter("list")?.identities.clone())
    }

    async fn create_identity(&self, name: &str, _mesh: &MeshData) -> Result<Identity, BackendError> {
        let mut state = self.enter("create")?;
        state.next_id += 1;
        let created = identity(state.next_id, name);
        state.identities.push(created.clone());
        Ok(created)
    }

    async fn rename_identity(&self, id: IdentityId, name: &str) -> Result<Identity, BackendError> {
        let mut state = self.enter("rename")?;
        let found = state
            .identities
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| not_found("user"))?;
        found.name = name.to_string();
        Ok(found.clone())
    }

    async fn delete_identity(&self, id: IdentityId) -> Result<(), BackendError> {
        let mut state = self.enter("delete")?;
        let before = state.identities.len();
        state.identities.retain(|i| i.id != id);
        if state.identities.len() == before {
            return Err(not_found("user"));
        }
        Ok(())
    }

    async fn compare(&self, id: IdentityId, _probe: &MeshData) -> Result<RawVerification, BackendError> {
        let stalled = self.state.lock().unwrap().stall_compare;
        if stalled {
            std::future::pending::<()>().await;
        }
        let state = self.enter("compare")?;
        let target = state
            .identities
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| not_found("user"))?;
        let similarity = state.scores.get(&id).copied().unwrap_or(0.0);
        Ok(RawVerification {
            similarity,
            matched_user: (similarity > 0.8).then(|| target.name.clone()),
        })
    }

    async fn identify(&self, _embedding: &Embedding) -> Result<Vec<RawMatch>, BackendError> {
        let mut state = self.enter("identify")?;
        if let Some(late) = state.register_during_identify.take() {
            state.identities.push(late);
        }
        if let Some(rows) = &state.identify_rows {
            return Ok(rows.clone());
        }
        Ok(state
            .identities
            .iter()
            .map(|i| RawMatch {
                user_id: i.id,
                name: i.name.clone(),
                similarity: state
                    .scores
                    .get(&i.id)
                    .copied()
                    .filter(|s| !s.is_nan()),
            })
            .collect())
    }

    async fn fetch_mesh(&self, reference: &MeshReference) -> Result<String, BackendError> {
        let state = self.enter("fetch_mesh")?;
        state
            .meshes
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| not_found("mesh"))
    }
}
