//! Contract with the external inference / persistence backend.
//!
//! The core never talks HTTP itself; `meshid-client` provides the network
//! implementation and tests plug in in-memory fakes.

use crate::mesh::{Embedding, MeshData};
use crate::types::{Identity, IdentityId, ImageBlob, MeshReference};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("could not decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Status { status: 404, .. })
    }
}

/// Body of a successful `/inference` call, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInference {
    pub success: bool,
    #[serde(default)]
    pub vertices: Vec<[f64; 3]>,
    /// Signed so that negative indices survive decoding and can be rejected.
    #[serde(default)]
    pub faces: Vec<[i64; 3]>,
    #[serde(default)]
    pub code: Vec<f64>,
}

/// Body of a `/compare` call.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVerification {
    pub similarity: f64,
    /// Only set by the backend when its own threshold is exceeded.
    #[serde(default)]
    pub matched_user: Option<String>,
}

/// One row of an `/identify` response.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMatch {
    pub user_id: IdentityId,
    pub name: String,
    /// `None` when the backend serialized a non-finite score as `null`.
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendHealth {
    Online,
    Offline(String),
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// GET `/`; any 2xx means online.
    async fn health(&self) -> BackendHealth;

    async fn infer(&self, image: &ImageBlob) -> Result<RawInference, BackendError>;

    async fn list_identities(&self) -> Result<Vec<Identity>, BackendError>;

    /// Persist a new identity; returns the backend-assigned record.
    async fn create_identity(&self, name: &str, mesh: &MeshData) -> Result<Identity, BackendError>;

    async fn rename_identity(&self, id: IdentityId, name: &str) -> Result<Identity, BackendError>;

    async fn delete_identity(&self, id: IdentityId) -> Result<(), BackendError>;

    async fn compare(&self, id: IdentityId, probe: &MeshData) -> Result<RawVerification, BackendError>;

    async fn identify(&self, embedding: &Embedding) -> Result<Vec<RawMatch>, BackendError>;

    /// Fetch the persisted mesh text behind a reference.
    async fn fetch_mesh(&self, reference: &MeshReference) -> Result<String, BackendError>;
}
