//! Request/response shapes of the backend's HTTP API.

use meshid_core::{BackendError, Embedding, Identity, IdentityId, MeshData, MeshReference};
use meshid_core::backend::RawMatch;
use serde::{Deserialize, Serialize};

/// Text fields of a `/register` or `/compare` form. Arrays are sent as JSON
/// text; floats keep their shortest round-trip representation.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshFields {
    pub vertices: String,
    pub faces: String,
    pub code: String,
}

impl MeshFields {
    pub fn from_mesh(mesh: &MeshData) -> Result<Self, BackendError> {
        Ok(Self {
            vertices: to_json(mesh.vertices())?,
            faces: to_json(mesh.faces())?,
            code: embedding_json(mesh.embedding())?,
        })
    }
}

pub fn embedding_json(embedding: &Embedding) -> Result<String, BackendError> {
    to_json(embedding)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, BackendError> {
    // serde_json refuses NaN/inf, which MeshData already excludes.
    serde_json::to_string(value).map_err(|e| BackendError::Decode(format!("encoding request: {e}")))
}

/// `/register` answers with the stored record; older servers only echo the id.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RegisterResponse {
    Record(Identity),
    IdOnly { id: IdentityId },
}

impl RegisterResponse {
    pub fn into_identity(self, name: &str) -> Identity {
        match self {
            RegisterResponse::Record(identity) => identity,
            RegisterResponse::IdOnly { id } => Identity {
                id,
                name: name.to_string(),
                mesh_reference: MeshReference::new(""),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IdentifyResponse {
    #[serde(default)]
    pub matches: Vec<RawMatch>,
}

#[derive(Debug, Serialize)]
pub struct RenameRequest<'a> {
    pub name: &'a str,
}

/// Human-readable reason from an error body. FastAPI-style `{"detail": ...}`
/// is preferred; anything else falls back to the raw text.
pub fn error_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.trim().to_string(),
        },
        _ => body.trim().to_string(),
    }
}

/// File name under which the backend serves a stored mesh: the last path
/// component of the reference, either separator style.
pub fn mesh_file_name(reference: &MeshReference) -> Option<&str> {
    reference
        .as_str()
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
}
