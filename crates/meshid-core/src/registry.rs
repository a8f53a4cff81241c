//! CRUD over persisted identities.

use crate::backend::{Backend, BackendError};
use crate::mesh::{self, Face, MalformedMeshError, MeshData, Vertex};
use crate::types::{Identity, IdentityId};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("no mesh has been generated yet")]
    MissingMesh,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("identity {0} does not exist")]
    NotFound(IdentityId),
    #[error("registry request failed: {0}")]
    Backend(#[from] BackendError),
    #[error("stored mesh is malformed: {0}")]
    MalformedMesh(#[from] MalformedMeshError),
}

pub struct IdentityRegistry {
    backend: Arc<dyn Backend>,
    last_error: Option<RegistryError>,
}

impl IdentityRegistry {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            last_error: None,
        }
    }

    /// Identities for rendering. A failed fetch yields an empty list and is
    /// recorded in [`last_error`](Self::last_error); use
    /// [`try_list`](Self::try_list) to handle the failure directly.
    pub async fn list(&mut self) -> Vec<Identity> {
        match self.try_list().await {
            Ok(identities) => {
                self.last_error = None;
                identities
            }
            Err(error) => {
                tracing::warn!(%error, "listing identities failed");
                self.last_error = Some(error);
                Vec::new()
            }
        }
    }

    pub async fn try_list(&self) -> Result<Vec<Identity>, RegistryError> {
        Ok(self.backend.list_identities().await?)
    }

    /// Failure of the most recent [`list`](Self::list) or
    /// [`remove`](Self::remove), cleared by the next success.
    pub fn last_error(&self) -> Option<&RegistryError> {
        self.last_error.as_ref()
    }

    pub async fn create(
        &self,
        name: &str,
        mesh: Option<&MeshData>,
    ) -> Result<Identity, RegistryError> {
        let name = validate_name(name)?;
        let mesh = mesh.ok_or(ValidationError::MissingMesh)?;

        let identity = self.backend.create_identity(name, mesh).await?;
        tracing::info!(id = identity.id, name = %identity.name, "identity registered");
        Ok(identity)
    }

    pub async fn rename(&self, id: IdentityId, new_name: &str) -> Result<Identity, RegistryError> {
        let new_name = validate_name(new_name)?;
        let identity = self
            .backend
            .rename_identity(id, new_name)
            .await
            .map_err(|e| not_found_or(id, e))?;
        tracing::info!(id, name = %identity.name, "identity renamed");
        Ok(identity)
    }

    /// `true` only when an identity was actually deleted. Deleting an id that
    /// does not exist reports `false`.
    pub async fn remove(&mut self, id: IdentityId) -> bool {
        match self.try_remove(id).await {
            Ok(()) => {
                self.last_error = None;
                true
            }
            Err(error) => {
                tracing::warn!(id, %error, "removing identity failed");
                self.last_error = Some(error);
                false
            }
        }
    }

    pub async fn try_remove(&self, id: IdentityId) -> Result<(), RegistryError> {
        self.backend
            .delete_identity(id)
            .await
            .map_err(|e| not_found_or(id, e))?;
        tracing::info!(id, "identity removed");
        Ok(())
    }

    /// Fetch and decode the stored mesh of an identity.
    pub async fn load_mesh(
        &self,
        identity: &Identity,
    ) -> Result<(Vec<Vertex>, Vec<Face>), RegistryError> {
        let text = self
            .backend
            .fetch_mesh(&identity.mesh_reference)
            .await
            .map_err(|e| not_found_or(identity.id, e))?;
        Ok(mesh::decode(&text)?)
    }
}

fn validate_name(name: &str) -> Result<&str, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(ValidationError::EmptyName)
    } else {
        Ok(trimmed)
    }
}

fn not_found_or(id: IdentityId, error: BackendError) -> RegistryError {
    if error.is_not_found() {
        RegistryError::NotFound(id)
    } else {
        RegistryError::Backend(error)
    }
}
