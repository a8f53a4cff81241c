//! `reqwest` implementation of [`Backend`].

use crate::wire::{self, IdentifyResponse, MeshFields, RegisterResponse, RenameRequest};
use async_trait::async_trait;
use meshid_core::backend::{RawInference, RawMatch, RawVerification};
use meshid_core::{
    Backend, BackendError, BackendHealth, Embedding, Identity, IdentityId, ImageBlob, MeshData,
    MeshReference,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::Network(format!("invalid backend URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Network(format!(
                "backend URL {base_url} cannot carry a path"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(url = %base_url, ?timeout, "HTTP backend configured");
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Network(format!("backend URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn mesh_form(mesh: &MeshData) -> Result<Form, BackendError> {
        let fields = MeshFields::from_mesh(mesh)?;
        Ok(Form::new()
            .text("vertices", fields.vertices)
            .text("faces", fields.faces)
            .text("code", fields.code))
    }
}

fn network(e: reqwest::Error) -> BackendError {
    if e.is_decode() {
        BackendError::Decode(e.to_string())
    } else {
        BackendError::Network(e.to_string())
    }
}

/// Turn a non-2xx response into [`BackendError::Status`].
async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = wire::error_detail(&body);
    tracing::debug!(status = status.as_u16(), %detail, "backend error response");
    Err(BackendError::Status {
        status: status.as_u16(),
        detail,
    })
}

async fn json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let response = check(response).await?;
    let bytes = response.bytes().await.map_err(network)?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn health(&self) -> BackendHealth {
        let result = async {
            let url = self.endpoint(&[])?;
            let response = self.client.get(url).send().await.map_err(network)?;
            check(response).await.map(|_| ())
        }
        .await;
        match result {
            Ok(()) => BackendHealth::Online,
            Err(e) => {
                tracing::warn!(url = %self.base_url, error = %e, "backend offline");
                BackendHealth::Offline(e.to_string())
            }
        }
    }

    async fn infer(&self, image: &ImageBlob) -> Result<RawInference, BackendError> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.mime_type)
            .map_err(|e| BackendError::Network(format!("invalid MIME type {:?}: {e}", image.mime_type)))?;
        let form = Form::new().part("file", part);

        tracing::debug!(file = %image.file_name, bytes = image.bytes.len(), "uploading image for inference");
        let response = self
            .client
            .post(self.endpoint(&["inference"])?)
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        json(response).await
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, BackendError> {
        let response = self
            .client
            .get(self.endpoint(&["users"])?)
            .send()
            .await
            .map_err(network)?;
        json(response).await
    }

    async fn create_identity(&self, name: &str, mesh: &MeshData) -> Result<Identity, BackendError> {
        let form = Self::mesh_form(mesh)?.text("name", name.to_string());
        let response = self
            .client
            .post(self.endpoint(&["register"])?)
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        let created: RegisterResponse = json(response).await?;
        Ok(created.into_identity(name))
    }

    async fn rename_identity(&self, id: IdentityId, name: &str) -> Result<Identity, BackendError> {
        let response = self
            .client
            .put(self.endpoint(&["users", &id.to_string()])?)
            .json(&RenameRequest { name })
            .send()
            .await
            .map_err(network)?;
        json(response).await
    }

    async fn delete_identity(&self, id: IdentityId) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.endpoint(&["users", &id.to_string()])?)
            .send()
            .await
            .map_err(network)?;
        check(response).await.map(|_| ())
    }

    async fn compare(&self, id: IdentityId, probe: &MeshData) -> Result<RawVerification, BackendError> {
        let form = Self::mesh_form(probe)?.text("user_id", id.to_string());
        let response = self
            .client
            .post(self.endpoint(&["compare"])?)
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        json(response).await
    }

    async fn identify(&self, embedding: &Embedding) -> Result<Vec<RawMatch>, BackendError> {
        let form = Form::new().text("code", wire::embedding_json(embedding)?);
        let response = self
            .client
            .post(self.endpoint(&["identify"])?)
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        let body: IdentifyResponse = json(response).await?;
        Ok(body.matches)
    }

    async fn fetch_mesh(&self, reference: &MeshReference) -> Result<String, BackendError> {
        let file = wire::mesh_file_name(reference).ok_or_else(|| BackendError::Status {
            status: 404,
            detail: format!("mesh reference {:?} names no file", reference.as_str()),
        })?;
        let response = self
            .client
            .get(self.endpoint(&["meshes", file])?)
            .send()
            .await
            .map_err(network)?;
        check(response).await?.text().await.map_err(network)
    }
}
