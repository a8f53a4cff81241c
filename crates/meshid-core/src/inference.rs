//! Single-shot inference: image in, validated mesh and embedding out.

use crate::backend::{Backend, BackendError, RawInference};
use crate::mesh::{Embedding, Face, MalformedMeshError, MeshData};
use crate::types::ImageBlob;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Network(String),
    #[error("backend rejected the inference request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("could not decode inference response: {0}")]
    Undecodable(String),
    #[error("backend reported an unsuccessful inference")]
    Unsuccessful,
    #[error("inference returned no geometry")]
    EmptyResult,
    #[error("inference returned no embedding")]
    MissingEmbedding,
    #[error("malformed inference response: {0}")]
    MalformedResponse(#[from] MalformedMeshError),
}

impl From<BackendError> for InferenceError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Network(msg) => InferenceError::Network(msg),
            BackendError::Status { status, detail } => InferenceError::Rejected { status, detail },
            BackendError::Decode(msg) => InferenceError::Undecodable(msg),
        }
    }
}

/// Wraps the backend's `/inference` call. No retries; the caller decides
/// whether to capture again.
pub struct InferenceClient {
    backend: Arc<dyn Backend>,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn infer(&self, image: &ImageBlob) -> Result<MeshData, InferenceError> {
        tracing::debug!(file = %image.file_name, bytes = image.bytes.len(), "running inference");
        let raw = self.backend.infer(image).await?;
        let mesh = materialize(raw)?;
        tracing::info!(
            vertices = mesh.vertices().len(),
            faces = mesh.faces().len(),
            embedding_dim = mesh.embedding().dimension(),
            "inference complete"
        );
        Ok(mesh)
    }
}

/// Turn a raw response into a [`MeshData`], rejecting empty or inconsistent
/// geometry.
fn materialize(raw: RawInference) -> Result<MeshData, InferenceError> {
    if !raw.success {
        return Err(InferenceError::Unsuccessful);
    }
    if raw.vertices.is_empty() || raw.faces.is_empty() {
        return Err(InferenceError::EmptyResult);
    }
    if raw.code.is_empty() {
        return Err(InferenceError::MissingEmbedding);
    }

    let vertex_count = raw.vertices.len();
    let faces = raw
        .faces
        .iter()
        .enumerate()
        .map(|(face, indices)| {
            let mut out: Face = [0; 3];
            for (slot, &index) in out.iter_mut().zip(indices) {
                *slot = usize::try_from(index)
                    .ok()
                    .filter(|&i| i < vertex_count)
                    .ok_or(MalformedMeshError::IndexOutOfRange {
                        face,
                        index: index.max(0) as usize,
                        vertex_count,
                    })?;
            }
            Ok(out)
        })
        .collect::<Result<Vec<Face>, MalformedMeshError>>()?;

    Ok(MeshData::new(raw.vertices, faces, Embedding::from_wire(raw.code))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    fn raw_triangle() -> RawInference {
        RawInference {
            success: true,
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            faces: vec![[0, 1, 2]],
            code: vec![0.1, 0.2, 0.3],
        }
    }

    fn image() -> ImageBlob {
        ImageBlob::from_file_bytes(vec![0xff, 0xd8], "face.jpg")
    }

    #[tokio::test]
    async fn test_infer_builds_mesh() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_inference(Ok(raw_triangle()));
        let client = InferenceClient::new(backend.clone());

        let mesh = client.infer(&image()).await.unwrap();
        assert_eq!(mesh.faces(), &[[0, 1, 2]]);
        assert_eq!(mesh.embedding().dimension(), 3);
        assert_eq!(backend.calls("infer"), 1);
    }

    #[tokio::test]
    async fn test_empty_geometry_is_an_error() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_inference(Ok(RawInference {
            vertices: vec![],
            faces: vec![],
            ..raw_triangle()
        }));
        let client = InferenceClient::new(backend);
        assert_eq!(client.infer(&image()).await, Err(InferenceError::EmptyResult));
    }

    #[tokio::test]
    async fn test_network_failure_is_not_retried() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_inference(Err(BackendError::Network("connection refused".into())));
        let client = InferenceClient::new(backend.clone());

        let err = client.infer(&image()).await.unwrap_err();
        assert_eq!(err, InferenceError::Network("connection refused".into()));
        assert_eq!(backend.calls("infer"), 1);
    }

    #[tokio::test]
    async fn test_backend_failures_keep_their_category() {
        let backend = Arc::new(FakeBackend::default());
        let client = InferenceClient::new(backend.clone());

        backend.set_inference(Err(BackendError::Status {
            status: 500,
            detail: "Inference API failed".into(),
        }));
        assert_eq!(
            client.infer(&image()).await,
            Err(InferenceError::Rejected {
                status: 500,
                detail: "Inference API failed".into()
            })
        );

        backend.set_inference(Err(BackendError::Decode("expected value at line 1".into())));
        assert!(matches!(
            client.infer(&image()).await,
            Err(InferenceError::Undecodable(_))
        ));
    }

    #[test]
    fn test_unsuccessful_flag() {
        let raw = RawInference { success: false, ..raw_triangle() };
        assert_eq!(materialize(raw), Err(InferenceError::Unsuccessful));
    }

    #[test]
    fn test_missing_embedding() {
        let raw = RawInference { code: vec![], ..raw_triangle() };
        assert_eq!(materialize(raw), Err(InferenceError::MissingEmbedding));
    }

    #[test]
    fn test_out_of_range_and_negative_indices() {
        let raw = RawInference { faces: vec![[0, 1, 3]], ..raw_triangle() };
        assert!(matches!(
            materialize(raw),
            Err(InferenceError::MalformedResponse(MalformedMeshError::IndexOutOfRange {
                index: 3,
                ..
            }))
        ));

        let raw = RawInference { faces: vec![[0, -1, 2]], ..raw_triangle() };
        assert!(matches!(
            materialize(raw),
            Err(InferenceError::MalformedResponse(MalformedMeshError::IndexOutOfRange { .. }))
        ));
    }
}
