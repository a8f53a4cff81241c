//! One capture-to-verification interaction.
//!
//! A [`CaptureSession`] owns the capture controller, the mesh produced for the
//! current image, and the in-flight bookkeeping:
//!
//! - every emitted image gets a new generation number; an inference result is
//!   applied only if its generation is still the pending one, so a response
//!   that arrives after clear/retake/mode switch is dropped;
//! - at most one inference and one backend request (verify, identify or
//!   register) are in flight at a time.

use crate::capture::{CameraProvider, CaptureController, CaptureError, Mode};
use crate::comparison::{ComparisonEngine, ComparisonError};
use crate::inference::{InferenceClient, InferenceError};
use crate::mesh::MeshData;
use crate::registry::{IdentityRegistry, RegistryError, ValidationError};
use crate::types::{Identity, IdentityId, ImageBlob, MatchCandidate, Verdict};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Comparison(#[from] ComparisonError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("a request for this session is already in flight")]
    RequestPending,
}

/// An emitted image, tagged with the generation it belongs to.
#[derive(Debug, Clone)]
pub struct InferenceTicket {
    pub generation: u64,
    pub image: ImageBlob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceOutcome {
    /// The mesh is now the session's current mesh.
    Applied,
    /// The session moved on; the result was discarded.
    Stale,
}

pub struct CaptureSession<P: CameraProvider> {
    controller: CaptureController<P>,
    generation: u64,
    pending_inference: Option<u64>,
    mesh: Option<MeshData>,
    request_pending: bool,
}

impl<P: CameraProvider> CaptureSession<P> {
    pub fn new(provider: P) -> Self {
        Self {
            controller: CaptureController::new(provider),
            generation: 0,
            pending_inference: None,
            mesh: None,
            request_pending: false,
        }
    }

    pub fn controller(&self) -> &CaptureController<P> {
        &self.controller
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn mesh(&self) -> Option<&MeshData> {
        self.mesh.as_ref()
    }

    /// Mesh text for the renderer, if a mesh is loaded.
    pub fn mesh_text(&self) -> Option<String> {
        self.mesh.as_ref().map(MeshData::to_text)
    }

    pub fn is_inference_pending(&self) -> bool {
        self.pending_inference.is_some()
    }

    pub fn is_request_pending(&self) -> bool {
        self.request_pending
    }

    /// Whether the compare / identify / register trigger should be enabled.
    pub fn can_submit(&self) -> bool {
        self.mesh.is_some() && !self.request_pending && self.pending_inference.is_none()
    }

    pub fn select_mode(&mut self, mode: Mode) {
        self.controller.select_mode(mode);
        self.abandon();
    }

    pub fn start_camera(&mut self) -> Result<(), SessionError> {
        Ok(self.controller.start_camera()?)
    }

    pub fn select_file(&mut self, image: ImageBlob) -> Result<InferenceTicket, SessionError> {
        let image = self.controller.select_file(image)?;
        Ok(self.issue(image))
    }

    pub fn capture(&mut self) -> Result<InferenceTicket, SessionError> {
        let image = self.controller.capture()?;
        Ok(self.issue(image))
    }

    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.controller.clear()?;
        self.abandon();
        Ok(())
    }

    pub fn retake(&mut self) -> Result<(), SessionError> {
        self.controller.retake()?;
        self.abandon();
        Ok(())
    }

    /// Leave capture entirely, releasing the camera.
    pub fn stop(&mut self) {
        self.controller.stop();
        self.abandon();
    }

    /// Apply an inference result if it still belongs to the pending generation.
    ///
    /// A current failure clears the pending state and re-arms capture before
    /// the error is returned. Stale results, successful or not, are dropped.
    pub fn complete_inference(
        &mut self,
        generation: u64,
        result: Result<MeshData, InferenceError>,
    ) -> Result<InferenceOutcome, InferenceError> {
        if self.pending_inference != Some(generation) {
            tracing::debug!(
                generation,
                current = self.generation,
                "discarding stale inference result"
            );
            return Ok(InferenceOutcome::Stale);
        }

        self.pending_inference = None;
        self.controller.acknowledge();
        let mesh = result?;
        self.mesh = Some(mesh);
        Ok(InferenceOutcome::Applied)
    }

    /// Run inference for `ticket` and apply the result.
    pub async fn run_inference(
        &mut self,
        client: &InferenceClient,
        ticket: InferenceTicket,
    ) -> Result<InferenceOutcome, SessionError> {
        let result = client.infer(&ticket.image).await;
        Ok(self.complete_inference(ticket.generation, result)?)
    }

    pub async fn verify(
        &mut self,
        engine: &ComparisonEngine,
        target: IdentityId,
    ) -> Result<Verdict, SessionError> {
        let (_slot, probe) = self.reserve()?;
        Ok(engine.verify(&probe, target).await?)
    }

    pub async fn identify(
        &mut self,
        engine: &ComparisonEngine,
    ) -> Result<Vec<MatchCandidate>, SessionError> {
        let (_slot, probe) = self.reserve()?;
        Ok(engine.identify(probe.embedding()).await?)
    }

    /// Persist the current mesh under `name`. On success the session's copy
    /// is discarded; the backend now owns the mesh.
    pub async fn register(
        &mut self,
        registry: &IdentityRegistry,
        name: &str,
    ) -> Result<Identity, SessionError> {
        let result = {
            let (_slot, mesh) = self.reserve()?;
            registry.create(name, Some(&mesh)).await
        };
        let identity = result?;
        self.mesh = None;
        Ok(identity)
    }

    /// Take the request slot and a copy of the mesh to send. The slot is
    /// released when the returned guard drops, which also covers a caller
    /// abandoning the request future mid-flight.
    fn reserve(&mut self) -> Result<(RequestSlot<'_>, MeshData), SessionError> {
        let slot = RequestSlot::acquire(&mut self.request_pending)?;
        let mesh = self.mesh.clone().ok_or(ValidationError::MissingMesh)?;
        Ok((slot, mesh))
    }

    fn issue(&mut self, image: ImageBlob) -> InferenceTicket {
        self.generation += 1;
        self.pending_inference = Some(self.generation);
        self.mesh = None;
        InferenceTicket {
            generation: self.generation,
            image,
        }
    }

    /// Drop the current image and mesh; any pending result becomes stale.
    fn abandon(&mut self) {
        if let Some(generation) = self.pending_inference.take() {
            tracing::debug!(generation, "abandoning pending inference");
        }
        self.generation += 1;
        self.mesh = None;
    }
}

/// The session's single in-flight request slot.
struct RequestSlot<'a> {
    pending: &'a mut bool,
}

impl<'a> RequestSlot<'a> {
    fn acquire(pending: &'a mut bool) -> Result<Self, SessionError> {
        if *pending {
            return Err(SessionError::RequestPending);
        }
        *pending = true;
        Ok(Self { pending })
    }
}

impl Drop for RequestSlot<'_> {
    fn drop(&mut self) {
        *self.pending = false;
    }
}
