//! meshid-core: Capture-to-verification pipeline for 3D face identities.
//!
//! Drives image capture (file upload or live camera), turns inference
//! responses into validated meshes, and shapes verification and
//! identification results. Reconstruction and similarity scoring happen in
//! an external backend reached through the [`Backend`] trait.

pub mod backend;
pub mod capture;
pub mod comparison;
pub mod inference;
pub mod mesh;
pub mod registry;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use backend::{Backend, BackendError, BackendHealth};
pub use capture::{CameraProvider, CameraStream, CaptureController, CaptureError, CapturePhase, Mode};
pub use comparison::{ComparisonEngine, ComparisonError};
pub use inference::{InferenceClient, InferenceError};
pub use mesh::{Embedding, Face, MalformedMeshError, MeshData, Vertex};
pub use registry::{IdentityRegistry, RegistryError, ValidationError};
pub use session::{CaptureSession, InferenceOutcome, InferenceTicket, SessionError};
pub use types::{
    Identity, IdentityId, ImageBlob, MatchCandidate, MeshReference, Thresholds, Tier, Verdict,
    VerificationResult,
};
