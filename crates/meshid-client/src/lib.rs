//! meshid-client: HTTP access to the inference and identity backend.
//!
//! [`HttpBackend`] implements [`meshid_core::Backend`] over the backend's
//! REST API: multipart uploads for inference, form posts carrying JSON text
//! for registration and comparison, plain JSON for the identity records.

pub mod http;
pub mod wire;

pub use http::HttpBackend;
