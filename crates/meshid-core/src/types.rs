//! Identity records, images, score thresholds and verification verdicts.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Backend-assigned identity id.
pub type IdentityId = i64;

/// Locator of a persisted mesh. Never interpreted by the core; only the
/// backend client turns it into a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeshReference(String);

impl MeshReference {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A persisted, named identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    #[serde(rename = "mesh_path")]
    pub mesh_reference: MeshReference,
}

/// An encoded still image ready to submit for inference.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

impl ImageBlob {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Guess the MIME type from the file extension, defaulting to
    /// `application/octet-stream`.
    pub fn from_file_bytes(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let mime = match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "bmp" => "image/bmp",
            "webp" => "image/webp",
            _ => "application/octet-stream",
        };
        Self::new(bytes, file_name, mime)
    }
}

impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBlob")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Result of one pairwise comparison. `score` is the backend's value, untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub score: f64,
    pub matched_identity_name: String,
}

/// One row of a ranked identification result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub identity_id: IdentityId,
    pub identity_name: String,
    pub score: f64,
}

/// Presentation band of a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Match,
    Uncertain,
    NoMatch,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Match => "match",
            Tier::Uncertain => "uncertain",
            Tier::NoMatch => "no match",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("uncertain threshold {uncertain} must not exceed match threshold {matched}")]
pub struct ThresholdError {
    pub matched: f64,
    pub uncertain: f64,
}

/// Score thresholds used to band verification results.
///
/// The score range is backend-defined (cosine in [-1, 1] or a normalized
/// [0, 1]); only the ordering of the two cut points is checked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub match_threshold: f64,
    pub uncertain_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            match_threshold: 0.8,
            uncertain_threshold: 0.5,
        }
    }
}

impl Thresholds {
    pub fn new(match_threshold: f64, uncertain_threshold: f64) -> Result<Self, ThresholdError> {
        if uncertain_threshold.is_nan()
            || match_threshold.is_nan()
            || uncertain_threshold > match_threshold
        {
            return Err(ThresholdError {
                matched: match_threshold,
                uncertain: uncertain_threshold,
            });
        }
        Ok(Self {
            match_threshold,
            uncertain_threshold,
        })
    }

    /// `score > match` is a match, `score >= uncertain` is uncertain, anything
    /// else (NaN included) is no match.
    pub fn classify(&self, score: f64) -> Tier {
        if score > self.match_threshold {
            Tier::Match
        } else if score >= self.uncertain_threshold {
            Tier::Uncertain
        } else {
            Tier::NoMatch
        }
    }
}

/// A verification result with its presentation band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub result: VerificationResult,
    pub tier: Tier,
}

impl Verdict {
    /// Score as a percentage with one decimal, e.g. `85.0%`.
    pub fn percent(&self) -> String {
        format!("{:.1}%", self.result.score * 100.0)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.result.matched_identity_name;
        match self.tier {
            Tier::Match => write!(f, "{} possible match with {name}.", self.percent()),
            Tier::Uncertain | Tier::NoMatch => write!(
                f,
                "{} low confidence: face structure differs from {name}.",
                self.percent()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_banding() {
        let t = Thresholds::default();
        assert_eq!(t.classify(0.85), Tier::Match);
        assert_eq!(t.classify(0.65), Tier::Uncertain);
        assert_eq!(t.classify(0.2), Tier::NoMatch);
    }

    #[test]
    fn test_banding_boundaries() {
        let t = Thresholds::default();
        assert_eq!(t.classify(0.8), Tier::Uncertain);
        assert_eq!(t.classify(0.5), Tier::Uncertain);
        assert_eq!(t.classify(0.4999), Tier::NoMatch);
        assert_eq!(t.classify(-0.9), Tier::NoMatch);
        assert_eq!(t.classify(f64::NAN), Tier::NoMatch);
    }

    #[test]
    fn test_overridden_thresholds() {
        let t = Thresholds::new(0.6, 0.3).unwrap();
        assert_eq!(t.classify(0.65), Tier::Match);
        assert_eq!(t.classify(0.3), Tier::Uncertain);
    }

    #[test]
    fn test_thresholds_reject_inverted_order() {
        assert!(Thresholds::new(0.5, 0.8).is_err());
        assert!(Thresholds::new(f64::NAN, 0.5).is_err());
        assert!(Thresholds::new(0.5, 0.5).is_ok());
    }

    #[test]
    fn test_verdict_message() {
        let verdict = Verdict {
            result: VerificationResult {
                score: 0.853,
                matched_identity_name: "Ada".into(),
            },
            tier: Tier::Match,
        };
        assert_eq!(verdict.to_string(), "85.3% possible match with Ada.");

        let low = Verdict {
            tier: Tier::NoMatch,
            result: VerificationResult { score: 0.2, ..verdict.result },
        };
        assert_eq!(low.to_string(), "20.0% low confidence: face structure differs from Ada.");
    }

    #[test]
    fn test_identity_wire_shape() {
        let json = r#"{"id": 7, "name": "Grace", "mesh_path": "meshes/Grace_ab12cd34.obj"}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.id, 7);
        assert_eq!(identity.mesh_reference.as_str(), "meshes/Grace_ab12cd34.obj");
    }

    #[test]
    fn test_image_blob_mime_guess() {
        assert_eq!(ImageBlob::from_file_bytes(vec![], "face.JPG").mime_type, "image/jpeg");
        assert_eq!(ImageBlob::from_file_bytes(vec![], "face.png").mime_type, "image/png");
        assert_eq!(
            ImageBlob::from_file_bytes(vec![], "face").mime_type,
            "application/octet-stream"
        );
    }
}
