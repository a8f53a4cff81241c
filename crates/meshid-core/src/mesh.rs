//! Mesh data model and the line-oriented mesh text format.
//!
//! In memory, faces reference vertices by 0-based index. The text format is
//! 1-based: `encode` adds one to every face index and `decode` subtracts it.
//!
//! ```text
//! v 0 0 0
//! v 1 0 0
//! v 0 1 0
//! f 1 2 3
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use thiserror::Error;

/// One vertex position.
pub type Vertex = [f64; 3];

/// One triangle, as 0-based vertex indices.
pub type Face = [usize; 3];

/// Record tags that may appear in exported mesh files but carry nothing we keep.
const IGNORED_TAGS: [&str; 7] = ["vn", "vt", "o", "g", "s", "usemtl", "mtllib"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedMeshError {
    #[error("line {line}: `{tag}` record needs {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        tag: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid coordinate `{value}`")]
    InvalidCoordinate { line: usize, value: String },
    #[error("line {line}: invalid face index `{value}`")]
    InvalidIndex { line: usize, value: String },
    #[error("line {line}: face index {index} is not positive (indices start at 1)")]
    NonPositiveIndex { line: usize, index: i64 },
    #[error("face {face} references vertex {index}, but the mesh has {vertex_count} vertices")]
    IndexOutOfRange {
        face: usize,
        index: usize,
        vertex_count: usize,
    },
    #[error("line {line}: unknown record `{tag}`")]
    UnknownRecord { line: usize, tag: String },
    #[error("vertex {vertex} has a non-finite coordinate")]
    NonFiniteVertex { vertex: usize },
    #[error("mesh has no vertices or no faces")]
    Empty,
}

/// Face embedding produced by the inference backend.
///
/// The values are only forwarded to the backend, which owns the similarity
/// function. No indexing or iteration API is exposed.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f64>);

impl Embedding {
    /// Wrap the `code` array returned by the backend.
    pub fn from_wire(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Number of components.
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Embedding(dim={})", self.0.len())
    }
}

/// A reconstructed face mesh together with its embedding.
///
/// Construction through [`MeshData::new`] guarantees every face index is in
/// range and every coordinate is finite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshData {
    vertices: Vec<Vertex>,
    faces: Vec<Face>,
    embedding: Embedding,
}

impl MeshData {
    pub fn new(
        vertices: Vec<Vertex>,
        faces: Vec<Face>,
        embedding: Embedding,
    ) -> Result<Self, MalformedMeshError> {
        if vertices.is_empty() || faces.is_empty() {
            return Err(MalformedMeshError::Empty);
        }
        if let Some(vertex) = vertices
            .iter()
            .position(|v| v.iter().any(|c| !c.is_finite()))
        {
            return Err(MalformedMeshError::NonFiniteVertex { vertex });
        }
        check_face_indices(&faces, vertices.len())?;

        Ok(Self {
            vertices,
            faces,
            embedding,
        })
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    /// Mesh text handed to the renderer.
    pub fn to_text(&self) -> String {
        encode(&self.vertices, &self.faces)
    }
}

fn check_face_indices(faces: &[Face], vertex_count: usize) -> Result<(), MalformedMeshError> {
    for (face, indices) in faces.iter().enumerate() {
        if let Some(&index) = indices.iter().find(|&&i| i >= vertex_count) {
            return Err(MalformedMeshError::IndexOutOfRange {
                face,
                index,
                vertex_count,
            });
        }
    }
    Ok(())
}

/// Encode vertices and faces as mesh text.
///
/// One `v x y z` line per vertex, then one `f i j k` line per face, in input
/// order. Coordinates use the shortest representation that parses back to the
/// same `f64`, so nothing is rounded.
pub fn encode(vertices: &[Vertex], faces: &[Face]) -> String {
    let mut out = String::with_capacity(vertices.len() * 32 + faces.len() * 16);
    for [x, y, z] in vertices {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "v {x} {y} {z}");
    }
    for [i, j, k] in faces {
        let _ = writeln!(out, "f {} {} {}", i + 1, j + 1, k + 1);
    }
    out
}

/// Decode mesh text back into 0-based vertex and face arrays.
///
/// Blank lines, `#` comments and the attribute records mesh exporters emit
/// (`vn`, `vt`, `o`, `g`, `s`, `usemtl`, `mtllib`) are skipped. Face tokens may
/// carry texture/normal references (`3/1/2`, `3//2`); only the vertex index is
/// kept.
pub fn decode(text: &str) -> Result<(Vec<Vertex>, Vec<Face>), MalformedMeshError> {
    let mut vertices = Vec::new();
    let mut faces = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.trim();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }

        let mut fields = content.split_whitespace();
        let Some(tag) = fields.next() else {
            continue;
        };
        let fields: Vec<&str> = fields.collect();

        match tag {
            "v" => vertices.push(parse_vertex(line, &fields)?),
            "f" => faces.push(parse_face(line, &fields)?),
            t if IGNORED_TAGS.contains(&t) => {}
            other => {
                return Err(MalformedMeshError::UnknownRecord {
                    line,
                    tag: other.to_string(),
                })
            }
        }
    }

    check_face_indices(&faces, vertices.len())?;
    Ok((vertices, faces))
}

fn parse_vertex(line: usize, fields: &[&str]) -> Result<Vertex, MalformedMeshError> {
    if fields.len() != 3 {
        return Err(MalformedMeshError::FieldCount {
            line,
            tag: "v",
            expected: 3,
            found: fields.len(),
        });
    }

    let mut vertex = [0.0; 3];
    for (slot, value) in vertex.iter_mut().zip(fields) {
        *slot = value
            .parse::<f64>()
            .ok()
            .filter(|c| c.is_finite())
            .ok_or_else(|| MalformedMeshError::InvalidCoordinate {
                line,
                value: value.to_string(),
            })?;
    }
    Ok(vertex)
}

fn parse_face(line: usize, fields: &[&str]) -> Result<Face, MalformedMeshError> {
    if fields.len() != 3 {
        return Err(MalformedMeshError::FieldCount {
            line,
            tag: "f",
            expected: 3,
            found: fields.len(),
        });
    }

    let mut face = [0usize; 3];
    for (slot, token) in face.iter_mut().zip(fields) {
        let vertex_ref = token.split('/').next().unwrap_or_default();
        let index: i64 = vertex_ref
            .parse()
            .map_err(|_| MalformedMeshError::InvalidIndex {
                line,
                value: token.to_string(),
            })?;
        if index <= 0 {
            return Err(MalformedMeshError::NonPositiveIndex { line, index });
        }
        *slot = (index - 1) as usize;
    }
    Ok(face)
}
