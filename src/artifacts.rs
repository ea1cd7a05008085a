//! Flat numeric array files written by the pipeline.
//!
//! Layout of every array file:
//!
//! ```text
//! magic   8 bytes   "TGARRAY1"
//! dtype   1 byte    0 = f32, 1 = u32
//! rows    u64 LE
//! cols    u64 LE
//! data    rows × cols little-endian values, row-major
//! ```
//!
//! Row `i` of `features.f32` and `embeddings.f32` refers to the track at
//! library position `i`. `edge_index.u32` is `2 × E`: row 0 holds sources,
//! row 1 destinations.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::SimilarityGraph;
use crate::matrix::Matrix;

const MAGIC: &[u8; 8] = b"TGARRAY1";
const HEADER_LEN: usize = 8 + 1 + 8 + 8;

pub const FEATURES_FILE: &str = "features.f32";
pub const EDGE_INDEX_FILE: &str = "edge_index.u32";
pub const EMBEDDINGS_FILE: &str = "embeddings.f32";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not an array file (bad magic)")]
    BadMagic(PathBuf),
    #[error("{path}: expected dtype {expected:?}, found {found}")]
    WrongDtype {
        path: PathBuf,
        expected: Dtype,
        found: u8,
    },
    #[error("{path}: header says {expected} bytes of data, file has {actual}")]
    Truncated {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("{path}: {detail}")]
    Shape { path: PathBuf, detail: String },
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Dtype {
    F32 = 0,
    U32 = 1,
}

/// Summary of a pipeline run, stored next to the arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub nodes: usize,
    pub edges: usize,
    pub threshold: f64,
    /// Library generation the arrays were built from. Manifests written
    /// before generations existed read as 0 and never match a live library.
    #[serde(default)]
    pub library_generation: u64,
    /// `None` when only the graph stage ran.
    pub training: Option<TrainingSummary>,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub learning_rate: f32,
    pub seed: Option<u64>,
    pub final_loss: Option<f32>,
    pub embedding_dim: usize,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_array(
    path: &Path,
    dtype: Dtype,
    rows: usize,
    cols: usize,
    values: &[[u8; 4]],
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let file = fs::File::create(path).map_err(io_err(path))?;
    let mut w = BufWriter::new(file);

    let mut write = || -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&[dtype as u8])?;
        w.write_all(&(rows as u64).to_le_bytes())?;
        w.write_all(&(cols as u64).to_le_bytes())?;
        for v in values {
            w.write_all(v)?;
        }
        w.flush()
    };
    write().map_err(io_err(path))
}

/// Returns (rows, cols, raw 4-byte values).
fn read_array(path: &Path, dtype: Dtype) -> Result<(usize, usize, Vec<[u8; 4]>)> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        return Err(ArtifactError::BadMagic(path.to_path_buf()));
    }
    if bytes[8] != dtype as u8 {
        return Err(ArtifactError::WrongDtype {
            path: path.to_path_buf(),
            expected: dtype,
            found: bytes[8],
        });
    }

    let read_u64 = |at: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[at..at + 8]);
        u64::from_le_bytes(buf) as usize
    };
    let rows = read_u64(9);
    let cols = read_u64(17);

    let data = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| ArtifactError::Shape {
            path: path.to_path_buf(),
            detail: format!("{rows} × {cols} overflows"),
        })?;
    if data.len() != expected {
        return Err(ArtifactError::Truncated {
            path: path.to_path_buf(),
            expected,
            actual: data.len(),
        });
    }

    let values = data
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect();
    Ok((rows, cols, values))
}

pub fn write_matrix(path: &Path, m: &Matrix) -> Result<()> {
    let values: Vec<[u8; 4]> = m.as_slice().iter().map(|v| v.to_le_bytes()).collect();
    write_array(path, Dtype::F32, m.rows(), m.cols(), &values)
}

pub fn read_matrix(path: &Path) -> Result<Matrix> {
    let (rows, cols, values) = read_array(path, Dtype::F32)?;
    let data = values.into_iter().map(f32::from_le_bytes).collect();
    Matrix::from_vec(rows, cols, data).ok_or_else(|| ArtifactError::Shape {
        path: path.to_path_buf(),
        detail: format!("data does not fill {rows} × {cols}"),
    })
}

/// Write the edge list as a `2 × E` index array.
pub fn write_edge_index(path: &Path, graph: &SimilarityGraph) -> Result<()> {
    let mut values = Vec::with_capacity(graph.edges.len() * 2);
    for row in 0..2 {
        for &(src, dst) in &graph.edges {
            let v = if row == 0 { src } else { dst };
            let v = u32::try_from(v).map_err(|_| ArtifactError::Shape {
                path: path.to_path_buf(),
                detail: format!("node index {v} does not fit in u32"),
            })?;
            values.push(v.to_le_bytes());
        }
    }
    write_array(path, Dtype::U32, 2, graph.edges.len(), &values)
}

/// Read a `2 × E` index array back into a graph over `num_nodes` nodes.
pub fn read_edge_index(path: &Path, num_nodes: usize) -> Result<SimilarityGraph> {
    let (rows, cols, values) = read_array(path, Dtype::U32)?;
    if rows != 2 {
        return Err(ArtifactError::Shape {
            path: path.to_path_buf(),
            detail: format!("edge index must have 2 rows, found {rows}"),
        });
    }
    let idx: Vec<usize> = values
        .into_iter()
        .map(|b| u32::from_le_bytes(b) as usize)
        .collect();
    let edges = (0..cols).map(|e| (idx[e], idx[cols + e])).collect();
    Ok(SimilarityGraph::from_edges(num_nodes, edges))
}

/// The fixed set of files inside one artifacts directory.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn features_path(&self) -> PathBuf {
        self.root.join(FEATURES_FILE)
    }

    pub fn edge_index_path(&self) -> PathBuf {
        self.root.join(EDGE_INDEX_FILE)
    }

    pub fn embeddings_path(&self) -> PathBuf {
        self.root.join(EMBEDDINGS_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn write_graph(&self, features: &Matrix, graph: &SimilarityGraph) -> Result<()> {
        write_matrix(&self.features_path(), features)?;
        write_edge_index(&self.edge_index_path(), graph)
    }

    pub fn write_embeddings(&self, embeddings: &Matrix) -> Result<()> {
        write_matrix(&self.embeddings_path(), embeddings)
    }

    pub fn read_features(&self) -> Result<Matrix> {
        read_matrix(&self.features_path())
    }

    pub fn read_graph(&self, num_nodes: usize) -> Result<SimilarityGraph> {
        read_edge_index(&self.edge_index_path(), num_nodes)
    }

    pub fn read_embeddings(&self) -> Result<Matrix> {
        read_matrix(&self.embeddings_path())
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;
        let path = self.manifest_path();
        let json = serde_json::to_string_pretty(manifest)?;
        fs::write(&path, json).map_err(io_err(&path))
    }

    pub fn read_manifest(&self) -> Result<Manifest> {
        let path = self.manifest_path();
        let json = fs::read_to_string(&path).map_err(io_err(&path))?;
        Ok(serde_json::from_str(&json)?)
    }
}
