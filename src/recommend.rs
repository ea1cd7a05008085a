//! Nearest-neighbor lookups over a trained embedding matrix.
//!
//! A [`Catalog`] pairs the track list with its embeddings. It is built once,
//! never mutated, and can be shared behind an `Arc` by any number of readers.
//! A rebuilt pipeline produces a new catalog rather than patching this one.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;

use crate::artifacts::ArtifactDir;
use crate::db::Database;
use crate::db::models::Track;
use crate::matrix::{Matrix, cosine_similarity};

/// Default number of recommendations per query.
pub const DEFAULT_K: usize = 5;

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("track index {index} out of range (catalog has {len} tracks)")]
    OutOfRange { index: usize, len: usize },
    #[error("graph/feature shape mismatch: {tracks} tracks but {rows} embedding rows")]
    ShapeMismatch { tracks: usize, rows: usize },
    #[error("artifacts were built from library generation {built}, library is now at {current}")]
    StaleArtifacts { built: u64, current: u64 },
}

/// A neighbor of the query row with its cosine similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub index: usize,
    pub score: f64,
}

/// Top-`k` rows most similar to row `index`, excluding `index` itself.
///
/// Scores are sorted descending; equal scores keep ascending index order.
/// The query row is compared against every row, the best `k + 1` are kept,
/// and the query row is dropped from those by index.
pub fn nearest(embeddings: &Matrix, index: usize, k: usize) -> Result<Vec<Neighbor>, QueryError> {
    let len = embeddings.rows();
    if index >= len {
        return Err(QueryError::OutOfRange { index, len });
    }

    let query = embeddings.row(index);
    let mut scored: Vec<Neighbor> = embeddings
        .iter_rows()
        .enumerate()
        .map(|(i, row)| Neighbor {
            index: i,
            score: cosine_similarity(query, row),
        })
        .collect();

    scored.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.index.cmp(&b.index),
        ord => ord,
    });
    scored.truncate(k.saturating_add(1));
    scored.retain(|n| n.index != index);
    scored.truncate(k);
    Ok(scored)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub index: usize,
    pub track_name: String,
    pub artist_name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeGroup {
    Query,
    Recommended,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: usize,
    pub label: String,
    pub group: NodeGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub weight: f64,
}

/// Query-centered star graph for visualization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Immutable snapshot of the tracks and their embeddings.
#[derive(Debug)]
pub struct Catalog {
    tracks: Vec<Track>,
    embeddings: Matrix,
}

pub type SharedCatalog = Arc<Catalog>;

impl Catalog {
    pub fn new(tracks: Vec<Track>, embeddings: Matrix) -> Result<Self, QueryError> {
        if tracks.len() != embeddings.rows() {
            return Err(QueryError::ShapeMismatch {
                tracks: tracks.len(),
                rows: embeddings.rows(),
            });
        }
        Ok(Self { tracks, embeddings })
    }

    /// Load tracks from the library and embeddings from the artifacts directory.
    /// Artifacts built from an earlier import are refused.
    pub fn load(db: &Database, artifacts: &ArtifactDir) -> Result<SharedCatalog> {
        let manifest = artifacts
            .read_manifest()
            .context("Failed to read manifest. Run `tunegraph build` first.")?;
        let current = db
            .library_generation()
            .context("Failed to read library generation")?;
        if manifest.library_generation != current {
            return Err(QueryError::StaleArtifacts {
                built: manifest.library_generation,
                current,
            })
            .context("Library changed since the last build. Re-run `tunegraph build`.");
        }

        let tracks = db.get_tracks().context("Failed to load tracks")?;
        let embeddings = artifacts
            .read_embeddings()
            .context("Failed to load embeddings. Run `tunegraph build` first.")?;
        let catalog = Self::new(tracks, embeddings)
            .context("Library changed since the last build. Re-run `tunegraph build`.")?;
        if catalog.is_empty() {
            log::warn!("Catalog is empty; every query will be out of range");
        }
        log::info!(
            "Catalog loaded: {} tracks, {}-dim embeddings",
            catalog.len(),
            catalog.embeddings.cols()
        );
        Ok(Arc::new(catalog))
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn list_tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Result<&Track, QueryError> {
        self.tracks.get(index).ok_or(QueryError::OutOfRange {
            index,
            len: self.tracks.len(),
        })
    }

    pub fn recommend(&self, index: usize, k: usize) -> Result<Vec<Recommendation>, QueryError> {
        Ok(nearest(&self.embeddings, index, k)?
            .into_iter()
            .map(|n| {
                let t = &self.tracks[n.index];
                Recommendation {
                    index: n.index,
                    track_name: t.track_name.clone(),
                    artist_name: t.artist_name.clone(),
                    score: n.score,
                }
            })
            .collect())
    }

    pub fn graph_view(&self, index: usize, k: usize) -> Result<GraphView, QueryError> {
        let query = self.track(index)?;
        let neighbors = nearest(&self.embeddings, index, k)?;

        let mut nodes = Vec::with_capacity(neighbors.len() + 1);
        nodes.push(GraphNode {
            id: index,
            label: query.track_name.clone(),
            group: NodeGroup::Query,
        });
        let mut edges = Vec::with_capacity(neighbors.len());
        for n in neighbors {
            nodes.push(GraphNode {
                id: n.index,
                label: self.tracks[n.index].track_name.clone(),
                group: NodeGroup::Recommended,
            });
            edges.push(GraphEdge {
                from: index,
                to: n.index,
                weight: n.score,
            });
        }

        Ok(GraphView { nodes, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embeddings() -> Matrix {
        Matrix::from_rows(&[
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![0.7, 0.7, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![-1.0, 0.0, 0.0],
        ])
        .unwrap()
    }

    fn track(position: usize) -> Track {
        Track {
            position,
            track_id: format!("id{position}"),
            track_name: format!("track{position}"),
            artist_name: format!("artist{position}"),
            features: [0.0; 4],
        }
    }

    fn catalog() -> Catalog {
        Catalog::new((0..5).map(track).collect(), embeddings()).unwrap()
    }

    #[test]
    fn test_nearest_excludes_query_in_descending_order() {
        let result = nearest(&embeddings(), 0, 2).unwrap();
        let idx: Vec<_> = result.iter().map(|n| n.index).collect();
        assert_eq!(idx, vec![1, 2]);
        assert!(result[0].score >= result[1].score);
    }

    #[test]
    fn test_nearest_properties_for_every_query() {
        let m = embeddings();
        for q in 0..m.rows() {
            for k in 0..=6 {
                let result = nearest(&m, q, k).unwrap();
                assert!(result.len() <= k);
                assert!(result.iter().all(|n| n.index != q));
                assert!(result.windows(2).all(|w| w[0].score >= w[1].score));
            }
        }
    }

    #[test]
    fn test_k_larger_than_catalog() {
        let result = nearest(&embeddings(), 3, 50).unwrap();
        assert_eq!(result.len(), 4);
        assert_eq!(result.last().unwrap().index, 4);
    }

    #[test]
    fn test_k_zero_is_empty_not_error() {
        assert_eq!(nearest(&embeddings(), 0, 0).unwrap(), Vec::new());
    }

    #[test]
    fn test_ties_break_by_ascending_index() {
        let m = Matrix::from_rows(&[
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.0, 2.0],
            vec![0.0, 3.0],
        ])
        .unwrap();
        let idx: Vec<_> = nearest(&m, 0, 3).unwrap().iter().map(|n| n.index).collect();
        assert_eq!(idx, vec![1, 2, 3]);
    }

    #[test]
    fn test_out_of_range_query() {
        let m = Matrix::zeros(10, 64);
        assert_eq!(
            nearest(&m, 99, 5),
            Err(QueryError::OutOfRange { index: 99, len: 10 })
        );
        assert_eq!(
            catalog().recommend(5, 1).err(),
            Some(QueryError::OutOfRange { index: 5, len: 5 })
        );
    }

    #[test]
    fn test_list_tracks_in_row_order() {
        let cat = catalog();
        assert_eq!(cat.len(), 5);
        assert!(!cat.is_empty());
        let ids: Vec<_> = cat.list_tracks().iter().map(|t| t.track_id.as_str()).collect();
        assert_eq!(ids, vec!["id0", "id1", "id2", "id3", "id4"]);

        let empty = Catalog::new(Vec::new(), Matrix::zeros(0, 64)).unwrap();
        assert!(empty.is_empty());
        assert!(empty.list_tracks().is_empty());
    }

    #[test]
    fn test_catalog_shape_mismatch() {
        let err = Catalog::new((0..3).map(track).collect(), embeddings()).unwrap_err();
        assert_eq!(err, QueryError::ShapeMismatch { tracks: 3, rows: 5 });
    }

    #[test]
    fn test_recommend_carries_display_fields() {
        let recs = catalog().recommend(0, 2).unwrap();
        assert_eq!(recs[0].track_name, "track1");
        assert_eq!(recs[0].artist_name, "artist1");
        assert_eq!(recs[1].index, 2);
    }

    #[test]
    fn test_graph_view_payload() {
        let view = catalog().graph_view(0, 2).unwrap();
        assert_eq!(view.nodes.len(), 3);
        assert_eq!(view.nodes[0].group, NodeGroup::Query);
        assert_eq!(view.nodes[0].label, "track0");
        assert!(view.nodes[1..].iter().all(|n| n.group == NodeGroup::Recommended));
        assert_eq!(view.edges.len(), 2);
        assert!(view.edges.iter().all(|e| e.from == 0));
        assert_eq!(view.edges[0].to, 1);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["nodes"][0]["group"], "query");
        assert_eq!(json["edges"][1]["to"], 2);
    }

    #[test]
    fn test_graph_view_out_of_range() {
        assert!(matches!(
            catalog().graph_view(42, 3),
            Err(QueryError::OutOfRange { index: 42, .. })
        ));
    }

    #[test]
    fn test_shared_catalog_concurrent_reads() {
        let shared: SharedCatalog = Arc::new(catalog());
        std::thread::scope(|s| {
            for q in 0..shared.len() {
                let cat = Arc::clone(&shared);
                s.spawn(move || {
                    let recs = cat.recommend(q, 3).unwrap();
                    assert!(recs.iter().all(|r| r.index != q));
                });
            }
        });
    }
}
