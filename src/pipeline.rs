//! Offline pipeline: library → standardized features → similarity graph →
//! GraphSAGE embeddings → artifacts.
//!
//! The graph and training stages can run separately. Training reads the
//! graph back from the artifacts directory, so a `train` run always sees
//! exactly what the last `graph-build` wrote.

use anyhow::{Context, Result};
use chrono::Utc;

use crate::artifacts::{ArtifactDir, Manifest, TrainingSummary};
use crate::db::Database;
use crate::db::models::FEATURE_COLUMNS;
use crate::features::{raw_features, standardize};
use crate::graph::{GraphStats, build_graph};
use crate::model::{EMBEDDING_DIM, TrainConfig, train_embeddings, validate_shapes};

#[derive(Debug)]
pub struct GraphStageResult {
    pub stats: GraphStats,
}

#[derive(Debug)]
pub struct TrainStageResult {
    pub nodes: usize,
    pub epochs: usize,
    pub final_loss: Option<f32>,
}

#[derive(Debug)]
pub struct BuildResult {
    pub graph: GraphStageResult,
    pub training: TrainStageResult,
}

/// Standardize the library's features, threshold them into a graph, and
/// write `features.f32` + `edge_index.u32`. Any previous embeddings are
/// removed since they no longer match the graph.
pub fn run_graph_stage(
    db: &Database,
    artifacts: &ArtifactDir,
    threshold: f64,
    jobs: usize,
) -> Result<GraphStageResult> {
    let tracks = db.get_tracks().context("Failed to load tracks")?;
    let library_generation = db
        .library_generation()
        .context("Failed to read library generation")?;
    let raw = raw_features(&tracks);

    let (scaler, features) = standardize(&raw).context("Feature standardization failed")?;
    for (d, col) in FEATURE_COLUMNS.iter().enumerate() {
        log::debug!("{col}: mean {:.4}, std {:.4}", scaler.means[d], scaler.stds[d]);
    }

    println!(
        "Computing similarity graph for {} tracks (threshold {})...",
        tracks.len(),
        threshold
    );
    let graph = build_graph(&features, threshold, jobs).context("Failed to build worker pool")?;

    artifacts
        .write_graph(&features, &graph)
        .context("Failed to write graph artifacts")?;

    let embeddings_path = artifacts.embeddings_path();
    match std::fs::remove_file(&embeddings_path) {
        Ok(()) => log::info!("Removed stale {}", embeddings_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to remove {}", embeddings_path.display()));
        }
    }

    let stats = graph.stats();
    artifacts
        .write_manifest(&Manifest {
            nodes: stats.nodes,
            edges: stats.edges,
            threshold,
            library_generation,
            training: None,
            built_at: Utc::now(),
        })
        .context("Failed to write manifest")?;

    Ok(GraphStageResult { stats })
}

/// Train on the graph artifacts and write `embeddings.f32`.
pub fn run_train_stage(artifacts: &ArtifactDir, config: &TrainConfig) -> Result<TrainStageResult> {
    let features = artifacts
        .read_features()
        .context("Failed to read features. Run `tunegraph graph-build` first.")?;
    let graph = artifacts
        .read_graph(features.rows())
        .context("Failed to read edge index. Run `tunegraph graph-build` first.")?;
    validate_shapes(&features, &graph)?;
    let mut manifest = artifacts
        .read_manifest()
        .context("Failed to read manifest. Run `tunegraph graph-build` first.")?;

    println!(
        "Training embeddings for {} tracks ({} epochs)...",
        features.rows(),
        config.epochs
    );
    let result = train_embeddings(&features, &graph, config).context("Training failed")?;

    artifacts
        .write_embeddings(&result.embeddings)
        .context("Failed to write embeddings")?;

    manifest.training = Some(TrainingSummary {
        epochs: config.epochs,
        learning_rate: config.learning_rate,
        seed: config.seed,
        final_loss: result.final_loss(),
        embedding_dim: EMBEDDING_DIM,
    });
    manifest.built_at = Utc::now();
    artifacts
        .write_manifest(&manifest)
        .context("Failed to write manifest")?;

    Ok(TrainStageResult {
        nodes: features.rows(),
        epochs: config.epochs,
        final_loss: result.final_loss(),
    })
}

/// Full rebuild: graph stage followed by training.
pub fn run_build(
    db: &Database,
    artifacts: &ArtifactDir,
    threshold: f64,
    jobs: usize,
    config: &TrainConfig,
) -> Result<BuildResult> {
    let graph = run_graph_stage(db, artifacts, threshold, jobs)?;
    let training = run_train_stage(artifacts, config)?;
    Ok(BuildResult { graph, training })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewTrack;
    use crate::features::FeatureError;
    use crate::recommend::{Catalog, QueryError};

    fn library(n: usize) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.replace_tracks(&varied_tracks("t", n)).unwrap();
        db
    }

    fn varied_tracks(prefix: &str, n: usize) -> Vec<NewTrack> {
        (0..n)
            .map(|i| {
                let f = i as f64;
                NewTrack {
                    track_id: format!("{prefix}{i}"),
                    track_name: format!("{prefix} Song {i}"),
                    artist_name: format!("Artist {}", i % 3),
                    danceability: (f * 0.37).sin().abs(),
                    energy: (f * 0.91).cos().abs(),
                    tempo: 80.0 + (f * 13.0) % 90.0,
                    valence: ((f * 0.53).sin() + 1.0) / 2.0,
                }
            })
            .collect()
    }

    fn seeded() -> TrainConfig {
        TrainConfig {
            epochs: 30,
            seed: Some(42),
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_full_build_artifacts_are_row_aligned() {
        let db = library(24);
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactDir::new(dir.path());

        let result = run_build(&db, &artifacts, 0.85, 2, &seeded()).unwrap();
        assert_eq!(result.graph.stats.nodes, 24);
        assert_eq!(result.training.nodes, 24);

        let features = artifacts.read_features().unwrap();
        let embeddings = artifacts.read_embeddings().unwrap();
        assert_eq!((features.rows(), features.cols()), (24, 4));
        assert_eq!((embeddings.rows(), embeddings.cols()), (24, EMBEDDING_DIM));
        assert!(embeddings.is_finite());

        let manifest = artifacts.read_manifest().unwrap();
        assert_eq!(manifest.nodes, 24);
        assert_eq!(manifest.edges, result.graph.stats.edges);
        assert_eq!(manifest.library_generation, db.library_generation().unwrap());
        assert_eq!(manifest.training.unwrap().seed, Some(42));

        let catalog = Catalog::load(&db, &artifacts).unwrap();
        let recs = catalog.recommend(0, 5).unwrap();
        assert_eq!(recs.len(), 5);
        assert!(recs.iter().all(|r| r.index != 0));
    }

    #[test]
    fn test_graph_stage_removes_stale_embeddings() {
        let db = library(12);
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactDir::new(dir.path());
        run_build(&db, &artifacts, 0.85, 1, &seeded()).unwrap();
        assert!(artifacts.embeddings_path().exists());

        run_graph_stage(&db, &artifacts, 0.9, 1).unwrap();
        assert!(!artifacts.embeddings_path().exists());
        assert!(artifacts.read_manifest().unwrap().training.is_none());
    }

    #[test]
    fn test_degenerate_library_fails_fast() {
        let db = Database::open_in_memory().unwrap();
        let same = |id: &str| NewTrack {
            track_id: id.to_string(),
            track_name: "Same".to_string(),
            artist_name: "Same".to_string(),
            danceability: 0.5,
            energy: 0.5,
            tempo: 120.0,
            valence: 0.5,
        };
        db.replace_tracks(&[same("a"), same("b"), same("c")]).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = run_graph_stage(&db, &ArtifactDir::new(dir.path()), 0.85, 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FeatureError>(),
            Some(FeatureError::DegenerateFeature { .. })
        ));
    }

    #[test]
    fn test_train_without_graph_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_train_stage(&ArtifactDir::new(dir.path()), &seeded()).is_err());
    }

    #[test]
    fn test_catalog_rejects_library_changed_after_build() {
        let db = library(10);
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactDir::new(dir.path());
        run_build(&db, &artifacts, 0.85, 1, &seeded()).unwrap();

        let bigger = library(11);
        assert!(Catalog::load(&bigger, &artifacts).is_err());
    }

    #[test]
    fn test_reimport_of_same_size_needs_rebuild() {
        let db = library(12);
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactDir::new(dir.path());
        run_build(&db, &artifacts, 0.85, 1, &seeded()).unwrap();

        db.replace_tracks(&varied_tracks("new", 12)).unwrap();
        let err = Catalog::load(&db, &artifacts).unwrap_err();
        assert_eq!(
            err.downcast_ref::<QueryError>(),
            Some(&QueryError::StaleArtifacts { built: 1, current: 2 })
        );

        run_build(&db, &artifacts, 0.85, 1, &seeded()).unwrap();
        let catalog = Catalog::load(&db, &artifacts).unwrap();
        assert_eq!(catalog.list_tracks()[0].track_id, "new0");
    }

    #[test]
    fn test_train_without_manifest_writes_nothing() {
        let db = library(12);
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactDir::new(dir.path());
        run_graph_stage(&db, &artifacts, 0.85, 1).unwrap();
        std::fs::remove_file(artifacts.manifest_path()).unwrap();

        assert!(run_train_stage(&artifacts, &seeded()).is_err());
        assert!(!artifacts.embeddings_path().exists());
    }
}
