use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tunegraph::artifacts::ArtifactDir;
use tunegraph::db::models::Track;
use tunegraph::model::TrainConfig;
use tunegraph::recommend::{Catalog, DEFAULT_K, Recommendation};

#[derive(Parser)]
#[command(name = "tunegraph", version, about = "Graph-embedding music recommender")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Directory for features, edge index, and embeddings
    #[arg(long, global = true)]
    artifacts_dir: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an audio-features CSV, replacing the current library
    Import {
        /// CSV file with track_id/id, track_name, artist_name/artist_names,
        /// danceability, energy, tempo, valence columns
        csv: PathBuf,

        /// Keep at most this many tracks (random sample)
        #[arg(long)]
        limit: Option<usize>,

        /// Seed for the sampling step
        #[arg(long)]
        seed: Option<u64>,

        /// Keep every usable row
        #[arg(long, conflicts_with = "limit")]
        no_sample: bool,
    },

    /// Build the similarity graph, train embeddings, and write artifacts
    Build {
        /// Cosine similarity threshold for an edge
        #[arg(long)]
        threshold: Option<f64>,

        /// Number of training epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Weight init seed (unset = random)
        #[arg(long)]
        seed: Option<u64>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Only build the similarity graph (features + edge index)
    GraphBuild {
        /// Cosine similarity threshold for an edge
        #[arg(long)]
        threshold: Option<f64>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Only train embeddings on the last built graph
    Train {
        /// Number of training epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Adam learning rate
        #[arg(long)]
        lr: Option<f32>,

        /// Weight init seed (unset = random)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List every track with its index
    Songs {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Recommend tracks similar to the track at an index
    Recommend {
        /// Track index (see `tunegraph songs`)
        index: usize,

        /// Number of results
        #[arg(short, default_value_t = DEFAULT_K)]
        k: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the query-centered recommendation graph as JSON
    Graph {
        /// Track index (see `tunegraph songs`)
        index: usize,

        /// Number of neighbors
        #[arg(short, default_value_t = DEFAULT_K)]
        k: usize,
    },

    /// Show library and artifact statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = tunegraph::config::AppConfig::load();

    // Resolve paths: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(tunegraph::config::default_db_path);
    let artifacts_dir = cli
        .artifacts_dir
        .or(config.artifacts_dir.clone())
        .unwrap_or_else(tunegraph::config::default_artifacts_dir);
    log::info!("Database: {}", db_path.display());
    log::info!("Artifacts: {}", artifacts_dir.display());

    let db = tunegraph::db::Database::open(&db_path).context("Failed to open database")?;
    let artifacts = ArtifactDir::new(artifacts_dir);

    let train_config = |epochs: Option<usize>, lr: Option<f32>, seed: Option<u64>| TrainConfig {
        epochs: epochs.unwrap_or(config.training.epochs),
        learning_rate: lr.unwrap_or(config.training.learning_rate),
        seed: seed.or(config.training.seed),
    };

    match cli.command {
        Commands::Import { csv, limit, seed, no_sample } => {
            // 0 in the config file means no cap
            let limit = if no_sample {
                None
            } else {
                limit.or(Some(config.import.limit).filter(|&l| l > 0))
            };
            let options = tunegraph::dataset::ImportOptions {
                limit,
                seed: seed.unwrap_or(config.import.seed),
            };
            let result = tunegraph::dataset::import_csv(&db, &csv, &options)
                .with_context(|| format!("Import of {} failed", csv.display()))?;
            println!(
                "Import complete: {} read, {} incomplete, {} duplicate, {} imported",
                result.read, result.incomplete, result.duplicates, result.imported
            );
            if result.imported < result.kept {
                println!(
                    "Sampled {} of {} usable rows (seed {})",
                    result.imported, result.kept, options.seed
                );
            }
        }

        Commands::Build { threshold, epochs, seed, jobs } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let threshold = threshold.unwrap_or(config.graph.threshold);
            let result = tunegraph::pipeline::run_build(
                &db,
                &artifacts,
                threshold,
                workers,
                &train_config(epochs, None, seed),
            )
            .context("Build failed")?;
            let g = &result.graph.stats;
            println!(
                "Build complete: {} tracks, {} edges (avg degree {:.1}, {} isolated)",
                g.nodes, g.edges, g.avg_degree, g.isolated
            );
            print_training(&result.training);
        }

        Commands::GraphBuild { threshold, jobs } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let threshold = threshold.unwrap_or(config.graph.threshold);
            let result = tunegraph::pipeline::run_graph_stage(&db, &artifacts, threshold, workers)
                .context("Graph build failed")?;
            let g = &result.stats;
            println!(
                "Graph complete: {} tracks, {} edges (avg degree {:.1}, {} isolated)",
                g.nodes, g.edges, g.avg_degree, g.isolated
            );
        }

        Commands::Train { epochs, lr, seed } => {
            let training = train_config(epochs, lr, seed);
            let result = tunegraph::pipeline::run_train_stage(&artifacts, &training)
                .context("Training failed")?;
            print_training(&result);
        }

        Commands::Songs { json } => {
            let tracks = db.get_tracks().context("Failed to load tracks")?;
            if tracks.is_empty() {
                println!("Library is empty. Run `tunegraph import <csv>` first.");
                return Ok(());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&tracks)?);
            } else {
                print_track_table(&tracks);
            }
        }

        Commands::Recommend { index, k, json } => {
            let catalog = Catalog::load(&db, &artifacts)?;
            let query = catalog.track(index)?;
            let recs = catalog.recommend(index, k)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&recs)?);
            } else {
                println!("Tracks similar to \"{}\" by {}:", query.track_name, query.artist_name);
                println!();
                print_recommendation_table(&recs);
            }
        }

        Commands::Graph { index, k } => {
            let catalog = Catalog::load(&db, &artifacts)?;
            let view = catalog.graph_view(index, k)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Library Statistics");
            println!("==================");
            println!("Total tracks:     {}", stats.total_tracks);
            println!("Artists:          {}", stats.artists);
            println!();

            if !stats.feature_ranges.is_empty() {
                println!("{:<14} {:>9} {:>9} {:>9}", "Feature", "Min", "Mean", "Max");
                for (col, min, mean, max) in &stats.feature_ranges {
                    println!("  {:<12} {:>9.3} {:>9.3} {:>9.3}", col, min, mean, max);
                }
                println!();
            }

            if !stats.top_artists.is_empty() {
                println!("Top artists:");
                for (artist, count) in &stats.top_artists {
                    println!("  {:<30} {}", artist, count);
                }
                println!();
            }

            match artifacts.read_manifest() {
                Ok(m) => {
                    println!("Artifacts ({}):", artifacts.root().display());
                    println!("  Built:          {}", m.built_at.to_rfc3339());
                    println!("  Nodes / edges:  {} / {}", m.nodes, m.edges);
                    println!("  Threshold:      {}", m.threshold);
                    match m.training {
                        Some(t) => println!(
                            "  Training:       {} epochs, lr {}, final loss {}",
                            t.epochs,
                            t.learning_rate,
                            t.final_loss.map_or("-".to_string(), |l| format!("{l:.4}"))
                        ),
                        None => println!("  Training:       not run"),
                    }
                }
                Err(e) => {
                    log::debug!("No manifest: {e}");
                    println!("No artifacts yet. Run `tunegraph build`.");
                }
            }
        }
    }

    Ok(())
}

/// Clip a display string to `width` characters.
fn clip(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

fn print_training(result: &tunegraph::pipeline::TrainStageResult) {
    match result.final_loss {
        Some(loss) => println!(
            "Training complete: {} embeddings after {} epochs (final loss {:.4})",
            result.nodes, result.epochs, loss
        ),
        None => println!("Training complete: {} embeddings, 0 epochs", result.nodes),
    }
}

/// Print the library with each track's index.
fn print_track_table(tracks: &[Track]) {
    println!(
        "{:>5}  {:<30} {:<25} {:>5} {:>5} {:>6} {:>5}",
        "Idx", "Track", "Artist", "Dnc", "Eng", "BPM", "Val"
    );
    println!("{}", "-".repeat(90));

    for t in tracks {
        let [dance, energy, tempo, valence] = t.features;
        println!(
            "{:>5}  {:<30} {:<25} {:>5.2} {:>5.2} {:>6.1} {:>5.2}",
            t.position,
            clip(&t.track_name, 30),
            clip(&t.artist_name, 25),
            dance,
            energy,
            tempo,
            valence,
        );
    }

    println!();
    println!("Dnc=Danceability  Eng=Energy  Val=Valence");
}

/// Print recommendations with their cosine scores.
fn print_recommendation_table(recs: &[Recommendation]) {
    if recs.is_empty() {
        println!("No recommendations.");
        return;
    }

    println!("{:>5}  {:<30} {:<25} {:>6}", "Idx", "Track", "Artist", "Score");
    println!("{}", "-".repeat(70));

    for r in recs {
        println!(
            "{:>5}  {:<30} {:<25} {:>6.3}",
            r.index,
            clip(&r.track_name, 30),
            clip(&r.artist_name, 25),
            r.score,
        );
    }

    println!();
    println!("Score = cosine similarity of embeddings (1 = identical direction)");
}
