//! Import a raw audio-features CSV into the track library.
//!
//! Source exports name some columns differently (`id`, `artist_names`); those
//! are mapped onto the canonical names. Rows with a missing field or a
//! non-numeric feature are dropped, as are repeated track ids. If more rows
//! survive than the configured cap, a seeded random sample is kept instead.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::db::models::NewTrack;
use crate::db::{Database, DbError};

pub const DEFAULT_LIMIT: usize = 500;
pub const DEFAULT_SEED: u64 = 42;

const REQUIRED_COLUMNS: [&str; 7] = [
    "track_id",
    "track_name",
    "artist_name",
    "danceability",
    "energy",
    "tempo",
    "valence",
];

/// Source column name → canonical column name.
const COLUMN_ALIASES: [(&str, &str); 2] = [("id", "track_id"), ("artist_names", "artist_name")];

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("no usable rows in input ({read} read, all dropped)")]
    Empty { read: usize },
    #[error(transparent)]
    Db(#[from] DbError),
}

pub type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Keep at most this many rows. `None` keeps everything.
    pub limit: Option<usize>,
    pub seed: u64,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            limit: Some(DEFAULT_LIMIT),
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReadStats {
    pub read: usize,
    pub incomplete: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportResult {
    pub read: usize,
    pub incomplete: usize,
    pub duplicates: usize,
    /// Rows that survived filtering, before sampling.
    pub kept: usize,
    /// Rows written to the library.
    pub imported: usize,
}

/// Resolve the column index of every required field.
fn column_positions(headers: &csv::StringRecord) -> Result<[usize; 7]> {
    let names: Vec<&str> = headers.iter().map(str::trim).collect();
    let mut positions = [0usize; 7];
    for (slot, &required) in REQUIRED_COLUMNS.iter().enumerate() {
        let exact = names.iter().position(|&h| h == required);
        let aliased = || {
            COLUMN_ALIASES
                .iter()
                .filter(|(_, canonical)| *canonical == required)
                .find_map(|(alias, _)| names.iter().position(|h| h == alias))
        };
        positions[slot] = exact
            .or_else(aliased)
            .ok_or(DatasetError::MissingColumn(required))?;
    }
    Ok(positions)
}

/// Parse one record. `None` if any required field is missing or malformed.
fn parse_record(record: &csv::StringRecord, pos: &[usize; 7]) -> Option<NewTrack> {
    let text = |slot: usize| {
        record
            .get(pos[slot])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let number = |slot: usize| {
        record
            .get(pos[slot])
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };

    Some(NewTrack {
        track_id: text(0)?,
        track_name: text(1)?,
        artist_name: text(2)?,
        danceability: number(3)?,
        energy: number(4)?,
        tempo: number(5)?,
        valence: number(6)?,
    })
}

/// Read and filter tracks from CSV input, preserving input order.
pub fn read_tracks<R: Read>(reader: R) -> Result<(Vec<NewTrack>, ReadStats)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let positions = column_positions(rdr.headers()?)?;

    let mut stats = ReadStats::default();
    let mut seen = HashSet::new();
    let mut tracks = Vec::new();

    for result in rdr.records() {
        let record = result?;
        stats.read += 1;
        match parse_record(&record, &positions) {
            None => stats.incomplete += 1,
            Some(t) if !seen.insert(t.track_id.clone()) => stats.duplicates += 1,
            Some(t) => tracks.push(t),
        }
    }

    log::debug!(
        "Read {} rows: {} incomplete, {} duplicate ids",
        stats.read,
        stats.incomplete,
        stats.duplicates
    );
    Ok((tracks, stats))
}

/// Keep at most `limit` tracks. When over the limit, draw a seeded random
/// sample without replacement; the sample order becomes the new row order.
pub fn sample_tracks(tracks: Vec<NewTrack>, limit: Option<usize>, seed: u64) -> Vec<NewTrack> {
    let limit = match limit {
        Some(l) if l < tracks.len() => l,
        _ => return tracks,
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let picked = rand::seq::index::sample(&mut rng, tracks.len(), limit);

    let mut slots: Vec<Option<NewTrack>> = tracks.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

/// Import a CSV file into the library, replacing any previous tracks.
pub fn import_csv(db: &Database, path: &Path, options: &ImportOptions) -> Result<ImportResult> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    import_reader(db, file, options)
}

pub fn import_reader<R: Read>(
    db: &Database,
    reader: R,
    options: &ImportOptions,
) -> Result<ImportResult> {
    let (tracks, stats) = read_tracks(reader)?;
    if tracks.is_empty() {
        return Err(DatasetError::Empty { read: stats.read });
    }

    let kept = tracks.len();
    let sampled = sample_tracks(tracks, options.limit, options.seed);
    if sampled.len() < kept {
        log::info!("Sampled {} of {} tracks (seed {})", sampled.len(), kept, options.seed);
    }
    let imported = db.replace_tracks(&sampled)?;

    Ok(ImportResult {
        read: stats.read,
        incomplete: stats.incomplete,
        duplicates: stats.duplicates,
        kept,
        imported,
    })
}
