use serde::Serialize;

/// Number of audio features stored per track.
pub const FEATURE_DIM: usize = 4;

/// Feature column names, in the order they appear in every feature vector.
pub const FEATURE_COLUMNS: [&str; FEATURE_DIM] = ["danceability", "energy", "tempo", "valence"];

/// Data for inserting a track (import phase).
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrack {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub danceability: f64,
    pub energy: f64,
    pub tempo: f64,
    pub valence: f64,
}

impl NewTrack {
    pub fn features(&self) -> [f64; FEATURE_DIM] {
        [self.danceability, self.energy, self.tempo, self.valence]
    }
}

/// A track row read from the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    /// Row index shared by every pipeline artifact.
    pub position: usize,
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    #[serde(skip)]
    pub features: [f64; FEATURE_DIM],
}

pub struct LibraryStats {
    pub total_tracks: i64,
    pub artists: i64,
    /// (column, min, mean, max) per feature.
    pub feature_ranges: Vec<(String, f64, f64, f64)>,
    pub top_artists: Vec<(String, i64)>,
}
