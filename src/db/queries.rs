use super::models::{FEATURE_COLUMNS, LibraryStats, NewTrack, Track};
use super::{Database, Result};
use rusqlite::params;

impl Database {
    /// Replace the whole track table and bump the library generation.
    /// Slice order becomes row order.
    pub fn replace_tracks(&self, tracks: &[NewTrack]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM tracks", [])?;
        tx.execute("UPDATE library_meta SET generation = generation + 1 WHERE id = 1", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO tracks (
                    position, track_id, track_name, artist_name,
                    danceability, energy, tempo, valence
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (position, t) in tracks.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    t.track_id,
                    t.track_name,
                    t.artist_name,
                    t.danceability,
                    t.energy,
                    t.tempo,
                    t.valence,
                ])?;
            }
        }
        tx.commit()?;
        Ok(tracks.len())
    }

    /// All tracks in row order.
    pub fn get_tracks(&self) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare(
            "SELECT position, track_id, track_name, artist_name,
                    danceability, energy, tempo, valence
             FROM tracks ORDER BY position",
        )?;

        let tracks = stmt
            .query_map([], |row| {
                let position: i64 = row.get(0)?;
                Ok(Track {
                    position: position as usize,
                    track_id: row.get(1)?,
                    track_name: row.get(2)?,
                    artist_name: row.get(3)?,
                    features: [row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(tracks)
    }

    /// Number of imports applied to this library so far.
    pub fn library_generation(&self) -> Result<u64> {
        let generation: i64 = self.conn.query_row(
            "SELECT generation FROM library_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(generation as u64)
    }

    pub fn track_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let total_tracks: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;

        let artists: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT artist_name) FROM tracks",
            [],
            |row| row.get(0),
        )?;

        let mut feature_ranges = Vec::with_capacity(FEATURE_COLUMNS.len());
        if total_tracks > 0 {
            for col in FEATURE_COLUMNS {
                // Column names come from a fixed list, never user input
                let sql = format!("SELECT MIN({col}), AVG({col}), MAX({col}) FROM tracks");
                let (min, mean, max): (f64, f64, f64) = self
                    .conn
                    .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
                feature_ranges.push((col.to_string(), min, mean, max));
            }
        }

        let mut artist_stmt = self.conn.prepare(
            "SELECT artist_name, COUNT(*)
             FROM tracks
             GROUP BY artist_name
             ORDER BY COUNT(*) DESC, artist_name
             LIMIT 20",
        )?;
        let top_artists: Vec<(String, i64)> = artist_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LibraryStats {
            total_tracks,
            artists,
            feature_ranges,
            top_artists,
        })
    }
}
