//! Z-score standardization of the raw audio features.
//!
//! Column statistics are fitted once over the full table and kept in a
//! [`Standardizer`], so the same transform can be re-applied to new rows
//! without refitting.

use thiserror::Error;

use crate::db::models::{FEATURE_COLUMNS, FEATURE_DIM, Track};
use crate::matrix::Matrix;

/// Standard deviations below this are treated as zero variance.
const MIN_STD: f64 = 1e-12;

#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error("degenerate feature: column '{column}' has zero variance")]
    DegenerateFeature { column: &'static str },
    #[error("need at least 2 tracks to standardize features, got {0}")]
    TooFewTracks(usize),
}

/// Fitted per-column mean and population standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    pub means: [f64; FEATURE_DIM],
    pub stds: [f64; FEATURE_DIM],
}

impl Standardizer {
    /// Fit column statistics over all rows.
    pub fn fit(rows: &[[f64; FEATURE_DIM]]) -> Result<Self, FeatureError> {
        let n = rows.len();
        if n < 2 {
            return Err(FeatureError::TooFewTracks(n));
        }

        let mut means = [0.0_f64; FEATURE_DIM];
        for row in rows {
            for (d, &val) in row.iter().enumerate() {
                means[d] += val;
            }
        }
        for m in &mut means {
            *m /= n as f64;
        }

        let mut vars = [0.0_f64; FEATURE_DIM];
        for row in rows {
            for (d, &val) in row.iter().enumerate() {
                let diff = val - means[d];
                vars[d] += diff * diff;
            }
        }

        let mut stds = [0.0_f64; FEATURE_DIM];
        for d in 0..FEATURE_DIM {
            stds[d] = (vars[d] / n as f64).sqrt();
            if !(stds[d] > MIN_STD) {
                return Err(FeatureError::DegenerateFeature {
                    column: FEATURE_COLUMNS[d],
                });
            }
        }

        Ok(Self { means, stds })
    }

    /// Apply the fitted transform to one row.
    pub fn transform_row(&self, row: &[f64; FEATURE_DIM]) -> [f32; FEATURE_DIM] {
        let mut out = [0.0_f32; FEATURE_DIM];
        for d in 0..FEATURE_DIM {
            out[d] = ((row[d] - self.means[d]) / self.stds[d]) as f32;
        }
        out
    }

    /// Apply the fitted transform to every row, producing an N×D matrix.
    pub fn transform(&self, rows: &[[f64; FEATURE_DIM]]) -> Matrix {
        let mut m = Matrix::zeros(rows.len(), FEATURE_DIM);
        for (i, row) in rows.iter().enumerate() {
            m.row_mut(i).copy_from_slice(&self.transform_row(row));
        }
        m
    }
}

/// Fit on `rows` and return both the statistics and the standardized matrix.
pub fn standardize(rows: &[[f64; FEATURE_DIM]]) -> Result<(Standardizer, Matrix), FeatureError> {
    let scaler = Standardizer::fit(rows)?;
    let matrix = scaler.transform(rows);
    Ok((scaler, matrix))
}

/// Raw feature rows in library order.
pub fn raw_features(tracks: &[Track]) -> Vec<[f64; FEATURE_DIM]> {
    tracks.iter().map(|t| t.features).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_stats(m: &Matrix, col: usize) -> (f64, f64) {
        let n = m.rows() as f64;
        let mean = m.iter_rows().map(|r| r[col] as f64).sum::<f64>() / n;
        let var = m
            .iter_rows()
            .map(|r| (r[col] as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        (mean, var.sqrt())
    }

    #[test]
    fn test_standardize_zero_mean_unit_std() {
        let rows = vec![
            [0.8, 0.6, 120.0, 0.3],
            [0.4, 0.9, 95.0, 0.7],
            [0.6, 0.2, 140.0, 0.5],
            [0.1, 0.5, 170.0, 0.9],
        ];
        let (_, m) = standardize(&rows).unwrap();
        assert_eq!((m.rows(), m.cols()), (4, FEATURE_DIM));
        for col in 0..FEATURE_DIM {
            let (mean, std) = column_stats(&m, col);
            assert!(mean.abs() < 1e-6, "col {col} mean {mean}");
            assert!((std - 1.0).abs() < 1e-5, "col {col} std {std}");
        }
    }

    #[test]
    fn test_scale_invariance() {
        // Tempo lives on a much larger scale than the other features,
        // after standardization the columns are directly comparable
        let rows = vec![
            [0.1, 0.1, 100.0, 0.1],
            [0.2, 0.2, 200.0, 0.2],
            [0.3, 0.3, 300.0, 0.3],
        ];
        let (_, m) = standardize(&rows).unwrap();
        assert!((m.row(0)[0] - m.row(0)[2]).abs() < 1e-5);
    }

    #[test]
    fn test_zero_variance_column_fails() {
        let rows = vec![[0.5, 0.1, 120.0, 0.2], [0.6, 0.3, 120.0, 0.4]];
        assert_eq!(
            Standardizer::fit(&rows),
            Err(FeatureError::DegenerateFeature { column: "tempo" })
        );
    }

    #[test]
    fn test_identical_tracks_are_degenerate() {
        let rows = vec![[0.5, 0.5, 110.0, 0.5]; 3];
        assert!(matches!(
            standardize(&rows),
            Err(FeatureError::DegenerateFeature { column: "danceability" })
        ));
    }

    #[test]
    fn test_too_few_tracks() {
        assert_eq!(
            Standardizer::fit(&[[1.0, 2.0, 3.0, 4.0]]),
            Err(FeatureError::TooFewTracks(1))
        );
        assert_eq!(Standardizer::fit(&[]), Err(FeatureError::TooFewTracks(0)));
    }

    #[test]
    fn test_fitted_stats_reapplied_without_refit() {
        let rows = vec![[0.0, 0.0, 0.0, 0.0], [2.0, 2.0, 2.0, 2.0]];
        let scaler = Standardizer::fit(&rows).unwrap();
        // mean 1, std 1 on every column
        let out = scaler.transform_row(&[3.0, 1.0, -1.0, 2.0]);
        assert_eq!(out, [2.0, 0.0, -2.0, 1.0]);
    }
}
