use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural problems in sample data. Absence of data is never an error,
/// only shapes that contradict themselves are.
#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("channel {index} has {got} samples, expected {expected}")]
    RaggedChannels {
        index: usize,
        expected: usize,
        got: usize,
    },
    #[error("{labels} labels for {channels} channels")]
    LabelMismatch { labels: usize, channels: usize },
    #[error("sampling rate must be positive, got {0}")]
    NonPositiveRate(f64),
    #[error("power matrix has {rows} rows for {freqs} frequency bins")]
    GridRowMismatch { rows: usize, freqs: usize },
    #[error("power row {row} has {got} columns, expected {expected} time bins")]
    GridColumnMismatch {
        row: usize,
        expected: usize,
        got: usize,
    },
    #[error("{freqs} frequency bins but {values} values")]
    BinMismatch { freqs: usize, values: usize },
}

/// Channel-major sample matrix: outer index is channel, inner index is time.
/// All channels carry the same number of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMatrix {
    channels: Vec<Vec<f64>>,
}

impl ChannelMatrix {
    pub fn new(channels: Vec<Vec<f64>>) -> Result<Self, ShapeError> {
        if let Some(first) = channels.first() {
            let expected = first.len();
            for (index, channel) in channels.iter().enumerate().skip(1) {
                if channel.len() != expected {
                    return Err(ShapeError::RaggedChannels {
                        index,
                        expected,
                        got: channel.len(),
                    });
                }
            }
        }
        Ok(Self { channels })
    }

    pub fn empty() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_count(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() || self.sample_count() == 0
    }

    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.channels.get(index).map(|c| c.as_slice())
    }

    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }
}

/// A multichannel recording with uniform sampling rate and channel labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub matrix: ChannelMatrix,
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    pub labels: Vec<String>,
}

impl Recording {
    pub fn new(matrix: ChannelMatrix, fs: f64, labels: Vec<String>) -> Result<Self, ShapeError> {
        if !(fs > 0.0) {
            return Err(ShapeError::NonPositiveRate(fs));
        }
        if labels.len() != matrix.channel_count() {
            return Err(ShapeError::LabelMismatch {
                labels: labels.len(),
                channels: matrix.channel_count(),
            });
        }
        Ok(Self { matrix, fs, labels })
    }

    /// Builds `Ch1..ChN` labels when the source format carries none.
    pub fn with_default_labels(matrix: ChannelMatrix, fs: f64) -> Result<Self, ShapeError> {
        let labels = (1..=matrix.channel_count())
            .map(|i| format!("Ch{i}"))
            .collect();
        Self::new(matrix, fs, labels)
    }

    pub fn channel_count(&self) -> usize {
        self.matrix.channel_count()
    }

    pub fn sample_count(&self) -> usize {
        self.matrix.sample_count()
    }

    pub fn duration(&self) -> f64 {
        self.matrix.sample_count() as f64 / self.fs
    }
}

/// Time-frequency power matrix in dB, indexed `[frequency bin][time bin]`.
/// Frequency bin 0 is the lowest frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeFrequencyGrid {
    pub freqs_hz: Vec<f64>,
    pub times_ms: Vec<f64>,
    pub power_db: Vec<Vec<f64>>,
}

impl TimeFrequencyGrid {
    pub fn new(
        freqs_hz: Vec<f64>,
        times_ms: Vec<f64>,
        power_db: Vec<Vec<f64>>,
    ) -> Result<Self, ShapeError> {
        if power_db.len() != freqs_hz.len() {
            return Err(ShapeError::GridRowMismatch {
                rows: power_db.len(),
                freqs: freqs_hz.len(),
            });
        }
        for (row, values) in power_db.iter().enumerate() {
            if values.len() != times_ms.len() {
                return Err(ShapeError::GridColumnMismatch {
                    row,
                    expected: times_ms.len(),
                    got: values.len(),
                });
            }
        }
        Ok(Self {
            freqs_hz,
            times_ms,
            power_db,
        })
    }

    pub fn freq_count(&self) -> usize {
        self.freqs_hz.len()
    }

    pub fn time_count(&self) -> usize {
        self.times_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs_hz.is_empty() || self.times_ms.is_empty()
    }

    pub fn value(&self, freq_bin: usize, time_bin: usize) -> Option<f64> {
        self.power_db.get(freq_bin).and_then(|row| row.get(time_bin)).copied()
    }
}

/// Half-open view interval on one plot axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewRange {
    pub min: f64,
    pub max: f64,
}

impl ViewRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min < self.max
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn approx_eq(&self, other: &ViewRange) -> bool {
        let tol = self.span().abs().max(other.span().abs()).max(1e-12) * 1e-9;
        (self.min - other.min).abs() <= tol && (self.max - other.max).abs() <= tol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_channels_rejected() {
        let err = ChannelMatrix::new(vec![vec![0.0; 4], vec![0.0; 3]]).unwrap_err();
        assert_eq!(
            err,
            ShapeError::RaggedChannels {
                index: 1,
                expected: 4,
                got: 3
            }
        );
    }

    #[test]
    fn recording_validates_rate_and_labels() {
        let matrix = ChannelMatrix::new(vec![vec![0.0; 8]; 2]).unwrap();
        assert!(Recording::new(matrix.clone(), 0.0, vec!["a".into(), "b".into()]).is_err());
        assert!(Recording::new(matrix.clone(), 160.0, vec!["a".into()]).is_err());
        let rec = Recording::with_default_labels(matrix, 160.0).unwrap();
        assert_eq!(rec.labels, vec!["Ch1".to_string(), "Ch2".to_string()]);
        assert_eq!(rec.duration(), 0.05);
    }

    #[test]
    fn grid_shape_checked() {
        let err =
            TimeFrequencyGrid::new(vec![1.0, 2.0], vec![0.0], vec![vec![0.0]]).unwrap_err();
        assert_eq!(err, ShapeError::GridRowMismatch { rows: 1, freqs: 2 });
        let err = TimeFrequencyGrid::new(
            vec![1.0],
            vec![0.0, 10.0],
            vec![vec![0.0]],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ShapeError::GridColumnMismatch {
                row: 0,
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn matrix_serializes_as_nested_arrays() {
        let matrix = ChannelMatrix::new(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let json = serde_json::to_string(&matrix).unwrap();
        assert_eq!(json, "[[1.0,2.0],[3.0,4.0]]");
    }
}
