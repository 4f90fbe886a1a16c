use crate::signal::Recording;
use serde::{Deserialize, Serialize};

/// Normalized height of one channel band on the stacked amplitude axis.
pub const BAND_HEIGHT: f64 = 1.0;
/// Vertical gap between adjacent channel bands.
pub const BAND_GAP: f64 = 0.2;

/// Display window applied before decimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Window {
    /// Entire channel length.
    Full,
    /// Leading span in seconds from the start of the recording.
    Seconds(f64),
}

impl Window {
    fn sample_limit(&self, fs: f64, available: usize) -> usize {
        match *self {
            Window::Full => available,
            Window::Seconds(secs) => {
                let wanted = (secs * fs).round().max(0.0) as usize;
                wanted.min(available)
            }
        }
    }
}

/// One channel prepared for plotting: x in seconds, y normalized to the
/// channel's band and offset by its original index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSeries {
    /// Index in the source matrix, stable under visibility masking.
    pub channel_index: usize,
    pub label: String,
    pub points: Vec<[f64; 2]>,
}

impl TraceSeries {
    pub fn band_offset(&self) -> f64 {
        self.channel_index as f64 * (BAND_HEIGHT + BAND_GAP)
    }
}

/// Window, decimate and stack a recording for display.
///
/// Decimation keeps every `stride`-th sample with `stride = ceil(n / budget)`,
/// a visual approximation with no averaging. Each kept channel is min-max
/// normalized to its band using the post-window, post-decimation extrema and
/// offset by `channel_index * (BAND_HEIGHT + BAND_GAP)`. A zero-range channel
/// flattens to its band baseline. `mask` hides channels without renumbering
/// the survivors; `None` shows everything.
pub fn reduce(
    recording: &Recording,
    window: Window,
    budget: usize,
    mask: Option<&[bool]>,
) -> Vec<TraceSeries> {
    let fs = recording.fs;
    let budget = budget.max(1);
    let mut out = Vec::new();
    for (channel_index, samples) in recording.matrix.channels().iter().enumerate() {
        let visible = mask
            .and_then(|m| m.get(channel_index).copied())
            .unwrap_or(true);
        if !visible {
            continue;
        }
        let limit = window.sample_limit(fs, samples.len());
        let windowed = &samples[..limit];
        let stride = if windowed.len() > budget {
            windowed.len().div_ceil(budget)
        } else {
            1
        };
        let kept: Vec<(usize, f64)> = windowed
            .iter()
            .copied()
            .enumerate()
            .step_by(stride)
            .collect();
        let (min, max) = extrema(kept.iter().map(|&(_, v)| v));
        let range = max - min;
        let divisor = if range == 0.0 { 1.0 } else { range };
        let offset = channel_index as f64 * (BAND_HEIGHT + BAND_GAP);
        let points = kept
            .iter()
            .map(|&(i, v)| [i as f64 / fs, offset + BAND_HEIGHT * ((v - min) / divisor)])
            .collect();
        let label = recording
            .labels
            .get(channel_index)
            .cloned()
            .unwrap_or_else(|| format!("Ch{}", channel_index + 1));
        out.push(TraceSeries {
            channel_index,
            label,
            points,
        });
    }
    out
}

fn extrema(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut any = false;
    for v in values {
        if v.is_nan() {
            continue;
        }
        any = true;
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    if any {
        (min, max)
    } else {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ChannelMatrix, Recording};

    fn recording(channels: Vec<Vec<f64>>, fs: f64) -> Recording {
        let matrix = ChannelMatrix::new(channels).unwrap();
        Recording::with_default_labels(matrix, fs).unwrap()
    }

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn under_budget_keeps_every_sample() {
        let rec = recording(vec![ramp(100)], 100.0);
        let series = reduce(&rec, Window::Full, 200, None);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].points.len(), 100);
        // x positions are the original sample times
        assert_eq!(series[0].points[1][0], 0.01);
    }

    #[test]
    fn stride_decimation_obeys_budget() {
        let rec = recording(vec![ramp(1000)], 100.0);
        let series = reduce(&rec, Window::Full, 100, None);
        // stride = ceil(1000/100) = 10 -> 100 kept samples
        assert_eq!(series[0].points.len(), 100);
        assert_eq!(series[0].points[1][0], 0.1);
    }

    #[test]
    fn window_truncates_from_the_start() {
        let rec = recording(vec![ramp(1600)], 160.0);
        let series = reduce(&rec, Window::Seconds(5.0), 10_000, None);
        assert_eq!(series[0].points.len(), 800);
        let last = series[0].points.last().unwrap();
        // last kept sample is index 799 at ~4.99 s
        assert!((last[0] - 799.0 / 160.0).abs() < 1e-12);
    }

    #[test]
    fn window_longer_than_data_uses_everything() {
        let rec = recording(vec![ramp(100)], 100.0);
        let series = reduce(&rec, Window::Seconds(60.0), 10_000, None);
        assert_eq!(series[0].points.len(), 100);
    }

    #[test]
    fn rewindowing_already_windowed_data_changes_nothing() {
        let rec = recording(vec![ramp(800)], 160.0);
        let once = reduce(&rec, Window::Seconds(5.0), 10_000, None);
        let full = reduce(&rec, Window::Full, 10_000, None);
        assert_eq!(once[0].points, full[0].points);
    }

    #[test]
    fn channels_stack_into_disjoint_bands() {
        let rec = recording(vec![ramp(50), ramp(50), ramp(50)], 50.0);
        let series = reduce(&rec, Window::Full, 100, None);
        for s in &series {
            let offset = s.band_offset();
            for p in &s.points {
                assert!(p[1] >= offset - 1e-12 && p[1] <= offset + BAND_HEIGHT + 1e-12);
            }
        }
        assert_eq!(series[1].band_offset(), 1.2);
        assert_eq!(series[2].band_offset(), 2.4);
    }

    #[test]
    fn constant_channel_flattens_to_band_baseline() {
        let rec = recording(vec![vec![5.0; 10]], 10.0);
        let series = reduce(&rec, Window::Full, 100, None);
        for p in &series[0].points {
            assert_eq!(p[1], 0.0);
        }
    }

    #[test]
    fn mask_preserves_original_indices() {
        let rec = recording(vec![ramp(10), ramp(10), ramp(10)], 10.0);
        let series = reduce(&rec, Window::Full, 100, Some(&[true, false, true]));
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].channel_index, 0);
        assert_eq!(series[1].channel_index, 2);
        assert_eq!(series[1].band_offset(), 2.4);
        assert_eq!(series[1].label, "Ch3");
    }

    #[test]
    fn empty_matrix_reduces_to_nothing() {
        let rec = Recording::with_default_labels(ChannelMatrix::empty(), 100.0).unwrap();
        assert!(reduce(&rec, Window::Full, 100, None).is_empty());
    }

    #[test]
    fn sub_hertz_rate_keeps_true_sample_times() {
        let rec = recording(vec![ramp(4)], 0.5);
        let series = reduce(&rec, Window::Full, 100, None);
        // x = index / fs, one sample every 2 s
        let xs: Vec<f64> = series[0].points.iter().map(|p| p[0]).collect();
        assert_eq!(xs, vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn sub_hertz_window_rounds_against_the_true_rate() {
        let rec = recording(vec![ramp(4)], 0.5);
        let series = reduce(&rec, Window::Seconds(4.0), 100, None);
        // 4 s * 0.5 Hz = 2 samples
        assert_eq!(series[0].points.len(), 2);
    }

    #[test]
    fn two_channel_five_second_window_at_160_hz() {
        let rec = recording(vec![ramp(1600), ramp(1600)], 160.0);
        let series = reduce(&rec, Window::Seconds(5.0), 1200, None);
        // 5 s * 160 Hz = 800 samples, under budget, so no decimation
        assert_eq!(series[0].points.len(), 800);
        assert_eq!(series[1].points.len(), 800);
        let ys: Vec<f64> = series[1].points.iter().map(|p| p[1]).collect();
        let min = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!((min - 1.2).abs() < 1e-12);
        assert!(max <= 2.2 + 1e-12);
    }
}
