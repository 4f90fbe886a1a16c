use crate::signal::{Recording, TimeFrequencyGrid};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_BANDPASS_LOW_HZ: f64 = 1.0;
pub const DEFAULT_BANDPASS_HIGH_HZ: f64 = 45.0;
pub const DEFAULT_NOTCH_HZ: f64 = 50.0;

/// Cleaning parameters, compared by value to decide whether a re-clean is
/// needed. Optional cutoffs disable the corresponding filter stage when
/// `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParameters {
    #[serde(default = "default_bandpass_low")]
    pub bandpass_low: f64,
    #[serde(default = "default_bandpass_high")]
    pub bandpass_high: f64,
    #[serde(default = "default_notch")]
    pub notch_hz: f64,
    #[serde(default)]
    pub lowpass_hz: Option<f64>,
    #[serde(default)]
    pub highpass_hz: Option<f64>,
    #[serde(default)]
    pub ica_enabled: bool,
}

fn default_bandpass_low() -> f64 {
    DEFAULT_BANDPASS_LOW_HZ
}

fn default_bandpass_high() -> f64 {
    DEFAULT_BANDPASS_HIGH_HZ
}

fn default_notch() -> f64 {
    DEFAULT_NOTCH_HZ
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            bandpass_low: DEFAULT_BANDPASS_LOW_HZ,
            bandpass_high: DEFAULT_BANDPASS_HIGH_HZ,
            notch_hz: DEFAULT_NOTCH_HZ,
            lowpass_hz: None,
            highpass_hz: None,
            ica_enabled: false,
        }
    }
}

impl FilterParameters {
    pub fn validate(&self) -> Result<()> {
        if !(self.bandpass_low > 0.0) {
            bail!("bandpass low must be positive, got {}", self.bandpass_low);
        }
        if self.bandpass_low >= self.bandpass_high {
            bail!(
                "bandpass low {} must be below bandpass high {}",
                self.bandpass_low,
                self.bandpass_high
            );
        }
        if !(self.notch_hz > 0.0) {
            bail!("notch frequency must be positive, got {}", self.notch_hz);
        }
        Ok(())
    }
}

/// Knobs for the time-frequency decomposition request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeFrequencyParams {
    #[serde(default = "default_baseline_ratio")]
    pub baseline_ratio: f64,
    #[serde(default = "default_freq_min")]
    pub freq_min: f64,
    #[serde(default = "default_freq_max")]
    pub freq_max: f64,
}

fn default_baseline_ratio() -> f64 {
    0.2
}

fn default_freq_min() -> f64 {
    1.0
}

fn default_freq_max() -> f64 {
    50.0
}

impl Default for TimeFrequencyParams {
    fn default() -> Self {
        Self {
            baseline_ratio: default_baseline_ratio(),
            freq_min: default_freq_min(),
            freq_max: default_freq_max(),
        }
    }
}

/// Everything the analysis service can derive from a cleaned recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisKind {
    BandPower,
    Psd,
    SpectralEntropy,
    Hjorth,
    FullMetrics,
    Insights,
    TimeFrequency,
}

impl AnalysisKind {
    pub fn all() -> [AnalysisKind; 7] {
        [
            AnalysisKind::BandPower,
            AnalysisKind::Psd,
            AnalysisKind::SpectralEntropy,
            AnalysisKind::Hjorth,
            AnalysisKind::FullMetrics,
            AnalysisKind::Insights,
            AnalysisKind::TimeFrequency,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisKind::BandPower => "Band power",
            AnalysisKind::Psd => "PSD",
            AnalysisKind::SpectralEntropy => "Spectral entropy",
            AnalysisKind::Hjorth => "Hjorth parameters",
            AnalysisKind::FullMetrics => "Full metrics",
            AnalysisKind::Insights => "Insights",
            AnalysisKind::TimeFrequency => "Time-frequency",
        }
    }
}

/// Canonical display order for EEG band names; anything unknown sorts after.
const BAND_ORDER: [&str; 5] = ["delta", "theta", "alpha", "beta", "gamma"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BandPowerResult {
    pub bands: BTreeMap<String, f64>,
}

impl BandPowerResult {
    /// Bands in delta..gamma order, then extras alphabetically.
    pub fn ordered(&self) -> Vec<(&str, f64)> {
        let mut out: Vec<(&str, f64)> = Vec::with_capacity(self.bands.len());
        for name in BAND_ORDER {
            if let Some(&power) = self.bands.get(name) {
                out.push((name, power));
            }
        }
        for (name, &power) in &self.bands {
            if !BAND_ORDER.contains(&name.as_str()) {
                out.push((name, power));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsdResult {
    pub frequencies: Vec<f64>,
    pub power: Vec<f64>,
}

impl PsdResult {
    pub fn points(&self) -> Vec<[f64; 2]> {
        self.frequencies
            .iter()
            .zip(&self.power)
            .map(|(&f, &p)| [f, p])
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralEntropyResult {
    pub per_channel: Vec<f64>,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HjorthResult {
    pub activity: Vec<f64>,
    pub mobility: Vec<f64>,
    pub complexity: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullMetricsResult {
    pub band_power: BTreeMap<String, f64>,
    pub spectral_entropy_mean: f64,
    pub hjorth_mobility_mean: f64,
    pub hjorth_complexity_mean: f64,
    pub peak_frequency_hz: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsResult {
    pub summary: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// Time-frequency output: a numeric grid when the service computed one, or a
/// pre-rendered PNG when it rasterized server-side. At least one is present.
#[derive(Debug, Clone)]
pub struct TimeFrequencyResult {
    pub grid: Option<TimeFrequencyGrid>,
    pub image_png: Option<Vec<u8>>,
}

/// What a clean call produced, already decoded into domain types.
#[derive(Debug, Clone)]
pub struct CleanOutput {
    pub recording: Recording,
    pub warnings: Vec<String>,
    pub ica_excluded: Option<Vec<usize>>,
    pub ica_topomap_png: Option<Vec<u8>>,
}

/// Lifecycle of one derived result, tagged with the parameter snapshot
/// version it was requested under.
#[derive(Debug, Clone)]
pub enum AnalysisSlot<T> {
    Idle,
    Pending {
        version: u64,
    },
    Ready {
        version: u64,
        value: T,
    },
    Failed {
        version: u64,
        message: String,
    },
}

impl<T> Default for AnalysisSlot<T> {
    fn default() -> Self {
        AnalysisSlot::Idle
    }
}

impl<T> AnalysisSlot<T> {
    pub fn is_idle(&self) -> bool {
        matches!(self, AnalysisSlot::Idle)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AnalysisSlot::Pending { .. })
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, AnalysisSlot::Ready { .. } | AnalysisSlot::Failed { .. })
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            AnalysisSlot::Ready { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            AnalysisSlot::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn version(&self) -> Option<u64> {
        match self {
            AnalysisSlot::Idle => None,
            AnalysisSlot::Pending { version }
            | AnalysisSlot::Ready { version, .. }
            | AnalysisSlot::Failed { version, .. } => Some(*version),
        }
    }
}

/// Per-kind result slots for the current parameter snapshot.
#[derive(Debug, Clone, Default)]
pub struct DerivedResults {
    pub band_power: AnalysisSlot<BandPowerResult>,
    pub psd: AnalysisSlot<PsdResult>,
    pub spectral_entropy: AnalysisSlot<SpectralEntropyResult>,
    pub hjorth: AnalysisSlot<HjorthResult>,
    pub full_metrics: AnalysisSlot<FullMetricsResult>,
    pub insights: AnalysisSlot<InsightsResult>,
    pub time_frequency: AnalysisSlot<TimeFrequencyResult>,
}

impl DerivedResults {
    pub fn clear(&mut self) {
        *self = DerivedResults::default();
    }

    pub fn slot_version(&self, kind: AnalysisKind) -> Option<u64> {
        match kind {
            AnalysisKind::BandPower => self.band_power.version(),
            AnalysisKind::Psd => self.psd.version(),
            AnalysisKind::SpectralEntropy => self.spectral_entropy.version(),
            AnalysisKind::Hjorth => self.hjorth.version(),
            AnalysisKind::FullMetrics => self.full_metrics.version(),
            AnalysisKind::Insights => self.insights.version(),
            AnalysisKind::TimeFrequency => self.time_frequency.version(),
        }
    }

    pub fn slot_state(&self, kind: AnalysisKind) -> SlotState {
        match kind {
            AnalysisKind::BandPower => state_of(&self.band_power),
            AnalysisKind::Psd => state_of(&self.psd),
            AnalysisKind::SpectralEntropy => state_of(&self.spectral_entropy),
            AnalysisKind::Hjorth => state_of(&self.hjorth),
            AnalysisKind::FullMetrics => state_of(&self.full_metrics),
            AnalysisKind::Insights => state_of(&self.insights),
            AnalysisKind::TimeFrequency => state_of(&self.time_frequency),
        }
    }

    pub fn slot_failure(&self, kind: AnalysisKind) -> Option<&str> {
        match kind {
            AnalysisKind::BandPower => self.band_power.failure(),
            AnalysisKind::Psd => self.psd.failure(),
            AnalysisKind::SpectralEntropy => self.spectral_entropy.failure(),
            AnalysisKind::Hjorth => self.hjorth.failure(),
            AnalysisKind::FullMetrics => self.full_metrics.failure(),
            AnalysisKind::Insights => self.insights.failure(),
            AnalysisKind::TimeFrequency => self.time_frequency.failure(),
        }
    }
}

/// Type-erased view of a slot for UI status rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Pending,
    Ready,
    Failed,
}

fn state_of<T>(slot: &AnalysisSlot<T>) -> SlotState {
    match slot {
        AnalysisSlot::Idle => SlotState::Idle,
        AnalysisSlot::Pending { .. } => SlotState::Pending,
        AnalysisSlot::Ready { .. } => SlotState::Ready,
        AnalysisSlot::Failed { .. } => SlotState::Failed,
    }
}

/// Coarse pipeline position for the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Empty,
    Loaded,
    Cleaning,
    Cleaned,
    AnalysisPending,
    AnalysisReady,
}

impl PipelinePhase {
    pub fn label(&self) -> &'static str {
        match self {
            PipelinePhase::Empty => "no dataset",
            PipelinePhase::Loaded => "loaded",
            PipelinePhase::Cleaning => "cleaning",
            PipelinePhase::Cleaned => "cleaned",
            PipelinePhase::AnalysisPending => "analyzing",
            PipelinePhase::AnalysisReady => "analysis ready",
        }
    }
}

/// The one mutable session: dataset, parameters and everything derived from
/// them. Owned by the orchestrator; the UI only reads it.
#[derive(Debug, Default)]
pub struct Session {
    pub raw: Option<Arc<Recording>>,
    pub cleaned: Option<Arc<Recording>>,
    pub params: FilterParameters,
    pub tf_params: TimeFrequencyParams,
    /// Bumped on every accepted edit and dataset load; results carry the
    /// version they were requested under.
    pub version: u64,
    /// Version whose clean output `cleaned` currently holds.
    pub cleaned_version: Option<u64>,
    pub derived: DerivedResults,
    pub channel_visible: Vec<bool>,
    pub clean_warnings: Vec<String>,
    pub ica_excluded: Option<Vec<usize>>,
    pub ica_topomap_png: Option<Vec<u8>>,
    /// Single user-visible error, replaced by newer failures and cleared by
    /// any success.
    pub error: Option<String>,
}

impl Session {
    pub fn visible_mask(&self) -> Option<&[bool]> {
        if self.channel_visible.is_empty() {
            None
        } else {
            Some(&self.channel_visible)
        }
    }

    pub fn cleaned_current(&self) -> Option<&Arc<Recording>> {
        match self.cleaned_version {
            Some(v) if v == self.version => self.cleaned.as_ref(),
            _ => None,
        }
    }
}
