use crate::pipeline::{AnalysisPayload, MatrixAnalysis, ServiceOutcome, ServiceRequest};
use crate::session::{
    BandPowerResult, CleanOutput, FilterParameters, FullMetricsResult, HjorthResult,
    InsightsResult, PsdResult, SpectralEntropyResult, TimeFrequencyParams, TimeFrequencyResult,
};
use crate::signal::{ChannelMatrix, Recording, TimeFrequencyGrid};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The remote analysis backend, as the pipeline sees it. Implementations
/// must be callable from worker threads.
pub trait AnalysisService: Send + Sync {
    fn health(&self) -> Result<()>;
    /// Stores raw file bytes server-side, returning the temp path `parse`
    /// expects.
    fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<UploadResponse>;
    fn parse(&self, tmp_path: &str) -> Result<Recording>;
    fn clean(&self, recording: &Recording, params: &FilterParameters) -> Result<CleanOutput>;
    fn band_power(&self, recording: &Recording) -> Result<BandPowerResult>;
    fn psd(&self, recording: &Recording) -> Result<PsdResult>;
    fn spectral_entropy(&self, recording: &Recording) -> Result<SpectralEntropyResult>;
    fn hjorth(&self, recording: &Recording) -> Result<HjorthResult>;
    fn full_metrics(&self, recording: &Recording) -> Result<FullMetricsResult>;
    fn insights(&self, recording: &Recording) -> Result<InsightsResult>;
    fn time_frequency(
        &self,
        recording: &Recording,
        params: &TimeFrequencyParams,
    ) -> Result<TimeFrequencyResult>;
}

/// Runs one pipeline request against a service, folding errors into the
/// outcome so the result can travel back over a channel.
pub fn execute(service: &dyn AnalysisService, request: ServiceRequest) -> ServiceOutcome {
    match request {
        ServiceRequest::Clean {
            version,
            recording,
            params,
        } => ServiceOutcome::Cleaned {
            version,
            result: service
                .clean(&recording, &params)
                .map_err(|err| format!("{err:#}")),
        },
        ServiceRequest::Analyze {
            version,
            kind,
            recording,
        } => {
            let result = match kind {
                MatrixAnalysis::BandPower => {
                    service.band_power(&recording).map(AnalysisPayload::BandPower)
                }
                MatrixAnalysis::Psd => service.psd(&recording).map(AnalysisPayload::Psd),
                MatrixAnalysis::SpectralEntropy => service
                    .spectral_entropy(&recording)
                    .map(AnalysisPayload::SpectralEntropy),
                MatrixAnalysis::Hjorth => service.hjorth(&recording).map(AnalysisPayload::Hjorth),
                MatrixAnalysis::FullMetrics => service
                    .full_metrics(&recording)
                    .map(AnalysisPayload::FullMetrics),
                MatrixAnalysis::Insights => {
                    service.insights(&recording).map(AnalysisPayload::Insights)
                }
            };
            ServiceOutcome::Analysis {
                version,
                kind: kind.kind(),
                result: result.map_err(|err| format!("{err:#}")),
            }
        }
        ServiceRequest::TimeFrequency {
            version,
            recording,
            params,
        } => ServiceOutcome::Analysis {
            version,
            kind: crate::session::AnalysisKind::TimeFrequency,
            result: service
                .time_frequency(&recording, &params)
                .map(AnalysisPayload::TimeFrequency)
                .map_err(|err| format!("{err:#}")),
        },
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
    pub tmp_path: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    sampling_rate: f64,
    channel_names: Vec<String>,
    #[serde(default)]
    data: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    preview: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Deserialize)]
struct CleanResponse {
    sampling_rate: f64,
    channel_names: Vec<String>,
    cleaned_data: Vec<Vec<f64>>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    ica_excluded_components: Option<Vec<usize>>,
    #[serde(default)]
    ica_topomap_png: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeFrequencyResponse {
    #[serde(default)]
    freqs_hz: Option<Vec<f64>>,
    #[serde(default)]
    times_ms: Option<Vec<f64>>,
    #[serde(default)]
    power_db: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    image_png: Option<String>,
}

#[derive(Debug, Serialize)]
struct MatrixRequest<'a> {
    channels: usize,
    sampling_rate: f64,
    channel_names: &'a [String],
    data: &'a ChannelMatrix,
}

impl<'a> MatrixRequest<'a> {
    fn from_recording(recording: &'a Recording) -> Self {
        Self {
            channels: recording.channel_count(),
            sampling_rate: recording.fs,
            channel_names: &recording.labels,
            data: &recording.matrix,
        }
    }
}

#[derive(Debug, Serialize)]
struct CleanRequest<'a> {
    channels: usize,
    sampling_rate: f64,
    channel_names: &'a [String],
    duration_sec: f64,
    data: &'a ChannelMatrix,
    bandpass_low: f64,
    bandpass_high: f64,
    lowpass_freq: Option<f64>,
    highpass_freq: Option<f64>,
    notch_freq: f64,
    ica_enabled: bool,
}

#[derive(Debug, Serialize)]
struct TimeFrequencyRequest<'a> {
    #[serde(flatten)]
    matrix: MatrixRequest<'a>,
    baseline_ratio: f64,
    freq_min: f64,
    freq_max: f64,
}

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    tmp_path: &'a str,
}

/// Blocking HTTP client for the analysis service.
pub struct HttpAnalysisService {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpAnalysisService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<Resp> {
        log::debug!("POST {}", self.url(path));
        let response = self
            .client
            .post(self.url(path))
            .json(payload)
            .send()
            .with_context(|| format!("request to {path} failed"))?;
        read_json(response, path)
    }
}

impl AnalysisService for HttpAnalysisService {
    fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .context("request to /health failed")?;
        if !response.status().is_success() {
            bail!("/health returned {}", response.status());
        }
        Ok(())
    }

    fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<UploadResponse> {
        let part = reqwest::blocking::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string());
        let form = reqwest::blocking::multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .context("request to /upload failed")?;
        read_json(response, "/upload")
    }

    fn parse(&self, tmp_path: &str) -> Result<Recording> {
        let response: ParseResponse = self.post_json("/parse", &ParseRequest { tmp_path })?;
        let data = response
            .data
            .or(response.preview)
            .context("/parse returned no sample data")?;
        let matrix = ChannelMatrix::new(data).context("/parse returned a ragged matrix")?;
        Recording::new(matrix, response.sampling_rate, response.channel_names)
            .context("/parse returned an inconsistent recording")
    }

    fn clean(&self, recording: &Recording, params: &FilterParameters) -> Result<CleanOutput> {
        let request = CleanRequest {
            channels: recording.channel_count(),
            sampling_rate: recording.fs,
            channel_names: &recording.labels,
            duration_sec: recording.duration(),
            data: &recording.matrix,
            bandpass_low: params.bandpass_low,
            bandpass_high: params.bandpass_high,
            lowpass_freq: params.lowpass_hz,
            highpass_freq: params.highpass_hz,
            notch_freq: params.notch_hz,
            ica_enabled: params.ica_enabled,
        };
        let response: CleanResponse = self.post_json("/clean", &request)?;
        let matrix =
            ChannelMatrix::new(response.cleaned_data).context("/clean returned a ragged matrix")?;
        if matrix.channel_count() != recording.channel_count()
            || matrix.sample_count() != recording.sample_count()
        {
            bail!(
                "/clean changed the matrix shape: sent {}x{}, got {}x{}",
                recording.channel_count(),
                recording.sample_count(),
                matrix.channel_count(),
                matrix.sample_count()
            );
        }
        let cleaned = Recording::new(matrix, response.sampling_rate, response.channel_names)
            .context("/clean returned an inconsistent recording")?;
        let ica_topomap_png = match response.ica_topomap_png {
            Some(encoded) => Some(
                BASE64
                    .decode(encoded.as_bytes())
                    .context("/clean returned an undecodable topomap image")?,
            ),
            None => None,
        };
        Ok(CleanOutput {
            recording: cleaned,
            warnings: response.warnings,
            ica_excluded: response.ica_excluded_components,
            ica_topomap_png,
        })
    }

    fn band_power(&self, recording: &Recording) -> Result<BandPowerResult> {
        let bands: BTreeMap<String, f64> =
            self.post_json("/band_power", &MatrixRequest::from_recording(recording))?;
        Ok(BandPowerResult { bands })
    }

    fn psd(&self, recording: &Recording) -> Result<PsdResult> {
        let result: PsdResult =
            self.post_json("/psd", &MatrixRequest::from_recording(recording))?;
        if result.frequencies.len() != result.power.len() {
            bail!(
                "/psd returned {} frequencies but {} power values",
                result.frequencies.len(),
                result.power.len()
            );
        }
        Ok(result)
    }

    fn spectral_entropy(&self, recording: &Recording) -> Result<SpectralEntropyResult> {
        self.post_json("/spectral_entropy", &MatrixRequest::from_recording(recording))
    }

    fn hjorth(&self, recording: &Recording) -> Result<HjorthResult> {
        self.post_json("/hjorth", &MatrixRequest::from_recording(recording))
    }

    fn full_metrics(&self, recording: &Recording) -> Result<FullMetricsResult> {
        self.post_json("/metrics", &MatrixRequest::from_recording(recording))
    }

    fn insights(&self, recording: &Recording) -> Result<InsightsResult> {
        self.post_json("/insights", &MatrixRequest::from_recording(recording))
    }

    fn time_frequency(
        &self,
        recording: &Recording,
        params: &TimeFrequencyParams,
    ) -> Result<TimeFrequencyResult> {
        let request = TimeFrequencyRequest {
            matrix: MatrixRequest::from_recording(recording),
            baseline_ratio: params.baseline_ratio,
            freq_min: params.freq_min,
            freq_max: params.freq_max,
        };
        let response: TimeFrequencyResponse = self.post_json("/time_frequency", &request)?;
        let grid = match (response.freqs_hz, response.times_ms, response.power_db) {
            (Some(freqs), Some(times), Some(power)) => Some(
                TimeFrequencyGrid::new(freqs, times, power)
                    .context("/time_frequency returned a malformed grid")?,
            ),
            _ => None,
        };
        let image_png = match response.image_png {
            Some(encoded) => Some(
                BASE64
                    .decode(encoded.as_bytes())
                    .context("/time_frequency returned an undecodable image")?,
            ),
            None => None,
        };
        if grid.is_none() && image_png.is_none() {
            bail!("/time_frequency returned neither a grid nor an image");
        }
        Ok(TimeFrequencyResult { grid, image_png })
    }
}

fn read_json<T: DeserializeOwned>(response: reqwest::blocking::Response, path: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        bail!("{path} returned {status}: {}", error_detail(&body));
    }
    response
        .json()
        .with_context(|| format!("invalid JSON from {path}"))
}

/// Pulls the human-readable message out of a FastAPI-style error body,
/// falling back to a truncated raw body.
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no error detail".to_string();
    }
    let mut out: String = trimmed.chars().take(200).collect();
    if out.len() < trimmed.len() {
        out.push_str("...");
    }
    out
}
