use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use plotters::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use scalp_lib::{
    config::{ScalpConfig, DEFAULT_POINT_BUDGET},
    heatmap::DivergingScale,
    io::{read_csv_matrix, write_csv_matrix},
    remote::{AnalysisService, HttpAnalysisService},
    session::AnalysisKind,
    signal::{ChannelMatrix, Recording, TimeFrequencyGrid},
    trace::{reduce, Window},
};
use serde::Serialize;
use std::{
    f64::consts::TAU,
    fs,
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "scalp",
    version,
    about = "SCALP: EEG cleaning dashboard companion tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AnalysisChoice {
    #[value(name = "band-power")]
    BandPower,
    Psd,
    #[value(name = "spectral-entropy")]
    SpectralEntropy,
    Hjorth,
    #[value(name = "full-metrics")]
    FullMetrics,
    Insights,
    #[value(name = "time-frequency")]
    TimeFrequency,
}

impl AnalysisChoice {
    fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisChoice::BandPower => AnalysisKind::BandPower,
            AnalysisChoice::Psd => AnalysisKind::Psd,
            AnalysisChoice::SpectralEntropy => AnalysisKind::SpectralEntropy,
            AnalysisChoice::Hjorth => AnalysisKind::Hjorth,
            AnalysisChoice::FullMetrics => AnalysisKind::FullMetrics,
            AnalysisChoice::Insights => AnalysisKind::Insights,
            AnalysisChoice::TimeFrequency => AnalysisKind::TimeFrequency,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic multichannel recording as channel-major CSV
    Simulate {
        #[arg(long, default_value_t = 4)]
        channels: usize,
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        #[arg(long, default_value_t = 160.0)]
        fs: f64,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Window, decimate and stack a recording for plotting
    Reduce {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 160.0)]
        fs: f64,
        /// Leading window in seconds; omit for the full recording
        #[arg(long)]
        window_seconds: Option<f64>,
        #[arg(long, default_value_t = DEFAULT_POINT_BUDGET)]
        budget: usize,
    },
    /// Run a recording through the service's cleaning endpoint
    Clean {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 160.0)]
        fs: f64,
        /// Cleaned samples land here as channel-major CSV
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        bandpass_low: Option<f64>,
        #[arg(long)]
        bandpass_high: Option<f64>,
        #[arg(long)]
        notch: Option<f64>,
        #[arg(long)]
        lowpass: Option<f64>,
        #[arg(long)]
        highpass: Option<f64>,
        /// Enable ICA artifact removal on top of the configured filters
        #[arg(long)]
        ica: bool,
        #[arg(long)]
        service_url: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Fetch one derived analysis for a recording
    Analyze {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 160.0)]
        fs: f64,
        #[arg(long, default_value = "band-power")]
        kind: AnalysisChoice,
        /// Time-frequency only: fraction of the epoch treated as baseline
        #[arg(long)]
        baseline_ratio: Option<f64>,
        #[arg(long)]
        freq_min: Option<f64>,
        #[arg(long)]
        freq_max: Option<f64>,
        /// Time-frequency only: save the service-rendered PNG here
        #[arg(long)]
        image_out: Option<PathBuf>,
        #[arg(long)]
        service_url: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Render a time-frequency grid to a PNG heatmap
    Spectrogram {
        /// Grid JSON, as printed by `analyze --kind time-frequency`
        #[arg(long)]
        grid: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = -3.0)]
        db_min: f64,
        #[arg(long, default_value_t = 3.0)]
        db_max: f64,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
    /// Probe the analysis service
    Health {
        #[arg(long)]
        service_url: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            channels,
            seconds,
            fs,
            seed,
            out,
        } => cmd_simulate(channels, seconds, fs, seed, &out)?,
        Commands::Reduce {
            input,
            fs,
            window_seconds,
            budget,
        } => cmd_reduce(&input, fs, window_seconds, budget)?,
        Commands::Clean {
            input,
            fs,
            out,
            bandpass_low,
            bandpass_high,
            notch,
            lowpass,
            highpass,
            ica,
            service_url,
            config,
            timeout_secs,
        } => cmd_clean(
            &input,
            fs,
            &out,
            bandpass_low,
            bandpass_high,
            notch,
            lowpass,
            highpass,
            ica,
            service_url,
            config.as_deref(),
            timeout_secs,
        )?,
        Commands::Analyze {
            input,
            fs,
            kind,
            baseline_ratio,
            freq_min,
            freq_max,
            image_out,
            service_url,
            config,
            timeout_secs,
        } => cmd_analyze(
            &input,
            fs,
            kind,
            baseline_ratio,
            freq_min,
            freq_max,
            image_out.as_deref(),
            service_url,
            config.as_deref(),
            timeout_secs,
        )?,
        Commands::Spectrogram {
            grid,
            out,
            db_min,
            db_max,
            width,
            height,
        } => cmd_spectrogram(&grid, &out, db_min, db_max, width, height)?,
        Commands::Health {
            service_url,
            config,
            timeout_secs,
        } => cmd_health(service_url, config.as_deref(), timeout_secs)?,
    }
    Ok(())
}

/// Config file first, then flag overrides, then the shared HTTP client.
fn build_service(
    config: Option<&Path>,
    service_url: Option<String>,
    timeout_secs: Option<u64>,
) -> Result<(HttpAnalysisService, ScalpConfig)> {
    let mut settings = ScalpConfig::load(config)?;
    if let Some(url) = service_url {
        settings.service_url = url;
    }
    if let Some(secs) = timeout_secs {
        settings.request_timeout_secs = secs;
    }
    let service = HttpAnalysisService::new(&settings.service_url, settings.request_timeout())?;
    Ok((service, settings))
}

fn load_recording(path: &Path, fs: f64) -> Result<Recording> {
    let matrix = read_csv_matrix(path)?;
    Ok(Recording::with_default_labels(matrix, fs)?)
}

#[derive(Serialize)]
struct SimulateSummary {
    channels: usize,
    samples: usize,
    fs: f64,
    path: String,
}

fn cmd_simulate(
    channels: usize,
    seconds: f64,
    fs: f64,
    seed: Option<u64>,
    out: &Path,
) -> Result<()> {
    if channels == 0 {
        bail!("need at least one channel");
    }
    let samples = (seconds * fs).round() as usize;
    if samples == 0 {
        bail!("{seconds} s at {fs} Hz rounds to zero samples");
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut data = Vec::with_capacity(channels);
    for _ in 0..channels {
        // one alpha and one beta component per channel, random phase, plus
        // uniform noise
        let alpha_hz = rng.gen_range(8.0..13.0);
        let beta_hz = rng.gen_range(14.0..30.0);
        let phase = rng.gen_range(0.0..TAU);
        let mut channel = Vec::with_capacity(samples);
        for i in 0..samples {
            let t = i as f64 / fs;
            let value = (TAU * alpha_hz * t + phase).sin()
                + 0.5 * (TAU * beta_hz * t).sin()
                + rng.gen_range(-0.2..0.2);
            channel.push(value);
        }
        data.push(channel);
    }
    let matrix = ChannelMatrix::new(data)?;
    write_csv_matrix(out, &matrix)?;
    let summary = SimulateSummary {
        channels,
        samples,
        fs,
        path: out.display().to_string(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_reduce(input: &Path, fs: f64, window_seconds: Option<f64>, budget: usize) -> Result<()> {
    let recording = load_recording(input, fs)?;
    let window = match window_seconds {
        Some(secs) => Window::Seconds(secs),
        None => Window::Full,
    };
    let series = reduce(&recording, window, budget, None);
    println!("{}", serde_json::to_string(&series)?);
    Ok(())
}

#[derive(Serialize)]
struct CleanSummary {
    channels: usize,
    samples: usize,
    warnings: Vec<String>,
    ica_excluded: Option<Vec<usize>>,
    path: String,
}

#[allow(clippy::too_many_arguments)]
fn cmd_clean(
    input: &Path,
    fs: f64,
    out: &Path,
    bandpass_low: Option<f64>,
    bandpass_high: Option<f64>,
    notch: Option<f64>,
    lowpass: Option<f64>,
    highpass: Option<f64>,
    ica: bool,
    service_url: Option<String>,
    config: Option<&Path>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let (service, settings) = build_service(config, service_url, timeout_secs)?;
    let mut params = settings.filters;
    if let Some(low) = bandpass_low {
        params.bandpass_low = low;
    }
    if let Some(high) = bandpass_high {
        params.bandpass_high = high;
    }
    if let Some(hz) = notch {
        params.notch_hz = hz;
    }
    if lowpass.is_some() {
        params.lowpass_hz = lowpass;
    }
    if highpass.is_some() {
        params.highpass_hz = highpass;
    }
    if ica {
        params.ica_enabled = true;
    }
    params.validate()?;
    let recording = load_recording(input, fs)?;
    let output = service.clean(&recording, &params)?;
    write_csv_matrix(out, &output.recording.matrix)?;
    let summary = CleanSummary {
        channels: output.recording.channel_count(),
        samples: output.recording.sample_count(),
        warnings: output.warnings,
        ica_excluded: output.ica_excluded,
        path: out.display().to_string(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

#[derive(Serialize)]
struct SavedImage {
    image: String,
}

#[allow(clippy::too_many_arguments)]
fn cmd_analyze(
    input: &Path,
    fs: f64,
    kind: AnalysisChoice,
    baseline_ratio: Option<f64>,
    freq_min: Option<f64>,
    freq_max: Option<f64>,
    image_out: Option<&Path>,
    service_url: Option<String>,
    config: Option<&Path>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let (service, settings) = build_service(config, service_url, timeout_secs)?;
    let recording = load_recording(input, fs)?;
    let json = match kind.kind() {
        AnalysisKind::BandPower => serde_json::to_string(&service.band_power(&recording)?)?,
        AnalysisKind::Psd => serde_json::to_string(&service.psd(&recording)?)?,
        AnalysisKind::SpectralEntropy => {
            serde_json::to_string(&service.spectral_entropy(&recording)?)?
        }
        AnalysisKind::Hjorth => serde_json::to_string(&service.hjorth(&recording)?)?,
        AnalysisKind::FullMetrics => serde_json::to_string(&service.full_metrics(&recording)?)?,
        AnalysisKind::Insights => serde_json::to_string(&service.insights(&recording)?)?,
        AnalysisKind::TimeFrequency => {
            let mut params = settings.time_frequency;
            if let Some(ratio) = baseline_ratio {
                params.baseline_ratio = ratio;
            }
            if let Some(hz) = freq_min {
                params.freq_min = hz;
            }
            if let Some(hz) = freq_max {
                params.freq_max = hz;
            }
            let result = service.time_frequency(&recording, &params)?;
            let mut saved = None;
            if let Some(path) = image_out {
                match result.image_png.as_ref() {
                    Some(bytes) => {
                        fs::write(path, bytes)
                            .with_context(|| format!("writing {}", path.display()))?;
                        saved = Some(path.display().to_string());
                    }
                    None => bail!("the service returned no rendered image to save"),
                }
            }
            match (result.grid, saved) {
                (Some(grid), _) => serde_json::to_string(&grid)?,
                (None, Some(image)) => serde_json::to_string(&SavedImage { image })?,
                (None, None) => bail!(
                    "the service returned an image instead of a grid; pass --image-out to save it"
                ),
            }
        }
    };
    println!("{json}");
    Ok(())
}

fn cmd_spectrogram(
    grid_path: &Path,
    out: &Path,
    db_min: f64,
    db_max: f64,
    width: u32,
    height: u32,
) -> Result<()> {
    let contents = fs::read_to_string(grid_path)
        .with_context(|| format!("failed to read {}", grid_path.display()))?;
    let parsed: TimeFrequencyGrid = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a time-frequency grid", grid_path.display()))?;
    // serde fills the struct without the shape checks, so run them again
    let grid = TimeFrequencyGrid::new(parsed.freqs_hz, parsed.times_ms, parsed.power_db)
        .with_context(|| format!("{} holds an inconsistent grid", grid_path.display()))?;
    if grid.is_empty() {
        bail!("{} holds an empty grid", grid_path.display());
    }
    if !(db_max > db_min) {
        bail!("--db-max must exceed --db-min, got {db_min}..{db_max}");
    }
    draw_spectrogram(out, &grid, DivergingScale::new(db_min, db_max), width, height)
}

fn draw_spectrogram(
    path: &Path,
    grid: &TimeFrequencyGrid,
    scale: DivergingScale,
    width: u32,
    height: u32,
) -> Result<()> {
    let backend = BitMapBackend::new(path, (width, height));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let nt = grid.time_count() as f64;
    let nf = grid.freq_count() as f64;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption("Time-frequency power (dB)", ("sans-serif", 24))
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0.0..nt, 0.0..nf)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(6)
        .y_labels(6)
        .x_label_formatter(&|bin| format!("{:.0}", interp(&grid.times_ms, *bin / nt)))
        .y_label_formatter(&|bin| hz_label(interp(&grid.freqs_hz, *bin / nf)))
        .x_desc("Time (ms)")
        .y_desc("Frequency (Hz)")
        .draw()?;
    chart.draw_series(grid.power_db.iter().enumerate().flat_map(|(fi, row)| {
        row.iter().enumerate().map(move |(ti, &value)| {
            let color = scale.color_at(value);
            Rectangle::new(
                [(ti as f64, fi as f64), ((ti + 1) as f64, (fi + 1) as f64)],
                RGBColor(color.r(), color.g(), color.b()).filled(),
            )
        })
    }))?;
    root.present()?;
    Ok(())
}

/// Linear interpolation between the first and last bin center.
fn interp(bins: &[f64], frac: f64) -> f64 {
    match (bins.first(), bins.last()) {
        (Some(&first), Some(&last)) => first + frac.clamp(0.0, 1.0) * (last - first),
        _ => 0.0,
    }
}

fn hz_label(hz: f64) -> String {
    if hz < 1.0 {
        format!("{hz:.1}")
    } else {
        format!("{hz:.0}")
    }
}

#[derive(Serialize)]
struct HealthSummary {
    url: String,
    status: &'static str,
}

fn cmd_health(
    service_url: Option<String>,
    config: Option<&Path>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let (service, _) = build_service(config, service_url, timeout_secs)?;
    service.health()?;
    let summary = HealthSummary {
        url: service.base_url().to_string(),
        status: "ok",
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
