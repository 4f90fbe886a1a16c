use eframe::{egui, egui::ViewportBuilder};
use egui_plot::{Legend, Line, Plot, PlotBounds};
use rfd::FileDialog;
use scalp_lib::config::ScalpConfig;
use scalp_lib::heatmap::{
    colorbar_labels, frequency_ticks, render_colorbar, time_ticks, DivergingScale,
};
use scalp_lib::pipeline::Intent;
use scalp_lib::remote::HttpAnalysisService;
use scalp_lib::session::{
    AnalysisKind, FilterParameters, PipelinePhase, SlotState, TimeFrequencyParams,
};
use scalp_lib::signal::ViewRange;
use scalp_lib::trace::{TraceSeries, Window};
use scalp_lib::viewsync::{ChartSlot, PendingView, ViewLink};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> eframe::Result<()> {
    env_logger::init();
    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default().with_inner_size([1280.0, 820.0]),
        ..Default::default()
    };
    eframe::run_native(
        "SCALP Dashboard",
        native_options,
        Box::new(|_cc| match ScalpApp::new() {
            Ok(app) => Ok(Box::new(app)),
            Err(err) => Err(err.into()),
        }),
    )
}

#[derive(Copy, Clone, PartialEq)]
enum GuiTab {
    Signals,
    Spectral,
    Metrics,
    TimeFrequency,
}

impl GuiTab {
    fn title(&self) -> &'static str {
        match self {
            GuiTab::Signals => "Signals",
            GuiTab::Spectral => "Spectral",
            GuiTab::Metrics => "Metrics",
            GuiTab::TimeFrequency => "Time-frequency",
        }
    }

    fn all() -> [GuiTab; 4] {
        [
            GuiTab::Signals,
            GuiTab::Spectral,
            GuiTab::Metrics,
            GuiTab::TimeFrequency,
        ]
    }
}

mod router;
mod store;

use router::{LoadStatus, ServiceRouter};

/// Per-channel stroke colors, reused modulo the palette length.
const CHANNEL_COLORS: [u32; 8] = [
    0x1F77B4, 0xFF7F0E, 0x2CA02C, 0xD62728, 0x9467BD, 0x8C564B, 0xE377C2, 0x17BECF,
];

/// Raster pixels per UI point for the heatmap texture.
const HEATMAP_OVERSAMPLE: f32 = 2.0;

const TRACE_PLOT_HEIGHT: f32 = 260.0;

struct ScalpApp {
    router: ServiceRouter,
    active_tab: GuiTab,
    draft: FilterParameters,
    tf_draft: TimeFrequencyParams,
    view_link: ViewLink,
    service_url: String,
    dataset_path: Option<String>,
    heatmap_texture: Option<(u64, egui::TextureHandle)>,
    colorbar_texture: Option<(DivergingScale, egui::TextureHandle)>,
    tf_status: String,
}

impl ScalpApp {
    fn new() -> anyhow::Result<Self> {
        let config = match ScalpConfig::load(None) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("config load failed, using defaults: {err:#}");
                ScalpConfig::default()
            }
        };
        let service = Arc::new(HttpAnalysisService::new(
            &config.service_url,
            config.request_timeout(),
        )?);
        let mut router = ServiceRouter::new(service);
        router.pipeline_mut().set_debounce(config.debounce());
        router.set_point_budget(config.point_budget);
        match config.window_seconds {
            Some(secs) => router.set_window(Window::Seconds(secs)),
            None => router.set_window(Window::Full),
        }
        // seed the session with the configured filter defaults
        router.intent(Intent::EditParameters(config.filters));
        Ok(Self {
            router,
            active_tab: GuiTab::Signals,
            draft: config.filters,
            tf_draft: config.time_frequency,
            view_link: ViewLink::new(),
            service_url: config.service_url,
            dataset_path: None,
            heatmap_texture: None,
            colorbar_texture: None,
            tf_status: String::new(),
        })
    }

    fn show_signals_tab(&mut self, ctx: &egui::Context) {
        egui::SidePanel::left("signal_controls").show(ctx, |ui| {
            ui.heading("Dataset");
            if ui.button("Load recording").clicked() {
                if let Some(path) = FileDialog::new()
                    .add_filter("EEG recordings", &["edf", "bdf", "csv", "mat", "txt"])
                    .pick_file()
                {
                    self.dataset_path = Some(path.display().to_string());
                    self.router.load_dataset(path);
                }
            }
            if let LoadStatus::Busy { name } = self.router.load_status() {
                ui.label(format!("Uploading {name}..."));
            }
            if let Some(path) = &self.dataset_path {
                ui.horizontal(|ui| {
                    ui.label("File: ");
                    ui.monospace(path);
                });
            }
            if let Some(recording) = self.router.session().raw.as_ref() {
                ui.label(format!(
                    "{} channels, {:.1} s @ {:.1} Hz",
                    recording.channel_count(),
                    recording.duration(),
                    recording.fs
                ));
            }

            ui.separator();
            ui.heading("Filters");
            let mut edited = false;
            edited |= ui
                .add(
                    egui::Slider::new(&mut self.draft.bandpass_low, 0.1..=30.0)
                        .text("Bandpass low (Hz)"),
                )
                .changed();
            edited |= ui
                .add(
                    egui::Slider::new(&mut self.draft.bandpass_high, 20.0..=120.0)
                        .text("Bandpass high (Hz)"),
                )
                .changed();
            ui.horizontal(|ui| {
                ui.label("Notch");
                egui::ComboBox::from_id_salt("notch_select")
                    .selected_text(format!("{:.0} Hz", self.draft.notch_hz))
                    .show_ui(ui, |ui| {
                        for option in [50.0, 60.0] {
                            if ui
                                .selectable_label(
                                    self.draft.notch_hz == option,
                                    format!("{option:.0} Hz"),
                                )
                                .clicked()
                            {
                                self.draft.notch_hz = option;
                                edited = true;
                            }
                        }
                    });
            });
            let mut lowpass_on = self.draft.lowpass_hz.is_some();
            if ui.checkbox(&mut lowpass_on, "Extra lowpass").changed() {
                self.draft.lowpass_hz = if lowpass_on { Some(40.0) } else { None };
                edited = true;
            }
            if let Some(freq) = self.draft.lowpass_hz.as_mut() {
                edited |= ui
                    .add(
                        egui::DragValue::new(freq)
                            .range(1.0..=200.0)
                            .speed(1.0)
                            .suffix(" Hz"),
                    )
                    .changed();
            }
            let mut highpass_on = self.draft.highpass_hz.is_some();
            if ui.checkbox(&mut highpass_on, "Extra highpass").changed() {
                self.draft.highpass_hz = if highpass_on { Some(0.5) } else { None };
                edited = true;
            }
            if let Some(freq) = self.draft.highpass_hz.as_mut() {
                edited |= ui
                    .add(
                        egui::DragValue::new(freq)
                            .range(0.1..=20.0)
                            .speed(0.1)
                            .suffix(" Hz"),
                    )
                    .changed();
            }
            edited |= ui
                .checkbox(&mut self.draft.ica_enabled, "ICA artifact removal")
                .changed();
            if edited {
                self.router.intent(Intent::EditParameters(self.draft));
            }

            ui.separator();
            ui.heading("Channels");
            let labels: Vec<String> = self
                .router
                .session()
                .raw
                .as_ref()
                .map(|r| r.labels.clone())
                .unwrap_or_default();
            let visible = self.router.session().channel_visible.clone();
            if labels.is_empty() {
                ui.label("No channels yet");
            } else {
                egui::ScrollArea::vertical()
                    .max_height(160.0)
                    .show(ui, |ui| {
                        for (index, label) in labels.iter().enumerate() {
                            let mut on = visible.get(index).copied().unwrap_or(true);
                            if ui.checkbox(&mut on, label).changed() {
                                self.router
                                    .intent(Intent::SetChannelVisible { index, visible: on });
                            }
                        }
                    });
            }

            ui.separator();
            ui.heading("Display");
            let current = self.router.window();
            egui::ComboBox::from_id_salt("window_select")
                .selected_text(window_label(current))
                .show_ui(ui, |ui| {
                    for option in [
                        Window::Seconds(5.0),
                        Window::Seconds(10.0),
                        Window::Seconds(30.0),
                        Window::Seconds(60.0),
                        Window::Full,
                    ] {
                        if ui
                            .selectable_label(current == option, window_label(option))
                            .clicked()
                        {
                            self.router.set_window(option);
                        }
                    }
                });
            if ui.button("Reset view").clicked() {
                self.view_link.request_reset();
            }

            let warnings = self.router.session().clean_warnings.clone();
            if !warnings.is_empty() {
                ui.separator();
                ui.heading("Warnings");
                for warning in warnings.iter().take(3) {
                    ui.colored_label(egui::Color32::YELLOW, warning);
                }
                if warnings.len() > 3 {
                    ui.label(format!("... +{} more", warnings.len() - 3));
                }
            }
            if let Some(excluded) = self.router.session().ica_excluded.clone() {
                ui.label(format!("ICA removed components: {excluded:?}"));
            }
            if self.router.session().ica_topomap_png.is_some() {
                if ui.button("Save ICA topomap").clicked() {
                    if let Some(path) = FileDialog::new()
                        .add_filter("PNG", &["png"])
                        .set_file_name("ica_topomap.png")
                        .save_file()
                    {
                        let bytes = self
                            .router
                            .session()
                            .ica_topomap_png
                            .clone()
                            .unwrap_or_default();
                        if let Err(err) = std::fs::write(&path, bytes) {
                            log::warn!("saving topomap to {} failed: {err}", path.display());
                        }
                    }
                }
            }

            ui.separator();
            ui.horizontal(|ui| {
                ui.label("Service:");
                ui.monospace(&self.service_url);
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.router.session().raw.is_none() {
                ui.centered_and_justified(|ui| {
                    ui.label("Load a recording to see raw and cleaned traces.");
                });
                return;
            }

            let raw: Vec<TraceSeries> = self.router.ensure_raw_traces().to_vec();
            let cleaned: Vec<TraceSeries> = self.router.ensure_cleaned_traces().to_vec();
            let phase = self.router.pipeline().phase();

            ui.label("Raw");
            self.trace_plot(ui, "raw_trace", ChartSlot::Raw, &raw);
            ui.separator();
            ui.label("Cleaned");
            if cleaned.is_empty() {
                match phase {
                    PipelinePhase::Cleaning => {
                        ui.label("Cleaning...");
                    }
                    _ => {
                        ui.label("No cleaned snapshot for the current parameters yet.");
                    }
                }
            } else {
                self.trace_plot(ui, "cleaned_trace", ChartSlot::Cleaned, &cleaned);
            }
        });
    }

    /// One linked trace chart: applies any pending view before drawing, then
    /// reports the x-range it displayed so the peer mirrors it.
    fn trace_plot(
        &mut self,
        ui: &mut egui::Ui,
        id: &str,
        slot: ChartSlot,
        traces: &[TraceSeries],
    ) {
        let pending = self.view_link.take_pending(slot);
        let response = Plot::new(id)
            .height(TRACE_PLOT_HEIGHT)
            .legend(Legend::default())
            .show(ui, |plot_ui| {
                match pending {
                    Some(PendingView::Range(range)) => {
                        let bounds = plot_ui.plot_bounds();
                        plot_ui.set_plot_bounds(PlotBounds::from_min_max(
                            [range.min, bounds.min()[1]],
                            [range.max, bounds.max()[1]],
                        ));
                    }
                    Some(PendingView::Full) => {
                        plot_ui.set_auto_bounds(egui::Vec2b::new(true, true));
                    }
                    None => {}
                }
                for series in traces {
                    let color = CHANNEL_COLORS[series.channel_index % CHANNEL_COLORS.len()];
                    plot_ui.line(
                        Line::new(series.points.clone())
                            .stroke(egui::Stroke::new(1.0, color_from_u32(color)))
                            .name(series.label.clone()),
                    );
                }
            });
        let bounds = response.transform.bounds();
        self.view_link
            .report(slot, ViewRange::new(bounds.min()[0], bounds.max()[0]));
    }

    fn show_spectral_tab(&mut self, ctx: &egui::Context) {
        egui::SidePanel::left("spectral_controls").show(ctx, |ui| {
            ui.heading("Spectral");
            self.slot_rows(ui, &[AnalysisKind::BandPower, AnalysisKind::Psd]);
            ui.separator();
            ui.label("Both refresh automatically after each clean.");
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let bands: Vec<(String, f64)> = self
                .router
                .session()
                .derived
                .band_power
                .ready()
                .map(|bp| {
                    bp.ordered()
                        .into_iter()
                        .map(|(name, power)| (name.to_string(), power))
                        .collect()
                })
                .unwrap_or_default();
            let psd: Vec<[f64; 2]> = self.router.ensure_psd_points().to_vec();

            if bands.is_empty() && psd.is_empty() {
                ui.centered_and_justified(|ui| {
                    ui.label("Clean a recording to populate spectral summaries.");
                });
                return;
            }

            if !bands.is_empty() {
                ui.group(|ui| {
                    ui.label("Band power");
                    for (name, power) in &bands {
                        ui.label(format!("{name}: {power:.4}"));
                    }
                });
            }
            if !psd.is_empty() {
                ui.separator();
                ui.label("Power spectral density");
                Plot::new("psd_plot").height(280.0).show(ui, |plot_ui| {
                    plot_ui.line(Line::new(psd.clone()).name("PSD"));
                });
            }
        });
    }

    fn show_metrics_tab(&mut self, ctx: &egui::Context) {
        egui::SidePanel::left("metrics_controls").show(ctx, |ui| {
            ui.heading("Derived metrics");
            self.slot_rows(
                ui,
                &[
                    AnalysisKind::SpectralEntropy,
                    AnalysisKind::Hjorth,
                    AnalysisKind::FullMetrics,
                    AnalysisKind::Insights,
                ],
            );
            ui.separator();
            ui.label("Metrics run against the latest cleaned snapshot.");
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let derived = &self.router.session().derived;
            let entropy = derived.spectral_entropy.ready().cloned();
            let hjorth = derived.hjorth.ready().cloned();
            let metrics = derived.full_metrics.ready().cloned();
            let insights = derived.insights.ready().cloned();
            let labels: Vec<String> = self
                .router
                .session()
                .raw
                .as_ref()
                .map(|r| r.labels.clone())
                .unwrap_or_default();

            if entropy.is_none() && hjorth.is_none() && metrics.is_none() && insights.is_none() {
                ui.centered_and_justified(|ui| {
                    ui.label("Run a metric from the controls to see results here.");
                });
                return;
            }

            if let Some(entropy) = entropy {
                ui.group(|ui| {
                    ui.label("Spectral entropy");
                    ui.label(format!("Mean: {:.3}", entropy.mean));
                    for (index, value) in entropy.per_channel.iter().take(8).enumerate() {
                        let label = labels
                            .get(index)
                            .cloned()
                            .unwrap_or_else(|| format!("Ch{}", index + 1));
                        ui.label(format!("{label}: {value:.3}"));
                    }
                    if entropy.per_channel.len() > 8 {
                        ui.label(format!("... +{} more", entropy.per_channel.len() - 8));
                    }
                });
            }
            if let Some(hjorth) = hjorth {
                ui.group(|ui| {
                    ui.label("Hjorth parameters");
                    ui.label(format!("Activity mean: {:.3}", mean(&hjorth.activity)));
                    ui.label(format!("Mobility mean: {:.3}", mean(&hjorth.mobility)));
                    ui.label(format!("Complexity mean: {:.3}", mean(&hjorth.complexity)));
                });
            }
            if let Some(metrics) = metrics {
                ui.group(|ui| {
                    ui.label("Full metrics");
                    for (name, power) in &metrics.band_power {
                        ui.label(format!("{name}: {power:.4}"));
                    }
                    ui.label(format!(
                        "Spectral entropy: {:.3}",
                        metrics.spectral_entropy_mean
                    ));
                    ui.label(format!("Hjorth mobility: {:.3}", metrics.hjorth_mobility_mean));
                    ui.label(format!(
                        "Hjorth complexity: {:.3}",
                        metrics.hjorth_complexity_mean
                    ));
                    ui.label(format!("Peak frequency: {:.1} Hz", metrics.peak_frequency_hz));
                });
            }
            if let Some(insights) = insights {
                ui.group(|ui| {
                    ui.label("Insights");
                    ui.label(insights.summary.clone());
                    for highlight in &insights.highlights {
                        ui.label(format!("- {highlight}"));
                    }
                });
            }
        });
    }

    fn show_time_frequency_tab(&mut self, ctx: &egui::Context) {
        egui::SidePanel::left("tf_controls").show(ctx, |ui| {
            ui.heading("Time-frequency");
            let mut edited = false;
            ui.horizontal(|ui| {
                ui.label("Baseline ratio");
                edited |= ui
                    .add(
                        egui::DragValue::new(&mut self.tf_draft.baseline_ratio)
                            .range(0.0..=0.9)
                            .speed(0.01),
                    )
                    .changed();
            });
            ui.horizontal(|ui| {
                ui.label("Min freq");
                edited |= ui
                    .add(
                        egui::DragValue::new(&mut self.tf_draft.freq_min)
                            .range(0.5..=100.0)
                            .speed(0.5)
                            .suffix(" Hz"),
                    )
                    .changed();
            });
            ui.horizontal(|ui| {
                ui.label("Max freq");
                edited |= ui
                    .add(
                        egui::DragValue::new(&mut self.tf_draft.freq_max)
                            .range(1.0..=200.0)
                            .speed(0.5)
                            .suffix(" Hz"),
                    )
                    .changed();
            });
            if edited {
                self.router.intent(Intent::EditTimeFrequency(self.tf_draft));
            }

            let state = self
                .router
                .session()
                .derived
                .slot_state(AnalysisKind::TimeFrequency);
            let has_dataset = self.router.session().raw.is_some();
            match state {
                SlotState::Pending => {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label("Computing...");
                    });
                }
                _ => {
                    let label = if state == SlotState::Ready {
                        "Recompute heatmap"
                    } else {
                        "Compute heatmap"
                    };
                    if ui
                        .add_enabled(has_dataset, egui::Button::new(label))
                        .clicked()
                    {
                        self.router
                            .intent(Intent::RequestAnalysis(AnalysisKind::TimeFrequency));
                    }
                }
            }
            if let Some(message) = self
                .router
                .session()
                .derived
                .slot_failure(AnalysisKind::TimeFrequency)
                .map(|m| m.to_string())
            {
                ui.colored_label(egui::Color32::LIGHT_RED, message);
            }

            ui.separator();
            ui.heading("Color scale");
            let mut scale = self.router.scale();
            let mut scale_edited = false;
            ui.horizontal(|ui| {
                ui.label("Min");
                scale_edited |= ui
                    .add(
                        egui::DragValue::new(&mut scale.min)
                            .range(-30.0..=0.0)
                            .speed(0.1)
                            .suffix(" dB"),
                    )
                    .changed();
            });
            ui.horizontal(|ui| {
                ui.label("Max");
                scale_edited |= ui
                    .add(
                        egui::DragValue::new(&mut scale.max)
                            .range(0.0..=30.0)
                            .speed(0.1)
                            .suffix(" dB"),
                    )
                    .changed();
            });
            if scale_edited {
                self.router.set_scale(scale);
            }
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let state = self
                .router
                .session()
                .derived
                .slot_state(AnalysisKind::TimeFrequency);
            match state {
                SlotState::Idle => {
                    ui.centered_and_justified(|ui| {
                        ui.label("Request a time-frequency decomposition from the controls.");
                    });
                }
                SlotState::Pending => {
                    ui.centered_and_justified(|ui| {
                        ui.label("Computing time-frequency decomposition...");
                    });
                }
                SlotState::Failed => {
                    let message = self
                        .router
                        .session()
                        .derived
                        .slot_failure(AnalysisKind::TimeFrequency)
                        .unwrap_or("time-frequency failed")
                        .to_string();
                    ui.centered_and_justified(|ui| {
                        ui.colored_label(egui::Color32::LIGHT_RED, message);
                    });
                }
                SlotState::Ready => {
                    let has_grid = self
                        .router
                        .session()
                        .derived
                        .time_frequency
                        .ready()
                        .map(|tf| tf.grid.is_some())
                        .unwrap_or(false);
                    if has_grid {
                        self.heatmap_view(ui);
                    } else {
                        self.png_fallback(ui);
                    }
                }
            }
        });
    }

    fn heatmap_view(&mut self, ui: &mut egui::Ui) {
        let label_w = 46.0;
        let label_h = 18.0;
        let bar_w = 16.0;
        let bar_gap = 10.0;
        let bar_text_w = 42.0;
        let avail = ui.available_width();
        let img_w = (avail - label_w - bar_w - bar_gap - bar_text_w).max(64.0);
        let img_h = (img_w * 0.5).clamp(160.0, 420.0);
        let px_w = (img_w * HEATMAP_OVERSAMPLE) as usize;
        let px_h = (img_h * HEATMAP_OVERSAMPLE) as usize;

        if self.router.ensure_heatmap(px_w, px_h).is_none() {
            return;
        }
        let stamp = self.router.heatmap_stamp();
        let fresh = matches!(&self.heatmap_texture, Some((s, _)) if *s == stamp);
        if !fresh {
            let image = match self.router.ensure_heatmap(px_w, px_h) {
                Some(raster) => egui::ColorImage::from_rgba_unmultiplied(
                    [raster.width, raster.height],
                    &raster.pixels,
                ),
                None => return,
            };
            let handle = ui
                .ctx()
                .load_texture("tf_heatmap", image, egui::TextureOptions::NEAREST);
            self.heatmap_texture = Some((stamp, handle));
        }
        let texture_id = match &self.heatmap_texture {
            Some((_, handle)) => handle.id(),
            None => return,
        };

        let scale = self.router.scale();
        let bar_fresh = matches!(&self.colorbar_texture, Some((s, _)) if *s == scale);
        if !bar_fresh {
            let bar = render_colorbar(&scale, 1, 256);
            let image =
                egui::ColorImage::from_rgba_unmultiplied([bar.width, bar.height], &bar.pixels);
            let handle = ui
                .ctx()
                .load_texture("tf_colorbar", image, egui::TextureOptions::LINEAR);
            self.colorbar_texture = Some((scale, handle));
        }
        let bar_id = match &self.colorbar_texture {
            Some((_, handle)) => handle.id(),
            None => return,
        };

        let (t_ticks, f_ticks) = match self
            .router
            .session()
            .derived
            .time_frequency
            .ready()
            .and_then(|tf| tf.grid.as_ref())
        {
            Some(grid) => (
                time_ticks(&grid.times_ms, 5),
                frequency_ticks(&grid.freqs_hz, 5),
            ),
            None => return,
        };

        let (rect, _response) =
            ui.allocate_exact_size(egui::vec2(avail, img_h + label_h), egui::Sense::hover());
        let image_rect = egui::Rect::from_min_size(
            egui::pos2(rect.left() + label_w, rect.top()),
            egui::vec2(img_w, img_h),
        );
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        let text_color = ui.visuals().text_color();
        let font = egui::FontId::proportional(11.0);
        let painter = ui.painter();
        painter.image(texture_id, image_rect, uv, egui::Color32::WHITE);
        for tick in &f_ticks {
            let y = image_rect.bottom() - tick.frac as f32 * image_rect.height();
            painter.text(
                egui::pos2(image_rect.left() - 6.0, y),
                egui::Align2::RIGHT_CENTER,
                &tick.label,
                font.clone(),
                text_color,
            );
        }
        for tick in &t_ticks {
            let x = image_rect.left() + tick.frac as f32 * image_rect.width();
            painter.text(
                egui::pos2(x, image_rect.bottom() + 4.0),
                egui::Align2::CENTER_TOP,
                &tick.label,
                font.clone(),
                text_color,
            );
        }
        let bar_rect = egui::Rect::from_min_size(
            egui::pos2(image_rect.right() + bar_gap, image_rect.top()),
            egui::vec2(bar_w, img_h),
        );
        painter.image(bar_id, bar_rect, uv, egui::Color32::WHITE);
        let labels = colorbar_labels(&scale);
        painter.text(
            egui::pos2(bar_rect.right() + 4.0, bar_rect.top()),
            egui::Align2::LEFT_TOP,
            &labels[0],
            font.clone(),
            text_color,
        );
        painter.text(
            egui::pos2(bar_rect.right() + 4.0, bar_rect.center().y),
            egui::Align2::LEFT_CENTER,
            &labels[1],
            font.clone(),
            text_color,
        );
        painter.text(
            egui::pos2(bar_rect.right() + 4.0, bar_rect.bottom()),
            egui::Align2::LEFT_BOTTOM,
            &labels[2],
            font,
            text_color,
        );
        ui.label("Time (ms) vs frequency (Hz), power in dB relative to baseline.");
    }

    fn png_fallback(&mut self, ui: &mut egui::Ui) {
        let bytes = match self
            .router
            .session()
            .derived
            .time_frequency
            .ready()
            .and_then(|tf| tf.image_png.clone())
        {
            Some(bytes) => bytes,
            None => return,
        };
        ui.label("The service returned a pre-rendered image instead of a numeric grid.");
        if ui.button("Save heatmap PNG").clicked() {
            if let Some(path) = FileDialog::new()
                .add_filter("PNG", &["png"])
                .set_file_name("time_frequency.png")
                .save_file()
            {
                match std::fs::write(&path, &bytes) {
                    Ok(()) => self.tf_status = format!("Saved {}", path.display()),
                    Err(err) => self.tf_status = format!("Save failed: {err}"),
                }
            }
        }
        if !self.tf_status.is_empty() {
            ui.label(self.tf_status.clone());
        }
    }

    /// Status row per analysis slot with a compute/retry button where one
    /// makes sense.
    fn slot_rows(&mut self, ui: &mut egui::Ui, kinds: &[AnalysisKind]) {
        let mut requested = None;
        for &kind in kinds {
            let state = self.router.session().derived.slot_state(kind);
            let failure = self
                .router
                .session()
                .derived
                .slot_failure(kind)
                .map(|m| m.to_string());
            ui.horizontal(|ui| {
                ui.label(kind.label());
                match state {
                    SlotState::Pending => {
                        ui.spinner();
                    }
                    SlotState::Ready => {
                        ui.label("ready");
                    }
                    SlotState::Idle => {
                        if ui.button("Compute").clicked() {
                            requested = Some(kind);
                        }
                    }
                    SlotState::Failed => {
                        if ui.button("Retry").clicked() {
                            requested = Some(kind);
                        }
                    }
                }
            });
            if let Some(message) = failure {
                ui.colored_label(egui::Color32::LIGHT_RED, message);
            }
        }
        if let Some(kind) = requested {
            self.router.intent(Intent::RequestAnalysis(kind));
        }
    }
}

impl eframe::App for ScalpApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.router.poll(Instant::now());
        if self.router.take_loaded() {
            // fresh dataset: refit both charts and resync the filter draft
            self.view_link.clear();
            self.view_link.request_reset();
            self.draft = self.router.session().params;
        }
        if self.router.busy() {
            ctx.request_repaint_after(Duration::from_millis(50));
        }

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.vertical(|ui| {
                ui.heading("SCALP — EEG Cleaning Dashboard");
                ui.label("Upload a recording, tune the filters and explore the derived views.");
                ui.horizontal(|ui| {
                    for tab in GuiTab::all() {
                        let selected = self.active_tab == tab;
                        if ui.selectable_label(selected, tab.title()).clicked() {
                            self.active_tab = tab;
                        }
                    }
                });
            });
        });

        match self.active_tab {
            GuiTab::Signals => self.show_signals_tab(ctx),
            GuiTab::Spectral => self.show_spectral_tab(ctx),
            GuiTab::Metrics => self.show_metrics_tab(ctx),
            GuiTab::TimeFrequency => self.show_time_frequency_tab(ctx),
        }

        egui::TopBottomPanel::bottom("bottom").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(format!(
                    "Pipeline: {}",
                    self.router.pipeline().phase().label()
                ));
                if self.router.busy() {
                    ui.spinner();
                }
                if let LoadStatus::Busy { name } = self.router.load_status() {
                    ui.label(format!("loading {name}..."));
                }
                if let Some(error) = self.router.session().error.clone() {
                    ui.colored_label(egui::Color32::LIGHT_RED, error);
                }
            });
        });
    }
}

fn window_label(window: Window) -> String {
    match window {
        Window::Full => "Full recording".to_string(),
        Window::Seconds(secs) => format!("{secs:.0} s"),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn color_from_u32(color: u32) -> egui::Color32 {
    let r = ((color >> 16) & 0xFF) as u8;
    let g = ((color >> 8) & 0xFF) as u8;
    let b = (color & 0xFF) as u8;
    egui::Color32::from_rgb(r, g, b)
}
