use scalp_lib::heatmap::{render_grid, DivergingScale, Raster};
use scalp_lib::pipeline::Pipeline;
use scalp_lib::session::Session;
use scalp_lib::trace::{reduce, TraceSeries, Window};

/// Decimation budget for on-screen traces. Plots cap out around this many
/// points per channel regardless of recording length.
pub const TRACE_POINT_BUDGET: usize = 2048;

/// Figure fingerprint: the pipeline revision plus the store-local display
/// settings the figure was built from.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TraceKey {
    revision: u64,
    window: Window,
    budget: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HeatmapKey {
    revision: u64,
    width: usize,
    height: usize,
    scale: DivergingScale,
}

/// Pipeline state plus lazily rebuilt figures.
///
/// Figures are cached against the pipeline revision so they refresh once per
/// state change instead of once per frame. Display settings (window, point
/// budget, color scale) live here rather than in the session because they
/// never trigger service work.
#[derive(Debug)]
pub struct Store {
    pipeline: Pipeline,
    window: Window,
    point_budget: usize,
    scale: DivergingScale,
    raw_traces: Vec<TraceSeries>,
    raw_key: Option<TraceKey>,
    cleaned_traces: Vec<TraceSeries>,
    cleaned_key: Option<TraceKey>,
    psd_points: Vec<[f64; 2]>,
    psd_revision: Option<u64>,
    heatmap: Option<Raster>,
    heatmap_key: Option<HeatmapKey>,
    heatmap_stamp: u64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            pipeline: Pipeline::new(),
            window: Window::Seconds(10.0),
            point_budget: TRACE_POINT_BUDGET,
            scale: DivergingScale::default(),
            raw_traces: Vec::new(),
            raw_key: None,
            cleaned_traces: Vec::new(),
            cleaned_key: None,
            psd_points: Vec::new(),
            psd_revision: None,
            heatmap: None,
            heatmap_key: None,
            heatmap_stamp: 0,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn session(&self) -> &Session {
        self.pipeline.session()
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn set_window(&mut self, window: Window) {
        self.window = window;
    }

    pub fn point_budget(&self) -> usize {
        self.point_budget
    }

    pub fn set_point_budget(&mut self, budget: usize) {
        self.point_budget = budget.max(1);
    }

    pub fn scale(&self) -> DivergingScale {
        self.scale
    }

    pub fn set_scale(&mut self, scale: DivergingScale) {
        self.scale = scale;
    }

    fn trace_key(&self) -> TraceKey {
        TraceKey {
            revision: self.pipeline.revision(),
            window: self.window,
            budget: self.point_budget,
        }
    }

    /// Decimated, offset-stacked traces of the raw recording.
    pub fn ensure_raw_traces(&mut self) -> &[TraceSeries] {
        let key = self.trace_key();
        if self.raw_key != Some(key) {
            let session = self.pipeline.session();
            self.raw_traces = match &session.raw {
                Some(recording) => reduce(
                    recording,
                    self.window,
                    self.point_budget,
                    session.visible_mask(),
                ),
                None => Vec::new(),
            };
            self.raw_key = Some(key);
        }
        &self.raw_traces
    }

    /// Traces of the cleaned recording, present only while the committed
    /// clean matches the current parameter snapshot.
    pub fn ensure_cleaned_traces(&mut self) -> &[TraceSeries] {
        let key = self.trace_key();
        if self.cleaned_key != Some(key) {
            let session = self.pipeline.session();
            self.cleaned_traces = match session.cleaned_current() {
                Some(recording) => reduce(
                    recording,
                    self.window,
                    self.point_budget,
                    session.visible_mask(),
                ),
                None => Vec::new(),
            };
            self.cleaned_key = Some(key);
        }
        &self.cleaned_traces
    }

    /// PSD line points, empty until the slot resolves.
    pub fn ensure_psd_points(&mut self) -> &[[f64; 2]] {
        let revision = self.pipeline.revision();
        if self.psd_revision != Some(revision) {
            self.psd_points = self
                .pipeline
                .session()
                .derived
                .psd
                .ready()
                .map(|psd| psd.points())
                .unwrap_or_default();
            self.psd_revision = Some(revision);
        }
        &self.psd_points
    }

    /// Heatmap raster at the requested pixel size, or `None` when no grid is
    /// available. Compare [`Store::heatmap_stamp`] to decide whether a GPU
    /// texture needs re-uploading.
    pub fn ensure_heatmap(&mut self, width: usize, height: usize) -> Option<&Raster> {
        let grid = match self
            .pipeline
            .session()
            .derived
            .time_frequency
            .ready()
            .and_then(|tf| tf.grid.as_ref())
        {
            Some(grid) => grid,
            None => {
                self.heatmap = None;
                self.heatmap_key = None;
                return None;
            }
        };
        let key = HeatmapKey {
            revision: self.pipeline.revision(),
            width,
            height,
            scale: self.scale,
        };
        if self.heatmap_key != Some(key) {
            self.heatmap = Some(render_grid(grid, &self.scale, width, height));
            self.heatmap_key = Some(key);
            self.heatmap_stamp += 1;
        }
        self.heatmap.as_ref()
    }

    /// Bumped whenever the heatmap raster is rebuilt.
    pub fn heatmap_stamp(&self) -> u64 {
        self.heatmap_stamp
    }
}
