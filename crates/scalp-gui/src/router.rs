use crate::store::Store;
use crossbeam_channel::{bounded, Receiver, Sender};
use scalp_lib::pipeline::{Intent, ServiceOutcome, ServiceRequest};
use scalp_lib::remote::{execute, AnalysisService};
use scalp_lib::signal::Recording;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Backpressure bound for updates flowing back from worker threads.
const UPDATE_QUEUE_DEPTH: usize = 32;

/// Dataset load lifecycle, separate from the pipeline because the file has
/// not reached it yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LoadStatus {
    #[default]
    Idle,
    Busy {
        name: String,
    },
}

/// A finished background job, routed back onto the UI thread.
enum RouterUpdate {
    Loaded {
        name: String,
        result: Result<Recording, String>,
    },
    Service(ServiceOutcome),
}

/// Owns the store and runs every service call off the UI thread.
///
/// Intents are applied synchronously; the requests they produce are executed
/// on one-shot worker threads whose outcomes flow back through a bounded
/// channel and are drained by [`ServiceRouter::poll`] once per frame.
pub struct ServiceRouter {
    store: Store,
    service: Arc<dyn AnalysisService>,
    update_tx: Sender<RouterUpdate>,
    update_rx: Receiver<RouterUpdate>,
    load: LoadStatus,
    jobs_inflight: usize,
    loaded: bool,
}

impl ServiceRouter {
    pub fn new(service: Arc<dyn AnalysisService>) -> Self {
        let (update_tx, update_rx) = bounded(UPDATE_QUEUE_DEPTH);
        Self {
            store: Store::new(),
            service,
            update_tx,
            update_rx,
            load: LoadStatus::default(),
            jobs_inflight: 0,
            loaded: false,
        }
    }

    pub fn load_status(&self) -> &LoadStatus {
        &self.load
    }

    /// True once per completed dataset load, so the UI can reset views.
    pub fn take_loaded(&mut self) -> bool {
        std::mem::take(&mut self.loaded)
    }

    /// True while anything is outstanding: a load, a worker thread, an armed
    /// debounce timer or an unresolved slot.
    pub fn busy(&self) -> bool {
        self.jobs_inflight > 0
            || self.load != LoadStatus::Idle
            || self.store.pipeline().work_pending()
    }

    /// Reads, uploads and parses a dataset on a worker thread. Ignored while
    /// a previous load is still running.
    pub fn load_dataset(&mut self, path: PathBuf) {
        if self.load != LoadStatus::Idle {
            return;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.load = LoadStatus::Busy { name: name.clone() };
        let service = self.service.clone();
        let tx = self.update_tx.clone();
        thread::spawn(move || {
            let result = std::fs::read(&path)
                .map_err(|err| format!("reading {}: {err}", path.display()))
                .and_then(|bytes| {
                    service
                        .upload(&name, bytes)
                        .map_err(|err| format!("{err:#}"))
                })
                .and_then(|uploaded| {
                    service
                        .parse(&uploaded.tmp_path)
                        .map_err(|err| format!("{err:#}"))
                });
            let _ = tx.send(RouterUpdate::Loaded { name, result });
        });
    }

    /// Applies a user intent and executes whatever work it produced.
    pub fn intent(&mut self, intent: Intent) {
        let requests = self.store.pipeline_mut().apply(intent, Instant::now());
        self.dispatch(requests);
    }

    /// Drains finished jobs into the pipeline and fires the debounce timer.
    /// Call once per frame.
    pub fn poll(&mut self, now: Instant) {
        while let Ok(update) = self.update_rx.try_recv() {
            match update {
                RouterUpdate::Loaded { result, name } => {
                    self.load = LoadStatus::Idle;
                    match result {
                        Ok(recording) => {
                            log::info!(
                                "loaded {name}: {} channels at {} Hz",
                                recording.channel_count(),
                                recording.fs
                            );
                            let requests = self
                                .store
                                .pipeline_mut()
                                .apply(Intent::LoadRecording(Arc::new(recording)), now);
                            self.loaded = true;
                            self.dispatch(requests);
                        }
                        Err(message) => {
                            self.store
                                .pipeline_mut()
                                .fail(format!("loading {name}: {message}"));
                        }
                    }
                }
                RouterUpdate::Service(outcome) => {
                    self.jobs_inflight = self.jobs_inflight.saturating_sub(1);
                    let requests = self.store.pipeline_mut().complete(outcome);
                    self.dispatch(requests);
                }
            }
        }
        let fired = self.store.pipeline_mut().tick(now);
        self.dispatch(fired);
    }

    fn dispatch(&mut self, requests: Vec<ServiceRequest>) {
        for request in requests {
            self.jobs_inflight += 1;
            let service = self.service.clone();
            let tx = self.update_tx.clone();
            thread::spawn(move || {
                let outcome = execute(service.as_ref(), request);
                let _ = tx.send(RouterUpdate::Service(outcome));
            });
        }
    }
}

impl Deref for ServiceRouter {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl DerefMut for ServiceRouter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use scalp_lib::session::{
        AnalysisKind, BandPowerResult, CleanOutput, FilterParameters, FullMetricsResult,
        HjorthResult, InsightsResult, PipelinePhase, PsdResult, SpectralEntropyResult,
        TimeFrequencyParams, TimeFrequencyResult,
    };
    use scalp_lib::remote::UploadResponse;
    use scalp_lib::signal::ChannelMatrix;
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    fn recording() -> Recording {
        let matrix = ChannelMatrix::new(vec![vec![0.1; 64], vec![0.9; 64]]).unwrap();
        Recording::with_default_labels(matrix, 64.0).unwrap()
    }

    /// Canned service that records which endpoints were hit and can be told
    /// to fail exactly one of them.
    struct ScriptedService {
        calls: Mutex<Vec<&'static str>>,
        fail: Option<&'static str>,
    }

    impl ScriptedService {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: None,
            }
        }

        fn failing(method: &'static str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: Some(method),
            }
        }

        fn called(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn hit(&self, name: &'static str) -> Result<()> {
            self.calls.lock().unwrap().push(name);
            if self.fail == Some(name) {
                bail!("scripted {name} failure");
            }
            Ok(())
        }
    }

    impl AnalysisService for ScriptedService {
        fn health(&self) -> Result<()> {
            self.hit("health")
        }

        fn upload(&self, file_name: &str, _bytes: Vec<u8>) -> Result<UploadResponse> {
            self.hit("upload")?;
            Ok(UploadResponse {
                filename: file_name.to_string(),
                tmp_path: format!("/tmp/{file_name}"),
            })
        }

        fn parse(&self, _tmp_path: &str) -> Result<Recording> {
            self.hit("parse")?;
            Ok(recording())
        }

        fn clean(
            &self,
            recording: &Recording,
            _params: &FilterParameters,
        ) -> Result<CleanOutput> {
            self.hit("clean")?;
            Ok(CleanOutput {
                recording: recording.clone(),
                warnings: Vec::new(),
                ica_excluded: None,
                ica_topomap_png: None,
            })
        }

        fn band_power(&self, _recording: &Recording) -> Result<BandPowerResult> {
            self.hit("band_power")?;
            Ok(BandPowerResult {
                bands: BTreeMap::from([("alpha".to_string(), 1.0)]),
            })
        }

        fn psd(&self, _recording: &Recording) -> Result<PsdResult> {
            self.hit("psd")?;
            Ok(PsdResult {
                frequencies: vec![2.0, 4.0],
                power: vec![0.5, 0.25],
            })
        }

        fn spectral_entropy(&self, _recording: &Recording) -> Result<SpectralEntropyResult> {
            self.hit("spectral_entropy")?;
            Ok(SpectralEntropyResult {
                per_channel: vec![0.8, 0.7],
                mean: 0.75,
            })
        }

        fn hjorth(&self, _recording: &Recording) -> Result<HjorthResult> {
            self.hit("hjorth")?;
            Ok(HjorthResult {
                activity: vec![1.0, 1.0],
                mobility: vec![0.5, 0.5],
                complexity: vec![1.2, 1.2],
            })
        }

        fn full_metrics(&self, _recording: &Recording) -> Result<FullMetricsResult> {
            self.hit("full_metrics")?;
            Ok(FullMetricsResult {
                band_power: BTreeMap::new(),
                spectral_entropy_mean: 0.75,
                hjorth_mobility_mean: 0.5,
                hjorth_complexity_mean: 1.2,
                peak_frequency_hz: 10.0,
            })
        }

        fn insights(&self, _recording: &Recording) -> Result<InsightsResult> {
            self.hit("insights")?;
            Ok(InsightsResult {
                summary: "all quiet".to_string(),
                highlights: Vec::new(),
            })
        }

        fn time_frequency(
            &self,
            _recording: &Recording,
            _params: &TimeFrequencyParams,
        ) -> Result<TimeFrequencyResult> {
            self.hit("time_frequency")?;
            Ok(TimeFrequencyResult {
                grid: None,
                image_png: Some(vec![0x89, b'P', b'N', b'G']),
            })
        }
    }

    /// Polls until the router settles or the deadline passes.
    fn drain(router: &mut ServiceRouter) {
        for _ in 0..400 {
            router.poll(Instant::now());
            if !router.busy() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("router did not settle");
    }

    #[test]
    fn analysis_request_runs_clean_then_fan_out() {
        let service = Arc::new(ScriptedService::new());
        let mut router = ServiceRouter::new(service.clone());
        router.intent(Intent::LoadRecording(Arc::new(recording())));
        router.intent(Intent::RequestAnalysis(AnalysisKind::BandPower));
        drain(&mut router);
        let calls = service.called();
        assert_eq!(calls[0], "clean");
        assert!(calls.contains(&"band_power"));
        assert!(calls.contains(&"psd"));
        assert_eq!(calls.len(), 3);
        let session = router.session();
        assert!(session.derived.band_power.ready().is_some());
        assert!(session.derived.psd.ready().is_some());
        assert_eq!(router.pipeline().phase(), PipelinePhase::AnalysisReady);
    }

    #[test]
    fn service_failure_lands_in_the_slot() {
        let service = Arc::new(ScriptedService::failing("psd"));
        let mut router = ServiceRouter::new(service);
        router.intent(Intent::LoadRecording(Arc::new(recording())));
        router.intent(Intent::RequestAnalysis(AnalysisKind::Psd));
        drain(&mut router);
        let session = router.session();
        assert!(session.derived.band_power.ready().is_some());
        let failure = session.derived.psd.failure().unwrap();
        assert!(failure.contains("psd failure"), "got {failure}");
    }

    #[test]
    fn missing_file_reports_a_load_error() {
        let service = Arc::new(ScriptedService::new());
        let mut router = ServiceRouter::new(service);
        router.load_dataset(PathBuf::from("/nonexistent/session.csv"));
        drain(&mut router);
        assert_eq!(*router.load_status(), LoadStatus::Idle);
        let error = router.session().error.clone().unwrap();
        assert!(error.contains("loading session.csv"), "got {error}");
        assert!(router.session().raw.is_none());
    }

    #[test]
    fn load_flows_through_upload_and_parse() {
        let service = Arc::new(ScriptedService::new());
        let mut router = ServiceRouter::new(service.clone());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0.1,0.2\n0.3,0.4\n").unwrap();
        router.load_dataset(file.path().to_path_buf());
        drain(&mut router);
        assert_eq!(service.called(), ["upload", "parse"]);
        assert!(router.session().raw.is_some());
        assert_eq!(router.pipeline().phase(), PipelinePhase::Loaded);
        assert!(router.take_loaded());
        assert!(!router.take_loaded());
    }

    #[test]
    fn second_load_while_busy_is_ignored() {
        let service = Arc::new(ScriptedService::new());
        let mut router = ServiceRouter::new(service);
        router.load_dataset(PathBuf::from("/nonexistent/a.csv"));
        let first = router.load_status().clone();
        router.load_dataset(PathBuf::from("/nonexistent/b.csv"));
        assert_eq!(*router.load_status(), first);
        drain(&mut router);
    }
}
