use crate::session::{
    AnalysisKind, AnalysisSlot, CleanOutput, FilterParameters, PipelinePhase, Session,
    TimeFrequencyParams,
};
use crate::signal::Recording;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Quiet period after the last parameter edit before a clean fires.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Something the user asked for.
#[derive(Debug, Clone)]
pub enum Intent {
    LoadRecording(Arc<Recording>),
    EditParameters(FilterParameters),
    EditTimeFrequency(TimeFrequencyParams),
    RequestAnalysis(AnalysisKind),
    SetChannelVisible { index: usize, visible: bool },
}

/// Analyses the service runs on the cleaned matrix alone. Time-frequency
/// carries extra parameters and travels as [`ServiceRequest::TimeFrequency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixAnalysis {
    BandPower,
    Psd,
    SpectralEntropy,
    Hjorth,
    FullMetrics,
    Insights,
}

impl MatrixAnalysis {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            MatrixAnalysis::BandPower => AnalysisKind::BandPower,
            MatrixAnalysis::Psd => AnalysisKind::Psd,
            MatrixAnalysis::SpectralEntropy => AnalysisKind::SpectralEntropy,
            MatrixAnalysis::Hjorth => AnalysisKind::Hjorth,
            MatrixAnalysis::FullMetrics => AnalysisKind::FullMetrics,
            MatrixAnalysis::Insights => AnalysisKind::Insights,
        }
    }
}

/// Work the pipeline wants executed against the analysis service. Each
/// request carries the snapshot version it belongs to; the matching outcome
/// must echo it back.
#[derive(Debug, Clone)]
pub enum ServiceRequest {
    Clean {
        version: u64,
        recording: Arc<Recording>,
        params: FilterParameters,
    },
    Analyze {
        version: u64,
        kind: MatrixAnalysis,
        recording: Arc<Recording>,
    },
    TimeFrequency {
        version: u64,
        recording: Arc<Recording>,
        params: TimeFrequencyParams,
    },
}

impl ServiceRequest {
    pub fn version(&self) -> u64 {
        match self {
            ServiceRequest::Clean { version, .. }
            | ServiceRequest::Analyze { version, .. }
            | ServiceRequest::TimeFrequency { version, .. } => *version,
        }
    }
}

/// Completed service work, tagged with the version its request carried.
#[derive(Debug)]
pub enum ServiceOutcome {
    Cleaned {
        version: u64,
        result: Result<CleanOutput, String>,
    },
    Analysis {
        version: u64,
        kind: AnalysisKind,
        result: Result<AnalysisPayload, String>,
    },
}

#[derive(Debug, Clone)]
pub enum AnalysisPayload {
    BandPower(crate::session::BandPowerResult),
    Psd(crate::session::PsdResult),
    SpectralEntropy(crate::session::SpectralEntropyResult),
    Hjorth(crate::session::HjorthResult),
    FullMetrics(crate::session::FullMetricsResult),
    Insights(crate::session::InsightsResult),
    TimeFrequency(crate::session::TimeFrequencyResult),
}

impl AnalysisPayload {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisPayload::BandPower(_) => AnalysisKind::BandPower,
            AnalysisPayload::Psd(_) => AnalysisKind::Psd,
            AnalysisPayload::SpectralEntropy(_) => AnalysisKind::SpectralEntropy,
            AnalysisPayload::Hjorth(_) => AnalysisKind::Hjorth,
            AnalysisPayload::FullMetrics(_) => AnalysisKind::FullMetrics,
            AnalysisPayload::Insights(_) => AnalysisKind::Insights,
            AnalysisPayload::TimeFrequency(_) => AnalysisKind::TimeFrequency,
        }
    }
}

/// Debounced, version-tagged orchestration over one [`Session`].
///
/// The pipeline never performs IO itself: [`Pipeline::apply`],
/// [`Pipeline::tick`] and [`Pipeline::complete`] return the
/// [`ServiceRequest`]s the caller should execute, and the caller feeds
/// finished work back through [`Pipeline::complete`]. Outcomes tagged with a
/// superseded version are dropped without touching session state.
#[derive(Debug)]
pub struct Pipeline {
    session: Session,
    debounce: Duration,
    deadline: Option<Instant>,
    clean_inflight: Option<u64>,
    queued: Vec<AnalysisKind>,
    revision: u64,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_debounce(DEBOUNCE)
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            session: Session::default(),
            debounce,
            deadline: None,
            clean_inflight: None,
            queued: Vec::new(),
            revision: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }

    /// Monotone counter bumped whenever session state changes; cheap
    /// staleness check for cached figures.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// When the debounce timer will fire, if armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn work_pending(&self) -> bool {
        self.deadline.is_some()
            || self.clean_inflight.is_some()
            || AnalysisKind::all()
                .iter()
                .any(|&k| self.session.derived.slot_state(k) == crate::session::SlotState::Pending)
    }

    pub fn phase(&self) -> PipelinePhase {
        let session = &self.session;
        if session.raw.is_none() {
            return PipelinePhase::Empty;
        }
        if session.cleaned_current().is_some() {
            let band = &session.derived.band_power;
            let psd = &session.derived.psd;
            let summaries_at_current = |slot_version: Option<u64>| slot_version == Some(session.version);
            if band.is_resolved()
                && psd.is_resolved()
                && summaries_at_current(band.version())
                && summaries_at_current(psd.version())
            {
                return PipelinePhase::AnalysisReady;
            }
            if band.is_pending() || psd.is_pending() {
                return PipelinePhase::AnalysisPending;
            }
            return PipelinePhase::Cleaned;
        }
        if self.clean_inflight == Some(session.version) || self.deadline.is_some() {
            return PipelinePhase::Cleaning;
        }
        PipelinePhase::Loaded
    }

    /// Records an out-of-band failure (e.g. a dataset load that died before
    /// reaching the pipeline).
    pub fn fail(&mut self, message: impl Into<String>) {
        self.session.error = Some(message.into());
        self.revision += 1;
    }

    pub fn apply(&mut self, intent: Intent, now: Instant) -> Vec<ServiceRequest> {
        match intent {
            Intent::LoadRecording(recording) => self.load(recording),
            Intent::EditParameters(params) => self.edit(params, now),
            Intent::EditTimeFrequency(params) => {
                if self.session.tf_params != params {
                    self.session.tf_params = params;
                    self.revision += 1;
                }
                Vec::new()
            }
            Intent::RequestAnalysis(kind) => self.request_analysis(kind),
            Intent::SetChannelVisible { index, visible } => {
                if let Some(flag) = self.session.channel_visible.get_mut(index) {
                    if *flag != visible {
                        *flag = visible;
                        self.revision += 1;
                    }
                }
                Vec::new()
            }
        }
    }

    /// Fires the debounced clean once the quiet period has elapsed.
    pub fn tick(&mut self, now: Instant) -> Vec<ServiceRequest> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.issue_clean()
            }
            _ => Vec::new(),
        }
    }

    /// Commits finished service work, dropping anything stale.
    pub fn complete(&mut self, outcome: ServiceOutcome) -> Vec<ServiceRequest> {
        match outcome {
            ServiceOutcome::Cleaned { version, result } => self.complete_clean(version, result),
            ServiceOutcome::Analysis {
                version,
                kind,
                result,
            } => {
                self.complete_analysis(version, kind, result);
                Vec::new()
            }
        }
    }

    fn load(&mut self, recording: Arc<Recording>) -> Vec<ServiceRequest> {
        let session = &mut self.session;
        session.channel_visible = vec![true; recording.channel_count()];
        session.raw = Some(recording);
        session.cleaned = None;
        session.cleaned_version = None;
        session.derived.clear();
        session.clean_warnings.clear();
        session.ica_excluded = None;
        session.ica_topomap_png = None;
        session.error = None;
        session.version += 1;
        self.deadline = None;
        self.clean_inflight = None;
        self.queued.clear();
        self.revision += 1;
        Vec::new()
    }

    fn edit(&mut self, params: FilterParameters, now: Instant) -> Vec<ServiceRequest> {
        if let Err(err) = params.validate() {
            self.session.error = Some(err.to_string());
            self.revision += 1;
            return Vec::new();
        }
        if self.session.raw.is_none() {
            // no dataset: remember the preference, nothing to re-clean
            if self.session.params != params {
                self.session.params = params;
                self.revision += 1;
            }
            return Vec::new();
        }
        let already_clean = self.session.params == params
            && self.session.cleaned_current().is_some();
        if already_clean {
            return Vec::new();
        }
        let session = &mut self.session;
        session.params = params;
        session.version += 1;
        session.cleaned = None;
        session.cleaned_version = None;
        session.derived.clear();
        self.queued.clear();
        self.deadline = Some(now + self.debounce);
        self.revision += 1;
        Vec::new()
    }

    fn request_analysis(&mut self, kind: AnalysisKind) -> Vec<ServiceRequest> {
        if self.session.raw.is_none() {
            return Vec::new();
        }
        let current = self.session.version;
        // duplicate of something already on the wire, drop it; a re-request
        // of a Ready slot is allowed so edited time-frequency knobs can apply
        if self.session.derived.slot_state(kind) == crate::session::SlotState::Pending
            && self.session.derived.slot_version(kind) == Some(current)
        {
            return Vec::new();
        }
        if self.session.cleaned_current().is_some() {
            let recording = match self.session.cleaned.clone() {
                Some(r) => r,
                None => return Vec::new(),
            };
            let request = self.analysis_request(kind, recording, current);
            self.mark_pending(kind, current);
            self.revision += 1;
            return vec![request];
        }
        // cleaning must land first; run it now unless one is already on the way
        if !self.queued.contains(&kind) {
            self.queued.push(kind);
        }
        self.revision += 1;
        if self.clean_inflight.is_none() && self.deadline.is_none() {
            return self.issue_clean();
        }
        Vec::new()
    }

    fn issue_clean(&mut self) -> Vec<ServiceRequest> {
        let recording = match self.session.raw.clone() {
            Some(r) => r,
            None => return Vec::new(),
        };
        let version = self.session.version;
        self.clean_inflight = Some(version);
        self.revision += 1;
        vec![ServiceRequest::Clean {
            version,
            recording,
            params: self.session.params,
        }]
    }

    fn complete_clean(
        &mut self,
        version: u64,
        result: Result<CleanOutput, String>,
    ) -> Vec<ServiceRequest> {
        if version != self.session.version {
            log::debug!(
                "dropping stale clean result (v{version} != v{})",
                self.session.version
            );
            return Vec::new();
        }
        if self.clean_inflight == Some(version) {
            self.clean_inflight = None;
        }
        self.revision += 1;
        match result {
            Ok(output) => {
                for warning in &output.warnings {
                    log::warn!("clean: {warning}");
                }
                log::info!(
                    "clean v{version} committed ({} channels)",
                    output.recording.channel_count()
                );
                let session = &mut self.session;
                session.cleaned = Some(Arc::new(output.recording));
                session.cleaned_version = Some(version);
                session.clean_warnings = output.warnings;
                session.ica_excluded = output.ica_excluded;
                session.ica_topomap_png = output.ica_topomap_png;
                session.error = None;
                let recording = match session.cleaned.clone() {
                    Some(r) => r,
                    None => return Vec::new(),
                };
                let mut kinds = vec![AnalysisKind::BandPower, AnalysisKind::Psd];
                for kind in self.queued.drain(..) {
                    if !kinds.contains(&kind) {
                        kinds.push(kind);
                    }
                }
                let mut requests = Vec::with_capacity(kinds.len());
                for kind in kinds {
                    requests.push(self.analysis_request(kind, recording.clone(), version));
                    self.mark_pending(kind, version);
                }
                requests
            }
            Err(message) => {
                self.queued.clear();
                self.session.error = Some(message);
                Vec::new()
            }
        }
    }

    fn complete_analysis(
        &mut self,
        version: u64,
        kind: AnalysisKind,
        result: Result<AnalysisPayload, String>,
    ) {
        if version != self.session.version {
            log::debug!(
                "dropping stale {kind:?} result (v{version} != v{})",
                self.session.version
            );
            return;
        }
        self.revision += 1;
        match result {
            Ok(payload) => {
                self.session.error = None;
                self.commit_payload(version, payload);
            }
            Err(message) => {
                self.mark_failed(kind, version, message.clone());
                self.session.error = Some(message);
            }
        }
    }

    fn analysis_request(
        &self,
        kind: AnalysisKind,
        recording: Arc<Recording>,
        version: u64,
    ) -> ServiceRequest {
        let kind = match kind {
            AnalysisKind::TimeFrequency => {
                return ServiceRequest::TimeFrequency {
                    version,
                    recording,
                    params: self.session.tf_params,
                }
            }
            AnalysisKind::BandPower => MatrixAnalysis::BandPower,
            AnalysisKind::Psd => MatrixAnalysis::Psd,
            AnalysisKind::SpectralEntropy => MatrixAnalysis::SpectralEntropy,
            AnalysisKind::Hjorth => MatrixAnalysis::Hjorth,
            AnalysisKind::FullMetrics => MatrixAnalysis::FullMetrics,
            AnalysisKind::Insights => MatrixAnalysis::Insights,
        };
        ServiceRequest::Analyze {
            version,
            kind,
            recording,
        }
    }

    fn mark_pending(&mut self, kind: AnalysisKind, version: u64) {
        let derived = &mut self.session.derived;
        match kind {
            AnalysisKind::BandPower => derived.band_power = AnalysisSlot::Pending { version },
            AnalysisKind::Psd => derived.psd = AnalysisSlot::Pending { version },
            AnalysisKind::SpectralEntropy => {
                derived.spectral_entropy = AnalysisSlot::Pending { version }
            }
            AnalysisKind::Hjorth => derived.hjorth = AnalysisSlot::Pending { version },
            AnalysisKind::FullMetrics => derived.full_metrics = AnalysisSlot::Pending { version },
            AnalysisKind::Insights => derived.insights = AnalysisSlot::Pending { version },
            AnalysisKind::TimeFrequency => {
                derived.time_frequency = AnalysisSlot::Pending { version }
            }
        }
    }

    fn mark_failed(&mut self, kind: AnalysisKind, version: u64, message: String) {
        let derived = &mut self.session.derived;
        match kind {
            AnalysisKind::BandPower => {
                derived.band_power = AnalysisSlot::Failed { version, message }
            }
            AnalysisKind::Psd => derived.psd = AnalysisSlot::Failed { version, message },
            AnalysisKind::SpectralEntropy => {
                derived.spectral_entropy = AnalysisSlot::Failed { version, message }
            }
            AnalysisKind::Hjorth => derived.hjorth = AnalysisSlot::Failed { version, message },
            AnalysisKind::FullMetrics => {
                derived.full_metrics = AnalysisSlot::Failed { version, message }
            }
            AnalysisKind::Insights => derived.insights = AnalysisSlot::Failed { version, message },
            AnalysisKind::TimeFrequency => {
                derived.time_frequency = AnalysisSlot::Failed { version, message }
            }
        }
    }

    fn commit_payload(&mut self, version: u64, payload: AnalysisPayload) {
        let derived = &mut self.session.derived;
        match payload {
            AnalysisPayload::BandPower(value) => {
                derived.band_power = AnalysisSlot::Ready { version, value }
            }
            AnalysisPayload::Psd(value) => derived.psd = AnalysisSlot::Ready { version, value },
            AnalysisPayload::SpectralEntropy(value) => {
                derived.spectral_entropy = AnalysisSlot::Ready { version, value }
            }
            AnalysisPayload::Hjorth(value) => {
                derived.hjorth = AnalysisSlot::Ready { version, value }
            }
            AnalysisPayload::FullMetrics(value) => {
                derived.full_metrics = AnalysisSlot::Ready { version, value }
            }
            AnalysisPayload::Insights(value) => {
                derived.insights = AnalysisSlot::Ready { version, value }
            }
            AnalysisPayload::TimeFrequency(value) => {
                derived.time_frequency = AnalysisSlot::Ready { version, value }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{BandPowerResult, PsdResult, SlotState};
    use crate::signal::{ChannelMatrix, Recording};
    use std::collections::BTreeMap;

    fn recording() -> Arc<Recording> {
        let matrix = ChannelMatrix::new(vec![vec![0.0; 64], vec![1.0; 64]]).unwrap();
        Arc::new(Recording::with_default_labels(matrix, 64.0).unwrap())
    }

    fn clean_output() -> CleanOutput {
        CleanOutput {
            recording: Recording::with_default_labels(
                ChannelMatrix::new(vec![vec![0.5; 64], vec![0.5; 64]]).unwrap(),
                64.0,
            )
            .unwrap(),
            warnings: Vec::new(),
            ica_excluded: None,
            ica_topomap_png: None,
        }
    }

    fn band_payload() -> AnalysisPayload {
        AnalysisPayload::BandPower(BandPowerResult {
            bands: BTreeMap::from([("alpha".to_string(), 1.0)]),
        })
    }

    fn psd_payload() -> AnalysisPayload {
        AnalysisPayload::Psd(PsdResult {
            frequencies: vec![1.0, 2.0],
            power: vec![0.1, 0.2],
        })
    }

    fn edited(low: f64) -> FilterParameters {
        FilterParameters {
            bandpass_low: low,
            ..FilterParameters::default()
        }
    }

    /// Drives a pipeline to the point where a clean for the current version
    /// is in flight, returning the request.
    fn pipeline_with_inflight_clean() -> (Pipeline, u64, Instant) {
        let mut pipeline = Pipeline::new();
        let t0 = Instant::now();
        pipeline.apply(Intent::LoadRecording(recording()), t0);
        pipeline.apply(Intent::EditParameters(edited(2.0)), t0);
        let fired = pipeline.tick(t0 + DEBOUNCE);
        assert_eq!(fired.len(), 1);
        let version = fired[0].version();
        (pipeline, version, t0)
    }

    #[test]
    fn rapid_edits_coalesce_into_one_clean() {
        let mut pipeline = Pipeline::new();
        let t0 = Instant::now();
        pipeline.apply(Intent::LoadRecording(recording()), t0);
        assert!(pipeline
            .apply(Intent::EditParameters(edited(2.0)), t0)
            .is_empty());
        assert!(pipeline
            .apply(
                Intent::EditParameters(edited(3.0)),
                t0 + Duration::from_millis(200)
            )
            .is_empty());
        // quiet period restarts from the second edit
        assert!(pipeline.tick(t0 + Duration::from_millis(600)).is_empty());
        let fired = pipeline.tick(t0 + Duration::from_millis(700));
        assert_eq!(fired.len(), 1);
        match &fired[0] {
            ServiceRequest::Clean { params, .. } => assert_eq!(params.bandpass_low, 3.0),
            other => panic!("expected clean, got {other:?}"),
        }
        // nothing left armed
        assert!(pipeline.tick(t0 + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn committed_clean_fans_out_band_power_and_psd() {
        let (mut pipeline, version, _) = pipeline_with_inflight_clean();
        let requests = pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        let kinds: Vec<AnalysisKind> = requests
            .iter()
            .map(|r| match r {
                ServiceRequest::Analyze { kind, .. } => kind.kind(),
                other => panic!("unexpected request {other:?}"),
            })
            .collect();
        assert_eq!(kinds, [AnalysisKind::BandPower, AnalysisKind::Psd]);
        assert!(pipeline.session().derived.band_power.is_pending());
        assert!(pipeline.session().derived.psd.is_pending());
        assert_eq!(pipeline.phase(), PipelinePhase::AnalysisPending);
    }

    #[test]
    fn stale_clean_is_discarded() {
        let (mut pipeline, v1, t0) = pipeline_with_inflight_clean();
        // supersede before the first clean lands
        pipeline.apply(Intent::EditParameters(edited(5.0)), t0);
        let fired = pipeline.tick(t0 + Duration::from_secs(2));
        let v2 = fired[0].version();
        assert!(v2 > v1);
        let requests = pipeline.complete(ServiceOutcome::Cleaned {
            version: v2,
            result: Ok(clean_output()),
        });
        assert_eq!(requests.len(), 2);
        let committed = pipeline.session().cleaned_version;
        // the late v1 response must not displace v2's output
        assert!(pipeline
            .complete(ServiceOutcome::Cleaned {
                version: v1,
                result: Ok(clean_output()),
            })
            .is_empty());
        assert_eq!(pipeline.session().cleaned_version, committed);
        assert_eq!(committed, Some(v2));
    }

    #[test]
    fn edit_invalidates_derived_but_keeps_raw() {
        let (mut pipeline, version, t0) = pipeline_with_inflight_clean();
        pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        pipeline.complete(ServiceOutcome::Analysis {
            version,
            kind: AnalysisKind::BandPower,
            result: Ok(band_payload()),
        });
        assert!(pipeline.session().derived.band_power.ready().is_some());
        pipeline.apply(Intent::EditParameters(edited(8.0)), t0);
        let session = pipeline.session();
        assert!(session.raw.is_some());
        assert!(session.cleaned.is_none());
        assert!(session.derived.band_power.is_idle());
        assert!(session.derived.psd.is_idle());
    }

    #[test]
    fn late_analysis_for_old_snapshot_is_dropped() {
        let (mut pipeline, v1, t0) = pipeline_with_inflight_clean();
        pipeline.complete(ServiceOutcome::Cleaned {
            version: v1,
            result: Ok(clean_output()),
        });
        pipeline.apply(Intent::EditParameters(edited(9.0)), t0);
        pipeline.complete(ServiceOutcome::Analysis {
            version: v1,
            kind: AnalysisKind::BandPower,
            result: Ok(band_payload()),
        });
        assert!(pipeline.session().derived.band_power.is_idle());
    }

    #[test]
    fn summary_failure_leaves_the_other_visible() {
        let (mut pipeline, version, _) = pipeline_with_inflight_clean();
        pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        pipeline.complete(ServiceOutcome::Analysis {
            version,
            kind: AnalysisKind::Psd,
            result: Err("psd exploded".to_string()),
        });
        pipeline.complete(ServiceOutcome::Analysis {
            version,
            kind: AnalysisKind::BandPower,
            result: Ok(band_payload()),
        });
        let session = pipeline.session();
        assert!(session.derived.band_power.ready().is_some());
        assert_eq!(session.derived.psd.failure(), Some("psd exploded"));
        // both resolved, so the snapshot still reaches analysis-ready
        assert_eq!(pipeline.phase(), PipelinePhase::AnalysisReady);
        // the band-power success arrived last and cleared the error slot
        assert_eq!(session.error, None);
    }

    #[test]
    fn failure_then_success_clears_error_slot() {
        let (mut pipeline, version, _) = pipeline_with_inflight_clean();
        pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        pipeline.complete(ServiceOutcome::Analysis {
            version,
            kind: AnalysisKind::BandPower,
            result: Err("first failure".to_string()),
        });
        assert_eq!(pipeline.session().error.as_deref(), Some("first failure"));
        pipeline.complete(ServiceOutcome::Analysis {
            version,
            kind: AnalysisKind::Psd,
            result: Err("second failure".to_string()),
        });
        assert_eq!(pipeline.session().error.as_deref(), Some("second failure"));
        pipeline.complete(ServiceOutcome::Analysis {
            version,
            kind: AnalysisKind::Psd,
            result: Ok(psd_payload()),
        });
        assert_eq!(pipeline.session().error, None);
    }

    #[test]
    fn on_demand_request_waits_for_clean() {
        let mut pipeline = Pipeline::new();
        let t0 = Instant::now();
        pipeline.apply(Intent::LoadRecording(recording()), t0);
        // no clean armed yet: the request issues one immediately
        let requests = pipeline.apply(Intent::RequestAnalysis(AnalysisKind::SpectralEntropy), t0);
        assert_eq!(requests.len(), 1);
        assert!(matches!(requests[0], ServiceRequest::Clean { .. }));
        let version = requests[0].version();
        // the queued kind rides along with the post-clean fan-out
        let fan_out = pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        let kinds: Vec<AnalysisKind> = fan_out
            .iter()
            .map(|r| match r {
                ServiceRequest::Analyze { kind, .. } => kind.kind(),
                other => panic!("unexpected request {other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            [
                AnalysisKind::BandPower,
                AnalysisKind::Psd,
                AnalysisKind::SpectralEntropy
            ]
        );
    }

    #[test]
    fn request_after_commit_goes_straight_out() {
        let (mut pipeline, version, _) = pipeline_with_inflight_clean();
        pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        let requests = pipeline.apply(
            Intent::RequestAnalysis(AnalysisKind::TimeFrequency),
            Instant::now(),
        );
        assert_eq!(requests.len(), 1);
        match &requests[0] {
            ServiceRequest::TimeFrequency { version: v, .. } => assert_eq!(*v, version),
            other => panic!("expected time-frequency, got {other:?}"),
        }
        assert_eq!(
            pipeline.session().derived.slot_state(AnalysisKind::TimeFrequency),
            SlotState::Pending
        );
        // asking again while pending is a no-op
        assert!(pipeline
            .apply(
                Intent::RequestAnalysis(AnalysisKind::TimeFrequency),
                Instant::now()
            )
            .is_empty());
    }

    #[test]
    fn ready_slot_recomputes_with_new_tf_params() {
        let (mut pipeline, version, _) = pipeline_with_inflight_clean();
        pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        let first = pipeline.apply(
            Intent::RequestAnalysis(AnalysisKind::TimeFrequency),
            Instant::now(),
        );
        assert_eq!(first.len(), 1);
        pipeline.complete(ServiceOutcome::Analysis {
            version,
            kind: AnalysisKind::TimeFrequency,
            result: Ok(AnalysisPayload::TimeFrequency(
                crate::session::TimeFrequencyResult {
                    grid: None,
                    image_png: Some(vec![1]),
                },
            )),
        });
        pipeline.apply(
            Intent::EditTimeFrequency(TimeFrequencyParams {
                freq_max: 80.0,
                ..TimeFrequencyParams::default()
            }),
            Instant::now(),
        );
        let again = pipeline.apply(
            Intent::RequestAnalysis(AnalysisKind::TimeFrequency),
            Instant::now(),
        );
        assert_eq!(again.len(), 1);
        match &again[0] {
            ServiceRequest::TimeFrequency {
                params, version: v, ..
            } => {
                assert_eq!(params.freq_max, 80.0);
                assert_eq!(*v, version);
            }
            other => panic!("expected time-frequency, got {other:?}"),
        }
    }

    #[test]
    fn queued_time_frequency_fans_out_with_session_params() {
        let mut pipeline = Pipeline::new();
        let t0 = Instant::now();
        pipeline.apply(Intent::LoadRecording(recording()), t0);
        pipeline.apply(
            Intent::EditTimeFrequency(TimeFrequencyParams {
                freq_max: 90.0,
                ..TimeFrequencyParams::default()
            }),
            t0,
        );
        // no clean yet, so the demand is remembered and a clean is issued
        let requests = pipeline.apply(Intent::RequestAnalysis(AnalysisKind::TimeFrequency), t0);
        assert_eq!(requests.len(), 1);
        assert!(matches!(requests[0], ServiceRequest::Clean { .. }));
        let version = requests[0].version();
        let fan_out = pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        assert_eq!(fan_out.len(), 3);
        match &fan_out[2] {
            ServiceRequest::TimeFrequency { params, .. } => assert_eq!(params.freq_max, 90.0),
            other => panic!("expected time-frequency, got {other:?}"),
        }
    }

    #[test]
    fn invalid_edit_sets_error_and_changes_nothing() {
        let mut pipeline = Pipeline::new();
        let t0 = Instant::now();
        pipeline.apply(Intent::LoadRecording(recording()), t0);
        let before = pipeline.session().version;
        let requests = pipeline.apply(
            Intent::EditParameters(FilterParameters {
                bandpass_low: 50.0,
                bandpass_high: 10.0,
                ..FilterParameters::default()
            }),
            t0,
        );
        assert!(requests.is_empty());
        assert_eq!(pipeline.session().version, before);
        assert!(pipeline.session().error.is_some());
        assert!(pipeline.tick(t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn identical_edit_after_commit_is_a_noop() {
        let (mut pipeline, version, t0) = pipeline_with_inflight_clean();
        pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        let requests = pipeline.apply(Intent::EditParameters(edited(2.0)), t0);
        assert!(requests.is_empty());
        assert_eq!(pipeline.session().version, version);
        assert!(pipeline.session().cleaned_current().is_some());
        assert!(pipeline.tick(t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn request_without_dataset_is_a_noop() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline
            .apply(
                Intent::RequestAnalysis(AnalysisKind::BandPower),
                Instant::now()
            )
            .is_empty());
        assert_eq!(pipeline.phase(), PipelinePhase::Empty);
    }

    #[test]
    fn load_resets_session_scope() {
        let (mut pipeline, version, t0) = pipeline_with_inflight_clean();
        pipeline.complete(ServiceOutcome::Cleaned {
            version,
            result: Ok(clean_output()),
        });
        pipeline.apply(Intent::SetChannelVisible { index: 0, visible: false }, t0);
        assert_eq!(pipeline.session().channel_visible, vec![false, true]);
        pipeline.apply(Intent::LoadRecording(recording()), t0);
        let session = pipeline.session();
        assert!(session.version > version);
        assert!(session.cleaned.is_none());
        assert_eq!(session.channel_visible, vec![true, true]);
        assert_eq!(pipeline.phase(), PipelinePhase::Loaded);
    }
}
