//! The decision loop: throttled recognition, per-detection liveness
//! gating, presence tracking, and the every-tick leaver sweep.
//!
//! Runs on its own OS thread, concurrent with the capture loop. All
//! external calls happen here with bounded timeouts; a failing call skips
//! one detection (or one recognition pass) and never corrupts state for
//! other subjects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use lectern_core::{Detection, EngineConfig, PresenceTracker};
use lectern_hw::{Frame, FrameError};
use lectern_net::{
    AttendanceReporter, HttpLivenessGate, HttpRecognizer, LivenessError, LivenessGate,
    RecognitionOptions, Recognizer, ReportSink,
};
use tokio::sync::{oneshot, watch};

/// Where the engine's three collaborators live.
pub struct ServiceEndpoints {
    pub recognition_base_url: String,
    pub api_key: String,
    pub recognition_timeout: Duration,
    pub liveness_url: String,
    pub liveness_timeout: Duration,
    pub report_url: String,
    pub venue: String,
    pub report_token: Option<String>,
}

/// Why a single detection was dropped from a recognition pass.
#[derive(Debug, thiserror::Error)]
enum DetectionError {
    #[error("face crop failed: {0}")]
    Crop(#[from] FrameError),
    #[error("liveness check failed: {0}")]
    Liveness(#[from] LivenessError),
}

/// The presence decision engine, generic over its collaborators so the
/// whole tick path is testable without a network.
pub struct Engine<R, L, S> {
    tracker: PresenceTracker,
    recognizer: R,
    liveness: L,
    reports: S,
    recog_interval: TimeDelta,
    last_recognition: Option<DateTime<Utc>>,
}

impl<R: Recognizer, L: LivenessGate, S: ReportSink> Engine<R, L, S> {
    pub fn new(
        config: EngineConfig,
        recog_interval: TimeDelta,
        recognizer: R,
        liveness: L,
        reports: S,
    ) -> Self {
        Self {
            tracker: PresenceTracker::new(config),
            recognizer,
            liveness,
            reports,
            recog_interval,
            last_recognition: None,
        }
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    /// One engine tick. Recognition is throttled by `recog_interval`; the
    /// leaver sweep runs unconditionally so exits are finalized on time
    /// even when recognition is skipped.
    pub fn tick(&mut self, frame: Option<&Frame>, now: DateTime<Utc>) {
        if let Some(frame) = frame {
            if self.recognition_due(now) {
                self.last_recognition = Some(now);
                if frame.is_dark {
                    tracing::debug!(sequence = frame.sequence, "dark frame; skipping recognition");
                } else {
                    self.recognize_frame(frame, now);
                }
            }
        }

        for report in self.tracker.sweep_leavers(now) {
            self.reports.submit(&report);
        }
    }

    fn recognition_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_recognition {
            None => true,
            Some(last) => now - last >= self.recog_interval,
        }
    }

    fn recognize_frame(&mut self, frame: &Frame, now: DateTime<Utc>) {
        let jpeg = match frame.to_jpeg() {
            Ok(jpeg) => jpeg,
            Err(err) => {
                tracing::warn!(error = %err, "frame encode failed; skipping recognition pass");
                return;
            }
        };

        let detections = match self.recognizer.recognize(&jpeg) {
            Ok(detections) => detections,
            Err(err) => {
                tracing::warn!(error = %err, "recognition call failed; skipping pass");
                return;
            }
        };
        tracing::trace!(faces = detections.len(), "recognition pass");

        for detection in &detections {
            if let Err(err) = self.process_detection(frame, detection, now) {
                tracing::warn!(error = %err, "detection skipped");
            }
        }
    }

    /// Gate one detection through similarity and liveness, then feed the
    /// verdict to the tracker. Errors here affect only this detection.
    fn process_detection(
        &mut self,
        frame: &Frame,
        detection: &Detection,
        now: DateTime<Utc>,
    ) -> Result<(), DetectionError> {
        let threshold = self.tracker.config().similarity_threshold;
        let Some(best) = detection.best_match(threshold) else {
            // unknown face or weak match; never creates state
            return Ok(());
        };

        let b = &detection.bounding_box;
        let face = frame.crop(b.x_min, b.y_min, b.x_max, b.y_max)?;
        let verdict = self.liveness.classify(&face.to_jpeg()?)?;

        tracing::debug!(
            subject = %best.subject_id,
            similarity = best.similarity,
            verdict = ?verdict,
            age = ?detection.age,
            gender = ?detection.gender.as_ref().map(|g| &g.value),
            mask = ?detection.mask.as_ref().map(|m| &m.value),
            "liveness verdict"
        );

        if let Some(report) = self.tracker.observe(&best.subject_id, verdict, now) {
            self.reports.submit(&report);
        }
        Ok(())
    }
}

/// Spawn the engine loop on a dedicated OS thread.
///
/// The blocking HTTP clients are built on that thread, so they never
/// touch the async runtime. A startup failure, or the capture loop
/// closing the frame slot, fires `done` so the daemon can shut down.
pub fn spawn_engine(
    endpoints: ServiceEndpoints,
    config: EngineConfig,
    recog_interval: TimeDelta,
    tick_interval: Duration,
    frames: watch::Receiver<Option<Frame>>,
    shutdown: Arc<AtomicBool>,
    done: oneshot::Sender<()>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("lectern-engine".into())
        .spawn(move || {
            let engine = match build_engine(&endpoints, config, recog_interval) {
                Ok(engine) => engine,
                Err(err) => {
                    tracing::error!(error = %err, "engine startup failed");
                    let _ = done.send(());
                    return;
                }
            };
            run_loop(engine, frames, &shutdown, tick_interval);
            let _ = done.send(());
        })
}

fn build_engine(
    endpoints: &ServiceEndpoints,
    config: EngineConfig,
    recog_interval: TimeDelta,
) -> anyhow::Result<Engine<HttpRecognizer, HttpLivenessGate, AttendanceReporter>> {
    let recognizer = HttpRecognizer::new(
        &endpoints.recognition_base_url,
        &endpoints.api_key,
        RecognitionOptions::default(),
        endpoints.recognition_timeout,
    )?;
    let liveness = HttpLivenessGate::new(&endpoints.liveness_url, endpoints.liveness_timeout)?;
    let reporter = AttendanceReporter::new(
        &endpoints.report_url,
        &endpoints.venue,
        endpoints.report_token.clone(),
    )?;
    Ok(Engine::new(
        config,
        recog_interval,
        recognizer,
        liveness,
        reporter,
    ))
}

fn run_loop<R: Recognizer, L: LivenessGate, S: ReportSink>(
    mut engine: Engine<R, L, S>,
    mut frames: watch::Receiver<Option<Frame>>,
    shutdown: &AtomicBool,
    tick_interval: Duration,
) {
    tracing::info!("engine loop started");
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        // a closed slot means the capture loop is gone; stop the client
        if frames.has_changed().is_err() {
            tracing::error!("frame source closed; stopping engine");
            break;
        }
        let snapshot = frames.borrow_and_update().clone();
        engine.tick(snapshot.as_ref(), Utc::now());
        std::thread::sleep(tick_interval);
    }
    tracing::info!(
        subjects = engine.tracker.subject_count(),
        "engine loop exiting"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::{BoundingBox, Report, SubjectMatch, Verdict};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn test_frame() -> Frame {
        Frame {
            data: vec![128u8; 32 * 32],
            width: 32,
            height: 32,
            timestamp: std::time::Instant::now(),
            sequence: 1,
            is_dark: false,
        }
    }

    fn detection(subject: &str, similarity: f32, bbox: (i32, i32, i32, i32)) -> Detection {
        Detection {
            bounding_box: BoundingBox {
                x_min: bbox.0,
                y_min: bbox.1,
                x_max: bbox.2,
                y_max: bbox.3,
                probability: 0.99,
            },
            subjects: vec![SubjectMatch {
                subject_id: subject.into(),
                similarity,
            }],
            age: None,
            gender: None,
            mask: None,
        }
    }

    /// Returns the same detections on every call and counts calls.
    struct ConstRecognizer {
        detections: Vec<Detection>,
        calls: Rc<RefCell<u32>>,
    }

    impl Recognizer for ConstRecognizer {
        fn recognize(
            &self,
            _frame_jpeg: &[u8],
        ) -> Result<Vec<Detection>, lectern_net::RecognitionError> {
            *self.calls.borrow_mut() += 1;
            Ok(self.detections.clone())
        }
    }

    /// Pops scripted results per call; `Live` once the script runs out.
    struct ScriptedLiveness {
        script: RefCell<VecDeque<Result<Verdict, LivenessError>>>,
    }

    impl ScriptedLiveness {
        fn always_live() -> Self {
            Self {
                script: RefCell::new(VecDeque::new()),
            }
        }

        fn with(script: Vec<Result<Verdict, LivenessError>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
            }
        }
    }

    impl LivenessGate for ScriptedLiveness {
        fn classify(&self, _face_jpeg: &[u8]) -> Result<Verdict, LivenessError> {
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(Verdict::Live))
        }
    }

    #[derive(Clone)]
    struct RecordingSink(Rc<RefCell<Vec<Report>>>);

    impl ReportSink for RecordingSink {
        fn submit(&self, report: &Report) {
            self.0.borrow_mut().push(report.clone());
        }
    }

    fn engine_with(
        config: EngineConfig,
        recog_interval: TimeDelta,
        detections: Vec<Detection>,
        liveness: ScriptedLiveness,
    ) -> (
        Engine<ConstRecognizer, ScriptedLiveness, RecordingSink>,
        Rc<RefCell<u32>>,
        Rc<RefCell<Vec<Report>>>,
    ) {
        let calls = Rc::new(RefCell::new(0));
        let reports = Rc::new(RefCell::new(Vec::new()));
        let engine = Engine::new(
            config,
            recog_interval,
            ConstRecognizer {
                detections,
                calls: calls.clone(),
            },
            liveness,
            RecordingSink(reports.clone()),
        );
        (engine, calls, reports)
    }

    #[test]
    fn test_entry_after_full_window_of_ticks() {
        let (mut engine, _, reports) = engine_with(
            EngineConfig::default(),
            TimeDelta::zero(),
            vec![detection("S1", 0.9, (4, 4, 20, 20))],
            ScriptedLiveness::always_live(),
        );
        let frame = test_frame();
        for i in 0..5 {
            engine.tick(Some(&frame), ts(i));
        }
        assert_eq!(
            *reports.borrow(),
            vec![Report::Entry {
                subject_id: "S1".into(),
                at: ts(4),
            }]
        );
    }

    #[test]
    fn test_weak_match_never_creates_state() {
        let (mut engine, _, reports) = engine_with(
            EngineConfig::default(),
            TimeDelta::zero(),
            vec![detection("S1", 0.5, (4, 4, 20, 20))],
            ScriptedLiveness::always_live(),
        );
        let frame = test_frame();
        for i in 0..10 {
            engine.tick(Some(&frame), ts(i));
        }
        assert!(reports.borrow().is_empty());
        assert_eq!(engine.tracker().subject_count(), 0);
    }

    #[test]
    fn test_recognition_throttled_by_interval() {
        let (mut engine, calls, _) = engine_with(
            EngineConfig::default(),
            TimeDelta::seconds(5),
            vec![],
            ScriptedLiveness::always_live(),
        );
        let frame = test_frame();
        for i in 0..=5 {
            engine.tick(Some(&frame), ts(i));
        }
        // due at t=0 and again at t=5
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn test_sweep_runs_on_throttled_ticks() {
        // window of 1 so a single recognition pass confirms entry
        let (mut engine, calls, reports) = engine_with(
            EngineConfig {
                liveness_history_len: 1,
                ..EngineConfig::default()
            },
            TimeDelta::seconds(1000),
            vec![detection("S1", 0.9, (4, 4, 20, 20))],
            ScriptedLiveness::always_live(),
        );
        let frame = test_frame();
        engine.tick(Some(&frame), ts(0)); // recognizes, Entry at t=0

        // recognition stays throttled, but the sweep still finalizes the
        // leave once the absence threshold passes
        for i in 1..=6 {
            engine.tick(Some(&frame), ts(i));
        }
        assert_eq!(*calls.borrow(), 1);
        let reports = reports.borrow();
        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports[1],
            Report::Exit {
                subject_id: "S1".into(),
                at: ts(0),
                duration: TimeDelta::zero(),
            }
        );
    }

    #[test]
    fn test_liveness_failure_only_drops_that_detection() {
        // two faces per pass; the first one's liveness call fails every time
        let mut script = Vec::new();
        for _ in 0..5 {
            script.push(Err(LivenessError::BadScores(0)));
            script.push(Ok(Verdict::Live));
        }
        let (mut engine, _, reports) = engine_with(
            EngineConfig::default(),
            TimeDelta::zero(),
            vec![
                detection("A", 0.95, (0, 0, 10, 10)),
                detection("B", 0.95, (12, 0, 22, 10)),
            ],
            ScriptedLiveness::with(script),
        );
        let frame = test_frame();
        for i in 0..5 {
            engine.tick(Some(&frame), ts(i));
        }
        // B enters; A never even acquires state
        assert_eq!(
            *reports.borrow(),
            vec![Report::Entry {
                subject_id: "B".into(),
                at: ts(4),
            }]
        );
        assert_eq!(engine.tracker().subject_count(), 1);
        assert!(engine.tracker().state("A").is_none());
    }

    #[test]
    fn test_out_of_frame_box_skips_only_that_detection() {
        let (mut engine, _, reports) = engine_with(
            EngineConfig {
                liveness_history_len: 1,
                ..EngineConfig::default()
            },
            TimeDelta::zero(),
            vec![
                detection("A", 0.95, (100, 100, 200, 200)), // outside 32x32
                detection("B", 0.95, (4, 4, 20, 20)),
            ],
            ScriptedLiveness::always_live(),
        );
        engine.tick(Some(&test_frame()), ts(0));
        assert_eq!(
            *reports.borrow(),
            vec![Report::Entry {
                subject_id: "B".into(),
                at: ts(0),
            }]
        );
        assert!(engine.tracker().state("A").is_none());
    }

    #[test]
    fn test_dark_frame_skips_recognition() {
        let (mut engine, calls, _) = engine_with(
            EngineConfig::default(),
            TimeDelta::zero(),
            vec![detection("S1", 0.9, (4, 4, 20, 20))],
            ScriptedLiveness::always_live(),
        );
        let mut frame = test_frame();
        frame.is_dark = true;
        engine.tick(Some(&frame), ts(0));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn test_tick_without_frame_still_sweeps() {
        let (mut engine, calls, reports) = engine_with(
            EngineConfig {
                liveness_history_len: 1,
                ..EngineConfig::default()
            },
            TimeDelta::zero(),
            vec![detection("S1", 0.9, (4, 4, 20, 20))],
            ScriptedLiveness::always_live(),
        );
        engine.tick(Some(&test_frame()), ts(0));
        assert_eq!(*calls.borrow(), 1);

        // capture has produced nothing since; sweeps must still run
        engine.tick(None, ts(10));
        assert_eq!(*calls.borrow(), 1);
        assert!(matches!(
            reports.borrow().last(),
            Some(Report::Exit { .. })
        ));
    }
}
