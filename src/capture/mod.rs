//! The cancelable capture loop.
//!
//! A `CaptureLoop` owns at most one session. Starting a session opens a frame
//! source and spawns one worker thread that repeats read, infer, classify,
//! annotate and present until it is cancelled or the source runs out. The
//! worker is the only writer of the equipment state; it hands the final value
//! back through its join handle when the session ends.
//!
//! ```text
//!  Idle --start--> Running --stop/end of stream--> Stopping --join--> Idle
//! ```

mod cancel;
mod sink;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::annotate::Annotator;
use crate::attendance::{AttendanceCheckEvent, RecordedCheck};
use crate::classify::{Classifier, EquipmentState};
use crate::crew::{CrewId, CrewIdentity};
use crate::detect::SharedDetector;
use crate::ingest::{FrameSource, SourceFactory};
use crate::storage::AttendanceRecorder;
use crate::{is_kind, ErrorKind, MusterError};

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use sink::{display_channel, ChannelSink, DisplaySink, FrameUpdate, NullSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Pause between the end of one cycle and the start of the next.
    pub frame_interval: Duration,
    /// Pause after stopping a session before a capture is analyzed.
    pub teardown_delay: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            teardown_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    /// The worker has been told to finish (or finished by itself) and has not
    /// been joined yet.
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session was already running; nothing changed.
    AlreadyRunning,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_processed: u64,
    /// Cycles that ended without updating equipment state.
    pub frames_skipped: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct LoopShared {
    running: AtomicBool,
    frames_processed: AtomicU64,
    frames_skipped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl LoopShared {
    fn reset(&self) {
        self.frames_processed.store(0, Ordering::SeqCst);
        self.frames_skipped.store(0, Ordering::SeqCst);
        if let Ok(mut last) = self.last_error.lock() {
            *last = None;
        }
    }

    fn note_skip(&self, err: &anyhow::Error) {
        self.frames_skipped.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(format!("{:#}", err));
        }
    }

    fn snapshot(&self) -> LoopStats {
        LoopStats {
            frames_processed: self.frames_processed.load(Ordering::SeqCst),
            frames_skipped: self.frames_skipped.load(Ordering::SeqCst),
            last_error: self.last_error.lock().ok().and_then(|last| last.clone()),
        }
    }
}

struct Session {
    cancel: CancelHandle,
    worker: JoinHandle<WorkerReport>,
    source: String,
}

struct WorkerReport {
    equipment: EquipmentState,
}

pub struct CaptureLoop {
    factory: Box<dyn SourceFactory>,
    sink: Arc<dyn DisplaySink>,
    annotator: Arc<Annotator>,
    classifier: Classifier,
    settings: CaptureSettings,
    shared: Arc<LoopShared>,
    session: Option<Session>,
    equipment: EquipmentState,
    // Crew member the current equipment state was captured for.
    session_crew: Option<CrewId>,
    pending: Option<AttendanceCheckEvent>,
}

impl CaptureLoop {
    pub fn new(factory: impl SourceFactory + 'static, sink: Arc<dyn DisplaySink>) -> Self {
        Self {
            factory: Box::new(factory),
            sink,
            annotator: Arc::new(Annotator::new()),
            classifier: Classifier::default(),
            settings: CaptureSettings::default(),
            shared: Arc::new(LoopShared::default()),
            session: None,
            equipment: EquipmentState::default(),
            session_crew: None,
            pending: None,
        }
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Arc::new(annotator);
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_settings(mut self, settings: CaptureSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Start a session.
    ///
    /// Requires a verified crew identity and a loaded detector; without them
    /// this fails with `Validation` before the source is touched. A source
    /// that cannot be opened fails with `DeviceUnavailable` and leaves the
    /// loop idle.
    pub fn start(
        &mut self,
        crew: Option<&CrewIdentity>,
        detector: Option<&SharedDetector>,
    ) -> Result<StartOutcome> {
        if self.session.is_some() && self.shared.running.load(Ordering::SeqCst) {
            log::debug!("CaptureLoop: start ignored, session already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        // Reap a worker that ended on its own.
        self.stop();

        let crew = crew.ok_or_else(|| {
            MusterError::new(ErrorKind::Validation, "no verified crew member for capture")
        })?;
        let detector = detector
            .ok_or_else(|| MusterError::new(ErrorKind::Validation, "detector is not initialized"))?
            .clone();

        let source = self.factory.open().map_err(|err| {
            if is_kind(&err, ErrorKind::DeviceUnavailable) {
                err
            } else {
                err.context(MusterError::new(
                    ErrorKind::DeviceUnavailable,
                    "frame source could not be opened",
                ))
            }
        })?;
        let description = source.describe();

        self.equipment = EquipmentState::default();
        self.session_crew = Some(crew.id);
        self.shared.reset();
        self.shared.running.store(true, Ordering::SeqCst);

        let (cancel, token) = cancel_pair();
        let worker = Worker {
            source,
            detector,
            sink: Arc::clone(&self.sink),
            annotator: Arc::clone(&self.annotator),
            classifier: self.classifier,
            frame_interval: self.settings.frame_interval,
            shared: Arc::clone(&self.shared),
            token,
        };
        let spawned = std::thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || worker.run());
        let worker = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(anyhow::Error::new(err).context("failed to spawn capture worker"));
            }
        };

        log::info!(
            "CaptureLoop: started for crew {} on {}",
            crew.id,
            description
        );
        self.session = Some(Session {
            cancel,
            worker,
            source: description,
        });
        Ok(StartOutcome::Started)
    }

    /// Stop the session, if any, and wait for the worker to release the
    /// source. Returns whether a session was stopped.
    pub fn stop(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        self.shared.running.store(false, Ordering::SeqCst);
        session.cancel.cancel();
        match session.worker.join() {
            Ok(report) => {
                self.equipment = report.equipment;
                log::info!(
                    "CaptureLoop: stopped {} ({})",
                    session.source,
                    self.equipment.summary()
                );
            }
            Err(_) => {
                log::error!("CaptureLoop: worker for {} panicked", session.source);
            }
        }
        true
    }

    pub fn state(&mut self) -> LoopState {
        if self
            .session
            .as_ref()
            .map_or(false, |session| session.worker.is_finished())
        {
            self.stop();
        }
        match &self.session {
            None => LoopState::Idle,
            Some(_) if self.shared.running.load(Ordering::SeqCst) => LoopState::Running,
            Some(_) => LoopState::Stopping,
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some() && self.shared.running.load(Ordering::SeqCst)
    }

    /// Equipment state of the most recent finished session.
    pub fn last_equipment(&self) -> EquipmentState {
        self.equipment
    }

    pub fn stats(&self) -> LoopStats {
        self.shared.snapshot()
    }

    /// Stop the session and return the equipment state as of the stop.
    pub fn capture(&mut self) -> EquipmentState {
        if self.stop() && !self.settings.teardown_delay.is_zero() {
            std::thread::sleep(self.settings.teardown_delay);
        }
        self.equipment
    }

    /// Stop, then record exactly one check for `crew` from the captured state.
    ///
    /// Fails with `Validation` unless a session was started for `crew` since
    /// its last recorded check. A recorder failure is returned as
    /// `Persistence`; the event is kept and can be re-submitted with
    /// [`CaptureLoop::retry_record`].
    pub fn capture_and_analyze(
        &mut self,
        crew: &CrewIdentity,
        presented_pin: Option<&str>,
        recorder: &mut dyn AttendanceRecorder,
    ) -> Result<RecordedCheck> {
        let equipment = self.capture();
        if self.session_crew != Some(crew.id) {
            return Err(MusterError::new(
                ErrorKind::Validation,
                format!("no capture session ran for crew {}", crew.id),
            )
            .into());
        }
        let verification = crew.verify(presented_pin, equipment);
        let event = AttendanceCheckEvent::new(crew.id, Utc::now(), equipment, verification);
        let recorded = self.submit(event, recorder)?;
        self.session_crew = None;
        self.equipment = EquipmentState::default();
        Ok(recorded)
    }

    /// Re-submit the event from the last failed capture.
    pub fn retry_record(&mut self, recorder: &mut dyn AttendanceRecorder) -> Result<RecordedCheck> {
        let event = self.pending.take().ok_or_else(|| {
            MusterError::new(ErrorKind::Validation, "no unrecorded check to retry")
        })?;
        self.submit(event, recorder)
    }

    pub fn pending(&self) -> Option<&AttendanceCheckEvent> {
        self.pending.as_ref()
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    fn submit(
        &mut self,
        event: AttendanceCheckEvent,
        recorder: &mut dyn AttendanceRecorder,
    ) -> Result<RecordedCheck> {
        match recorder.record(&event) {
            Ok(record_id) => {
                log::info!(
                    "CaptureLoop: recorded check {} for crew {} ({})",
                    record_id,
                    event.crew_id,
                    event.equipment().summary()
                );
                Ok(RecordedCheck { record_id, event })
            }
            Err(err) => {
                log::error!(
                    "CaptureLoop: check for crew {} not recorded: {:#}",
                    event.crew_id,
                    err
                );
                let crew_id = event.crew_id;
                self.pending = Some(event);
                Err(err.context(MusterError::new(
                    ErrorKind::Persistence,
                    format!("attendance check for crew {} was not recorded", crew_id),
                )))
            }
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Cycle {
    Processed(EquipmentState),
    EndOfStream,
}

struct Worker {
    source: Box<dyn FrameSource>,
    detector: SharedDetector,
    sink: Arc<dyn DisplaySink>,
    annotator: Arc<Annotator>,
    classifier: Classifier,
    frame_interval: Duration,
    shared: Arc<LoopShared>,
    token: CancelToken,
}

impl Worker {
    fn run(mut self) -> WorkerReport {
        let mut equipment = EquipmentState::default();
        loop {
            if self.token.is_cancelled() || !self.shared.running.load(Ordering::SeqCst) {
                break;
            }
            match self.cycle() {
                Ok(Cycle::Processed(state)) => {
                    equipment = state;
                    self.shared.frames_processed.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Cycle::EndOfStream) => {
                    log::info!("CaptureLoop: {} reached end of stream", self.source.describe());
                    break;
                }
                Err(err) => {
                    log::warn!("CaptureLoop: frame skipped: {:#}", err);
                    self.shared.note_skip(&err);
                }
            }
            if self.token.wait(self.frame_interval) {
                break;
            }
        }
        self.source.close();
        self.shared.running.store(false, Ordering::SeqCst);
        WorkerReport { equipment }
    }

    fn cycle(&mut self) -> Result<Cycle> {
        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(err) if is_kind(&err, ErrorKind::EndOfStream) => return Ok(Cycle::EndOfStream),
            Err(err) => return Err(err),
        };
        let detections = {
            let mut detector = self
                .detector
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            detector.infer(&frame)?
        };
        let equipment = self.classifier.classify(&detections);
        let annotated = self.annotator.draw(&frame, &detections);
        self.sink.present(FrameUpdate {
            frame_index: frame.index(),
            annotated,
            equipment,
            detections,
        });
        Ok(Cycle::Processed(equipment))
    }
}
