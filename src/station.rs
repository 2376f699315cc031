//! Session context for one muster station.
//!
//! A `Station` owns everything a crew check needs: the crew directory and
//! attendance store, the detector, the capture loop and the identity of the
//! crew member currently at the station. Logging out stops the camera and
//! forgets the identity.

use std::path::Path;

use anyhow::Result;

use crate::attendance::RecordedCheck;
use crate::capture::{CaptureLoop, StartOutcome};
use crate::crew::{CrewId, CrewIdentity};
use crate::detect::{Detector, DetectorSettings, SharedDetector};
use crate::storage::{AttendanceRecorder, CrewDirectory};
use crate::{ErrorKind, MusterError};

pub struct Station<S> {
    store: S,
    detector: Option<SharedDetector>,
    capture: CaptureLoop,
    crew: Option<CrewIdentity>,
}

impl<S> Station<S>
where
    S: CrewDirectory + AttendanceRecorder,
{
    pub fn new(store: S, capture: CaptureLoop) -> Self {
        Self {
            store,
            detector: None,
            capture,
            crew: None,
        }
    }

    pub fn attach_detector(&mut self, detector: SharedDetector) {
        self.detector = Some(detector);
    }

    /// Load the detection model.
    ///
    /// On failure the station keeps working without detection and camera
    /// starts are refused until a detector is attached.
    pub fn load_detector(&mut self, model_path: &Path, settings: &DetectorSettings) -> Result<()> {
        match Detector::initialize(model_path, settings) {
            Ok(detector) => {
                self.detector = Some(detector.into_shared());
                Ok(())
            }
            Err(err) => {
                log::warn!("Station: detection disabled: {:#}", err);
                self.detector = None;
                Err(err)
            }
        }
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    /// Look up `id` and make it the station's current crew member.
    ///
    /// Switching to a different crew member stops any running session and
    /// discards an unrecorded check left by the previous one.
    pub fn verify_crew(&mut self, id: CrewId) -> Result<&CrewIdentity> {
        let identity = self
            .store
            .lookup(id)?
            .ok_or_else(|| MusterError::new(ErrorKind::NotFound, format!("crew {} not found", id)))?;
        if self.crew.as_ref().map_or(false, |current| current.id != identity.id) {
            self.capture.stop();
        }
        if self
            .capture
            .pending()
            .map_or(false, |event| event.crew_id != identity.id)
        {
            self.discard_pending("crew change");
        }
        log::info!("Station: crew {} ({}) verified as {}", identity.id, identity.name, identity.role);
        let identity: &CrewIdentity = self.crew.insert(identity);
        Ok(identity)
    }

    pub fn crew(&self) -> Option<&CrewIdentity> {
        self.crew.as_ref()
    }

    pub fn start_camera(&mut self) -> Result<StartOutcome> {
        self.capture.start(self.crew.as_ref(), self.detector.as_ref())
    }

    pub fn stop_camera(&mut self) -> bool {
        self.capture.stop()
    }

    /// Stop the camera and record one check for the current crew member.
    ///
    /// The crew identity is released once the check is stored. If the store
    /// rejects it the identity stays so the check can be retried.
    pub fn capture_and_analyze(&mut self, presented_pin: Option<&str>) -> Result<RecordedCheck> {
        let crew = self.crew.clone().ok_or_else(|| {
            MusterError::new(ErrorKind::Validation, "no verified crew member to record")
        })?;
        let recorded = self
            .capture
            .capture_and_analyze(&crew, presented_pin, &mut self.store)?;
        self.crew = None;
        Ok(recorded)
    }

    pub fn retry_pending(&mut self) -> Result<RecordedCheck> {
        let recorded = self.capture.retry_record(&mut self.store)?;
        self.crew = None;
        Ok(recorded)
    }

    pub fn logout(&mut self) {
        self.capture.stop();
        self.discard_pending("logout");
        if let Some(crew) = self.crew.take() {
            log::info!("Station: crew {} logged out", crew.id);
        }
    }

    fn discard_pending(&mut self, reason: &str) {
        if let Some(event) = self.capture.pending() {
            log::warn!(
                "Station: discarding unrecorded check for crew {} on {}",
                event.crew_id,
                reason
            );
        }
        self.capture.clear_pending();
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn capture_loop(&self) -> &CaptureLoop {
        &self.capture
    }

    pub fn capture_loop_mut(&mut self) -> &mut CaptureLoop {
        &mut self.capture
    }
}
