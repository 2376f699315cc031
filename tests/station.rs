use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use muster::ingest::SpecSourceFactory;
use muster::{
    is_kind, AttendanceReports, BoundingBox, CaptureLoop, CaptureSettings, CrewId, CrewIdentity,
    CrewRole, Detection, Detector, DetectorSettings, EquipmentState, ErrorKind, InMemoryAttendanceStore,
    LoopState, NullSink, ScriptedBackend, SourceSettings, SourceSpec, SqliteAttendanceStore,
    StartOutcome, Station,
};

fn stub_capture() -> CaptureLoop {
    let factory = SpecSourceFactory::new(
        SourceSpec::Synthetic("deck".to_string()),
        SourceSettings {
            width: 16,
            height: 12,
            target_fps: 30,
        },
    );
    CaptureLoop::new(factory, Arc::new(NullSink)).with_settings(CaptureSettings {
        frame_interval: Duration::from_millis(2),
        teardown_delay: Duration::from_millis(1),
    })
}

fn crew_store() -> InMemoryAttendanceStore {
    InMemoryAttendanceStore::new()
        .with_crew(CrewIdentity::new(CrewId(1), "Hasan", CrewRole::Officer).with_pin("4321"))
        .with_crew(CrewIdentity::new(CrewId(2), "Budi", CrewRole::Engineer))
        .with_crew(CrewIdentity::new(CrewId(3), "Rina", CrewRole::Sailor))
}

fn helmet_only_detector() -> Detector {
    Detector::with_backend(ScriptedBackend::repeating(vec![Detection::new(
        "hardhat",
        0.42,
        BoundingBox::new(2, 2, 6, 4),
    )]))
}

fn run_until_processed<S>(station: &mut Station<S>)
where
    S: muster::CrewDirectory + muster::AttendanceRecorder,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while station.capture_loop().stats().frames_processed == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn unknown_crew_is_not_found() {
    let mut station = Station::new(crew_store(), stub_capture());
    let err = station.verify_crew(CrewId(404)).unwrap_err();
    assert!(is_kind(&err, ErrorKind::NotFound));
    assert!(station.crew().is_none());
}

#[test]
fn camera_needs_verified_crew_and_detector() -> Result<()> {
    let mut station = Station::new(crew_store(), stub_capture());

    let err = station.start_camera().unwrap_err();
    assert!(is_kind(&err, ErrorKind::Validation));

    station.verify_crew(CrewId(3))?;
    let err = station.start_camera().unwrap_err();
    assert!(is_kind(&err, ErrorKind::Validation));

    station.attach_detector(helmet_only_detector().into_shared());
    assert_eq!(station.start_camera()?, StartOutcome::Started);
    assert!(station.stop_camera());
    assert!(!station.stop_camera());
    Ok(())
}

#[test]
fn missing_model_keeps_station_usable() -> Result<()> {
    let mut station = Station::new(crew_store(), stub_capture());
    let err = station
        .load_detector(Path::new("/nonexistent/models/best.onnx"), &DetectorSettings::default())
        .unwrap_err();
    assert!(is_kind(&err, ErrorKind::ModelNotFound));
    assert!(!station.has_detector());

    let identity = station.verify_crew(CrewId(2))?;
    assert_eq!(identity.name, "Budi");
    Ok(())
}

#[test]
fn sailor_check_records_equipment_and_releases_crew() -> Result<()> {
    let mut station = Station::new(crew_store(), stub_capture());
    station.attach_detector(helmet_only_detector().into_shared());
    station.verify_crew(CrewId(3))?;
    station.start_camera()?;
    run_until_processed(&mut station);

    let recorded = station.capture_and_analyze(None)?;
    assert!(recorded.event.present);
    assert!(recorded.event.helmet);
    assert!(!recorded.event.vest);
    assert!(!recorded.event.is_compliant());
    assert!(station.crew().is_none());

    let err = station.capture_and_analyze(None).unwrap_err();
    assert!(is_kind(&err, ErrorKind::Validation));
    Ok(())
}

#[test]
fn officer_pin_outcome_is_recorded() -> Result<()> {
    let mut station = Station::new(crew_store(), stub_capture());
    station.attach_detector(helmet_only_detector().into_shared());

    station.verify_crew(CrewId(1))?;
    station.start_camera()?;
    run_until_processed(&mut station);
    let wrong = station.capture_and_analyze(Some("0000"))?;
    assert!(!wrong.event.verification.verified);

    station.verify_crew(CrewId(1))?;
    station.start_camera()?;
    run_until_processed(&mut station);
    let right = station.capture_and_analyze(Some("4321"))?;
    assert!(right.event.verification.verified);
    assert_eq!(station.store().recorded().len(), 2);
    Ok(())
}

#[test]
fn capture_without_own_session_is_refused() -> Result<()> {
    let mut station = Station::new(crew_store(), stub_capture());
    station.attach_detector(
        Detector::with_backend(ScriptedBackend::repeating(vec![
            Detection::new("Hard Hat", 0.95, BoundingBox::new(1, 1, 4, 3)),
            Detection::new("Vest", 0.9, BoundingBox::new(2, 5, 6, 4)),
        ]))
        .into_shared(),
    );
    station.verify_crew(CrewId(3))?;
    station.start_camera()?;
    run_until_processed(&mut station);
    let first = station.capture_and_analyze(None)?;
    assert!(first.event.is_compliant());

    station.verify_crew(CrewId(2))?;
    let err = station.capture_and_analyze(None).unwrap_err();
    assert!(is_kind(&err, ErrorKind::Validation));
    assert_eq!(station.crew().map(|c| c.id), Some(CrewId(2)));

    station.verify_crew(CrewId(3))?;
    let err = station.capture_and_analyze(None).unwrap_err();
    assert!(is_kind(&err, ErrorKind::Validation));

    assert_eq!(station.store().recorded().len(), 1);
    assert_eq!(station.capture_loop().last_equipment(), EquipmentState::default());
    Ok(())
}

#[test]
fn crew_change_drops_the_previous_unrecorded_check() -> Result<()> {
    let mut station = Station::new(crew_store(), stub_capture());
    station.attach_detector(helmet_only_detector().into_shared());
    station.verify_crew(CrewId(3))?;
    station.start_camera()?;
    run_until_processed(&mut station);

    station.store_mut().fail_next_records(1);
    let err = station.capture_and_analyze(None).unwrap_err();
    assert!(is_kind(&err, ErrorKind::Persistence));
    assert!(station.capture_loop().pending().is_some());

    station.verify_crew(CrewId(2))?;
    assert!(station.capture_loop().pending().is_none());
    let err = station.retry_pending().unwrap_err();
    assert!(is_kind(&err, ErrorKind::Validation));
    assert_eq!(station.crew().map(|c| c.id), Some(CrewId(2)));
    assert!(station.store().recorded().is_empty());
    Ok(())
}

#[test]
fn failed_store_keeps_crew_for_retry() -> Result<()> {
    let mut station = Station::new(crew_store(), stub_capture());
    station.attach_detector(helmet_only_detector().into_shared());
    station.verify_crew(CrewId(3))?;
    station.start_camera()?;
    run_until_processed(&mut station);

    station.store_mut().fail_next_records(1);
    let err = station.capture_and_analyze(None).unwrap_err();
    assert!(is_kind(&err, ErrorKind::Persistence));
    assert_eq!(station.crew().map(|c| c.id), Some(CrewId(3)));
    assert_eq!(station.capture_loop_mut().state(), LoopState::Idle);

    let recorded = station.retry_pending()?;
    assert!(recorded.event.helmet);
    assert!(station.crew().is_none());
    assert_eq!(station.store().recorded().len(), 1);
    Ok(())
}

#[test]
fn switching_crew_stops_the_running_session() -> Result<()> {
    let mut station = Station::new(crew_store(), stub_capture());
    station.attach_detector(helmet_only_detector().into_shared());
    station.verify_crew(CrewId(3))?;
    station.start_camera()?;
    assert!(station.capture_loop().is_running());

    station.verify_crew(CrewId(2))?;
    assert!(!station.capture_loop().is_running());
    assert_eq!(station.crew().map(|c| c.role), Some(CrewRole::Engineer));
    Ok(())
}

#[test]
fn logout_tears_down_the_session() -> Result<()> {
    let mut station = Station::new(crew_store(), stub_capture());
    station.attach_detector(helmet_only_detector().into_shared());
    station.verify_crew(CrewId(3))?;
    station.start_camera()?;

    station.logout();
    assert!(station.crew().is_none());
    assert!(!station.capture_loop().is_running());
    assert!(station.capture_loop().pending().is_none());
    Ok(())
}

#[test]
fn sqlite_backed_station_reports_checks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("muster.db");
    let mut store = SqliteAttendanceStore::open(db_path.to_str().unwrap())?;
    store.add_crew(&CrewIdentity::new(CrewId(3), "Rina", CrewRole::Sailor))?;
    store.add_crew(&CrewIdentity::new(CrewId(4), "Dewi", CrewRole::Sailor))?;

    let mut station = Station::new(store, stub_capture());
    station.attach_detector(helmet_only_detector().into_shared());
    station.verify_crew(CrewId(3))?;
    station.start_camera()?;
    run_until_processed(&mut station);
    let recorded = station.capture_and_analyze(None)?;

    let checks = station.store().checks_with_members()?;
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].record_id, recorded.record_id);
    assert_eq!(checks[0].crew_name.as_deref(), Some("Rina"));
    assert!(checks[0].event.helmet);

    let absent: Vec<CrewId> = station.store().absentees()?.iter().map(|c| c.id).collect();
    assert_eq!(absent, vec![CrewId(4)]);
    Ok(())
}
