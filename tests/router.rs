// Command router tests against the simulated device bank

use printago_bridge::config::ControlConfig;
use async_trait::async_trait;
use printago_bridge::hardware::{
    Axis, AxisMove, Device, DeviceActivity, DeviceError, DeviceStatus, InMemoryDirectory, SimulatedPrinter,
};
use printago_bridge::print_job::{JobRequest, JobState, JobTracker};
use printago_bridge::protocol::{Envelope, MessageType};
use printago_bridge::slicer::DirectoryPresetStore;
use printago_bridge::web::SessionSlot;
use printago_bridge::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Fixture {
    router: Router,
    p1: Arc<SimulatedPrinter>,
    p2: Arc<SimulatedPrinter>,
    jobs: JobTracker,
    job_rx: mpsc::Receiver<JobRequest>,
    _presets: TempDir,
}

fn fixture_with(config: ControlConfig) -> Fixture {
    let presets = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(presets.path().join("filament")).unwrap();
    std::fs::write(
        presets.path().join("filament").join("Generic PLA.json"),
        r#"{"name":"Generic PLA","nozzle_temperature":["220"]}"#,
    )
    .unwrap();

    let p1 = Arc::new(SimulatedPrinter::with_id("p1"));
    let p2 = Arc::new(SimulatedPrinter::with_id("p2"));
    let devices = Arc::new(InMemoryDirectory::new(vec![
        p1.clone() as Arc<dyn Device>,
        p2.clone() as Arc<dyn Device>,
    ]));
    let jobs = JobTracker::new();
    let (job_tx, job_rx) = mpsc::channel(4);
    let router = Router::new(
        devices,
        Arc::new(DirectoryPresetStore::new(presets.path())),
        jobs.clone(),
        job_tx,
        SessionSlot::new(),
        config,
    );
    Fixture { router, p1, p2, jobs, job_rx, _presets: presets }
}

fn fixture() -> Fixture {
    fixture_with(ControlConfig::default())
}

impl Fixture {
    async fn send(&self, raw: &str) -> Envelope {
        self.router.handle_frame(raw, true).await.expect("expected a reply")
    }
}

fn assert_error(env: &Envelope, kind: &str) {
    assert_eq!(env.kind, MessageType::Error, "unexpected envelope: {env:?}");
    assert_eq!(env.data["success"], false);
    assert_eq!(env.data["error_kind"], kind, "unexpected envelope: {env:?}");
}

const START: &str = "printago://h/printer_control/start_print_bbl?printer_id=p1&model=http://cdn/cube.3mf\
                     &printer_conf=http://cdn/printer.json&filament_conf=http://cdn/filament.json\
                     &print_conf=http://cdn/print.json&printago_job=job-7";

#[tokio::test]
async fn test_non_commands_are_ignored_and_malformed_commands_answered() {
    let fx = fixture();
    assert!(fx.router.handle_frame("hello there", true).await.is_none());
    assert!(fx.router.handle_frame("{\"ping\":1}", true).await.is_none());

    let env = fx.send("printago://h/status").await;
    assert_error(&env, "MalformedCommand");
}

#[tokio::test]
async fn test_unknown_command_touches_no_device() {
    let fx = fixture();
    let env = fx.send("printago://h/printer_control/self_destruct?printer_id=p1").await;
    assert_error(&env, "UnknownCommand");
    let env = fx.send("printago://h/status/jog?printer_id=p1").await;
    assert_error(&env, "UnknownCommand");
    assert!(fx.p1.commands().await.is_empty());
}

#[tokio::test]
async fn test_target_resolution() {
    let fx = fixture();
    let env = fx.send("printago://h/movement_control/home").await;
    assert_error(&env, "MissingTarget");
    assert_eq!(env.data["error_detail"], "no printer_id specified");
    assert_eq!(env.printer_id, "");

    let env = fx.send("printago://h/movement_control/home?printer_id=nope").await;
    assert_error(&env, "TargetNotFound");
    assert_eq!(env.printer_id, "nope");
}

#[tokio::test]
async fn test_capability_gated_actions() {
    let fx = fixture();
    let env = fx.send("printago://h/printer_control/pause_print?printer_id=p1").await;
    assert_error(&env, "PreconditionFailed");
    assert_eq!(env.data["error_detail"], "cannot pause printer");
    assert!(fx.p1.commands().await.is_empty());

    fx.p1.set_activity(DeviceActivity::Printing).await;
    let env = fx.send("printago://h/printer_control/pause_print?printer_id=p1").await;
    assert_eq!(env.kind, MessageType::Success);
    assert_eq!(env.data["local_command"], "pause_print");
    assert_eq!(fx.p1.commands().await, vec!["pause"]);

    let env = fx.send("printago://h/printer_control/stop_print?printer_id=p1").await;
    assert_eq!(env.kind, MessageType::Success);
    assert_eq!(fx.p1.commands().await, vec!["pause", "abort"]);
}

#[tokio::test]
async fn test_device_fault_becomes_execution_failed() {
    let fx = fixture();
    fx.p1.set_faulted(true).await;
    let env = fx.send("printago://h/movement_control/home?printer_id=p1").await;
    assert_error(&env, "ExecutionFailed");
}

#[tokio::test]
async fn test_set_bed_clamps_to_limit() {
    let fx = fixture();
    let env = fx.send("printago://h/temperature_control/set_bed?printer_id=p1&temperature=150").await;
    assert_eq!(env.kind, MessageType::Success);
    assert_eq!(env.data["action_detail"], "110");
    assert_eq!(fx.p1.bed_target().await, 110.0);

    let env = fx.send("printago://h/temperature_control/set_bed?printer_id=p1&temperature=60").await;
    assert_eq!(env.data["action_detail"], "60");
    assert_eq!(fx.p1.bed_target().await, 60.0);
}

#[tokio::test]
async fn test_set_hotend_parameter_errors() {
    let fx = fixture();
    let env = fx.send("printago://h/temperature_control/set_hotend?printer_id=p1").await;
    assert_error(&env, "MissingParameter");
    let env = fx.send("printago://h/temperature_control/set_hotend?printer_id=p1&temperature=hot").await;
    assert_error(&env, "InvalidParameter");
    assert_eq!(env.data["error_detail"], "invalid temperature value");

    let env = fx.send("printago://h/temperature_control/set_hotend?printer_id=p1&temperature=215").await;
    assert_eq!(env.kind, MessageType::Success);
    assert_eq!(fx.p1.nozzle_target().await, 215.0);
}

#[tokio::test]
async fn test_controls_refused_while_printing() {
    let fx = fixture();
    fx.p1.set_activity(DeviceActivity::Printing).await;
    let env = fx.send("printago://h/temperature_control/set_hotend?printer_id=p1&temperature=200").await;
    assert_eq!(env.data["error_detail"], "cannot control temperature; printer busy");
    let env = fx.send("printago://h/movement_control/home?printer_id=p1").await;
    assert_eq!(env.data["error_detail"], "cannot control movement; printer busy");
    assert!(fx.p1.commands().await.is_empty());
}

#[tokio::test]
async fn test_jog_requires_homing() {
    let fx = fixture();
    let env = fx.send("printago://h/movement_control/jog?printer_id=p1&axes[X]=10").await;
    assert_error(&env, "PreconditionFailed");
    assert_eq!(env.data["error_detail"], "must home axes before moving");

    let env = fx.send("printago://h/movement_control/jog?printer_id=p1").await;
    assert_error(&env, "MissingParameter");
}

#[tokio::test]
async fn test_jog_validates_every_axis_before_moving() {
    let fx = fixture();
    fx.p1.set_homed(true).await;

    let env = fx.send("printago://h/movement_control/jog?printer_id=p1&axes[X]=10&axes[Q]=5").await;
    assert_error(&env, "InvalidParameter");
    assert_eq!(env.data["error_detail"], "invalid axis name: Q");

    let env = fx.send("printago://h/movement_control/jog?printer_id=p1&axes[X]=10&axes[Y]=far").await;
    assert_error(&env, "InvalidParameter");
    assert_eq!(env.data["error_detail"], "invalid value for axis Y");

    assert!(fx.p1.moves().await.is_empty());
}

#[tokio::test]
async fn test_jog_moves_in_parameter_order() {
    let fx = fixture();
    fx.p1.set_homed(true).await;
    let env = fx.send("printago://h/movement_control/jog?printer_id=p1&axes.z=1.5&axes%5BX%5D=-10").await;
    assert_eq!(env.kind, MessageType::Success);
    assert_eq!(
        fx.p1.moves().await,
        vec![
            AxisMove { axis: Axis::Z, distance: 1.5, feed_rate: 3000 },
            AxisMove { axis: Axis::X, distance: -10.0, feed_rate: 3000 },
        ]
    );
}

#[tokio::test]
async fn test_extrude_temperature_threshold() {
    let fx = fixture();
    fx.p1.set_nozzle_reading(169.9).await;
    let env = fx.send("printago://h/movement_control/extrude?printer_id=p1&amount=5").await;
    assert_error(&env, "UnsafeTemperature");
    assert_eq!(env.data["error_detail"], "nozzle temperature too low to extrude (min: 170.0)");
    assert!(fx.p1.moves().await.is_empty());

    fx.p1.set_nozzle_reading(170.0).await;
    let env = fx.send("printago://h/movement_control/extrude?printer_id=p1&amount=5").await;
    assert_eq!(env.kind, MessageType::Success);
    assert_eq!(env.data["action_detail"], "5");
    assert_eq!(fx.p1.moves().await, vec![AxisMove { axis: Axis::E, distance: 5.0, feed_rate: 900 }]);

    let env = fx.send("printago://h/movement_control/extrude?printer_id=p1&amount=lots").await;
    assert_eq!(env.data["error_detail"], "invalid extrude amount value");
}

#[tokio::test]
async fn test_status_commands() {
    let fx = fixture();
    let env = fx.send("printago://h/status/get_machine_list").await;
    assert_eq!(env.kind, MessageType::Response);
    assert_eq!(env.printer_id, "nouser@bab");
    assert_eq!(env.data["machines"].as_array().unwrap().len(), 2);

    let env = fx.send("printago://h/status/get_config?config_type=filament&config_name=Generic%20PLA").await;
    assert_eq!(env.kind, MessageType::Response);
    assert_eq!(env.data["name"], "Generic PLA");

    let env = fx.send("printago://h/status/get_config?config_type=filament&config_name=Unknown").await;
    assert_error(&env, "ConfigNotFound");
    let env = fx.send("printago://h/status/get_config?config_type=process&config_name=Generic%20PLA").await;
    assert_error(&env, "ConfigNotFound");

    let env = fx.send("printago://h/status/switch_active?printer_id=p2").await;
    assert_eq!(env.kind, MessageType::Success);
    assert_eq!(env.data["action_detail"], "connecting to p2");
    let env = fx.send("printago://h/status/switch_active").await;
    assert_error(&env, "MissingTarget");
    let env = fx.send("printago://h/status/switch_active?printer_id=p9").await;
    assert_error(&env, "TargetNotFound");
}

#[tokio::test]
async fn test_get_status_reports_device() {
    let fx = fixture();
    let raw = "printago://h/printer_control/get_status?printer_id=p2";
    let env = fx.send(raw).await;
    assert_eq!(env.kind, MessageType::Status);
    assert_eq!(env.printer_id, "p2");
    assert_eq!(env.command, raw);
    assert_eq!(env.data["printer_id"], "p2");
    assert_eq!(env.data["state"], "idle");
}

#[tokio::test]
async fn test_start_print_hands_job_to_worker() {
    let mut fx = fixture();
    assert!(fx.router.handle_frame(START, true).await.is_none());

    let Some(JobRequest::Start { request, .. }) = fx.job_rx.recv().await else {
        panic!("no job request");
    };
    assert_eq!(request.target_id, "p1");
    assert_eq!(request.sources.model, "http://cdn/cube.3mf");
    let snapshot = fx.jobs.snapshot().await;
    assert!(snapshot.blocked);
    assert_eq!(snapshot.state, JobState::Download);
    assert_eq!(snapshot.job_id, "job-7");

    // Same target again is a continuation, not a second job.
    assert!(fx.router.handle_frame(START, true).await.is_none());
    assert!(fx.job_rx.try_recv().is_err());

    // Another target is refused while the gate is held.
    let other = START.replace("printer_id=p1", "printer_id=p2");
    let env = fx.send(&other).await;
    assert_error(&env, "Busy");
    assert_eq!(env.data["error_detail"], "busy with current job - check status");

    let env = fx.send("printago://h/status/switch_active?printer_id=p2").await;
    assert_error(&env, "Busy");

    // get_status never consults the gate.
    let env = fx.send("printago://h/printer_control/get_status?printer_id=p2").await;
    assert_eq!(env.kind, MessageType::Status);
    let env = fx.send("printago://h/printer_control/get_status?printer_id=p1").await;
    assert_eq!(env.data["job"]["state"], "download");
}

#[tokio::test]
async fn test_start_print_missing_parameters_keeps_gate_free() {
    let mut fx = fixture();
    let env = fx.send("printago://h/printer_control/start_print_bbl?printer_id=p1&model=http://cdn/cube.stl").await;
    assert_error(&env, "MissingParameter");
    assert!(!fx.jobs.is_blocked().await);
    assert!(fx.job_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_start_print_requires_available_device() {
    let fx = fixture();
    fx.p2.set_activity(DeviceActivity::Printing).await;
    let other = START.replace("printer_id=p1", "printer_id=p2");
    let env = fx.send(&other).await;
    assert_error(&env, "PreconditionFailed");
    assert_eq!(env.data["error_detail"], "cannot start print");
    assert!(!fx.jobs.is_blocked().await);
}

#[tokio::test]
async fn test_unauthorized_sessions_are_read_only() {
    let fx = fixture_with(ControlConfig { require_authorization: true, ..ControlConfig::default() });
    let env = fx
        .router
        .handle_frame("printago://h/movement_control/home?printer_id=p1", false)
        .await
        .unwrap();
    assert_error(&env, "Unauthorized");
    assert!(fx.p1.commands().await.is_empty());

    let env = fx
        .router
        .handle_frame("printago://h/printer_control/get_status?printer_id=p1", false)
        .await
        .unwrap();
    assert_eq!(env.kind, MessageType::Status);

    let env = fx.send("printago://h/movement_control/home?printer_id=p1").await;
    assert_eq!(env.kind, MessageType::Success);
}

/// A printer whose capability checks and readings never answer.
struct StalledPrinter(SimulatedPrinter);

#[async_trait]
impl Device for StalledPrinter {
    fn id(&self) -> &str {
        self.0.id()
    }
    async fn status(&self) -> DeviceStatus {
        self.0.status().await
    }
    async fn can_pause(&self) -> bool {
        std::future::pending().await
    }
    async fn can_resume(&self) -> bool {
        self.0.can_resume().await
    }
    async fn can_abort(&self) -> bool {
        self.0.can_abort().await
    }
    async fn can_accept_control(&self) -> bool {
        self.0.can_accept_control().await
    }
    async fn pause(&self) -> Result<(), DeviceError> {
        self.0.pause().await
    }
    async fn resume(&self) -> Result<(), DeviceError> {
        self.0.resume().await
    }
    async fn abort(&self) -> Result<(), DeviceError> {
        self.0.abort().await
    }
    async fn set_nozzle_temperature(&self, celsius: i64) -> Result<(), DeviceError> {
        self.0.set_nozzle_temperature(celsius).await
    }
    async fn set_bed_temperature(&self, celsius: i64) -> Result<(), DeviceError> {
        self.0.set_bed_temperature(celsius).await
    }
    async fn bed_temperature_limit(&self) -> i64 {
        self.0.bed_temperature_limit().await
    }
    async fn nozzle_temperature(&self) -> f64 {
        std::future::pending().await
    }
    async fn is_axis_homed(&self, axis: Axis) -> bool {
        self.0.is_axis_homed(axis).await
    }
    async fn move_axis(&self, axis: Axis, distance: f64, feed_rate: u32) -> Result<(), DeviceError> {
        self.0.move_axis(axis, distance, feed_rate).await
    }
    async fn home(&self) -> Result<(), DeviceError> {
        self.0.home().await
    }
}

#[tokio::test]
async fn test_stalled_device_checks_time_out() {
    let presets = tempfile::tempdir().unwrap();
    let stalled = Arc::new(StalledPrinter(SimulatedPrinter::with_id("slow")));
    let devices = Arc::new(InMemoryDirectory::new(vec![stalled as Arc<dyn Device>]));
    let (job_tx, _job_rx) = mpsc::channel(1);
    let router = Router::new(
        devices,
        Arc::new(DirectoryPresetStore::new(presets.path())),
        JobTracker::new(),
        job_tx,
        SessionSlot::new(),
        ControlConfig { command_timeout_secs: 1, ..ControlConfig::default() },
    );

    let started = Instant::now();
    let env = router
        .handle_frame("printago://h/printer_control/pause_print?printer_id=slow", true)
        .await
        .unwrap();
    assert_error(&env, "ExecutionFailed");
    assert_eq!(env.data["error_detail"], "pause_print timed out");

    let env = router
        .handle_frame("printago://h/movement_control/extrude?printer_id=slow&amount=5", true)
        .await
        .unwrap();
    assert_error(&env, "ExecutionFailed");
    assert!(started.elapsed() < Duration::from_secs(5));
}
