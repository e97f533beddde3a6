//! End-to-end gantry sequences against the simulated DMC controller.

use std::path::Path;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use rig_hardware::galil::mock::{MockDmc, MockFailure, DEFAULT_LIMIT_POSITION};
use rig_hardware::galil::DmcError;
use rig_hardware::gantry::{
    Axis, AxisSpeeds, AxisTargets, GantryController, GantryError, GantrySettings, MotionPhase,
    PhysicalPosition, PositionStore, StepPosition, DEFAULT_POSITION_FILE,
};
use tempfile::TempDir;

fn fast_settings() -> GantrySettings {
    GantrySettings {
        settle_time: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
        ..GantrySettings::default()
    }
}

/// Write a position record and open a controller over the given mock.
fn open_with(
    dir: &TempDir,
    record: &str,
    dmc: &MockDmc,
) -> (GantryController<MockDmc>, PositionStore) {
    let store = PositionStore::new(dir.path().join(DEFAULT_POSITION_FILE));
    std::fs::write(store.path(), record).unwrap();
    let gantry = GantryController::open(dmc.clone(), store.clone(), fast_settings()).unwrap();
    (gantry, store)
}

fn record(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

/// Commands sent after the three-statement startup sequence.
fn motion_commands(dmc: &MockDmc) -> Vec<String> {
    dmc.commands().into_iter().skip(3).collect()
}

#[test]
fn test_startup_restores_position() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new();
    let (gantry, _) = open_with(&dir, "120,-40,7,3,2\n", &dmc);

    assert_eq!(
        dmc.commands(),
        vec!["DP 120,-40,7,3,2", "SH", "KS ,,,25,25"]
    );
    assert_eq!(dmc.position(), [120, -40, 7, 3, 2]);
    assert!(dmc.motors_on());
    assert_eq!(gantry.position(), StepPosition::new(120, -40, 7, 3, 2));
    assert_eq!(gantry.phase(), MotionPhase::Idle);
}

#[test]
fn test_missing_record_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new();
    let store = PositionStore::new(dir.path().join(DEFAULT_POSITION_FILE));

    let result = GantryController::open(dmc.clone(), store, fast_settings());

    assert!(matches!(result, Err(GantryError::Configuration(_))));
    assert!(dmc.commands().is_empty());
}

#[test]
fn test_relative_move_persists_position() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().with_busy_polls(3);
    let (mut gantry, store) = open_with(&dir, "0,0,0,0,0\n", &dmc);

    let position = gantry
        .move_relative(StepPosition::new(1000, 0, 0, 0, 0), None)
        .unwrap();

    assert_eq!(position, StepPosition::new(1000, 0, 0, 0, 0));
    assert_eq!(record(store.path()), "1000,0,0,0,0\n");
    assert_eq!(gantry.phase(), MotionPhase::Idle);

    let commands = motion_commands(&dmc);
    assert_eq!(commands[0], "SP 1000,1000,1000,1000,1000");
    assert_eq!(commands[1], "PR 1000,0,0,0,0");
    assert_eq!(commands[2], "BG");
    assert_eq!(commands.last().unwrap(), "PA ?,?,?,?,?");
    assert!(commands.iter().filter(|c| *c == "MG _BGA").count() > 1);
}

#[test]
fn test_relative_move_with_custom_speeds() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new();
    let (mut gantry, store) = open_with(&dir, "10,20,30,40,50\n", &dmc);

    gantry
        .move_relative(
            StepPosition::new(-10, 0, 5, 0, 0),
            Some(AxisSpeeds::new(500.0, 500.0, 250.0, 100.0, 100.0)),
        )
        .unwrap();

    assert_eq!(dmc.speeds(), [500.0, 500.0, 250.0, 100.0, 100.0]);
    assert_eq!(record(store.path()), "0,20,35,40,50\n");
}

#[test]
fn test_relative_move_in_physical_units() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new();
    let (mut gantry, _) = open_with(&dir, "0,0,0,0,0\n", &dmc);

    let position = gantry
        .move_relative_physical(PhysicalPosition::new(100.0, 0.0, 0.0, 90.0, 0.0), None)
        .unwrap();

    assert_eq!(position, StepPosition::new(8985, 0, 0, 3982, 0));
    let physical = gantry.position_physical();
    assert_abs_diff_eq!(physical.x, 100.0, epsilon = 0.01113);
    assert_abs_diff_eq!(physical.theta, 90.0, epsilon = 0.0226);
}

#[test]
fn test_absolute_move_leaves_unspecified_axes() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new();
    let (mut gantry, store) = open_with(&dir, "1000,2000,3000,40,50\n", &dmc);

    gantry
        .move_absolute(AxisTargets::only(Axis::X, 10.0), None)
        .unwrap();

    assert!(motion_commands(&dmc).contains(&"PA 898,2000,3000,40,50".to_string()));
    assert_eq!(record(store.path()), "898,2000,3000,40,50\n");
}

#[test]
fn test_absolute_move_to_negative_one() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new();
    let (mut gantry, _) = open_with(&dir, "500,0,0,0,0\n", &dmc);

    let position = gantry
        .move_absolute(AxisTargets::only(Axis::X, -1.0), None)
        .unwrap();

    assert_eq!(position.x, -90);
    assert!(motion_commands(&dmc).contains(&"PA -90,0,0,0,0".to_string()));
}

#[test]
fn test_home_skips_engaged_axes() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().with_reverse_limits([true, false, false, false, false]);
    let (mut gantry, store) = open_with(&dir, "500,300,200,10,20\n", &dmc);

    let position = gantry.home().unwrap();

    let commands = motion_commands(&dmc);
    assert!(commands.contains(&"JG 0,-1000,-1000,0,0".to_string()));
    assert!(commands.contains(&"BGBC".to_string()));
    assert!(commands.contains(&"DP 0,0,0".to_string()));
    assert!(!commands.iter().any(|c| c == "MG _LRD" || c == "MG _LRE"));

    assert_eq!(position, StepPosition::new(0, 0, 0, 10, 20));
    assert_eq!(record(store.path()), "0,0,0,10,20\n");
    assert_eq!(dmc.reverse_limits(), [true, true, true, false, false]);
}

#[test]
fn test_home_drives_all_linear_axes() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().with_busy_polls(2);
    let (mut gantry, _) = open_with(&dir, "500,300,200,0,0\n", &dmc);

    gantry.home().unwrap();

    let commands = motion_commands(&dmc);
    let jog = commands.iter().position(|c| c == "JG -1000,-1000,-1000,0,0");
    let begin = commands.iter().position(|c| c == "BGABC");
    let define = commands.iter().position(|c| c == "DP 0,0,0");
    assert!(jog < begin && begin < define, "{commands:?}");
}

#[test]
fn test_home_when_already_homed_issues_no_begin() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new()
        .with_position([DEFAULT_LIMIT_POSITION, 0, 0, 0, 0])
        .with_reverse_limits([true, true, true, false, false]);
    let (mut gantry, store) = open_with(&dir, "0,0,0,0,0\n", &dmc);

    gantry.home().unwrap();

    let commands = motion_commands(&dmc);
    assert!(commands.contains(&"JG 0,0,0,0,0".to_string()));
    assert!(!commands.iter().any(|c| c.starts_with("BG")));
    assert_eq!(record(store.path()), "0,0,0,0,0\n");
}

#[test]
fn test_home_twice_second_run_does_not_move() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new();
    let (mut gantry, store) = open_with(&dir, "500,300,200,7,8\n", &dmc);

    let first = gantry.home().unwrap();
    let sent = dmc.commands().len();
    let second = gantry.home().unwrap();

    assert_eq!(first, StepPosition::new(0, 0, 0, 7, 8));
    assert_eq!(second, first);
    let rerun: Vec<String> = dmc.commands().into_iter().skip(sent).collect();
    assert!(rerun.contains(&"JG 0,0,0,0,0".to_string()), "{rerun:?}");
    assert!(!rerun.iter().any(|c| c.starts_with("BG")), "{rerun:?}");
    assert_eq!(record(store.path()), "0,0,0,7,8\n");
    assert_eq!(gantry.phase(), MotionPhase::Idle);
}

#[test]
fn test_rejected_home_begin_reports_speed_set() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().fail_on(
        "BG",
        MockFailure::Reject {
            code: 22,
            message: "Begin not possible due to Limit Switch".to_string(),
        },
    );
    let (mut gantry, store) = open_with(&dir, "500,300,200,0,0\n", &dmc);

    let err = gantry.home().unwrap_err();

    assert!(matches!(
        err,
        GantryError::DeviceFault {
            operation: "homing",
            phase: MotionPhase::SpeedSet,
            ..
        }
    ));
    assert_eq!(record(store.path()), "500,300,200,0,0\n");
}

#[test]
fn test_rejected_status_poll_during_motion_faults() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().with_busy_polls(2).fail_on(
        "MG _BGC",
        MockFailure::Reject {
            code: 1,
            message: "Unrecognized command".to_string(),
        },
    );
    let (mut gantry, store) = open_with(&dir, "0,0,0,0,0\n", &dmc);

    let err = gantry
        .move_relative(StepPosition::new(0, 0, 500, 0, 0), None)
        .unwrap_err();

    match err {
        GantryError::DeviceFault {
            phase, error_code, ..
        } => {
            assert_eq!(phase, MotionPhase::MotionBegun);
            assert_eq!(error_code.map(|c| c.code), Some(1));
        }
        other => panic!("unexpected error: {other}"),
    }
    let commands = motion_commands(&dmc);
    assert_eq!(&commands[commands.len() - 3..], ["ST", "MO", "TC1"]);
    assert_eq!(record(store.path()), "0,0,0,0,0\n");
    assert!(gantry.is_faulted());
}

#[test]
fn test_lost_connection_on_read_back_faults() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().fail_on("PA ?", MockFailure::Disconnect);
    let (mut gantry, store) = open_with(&dir, "0,0,0,0,0\n", &dmc);

    let err = gantry
        .move_relative(StepPosition::new(100, 0, 0, 0, 0), None)
        .unwrap_err();

    assert!(matches!(
        err,
        GantryError::DeviceFault {
            phase: MotionPhase::MotionComplete,
            error_code: None,
            ..
        }
    ));
    assert_eq!(record(store.path()), "0,0,0,0,0\n");
}

#[test]
fn test_short_position_reply_is_communication_error() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().fail_on("PA ?", MockFailure::Respond(" 1, 2, 3".to_string()));
    let (mut gantry, _) = open_with(&dir, "0,0,0,0,0\n", &dmc);

    let result = gantry.query_position();

    assert!(matches!(
        result,
        Err(GantryError::Communication(DmcError::ParseError(_)))
    ));
    assert!(!gantry.is_faulted());
    assert_eq!(gantry.query_position().unwrap(), StepPosition::new(0, 0, 0, 0, 0));
}

#[test]
fn test_rejected_begin_stops_and_latches_fault() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().fail_on(
        "BG",
        MockFailure::Reject {
            code: 22,
            message: "Begin not possible due to Limit Switch".to_string(),
        },
    );
    let (mut gantry, store) = open_with(&dir, "0,0,0,0,0\n", &dmc);

    let err = gantry
        .move_relative(StepPosition::new(1000, 0, 0, 0, 0), None)
        .unwrap_err();

    match err {
        GantryError::DeviceFault {
            phase, error_code, ..
        } => {
            assert_eq!(phase, MotionPhase::CommandIssued);
            assert_eq!(error_code.map(|c| c.code), Some(22));
        }
        other => panic!("unexpected error: {other}"),
    }

    let commands = motion_commands(&dmc);
    assert_eq!(&commands[commands.len() - 3..], ["ST", "MO", "TC1"]);
    assert!(!dmc.motors_on());
    assert_eq!(record(store.path()), "0,0,0,0,0\n");
    assert!(gantry.is_faulted());

    let sent = dmc.commands().len();
    assert!(matches!(gantry.home(), Err(GantryError::Faulted)));
    assert!(matches!(
        gantry.move_absolute(AxisTargets::unchanged(), None),
        Err(GantryError::Faulted)
    ));
    assert_eq!(dmc.commands().len(), sent);
}

#[test]
fn test_lost_connection_faults_without_error_code() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().fail_on("PR", MockFailure::Disconnect);
    let (mut gantry, store) = open_with(&dir, "5,5,5,5,5\n", &dmc);

    let err = gantry
        .move_relative(StepPosition::new(1, 0, 0, 0, 0), None)
        .unwrap_err();

    match err {
        GantryError::DeviceFault {
            phase,
            error_code,
            source,
            ..
        } => {
            assert_eq!(phase, MotionPhase::SpeedSet);
            assert!(error_code.is_none());
            assert!(matches!(source, DmcError::Io(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(dmc.commands().ends_with(&[
        "ST".to_string(),
        "MO".to_string(),
        "TC1".to_string()
    ]));
    assert_eq!(record(store.path()), "5,5,5,5,5\n");
}

#[test]
fn test_motion_timeout_faults() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new().stuck();
    let store = PositionStore::new(dir.path().join(DEFAULT_POSITION_FILE));
    std::fs::write(store.path(), "0,0,0,0,0\n").unwrap();
    let settings = GantrySettings {
        motion_timeout: Duration::from_millis(20),
        ..fast_settings()
    };
    let mut gantry = GantryController::open(dmc.clone(), store.clone(), settings).unwrap();

    let err = gantry
        .move_relative(StepPosition::new(10, 0, 0, 0, 0), None)
        .unwrap_err();

    assert!(matches!(
        err,
        GantryError::DeviceFault {
            phase: MotionPhase::MotionBegun,
            error_code: None,
            source: DmcError::MotionTimeout(_),
            ..
        }
    ));
    assert!(!err.to_string().contains("error 0"), "{err}");
    assert_eq!(record(store.path()), "0,0,0,0,0\n");
}

#[test]
fn test_persist_failure_latches_fault() {
    let dir = TempDir::new().unwrap();
    let records = dir.path().join("records");
    std::fs::create_dir(&records).unwrap();
    let store = PositionStore::new(records.join(DEFAULT_POSITION_FILE));
    std::fs::write(store.path(), "0,0,0,0,0\n").unwrap();

    let dmc = MockDmc::new();
    let mut gantry = GantryController::open(dmc.clone(), store, fast_settings()).unwrap();
    std::fs::remove_dir_all(&records).unwrap();

    let result = gantry.move_relative(StepPosition::new(1, 0, 0, 0, 0), None);

    assert!(matches!(result, Err(GantryError::Storage(_))));
    assert!(gantry.is_faulted());
}

#[test]
fn test_invalid_speed_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new();
    let (mut gantry, _) = open_with(&dir, "0,0,0,0,0\n", &dmc);

    let result = gantry.move_relative(
        StepPosition::new(1, 0, 0, 0, 0),
        Some(AxisSpeeds::new(1000.0, 0.0, 1000.0, 1000.0, 1000.0)),
    );

    assert!(matches!(
        result,
        Err(GantryError::InvalidSpeed { axis: Axis::Y, .. })
    ));
    assert!(motion_commands(&dmc).is_empty());
    assert!(!gantry.is_faulted());
}

#[test]
fn test_query_reflects_external_motion() {
    let dir = TempDir::new().unwrap();
    let dmc = MockDmc::new();
    let (mut gantry, _) = open_with(&dir, "0,0,0,0,0\n", &dmc);

    dmc.set_position([8985, 0, 0, 0, -1992]);
    let physical = gantry.query_position_physical().unwrap();

    assert_abs_diff_eq!(physical.x, 100.0, epsilon = 0.01);
    assert_abs_diff_eq!(physical.phi, -45.0, epsilon = 0.02);
    assert_eq!(gantry.position(), StepPosition::new(8985, 0, 0, 0, -1992));
    assert!(!gantry.reverse_limit_engaged(Axis::X).unwrap());
}
