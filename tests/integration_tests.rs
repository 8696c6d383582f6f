//! Integration tests for stepper-planner.
//!
//! These drive the whole pipeline from a TOML configuration through the
//! planner, segment generator and DDA down to counted step pulses.

use proptest::prelude::*;

use stepper_planner::config::{validate_config, AxisName, MachineConfig};
use stepper_planner::error::{ConfigError, Error, MotorError};
use stepper_planner::planner::{PLANNER_HEADROOM, POOL_SIZE};
use stepper_planner::{
    Command, HoldState, Kinematics, Line, MotionController, MotionState, MoveStatus, StepOutput,
    AXES,
};

// =============================================================================
// Test configuration data
// =============================================================================

/// Gantry mill: X leadscrew, two belt motors on Y (one mirrored), slow Z.
const MILL_CONFIG: &str = r#"
[planner]
junction_acceleration = 100000.0

[axes.x]
velocity_max = 12000.0
feedrate_max = 6000.0
jerk_max = 5000.0
junction_deviation = 0.05

[axes.y]
velocity_max = 12000.0
feedrate_max = 6000.0
jerk_max = 5000.0
junction_deviation = 0.05

[axes.z]
velocity_max = 1200.0
feedrate_max = 600.0
jerk_max = 500.0
junction_deviation = 0.01

[[motors]]
name = "x"
axis = "x"
travel_per_rev = 5.0
microsteps = 8

[[motors]]
name = "y_left"
axis = "y"
travel_per_rev = 40.0
microsteps = 16

[[motors]]
name = "y_right"
axis = "y"
travel_per_rev = 40.0
microsteps = 16
invert_direction = true

[[motors]]
name = "z"
axis = "z"
travel_per_rev = 8.0
microsteps = 4
power_mode = "powered_when_moving"
"#;

const UNMAPPED_AXIS_CONFIG: &str = r#"
[axes.x]
velocity_max = 6000.0
feedrate_max = 6000.0
jerk_max = 5000.0

[[motors]]
name = "a"
axis = "a"
travel_per_rev = 360.0
microsteps = 8
"#;

/// 16000 steps/mm at 3000 mm/min needs 800 kHz from a 100 kHz DDA.
const FINE_PITCH_CONFIG: &str = r#"
[axes.x]
velocity_max = 3000.0
feedrate_max = 3000.0
jerk_max = 5000.0

[[motors]]
name = "x"
axis = "x"
travel_per_rev = 0.1
microsteps = 8
"#;

// Steps per unit derived from MILL_CONFIG.
const X_STEPS: f64 = 320.0;
const Y_STEPS: f64 = 80.0;
const Z_STEPS: f64 = 100.0;

// DDA ticks per system tick at the default frequencies.
const TICKS_PER_SYSTICK: u64 = 100;

fn parse(toml_str: &str) -> MachineConfig {
    toml::from_str(toml_str).expect("fixture should parse")
}

// =============================================================================
// Simulated hardware
// =============================================================================

/// Driver that tracks physical shaft position from pulses and the DIR line.
#[derive(Debug, Default)]
struct CountingMotor {
    position: i64,
    reverse: bool,
    enabled: bool,
    step_high: bool,
}

impl StepOutput for CountingMotor {
    fn step_start(&mut self) -> Result<(), MotorError> {
        assert!(!self.step_high);
        self.step_high = true;
        self.position += if self.reverse { -1 } else { 1 };
        Ok(())
    }

    fn step_end(&mut self) -> Result<(), MotorError> {
        self.step_high = false;
        Ok(())
    }

    fn set_direction(&mut self, reverse: bool) -> Result<(), MotorError> {
        self.reverse = reverse;
        Ok(())
    }

    fn enable(&mut self) -> Result<(), MotorError> {
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), MotorError> {
        self.enabled = false;
        Ok(())
    }
}

type Mill = MotionController<CountingMotor>;

fn build(config: &MachineConfig) -> Mill {
    let mut builder = MotionController::builder().config(config);
    for _ in 0..config.motors.len() {
        builder = builder.motor(CountingMotor::default());
    }
    builder.build().expect("controller should build")
}

fn mill() -> Mill {
    build(&parse(MILL_CONFIG))
}

/// One DDA period with the lower priority work interleaved.
fn tick(mc: &mut Mill, ticks: &mut u64) {
    mc.poll().unwrap();
    mc.service_exec().unwrap();
    mc.dda_tick().unwrap();
    *ticks += 1;
    if *ticks % TICKS_PER_SYSTICK == 0 {
        mc.systick().unwrap();
    }
}

/// Run until idle. Returns the number of DDA ticks taken.
fn run_until_idle(mc: &mut Mill, limit: u64) -> u64 {
    let mut ticks = 0;
    while mc.is_busy() || mc.stepper().exec_requested() {
        assert!(ticks < limit, "machine still busy after {} ticks", limit);
        tick(mc, &mut ticks);
    }
    ticks
}

fn physical(mc: &Mill, motor: usize) -> i64 {
    mc.stepper().motor(motor).unwrap().position
}

fn xyz(x: f64, y: f64, z: f64) -> [f64; AXES] {
    [x, y, z, 0.0, 0.0, 0.0]
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_fixture_parses_and_validates() {
    let config = parse(MILL_CONFIG);
    validate_config(&config).unwrap();
    assert_eq!(config.motors.len(), 4);
    assert!(config.axis(AxisName::Z).is_some());

    let kin = Kinematics::from_config(&config);
    assert!((kin.motor(0).unwrap().steps_per_unit - X_STEPS).abs() < 1e-9);
    assert!((kin.motor(1).unwrap().steps_per_unit - Y_STEPS).abs() < 1e-9);
    assert_eq!(kin.motor(2).unwrap().axis, AxisName::Y.index());
    assert!((kin.motor(3).unwrap().steps_per_unit - Z_STEPS).abs() < 1e-9);
}

#[test]
fn test_motor_on_unconfigured_axis_rejected() {
    let config = parse(UNMAPPED_AXIS_CONFIG);
    assert!(validate_config(&config).is_err());

    let result: stepper_planner::Result<Mill> = MotionController::builder()
        .config(&config)
        .motor(CountingMotor::default())
        .build();
    assert!(result.is_err());
}

#[test]
fn test_step_rate_beyond_dda_rejected() {
    let config = parse(FINE_PITCH_CONFIG);
    assert!(matches!(
        validate_config(&config),
        Err(Error::Config(ConfigError::StepRateTooHigh { .. }))
    ));
    assert!(stepper_planner::parse_config(FINE_PITCH_CONFIG).is_err());

    let result: stepper_planner::Result<Mill> = MotionController::builder()
        .config(&config)
        .motor(CountingMotor::default())
        .build();
    assert!(result.is_err());
}

// =============================================================================
// Moves
// =============================================================================

#[test]
fn test_gantry_motors_follow_shared_axis() {
    let mut mc = mill();
    mc.queue_line(&Line::feed(xyz(0.0, 10.0, 0.0), 3000.0)).unwrap();
    run_until_idle(&mut mc, 5_000_000);

    assert_eq!(mc.encoders()[1], 800);
    assert_eq!(mc.encoders()[2], 800);
    assert_eq!(physical(&mc, 1), 800);
    // the mirrored motor turns the other way
    assert_eq!(physical(&mc, 2), -800);
    assert_eq!(physical(&mc, 0), 0);
}

#[test]
fn test_square_returns_to_origin() {
    let mut mc = mill();
    let path = [
        xyz(20.0, 0.0, 0.0),
        xyz(20.0, 20.0, 0.0),
        xyz(0.0, 20.0, -1.0),
        xyz(0.0, 0.0, 0.0),
    ];
    for target in path {
        assert_eq!(mc.queue_line(&Line::feed(target, 4000.0)).unwrap(), MoveStatus::Queued);
    }
    run_until_idle(&mut mc, 20_000_000);

    assert_eq!(mc.runtime_position(), xyz(0.0, 0.0, 0.0));
    assert_eq!(&mc.encoders()[..4], &[0, 0, 0, 0]);
    assert_eq!(physical(&mc, 0), 0);
    assert_eq!(physical(&mc, 3), 0);
    assert_eq!(mc.motion_state(), MotionState::Stop);
}

#[test]
fn test_move_time_tracks_plan() {
    // 10 mm at 600 mm/min with 5e9 mm/min^3 jerk:
    // head and tail 0.2078 mm each at 300 mm/min average, body at 600
    let mut mc = mill();
    mc.queue_line(&Line::feed(xyz(10.0, 0.0, 0.0), 600.0)).unwrap();
    let ticks = run_until_idle(&mut mc, 5_000_000);

    let expected = 104_157.0;
    assert!((ticks as f64 - expected).abs() < 100.0, "took {} ticks", ticks);
    assert_eq!(mc.encoders()[0], 3200);
}

#[test]
fn test_minimum_time_move_rejected() {
    let mut mc = mill();
    let before = mc.model_position();
    let status = mc.queue_line(&Line::feed(xyz(0.0001, 0.0, 0.0), 1000.0)).unwrap();

    assert_eq!(status, MoveStatus::MinimumTime);
    assert_eq!(mc.model_position(), before);
    assert_eq!(mc.buffers_available(), POOL_SIZE);
}

#[test]
fn test_zero_length_move_is_noop() {
    let mut mc = mill();
    let status = mc.queue_line(&Line::traverse(xyz(0.0, 0.0, 0.0))).unwrap();
    assert_eq!(status, MoveStatus::ZeroLength);
    assert!(!mc.is_busy());
}

#[test]
fn test_headroom_backpressure() {
    let mut mc = mill();
    let mut queued = 0;
    while mc.has_headroom() {
        let x = f64::from(queued + 1);
        mc.queue_line(&Line::feed(xyz(x, 0.0, 0.0), 3000.0)).unwrap();
        queued += 1;
    }
    assert_eq!(queued as usize, POOL_SIZE - PLANNER_HEADROOM);
    assert_eq!(mc.buffers_available(), PLANNER_HEADROOM);

    run_until_idle(&mut mc, 20_000_000);
    assert_eq!(mc.encoders()[0], (f64::from(queued) * X_STEPS) as i64);
    assert!(mc.has_headroom());
}

// =============================================================================
// Dwells, commands and power
// =============================================================================

#[test]
fn test_dwell_counts_system_ticks() {
    let mut mc = mill();
    mc.dwell(0.25).unwrap();
    let ticks = run_until_idle(&mut mc, 1_000_000);
    let systicks = ticks / TICKS_PER_SYSTICK;
    assert!((249..=251).contains(&systicks), "dwell took {} system ticks", systicks);
}

#[test]
fn test_commands_delivered_in_queue_order() {
    let mut mc = mill();
    mc.queue_command(Command(1)).unwrap();
    mc.queue_line(&Line::feed(xyz(1.0, 0.0, 0.0), 1000.0)).unwrap();
    mc.queue_command(Command(2)).unwrap();
    run_until_idle(&mut mc, 1_000_000);

    assert_eq!(mc.take_command(), Some(Command(1)));
    assert_eq!(mc.take_command(), Some(Command(2)));
    assert_eq!(mc.take_command(), None);
}

#[test]
fn test_motors_released_after_idle_timeout() {
    let mut mc = mill();
    mc.queue_line(&Line::feed(xyz(2.0, 0.0, 0.0), 3000.0)).unwrap();
    run_until_idle(&mut mc, 1_000_000);
    assert!(mc.stepper().motor(0).unwrap().enabled);
    // Z is powered only while it moves
    assert!(!mc.stepper().motor(3).unwrap().enabled);

    // default timeout is 2 s at 1 kHz
    for _ in 0..2_010 {
        mc.systick().unwrap();
    }
    assert!(!mc.stepper().motor(0).unwrap().enabled);
    assert!(!mc.stepper().motor(1).unwrap().enabled);
}

// =============================================================================
// Feedhold
// =============================================================================

fn hold(mc: &mut Mill, ticks: &mut u64) {
    mc.signals().request_feedhold();
    while !(mc.hold_state() == HoldState::Hold && !mc.stepper().is_busy()) {
        assert!(*ticks < 50_000_000, "hold never reached");
        tick(mc, ticks);
    }
}

#[test]
fn test_hold_and_resume_reach_endpoint() {
    let mut mc = mill();
    let path = [
        xyz(15.0, 0.0, 0.0),
        xyz(30.0, 0.0, 0.0),
        xyz(30.0, 10.0, 0.0),
        xyz(45.0, 10.0, 0.0),
    ];
    for target in path {
        mc.queue_line(&Line::feed(target, 6000.0)).unwrap();
    }

    let mut ticks = 0;
    while ticks < 15_000 {
        tick(&mut mc, &mut ticks);
    }
    hold(&mut mc, &mut ticks);
    assert_eq!(mc.motion_state(), MotionState::Hold);

    let held = mc.encoders()[0];
    assert!(held > 0 && held < (45.0 * X_STEPS) as i64);
    let runtime = mc.runtime_position();
    assert!((mc.encoders()[0] as f64 - runtime[0] * X_STEPS).abs() <= 1.0);

    // held: time passes, nothing moves
    for _ in 0..10_000 {
        tick(&mut mc, &mut ticks);
    }
    assert_eq!(mc.encoders()[0], held);

    mc.signals().request_cycle_start();
    run_until_idle(&mut mc, 50_000_000);
    assert_eq!(mc.hold_state(), HoldState::Off);
    assert_eq!(mc.runtime_position(), xyz(45.0, 10.0, 0.0));
    assert_eq!(mc.encoders()[0], (45.0 * X_STEPS) as i64);
    assert_eq!(mc.encoders()[1], (10.0 * Y_STEPS) as i64);
}

#[test]
fn test_repeated_holds_conserve_distance() {
    let mut mc = mill();
    mc.queue_line(&Line::feed(xyz(60.0, 0.0, 0.0), 6000.0)).unwrap();

    let mut ticks = 0;
    for _ in 0..3 {
        for _ in 0..8_000 {
            tick(&mut mc, &mut ticks);
        }
        if !mc.is_busy() {
            break;
        }
        hold(&mut mc, &mut ticks);
        mc.signals().request_cycle_start();
    }
    run_until_idle(&mut mc, 50_000_000);
    assert_eq!(mc.encoders()[0], (60.0 * X_STEPS) as i64);
    assert_eq!(mc.runtime_position(), xyz(60.0, 0.0, 0.0));
}

#[test]
fn test_flush_in_hold_discards_remaining_moves() {
    let mut mc = mill();
    mc.queue_line(&Line::feed(xyz(40.0, 0.0, 0.0), 6000.0)).unwrap();
    mc.queue_line(&Line::feed(xyz(40.0, 40.0, 0.0), 6000.0)).unwrap();

    let mut ticks = 0;
    while ticks < 10_000 {
        tick(&mut mc, &mut ticks);
    }
    hold(&mut mc, &mut ticks);
    mc.flush().unwrap();
    assert_eq!(mc.buffers_available(), POOL_SIZE);
    assert_eq!(mc.model_position(), mc.runtime_position());

    // new work starts from where the hold stopped
    let stopped = mc.runtime_position();
    mc.queue_line(&Line::feed(xyz(0.0, 0.0, 0.0), 6000.0)).unwrap();
    run_until_idle(&mut mc, 20_000_000);
    assert!(stopped[0] < 40.0);
    assert_eq!(mc.encoders()[0], 0);
    assert_eq!(mc.encoders()[1], 0);
}

// =============================================================================
// Property tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_steps_match_endpoint(x in -8.0f64..8.0, y in -8.0f64..8.0, feed in 1000.0f64..6000.0) {
        let mut mc = mill();
        let status = mc.queue_line(&Line::feed(xyz(x, y, 0.0), feed)).unwrap();
        prop_assume!(status == MoveStatus::Queued);
        run_until_idle(&mut mc, 10_000_000);

        prop_assert!((mc.encoders()[0] as f64 - x * X_STEPS).abs() <= 0.5 + 1e-6);
        prop_assert!((mc.encoders()[1] as f64 - y * Y_STEPS).abs() <= 0.5 + 1e-6);
        prop_assert_eq!(physical(&mc, 1), -physical(&mc, 2));
        prop_assert_eq!(mc.runtime_position(), xyz(x, y, 0.0));
    }
}
