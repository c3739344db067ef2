//! End-to-end synthesis tests.
//!
//! Builds whole machines from configuration, then drives the frozen
//! topology through the reference evaluator to verify the behavioral
//! guarantees: latch debounce timing, watchdog staleness, mux routing,
//! heater PWM bounds, latched thermal faults, and gantry limit combining.

use loom_common::consts::SERVO_PERIOD_NS_DEFAULT;
use loom_common::machine::{
    AxisConfig, ExtruderConfig, MachineConfig, MachineSection, StepgenConfig, ThermalConfig,
    WatchdogChannelConfig,
};
use loom_common::signal::SignalValue;

use loom_synth::catalog::BlockType;
use loom_synth::machine::{synthesize, EXTRUDER_TABLE_ROWS};
use loom_synth::sim::Simulator;

// ── Helpers ─────────────────────────────────────────────────────────

const DT: f64 = 1.0; // 1 ms cycle

fn stepgen() -> StepgenConfig {
    StepgenConfig {
        scale: 80.0,
        max_velocity: 300.0,
        max_acceleration: 3000.0,
        steplen_ns: 5_000,
        stepspace_ns: 5_000,
        dirsetup_ns: 35_000,
        dirhold_ns: 35_000,
    }
}

fn thermal() -> ThermalConfig {
    ThermalConfig {
        p_gain: 0.05,
        i_gain: 0.001,
        d_gain: 0.0,
        bias: 0.0,
        max_output: 1.0,
        max_error_i: 0.5,
        range_error: 15.0,
        limit_min: 0.0,
        limit_max: 280.0,
        standby: 150.0,
        fan_index: None,
        fan_bias_gain: 0.0,
    }
}

fn extruder(filament_diameter: f64, thermal_cfg: Option<ThermalConfig>) -> ExtruderConfig {
    ExtruderConfig {
        stepgen: stepgen(),
        filament_diameter,
        retract_velocity: 40.0,
        retract_length: 1.0,
        jog_velocity: 5.0,
        thermal: thermal_cfg,
    }
}

fn base_config(extruders: Vec<ExtruderConfig>) -> MachineConfig {
    MachineConfig {
        machine: MachineSection {
            name: "test-machine".to_string(),
            servo_period_ns: SERVO_PERIOD_NS_DEFAULT,
            num_fans: 0,
        },
        axes: ["x", "y", "z"]
            .iter()
            .map(|letter| AxisConfig {
                letter: letter.to_string(),
                stepgen: stepgen(),
                gantry_joints: 1,
                home_offsets: Vec::new(),
            })
            .collect(),
        extruders,
        bed: None,
        watchdog_channels: Vec::new(),
    }
}

/// Close the estop chain: pulse a reset edge and let it propagate.
fn power_up(sim: &mut Simulator<'_>) {
    sim.set("estop.reset", SignalValue::Bit(true)).unwrap();
    sim.step(DT);
    sim.set("estop.reset", SignalValue::Bit(false)).unwrap();
    sim.step(DT);
    assert!(sim.get_bit("estop.ok").unwrap(), "estop chain did not close");
}

// ── Structural properties ───────────────────────────────────────────

#[test]
fn two_extruders_produce_one_mux_per_shared_parameter() {
    let cfg = base_config(vec![extruder(1.75, None), extruder(2.85, None)]);
    let topo = synthesize(&cfg).unwrap();

    // One selector mux per table row, each sized to the extruder count.
    let muxes: Vec<_> = topo
        .blocks_where(|t| matches!(t, BlockType::Mux { .. }))
        .collect();
    assert_eq!(muxes.len(), EXTRUDER_TABLE_ROWS);
    for mux in muxes {
        assert_eq!(mux.block_type.fan_in(), Some(2));
    }

    // Exactly one velocity-mode stepgen fragment per extruder.
    let extruder_stepgens = topo
        .blocks_where(|t| {
            matches!(
                t,
                BlockType::Stepgen {
                    mode: loom_synth::catalog::StepgenMode::Velocity
                }
            )
        })
        .count();
    assert_eq!(extruder_stepgens, 2);

    // The enable fan-out decoder exists for a multi-extruder bank.
    assert!(topo.block_named("extruder.select-decode").is_some());
}

#[test]
fn zero_fans_produce_no_fan_artifacts() {
    let mut cfg = base_config(vec![extruder(1.75, Some(thermal()))]);
    cfg.machine.num_fans = 0;
    let topo = synthesize(&cfg).unwrap();

    assert!(topo.signal_named("fan.0.pwm").is_none());
    assert!(topo.block_named("temp.hotend-0.fan-bias").is_none());
    // Still a fully functional machine.
    assert!(topo.block_named("temp.hotend-0.pid").is_some());
}

#[test]
fn signal_names_are_unique_across_the_whole_build() {
    let mut cfg = base_config(vec![
        extruder(1.75, Some(thermal())),
        extruder(1.75, Some(thermal())),
    ]);
    cfg.bed = Some(thermal());
    cfg.machine.num_fans = 2;
    cfg.axes[0].gantry_joints = 2;
    cfg.watchdog_channels = vec![WatchdogChannelConfig {
        name: "pru0".to_string(),
        timeout_ms: 100,
    }];

    // A full-featured build exercises every composer; the builder rejects
    // any duplicate, so success here proves global uniqueness.
    let topo = synthesize(&cfg).unwrap();
    let mut names: Vec<&str> = topo.signals().iter().map(|s| s.name.as_str()).collect();
    let total = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), total);
}

// ── Behavioral properties ───────────────────────────────────────────

#[test]
fn mux_routes_the_selected_extruder_parameter() {
    let cfg = base_config(vec![extruder(1.75, None), extruder(2.85, None)]);
    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);

    sim.set("extruder.select", SignalValue::S32(0)).unwrap();
    sim.step(DT);
    assert_eq!(sim.get_f64("extruder.shared.filament-dia").unwrap(), 1.75);

    sim.set("extruder.select", SignalValue::S32(1)).unwrap();
    sim.step(DT);
    assert_eq!(sim.get_f64("extruder.shared.filament-dia").unwrap(), 2.85);

    // Out-of-range selection clamps to the last unit.
    sim.set("extruder.select", SignalValue::S32(7)).unwrap();
    sim.step(DT);
    assert_eq!(sim.get_f64("extruder.shared.filament-dia").unwrap(), 2.85);
}

#[test]
fn selected_extruder_gates_the_stepgen_enable() {
    let cfg = base_config(vec![extruder(1.75, None), extruder(1.75, None)]);
    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);
    power_up(&mut sim);

    sim.set("extruder.select", SignalValue::S32(1)).unwrap();
    sim.run(2, DT);
    assert!(!sim.get_bit("extruder-0.enable").unwrap());
    assert!(sim.get_bit("extruder-1.enable").unwrap());
}

#[test]
fn watchdog_trips_on_a_stale_channel() {
    let mut cfg = base_config(vec![extruder(1.75, None)]);
    cfg.watchdog_channels = vec![
        WatchdogChannelConfig {
            name: "pru0".to_string(),
            timeout_ms: 50,
        },
        WatchdogChannelConfig {
            name: "io-board".to_string(),
            timeout_ms: 200,
        },
    ];
    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);

    // Both channels toggling → ok.
    let mut phase = false;
    for _ in 0..20 {
        phase = !phase;
        sim.set("watchdog.pru0.input", SignalValue::Bit(phase)).unwrap();
        sim.set("watchdog.io-board.input", SignalValue::Bit(phase))
            .unwrap();
        sim.step(10.0);
    }
    assert!(sim.get_bit("watchdog.ok").unwrap());
    assert!(!sim.get_bit("watchdog.error").unwrap());

    // pru0 stops toggling; its 50 ms window expires while io-board's
    // 200 ms window stays fresh.
    for _ in 0..6 {
        phase = !phase;
        sim.set("watchdog.io-board.input", SignalValue::Bit(phase))
            .unwrap();
        sim.step(10.0);
    }
    assert!(!sim.get_bit("watchdog.ok").unwrap());
    assert!(sim.get_bit("watchdog.error").unwrap());
}

#[test]
fn heater_pwm_stays_within_bounds() {
    let cfg = base_config(vec![extruder(1.75, Some(thermal()))]);
    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);
    sim.set("temp.hotend-0.measured", SignalValue::Float(20.0))
        .unwrap();
    power_up(&mut sim);

    // Cold start, big setpoint: PID saturates high, clamp holds it at
    // max_output.
    sim.set("temp.hotend-0.set-point", SignalValue::Float(250.0))
        .unwrap();
    for _ in 0..100 {
        sim.step(DT);
        let pwm = sim.get_f64("temp.hotend-0.pwm").unwrap();
        assert!((0.0..=1.0).contains(&pwm), "pwm {pwm} escaped [0, 1]");
    }

    // Overshoot: PID wants negative output, but heater duty floors at 0.
    sim.set("temp.hotend-0.measured", SignalValue::Float(270.0))
        .unwrap();
    sim.run(50, DT);
    assert_eq!(sim.get_f64("temp.hotend-0.pwm").unwrap(), 0.0);
}

#[test]
fn thermal_fault_debounces_then_latches() {
    let cfg = base_config(vec![extruder(1.75, Some(thermal()))]);
    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);
    sim.set("temp.hotend-0.measured", SignalValue::Float(20.0))
        .unwrap();
    power_up(&mut sim);

    // Sensor reads way out of the absolute window.
    sim.set("temp.hotend-0.measured", SignalValue::Float(400.0))
        .unwrap();

    // 400 ms of continuous fault: still inside the 500 ms debounce.
    sim.run(4, 100.0);
    assert!(!sim.get_bit("temp.hotend-0.error").unwrap());

    // Crossing the threshold trips the latch.
    sim.run(1, 100.0);
    assert!(sim.get_bit("temp.hotend-0.error").unwrap());

    // Temperature recovering does NOT clear the latch.
    sim.set("temp.hotend-0.measured", SignalValue::Float(20.0))
        .unwrap();
    sim.run(10, 100.0);
    assert!(sim.get_bit("temp.hotend-0.error").unwrap());

    // Explicit reset with the fault cleared does.
    sim.set("estop.reset", SignalValue::Bit(true)).unwrap();
    sim.step(DT);
    assert!(!sim.get_bit("temp.hotend-0.error").unwrap());
}

#[test]
fn latched_fault_ignores_reset_while_fault_persists() {
    let cfg = base_config(vec![extruder(1.75, Some(thermal()))]);
    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);
    sim.set("temp.hotend-0.measured", SignalValue::Float(20.0))
        .unwrap();
    power_up(&mut sim);

    sim.set("temp.hotend-0.measured", SignalValue::Float(400.0))
        .unwrap();
    sim.run(6, 100.0);
    assert!(sim.get_bit("temp.hotend-0.error").unwrap());

    // Reset pressed while the sensor still reads out of range: refused.
    sim.set("estop.reset", SignalValue::Bit(true)).unwrap();
    sim.step(DT);
    assert!(sim.get_bit("temp.hotend-0.error").unwrap());
}

#[test]
fn thermal_fault_pulls_the_estop_chain() {
    let cfg = base_config(vec![extruder(1.75, Some(thermal()))]);
    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);
    sim.set("temp.hotend-0.measured", SignalValue::Float(20.0))
        .unwrap();
    power_up(&mut sim);

    sim.set("temp.hotend-0.measured", SignalValue::Float(400.0))
        .unwrap();
    sim.run(7, 100.0);
    assert!(sim.get_bit("temp.hotend-0.error").unwrap());
    assert!(!sim.get_bit("estop.ok").unwrap());
}

#[test]
fn estop_reset_zeroes_the_heater_setpoint() {
    let cfg = base_config(vec![extruder(1.75, Some(thermal()))]);
    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);
    sim.set("temp.hotend-0.measured", SignalValue::Float(20.0))
        .unwrap();
    power_up(&mut sim);

    sim.set("temp.hotend-0.set-point", SignalValue::Float(250.0))
        .unwrap();
    sim.step(DT);
    assert_eq!(sim.get_f64("temp.hotend-0.set-point").unwrap(), 250.0);

    // A cleared estop must never resume heating at the stale setpoint.
    sim.set("estop.reset", SignalValue::Bit(false)).unwrap();
    sim.step(DT);
    sim.set("estop.reset", SignalValue::Bit(true)).unwrap();
    sim.step(DT);
    assert_eq!(sim.get_f64("temp.hotend-0.set-point").unwrap(), 0.0);
}

#[test]
fn fan_feedforward_raises_the_heater_bias() {
    let mut with_fan = thermal();
    with_fan.fan_index = Some(0);
    with_fan.fan_bias_gain = 0.2;
    let mut cfg = base_config(vec![extruder(1.75, Some(with_fan))]);
    cfg.machine.num_fans = 1;

    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);
    sim.set("temp.hotend-0.measured", SignalValue::Float(20.0))
        .unwrap();
    power_up(&mut sim);

    sim.step(DT);
    assert_eq!(sim.get_f64("temp.hotend-0.bias").unwrap(), 0.0);

    // Fan at full speed: bias = pwm × gain.
    sim.set("fan.0.pwm", SignalValue::Float(1.0)).unwrap();
    sim.step(DT);
    assert!((sim.get_f64("temp.hotend-0.bias").unwrap() - 0.2).abs() < 1e-12);
}

#[test]
fn gantry_limit_is_the_or_of_both_joints() {
    let mut cfg = base_config(vec![extruder(1.75, None)]);
    cfg.axes[0].gantry_joints = 2;
    cfg.axes[0].home_offsets = vec![0.0, 0.5];

    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);

    sim.step(DT);
    assert!(!sim.get_bit("axis.x.limit-min").unwrap());

    // Either joint's raw switch must stop the whole axis.
    sim.set("axis.x.joint-1.limit-min-sw", SignalValue::Bit(true))
        .unwrap();
    sim.step(DT);
    assert!(sim.get_bit("axis.x.limit-min").unwrap());

    sim.set("axis.x.joint-1.limit-min-sw", SignalValue::Bit(false))
        .unwrap();
    sim.set("axis.x.joint-0.limit-min-sw", SignalValue::Bit(true))
        .unwrap();
    sim.step(DT);
    assert!(sim.get_bit("axis.x.limit-min").unwrap());
}

#[test]
fn gantry_follower_tracks_with_home_offset() {
    let mut cfg = base_config(vec![extruder(1.75, None)]);
    cfg.axes[0].gantry_joints = 2;
    cfg.axes[0].home_offsets = vec![0.0, 0.5];

    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);
    power_up(&mut sim);

    sim.set("axis.x.pos-cmd", SignalValue::Float(10.0)).unwrap();
    sim.run(2, DT);
    assert_eq!(sim.get_f64("axis.x.joint-0.pos-cmd").unwrap(), 10.0);
    assert_eq!(sim.get_f64("axis.x.joint-1.pos-cmd").unwrap(), 10.5);

    // Shared homing: either switch homes the axis.
    assert!(!sim.get_bit("axis.x.home").unwrap());
    sim.set("axis.x.joint-1.home-sw", SignalValue::Bit(true))
        .unwrap();
    sim.step(DT);
    assert!(sim.get_bit("axis.x.home").unwrap());
}

#[test]
fn standby_mux_switches_the_active_command() {
    let cfg = base_config(vec![extruder(1.75, Some(thermal()))]);
    let topo = synthesize(&cfg).unwrap();
    let mut sim = Simulator::new(&topo);
    sim.set("temp.hotend-0.measured", SignalValue::Float(20.0))
        .unwrap();
    power_up(&mut sim);

    sim.set("temp.hotend-0.set-point", SignalValue::Float(240.0))
        .unwrap();
    sim.step(DT);
    assert_eq!(sim.get_f64("temp.hotend-0.command").unwrap(), 240.0);

    // Idle tool drops to the configured standby setpoint.
    sim.set("temp.hotend-0.standby-active", SignalValue::Bit(true))
        .unwrap();
    sim.step(DT);
    assert_eq!(sim.get_f64("temp.hotend-0.command").unwrap(), 150.0);
}
