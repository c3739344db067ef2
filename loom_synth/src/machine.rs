//! Machine synthesis driver.
//!
//! Walks a validated [`MachineConfig`] and builds the full control
//! topology leaf-up: joints and gantries, extruder step generators with
//! N-way parameter routing, temperature loops, fans, watchdog supervision,
//! and finally the machine-wide estop chain that aggregates every fault
//! source into one latching disable.
//!
//! Evaluation-order note: the estop latch is registered last, so its ok
//! signal reaches consumers one cycle late. That single-cycle lag is
//! inherent to the cyclic enable/fault topology and harmless at servo
//! rates.

use loom_common::machine::{AxisConfig, MachineConfig, StepgenConfig};
use loom_common::signal::{SignalKind, SignalValue};
use tracing::{debug, info};

use crate::catalog::{BlockType, PinRole, StepgenMode};
use crate::compose::enable::build_enable_chain;
use crate::compose::estop::{synthesize_latch, LatchSite, SafetyLatchSpec};
use crate::compose::gantry::{synchronize_gantry, GantryJoint};
use crate::compose::mux::{route_per_unit_signals, select_lines, PerUnitSignalSpec, RouterKind};
use crate::compose::thermal::synthesize_temperature_loop;
use crate::compose::watchdog::{build_watchdog, WatchdogChannel};
use crate::error::SynthResult;
use crate::topology::{SignalHandle, ThreadId, Topology, TopologyBuilder};

/// Name of the single servo-rate execution thread.
pub const SERVO_THREAD: &str = "servo-thread";

/// Build the complete control topology for one machine.
///
/// Validates the configuration first; any violation aborts before a
/// single signal is registered.
pub fn synthesize(cfg: &MachineConfig) -> SynthResult<Topology> {
    cfg.validate()?;
    info!(
        machine = %cfg.machine.name,
        axes = cfg.axes.len(),
        extruders = cfg.extruders.len(),
        fans = cfg.machine.num_fans,
        "starting topology synthesis"
    );

    let mut b = TopologyBuilder::new();
    let servo = b.new_thread(SERVO_THREAD, cfg.machine.servo_period_ns)?;

    // Global estop scaffolding. The ok signal is created up front so every
    // enable consumer can read it; the latch drives it at the end.
    let estop_ok = b.new_signal("estop.ok", SignalKind::Bit)?;
    let estop_reset = b.new_signal("estop.reset", SignalKind::Bit)?;
    let user_ok = b.new_signal_with_initial(
        "estop.user-ok",
        SignalKind::Bit,
        Some(SignalValue::Bit(true)),
    )?;

    // ── Joints and gantries ─────────────────────────────────────────
    for axis in &cfg.axes {
        build_axis(&mut b, servo, axis, &estop_ok)?;
    }

    // ── Extruders ───────────────────────────────────────────────────
    let selector = b.new_signal("extruder.select", SignalKind::S32)?;
    build_extruders(&mut b, servo, cfg, &estop_ok, &selector)?;

    // ── Fans ────────────────────────────────────────────────────────
    let mut fan_pwm = Vec::with_capacity(cfg.machine.num_fans);
    for i in 0..cfg.machine.num_fans {
        let pwm = b.new_signal_with_initial(
            &format!("fan.{i}.pwm"),
            SignalKind::Float,
            Some(SignalValue::Float(0.0)),
        )?;
        fan_pwm.push(pwm);
    }

    // ── Temperature loops ───────────────────────────────────────────
    let mut faults: Vec<SignalHandle> = Vec::new();
    for (i, extruder) in cfg.extruders.iter().enumerate() {
        if let Some(thermal) = &extruder.thermal {
            let fan = thermal.fan_index.map(|f| &fan_pwm[f]);
            let loop_out = synthesize_temperature_loop(
                &mut b,
                servo,
                &format!("hotend-{i}"),
                thermal,
                &estop_ok,
                &estop_reset,
                fan,
                None,
            )?;
            faults.push(loop_out.error);
        }
    }
    if let Some(bed) = &cfg.bed {
        let loop_out = synthesize_temperature_loop(
            &mut b, servo, "bed", bed, &estop_ok, &estop_reset, None, None,
        )?;
        faults.push(loop_out.error);
    }

    // ── Watchdog supervision ────────────────────────────────────────
    // Hardware heartbeats toggle whenever the boards are alive, estop or
    // not, so supervision stays enabled independently of the estop chain:
    // a dead board must block the estop reset, not be masked by it.
    if !cfg.watchdog_channels.is_empty() {
        let supervision = b.new_signal_with_initial(
            "watchdog.enable",
            SignalKind::Bit,
            Some(SignalValue::Bit(true)),
        )?;
        let mut channels = Vec::with_capacity(cfg.watchdog_channels.len());
        for channel in &cfg.watchdog_channels {
            let signal =
                b.new_signal(&format!("watchdog.{}.input", channel.name), SignalKind::Bit)?;
            channels.push(WatchdogChannel {
                signal,
                timeout_ms: channel.timeout_ms,
            });
        }
        let watchdog = build_watchdog(&mut b, servo, "watchdog", &channels, &supervision, true)?;
        if let Some(error) = watchdog.error {
            faults.push(error);
        }
    }

    // ── Estop chain ─────────────────────────────────────────────────
    let chain = build_enable_chain(&mut b, servo, "estop", &estop_ok, &faults)?;
    synthesize_latch(
        &mut b,
        servo,
        SafetyLatchSpec {
            name: "estop",
            ok_in: Some(&user_ok),
            fault_in: chain.fault.as_ref(),
            reset: &estop_reset,
            ok_out: &estop_ok,
            site: LatchSite::MachineEstop,
        },
    )?;

    info!(
        signals = b.signal_count(),
        blocks = b.block_count(),
        fault_sources = faults.len(),
        "topology synthesis complete"
    );
    Ok(b.freeze())
}

// ─── Joints ─────────────────────────────────────────────────────────

/// Wire one axis: a single joint, or a gantry of synchronized joints.
fn build_axis(
    b: &mut TopologyBuilder,
    servo: ThreadId,
    axis: &AxisConfig,
    enable: &SignalHandle,
) -> SynthResult<()> {
    let prefix = format!("axis.{}", axis.letter);
    let position_cmd = b.new_signal(&format!("{prefix}.pos-cmd"), SignalKind::Float)?;

    if axis.is_gantry() {
        let joints: Vec<GantryJoint> = (0..axis.gantry_joints)
            .map(|i| -> SynthResult<GantryJoint> {
                Ok(GantryJoint {
                    home_switch: b
                        .new_signal(&format!("{prefix}.joint-{i}.home-sw"), SignalKind::Bit)?,
                    limit_min: b
                        .new_signal(&format!("{prefix}.joint-{i}.limit-min-sw"), SignalKind::Bit)?,
                    limit_max: b
                        .new_signal(&format!("{prefix}.joint-{i}.limit-max-sw"), SignalKind::Bit)?,
                })
            })
            .collect::<SynthResult<_>>()?;

        let gantry = synchronize_gantry(
            b,
            servo,
            &prefix,
            &position_cmd,
            &joints,
            &axis.home_offsets,
        )?;
        for (i, cmd) in gantry.joint_cmds.iter().enumerate() {
            build_stepgen(
                b,
                servo,
                &format!("{prefix}.joint-{i}"),
                &axis.stepgen,
                StepgenMode::Position,
                enable,
                cmd,
            )?;
        }
    } else {
        // Single motor: the raw switches serve as the axis-level signals,
        // no combining stage needed.
        b.new_signal(&format!("{prefix}.home-sw"), SignalKind::Bit)?;
        b.new_signal(&format!("{prefix}.limit-min-sw"), SignalKind::Bit)?;
        b.new_signal(&format!("{prefix}.limit-max-sw"), SignalKind::Bit)?;
        build_stepgen(
            b,
            servo,
            &prefix,
            &axis.stepgen,
            StepgenMode::Position,
            enable,
            &position_cmd,
        )?;
    }

    debug!(axis = %axis.letter, gantry = axis.is_gantry(), "wired axis");
    Ok(())
}

/// Instantiate one step generator fragment with its constant parameters.
fn build_stepgen(
    b: &mut TopologyBuilder,
    servo: ThreadId,
    prefix: &str,
    cfg: &StepgenConfig,
    mode: StepgenMode,
    enable: &SignalHandle,
    command: &SignalHandle,
) -> SynthResult<()> {
    let stepgen = b.new_block(
        BlockType::Stepgen { mode },
        &format!("{prefix}.stepgen"),
        servo,
    )?;
    b.link(stepgen, PinRole::Enable, enable)?;
    let cmd_role = match mode {
        StepgenMode::Position => PinRole::PositionCmd,
        StepgenMode::Velocity => PinRole::VelocityCmd,
    };
    b.link(stepgen, cmd_role, command)?;
    b.set_constant(stepgen, PinRole::Scale, SignalValue::Float(cfg.scale))?;
    b.set_constant(stepgen, PinRole::MaxVel, SignalValue::Float(cfg.max_velocity))?;
    b.set_constant(
        stepgen,
        PinRole::MaxAccel,
        SignalValue::Float(cfg.max_acceleration),
    )?;
    b.set_constant(stepgen, PinRole::StepLen, SignalValue::U32(cfg.steplen_ns))?;
    b.set_constant(stepgen, PinRole::StepSpace, SignalValue::U32(cfg.stepspace_ns))?;
    b.set_constant(stepgen, PinRole::DirSetup, SignalValue::U32(cfg.dirsetup_ns))?;
    b.set_constant(stepgen, PinRole::DirHold, SignalValue::U32(cfg.dirhold_ns))?;

    let feedback = b.new_signal(&format!("{prefix}.pos-fb"), SignalKind::Float)?;
    b.link(stepgen, PinRole::PositionFb, &feedback)?;
    Ok(())
}

// ─── Extruders ──────────────────────────────────────────────────────

/// Wire the extruder bank: per-unit step generators, selector-gated
/// enables, and the shared parameter mux table.
fn build_extruders(
    b: &mut TopologyBuilder,
    servo: ThreadId,
    cfg: &MachineConfig,
    enable: &SignalHandle,
    selector: &SignalHandle,
) -> SynthResult<()> {
    let units = cfg.extruders.len();

    // Selected lines gate each extruder's enable off the shared selector —
    // only the active unit extrudes, but all share one velocity command.
    // A single extruder is always selected; the decoder would be a
    // 1-output no-op, so it is skipped.
    let selected = if units > 1 {
        Some(select_lines(b, servo, "extruder", units, selector)?)
    } else {
        None
    };
    let velocity_cmd = b.new_signal("extruder.shared.vel-cmd", SignalKind::Float)?;

    for (i, extruder) in cfg.extruders.iter().enumerate() {
        let unit_enable = match &selected {
            Some(selected) => {
                let unit_enable =
                    b.new_signal(&format!("extruder-{i}.enable"), SignalKind::Bit)?;
                let gate = b.new_block(
                    BlockType::And { inputs: 2 },
                    &format!("extruder-{i}.enable-and"),
                    servo,
                )?;
                b.link(gate, PinRole::In(0), enable)?;
                b.link(gate, PinRole::In(1), &selected[i])?;
                b.link(gate, PinRole::Out, &unit_enable)?;
                unit_enable
            }
            None => *enable,
        };

        build_stepgen(
            b,
            servo,
            &format!("extruder-{i}"),
            &extruder.stepgen,
            StepgenMode::Velocity,
            &unit_enable,
            &velocity_cmd,
        )?;
    }

    // Shared parameter table: one mux per row, keyed by the selector.
    let table = extruder_signal_table(cfg);
    route_per_unit_signals(b, servo, &table, units, "extruder", "extruder.shared", selector)?;

    debug!(units, "wired extruder bank");
    Ok(())
}

/// The per-extruder routed parameter table.
///
/// Each row becomes one mux; `initials: None` rows have no external
/// binding and start at the kind default.
fn extruder_signal_table(cfg: &MachineConfig) -> Vec<PerUnitSignalSpec> {
    let floats = |pick: fn(&loom_common::machine::ExtruderConfig) -> f64| {
        Some(
            cfg.extruders
                .iter()
                .map(|e| SignalValue::Float(pick(e)))
                .collect::<Vec<_>>(),
        )
    };
    vec![
        PerUnitSignalSpec {
            name: "jog-velocity",
            kind: RouterKind::Analog,
            initials: floats(|e| e.jog_velocity),
        },
        PerUnitSignalSpec {
            name: "jog-direction",
            kind: RouterKind::Bit,
            initials: None,
        },
        PerUnitSignalSpec {
            name: "filament-dia",
            kind: RouterKind::Analog,
            initials: floats(|e| e.filament_diameter),
        },
        PerUnitSignalSpec {
            name: "retract-vel",
            kind: RouterKind::Analog,
            initials: floats(|e| e.retract_velocity),
        },
        PerUnitSignalSpec {
            name: "retract-len",
            kind: RouterKind::Analog,
            initials: floats(|e| e.retract_length),
        },
    ]
}

/// Number of rows in the shared extruder parameter table.
pub const EXTRUDER_TABLE_ROWS: usize = 5;
