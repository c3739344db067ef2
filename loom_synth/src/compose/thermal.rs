//! Temperature-loop synthesizer.
//!
//! Wires one closed-loop heater controller per named channel (one per
//! extruder hotend, one for a heated bed). Each channel gets, in order:
//!
//! 1. a setpoint reset zeroing the requested temperature on the machine
//!    estop-reset edge, so a cleared estop never resumes heating at a
//!    stale setpoint
//! 2. optional fan feed-forward: `fan_pwm × fan_bias_gain` added to the
//!    configured PID bias, compensating convective loss
//! 3. the PID block itself
//! 4. a `[0, max_output]` clamp producing the heater PWM
//! 5. an in-range window (`setpoint ± range_error`) against the
//!    measurement
//! 6. an absolute sensor sanity window (`[limit_min, limit_max]`)
//! 7. an AND-reduced no-error chain feeding a latching 500 ms fault latch
//! 8. an `active` comparator on the PID output
//!
//! Every channel's error latch is independent: one channel's fault never
//! clears without an explicit reset, even if its temperature recovers.

use loom_common::consts::{FAULT_DEBOUNCE_MS, HEATER_ACTIVE_THRESHOLD};
use loom_common::machine::ThermalConfig;
use loom_common::signal::{SignalKind, SignalValue};
use tracing::debug;

use crate::catalog::{BlockType, PinRole};
use crate::compose::estop::{synthesize_latch, LatchSite, SafetyLatchSpec};
use crate::error::SynthResult;
use crate::topology::{SignalHandle, ThreadId, TopologyBuilder};

/// Signals produced by [`synthesize_temperature_loop`].
#[derive(Debug, Clone, Copy)]
pub struct ThermalOutputs {
    /// Requested temperature, zeroed on estop reset.
    pub set_point: SignalHandle,
    /// Active command after standby selection.
    pub command: SignalHandle,
    /// Sensor measurement (driven by the hardware layer).
    pub measured: SignalHandle,
    /// Clamped heater duty in `[0, max_output]`.
    pub pwm: SignalHandle,
    /// Measurement within `setpoint ± range_error`.
    pub in_range: SignalHandle,
    /// Measurement within the absolute sensor sanity window.
    pub in_limit: SignalHandle,
    /// Latched channel fault — true until reset with the fault cleared.
    pub error: SignalHandle,
    /// Channel currently calling for heat.
    pub active: SignalHandle,
}

/// Expand one heater channel into its control loop.
///
/// `name` is the channel name ("hotend-0", "bed"); signals live under
/// `temp.{name}`. `fan_pwm` enables the feed-forward path; `hardware_ok`
/// joins the no-error reduction when the heater has a separate hardware
/// health input.
pub fn synthesize_temperature_loop(
    b: &mut TopologyBuilder,
    thread: ThreadId,
    name: &str,
    cfg: &ThermalConfig,
    enable: &SignalHandle,
    estop_reset: &SignalHandle,
    fan_pwm: Option<&SignalHandle>,
    hardware_ok: Option<&SignalHandle>,
) -> SynthResult<ThermalOutputs> {
    let prefix = format!("temp.{name}");

    // 1. Requested temperature, zeroed when the estop chain is reset.
    let set_point = b.new_signal_with_initial(
        &format!("{prefix}.set-point"),
        SignalKind::Float,
        Some(SignalValue::Float(0.0)),
    )?;
    let reset_block = b.new_block(
        BlockType::SetpointReset,
        &format!("{prefix}.set-point-reset"),
        thread,
    )?;
    b.link(reset_block, PinRole::Trigger, estop_reset)?;
    b.set_constant(reset_block, PinRole::ResetValue, SignalValue::Float(0.0))?;
    b.link(reset_block, PinRole::Target, &set_point)?;

    // Standby selection: idle tools drop to the standby setpoint.
    let standby = b.new_signal_with_initial(
        &format!("{prefix}.standby"),
        SignalKind::Float,
        Some(SignalValue::Float(cfg.standby)),
    )?;
    let standby_active = b.new_signal(&format!("{prefix}.standby-active"), SignalKind::Bit)?;
    let command = b.new_signal(&format!("{prefix}.command"), SignalKind::Float)?;
    let standby_mux = b.new_block(
        BlockType::Mux2 {
            kind: SignalKind::Float,
        },
        &format!("{prefix}.standby-mux"),
        thread,
    )?;
    b.link(standby_mux, PinRole::In(0), &set_point)?;
    b.link(standby_mux, PinRole::In(1), &standby)?;
    b.link(standby_mux, PinRole::Sel, &standby_active)?;
    b.link(standby_mux, PinRole::Out, &command)?;

    let measured = b.new_signal(&format!("{prefix}.measured"), SignalKind::Float)?;

    // 2. Feed-forward bias. With a fan: bias + fan_pwm × gain via a
    //    summer. Without: the configured bias, unmodified, as a constant.
    let pid = b.new_block(BlockType::Pid, &format!("{prefix}.pid"), thread)?;
    match fan_pwm {
        Some(fan_pwm) => {
            let bias = b.new_signal(&format!("{prefix}.bias"), SignalKind::Float)?;
            let summer = b.new_block(BlockType::Sum2, &format!("{prefix}.fan-bias"), thread)?;
            b.link(summer, PinRole::In(0), fan_pwm)?;
            b.set_constant(summer, PinRole::Gain0, SignalValue::Float(cfg.fan_bias_gain))?;
            b.set_constant(summer, PinRole::In(1), SignalValue::Float(cfg.bias))?;
            b.set_constant(summer, PinRole::Gain1, SignalValue::Float(1.0))?;
            b.link(summer, PinRole::Out, &bias)?;
            b.link(pid, PinRole::Bias, &bias)?;
        }
        None => {
            b.set_constant(pid, PinRole::Bias, SignalValue::Float(cfg.bias))?;
        }
    }

    // 3. The PID block.
    let pid_out = b.new_signal(&format!("{prefix}.pid-out"), SignalKind::Float)?;
    b.link(pid, PinRole::Enable, enable)?;
    b.link(pid, PinRole::Command, &command)?;
    b.link(pid, PinRole::Feedback, &measured)?;
    b.set_constant(pid, PinRole::Pgain, SignalValue::Float(cfg.p_gain))?;
    b.set_constant(pid, PinRole::Igain, SignalValue::Float(cfg.i_gain))?;
    b.set_constant(pid, PinRole::Dgain, SignalValue::Float(cfg.d_gain))?;
    b.set_constant(pid, PinRole::MaxOutput, SignalValue::Float(cfg.max_output))?;
    b.set_constant(pid, PinRole::MaxErrorI, SignalValue::Float(cfg.max_error_i))?;
    b.link(pid, PinRole::Output, &pid_out)?;

    // 4. PWM clamp — negative duty is not meaningful for a resistive
    //    heater.
    let pwm = b.new_signal(&format!("{prefix}.pwm"), SignalKind::Float)?;
    let clamp = b.new_block(BlockType::Limit1, &format!("{prefix}.pwm-clamp"), thread)?;
    b.link(clamp, PinRole::In(0), &pid_out)?;
    b.set_constant(clamp, PinRole::Min, SignalValue::Float(0.0))?;
    b.set_constant(clamp, PinRole::Max, SignalValue::Float(cfg.max_output))?;
    b.link(clamp, PinRole::Out, &pwm)?;

    // 5. In-range window: command ± range_error.
    let range_min = b.new_signal(&format!("{prefix}.range-min"), SignalKind::Float)?;
    let range_max = b.new_signal(&format!("{prefix}.range-max"), SignalKind::Float)?;
    for (signal, gain) in [(&range_min, -1.0), (&range_max, 1.0)] {
        let label = if gain < 0.0 { "min" } else { "max" };
        let summer = b.new_block(
            BlockType::Sum2,
            &format!("{prefix}.range-{label}-sum"),
            thread,
        )?;
        b.link(summer, PinRole::In(0), &command)?;
        b.set_constant(summer, PinRole::Gain0, SignalValue::Float(1.0))?;
        b.set_constant(summer, PinRole::In(1), SignalValue::Float(cfg.range_error))?;
        b.set_constant(summer, PinRole::Gain1, SignalValue::Float(gain))?;
        b.link(summer, PinRole::Out, signal)?;
    }
    let in_range = b.new_signal(&format!("{prefix}.in-range"), SignalKind::Bit)?;
    let range_check = b.new_block(BlockType::Wcomp, &format!("{prefix}.range-check"), thread)?;
    b.link(range_check, PinRole::In(0), &measured)?;
    b.link(range_check, PinRole::Min, &range_min)?;
    b.link(range_check, PinRole::Max, &range_max)?;
    b.link(range_check, PinRole::Out, &in_range)?;

    // 6. Absolute sensor sanity window — catches a disconnected or
    //    shorted thermistor regardless of setpoint.
    let in_limit = b.new_signal(&format!("{prefix}.in-limit"), SignalKind::Bit)?;
    let limit_check = b.new_block(BlockType::Wcomp, &format!("{prefix}.limit-check"), thread)?;
    b.link(limit_check, PinRole::In(0), &measured)?;
    b.set_constant(limit_check, PinRole::Min, SignalValue::Float(cfg.limit_min))?;
    b.set_constant(limit_check, PinRole::Max, SignalValue::Float(cfg.limit_max))?;
    b.link(limit_check, PinRole::Out, &in_limit)?;

    // 7. No-error reduction → inverted → latching fault capture.
    let thermistor_ok = b.new_signal_with_initial(
        &format!("{prefix}.thermistor-ok"),
        SignalKind::Bit,
        Some(SignalValue::Bit(true)),
    )?;
    let mut ok_sources = vec![thermistor_ok, in_limit];
    if let Some(hardware_ok) = hardware_ok {
        ok_sources.push(*hardware_ok);
    }
    let no_error = b.new_signal(&format!("{prefix}.no-error"), SignalKind::Bit)?;
    let reducer = b.new_block(
        BlockType::And {
            inputs: ok_sources.len(),
        },
        &format!("{prefix}.no-error-and"),
        thread,
    )?;
    for (i, source) in ok_sources.iter().enumerate() {
        b.link(reducer, PinRole::In(i as u8), source)?;
    }
    b.link(reducer, PinRole::Out, &no_error)?;

    let error_in = b.new_signal(&format!("{prefix}.error-in"), SignalKind::Bit)?;
    let inverter = b.new_block(BlockType::Not, &format!("{prefix}.invert-ok"), thread)?;
    b.link(inverter, PinRole::In(0), &no_error)?;
    b.link(inverter, PinRole::Out, &error_in)?;

    let channel_ok = b.new_signal(&format!("{prefix}.ok"), SignalKind::Bit)?;
    let latch = synthesize_latch(
        b,
        thread,
        SafetyLatchSpec {
            name: &prefix,
            ok_in: None,
            fault_in: Some(&error_in),
            reset: estop_reset,
            ok_out: &channel_ok,
            site: LatchSite::SubsystemFault {
                threshold_ms: FAULT_DEBOUNCE_MS,
                latching: true,
            },
        },
    )?;

    // 8. Active flag: heater currently calling for heat.
    let active = b.new_signal(&format!("{prefix}.active"), SignalKind::Bit)?;
    let active_check = b.new_block(BlockType::Comp, &format!("{prefix}.active-check"), thread)?;
    b.set_constant(
        active_check,
        PinRole::In(0),
        SignalValue::Float(HEATER_ACTIVE_THRESHOLD),
    )?;
    b.link(active_check, PinRole::In(1), &pid_out)?;
    b.set_constant(active_check, PinRole::Hyst, SignalValue::Float(0.0))?;
    b.link(active_check, PinRole::Out, &active)?;

    debug!(channel = name, fan = fan_pwm.is_some(), "synthesized temperature loop");
    Ok(ThermalOutputs {
        set_point,
        command,
        measured,
        pwm,
        in_range,
        in_limit,
        error: latch.fault_out,
        active,
    })
}
