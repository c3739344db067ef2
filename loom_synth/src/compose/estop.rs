//! Safety-latch synthesizer.
//!
//! Two latch primitives guard the machine:
//!
//! - `EstopLatch` — the whole-machine estop chain. No debounce: it trips
//!   the instant `fault-in` rises or `ok-in` drops, and recovers only on a
//!   rising edge of `reset` while inputs are healthy. It also drives a
//!   charge-pump square wave that halts on trip.
//! - `SafetyLatch` — per-subsystem fault capture. `fault-in` must be
//!   continuously true for the debounce threshold before the latch trips,
//!   rejecting transient glitches. With `latching = true`, reset is only
//!   honored once the fault has cleared.
//!
//! The call site picks the primitive through [`LatchSite`]; a subsystem
//! latch with a zero threshold fails synthesis rather than silently
//! becoming un-debounced.

use loom_common::signal::{SignalKind, SignalValue};
use tracing::debug;

use crate::catalog::{BlockType, PinRole};
use crate::error::{SynthError, SynthResult};
use crate::topology::{SignalHandle, ThreadId, TopologyBuilder};

/// Which latch primitive a call site needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchSite {
    /// Whole-machine estop: immediate reaction, no debounce.
    MachineEstop,
    /// Subsystem fault: debounced, optionally latching.
    SubsystemFault { threshold_ms: u32, latching: bool },
}

/// Inputs to the latch synthesizer.
#[derive(Debug, Clone, Copy)]
pub struct SafetyLatchSpec<'a> {
    /// Namespace for created signals and the block instance.
    pub name: &'a str,
    /// Upstream ok chain (true = healthy). `None` wires constant-true.
    pub ok_in: Option<&'a SignalHandle>,
    /// Fault source (true = trip). `None` wires constant-false — the
    /// "no fault input is permanently false" rule.
    pub fault_in: Option<&'a SignalHandle>,
    /// Operator reset, rising-edge sensitive.
    pub reset: &'a SignalHandle,
    /// Pre-created ok signal the latch will drive. Created by the caller
    /// so downstream consumers can wire to it before the latch exists.
    pub ok_out: &'a SignalHandle,
    /// Primitive selection and debounce policy.
    pub site: LatchSite,
}

/// Signals produced by [`synthesize_latch`].
#[derive(Debug, Clone, Copy)]
pub struct LatchOutputs {
    /// True while tripped — the public error signal of the subsystem.
    pub fault_out: SignalHandle,
    /// Charge-pump drive — machine estop only.
    pub watchdog_drive: Option<SignalHandle>,
}

/// Expand a latch spec into one latch block plus its wiring.
pub fn synthesize_latch(
    b: &mut TopologyBuilder,
    thread: ThreadId,
    spec: SafetyLatchSpec<'_>,
) -> SynthResult<LatchOutputs> {
    let name = spec.name;

    let (block_type, instance) = match spec.site {
        LatchSite::MachineEstop => (BlockType::EstopLatch, format!("{name}.latch")),
        LatchSite::SubsystemFault { threshold_ms, .. } => {
            if threshold_ms == 0 {
                return Err(SynthError::InvalidThreshold {
                    name: name.to_string(),
                    threshold_ms,
                });
            }
            (BlockType::SafetyLatch, format!("{name}.latch"))
        }
    };

    let latch = b.new_block(block_type, &instance, thread)?;

    match spec.ok_in {
        Some(ok_in) => b.link(latch, PinRole::OkIn, ok_in)?,
        None => b.set_constant(latch, PinRole::OkIn, SignalValue::Bit(true))?,
    }
    match spec.fault_in {
        Some(fault_in) => b.link(latch, PinRole::FaultIn, fault_in)?,
        None => b.set_constant(latch, PinRole::FaultIn, SignalValue::Bit(false))?,
    }
    b.link(latch, PinRole::Reset, spec.reset)?;

    if let LatchSite::SubsystemFault {
        threshold_ms,
        latching,
    } = spec.site
    {
        b.set_constant(latch, PinRole::Debounce, SignalValue::U32(threshold_ms))?;
        b.set_constant(latch, PinRole::Latching, SignalValue::Bit(latching))?;
    }

    let fault_out = b.new_signal(&format!("{name}.error"), SignalKind::Bit)?;
    b.link(latch, PinRole::OkOut, spec.ok_out)?;
    b.link(latch, PinRole::FaultOut, &fault_out)?;

    let watchdog_drive = if spec.site == LatchSite::MachineEstop {
        let wd = b.new_signal(&format!("{name}.charge-pump"), SignalKind::Bit)?;
        b.link(latch, PinRole::WatchdogDrive, &wd)?;
        Some(wd)
    } else {
        None
    };

    debug!(latch = %instance, site = ?spec.site, "synthesized safety latch");
    Ok(LatchOutputs {
        fault_out,
        watchdog_drive,
    })
}
