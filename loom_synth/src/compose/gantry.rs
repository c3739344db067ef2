//! Gantry synchronizer.
//!
//! Wires one logical axis to multiple joint-level control loops. The
//! gantry coupler fans the axis position command out to per-joint
//! commands (with a per-joint home offset for skew compensation) and
//! OR-reduces the joints' home switches into the axis home signal.
//! Limit switches are likewise OR-combined — either motor reaching a
//! limit must stop the whole axis.

use loom_common::signal::{SignalKind, SignalValue};
use tracing::debug;

use crate::catalog::{BlockType, PinRole};
use crate::error::SynthResult;
use crate::topology::{SignalHandle, ThreadId, TopologyBuilder};

/// Per-joint inputs to the synchronizer: the raw switch signals wired by
/// the joint builder.
#[derive(Debug, Clone, Copy)]
pub struct GantryJoint {
    pub home_switch: SignalHandle,
    pub limit_min: SignalHandle,
    pub limit_max: SignalHandle,
}

/// Signals produced by [`synchronize_gantry`].
#[derive(Debug, Clone)]
pub struct GantryOutputs {
    /// Per-joint position commands, offset-compensated.
    pub joint_cmds: Vec<SignalHandle>,
    /// OR of all joints' home switches.
    pub home: SignalHandle,
    /// OR of all joints' minimum limit switches.
    pub limit_min: SignalHandle,
    /// OR of all joints' maximum limit switches.
    pub limit_max: SignalHandle,
}

/// Wire the gantry coupler for one multi-motor axis.
///
/// `prefix` is the axis namespace (e.g. `"axis.x"`); `position_cmd` is the
/// axis-level command the external planner drives. `home_offsets`, when
/// non-empty, must have one entry per joint.
pub fn synchronize_gantry(
    b: &mut TopologyBuilder,
    thread: ThreadId,
    prefix: &str,
    position_cmd: &SignalHandle,
    joints: &[GantryJoint],
    home_offsets: &[f64],
) -> SynthResult<GantryOutputs> {
    let coupler = b.new_block(
        BlockType::Gantry {
            joints: joints.len(),
        },
        &format!("{prefix}.gantry"),
        thread,
    )?;
    b.link(coupler, PinRole::PositionCmd, position_cmd)?;

    let mut joint_cmds = Vec::with_capacity(joints.len());
    for (i, joint) in joints.iter().enumerate() {
        let cmd = b.new_signal(&format!("{prefix}.joint-{i}.pos-cmd"), SignalKind::Float)?;
        b.link(coupler, PinRole::JointCmd(i as u8), &cmd)?;
        let offset = home_offsets.get(i).copied().unwrap_or(0.0);
        b.set_constant(
            coupler,
            PinRole::JointOffset(i as u8),
            SignalValue::Float(offset),
        )?;
        b.link(coupler, PinRole::JointHome(i as u8), &joint.home_switch)?;
        joint_cmds.push(cmd);
    }

    let home = b.new_signal(&format!("{prefix}.home"), SignalKind::Bit)?;
    b.link(coupler, PinRole::HomeOut, &home)?;

    // Either motor on a limit stops both.
    let mut combine = |label: &str, pick: fn(&GantryJoint) -> SignalHandle| -> SynthResult<SignalHandle> {
        let combined = b.new_signal(&format!("{prefix}.limit-{label}"), SignalKind::Bit)?;
        let gate = b.new_block(
            BlockType::Or {
                inputs: joints.len(),
            },
            &format!("{prefix}.limit-{label}-or"),
            thread,
        )?;
        for (i, joint) in joints.iter().enumerate() {
            b.link(gate, PinRole::In(i as u8), &pick(joint))?;
        }
        b.link(gate, PinRole::Out, &combined)?;
        Ok(combined)
    };
    let limit_min = combine("min", |j| j.limit_min)?;
    let limit_max = combine("max", |j| j.limit_max)?;

    debug!(axis = prefix, joints = joints.len(), "synchronized gantry");
    Ok(GantryOutputs {
        joint_cmds,
        home,
        limit_min,
        limit_max,
    })
}
