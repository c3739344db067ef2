//! Block catalog — the fixed vocabulary of realtime function blocks.
//!
//! Every block type declares a fixed, typed pin signature: a set of
//! `PinRole`s, each with a direction and a signal kind. The wiring engine
//! checks every link against this signature, so a pin can never be
//! addressed by a misspelled string or linked to the wrong kind.
//!
//! The vocabulary mirrors the classic realtime component set: logic gates,
//! comparators, summers, limiters, multiplexers, PID, fault latches,
//! watchdogs, step generators, and the gantry coupler.

use core::fmt;

use loom_common::signal::{PinDir, SignalKind};

// ─── PinRole ────────────────────────────────────────────────────────

/// Typed pin addressing within a block instance.
///
/// Indexed variants (`In(n)`, `ChannelIn(n)`, ...) address the repeated
/// pins of variable-arity blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinRole {
    // ── Generic data pins ──
    /// Indexed data input (`in0`, `in1`, ...).
    In(u8),
    /// Single data output.
    Out,
    /// Indexed data output of a demultiplexer (`out0`, `out1`, ...).
    Selected(u8),
    /// Integer select input of a mux/demux.
    Sel,

    // ── Summer / comparator parameters ──
    Gain0,
    Gain1,
    Min,
    Max,
    Hyst,

    // ── PID ──
    Command,
    Feedback,
    Bias,
    Output,
    Enable,
    Pgain,
    Igain,
    Dgain,
    MaxOutput,
    MaxErrorI,

    // ── Latches ──
    OkIn,
    FaultIn,
    Reset,
    OkOut,
    FaultOut,
    /// Charge-pump square wave, toggling while the latch is OK.
    WatchdogDrive,
    Debounce,
    Latching,

    // ── Watchdog ──
    ChannelIn(u8),
    Timeout(u8),

    // ── Setpoint reset ──
    Trigger,
    ResetValue,
    Target,

    // ── Step generator ──
    PositionCmd,
    VelocityCmd,
    PositionFb,
    Scale,
    MaxVel,
    MaxAccel,
    StepLen,
    StepSpace,
    DirSetup,
    DirHold,

    // ── Gantry coupler ──
    JointCmd(u8),
    JointOffset(u8),
    JointHome(u8),
    HomeOut,
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In(i) => write!(f, "in{i}"),
            Self::Out => write!(f, "out"),
            Self::Selected(i) => write!(f, "out{i}"),
            Self::Sel => write!(f, "sel"),
            Self::Gain0 => write!(f, "gain0"),
            Self::Gain1 => write!(f, "gain1"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Hyst => write!(f, "hyst"),
            Self::Command => write!(f, "command"),
            Self::Feedback => write!(f, "feedback"),
            Self::Bias => write!(f, "bias"),
            Self::Output => write!(f, "output"),
            Self::Enable => write!(f, "enable"),
            Self::Pgain => write!(f, "p-gain"),
            Self::Igain => write!(f, "i-gain"),
            Self::Dgain => write!(f, "d-gain"),
            Self::MaxOutput => write!(f, "max-output"),
            Self::MaxErrorI => write!(f, "max-error-i"),
            Self::OkIn => write!(f, "ok-in"),
            Self::FaultIn => write!(f, "fault-in"),
            Self::Reset => write!(f, "reset"),
            Self::OkOut => write!(f, "ok-out"),
            Self::FaultOut => write!(f, "fault-out"),
            Self::WatchdogDrive => write!(f, "wd"),
            Self::Debounce => write!(f, "debounce"),
            Self::Latching => write!(f, "latching"),
            Self::ChannelIn(i) => write!(f, "channel-in{i}"),
            Self::Timeout(i) => write!(f, "timeout{i}"),
            Self::Trigger => write!(f, "trigger"),
            Self::ResetValue => write!(f, "reset-value"),
            Self::Target => write!(f, "target"),
            Self::PositionCmd => write!(f, "position-cmd"),
            Self::VelocityCmd => write!(f, "velocity-cmd"),
            Self::PositionFb => write!(f, "position-fb"),
            Self::Scale => write!(f, "scale"),
            Self::MaxVel => write!(f, "max-vel"),
            Self::MaxAccel => write!(f, "max-accel"),
            Self::StepLen => write!(f, "steplen"),
            Self::StepSpace => write!(f, "stepspace"),
            Self::DirSetup => write!(f, "dirsetup"),
            Self::DirHold => write!(f, "dirhold"),
            Self::JointCmd(i) => write!(f, "joint{i}-pos-cmd"),
            Self::JointOffset(i) => write!(f, "joint{i}-offset"),
            Self::JointHome(i) => write!(f, "joint{i}-home"),
            Self::HomeOut => write!(f, "home-out"),
        }
    }
}

// ─── BlockType ──────────────────────────────────────────────────────

/// Step generator operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepgenMode {
    /// Follows a position command (machine joints).
    Position,
    /// Integrates a velocity command (extruders).
    Velocity,
}

/// The fixed block vocabulary.
///
/// Variable-arity types carry their size; two instances of `Or { inputs: 3 }`
/// share a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockType {
    /// Boolean inverter.
    Not,
    /// N-input AND.
    And { inputs: usize },
    /// N-input OR.
    Or { inputs: usize },
    /// N-to-1 multiplexer with an integer selector.
    Mux { kind: SignalKind, inputs: usize },
    /// 2-to-1 multiplexer with a boolean selector.
    Mux2 { kind: SignalKind },
    /// 1-of-N decoder: `out[i]` true iff `sel == i`.
    Select { outputs: usize },
    /// Two-input summer: `out = in0*gain0 + in1*gain1`.
    Sum2,
    /// Two-input comparator with hysteresis: true when `in1 > in0`.
    Comp,
    /// Window comparator: true when `min < in < max`.
    Wcomp,
    /// First-order limiter (output clamp).
    Limit1,
    /// PID controller with bias input and integral/output clamps.
    Pid,
    /// Debounced, optionally latching fault latch for subsystem faults.
    SafetyLatch,
    /// Machine-estop latch: trips immediately, resets on a rising edge.
    EstopLatch,
    /// N-channel staleness supervisor.
    Watchdog { channels: usize },
    /// Zeroes a setpoint signal on a rising trigger edge.
    SetpointReset,
    /// Hardware step pulse generator.
    Stepgen { mode: StepgenMode },
    /// Multi-motor gantry coupler for one logical axis.
    Gantry { joints: usize },
}

/// One entry of a block type's pin signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinSpec {
    pub role: PinRole,
    pub dir: PinDir,
    pub kind: SignalKind,
}

const fn pin(role: PinRole, dir: PinDir, kind: SignalKind) -> PinSpec {
    PinSpec { role, dir, kind }
}

impl BlockType {
    /// Short type name for logs and instance naming.
    pub fn name(&self) -> String {
        match self {
            Self::Not => "not".to_string(),
            Self::And { inputs } => format!("and{inputs}"),
            Self::Or { inputs } => format!("or{inputs}"),
            Self::Mux { kind, inputs } => format!("mux{inputs}-{kind}"),
            Self::Mux2 { kind } => format!("mux2-{kind}"),
            Self::Select { outputs } => format!("select{outputs}"),
            Self::Sum2 => "sum2".to_string(),
            Self::Comp => "comp".to_string(),
            Self::Wcomp => "wcomp".to_string(),
            Self::Limit1 => "limit1".to_string(),
            Self::Pid => "pid".to_string(),
            Self::SafetyLatch => "safety-latch".to_string(),
            Self::EstopLatch => "estop-latch".to_string(),
            Self::Watchdog { channels } => format!("watchdog{channels}"),
            Self::SetpointReset => "setpoint-reset".to_string(),
            Self::Stepgen {
                mode: StepgenMode::Position,
            } => "stepgen-pos".to_string(),
            Self::Stepgen {
                mode: StepgenMode::Velocity,
            } => "stepgen-vel".to_string(),
            Self::Gantry { joints } => format!("gantry{joints}"),
        }
    }

    /// Arity sanity check, run at instantiation.
    ///
    /// Returns a human-readable reason on failure. A zero-input gate or
    /// zero-channel watchdog is never valid; composers are expected to
    /// skip the block entirely in those cases.
    pub fn check_arity(&self) -> Result<(), String> {
        match *self {
            Self::And { inputs } | Self::Or { inputs } if inputs < 2 => {
                Err(format!("logic gate needs at least 2 inputs, got {inputs}"))
            }
            Self::Mux { inputs, .. } if inputs < 1 => {
                Err("mux needs at least 1 input".to_string())
            }
            Self::Mux { kind, .. } | Self::Mux2 { kind } if kind == SignalKind::U32 => {
                Err("u32 mux is not part of the catalog".to_string())
            }
            Self::Select { outputs } if outputs < 2 => {
                Err(format!("select needs at least 2 outputs, got {outputs}"))
            }
            Self::Watchdog { channels } if channels < 1 => {
                Err("watchdog needs at least 1 channel".to_string())
            }
            Self::Gantry { joints } if joints < 2 => {
                Err(format!("gantry needs at least 2 joints, got {joints}"))
            }
            _ => Ok(()),
        }
    }

    /// The fixed, typed pin signature of this block type.
    pub fn pins(&self) -> Vec<PinSpec> {
        use PinDir::{In as I, InOut, Out as O};
        use SignalKind::{Bit, Float, S32, U32};

        match *self {
            Self::Not => vec![pin(PinRole::In(0), I, Bit), pin(PinRole::Out, O, Bit)],

            Self::And { inputs } | Self::Or { inputs } => {
                let mut pins: Vec<PinSpec> = (0..inputs)
                    .map(|i| pin(PinRole::In(i as u8), I, Bit))
                    .collect();
                pins.push(pin(PinRole::Out, O, Bit));
                pins
            }

            Self::Mux { kind, inputs } => {
                let mut pins: Vec<PinSpec> = (0..inputs)
                    .map(|i| pin(PinRole::In(i as u8), I, kind))
                    .collect();
                pins.push(pin(PinRole::Sel, I, S32));
                pins.push(pin(PinRole::Out, O, kind));
                pins
            }

            Self::Mux2 { kind } => vec![
                pin(PinRole::In(0), I, kind),
                pin(PinRole::In(1), I, kind),
                pin(PinRole::Sel, I, Bit),
                pin(PinRole::Out, O, kind),
            ],

            Self::Select { outputs } => {
                let mut pins = vec![pin(PinRole::Sel, I, S32)];
                pins.extend((0..outputs).map(|i| pin(PinRole::Selected(i as u8), O, Bit)));
                pins
            }

            Self::Sum2 => vec![
                pin(PinRole::In(0), I, Float),
                pin(PinRole::In(1), I, Float),
                pin(PinRole::Gain0, I, Float),
                pin(PinRole::Gain1, I, Float),
                pin(PinRole::Out, O, Float),
            ],

            Self::Comp => vec![
                pin(PinRole::In(0), I, Float),
                pin(PinRole::In(1), I, Float),
                pin(PinRole::Hyst, I, Float),
                pin(PinRole::Out, O, Bit),
            ],

            Self::Wcomp => vec![
                pin(PinRole::In(0), I, Float),
                pin(PinRole::Min, I, Float),
                pin(PinRole::Max, I, Float),
                pin(PinRole::Out, O, Bit),
            ],

            Self::Limit1 => vec![
                pin(PinRole::In(0), I, Float),
                pin(PinRole::Min, I, Float),
                pin(PinRole::Max, I, Float),
                pin(PinRole::Out, O, Float),
            ],

            Self::Pid => vec![
                pin(PinRole::Enable, I, Bit),
                pin(PinRole::Command, I, Float),
                pin(PinRole::Feedback, I, Float),
                pin(PinRole::Bias, I, Float),
                pin(PinRole::Pgain, I, Float),
                pin(PinRole::Igain, I, Float),
                pin(PinRole::Dgain, I, Float),
                pin(PinRole::MaxOutput, I, Float),
                pin(PinRole::MaxErrorI, I, Float),
                pin(PinRole::Output, O, Float),
            ],

            Self::SafetyLatch => vec![
                pin(PinRole::OkIn, I, Bit),
                pin(PinRole::FaultIn, I, Bit),
                pin(PinRole::Reset, I, Bit),
                pin(PinRole::Debounce, I, U32),
                pin(PinRole::Latching, I, Bit),
                pin(PinRole::OkOut, O, Bit),
                pin(PinRole::FaultOut, O, Bit),
            ],

            Self::EstopLatch => vec![
                pin(PinRole::OkIn, I, Bit),
                pin(PinRole::FaultIn, I, Bit),
                pin(PinRole::Reset, I, Bit),
                pin(PinRole::OkOut, O, Bit),
                pin(PinRole::FaultOut, O, Bit),
                pin(PinRole::WatchdogDrive, O, Bit),
            ],

            Self::Watchdog { channels } => {
                let mut pins = Vec::with_capacity(channels * 2 + 2);
                for i in 0..channels {
                    pins.push(pin(PinRole::ChannelIn(i as u8), I, Bit));
                    pins.push(pin(PinRole::Timeout(i as u8), I, U32));
                }
                pins.push(pin(PinRole::Enable, I, Bit));
                pins.push(pin(PinRole::OkOut, O, Bit));
                pins
            }

            Self::SetpointReset => vec![
                pin(PinRole::Trigger, I, Bit),
                pin(PinRole::ResetValue, I, Float),
                pin(PinRole::Target, InOut, Float),
            ],

            Self::Stepgen { mode } => {
                let cmd = match mode {
                    StepgenMode::Position => pin(PinRole::PositionCmd, I, Float),
                    StepgenMode::Velocity => pin(PinRole::VelocityCmd, I, Float),
                };
                vec![
                    pin(PinRole::Enable, I, Bit),
                    cmd,
                    pin(PinRole::Scale, I, Float),
                    pin(PinRole::MaxVel, I, Float),
                    pin(PinRole::MaxAccel, I, Float),
                    pin(PinRole::StepLen, I, U32),
                    pin(PinRole::StepSpace, I, U32),
                    pin(PinRole::DirSetup, I, U32),
                    pin(PinRole::DirHold, I, U32),
                    pin(PinRole::PositionFb, O, Float),
                ]
            }

            Self::Gantry { joints } => {
                let mut pins = vec![pin(PinRole::PositionCmd, I, Float)];
                for i in 0..joints {
                    pins.push(pin(PinRole::JointCmd(i as u8), O, Float));
                    pins.push(pin(PinRole::JointOffset(i as u8), I, Float));
                    pins.push(pin(PinRole::JointHome(i as u8), I, Bit));
                }
                pins.push(pin(PinRole::HomeOut, O, Bit));
                pins
            }
        }
    }

    /// Number of data inputs for variable-arity types (mux/gate/watchdog).
    pub fn fan_in(&self) -> Option<usize> {
        match *self {
            Self::And { inputs } | Self::Or { inputs } | Self::Mux { inputs, .. } => Some(inputs),
            Self::Mux2 { .. } => Some(2),
            Self::Watchdog { channels } => Some(channels),
            _ => None,
        }
    }
}
