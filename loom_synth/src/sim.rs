//! Reference evaluator for frozen topologies.
//!
//! A deterministic, offline interpreter of the control graph: threads are
//! evaluated in creation order, blocks in registration order, once per
//! `step()`. A block reading a signal produced later in the same thread
//! sees the previous cycle's value — exactly the hazard the topology layer
//! documents.
//!
//! This is validation tooling: tests drive undriven input signals, step
//! the graph, and observe outputs. Production execution belongs to the
//! external realtime engine.

use loom_common::signal::{SignalKind, SignalValue};
use thiserror::Error;

use crate::catalog::{BlockType, PinRole, StepgenMode};
use crate::topology::{BlockDef, PinBinding, Topology};

/// Error type for the evaluator's signal access.
#[derive(Debug, Error)]
pub enum SimError {
    /// No signal with that name in the topology.
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    /// Write value kind differs from the signal kind.
    #[error("signal '{name}' is {signal_kind}, got {value_kind}")]
    KindMismatch {
        name: String,
        signal_kind: SignalKind,
        value_kind: SignalKind,
    },
}

// ─── Per-block runtime state ────────────────────────────────────────

#[derive(Debug, Clone)]
enum BlockState {
    Stateless,
    Comp {
        out: bool,
    },
    Pid {
        integral: f64,
        prev_error: f64,
        primed: bool,
    },
    SafetyLatch {
        tripped: bool,
        fault_ms: f64,
        prev_reset: bool,
    },
    EstopLatch {
        ok: bool,
        fault: bool,
        prev_reset: bool,
        drive: bool,
    },
    Watchdog {
        prev: Vec<bool>,
        since_ms: Vec<f64>,
    },
    SetpointReset {
        prev_trigger: bool,
    },
    Stepgen {
        position: f64,
    },
}

impl BlockState {
    fn for_block(block: &BlockDef) -> Self {
        match block.block_type {
            BlockType::Comp => Self::Comp { out: false },
            BlockType::Pid => Self::Pid {
                integral: 0.0,
                prev_error: 0.0,
                primed: false,
            },
            BlockType::SafetyLatch => Self::SafetyLatch {
                tripped: false,
                fault_ms: 0.0,
                prev_reset: false,
            },
            BlockType::EstopLatch => Self::EstopLatch {
                ok: false,
                fault: false,
                prev_reset: false,
                drive: false,
            },
            BlockType::Watchdog { channels } => Self::Watchdog {
                prev: vec![false; channels],
                since_ms: vec![0.0; channels],
            },
            BlockType::SetpointReset => Self::SetpointReset {
                prev_trigger: false,
            },
            BlockType::Stepgen { .. } => Self::Stepgen { position: 0.0 },
            _ => Self::Stateless,
        }
    }
}

// ─── Simulator ──────────────────────────────────────────────────────

/// Interprets a frozen [`Topology`] cycle by cycle.
pub struct Simulator<'a> {
    topo: &'a Topology,
    values: Vec<SignalValue>,
    states: Vec<BlockState>,
}

impl<'a> Simulator<'a> {
    /// Create an evaluator with every signal at its initial value.
    pub fn new(topo: &'a Topology) -> Self {
        let values = topo
            .signals()
            .iter()
            .map(|s| s.initial.unwrap_or(SignalValue::default_for(s.kind)))
            .collect();
        let states = topo.blocks().iter().map(BlockState::for_block).collect();
        Self {
            topo,
            values,
            states,
        }
    }

    /// Write a signal by name. The kind must match exactly.
    pub fn set(&mut self, name: &str, value: SignalValue) -> Result<(), SimError> {
        let (id, def) = self
            .topo
            .signal_named(name)
            .ok_or_else(|| SimError::UnknownSignal(name.to_string()))?;
        if def.kind != value.kind() {
            return Err(SimError::KindMismatch {
                name: name.to_string(),
                signal_kind: def.kind,
                value_kind: value.kind(),
            });
        }
        self.values[id.0 as usize] = value;
        Ok(())
    }

    /// Read a signal by name.
    pub fn get(&self, name: &str) -> Result<SignalValue, SimError> {
        let (id, _) = self
            .topo
            .signal_named(name)
            .ok_or_else(|| SimError::UnknownSignal(name.to_string()))?;
        Ok(self.values[id.0 as usize])
    }

    /// Boolean view of a signal.
    pub fn get_bit(&self, name: &str) -> Result<bool, SimError> {
        Ok(self.get(name)?.as_bit())
    }

    /// Float view of a signal.
    pub fn get_f64(&self, name: &str) -> Result<f64, SimError> {
        Ok(self.get(name)?.as_f64())
    }

    /// Evaluate one control cycle of `dt_ms` milliseconds.
    pub fn step(&mut self, dt_ms: f64) {
        let topo = self.topo;
        for thread in topo.threads() {
            for block_id in &thread.blocks {
                self.eval_block(block_id.0 as usize, dt_ms);
            }
        }
    }

    /// Evaluate `cycles` consecutive steps.
    pub fn run(&mut self, cycles: usize, dt_ms: f64) {
        for _ in 0..cycles {
            self.step(dt_ms);
        }
    }

    // ── Pin access ──────────────────────────────────────────────────

    fn read_pin(&self, block: &BlockDef, role: PinRole) -> SignalValue {
        match block.pin(role) {
            Some(pin) => match pin.binding {
                PinBinding::Unbound => SignalValue::default_for(pin.kind),
                PinBinding::Signal(id) => self.values[id.0 as usize],
                PinBinding::Constant(value) => value,
            },
            None => SignalValue::Bit(false),
        }
    }

    fn read_bit(&self, block: &BlockDef, role: PinRole) -> bool {
        self.read_pin(block, role).as_bit()
    }

    fn read_f64(&self, block: &BlockDef, role: PinRole) -> f64 {
        self.read_pin(block, role).as_f64()
    }

    fn write_pin(&mut self, block: &BlockDef, role: PinRole, value: SignalValue) {
        if let Some(pin) = block.pin(role) {
            if let PinBinding::Signal(id) = pin.binding {
                self.values[id.0 as usize] = value;
            }
        }
    }

    // ── Block transfer functions ────────────────────────────────────

    fn eval_block(&mut self, idx: usize, dt_ms: f64) {
        // `topo` outlives `self`'s borrows, so the block reference stays
        // valid across the mutable signal writes below.
        let topo = self.topo;
        let block = &topo.blocks()[idx];
        let dt_s = dt_ms / 1000.0;

        match block.block_type {
            BlockType::Not => {
                let out = !self.read_bit(block, PinRole::In(0));
                self.write_pin(block, PinRole::Out, SignalValue::Bit(out));
            }

            BlockType::And { inputs } => {
                let out = (0..inputs).all(|i| self.read_bit(block, PinRole::In(i as u8)));
                self.write_pin(block, PinRole::Out, SignalValue::Bit(out));
            }

            BlockType::Or { inputs } => {
                let out = (0..inputs).any(|i| self.read_bit(block, PinRole::In(i as u8)));
                self.write_pin(block, PinRole::Out, SignalValue::Bit(out));
            }

            BlockType::Mux { inputs, .. } => {
                // Out-of-range selection clamps to the valid index range.
                let sel = self.read_pin(block, PinRole::Sel).as_s32();
                let idx = sel.clamp(0, inputs as i32 - 1) as u8;
                let out = self.read_pin(block, PinRole::In(idx));
                self.write_pin(block, PinRole::Out, out);
            }

            BlockType::Mux2 { .. } => {
                let sel = self.read_bit(block, PinRole::Sel);
                let out = self.read_pin(block, PinRole::In(u8::from(sel)));
                self.write_pin(block, PinRole::Out, out);
            }

            BlockType::Select { outputs } => {
                // No clamp: out-of-range selection asserts no line.
                let sel = self.read_pin(block, PinRole::Sel).as_s32();
                for i in 0..outputs {
                    let hit = sel == i as i32;
                    self.write_pin(block, PinRole::Selected(i as u8), SignalValue::Bit(hit));
                }
            }

            BlockType::Sum2 => {
                let out = self.read_f64(block, PinRole::In(0))
                    * self.read_f64(block, PinRole::Gain0)
                    + self.read_f64(block, PinRole::In(1))
                        * self.read_f64(block, PinRole::Gain1);
                self.write_pin(block, PinRole::Out, SignalValue::Float(out));
            }

            BlockType::Comp => {
                let in0 = self.read_f64(block, PinRole::In(0));
                let in1 = self.read_f64(block, PinRole::In(1));
                let hyst = self.read_f64(block, PinRole::Hyst);
                let BlockState::Comp { out } = &mut self.states[idx] else {
                    return;
                };
                if hyst > 0.0 {
                    if in1 > in0 + hyst / 2.0 {
                        *out = true;
                    } else if in1 < in0 - hyst / 2.0 {
                        *out = false;
                    }
                } else {
                    *out = in1 > in0;
                }
                let out = *out;
                self.write_pin(block, PinRole::Out, SignalValue::Bit(out));
            }

            BlockType::Wcomp => {
                let input = self.read_f64(block, PinRole::In(0));
                let min = self.read_f64(block, PinRole::Min);
                let max = self.read_f64(block, PinRole::Max);
                let out = min < input && input < max;
                self.write_pin(block, PinRole::Out, SignalValue::Bit(out));
            }

            BlockType::Limit1 => {
                let input = self.read_f64(block, PinRole::In(0));
                let min = self.read_f64(block, PinRole::Min);
                let max = self.read_f64(block, PinRole::Max);
                self.write_pin(block, PinRole::Out, SignalValue::Float(input.clamp(min, max)));
            }

            BlockType::Pid => self.eval_pid(idx, block, dt_s),

            BlockType::SafetyLatch => self.eval_safety_latch(idx, block, dt_ms),

            BlockType::EstopLatch => self.eval_estop_latch(idx, block),

            BlockType::Watchdog { channels } => self.eval_watchdog(idx, block, channels, dt_ms),

            BlockType::SetpointReset => {
                let trigger = self.read_bit(block, PinRole::Trigger);
                let value = self.read_pin(block, PinRole::ResetValue);
                let BlockState::SetpointReset { prev_trigger } = &mut self.states[idx] else {
                    return;
                };
                let rising = trigger && !*prev_trigger;
                *prev_trigger = trigger;
                if rising {
                    self.write_pin(block, PinRole::Target, value);
                }
            }

            BlockType::Stepgen { mode } => {
                let enable = self.read_bit(block, PinRole::Enable);
                let command = match mode {
                    StepgenMode::Position => self.read_f64(block, PinRole::PositionCmd),
                    StepgenMode::Velocity => self.read_f64(block, PinRole::VelocityCmd),
                };
                let BlockState::Stepgen { position } = &mut self.states[idx] else {
                    return;
                };
                if enable {
                    match mode {
                        // Ideal response: feedback tracks the command.
                        StepgenMode::Position => *position = command,
                        StepgenMode::Velocity => *position += command * dt_s,
                    }
                }
                let position = *position;
                self.write_pin(block, PinRole::PositionFb, SignalValue::Float(position));
            }

            BlockType::Gantry { joints } => {
                let cmd = self.read_f64(block, PinRole::PositionCmd);
                let mut any_home = false;
                for i in 0..joints {
                    let offset = self.read_f64(block, PinRole::JointOffset(i as u8));
                    self.write_pin(
                        block,
                        PinRole::JointCmd(i as u8),
                        SignalValue::Float(cmd + offset),
                    );
                    any_home |= self.read_bit(block, PinRole::JointHome(i as u8));
                }
                self.write_pin(block, PinRole::HomeOut, SignalValue::Bit(any_home));
            }
        }
    }

    fn eval_pid(&mut self, idx: usize, block: &BlockDef, dt_s: f64) {
        let enable = self.read_bit(block, PinRole::Enable);
        let command = self.read_f64(block, PinRole::Command);
        let feedback = self.read_f64(block, PinRole::Feedback);
        let bias = self.read_f64(block, PinRole::Bias);
        let p_gain = self.read_f64(block, PinRole::Pgain);
        let i_gain = self.read_f64(block, PinRole::Igain);
        let d_gain = self.read_f64(block, PinRole::Dgain);
        let max_output = self.read_f64(block, PinRole::MaxOutput);
        let max_error_i = self.read_f64(block, PinRole::MaxErrorI);

        let BlockState::Pid {
            integral,
            prev_error,
            primed,
        } = &mut self.states[idx]
        else {
            return;
        };

        if !enable || dt_s <= 0.0 {
            *integral = 0.0;
            *prev_error = 0.0;
            *primed = false;
            self.write_pin(block, PinRole::Output, SignalValue::Float(0.0));
            return;
        }

        let error = command - feedback;

        *integral += error * dt_s;
        let mut i_term = i_gain * *integral;
        if max_error_i > 0.0 && i_gain != 0.0 {
            // Bound the integral contribution and back-correct the
            // accumulator so it cannot wind up past the clamp.
            if i_term > max_error_i {
                i_term = max_error_i;
                *integral = max_error_i / i_gain;
            } else if i_term < -max_error_i {
                i_term = -max_error_i;
                *integral = -max_error_i / i_gain;
            }
        }

        let derivative = if *primed {
            (error - *prev_error) / dt_s
        } else {
            0.0
        };
        *prev_error = error;
        *primed = true;

        let mut output = bias + p_gain * error + i_term + d_gain * derivative;
        if max_output > 0.0 {
            output = output.clamp(-max_output, max_output);
        }
        self.write_pin(block, PinRole::Output, SignalValue::Float(output));
    }

    fn eval_safety_latch(&mut self, idx: usize, block: &BlockDef, dt_ms: f64) {
        let ok_in = self.read_bit(block, PinRole::OkIn);
        let fault_in = self.read_bit(block, PinRole::FaultIn);
        let reset = self.read_bit(block, PinRole::Reset);
        let debounce_ms = self.read_pin(block, PinRole::Debounce).as_u32() as f64;
        let latching = self.read_bit(block, PinRole::Latching);

        let BlockState::SafetyLatch {
            tripped,
            fault_ms,
            prev_reset,
        } = &mut self.states[idx]
        else {
            return;
        };

        if fault_in {
            *fault_ms += dt_ms;
        } else {
            *fault_ms = 0.0;
        }

        // Trip after continuous fault for the debounce window, or when the
        // upstream ok chain drops (no debounce on the chain itself).
        if !*tripped && (*fault_ms >= debounce_ms || !ok_in) {
            *tripped = true;
        }

        // Recover on a rising reset edge; a latching latch additionally
        // requires the fault to have cleared.
        let rising = reset && !*prev_reset;
        *prev_reset = reset;
        if *tripped && rising && ok_in && (!latching || !fault_in) {
            *tripped = false;
            *fault_ms = 0.0;
        }

        let tripped = *tripped;
        self.write_pin(block, PinRole::OkOut, SignalValue::Bit(!tripped));
        self.write_pin(block, PinRole::FaultOut, SignalValue::Bit(tripped));
    }

    fn eval_estop_latch(&mut self, idx: usize, block: &BlockDef) {
        let ok_in = self.read_bit(block, PinRole::OkIn);
        let fault_in = self.read_bit(block, PinRole::FaultIn);
        let reset = self.read_bit(block, PinRole::Reset);

        let BlockState::EstopLatch {
            ok,
            fault,
            prev_reset,
            drive,
        } = &mut self.states[idx]
        else {
            return;
        };

        let rising = reset && !*prev_reset;
        *prev_reset = reset;

        if ok_in && !fault_in {
            if rising {
                *ok = true;
                *fault = false;
            }
            // Charge pump runs while inputs are healthy; it freezes the
            // moment they are not, which external hardware detects.
            *drive = !*drive;
        } else {
            *ok = false;
            *fault = true;
        }

        let (ok, fault, drive) = (*ok, *fault, *drive);
        self.write_pin(block, PinRole::OkOut, SignalValue::Bit(ok));
        self.write_pin(block, PinRole::FaultOut, SignalValue::Bit(fault));
        self.write_pin(block, PinRole::WatchdogDrive, SignalValue::Bit(drive));
    }

    fn eval_watchdog(&mut self, idx: usize, block: &BlockDef, channels: usize, dt_ms: f64) {
        let enable = self.read_bit(block, PinRole::Enable);
        let inputs: Vec<bool> = (0..channels)
            .map(|i| self.read_bit(block, PinRole::ChannelIn(i as u8)))
            .collect();
        let timeouts: Vec<f64> = (0..channels)
            .map(|i| self.read_pin(block, PinRole::Timeout(i as u8)).as_u32() as f64)
            .collect();

        let BlockState::Watchdog { prev, since_ms } = &mut self.states[idx] else {
            return;
        };

        let mut all_fresh = true;
        for i in 0..channels {
            if inputs[i] != prev[i] {
                since_ms[i] = 0.0;
            } else {
                since_ms[i] += dt_ms;
            }
            prev[i] = inputs[i];
            if since_ms[i] >= timeouts[i] {
                all_fresh = false;
            }
        }

        let ok = enable && all_fresh;
        self.write_pin(block, PinRole::OkOut, SignalValue::Bit(ok));
    }
}
