//! Topology builder — signal registry, block instantiator, wiring engine.
//!
//! `TopologyBuilder` owns everything created during a synthesis pass:
//! named typed signals, block instances with their pin bindings, and the
//! execution threads blocks are scheduled into. It is passed by mutable
//! reference through the composer call tree; its lifetime is exactly the
//! build pass. `freeze()` converts it into an immutable [`Topology`] for
//! the realtime engine.
//!
//! Validation rules, all first-error-aborts:
//! - signal, block, and thread names are globally unique
//! - a link must match the pin's declared kind
//! - a signal has at most one Out-direction driver (single-writer);
//!   readers and InOut writers are unbounded
//! - constants bind to input pins only
//!
//! Not verified here: evaluation order within a thread. A block reads the
//! previous cycle's value of any signal produced later in the same thread —
//! that is a property of registration order the caller controls.

use std::collections::HashMap;

use loom_common::signal::{PinDir, SignalKind, SignalValue};
use tracing::{debug, trace};

use crate::catalog::{BlockType, PinRole};
use crate::error::{SynthError, SynthResult};

// ─── Identifiers ────────────────────────────────────────────────────

/// Index of a signal in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(pub(crate) u32);

/// Index of a block instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) u32);

/// Index of an execution thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub(crate) u32);

/// Handle to a registered signal, carrying its kind.
///
/// Handles are cheap to copy and are the only way composers refer to
/// signals — kind mismatches surface at wiring time with both ends named.
#[derive(Debug, Clone, Copy)]
pub struct SignalHandle {
    pub(crate) id: SignalId,
    pub(crate) kind: SignalKind,
}

impl SignalHandle {
    /// Registry index.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Declared kind.
    pub fn kind(&self) -> SignalKind {
        self.kind
    }
}

// ─── Definitions ────────────────────────────────────────────────────

/// A registered signal.
#[derive(Debug, Clone)]
pub struct SignalDef {
    pub name: String,
    pub kind: SignalKind,
    /// Initial value at engine load (None = kind default).
    pub initial: Option<SignalValue>,
    /// The one Out-direction pin driving this signal, if any.
    pub driver: Option<(BlockId, PinRole)>,
    /// All In/InOut pins attached to this signal.
    pub readers: Vec<(BlockId, PinRole)>,
}

/// Binding state of a pin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PinBinding {
    /// Unlinked — inputs read their kind's default value.
    Unbound,
    /// Linked to a signal.
    Signal(SignalId),
    /// Bound to a constant literal (inputs only).
    Constant(SignalValue),
}

/// One pin of a block instance.
#[derive(Debug, Clone)]
pub struct PinDef {
    pub role: PinRole,
    pub dir: PinDir,
    pub kind: SignalKind,
    pub binding: PinBinding,
}

/// An instantiated block.
#[derive(Debug, Clone)]
pub struct BlockDef {
    pub name: String,
    pub block_type: BlockType,
    pub thread: ThreadId,
    pub pins: Vec<PinDef>,
}

impl BlockDef {
    /// Look up a pin by role.
    pub fn pin(&self, role: PinRole) -> Option<&PinDef> {
        self.pins.iter().find(|p| p.role == role)
    }

    fn pin_mut(&mut self, role: PinRole) -> Option<&mut PinDef> {
        self.pins.iter_mut().find(|p| p.role == role)
    }
}

/// A named periodic schedule of block instances.
#[derive(Debug, Clone)]
pub struct ThreadDef {
    pub name: String,
    pub period_ns: u32,
    /// Evaluation order = registration order.
    pub blocks: Vec<BlockId>,
}

// ─── TopologyBuilder ────────────────────────────────────────────────

/// Mutable registry populated during one synthesis pass.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    signals: Vec<SignalDef>,
    blocks: Vec<BlockDef>,
    threads: Vec<ThreadDef>,
    signal_index: HashMap<String, SignalId>,
    block_index: HashMap<String, BlockId>,
    thread_index: HashMap<String, ThreadId>,
}

impl TopologyBuilder {
    /// Create an empty builder.
    ///
    /// Rebuilding a configuration means starting from a fresh builder;
    /// an existing registry is never mutated in place.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a named execution thread.
    pub fn new_thread(&mut self, name: &str, period_ns: u32) -> SynthResult<ThreadId> {
        if self.thread_index.contains_key(name) {
            return Err(SynthError::DuplicateThread(name.to_string()));
        }
        let id = ThreadId(self.threads.len() as u32);
        self.threads.push(ThreadDef {
            name: name.to_string(),
            period_ns,
            blocks: Vec::new(),
        });
        self.thread_index.insert(name.to_string(), id);
        debug!(thread = name, period_ns, "created execution thread");
        Ok(id)
    }

    /// Register a new signal. Fails on duplicate names — a second creation
    /// is rejected, never silently merged.
    pub fn new_signal(&mut self, name: &str, kind: SignalKind) -> SynthResult<SignalHandle> {
        self.new_signal_with_initial(name, kind, None)
    }

    /// Register a new signal with an explicit initial value.
    pub fn new_signal_with_initial(
        &mut self,
        name: &str,
        kind: SignalKind,
        initial: Option<SignalValue>,
    ) -> SynthResult<SignalHandle> {
        if self.signal_index.contains_key(name) {
            return Err(SynthError::DuplicateSignal(name.to_string()));
        }
        let id = SignalId(self.signals.len() as u32);
        self.signals.push(SignalDef {
            name: name.to_string(),
            kind,
            initial,
            driver: None,
            readers: Vec::new(),
        });
        self.signal_index.insert(name.to_string(), id);
        trace!(signal = name, %kind, "registered signal");
        Ok(SignalHandle { id, kind })
    }

    /// Instantiate a block and schedule it into a thread.
    ///
    /// The instance gets the full pin signature of its type, all pins
    /// unbound. Evaluation order within the thread is registration order.
    pub fn new_block(
        &mut self,
        block_type: BlockType,
        name: &str,
        thread: ThreadId,
    ) -> SynthResult<BlockId> {
        if self.block_index.contains_key(name) {
            return Err(SynthError::DuplicateBlock(name.to_string()));
        }
        if self.threads.get(thread.0 as usize).is_none() {
            return Err(SynthError::UnknownThread(name.to_string()));
        }
        if let Err(reason) = block_type.check_arity() {
            return Err(SynthError::InvalidArity {
                block: name.to_string(),
                reason,
            });
        }

        let pins = block_type
            .pins()
            .into_iter()
            .map(|spec| PinDef {
                role: spec.role,
                dir: spec.dir,
                kind: spec.kind,
                binding: PinBinding::Unbound,
            })
            .collect();

        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockDef {
            name: name.to_string(),
            block_type,
            thread,
            pins,
        });
        self.block_index.insert(name.to_string(), id);
        self.threads[thread.0 as usize].blocks.push(id);
        trace!(block = name, "instantiated block");
        Ok(id)
    }

    /// Link a block pin to a signal.
    ///
    /// Enforces kind equality and the single-writer rule: an Out pin can
    /// only attach to a signal without a driver. InOut pins attach as
    /// readers — they may write at runtime but do not own the signal.
    pub fn link(&mut self, block: BlockId, role: PinRole, signal: &SignalHandle) -> SynthResult<()> {
        let signal_def = &self.signals[signal.id.0 as usize];
        let block_def = &self.blocks[block.0 as usize];
        let pin = block_def
            .pin(role)
            .ok_or_else(|| SynthError::UnknownPin {
                block: block_def.name.clone(),
                role,
            })?;

        if pin.kind != signal_def.kind {
            return Err(SynthError::KindMismatch {
                block: block_def.name.clone(),
                role,
                pin_kind: pin.kind,
                signal: signal_def.name.clone(),
                signal_kind: signal_def.kind,
            });
        }
        if pin.binding != PinBinding::Unbound {
            return Err(SynthError::PinAlreadyBound {
                block: block_def.name.clone(),
                role,
            });
        }
        if pin.dir == PinDir::Out {
            if let Some((driver_block, driver_pin)) = signal_def.driver {
                return Err(SynthError::DoubleDriver {
                    signal: signal_def.name.clone(),
                    driver_block: self.blocks[driver_block.0 as usize].name.clone(),
                    driver_pin,
                });
            }
        }

        // Checks passed — record both sides.
        let dir = pin.dir;
        self.blocks[block.0 as usize]
            .pin_mut(role)
            .unwrap()
            .binding = PinBinding::Signal(signal.id);
        let signal_def = &mut self.signals[signal.id.0 as usize];
        if dir == PinDir::Out {
            signal_def.driver = Some((block, role));
        } else {
            signal_def.readers.push((block, role));
        }
        Ok(())
    }

    /// Bind a constant literal to an input pin.
    ///
    /// Used for tunable but not runtime-driven parameters: gains, limits,
    /// step timings.
    pub fn set_constant(
        &mut self,
        block: BlockId,
        role: PinRole,
        value: SignalValue,
    ) -> SynthResult<()> {
        let block_def = &self.blocks[block.0 as usize];
        let pin = block_def
            .pin(role)
            .ok_or_else(|| SynthError::UnknownPin {
                block: block_def.name.clone(),
                role,
            })?;

        if pin.dir == PinDir::Out {
            return Err(SynthError::ConstantOnOutput {
                block: block_def.name.clone(),
                role,
            });
        }
        if pin.kind != value.kind() {
            return Err(SynthError::ConstantKindMismatch {
                block: block_def.name.clone(),
                role,
                pin_kind: pin.kind,
                value_kind: value.kind(),
            });
        }
        if pin.binding != PinBinding::Unbound {
            return Err(SynthError::PinAlreadyBound {
                block: block_def.name.clone(),
                role,
            });
        }

        self.blocks[block.0 as usize]
            .pin_mut(role)
            .unwrap()
            .binding = PinBinding::Constant(value);
        Ok(())
    }

    /// Number of registered signals.
    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    /// Number of instantiated blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Freeze the registry into an immutable topology.
    pub fn freeze(self) -> Topology {
        debug!(
            signals = self.signals.len(),
            blocks = self.blocks.len(),
            threads = self.threads.len(),
            "topology frozen"
        );
        Topology {
            signals: self.signals,
            blocks: self.blocks,
            threads: self.threads,
            signal_index: self.signal_index,
            block_index: self.block_index,
        }
    }
}

// ─── Topology ───────────────────────────────────────────────────────

/// The closed, immutable control topology produced by a synthesis pass.
///
/// Consumed by the external realtime engine (and by the reference
/// evaluator in [`crate::sim`]); never mutated after construction.
#[derive(Debug)]
pub struct Topology {
    signals: Vec<SignalDef>,
    blocks: Vec<BlockDef>,
    threads: Vec<ThreadDef>,
    signal_index: HashMap<String, SignalId>,
    block_index: HashMap<String, BlockId>,
}

impl Topology {
    /// All signals, in registration order.
    pub fn signals(&self) -> &[SignalDef] {
        &self.signals
    }

    /// All block instances, in registration order.
    pub fn blocks(&self) -> &[BlockDef] {
        &self.blocks
    }

    /// All execution threads, in creation order.
    pub fn threads(&self) -> &[ThreadDef] {
        &self.threads
    }

    /// Look up a signal by id.
    pub fn signal(&self, id: SignalId) -> &SignalDef {
        &self.signals[id.0 as usize]
    }

    /// Look up a block by id.
    pub fn block(&self, id: BlockId) -> &BlockDef {
        &self.blocks[id.0 as usize]
    }

    /// Look up a signal by name.
    pub fn signal_named(&self, name: &str) -> Option<(SignalId, &SignalDef)> {
        let id = *self.signal_index.get(name)?;
        Some((id, &self.signals[id.0 as usize]))
    }

    /// Look up a block by name.
    pub fn block_named(&self, name: &str) -> Option<&BlockDef> {
        let id = *self.block_index.get(name)?;
        Some(&self.blocks[id.0 as usize])
    }

    /// Blocks matching a predicate on their type.
    pub fn blocks_where<'a>(
        &'a self,
        mut predicate: impl FnMut(&BlockType) -> bool + 'a,
    ) -> impl Iterator<Item = &'a BlockDef> + 'a {
        self.blocks.iter().filter(move |b| predicate(&b.block_type))
    }

    /// Number of registered signals.
    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    /// Number of instantiated blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder_with_thread() -> (TopologyBuilder, ThreadId) {
        let mut b = TopologyBuilder::new();
        let t = b.new_thread("servo-thread", 1_000_000).unwrap();
        (b, t)
    }

    #[test]
    fn duplicate_signal_rejected() {
        let (mut b, _) = builder_with_thread();
        b.new_signal("estop.ok", SignalKind::Bit).unwrap();
        let err = b.new_signal("estop.ok", SignalKind::Bit).unwrap_err();
        assert!(matches!(err, SynthError::DuplicateSignal(name) if name == "estop.ok"));
    }

    #[test]
    fn duplicate_block_rejected() {
        let (mut b, t) = builder_with_thread();
        b.new_block(BlockType::Not, "inv", t).unwrap();
        let err = b.new_block(BlockType::Not, "inv", t).unwrap_err();
        assert!(matches!(err, SynthError::DuplicateBlock(_)));
    }

    #[test]
    fn duplicate_thread_rejected() {
        let (mut b, _) = builder_with_thread();
        let err = b.new_thread("servo-thread", 1_000_000).unwrap_err();
        assert!(matches!(err, SynthError::DuplicateThread(_)));
    }

    #[test]
    fn kind_mismatch_rejected() {
        let (mut b, t) = builder_with_thread();
        let sig = b.new_signal("pos", SignalKind::Float).unwrap();
        let inv = b.new_block(BlockType::Not, "inv", t).unwrap();
        let err = b.link(inv, PinRole::In(0), &sig).unwrap_err();
        assert!(matches!(err, SynthError::KindMismatch { .. }));
    }

    #[test]
    fn single_writer_enforced() {
        let (mut b, t) = builder_with_thread();
        let sig = b.new_signal("flag", SignalKind::Bit).unwrap();
        let inv_a = b.new_block(BlockType::Not, "inv-a", t).unwrap();
        let inv_b = b.new_block(BlockType::Not, "inv-b", t).unwrap();

        b.link(inv_a, PinRole::Out, &sig).unwrap();
        let err = b.link(inv_b, PinRole::Out, &sig).unwrap_err();
        assert!(matches!(
            err,
            SynthError::DoubleDriver { driver_block, .. } if driver_block == "inv-a"
        ));
    }

    #[test]
    fn many_readers_allowed() {
        let (mut b, t) = builder_with_thread();
        let sig = b.new_signal("flag", SignalKind::Bit).unwrap();
        for i in 0..4 {
            let inv = b.new_block(BlockType::Not, &format!("inv-{i}"), t).unwrap();
            b.link(inv, PinRole::In(0), &sig).unwrap();
        }
        let topo = b.freeze();
        let (_, def) = topo.signal_named("flag").unwrap();
        assert_eq!(def.readers.len(), 4);
        assert!(def.driver.is_none());
    }

    #[test]
    fn inout_pin_is_not_a_driver() {
        let (mut b, t) = builder_with_thread();
        let set = b.new_signal("temp.set", SignalKind::Float).unwrap();
        let reset = b.new_block(BlockType::SetpointReset, "set-reset", t).unwrap();
        b.link(reset, PinRole::Target, &set).unwrap();

        // A real driver can still attach after the InOut link.
        let sum = b.new_block(BlockType::Sum2, "sum", t).unwrap();
        b.link(sum, PinRole::Out, &set).unwrap();

        let topo = b.freeze();
        let (_, def) = topo.signal_named("temp.set").unwrap();
        assert_eq!(def.driver, Some((BlockId(1), PinRole::Out)));
        assert_eq!(def.readers.len(), 1);
    }

    #[test]
    fn constant_on_output_rejected() {
        let (mut b, t) = builder_with_thread();
        let inv = b.new_block(BlockType::Not, "inv", t).unwrap();
        let err = b
            .set_constant(inv, PinRole::Out, SignalValue::Bit(false))
            .unwrap_err();
        assert!(matches!(err, SynthError::ConstantOnOutput { .. }));
    }

    #[test]
    fn constant_kind_checked() {
        let (mut b, t) = builder_with_thread();
        let pid = b.new_block(BlockType::Pid, "pid", t).unwrap();
        let err = b
            .set_constant(pid, PinRole::Pgain, SignalValue::Bit(true))
            .unwrap_err();
        assert!(matches!(err, SynthError::ConstantKindMismatch { .. }));
        b.set_constant(pid, PinRole::Pgain, SignalValue::Float(0.3))
            .unwrap();
    }

    #[test]
    fn pin_rebind_rejected() {
        let (mut b, t) = builder_with_thread();
        let sig = b.new_signal("flag", SignalKind::Bit).unwrap();
        let inv = b.new_block(BlockType::Not, "inv", t).unwrap();
        b.link(inv, PinRole::In(0), &sig).unwrap();
        let err = b
            .set_constant(inv, PinRole::In(0), SignalValue::Bit(true))
            .unwrap_err();
        assert!(matches!(err, SynthError::PinAlreadyBound { .. }));
    }

    #[test]
    fn unknown_pin_rejected() {
        let (mut b, t) = builder_with_thread();
        let sig = b.new_signal("x", SignalKind::Float).unwrap();
        let inv = b.new_block(BlockType::Not, "inv", t).unwrap();
        let err = b.link(inv, PinRole::Command, &sig).unwrap_err();
        assert!(matches!(err, SynthError::UnknownPin { .. }));
    }

    #[test]
    fn invalid_arity_rejected_at_instantiation() {
        let (mut b, t) = builder_with_thread();
        let err = b
            .new_block(BlockType::Watchdog { channels: 0 }, "wd", t)
            .unwrap_err();
        assert!(matches!(err, SynthError::InvalidArity { .. }));
    }

    #[test]
    fn thread_records_registration_order() {
        let (mut b, t) = builder_with_thread();
        let first = b.new_block(BlockType::Not, "first", t).unwrap();
        let second = b.new_block(BlockType::Not, "second", t).unwrap();
        let topo = b.freeze();
        assert_eq!(topo.threads()[0].blocks, vec![first, second]);
    }

    #[test]
    fn freeze_preserves_lookups() {
        let (mut b, t) = builder_with_thread();
        let sig = b.new_signal("estop.ok", SignalKind::Bit).unwrap();
        let inv = b.new_block(BlockType::Not, "inv", t).unwrap();
        b.link(inv, PinRole::In(0), &sig).unwrap();

        let topo = b.freeze();
        assert_eq!(topo.signal_count(), 1);
        assert_eq!(topo.block_count(), 1);
        assert!(topo.signal_named("estop.ok").is_some());
        assert!(topo.block_named("inv").is_some());
        assert!(topo.block_named("missing").is_none());
        assert_eq!(
            topo.blocks_where(|t| matches!(t, BlockType::Not)).count(),
            1
        );
    }
}
