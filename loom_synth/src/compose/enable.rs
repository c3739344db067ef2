//! Enable-chain composer.
//!
//! Combines a primary boolean enable with any number of fault sources:
//! one `Not` block produces the inverted enable for consumers that want
//! "not enabled" semantics, and one N-input OR collapses the fault sources
//! into a single aggregated fault signal.

use loom_common::signal::SignalKind;
use tracing::debug;

use crate::catalog::{BlockType, PinRole};
use crate::error::SynthResult;
use crate::topology::{SignalHandle, ThreadId, TopologyBuilder};

/// Signals produced by [`build_enable_chain`].
#[derive(Debug, Clone, Copy)]
pub struct EnableChain {
    /// Inverted primary enable.
    pub not_enabled: SignalHandle,
    /// OR of all fault sources. `None` when no sources were given —
    /// consumers treat the absence as permanently false rather than
    /// wiring a degenerate zero-input gate.
    pub fault: Option<SignalHandle>,
}

/// Build the enable/fault aggregation chain.
///
/// `prefix` namespaces the created signals and blocks (e.g. `"estop"`).
pub fn build_enable_chain(
    b: &mut TopologyBuilder,
    thread: ThreadId,
    prefix: &str,
    enable: &SignalHandle,
    faults: &[SignalHandle],
) -> SynthResult<EnableChain> {
    let not_enabled = b.new_signal(&format!("{prefix}.not-enabled"), SignalKind::Bit)?;
    let inverter = b.new_block(BlockType::Not, &format!("{prefix}.invert-enable"), thread)?;
    b.link(inverter, PinRole::In(0), enable)?;
    b.link(inverter, PinRole::Out, &not_enabled)?;

    let fault = match faults {
        [] => {
            debug!(prefix, "no fault sources, skipping aggregation gate");
            None
        }
        // A lone source needs no gate; it already is the aggregate.
        [single] => Some(*single),
        _ => {
            let fault = b.new_signal(&format!("{prefix}.fault"), SignalKind::Bit)?;
            let gate = b.new_block(
                BlockType::Or {
                    inputs: faults.len(),
                },
                &format!("{prefix}.fault-or"),
                thread,
            )?;
            for (i, source) in faults.iter().enumerate() {
                b.link(gate, PinRole::In(i as u8), source)?;
            }
            b.link(gate, PinRole::Out, &fault)?;
            debug!(prefix, sources = faults.len(), "aggregated fault sources");
            Some(fault)
        }
    };

    Ok(EnableChain { not_enabled, fault })
}
