//! Watchdog aggregator.
//!
//! Collapses N hardware heartbeat channels, each with its own staleness
//! timeout, into one ok signal: true iff every channel toggled within its
//! window AND the enable input is true. An optional inverter produces the
//! error-polarity signal the enable chain consumes.

use loom_common::signal::{SignalKind, SignalValue};
use tracing::debug;

use crate::catalog::{BlockType, PinRole};
use crate::error::SynthResult;
use crate::topology::{SignalHandle, ThreadId, TopologyBuilder};

/// One supervised channel.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogChannel {
    /// Heartbeat signal that must keep toggling.
    pub signal: SignalHandle,
    /// Staleness window [ms].
    pub timeout_ms: u32,
}

/// Signals produced by [`build_watchdog`].
#[derive(Debug, Clone, Copy)]
pub struct WatchdogOutputs {
    /// True while all channels are fresh and the supervisor is enabled.
    pub ok: SignalHandle,
    /// Inverted ok, when requested.
    pub error: Option<SignalHandle>,
}

/// Build the watchdog aggregation.
///
/// An empty channel list skips the watchdog block entirely — a
/// zero-pincount watchdog is invalid — and the AND over no channels
/// reduces to the enable signal itself, so `enable` is returned as `ok`
/// and no error signal is produced.
pub fn build_watchdog(
    b: &mut TopologyBuilder,
    thread: ThreadId,
    prefix: &str,
    channels: &[WatchdogChannel],
    enable: &SignalHandle,
    want_error: bool,
) -> SynthResult<WatchdogOutputs> {
    if channels.is_empty() {
        debug!(prefix, "no watchdog channels, supervisor skipped");
        return Ok(WatchdogOutputs {
            ok: *enable,
            error: None,
        });
    }

    let supervisor = b.new_block(
        BlockType::Watchdog {
            channels: channels.len(),
        },
        &format!("{prefix}.supervisor"),
        thread,
    )?;
    for (i, channel) in channels.iter().enumerate() {
        b.link(supervisor, PinRole::ChannelIn(i as u8), &channel.signal)?;
        b.set_constant(
            supervisor,
            PinRole::Timeout(i as u8),
            SignalValue::U32(channel.timeout_ms),
        )?;
    }
    b.link(supervisor, PinRole::Enable, enable)?;

    let ok = b.new_signal(&format!("{prefix}.ok"), SignalKind::Bit)?;
    b.link(supervisor, PinRole::OkOut, &ok)?;

    let error = if want_error {
        let error = b.new_signal(&format!("{prefix}.error"), SignalKind::Bit)?;
        let inverter = b.new_block(BlockType::Not, &format!("{prefix}.invert-ok"), thread)?;
        b.link(inverter, PinRole::In(0), &ok)?;
        b.link(inverter, PinRole::Out, &error)?;
        Some(error)
    } else {
        None
    };

    debug!(prefix, channels = channels.len(), "built watchdog aggregation");
    Ok(WatchdogOutputs { ok, error })
}
