//! Synthesis error taxonomy.
//!
//! Two families: configuration errors (propagated from `loom_common`) and
//! wiring errors raised by the topology builder. Both abort the entire
//! synthesis pass — a partially-wired safety network must never reach the
//! realtime engine.

use loom_common::config::ConfigError;
use loom_common::signal::SignalKind;
use thiserror::Error;

use crate::catalog::PinRole;

/// Error type for topology synthesis.
#[derive(Debug, Error)]
pub enum SynthError {
    /// A second signal was registered under an existing name.
    #[error("duplicate signal name '{0}'")]
    DuplicateSignal(String),

    /// A second block was instantiated under an existing name.
    #[error("duplicate block name '{0}'")]
    DuplicateBlock(String),

    /// A second execution thread was created under an existing name.
    #[error("duplicate thread name '{0}'")]
    DuplicateThread(String),

    /// Block scheduled into a thread the builder does not know.
    #[error("unknown execution thread for block '{0}'")]
    UnknownThread(String),

    /// Block type has no pin with the requested role.
    #[error("block '{block}' has no pin '{role}'")]
    UnknownPin { block: String, role: PinRole },

    /// Pin and signal kinds disagree.
    #[error(
        "kind mismatch: pin '{role}' of '{block}' is {pin_kind}, signal '{signal}' is {signal_kind}"
    )]
    KindMismatch {
        block: String,
        role: PinRole,
        pin_kind: SignalKind,
        signal: String,
        signal_kind: SignalKind,
    },

    /// A signal already has a driving output pin.
    #[error("signal '{signal}' already driven by pin '{driver_pin}' of '{driver_block}'")]
    DoubleDriver {
        signal: String,
        driver_block: String,
        driver_pin: PinRole,
    },

    /// Pin already linked or bound to a constant.
    #[error("pin '{role}' of '{block}' is already bound")]
    PinAlreadyBound { block: String, role: PinRole },

    /// Constants bind to input pins only.
    #[error("pin '{role}' of '{block}' is an output; constants bind to inputs only")]
    ConstantOnOutput { block: String, role: PinRole },

    /// Constant literal kind disagrees with the pin kind.
    #[error("constant kind mismatch: pin '{role}' of '{block}' is {pin_kind}, literal is {value_kind}")]
    ConstantKindMismatch {
        block: String,
        role: PinRole,
        pin_kind: SignalKind,
        value_kind: SignalKind,
    },

    /// Block type instantiated with an invalid size (zero-input gate,
    /// zero-channel watchdog, single-joint gantry).
    #[error("block '{block}': {reason}")]
    InvalidArity { block: String, reason: String },

    /// Mux router called with no inputs.
    #[error("mux '{0}' requires at least one input")]
    EmptyMux(String),

    /// Subsystem safety latch with a missing or zero debounce threshold.
    /// An un-debounced subsystem latch is a safety regression, so this
    /// fails synthesis instead of defaulting.
    #[error("safety latch '{name}': debounce threshold {threshold_ms} ms is invalid")]
    InvalidThreshold { name: String, threshold_ms: u32 },

    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias for synthesis operations.
pub type SynthResult<T> = Result<T, SynthError>;
