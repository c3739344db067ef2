//! Common re-exports.

pub use crate::config::{ConfigError, ConfigLoader};
pub use crate::machine::{
    AxisConfig, ExtruderConfig, MachineConfig, MachineSection, StepgenConfig, ThermalConfig,
    WatchdogChannelConfig,
};
pub use crate::signal::{PinDir, SignalKind, SignalValue};
