//! Shared constants and configuration bounds.
//!
//! All numeric bounds enforced by `validate()` live here so the limits are
//! visible in one place and shared between the config layer and tests.

/// Minimum number of cartesian axes a machine must declare (X, Y, Z).
pub const MIN_AXES: usize = 3;

/// Maximum number of axes supported by the synthesizer.
pub const MAX_AXES: usize = 9;

/// Minimum number of extruders.
pub const MIN_EXTRUDERS: usize = 1;

/// Maximum number of extruders (bounded by the parameter-mux fan-in).
pub const MAX_EXTRUDERS: usize = 8;

/// Maximum number of part-cooling fans.
pub const MAX_FANS: usize = 4;

/// Maximum motors on a single gantry axis.
pub const MAX_GANTRY_JOINTS: usize = 4;

/// Default servo thread period [ns] (1 kHz).
pub const SERVO_PERIOD_NS_DEFAULT: u32 = 1_000_000;

/// Servo thread period bounds [ns].
pub const SERVO_PERIOD_NS_MIN: u32 = 100_000;
pub const SERVO_PERIOD_NS_MAX: u32 = 10_000_000;

/// Debounce applied to every thermal-channel fault latch [ms].
///
/// Fixed rather than configurable: a shorter window lets sensor glitches
/// trip the machine, a longer one delays real overtemperature faults.
pub const FAULT_DEBOUNCE_MS: u32 = 500;

/// PWM threshold above which a heater channel reports `active`.
pub const HEATER_ACTIVE_THRESHOLD: f64 = 1e-4;

/// Default filament diameter [mm].
pub const FILAMENT_DIA_DEFAULT: f64 = 1.75;

/// Default step pulse timings [ns], conservative for common stepper drivers.
pub const STEPLEN_NS_DEFAULT: u32 = 5_000;
pub const STEPSPACE_NS_DEFAULT: u32 = 5_000;
pub const DIRSETUP_NS_DEFAULT: u32 = 35_000;
pub const DIRHOLD_NS_DEFAULT: u32 = 35_000;
