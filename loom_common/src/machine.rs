//! Machine configuration structures.
//!
//! All config types use `serde::Deserialize` for TOML loading. Optional
//! fields carry `#[serde(default)]` so older configs keep loading as fields
//! are added. Numeric bounds come from [`crate::consts`] and are enforced by
//! `MachineConfig::validate()`, which must pass before any synthesis starts:
//! a partially-wired safety-critical machine must never be allowed to run.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigLoader};
use crate::consts::{
    DIRHOLD_NS_DEFAULT, DIRSETUP_NS_DEFAULT, FILAMENT_DIA_DEFAULT, MAX_AXES, MAX_EXTRUDERS,
    MAX_FANS, MAX_GANTRY_JOINTS, MIN_AXES, MIN_EXTRUDERS, SERVO_PERIOD_NS_DEFAULT,
    SERVO_PERIOD_NS_MAX, SERVO_PERIOD_NS_MIN, STEPLEN_NS_DEFAULT, STEPSPACE_NS_DEFAULT,
};

// ─── Top-Level Config ───────────────────────────────────────────────

/// Top-level machine configuration.
///
/// Loaded from TOML at startup. Immutable once synthesis begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Machine identity and global timing.
    pub machine: MachineSection,

    /// Per-axis configurations, in kinematic order (X, Y, Z, ...).
    #[serde(rename = "axis")]
    pub axes: Vec<AxisConfig>,

    /// Per-extruder configurations.
    #[serde(rename = "extruder")]
    pub extruders: Vec<ExtruderConfig>,

    /// Heated-bed temperature loop (optional).
    #[serde(default)]
    pub bed: Option<ThermalConfig>,

    /// Watchdog channels supervising hardware heartbeats.
    #[serde(default, rename = "watchdog_channel")]
    pub watchdog_channels: Vec<WatchdogChannelConfig>,
}

impl ConfigLoader for MachineConfig {}

/// Machine identity and global timing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSection {
    /// Human-readable machine name (e.g. "cramps-delta").
    pub name: String,

    /// Servo thread period [ns] (default: 1 ms).
    #[serde(default = "default_servo_period_ns")]
    pub servo_period_ns: u32,

    /// Number of part-cooling fans (0..=4).
    #[serde(default)]
    pub num_fans: usize,
}

fn default_servo_period_ns() -> u32 {
    SERVO_PERIOD_NS_DEFAULT
}

// ─── Axis / Joint Config ────────────────────────────────────────────

/// Step generator timing and scaling parameters.
///
/// Defaults are conservative values for common external stepper drivers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepgenConfig {
    /// Steps per user unit (steps/mm for linear axes).
    pub scale: f64,

    /// Maximum velocity [user units/s].
    pub max_velocity: f64,

    /// Maximum acceleration [user units/s²].
    pub max_acceleration: f64,

    /// Step pulse length [ns].
    #[serde(default = "default_steplen")]
    pub steplen_ns: u32,

    /// Minimum space between step pulses [ns].
    #[serde(default = "default_stepspace")]
    pub stepspace_ns: u32,

    /// Direction setup time before a step [ns].
    #[serde(default = "default_dirsetup")]
    pub dirsetup_ns: u32,

    /// Direction hold time after a step [ns].
    #[serde(default = "default_dirhold")]
    pub dirhold_ns: u32,
}

fn default_steplen() -> u32 {
    STEPLEN_NS_DEFAULT
}
fn default_stepspace() -> u32 {
    STEPSPACE_NS_DEFAULT
}
fn default_dirsetup() -> u32 {
    DIRSETUP_NS_DEFAULT
}
fn default_dirhold() -> u32 {
    DIRHOLD_NS_DEFAULT
}

/// Per-axis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Axis letter ("x", "y", "z", ...). Unique across the machine.
    pub letter: String,

    /// Step generator parameters, shared by all joints of this axis.
    pub stepgen: StepgenConfig,

    /// Number of motors driving this axis (1 = normal, 2+ = gantry).
    #[serde(default = "default_one")]
    pub gantry_joints: usize,

    /// Per-joint home offset [user units] for gantry skew compensation.
    /// Length must equal `gantry_joints` when more than one motor is used.
    #[serde(default)]
    pub home_offsets: Vec<f64>,
}

fn default_one() -> usize {
    1
}

impl AxisConfig {
    /// Whether this axis is driven by multiple synchronized motors.
    pub fn is_gantry(&self) -> bool {
        self.gantry_joints > 1
    }
}

// ─── Extruder Config ────────────────────────────────────────────────

/// Per-extruder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtruderConfig {
    /// Extruder step generator (velocity mode).
    pub stepgen: StepgenConfig,

    /// Filament diameter [mm].
    #[serde(default = "default_filament_dia")]
    pub filament_diameter: f64,

    /// Retract velocity [mm/s].
    #[serde(default = "default_retract_vel")]
    pub retract_velocity: f64,

    /// Retract length [mm].
    #[serde(default = "default_retract_len")]
    pub retract_length: f64,

    /// Manual jog velocity [mm/s].
    #[serde(default = "default_jog_vel")]
    pub jog_velocity: f64,

    /// Hotend temperature loop. Absent for unheated tools.
    #[serde(default)]
    pub thermal: Option<ThermalConfig>,
}

fn default_filament_dia() -> f64 {
    FILAMENT_DIA_DEFAULT
}
fn default_retract_vel() -> f64 {
    40.0
}
fn default_retract_len() -> f64 {
    1.0
}
fn default_jog_vel() -> f64 {
    5.0
}

// ─── Thermal Config ─────────────────────────────────────────────────

/// Closed-loop heater channel configuration.
///
/// Gains and thresholds are plain floats in whatever units the sensors
/// report — no unit conversion happens in the synthesis layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThermalConfig {
    /// Proportional gain.
    pub p_gain: f64,
    /// Integral gain.
    #[serde(default)]
    pub i_gain: f64,
    /// Derivative gain.
    #[serde(default)]
    pub d_gain: f64,

    /// Constant output bias added to the PID output.
    #[serde(default)]
    pub bias: f64,

    /// Maximum PID output — also the PWM ceiling.
    pub max_output: f64,

    /// Bound on the integral contribution (0 = unbounded).
    #[serde(default)]
    pub max_error_i: f64,

    /// Half-width of the in-range window around the setpoint [°C].
    pub range_error: f64,

    /// Absolute sensor sanity window [°C]. Measurements outside
    /// `[limit_min, limit_max]` indicate a broken or shorted sensor.
    pub limit_min: f64,
    pub limit_max: f64,

    /// Standby setpoint for idle tools [°C].
    #[serde(default)]
    pub standby: f64,

    /// Index of the part-cooling fan whose airflow this heater must
    /// compensate for, if any.
    #[serde(default)]
    pub fan_index: Option<usize>,

    /// Feed-forward gain applied to the fan PWM (0 = no compensation).
    #[serde(default)]
    pub fan_bias_gain: f64,
}

// ─── Watchdog Config ────────────────────────────────────────────────

/// One supervised hardware heartbeat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogChannelConfig {
    /// Channel name (e.g. "pru0", "io-board").
    pub name: String,

    /// Staleness timeout [ms]. The channel signal must toggle at least
    /// this often or the watchdog trips.
    pub timeout_ms: u32,
}

// ─── Validation ─────────────────────────────────────────────────────

impl MachineConfig {
    /// Validate all parameter bounds.
    ///
    /// Returns the first violation found. Must be called (and pass) before
    /// synthesis; every error here aborts the build before any wiring.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.machine;
        if m.name.is_empty() {
            return Err(invalid("machine.name cannot be empty"));
        }
        if m.servo_period_ns < SERVO_PERIOD_NS_MIN || m.servo_period_ns > SERVO_PERIOD_NS_MAX {
            return Err(invalid(format!(
                "servo_period_ns {} out of range [{SERVO_PERIOD_NS_MIN}, {SERVO_PERIOD_NS_MAX}]",
                m.servo_period_ns
            )));
        }
        if m.num_fans > MAX_FANS {
            return Err(invalid(format!(
                "num_fans {} out of range [0, {MAX_FANS}]",
                m.num_fans
            )));
        }

        if self.axes.len() < MIN_AXES || self.axes.len() > MAX_AXES {
            return Err(invalid(format!(
                "axis count {} out of range [{MIN_AXES}, {MAX_AXES}]",
                self.axes.len()
            )));
        }
        for axis in &self.axes {
            axis.validate()?;
        }
        let mut letters: Vec<&str> = self.axes.iter().map(|a| a.letter.as_str()).collect();
        letters.sort_unstable();
        letters.dedup();
        if letters.len() != self.axes.len() {
            return Err(invalid("axis letters must be unique"));
        }

        if self.extruders.len() < MIN_EXTRUDERS || self.extruders.len() > MAX_EXTRUDERS {
            return Err(invalid(format!(
                "extruder count {} out of range [{MIN_EXTRUDERS}, {MAX_EXTRUDERS}]",
                self.extruders.len()
            )));
        }
        for (i, extruder) in self.extruders.iter().enumerate() {
            extruder.stepgen.validate(&format!("extruder {i}"))?;
            if let Some(thermal) = &extruder.thermal {
                thermal.validate(&format!("extruder {i}"), m.num_fans)?;
            }
        }

        if let Some(bed) = &self.bed {
            bed.validate("bed", m.num_fans)?;
            if bed.fan_index.is_some() {
                return Err(invalid("bed thermal loop cannot reference a part fan"));
            }
        }

        for channel in &self.watchdog_channels {
            if channel.name.is_empty() {
                return Err(invalid("watchdog channel name cannot be empty"));
            }
            if channel.timeout_ms == 0 {
                return Err(invalid(format!(
                    "watchdog channel '{}' timeout_ms must be nonzero",
                    channel.name
                )));
            }
        }

        Ok(())
    }
}

impl AxisConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.letter.is_empty() {
            return Err(invalid("axis letter cannot be empty"));
        }
        self.stepgen.validate(&format!("axis {}", self.letter))?;
        if self.gantry_joints == 0 || self.gantry_joints > MAX_GANTRY_JOINTS {
            return Err(invalid(format!(
                "axis {}: gantry_joints {} out of range [1, {MAX_GANTRY_JOINTS}]",
                self.letter, self.gantry_joints
            )));
        }
        if self.is_gantry()
            && !self.home_offsets.is_empty()
            && self.home_offsets.len() != self.gantry_joints
        {
            return Err(invalid(format!(
                "axis {}: home_offsets length {} must match gantry_joints {}",
                self.letter,
                self.home_offsets.len(),
                self.gantry_joints
            )));
        }
        Ok(())
    }
}

impl StepgenConfig {
    fn validate(&self, context: &str) -> Result<(), ConfigError> {
        if self.scale == 0.0 {
            return Err(invalid(format!("{context}: stepgen scale cannot be zero")));
        }
        if self.max_velocity <= 0.0 {
            return Err(invalid(format!(
                "{context}: max_velocity must be positive"
            )));
        }
        if self.max_acceleration <= 0.0 {
            return Err(invalid(format!(
                "{context}: max_acceleration must be positive"
            )));
        }
        Ok(())
    }
}

impl ThermalConfig {
    fn validate(&self, context: &str, num_fans: usize) -> Result<(), ConfigError> {
        if self.max_output <= 0.0 {
            return Err(invalid(format!("{context}: max_output must be positive")));
        }
        if self.range_error <= 0.0 {
            return Err(invalid(format!("{context}: range_error must be positive")));
        }
        if self.limit_min >= self.limit_max {
            return Err(invalid(format!(
                "{context}: thermal limits [{}, {}] are inverted",
                self.limit_min, self.limit_max
            )));
        }
        if self.standby < 0.0 {
            return Err(invalid(format!("{context}: standby cannot be negative")));
        }
        if let Some(fan) = self.fan_index {
            if fan >= num_fans {
                return Err(invalid(format!(
                    "{context}: fan_index {fan} out of range [0, {num_fans})"
                )));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stepgen() -> StepgenConfig {
        StepgenConfig {
            scale: 80.0,
            max_velocity: 300.0,
            max_acceleration: 3000.0,
            steplen_ns: STEPLEN_NS_DEFAULT,
            stepspace_ns: STEPSPACE_NS_DEFAULT,
            dirsetup_ns: DIRSETUP_NS_DEFAULT,
            dirhold_ns: DIRHOLD_NS_DEFAULT,
        }
    }

    fn base_config() -> MachineConfig {
        MachineConfig {
            machine: MachineSection {
                name: "test-machine".to_string(),
                servo_period_ns: SERVO_PERIOD_NS_DEFAULT,
                num_fans: 0,
            },
            axes: ["x", "y", "z"]
                .iter()
                .map(|letter| AxisConfig {
                    letter: letter.to_string(),
                    stepgen: stepgen(),
                    gantry_joints: 1,
                    home_offsets: Vec::new(),
                })
                .collect(),
            extruders: vec![ExtruderConfig {
                stepgen: stepgen(),
                filament_diameter: FILAMENT_DIA_DEFAULT,
                retract_velocity: 40.0,
                retract_length: 1.0,
                jog_velocity: 5.0,
                thermal: None,
            }],
            bed: None,
            watchdog_channels: Vec::new(),
        }
    }

    #[test]
    fn base_config_validates() {
        base_config().validate().unwrap();
    }

    #[test]
    fn too_few_axes_rejected() {
        let mut config = base_config();
        config.axes.truncate(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_extruders_rejected() {
        let mut config = base_config();
        config.extruders.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn fan_count_bound() {
        let mut config = base_config();
        config.machine.num_fans = MAX_FANS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_axis_letters_rejected() {
        let mut config = base_config();
        config.axes[1].letter = "x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_thermal_limits_rejected() {
        let mut config = base_config();
        config.extruders[0].thermal = Some(ThermalConfig {
            p_gain: 0.3,
            i_gain: 0.001,
            d_gain: 0.0,
            bias: 0.0,
            max_output: 1.0,
            max_error_i: 1.0,
            range_error: 15.0,
            limit_min: 300.0,
            limit_max: 0.0,
            standby: 0.0,
            fan_index: None,
            fan_bias_gain: 0.0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn fan_index_out_of_range_rejected() {
        let mut config = base_config();
        config.machine.num_fans = 1;
        config.extruders[0].thermal = Some(ThermalConfig {
            p_gain: 0.3,
            i_gain: 0.0,
            d_gain: 0.0,
            bias: 0.0,
            max_output: 1.0,
            max_error_i: 0.0,
            range_error: 15.0,
            limit_min: 0.0,
            limit_max: 300.0,
            standby: 0.0,
            fan_index: Some(1),
            fan_bias_gain: 0.1,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_watchdog_timeout_rejected() {
        let mut config = base_config();
        config.watchdog_channels.push(WatchdogChannelConfig {
            name: "pru0".to_string(),
            timeout_ms: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn gantry_offset_length_mismatch_rejected() {
        let mut config = base_config();
        config.axes[0].gantry_joints = 2;
        config.axes[0].home_offsets = vec![0.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip_with_defaults() {
        let toml_str = r#"
[machine]
name = "cramps"

[[axis]]
letter = "x"
stepgen = { scale = 80.0, max_velocity = 300.0, max_acceleration = 3000.0 }

[[axis]]
letter = "y"
stepgen = { scale = 80.0, max_velocity = 300.0, max_acceleration = 3000.0 }

[[axis]]
letter = "z"
stepgen = { scale = 1600.0, max_velocity = 10.0, max_acceleration = 100.0 }

[[extruder]]
stepgen = { scale = 400.0, max_velocity = 50.0, max_acceleration = 1000.0 }
"#;
        let config = MachineConfig::from_toml(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.machine.servo_period_ns, SERVO_PERIOD_NS_DEFAULT);
        assert_eq!(config.machine.num_fans, 0);
        assert_eq!(config.extruders[0].filament_diameter, FILAMENT_DIA_DEFAULT);
        assert!(config.bed.is_none());
    }
}
