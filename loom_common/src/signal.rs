//! Signal kind and value primitives.
//!
//! `SignalKind` is the type discipline of the realtime graph: every signal,
//! pin, and constant carries exactly one kind, and the wiring engine rejects
//! any mismatch. `SignalValue` is the tagged literal used for initial values
//! and constant pin bindings.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

// ─── SignalKind ─────────────────────────────────────────────────────

/// Value type of a signal or pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SignalKind {
    /// Boolean.
    Bit = 0,
    /// Signed 32-bit integer (selectors, counters).
    S32 = 1,
    /// Unsigned 32-bit integer (timeouts, step timings).
    U32 = 2,
    /// 64-bit float (positions, temperatures, gains).
    Float = 3,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bit => write!(f, "bit"),
            Self::S32 => write!(f, "s32"),
            Self::U32 => write!(f, "u32"),
            Self::Float => write!(f, "float"),
        }
    }
}

impl FromStr for SignalKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bit" => Ok(Self::Bit),
            "s32" => Ok(Self::S32),
            "u32" => Ok(Self::U32),
            "float" => Ok(Self::Float),
            _ => Err(format!("unknown SignalKind: {s:?}")),
        }
    }
}

// ─── SignalValue ────────────────────────────────────────────────────

/// A typed literal: initial signal value or constant pin binding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bit(bool),
    S32(i32),
    U32(u32),
    Float(f64),
}

impl SignalValue {
    /// Kind tag of this value.
    pub const fn kind(&self) -> SignalKind {
        match self {
            Self::Bit(_) => SignalKind::Bit,
            Self::S32(_) => SignalKind::S32,
            Self::U32(_) => SignalKind::U32,
            Self::Float(_) => SignalKind::Float,
        }
    }

    /// The zero/false value for a kind — what an unbound input pin reads.
    pub const fn default_for(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Bit => Self::Bit(false),
            SignalKind::S32 => Self::S32(0),
            SignalKind::U32 => Self::U32(0),
            SignalKind::Float => Self::Float(0.0),
        }
    }

    /// Boolean view. Non-bit values read as "nonzero".
    pub fn as_bit(&self) -> bool {
        match *self {
            Self::Bit(b) => b,
            Self::S32(v) => v != 0,
            Self::U32(v) => v != 0,
            Self::Float(v) => v != 0.0,
        }
    }

    /// Float view. Bit reads as 0.0/1.0.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Bit(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::S32(v) => f64::from(v),
            Self::U32(v) => f64::from(v),
            Self::Float(v) => v,
        }
    }

    /// Signed integer view. Floats truncate.
    pub fn as_s32(&self) -> i32 {
        match *self {
            Self::Bit(b) => i32::from(b),
            Self::S32(v) => v,
            Self::U32(v) => v.min(i32::MAX as u32) as i32,
            Self::Float(v) => v as i32,
        }
    }

    /// Unsigned integer view. Negative values saturate to 0.
    pub fn as_u32(&self) -> u32 {
        match *self {
            Self::Bit(b) => u32::from(b),
            Self::S32(v) => v.max(0) as u32,
            Self::U32(v) => v,
            Self::Float(v) => {
                if v <= 0.0 {
                    0
                } else {
                    v as u32
                }
            }
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bit(b) => write!(f, "{b}"),
            Self::S32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

// ─── PinDir ─────────────────────────────────────────────────────────

/// Direction of a block pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinDir {
    /// Reads the linked signal (or a constant).
    In,
    /// Drives the linked signal — at most one Out pin per signal.
    Out,
    /// Reads and occasionally writes; does not count as the driver.
    InOut,
}

impl fmt::Display for PinDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "in"),
            Self::Out => write!(f, "out"),
            Self::InOut => write!(f, "io"),
        }
    }
}
