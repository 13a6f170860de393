//! Auto-tuning configuration

use super::{AutotuneError, AutotuneResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How wide the block-shape search is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    /// One cubic shape per default block size, plus the whole domain
    Basic,
    /// Adds ramped, shuffled and per-dimension doubled shapes
    Aggressive,
}

/// How runs consume the kernel's data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Runs work on copies of the outputs, with halo exchange disabled
    Preemptive,
    /// Runs advance the real computation a few timesteps each
    Runtime,
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "basic" => Ok(Level::Basic),
            "aggressive" => Ok(Level::Aggressive),
            _ => Err(()),
        }
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "preemptive" => Ok(Mode::Preemptive),
            "runtime" => Ok(Mode::Runtime),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Basic => write!(f, "basic"),
            Level::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Preemptive => write!(f, "preemptive"),
            Mode::Runtime => write!(f, "runtime"),
        }
    }
}

/// Target platform; many-core parts get extra thread counts to try.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// Commodity multicore CPU
    #[default]
    Cpu,
    /// Intel Knights Landing (wide SIMD, many cores)
    Knl,
}

/// Configuration for the auto-tuner
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutotuneOptions {
    /// Timesteps executed by each run
    pub squeezer: i64,

    /// Default block sizes, applied to every blocked dimension at once
    pub blocksizes: Vec<i64>,

    /// Largest stack footprint in bytes a run may need
    pub stack_limit: u64,

    /// Target platform
    pub platform: Platform,

    /// Keep runs that leave every thread less than one block of work
    pub permit_small_workloads: bool,

    /// Accepted `(level, mode)` combinations
    pub accepted: Vec<(String, String)>,
}

impl Default for AutotuneOptions {
    fn default() -> Self {
        Self {
            squeezer: 4,
            blocksizes: vec![8, 16, 24, 32, 40, 64, 128],
            stack_limit: process_stack_limit(),
            platform: Platform::default(),
            permit_small_workloads: false,
            accepted: [
                ("basic", "preemptive"),
                ("aggressive", "preemptive"),
                ("basic", "runtime"),
                ("aggressive", "runtime"),
            ]
            .into_iter()
            .map(|(l, m)| (l.to_string(), m.to_string()))
            .collect(),
        }
    }
}

impl AutotuneOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of extra timesteps in a tuning run
    pub fn squeezer(mut self, timesteps: i64) -> Self {
        self.squeezer = timesteps;
        self
    }

    /// Set the default block sizes
    pub fn blocksizes(mut self, sizes: Vec<i64>) -> Self {
        self.blocksizes = sizes;
        self
    }

    /// Set the stack budget, in bytes, of a single run
    pub fn stack_limit(mut self, bytes: u64) -> Self {
        self.stack_limit = bytes;
        self
    }

    /// Set the target platform
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Keep runs that leave threads without a full block
    pub fn permit_small_workloads(mut self, permit: bool) -> Self {
        self.permit_small_workloads = permit;
        self
    }

    /// Restrict the accepted `(level, mode)` combinations.
    pub fn accepted<L: Into<String>, M: Into<String>>(mut self, combos: Vec<(L, M)>) -> Self {
        self.accepted = combos.into_iter().map(|(l, m)| (l.into(), m.into())).collect();
        self
    }

    /// Quick tuning preset: few block sizes, short runs
    pub fn quick() -> Self {
        Self {
            squeezer: 2,
            blocksizes: vec![16, 32, 64],
            ..Default::default()
        }
    }

    /// Thorough tuning preset: more block sizes, longer runs
    pub fn thorough() -> Self {
        Self {
            squeezer: 8,
            blocksizes: vec![8, 16, 24, 32, 40, 64, 128, 256],
            ..Default::default()
        }
    }

    /// Check `(level, mode)` against the accepted combinations.
    pub fn validate(&self, level: &str, mode: &str) -> AutotuneResult<(Level, Mode)> {
        let invalid = || AutotuneError::InvalidCombination {
            accepted: self.accepted.iter().map(|(l, m)| format!("({}, {})", l, m)).collect::<Vec<_>>().join(", "),
            provided: format!("({}, {})", level, mode),
        };
        if !self.accepted.iter().any(|(l, m)| l == level && m == mode) {
            return Err(invalid());
        }
        match (level.parse::<Level>(), mode.parse::<Mode>()) {
            (Ok(level), Ok(mode)) => Ok((level, mode)),
            _ => Err(invalid()),
        }
    }
}

/// A quarter of the process stack limit, in bytes.
#[cfg(unix)]
pub fn process_stack_limit() -> u64 {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: getrlimit only writes into the struct we own.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_STACK, &mut limit) };
    if rc != 0 || limit.rlim_cur == libc::RLIM_INFINITY {
        return u64::MAX;
    }
    limit.rlim_cur as u64 / 4
}

/// A quarter of the process stack limit, in bytes; `u64::MAX` when unlimited or unknown.
#[cfg(not(unix))]
pub fn process_stack_limit() -> u64 {
    u64::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_combinations() {
        let options = AutotuneOptions::default();
        assert_eq!(options.validate("aggressive", "runtime").unwrap(), (Level::Aggressive, Mode::Runtime));

        let err = options.validate("basic", "bogus").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("(basic, bogus)"));
        assert!(msg.contains("(aggressive, preemptive)"));

        let restricted = AutotuneOptions::default().accepted(vec![("basic", "preemptive")]);
        assert!(restricted.validate("basic", "runtime").is_err());
    }

    #[test]
    fn test_presets() {
        assert!(AutotuneOptions::quick().blocksizes.len() < AutotuneOptions::thorough().blocksizes.len());
        assert_eq!(AutotuneOptions::new().squeezer(3).squeezer, 3);
        assert!(process_stack_limit() > 0);
    }
}
