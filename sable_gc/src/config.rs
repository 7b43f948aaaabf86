//! GC configuration parameters.
//!
//! Sizes, incremental budgets and the debug "zeal" settings that drive the
//! barrier verifiers. Zeal can also be set from the environment with
//! `SABLE_GC_ZEAL=mode[,frequency]`.

use std::str::FromStr;

/// Environment variable read by [`GcConfig::from_env`].
pub const ZEAL_ENV_VAR: &str = "SABLE_GC_ZEAL";

/// Default number of opportunities between zeal actions.
pub const DEFAULT_ZEAL_FREQUENCY: u32 = 100;

/// Configuration for the garbage collector.
///
/// # Example
///
/// ```ignore
/// use sable_gc::{GcConfig, ZealMode, ZealSettings};
///
/// // Verify pre-barriers on every tenth opportunity.
/// let config = GcConfig {
///     zeal: ZealSettings::new(ZealMode::VerifierPre, 10),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GcConfig {
    // =========================================================================
    // Nursery (Young Generation)
    // =========================================================================
    /// Cells the nursery holds before a minor GC is required.
    ///
    /// Default: 4096
    pub nursery_capacity: usize,

    /// Allocate objects in the nursery at all.
    ///
    /// Default: true
    pub generational: bool,

    // =========================================================================
    // Incremental marking
    // =========================================================================
    /// Work items (cells scanned) per incremental slice when the caller does
    /// not pass an explicit budget.
    ///
    /// Default: 1000
    pub mark_slice_budget: usize,

    // =========================================================================
    // Barrier verification
    // =========================================================================
    /// Byte limit of the pre-barrier snapshot arena.
    ///
    /// Default: 64 MiB
    pub verifier_arena_bytes: usize,

    /// Snapshot edges per node above which the check walk gives up on that
    /// node entirely.
    ///
    /// Default: 1000
    pub max_verifier_edges: usize,

    /// Debug zeal mode and frequency.
    ///
    /// Default: off
    pub zeal: ZealSettings,

    /// What the embedder-facing verifier entry points do on a violation.
    ///
    /// Default: [`ViolationAction::Abort`]
    pub violation_action: ViolationAction,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            nursery_capacity: 4096,
            generational: true,
            mark_slice_budget: 1000,
            verifier_arena_bytes: 64 * 1024 * 1024,
            max_verifier_edges: 1000,
            zeal: ZealSettings::default(),
            violation_action: ViolationAction::Abort,
        }
    }
}

impl GcConfig {
    /// Small nursery and frequent slices; shakes out barrier bugs quickly.
    pub fn stress() -> Self {
        Self {
            nursery_capacity: 64,
            mark_slice_budget: 16,
            ..Default::default()
        }
    }

    /// Configuration for test harnesses: violations are returned instead of
    /// aborting.
    pub fn testing() -> Self {
        Self {
            violation_action: ViolationAction::Report,
            ..Default::default()
        }
    }

    /// Defaults overlaid with `SABLE_GC_ZEAL`, if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(ZEAL_ENV_VAR) {
            config.zeal = value.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nursery_capacity == 0 {
            return Err(ConfigError::NurseryTooSmall);
        }
        if self.mark_slice_budget == 0 {
            return Err(ConfigError::ZeroSliceBudget);
        }
        if self.max_verifier_edges == 0 {
            return Err(ConfigError::ZeroVerifierEdges);
        }
        if self.zeal.frequency == 0 {
            return Err(ConfigError::ZeroZealFrequency);
        }
        Ok(())
    }
}

// =============================================================================
// Zeal
// =============================================================================

/// Debug GC zeal modes. Values keep their conventional numbers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ZealMode {
    /// No zeal.
    #[default]
    None = 0,
    /// Full GC every `frequency` allocations.
    Alloc = 2,
    /// Pre-barrier verifier driven by `maybe_verify_barriers`.
    VerifierPre = 4,
    /// Minor GC every `frequency` allocations.
    GenerationalGc = 7,
    /// Post-barrier verifier driven by `maybe_verify_barriers`.
    VerifierPost = 11,
}

impl TryFrom<u32> for ZealMode {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ZealMode::None),
            2 => Ok(ZealMode::Alloc),
            4 => Ok(ZealMode::VerifierPre),
            7 => Ok(ZealMode::GenerationalGc),
            11 => Ok(ZealMode::VerifierPost),
            other => Err(ConfigError::UnknownZealMode(other)),
        }
    }
}

/// Zeal mode plus frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZealSettings {
    /// Selected mode.
    pub mode: ZealMode,
    /// Opportunities between zeal actions.
    pub frequency: u32,
}

impl ZealSettings {
    /// Settings for `mode` at `frequency`.
    pub const fn new(mode: ZealMode, frequency: u32) -> Self {
        Self { mode, frequency }
    }

    /// Whether `mode` is selected.
    #[inline]
    pub fn is(&self, mode: ZealMode) -> bool {
        self.mode == mode
    }
}

impl Default for ZealSettings {
    fn default() -> Self {
        Self::new(ZealMode::None, DEFAULT_ZEAL_FREQUENCY)
    }
}

impl FromStr for ZealSettings {
    type Err = ConfigError;

    /// Parse `"mode"` or `"mode,frequency"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (mode, frequency) = match s.split_once(',') {
            Some((mode, frequency)) => (mode.trim(), Some(frequency.trim())),
            None => (s, None),
        };
        let mode: u32 = mode
            .parse()
            .map_err(|_| ConfigError::InvalidZealString)?;
        let mode = ZealMode::try_from(mode)?;
        let frequency = match frequency {
            Some(f) => f.parse().map_err(|_| ConfigError::InvalidZealString)?,
            None => DEFAULT_ZEAL_FREQUENCY,
        };
        if frequency == 0 {
            return Err(ConfigError::ZeroZealFrequency);
        }
        Ok(Self { mode, frequency })
    }
}

/// What to do when a barrier verifier finds a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViolationAction {
    /// Log at error level and panic with the diagnostic.
    #[default]
    Abort,
    /// Keep the violation for the caller to collect.
    Report,
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Nursery capacity must be at least one cell.
    NurseryTooSmall,
    /// Incremental slice budget must be positive.
    ZeroSliceBudget,
    /// The verifier edge cutoff must be positive.
    ZeroVerifierEdges,
    /// Zeal frequency must be positive.
    ZeroZealFrequency,
    /// Zeal mode number not recognised.
    UnknownZealMode(u32),
    /// Zeal string is not `mode` or `mode,frequency`.
    InvalidZealString,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NurseryTooSmall => write!(f, "nursery capacity must be at least 1 cell"),
            ConfigError::ZeroSliceBudget => write!(f, "mark slice budget must be positive"),
            ConfigError::ZeroVerifierEdges => {
                write!(f, "max verifier edges must be positive")
            }
            ConfigError::ZeroZealFrequency => write!(f, "zeal frequency must be positive"),
            ConfigError::UnknownZealMode(mode) => write!(f, "unknown zeal mode {mode}"),
            ConfigError::InvalidZealString => {
                write!(f, "zeal must be formatted as `mode` or `mode,frequency`")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GcConfig::default().validate().is_ok());
    }

    #[test]
    fn test_preset_configs_are_valid() {
        assert!(GcConfig::stress().validate().is_ok());
        assert!(GcConfig::testing().validate().is_ok());
        assert_eq!(
            GcConfig::testing().violation_action,
            ViolationAction::Report
        );
    }

    #[test]
    fn test_invalid_nursery_capacity() {
        let config = GcConfig {
            nursery_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NurseryTooSmall));
    }

    #[test]
    fn test_default_verifier_limits() {
        let config = GcConfig::default();
        assert_eq!(config.verifier_arena_bytes, 64 * 1024 * 1024);
        assert_eq!(config.max_verifier_edges, 1000);
        assert_eq!(config.zeal.mode, ZealMode::None);
    }

    #[test]
    fn test_parse_zeal_mode_only() {
        let zeal: ZealSettings = "4".parse().unwrap();
        assert_eq!(zeal, ZealSettings::new(ZealMode::VerifierPre, 100));
    }

    #[test]
    fn test_parse_zeal_mode_and_frequency() {
        let zeal: ZealSettings = " 11, 5 ".parse().unwrap();
        assert_eq!(zeal, ZealSettings::new(ZealMode::VerifierPost, 5));
    }

    #[test]
    fn test_parse_zeal_errors() {
        assert_eq!(
            "3".parse::<ZealSettings>(),
            Err(ConfigError::UnknownZealMode(3))
        );
        assert_eq!(
            "pre".parse::<ZealSettings>(),
            Err(ConfigError::InvalidZealString)
        );
        assert_eq!(
            "4,x".parse::<ZealSettings>(),
            Err(ConfigError::InvalidZealString)
        );
        assert_eq!(
            "4,0".parse::<ZealSettings>(),
            Err(ConfigError::ZeroZealFrequency)
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ConfigError::UnknownZealMode(9).to_string(),
            "unknown zeal mode 9"
        );
    }
}
