//! Per-invocation parameters carried by functional commands.

use std::fmt;

/// Whether per-entry statistics are reported for an invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StatisticsMode {
    /// Wrap each outcome in a [`StatsEnvelope`](super::StatsEnvelope).
    #[default]
    Accumulate,
    /// Return bare values; nothing is recorded.
    Skip,
}

impl StatisticsMode {
    /// Check whether `params` suppress statistics.
    #[inline]
    pub fn is_skip(params: &Params) -> bool {
        params.statistics == StatisticsMode::Skip
    }
}

impl fmt::Display for StatisticsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatisticsMode::Accumulate => write!(f, "accumulate"),
            StatisticsMode::Skip => write!(f, "skip"),
        }
    }
}

impl std::str::FromStr for StatisticsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accumulate" | "on" | "true" => Ok(StatisticsMode::Accumulate),
            "skip" | "off" | "false" => Ok(StatisticsMode::Skip),
            _ => Err(format!(
                "Unknown statistics mode '{}'. Valid modes: accumulate, skip",
                s
            )),
        }
    }
}

/// Parameters shared by every sub-command of one logical operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Params {
    statistics: StatisticsMode,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statistics(mut self, mode: StatisticsMode) -> Self {
        self.statistics = mode;
        self
    }

    pub fn statistics(&self) -> StatisticsMode {
        self.statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accumulates() {
        assert!(!StatisticsMode::is_skip(&Params::default()));
    }

    #[test]
    fn test_with_statistics_skip() {
        let params = Params::new().with_statistics(StatisticsMode::Skip);
        assert!(StatisticsMode::is_skip(&params));
    }

    #[test]
    fn test_statistics_mode_from_str() {
        assert_eq!("skip".parse::<StatisticsMode>(), Ok(StatisticsMode::Skip));
        assert_eq!("ON".parse::<StatisticsMode>(), Ok(StatisticsMode::Accumulate));
        assert!("sometimes".parse::<StatisticsMode>().is_err());
    }
}
