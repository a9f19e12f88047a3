//! CLI configuration

use serde::{Deserialize, Serialize};

/// CLI verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    /// Quiet - failures only
    Quiet,
    /// Normal - default output
    #[default]
    Normal,
    /// Verbose - per-step detail
    Verbose,
    /// Debug - maximum output
    Debug,
}

impl Verbosity {
    /// Verbosity from `-q` and the `-v` count
    #[must_use]
    pub const fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    /// Check if quiet mode
    #[must_use]
    pub const fn is_quiet(self) -> bool {
        matches!(self, Self::Quiet)
    }

    /// Check if verbose or higher
    #[must_use]
    pub const fn is_verbose(self) -> bool {
        matches!(self, Self::Verbose | Self::Debug)
    }

    /// Default log filter when `RUST_LOG` is unset
    #[must_use]
    pub const fn log_filter(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn",
            Self::Verbose => "info",
            Self::Debug => "debug",
        }
    }
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorChoice {
    /// Always use colors
    Always,
    /// Use colors when output is a terminal
    #[default]
    Auto,
    /// Never use colors
    Never,
}

impl ColorChoice {
    /// Should use colors based on output detection
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
        }
    }
}

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Verbosity level
    pub verbosity: Verbosity,
    /// Color output choice
    pub color: ColorChoice,
    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl CliConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set color choice
    #[must_use]
    pub const fn with_color(mut self, color: ColorChoice) -> Self {
        self.color = color;
        self
    }

    /// Set JSON logging
    #[must_use]
    pub const fn with_log_json(mut self, log_json: bool) -> Self {
        self.log_json = log_json;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod verbosity_tests {
        use super::*;

        #[test]
        fn test_default() {
            assert_eq!(Verbosity::default(), Verbosity::Normal);
        }

        #[test]
        fn test_from_flags() {
            assert_eq!(Verbosity::from_flags(true, 3), Verbosity::Quiet);
            assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Normal);
            assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
            assert_eq!(Verbosity::from_flags(false, 4), Verbosity::Debug);
        }

        #[test]
        fn test_predicates() {
            assert!(Verbosity::Quiet.is_quiet());
            assert!(!Verbosity::Normal.is_verbose());
            assert!(Verbosity::Debug.is_verbose());
        }

        #[test]
        fn test_log_filter() {
            assert_eq!(Verbosity::Quiet.log_filter(), "error");
            assert_eq!(Verbosity::Verbose.log_filter(), "info");
        }
    }

    mod color_tests {
        use super::*;

        #[test]
        fn test_explicit_choices() {
            assert!(ColorChoice::Always.should_color());
            assert!(!ColorChoice::Never.should_color());
        }
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_builder() {
            let config = CliConfig::new()
                .with_verbosity(Verbosity::Debug)
                .with_color(ColorChoice::Never)
                .with_log_json(true);
            assert_eq!(config.verbosity, Verbosity::Debug);
            assert_eq!(config.color, ColorChoice::Never);
            assert!(config.log_json);
        }
    }
}
