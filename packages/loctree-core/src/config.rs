//! Tree manager settings.
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. An explicit [`config::Config`] source handed to [`TreeConfig::from_source`]
//! 3. Environment variables: `LOCTREE_*` prefix (via [`TreeConfig::load`])

use std::fmt;
use std::str::FromStr;

use config::{Config, ConfigError, Environment};

use crate::error::{Error, Result};

/// What the cycle check does when an ancestor referenced by `parent_id` is missing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BrokenChainPolicy {
    /// Stop walking and report "no cycle"; a warning is logged.
    #[default]
    Lenient,
    /// Fail with [`Error::InconsistentState`].
    Strict,
}

impl FromStr for BrokenChainPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(BrokenChainPolicy::Lenient),
            "strict" => Ok(BrokenChainPolicy::Strict),
            other => Err(Error::Config(format!(
                "unknown broken_chain policy {other:?} (expected \"lenient\" or \"strict\")"
            ))),
        }
    }
}

impl fmt::Display for BrokenChainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokenChainPolicy::Lenient => f.write_str("lenient"),
            BrokenChainPolicy::Strict => f.write_str("strict"),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct TreeConfig {
    pub broken_chain: BrokenChainPolicy,
}

fn config_err(e: ConfigError) -> Error {
    Error::Config(e.to_string())
}

impl TreeConfig {
    /// Defaults overlaid with `LOCTREE_BROKEN_CHAIN`.
    pub fn load() -> Result<Self> {
        let source = Config::builder()
            .add_source(Environment::with_prefix("LOCTREE").try_parsing(true))
            .build()
            .map_err(config_err)?;
        Self::from_source(&source)
    }

    /// Defaults overlaid with whatever keys `source` defines.
    pub fn from_source(source: &Config) -> Result<Self> {
        let mut cfg = Self::default();
        match source.get_string("broken_chain") {
            Ok(v) => cfg.broken_chain = v.parse()?,
            Err(ConfigError::NotFound(_)) => {}
            Err(e) => return Err(config_err(e)),
        }
        Ok(cfg)
    }

    pub fn strict() -> Self {
        Self {
            broken_chain: BrokenChainPolicy::Strict,
        }
    }
}
