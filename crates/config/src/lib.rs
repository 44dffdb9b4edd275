//! Configuration for the analyzer.
//!
//! Sources are layered: built-in defaults, then `formula.toml` in the
//! working directory, then `FORMULA_`-prefixed environment variables. The
//! whole struct round-trips through serde so it can also be embedded or
//! emitted programmatically.

use std::{collections::BTreeMap, fmt, path::Path};

use alloy_primitives::Address;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default config file name, relative to the working directory.
pub const FILE_NAME: &str = "formula.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FORMULA_";

/// Whether the resolver is expected to be live.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Only locally supplied contracts are analyzed.
    #[default]
    Offline,
    /// Contract discovery may hit explorer APIs.
    Online,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("offline"),
            Self::Online => f.write_str("online"),
        }
    }
}

/// Chain profile handed through to the resolver.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Chain name, e.g. `mainnet` or `bnb`.
    pub chain: String,
    /// Pinned block number, when analysis should be anchored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
    /// Explorer API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// Explorer API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Known deployments: contract name → address.
    #[serde(default)]
    pub addresses: BTreeMap<String, Address>,
}

/// Top-level analyzer configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,
    /// Use implication checks to keep path constraints minimal.
    pub refined: bool,
    /// Per-loop unrolling bound.
    pub max_iter: u32,
    #[serde(default)]
    pub chain_info: ChainInfo,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Offline,
            refined: false,
            max_iter: 3,
            chain_info: ChainInfo::default(),
        }
    }
}

impl Config {
    /// Loads defaults, `formula.toml` and the environment, in that order.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Same layering anchored at an explicit file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(FILE_NAME))
            .merge(Env::prefixed(ENV_PREFIX))
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        Jail::expect_with(|_| {
            let config = Config::load().unwrap();
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn toml_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                FILE_NAME,
                r#"
                    mode = "online"
                    refined = true
                    max_iter = 7

                    [chain_info]
                    chain = "bnb"
                    block = 17500000
                    api_url = "https://api.bscscan.com/api"

                    [chain_info.addresses]
                    Pair = "0x0ed7e52944161450477ee417de9cd3a859b14fd0"
                "#,
            )?;
            let config = Config::load().unwrap();
            assert_eq!(config.mode, Mode::Online);
            assert!(config.refined);
            assert_eq!(config.max_iter, 7);
            assert_eq!(config.chain_info.chain, "bnb");
            assert_eq!(config.chain_info.block, Some(17500000));
            assert_eq!(config.chain_info.addresses.len(), 1);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(FILE_NAME, "max_iter = 7")?;
            jail.set_env("FORMULA_MAX_ITER", "11");
            let config = Config::load().unwrap();
            assert_eq!(config.max_iter, 11);
            Ok(())
        });
    }
}
