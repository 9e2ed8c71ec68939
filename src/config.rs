use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

use crate::error::Result;
use crate::program::TransportKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub program: ProgramConfig,
    #[validate(nested)]
    pub lshaped: LShapedConfig,
    #[validate(nested)]
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProgramConfig {
    /// Number of scenario partitions
    #[validate(range(min = 1))]
    pub workers: usize,
    #[validate(range(min = 0.0, max = 0.5))]
    pub probability_tolerance: f64,
    pub transport: TransportKind,
    /// Pool size for the thread pool transport, 0 = one per core
    pub threads: usize,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            probability_tolerance: 1e-9,
            transport: TransportKind::Local,
            threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LShapedConfig {
    /// Relative optimality gap
    #[validate(range(min = 0.0))]
    pub tolerance: f64,
    #[validate(range(min = 1))]
    pub max_iterations: usize,
    /// Generate feasibility cuts instead of failing on infeasible subproblems.
    ///
    /// Left off, a program without relatively complete recourse ends with
    /// `Infeasible` as soon as a master candidate has no feasible recourse,
    /// even if another first-stage decision would have one.
    pub check_feasibility: bool,
}

impl Default for LShapedConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 1000,
            check_feasibility: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seed for samplers built with `from_config`; entropy when unset
    pub seed: Option<u64>,
    /// Scenarios drawn per statistical evaluation
    #[validate(range(min = 2))]
    pub samples: usize,
    /// Independent SAA instances behind a sampled bound
    #[validate(range(min = 2))]
    pub batches: usize,
    #[validate(range(min = 0.5, max = 0.9999))]
    pub confidence: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: None,
            samples: 1000,
            batches: 10,
            confidence: 0.95,
        }
    }
}

impl Config {
    /// Defaults, then `config/default.toml`, then `SP__` environment variables
    pub fn load() -> Result<Self> {
        Self::load_from("config/default.toml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SP__").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }
}
