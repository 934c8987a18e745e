//! Runtime configuration for the leadopt binary.
//! Reads leadopt.toml from the current directory or the path in LEADOPT_CONFIG.
//! Every field has a default, so a missing file or table is not an error.

use leadopt_common::{PollPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_smina")]
    pub smina: PathBuf,
    #[serde(default = "default_obabel")]
    pub obabel: PathBuf,
    #[serde(default = "default_plip")]
    pub plip: PathBuf,
    /// pH used by obabel when protonating ligands.
    #[serde(default = "default_ph")]
    pub protonation_ph: f64,
}

fn default_smina()  -> PathBuf { PathBuf::from("smina") }
fn default_obabel() -> PathBuf { PathBuf::from("obabel") }
fn default_plip()   -> PathBuf { PathBuf::from("plip") }
fn default_ph()     -> f64     { 7.4 }

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            smina: default_smina(),
            obabel: default_obabel(),
            plip: default_plip(),
            protonation_ph: default_ph(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_timeout_secs() -> u64 { 30 }

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_pubchem_poll")]
    pub pubchem: PollPolicy,
    #[serde(default = "default_dogsite_poll")]
    pub dogsitescorer: PollPolicy,
}

fn default_pubchem_poll() -> PollPolicy { PollPolicy::new(30, 10.0) }
fn default_dogsite_poll() -> PollPolicy { PollPolicy::new(30, 5.0) }

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            pubchem: default_pubchem_poll(),
            dogsitescorer: default_dogsite_poll(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Downloaded PDB files are kept here between runs.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Ligands docked and poses profiled at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_cache_dir()   -> PathBuf { PathBuf::from("./cache/pdb") }
fn default_concurrency() -> usize   { 4 }

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            concurrency: default_concurrency(),
        }
    }
}


impl Config {
    /// Load configuration from leadopt.toml.
    /// Checks LEADOPT_CONFIG env var first, then the current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("LEADOPT_CONFIG")
            .unwrap_or_else(|_| "leadopt.toml".to_string());

        if !Path::new(&path).exists() {
            tracing::warn!("Config file not found: {}, using defaults", path);
            return Ok(Config::default());
        }
        Self::from_path(Path::new(&path))
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.workspace.concurrency == 0 {
            anyhow::bail!("workspace.concurrency must be at least 1");
        }
        Ok(config)
    }
}
