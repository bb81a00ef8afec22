//! Runtime configuration.
//!
//! Layered resolution, later layers win:
//! 1. `draftsmith.toml` in the working directory (or `--config <path>`)
//! 2. environment (`DRAFTSMITH_BASE_URL`, `DRAFTSMITH_TOKEN`,
//!    `DRAFTSMITH_VENDORS` as a comma list), `.env` loaded by the binary
//! 3. CLI flags
//!
//! # Configuration File Format
//!
//! ```toml
//! base_url = "https://letters.example.com"
//! vendors = ["openai", "gemini"]
//! timeout_secs = 120
//! no_issue_sentinel = "no issues found"
//!
//! [metadata]
//! locale = "en"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "draftsmith.toml";
pub const ENV_BASE_URL: &str = "DRAFTSMITH_BASE_URL";
pub const ENV_TOKEN: &str = "DRAFTSMITH_TOKEN";
pub const ENV_VENDORS: &str = "DRAFTSMITH_VENDORS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token. Prefer `DRAFTSMITH_TOKEN`; keeping it in the file
    /// is supported but discouraged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub vendors: Vec<String>,
    /// Overrides the built-in "no issues found" feedback sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_issue_sentinel: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Free-form metadata forwarded on session init.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            vendors: Vec::new(),
            no_issue_sentinel: None,
            timeout_secs: default_timeout_secs(),
            metadata: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    /// `draftsmith.toml` in the working directory, falling back to the
    /// user config directory (`~/.config/draftsmith/` on Linux).
    pub fn discover(dir: &Path) -> Result<Self> {
        let local = dir.join(CONFIG_FILE);
        if local.exists() {
            return Self::load(&local);
        }
        if let Some(base) = dirs::config_dir() {
            let user = base.join("draftsmith").join(CONFIG_FILE);
            if user.exists() {
                return Self::load(&user);
            }
        }
        Ok(Self::default())
    }

    /// Layer environment variables over the file values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_BASE_URL)
            && !url.is_empty()
        {
            self.base_url = url;
        }
        if let Ok(token) = std::env::var(ENV_TOKEN)
            && !token.is_empty()
        {
            self.token = Some(token);
        }
        if let Ok(vendors) = std::env::var(ENV_VENDORS)
            && !vendors.is_empty()
        {
            self.vendors = split_vendor_list(&vendors);
        }
    }

    /// Layer CLI flags over everything else.
    pub fn apply_cli(&mut self, base_url: Option<String>, vendors: Option<String>) {
        if let Some(url) = base_url {
            self.base_url = url;
        }
        if let Some(vendors) = vendors {
            self.vendors = split_vendor_list(&vendors);
        }
    }

    /// Reject configurations the workflow cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.vendors.is_empty() {
            bail!(
                "No vendors configured; set `vendors` in {CONFIG_FILE} or {ENV_VENDORS}"
            );
        }
        if self.base_url.is_empty() {
            bail!("base_url must not be empty");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn split_vendor_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
