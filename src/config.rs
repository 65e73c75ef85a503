use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub playgraph: PlaygraphConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Storage and logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct PlaygraphConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Viability filter for relation types.
///
/// A relation type is extracted only when it has at least `min_instances` rows
/// and its coverage ratio is strictly greater than `min_coverage`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_min_instances")]
    pub min_instances: usize,
    #[serde(default)]
    pub min_coverage: f64,
    /// Free-text reason recorded with every viability decision.
    #[serde(default = "default_rationale")]
    pub rationale: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            min_instances: default_min_instances(),
            min_coverage: 0.0,
            rationale: default_rationale(),
        }
    }
}

/// Relation-type mapping settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingConfig {
    /// Raw relation labels that are never mapped, even when viable.
    #[serde(default)]
    pub disabled_relation_types: Vec<String>,
}

/// Names of the two source systems
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_first_party_system")]
    pub first_party_system: String,
    #[serde(default = "default_public_system")]
    pub public_system: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            first_party_system: default_first_party_system(),
            public_system: default_public_system(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_instances() -> usize {
    1000
}

fn default_rationale() -> String {
    "low-volume relation types are not worth a dedicated mapping rule; \
     zero-coverage types point at an entity kind that was never populated"
        .to_string()
}

fn default_first_party_system() -> String {
    "kexp".to_string()
}

fn default_public_system() -> String {
    "musicbrainz".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in PLAYGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("PLAYGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_path(&config_path)
    }

    /// Load and validate a configuration file at an explicit path
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.playgraph.db_path.as_os_str().is_empty() {
            anyhow::bail!("playgraph.db_path must not be empty");
        }

        if self.discovery.min_instances == 0 {
            anyhow::bail!("discovery.min_instances must be greater than 0");
        }

        if !(0.0..1.0).contains(&self.discovery.min_coverage) {
            anyhow::bail!("discovery.min_coverage must be in [0.0, 1.0)");
        }

        if self.sources.first_party_system == self.sources.public_system {
            anyhow::bail!(
                "sources.first_party_system and sources.public_system must differ (both are {})",
                self.sources.public_system
            );
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.playgraph.db_path
    }

    /// Get migrations directory
    pub fn migrations_dir(&self) -> &Path {
        &self.playgraph.migrations_dir
    }
}
