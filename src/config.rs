use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub writes: WriteConfig,
    #[serde(default)]
    pub logbook: LogbookConfig,
}

impl StoreConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<StoreConfig>(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using StoreConfig::default().",
                path.display()
            );
            StoreConfig::default()
        };
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.storage.graph_path = absolutize(root, &self.storage.graph_path);
        self.storage.changes_path = absolutize(root, &self.storage.changes_path);
        self.storage.users_path = absolutize(root, &self.storage.users_path);
        self.storage.bodies_path = absolutize(root, &self.storage.bodies_path);
        self.logbook.path = absolutize(root, &self.logbook.path);
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            writes: WriteConfig::default(),
            logbook: LogbookConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_graph_path")]
    pub graph_path: PathBuf,
    #[serde(default = "StorageConfig::default_changes_path")]
    pub changes_path: PathBuf,
    #[serde(default = "StorageConfig::default_users_path")]
    pub users_path: PathBuf,
    #[serde(default = "StorageConfig::default_bodies_path")]
    pub bodies_path: PathBuf,
}

impl StorageConfig {
    fn default_graph_path() -> PathBuf {
        PathBuf::from("store/graph.db")
    }

    fn default_changes_path() -> PathBuf {
        PathBuf::from("store/changes.db")
    }

    fn default_users_path() -> PathBuf {
        PathBuf::from("store/users.db")
    }

    fn default_bodies_path() -> PathBuf {
        PathBuf::from("bodies")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            graph_path: Self::default_graph_path(),
            changes_path: Self::default_changes_path(),
            users_path: Self::default_users_path(),
            bodies_path: Self::default_bodies_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteConfig {
    /// Revision cache TTL in seconds. Advisory only; conflict checks always
    /// fall back to a storage read when the cache is cold.
    #[serde(default = "WriteConfig::default_rev_cache_ttl_secs")]
    pub rev_cache_ttl_secs: u64,
    /// Requests older than this are dropped before processing, unanswered.
    #[serde(default = "WriteConfig::default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl WriteConfig {
    fn default_rev_cache_ttl_secs() -> u64 {
        60
    }

    fn default_stale_after_secs() -> u64 {
        300
    }
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            rev_cache_ttl_secs: Self::default_rev_cache_ttl_secs(),
            stale_after_secs: Self::default_stale_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogbookConfig {
    #[serde(default = "LogbookConfig::default_path")]
    pub path: PathBuf,
    #[serde(default = "LogbookConfig::default_enabled")]
    pub enabled: bool,
}

impl LogbookConfig {
    fn default_path() -> PathBuf {
        PathBuf::from("logbook")
    }

    fn default_enabled() -> bool {
        true
    }
}

impl Default for LogbookConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            enabled: Self::default_enabled(),
        }
    }
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults_under_root() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = StoreConfig::load(dir.path())?;
        assert_eq!(cfg.storage.graph_path, dir.path().join("store/graph.db"));
        assert_eq!(cfg.writes.rev_cache_ttl_secs, 60);
        assert!(cfg.logbook.enabled);
        Ok(())
    }

    #[test]
    fn partial_file_overrides_only_named_fields() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("config.toml"),
            "[writes]\nrev_cache_ttl_secs = 5\n\n[storage]\ngraph_path = \"/var/lib/trellis/graph.db\"\n",
        )?;
        let cfg = StoreConfig::load(dir.path())?;
        assert_eq!(cfg.writes.rev_cache_ttl_secs, 5);
        assert_eq!(cfg.writes.stale_after_secs, 300);
        // Absolute paths pass through; relative defaults resolve under root.
        assert_eq!(
            cfg.storage.graph_path,
            PathBuf::from("/var/lib/trellis/graph.db")
        );
        assert_eq!(cfg.storage.users_path, dir.path().join("store/users.db"));
        Ok(())
    }
}
