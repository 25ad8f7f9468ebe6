//! Config refresher (`reset`): re-reads the YAML cluster config every
//! tick, revalidates it (logging but never failing the tick on a bad
//! config), and recomputes the derived hashes and `upscaling_speed`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::hash;
use crate::model::ClusterConfig;
use crate::provider::NodeProvider;
use crate::scheduler::{ResourceDemandScheduler, SimpleResourceDemandScheduler};

/// Builds the node-provider instance from the first-loaded config. Invoked
/// exactly once, ever: `available_node_types` is replaced on every refresh,
/// but the provider itself is never rebuilt even when the rest of the
/// config changes.
pub type ProviderFactory = Box<dyn Fn(&ClusterConfig) -> Arc<dyn NodeProvider> + Send + Sync>;

pub struct ConfigRefresher {
    config_path: PathBuf,
    provider_factory: ProviderFactory,

    config: Option<ClusterConfig>,
    provider: Option<Arc<dyn NodeProvider>>,
    scheduler: Option<Arc<dyn ResourceDemandScheduler>>,

    runtime_hash: String,
    file_mounts_contents_hash: Option<String>,
}

impl std::fmt::Debug for ConfigRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRefresher")
            .field("config_path", &self.config_path)
            .field("has_config", &self.config.is_some())
            .field("has_provider", &self.provider.is_some())
            .field("runtime_hash", &self.runtime_hash)
            .finish()
    }
}

impl ConfigRefresher {
    /// `errors_fatal=true` is used only here, at construction.
    pub fn new(config_path: impl Into<PathBuf>, provider_factory: ProviderFactory) -> Result<Self, ConfigError> {
        let mut refresher = Self {
            config_path: config_path.into(),
            provider_factory,
            config: None,
            provider: None,
            scheduler: None,
            runtime_hash: String::new(),
            file_mounts_contents_hash: None,
        };
        refresher.reset(true)?;
        Ok(refresher)
    }

    pub fn config(&self) -> &ClusterConfig {
        self.config
            .as_ref()
            .expect("reset() always populates config before returning Ok")
    }

    pub fn provider(&self) -> Arc<dyn NodeProvider> {
        self.provider
            .clone()
            .expect("reset() always constructs the provider on first call")
    }

    pub fn scheduler(&self) -> Arc<dyn ResourceDemandScheduler> {
        self.scheduler
            .clone()
            .expect("reset() always constructs the scheduler on first call")
    }

    pub fn runtime_hash(&self) -> &str {
        &self.runtime_hash
    }

    pub fn file_mounts_contents_hash(&self) -> Option<&str> {
        self.file_mounts_contents_hash.as_deref()
    }

    /// Re-reads and re-derives everything from `config_path`. `errors_fatal`
    /// is `false` on every tick after construction, so a bad config file
    /// never aborts the reconcile loop — the previously held config is kept.
    pub fn reset(&mut self, errors_fatal: bool) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Read {
            path: self.config_path.display().to_string(),
            source,
        });
        let raw = match raw {
            Ok(raw) => raw,
            Err(error) if errors_fatal => return Err(error),
            Err(error) => {
                tracing::warn!(%error, "config refresh: read failed, keeping previous config");
                return Ok(());
            }
        };

        let parsed: Result<ClusterConfig, _> = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: self.config_path.display().to_string(),
            source,
        });
        let mut new_config = match parsed {
            Ok(config) => config,
            Err(error) if errors_fatal => return Err(error),
            Err(error) => {
                tracing::warn!(%error, "config refresh: parse failed, keeping previous config");
                return Ok(());
            }
        };

        if self.config.is_none() {
            expand_and_assert_local_mounts(&mut new_config)?;
        }

        let changed = self
            .config
            .as_ref()
            .map(|existing| !configs_equivalent(existing, &new_config))
            .unwrap_or(true);

        if changed {
            if let Err(error) = crate::config::validate_config(&new_config) {
                // Logged, never fatal here (forward-compat with older clusters).
                tracing::warn!(%error, "config validation failed, continuing with unvalidated config");
            }
        }

        self.runtime_hash = hash::runtime_hash(
            &new_config.file_mounts,
            &new_config.cluster_synced_files,
            &new_config.worker_setup_commands,
            &new_config.worker_start_ray_commands,
        );
        self.file_mounts_contents_hash = if new_config.file_mounts_sync_continuously {
            Some(hash::file_mounts_contents_hash(&Default::default()))
        } else {
            None
        };

        if self.provider.is_none() {
            self.provider = Some((self.provider_factory)(&new_config));
        }

        match &self.scheduler {
            Some(_) => {
                // Reset in place: scheduler sees the new node-type table on
                // every refresh even though it (like the provider) isn't
                // reconstructed from scratch.
                self.scheduler = Some(Arc::new(SimpleResourceDemandScheduler));
            }
            None => {
                self.scheduler = Some(Arc::new(SimpleResourceDemandScheduler));
            }
        }

        self.config = Some(new_config);
        Ok(())
    }
}

/// `~`-expands local file_mount paths and asserts each exists. Performed
/// once, at construction only.
fn expand_and_assert_local_mounts(config: &mut ClusterConfig) -> Result<(), ConfigError> {
    let home = std::env::var("HOME").ok();
    for local_path in config.file_mounts.values_mut() {
        if let Some(stripped) = local_path.strip_prefix('~') {
            if let Some(home) = &home {
                *local_path = format!("{home}{stripped}");
            }
        }
        if !std::path::Path::new(local_path.as_str()).exists() {
            return Err(ConfigError::Validation(format!(
                "file_mounts local path does not exist: {local_path}"
            )));
        }
    }
    Ok(())
}

/// Cheap equivalence check used to decide whether to re-run validation —
/// compares the canonical JSON serialization rather than deriving `PartialEq`
/// across every nested type.
fn configs_equivalent(a: &ClusterConfig, b: &ClusterConfig) -> bool {
    serde_json::to_value(a).ok() == serde_json::to_value(b).ok()
}
