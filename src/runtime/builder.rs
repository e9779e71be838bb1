//! Runtime builder and handle.

use super::config::RuntimeConfig;
use super::env_config;
use crate::error::Result;
use crate::persona::Persona;
use crate::transport::{LoopbackTransport, Rank, Transport};
use core::fmt;
use std::sync::Arc;

/// Values set through builder methods; these beat every other source.
#[derive(Debug, Clone, Default)]
struct Overrides {
    burst_limit: Option<usize>,
    spin_before_yield: Option<u32>,
    max_live_headers: Option<Option<usize>>,
    poll_transport_on_progress: Option<bool>,
    discharge_spin_limit: Option<Option<u64>>,
}

impl Overrides {
    fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(v) = self.burst_limit {
            config.burst_limit = v;
        }
        if let Some(v) = self.spin_before_yield {
            config.spin_before_yield = v;
        }
        if let Some(v) = self.max_live_headers {
            config.max_live_headers = v;
        }
        if let Some(v) = self.poll_transport_on_progress {
            config.poll_transport_on_progress = v;
        }
        if let Some(v) = self.discharge_spin_limit {
            config.discharge_spin_limit = v;
        }
    }
}

/// Builder for initializing the runtime with custom configuration.
///
/// Configuration resolves as builder methods, then `PGASYNC_*` environment
/// variables, then the TOML file (if loaded), then defaults.
#[derive(Clone)]
pub struct RuntimeBuilder {
    base: RuntimeConfig,
    overrides: Overrides,
    read_env: bool,
    transport: Option<Arc<dyn Transport>>,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: RuntimeConfig::default(),
            overrides: Overrides::default(),
            read_env: true,
            transport: None,
        }
    }

    /// Start from an explicit configuration instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.base = config;
        self
    }

    /// Set the per-inbox burst limit.
    #[must_use]
    pub fn burst_limit(mut self, n: usize) -> Self {
        self.overrides.burst_limit = Some(n);
        self
    }

    /// Set the MPSC consumer spin count.
    #[must_use]
    pub fn spin_before_yield(mut self, spins: u32) -> Self {
        self.overrides.spin_before_yield = Some(spins);
        self
    }

    /// Set the live-header budget (`None` = unbounded).
    #[must_use]
    pub fn max_live_headers(mut self, max: Option<usize>) -> Self {
        self.overrides.max_live_headers = Some(max);
        self
    }

    /// Enable or disable the transport poll inside progress.
    #[must_use]
    pub fn poll_transport_on_progress(mut self, enable: bool) -> Self {
        self.overrides.poll_transport_on_progress = Some(enable);
        self
    }

    /// Cap the rounds `discharge` runs (`None` = no cap).
    #[must_use]
    pub fn discharge_spin_limit(mut self, limit: Option<u64>) -> Self {
        self.overrides.discharge_spin_limit = Some(limit);
        self
    }

    /// Ignore `PGASYNC_*` environment variables.
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// Use `transport` instead of the loopback transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Load the base configuration from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let parsed = env_config::parse_toml_file(path.as_ref())?;
        let mut base = RuntimeConfig::default();
        env_config::apply_toml_config(&mut base, &parsed);
        Ok(Self::new().config(base))
    }

    /// Load the base configuration from a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let parsed = env_config::parse_toml_str(toml)?;
        let mut base = RuntimeConfig::default();
        env_config::apply_toml_config(&mut base, &parsed);
        Ok(Self::new().config(base))
    }

    /// Resolves every configuration source into one normalized config.
    pub fn resolve(&self) -> Result<RuntimeConfig> {
        let mut config = self.base.clone();
        if self.read_env {
            env_config::apply_env_overrides(&mut config)?;
        }
        self.overrides.apply(&mut config);
        config.normalize();
        Ok(config)
    }

    /// Initializes the runtime, or joins the one already running.
    ///
    /// When a runtime is already installed this builder's configuration is
    /// ignored and the count is bumped.
    pub fn init(self) -> Result<Runtime> {
        super::install_or_share(move || {
            let config = self.resolve()?;
            let transport = self
                .transport
                .unwrap_or_else(|| Arc::new(LoopbackTransport::new()));
            Ok((config, transport))
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("base", &self.base)
            .field("overrides", &self.overrides)
            .field("read_env", &self.read_env)
            .field("transport", &self.transport)
            .finish()
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    world: Persona,
    transport: Arc<dyn Transport>,
}

/// Handle to the installed runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub(super) fn assemble(
        config: RuntimeConfig,
        world: Persona,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                world,
                transport,
            }),
        }
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The world persona. Incoming messages run here.
    #[must_use]
    pub fn world_persona(&self) -> &Persona {
        &self.inner.world
    }

    /// The installed transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// This process's rank.
    #[must_use]
    pub fn rank_me(&self) -> Rank {
        self.inner.transport.rank_me()
    }

    /// Number of ranks in the job.
    #[must_use]
    pub fn rank_n(&self) -> Rank {
        self.inner.transport.rank_n()
    }

    /// Drops this handle and one runtime reference.
    pub fn finalize(self) -> bool {
        drop(self);
        super::finalize()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("world", &self.inner.world)
            .field("transport", &self.inner.transport)
            .finish()
    }
}
