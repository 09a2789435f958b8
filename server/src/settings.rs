use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use hastream_cluster::{ClusterConfig, SessionProperties};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Demo run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Number of clustered matching engine instances
    pub instances: u32,

    /// Orders the gateway sends before the run settles
    pub orders: u64,

    pub start_order_id: u64,

    /// Pause between orders (milliseconds)
    pub order_interval_ms: u64,

    pub instrument: String,

    pub par: f64,

    pub price_increment: f64,

    /// Destroy the active member once this many orders have been sent
    pub failover_after: Option<u64>,

    /// Seed for reproducible order flow
    pub seed: Option<u64>,

    /// How long to wait for the cluster to elect or catch up (milliseconds)
    pub settle_timeout_ms: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            instances: 2,
            orders: 20,
            start_order_id: 1,
            order_interval_ms: 100,
            instrument: "MSFT".to_string(),
            par: 100.0,
            price_increment: 0.25,
            failover_after: Some(10),
            seed: None,
            settle_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cluster: ClusterConfig,
    pub session: SessionProperties,
    pub demo: DemoSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig {
                heartbeat_interval_ms: 1000,
                ..ClusterConfig::new("matcher", 1)
            },
            session: SessionProperties::default(),
            demo: DemoSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, overlaid by the YAML file if given, then by
    /// `HASTREAM_<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("HASTREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.cluster.validate()?;
        if self.demo.instances == 0 {
            anyhow::bail!("demo.instances must be at least 1");
        }
        Ok(())
    }

    /// Switch application id, re-deriving the topics from it
    pub fn set_app_id(&mut self, app_id: &str) {
        let derived = ClusterConfig::new(app_id, self.cluster.instance);
        self.cluster.app_id = derived.app_id;
        self.cluster.input_topic = derived.input_topic;
        self.cluster.active_topic = derived.active_topic;
        self.cluster.standby_topic = derived.standby_topic;
        self.cluster.state_topic = None;
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        serde_yaml::to_string(self).context("Failed to render configuration")
    }
}
