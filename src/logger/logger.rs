use crate::settings::Settings;
use anyhow::{Result, anyhow};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

const BOOTSTRAP_FILTER: &str = "info";

/// Dependencies that are chatty at debug level. Each is capped unless the
/// configured filter names it.
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("hyper", "warn"),
    ("warp", "info"),
    ("reqwest", "warn"),
    ("rustls", "warn"),
    ("sqlx", "warn"),
];

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub filter: String,
}

impl LogConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            filter: settings.log.filter.clone(),
        }
    }

    /// The configured directives plus a cap for every quiet target the
    /// configuration leaves unmentioned.
    pub fn directives(&self) -> String {
        let configured: Vec<&str> = self
            .filter
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .collect();

        let mut directives: Vec<String> = configured.iter().map(|d| d.to_string()).collect();
        for (target, level) in QUIET_TARGETS {
            let named = configured.iter().any(|d| names_target(d, target));
            if !named {
                directives.push(format!("{target}={level}"));
            }
        }
        directives.join(",")
    }

    pub fn to_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(self.directives())
            .map_err(|e| anyhow!("invalid log.filter {:?}: {}", self.filter, e))
    }
}

fn names_target(directive: &str, target: &str) -> bool {
    let name = directive
        .split(['=', '[', '{'])
        .next()
        .unwrap_or_default()
        .trim();
    name == target || name.strip_prefix(target).is_some_and(|rest| rest.starts_with("::"))
}

/// Global subscriber whose filter can be swapped once settings are loaded.
pub struct Logger {
    reload_handle: reload::Handle<EnvFilter, Registry>,
}

impl Logger {
    /// Installs the subscriber. `RUST_LOG` wins over the bootstrap level
    /// until [`Logger::reload_from_config`] runs.
    pub fn new_bootstrap() -> Self {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(BOOTSTRAP_FILTER));
        let (filter, reload_handle) = reload::Layer::new(filter);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();

        Self { reload_handle }
    }

    pub fn reload_from_config(&self, config: &LogConfig) -> Result<()> {
        let filter = config.to_filter()?;
        self.reload_handle.reload(filter).map_err(|e| anyhow!(e))?;
        tracing::debug!(filter = %config.directives(), "log filter reloaded");
        Ok(())
    }
}
