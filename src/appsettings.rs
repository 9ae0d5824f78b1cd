use anyhow::Context;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct SchedulerSettings {
    pub max_pending_jobs: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TimeSettings {
    pub timezone: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    pub scheduler: SchedulerSettings,
    pub time: TimeSettings,
}

impl AppSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("scheduler.max_pending_jobs", 1024_i64)?
            .set_default("time.timezone", "Asia/Taipei")?
            .add_source(File::with_name("appsettings").required(false))
            .add_source(File::with_name("appsettings.local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// The civil calendar the resolver operates in.
    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.time
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("unknown timezone {:?}", self.time.timezone))
    }
}
