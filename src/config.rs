//! Layered daemon configuration: embedded defaults, an optional
//! `config.yaml` in the platform config directory, and CLI arguments on
//! top.

use crate::args::Args;
use directories::ProjectDirs;
use eyre::{
    Context as _,
    Result,
};
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::PathBuf,
    time::Duration,
};
use url::Url;
use vidwatch_collector::SchedulerConfig;

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api_key: String,
    /// Base URL of the upstream API; the trailing slash is significant.
    pub api_base_url: Url,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    pub metrics_interval: String,
    pub liveness_interval: String,
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base: String,
    pub backoff_cap: String,
    pub task_timeout: String,
    #[serde(default)]
    pub retention: Option<String>,
}

impl Settings {
    pub fn load(args: &Args) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml));

        let source = config::File::from(get_config_dir().join("config.yaml"))
            .format(config::FileFormat::Yaml)
            .required(false);
        builder = builder.add_source(source);

        builder = builder.add_source(args.clone());

        builder.build()?.try_deserialize()
    }

    pub fn database_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("vidwatch.db"))
    }

    /// The scheduler knobs, with the human-readable durations parsed.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        Ok(SchedulerConfig {
            metrics_interval: parse_duration(&self.metrics_interval, "metrics_interval")?,
            liveness_interval: parse_duration(&self.liveness_interval, "liveness_interval")?,
            workers: self.workers,
            max_attempts: self.max_attempts,
            backoff_base: parse_duration(&self.backoff_base, "backoff_base")?,
            backoff_cap: parse_duration(&self.backoff_cap, "backoff_cap")?,
            task_timeout: parse_duration(&self.task_timeout, "task_timeout")?,
            retention: self
                .retention
                .as_deref()
                .map(|value| parse_duration(value, "retention"))
                .transpose()?,
        })
    }
}

impl config::Source for Args {
    fn clone_into_box(&self) -> Box<dyn config::Source + Send + Sync> {
        Box::new((*self).clone())
    }

    fn collect(&self) -> Result<config::Map<String, config::Value>, config::ConfigError> {
        let mut cache = HashMap::<String, config::Value>::new();
        if let Some(api_key) = &self.api_key {
            cache.insert("api_key".to_string(), api_key.clone().into());
        }
        if let Some(url) = &self.api_base_url {
            cache.insert("api_base_url".to_string(), url.clone().into());
        }
        if let Some(path) = &self.db_path {
            cache.insert("db_path".to_string(), path.display().to_string().into());
        }
        if let Some(interval) = &self.metrics_interval {
            cache.insert("metrics_interval".to_string(), interval.clone().into());
        }
        if let Some(interval) = &self.liveness_interval {
            cache.insert("liveness_interval".to_string(), interval.clone().into());
        }
        if let Some(retention) = &self.retention {
            cache.insert("retention".to_string(), retention.clone().into());
        }
        if let Some(workers) = self.workers {
            cache.insert("workers".to_string(), (workers as u64).into());
        }
        Ok(cache)
    }
}

fn parse_duration(value: &str, field: &str) -> Result<Duration> {
    humantime::parse_duration(value).wrap_err_with(|| format!("invalid duration {value:?} for {field}"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "vidwatch", "vidwatch")
}

pub fn get_config_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn get_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
