#[macro_use]
extern crate tracing;

pub mod args;
pub mod config;
pub mod logging;
pub mod service;

pub use args::Args;
pub use config::Settings;
pub use service::{
    MetricsService,
    ServiceError,
};
