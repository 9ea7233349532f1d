pub mod config;

pub use config::{EdgeWatchConfig, MonitorConfig};
