//! In-process host for the save pipeline: configuration, context wiring and
//! a disk-backed download target.

pub mod config;
pub mod pipeline;

pub use config::{BridgeConfig, ConfigError};
pub use pipeline::{Bridge, DiskDownloads, DownloadReport, InProcessHelperHost};
