//! codplayer daemon library: configuration and wire adapters used by
//! the `codplayerd` binary and its tests.

pub mod config;
pub mod wire;

pub use config::{AudioDevice, ConfigError, DaemonConfig};
