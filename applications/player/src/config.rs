//! Daemon configuration
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cod_playback::{PlayerOptions, RipperConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default = "default_database")]
    pub database: DatabaseSettings,

    #[serde(default = "default_cdrom")]
    pub cdrom: CdromSettings,

    #[serde(default = "default_audio")]
    pub audio: AudioSettings,

    #[serde(default = "default_wire")]
    pub wire: WireSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CdromSettings {
    #[serde(default = "default_cdrom_device")]
    pub device: String,

    /// Cap on the drive read speed; unset rips at full speed
    #[serde(default)]
    pub read_speed: Option<u32>,

    #[serde(default = "default_discid_command")]
    pub discid_command: String,

    #[serde(default = "default_cdparanoia_command")]
    pub cdparanoia_command: String,

    #[serde(default = "default_cdrdao_command")]
    pub cdrdao_command: String,

    #[serde(default = "default_eject_command")]
    pub eject_command: Option<String>,

    /// Wall-clock budget for each rip helper, in seconds
    #[serde(default = "default_rip_timeout")]
    pub rip_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioDevice {
    Alsa,
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioSettings {
    #[serde(default = "default_audio_device")]
    pub device: AudioDevice,

    #[serde(default = "default_alsa_card")]
    pub alsa_card: String,

    /// Start even when the audio device can't be opened; the sink
    /// keeps retrying and reports the error in the player state
    #[serde(default)]
    pub start_without_device: bool,

    /// Directory the file device writes streams into
    #[serde(default = "default_file_dir")]
    pub file_dir: PathBuf,

    /// Simulated playback speed of the file device; 0 writes at full
    /// speed
    #[serde(default)]
    pub file_play_speed: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireSettings {
    #[serde(default = "default_host")]
    pub host: String,

    /// Port publishing state, rip state and disc frames
    #[serde(default = "default_state_port")]
    pub state_port: u16,

    /// Port accepting commands
    #[serde(default = "default_command_port")]
    pub command_port: u16,
}

impl DaemonConfig {
    /// Load configuration from an optional file plus `COD_`-prefixed
    /// environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut settings = config::Config::builder();

        let file = path.unwrap_or("codplayer.toml");
        if std::path::Path::new(file).exists() {
            settings = settings.add_source(config::File::with_name(file));
        } else if path.is_some() {
            return Err(ConfigError::Load(format!("no such config file: {file}")));
        }

        settings = settings.add_source(
            config::Environment::with_prefix("COD")
                .separator("_")
                .try_parsing(true),
        );

        let config = settings
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wire.state_port == self.wire.command_port {
            return Err(ConfigError::Invalid(
                "state and command ports must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// The ripper's slice of the configuration.
    pub fn ripper_config(&self) -> RipperConfig {
        RipperConfig {
            cdrom_device: self.cdrom.device.clone(),
            discid_command: self.cdrom.discid_command.clone(),
            audio_command: self.cdrom.cdparanoia_command.clone(),
            toc_command: self.cdrom.cdrdao_command.clone(),
            read_speed: self.cdrom.read_speed,
            timeout: self.cdrom.rip_timeout_secs.map(Duration::from_secs),
        }
    }

    /// The player supervisor's slice of the configuration.
    pub fn player_options(&self) -> PlayerOptions {
        PlayerOptions {
            ripper: self.ripper_config(),
            eject_command: self.cdrom.eject_command.clone(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            cdrom: default_cdrom(),
            audio: default_audio(),
            wire: default_wire(),
        }
    }
}

// Default values

fn default_database() -> DatabaseSettings {
    DatabaseSettings {
        path: default_database_path(),
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/codplayer")
}

fn default_cdrom() -> CdromSettings {
    CdromSettings {
        device: default_cdrom_device(),
        read_speed: None,
        discid_command: default_discid_command(),
        cdparanoia_command: default_cdparanoia_command(),
        cdrdao_command: default_cdrdao_command(),
        eject_command: default_eject_command(),
        rip_timeout_secs: default_rip_timeout(),
    }
}

fn default_cdrom_device() -> String {
    "/dev/cdrom".to_string()
}

fn default_discid_command() -> String {
    "cod-discid".to_string()
}

fn default_cdparanoia_command() -> String {
    "cdparanoia".to_string()
}

fn default_cdrdao_command() -> String {
    "cdrdao".to_string()
}

fn default_eject_command() -> Option<String> {
    Some("eject".to_string())
}

fn default_rip_timeout() -> Option<u64> {
    // A full rip of a slow disc can take a good while
    Some(45 * 60)
}

fn default_audio() -> AudioSettings {
    AudioSettings {
        device: default_audio_device(),
        alsa_card: default_alsa_card(),
        start_without_device: false,
        file_dir: default_file_dir(),
        file_play_speed: 0,
    }
}

fn default_audio_device() -> AudioDevice {
    AudioDevice::Alsa
}

fn default_alsa_card() -> String {
    "default".to_string()
}

fn default_file_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_wire() -> WireSettings {
    WireSettings {
        host: default_host(),
        state_port: default_state_port(),
        command_port: default_command_port(),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_state_port() -> u16 {
    7700
}

fn default_command_port() -> u16 {
    7701
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DaemonConfig::default();
        config.validate().unwrap();
        assert_eq!(config.audio.device, AudioDevice::Alsa);
        assert_eq!(config.wire.state_port, 7700);
    }

    #[test]
    fn validate_rejects_clashing_ports() {
        let mut config = DaemonConfig::default();
        config.wire.command_port = config.wire.state_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ripper_config_carries_timeout() {
        let mut config = DaemonConfig::default();
        config.cdrom.rip_timeout_secs = Some(10);
        assert_eq!(
            config.ripper_config().timeout,
            Some(Duration::from_secs(10))
        );
    }
}
