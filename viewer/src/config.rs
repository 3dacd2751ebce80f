use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spark_replays::playback::{PlaybackOptions, PlaybackOptionsBuilder};

use crate::server_comm::{MONITOR_PORT, NetworkOptions};

/// Viewer configuration, loadable from a TOML file.
///
/// All fields default to their standard values. CLI flags override config file values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub general: GeneralConfig,
    pub networking: NetworkingConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Record live sessions to logs.
    pub record_logs: bool,
    pub logfile_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkingConfig {
    pub server_host: String,
    pub server_port: u16,
    pub auto_connect: bool,
    /// First reconnect delay in milliseconds; later ones double up to 30 s.
    pub auto_connect_delay: u64,
    /// Give up reconnecting after this many attempts. Unlimited when unset.
    pub auto_connect_max_attempts: Option<u32>,
    /// Longest a connection attempt may take, in milliseconds.
    pub connect_timeout: u64,
    /// UDP port for drawing commands.
    pub listen_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub checkpoint_interval: usize,
    pub max_catch_up_frames: usize,
    pub window: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            record_logs: false,
            logfile_directory: PathBuf::from("logfiles"),
        }
    }
}

impl Default for NetworkingConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: MONITOR_PORT,
            auto_connect: true,
            auto_connect_delay: 1000,
            auto_connect_max_attempts: None,
            connect_timeout: 2000,
            listen_port: spark_replays::draw::DRAW_PORT,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        let options = PlaybackOptions::default();
        Self {
            checkpoint_interval: options.checkpoint_interval,
            max_catch_up_frames: options.max_catch_up_frames,
            window: options.window,
        }
    }
}

impl ViewerConfig {
    /// Load config from a TOML file.
    #[cfg(feature = "bin")]
    pub fn load(path: &std::path::Path) -> Result<Self, rootcause::Report> {
        use rootcause::prelude::*;
        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = toml::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn network_options(&self) -> NetworkOptions {
        let net = &self.networking;
        NetworkOptions {
            host: net.server_host.clone(),
            port: net.server_port,
            auto_connect: net.auto_connect,
            auto_connect_delay: Duration::from_millis(net.auto_connect_delay),
            max_attempts: net.auto_connect_max_attempts,
            connect_timeout: Duration::from_millis(net.connect_timeout),
            record_dir: self
                .general
                .record_logs
                .then(|| self.general.logfile_directory.clone()),
        }
    }

    pub fn playback_options(&self) -> PlaybackOptions {
        let mut builder = PlaybackOptionsBuilder::default();
        builder
            .checkpoint_interval(self.playback.checkpoint_interval)
            .max_catch_up_frames(self.playback.max_catch_up_frames)
            .window(self.playback.window);
        builder.build().unwrap_or_default()
    }

    /// Generate a commented default TOML config string.
    pub fn generate_default_toml() -> String {
        r#"# Spark Viewer Configuration
# Place this file as spark_viewer.toml in the working directory,
# or specify with --config <path>.

[general]
# Record every live connection to a new log file
record_logs = false

# Directory recorded logs are written to
logfile_directory = "logfiles"

[networking]
# Simulator monitor address
server_host = "localhost"
server_port = 3200

# Keep trying to connect while disconnected
auto_connect = true

# Delay before the first reconnect attempt in milliseconds.
# Later attempts double the delay, up to 30 seconds.
auto_connect_delay = 1000

# Give up after this many attempts (unlimited when not set)
# auto_connect_max_attempts = 10

# Longest a single connection attempt may take, in milliseconds
connect_timeout = 2000

# UDP port agents send drawing commands to
listen_port = 32769

[playback]
# Frames between saved world states; smaller values make seeking
# backwards faster at the cost of memory
checkpoint_interval = 100

# Most frames a single update may replay before dropping the backlog
max_catch_up_frames = 50

# Recently read log lines kept in memory
window = 200
"#
        .to_string()
    }

    /// Apply CLI flag overrides.
    #[cfg(feature = "bin")]
    pub fn apply_cli_overrides(&mut self, matches: &clap::ArgMatches) {
        if let Some(host) = matches.value_of("HOST") {
            self.networking.server_host = host.to_string();
        }
        if let Some(port) = matches.value_of("PORT").and_then(|p| p.parse().ok()) {
            self.networking.server_port = port;
        }
        if let Some(port) = matches.value_of("DRAW_PORT").and_then(|p| p.parse().ok()) {
            self.networking.listen_port = port;
        }
        if matches.is_present("NO_AUTO_CONNECT") {
            self.networking.auto_connect = false;
        }
        if matches.is_present("RECORD") {
            self.general.record_logs = true;
        }
        if let Some(dir) = matches.value_of("LOG_DIR") {
            self.general.logfile_directory = PathBuf::from(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_viewer() {
        let config = ViewerConfig::default();
        assert_eq!(config.networking.server_port, 3200);
        assert_eq!(config.networking.listen_port, 32769);
        assert!(config.networking.auto_connect);

        let network = config.network_options();
        assert_eq!(network.auto_connect_delay, Duration::from_millis(1000));
        assert_eq!(network.connect_timeout, Duration::from_secs(2));
        assert!(network.record_dir.is_none());

        let playback = config.playback_options();
        assert_eq!(playback.checkpoint_interval, 100);
        assert_eq!(playback.max_catch_up_frames, 50);
    }

    #[cfg(feature = "bin")]
    #[test]
    fn generated_file_parses_to_defaults() {
        let parsed: ViewerConfig = toml::from_str(&ViewerConfig::generate_default_toml()).unwrap();
        assert_eq!(parsed, ViewerConfig::default());
    }

    #[cfg(feature = "bin")]
    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spark_viewer.toml");
        std::fs::write(
            &path,
            "[networking]\nserver_host = \"sim.local\"\nauto_connect_max_attempts = 5\n\n[general]\nrecord_logs = true\n",
        )
        .unwrap();

        let config = ViewerConfig::load(&path).unwrap();
        assert_eq!(config.networking.server_host, "sim.local");
        assert_eq!(config.networking.server_port, 3200);
        let network = config.network_options();
        assert_eq!(network.max_attempts, Some(5));
        assert_eq!(network.record_dir, Some(PathBuf::from("logfiles")));

        assert!(ViewerConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
