// src/config.rs
use crate::error::ConfigError;
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_WEB_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IRC_QUIT_DELAY_MS: u64 = 1000;

/// Command-line arguments for the application.
#[derive(Parser, Debug, Deserialize, Default)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Run the meeting webhook relay instead of the uploader
    #[clap(short, long, help = "Run the meeting webhook relay instead of the uploader")]
    pub relay: bool,

    /// Print a systemd unit for this binary and exit
    #[clap(long, help = "Print a systemd unit for this binary and exit")]
    pub systemd_unit: bool,

    /// HTTP listen address (e.g., "0.0.0.0:8080")
    #[clap(
        short,
        long,
        value_parser,
        help = "HTTP listen address (e.g., \"0.0.0.0:8080\")"
    )]
    pub webaddr: Option<String>,

    /// Path to a configuration file (e.g., dropwatch.toml)
    #[clap(
        short,
        long,
        value_parser,
        help = "Path to a configuration file (e.g., dropwatch.toml)"
    )]
    pub config: Option<PathBuf>,

    /// Extra directories to watch besides the uploads directory
    #[clap(help = "Extra directories to watch besides the uploads directory")]
    pub folders: Vec<String>,

    /// Log level (e.g., trace, debug, info, warn, error)
    #[clap(
        long,
        value_parser,
        help = "Log level (e.g., trace, debug, info, warn, error)"
    )]
    pub log_level: Option<String>,
}

/// Configuration loaded from file, environment, or defaults.
///
/// Every field is optional so that each layer only overrides what it sets.
#[derive(Deserialize, Serialize, Debug, Default)]
pub struct FileConfig {
    pub log_level: Option<String>,
    pub webaddr: Option<String>,

    pub data_dir: Option<String>,
    pub uploads_dir: Option<String>,
    pub processed_dir: Option<String>,
    pub discard_dir: Option<String>,
    pub credentials_dir: Option<String>,
    pub watch_dirs: Option<Vec<String>>,
    pub rescan_interval_secs: Option<u64>,

    pub slack_token: Option<String>,
    pub slack_channel: Option<String>,
    pub slack_team_id: Option<String>,
    pub slack_api_url: Option<String>,
    pub http_timeout_secs: Option<u64>,

    pub webhook_secret: Option<String>,
    pub topic_filter: Option<String>,
    pub message_suffix: Option<String>,

    pub slack_webhook_enable: Option<bool>,
    #[serde(default, deserialize_with = "comma_list")]
    pub slack_webhook_urls: Option<Vec<String>>,

    pub irc_enable: Option<bool>,
    pub irc_server: Option<String>,
    pub irc_channel: Option<String>,
    pub irc_nick: Option<String>,
    pub irc_password: Option<String>,
    pub irc_insecure_tls: Option<bool>,
    pub irc_quit_delay_ms: Option<u64>,
}

/// Accepts either a TOML list or a comma-separated string (as env vars give).
fn comma_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        Joined(String),
    }

    let raw = Option::<ListOrString>::deserialize(deserializer)?;
    Ok(raw.map(|value| match value {
        ListOrString::List(items) => items,
        ListOrString::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }))
}

/// Which service this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Uploader,
    Relay,
}

/// Settings for the IRC sink.
#[derive(Debug, Clone)]
pub struct IrcConfig {
    /// `host:port` of a TLS-enabled IRC server.
    pub server: String,
    pub channel: String,
    pub nick: String,
    pub password: Option<String>,
    /// Accept any server certificate. Off unless explicitly configured.
    pub insecure_tls: bool,
    pub quit_delay: Duration,
}

/// Final application configuration after merging all sources.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: Mode,
    pub log_level: String,
    pub web_addr: String,

    pub uploads_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub discard_dir: PathBuf,
    pub credentials_dir: PathBuf,
    /// Directories watched in uploader mode; the uploads directory comes first.
    pub watch_dirs: Vec<PathBuf>,
    /// `None` means only the startup sweep runs.
    pub rescan_interval: Option<Duration>,

    pub slack_token: Option<String>,
    pub slack_channel: Option<String>,
    pub slack_team_id: Option<String>,
    pub slack_api_url: String,
    pub http_timeout: Duration,

    pub webhook_secret: Option<String>,
    pub topic_filter: Option<String>,
    pub message_suffix: String,

    /// `None` when the chat webhook sink is disabled.
    pub slack_webhook_urls: Option<Vec<String>>,
    /// `None` when the IRC sink is disabled.
    pub irc: Option<IrcConfig>,
}

impl AppConfig {
    /// Loads the application configuration by merging CLI, file, environment, and defaults.
    pub fn load() -> Result<(Self, CliArgs), figment::Error> {
        let cli_args = CliArgs::parse();

        let config_file_path = cli_args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from("dropwatch.toml"));

        let fig = Figment::new()
            .merge(Toml::file(config_file_path))
            .merge(Env::prefixed("DROPWATCH_"))
            // Older deployments export these two unprefixed.
            .merge(Env::raw().only(&["SLACK_TOKEN", "SLACK_CHANNEL"]));

        let config = Self::resolve(&cli_args, fig)?;
        Ok((config, cli_args))
    }

    /// Resolves the merged figment plus CLI overrides into the final configuration.
    ///
    /// Split out from [`AppConfig::load`] so that callers can supply their own
    /// figment without touching the process arguments or environment.
    pub fn resolve(cli_args: &CliArgs, fig: Figment) -> Result<Self, figment::Error> {
        // Defaults sit underneath whatever the caller already merged.
        let fig = Figment::from(Serialized::defaults(FileConfig {
            log_level: Some("info".to_string()),
            webaddr: Some(DEFAULT_WEB_ADDR.to_string()),
            data_dir: Some(DEFAULT_DATA_DIR.to_string()),
            ..Default::default()
        }))
        .merge(fig);

        let mut merged: FileConfig = fig.extract()?;

        if let Some(cli_ll) = &cli_args.log_level {
            merged.log_level = Some(cli_ll.clone());
        }
        if let Some(cli_wa) = &cli_args.webaddr {
            merged.webaddr = Some(cli_wa.clone());
        }

        let data_dir = PathBuf::from(
            merged
                .data_dir
                .clone()
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
        );
        let under_data = |explicit: Option<String>, name: &str| {
            explicit
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(name))
        };
        let uploads_dir = under_data(merged.uploads_dir, "uploads");
        let processed_dir = under_data(merged.processed_dir, "processed");
        let discard_dir = under_data(merged.discard_dir, "discard");
        let credentials_dir = under_data(merged.credentials_dir, "credentials");

        let mut watch_dirs = vec![uploads_dir.clone()];
        let extra = if !cli_args.folders.is_empty() {
            cli_args.folders.clone()
        } else {
            merged.watch_dirs.unwrap_or_default()
        };
        for dir in extra.into_iter().map(PathBuf::from) {
            if !watch_dirs.contains(&dir) {
                watch_dirs.push(dir);
            }
        }

        let slack_webhook_urls = if merged.slack_webhook_enable.unwrap_or(false) {
            Some(merged.slack_webhook_urls.unwrap_or_default())
        } else {
            None
        };

        let irc = if merged.irc_enable.unwrap_or(false) {
            Some(IrcConfig {
                server: merged.irc_server.unwrap_or_default(),
                channel: merged.irc_channel.unwrap_or_default(),
                nick: merged.irc_nick.unwrap_or_default(),
                password: non_empty(merged.irc_password),
                insecure_tls: merged.irc_insecure_tls.unwrap_or(false),
                quit_delay: Duration::from_millis(
                    merged.irc_quit_delay_ms.unwrap_or(DEFAULT_IRC_QUIT_DELAY_MS),
                ),
            })
        } else {
            None
        };

        Ok(AppConfig {
            mode: if cli_args.relay {
                Mode::Relay
            } else {
                Mode::Uploader
            },
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
            web_addr: merged
                .webaddr
                .unwrap_or_else(|| DEFAULT_WEB_ADDR.to_string()),
            uploads_dir,
            processed_dir,
            discard_dir,
            credentials_dir,
            watch_dirs,
            rescan_interval: merged
                .rescan_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            slack_token: non_empty(merged.slack_token),
            slack_channel: non_empty(merged.slack_channel),
            slack_team_id: non_empty(merged.slack_team_id),
            slack_api_url: merged
                .slack_api_url
                .unwrap_or_else(|| DEFAULT_SLACK_API_URL.to_string()),
            http_timeout: Duration::from_secs(
                merged
                    .http_timeout_secs
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            webhook_secret: non_empty(merged.webhook_secret),
            topic_filter: non_empty(merged.topic_filter),
            message_suffix: merged.message_suffix.unwrap_or_default(),
            slack_webhook_urls,
            irc,
        })
    }

    /// Checks that everything the selected mode needs is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.web_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "webaddr",
                reason: e.to_string(),
            })?;

        match self.mode {
            Mode::Uploader => {
                if self.slack_token.is_none() {
                    return Err(ConfigError::Missing("slack_token"));
                }
                if self.slack_channel.is_none() {
                    return Err(ConfigError::Missing("slack_channel"));
                }
            }
            Mode::Relay => {
                if self.webhook_secret.is_none() {
                    return Err(ConfigError::Missing("webhook_secret"));
                }
                if self.slack_webhook_urls.is_none() && self.irc.is_none() {
                    return Err(ConfigError::NoSinks);
                }
                if let Some(urls) = &self.slack_webhook_urls {
                    if urls.is_empty() {
                        return Err(ConfigError::Missing("slack_webhook_urls"));
                    }
                }
                if let Some(irc) = &self.irc {
                    if irc.server.is_empty() {
                        return Err(ConfigError::Missing("irc_server"));
                    }
                    if !irc.server.contains(':') {
                        return Err(ConfigError::Invalid {
                            key: "irc_server",
                            reason: format!("expected host:port, got {}", irc.server),
                        });
                    }
                    if irc.channel.is_empty() {
                        return Err(ConfigError::Missing("irc_channel"));
                    }
                    if irc.nick.is_empty() {
                        return Err(ConfigError::Missing("irc_nick"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Creates the data directories the uploader mode works in.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            &self.uploads_dir,
            &self.processed_dir,
            &self.discard_dir,
            &self.credentials_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

