//! CLI surface and layered TOML configuration (§1.1, §6.1 expansion).

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Transfer & delivery core for a personal ebook library server.
#[derive(Parser, Debug, Clone)]
#[command(name = "folio-core")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "FOLIO_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server and discovery advertiser (default if no command given).
    Serve {
        /// Address to bind the server to (overrides the configured port range).
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Library directory to serve (overrides config).
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Write a default config file and create the default library directory.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },

    /// Send one book to a Kindle ingest address and print the resulting DeliveryResult.
    Deliver {
        /// Id of the book to deliver, as reported by `/api/books`.
        book_id: String,
        /// Destination address (must end in @kindle.com or @free.kindle.com).
        destination: String,
    },

    /// Browse the LAN for other folio-core instances for a few seconds.
    Discover {
        /// How long to browse before printing results and exiting.
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

/// Top-level configuration, loaded from TOML and layered under CLI flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Default filesystem-backed library configuration.
    #[serde(default)]
    pub library: LibraryConfig,

    /// External converter binary configuration.
    #[serde(default)]
    pub converter: ConverterConfig,

    /// On-disk conversion cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Metadata provider configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Kindle delivery / SMTP configuration (password lives in `SecretStore`).
    #[serde(default)]
    pub smtp: SmtpSettings,

    /// LAN discovery configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// First port to try; subsequent ports up to `port_range_end` are tried in order.
    #[serde(default = "default_port_start")]
    pub port_range_start: u16,
    /// Last port to try (inclusive).
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    /// Catalog title shown on the HTML page.
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port_range_start: default_port_start(),
            port_range_end: default_port_range_end(),
            title: default_title(),
        }
    }
}

fn default_port_start() -> u16 {
    8080
}

fn default_port_range_end() -> u16 {
    8180
}

fn default_title() -> String {
    "My Library".to_string()
}

/// Default `FsBookProvider` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory to scan for books.
    #[serde(default = "default_library_path")]
    pub path: PathBuf,
    /// Whether to scan subdirectories recursively.
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: default_library_path(),
            recursive: default_recursive(),
        }
    }
}

fn default_library_path() -> PathBuf {
    PathBuf::from("data/library")
}

fn default_recursive() -> bool {
    true
}

/// External converter binary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Explicit path to the converter binary; when unset, the built-in probe list is used.
    pub binary_path: Option<PathBuf>,
    /// Default device profile passed as `--output-profile`.
    pub default_profile: Option<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            default_profile: Some("kindle".to_string()),
        }
    }
}

/// On-disk conversion cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory converted artifacts are stored under.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("FolioKindleCache")
}

/// Metadata provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Minimum confidence accepted from a provider result.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Maximum results returned from a title/author search.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_results: default_max_results(),
        }
    }
}

fn default_min_confidence() -> f32 {
    0.8
}

fn default_max_results() -> usize {
    20
}

/// Kindle delivery configuration. `username`/`host`/`port` only; the password
/// is never stored here (see `SecretStore`, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    /// SMTP host, if delivery has been configured.
    pub host: Option<String>,
    /// SMTP port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Username for AUTH LOGIN / MAIL FROM.
    pub username: Option<String>,
    /// Whether to negotiate TLS.
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: default_smtp_port(),
            username: None,
            use_tls: default_use_tls(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_use_tls() -> bool {
    true
}

impl SmtpSettings {
    /// Build a `crate::model::SmtpConfig` iff host and username are both set.
    pub fn to_model(&self) -> Option<crate::model::SmtpConfig> {
        Some(crate::model::SmtpConfig {
            host: self.host.clone()?,
            port: self.port,
            username: self.username.clone()?,
            use_tls: self.use_tls,
        })
    }
}

/// LAN discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Whether to advertise `_folio._tcp` on startup.
    #[serde(default = "default_advertise")]
    pub advertise: bool,
    /// Service instance name; defaults to the host's localized name.
    pub service_name: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            advertise: default_advertise(),
            service_name: None,
        }
    }
}

fn default_advertise() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::FolioError::Config(format!("reading {path:?}: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| crate::error::FolioError::Config(format!("parsing {path:?}: {e}")))
    }

    /// Search the well-known config file locations, in order.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("folio-core.toml"),
            dirs::config_dir()
                .map(|p| p.join("folio-core").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/folio-core/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate the commented default config file content written by `folio-core init`.
    pub fn generate_default() -> String {
        r#"# folio-core configuration

[server]
port_range_start = 8080
port_range_end = 8180
title = "My Library"

[library]
path = "data/library"
recursive = true

[converter]
# binary_path = "/usr/bin/ebook-convert"
default_profile = "kindle"

[cache]
# dir = "/tmp/FolioKindleCache"

[metadata]
min_confidence = 0.8
max_results = 20

[smtp]
# host = "smtp.gmail.com"
# username = "you@example.com"
port = 587
use_tls = true

[discovery]
advertise = true
# service_name = "My Library"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let toml_str = Config::generate_default();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port_range_start, 8080);
        assert_eq!(parsed.server.port_range_end, 8180);
        assert_eq!(parsed.smtp.port, 587);
    }

    #[test]
    fn smtp_settings_without_host_has_no_model() {
        let settings = SmtpSettings::default();
        assert!(settings.to_model().is_none());
    }

    #[test]
    fn smtp_settings_with_host_and_username_has_model() {
        let settings = SmtpSettings {
            host: Some("smtp.example.com".into()),
            username: Some("user@example.com".into()),
            ..Default::default()
        };
        let model = settings.to_model().unwrap();
        assert_eq!(model.host, "smtp.example.com");
        assert_eq!(model.port, 587);
    }
}
