//! Configuration types for usenet-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (directories, post-processing defaults)
///
/// Groups settings related to where files land and what happens to them
/// once a download completes. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Final download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Scratch directory used while segments are still arriving (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Default post-processing mode applied after a download completes
    #[serde(default)]
    pub default_post_process: PostProcess,

    /// File collision handling when the destination path already exists
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            default_post_process: PostProcess::default(),
            file_collision: FileCollisionAction::default(),
        }
    }
}

/// External tool paths (unrar, unzip, 7z) and password cascade configuration
///
/// Groups settings for external binaries and password handling used by
/// post-processing. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to a global password file (one password per line)
    #[serde(default)]
    pub password_file: Option<PathBuf>,

    /// Try an empty password in the cascade (default: true)
    #[serde(default = "default_true")]
    pub try_empty_password: bool,

    /// Path to the `unrar` executable (auto-detected via PATH if None)
    #[serde(default)]
    pub unrar_path: Option<PathBuf>,

    /// Path to the `unzip` executable (auto-detected via PATH if None)
    #[serde(default)]
    pub unzip_path: Option<PathBuf>,

    /// Path to the `7z` executable (auto-detected via PATH if None)
    #[serde(default)]
    pub sevenzip_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths aren't set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            password_file: None,
            try_empty_password: true,
            unrar_path: None,
            unzip_path: None,
            sevenzip_path: None,
            search_path: true,
        }
    }
}

/// Fixed fallback password list used as the last step of the password cascade
///
/// The cascade itself (NZB metadata password, empty, indexer name, release-group
/// token, then this list) is implemented in the post-processing module; this
/// config only supplies the final, static list of common scene passwords.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PasswordCascadeConfig {
    /// Indexer name to try (original case and lowercased) as a candidate password
    #[serde(default)]
    pub indexer_name: Option<String>,

    /// Common scene-release passwords tried as the final cascade step
    #[serde(default = "default_common_passwords")]
    pub common_passwords: Vec<String>,
}

impl Default for PasswordCascadeConfig {
    fn default() -> Self {
        Self {
            indexer_name: None,
            common_passwords: default_common_passwords(),
        }
    }
}

/// Top-level configuration
///
/// Fields are organized into logical sub-configs for maintainability:
/// - [`download`](DownloadConfig) — directories, post-processing defaults
/// - [`tools`](ToolsConfig) — external binary paths, password handling
/// - [`passwords`](PasswordCascadeConfig) — password cascade fallback list
/// - [`retry`](RetryConfig) — backoff policy for segment and extraction retries
///
/// All sub-config fields are flattened so the JSON/TOML format stays flat
/// (no nesting), while still being accessible as `config.download.download_dir`
/// on the Rust side.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// NNTP server configurations (at least one required)
    pub servers: Vec<ServerConfig>,

    /// Download behavior settings (directories, post-processing)
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// External tool paths and password handling
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Password cascade fallback configuration
    #[serde(flatten)]
    pub passwords: PasswordCascadeConfig,

    /// Retry configuration for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// State store (SQLite-backed key/value) path
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Temporary directory
    pub fn temp_dir(&self) -> &PathBuf {
        &self.download.temp_dir
    }
}

/// NNTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server hostname
    pub host: String,

    /// Server port (typically 119 for unencrypted, 563 for TLS)
    pub port: u16,

    /// Use TLS (implicit TLS, not STARTTLS)
    pub tls: bool,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Number of connections to bring up for this server (default: 10)
    #[serde(default = "default_connections")]
    pub connections: usize,

    /// Server priority (lower = tried first, for backup servers)
    #[serde(default)]
    pub priority: i32,
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts per segment (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Post-processing mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcess {
    /// Just download, no post-processing
    None,
    /// Download + extract archives
    Unpack,
    /// Above + remove intermediate archive volumes (default)
    #[default]
    UnpackAndCleanup,
}

impl PostProcess {
    /// Convert PostProcess enum to integer for state store storage
    pub fn to_i32(&self) -> i32 {
        match self {
            PostProcess::None => 0,
            PostProcess::Unpack => 1,
            PostProcess::UnpackAndCleanup => 2,
        }
    }

    /// Convert integer from state store back to PostProcess enum
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => PostProcess::None,
            1 => PostProcess::Unpack,
            2 => PostProcess::UnpackAndCleanup,
            _ => PostProcess::UnpackAndCleanup,
        }
    }
}

/// File collision handling strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Overwrite existing file
    Overwrite,
    /// Skip the file, keep existing
    Skip,
}

// Default value functions
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("usenet-dl.db")
}

fn default_connections() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_common_passwords() -> Vec<String> {
    vec![
        "password".into(),
        "usenet".into(),
        "scene".into(),
        "nzbgeek".into(),
        "p4ssw0rd".into(),
    ]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_process_round_trips_through_i32_for_all_variants() {
        let cases = [
            (PostProcess::None, 0),
            (PostProcess::Unpack, 1),
            (PostProcess::UnpackAndCleanup, 2),
        ];

        for (variant, expected_int) in cases {
            assert_eq!(variant.to_i32(), expected_int);
            assert_eq!(PostProcess::from_i32(expected_int), variant);
        }
    }

    #[test]
    fn post_process_from_unknown_integer_defaults_to_unpack_and_cleanup() {
        assert_eq!(PostProcess::from_i32(99), PostProcess::UnpackAndCleanup);
        assert_eq!(PostProcess::from_i32(-1), PostProcess::UnpackAndCleanup);
    }

    #[test]
    fn config_default_survives_json_round_trip() {
        let original = Config::default();

        let json = serde_json::to_string(&original).expect("Config must serialize to JSON");
        let restored: Config =
            serde_json::from_str(&json).expect("Config must deserialize from its own JSON");

        assert_eq!(restored.download.download_dir, original.download.download_dir);
        assert_eq!(restored.download.temp_dir, original.download.temp_dir);
        assert_eq!(
            restored.download.default_post_process,
            original.download.default_post_process
        );
        assert_eq!(restored.database_path, original.database_path);
        assert_eq!(restored.retry.max_attempts, original.retry.max_attempts);
        assert_eq!(restored.retry.initial_delay, original.retry.initial_delay);
    }

    #[test]
    fn duration_serde_serializes_as_seconds() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            ..RetryConfig::default()
        };

        let json = serde_json::to_value(&config).expect("serialize failed");

        assert_eq!(json["initial_delay"], 5);
        assert_eq!(json["max_delay"], 120);
    }

    #[test]
    fn duration_serde_deserializes_from_seconds() {
        let json = r#"{"max_attempts":3,"initial_delay":10,"max_delay":300,"backoff_multiplier":2.0,"jitter":false}"#;

        let config: RetryConfig = serde_json::from_str(json).expect("deserialize failed");

        assert_eq!(config.initial_delay, Duration::from_secs(10));
        assert_eq!(config.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn duration_serde_rejects_string_instead_of_integer() {
        let json = r#"{"initial_delay": "not_a_number", "max_delay": 60}"#;
        let result = serde_json::from_str::<RetryConfig>(json);

        match result {
            Err(e) => {
                let msg = e.to_string();
                assert!(msg.contains("invalid type") || msg.contains("expected"));
            }
            Ok(_) => panic!("string value for a Duration field must produce a serde error"),
        }
    }

    #[test]
    fn server_config_defaults_to_ten_connections() {
        let json = r#"{"host":"news.example.com","port":563,"tls":true,"username":null,"password":null}"#;
        let server: ServerConfig = serde_json::from_str(json).expect("deserialize failed");
        assert_eq!(server.connections, 10);
        assert_eq!(server.priority, 0);
    }
}
