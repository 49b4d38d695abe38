//! Configuration for portd

use std::path::PathBuf;
use std::time::Duration;

use port_accounting::{eligibility::DEFAULT_MIN_BALANCE, Sensitivity};
use port_cron::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// Bytes of reported delta in one cycle that make a user count as active.
pub const DEFAULT_ACTIVE_THRESHOLD: u64 = 1024 * 1024;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// This node
    #[serde(default)]
    pub node: NodeConfig,

    /// Tick loop
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// The sync job
    #[serde(default)]
    pub sync: SyncConfig,

    /// Report threshold bounds
    #[serde(default)]
    pub sensitivity: Sensitivity,

    /// The node watch job
    #[serde(default)]
    pub node_watch: NodeWatchConfig,

    /// Scheduled and timeout-triggered restarts
    #[serde(default)]
    pub restart: RestartConfig,

    /// HAProxy runtime API
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Files the adapters read and write
    #[serde(default)]
    pub paths: PathsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id (`node:<uuid>` or bare uuid)
    #[serde(default)]
    pub id: Option<String>,

    /// Seconds between lookups while this node is unknown
    #[serde(default = "default_lookup_retry")]
    pub lookup_retry_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            lookup_retry_secs: default_lookup_retry(),
        }
    }
}

/// Sync job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Run every N ticks
    #[serde(default = "default_sync_period")]
    pub period: u64,

    /// Timeout in seconds
    #[serde(default = "default_job_timeout")]
    pub timeout_secs: u64,

    /// Minimum balance on paid nodes
    #[serde(default = "default_min_balance")]
    pub min_balance: i64,

    /// Reported bytes per cycle that count a user as active
    #[serde(default = "default_active_threshold")]
    pub active_threshold: u64,

    /// While this file exists every user is revoked
    #[serde(default)]
    pub stop_file: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            period: default_sync_period(),
            timeout_secs: default_job_timeout(),
            min_balance: default_min_balance(),
            active_threshold: default_active_threshold(),
            stop_file: Some(PathBuf::from("/tmp/stop_port")),
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Node watch job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeWatchConfig {
    /// Run every N ticks
    #[serde(default = "default_node_watch_period")]
    pub period: u64,

    /// Timeout in seconds
    #[serde(default = "default_job_timeout")]
    pub timeout_secs: u64,
}

impl Default for NodeWatchConfig {
    fn default() -> Self {
        Self {
            period: default_node_watch_period(),
            timeout_secs: default_job_timeout(),
        }
    }
}

impl NodeWatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Restart configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Local hour of the daily restart
    #[serde(default = "default_restart_hour")]
    pub hour: u32,

    /// UTC offset of the daily restart, in hours
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,

    /// Upper bound of the random delay added to the daily restart
    #[serde(default = "default_max_jitter")]
    pub max_jitter_secs: u64,

    /// Timeout of the restart job in seconds
    #[serde(default = "default_restart_timeout")]
    pub timeout_secs: u64,

    /// Delay between the restart decision and exit
    #[serde(default = "default_grace")]
    pub grace_secs: u64,

    /// Command run right before exit, e.g. a host reboot helper
    #[serde(default)]
    pub command: Vec<String>,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            hour: default_restart_hour(),
            utc_offset_hours: default_utc_offset(),
            max_jitter_secs: default_max_jitter(),
            timeout_secs: default_restart_timeout(),
            grace_secs: default_grace(),
            command: Vec::new(),
        }
    }
}

impl RestartConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// HAProxy runtime API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Admin socket
    #[serde(default = "default_socket")]
    pub socket: PathBuf,

    /// Map file holding credential digests
    #[serde(default = "default_user_map")]
    pub user_map: String,

    /// Stick table counting client-to-proxy bytes
    #[serde(default = "default_upload_table")]
    pub upload_table: String,

    /// Stick table counting proxy-to-client bytes
    #[serde(default = "default_download_table")]
    pub download_table: String,

    /// Basic-auth user name paired with every credential
    #[serde(default = "default_auth_user")]
    pub auth_user: String,

    /// Table keys that never belong to a user
    #[serde(default = "default_reserved_keys")]
    pub reserved_keys: Vec<i64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            user_map: default_user_map(),
            upload_table: default_upload_table(),
            download_table: default_download_table(),
            auth_user: default_auth_user(),
            reserved_keys: default_reserved_keys(),
        }
    }
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// JSON document with the node and user sets
    #[serde(default = "default_snapshot")]
    pub snapshot: PathBuf,

    /// Upload spool, one JSON record per line
    #[serde(default = "default_spool")]
    pub spool: PathBuf,

    /// Active user gauge
    #[serde(default = "default_gauge")]
    pub gauge: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            snapshot: default_snapshot(),
            spool: default_spool(),
            gauge: default_gauge(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_lookup_retry() -> u64 {
    60
}

fn default_sync_period() -> u64 {
    1
}

fn default_node_watch_period() -> u64 {
    2
}

fn default_job_timeout() -> u64 {
    360
}

fn default_min_balance() -> i64 {
    DEFAULT_MIN_BALANCE
}

fn default_active_threshold() -> u64 {
    DEFAULT_ACTIVE_THRESHOLD
}

fn default_restart_hour() -> u32 {
    4
}

fn default_utc_offset() -> i32 {
    8
}

fn default_max_jitter() -> u64 {
    600
}

fn default_restart_timeout() -> u64 {
    180
}

fn default_grace() -> u64 {
    60
}

fn default_socket() -> PathBuf {
    PathBuf::from("/tmp/haproxy.sock")
}

fn default_user_map() -> String {
    "/tmp/usermap".to_string()
}

fn default_upload_table() -> String {
    "st_in".to_string()
}

fn default_download_table() -> String {
    "st_out".to_string()
}

fn default_auth_user() -> String {
    "port".to_string()
}

fn default_reserved_keys() -> Vec<i64> {
    vec![0, 198964]
}

fn default_snapshot() -> PathBuf {
    PathBuf::from("/var/lib/port/snapshot.json")
}

fn default_spool() -> PathBuf {
    PathBuf::from("/var/lib/port/uploads.jsonl")
}

fn default_gauge() -> PathBuf {
    PathBuf::from("/var/lib/port/.active_user")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `PORT__*`
    /// environment variables (`PORT__SYNC__PERIOD=2`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with PORT prefix
        builder = builder.add_source(
            config::Environment::with_prefix("PORT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: DaemonConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no job could run with.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        self.sensitivity
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        if self.sync.period == 0 || self.node_watch.period == 0 {
            return Err(config::ConfigError::Message(
                "job periods must be at least one tick".into(),
            ));
        }
        if self.restart.hour > 23 {
            return Err(config::ConfigError::Message(format!(
                "restart hour out of range: {}",
                self.restart.hour
            )));
        }
        if self.restart.utc_offset_hours.abs() > 14 {
            return Err(config::ConfigError::Message(format!(
                "UTC offset out of range: {}",
                self.restart.utc_offset_hours
            )));
        }
        Ok(())
    }
}
