//! DualWrite Configuration
//!
//! This module provides configuration structures for the dual-replica
//! write coordinator and the services built on top of it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::replica::ReplicaName;

/// Main DualWrite configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualWriteConfig {
    /// Connection settings for both replicas
    pub replicas: ReplicasConfig,

    /// Write coordinator settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Budget use case settings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Audit trigger settings
    #[serde(default)]
    pub audit: AuditConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The two replicas every write is sent to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicasConfig {
    /// Primary replica
    pub local: DatabaseConfig,

    /// Redundant replica
    pub secondary: DatabaseConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// PostgreSQL host
    pub host: String,

    /// PostgreSQL port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Database name
    pub database: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Require TLS for this replica
    #[serde(default)]
    pub require_tls: bool,
}

/// How the aggregate success flag of a dual write is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConsistencyMode {
    /// Success when at least one replica committed
    #[default]
    RequireAny,
    /// Success only when both replicas committed
    RequireAll,
}

/// Whether the two replica attempts run together or one after the other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FanOut {
    #[default]
    Concurrent,
    Sequential,
}

/// Write coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Aggregate success policy
    #[serde(default)]
    pub consistency: ConsistencyMode,

    /// Replica scheduling
    #[serde(default)]
    pub fan_out: FanOut,

    /// Client-side bound for every transaction step, in milliseconds
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

/// How the replace-all-lines use case groups its statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReplaceStrategy {
    /// One coordinator call per statement (delete, then each insert)
    PerStatement,
    /// One locked transaction per replica holding the delete and all inserts
    #[default]
    SingleTransaction,
}

/// Budget use case configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Largest accepted difference between submitted and expected totals
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,

    /// Statement grouping for replace operations
    #[serde(default)]
    pub replace_strategy: ReplaceStrategy,
}

/// Behaviour of the installed audit trigger when no actor is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerMode {
    /// Raise, failing the mutating statement
    #[default]
    Strict,
    /// Fall back to the system actor
    Lenient,
}

/// Audit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Transaction-local setting the trigger reads the actor from
    #[serde(default = "default_actor_setting")]
    pub actor_setting: String,

    /// Trigger variant installed by `install-audit`
    #[serde(default)]
    pub trigger_mode: TriggerMode,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log to file path (optional)
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_db_port() -> u16 {
    5432
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_statement_timeout_ms() -> u64 {
    15_000
}

fn default_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

fn default_actor_setting() -> String {
    crate::audit::DEFAULT_ACTOR_SETTING.to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyMode::default(),
            fan_out: FanOut::default(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            replace_strategy: ReplaceStrategy::default(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            actor_setting: default_actor_setting(),
            trigger_mode: TriggerMode::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl CoordinatorConfig {
    /// Per-step timeout as Duration
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl DatabaseConfig {
    /// Connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl DualWriteConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: DualWriteConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        for name in ReplicaName::ALL {
            let db = self.replica(name);
            if db.host.is_empty() {
                return Err(crate::Error::Config(format!(
                    "replicas.{}.host cannot be empty",
                    name
                )));
            }
            if db.database.is_empty() {
                return Err(crate::Error::Config(format!(
                    "replicas.{}.database cannot be empty",
                    name
                )));
            }
            if db.connect_timeout_secs == 0 {
                return Err(crate::Error::Config(format!(
                    "replicas.{}.connect_timeout_secs must be positive",
                    name
                )));
            }
        }

        if self.coordinator.statement_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "coordinator.statement_timeout_ms must be positive".into(),
            ));
        }

        if self.budget.tolerance.is_sign_negative() {
            return Err(crate::Error::Config(
                "budget.tolerance cannot be negative".into(),
            ));
        }

        // Postgres only accepts custom settings in the form "prefix.name"
        if !self.audit.actor_setting.contains('.') {
            return Err(crate::Error::Config(format!(
                "audit.actor_setting '{}' must be a qualified name like app.current_user_id",
                self.audit.actor_setting
            )));
        }

        Ok(())
    }

    /// Connection settings for one replica
    pub fn replica(&self, name: ReplicaName) -> &DatabaseConfig {
        match name {
            ReplicaName::Local => &self.replicas.local,
            ReplicaName::Secondary => &self.replicas.secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[replicas.local]
host = "localhost"
user = "app"
password = "secret"
database = "parcerias"

[replicas.secondary]
host = "replica.example.net"
port = 6543
user = "app"
password = "secret"
database = "parcerias"
require_tls = true

[coordinator]
consistency = "require-all"
fan_out = "sequential"
statement_timeout_ms = 2000

[budget]
tolerance = "0.05"
replace_strategy = "per-statement"
"#;

    #[test]
    fn test_parse_config() {
        let config = DualWriteConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.replicas.local.port, 5432);
        assert_eq!(config.replicas.secondary.port, 6543);
        assert_eq!(config.coordinator.consistency, ConsistencyMode::RequireAll);
        assert_eq!(config.coordinator.fan_out, FanOut::Sequential);
        assert_eq!(config.budget.tolerance, Decimal::new(5, 2));
        assert_eq!(config.budget.replace_strategy, ReplaceStrategy::PerStatement);
        assert_eq!(config.audit.actor_setting, "app.current_user_id");
        assert_eq!(config.coordinator.statement_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let toml = r#"
[replicas.local]
host = "a"
user = "u"
password = "p"
database = "d"

[replicas.secondary]
host = "b"
user = "u"
password = "p"
database = "d"
"#;
        let config = DualWriteConfig::from_str(toml).unwrap();
        assert_eq!(config.coordinator.consistency, ConsistencyMode::RequireAny);
        assert_eq!(config.coordinator.fan_out, FanOut::Concurrent);
        assert_eq!(config.budget.tolerance, Decimal::new(1, 2));
        assert_eq!(
            config.budget.replace_strategy,
            ReplaceStrategy::SingleTransaction
        );
        assert_eq!(config.audit.trigger_mode, TriggerMode::Strict);
        assert!(config.api.enabled);
    }

    #[test]
    fn test_replica_selection() {
        let config = DualWriteConfig::from_str(SAMPLE).unwrap();
        let local = config.replica(ReplicaName::Local);
        assert_eq!((local.host.as_str(), local.port, local.require_tls), ("localhost", 5432, false));
        let secondary = config.replica(ReplicaName::Secondary);
        assert_eq!(
            (secondary.host.as_str(), secondary.port, secondary.require_tls),
            ("replica.example.net", 6543, true)
        );
    }

    #[test]
    fn test_rejects_unqualified_actor_setting() {
        let toml = format!("{}\n[audit]\nactor_setting = \"current_user_id\"\n", SAMPLE);
        let err = DualWriteConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("qualified name"));
    }

    #[test]
    fn test_rejects_empty_host() {
        let toml = SAMPLE.replace("host = \"localhost\"", "host = \"\"");
        let err = DualWriteConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("replicas.local.host"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dualwrite.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = DualWriteConfig::from_file(&path).unwrap();
        assert_eq!(config.replicas.secondary.host, "replica.example.net");
    }
}
