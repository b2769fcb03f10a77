//! DualWrite - Dual-replica PostgreSQL write coordinator
//!
//! Serves the budget API, writing every change to both replicas with the
//! acting user bound for the audit trigger, and provides the operator
//! commands around it.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dualwrite::api::HttpServer;
use dualwrite::audit::{self, trigger, AuditAction, AuditFilter};
use dualwrite::budget::BudgetService;
use dualwrite::config::{
    ApiConfig, AuditConfig, BudgetConfig, CoordinatorConfig, DualWriteConfig, LoggingConfig, TriggerMode,
};
use dualwrite::coordinator::{DualWriter, ReplicationStatus, UnitOfWork, WriteStatement};
use dualwrite::error::{Error, Result};
use dualwrite::replica::{MemoryCluster, PgConnector, ReplicaConnector, ReplicaName, ReplicaScope};

/// DualWrite - Dual-replica PostgreSQL write coordinator
#[derive(Parser)]
#[command(name = "dualwrite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "dualwrite.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to [logging].level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Use in-memory replicas instead of PostgreSQL
        #[arg(long)]
        memory: bool,

        /// Override [api].bind_address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "dualwrite.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Check that both replicas are reachable
    Check,

    /// Create the audit table and install the audit trigger on both replicas
    InstallAudit {
        /// Record the system user instead of failing when no actor is bound
        #[arg(long)]
        lenient: bool,
    },

    /// Remove the audit trigger from both replicas, keeping the history
    RemoveAudit,

    /// Browse the audit trail
    Audit {
        /// Substring of the acting user's email
        #[arg(long)]
        email: Option<String>,

        /// INSERT, UPDATE or DELETE
        #[arg(long)]
        action: Option<AuditAction>,

        /// Substring of the term number
        #[arg(long)]
        term: Option<String>,

        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        until: Option<NaiveDate>,

        /// Maximum number of rows
        #[arg(short = 'n', long)]
        limit: Option<i64>,

        /// Replica to read from (local or secondary)
        #[arg(long)]
        replica: Option<ReplicaName>,

        /// Show statistics instead of rows
        #[arg(long)]
        stats: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it can be read
    let logging = DualWriteConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or_else(|| logging.level.clone());
    init_logging(&level, &logging);

    match cli.command {
        Commands::Serve { memory, bind } => run_serve(&cli.config, memory, bind).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(&cli.config),
        Commands::Check => run_check(&cli.config).await,
        Commands::InstallAudit { lenient } => run_install_audit(&cli.config, lenient).await,
        Commands::RemoveAudit => run_remove_audit(&cli.config).await,
        Commands::Audit {
            email,
            action,
            term,
            since,
            until,
            limit,
            replica,
            stats,
            json,
        } => {
            let mut filter = AuditFilter::new();
            if let Some(email) = email {
                filter = filter.with_email(email);
            }
            if let Some(action) = action {
                filter = filter.with_action(action);
            }
            if let Some(term) = term {
                filter = filter.with_term(term);
            }
            if let Some(since) = since {
                filter = filter.since_day(since);
            }
            if let Some(until) = until {
                filter = filter.until_day(until);
            }
            if let Some(limit) = limit {
                filter = filter.with_limit(limit);
            }
            run_audit(&cli.config, filter, replica, stats, json).await
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let writer = match &logging.file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => BoxMakeWriter::new(Arc::new(file)),
            Err(e) => {
                eprintln!("Cannot open log file {}: {}; logging to stdout", path.display(), e);
                BoxMakeWriter::new(std::io::stdout)
            }
        },
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let (pretty, json) = if logging.format.eq_ignore_ascii_case("json") {
        (None, Some(tracing_subscriber::fmt::layer().json().with_writer(writer)))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_writer(writer)), None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty)
        .with(json)
        .init();
}

fn load_config(config_path: &Path) -> Result<DualWriteConfig> {
    match DualWriteConfig::from_file(config_path) {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            Err(e)
        }
    }
}

fn pg_connector(config: &DualWriteConfig) -> Arc<dyn ReplicaConnector> {
    Arc::new(PgConnector::new(&config.replicas))
}

/// Start the HTTP API
async fn run_serve(config_path: &Path, memory: bool, bind: Option<String>) -> Result<()> {
    tracing::info!("Starting DualWrite...");

    let (coordinator, budget, audit_config, mut api, connector) = if memory {
        // A config file is optional here; only its non-replica sections are used
        let config = if config_path.exists() {
            Some(load_config(config_path)?)
        } else {
            None
        };
        tracing::warn!("Using in-memory replicas; nothing is persisted");
        let connector = MemoryCluster::new().connector();
        match config {
            Some(c) => (c.coordinator, c.budget, c.audit, c.api, connector),
            None => (
                CoordinatorConfig::default(),
                BudgetConfig::default(),
                AuditConfig::default(),
                ApiConfig::default(),
                connector,
            ),
        }
    } else {
        let config = load_config(config_path)?;
        let connector = pg_connector(&config);
        tracing::info!(
            "Replicas: local {}:{}/{}, secondary {}:{}/{}",
            config.replicas.local.host,
            config.replicas.local.port,
            config.replicas.local.database,
            config.replicas.secondary.host,
            config.replicas.secondary.port,
            config.replicas.secondary.database
        );
        (config.coordinator, config.budget, config.audit, config.api, connector)
    };

    if let Some(bind) = bind {
        api.bind_address = bind;
    }
    if !api.enabled {
        tracing::warn!("HTTP API is disabled in the configuration; nothing to serve");
        return Ok(());
    }

    tracing::info!(
        "Consistency {:?}, fan-out {:?}, replace strategy {:?}",
        coordinator.consistency,
        coordinator.fan_out,
        budget.replace_strategy
    );

    let writer = DualWriter::new(&coordinator, &audit_config);
    let service = BudgetService::new(writer, &budget);
    let http_server = HttpServer::new(api, service, connector);

    tokio::select! {
        result = http_server.start() => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!(
            "{} already exists; remove it or choose another --output",
            output.display()
        )));
    }

    let config_content = r#"# DualWrite Configuration
# Generated configuration file

[replicas.local]
host = "localhost"
port = 5432
user = "dualwrite"
password = "changeme"
database = "parcerias"
connect_timeout_secs = 10

[replicas.secondary]
host = "secondary.example.net"
port = 5432
user = "dualwrite"
password = "changeme"
database = "parcerias"
connect_timeout_secs = 10
require_tls = true

[coordinator]
consistency = "require-any"   # or "require-all"
fan_out = "concurrent"        # or "sequential"
statement_timeout_ms = 15000

[budget]
tolerance = "0.01"
replace_strategy = "single-transaction"   # or "per-statement"

[audit]
actor_setting = "app.current_user_id"
trigger_mode = "strict"   # or "lenient"

[api]
enabled = true
bind_address = "0.0.0.0:8080"
cors_enabled = false

[logging]
level = "info"
format = "pretty"
# file = "/var/log/dualwrite/dualwrite.log"
"#;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure both replicas.");
    println!("Then install the audit trigger with: dualwrite --config {} install-audit", output.display());
    println!("and start with: dualwrite --config {} serve", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> Result<()> {
    match DualWriteConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            for name in ReplicaName::ALL {
                let db = config.replica(name);
                println!(
                    "  {:<10} {}@{}:{}/{}{}",
                    format!("{}:", name),
                    db.user,
                    db.host,
                    db.port,
                    db.database,
                    if db.require_tls { " (tls)" } else { "" }
                );
            }
            println!("  Consistency: {:?}", config.coordinator.consistency);
            println!("  Fan-out:     {:?}", config.coordinator.fan_out);
            println!("  Strategy:    {:?}", config.budget.replace_strategy);
            println!("  Actor:       {}", config.audit.actor_setting);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Ping both replicas
async fn run_check(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let mut scope = ReplicaScope::new(pg_connector(&config));

    let mut reachable = 0;
    for name in ReplicaName::ALL {
        let db = config.replica(name);
        let result = match scope.acquire(name).await {
            Ok(conn) => conn.ping().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                reachable += 1;
                println!("✓ {} ({}:{}) is reachable", name, db.host, db.port);
            }
            Err(e) => println!("✗ {} ({}:{}): {}", name, db.host, db.port, e),
        }
    }
    scope.release().await;

    if reachable == 0 {
        return Err(Error::Network("no replica is reachable".to_string()));
    }
    Ok(())
}

/// Run DDL on both replicas and report per replica
async fn apply_everywhere(config: &DualWriteConfig, statements: Vec<WriteStatement>, what: &str) -> Result<()> {
    let writer = DualWriter::new(&config.coordinator, &config.audit);
    let mut scope = ReplicaScope::new(pg_connector(config));
    let result = writer.write_unit(&mut scope, &UnitOfWork::new(statements)).await;
    scope.release().await;

    for name in ReplicaName::ALL {
        let outcome = result.outcome(name);
        if outcome.succeeded {
            println!("  ✓ {}: {}", name, what);
        } else {
            println!("  ✗ {}: {}", name, outcome.error.as_deref().unwrap_or("failed"));
        }
    }

    match result.status() {
        ReplicationStatus::FullyReplicated => Ok(()),
        status => Err(Error::Internal(format!("{}: {}", what, status))),
    }
}

async fn run_install_audit(config_path: &Path, lenient: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let mode = if lenient {
        TriggerMode::Lenient
    } else {
        config.audit.trigger_mode
    };
    let statements = trigger::install_statements(&config.audit.actor_setting, mode)?;

    println!(
        "Installing {} ({:?}) on {} reading {}",
        trigger::TRIGGER_NAME,
        mode,
        trigger::AUDIT_TABLE,
        config.audit.actor_setting
    );
    apply_everywhere(&config, statements, "audit trigger installed").await
}

async fn run_remove_audit(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!(
        "Removing {} and {}; {} is kept",
        trigger::TRIGGER_NAME,
        trigger::FUNCTION_NAME,
        trigger::AUDIT_TABLE
    );
    apply_everywhere(&config, trigger::remove_statements(), "audit trigger removed").await
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| Error::Internal(e.to_string()))
}

/// Show audit rows or statistics
async fn run_audit(
    config_path: &Path,
    filter: AuditFilter,
    replica: Option<ReplicaName>,
    stats: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut scope = ReplicaScope::new(pg_connector(&config));

    if stats {
        let result = audit::audit_stats(&mut scope, replica).await;
        scope.release().await;
        let (source, stats) = result?;

        if json {
            println!("{}", to_json(&stats)?);
            return Ok(());
        }
        println!("Audit statistics ({})", source);
        println!("=========================");
        println!("Total:            {}", stats.total);
        println!("  Inserts:        {}", stats.inserts);
        println!("  Updates:        {}", stats.updates);
        println!("  Deletes:        {}", stats.deletes);
        println!("Users:            {}", stats.distinct_actors);
        println!("Rows touched:     {}", stats.distinct_rows);
        if let (Some(first), Some(last)) = (stats.first_modification, stats.last_modification) {
            println!("Period:           {} .. {}", first.format("%Y-%m-%d %H:%M"), last.format("%Y-%m-%d %H:%M"));
        }
        if !stats.top_actors.is_empty() {
            println!();
            println!("Most active users:");
            for actor in &stats.top_actors {
                println!("  {:>6}  {}", actor.actions, actor.email);
            }
        }
        return Ok(());
    }

    let result = audit::audit_trail(&mut scope, replica, &filter).await;
    scope.release().await;
    let (source, records) = result?;

    if json {
        println!("{}", to_json(&records)?);
        return Ok(());
    }
    println!("{} audit rows from {}", records.len(), source);
    for record in &records {
        println!(
            "#{:<8} {}  {:<6}  {:<28}  {:<12}  row {}",
            record.id,
            record.modified_at.format("%Y-%m-%d %H:%M:%S"),
            record.action.as_str(),
            record
                .actor_email
                .clone()
                .unwrap_or_else(|| format!("user {}", record.actor_id)),
            record.numero_termo.as_deref().unwrap_or("-"),
            record.row_id
        );
        for change in record.changes() {
            let show = |v: &Option<serde_json::Value>| v.as_ref().map_or("-".to_string(), |v| v.to_string());
            println!("           {}: {} -> {}", change.field, show(&change.before), show(&change.after));
        }
    }
    Ok(())
}
