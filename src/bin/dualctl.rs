//! DualCtl - Command line client for a running DualWrite API
//!
//! Usage:
//!   dualctl health                 - Show replica reachability
//!   dualctl term T-001             - Show a term and its month count
//!   dualctl lines T-001            - Show the stored budget of a term
//!   dualctl submit budget.json     - Replace the budget of a term
//!   dualctl audit --email maria    - Browse the audit trail

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

/// DualWrite Control Tool
#[derive(Parser)]
#[command(name = "dualctl")]
#[command(about = "Query and drive a DualWrite API", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "dualwrite.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Acting user id sent with writes
    #[arg(short, long)]
    user: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show replica reachability
    Health,
    /// Show a term
    Term { numero_termo: String },
    /// Show the stored budget lines of a term revision
    Lines {
        numero_termo: String,
        #[arg(short, long, default_value_t = 0)]
        aditivo: i32,
    },
    /// Replace the budget of a term from a JSON file
    Submit {
        file: PathBuf,
        /// Skip the expected-total check
        #[arg(long)]
        confirm: bool,
    },
    /// Change one month's amount from a JSON file
    Update { file: PathBuf },
    /// Browse the audit trail
    Audit {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        term: Option<String>,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,
        #[arg(short = 'n', long)]
        limit: Option<i64>,
        #[arg(long)]
        replica: Option<String>,
    },
    /// Show audit statistics
    Stats {
        #[arg(long)]
        replica: Option<String>,
    },
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct HealthResponse {
    healthy: bool,
    replicas: Vec<ReplicaHealth>,
}

#[derive(Debug, Deserialize)]
struct ReplicaHealth {
    replica: String,
    reachable: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

// ============ Config ============

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    api: ApiConfig,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfig {
    #[serde(default = "default_api_bind")]
    bind_address: String,
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080";

fn endpoint_from_config(path: &Path) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return DEFAULT_ENDPOINT.to_string();
    };
    match toml::from_str::<Config>(&content) {
        Ok(config) => {
            let addr = config.api.bind_address;
            // A wildcard bind is reached through loopback
            if addr.starts_with("0.0.0.0") {
                format!("http://127.0.0.1:{}", addr.split(':').nth(1).unwrap_or("8080"))
            } else {
                format!("http://{}", addr)
            }
        }
        Err(_) => DEFAULT_ENDPOINT.to_string(),
    }
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let endpoint = cli
        .endpoint
        .clone()
        .unwrap_or_else(|| endpoint_from_config(&cli.config));
    let client = Client {
        http: reqwest::Client::new(),
        endpoint: endpoint.trim_end_matches('/').to_string(),
        user: cli.user,
    };

    if let Err(e) = run(&cli.command, &client).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

struct Client {
    http: reqwest::Client,
    endpoint: String,
    user: Option<i64>,
}

impl Client {
    fn url(&self, path: &str) -> Result<reqwest::Url> {
        reqwest::Url::parse(&format!("{}{}", self.endpoint, path))
            .with_context(|| format!("invalid endpoint {}", self.endpoint))
    }

    /// URL of a resource keyed by a value that may itself contain `/`
    fn item_url(&self, path: &str, value: &str) -> Result<reqwest::Url> {
        let mut url = self.url(path)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("endpoint {} cannot carry a path", self.endpoint))?
            .extend(value.split('/'));
        Ok(url)
    }

    fn with_user(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.user {
            Some(user) => request.header("x-user-id", user.to_string()),
            None => request,
        }
    }
}

async fn run(command: &Commands, client: &Client) -> Result<()> {
    match command {
        Commands::Health => show_health(client).await,
        Commands::Term { numero_termo } => {
            show_json(client, client.item_url("/api/termo", numero_termo)?, &[]).await
        }
        Commands::Lines { numero_termo, aditivo } => {
            show_json(
                client,
                client.item_url("/api/despesas", numero_termo)?,
                &[("aditivo", Some(aditivo.to_string()))],
            )
            .await
        }
        Commands::Submit { file, confirm } => submit(client, file, *confirm).await,
        Commands::Update { file } => update(client, file).await,
        Commands::Audit {
            email,
            action,
            term,
            since,
            until,
            limit,
            replica,
        } => {
            show_json(
                client,
                client.url("/api/auditoria")?,
                &[
                    ("email", email.clone()),
                    ("acao", action.clone()),
                    ("termo", term.clone()),
                    ("desde", since.clone()),
                    ("ate", until.clone()),
                    ("limite", limit.map(|l| l.to_string())),
                    ("replica", replica.clone()),
                ],
            )
            .await
        }
        Commands::Stats { replica } => {
            show_json(client, client.url("/api/auditoria/stats")?, &[("replica", replica.clone())]).await
        }
    }
}

/// Turn a response into JSON, surfacing the API's error body on failure
async fn read_json(response: reqwest::Response) -> Result<(reqwest::StatusCode, Value)> {
    let status = response.status();
    let body: Value = response.json().await.context("response is not JSON")?;
    if status.is_client_error() || status.is_server_error() {
        if let Ok(err) = serde_json::from_value::<ErrorResponse>(body.clone()) {
            bail!("{} ({}): {}", status, err.code, err.error);
        }
    }
    Ok((status, body))
}

fn read_body(file: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{} is not valid JSON", file.display()))
}

// ============ Commands ============

async fn show_health(client: &Client) -> Result<()> {
    let response = client.http.get(client.url("/health")?).send().await?;
    let health: HealthResponse = response.json().await?;

    println!();
    println!("DualWrite Health (dualctl v{})", env!("CARGO_PKG_VERSION"));
    println!("==============================");
    for replica in &health.replicas {
        let state = if replica.reachable {
            "\x1b[32mreachable\x1b[0m"
        } else {
            "\x1b[31munreachable\x1b[0m"
        };
        match &replica.error {
            Some(error) => println!("{:<10} {}  {}", replica.replica, state, error),
            None => println!("{:<10} {}", replica.replica, state),
        }
    }
    println!();

    if !health.healthy {
        bail!("no replica is reachable");
    }
    Ok(())
}

async fn show_json(client: &Client, url: reqwest::Url, query: &[(&str, Option<String>)]) -> Result<()> {
    let params: Vec<(&str, &str)> = query
        .iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| (*k, v)))
        .collect();
    let response = client.http.get(url).query(&params).send().await?;
    let (_, body) = read_json(response).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn submit(client: &Client, file: &Path, confirm: bool) -> Result<()> {
    let body = read_body(file)?;
    let path = if confirm { "/api/despesa/confirmar" } else { "/api/despesa" };
    let request = client.with_user(client.http.post(client.url(path)?).json(&body));
    let (status, body) = read_json(request.send().await?).await?;

    if body.get("warning").and_then(Value::as_bool).unwrap_or(false) {
        println!("{}", body["message"].as_str().unwrap_or("totals differ"));
        println!("Nothing was written. Re-run with --confirm to save anyway.");
        return Ok(());
    }

    println!("{}", body["message"].as_str().unwrap_or_default());
    println!(
        "local: {}/{}  secondary: {}/{}",
        body["databases"]["local_count"], body["registros"], body["databases"]["secondary_count"], body["registros"]
    );
    if let Some(errors) = body["errors"].as_array() {
        for error in errors {
            println!("  ! {}", error.as_str().unwrap_or_default());
        }
    }
    if !status.is_success() {
        bail!("nothing was saved");
    }
    Ok(())
}

async fn update(client: &Client, file: &Path) -> Result<()> {
    let body = read_body(file)?;
    let request = client.with_user(client.http.put(client.url("/api/despesa")?).json(&body));
    let (status, body) = read_json(request.send().await?).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        bail!("update failed on every replica");
    }
    Ok(())
}
