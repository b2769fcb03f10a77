//! HTTP API Server
//!
//! REST API over the budget use cases, the audit trail and replica health.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::{self, ActorId, AuditAction, AuditFilter, AuditRecord, AuditStats, FieldChange};
use crate::budget::{AmountUpdate, BudgetRow, BudgetService, ReplaceOutcome, ReplaceRequest, ReplaceStatus};
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::replica::{ReplicaConnector, ReplicaName, ReplicaScope};

/// Header carrying the acting user's id
pub const USER_HEADER: &str = "x-user-id";

/// Shared application state
pub struct AppState {
    /// Budget use cases
    pub budget: BudgetService,
    /// Opens replica connections for each request scope
    pub connector: Arc<dyn ReplicaConnector>,
}

impl AppState {
    fn scope(&self) -> ReplicaScope {
        ReplicaScope::new(Arc::clone(&self.connector))
    }
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, budget: BudgetService, connector: Arc<dyn ReplicaConnector>) -> Self {
        let state = Arc::new(AppState { budget, connector });
        Self { config, state }
    }

    /// Create the router
    pub fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
        let router = Router::new()
            // Budget writes
            .route("/api/despesa", post(handle_replace).put(handle_update_amount))
            .route("/api/despesa/confirmar", post(handle_replace_confirmed))
            // Budget reads
            .route("/api/despesas/*numero_termo", get(handle_budget_rows))
            .route("/api/termo/*numero_termo", get(handle_term))
            .route("/api/categorias", get(handle_categories))
            .route("/api/rubrica-sugerida/*categoria", get(handle_suggested_rubrica))
            // Audit trail
            .route("/api/auditoria", get(handle_audit))
            .route("/api/auditoria/stats", get(handle_audit_stats))
            // Health
            .route("/health", get(handle_health))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        if cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state), self.config.cors_enabled);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Query of the budget rows endpoint
#[derive(Debug, Default, Deserialize)]
pub struct RevisionQuery {
    #[serde(default)]
    pub aditivo: i32,
}

#[derive(Debug, Serialize)]
pub struct BudgetRowsResponse {
    pub numero_termo: String,
    pub aditivo: i32,
    pub despesas: Vec<BudgetRow>,
}

#[derive(Debug, Serialize)]
pub struct CategoriesResponse {
    pub categorias: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RubricaResponse {
    pub rubrica: Option<String>,
}

/// Query of the audit endpoints; dates are `YYYY-MM-DD`
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub email: Option<String>,
    pub acao: Option<String>,
    pub termo: Option<String>,
    pub desde: Option<String>,
    pub ate: Option<String>,
    pub limite: Option<i64>,
    pub replica: Option<String>,
}

/// Audit row with its field-level changes
#[derive(Debug, Serialize)]
pub struct AuditEntry {
    #[serde(flatten)]
    pub record: AuditRecord,
    pub alteracoes: Vec<FieldChange>,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub replica: ReplicaName,
    pub total: usize,
    pub registros: Vec<AuditEntry>,
}

#[derive(Debug, Serialize)]
pub struct AuditStatsResponse {
    pub replica: ReplicaName,
    #[serde(flatten)]
    pub stats: AuditStats,
}

/// Reachability of one replica
#[derive(Debug, Serialize)]
pub struct ReplicaHealth {
    pub replica: ReplicaName,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub replicas: Vec<ReplicaHealth>,
}

/// Error wrapper turning crate errors into HTTP responses
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            Error::TermNotFound(_) => (StatusCode::NOT_FOUND, "TERM_NOT_FOUND"),
            Error::RowNotFound(_) => (StatusCode::NOT_FOUND, "ROW_NOT_FOUND"),
            e if e.is_client_error() => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            e if e.is_retryable() => (StatusCode::SERVICE_UNAVAILABLE, "REPLICA_UNAVAILABLE"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

fn actor_from(headers: &HeaderMap) -> Result<ActorId> {
    let value = headers
        .get(USER_HEADER)
        .map(|v| {
            v.to_str()
                .map_err(|_| Error::Validation(format!("{} header is not valid text", USER_HEADER)))
        })
        .transpose()?;
    ActorId::from_header(value)
}

fn parse_day(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("{} must be a date like 2025-01-31", field)))
}

fn is_set(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn replica_from(query: &AuditQuery) -> Result<Option<ReplicaName>> {
    is_set(&query.replica).map(str::parse::<ReplicaName>).transpose()
}

impl AuditQuery {
    fn to_filter(&self) -> Result<AuditFilter> {
        let mut filter = AuditFilter::new();
        if let Some(email) = is_set(&self.email) {
            filter = filter.with_email(email);
        }
        if let Some(acao) = is_set(&self.acao) {
            filter = filter.with_action(acao.parse::<AuditAction>()?);
        }
        if let Some(termo) = is_set(&self.termo) {
            filter = filter.with_term(termo);
        }
        if let Some(desde) = is_set(&self.desde) {
            filter = filter.since_day(parse_day("desde", desde)?);
        }
        if let Some(ate) = is_set(&self.ate) {
            filter = filter.until_day(parse_day("ate", ate)?);
        }
        if let Some(limite) = self.limite {
            filter = filter.with_limit(limite);
        }
        Ok(filter)
    }
}

// ============ Handlers ============

async fn replace(state: &AppState, headers: &HeaderMap, req: &ReplaceRequest, confirm: bool) -> ApiResult {
    let actor = actor_from(headers)?;
    let mut scope = state.scope();
    let outcome = state
        .budget
        .replace_term_budget_lines(&mut scope, req, actor, confirm)
        .await;
    scope.release().await;

    match outcome? {
        ReplaceOutcome::TotalMismatch(warning) => Ok((StatusCode::OK, Json(warning)).into_response()),
        ReplaceOutcome::Applied(summary) => {
            let status = match summary.status {
                ReplaceStatus::NoReplica => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::CREATED,
            };
            Ok((status, Json(summary)).into_response())
        }
    }
}

async fn handle_replace(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ReplaceRequest>,
) -> ApiResult {
    replace(&state, &headers, &req, false).await
}

async fn handle_replace_confirmed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ReplaceRequest>,
) -> ApiResult {
    replace(&state, &headers, &req, true).await
}

async fn handle_update_amount(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<AmountUpdate>,
) -> ApiResult {
    let actor = actor_from(&headers)?;
    let mut scope = state.scope();
    let result = state.budget.update_amount(&mut scope, &update, actor).await;
    scope.release().await;

    let result = result?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(result)).into_response())
}

async fn handle_budget_rows(
    State(state): State<Arc<AppState>>,
    Path(numero_termo): Path<String>,
    Query(query): Query<RevisionQuery>,
) -> ApiResult {
    let mut scope = state.scope();
    let rows = state
        .budget
        .budget_rows(&mut scope, &numero_termo, query.aditivo)
        .await;
    scope.release().await;

    Ok(Json(BudgetRowsResponse {
        numero_termo,
        aditivo: query.aditivo,
        despesas: rows?,
    })
    .into_response())
}

async fn handle_term(State(state): State<Arc<AppState>>, Path(numero_termo): Path<String>) -> ApiResult {
    let mut scope = state.scope();
    let info = state.budget.term_info(&mut scope, &numero_termo).await;
    scope.release().await;
    Ok(Json(info?).into_response())
}

async fn handle_categories(State(state): State<Arc<AppState>>) -> ApiResult {
    let mut scope = state.scope();
    let categorias = state.budget.categories(&mut scope).await;
    scope.release().await;
    Ok(Json(CategoriesResponse { categorias: categorias? }).into_response())
}

async fn handle_suggested_rubrica(
    State(state): State<Arc<AppState>>,
    Path(categoria): Path<String>,
) -> ApiResult {
    let mut scope = state.scope();
    let rubrica = state.budget.suggested_rubrica(&mut scope, &categoria).await;
    scope.release().await;
    Ok(Json(RubricaResponse { rubrica: rubrica? }).into_response())
}

async fn handle_audit(State(state): State<Arc<AppState>>, Query(query): Query<AuditQuery>) -> ApiResult {
    let filter = query.to_filter()?;
    let replica = replica_from(&query)?;

    let mut scope = state.scope();
    let trail = audit::audit_trail(&mut scope, replica, &filter).await;
    scope.release().await;

    let (replica, records) = trail?;
    let registros: Vec<AuditEntry> = records
        .into_iter()
        .map(|record| AuditEntry {
            alteracoes: record.changes(),
            record,
        })
        .collect();
    Ok(Json(AuditResponse {
        replica,
        total: registros.len(),
        registros,
    })
    .into_response())
}

async fn handle_audit_stats(State(state): State<Arc<AppState>>, Query(query): Query<AuditQuery>) -> ApiResult {
    let replica = replica_from(&query)?;

    let mut scope = state.scope();
    let stats = audit::audit_stats(&mut scope, replica).await;
    scope.release().await;

    let (replica, stats) = stats?;
    Ok(Json(AuditStatsResponse { replica, stats }).into_response())
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut scope = state.scope();
    let mut replicas = Vec::with_capacity(ReplicaName::ALL.len());
    for name in ReplicaName::ALL {
        let result = match scope.acquire(name).await {
            Ok(conn) => conn.ping().await,
            Err(e) => Err(e),
        };
        replicas.push(ReplicaHealth {
            replica: name,
            reachable: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        });
    }
    scope.release().await;

    let healthy = replicas.iter().any(|r| r.reachable);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthResponse { healthy, replicas }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::Term;
    use crate::config::{AuditConfig, BudgetConfig, CoordinatorConfig};
    use crate::coordinator::DualWriter;
    use crate::replica::{FaultPlan, MemoryCluster};
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster
            .seed_term(Term {
                numero_termo: "T-001".into(),
                inicio: Some("2025-01-01".into()),
                termino: Some("2025-06-30".into()),
                total_previsto: Decimal::new(300_000, 2),
                meses: None,
            })
            .await;
        for replica in ReplicaName::ALL {
            cluster.replica(replica).seed_user(7, "maria@example.org").await;
        }
        cluster
    }

    fn router(cluster: &MemoryCluster) -> Router {
        let writer = DualWriter::new(&CoordinatorConfig::default(), &AuditConfig::default());
        let budget = BudgetService::new(writer, &BudgetConfig::default());
        let state = Arc::new(AppState {
            budget,
            connector: cluster.connector(),
        });
        HttpServer::create_router(state, false)
    }

    async fn send(cluster: &MemoryCluster, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(cluster).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn budget(total_first_month: &str) -> Value {
        json!({
            "numero_termo": "T-001",
            "aditivo": 0,
            "despesas": [{
                "rubrica": "Coordenação",
                "quantidade": 1,
                "categoria_despesa": "Pessoal",
                "valores_por_mes": {"1": total_first_month, "2": "1.000,00"}
            }]
        })
    }

    #[tokio::test]
    async fn test_replace_returns_created() {
        let cluster = cluster().await;
        let (status, body) = send(
            &cluster,
            json_request("POST", "/api/despesa", Some("7"), budget("2.000,00")),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"]["tier"], "all_replicas");
        assert_eq!(body["registros"], 2);
        assert_eq!(body["total_inserido"], 3000.0);
        assert_eq!(cluster.local().lines().await.len(), 2);
        assert_eq!(cluster.secondary().lines().await.len(), 2);
        assert!(cluster
            .secondary()
            .audit_rows()
            .await
            .iter()
            .all(|a| a.actor_id == 7));
    }

    #[tokio::test]
    async fn test_mismatch_is_a_warning() {
        let cluster = cluster().await;
        let (status, body) = send(
            &cluster,
            json_request("POST", "/api/despesa", None, budget("10,00")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["warning"], true);
        assert_eq!(body["total_previsto"], 3000.0);
        assert!(cluster.local().lines().await.is_empty());

        let (status, _) = send(
            &cluster,
            json_request("POST", "/api/despesa/confirmar", None, budget("10,00")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let audit = cluster.local().audit_rows().await;
        assert!(audit.iter().all(|a| a.actor_id == ActorId::SYSTEM.get()));
    }

    #[tokio::test]
    async fn test_client_errors() {
        let cluster = cluster().await;

        let mut unknown = budget("2.000,00");
        unknown["numero_termo"] = json!("T-404");
        let (status, body) = send(&cluster, json_request("POST", "/api/despesa", None, unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "TERM_NOT_FOUND");

        let (status, body) = send(
            &cluster,
            json_request("POST", "/api/despesa", None, json!({"numero_termo": "T-001"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");

        let (status, _) = send(
            &cluster,
            json_request("POST", "/api/despesa", Some("abc"), budget("2.000,00")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(cluster.local().received_statements().await.is_empty());
    }

    #[tokio::test]
    async fn test_replace_with_secondary_down() {
        let cluster = cluster().await;
        cluster
            .secondary()
            .set_faults(FaultPlan::unreachable("connection refused"))
            .await;

        let (status, body) = send(
            &cluster,
            json_request("POST", "/api/despesa", Some("7"), budget("2.000,00")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"]["tier"], "one_replica");
        assert_eq!(body["status"]["replica"], "local");
        assert_eq!(body["databases"]["secondary_count"], 0);
        assert!(body["errors"][0].as_str().unwrap().contains("connection refused"));

        let (status, body) = send(&cluster, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
        assert_eq!(body["replicas"][0]["reachable"], true);
        assert_eq!(body["replicas"][1]["reachable"], false);
    }

    #[tokio::test]
    async fn test_both_replicas_down() {
        let cluster = cluster().await;
        for replica in ReplicaName::ALL {
            cluster
                .replica(replica)
                .set_faults(FaultPlan::unreachable("down"))
                .await;
        }

        let (status, body) = send(&cluster, get("/health")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["healthy"], false);

        let (status, body) = send(&cluster, get("/api/termo/T-001")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "REPLICA_UNAVAILABLE");

        let (status, body) = send(
            &cluster,
            json_request("POST", "/api/despesa/confirmar", None, budget("2.000,00")),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"]["tier"], "no_replica");
    }

    #[tokio::test]
    async fn test_reads() {
        let cluster = cluster().await;
        send(
            &cluster,
            json_request("POST", "/api/despesa", Some("7"), budget("2.000,00")),
        )
        .await;

        let (status, body) = send(&cluster, get("/api/termo/T-001")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meses"], 6);
        assert_eq!(body["final"], "2025-06-30");

        let (_, body) = send(&cluster, get("/api/despesas/T-001?aditivo=0")).await;
        assert_eq!(body["despesas"][0]["rubrica"], "Coordenação");
        assert_eq!(body["despesas"][0]["valores_por_mes"]["1"], 2000.0);

        let (_, body) = send(&cluster, get("/api/categorias")).await;
        assert_eq!(body["categorias"], json!(["Pessoal"]));

        let (_, body) = send(&cluster, get("/api/rubrica-sugerida/Pessoal")).await;
        assert_eq!(body["rubrica"], "Coordenação");

        let (_, body) = send(&cluster, get("/api/rubrica-sugerida/Outros")).await;
        assert_eq!(body["rubrica"], Value::Null);
    }

    #[tokio::test]
    async fn test_update_amount() {
        let cluster = cluster().await;
        send(
            &cluster,
            json_request("POST", "/api/despesa", Some("7"), budget("2.000,00")),
        )
        .await;

        let update = json!({
            "numero_termo": "T-001",
            "rubrica": "Coordenação",
            "categoria_despesa": "Pessoal",
            "mes": 2,
            "valor": "1.500,00"
        });
        let (status, body) = send(&cluster, json_request("PUT", "/api/despesa", Some("7"), update.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let line = cluster
            .secondary()
            .lines()
            .await
            .into_iter()
            .find(|l| l.mes == 2)
            .unwrap();
        assert_eq!(line.valor, Decimal::new(150_000, 2));

        let mut missing = update;
        missing["mes"] = json!(9);
        let (status, body) = send(&cluster, json_request("PUT", "/api/despesa", Some("7"), missing)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "ROW_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_path_values_may_contain_slashes() {
        let cluster = cluster().await;
        cluster
            .seed_term(Term {
                numero_termo: "TFM/094/2023".into(),
                inicio: None,
                termino: None,
                total_previsto: Decimal::new(300_000, 2),
                meses: Some(2),
            })
            .await;
        let mut body = budget("2.000,00");
        body["numero_termo"] = json!("TFM/094/2023");
        body["despesas"][0]["categoria_despesa"] = json!("Material/Consumo");
        let (status, _) = send(&cluster, json_request("POST", "/api/despesa", Some("7"), body)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&cluster, get("/api/termo/TFM/094/2023")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["numero_termo"], "TFM/094/2023");

        let (status, body) = send(&cluster, get("/api/despesas/TFM/094/2023?aditivo=0")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["numero_termo"], "TFM/094/2023");
        assert_eq!(body["despesas"][0]["valores_por_mes"]["2"], 1000.0);

        let (status, body) = send(&cluster, get("/api/rubrica-sugerida/Material/Consumo")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rubrica"], "Coordenação");
    }

    #[tokio::test]
    async fn test_audit_trail_and_stats() {
        let cluster = cluster().await;
        send(
            &cluster,
            json_request("POST", "/api/despesa", Some("7"), budget("2.000,00")),
        )
        .await;

        let (status, body) = send(&cluster, get("/api/auditoria?email=MARIA&acao=insert&termo=t-0")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["replica"], "local");
        assert_eq!(body["total"], 2);
        assert_eq!(body["registros"][0]["acao"], "INSERT");
        assert_eq!(body["registros"][0]["usuario_email"], "maria@example.org");
        assert!(!body["registros"][0]["alteracoes"].as_array().unwrap().is_empty());

        let (_, body) = send(&cluster, get("/api/auditoria?acao=DELETE&replica=railway")).await;
        assert_eq!(body["replica"], "secondary");
        assert_eq!(body["total"], 0);

        let (_, body) = send(&cluster, get("/api/auditoria?ate=2000-01-01")).await;
        assert_eq!(body["total"], 0);

        let (status, body) = send(&cluster, get("/api/auditoria?acao=TRUNCATE")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");

        let (status, _) = send(&cluster, get("/api/auditoria?desde=31/01/2025")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&cluster, get("/api/auditoria/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["inserts"], 2);
        assert_eq!(body["top_actors"][0]["email"], "maria@example.org");
    }

    #[test]
    fn test_audit_query_to_filter() {
        let query = AuditQuery {
            email: Some("  ".into()),
            acao: Some("update".into()),
            desde: Some("2025-01-01".into()),
            ..AuditQuery::default()
        };
        let expected = AuditFilter::new()
            .with_action(AuditAction::Update)
            .since_day(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(query.to_filter().unwrap(), expected);
    }
}
