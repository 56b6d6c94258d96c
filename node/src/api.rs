//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the institution's HTTP interface.
//! All endpoints share application state through axum's `State` extractor;
//! the institution itself sits behind a `parking_lot::RwLock`, matching the
//! core's sequential state-machine model — every mutation holds the write
//! lock for the duration of the transition.
//!
//! ## Endpoints
//!
//! | Method | Path                        | Description                        |
//! |--------|-----------------------------|------------------------------------|
//! | GET    | `/health`                   | Liveness probe                     |
//! | GET    | `/status`                   | Institution status summary         |
//! | POST   | `/roles`                    | Assign a role (owner only)         |
//! | GET    | `/roles/:principal`         | Role/registration lookup           |
//! | POST   | `/managers`                 | Add a manager (admin only)         |
//! | POST   | `/managers/remove`          | Remove a manager (admin only)      |
//! | POST   | `/students`                 | Register a student (admin only)    |
//! | POST   | `/students/batch`           | Bulk registration, partial success |
//! | GET    | `/students/:id`             | Student record by id               |
//! | GET    | `/students/wallet/:wallet`  | Student record by wallet           |
//! | GET    | `/students/code/:code`      | Student record by code             |
//! | POST   | `/students/:id/deactivate`  | Deactivate (admin only)            |
//! | POST   | `/students/:id/activate`    | Reactivate (admin only)            |
//! | GET    | `/students/:id/documents`   | Ledger keys issued to a student    |
//! | GET    | `/students/:id/tokens`      | Token ids minted for a student     |
//! | POST   | `/documents`                | Sign a document (manager only)     |
//! | GET    | `/documents/:key`           | Issuance record by ledger key      |
//! | POST   | `/documents/:key/revoke`    | Revoke (admin only)                |
//! | POST   | `/documents/:key/reactivate`| Reactivate (admin only)            |
//! | GET    | `/tokens/:id`               | Token metadata and holder          |
//! | GET    | `/tokens/:id/valid`         | Validity check (never fails)       |
//! | POST   | `/tokens/:id/transfer`      | Holder-gated ownership transfer    |
//! | GET    | `/holders/:principal/tokens`| Tokens currently held              |
//! | GET    | `/ws`                       | WebSocket for live registry events |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tessera_registry::{
    AccessError, DocumentKind, DocumentRecord, Institution, LedgerError, NewStudent, NotaryError,
    Role, StudentError, StudentId, TokenError, TokenId, TokenMetadata,
};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Human-readable institution name.
    pub institution_name: String,
    /// The wired institution core. Write lock per mutation.
    pub institution: Arc<RwLock<Institution>>,
    /// Broadcast channel for live registry event notifications.
    pub event_tx: broadcast::Sender<RegistryEvent>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// Startup timestamp, reported in `/status`.
    pub started_at: DateTime<Utc>,
}

/// Events pushed to WebSocket subscribers — the node's audit surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryEvent {
    /// A student was registered.
    #[serde(rename = "student_registered")]
    StudentRegistered {
        id: StudentId,
        wallet: String,
        code: String,
    },
    /// A bulk import completed (possibly partially).
    #[serde(rename = "students_batch_registered")]
    StudentsBatchRegistered { requested: usize, inserted: usize },
    /// A student was deactivated.
    #[serde(rename = "student_deactivated")]
    StudentDeactivated { id: StudentId },
    /// A student was reactivated.
    #[serde(rename = "student_activated")]
    StudentActivated { id: StudentId },
    /// A document was signed and its token minted.
    #[serde(rename = "document_signed")]
    DocumentSigned {
        ledger_key: String,
        token_id: TokenId,
        student_id: StudentId,
        kind: String,
        issuer: String,
    },
    /// A document (and its token) was revoked.
    #[serde(rename = "document_revoked")]
    DocumentRevoked { ledger_key: String, token_id: TokenId },
    /// A revoked document was reactivated.
    #[serde(rename = "document_reactivated")]
    DocumentReactivated { ledger_key: String, token_id: TokenId },
    /// An ownership token changed hands.
    #[serde(rename = "token_transferred")]
    TokenTransferred {
        token_id: TokenId,
        from: String,
        to: String,
    },
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/roles", post(assign_role_handler))
        .route("/roles/:principal", get(role_handler))
        .route("/managers", post(add_manager_handler))
        .route("/managers/remove", post(remove_manager_handler))
        .route("/students", post(register_student_handler))
        .route("/students/batch", post(register_batch_handler))
        .route("/students/:id", get(student_handler))
        .route("/students/wallet/:wallet", get(student_by_wallet_handler))
        .route("/students/code/:code", get(student_by_code_handler))
        .route("/students/:id/deactivate", post(deactivate_student_handler))
        .route("/students/:id/activate", post(activate_student_handler))
        .route("/students/:id/documents", get(student_documents_handler))
        .route("/students/:id/tokens", get(student_tokens_handler))
        .route("/documents", post(sign_document_handler))
        .route("/documents/:key", get(document_handler))
        .route("/documents/:key/revoke", post(revoke_document_handler))
        .route(
            "/documents/:key/reactivate",
            post(reactivate_document_handler),
        )
        .route("/tokens/:id", get(token_handler))
        .route("/tokens/:id/valid", get(token_validity_handler))
        .route("/tokens/:id/transfer", post(transfer_token_handler))
        .route("/holders/:principal/tokens", get(holder_tokens_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body for `POST /roles`.
#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    /// The principal invoking the operation.
    pub caller: String,
    /// The principal whose role changes.
    pub principal: String,
    /// The role to assign.
    pub role: Role,
}

/// Body for manager add/remove.
#[derive(Debug, Deserialize)]
pub struct ManagerRequest {
    pub caller: String,
    pub principal: String,
}

/// Body for `POST /students`.
#[derive(Debug, Deserialize)]
pub struct RegisterStudentRequest {
    pub caller: String,
    #[serde(flatten)]
    pub student: NewStudent,
}

/// Body for `POST /students/batch`.
#[derive(Debug, Deserialize)]
pub struct RegisterBatchRequest {
    pub caller: String,
    pub students: Vec<NewStudent>,
}

/// Body for operations that only identify the caller.
#[derive(Debug, Deserialize)]
pub struct CallerRequest {
    pub caller: String,
}

/// Body for `POST /documents`.
#[derive(Debug, Deserialize)]
pub struct SignDocumentRequest {
    pub caller: String,
    pub content_hash: String,
    pub student_id: StudentId,
    pub kind: DocumentKind,
    pub uri: String,
}

/// Body for `POST /tokens/:id/transfer`.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub caller: String,
    pub to: String,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub institution: String,
    pub students_total: usize,
    pub active_students: usize,
    pub managers: usize,
    pub documents_total: usize,
    pub tokens_total: usize,
    /// ISO-8601 startup timestamp.
    pub started_at: String,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /roles/:principal`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoleResponse {
    pub principal: String,
    pub role: Role,
    pub registered: bool,
    pub manager: bool,
}

/// Response payload for a successful student registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisteredResponse {
    pub id: StudentId,
}

/// Response payload for `POST /students/batch`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub requested: usize,
    pub inserted: usize,
}

/// Response payload for `GET /documents/:key`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub ledger_key: String,
    #[serde(flatten)]
    pub record: DocumentRecord,
}

/// Response payload for `GET /tokens/:id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token_id: TokenId,
    pub holder: Option<String>,
    #[serde(flatten)]
    pub metadata: TokenMetadata,
}

/// Response payload for `GET /tokens/:id/valid`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidityResponse {
    pub token_id: TokenId,
    pub valid: bool,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

fn err_json(status: StatusCode, err: impl std::fmt::Display) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn student_status(err: &StudentError) -> StatusCode {
    match err {
        StudentError::NotFound(_) => StatusCode::NOT_FOUND,
        StudentError::DuplicateWallet(_)
        | StudentError::DuplicateCode(_)
        | StudentError::AlreadyInactive(_)
        | StudentError::AlreadyActive(_) => StatusCode::CONFLICT,
        StudentError::BatchTooLarge { .. } | StudentError::InvalidInput(_) => {
            StatusCode::BAD_REQUEST
        }
    }
}

fn access_response(err: AccessError) -> Response {
    let status = match &err {
        AccessError::NotOwner(_) | AccessError::NotAdmin(_) => StatusCode::FORBIDDEN,
        AccessError::ManagerExists(_) => StatusCode::CONFLICT,
        AccessError::ManagerNotFound(_) => StatusCode::NOT_FOUND,
        AccessError::Student(e) => student_status(e),
    };
    err_json(status, err)
}

fn notary_response(err: NotaryError) -> Response {
    let status = match &err {
        NotaryError::NotManager(_) | NotaryError::NotAdmin(_) => StatusCode::FORBIDDEN,
        NotaryError::HashRequired => StatusCode::BAD_REQUEST,
        NotaryError::StudentNotFound(_) => StatusCode::NOT_FOUND,
        NotaryError::StudentInactive(_) | NotaryError::NoWallet(_) => StatusCode::CONFLICT,
        NotaryError::Ledger(e) => match e {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::DuplicateDocument(_)
            | LedgerError::AlreadyRevoked(_)
            | LedgerError::AlreadyValid(_) => StatusCode::CONFLICT,
        },
        NotaryError::Token(e) => match e {
            TokenError::NotFound(_) => StatusCode::NOT_FOUND,
            TokenError::AlreadyMinted(_)
            | TokenError::AlreadyRevoked(_)
            | TokenError::AlreadyValid(_) => StatusCode::CONFLICT,
            TokenError::NotHolder { .. } => StatusCode::FORBIDDEN,
            TokenError::ForeignAuthority => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };
    err_json(status, err)
}

// ---------------------------------------------------------------------------
// Handlers — status
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
///
/// This is the liveness probe for orchestrators (k8s, systemd, etc.).
/// It intentionally checks nothing beyond process liveness — registry
/// state belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — institution status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let institution = state.institution.read();
    let resp = StatusResponse {
        version: state.version.clone(),
        institution: state.institution_name.clone(),
        students_total: institution.registry().student_count(),
        active_students: institution.registry().active_student_count(),
        managers: institution.registry().manager_count(),
        documents_total: institution.notary().document_count(),
        tokens_total: institution.notary().token_count(),
        started_at: state.started_at.to_rfc3339(),
        timestamp: Utc::now().to_rfc3339(),
    };
    Json(resp)
}

// ---------------------------------------------------------------------------
// Handlers — roles & managers
// ---------------------------------------------------------------------------

/// `POST /roles` — owner-only role assignment.
async fn assign_role_handler(
    State(state): State<AppState>,
    Json(req): Json<AssignRoleRequest>,
) -> Response {
    let mut institution = state.institution.write();
    match institution.assign_role(&req.caller, req.principal.clone(), req.role) {
        Ok(()) => {
            tracing::info!(principal = %req.principal, role = %req.role, "role assigned");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => access_response(e),
    }
}

/// `GET /roles/:principal` — failure-free role lookup.
async fn role_handler(
    State(state): State<AppState>,
    Path(principal): Path<String>,
) -> impl IntoResponse {
    let institution = state.institution.read();
    let registry = institution.registry();
    Json(RoleResponse {
        role: registry.role_of(&principal),
        registered: registry.is_registered(&principal),
        manager: registry.is_manager(&principal),
        principal,
    })
}

/// `POST /managers` — admin-only manager addition.
async fn add_manager_handler(
    State(state): State<AppState>,
    Json(req): Json<ManagerRequest>,
) -> Response {
    let mut institution = state.institution.write();
    match institution.add_manager(&req.caller, req.principal.clone()) {
        Ok(()) => {
            state
                .metrics
                .managers
                .set(institution.registry().manager_count() as i64);
            tracing::info!(principal = %req.principal, "manager added");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => access_response(e),
    }
}

/// `POST /managers/remove` — admin-only manager removal.
async fn remove_manager_handler(
    State(state): State<AppState>,
    Json(req): Json<ManagerRequest>,
) -> Response {
    let mut institution = state.institution.write();
    match institution.remove_manager(&req.caller, &req.principal) {
        Ok(()) => {
            state
                .metrics
                .managers
                .set(institution.registry().manager_count() as i64);
            tracing::info!(principal = %req.principal, "manager removed");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => access_response(e),
    }
}

// ---------------------------------------------------------------------------
// Handlers — students
// ---------------------------------------------------------------------------

/// `POST /students` — admin-only single registration.
async fn register_student_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterStudentRequest>,
) -> Response {
    let wallet = req.student.wallet.clone();
    let code = req.student.code.clone();

    let mut institution = state.institution.write();
    match institution.register_student(&req.caller, req.student) {
        Ok(id) => {
            state.metrics.students_registered_total.inc();
            state
                .metrics
                .active_students
                .set(institution.registry().active_student_count() as i64);
            let _ = state
                .event_tx
                .send(RegistryEvent::StudentRegistered { id, wallet, code });
            (StatusCode::CREATED, Json(RegisteredResponse { id })).into_response()
        }
        Err(e) => access_response(e),
    }
}

/// `POST /students/batch` — admin-only bulk import with partial success.
async fn register_batch_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterBatchRequest>,
) -> Response {
    let requested = req.students.len();
    let mut institution = state.institution.write();
    match institution.register_students_batch(&req.caller, req.students) {
        Ok(inserted) => {
            state
                .metrics
                .students_registered_total
                .inc_by(inserted as u64);
            state
                .metrics
                .active_students
                .set(institution.registry().active_student_count() as i64);
            let _ = state.event_tx.send(RegistryEvent::StudentsBatchRegistered {
                requested,
                inserted,
            });
            tracing::info!(requested, inserted, "batch registration");
            (
                StatusCode::CREATED,
                Json(BatchResponse {
                    requested,
                    inserted,
                }),
            )
                .into_response()
        }
        Err(e) => access_response(e),
    }
}

/// `GET /students/:id` — record by id.
async fn student_handler(State(state): State<AppState>, Path(id): Path<StudentId>) -> Response {
    let institution = state.institution.read();
    match institution.student(id) {
        Ok(record) => Json(record.clone()).into_response(),
        Err(e) => access_response(e),
    }
}

/// `GET /students/wallet/:wallet` — record by linked wallet.
async fn student_by_wallet_handler(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> Response {
    let institution = state.institution.read();
    match institution
        .student_id_by_wallet(&wallet)
        .and_then(|id| institution.student(id).ok())
    {
        Some(record) => Json(record.clone()).into_response(),
        None => err_json(
            StatusCode::NOT_FOUND,
            format!("no student registered for wallet {wallet}"),
        ),
    }
}

/// `GET /students/code/:code` — record by human-readable code.
async fn student_by_code_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Response {
    let institution = state.institution.read();
    match institution
        .student_id_by_code(&code)
        .and_then(|id| institution.student(id).ok())
    {
        Some(record) => Json(record.clone()).into_response(),
        None => err_json(
            StatusCode::NOT_FOUND,
            format!("no student registered under code {code}"),
        ),
    }
}

/// `POST /students/:id/deactivate` — admin-only.
async fn deactivate_student_handler(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
    Json(req): Json<CallerRequest>,
) -> Response {
    let mut institution = state.institution.write();
    match institution.deactivate_student(&req.caller, id) {
        Ok(()) => {
            state
                .metrics
                .active_students
                .set(institution.registry().active_student_count() as i64);
            let _ = state.event_tx.send(RegistryEvent::StudentDeactivated { id });
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => access_response(e),
    }
}

/// `POST /students/:id/activate` — admin-only.
async fn activate_student_handler(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
    Json(req): Json<CallerRequest>,
) -> Response {
    let mut institution = state.institution.write();
    match institution.activate_student(&req.caller, id) {
        Ok(()) => {
            state
                .metrics
                .active_students
                .set(institution.registry().active_student_count() as i64);
            let _ = state.event_tx.send(RegistryEvent::StudentActivated { id });
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => access_response(e),
    }
}

/// `GET /students/:id/documents` — ledger keys issued to a student.
async fn student_documents_handler(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> impl IntoResponse {
    let institution = state.institution.read();
    Json(institution.documents_of_student(id).to_vec())
}

/// `GET /students/:id/tokens` — token ids minted for a student.
async fn student_tokens_handler(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> impl IntoResponse {
    let institution = state.institution.read();
    Json(institution.tokens_of_student(id).to_vec())
}

// ---------------------------------------------------------------------------
// Handlers — documents & tokens
// ---------------------------------------------------------------------------

/// `POST /documents` — manager-only issuance.
async fn sign_document_handler(
    State(state): State<AppState>,
    Json(req): Json<SignDocumentRequest>,
) -> Response {
    let timer = std::time::Instant::now();
    let mut institution = state.institution.write();
    match institution.sign_document(
        &req.caller,
        &req.content_hash,
        req.student_id,
        req.kind,
        &req.uri,
    ) {
        Ok(signed) => {
            state.metrics.documents_signed_total.inc();
            state
                .metrics
                .sign_duration_seconds
                .observe(timer.elapsed().as_secs_f64());
            let _ = state.event_tx.send(RegistryEvent::DocumentSigned {
                ledger_key: signed.ledger_key.clone(),
                token_id: signed.token_id,
                student_id: req.student_id,
                kind: req.kind.to_string(),
                issuer: req.caller.clone(),
            });
            tracing::info!(
                token_id = signed.token_id,
                student_id = req.student_id,
                kind = %req.kind,
                "document signed"
            );
            (StatusCode::CREATED, Json(signed)).into_response()
        }
        Err(e) => notary_response(e),
    }
}

/// `GET /documents/:key` — issuance record by ledger key.
async fn document_handler(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let institution = state.institution.read();
    match institution.document(&key) {
        Ok(record) => Json(DocumentResponse {
            ledger_key: key,
            record: record.clone(),
        })
        .into_response(),
        Err(e) => notary_response(e),
    }
}

/// `POST /documents/:key/revoke` — admin-only revocation.
async fn revoke_document_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<CallerRequest>,
) -> Response {
    let mut institution = state.institution.write();
    match institution.revoke_document(&req.caller, &key) {
        Ok(()) => {
            state.metrics.documents_revoked_total.inc();
            let token_id = institution
                .document(&key)
                .map(|r| r.token_id)
                .unwrap_or_default();
            let _ = state.event_tx.send(RegistryEvent::DocumentRevoked {
                ledger_key: key.clone(),
                token_id,
            });
            tracing::info!(ledger_key = %key, token_id, "document revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => notary_response(e),
    }
}

/// `POST /documents/:key/reactivate` — admin-only reactivation.
async fn reactivate_document_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<CallerRequest>,
) -> Response {
    let mut institution = state.institution.write();
    match institution.reactivate_document(&req.caller, &key) {
        Ok(()) => {
            state.metrics.documents_reactivated_total.inc();
            let token_id = institution
                .document(&key)
                .map(|r| r.token_id)
                .unwrap_or_default();
            let _ = state.event_tx.send(RegistryEvent::DocumentReactivated {
                ledger_key: key.clone(),
                token_id,
            });
            tracing::info!(ledger_key = %key, token_id, "document reactivated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => notary_response(e),
    }
}

/// `GET /tokens/:id` — metadata and current holder.
async fn token_handler(State(state): State<AppState>, Path(id): Path<TokenId>) -> Response {
    let institution = state.institution.read();
    match institution.token_metadata(id) {
        Ok(metadata) => Json(TokenResponse {
            token_id: id,
            holder: institution.token_owner(id).map(str::to_string),
            metadata: metadata.clone(),
        })
        .into_response(),
        Err(e) => notary_response(e),
    }
}

/// `GET /tokens/:id/valid` — failure-free validity check.
async fn token_validity_handler(
    State(state): State<AppState>,
    Path(id): Path<TokenId>,
) -> impl IntoResponse {
    let institution = state.institution.read();
    Json(ValidityResponse {
        token_id: id,
        valid: institution.is_token_valid(id),
    })
}

/// `POST /tokens/:id/transfer` — holder-gated ownership transfer.
async fn transfer_token_handler(
    State(state): State<AppState>,
    Path(id): Path<TokenId>,
    Json(req): Json<TransferRequest>,
) -> Response {
    let mut institution = state.institution.write();
    match institution.transfer_token(&req.caller, id, req.to.clone()) {
        Ok(()) => {
            state.metrics.tokens_transferred_total.inc();
            let _ = state.event_tx.send(RegistryEvent::TokenTransferred {
                token_id: id,
                from: req.caller,
                to: req.to,
            });
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => notary_response(e),
    }
}

/// `GET /holders/:principal/tokens` — tokens currently held.
async fn holder_tokens_handler(
    State(state): State<AppState>,
    Path(principal): Path<String>,
) -> impl IntoResponse {
    let institution = state.institution.read();
    Json(institution.tokens_of_holder(&principal).to_vec())
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// `GET /ws` — upgrades to a WebSocket that streams registry events.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.event_tx.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, rx))
}

/// Pushes broadcast events to one WebSocket client until either side
/// disconnects. Lagging subscribers skip missed events rather than
/// blocking the producers.
async fn stream_events(socket: WebSocket, mut rx: broadcast::Receiver<RegistryEvent>) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!("failed to serialize event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                // Client closed or errored — stop streaming.
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    /// Builds a router over a fresh institution owned by "admin".
    fn test_app() -> Router {
        let (event_tx, _) = broadcast::channel(64);
        let state = AppState {
            version: "test".into(),
            institution_name: "test-campus".into(),
            institution: Arc::new(RwLock::new(Institution::bootstrap("admin"))),
            event_tx,
            metrics: Arc::new(crate::metrics::NodeMetrics::new()),
            started_at: Utc::now(),
        };
        create_router(state)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_student_then_fetch() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/students",
                serde_json::json!({
                    "caller": "admin",
                    "wallet": "w1",
                    "code": "S001",
                    "name": "Grace Hopper",
                    "email": "grace@example.edu"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["id"], 1);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/students/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["code"], "S001");
        assert_eq!(body["active"], true);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let app = test_app();
        let payload = serde_json::json!({
            "caller": "admin",
            "wallet": "w1",
            "code": "S001",
            "name": "n",
            "email": "e@x"
        });

        let first = app.clone().oneshot(post_json("/students", payload.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let second = app.oneshot(post_json("/students", payload)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn non_admin_registration_forbidden() {
        let app = test_app();
        let response = app
            .oneshot(post_json(
                "/students",
                serde_json::json!({
                    "caller": "stranger",
                    "wallet": "w1",
                    "code": "S001",
                    "name": "n",
                    "email": "e@x"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn sign_revoke_flow_over_http() {
        let app = test_app();

        // Wire up: manager + student.
        let response = app
            .clone()
            .oneshot(post_json(
                "/managers",
                serde_json::json!({ "caller": "admin", "principal": "mgr" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(post_json(
                "/students",
                serde_json::json!({
                    "caller": "admin",
                    "wallet": "w1",
                    "code": "S001",
                    "name": "n",
                    "email": "e@x"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // Sign.
        let response = app
            .clone()
            .oneshot(post_json(
                "/documents",
                serde_json::json!({
                    "caller": "mgr",
                    "content_hash": "abcd",
                    "student_id": 1,
                    "kind": "Transcript",
                    "uri": "ipfs://x"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let signed = body_json(response).await;
        let key = signed["ledger_key"].as_str().unwrap().to_string();
        let token_id = signed["token_id"].as_u64().unwrap();

        // Token is valid.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/tokens/{token_id}/valid"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["valid"], true);

        // Admin revokes.
        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/documents/{key}/revoke"),
                serde_json::json!({ "caller": "admin" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/tokens/{token_id}/valid"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["valid"], false);
    }

    #[tokio::test]
    async fn student_cannot_sign() {
        let app = test_app();
        app.clone()
            .oneshot(post_json(
                "/students",
                serde_json::json!({
                    "caller": "admin",
                    "wallet": "w1",
                    "code": "S001",
                    "name": "n",
                    "email": "e@x"
                }),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(post_json(
                "/documents",
                serde_json::json!({
                    "caller": "w1",
                    "content_hash": "abcd",
                    "student_id": 1,
                    "kind": "Transcript",
                    "uri": "ipfs://x"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_document_is_404() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/documents/deadbeef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_token_validity_is_false_not_error() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/tokens/999/valid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["valid"], false);
    }
}
