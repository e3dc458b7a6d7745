// ── Write-boundary HTTP endpoints ──

use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use telewatch_core::{
    AlarmRecord, CoreError, GatewayId, NewReading, NotifierState, OwnerId, RuleScope,
    ThresholdRule, ThresholdRuleInput, ValidationError,
};

use super::AppState;

// ── Errors ───────────────────────────────────────────────────────────

/// Error returned by every `/api` handler, rendered as `{ "error": ... }`.
#[derive(Debug)]
pub enum ApiError {
    /// The body or query string could not be decoded.
    BadRequest(String),
    Core(CoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Core(CoreError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Core(err) if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::BadRequest(msg) => msg,
            Self::Core(err) => {
                if status.is_server_error() {
                    error!(error = %err, "request failed");
                }
                err.to_string()
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Core(CoreError::Validation(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

// ── Health ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    notifier: &'static str,
}

/// Liveness probe. `notifier` is `"stopped"` before the pipeline starts.
pub(super) async fn healthz_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let notifier = state
        .pipeline
        .notifier_state()
        .map_or("stopped", NotifierState::label);
    Json(HealthResponse {
        status: "ok",
        notifier,
    })
}

// ── Readings & manual alarms ─────────────────────────────────────────

/// `POST /api/readings`
pub(super) async fn create_reading(
    State(state): State<AppState>,
    payload: Result<Json<NewReading>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new) = payload?;
    let reading = state.pipeline.ingest(new).await?;
    Ok((StatusCode::CREATED, Json(reading)))
}

/// `POST /api/alarm-records`
pub(super) async fn create_alarm_record(
    State(state): State<AppState>,
    payload: Result<Json<AlarmRecord>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(record) = payload?;
    match state.pipeline.record_alarm(record).await {
        Ok(_) => Ok(Json(json!({ "success": true }))),
        Err(err) => {
            warn!(error = %err, "manual alarm insert rejected");
            Err(err.into())
        }
    }
}

// ── Threshold rules ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SettingsQuery {
    #[serde(default)]
    gateway_id: Option<GatewayId>,
    #[serde(default)]
    owner_id: Option<OwnerId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReplaceSettings {
    #[serde(default)]
    gateway_id: Option<GatewayId>,
    #[serde(default)]
    owner_id: Option<OwnerId>,
    #[serde(default)]
    settings: Vec<ThresholdRuleInput>,
}

fn scope_of(
    gateway_id: Option<GatewayId>,
    owner_id: Option<OwnerId>,
) -> Result<RuleScope, ApiError> {
    let gateway_id = gateway_id
        .filter(|id| !id.is_blank())
        .ok_or_else(|| ValidationError::MissingField {
            field: "gatewayId".into(),
        })?;
    let scope = RuleScope::gateway(gateway_id);
    Ok(match owner_id {
        Some(owner_id) => scope.with_owner(owner_id),
        None => scope,
    })
}

/// `GET /api/alarm-settings?gatewayId=..&ownerId=..`. Without `ownerId`
/// every rule of the gateway is listed.
pub(super) async fn list_alarm_settings(
    State(state): State<AppState>,
    query: Result<Query<SettingsQuery>, QueryRejection>,
) -> Result<Json<Vec<ThresholdRule>>, ApiError> {
    let Query(query) = query?;
    let scope = scope_of(query.gateway_id, query.owner_id)?;
    Ok(Json(state.pipeline.thresholds(scope).await?))
}

/// `PUT /api/alarm-settings`: full replacement of one owner slot's rule
/// set. Without `ownerId` only the gateway's ownerless rules are replaced.
pub(super) async fn replace_alarm_settings(
    State(state): State<AppState>,
    payload: Result<Json<ReplaceSettings>, JsonRejection>,
) -> Result<Json<Vec<ThresholdRule>>, ApiError> {
    let Json(body) = payload?;
    let scope = scope_of(body.gateway_id, body.owner_id)?;
    let rules = state.pipeline.replace_thresholds(scope, body.settings).await?;
    Ok(Json(rules))
}
