use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::GatewayError;
use crate::gateway::PaymentGateway;
use crate::payment::{PaymentRecord, PaymentSummary};

#[derive(Debug, Serialize)]
pub struct PaymentAccepted {
    pub status: &'static str,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ValidationFailed(e) => ApiError::bad_request(e.to_string()),
            GatewayError::AdmissionRejected => ApiError::unavailable(err.to_string()),
            GatewayError::StoreUnavailable(_) => ApiError::unavailable(err.to_string()),
        }
    }
}

pub fn router(gateway: Arc<PaymentGateway>) -> Router {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments-summary", get(payments_summary))
        .route("/purge-payments", post(purge_payments))
        .route("/health", get(health))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::extract::Request| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(
                    |response: &Response, latency: Duration, _span: &tracing::Span| {
                        tracing::debug!(
                            status = response.status().as_u16(),
                            latency_ms = latency.as_millis(),
                            "HTTP response"
                        );
                    },
                ),
        )
        .with_state(gateway)
}

async fn create_payment(
    State(gateway): State<Arc<PaymentGateway>>,
    payload: Result<Json<PaymentRecord>, JsonRejection>,
) -> Result<Json<PaymentAccepted>, ApiError> {
    let Json(record) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected payment request");
        ApiError::bad_request(rejection.body_text())
    })?;

    let correlation_id = record.correlation_id().to_string();
    gateway.submit(record).await?;

    Ok(Json(PaymentAccepted {
        status: "success",
        correlation_id,
    }))
}

async fn payments_summary(
    State(gateway): State<Arc<PaymentGateway>>,
    Query(params): Query<SummaryQuery>,
) -> Result<Json<PaymentSummary>, ApiError> {
    let from = parse_bound("from", params.from.as_deref())?;
    let to = parse_bound("to", params.to.as_deref())?;

    // a window needs both ends; with neither, the running totals answer
    match (from, to) {
        (Some(from), Some(to)) if from > to => {
            return Err(ApiError::bad_request(
                "'from' must be before or equal to 'to'",
            ));
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(ApiError::bad_request(
                "'from' and 'to' must be given together",
            ));
        }
        _ => {}
    }

    let summary = gateway.summary(from, to).await.map_err(|e| {
        error!(error = %e, "Failed to compute payments summary");
        ApiError::unavailable(e.to_string())
    })?;

    Ok(Json(summary))
}

async fn purge_payments(
    State(gateway): State<Arc<PaymentGateway>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    gateway.purge().await.map_err(|e| {
        error!(error = %e, "Failed to purge payment data");
        ApiError::unavailable(e.to_string())
    })?;

    Ok(Json(json!({
        "status": "success",
        "message": "Payment data purged successfully"
    })))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(value) => parse_instant(value)
            .map(Some)
            .ok_or_else(|| {
                ApiError::bad_request(format!("invalid '{name}' timestamp: {value}"))
            }),
    }
}

/// Accepts an RFC 3339 instant, a zone-less `yyyy-MM-ddTHH:mm:ss` or a bare
/// `yyyy-MM-dd` (midnight). Zone-less values are read as UTC.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
