use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::{error, warn};
use validator::Validate;

use crate::{
    aggregate::{AggregateError, QueryFamily, QueryResult},
    explorer::services::aggregate::{aggregate, AggregateRequest},
    AppState,
};

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, kind: &str, message: String) -> ApiError {
    (status, Json(json!({ "error": message, "kind": kind })))
}

pub fn status_for(err: &AggregateError) -> StatusCode {
    match err {
        AggregateError::DeniedOperation { .. } => StatusCode::FORBIDDEN,
        AggregateError::Syntax(_)
        | AggregateError::SchemaConflict(_)
        | AggregateError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        AggregateError::Upstream { .. }
        | AggregateError::MissingReference { .. }
        | AggregateError::MalformedPage { .. } => StatusCode::BAD_GATEWAY,
        AggregateError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AggregateError::Runtime(_) | AggregateError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// The handler function for the POST /aggregate/:family endpoint.
pub async fn aggregate_handler(
    Path(family): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<AggregateRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    let family: QueryFamily = family
        .parse()
        .map_err(|e: AggregateError| api_error(StatusCode::NOT_FOUND, e.kind(), e.to_string()))?;
    req.validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "invalid_argument", e.to_string()))?;

    let limits = state.config.aggregation_limits();
    match aggregate(&state.explorer, &limits, family, &req).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Aggregation {} failed: {}", family, e);
            } else {
                warn!("Aggregation {} rejected: {}", family, e);
            }
            Err(api_error(status, e.kind(), e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let denied = AggregateError::DeniedOperation {
            action: "DROP TABLE data".into(),
        };
        assert_eq!(status_for(&denied), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&AggregateError::Syntax("near \"SELEC\"".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AggregateError::Timeout(Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&AggregateError::Upstream {
                page: 0,
                source: anyhow::anyhow!("503"),
            }),
            StatusCode::BAD_GATEWAY
        );
    }
}
