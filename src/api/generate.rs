use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::jobs::{
    generator::{GenerateRequest, DEFAULT_COUNT},
    JobQueue,
};
use crate::middleware::{
    auth::Principal,
    logging::{to_response, ApiError},
    policy::{policy_middleware, Resource},
};

pub fn generate_router() -> Router {
    let generate = Router::new()
        .route("/generate", post(generate_products))
        .route_layer(from_fn_with_state(Resource::Generate, policy_middleware));
    let jobs = Router::new()
        .route("/jobs/:id", get(get_job))
        .route_layer(from_fn_with_state(Resource::Job, policy_middleware));

    generate.merge(jobs)
}

async fn generate_products(
    Extension(principal): Extension<Principal>,
    Extension(config): Extension<Arc<Config>>,
    Extension(jobs): Extension<JobQueue>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let count = parse_count(&body, config.generate_max_count)?;

    let job_id = jobs
        .submit(GenerateRequest {
            requested_by: principal.user_id,
            count,
        })
        .await?;
    info!(%job_id, count, requested_by = principal.user_id, "Accepted generate request");

    Ok(to_response(
        (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": format!("Started background task to create {count} dummy products."),
                "job_id": job_id,
            })),
        ),
        Ok(()),
    ))
}

async fn get_job(
    Path(id): Path<Uuid>,
    Extension(jobs): Extension<JobQueue>,
) -> Result<Response, ApiError> {
    let job = jobs
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found("job", id))?;

    Ok(to_response((StatusCode::OK, Json(job)), Ok(())))
}

/// Reads `count` from an optional JSON body; numeric strings are accepted too.
fn parse_count(body: &[u8], max: u32) -> Result<u32, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DEFAULT_COUNT);
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("JSON parse error - {err}")))?;

    let raw = match payload.get("count") {
        None | Some(Value::Null) => return Ok(DEFAULT_COUNT),
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    let count = raw.ok_or_else(|| ApiError::field("count", "A valid integer is required."))?;

    if count < 1 || count > i64::from(max) {
        return Err(ApiError::field(
            "count",
            format!("Ensure this value is between 1 and {max}."),
        ));
    }
    Ok(count as u32)
}
