pub mod auth;
pub mod category;
pub mod export;
pub mod generate;
pub mod media;
pub mod order;
pub mod product;
pub mod validation;

use axum::{
    extract::Extension, http::StatusCode, middleware, response::Response, routing::get, Json,
    Router,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::jobs::JobQueue;
use crate::mailer::Mailer;
use crate::middleware::{
    auth::{auth_middleware, AuthState},
    logging::{logging_middleware, to_response},
};

use auth::auth_router;
use category::category_router;
use export::export_router;
use generate::generate_router;
use media::media_router;
use order::order_router;
use product::product_router;

/// Everything the handlers share, built once at start-up.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<Config>,
    pub mailer: Arc<dyn Mailer>,
    pub jobs: JobQueue,
}

pub fn create_api_router(state: AppState) -> Router {
    let auth_state = AuthState {
        db: state.db.clone(),
        config: state.config.clone(),
    };

    let protected = Router::new()
        .merge(product_router(&state.config))
        .merge(category_router())
        .merge(order_router())
        .merge(generate_router())
        .merge(export_router())
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .route("/", get(health))
        .merge(media_router())
        .nest("/api", auth_router().merge(protected))
        .layer(Extension(state.db))
        .layer(Extension(state.config))
        .layer(Extension(state.mailer))
        .layer(Extension(state.jobs))
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Response {
    to_response((StatusCode::OK, Json(json!({ "status": "ok" }))), Ok(()))
}
