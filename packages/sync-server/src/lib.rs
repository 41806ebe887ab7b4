pub mod archive_store;
pub mod auth;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;

use std::any::Any;

use axum::response::{IntoResponse, Response};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::response::json_error;
use crate::state::AppState;

pub fn create_app(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");

    json_error(
        axum::http::StatusCode::BAD_REQUEST,
        "UNHANDLED_EXCEPTION",
        "服务器内部错误",
    )
    .into_response()
}
