use axum::{
    extract::{Path, Query},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use hyper::Server;
use rusqlite::Connection;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::error::Result;
use crate::query::{self, Pagination, TOP_OPERATORS};

pub type SharedConnection = Arc<Mutex<Connection>>;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "expense-pipeline-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    error!("Query failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
        .into_response()
}

fn with_connection<T, F>(conn: &SharedConnection, f: F) -> std::result::Result<T, Response>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    let guard = conn.lock().map_err(internal_error)?;
    f(&*guard).map_err(internal_error)
}

async fn list_operators(
    Extension(conn): Extension<SharedConnection>,
    Query(params): Query<PageParams>,
) -> Response {
    let pagination = Pagination::new(params.page, params.limit);
    match with_connection(&conn, |c| query::list_operators(c, pagination)) {
        Ok(page) => Json(page).into_response(),
        Err(resp) => resp,
    }
}

async fn get_operator(
    Extension(conn): Extension<SharedConnection>,
    Path(tax_id): Path<String>,
) -> Response {
    match with_connection(&conn, |c| query::get_operator(c, &tax_id)) {
        Ok(Some(row)) => Json(row).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("operator {tax_id} not found") })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

async fn list_expenses(
    Extension(conn): Extension<SharedConnection>,
    Path(tax_id): Path<String>,
) -> Response {
    match with_connection(&conn, |c| query::list_expenses(c, &tax_id)) {
        Ok(rows) => Json(rows).into_response(),
        Err(resp) => resp,
    }
}

async fn statistics(Extension(conn): Extension<SharedConnection>) -> Response {
    match with_connection(&conn, |c| query::top_operators(c, TOP_OPERATORS)) {
        Ok(rows) => Json(rows).into_response(),
        Err(resp) => resp,
    }
}

/// Router for the read-only query API.
pub fn create_server(conn: SharedConnection) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/operators", get(list_operators))
        .route("/api/operators/:tax_id", get(get_operator))
        .route("/api/operators/:tax_id/expenses", get(list_expenses))
        .route("/api/statistics", get(statistics))
        .layer(Extension(conn))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Serves the API over a read-only connection to the store.
pub async fn start_server(
    database_path: &std::path::Path,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let conn = query::open_read_only(database_path)?;
    let app = create_server(Arc::new(Mutex::new(conn)));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Serving {} on {}", database_path.display(), addr);

    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("📈 Operators:    http://localhost:{port}/api/operators");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
