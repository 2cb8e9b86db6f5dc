// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local HTTP endpoints used by the web application on the same machine.
//
//   GET  /info       -> {"CompanionAppId": "<agent id>"}
//   POST /logged_in  -> records the signed-in user, {"result": "Saved!"}
//
// Browsers call these cross-origin, so every response echoes the caller's
// `Origin` and answers preflight requests.

use std::future::Future;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use companion_core::error::{CompanionError, Result};
use companion_core::types::LoginRequest;

use crate::state::StateSync;

const ALLOWED_METHODS: &str = "POST, GET, OPTIONS, PUT, DELETE";

#[derive(Clone)]
pub struct ServerState {
    agent_id: Arc<str>,
    sync: Arc<StateSync>,
}

impl ServerState {
    pub fn new(agent_id: &str, sync: Arc<StateSync>) -> Self {
        Self {
            agent_id: Arc::from(agent_id),
            sync,
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/info", get(info_endpoint))
        .route("/logged_in", post(logged_in).options(preflight))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "starting local server");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CompanionError::Server(e.to_string()))?;
    info!("stopped local server");
    Ok(())
}

async fn cors(request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();
    let allow_headers = allowed_headers(request.headers());

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        origin.unwrap_or_else(|| HeaderValue::from_static("")),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    if let Ok(value) = HeaderValue::from_str(&allow_headers) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, value);
    }
    response
}

/// Every header name the caller sent, plus `content-type`.
fn allowed_headers(headers: &HeaderMap) -> String {
    let mut names: Vec<&str> = headers.keys().map(|name| name.as_str()).collect();
    if !names.contains(&"content-type") {
        names.push("content-type");
    }
    names.join(", ")
}

async fn info_endpoint(State(state): State<ServerState>) -> Json<serde_json::Value> {
    info!("handling info request");
    Json(json!({ "CompanionAppId": &*state.agent_id }))
}

async fn preflight() -> &'static str {
    "OK"
}

async fn logged_in(State(state): State<ServerState>, body: Bytes) -> Response {
    info!("handling logged_in request");
    let login: LoginRequest = match serde_json::from_slice(&body) {
        Ok(login) => login,
        Err(err) => {
            warn!(error = %err, "cannot record logged_in event");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    state.sync.state().update(|device| {
        device.user.id = login.id;
        device.user.name = login.name;
        device.user.company_id = login.company_id;
        device.user.company_name = login.company_name;
        device.user.last_login = Utc::now().timestamp_millis();
    });

    match state.sync.push().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "result": "Saved!" }))).into_response(),
        Err(err) => {
            error!(error = %err, "failed to save the logged in user");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from(err.to_string()))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}
