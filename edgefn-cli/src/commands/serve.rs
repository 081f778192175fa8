//! `serve`: boots the gateway process — the object graph from
//! [`crate::bootstrap`], the scheduler and invalidation-bus agents, and an
//! axum catch-all route handing every request to
//! [`GatewayRouter::dispatch`]. Ambient middleware (CORS, compression,
//! tracing, panic recovery, graceful shutdown) comes from
//! [`edgefn_service::server::Server`] unchanged.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Args;
use colored::Colorize;
use edgefn_service::prelude::*;

use crate::bootstrap;

#[derive(Args)]
pub struct ServeArgs {}

pub async fn run(config: Config, _args: &ServeArgs) -> Result<()> {
    init_tracing(&config)?;

    let runtime = bootstrap::build_runtime(&config).await?;
    let invalidation_bus = bootstrap::spawn_invalidation_bus(&config, &runtime).await?;
    let scheduler = bootstrap::spawn_scheduler(&config, &runtime);

    println!(
        "{} edgefn gateway listening on :{}, domain suffix `{}`",
        "✓".green(),
        config.service.port,
        config.gateway.default_domain
    );

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .fallback_service(
            get(catch_all)
                .post(catch_all)
                .put(catch_all)
                .delete(catch_all)
                .patch(catch_all)
                .options(catch_all),
        )
        .with_state(runtime.gateway.clone());

    let result = Server::new(config).serve(app).await;

    scheduler.stop().await;
    if let Some(bus) = invalidation_bus {
        bus.stop().await;
    }
    runtime.execution_log.stop().await;

    result
}

async fn catch_all(
    State(gateway): State<Arc<GatewayRouter>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string());

    let request = GatewayRequest {
        host,
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        headers: headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
            .collect(),
        body: if body.is_empty() { None } else { Some(body.to_vec()) },
        client_ip,
    };

    match gateway.dispatch(request).await {
        Ok(response) => {
            let mut builder = axum::http::Response::builder()
                .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
            for (k, v) in &response.headers {
                builder = builder.header(k, v);
            }
            builder
                .body(axum::body::Body::from(response.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            tracing::error!(error = %e, "gateway dispatch failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
