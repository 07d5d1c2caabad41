//! Main HTTP Gateway Server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    extract::FromRef,
    middleware,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use vibestudy_core::ProgressStore;
use vibestudy_ratelimit::{RateLimitPolicies, RateLimiter};

use crate::auth::TokenTable;
use crate::{health_api, progress_api, rate_limit};

/// Application state shared across routes.
#[derive(Clone)]
pub struct GatewayState {
    pub limiter: RateLimiter,
    pub policies: Arc<RateLimitPolicies>,
    pub progress: Arc<dyn ProgressStore>,
    pub tokens: Arc<TokenTable>,
    /// Key rate limit buckets by the first `X-Forwarded-For` hop.
    pub trust_forwarded_for: bool,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(
        limiter: RateLimiter,
        policies: RateLimitPolicies,
        progress: Arc<dyn ProgressStore>,
        tokens: TokenTable,
    ) -> Self {
        Self {
            limiter,
            policies: Arc::new(policies),
            progress,
            tokens: Arc::new(tokens),
            trust_forwarded_for: false,
            started_at: Instant::now(),
        }
    }

    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

impl FromRef<GatewayState> for Arc<TokenTable> {
    fn from_ref(state: &GatewayState) -> Self {
        Arc::clone(&state.tokens)
    }
}

/// Build the gateway router. Progress routes sit behind the rate limiter;
/// health does not.
pub fn build_router(state: GatewayState) -> Router {
    let progress = Router::new()
        .route(
            "/api/progress/:day",
            get(progress_api::get_day).put(progress_api::put_field),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .route("/api/health", get(health_api::get_health))
        .merge(progress)
        .with_state(state)
}

/// Serve the gateway on an already bound listener until it fails.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Gateway server stopped")?;
    Ok(())
}

/// Starts the main Axum HTTP server for the gateway.
#[instrument(skip(state))]
pub async fn start_server(addr: SocketAddr, state: GatewayState) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway on {addr}"))?;
    info!(
        %addr,
        progress_store = state.progress.name(),
        rate_limit_store = state.limiter.store().name(),
        tokens = state.tokens.len(),
        "Gateway HTTP server listening"
    );
    serve(listener, state).await
}
