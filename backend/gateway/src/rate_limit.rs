//! Gateway Rate Limiting Module
//!
//! Every progress route is counted against a per-client bucket before the
//! handler runs. Reads and writes draw from separate policies.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use vibestudy_ratelimit::{ClientRequest, EvaluateOptions, RateLimitDecision};

use crate::server::GatewayState;

/// Policy for progress reads.
pub const PROGRESS_READ: &str = "progressRead";
/// Policy for progress mutations.
pub const PROGRESS_WRITE: &str = "progressWrite";

const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

fn policy_for(method: &Method) -> &'static str {
    if method == Method::GET || method == Method::HEAD {
        PROGRESS_READ
    } else {
        PROGRESS_WRITE
    }
}

/// Peer address, or the first `X-Forwarded-For` hop when the gateway sits
/// behind a trusted proxy.
fn client_addr(req: &Request, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at.timestamp()),
    );
}

/// axum middleware: admit or reject the request, then annotate the response.
pub async fn enforce(State(state): State<GatewayState>, req: Request, next: Next) -> Response {
    let policy_name = policy_for(req.method());
    let policy = state.policies.get(policy_name);
    let client = ClientRequest::new(client_addr(&req, state.trust_forwarded_for), policy_name);

    let decision = state
        .limiter
        .evaluate(&client, policy, &EvaluateOptions::default())
        .await;

    if !decision.allowed {
        let retry_after = decision.retry_after_secs(Utc::now());
        warn!(
            bucket = %decision.bucket,
            policy = policy_name,
            retry_after,
            "Rejecting rate limited request"
        );
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate limited", "retryAfter": retry_after })),
        )
            .into_response();
        apply_headers(response.headers_mut(), &decision);
        response
            .headers_mut()
            .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    debug!(bucket = %decision.bucket, remaining = decision.remaining, "Request admitted");
    let mut response = next.run(req).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(method: Method, forwarded: Option<&str>) -> Request {
        let mut builder = Request::builder().method(method).uri("/api/progress/1");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));
        req
    }

    #[test]
    fn reads_and_writes_use_separate_policies() {
        assert_eq!(policy_for(&Method::GET), PROGRESS_READ);
        assert_eq!(policy_for(&Method::PUT), PROGRESS_WRITE);
    }

    #[test]
    fn forwarded_for_only_when_trusted() {
        let req = request(Method::PUT, Some("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_addr(&req, true), Some("203.0.113.9".parse().unwrap()));
        assert_eq!(client_addr(&req, false), Some("10.0.0.1".parse().unwrap()));

        let garbage = request(Method::PUT, Some("not-an-ip"));
        assert_eq!(client_addr(&garbage, true), Some("10.0.0.1".parse().unwrap()));
    }
}
