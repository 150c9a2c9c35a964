//! The HTTP front-end (spec §4.10): CORS, `/health`, structured request
//! logging, panic containment, and the catch-all route that hands every
//! other request to the [`dispatcher`].

use std::collections::HashMap;

use indexmap::IndexMap;
use salvo::affix_state;
use salvo::cors::{AllowOrigin, Cors};
use salvo::http::Method as HttpMethod;
use salvo::prelude::*;
use serde_json::json;
use session_bridge_protocol::{Method, QueryValue, RequestSpec};

use crate::dispatcher;
use crate::rewrite;
use crate::sanitize;
use crate::state::AppState;

/// Build the full router: CORS + logging + panic containment wrapping a
/// `/health` endpoint and a catch-all forwarder.
#[must_use]
pub fn router(state: AppState) -> Router {
    let cors = Cors::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![
            HttpMethod::GET,
            HttpMethod::POST,
            HttpMethod::PUT,
            HttpMethod::DELETE,
            HttpMethod::OPTIONS,
        ])
        .allow_headers(vec!["content-type", "authorization"])
        .into_handler();

    Router::new()
        .hoop(Logger::new())
        .hoop(CatchPanic::new())
        .hoop(cors)
        .hoop(affix_state::inject(state))
        .push(Router::with_path("health").get(health))
        .push(Router::with_path("{**path}").options(handler::empty()).goal(forward))
}

/// `GET /health` (§6): a small liveness probe that also reports whether a
/// browser is currently bound, since that is the one precondition every
/// other route depends on.
#[handler]
async fn health(depot: &mut Depot, res: &mut Response) {
    let state = depot.obtain::<AppState>().expect("AppState is always injected");
    res.render(Json(json!({
        "status": "ok",
        "browserConnected": state.channel.is_connected(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "pendingCount": state.pending.len(),
        "oldestPendingAgeSecs": state.pending.oldest_age().map(|age| age.as_secs()),
    })));
}

/// Every non-health path: build a `RequestSpec` from the incoming request,
/// apply the rewriter and sanitizer, and hand off to the dispatcher.
#[handler]
async fn forward(depot: &mut Depot, req: &mut Request, res: &mut Response) {
    let state = depot.obtain::<AppState>().expect("AppState is always injected").clone();

    if !state.channel.is_connected() {
        let request_id = state.ids.next();
        crate::error::render_error(res, crate::error::BridgeError::NoBrowserBound, &request_id);
        return;
    }

    let Some(method) = map_method(req.method()) else {
        res.status_code(StatusCode::METHOD_NOT_ALLOWED);
        res.render(Json(json!({ "error": "unsupported method" })));
        return;
    };

    let (path, repaired) = rewrite::repair_path(req.uri().path());
    if repaired {
        tracing::info!(original = req.uri().path(), repaired = %path, "repaired doubled /models/ segment");
    }

    let mut query_params = read_query_params(req);
    rewrite::strip_key_param(&mut query_params);

    let mut headers: HashMap<String, String> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string())))
        .collect();
    sanitize::strip_request_headers(&mut headers);

    let body = if method.allows_body() {
        read_body(req, state.config.max_body_size).await
    } else {
        None
    };
    let body = rewrite::rewrite_body(body.as_deref());

    let spec = RequestSpec {
        request_id: state.ids.next(),
        method,
        path,
        query_params,
        headers,
        body,
    };

    dispatcher::drive(&state, spec, res).await;
}

fn map_method(method: &HttpMethod) -> Option<Method> {
    match *method {
        HttpMethod::GET => Some(Method::Get),
        HttpMethod::POST => Some(Method::Post),
        HttpMethod::PUT => Some(Method::Put),
        HttpMethod::PATCH => Some(Method::Patch),
        HttpMethod::DELETE => Some(Method::Delete),
        HttpMethod::HEAD => Some(Method::Head),
        HttpMethod::OPTIONS => Some(Method::Options),
        _ => None,
    }
}

fn read_query_params(req: &Request) -> IndexMap<String, QueryValue> {
    let mut params: IndexMap<String, Vec<String>> = IndexMap::new();
    for (key, value) in req.queries().iter_all() {
        params.entry(key.clone()).or_default().extend(value.iter().cloned());
    }
    params
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                QueryValue::Single(values.pop().expect("len checked"))
            } else {
                QueryValue::Multi(values)
            };
            (key, value)
        })
        .collect()
}

/// Read the request body as text, accepting JSON or plain text up to
/// `max_size` (§4.10). Anything unparseable as UTF-8 is dropped rather than
/// forwarded, since the wire protocol only carries string bodies.
async fn read_body(req: &mut Request, max_size: usize) -> Option<String> {
    match req.payload_with_max_size(max_size).await {
        Ok(bytes) => std::str::from_utf8(bytes).ok().map(str::to_string),
        Err(err) => {
            tracing::warn!(%err, "failed to read request body");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use salvo::test::{ResponseExt, TestClient};

    use super::*;

    #[test]
    fn maps_every_supported_method() {
        assert_eq!(map_method(&HttpMethod::GET), Some(Method::Get));
        assert_eq!(map_method(&HttpMethod::POST), Some(Method::Post));
        assert_eq!(map_method(&HttpMethod::PUT), Some(Method::Put));
        assert_eq!(map_method(&HttpMethod::PATCH), Some(Method::Patch));
        assert_eq!(map_method(&HttpMethod::DELETE), Some(Method::Delete));
        assert_eq!(map_method(&HttpMethod::HEAD), Some(Method::Head));
        assert_eq!(map_method(&HttpMethod::OPTIONS), Some(Method::Options));
    }

    #[test]
    fn unsupported_method_is_none() {
        assert_eq!(map_method(&HttpMethod::TRACE), None);
    }

    fn service() -> Service {
        Service::new(router(AppState::new(crate::config::BridgeConfig::default())))
    }

    #[tokio::test]
    async fn health_reports_no_browser_connected_when_unbound() {
        let service = service();
        let mut res = TestClient::get("http://127.0.0.1:8889/health").send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
        let body: serde_json::Value = res.take_json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["browserConnected"], false);
    }

    #[tokio::test]
    async fn options_short_circuits_with_200() {
        let service = service();
        let res = TestClient::options("http://127.0.0.1:8889/v1beta/models").send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
    }

    #[tokio::test]
    async fn forward_without_a_bound_browser_is_503() {
        let service = service();
        let mut res = TestClient::get("http://127.0.0.1:8889/v1beta/models").send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::SERVICE_UNAVAILABLE));
        let body: serde_json::Value = res.take_json().await.unwrap();
        assert_eq!(body["error"], "browser_not_connected");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let service = service();
        let res = TestClient::options("http://127.0.0.1:8889/v1beta/models")
            .add_header("Origin", "https://example.com", true)
            .add_header("Access-Control-Request-Method", "POST", true)
            .send(&service)
            .await;
        assert!(res.headers().get("access-control-allow-origin").is_some());
    }
}
