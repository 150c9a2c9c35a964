//! The browser fetcher (spec §4.7): executes the outgoing HTTPS call against
//! the fixed upstream host, with the browser's own retry policy.
//!
//! `reqwest::Client` stands in for the browser's `fetch` stack (§1: TLS
//! termination of the upstream call is delegated to it, the closest
//! in-process analogue to a browser's network stack). Retries are an
//! explicit bounded counter plus a cancellable delay (§9, "no
//! exception-driven control flow"), not a `?`-propagating loop.

use session_bridge_protocol::{Method, QueryValue, RequestSpec};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::AgentConfig;
use crate::error::FetchError;

/// Headers the browser's own fetch stack would re-populate and reject an
/// explicit override of (§4.2, "Browser-side additionally removes").
const BROWSER_MANAGED_HEADERS: &[&str] = &[
    "origin",
    "referer",
    "user-agent",
    "sec-fetch-mode",
    "sec-fetch-site",
    "sec-fetch-dest",
];

/// Maximum excerpt length captured from a failing response body, for the
/// exception message (§4.7).
const EXCERPT_LIMIT: usize = 500;

/// Execute `spec` against the fixed upstream host, retrying up to
/// `config.max_attempts` times on a non-2xx status or transport failure,
/// honoring `cancel` between attempts and during the inter-attempt sleep.
pub async fn fetch(
    client: &reqwest::Client,
    spec: &RequestSpec,
    config: &AgentConfig,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, FetchError> {
    let url = build_url(&config.upstream_host, spec)?;
    let method = map_method(spec.method);
    let headers = build_headers(spec);

    let mut last_failure: Option<FetchError> = None;

    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let mut request = client.request(method.clone(), url.clone()).headers(headers.clone());
        if spec.method.allows_body() {
            if let Some(body) = &spec.body {
                request = request.body(body.clone());
            }
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status().as_u16();
                let excerpt = response_excerpt(response).await;
                tracing::warn!(attempt, status, "upstream returned a non-2xx status, retrying");
                last_failure = Some(FetchError::Upstream { status, excerpt });
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "fetch attempt failed, retrying");
                last_failure = Some(FetchError::Transport(err.to_string()));
            }
        }

        if attempt < config.max_attempts {
            tokio::select! {
                () = tokio::time::sleep(config.retry_delay) => {}
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        }
    }

    Err(last_failure.unwrap_or(FetchError::Transport("no attempts were made".to_string())))
}

fn map_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

/// Build `https://<upstream_host>/<path-without-leading-slash>[?query]`
/// (§4.7). `query_params` is the sanitized value already stripped of `key`
/// by the server's rewriter (§4.3, §9 Open Questions resolution) — the
/// agent just serializes it verbatim.
fn build_url(upstream_host: &str, spec: &RequestSpec) -> Result<Url, FetchError> {
    let path = spec.path.strip_prefix('/').unwrap_or(&spec.path);
    let base = format!("https://{upstream_host}/{path}");
    let mut url = Url::parse(&base).map_err(|err| FetchError::Transport(format!("invalid path: {err}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &spec.query_params {
            for single in value.values() {
                pairs.append_pair(key, single);
            }
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

fn build_headers(spec: &RequestSpec) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &spec.headers {
        if BROWSER_MANAGED_HEADERS.iter().any(|forbidden| name.eq_ignore_ascii_case(forbidden)) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) else {
            continue;
        };
        headers.insert(name, value);
    }
    headers
}

async fn response_excerpt(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(body) => body.chars().take(EXCERPT_LIMIT).collect(),
        Err(_) => String::new(),
    }
}
