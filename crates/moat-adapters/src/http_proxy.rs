// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic HTTPS proxy adapter with domain allowlist enforcement.
//!
//! The sandboxed agent sends an HTTP request description (url, method,
//! headers, body) through the execute endpoint. This adapter validates the
//! target URL against a domain allowlist, strips dangerous headers, blocks
//! private address space, and forwards the request to the external
//! service. The agent never gets direct network access; all external HTTP
//! flows through here, governed by policy.
//!
//! Redirects are never delegated to the HTTP client: each hop is resolved
//! and re-validated through the same SSRF/allowlist rules, because client
//! libraries skip hostname rechecks after 301/302.

use crate::net::validate_url;
use crate::{Adapter, AdapterError};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const PROVIDER: &str = "http_proxy";
const MAX_TIMEOUT_SECONDS: f64 = 30.0;
const MAX_REDIRECTS: usize = 5;

/// Hop-by-hop headers (RFC 2616 s13.5.1), never forwarded in either
/// direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Headers the adapter never forwards from the caller.
const STRIPPED_REQUEST_HEADERS: &[&str] = &["host", "content-length"];

/// Headers stripped from the upstream response before returning.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &["content-encoding", "content-length"];

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

fn request_header_blocked(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP_HEADERS.contains(&lower.as_str())
        || STRIPPED_REQUEST_HEADERS.contains(&lower.as_str())
}

fn response_header_blocked(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP_HEADERS.contains(&lower.as_str())
        || STRIPPED_RESPONSE_HEADERS.contains(&lower.as_str())
}

/// Filter caller-supplied headers down to the forwardable set.
fn sanitize_request_headers(raw: &Map<String, Value>) -> Vec<(String, String)> {
    raw.iter()
        .filter(|(name, _)| !request_header_blocked(name))
        .map(|(name, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), rendered)
        })
        .collect()
}

enum ProxyBody {
    None,
    Json(Value),
    Raw(String),
}

/// Classify the request body: mappings and lists go as JSON, anything else
/// as raw bytes, and only for methods that admit bodies.
fn classify_body(body: Option<&Value>, method: &str) -> ProxyBody {
    if !matches!(method, "POST" | "PUT" | "PATCH") {
        return ProxyBody::None;
    }
    match body {
        None | Some(Value::Null) => ProxyBody::None,
        Some(v @ (Value::Object(_) | Value::Array(_))) => ProxyBody::Json(v.clone()),
        Some(Value::String(s)) => ProxyBody::Raw(s.clone()),
        Some(other) => ProxyBody::Raw(other.to_string()),
    }
}

/// Resolve a redirect `Location` against the current URL and re-validate
/// the result through the full SSRF/allowlist pipeline.
fn resolve_redirect(
    current: &Url,
    location: &str,
    allowlist: &BTreeSet<String>,
) -> Result<Url, AdapterError> {
    let next = current
        .join(location)
        .map_err(|e| AdapterError::validation(PROVIDER, format!("invalid redirect target: {e}")))?;
    validate_url(PROVIDER, next.as_str(), allowlist)
}

/// Generic HTTPS proxy adapter.
///
/// Expected `params` keys:
///
/// - `url` (string, required): target URL (HTTPS, domain on allowlist).
/// - `method` (string): HTTP method, default `GET`.
/// - `headers` (object): request headers to forward.
/// - `body` (any): request body (JSON if object/array, raw otherwise).
/// - `timeout` (number): request timeout in seconds, capped at 30.
pub struct HttpProxyAdapter {
    allowlist: BTreeSet<String>,
    client: OnceLock<reqwest::Client>,
}

impl HttpProxyAdapter {
    /// Create a proxy restricted to the given lowercase host allowlist.
    pub fn new(allowlist: BTreeSet<String>) -> Self {
        Self {
            allowlist,
            client: OnceLock::new(),
        }
    }

    /// Shared pooled client, created on first use. Redirects are disabled
    /// at the client so every hop goes through [`resolve_redirect`].
    fn client(&self) -> &reqwest::Client {
        self.client.get_or_init(|| {
            reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .timeout(Duration::from_secs_f64(MAX_TIMEOUT_SECONDS))
                .build()
                .expect("http proxy client construction")
        })
    }

    async fn send_once(
        &self,
        method: &str,
        url: &Url,
        headers: &[(String, String)],
        body: &ProxyBody,
        timeout: Duration,
    ) -> Result<reqwest::Response, AdapterError> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| AdapterError::validation(PROVIDER, format!("invalid method {method}")))?;
        let mut request = self.client().request(method, url.clone()).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        request = match body {
            ProxyBody::None => request,
            ProxyBody::Json(v) => request.json(v),
            ProxyBody::Raw(s) => request.body(s.clone()),
        };
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                AdapterError::timeout(PROVIDER, "upstream request timed out")
            } else {
                AdapterError::upstream(
                    PROVIDER,
                    format!("upstream request failed: {e}"),
                    e.status().map(|s| s.as_u16()),
                )
            }
        })
    }
}

#[async_trait]
impl Adapter for HttpProxyAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn execute(
        &self,
        capability_id: &str,
        _capability_name: &str,
        params: &Value,
        _credential: Option<&str>,
    ) -> Result<Value, AdapterError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::validation(PROVIDER, "'url' (string) is required"))?;

        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(AdapterError::validation(
                PROVIDER,
                format!("HTTP method '{method}' is not allowed"),
            ));
        }

        let mut url = validate_url(PROVIDER, url, &self.allowlist)?;

        let empty = Map::new();
        let raw_headers = match params.get("headers") {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(AdapterError::validation(PROVIDER, "'headers' must be an object"));
            }
        };
        let headers = sanitize_request_headers(raw_headers);

        let timeout_secs = params
            .get("timeout")
            .and_then(Value::as_f64)
            .unwrap_or(MAX_TIMEOUT_SECONDS)
            .min(MAX_TIMEOUT_SECONDS)
            .max(0.0);
        let timeout = Duration::from_secs_f64(timeout_secs);

        let mut body = classify_body(params.get("body"), &method);
        let mut method = method;

        info!(
            capability_id,
            method = %method,
            url_host = url.host_str().unwrap_or(""),
            url_path = url.path(),
            "proxying HTTP request"
        );

        let mut response = self.send_once(&method, &url, &headers, &body, timeout).await?;
        let mut hops = 0usize;
        while response.status().is_redirection() {
            let Some(location) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
            else {
                break;
            };
            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(AdapterError::upstream(PROVIDER, "too many redirects", None));
            }
            url = resolve_redirect(&url, &location, &self.allowlist)?;
            // Mirror browser semantics: 303 (and legacy 301/302 on
            // non-GET) demote to GET and drop the body; 307/308 keep both.
            let status = response.status().as_u16();
            if status == 303 || ((status == 301 || status == 302) && method != "GET") {
                method = "GET".to_string();
                body = ProxyBody::None;
            }
            debug!(capability_id, hop = hops, url_host = url.host_str().unwrap_or(""), "following redirect");
            response = self.send_once(&method, &url, &headers, &body, timeout).await?;
        }

        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut response_headers = Map::new();
        for (name, value) in response.headers() {
            if !response_header_blocked(name.as_str()) {
                if let Ok(v) = value.to_str() {
                    response_headers.insert(name.to_string(), Value::String(v.to_string()));
                }
            }
        }

        let text = response.text().await.map_err(|e| {
            AdapterError::upstream(PROVIDER, format!("failed to read upstream body: {e}"), None)
        })?;
        let response_body = if content_type.contains("application/json") {
            serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        debug!(capability_id, status_code, content_type = %content_type, "HTTP proxy response received");

        Ok(json!({
            "status_code": status_code,
            "headers": Value::Object(response_headers),
            "body": response_body,
            "content_type": content_type,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allow(domains: &[&str]) -> BTreeSet<String> {
        domains.iter().map(|d| d.to_string()).collect()
    }

    fn proxy() -> HttpProxyAdapter {
        HttpProxyAdapter::new(allow(&["api.github.com", "cdn.github.com"]))
    }

    #[tokio::test]
    async fn url_param_is_required() {
        let err = proxy().execute("cap", "Cap", &json!({}), None).await.unwrap_err();
        assert!(err.message.contains("'url'"));
    }

    #[tokio::test]
    async fn disallowed_methods_are_rejected_before_egress() {
        let err = proxy()
            .execute(
                "cap",
                "Cap",
                &json!({"url": "https://api.github.com/zen", "method": "TRACE"}),
                None,
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("TRACE"));
    }

    #[tokio::test]
    async fn metadata_endpoint_is_blocked_for_every_method() {
        for method in ["GET", "POST", "HEAD", "OPTIONS"] {
            let err = proxy()
                .execute(
                    "cap",
                    "Cap",
                    &json!({
                        "url": "http://169.254.169.254/latest/meta-data/",
                        "method": method,
                    }),
                    None,
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind, crate::AdapterErrorKind::Validation, "method {method}");
        }
    }

    #[tokio::test]
    async fn headers_must_be_an_object() {
        let err = proxy()
            .execute(
                "cap",
                "Cap",
                &json!({"url": "https://api.github.com/zen", "headers": "nope"}),
                None,
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("headers"));
    }

    #[test]
    fn request_header_sanitisation_strips_hop_by_hop_and_host() {
        let mut raw = Map::new();
        for name in [
            "Connection",
            "Keep-Alive",
            "Proxy-Authorization",
            "Transfer-Encoding",
            "Upgrade",
            "Host",
            "Content-Length",
        ] {
            raw.insert(name.to_string(), json!("x"));
        }
        raw.insert("Authorization".to_string(), json!("Bearer tok"));
        raw.insert("Accept".to_string(), json!("application/json"));

        let kept = sanitize_request_headers(&raw);
        let mut names: Vec<&str> = kept.iter().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Accept", "Authorization"]);
    }

    #[test]
    fn response_header_strip_set_includes_content_encoding() {
        for name in ["content-encoding", "Content-Length", "Transfer-Encoding", "connection"] {
            assert!(response_header_blocked(name), "{name} should be stripped");
        }
        assert!(!response_header_blocked("content-type"));
        assert!(!response_header_blocked("x-ratelimit-remaining"));
    }

    #[test]
    fn body_classification_by_method_and_shape() {
        assert!(matches!(classify_body(Some(&json!({"a": 1})), "GET"), ProxyBody::None));
        assert!(matches!(classify_body(Some(&json!({"a": 1})), "POST"), ProxyBody::Json(_)));
        assert!(matches!(classify_body(Some(&json!([1, 2])), "PUT"), ProxyBody::Json(_)));
        assert!(matches!(classify_body(Some(&json!("raw")), "PATCH"), ProxyBody::Raw(_)));
        assert!(matches!(classify_body(Some(&json!(42)), "POST"), ProxyBody::Raw(_)));
        assert!(matches!(classify_body(None, "POST"), ProxyBody::None));
    }

    #[test]
    fn redirect_resolution_revalidates_the_new_host() {
        let allowlist = allow(&["api.github.com"]);
        let current = Url::parse("https://api.github.com/zen").unwrap();

        // Relative redirects stay on the validated host.
        let next = resolve_redirect(&current, "/other", &allowlist).unwrap();
        assert_eq!(next.as_str(), "https://api.github.com/other");

        // Absolute redirects to hosts off the allowlist are refused.
        let err = resolve_redirect(&current, "https://evil.example/", &allowlist).unwrap_err();
        assert!(err.message.contains("allowlist"));

        // Redirects into private address space are refused.
        let err =
            resolve_redirect(&current, "https://169.254.169.254/meta", &allowlist).unwrap_err();
        assert!(err.message.contains("blocked"));
    }

    #[test]
    fn timeout_is_capped_at_thirty_seconds() {
        let requested = json!({"timeout": 300.0});
        let capped = requested
            .get("timeout")
            .and_then(Value::as_f64)
            .unwrap_or(MAX_TIMEOUT_SECONDS)
            .min(MAX_TIMEOUT_SECONDS);
        assert_eq!(capped, MAX_TIMEOUT_SECONDS);
    }
}
