//! HTTP node - make HTTP requests.
//!
//! Parameters arrive already evaluated. The node's credential, when set, is
//! applied according to `auth_type` and dropped with the visit context.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};
use crate::expression::value_to_string;

/// SSRF protection is on unless NODEFLOW_ALLOW_INTERNAL_URLS=true.
fn is_ssrf_protection_enabled() -> bool {
    std::env::var("NODEFLOW_ALLOW_INTERNAL_URLS")
        .map(|v| v.to_lowercase() != "true")
        .unwrap_or(true)
}

/// Validate URL to prevent SSRF attacks.
/// Blocks access to localhost, private IP ranges, and non-http(s) schemes.
fn validate_url(url: &str) -> Result<()> {
    if !is_ssrf_protection_enabled() {
        return Ok(());
    }

    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::Node(format!("Invalid URL '{}': {}", url, e)))?;

    // Only allow http/https schemes
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::Node(format!(
                "Unsupported URL scheme '{}'. Only http and https are allowed.",
                scheme
            )));
        }
    }

    // Check host
    if let Some(host) = parsed.host_str() {
        // Block localhost variants
        let host_lower = host.to_lowercase();
        if host_lower == "localhost"
            || host_lower == "127.0.0.1"
            || host_lower == "::1"
            || host_lower == "[::1]"
            || host_lower == "0.0.0.0"
        {
            warn!("Blocked SSRF attempt to localhost: {}", url);
            return Err(Error::Node(
                "Access to localhost is not allowed for security reasons.".to_string(),
            ));
        }

        // Check if host is an IP address
        if let Ok(ip) = host.parse::<IpAddr>() {
            if is_private_or_special_ip(&ip) {
                warn!("Blocked SSRF attempt to private IP: {}", url);
                return Err(Error::Node(
                    "Access to private or internal IP addresses is not allowed for security reasons.".to_string(),
                ));
            }
        }

        // Block common internal hostnames
        if host_lower.ends_with(".local")
            || host_lower.ends_with(".internal")
            || host_lower.ends_with(".localhost")
            || host_lower == "metadata.google.internal"  // GCP metadata
            || host_lower == "169.254.169.254"
        // Cloud metadata endpoint
        {
            warn!("Blocked SSRF attempt to internal host: {}", url);
            return Err(Error::Node(
                "Access to internal hostnames is not allowed for security reasons.".to_string(),
            ));
        }
    }

    Ok(())
}

/// Check if an IP address is private, loopback, or otherwise special.
fn is_private_or_special_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_loopback()              // 127.0.0.0/8
                || ipv4.is_private()         // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
                || ipv4.is_link_local()      // 169.254.0.0/16
                || ipv4.is_broadcast()       // 255.255.255.255
                || ipv4.is_unspecified()     // 0.0.0.0
                || ipv4.octets()[0] == 100 && (ipv4.octets()[1] & 0xc0) == 64 // 100.64.0.0/10 (CGNAT)
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()              // ::1
                || ipv6.is_unspecified()     // ::
                // Check for IPv4-mapped addresses
                || ipv6.to_ipv4_mapped().map(|v4| is_private_or_special_ip(&IpAddr::V4(v4))).unwrap_or(false)
        }
    }
}

/// HTTP request node.
pub struct HttpNode {
    client: Client,
}

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

impl HttpNode {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_HTTP_CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout defaults: {}", e);
                Client::new()
            });
        Self { client }
    }
}

impl Default for HttpNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct HttpConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: Option<Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    /// Return raw text instead of parsing JSON
    #[serde(default)]
    raw_response: bool,
    /// How to use the node credential.
    /// - `bearer`: Add `Authorization: Bearer <value>` header
    /// - `basic`: Interpret value as "user:password" and add Basic auth
    /// - `api_key`: Add `X-API-Key: <value>` header
    /// - `header:<name>`: Add custom header with name `<name>`
    #[serde(default = "default_auth_type")]
    auth_type: String,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_auth_type() -> String {
    "bearer".to_string()
}

/// Apply authentication to a request based on auth_type.
fn apply_authentication(
    request: reqwest::RequestBuilder,
    credential: &str,
    auth_type: &str,
) -> Result<reqwest::RequestBuilder> {
    match auth_type {
        "bearer" => Ok(request.bearer_auth(credential)),
        "basic" => {
            let Some((user, password)) = credential.split_once(':') else {
                return Err(Error::Node(
                    "Basic auth credential must be in 'username:password' format".to_string(),
                ));
            };
            Ok(request.basic_auth(user, Some(password)))
        }
        "api_key" => Ok(request.header("X-API-Key", credential)),
        other => match other.strip_prefix("header:") {
            Some("") => Err(Error::Node(
                "header: auth_type must specify a header name".to_string(),
            )),
            Some(header_name) => Ok(request.header(header_name, credential)),
            None => Err(Error::Node(format!(
                "Unknown auth_type '{}'. Use: bearer, basic, api_key, or header:<name>",
                auth_type
            ))),
        },
    }
}

#[async_trait]
impl Node for HttpNode {
    fn node_type(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Make HTTP requests (GET, POST, PUT, DELETE, PATCH)"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: HttpConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid HTTP config: {}", e)))?;
        let url = config.url.trim();

        validate_url(url)?;

        debug!("HTTP {} {}", config.method, url);

        let mut request = match config.method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            "HEAD" => self.client.head(url),
            _ => {
                return Err(Error::Node(format!(
                    "Unknown HTTP method: {}",
                    config.method
                )))
            }
        };

        if let Some(secret) = &ctx.credential {
            request = apply_authentication(request, secret.expose(), &config.auth_type)?;
        }

        if let Some(headers) = config.headers.as_ref().and_then(|h| h.as_object()) {
            for (key, value) in headers {
                request = request.header(key, value_to_string(value));
            }
        }

        match &config.body {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(Value::Null) | None => {}
            Some(body) => request = request.json(body),
        }

        if let Some(timeout) = config.timeout_seconds {
            request = request.timeout(Duration::from_secs(timeout));
        }

        let start = std::time::Instant::now();
        let response = request.send().await?;
        let duration = start.elapsed();

        let status = response.status().as_u16();
        let headers: Value = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect::<serde_json::Map<_, _>>()
            .into();

        let body_text = response.text().await.map_err(|e| {
            Error::Node(format!(
                "Failed to read HTTP response body from {}: {}",
                url, e
            ))
        })?;

        if status >= 400 {
            return Err(Error::Node(format!(
                "HTTP {} {} -> {}: {}",
                config.method, url, status, body_text
            )));
        }

        let body: Value = if config.raw_response || body_text.trim().is_empty() {
            Value::String(body_text)
        } else {
            serde_json::from_str(&body_text).map_err(|e| {
                Error::Node(format!(
                    "HTTP {} {} returned non-JSON body: {}",
                    config.method, url, e
                ))
            })?
        };

        info!(
            "HTTP {} {} -> {} ({}ms)",
            config.method,
            url,
            status,
            duration.as_millis()
        );

        Ok(NodeResult::with_metadata(
            json!({
                "status": status,
                "headers": headers,
                "body": body,
            }),
            json!({
                "duration_ms": duration.as_millis() as u64,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_authentication_variants() {
        let client = Client::new();
        let request = || client.get("https://api.example.com");

        assert!(apply_authentication(request(), "tok", "bearer").is_ok());
        assert!(apply_authentication(request(), "user:pw", "basic").is_ok());
        assert!(apply_authentication(request(), "nocolon", "basic").is_err());
        assert!(apply_authentication(request(), "k", "header:X-Token").is_ok());
        assert!(apply_authentication(request(), "k", "header:").is_err());
        assert!(apply_authentication(request(), "k", "digest").is_err());
    }

    #[tokio::test]
    async fn test_http_rejects_unknown_method() {
        let node = HttpNode::new();
        let ctx = NodeContext::new("exec-1", "test");
        let config = json!({"url": "https://api.example.com", "method": "BREW"});

        let err = node.execute(&config, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("Unknown HTTP method"));
    }

    #[test]
    fn test_ssrf_protection_localhost() {
        let result = validate_url("http://localhost:8080/admin");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("localhost"));
    }

    #[test]
    fn test_ssrf_protection_127_0_0_1() {
        let result = validate_url("http://127.0.0.1:6379");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("localhost"));
    }

    #[test]
    fn test_ssrf_protection_private_ip() {
        // 10.0.0.0/8
        let result = validate_url("http://10.0.0.1/internal");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("private"));

        // 192.168.0.0/16
        let result = validate_url("http://192.168.1.1/admin");
        assert!(result.is_err());

        // 172.16.0.0/12
        let result = validate_url("http://172.16.0.1/secret");
        assert!(result.is_err());
    }

    #[test]
    fn test_ssrf_protection_metadata_endpoint() {
        let result = validate_url("http://169.254.169.254/latest/meta-data/");
        assert!(result.is_err());
    }

    #[test]
    fn test_ssrf_protection_internal_hostnames() {
        let result = validate_url("http://db.internal/query");
        assert!(result.is_err());

        let result = validate_url("http://redis.local/");
        assert!(result.is_err());
    }

    #[test]
    fn test_ssrf_protection_invalid_scheme() {
        let result = validate_url("file:///etc/passwd");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("scheme"));

        let result = validate_url("ftp://example.com/file");
        assert!(result.is_err());
    }

    #[test]
    fn test_ssrf_protection_allows_external() {
        let result = validate_url("https://api.example.com/v1/users");
        assert!(result.is_ok());

        let result = validate_url("https://httpbin.org/get");
        assert!(result.is_ok());
    }
}
