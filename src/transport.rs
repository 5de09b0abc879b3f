//! HTTP transport to the automation server.
//!
//! Two dial modes share one client-facing API: TCP via
//! `reqwest::Client::builder().timeout(...)`, and Unix-domain-socket dialing
//! via a minimal hand-rolled HTTP/1.1 client over `tokio::net::UnixStream` —
//! `reqwest` has no Unix socket dialer, so the local-socket path is written
//! by hand rather than pulling in `hyperlocal` or a bespoke connector.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::error::FlowError;

#[derive(Debug, Clone)]
pub enum Dialer {
    Tcp { base_url: String },
    UnixSocket { path: String },
}

#[derive(Debug, Clone)]
pub struct Transport {
    dialer: Dialer,
    timeout: Duration,
    client: reqwest::Client,
}

impl Transport {
    pub fn new(dialer: Dialer, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            dialer,
            timeout,
            client,
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value, FlowError> {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, FlowError> {
        self.request("POST", path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, FlowError> {
        self.request("DELETE", path, None).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> Result<Value, FlowError> {
        debug!(method, path, "transport request");
        let raw = match &self.dialer {
            Dialer::Tcp { base_url } => self.request_tcp(base_url, method, path, body).await?,
            Dialer::UnixSocket { path: sock } => {
                self.request_unix_socket(sock, method, path, body).await?
            }
        };
        let value: Value = serde_json::from_str(&raw).map_err(|e| {
            FlowError::server_unreachable("malformed JSON response from automation server")
                .with_detail("parse_error", e.to_string())
        })?;
        check_in_band_error(&value)?;
        Ok(value)
    }

    async fn request_tcp(
        &self,
        base_url: &str,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<String, FlowError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let mut req = self
            .client
            .request(
                method.parse().unwrap_or(reqwest::Method::GET),
                &url,
            )
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(body) = &body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| {
            FlowError::server_unreachable(format!("request to {} failed", url))
                .with_detail("source", e.to_string())
        })?;
        resp.text().await.map_err(|e| {
            FlowError::server_unreachable("failed reading response body")
                .with_detail("source", e.to_string())
        })
    }

    async fn request_unix_socket(
        &self,
        sock_path: &str,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<String, FlowError> {
        let body_bytes = match &body {
            Some(v) => serde_json::to_vec(v).unwrap_or_default(),
            None => Vec::new(),
        };

        let request = format!(
            "{method} {path} HTTP/1.1\r\n\
             Host: localhost\r\n\
             Content-Type: application/json\r\n\
             Accept: application/json\r\n\
             Content-Length: {len}\r\n\
             Connection: close\r\n\r\n",
            method = method,
            path = path,
            len = body_bytes.len(),
        );

        let connect = UnixStream::connect(sock_path);
        let mut stream = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| FlowError::timeout(format!("connecting to {} timed out", sock_path)))?
            .map_err(|e| {
                FlowError::server_unreachable(format!("could not dial unix socket {}", sock_path))
                    .with_detail("source", e.to_string())
            })?;

        stream
            .write_all(request.as_bytes())
            .await
            .map_err(io_err)?;
        if !body_bytes.is_empty() {
            stream.write_all(&body_bytes).await.map_err(io_err)?;
        }

        let mut raw = Vec::new();
        tokio::time::timeout(self.timeout, stream.read_to_end(&mut raw))
            .await
            .map_err(|_| FlowError::timeout(format!("reading from {} timed out", sock_path)))?
            .map_err(io_err)?;

        let text = String::from_utf8_lossy(&raw);
        split_http_body(&text)
    }
}

fn io_err(e: std::io::Error) -> FlowError {
    FlowError::server_unreachable("unix socket I/O error").with_detail("source", e.to_string())
}

fn split_http_body(response: &str) -> Result<String, FlowError> {
    match response.split_once("\r\n\r\n") {
        Some((_, body)) => Ok(body.to_string()),
        None => Err(FlowError::server_unreachable(
            "malformed HTTP response: no header/body separator",
        )),
    }
}

/// A `{value: {error, message}}` payload MUST be surfaced as a failure even
/// when the HTTP status was 200.
fn check_in_band_error(value: &Value) -> Result<(), FlowError> {
    let inner = value.get("value").unwrap_or(value);
    let error = inner.get("error").and_then(Value::as_str);
    let message = inner.get("message").and_then(Value::as_str);
    if let (Some(error), Some(message)) = (error, message) {
        warn!(error, message, "automation server returned in-band error");
        let combined = format!("{}: {}", error, message);
        // "no such element" is the standard WebDriver error string for a
        // failed find — callers (the resolver) need to tell this apart
        // from a genuine connection failure.
        let wrapped = if error == "no such element" {
            FlowError::element_not_found(combined)
        } else {
            FlowError::server_unreachable(combined)
        };
        return Err(wrapped);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn check_in_band_error_detects_error_and_message() {
        let value = json!({"value": {"error": "no such element", "message": "not found"}});
        let err = check_in_band_error(&value).unwrap_err();
        assert_eq!(err.message(), "no such element: not found");
        assert_eq!(err.code(), crate::error::codes::ELEMENT_NOT_FOUND);
    }

    #[test]
    fn check_in_band_error_classifies_other_errors_as_connection() {
        let value = json!({"value": {"error": "session not created", "message": "boom"}});
        let err = check_in_band_error(&value).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::SERVER_UNREACHABLE);
    }

    #[test]
    fn check_in_band_error_passes_normal_payload() {
        let value = json!({"value": {"sessionId": "abc123"}});
        assert!(check_in_band_error(&value).is_ok());
    }

    #[test]
    fn split_http_body_extracts_content_after_blank_line() {
        let response = "HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\n{\"ok\": true}";
        assert_eq!(split_http_body(response).unwrap(), "{\"ok\": true}");
    }

    #[test]
    fn split_http_body_rejects_missing_separator() {
        assert!(split_http_body("not an http response").is_err());
    }
}
