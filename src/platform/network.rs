// src/platform/network.rs

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Network request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout_ms: Option<u64>,
}

/// Network response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl NetworkResponse {
    /// Whether the status code is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

pub type NetworkArc = Arc<dyn NetworkProvider>;

/// Network operations
#[async_trait::async_trait]
pub trait NetworkProvider: Send + Sync + Debug {
    async fn request(&self, request: NetworkRequest) -> Result<NetworkResponse>;
}

/// Percent-encodes key/value pairs into an `application/x-www-form-urlencoded` body
pub fn form_encode<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Builds a form-encoded POST request
pub fn form_post<'a>(url: &str, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> NetworkRequest {
    let mut headers = HashMap::new();
    headers.insert(
        "Content-Type".to_string(),
        "application/x-www-form-urlencoded".to_string(),
    );

    NetworkRequest {
        method: "POST".to_string(),
        url: url.to_string(),
        headers,
        body: Some(form_encode(pairs).into_bytes()),
        timeout_ms: None,
    }
}

/// Reqwest-backed provider used outside of tests
#[derive(Debug, Default)]
pub struct HttpNetworkProvider {
    client: reqwest::Client,
}

impl HttpNetworkProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl NetworkProvider for HttpNetworkProvider {
    async fn request(&self, request: NetworkRequest) -> Result<NetworkResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::network(None, &request.url, format!("Invalid method: {}", e)))?;

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout_ms) = request.timeout_ms {
            builder = builder.timeout(std::time::Duration::from_millis(timeout_ms));
        }

        let response = builder.send().await.map_err(|e| {
            Error::network(None, &request.url, "Request failed").caused_by(e)
        })?;

        let status_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::network(Some(status_code), &request.url, "Failed to read body").caused_by(e))?
            .to_vec();

        Ok(NetworkResponse {
            status_code,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_encode_escapes_reserved_characters() {
        let body = form_encode([("action", "explainer_get_localized_strings"), ("nonce", "a b&c")]);
        assert_eq!(body, "action=explainer_get_localized_strings&nonce=a%20b%26c");
    }

    #[test]
    fn test_form_post_shape() {
        let request = form_post("/wp-admin/admin-ajax.php", [("action", "explainer_get_localized_strings")]);

        assert_eq!(request.method, "POST");
        assert_eq!(
            request.headers.get("Content-Type").map(String::as_str),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            request.body.as_deref(),
            Some("action=explainer_get_localized_strings".as_bytes())
        );
    }

    #[test]
    fn test_response_success_range() {
        let ok = NetworkResponse {
            status_code: 204,
            headers: HashMap::new(),
            body: Vec::new(),
        };
        let not_found = NetworkResponse {
            status_code: 404,
            headers: HashMap::new(),
            body: Vec::new(),
        };
        assert!(ok.is_success());
        assert!(!not_found.is_success());
    }
}
