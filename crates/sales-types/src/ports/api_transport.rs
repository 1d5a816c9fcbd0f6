use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        })
    }
}

/// One call against the server. `path` is relative to the base URL and has
/// no leading slash.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, TransportError> {
        let value =
            serde_json::to_value(body).map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body; the body is kept verbatim for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_one_of(&self, expected: &[u16]) -> bool {
        expected.contains(&self.status)
    }

    pub fn json_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Decodes the `data` member of the response envelope.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let envelope: Envelope<T> = serde_json::from_str(&self.body)?;
        Ok(envelope.data)
    }
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_builder_collects_parts() {
        let req = ApiRequest::get("sales/invoices")
            .query("status", "DRAFT")
            .query("search", "INV-1")
            .header("X-Tenant-Id", "t1");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.query_value("search"), Some("INV-1"));
        assert_eq!(req.header_value("x-tenant-id"), Some("t1"));
        assert!(req.body.is_none());

        let with_body = ApiRequest::post("auth/login")
            .json(&json!({"email": "a@b.c"}))
            .unwrap();
        assert_eq!(with_body.body, Some(json!({"email": "a@b.c"})));
    }

    #[test]
    fn envelope_data_is_unwrapped() {
        let res = ApiResponse::json(200, &json!({"data": {"items": [1, 2]}}));
        let data: Value = res.data().unwrap();
        assert_eq!(data["items"], json!([1, 2]));
        assert!(res.is_one_of(&[200, 201]));

        let not_json = ApiResponse::new(500, "Internal Server Error");
        assert!(not_json.data::<Value>().is_err());
    }
}
