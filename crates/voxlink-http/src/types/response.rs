//! Raw HTTP response as seen by the transport layer.

use crate::error::{Result, TransportError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// HTTP response with the body fully buffered.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        HttpResponse {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with [`TransportError::Status`] unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let body = self.body_str().unwrap_or("").chars().take(200).collect();
        Err(TransportError::Status {
            status: self.status,
            body,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        HttpResponse::new(200, Bytes::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_basic() {
        let res = HttpResponse::new(200, "hello").with_header("Content-Type", "text/plain");
        assert_eq!(res.body_str(), Some("hello"));
        assert_eq!(res.header("content-type"), Some("text/plain"));
        assert!(res.is_success());
    }

    #[test]
    fn test_error_for_status() {
        let err = HttpResponse::new(503, "overloaded")
            .error_for_status()
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 503,
                body: "overloaded".into()
            }
        );
    }

    #[test]
    fn test_decode_json() {
        let res = HttpResponse::json(200, &json!({ "text": "hi" }));
        let value: serde_json::Value = res.decode().unwrap();
        assert_eq!(value["text"], "hi");
        assert!(HttpResponse::new(200, "<html>").decode::<serde_json::Value>().is_err());
    }
}
