//! Translation from HTTP responses and transport errors into [`Failure`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::error::Category;
use std::time::Duration;

use crate::scheduler::{Failure, FailureClass};

/// Longest slice of a raw body kept in a failure message.
const MAX_SNIPPET: usize = 200;

/// Build a failure from a non-2xx response.
///
/// JSON bodies contribute their `message` / `error` / `code` fields. Anything
/// else keeps a snippet of the raw text, so an HTML error page can still be
/// recognised by the classifier.
pub fn failure_from_response(status: u16, content_type: Option<&str>, retry_after: Option<&str>, body: &str) -> Failure {
    let is_json = content_type.map(|ct| ct.contains("json")).unwrap_or(false);
    let parsed = if is_json {
        serde_json::from_str::<Value>(body).ok()
    } else {
        None
    };

    let mut failure = match parsed {
        Some(json) => {
            let message = json_message(&json).unwrap_or_else(|| reason(status));
            let mut f = Failure::http(status, message);
            if let Some(code) = json_code(&json) {
                f = f.with_code(code);
            }
            f
        }
        None => {
            let text = body.trim();
            let message = if text.is_empty() {
                reason(status)
            } else {
                snippet(text)
            };
            Failure::http(status, message)
        }
    };

    if let Some(secs) = retry_after.and_then(|v| v.trim().parse::<u64>().ok()) {
        failure = failure.with_retry_after(Duration::from_secs(secs));
    }
    failure
}

/// Build a failure from a request that never produced a response.
pub fn failure_from_transport(err: &reqwest::Error) -> Failure {
    if err.is_timeout() {
        return Failure::new(format!("Request timed out: {}", err));
    }
    if err.is_connect() || err.is_request() {
        return Failure::network(format!("Network error: {}", err));
    }
    // The connection dropped while the body was streaming
    if err.is_decode() || err.is_body() {
        return Failure::network(format!("Failed to read response body: {}", err));
    }
    Failure::new(err.to_string())
}

/// Decode a 2xx body. An empty body decodes as JSON `null`.
///
/// Only a body that is not JSON at all is flagged `malformed_body`. Valid JSON
/// of the wrong shape is an ordinary, non-retried failure.
pub fn decode_body<T: DeserializeOwned>(status: u16, bytes: &[u8]) -> Result<T, Failure> {
    let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        bytes
    };
    serde_json::from_slice(bytes).map_err(|e| match e.classify() {
        Category::Syntax | Category::Eof => {
            let text = String::from_utf8_lossy(bytes);
            Failure::http(status, format!("Response {} is not valid JSON: {}", snippet(&text), e)).with_malformed_body()
        }
        Category::Data | Category::Io => {
            Failure::http(status, format!("Unexpected response shape: {}", e)).with_class(FailureClass::Normal)
        }
    })
}

fn json_message(json: &Value) -> Option<String> {
    let direct = json.get("message").and_then(Value::as_str);
    let error = json.get("error").and_then(|e| match e {
        Value::String(s) => Some(s.as_str()),
        Value::Object(_) => e.get("message").and_then(Value::as_str),
        _ => None,
    });
    direct.or(error).map(str::to_string)
}

fn json_code(json: &Value) -> Option<String> {
    json.get("code")
        .or_else(|| json.get("error").and_then(|e| e.get("code")))
        .and_then(|c| match c {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn reason(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown status")
        .to_string()
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= MAX_SNIPPET {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_SNIPPET).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::classify;

    #[test]
    fn test_json_error_body() {
        let f = failure_from_response(
            422,
            Some("application/json"),
            None,
            r#"{"error":"Title is required","code":"validation_failed"}"#,
        );
        assert_eq!(f.status, Some(422));
        assert_eq!(f.message, "Title is required");
        assert_eq!(f.code.as_deref(), Some("validation_failed"));
        assert_eq!(classify(&f), FailureClass::Normal);
    }

    #[test]
    fn test_nested_json_error() {
        let f = failure_from_response(
            400,
            Some("application/json; charset=utf-8"),
            None,
            r#"{"error":{"message":"bad input","code":40001}}"#,
        );
        assert_eq!(f.message, "bad input");
        assert_eq!(f.code.as_deref(), Some("40001"));
    }

    #[test]
    fn test_json_without_message_uses_reason() {
        let f = failure_from_response(404, Some("application/json"), None, "{}");
        assert_eq!(f.message, "Not Found");
    }

    #[test]
    fn test_html_throttle_page() {
        let f = failure_from_response(
            503,
            Some("text/html"),
            None,
            "<!DOCTYPE html><html><body>Too Many Requests</body></html>",
        );
        assert_eq!(classify(&f), FailureClass::RateLimited);
    }

    #[test]
    fn test_plain_text_error_is_normal() {
        let f = failure_from_response(500, Some("text/plain"), None, "database unavailable");
        assert_eq!(f.message, "database unavailable");
        assert_eq!(classify(&f), FailureClass::Normal);
    }

    #[test]
    fn test_status_classification_survives_translation() {
        let f = failure_from_response(429, None, Some("7"), "");
        assert_eq!(f.message, "Too Many Requests");
        assert_eq!(f.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(classify(&f), FailureClass::RateLimited);

        let f = failure_from_response(401, Some("application/json"), None, r#"{"message":"session expired"}"#);
        assert_eq!(classify(&f), FailureClass::AuthFailure);
    }

    #[test]
    fn test_unparseable_retry_after_ignored() {
        let f = failure_from_response(429, None, Some("Wed, 21 Oct 2015 07:28:00 GMT"), "");
        assert!(f.retry_after.is_none());
    }

    #[test]
    fn test_long_body_truncated() {
        let body = "x".repeat(1000);
        let f = failure_from_response(500, None, None, &body);
        assert_eq!(f.message.len(), MAX_SNIPPET + 3);
        assert!(f.message.ends_with("..."));
    }

    #[test]
    fn test_decode_body() {
        let v: Vec<u32> = decode_body(200, b"[1,2,3]").unwrap();
        assert_eq!(v, vec![1, 2, 3]);

        let empty: Option<u32> = decode_body(204, b"").unwrap();
        assert!(empty.is_none());
        decode_body::<()>(204, b"  ").unwrap();
    }

    #[test]
    fn test_decode_html_body_is_malformed() {
        let err = decode_body::<Vec<u32>>(200, b"<html>rate limited</html>").unwrap_err();
        assert!(err.malformed_body);
        assert!(err.message.contains("is not valid JSON"));
        assert_eq!(classify(&err), FailureClass::RateLimited);
    }

    #[test]
    fn test_decode_truncated_body_is_malformed() {
        let err = decode_body::<Vec<u32>>(200, b"[1,2,").unwrap_err();
        assert!(err.malformed_body);
        assert_eq!(classify(&err), FailureClass::RateLimited);
    }

    #[test]
    fn test_decode_wrong_shape_is_normal() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Note {
            id: u64,
            title: String,
        }

        let err = decode_body::<Note>(200, br#"{"id":"abc","title":"x"}"#).unwrap_err();
        assert!(!err.malformed_body);
        assert_eq!(err.status, Some(200));
        assert!(err.message.starts_with("Unexpected response shape"));
        assert_eq!(classify(&err), FailureClass::Normal);

        // A field name that looks like throttling must not change that
        let err = decode_body::<Vec<u32>>(200, br#"{"rate_limit":5}"#).unwrap_err();
        assert_eq!(classify(&err), FailureClass::Normal);
    }
}
