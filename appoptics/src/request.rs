//! Request building and response decoding.
//!
//! Reads put their parameters in the query string (lists expand to repeated
//! `key[]=value` pairs); writes send them as a JSON body. Responses are
//! decoded with the charset from `Content-Type` and parsed as JSON when the
//! media type says so.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::form_urlencoded;

use crate::error::DecodeError;
use crate::transport::{HttpRequest, HttpResponse, Method};

/// Request parameters: a JSON object, used as query pairs or as the body.
pub type Params = Map<String, Value>;

const JSON_MEDIA_TYPE: &str = "application/json";
const DEFAULT_CHARSET: &str = "utf-8";

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// The body was declared as JSON.
    Json(Value),
    /// Any other media type, decoded to text.
    Text(String),
}

impl Body {
    /// Converts into a JSON value; text becomes a JSON string.
    pub fn into_value(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Text(text) => Value::String(text),
        }
    }
}

/// The `User-Agent` sent when none is configured.
pub fn default_user_agent() -> String {
    format!(
        "appoptics-rust/{} (rust; {}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

/// Builds the `Authorization` header value: the key as Basic-Auth user with
/// an empty password.
pub fn basic_auth(api_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{api_key}:")))
}

/// Encodes parameters as a query string. List values become repeated
/// `key[]` pairs; strings are sent without quotes.
pub fn encode_query(params: &Params) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                let list_key = format!("{key}[]");
                for item in items {
                    serializer.append_pair(&list_key, &query_text(item));
                }
            }
            Value::Null => {}
            other => {
                serializer.append_pair(key, &query_text(other));
            }
        }
    }
    serializer.finish()
}

fn query_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builds a request for `base_path + path`.
///
/// Non-empty parameters go into a JSON body for POST/PUT/DELETE and into the
/// query string otherwise.
pub fn build_request(
    base_path: &str,
    path: &str,
    method: Method,
    params: &Params,
    mut headers: Vec<(String, String)>,
) -> HttpRequest {
    let mut uri = format!("{base_path}{path}");
    let mut body = None;

    if !params.is_empty() {
        if method.sends_body() {
            body = Some(Value::Object(params.clone()).to_string());
            headers.push(("Content-Type".to_string(), JSON_MEDIA_TYPE.to_string()));
        } else {
            uri.push('?');
            uri.push_str(&encode_query(params));
        }
    }

    info!("method={method} uri={uri}");
    match &body {
        None => debug!("body(->): None"),
        Some(_) => debug!(
            "body(->): {}",
            serde_json::to_string_pretty(params).unwrap_or_default()
        ),
    }

    HttpRequest {
        method,
        uri,
        body,
        headers,
    }
}

/// Splits a `Content-Type` header into its media type and charset.
///
/// A missing header is treated as JSON; a missing charset as UTF-8.
pub fn content_type(response: &HttpResponse) -> (String, String) {
    let header = response.header("content-type").unwrap_or(JSON_MEDIA_TYPE);
    let mut parts = header.split(';');
    let media_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = parts
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_CHARSET.to_string());
    (media_type, charset)
}

fn decode_text(bytes: &[u8], charset: &str) -> Result<String, DecodeError> {
    let invalid = || DecodeError::InvalidText {
        charset: charset.to_string(),
    };
    match charset {
        "utf-8" | "utf8" => String::from_utf8(bytes.to_vec()).map_err(|_| invalid()),
        "us-ascii" | "ascii" => {
            if bytes.is_ascii() {
                String::from_utf8(bytes.to_vec()).map_err(|_| invalid())
            } else {
                Err(invalid())
            }
        }
        "iso-8859-1" | "latin1" | "latin-1" | "l1" => {
            Ok(bytes.iter().map(|&b| char::from(b)).collect())
        }
        other => Err(DecodeError::UnsupportedCharset {
            charset: other.to_string(),
        }),
    }
}

/// Decodes a response body. An empty body decodes to `None`.
///
/// # Errors
///
/// Returns `DecodeError` if the charset is unsupported, the bytes are not
/// valid in it, or a JSON body does not parse.
pub fn decode_body(response: &HttpResponse) -> Result<Option<Body>, DecodeError> {
    debug!("body(<-): {}", String::from_utf8_lossy(&response.body));

    if response.body.is_empty() {
        return Ok(None);
    }

    let (media_type, charset) = content_type(response);
    let text = decode_text(&response.body, &charset)?;

    if media_type == JSON_MEDIA_TYPE {
        Ok(Some(Body::Json(serde_json::from_str(&text)?)))
    } else {
        Ok(Some(Body::Text(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test params are objects"),
        }
    }

    #[test]
    fn test_basic_auth_has_empty_password() {
        // base64("key_test:")
        assert_eq!(basic_auth("key_test"), "Basic a2V5X3Rlc3Q6");
    }

    #[test]
    fn test_default_user_agent_names_os_then_arch() {
        let expected = format!(
            "appoptics-rust/{} (rust; {}; {})",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH,
        );
        assert_eq!(default_user_agent(), expected);
    }

    #[test]
    fn test_encode_query_expands_lists() {
        let query = encode_query(&params(json!({
            "names": ["a", "b"],
            "offset": 5,
            "name": "cpu user"
        })));
        assert_eq!(query, "name=cpu+user&names%5B%5D=a&names%5B%5D=b&offset=5");
    }

    #[test]
    fn test_get_puts_params_in_query() {
        let req = build_request(
            "/v1/",
            "metrics",
            Method::Get,
            &params(json!({"length": 5})),
            Vec::new(),
        );
        assert_eq!(req.uri, "/v1/metrics?length=5");
        assert!(req.body.is_none());
        assert!(req.header("content-type").is_none());
    }

    #[test]
    fn test_write_puts_params_in_json_body() {
        let req = build_request(
            "/v1/",
            "measurements",
            Method::Post,
            &params(json!({"measurements": [{"name": "a", "value": 1}]})),
            Vec::new(),
        );
        assert_eq!(req.uri, "/v1/measurements");
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["measurements"][0]["name"], "a");
    }

    #[test]
    fn test_empty_params_send_nothing() {
        let req = build_request("/v1/", "alerts/3", Method::Delete, &Params::new(), Vec::new());
        assert_eq!(req.uri, "/v1/alerts/3");
        assert!(req.body.is_none());
    }

    #[test]
    fn test_decode_json_and_text() {
        let json_resp = HttpResponse::new(200, r#"{"a":1}"#)
            .with_header("Content-Type", "application/json; charset=utf-8");
        assert_eq!(
            decode_body(&json_resp).unwrap(),
            Some(Body::Json(json!({"a": 1})))
        );

        let text_resp = HttpResponse::new(200, "hello").with_header("Content-Type", "text/plain");
        assert_eq!(
            decode_body(&text_resp).unwrap(),
            Some(Body::Text("hello".to_string()))
        );
    }

    #[test]
    fn test_missing_content_type_defaults_to_json() {
        let resp = HttpResponse::new(200, "[1,2]");
        assert_eq!(decode_body(&resp).unwrap(), Some(Body::Json(json!([1, 2]))));
    }

    #[test]
    fn test_empty_body_is_none() {
        assert_eq!(decode_body(&HttpResponse::new(204, "")).unwrap(), None);
    }

    #[test]
    fn test_latin1_charset() {
        let resp = HttpResponse::new(200, vec![0x63, 0x61, 0x66, 0xe9])
            .with_header("Content-Type", "text/plain; charset=ISO-8859-1");
        assert_eq!(
            decode_body(&resp).unwrap(),
            Some(Body::Text("café".to_string()))
        );
    }

    #[test]
    fn test_unsupported_charset() {
        let resp = HttpResponse::new(200, "x").with_header("Content-Type", "text/plain; charset=koi8-r");
        assert!(matches!(
            decode_body(&resp),
            Err(DecodeError::UnsupportedCharset { .. })
        ));
    }
}
