//! The connection object: credentials, defaults, and the request pipeline.
//!
//! Every resource method on [`Connection`] ends in [`Connection::execute`],
//! which builds the authenticated request and hands it to the retry driver.
//! Resource-specific methods live next to their types in the
//! [`metrics`](crate::metrics), [`annotations`](crate::annotations),
//! [`alerts`](crate::alerts) and [`spaces`](crate::spaces) modules.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ConnectionConfig;
use crate::error::{AppOpticsError, DecodeError, Result};
use crate::measurement::TagSet;
use crate::pagination::Paginated;
use crate::request::{Body, Params, basic_auth, build_request, default_user_agent};
use crate::retry::{BackoffPolicy, Sleeper, ThreadSleeper, send_with_retry};
use crate::sanitize::Sanitizer;
use crate::transport::{Method, Transport};

/// A handle on the AppOptics API.
///
/// Creating a connection does not touch the network; credentials are only
/// checked by the server on the first request. Operations take `&mut self`
/// and block the calling thread, including while sleeping between retries.
pub struct Connection {
    authorization: String,
    user_agent: String,
    base_path: String,
    hostname: String,
    timeout: Duration,
    tags: TagSet,
    sanitizer: Sanitizer,
    backoff: BackoffPolicy,
    transport: Box<dyn Transport>,
    sleeper: Box<dyn Sleeper>,
}

impl Connection {
    /// Opens a connection over HTTP(S) using `reqwest`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the config fails validation.
    #[cfg(feature = "http-transport")]
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let transport = crate::transport::HttpTransport::new(
            config.protocol,
            config.hostname.clone(),
            config.timeout,
        );
        Self::with_transport(config, transport)
    }

    /// Opens a connection over a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the config fails validation.
    pub fn with_transport(
        config: ConnectionConfig,
        transport: impl Transport + 'static,
    ) -> Result<Self> {
        config.validate()?;

        let user_agent = config.user_agent.unwrap_or_else(default_user_agent);

        Ok(Self {
            authorization: basic_auth(&config.api_key),
            user_agent,
            base_path: config.base_path,
            hostname: config.hostname,
            timeout: config.timeout,
            tags: config.tags,
            sanitizer: config.sanitizer,
            backoff: config.backoff,
            transport: Box::new(transport),
            sleeper: Box::new(ThreadSleeper),
        })
    }

    /// Replaces the sleeper used between retries.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// The API host this connection talks to.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Changes the per-request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.transport.set_timeout(timeout);
    }

    /// The retry policy.
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Replaces the retry policy.
    pub fn set_backoff(&mut self, backoff: BackoffPolicy) {
        self.backoff = backoff;
    }

    /// A copy of the top-level tag set.
    pub fn tags(&self) -> TagSet {
        self.tags.clone()
    }

    /// Replaces the top-level tag set.
    pub fn set_tags(&mut self, tags: TagSet) {
        self.tags = tags;
    }

    /// Adds to the top-level tag set, overwriting existing keys.
    pub fn add_tags(&mut self, tags: TagSet) {
        self.tags.extend(tags);
    }

    pub(crate) fn default_tags(&self) -> &TagSet {
        &self.tags
    }

    /// Runs a metric name through the configured sanitizer.
    pub fn sanitize(&self, name: &str) -> String {
        self.sanitizer.apply(name)
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), self.authorization.clone()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ]
    }

    /// Sends a request to `path` (relative to the base path) through the
    /// retry driver and returns the decoded body.
    ///
    /// # Errors
    ///
    /// See [`send_with_retry`].
    pub fn execute(&mut self, path: &str, method: Method, params: &Params) -> Result<Option<Body>> {
        let request = build_request(&self.base_path, path, method, params, self.headers());
        send_with_retry(
            self.transport.as_mut(),
            &request,
            &self.backoff,
            self.sleeper.as_mut(),
        )
    }

    /// Like [`execute`](Self::execute) but returns the body as JSON,
    /// `Null` when it was empty.
    ///
    /// # Errors
    ///
    /// See [`send_with_retry`].
    pub fn execute_value(&mut self, path: &str, method: Method, params: &Params) -> Result<Value> {
        Ok(self
            .execute(path, method, params)?
            .map_or(Value::Null, Body::into_value))
    }

    /// Sends a request and decodes the body into `T`.
    pub(crate) fn fetch<T: DeserializeOwned>(
        &mut self,
        path: &str,
        method: Method,
        params: &Params,
    ) -> Result<T> {
        let value = self.execute_value(path, method, params)?;
        if value.is_null() {
            return Err(AppOpticsError::unexpected(format!(
                "{method} {path} returned an empty body"
            )));
        }
        decode(value)
    }

    /// Lazily walks every page of a collection resource. The entity list is
    /// read from the key named after the resource.
    pub fn paginate<T: DeserializeOwned>(
        &mut self,
        resource: impl Into<String>,
        params: Params,
    ) -> Paginated<'_, T> {
        Paginated::new(self, resource.into(), params)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("hostname", &self.hostname)
            .field("base_path", &self.base_path)
            .field("timeout", &self.timeout)
            .field("tags", &self.tags)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Decodes a JSON value into `T`.
pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| DecodeError::Json(e).into())
}

/// Serializes a value into request parameters; it must be a JSON object.
///
/// # Errors
///
/// Returns `InvalidArgument` if `value` does not serialize to an object.
pub fn to_params<T: Serialize>(value: &T) -> Result<Params> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AppOpticsError::invalid(format!(
            "parameters must be a JSON object, got {other}"
        ))),
        Err(e) => Err(AppOpticsError::invalid(format!(
            "parameters failed to serialize: {e}"
        ))),
    }
}

/// Overlays `extra` on top of `params`.
pub(crate) fn merge(mut params: Params, extra: Params) -> Params {
    params.extend(extra);
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{HttpRequest, HttpResponse};
    use serde_json::json;

    struct Echo;

    impl Transport for Echo {
        fn send(
            &mut self,
            request: &HttpRequest,
        ) -> std::result::Result<HttpResponse, TransportError> {
            let body = json!({
                "uri": request.uri,
                "authorization": request.header("authorization"),
                "user_agent": request.header("user-agent"),
            });
            Ok(HttpResponse::new(200, body.to_string()))
        }
    }

    #[test]
    fn test_requests_are_authenticated() {
        let config = ConnectionConfig::new("key_test").with_user_agent("tests/1.0");
        let mut conn = Connection::with_transport(config, Echo).unwrap();

        let value = conn
            .execute_value("metrics", Method::Get, &Params::new())
            .unwrap();

        assert_eq!(value["uri"], "/v1/metrics");
        assert_eq!(value["authorization"], "Basic a2V5X3Rlc3Q6");
        assert_eq!(value["user_agent"], "tests/1.0");
    }

    #[test]
    fn test_rejects_non_ascii_key() {
        let err = Connection::with_transport(ConnectionConfig::new("clé"), Echo).unwrap_err();
        assert!(matches!(err, AppOpticsError::InvalidArgument { .. }));
    }

    #[test]
    fn test_tag_accessors() {
        let config = ConnectionConfig::new("k").with_tag("region", "us-east-1");
        let mut conn = Connection::with_transport(config, Echo).unwrap();

        let mut extra = TagSet::new();
        extra.insert("host".to_string(), "web-1".to_string());
        conn.add_tags(extra.clone());
        assert_eq!(conn.tags().len(), 2);

        conn.set_tags(extra.clone());
        assert_eq!(conn.tags(), extra);

        // tags() hands out a copy
        let mut copy = conn.tags();
        copy.clear();
        assert_eq!(conn.tags().len(), 1);
    }

    #[test]
    fn test_to_params_requires_object() {
        assert!(to_params(&json!({"a": 1})).is_ok());
        assert!(matches!(
            to_params(&json!([1, 2])),
            Err(AppOpticsError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_set_timeout() {
        let mut conn = Connection::with_transport(ConnectionConfig::new("k"), Echo).unwrap();
        conn.set_timeout(Duration::from_secs(2));
        assert_eq!(conn.timeout(), Duration::from_secs(2));
    }
}
