//! Blocking request/response transport.
//!
//! The connection talks to the API through the [`Transport`] trait so the
//! retry and pagination logic can run against a real socket or an in-memory
//! double. [`HttpTransport`] is the default implementation, backed by
//! `reqwest`'s blocking client (enabled by the `http-transport` feature).

use std::fmt;
use std::time::Duration;

use crate::error::TransportError;

/// HTTP methods used by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// The method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether parameters travel as a JSON body rather than a query string.
    pub fn sends_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully built request, ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// The HTTP method.
    pub method: Method,
    /// Path and query, e.g. `/v1/metrics?offset=5`.
    pub uri: String,
    /// JSON body for writes.
    pub body: Option<String>,
    /// Request headers.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A raw response: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// The full response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// A blocking request/response transport.
pub trait Transport {
    /// Sends one request and reads the complete response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionReset`] when the connection was
    /// dropped before a response was read (the caller reconnects and
    /// retries), or another `TransportError` for unrecoverable failures.
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Drops any open connection so the next `send` starts fresh.
    fn reconnect(&mut self) {}

    /// Updates the per-request timeout.
    fn set_timeout(&mut self, _timeout: Duration) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }

    fn reconnect(&mut self) {
        (**self).reconnect();
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout);
    }
}

#[cfg(feature = "http-transport")]
pub use self::http::HttpTransport;

#[cfg(feature = "http-transport")]
mod http {
    use std::error::Error as _;
    use std::io;
    use std::time::Duration;

    use super::{HttpRequest, HttpResponse, Method, Transport};
    use crate::config::Protocol;
    use crate::error::TransportError;

    /// [`Transport`] over `reqwest::blocking::Client`.
    ///
    /// The client is built on first use and dropped by `reconnect`, so a
    /// reset connection is replaced by a new one.
    pub struct HttpTransport {
        protocol: Protocol,
        hostname: String,
        timeout: Duration,
        client: Option<reqwest::blocking::Client>,
    }

    impl HttpTransport {
        /// Creates a transport for `protocol://hostname`.
        pub fn new(protocol: Protocol, hostname: impl Into<String>, timeout: Duration) -> Self {
            Self {
                protocol,
                hostname: hostname.into(),
                timeout,
                client: None,
            }
        }

        fn client(&mut self) -> Result<&reqwest::blocking::Client, TransportError> {
            if self.client.is_none() {
                let client = reqwest::blocking::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(|e| TransportError::ClientCreate {
                        reason: e.to_string(),
                    })?;
                self.client = Some(client);
            }
            self.client
                .as_ref()
                .ok_or_else(|| TransportError::ClientCreate {
                    reason: "client unavailable".to_string(),
                })
        }
    }

    impl Transport for HttpTransport {
        fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            let url = format!("{}://{}{}", self.protocol, self.hostname, request.uri);
            let client = self.client()?;

            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Delete => reqwest::Method::DELETE,
            };

            let mut builder = client.request(method, &url);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().map_err(|e| classify(&request.uri, &e))?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response
                .bytes()
                .map_err(|e| classify(&request.uri, &e))?
                .to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }

        fn reconnect(&mut self) {
            self.client = None;
        }

        fn set_timeout(&mut self, timeout: Duration) {
            self.timeout = timeout;
            self.client = None;
        }
    }

    /// Resets surface as `io::Error`s somewhere down the source chain.
    fn classify(uri: &str, err: &reqwest::Error) -> TransportError {
        let mut source = err.source();
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<io::Error>()
                && matches!(
                    io_err.kind(),
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::UnexpectedEof
                )
            {
                return TransportError::ConnectionReset {
                    reason: io_err.to_string(),
                };
            }
            source = cause.source();
        }
        TransportError::RequestFailed {
            uri: uri.to_string(),
            reason: err.to_string(),
        }
    }
}
