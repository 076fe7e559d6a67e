//! # appoptics
//!
//! Client for the AppOptics metrics API.
//!
//! The crate wraps the REST API behind a blocking [`Connection`]: metrics and
//! measurements, annotation streams, alerts and services, spaces and charts.
//! Every request goes through a retry driver with exponential backoff, list
//! endpoints are walked lazily page by page, and an [`Aggregator`] folds raw
//! samples into summaries before submitting them in one request.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - 5xx responses and connection resets are retried; 4xx responses are not
//! - Retry growth, attempt limit and elapsed-time limit are configurable
//! - Pagination is lazy: a page is only requested when the previous one is used up
//! - The HTTP layer sits behind the [`Transport`] trait and can be swapped out
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use appoptics::{Aggregator, Connection, ConnectionConfig, MeasurementQuery, SubmitOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::new("my-token").with_tag("region", "us-east-1");
//! let mut api = Connection::new(config)?;
//!
//! // Submit a single measurement, inheriting the connection's tags
//! api.submit("cpu.usage", 42.0, SubmitOptions::new().inherit_tags())?;
//!
//! // Walk every metric definition, page by page
//! for metric in api.list_all_metrics(Default::default()) {
//!     println!("{}", metric?.name());
//! }
//!
//! // Read back the last hour
//! let data = api.get_measurements("cpu.usage", MeasurementQuery::last(3600))?;
//! println!("{} series", data.series.len());
//!
//! // Summarize many samples into one request
//! let mut agg = Aggregator::new().with_period(60);
//! agg.add_tagged("latency", 12.0);
//! agg.add_tagged("latency", 30.0);
//! agg.submit(&mut api)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Connection`]: Credentials, defaults and the request executor
//! - [`BackoffPolicy`]: How long to wait between retries and when to give up
//! - [`Paginated`]: Lazy iterator over every entity of a collection
//! - [`Aggregator`]: Count/sum/min/max summaries submitted in bulk
//!
//! ## Modules
//!
//! - [`connection`]: Connection handle and request execution
//! - [`retry`]: Backoff policy and the retry driver
//! - [`pagination`]: Page walking over list endpoints
//! - [`aggregator`]: Client-side summarization
//! - [`metrics`], [`annotations`], [`alerts`], [`spaces`]: API resources
//! - [`transport`]: HTTP request/response types and the transport seam
//! - [`error`]: Error types

pub mod aggregator;
pub mod alerts;
pub mod annotations;
pub mod config;
pub mod connection;
pub mod error;
pub mod measurement;
pub mod metrics;
pub mod pagination;
pub mod request;
pub mod retry;
pub mod sanitize;
pub mod spaces;
pub mod transport;

// Re-export primary API types at crate root for convenience.
pub use aggregator::{Aggregator, Summary};
pub use alerts::{Alert, AlertCondition, Service};
pub use annotations::{AnnotationEvent, AnnotationStream};
pub use config::{ConnectionConfig, Protocol};
pub use connection::{Connection, to_params};
pub use error::{AppOpticsError, ClientError, ClientErrorKind, Result};
pub use measurement::{Measurement, SubmitOptions, TagSet};
pub use metrics::{MeasurementQuery, Measurements, Metric, MetricInfo};
pub use pagination::Paginated;
pub use request::Params;
pub use retry::{BackoffPolicy, Growth, Sleeper};
pub use sanitize::Sanitizer;
pub use spaces::{Chart, Space};
#[cfg(feature = "http-transport")]
pub use transport::HttpTransport;
pub use transport::{HttpRequest, HttpResponse, Method, Transport};
