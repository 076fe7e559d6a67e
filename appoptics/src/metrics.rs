//! Metrics and measurements.
//!
//! Metric definitions are decoded by their `type` field into [`Metric`];
//! measurement submission goes through [`Connection::submit`], which
//! resolves tags against the connection's top-level set.

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::connection::{Connection, decode, merge, to_params};
use crate::error::{AppOpticsError, Result};
use crate::measurement::{Measurement, SubmitOptions, TagSet};
use crate::pagination::Paginated;
use crate::request::Params;
use crate::transport::Method;

/// Fields shared by every metric type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricInfo {
    /// Metric name.
    pub name: String,
    /// Human-friendly name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Expected reporting interval, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    /// Display attributes (units, color, aggregation flags, ...).
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Query expression, set on composite metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<String>,
    /// Expected lag before data is complete, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lag: Option<u64>,
}

/// A metric definition, discriminated by its `type` field.
///
/// Types this client does not model decode as [`Metric::Other`], so one
/// unfamiliar entity does not fail a whole listing.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    /// A scalar metric taking point-in-time measurements.
    Gauge(MetricInfo),
    /// A metric derived from a query over other metrics.
    Composite(MetricInfo),
    /// Any other `type`, kept as reported (empty when absent).
    Other {
        /// The reported `type`.
        kind: String,
        /// The shared metric fields.
        info: MetricInfo,
    },
}

impl Metric {
    /// The shared metric fields.
    pub fn info(&self) -> &MetricInfo {
        match self {
            Self::Gauge(info) | Self::Composite(info) | Self::Other { info, .. } => info,
        }
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.info().name
    }

    /// The `type` string of this metric.
    pub fn kind(&self) -> &str {
        match self {
            Self::Gauge(_) => "gauge",
            Self::Composite(_) => "composite",
            Self::Other { kind, .. } => kind,
        }
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut fields = match serde_json::to_value(self.info()).map_err(S::Error::custom)? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        if !self.kind().is_empty() {
            fields.insert("type".to_string(), Value::from(self.kind()));
        }
        fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut fields = Map::deserialize(deserializer)?;
        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => String::new(),
        };
        let info: MetricInfo =
            serde_json::from_value(Value::Object(fields)).map_err(D::Error::custom)?;
        Ok(match kind.as_str() {
            "gauge" => Self::Gauge(info),
            "composite" => Self::Composite(info),
            _ => Self::Other { kind, info },
        })
    }
}

/// Query for [`Connection::get_measurements`] and [`Connection::get_composite`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeasurementQuery {
    /// Start of the range, epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    /// End of the range, epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Range length in seconds, counting back from now or `end_time`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Resolution in seconds. Defaults to raw (1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<u64>,
    /// Exact tag filter, sent as `tags[key]=value` pairs.
    #[serde(skip)]
    pub tags: Option<TagSet>,
    /// Tag search expression, e.g. `hostname=web-1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags_search: Option<String>,
    /// Other query parameters (`group_by`, `summary_function`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MeasurementQuery {
    /// Query for the last `seconds` seconds.
    pub fn last(seconds: u64) -> Self {
        Self {
            duration: Some(seconds),
            ..Self::default()
        }
    }

    /// Query starting at `start_time`.
    pub fn since(start_time: i64) -> Self {
        Self {
            start_time: Some(start_time),
            ..Self::default()
        }
    }

    /// Sets the end of the range.
    #[must_use]
    pub fn until(mut self, end_time: i64) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Sets the resolution.
    #[must_use]
    pub fn with_resolution(mut self, resolution: u64) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Filters on an exact tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Filters with a tag search expression.
    #[must_use]
    pub fn with_tags_search(mut self, expression: impl Into<String>) -> Self {
        self.tags_search = Some(expression.into());
        self
    }

    /// Adds another query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    fn into_params(self) -> Result<Params> {
        let tags = self.tags.clone();
        let mut params = to_params(&self)?;
        params
            .entry("resolution")
            .or_insert_with(|| Value::from(1));
        if let Some(tags) = tags {
            for (key, value) in tags {
                params.insert(format!("tags[{key}]"), Value::from(value));
            }
        }
        Ok(params)
    }

    fn measurement_params(self) -> Result<Params> {
        if self.start_time.is_none() && self.duration.is_none() {
            return Err(AppOpticsError::invalid(
                "you must provide 'start_time' or 'duration'",
            ));
        }
        if self.start_time.is_some() && self.end_time.is_some() && self.duration.is_some() {
            return Err(AppOpticsError::invalid(
                "it is an error to set 'start_time', 'end_time' and 'duration'",
            ));
        }
        self.into_params()
    }

    fn composite_params(self, compose: &str) -> Result<Params> {
        if self.start_time.is_none() {
            return Err(AppOpticsError::invalid("you must provide a 'start_time'"));
        }
        let mut params = self.into_params()?;
        params.insert("compose".to_string(), Value::from(compose));
        Ok(params)
    }
}

/// A single data point in a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Epoch seconds.
    pub time: i64,
    /// The value; absent when a summary function returns other fields.
    #[serde(default)]
    pub value: Option<f64>,
    /// Summary fields (`count`, `sum`, `min`, `max`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One tag combination and its points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Tags identifying the series.
    #[serde(default)]
    pub tags: TagSet,
    /// The data points, oldest first.
    #[serde(default)]
    pub measurements: Vec<Point>,
}

/// Response of `GET /measurements/:name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    /// Metric name.
    pub name: String,
    /// One entry per matching tag combination.
    #[serde(default)]
    pub series: Vec<Series>,
    /// Resolution of the returned points, seconds.
    #[serde(default)]
    pub resolution: Option<u64>,
    /// Other response fields (`links`, `query`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Connection {
    /// Fetches one page of metric definitions. Unknown types come back as
    /// [`Metric::Other`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or an entity lacks the shared
    /// metric fields.
    pub fn list_metrics(&mut self, params: Params) -> Result<Vec<Metric>> {
        let mut envelope = self.execute_value("metrics", Method::Get, &params)?;
        match envelope.get_mut("metrics").map(Value::take) {
            Some(items) => decode(items),
            None => Ok(Vec::new()),
        }
    }

    /// Walks every page of metric definitions.
    pub fn list_all_metrics(&mut self, params: Params) -> Paginated<'_, Metric> {
        self.paginate("metrics", params)
    }

    /// Submits one measurement.
    ///
    /// A `type` field in `options.extra` is dropped. The measurement needs at
    /// least one tag, from `options` or from the connection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when neither the call nor the connection
    /// supplies tags, or any error from the request.
    pub fn submit(&mut self, name: &str, value: f64, mut options: SubmitOptions) -> Result<()> {
        options.extra.remove("type");
        if options.tags.is_none() && self.default_tags().is_empty() {
            return Err(AppOpticsError::invalid("at least one tag is needed"));
        }
        self.submit_tagged(name, value, options)
    }

    /// Submits one tagged measurement.
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn submit_tagged(&mut self, name: &str, value: f64, options: SubmitOptions) -> Result<()> {
        let measurement = self.create_tagged_payload(name, value, &options);
        let mut params = Params::new();
        params.insert(
            "measurements".to_string(),
            Value::Array(vec![
                serde_json::to_value(&measurement)
                    .map_err(|e| AppOpticsError::invalid(e.to_string()))?,
            ]),
        );
        self.execute("measurements", Method::Post, &params)?;
        Ok(())
    }

    /// Builds the wire record for a measurement: sanitized name, resolved
    /// tags, optional time and extra fields.
    pub fn create_tagged_payload(
        &self,
        name: &str,
        value: f64,
        options: &SubmitOptions,
    ) -> Measurement {
        Measurement::build(self.sanitize(name), value, options, self.default_tags())
    }

    /// Fetches a gauge definition.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedResponse` if the metric is not a gauge, or any
    /// error from the request.
    pub fn get_metric(&mut self, name: &str, params: Params) -> Result<MetricInfo> {
        let path = format!("metrics/{}", self.sanitize(name));
        let value = self.execute_value(&path, Method::Get, &params)?;
        match value.get("type").and_then(Value::as_str) {
            Some("gauge") => decode(value),
            other => Err(AppOpticsError::unexpected(format!(
                "metric '{name}' is not a gauge (type: {other:?})"
            ))),
        }
    }

    /// Fetches measurements of a metric.
    ///
    /// Resolution defaults to raw.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the query has neither `start_time`
    /// nor `duration`, or sets all of `start_time`, `end_time` and
    /// `duration`; otherwise any error from the request.
    pub fn get_measurements(&mut self, name: &str, query: MeasurementQuery) -> Result<Measurements> {
        let params = query.measurement_params()?;
        let path = format!("measurements/{}", self.sanitize(name));
        self.fetch(&path, Method::Get, &params)
    }

    /// Evaluates a composite expression.
    ///
    /// Connections with top-level tags query the tagged `measurements`
    /// endpoint, others the legacy `metrics` endpoint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` without a `start_time`, or any error from
    /// the request.
    pub fn get_composite(&mut self, compose: &str, query: MeasurementQuery) -> Result<Value> {
        let params = query.composite_params(compose)?;
        let path = if self.default_tags().is_empty() {
            "metrics"
        } else {
            "measurements"
        };
        self.execute_value(path, Method::Get, &params)
    }

    /// Creates or replaces a composite metric.
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn create_composite(&mut self, name: &str, compose: &str, props: Params) -> Result<()> {
        let mut params = props;
        params.insert("composite".to_string(), Value::from(compose));
        params.insert("type".to_string(), Value::from("composite"));
        self.update_metric(name, params)
    }

    /// Creates a metric of the given type (`gauge` unless told otherwise).
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn create_metric(&mut self, name: &str, metric_type: &str, props: Params) -> Result<()> {
        let mut base = Params::new();
        base.insert("name".to_string(), Value::from(name));
        base.insert("type".to_string(), Value::from(metric_type));
        self.update_metric(name, merge(props, base))
    }

    /// Updates metric properties.
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn update_metric(&mut self, name: &str, props: Params) -> Result<()> {
        let path = format!("metrics/{}", self.sanitize(name));
        self.execute(&path, Method::Put, &props)?;
        Ok(())
    }

    /// Deletes one metric.
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn delete_metric(&mut self, name: &str) -> Result<()> {
        let path = format!("metrics/{}", self.sanitize(name));
        self.execute(&path, Method::Delete, &Params::new())?;
        Ok(())
    }

    /// Deletes several metrics in one request.
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn delete_metrics<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<Value> = names
            .into_iter()
            .map(|name| Value::from(self.sanitize(name.as_ref())))
            .collect();
        let mut params = Params::new();
        params.insert("names".to_string(), Value::Array(names));
        self.execute("metrics", Method::Delete, &params)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metric_decodes_by_type() {
        let gauge: Metric = serde_json::from_value(json!({
            "name": "3333",
            "display_name": "test name",
            "type": "gauge",
            "attributes": {"created_by_ua": "fake"},
            "description": "a description",
            "period": 60,
            "source_lag": 60
        }))
        .unwrap();
        assert_eq!(gauge.kind(), "gauge");
        assert_eq!(gauge.name(), "3333");
        assert_eq!(gauge.info().period, Some(60));
        assert_eq!(gauge.info().description.as_deref(), Some("a description"));

        let composite: Metric = serde_json::from_value(json!({
            "name": "cpu.total",
            "type": "composite",
            "composite": "s(\"cpu\", \"*\")"
        }))
        .unwrap();
        assert!(matches!(composite, Metric::Composite(_)));
        assert!(composite.info().attributes.is_empty());
    }

    #[test]
    fn test_unknown_metric_type_falls_back() {
        let metric: Metric =
            serde_json::from_value(json!({"name": "x", "type": "counter", "period": 60})).unwrap();
        assert_eq!(metric.kind(), "counter");
        assert_eq!(metric.name(), "x");
        assert_eq!(metric.info().period, Some(60));

        let untyped: Metric = serde_json::from_value(json!({"name": "y"})).unwrap();
        assert_eq!(untyped.kind(), "");
    }

    #[test]
    fn test_metric_serializes_with_type() {
        let gauge = Metric::Gauge(serde_json::from_value(json!({"name": "cpu"})).unwrap());
        assert_eq!(
            serde_json::to_value(&gauge).unwrap(),
            json!({"name": "cpu", "type": "gauge", "attributes": {}})
        );
    }

    #[test]
    fn test_metric_without_name_fails() {
        let result: std::result::Result<Metric, _> =
            serde_json::from_value(json!({"type": "gauge"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_measurement_query_requires_range() {
        assert!(MeasurementQuery::default().measurement_params().is_err());
        assert!(MeasurementQuery::since(10).until(20).measurement_params().is_ok());
        let mut conflicting = MeasurementQuery::since(10).until(20);
        conflicting.duration = Some(10);
        assert!(conflicting.measurement_params().is_err());
    }

    #[test]
    fn test_measurement_query_params() {
        let mut tags = TagSet::new();
        tags.insert("hostname".to_string(), "web-1".to_string());
        let params = MeasurementQuery::last(60)
            .with_tags(tags)
            .measurement_params()
            .unwrap();

        assert_eq!(params["duration"], 60);
        assert_eq!(params["resolution"], 1);
        assert_eq!(params["tags[hostname]"], "web-1");
        assert!(!params.contains_key("tags"));
    }

    #[test]
    fn test_composite_query_requires_start_time() {
        assert!(MeasurementQuery::last(60).composite_params("s(\"a\")").is_err());
        let params = MeasurementQuery::since(100)
            .with_resolution(60)
            .composite_params("s(\"a\")")
            .unwrap();
        assert_eq!(params["compose"], "s(\"a\")");
        assert_eq!(params["resolution"], 60);
    }
}
