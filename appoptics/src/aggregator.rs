//! Client-side gauge aggregation.
//!
//! An [`Aggregator`] folds repeated observations of the same metric into one
//! `{count, sum, min, max}` summary, so a flush window produces a single
//! record per metric instead of one per observation. Untagged ("legacy")
//! and tagged metrics are kept in separate buckets because they are
//! submitted in different envelopes:
//!
//! ```text
//! untagged: {"measurements": [{name, count, sum, min, max}], "source"?, "time"?}
//! tagged:   {"measurements": [{name, count, sum, min, max}], "tags"?,   "time"?}
//! ```
//!
//! # Time handling
//!
//! With a period set, the submitted time is floored to the start of its
//! period (`t - t % period`), where `t` is the explicit time if one was set
//! and the wall clock otherwise. Without a period an explicit time passes
//! through unchanged; with neither, no time is sent and the server stamps
//! the measurements on receipt.
//!
//! # Example
//!
//! ```rust,no_run
//! use appoptics::{Aggregator, Connection, ConnectionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut conn = Connection::new(ConnectionConfig::from_env())?;
//! let mut agg = Aggregator::new().with_source("web-1").with_period(60);
//!
//! agg.add("request.latency", 12.5);
//! agg.add("request.latency", 40.0);
//! agg.submit(&mut conn)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::connection::{Connection, to_params};
use crate::error::Result;
use crate::measurement::TagSet;
use crate::transport::Method;

/// Running statistics for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Smallest observation.
    pub min: f64,
    /// Largest observation.
    pub max: f64,
}

impl Summary {
    fn new(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    /// Arithmetic mean of the observations.
    #[allow(clippy::cast_precision_loss)] // counts stay far below 2^52
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    name: &'a str,
    #[serde(flatten)]
    summary: Summary,
}

/// Accumulates observations and flushes them as batched submissions.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    source: Option<String>,
    tags: TagSet,
    measurements: BTreeMap<String, Summary>,
    tagged_measurements: BTreeMap<String, Summary>,
    period: Option<u64>,
    measure_time: Option<i64>,
}

impl Aggregator {
    /// Creates an empty aggregator with no source, tags, period or time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source reported with untagged metrics.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the top-level tags reported with tagged metrics.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Floors submitted times to multiples of `period` seconds. Zero disables
    /// flooring.
    #[must_use]
    pub fn with_period(mut self, period: u64) -> Self {
        self.period = (period > 0).then_some(period);
        self
    }

    /// Sets an explicit measurement time, epoch seconds.
    #[must_use]
    pub fn at(mut self, time: i64) -> Self {
        self.measure_time = Some(time);
        self
    }

    /// The flooring period in seconds.
    pub fn period(&self) -> Option<u64> {
        self.period
    }

    /// A copy of the top-level tag set.
    pub fn tags(&self) -> TagSet {
        self.tags.clone()
    }

    /// Replaces the top-level tag set.
    pub fn set_tags(&mut self, tags: TagSet) {
        self.tags = tags;
    }

    /// Adds to the top-level tag set.
    pub fn add_tags(&mut self, tags: TagSet) {
        self.tags.extend(tags);
    }

    /// Records an observation of an untagged metric.
    pub fn add(&mut self, name: &str, value: f64) {
        fold(&mut self.measurements, name, value);
    }

    /// Records an observation of a tagged metric.
    pub fn add_tagged(&mut self, name: &str, value: f64) {
        fold(&mut self.tagged_measurements, name, value);
    }

    /// Summaries of untagged metrics, by name.
    pub fn measurements(&self) -> &BTreeMap<String, Summary> {
        &self.measurements
    }

    /// Summaries of tagged metrics, by name.
    pub fn tagged_measurements(&self) -> &BTreeMap<String, Summary> {
        &self.tagged_measurements
    }

    /// Whether both buckets are empty.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty() && self.tagged_measurements.is_empty()
    }

    /// The time that will be submitted, floored if a period is set.
    pub fn floor_measure_time(&self) -> Option<i64> {
        self.floor_measure_time_at(now_epoch_secs())
    }

    fn floor_measure_time_at(&self, now: i64) -> Option<i64> {
        match self.period {
            Some(period) => {
                let t = self.measure_time.unwrap_or(now);
                let period = i64::try_from(period).unwrap_or(i64::MAX);
                Some(t - t.rem_euclid(period))
            }
            None => self.measure_time,
        }
    }

    /// Returns the time that will be submitted and pins it, so every
    /// submission until the next `clear` uses the same value.
    pub fn measure_time(&mut self) -> Option<i64> {
        if let Some(floored) = self.floor_measure_time() {
            self.measure_time = Some(floored);
        }
        self.measure_time
    }

    /// The untagged submission body.
    pub fn to_payload(&self) -> Value {
        let mut payload = envelope(&self.measurements);
        if let Some(source) = &self.source {
            payload.insert("source".to_string(), Value::from(source.clone()));
        }
        if let Some(time) = self.floor_measure_time() {
            payload.insert("time".to_string(), Value::from(time));
        }
        Value::Object(payload)
    }

    /// The tagged submission body.
    pub fn to_md_payload(&self) -> Value {
        let mut payload = envelope(&self.tagged_measurements);
        if !self.tags.is_empty() {
            let tags = self
                .tags
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                .collect();
            payload.insert("tags".to_string(), Value::Object(tags));
        }
        if let Some(time) = self.floor_measure_time() {
            payload.insert("time".to_string(), Value::from(time));
        }
        Value::Object(payload)
    }

    /// Empties both buckets and forgets any explicit time.
    pub fn clear(&mut self) {
        self.measurements.clear();
        self.tagged_measurements.clear();
        self.measure_time = None;
    }

    /// Posts each non-empty bucket to `measurements`, then clears.
    ///
    /// An empty aggregator sends nothing. If the tagged post fails after the
    /// untagged one succeeded, only the tagged bucket (and the time) is kept.
    ///
    /// # Errors
    ///
    /// Propagates any error from the connection; buckets that were not
    /// delivered are left intact.
    pub fn submit(&mut self, conn: &mut Connection) -> Result<()> {
        if !self.measurements.is_empty() {
            debug!(metrics = self.measurements.len(), "submitting untagged summaries");
            let params = to_params(&self.to_payload())?;
            conn.execute("measurements", Method::Post, &params)?;
            self.measurements.clear();
        }
        if !self.tagged_measurements.is_empty() {
            debug!(metrics = self.tagged_measurements.len(), "submitting tagged summaries");
            let params = to_params(&self.to_md_payload())?;
            conn.execute("measurements", Method::Post, &params)?;
        }
        self.clear();
        Ok(())
    }
}

fn fold(bucket: &mut BTreeMap<String, Summary>, name: &str, value: f64) {
    match bucket.get_mut(name) {
        Some(summary) => summary.add(value),
        None => {
            bucket.insert(name.to_string(), Summary::new(value));
        }
    }
}

fn envelope(bucket: &BTreeMap<String, Summary>) -> Map<String, Value> {
    let records: Vec<Value> = bucket
        .iter()
        .filter_map(|(name, summary)| {
            serde_json::to_value(SummaryRecord {
                name,
                summary: *summary,
            })
            .ok()
        })
        .collect();
    let mut payload = Map::new();
    payload.insert("measurements".to_string(), Value::Array(records));
    payload
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_add_accumulates() {
        let mut agg = Aggregator::new();
        agg.add("foo", 42.0);
        agg.add("foo", 5.0);
        agg.add("foo", 100.0);

        let summary = agg.measurements()["foo"];
        assert_eq!(summary.count, 3);
        assert_eq!(summary.sum, 147.0);
        assert_eq!(summary.min, 5.0);
        assert_eq!(summary.max, 100.0);
        assert!(agg.tagged_measurements().is_empty());
    }

    #[test]
    fn test_buckets_are_independent() {
        let mut agg = Aggregator::new();
        agg.add("foo", 1.0);
        agg.add_tagged("foo", 2.0);

        assert_eq!(agg.measurements()["foo"].sum, 1.0);
        assert_eq!(agg.tagged_measurements()["foo"].sum, 2.0);
    }

    #[test]
    fn test_to_payload() {
        let mut agg = Aggregator::new().with_source("mysource");
        agg.add("foo", 42.0);
        agg.add("bar", 1.0);

        assert_eq!(
            agg.to_payload(),
            json!({
                "measurements": [
                    {"name": "bar", "count": 1, "sum": 1.0, "min": 1.0, "max": 1.0},
                    {"name": "foo", "count": 1, "sum": 42.0, "min": 42.0, "max": 42.0}
                ],
                "source": "mysource"
            })
        );
    }

    #[test]
    fn test_to_md_payload_carries_tags() {
        let mut tags = TagSet::new();
        tags.insert("hostname".to_string(), "web-1".to_string());
        let mut agg = Aggregator::new().with_tags(tags).at(1_418_838_418);
        agg.add_tagged("foo", 42.0);

        assert_eq!(
            agg.to_md_payload(),
            json!({
                "measurements": [
                    {"name": "foo", "count": 1, "sum": 42.0, "min": 42.0, "max": 42.0}
                ],
                "tags": {"hostname": "web-1"},
                "time": 1_418_838_418
            })
        );
    }

    #[test]
    fn test_no_time_without_period_or_explicit_time() {
        let mut agg = Aggregator::new();
        agg.add("foo", 1.0);
        assert_eq!(agg.floor_measure_time(), None);
        assert!(agg.to_payload().get("time").is_none());
    }

    #[test]
    fn test_explicit_time_without_period_is_not_floored() {
        let agg = Aggregator::new().at(1_418_838_418);
        assert_eq!(agg.floor_measure_time(), Some(1_418_838_418));
    }

    #[test]
    fn test_explicit_time_with_period_is_floored() {
        let agg = Aggregator::new().with_period(60).at(1_418_838_418);
        assert_eq!(agg.floor_measure_time(), Some(1_418_838_400));
    }

    #[test]
    fn test_wall_clock_is_floored() {
        let agg = Aggregator::new().with_period(60);
        assert_eq!(agg.floor_measure_time_at(1_418_838_459), Some(1_418_838_420));
        let t = agg.floor_measure_time().unwrap();
        assert_eq!(t % 60, 0);
    }

    #[test]
    fn test_measure_time_is_pinned_until_clear() {
        let mut agg = Aggregator::new().with_period(10).at(1_005);
        assert_eq!(agg.measure_time(), Some(1_000));
        assert_eq!(agg.measure_time(), Some(1_000));
        agg.clear();
        assert!(agg.measure_time().is_some_and(|t| t % 10 == 0));
    }

    #[test]
    fn test_clear_twice_is_idempotent() {
        let mut agg = Aggregator::new().with_source("s").at(5);
        agg.add("foo", 1.0);
        agg.add_tagged("bar", 2.0);

        agg.clear();
        agg.clear();

        assert!(agg.is_empty());
        assert_eq!(agg.floor_measure_time(), None);
        assert_eq!(agg.to_payload(), json!({"measurements": [], "source": "s"}));
    }

    #[test]
    fn test_zero_period_disables_flooring() {
        let agg = Aggregator::new().with_period(0).at(1_005);
        assert_eq!(agg.period(), None);
        assert_eq!(agg.floor_measure_time(), Some(1_005));
    }

    proptest! {
        #[test]
        fn prop_summary_matches_inputs(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..50)) {
            let mut agg = Aggregator::new();
            for v in &values {
                agg.add("m", *v);
            }
            let s = agg.measurements()["m"];
            let expected_min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let expected_max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            prop_assert_eq!(s.count, values.len() as u64);
            prop_assert!((s.sum - values.iter().sum::<f64>()).abs() < 1e-6);
            prop_assert_eq!(s.min, expected_min);
            prop_assert_eq!(s.max, expected_max);
            prop_assert!(s.min <= s.mean() + 1e-6 && s.mean() <= s.max + 1e-6);
        }

        #[test]
        fn prop_floor_is_period_aligned(t in 0i64..4_000_000_000, period in 1u64..86_400) {
            let floored = Aggregator::new().with_period(period).at(t).floor_measure_time().unwrap();
            let p = period as i64;
            prop_assert_eq!(floored % p, 0);
            prop_assert!(floored <= t && t < floored + p);
        }
    }
}
