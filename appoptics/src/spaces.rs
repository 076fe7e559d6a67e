//! Spaces (dashboards) and the charts inside them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::connection::{Connection, decode, merge, to_params};
use crate::error::{AppOpticsError, Result};
use crate::pagination::Paginated;
use crate::request::Params;
use crate::transport::Method;

/// A space. `charts` holds chart stubs (usually just ids) as returned by
/// the server; use [`Connection::list_charts_in_space`] for full charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    /// Server-assigned id.
    pub id: u64,
    /// Space name.
    pub name: String,
    /// Chart stubs.
    #[serde(default)]
    pub charts: Vec<Value>,
}

impl Space {
    /// The body sent when updating the space.
    pub fn payload(&self) -> Params {
        let mut params = Params::new();
        params.insert("name".to_string(), Value::from(self.name.clone()));
        params
    }

    /// Ids of the charts in this space.
    pub fn chart_ids(&self) -> Vec<u64> {
        self.charts
            .iter()
            .filter_map(|chart| chart.get("id").and_then(Value::as_u64))
            .collect()
    }
}

/// A chart. `space_id` is filled in locally and never sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    /// Server-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Chart name.
    pub name: String,
    /// `line`, `stacked` or `bignumber`.
    #[serde(rename = "type", default = "default_chart_type")]
    pub chart_type: String,
    /// Metric streams plotted by the chart.
    #[serde(default)]
    pub streams: Vec<Value>,
    /// Space this chart belongs to.
    #[serde(skip)]
    pub space_id: Option<u64>,
    /// Other chart fields (`min`, `max`, `label`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_chart_type() -> String {
    "line".to_string()
}

impl Chart {
    /// A line chart with no streams.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            chart_type: default_chart_type(),
            streams: Vec::new(),
            space_id: None,
            extra: Map::new(),
        }
    }

    /// Sets the chart type.
    #[must_use]
    pub fn with_type(mut self, chart_type: impl Into<String>) -> Self {
        self.chart_type = chart_type.into();
        self
    }

    /// Adds a stream, e.g. `{"metric": "cpu", "tags": [...]}`.
    #[must_use]
    pub fn with_stream(mut self, stream: Value) -> Self {
        self.streams.push(stream);
        self
    }

    fn payload(&self) -> Result<Params> {
        to_params(self)
    }
}

fn require_chart_id(chart: &Chart) -> Result<u64> {
    chart
        .id
        .ok_or_else(|| AppOpticsError::invalid(format!("chart '{}' has no id", chart.name)))
}

fn require_space_id(chart: &Chart) -> Result<u64> {
    chart.space_id.ok_or_else(|| {
        AppOpticsError::invalid(format!("chart '{}' is not attached to a space", chart.name))
    })
}

impl Connection {
    /// Walks every space.
    pub fn list_spaces(&mut self, params: Params) -> Paginated<'_, Space> {
        self.paginate("spaces", params)
    }

    /// Fetches a space by id, with its chart stubs.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn get_space(&mut self, id: u64) -> Result<Space> {
        self.fetch(&format!("spaces/{id}"), Method::Get, &Params::new())
    }

    /// Finds a space by name, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns any error from listing or fetching the space.
    pub fn find_space(&mut self, name: &str) -> Result<Option<Space>> {
        let mut params = Params::new();
        params.insert("name".to_string(), Value::from(name));
        let wanted = name.to_lowercase();

        let mut found = None;
        for space in self.list_spaces(params) {
            let space = space?;
            if space.name.to_lowercase() == wanted {
                found = Some(space.id);
                break;
            }
        }

        match found {
            Some(id) => {
                debug!(name, id, "found space");
                self.get_space(id).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Creates a space.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn create_space(&mut self, name: &str, props: Params) -> Result<Space> {
        let mut payload = Params::new();
        payload.insert("name".to_string(), Value::from(name));
        self.fetch("spaces", Method::Post, &merge(payload, props))
    }

    /// Updates a space. `props` override fields of its payload (`name`).
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn update_space(&mut self, space: &Space, props: Params) -> Result<()> {
        let payload = merge(space.payload(), props);
        self.execute(&format!("spaces/{}", space.id), Method::Put, &payload)?;
        Ok(())
    }

    /// Deletes a space.
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn delete_space(&mut self, id: u64) -> Result<()> {
        self.execute(&format!("spaces/{id}"), Method::Delete, &Params::new())?;
        Ok(())
    }

    /// Fetches every chart in a space.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedResponse` if the response is not an array, or any
    /// error from the request or decoding.
    pub fn list_charts_in_space(&mut self, space_id: u64) -> Result<Vec<Chart>> {
        let value = self.execute_value(
            &format!("spaces/{space_id}/charts"),
            Method::Get,
            &Params::new(),
        )?;
        let items = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            _ => {
                return Err(AppOpticsError::unexpected(format!(
                    "charts of space {space_id} are not an array"
                )));
            }
        };
        items
            .into_iter()
            .map(|item| {
                let mut chart: Chart = decode(item)?;
                chart.space_id = Some(space_id);
                Ok(chart)
            })
            .collect()
    }

    /// Fetches a chart.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn get_chart(&mut self, chart_id: u64, space_id: u64) -> Result<Chart> {
        let mut chart: Chart = self.fetch(
            &format!("spaces/{space_id}/charts/{chart_id}"),
            Method::Get,
            &Params::new(),
        )?;
        chart.space_id = Some(space_id);
        Ok(chart)
    }

    /// Finds a chart in a space by name, ignoring case, and fetches it in
    /// full.
    ///
    /// # Errors
    ///
    /// Returns any error from listing or fetching the charts.
    pub fn find_chart(&mut self, name: &str, space_id: u64) -> Result<Option<Chart>> {
        let wanted = name.to_lowercase();
        let found = self
            .list_charts_in_space(space_id)?
            .into_iter()
            .find(|chart| chart.name.to_lowercase() == wanted)
            .and_then(|chart| chart.id);

        match found {
            Some(chart_id) => {
                debug!(name, chart_id, space_id, "found chart");
                self.get_chart(chart_id, space_id).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Creates a chart in a space.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn create_chart(&mut self, space_id: u64, chart: &Chart) -> Result<Chart> {
        let payload = chart.payload()?;
        let mut created: Chart = self.fetch(
            &format!("spaces/{space_id}/charts"),
            Method::Post,
            &payload,
        )?;
        created.space_id = Some(space_id);
        Ok(created)
    }

    /// Updates a chart. `props` override fields of its payload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the chart lacks an id or space, or any
    /// error from the request.
    pub fn update_chart(&mut self, chart: &Chart, props: Params) -> Result<()> {
        let chart_id = require_chart_id(chart)?;
        let space_id = require_space_id(chart)?;
        let payload = merge(chart.payload()?, props);
        self.execute(
            &format!("spaces/{space_id}/charts/{chart_id}"),
            Method::Put,
            &payload,
        )?;
        Ok(())
    }

    /// Deletes a chart.
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn delete_chart(&mut self, chart_id: u64, space_id: u64) -> Result<()> {
        self.execute(
            &format!("spaces/{space_id}/charts/{chart_id}"),
            Method::Delete,
            &Params::new(),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chart_payload_omits_space() {
        let mut chart = Chart::new("cpu")
            .with_type("stacked")
            .with_stream(json!({"metric": "cpu", "tags": [{"name": "host", "values": ["*"]}]}));
        chart.space_id = Some(4);
        let payload = chart.payload().unwrap();
        assert_eq!(payload["name"], "cpu");
        assert_eq!(payload["type"], "stacked");
        assert!(!payload.contains_key("space_id"));
        assert!(!payload.contains_key("id"));
    }

    #[test]
    fn test_chart_decode_keeps_extra() {
        let chart: Chart = serde_json::from_value(json!({
            "id": 1,
            "name": "latency",
            "type": "bignumber",
            "streams": [],
            "label": "ms"
        }))
        .unwrap();
        assert_eq!(chart.id, Some(1));
        assert_eq!(chart.chart_type, "bignumber");
        assert_eq!(chart.extra["label"], "ms");
        assert_eq!(chart.space_id, None);
    }

    #[test]
    fn test_space_chart_ids() {
        let space: Space = serde_json::from_value(json!({
            "id": 2,
            "name": "Ops",
            "charts": [{"id": 10}, {"id": 11}]
        }))
        .unwrap();
        assert_eq!(space.chart_ids(), vec![10, 11]);
    }

    #[test]
    fn test_space_payload_carries_name() {
        let space = Space {
            id: 2,
            name: "Ops".to_string(),
            charts: Vec::new(),
        };
        assert_eq!(Value::Object(space.payload()), json!({"name": "Ops"}));
    }

    #[test]
    fn test_update_requires_ids() {
        assert!(require_chart_id(&Chart::new("x")).is_err());
        assert!(require_space_id(&Chart::new("x")).is_err());
    }
}
