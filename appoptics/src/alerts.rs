//! Alerts and notification services.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::connection::{Connection, decode, merge};
use crate::error::{AppOpticsError, Result};
use crate::pagination::Paginated;
use crate::request::Params;
use crate::transport::Method;

const DEFAULT_REARM_SECONDS: u64 = 600;

fn default_active() -> bool {
    true
}

fn default_rearm_seconds() -> u64 {
    DEFAULT_REARM_SECONDS
}

/// A threshold condition on a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    /// `above`, `below` or `absent`.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Metric the condition watches.
    pub metric_name: String,
    /// Threshold for `above` / `below`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Summary function applied before comparison (`average`, `max`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_function: Option<String>,
    /// Seconds the condition must hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Other condition fields (`tags`, `detect_reset`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AlertCondition {
    /// A condition of `condition_type` on `metric_name`.
    pub fn new(condition_type: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.into(),
            metric_name: metric_name.into(),
            threshold: None,
            summary_function: None,
            duration: None,
            extra: Map::new(),
        }
    }

    /// Fires when the metric goes above `threshold`.
    pub fn above(metric_name: impl Into<String>, threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
            ..Self::new("above", metric_name)
        }
    }

    /// Fires when the metric goes below `threshold`.
    pub fn below(metric_name: impl Into<String>, threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
            ..Self::new("below", metric_name)
        }
    }

    /// Fires when the metric stops reporting for `duration` seconds.
    pub fn absent(metric_name: impl Into<String>, duration: u64) -> Self {
        Self {
            duration: Some(duration),
            ..Self::new("absent", metric_name)
        }
    }
}

/// An alert definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Server-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Unique alert name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Conditions, all of which must hold.
    #[serde(default)]
    pub conditions: Vec<AlertCondition>,
    /// Services to notify: ids when sent, full objects when fetched.
    #[serde(default)]
    pub services: Vec<Value>,
    /// Free-form attributes (`runbook_url`, ...).
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Whether the alert is enabled.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Minimum seconds between notifications.
    #[serde(default = "default_rearm_seconds")]
    pub rearm_seconds: u64,
}

impl Alert {
    /// An active alert with no conditions or services.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            conditions: Vec::new(),
            services: Vec::new(),
            attributes: Map::new(),
            active: true,
            rearm_seconds: DEFAULT_REARM_SECONDS,
        }
    }

    /// Adds a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: AlertCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Adds a service to notify, by id.
    #[must_use]
    pub fn with_service(mut self, service_id: u64) -> Self {
        self.services.push(Value::from(service_id));
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Ids of the attached services, whether stored as ids or objects.
    pub fn service_ids(&self) -> Vec<u64> {
        self.services
            .iter()
            .filter_map(|service| match service {
                Value::Object(obj) => obj.get("id").and_then(Value::as_u64),
                other => other.as_u64(),
            })
            .collect()
    }

    /// The body sent when creating or updating the alert.
    pub fn payload(&self) -> Params {
        let mut params = Params::new();
        params.insert("name".to_string(), Value::from(self.name.clone()));
        if let Some(description) = &self.description {
            params.insert("description".to_string(), Value::from(description.clone()));
        }
        params.insert(
            "conditions".to_string(),
            serde_json::to_value(&self.conditions).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        params.insert(
            "services".to_string(),
            Value::Array(self.service_ids().into_iter().map(Value::from).collect()),
        );
        params.insert(
            "attributes".to_string(),
            Value::Object(self.attributes.clone()),
        );
        params.insert("active".to_string(), Value::from(self.active));
        params.insert("rearm_seconds".to_string(), Value::from(self.rearm_seconds));
        params
    }
}

/// A notification target (email, Slack, PagerDuty, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Server-assigned id.
    pub id: u64,
    /// Integration type, e.g. `mail`.
    #[serde(rename = "type")]
    pub service_type: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Integration settings.
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl Connection {
    /// Creates an alert. `props` override fields of the generated payload.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn create_alert(&mut self, alert: &Alert, props: Params) -> Result<Alert> {
        let payload = merge(alert.payload(), props);
        self.fetch("alerts", Method::Post, &payload)
    }

    /// Updates an existing alert. `props` override fields of its payload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the alert has no id, or any error from
    /// the request.
    pub fn update_alert(&mut self, alert: &Alert, props: Params) -> Result<()> {
        let id = alert.id.ok_or_else(|| {
            AppOpticsError::invalid(format!("alert '{}' has no id", alert.name))
        })?;
        let payload = merge(alert.payload(), props);
        self.execute(&format!("alerts/{id}"), Method::Put, &payload)?;
        Ok(())
    }

    /// Deletes an alert by name. Returns `false` if no alert has that name.
    ///
    /// # Errors
    ///
    /// Returns any error from the lookup or the delete request.
    pub fn delete_alert(&mut self, name: &str) -> Result<bool> {
        let Some(id) = self.get_alert(name)?.and_then(|alert| alert.id) else {
            return Ok(false);
        };
        self.execute(&format!("alerts/{id}"), Method::Delete, &Params::new())?;
        Ok(true)
    }

    /// Looks an alert up by name.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn get_alert(&mut self, name: &str) -> Result<Option<Alert>> {
        let mut params = Params::new();
        params.insert("name".to_string(), Value::from(name));
        let mut envelope = self.execute_value("alerts", Method::Get, &params)?;
        let alerts: Vec<Alert> = match envelope.get_mut("alerts").map(Value::take) {
            Some(items) => decode(items)?,
            None => Vec::new(),
        };
        Ok(alerts.into_iter().next())
    }

    /// Walks every alert.
    pub fn list_alerts(&mut self, params: Params) -> Paginated<'_, Alert> {
        self.paginate("alerts", params)
    }

    /// Walks every notification service.
    pub fn list_services(&mut self, params: Params) -> Paginated<'_, Service> {
        self.paginate("services", params)
    }
}
