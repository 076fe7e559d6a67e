//! Annotation streams and events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::connection::{Connection, merge, to_params};
use crate::error::Result;
use crate::pagination::Paginated;
use crate::request::Params;
use crate::transport::Method;

/// A named stream of timestamped events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationStream {
    /// Stream name.
    pub name: String,
    /// Human-friendly name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Events keyed by source, present when fetched with a time range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Value>,
    /// Query metadata returned with the events.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub query: Map<String, Value>,
}

impl AnnotationStream {
    /// A stream with no events.
    pub fn new(name: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            display_name,
            events: None,
            query: Map::new(),
        }
    }

    /// The body sent when updating stream metadata.
    pub fn payload(&self) -> Params {
        let mut params = Params::new();
        params.insert("name".to_string(), Value::from(self.name.clone()));
        params.insert(
            "display_name".to_string(),
            self.display_name.clone().map_or(Value::Null, Value::from),
        );
        params
    }
}

/// A single annotation event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationEvent {
    /// Server-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Event title.
    pub title: String,
    /// Event description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Source the event came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Start, epoch seconds. The server uses receipt time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    /// End, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Other fields (`links`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnnotationEvent {
    /// An event with just a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

impl Connection {
    /// Walks every annotation stream.
    pub fn list_annotation_streams(&mut self, params: Params) -> Paginated<'_, AnnotationStream> {
        self.paginate("annotations", params)
    }

    /// Fetches a stream; pass `start_time` in `params` to include events.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn get_annotation_stream(&mut self, name: &str, params: Params) -> Result<AnnotationStream> {
        self.fetch(&format!("annotations/{name}"), Method::Get, &params)
    }

    /// Fetches one event of a stream by id.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn get_annotation(&mut self, name: &str, id: u64, params: Params) -> Result<AnnotationEvent> {
        self.fetch(&format!("annotations/{name}/{id}"), Method::Get, &params)
    }

    /// Updates stream metadata. `props` override the default payload.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn update_annotation_stream(
        &mut self,
        name: &str,
        props: Params,
    ) -> Result<AnnotationStream> {
        let payload = merge(AnnotationStream::new(name, None).payload(), props);
        self.fetch(&format!("annotations/{name}"), Method::Put, &payload)
    }

    /// Posts an event; the stream is created if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns any error from the request or decoding.
    pub fn post_annotation(&mut self, name: &str, event: &AnnotationEvent) -> Result<AnnotationEvent> {
        let params = to_params(event)?;
        self.fetch(&format!("annotations/{name}"), Method::Post, &params)
    }

    /// Deletes a stream and its events.
    ///
    /// # Errors
    ///
    /// Returns any error from the request.
    pub fn delete_annotation_stream(&mut self, name: &str) -> Result<()> {
        self.execute(&format!("annotations/{name}"), Method::Delete, &Params::new())?;
        Ok(())
    }
}
