//! Shared fixtures: a scripted in-memory transport and a recording sleeper.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use appoptics::error::TransportError;
use appoptics::{Connection, ConnectionConfig, HttpRequest, HttpResponse, Sleeper, Transport};
use serde_json::Value;

type Reply = Result<HttpResponse, TransportError>;

#[derive(Default)]
struct State {
    replies: VecDeque<Reply>,
    requests: Vec<HttpRequest>,
    reconnects: usize,
}

/// Replays queued replies in order and records every request it sees.
/// Once the queue is empty it answers `200 {}`.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Reply) -> &Self {
        self.state.borrow_mut().replies.push_back(reply);
        self
    }

    pub fn push_json(&self, status: u16, body: &Value) -> &Self {
        self.push(Ok(HttpResponse::new(status, body.to_string())
            .with_header("Content-Type", "application/json")))
    }

    pub fn push_empty(&self, status: u16) -> &Self {
        self.push(Ok(HttpResponse::new(status, "")))
    }

    pub fn push_reset(&self) -> &Self {
        self.push(Err(TransportError::ConnectionReset {
            reason: "connection reset by peer".to_string(),
        }))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.borrow().requests.clone()
    }

    pub fn uris(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.uri).collect()
    }

    /// The JSON body of the `n`th request.
    pub fn body(&self, n: usize) -> Value {
        let requests = self.requests();
        let body = requests[n].body.as_deref().expect("request has no body");
        serde_json::from_str(body).expect("request body is not JSON")
    }

    pub fn reconnects(&self) -> usize {
        self.state.borrow().reconnects
    }
}

impl Transport for MockTransport {
    fn send(&mut self, request: &HttpRequest) -> Reply {
        let mut state = self.state.borrow_mut();
        state.requests.push(request.clone());
        state
            .replies
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::new(200, "{}")))
    }

    fn reconnect(&mut self) {
        self.state.borrow_mut().reconnects += 1;
    }
}

/// Records requested delays instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    delays: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, delay: Duration) {
        self.delays.borrow_mut().push(delay);
    }
}

/// A connection wired to fresh test doubles.
pub fn connect(config: ConnectionConfig) -> (Connection, MockTransport, RecordingSleeper) {
    let transport = MockTransport::new();
    let sleeper = RecordingSleeper::default();
    let conn = Connection::with_transport(config, transport.clone())
        .unwrap()
        .with_sleeper(sleeper.clone());
    (conn, transport, sleeper)
}

/// A list response envelope.
pub fn page(resource: &str, items: Vec<Value>, offset: u64, total: u64) -> Value {
    let mut envelope = serde_json::Map::new();
    envelope.insert(
        "query".to_string(),
        serde_json::json!({"offset": offset, "length": items.len(), "total": total, "found": total}),
    );
    envelope.insert(resource.to_string(), Value::Array(items));
    Value::Object(envelope)
}
