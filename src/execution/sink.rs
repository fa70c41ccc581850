//! Order transport seam
//!
//! The engine never talks to a broker directly. It hands intents to an
//! [`OrderSink`] and moves on; fills come back later through
//! `Engine::on_position_changed`.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::order::OrderIntent;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("order channel closed")]
    Closed,
    #[error("transport rejected request: {0}")]
    Rejected(String),
}

/// Requests emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    Submit(OrderIntent),
    CancelAll { order_ids: Vec<Uuid> },
}

/// Fire-and-forget order transport
pub trait OrderSink {
    fn submit(&mut self, intent: &OrderIntent) -> Result<(), SinkError>;
    fn cancel_all(&mut self, order_ids: &[Uuid]) -> Result<(), SinkError>;
}

/// Keeps every request in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Vec<OrderEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[OrderEvent] {
        &self.events
    }

    /// Submitted intents, in order
    pub fn submitted(&self) -> Vec<&OrderIntent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                OrderEvent::Submit(intent) => Some(intent),
                OrderEvent::CancelAll { .. } => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl OrderSink for RecordingSink {
    fn submit(&mut self, intent: &OrderIntent) -> Result<(), SinkError> {
        self.events.push(OrderEvent::Submit(intent.clone()));
        Ok(())
    }

    fn cancel_all(&mut self, order_ids: &[Uuid]) -> Result<(), SinkError> {
        self.events.push(OrderEvent::CancelAll { order_ids: order_ids.to_vec() });
        Ok(())
    }
}

/// Forwards requests to an async consumer without blocking the bar loop
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OrderEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OrderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OrderSink for ChannelSink {
    fn submit(&mut self, intent: &OrderIntent) -> Result<(), SinkError> {
        self.tx
            .send(OrderEvent::Submit(intent.clone()))
            .map_err(|_| SinkError::Closed)
    }

    fn cancel_all(&mut self, order_ids: &[Uuid]) -> Result<(), SinkError> {
        self.tx
            .send(OrderEvent::CancelAll { order_ids: order_ids.to_vec() })
            .map_err(|_| SinkError::Closed)
    }
}
