//! Execution seam
//!
//! Order intents produced by the trade lifecycle and the transport trait they
//! are handed to.

mod order;
mod sink;

pub use order::{BracketOrder, OrderIntent, OrderRole, OrderSide, OrderType};
pub use sink::{ChannelSink, OrderEvent, OrderSink, RecordingSink, SinkError};
