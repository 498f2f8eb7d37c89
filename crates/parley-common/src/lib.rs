//! Types shared by every parley crate: the config error, ids, and the
//! server-to-client wire events.

pub mod errors;
pub mod events;
pub mod id;

pub use errors::ConfigError;
pub use events::{EventSender, FrameAck, StopReason, StreamEvent};
pub use id::{new_connection_id, new_correlation_id, new_id, ConnectionId};
