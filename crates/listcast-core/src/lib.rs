//! listcast-core: Session loop and shared types for listcast
//!
//! This crate provides the wire collection type, update-period parsing, the
//! capability traits a session consumes, and the per-connection session loop
//! that turns a listable, change-notifying resource list into a live,
//! deduplicated, rate-limited stream.

pub mod feed;
pub mod period;
pub mod protocol;
pub mod session;
pub mod transport;

pub use feed::{ChangeEvents, ListSource, Snapshot, SourceError, Watcher};
pub use period::{PeriodError, update_period};
pub use protocol::{Collection, KEEPALIVE_INTERVAL, MAX_UPDATE_PERIOD, WRITE_TIMEOUT};
pub use session::{Sent, Session, SessionConfig, SessionIds, StreamError};
pub use transport::{FrameSink, FrameSource, Inbound, TransportError};
