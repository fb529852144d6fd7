pub mod controller;
pub mod event;
pub mod history;
pub mod sink;
pub mod source;
pub mod state;

pub use controller::{SessionController, SessionError, SessionOutcome};
pub use event::StreamEvent;
pub use history::HistoryCache;
pub use sink::{SessionSink, SinkError};
pub use source::{DebateStream, EventStream, StreamError};
pub use state::{ConnectionPhase, SearchStatus, SessionState};
