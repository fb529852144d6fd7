pub mod api;
pub mod sink;
pub mod sse;
pub mod stream;

pub use api::{ApiError, DebateClient};
pub use sink::RemoteSessionSink;
