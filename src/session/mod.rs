//! Live conversation session: protocol, transport, and lifecycle.

pub mod manager;
pub mod protocol;
pub mod transport;

pub use manager::{AudioEnvironment, CpalEnvironment, SessionManager, SessionStatus, UiEvent};
pub use protocol::{ClientMessage, ServerEvent};
pub use transport::{LiveConnector, LiveTransport, WsConnector};
