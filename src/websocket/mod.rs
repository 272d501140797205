//! Chat WebSocket transport: upgrade handling and per-connection sessions.

mod handler;
mod message;
mod session;

pub use handler::{chat_ws_handler, ChatWsQuery};
pub use message::InboundFrame;
pub use session::{ChatSession, SessionEnd};
