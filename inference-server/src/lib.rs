/// Reference inference service
///
/// Speaks the wake-word streaming protocol over WebSocket and scores audio
/// with the same feature pipeline the on-device engine uses.

pub mod config;
pub mod server;
pub mod session;

pub use config::{ServerConfig, ServerConfigError};
pub use server::{router, serve, Health};
pub use session::InferenceSession;
