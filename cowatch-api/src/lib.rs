// CoWatch API Library
//
// HTTP and WebSocket transport for watch sessions

pub mod http;

pub use http::{create_router, AppState};
