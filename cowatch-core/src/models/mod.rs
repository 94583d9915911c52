pub mod id;

pub use id::{generate_id, ClientId, SessionId, UserId};
