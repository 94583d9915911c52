use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid for entity IDs
#[must_use]
pub fn generate_id() -> String {
    nanoid!(12)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(generate_id())
            }

            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Watch session ID; also names the session working directory
    SessionId
);

string_id!(
    /// Connection-scoped client ID, unique within its session
    ClientId
);

string_id!(
    /// Caller identity resolved by the transport layer
    UserId
);

impl SessionId {
    /// Session ids become directory names, so only URL-safe characters pass.
    #[must_use]
    pub fn is_valid(id: &str) -> bool {
        !id.is_empty()
            && id.len() <= 64
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_eq!(a.as_str().len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = SessionId::from("room-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"room-1\"");
    }

    #[test]
    fn test_session_id_validation() {
        assert!(SessionId::is_valid("abc_DEF-123"));
        assert!(!SessionId::is_valid(""));
        assert!(!SessionId::is_valid("../etc"));
        assert!(!SessionId::is_valid("a/b"));
        assert!(SessionId::is_valid(SessionId::new().as_str()));
    }
}
