//! Redacted handling for the shared-secret configuration value.
//!
//! [`Secret`] keeps the configured HMAC secret out of logs, debug output,
//! and error messages. The bytes are preserved internally and exposed only
//! through [`expose`](Secret::expose).

use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Deserializer};

/// A byte secret that redacts its contents in Debug and Display output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    value: Vec<u8>,
}

impl Secret {
    /// Create a new `Secret` from any byte- or string-like value.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Expose the underlying secret bytes.
    ///
    /// Be careful not to log or display the returned value.
    pub fn expose(&self) -> &[u8] {
        &self.value
    }

    /// Returns true if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Display for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<&[u8]> for Secret {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let secret = Secret::from("hmac-signing-secret");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn expose_returns_bytes() {
        let secret = Secret::from("hmac-signing-secret");
        assert_eq!(secret.expose(), b"hmac-signing-secret");
    }

    #[test]
    fn struct_debug_does_not_leak() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct Config {
            name: String,
            secret: Secret,
        }

        let config = Config {
            name: "api".to_string(),
            secret: Secret::from("super-secret"),
        };
        let output = format!("{:?}", config);
        assert!(output.contains("[REDACTED]"));
        assert!(!output.contains("super-secret"));
    }

    #[test]
    fn deserializes_from_plain_string() {
        let secret: Secret = serde_json::from_str("\"value\"").unwrap();
        assert_eq!(secret.expose(), b"value");
    }
}
