//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use huddle_common::mailbox::DEFAULT_MAILBOX_CAPACITY;
use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Signals kept per recipient before the oldest are dropped (default: 256)
    pub signal_mailbox_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let signal_mailbox_capacity = match env::var("SIGNAL_MAILBOX_CAPACITY") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("SIGNAL_MAILBOX_CAPACITY is not a number: {v}"))?,
            Err(_) => DEFAULT_MAILBOX_CAPACITY,
        };
        if signal_mailbox_capacity == 0 {
            anyhow::bail!("SIGNAL_MAILBOX_CAPACITY must be at least 1");
        }

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            signal_mailbox_capacity,
        })
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            signal_mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_for_test_uses_default_capacity() {
        let config = Config::default_for_test();
        assert_eq!(config.signal_mailbox_capacity, DEFAULT_MAILBOX_CAPACITY);
        assert!(config.bind_address.starts_with("127.0.0.1"));
    }
}
