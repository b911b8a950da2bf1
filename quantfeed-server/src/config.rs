use quantfeed_data::{config::FeedConfig, error::ConfigError};
use std::net::SocketAddr;

/// Default [`ServerConfig::addr`].
pub const DEFAULT_WS_ADDR: &str = "0.0.0.0:9001";

#[derive(Clone, PartialEq, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub feed: FeedConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            feed: FeedConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Feed config from `QUANTFEED_*` variables, listen address from `WS_ADDR` and the
    /// event buffer from `WS_BUFFER_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut feed = FeedConfig::from_lookup(&lookup)?;

        let addr = match lookup("WS_ADDR") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "WS_ADDR".to_string(),
                value,
            })?,
            None => Self::default().addr,
        };

        if let Some(value) = lookup("WS_BUFFER_SIZE") {
            feed.event_buffer_size = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "WS_BUFFER_SIZE".to_string(),
                value,
            })?;
            feed.validate()?;
        }

        Ok(Self { addr, feed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lookup() {
        struct TestCase {
            vars: Vec<(&'static str, &'static str)>,
            expected: Result<(SocketAddr, usize), ConfigError>,
        }

        let tests = vec![
            TestCase {
                // TC0: defaults
                vars: vec![],
                expected: Ok((DEFAULT_WS_ADDR.parse().unwrap(), 10_000)),
            },
            TestCase {
                // TC1: both overridden
                vars: vec![("WS_ADDR", "127.0.0.1:9100"), ("WS_BUFFER_SIZE", "64")],
                expected: Ok(("127.0.0.1:9100".parse().unwrap(), 64)),
            },
            TestCase {
                // TC2: invalid address
                vars: vec![("WS_ADDR", "localhost")],
                expected: Err(ConfigError::InvalidEnv {
                    key: "WS_ADDR".to_string(),
                    value: "localhost".to_string(),
                }),
            },
            TestCase {
                // TC3: zero buffer
                vars: vec![("WS_BUFFER_SIZE", "0")],
                expected: Err(ConfigError::Invalid("event buffer size must be at least 1".to_string())),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let vars = test.vars;
            let actual = ServerConfig::from_lookup(|key: &str| {
                vars.iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, value)| value.to_string())
            })
            .map(|config| (config.addr, config.feed.event_buffer_size));
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
