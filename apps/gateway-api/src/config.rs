use std::time::Duration;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Redis connection string. When unset the registry lives in process memory.
    pub redis_url: Option<String>,
    /// Shared HS256 secret for bearer tokens. When unset the gateway trusts
    /// the `userId` the client presents (development only).
    pub auth_secret: Option<String>,
    /// Expected `iss` claim, if any.
    pub auth_issuer: Option<String>,
    /// Expected `aud` claim, if any.
    pub auth_audience: Option<String>,
    /// Base URL of a connection push API. When set, broadcasts to connections
    /// this process does not hold are delivered through it.
    pub push_api_url: Option<String>,
    /// Upper bound on any single registry call.
    pub store_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            redis_url: None,
            auth_secret: None,
            auth_issuer: None,
            auth_audience: None,
            push_api_url: None,
            store_timeout: Duration::from_millis(5000),
            outbound_buffer: 64,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_var("PORT").unwrap_or(defaults.port),
            redis_url: optional_var("REDIS_URL"),
            auth_secret: optional_var("AUTH_SECRET"),
            auth_issuer: optional_var("AUTH_ISSUER"),
            auth_audience: optional_var("AUTH_AUDIENCE"),
            push_api_url: optional_var("PUSH_API_URL"),
            store_timeout: parsed_var("STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            outbound_buffer: parsed_var("OUTBOUND_BUFFER")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.outbound_buffer),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
