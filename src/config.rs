use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

/// ConfigError
///
/// Raised by `AppConfig::load` when a required variable is absent for the current
/// runtime environment, or when a numeric variable cannot be parsed.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// AppConfig
///
/// Holds the application's entire configuration state. It is immutable once loaded
/// and is pulled into handlers through `FromRef`, so every request observes the same
/// settings for the lifetime of the process.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls log format and fail-fast rules.
    pub env: Env,
    // Logical service name used in log lines and as the metrics app label.
    pub service_name: String,
    // Body of the greeting served at `/`.
    pub greeting: String,
    // Value appended to the greeting (the pod/host name in a cluster).
    pub hostname: String,
    pub http_port: u16,
    pub metrics_port: u16,
    // HMAC secret used to sign and verify session tokens.
    pub jwt_secret: String,
    // Lifetime of an issued session token.
    pub session_ttl: Duration,
    // Configured username/password pairs shared by both auth schemes.
    pub users: Vec<(String, String)>,
    // Realm advertised in the Basic challenge header.
    pub auth_realm: String,
    // Remote conditional-write store. `None` selects the in-memory backend.
    pub dynamodb: Option<DynamoConfig>,
    // Event stream target. `None` keeps the no-op publisher.
    pub events: Option<EventQueueConfig>,
    pub dispatch: DispatchSettings,
    // Upstream for the traced `/proxy` route.
    pub proxy: Option<ProxyConfig>,
    // Directory served read-only under `/static`.
    pub static_dir: String,
    // Where finished spans are reported.
    pub traces: TraceExporter,
}

/// Env
///
/// Defines the runtime context: `Local` favours developer ergonomics (pretty logs,
/// fallback secrets), `Production` demands explicit secrets and emits JSON logs.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DynamoConfig {
    pub table: String,
    pub region: String,
    // Overrides the service endpoint (DynamoDB Local, LocalStack).
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventQueueConfig {
    pub queue_url: String,
    pub region: Option<String>,
}

/// DispatchSettings
///
/// Tuning for the background event dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchSettings {
    // Capacity of the dispatch channel; events beyond it are dropped with a warning.
    pub buffer: usize,
    // Total publish attempts per event (1 disables retries).
    pub max_attempts: u32,
    // Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
    // Upper bound for a single publish attempt.
    pub timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            buffer: 256,
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            timeout: Duration::from_secs(5),
        }
    }
}

/// TraceExporter
///
/// `TRACES_EXPORTER=stdout` (the default) prints every finished span; `none` keeps
/// propagation but reports nothing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TraceExporter {
    Stdout,
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProxyConfig {
    pub upstream: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";
const DEFAULT_USERS: &str = "user1:password1,user2:password2";
const DEFAULT_REALM: &str = "Please enter your username and password";
const DEFAULT_STATIC_DIR: &str = "/static";

impl Default for AppConfig {
    /// default
    ///
    /// Provides a safe AppConfig instance primarily used for test setup: in-memory
    /// repository, no event stream, no proxy, no span output, and the two demo users.
    fn default() -> Self {
        Self {
            env: Env::Local,
            service_name: "helloworld".to_string(),
            greeting: "Hello, World - REST API!".to_string(),
            hostname: String::new(),
            http_port: 8080,
            metrics_port: 9100,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            session_ttl: Duration::from_secs(5 * 60),
            users: parse_users(DEFAULT_USERS),
            auth_realm: DEFAULT_REALM.to_string(),
            dynamodb: None,
            events: None,
            dispatch: DispatchSettings::default(),
            proxy: None,
            static_dir: DEFAULT_STATIC_DIR.to_string(),
            traces: TraceExporter::None,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// The canonical function for initializing the application configuration at startup.
    /// It reads all parameters from environment variables and fails fast when the
    /// production environment lacks a signing secret.
    ///
    /// Optional collaborators (DynamoDB, the event queue, the proxy upstream) are only
    /// enabled when every variable they need is present.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match var("APP_ENV").as_deref() {
            Some("production") => Env::Production,
            _ => Env::Local,
        };

        let jwt_secret = match (&env, var("JWT_SECRET")) {
            (_, Some(secret)) => secret,
            (Env::Production, None) => return Err(ConfigError::Missing("JWT_SECRET")),
            (Env::Local, None) => LOCAL_JWT_SECRET.to_string(),
        };

        let dynamodb = match (
            var("DYNAMODB_TABLE"),
            var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION")),
        ) {
            (Some(table), Some(region)) => Some(DynamoConfig {
                table,
                region,
                endpoint: var("DYNAMODB_ENDPOINT"),
            }),
            _ => None,
        };

        let events = var("EVENTS_QUEUE_URL").map(|queue_url| EventQueueConfig {
            queue_url,
            region: var("EVENTS_REGION").or_else(|| var("AWS_REGION")),
        });

        let proxy = var("PROXY_UPSTREAM").map(|upstream| ProxyConfig {
            upstream,
            username: var("PROXY_USER"),
            password: var("PROXY_PASS"),
        });

        let traces = match var("TRACES_EXPORTER").as_deref() {
            None | Some("stdout") => TraceExporter::Stdout,
            Some("none") => TraceExporter::None,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "TRACES_EXPORTER",
                    value: other.to_string(),
                });
            }
        };

        let defaults = DispatchSettings::default();
        let dispatch = DispatchSettings {
            buffer: parse_or("PUBLISH_BUFFER", defaults.buffer)?,
            max_attempts: parse_or("PUBLISH_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            backoff: Duration::from_millis(parse_or("PUBLISH_BACKOFF_MS", 200)?),
            timeout: Duration::from_millis(parse_or("PUBLISH_TIMEOUT_MS", 5000)?),
        };

        Ok(Self {
            env,
            service_name: var("SERVICE_NAME").unwrap_or_else(|| "helloworld".to_string()),
            greeting: var("RESPONSE").unwrap_or_else(|| "Hello, World - REST API!".to_string()),
            hostname: var("HOSTNAME").unwrap_or_default(),
            http_port: parse_or("PORT", 8080)?,
            metrics_port: parse_or("METRICS_PORT", 9100)?,
            jwt_secret,
            session_ttl: Duration::from_secs(parse_or("SESSION_TTL_SECS", 300)?),
            users: parse_users(&var("AUTH_USERS").unwrap_or_else(|| DEFAULT_USERS.to_string())),
            auth_realm: var("AUTH_REALM").unwrap_or_else(|| DEFAULT_REALM.to_string()),
            dynamodb,
            events,
            dispatch,
            proxy,
            static_dir: var("STATIC_DIR").unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string()),
            traces,
        })
    }
}

// Empty and whitespace-only values count as unset.
fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// parse_users
///
/// Parses `user:pass` pairs separated by commas. Entries without a colon or with an
/// empty username are skipped.
pub fn parse_users(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| entry.trim().split_once(':'))
        .filter(|(user, _)| !user.is_empty())
        .map(|(user, pass)| (user.to_string(), pass.to_string()))
        .collect()
}
