use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use confvault_data::PoolSettings;
use confvault_telemetry::{DEFAULT_LOG_LEVEL, LogFormat};

use crate::error::{AppError, AppResult};

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_RPC_PORT: u16 = 50051;

/// Backing store selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// `PostgreSQL` through `PgSnapshotStore`.
    Postgres,
    /// Process-local `MemoryStore`; contents are lost on exit.
    Memory,
}

impl StoreKind {
    /// Label recorded on the application span.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }
}

/// Server settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Store implementation.
    pub store: StoreKind,
    /// Connection string; present whenever `store` is `Postgres`.
    pub database_url: Option<String>,
    /// Address both listeners bind to.
    pub bind_addr: IpAddr,
    /// HTTP listener port.
    pub http_port: u16,
    /// RPC listener port.
    pub rpc_port: u16,
    /// Pool sizing for the `PostgreSQL` store.
    pub pool: PoolSettings,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a value does not parse.
    pub fn from_env() -> AppResult<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Resolve settings through `lookup`; blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let store = match get("CONFVAULT_STORE").as_deref() {
            None => StoreKind::Postgres,
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "postgres" | "postgresql" => StoreKind::Postgres,
                "memory" => StoreKind::Memory,
                _ => return Err(AppError::invalid("store", "unknown_store", raw)),
            },
        };

        let database_url = get("POSTGRES_URI").or_else(|| get("DATABASE_URL"));
        if store == StoreKind::Postgres && database_url.is_none() {
            return Err(AppError::MissingEnv {
                name: "POSTGRES_URI",
            });
        }

        let bind_addr = match get("BIND_ADDR") {
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Some(raw) => raw
                .parse()
                .map_err(|_| AppError::invalid("bind_addr", "not_an_ip_address", &raw))?,
        };

        let http_port = parse_port("http_port", get("HTTP_PORT"), DEFAULT_HTTP_PORT)?;
        let rpc_port = parse_port(
            "rpc_port",
            get("RPC_PORT").or_else(|| get("GRPC_PORT")),
            DEFAULT_RPC_PORT,
        )?;
        if http_port == rpc_port {
            return Err(AppError::invalid(
                "rpc_port",
                "collides_with_http_port",
                &rpc_port.to_string(),
            ));
        }

        let defaults = PoolSettings::default();
        let max_connections = match get("DB_MAX_CONNECTIONS") {
            None => defaults.max_connections,
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) if value > 0 => value,
                _ => return Err(AppError::invalid("db_max_connections", "not_positive", &raw)),
            },
        };
        let acquire_timeout = match get("DB_ACQUIRE_TIMEOUT_SECS") {
            None => defaults.acquire_timeout,
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(AppError::invalid(
                        "db_acquire_timeout_secs",
                        "not_positive",
                        &raw,
                    ));
                }
            },
        };

        let log_format = match get("LOG_FORMAT") {
            None => LogFormat::infer(),
            Some(raw) => LogFormat::parse(&raw)
                .ok_or_else(|| AppError::invalid("log_format", "unknown_format", &raw))?,
        };

        Ok(Self {
            store,
            database_url,
            bind_addr,
            http_port,
            rpc_port,
            pool: PoolSettings {
                max_connections,
                acquire_timeout,
            },
            log_level: get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_format,
        })
    }

    /// Socket address of the HTTP listener.
    #[must_use]
    pub const fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.http_port)
    }

    /// Socket address of the RPC listener.
    #[must_use]
    pub const fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.rpc_port)
    }
}

fn parse_port(field: &'static str, raw: Option<String>, default: u16) -> AppResult<u16> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<u16>() {
        Ok(0) => Err(AppError::invalid(field, "zero", &raw)),
        Ok(port) => Ok(port),
        Err(_) => Err(AppError::invalid(field, "not_a_port", &raw)),
    }
}
