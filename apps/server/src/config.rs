//! Server configuration
//!
//! Layered configuration: built-in defaults, then `config/default.toml`
//! (when present), then environment variables with the `CUPRUM__` prefix
//! (e.g. `CUPRUM__DATABASE__URL`). A `.env` file is honored via dotenvy.

use std::net::SocketAddr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub fhir: FhirConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// Fixed-size connection pool
    pub max_connections: u32,
    /// Acquisition timeout in seconds
    pub acquire_timeout_secs: u64,
    /// Per-connection idle timeout in seconds
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FhirConfig {
    /// Base URL used in Bundle links and Location headers
    pub base_url: String,
    /// Directory holding StructureDefinition / SearchParameter bundles
    pub definitions_dir: String,
    /// Default `_count` when the request does not specify one
    pub default_page_size: usize,
    /// Hard cap on `_count`
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter (overridden by RUST_LOG)
    pub level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

impl Config {
    /// Load configuration from defaults, file, and environment.
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "postgres://localhost/cuprum")?
            .set_default("database.max_connections", 20)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("database.idle_timeout_secs", 30)?
            .set_default("fhir.base_url", "http://localhost:8080/fhir")?
            .set_default("fhir.definitions_dir", "definitions")?
            .set_default("fhir.default_page_size", 20)?
            .set_default("fhir.max_page_size", 1000)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("CUPRUM").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.database.url.is_empty() {
            return Err("database.url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("database.max_connections must be at least 1".to_string());
        }
        if self.fhir.default_page_size == 0 || self.fhir.default_page_size > self.fhir.max_page_size
        {
            return Err(format!(
                "fhir.default_page_size must be within [1, {}]",
                self.fhir.max_page_size
            ));
        }
        Ok(())
    }

    /// The socket address to bind.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        Ok(addr.parse()?)
    }
}
