//! Server configuration loaded from environment variables.
//!
//! Every variable is optional. Unparseable values are logged and replaced by
//! the default, and [`ServerConfig::normalized`] repairs combinations the
//! server cannot run with.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use strongbox_shared::constants::{
    CHUNK_HEADER_SIZE, CHUNK_SIZE, DEFAULT_MAX_CLIENT_VERSION, DEFAULT_MAX_PAYLOAD_SIZE,
    DEFAULT_MIN_CLIENT_VERSION, DEFAULT_PORT,
};
use strongbox_store::StoreOptions;

/// Smallest payload cap that still admits one full file chunk.
pub const MIN_PAYLOAD_SIZE: u32 = (CHUNK_SIZE + CHUNK_HEADER_SIZE) as u32;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address to listen on.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:1256`
    pub listen_addr: SocketAddr,

    /// SQLite metadata database.
    /// Env: `DATABASE_PATH`
    /// Default: `./strongbox.db`
    pub database_path: PathBuf,

    /// Root directory for received files.
    /// Env: `STORAGE_DIR`
    /// Default: `./backups`
    pub storage_dir: PathBuf,

    /// Maximum number of concurrently served connections. Extra connections
    /// are closed right after accept.
    /// Env: `MAX_CLIENTS`
    /// Default: `32`
    pub max_clients: usize,

    /// Largest declared request payload, in bytes.
    /// Env: `MAX_PAYLOAD_SIZE`
    /// Default: 4 MiB
    pub max_payload_size: u32,

    /// Applied to every socket read and write.
    /// Env: `SOCKET_TIMEOUT_SECS`
    /// Default: `60`
    pub socket_timeout: Duration,

    /// How long workers get to finish after a shutdown signal.
    /// Env: `SHUTDOWN_GRACE_SECS`
    /// Default: `10`
    pub shutdown_grace: Duration,

    /// Env: `DB_POOL_SIZE`
    /// Default: `4`
    pub db_pool_size: usize,

    /// Env: `DB_POOL_TIMEOUT_SECS`
    /// Default: `5`
    pub db_pool_timeout: Duration,

    /// Inclusive range of protocol versions accepted from clients.
    /// Env: `MIN_CLIENT_VERSION` / `MAX_CLIENT_VERSION`
    /// Default: `1` / `3`
    pub min_client_version: u8,
    pub max_client_version: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            database_path: PathBuf::from("./strongbox.db"),
            storage_dir: PathBuf::from("./backups"),
            max_clients: 32,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            socket_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
            db_pool_size: 4,
            db_pool_timeout: Duration::from_secs(5),
            min_client_version: DEFAULT_MIN_CLIENT_VERSION,
            max_client_version: DEFAULT_MAX_CLIENT_VERSION,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("LISTEN_ADDR") {
            config.listen_addr = parse_or_warn("LISTEN_ADDR", &addr, config.listen_addr);
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("STORAGE_DIR") {
            config.storage_dir = PathBuf::from(path);
        }

        if let Some(val) = lookup("MAX_CLIENTS") {
            config.max_clients = parse_or_warn("MAX_CLIENTS", &val, config.max_clients);
        }

        if let Some(val) = lookup("MAX_PAYLOAD_SIZE") {
            config.max_payload_size =
                parse_or_warn("MAX_PAYLOAD_SIZE", &val, config.max_payload_size);
        }

        if let Some(val) = lookup("SOCKET_TIMEOUT_SECS") {
            config.socket_timeout = secs_or_warn("SOCKET_TIMEOUT_SECS", &val, config.socket_timeout);
        }

        if let Some(val) = lookup("SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = secs_or_warn("SHUTDOWN_GRACE_SECS", &val, config.shutdown_grace);
        }

        if let Some(val) = lookup("DB_POOL_SIZE") {
            config.db_pool_size = parse_or_warn("DB_POOL_SIZE", &val, config.db_pool_size);
        }

        if let Some(val) = lookup("DB_POOL_TIMEOUT_SECS") {
            config.db_pool_timeout =
                secs_or_warn("DB_POOL_TIMEOUT_SECS", &val, config.db_pool_timeout);
        }

        if let Some(val) = lookup("MIN_CLIENT_VERSION") {
            config.min_client_version =
                parse_or_warn("MIN_CLIENT_VERSION", &val, config.min_client_version);
        }

        if let Some(val) = lookup("MAX_CLIENT_VERSION") {
            config.max_client_version =
                parse_or_warn("MAX_CLIENT_VERSION", &val, config.max_client_version);
        }

        // RUST_LOG belongs to the EnvFilter set up in main.

        config.normalized()
    }

    /// Clamp values that would make the server unusable.
    pub fn normalized(mut self) -> Self {
        if self.max_clients == 0 {
            tracing::warn!("MAX_CLIENTS must be at least 1, using default");
            self.max_clients = Self::default().max_clients;
        }

        if self.max_payload_size < MIN_PAYLOAD_SIZE {
            tracing::warn!(
                value = self.max_payload_size,
                minimum = MIN_PAYLOAD_SIZE,
                "MAX_PAYLOAD_SIZE cannot hold a full chunk, raising it"
            );
            self.max_payload_size = MIN_PAYLOAD_SIZE;
        }

        if self.db_pool_size == 0 {
            tracing::warn!("DB_POOL_SIZE must be at least 1, using default");
            self.db_pool_size = Self::default().db_pool_size;
        }

        if self.min_client_version > self.max_client_version {
            tracing::warn!(
                min = self.min_client_version,
                max = self.max_client_version,
                "Client version range is empty, using defaults"
            );
            self.min_client_version = DEFAULT_MIN_CLIENT_VERSION;
            self.max_client_version = DEFAULT_MAX_CLIENT_VERSION;
        }

        self
    }

    pub fn accepts_version(&self, version: u8) -> bool {
        (self.min_client_version..=self.max_client_version).contains(&version)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            pool_size: self.db_pool_size,
            acquire_timeout: self.db_pool_timeout,
            ..StoreOptions::default()
        }
    }
}

fn parse_or_warn<T>(name: &str, raw: &str, default: T) -> T
where
    T: FromStr,
{
    match raw.trim().parse::<T>() {
        Ok(parsed) => parsed,
        Err(_) => {
            tracing::warn!(value = %raw, "Invalid {name}, using default");
            default
        }
    }
}

fn secs_or_warn(name: &str, raw: &str, default: Duration) -> Duration {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            tracing::warn!(value = %raw, "Invalid {name}, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, ([0, 0, 0, 0], 1256).into());
        assert_eq!(config.max_clients, 32);
        assert!(config.accepts_version(3));
        assert!(!config.accepts_version(4));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("MAX_CLIENTS", "5"),
            ("SOCKET_TIMEOUT_SECS", "7"),
            ("MIN_CLIENT_VERSION", "2"),
        ]);
        assert_eq!(config.listen_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.max_clients, 5);
        assert_eq!(config.socket_timeout, Duration::from_secs(7));
        assert!(!config.accepts_version(1));
        assert!(config.accepts_version(2));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("LISTEN_ADDR", "not-an-address"),
            ("MAX_CLIENTS", "lots"),
            ("SHUTDOWN_GRACE_SECS", "0"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.listen_addr, defaults.listen_addr);
        assert_eq!(config.max_clients, defaults.max_clients);
        assert_eq!(config.shutdown_grace, defaults.shutdown_grace);
    }

    #[test]
    fn test_payload_cap_fits_a_chunk() {
        let config = from_pairs(&[("MAX_PAYLOAD_SIZE", "1024")]);
        assert_eq!(config.max_payload_size, MIN_PAYLOAD_SIZE);
    }

    #[test]
    fn test_empty_version_range_is_reset() {
        let config = from_pairs(&[("MIN_CLIENT_VERSION", "3"), ("MAX_CLIENT_VERSION", "1")]);
        assert_eq!(config.min_client_version, DEFAULT_MIN_CLIENT_VERSION);
        assert_eq!(config.max_client_version, DEFAULT_MAX_CLIENT_VERSION);
    }
}
