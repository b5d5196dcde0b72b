//! Pull server configuration from environment variables.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

#[derive(Debug, Clone)]
pub struct PullServerConfig {
    pub bind_host: String,
    /// 0 binds an ephemeral port; the bound port is published through the
    /// handshake.
    pub port: u16,
    /// Searched in order when resolving task output.
    pub local_dirs: Vec<PathBuf>,
    pub user: String,
    /// Application to activate at startup.
    pub app_id: Option<String>,
    pub keep_alive: bool,
    /// Idle/header-read timeout of a connection. The only liveness bound.
    pub idle_timeout_secs: u64,
    pub transfer_buffer_bytes: usize,
    /// Read size for the buffered copy used over encrypted transports.
    pub tls_buffer_bytes: usize,
    pub encrypted_transport: bool,
    pub metrics_port: u16,
    /// Where to write the 4-byte port handshake, if anywhere.
    pub meta_file: Option<PathBuf>,
    pub log_level: Level,
}

impl PullServerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_host: std::env::var("PULLSERVER_BIND_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PULLSERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid PULLSERVER_PORT")?,
            local_dirs: std::env::var("PULLSERVER_LOCAL_DIRS")
                .unwrap_or_else(|_| "./local".to_string())
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            user: std::env::var("PULLSERVER_USER")
                .or_else(|_| std::env::var("USER"))
                .unwrap_or_else(|_| "stagefetch".to_string()),
            app_id: std::env::var("PULLSERVER_APP_ID").ok(),
            keep_alive: std::env::var("PULLSERVER_KEEP_ALIVE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid PULLSERVER_KEEP_ALIVE")?,
            idle_timeout_secs: std::env::var("PULLSERVER_IDLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid PULLSERVER_IDLE_TIMEOUT_SECS")?,
            transfer_buffer_bytes: std::env::var("PULLSERVER_TRANSFER_BUFFER_BYTES")
                .unwrap_or_else(|_| (4 * 1024 * 1024).to_string())
                .parse()
                .context("Invalid PULLSERVER_TRANSFER_BUFFER_BYTES")?,
            tls_buffer_bytes: std::env::var("PULLSERVER_TLS_BUFFER_BYTES")
                .unwrap_or_else(|_| (60 * 1024).to_string())
                .parse()
                .context("Invalid PULLSERVER_TLS_BUFFER_BYTES")?,
            encrypted_transport: std::env::var("PULLSERVER_ENCRYPTED_TRANSPORT")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("Invalid PULLSERVER_ENCRYPTED_TRANSPORT")?,
            metrics_port: std::env::var("PULLSERVER_METRICS_PORT")
                .unwrap_or_else(|_| "9091".to_string())
                .parse()
                .context("Invalid PULLSERVER_METRICS_PORT")?,
            meta_file: std::env::var("PULLSERVER_META_FILE").ok().map(PathBuf::from),
            log_level: std::env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info".to_string())
                .parse()
                .context("Invalid LOG_LEVEL")?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Read size used when streaming chunks to clients.
    pub fn buffer_size(&self) -> usize {
        if self.encrypted_transport {
            self.tls_buffer_bytes
        } else {
            self.transfer_buffer_bytes
        }
        .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid races.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "PULLSERVER_BIND_HOST",
            "PULLSERVER_PORT",
            "PULLSERVER_LOCAL_DIRS",
            "PULLSERVER_USER",
            "PULLSERVER_APP_ID",
            "PULLSERVER_KEEP_ALIVE",
            "PULLSERVER_IDLE_TIMEOUT_SECS",
            "PULLSERVER_TRANSFER_BUFFER_BYTES",
            "PULLSERVER_TLS_BUFFER_BYTES",
            "PULLSERVER_ENCRYPTED_TRANSPORT",
            "PULLSERVER_METRICS_PORT",
            "PULLSERVER_META_FILE",
            "LOG_LEVEL",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        let config = PullServerConfig::from_env().unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.local_dirs, vec![PathBuf::from("./local")]);
        assert!(!config.user.is_empty());
        assert_eq!(config.app_id, None);
        assert!(config.keep_alive);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.buffer_size(), 4 * 1024 * 1024);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.meta_file, None);
        assert_eq!(config.log_level, Level::INFO);

        clear_env();
    }

    #[test]
    fn from_env_with_all_vars() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("PULLSERVER_BIND_HOST", "127.0.0.1");
            std::env::set_var("PULLSERVER_PORT", "0");
            std::env::set_var("PULLSERVER_LOCAL_DIRS", "/disk1, /disk2,");
            std::env::set_var("PULLSERVER_USER", "alice");
            std::env::set_var("PULLSERVER_APP_ID", "app_42");
            std::env::set_var("PULLSERVER_KEEP_ALIVE", "false");
            std::env::set_var("PULLSERVER_IDLE_TIMEOUT_SECS", "5");
            std::env::set_var("PULLSERVER_TLS_BUFFER_BYTES", "1024");
            std::env::set_var("PULLSERVER_ENCRYPTED_TRANSPORT", "true");
            std::env::set_var("PULLSERVER_METRICS_PORT", "9999");
            std::env::set_var("PULLSERVER_META_FILE", "/tmp/pull.meta");
            std::env::set_var("LOG_LEVEL", "debug");
        }

        let config = PullServerConfig::from_env().unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:0");
        assert_eq!(
            config.local_dirs,
            vec![PathBuf::from("/disk1"), PathBuf::from("/disk2")]
        );
        assert_eq!(config.user, "alice");
        assert_eq!(config.app_id, Some("app_42".to_string()));
        assert!(!config.keep_alive);
        assert_eq!(config.idle_timeout_secs, 5);
        assert_eq!(config.buffer_size(), 1024);
        assert_eq!(config.metrics_port, 9999);
        assert_eq!(config.meta_file, Some(PathBuf::from("/tmp/pull.meta")));
        assert_eq!(config.log_level, Level::DEBUG);

        clear_env();
    }

    #[test]
    fn from_env_invalid_port() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("PULLSERVER_PORT", "not-a-number");
        }
        assert!(PullServerConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    fn from_env_invalid_keep_alive() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("PULLSERVER_KEEP_ALIVE", "sometimes");
        }
        assert!(PullServerConfig::from_env().is_err());

        clear_env();
    }
}
