use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub max_connections: u32,
    pub max_upload_bytes: usize,
    pub log_filter: String,
}

impl Config {
    /// Read configuration from the environment (after `.env` is loaded).
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_var("PORT", 8081)?,
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?,
            log_filter: env::var("RUST_LOG")
                .unwrap_or_else(|_| "attendance_server=info,tower_http=info".into()),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variable_uses_default() {
        let port: u16 = parse_var("ATTENDANCE_TEST_UNSET_PORT", 8081).unwrap();
        assert_eq!(port, 8081);
    }

    #[test]
    fn bad_number_is_an_error() {
        env::set_var("ATTENDANCE_TEST_BAD_PORT", "eighty");
        assert!(parse_var::<u16>("ATTENDANCE_TEST_BAD_PORT", 1).is_err());
    }

    #[test]
    fn socket_addr_from_host_and_port() {
        let cfg = Config {
            database_url: "postgres://localhost/attendance".into(),
            host: "127.0.0.1".into(),
            port: 9000,
            max_connections: 5,
            max_upload_bytes: 1024,
            log_filter: "info".into(),
        };
        assert_eq!(cfg.socket_addr().unwrap().port(), 9000);
    }
}
