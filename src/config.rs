use std::env;
use std::net::IpAddr;

use ipnet::IpNet;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:tracklog.db";
pub const GOOGLE_MAPS_BASE_URL: &str = "https://maps.googleapis.com";
pub const CLOUDINARY_BASE_URL: &str = "https://api.cloudinary.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid port value '{value}': {reason}. Port must be a number between 1 and 65535")]
    InvalidPort { value: String, reason: String },
    #[error("Invalid trusted proxy '{0}': expected an IP address or CIDR range")]
    InvalidProxy(String),
}

#[derive(Debug, Clone)]
pub struct GeocodingConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct ImageHostConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub audience: Option<String>,
    pub issuer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub geocoding: GeocodingConfig,
    pub images: ImageHostConfig,
    pub auth: AuthConfig,
    /// Peers whose forwarding headers are believed when logging client IPs.
    pub trusted_proxies: Vec<IpNet>,
}

impl Config {
    /// Reads the whole service configuration from the environment.
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_port()?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            geocoding: GeocodingConfig {
                api_key: required("GOOGLE_MAPS_API_KEY")?,
                base_url: optional("GOOGLE_MAPS_BASE_URL")
                    .unwrap_or_else(|| GOOGLE_MAPS_BASE_URL.to_string()),
            },
            images: ImageHostConfig {
                cloud_name: required("CLOUDINARY_CLOUD_NAME")?,
                api_key: required("CLOUDINARY_API_KEY")?,
                api_secret: required("CLOUDINARY_API_SECRET")?,
                base_url: optional("CLOUDINARY_BASE_URL")
                    .unwrap_or_else(|| CLOUDINARY_BASE_URL.to_string()),
            },
            auth: AuthConfig {
                jwt_secret: required("AUTH_JWT_SECRET")?,
                audience: optional("AUTH_AUDIENCE"),
                issuer: optional("AUTH_ISSUER"),
            },
            trusted_proxies: parse_trusted_proxies(
                optional("TRUSTED_PROXIES").as_deref().unwrap_or_default(),
            )?,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parses the port number from environment variables.
/// Checks PORT first, then TRACKLOG_PORT, defaulting to 3001.
/// Returns an error if the port value is invalid.
pub fn parse_port() -> Result<u16, ConfigError> {
    let port_str = env::var("PORT")
        .or_else(|_| env::var("TRACKLOG_PORT"))
        .unwrap_or_else(|_| "3001".to_string());
    port_from_str(&port_str)
}

fn port_from_str(port_str: &str) -> Result<u16, ConfigError> {
    match port_str.parse::<u16>() {
        Ok(0) => Err(ConfigError::InvalidPort {
            value: port_str.to_string(),
            reason: "port 0 is reserved".to_string(),
        }),
        Ok(port) => Ok(port),
        Err(e) => Err(ConfigError::InvalidPort {
            value: port_str.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Parses a comma-separated list of IP addresses and CIDR ranges.
/// A bare address is trusted as a single-host network.
pub fn parse_trusted_proxies(raw: &str) -> Result<Vec<IpNet>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                .map_err(|_| ConfigError::InvalidProxy(entry.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_parsing() {
        assert_eq!(port_from_str("8080").unwrap(), 8080);
        assert!(matches!(
            port_from_str("0"),
            Err(ConfigError::InvalidPort { .. })
        ));
        assert!(matches!(
            port_from_str("http"),
            Err(ConfigError::InvalidPort { .. })
        ));
        assert!(port_from_str("70000").is_err());
    }

    #[test]
    fn trusted_proxy_parsing() {
        let networks = parse_trusted_proxies("10.0.0.0/8, 127.0.0.1 ,::1").unwrap();
        assert_eq!(networks.len(), 3);
        assert!(networks[0].contains(&"10.1.2.3".parse::<IpAddr>().unwrap()));
        assert!(networks[1].contains(&"127.0.0.1".parse::<IpAddr>().unwrap()));
        assert!(!networks[1].contains(&"127.0.0.2".parse::<IpAddr>().unwrap()));

        assert!(parse_trusted_proxies("").unwrap().is_empty());
        assert!(matches!(
            parse_trusted_proxies("10.0.0.0/8,proxy.local"),
            Err(ConfigError::InvalidProxy(entry)) if entry == "proxy.local"
        ));
    }
}
