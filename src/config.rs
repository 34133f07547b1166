use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONFIG_FILE: &str = "liftlog.toml";

/// Validated configuration. Every field is optional; CLI flags take
/// precedence over file values, and built-in defaults cover the rest.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub server_url: Option<String>,
    pub database: Option<PathBuf>,
    pub device_id: Option<Uuid>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub bind_addr: Option<SocketAddr>,
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    version: Option<u32>,
    client: Option<RawClientConfig>,
    server: Option<RawServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawClientConfig {
    server_url: Option<String>,
    database: Option<String>,
    device_id: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawServerConfig {
    bind_addr: Option<String>,
    database: Option<String>,
}

/// Load configuration from an explicit path (must exist) or from
/// `liftlog.toml` in the working directory (may be absent).
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    if !path.exists() {
        if required {
            bail!("config file {} not found", path.display());
        }
        return Ok(AppConfig::default());
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))?;
    let parsed: RawConfig =
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    validate_config(parsed, &path)
}

fn validate_config(raw: RawConfig, path: &Path) -> Result<AppConfig> {
    let version = raw
        .version
        .ok_or_else(|| anyhow::anyhow!("{} missing required `version`", path.display()))?;
    if version != 1 {
        bail!(
            "{} has unsupported version {version}; expected version = 1",
            path.display()
        );
    }

    let client = raw
        .client
        .map(|client| {
            let device_id = sanitize_optional(client.device_id)
                .map(|raw| {
                    Uuid::parse_str(&raw)
                        .with_context(|| format!("{} has invalid `[client].device_id`", path.display()))
                })
                .transpose()?;
            if let Some(timeout) = client.request_timeout_secs
                && timeout == 0
            {
                bail!("{} has zero `[client].request_timeout_secs`", path.display());
            }
            Ok(ClientConfig {
                server_url: sanitize_optional(client.server_url),
                database: sanitize_optional(client.database).map(PathBuf::from),
                device_id,
                request_timeout_secs: client.request_timeout_secs,
            })
        })
        .transpose()?
        .unwrap_or_default();

    let server = raw
        .server
        .map(|server| -> anyhow::Result<ServerConfig> {
            let bind_addr = sanitize_optional(server.bind_addr)
                .map(|raw| {
                    raw.parse::<SocketAddr>()
                        .with_context(|| format!("{} has invalid `[server].bind_addr`", path.display()))
                })
                .transpose()?;
            Ok(ServerConfig {
                bind_addr,
                database: sanitize_optional(server.database).map(PathBuf::from),
            })
        })
        .transpose()?
        .unwrap_or_default();

    Ok(AppConfig { client, server })
}

fn sanitize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_default_config_is_fine() {
        let tmp = tempdir().unwrap();
        let cfg = load_config(Some(&tmp.path().join("liftlog.toml")));
        assert!(cfg.is_err());
        let cfg = load_config(None).unwrap();
        assert!(cfg.client.server_url.is_none());
    }

    #[test]
    fn parses_valid_minimal_config() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("liftlog.toml");
        std::fs::write(
            &path,
            r#"
version = 1
[client]
server_url = "http://localhost:8080"
request_timeout_secs = 10
[server]
bind_addr = "127.0.0.1:8080"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(
            cfg.client.server_url.as_deref(),
            Some("http://localhost:8080")
        );
        assert_eq!(cfg.client.request_timeout_secs, Some(10));
        assert_eq!(
            cfg.server.bind_addr,
            Some("127.0.0.1:8080".parse().unwrap())
        );
    }

    #[test]
    fn rejects_invalid_version() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("liftlog.toml");
        std::fs::write(&path, "version = 7").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err}").contains("unsupported version"));
    }

    #[test]
    fn rejects_invalid_device_id() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("liftlog.toml");
        std::fs::write(
            &path,
            r#"
version = 1
[client]
device_id = "not-a-uuid"
"#,
        )
        .unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("invalid `[client].device_id`"));
    }

    #[test]
    fn rejects_zero_timeout() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("liftlog.toml");
        std::fs::write(
            &path,
            r#"
version = 1
[client]
request_timeout_secs = 0
"#,
        )
        .unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err}").contains("zero `[client].request_timeout_secs`"));
    }
}
