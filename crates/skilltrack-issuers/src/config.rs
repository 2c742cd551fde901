//! Configuration loading and issuer factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use skilltrack_core::engine::EngineSettings;
use skilltrack_core::traits::CertificateIssuer;

use crate::http::{HttpIssuer, DEFAULT_TIMEOUT_SECS};
use crate::noop::NoopIssuer;

/// Environment variable that overrides the HTTP issuer token.
pub const TOKEN_ENV: &str = "SKILLTRACK_ISSUER_TOKEN";

/// Which certificate issuer to use.
///
/// Note: Custom Debug impl masks the token to prevent accidental exposure in logs.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IssuerConfig {
    Http {
        base_url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_timeout")]
        timeout_secs: u64,
    },
    #[default]
    Noop,
}

impl std::fmt::Debug for IssuerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssuerConfig::Http {
                base_url,
                token,
                timeout_secs,
            } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("token", &token.as_ref().map(|_| "***"))
                .field("timeout_secs", timeout_secs)
                .finish(),
            IssuerConfig::Noop => f.write_str("Noop"),
        }
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Top-level skilltrack configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkilltrackConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub issuer: IssuerConfig,
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_issuer_config(config: &IssuerConfig) -> IssuerConfig {
    match config {
        IssuerConfig::Http {
            base_url,
            token,
            timeout_secs,
        } => IssuerConfig::Http {
            base_url: resolve_env_vars(base_url),
            token: token
                .as_ref()
                .map(|t| resolve_env_vars(t))
                .filter(|t| !t.is_empty()),
            timeout_secs: *timeout_secs,
        },
        IssuerConfig::Noop => IssuerConfig::Noop,
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `skilltrack.toml` in the current directory
/// 2. `~/.config/skilltrack/config.toml`
///
/// Environment variable override: `SKILLTRACK_ISSUER_TOKEN`.
pub fn load_config() -> Result<SkilltrackConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<SkilltrackConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("skilltrack.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => SkilltrackConfig::default(),
    };

    Ok(apply_overrides(config, std::env::var(TOKEN_ENV).ok()))
}

/// Parse a config file's contents.
pub fn parse_config(content: &str) -> Result<SkilltrackConfig> {
    Ok(toml::from_str(content)?)
}

fn apply_overrides(
    mut config: SkilltrackConfig,
    token_override: Option<String>,
) -> SkilltrackConfig {
    if let (Some(key), IssuerConfig::Http { token, .. }) = (token_override, &mut config.issuer) {
        *token = Some(key);
    }
    config.issuer = resolve_issuer_config(&config.issuer);
    config
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("skilltrack"))
}

/// Create an issuer instance from its configuration.
pub fn create_issuer(config: &IssuerConfig) -> Result<Arc<dyn CertificateIssuer>> {
    match config {
        IssuerConfig::Http {
            base_url,
            token,
            timeout_secs,
        } => {
            if base_url.trim().is_empty() {
                anyhow::bail!("http issuer requires a base_url");
            }
            Ok(Arc::new(HttpIssuer::new(
                base_url,
                token.clone(),
                *timeout_secs,
            )?))
        }
        IssuerConfig::Noop => Ok(Arc::new(NoopIssuer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_SKILLTRACK_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_SKILLTRACK_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_SKILLTRACK_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        std::env::remove_var("_SKILLTRACK_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = SkilltrackConfig::default();
        assert!(matches!(config.issuer, IssuerConfig::Noop));
        assert_eq!(config.engine.max_cas_retries, 5);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[engine]
max_cas_retries = 8
certificate_max_retries = 2
certificate_retry_delay = 0.5
auto_submit_grace = 5

[issuer]
type = "http"
base_url = "https://certs.example.com/api"
token = "secret"
"#;
        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.engine.max_cas_retries, 8);
        assert_eq!(config.engine.certificate_max_retries, 2);
        assert_eq!(config.engine.certificate_retry_delay, Duration::from_millis(500));
        assert_eq!(config.engine.auto_submit_grace, Duration::from_secs(5));
        assert!(config.engine.schedule_timeouts);
        match &config.issuer {
            IssuerConfig::Http {
                base_url,
                timeout_secs,
                ..
            } => {
                assert_eq!(base_url, "https://certs.example.com/api");
                assert_eq!(*timeout_secs, DEFAULT_TIMEOUT_SECS);
            }
            other => panic!("expected http issuer, got {other:?}"),
        }
    }

    #[test]
    fn debug_masks_token() {
        let config = IssuerConfig::Http {
            base_url: "http://localhost".into(),
            token: Some("super-secret".into()),
            timeout_secs: 5,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn token_override_applies_to_http_only() {
        let http = parse_config(
            "[issuer]\ntype = \"http\"\nbase_url = \"http://localhost\"\ntoken = \"file\"\n",
        )
        .unwrap();
        let overridden = apply_overrides(http, Some("env".into()));
        assert!(matches!(
            overridden.issuer,
            IssuerConfig::Http { token: Some(ref t), .. } if t == "env"
        ));

        let noop = apply_overrides(SkilltrackConfig::default(), Some("env".into()));
        assert!(matches!(noop.issuer, IssuerConfig::Noop));
    }

    #[test]
    fn token_is_resolved_from_environment() {
        std::env::set_var("_SKILLTRACK_TEST_TOKEN", "from-env");
        let config = parse_config(
            "[issuer]\ntype = \"http\"\nbase_url = \"http://localhost\"\ntoken = \"${_SKILLTRACK_TEST_TOKEN}\"\n",
        )
        .unwrap();
        let resolved = apply_overrides(config, None);
        assert!(matches!(
            resolved.issuer,
            IssuerConfig::Http { token: Some(ref t), .. } if t == "from-env"
        ));
        std::env::remove_var("_SKILLTRACK_TEST_TOKEN");
    }

    #[test]
    fn load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skilltrack.toml");
        std::fs::write(&path, "[issuer]\ntype = \"noop\"\n").unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert!(matches!(config.issuer, IssuerConfig::Noop));

        assert!(load_config_from(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn factory_builds_configured_issuer() {
        assert_eq!(create_issuer(&IssuerConfig::Noop).unwrap().name(), "noop");
        let http = IssuerConfig::Http {
            base_url: "http://localhost:9".into(),
            token: None,
            timeout_secs: 1,
        };
        assert_eq!(create_issuer(&http).unwrap().name(), "http");

        let empty = IssuerConfig::Http {
            base_url: " ".into(),
            token: None,
            timeout_secs: 1,
        };
        assert!(create_issuer(&empty).is_err());
    }
}
