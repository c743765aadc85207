//! Provider configuration and credential resolution.
//!
//! Explicit configuration wins over the environment. Values the host cannot
//! compute yet (unknown) are rejected before any fallback happens, because a
//! client built from a guessed credential would silently talk to the wrong
//! workspace.

use std::fmt;

use serde_json::Value;

use crate::client::{Credentials, AIKIDO_API_BASE};
use crate::schema::{has_errors, Diagnostic};
use crate::types::is_unknown;

/// Environment variable holding the fallback client id.
pub const CLIENT_ID_ENV: &str = "AIKIDO_CLIENT_ID";
/// Environment variable holding the fallback client secret.
pub const CLIENT_SECRET_ENV: &str = "AIKIDO_CLIENT_SECRET";
/// Environment variable overriding the API root.
pub const BASE_URL_ENV: &str = "AIKIDO_BASE_URL";

/// A single string configuration attribute as sent by the host.
#[derive(Clone, PartialEq, Eq)]
pub enum ConfigValue {
    /// Absent or explicitly null.
    Null,
    /// Not known until apply.
    Unknown,
    /// A concrete value.
    Known(String),
}

impl ConfigValue {
    fn parse(config: &Value, attribute: &str) -> Result<Self, Diagnostic> {
        match config.get(attribute) {
            None | Some(Value::Null) => Ok(Self::Null),
            Some(v) if is_unknown(v) => Ok(Self::Unknown),
            Some(Value::String(s)) => Ok(Self::Known(s.clone())),
            Some(_) => Err(Diagnostic::error(format!(
                "Invalid type for attribute '{}'",
                attribute
            ))
            .with_detail("Expected string")
            .with_attribute(attribute)),
        }
    }

    /// Whether the host could not compute the value yet.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    fn known(&self) -> Option<&str> {
        match self {
            Self::Known(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Unknown => f.write_str("Unknown"),
            Self::Known(_) => f.write_str("Known(<redacted>)"),
        }
    }
}

/// The provider configuration block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// `client_id` attribute.
    pub client_id: ConfigValue,
    /// `client_secret` attribute.
    pub client_secret: ConfigValue,
    /// `base_url` attribute.
    pub base_url: ConfigValue,
}

impl ProviderConfig {
    /// Read the configuration block, reporting attributes of the wrong type.
    pub fn from_value(config: &Value) -> Result<Self, Vec<Diagnostic>> {
        let client_id = ConfigValue::parse(config, "client_id");
        let client_secret = ConfigValue::parse(config, "client_secret");
        let base_url = ConfigValue::parse(config, "base_url");

        match (client_id, client_secret, base_url) {
            (Ok(client_id), Ok(client_secret), Ok(base_url)) => Ok(Self {
                client_id,
                client_secret,
                base_url,
            }),
            (id, secret, url) => Err([id.err(), secret.err(), url.err()]
                .into_iter()
                .flatten()
                .collect()),
        }
    }
}

/// Everything needed to build the API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// OAuth credentials.
    pub credentials: Credentials,
    /// API root.
    pub base_url: String,
}

/// Resolve credentials using `env` to look up fallback variables.
///
/// All problems with both credentials are reported together.
pub fn resolve_with<F>(config: &Value, env: F) -> Result<ResolvedConfig, Vec<Diagnostic>>
where
    F: Fn(&str) -> Option<String>,
{
    let config = ProviderConfig::from_value(config)?;

    let mut diagnostics = Vec::new();
    if config.client_id.is_unknown() {
        diagnostics.push(unknown_value("client_id", "Client Id", "client id", CLIENT_ID_ENV));
    }
    if config.client_secret.is_unknown() {
        diagnostics.push(unknown_value(
            "client_secret",
            "Client Secret",
            "client secret",
            CLIENT_SECRET_ENV,
        ));
    }
    if config.base_url.is_unknown() {
        diagnostics.push(unknown_value("base_url", "Base URL", "base URL", BASE_URL_ENV));
    }
    if has_errors(&diagnostics) {
        return Err(diagnostics);
    }

    let client_id = config
        .client_id
        .known()
        .map(str::to_string)
        .or_else(|| env(CLIENT_ID_ENV))
        .unwrap_or_default();
    let client_secret = config
        .client_secret
        .known()
        .map(str::to_string)
        .or_else(|| env(CLIENT_SECRET_ENV))
        .unwrap_or_default();

    if client_id.is_empty() {
        diagnostics.push(missing_value("client_id", "Client Id", "client id", CLIENT_ID_ENV));
    }
    if client_secret.is_empty() {
        diagnostics.push(missing_value(
            "client_secret",
            "Client Secret",
            "client secret",
            CLIENT_SECRET_ENV,
        ));
    }
    if has_errors(&diagnostics) {
        return Err(diagnostics);
    }

    let base_url = config
        .base_url
        .known()
        .map(str::to_string)
        .or_else(|| env(BASE_URL_ENV))
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| AIKIDO_API_BASE.to_string());

    Ok(ResolvedConfig {
        credentials: Credentials::new(client_id, client_secret),
        base_url,
    })
}

fn unknown_value(attribute: &str, title: &str, noun: &str, env_var: &str) -> Diagnostic {
    Diagnostic::error(format!("Unknown Aikido API {}", title))
        .with_detail(format!(
            "The provider cannot create the Aikido API client as there is an unknown \
             configuration value for the Aikido API {}. Either target apply the source of \
             the value first, set the value statically in the configuration, or use the {} \
             environment variable.",
            noun, env_var
        ))
        .with_attribute(attribute)
}

fn missing_value(attribute: &str, title: &str, noun: &str, env_var: &str) -> Diagnostic {
    Diagnostic::error(format!("Missing Aikido API {}", title))
        .with_detail(format!(
            "The provider cannot create the Aikido API client as there is a missing or empty \
             value for the Aikido API {}. Set the {} value in the configuration or use the {} \
             environment variable. If either is already set, ensure the value is not empty.",
            noun, attribute, env_var
        ))
        .with_attribute(attribute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNKNOWN_VALUE;
    use serde_json::json;
    use std::collections::HashMap;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_explicit_values_override_environment() {
        let resolved = resolve_with(
            &json!({"client_id": "cfg-id", "client_secret": "cfg-secret"}),
            env_of(&[(CLIENT_ID_ENV, "env-id"), (CLIENT_SECRET_ENV, "env-secret")]),
        )
        .unwrap();

        assert_eq!(resolved.credentials, Credentials::new("cfg-id", "cfg-secret"));
        assert_eq!(resolved.base_url, AIKIDO_API_BASE);
    }

    #[test]
    fn test_environment_fallback() {
        let resolved = resolve_with(
            &json!({"client_id": null}),
            env_of(&[
                (CLIENT_ID_ENV, "env-id"),
                (CLIENT_SECRET_ENV, "env-secret"),
                (BASE_URL_ENV, "http://localhost:9000"),
            ]),
        )
        .unwrap();

        assert_eq!(resolved.credentials, Credentials::new("env-id", "env-secret"));
        assert_eq!(resolved.base_url, "http://localhost:9000");
    }

    #[test]
    fn test_missing_credentials_name_attribute_and_variable() {
        let diagnostics = resolve_with(&json!({}), env_of(&[])).unwrap_err();

        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].summary, "Missing Aikido API Client Id");
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("client_id"));
        let detail = diagnostics[0].detail.as_deref().unwrap();
        assert!(detail.contains("client_id"));
        assert!(detail.contains(CLIENT_ID_ENV));

        assert_eq!(diagnostics[1].summary, "Missing Aikido API Client Secret");
        assert_eq!(diagnostics[1].attribute.as_deref(), Some("client_secret"));
        let detail = diagnostics[1].detail.as_deref().unwrap();
        assert!(detail.contains("client_secret"));
        assert!(detail.contains(CLIENT_SECRET_ENV));
    }

    #[test]
    fn test_empty_explicit_value_does_not_fall_back() {
        let diagnostics = resolve_with(
            &json!({"client_id": "", "client_secret": "s"}),
            env_of(&[(CLIENT_ID_ENV, "env-id")]),
        )
        .unwrap_err();

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("client_id"));
    }

    #[test]
    fn test_unknown_values_rejected_before_fallback() {
        let diagnostics = resolve_with(
            &json!({"client_id": UNKNOWN_VALUE, "client_secret": UNKNOWN_VALUE}),
            env_of(&[(CLIENT_ID_ENV, "env-id"), (CLIENT_SECRET_ENV, "env-secret")]),
        )
        .unwrap_err();

        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].summary, "Unknown Aikido API Client Id");
        assert_eq!(diagnostics[1].summary, "Unknown Aikido API Client Secret");
    }

    #[test]
    fn test_wrong_type_reported() {
        let diagnostics = resolve_with(&json!({"client_id": 42}), env_of(&[])).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("client_id"));
    }

    #[test]
    fn test_config_debug_redacts_values() {
        let config =
            ProviderConfig::from_value(&json!({"client_id": "id-123", "client_secret": "shh"}))
                .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("id-123"));
        assert!(!debug.contains("shh"));
    }
}
