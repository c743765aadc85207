//! The Aikido provider root.
//!
//! Resolves credentials on `Configure`, builds the API client once and hands it
//! to every resource and data source handler. Each RPC is then dispatched to
//! the handler owning the requested type name.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::{debug, info};

use crate::client::{AikidoApi, AikidoClient, ClientError};
use crate::config::{self, ResolvedConfig};
use crate::error::ProviderError;
use crate::resources::{
    team_schema, users_schema, DataSource, Resource, TeamResource, UsersDataSource,
    TEAM_TYPE_NAME, USERS_TYPE_NAME,
};
use crate::schema::{Attribute, Diagnostic, ProviderSchema, Schema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult, ProviderMetadata};
use crate::validation::validate;

/// Provider type name, the prefix of every resource and data source name.
pub const PROVIDER_TYPE_NAME: &str = "aikido";

/// Builds the API client from resolved configuration.
pub type ClientFactory =
    Arc<dyn Fn(&ResolvedConfig) -> Result<Arc<dyn AikidoApi>, ClientError> + Send + Sync>;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Schema of the provider configuration block.
pub fn provider_config_schema() -> Schema {
    Schema::v0()
        .with_description("Interact with the Aikido Security public API.")
        .with_attribute(
            "client_id",
            Attribute::optional_string().with_description(format!(
                "OAuth client id. May also be provided via the {} environment variable.",
                config::CLIENT_ID_ENV
            )),
        )
        .with_attribute(
            "client_secret",
            Attribute::optional_string()
                .sensitive()
                .with_description(format!(
                    "OAuth client secret. May also be provided via the {} environment variable.",
                    config::CLIENT_SECRET_ENV
                )),
        )
        .with_attribute(
            "base_url",
            Attribute::optional_string().with_description(format!(
                "Aikido API root. May also be provided via the {} environment variable.",
                config::BASE_URL_ENV
            )),
        )
}

struct Handlers {
    resources: Vec<Box<dyn Resource>>,
    data_sources: Vec<Box<dyn DataSource>>,
}

impl Handlers {
    fn new(client: Arc<dyn AikidoApi>) -> Self {
        Self {
            resources: vec![Box::new(TeamResource::new(Arc::clone(&client)))],
            data_sources: vec![Box::new(UsersDataSource::new(client))],
        }
    }

    fn resource(&self, type_name: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .iter()
            .find(|r| r.type_name() == type_name)
            .map(|r| &**r)
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    fn data_source(&self, type_name: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .iter()
            .find(|d| d.type_name() == type_name)
            .map(|d| &**d)
            .ok_or_else(|| {
                ProviderError::UnknownResource(format!("data source {}", type_name))
            })
    }
}

/// The `aikido` provider.
pub struct AikidoProvider {
    version: String,
    factory: ClientFactory,
    env: EnvLookup,
    handlers: OnceLock<Handlers>,
}

impl AikidoProvider {
    /// Create a provider that talks to the real Aikido API.
    pub fn new(version: impl Into<String>) -> Self {
        Self::with_client_factory(version, |config: &ResolvedConfig| {
            let client =
                AikidoClient::with_base_url(config.credentials.clone(), config.base_url.clone())?;
            Ok(Arc::new(client) as Arc<dyn AikidoApi>)
        })
    }

    /// Create a provider whose client is built by `factory`.
    pub fn with_client_factory<F>(version: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ResolvedConfig) -> Result<Arc<dyn AikidoApi>, ClientError> + Send + Sync + 'static,
    {
        Self {
            version: version.into(),
            factory: Arc::new(factory),
            env: Arc::new(|name: &str| std::env::var(name).ok()),
            handlers: OnceLock::new(),
        }
    }

    /// Create a provider that always uses `client`, whatever the credentials.
    pub fn with_client(version: impl Into<String>, client: Arc<dyn AikidoApi>) -> Self {
        Self::with_client_factory(version, move |_| Ok(Arc::clone(&client)))
    }

    /// Replace the environment lookup used for credential fallback.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    /// Provider version reported in metadata.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether `Configure` has completed successfully.
    pub fn is_configured(&self) -> bool {
        self.handlers.get().is_some()
    }

    fn handlers(&self) -> Result<&Handlers, ProviderError> {
        self.handlers
            .get()
            .ok_or_else(|| ProviderError::FailedPrecondition("provider not configured".to_string()))
    }

    fn resource(&self, type_name: &str) -> Result<&dyn Resource, ProviderError> {
        self.handlers()?.resource(type_name)
    }

    fn data_source(&self, type_name: &str) -> Result<&dyn DataSource, ProviderError> {
        self.handlers()?.data_source(type_name)
    }
}

impl fmt::Debug for AikidoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AikidoProvider")
            .field("version", &self.version)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

fn already_configured() -> Diagnostic {
    Diagnostic::error("Provider already configured")
        .with_detail("The Aikido provider can only be configured once per session.")
}

#[async_trait::async_trait]
impl ProviderService for AikidoProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(provider_config_schema())
            .with_resource(TEAM_TYPE_NAME, team_schema())
            .with_data_source(USERS_TYPE_NAME, users_schema())
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            type_name: PROVIDER_TYPE_NAME.to_string(),
            version: self.version.clone(),
            resources: vec![TEAM_TYPE_NAME.to_string()],
            data_sources: vec![USERS_TYPE_NAME.to_string()],
            capabilities: Default::default(),
        }
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&provider_config_schema(), &config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        if self.is_configured() {
            return Ok(vec![already_configured()]);
        }

        let env = Arc::clone(&self.env);
        let resolved = match config::resolve_with(&config, move |name| env(name)) {
            Ok(resolved) => resolved,
            Err(diagnostics) => return Ok(diagnostics),
        };

        let client = match (self.factory)(&resolved) {
            Ok(client) => client,
            Err(e) => {
                return Ok(vec![Diagnostic::error("Unable to Create Aikido API Client")
                    .with_detail(e.to_string())]);
            },
        };

        if self.handlers.set(Handlers::new(client)).is_err() {
            return Ok(vec![already_configured()]);
        }

        info!(base_url = %resolved.base_url, "Aikido provider configured");
        Ok(vec![])
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        debug!("Aikido provider stopping");
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match resource_type {
            TEAM_TYPE_NAME => Ok(validate(&team_schema(), &config)),
            other => Err(ProviderError::UnknownResource(other.to_string())),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.resource(resource_type)?
            .plan(prior_state, proposed_state)
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.resource(resource_type)?.create(planned_state).await
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.resource(resource_type)?.read(current_state).await
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.resource(resource_type)?
            .update(prior_state, planned_state)
            .await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.resource(resource_type)?.delete(current_state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.resource(resource_type)?.import(id).await
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match data_source_type {
            USERS_TYPE_NAME => Ok(validate(&users_schema(), &config)),
            other => Err(ProviderError::UnknownResource(format!("data source {}", other))),
        }
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.data_source(data_source_type)?.read(config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_error_contains, assert_no_errors, FakeAikido};
    use crate::types::UNKNOWN_VALUE;
    use serde_json::json;
    use std::sync::Mutex;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn configured_config() -> Value {
        json!({"client_id": "id", "client_secret": "secret"})
    }

    fn provider(fake: &Arc<FakeAikido>) -> AikidoProvider {
        AikidoProvider::with_client("test", fake.clone()).with_env(no_env)
    }

    #[test]
    fn test_metadata() {
        let provider = provider(&Arc::new(FakeAikido::new()));
        let metadata = provider.metadata();
        assert_eq!(metadata.type_name, "aikido");
        assert_eq!(metadata.version, "test");
        assert_eq!(metadata.resources, vec!["aikido_team"]);
        assert_eq!(metadata.data_sources, vec!["aikido_users"]);
    }

    #[test]
    fn test_schema_marks_secret_sensitive() {
        let schema = provider(&Arc::new(FakeAikido::new())).schema();
        let attrs = &schema.provider.block.attributes;
        assert!(attrs["client_secret"].flags.sensitive);
        assert!(attrs["client_id"].flags.optional);
        assert!(!attrs["client_id"].flags.sensitive);
        assert!(schema.resources.contains_key(TEAM_TYPE_NAME));
        assert!(schema.data_sources.contains_key(USERS_TYPE_NAME));
    }

    #[tokio::test]
    async fn test_crud_before_configure_fails() {
        let provider = provider(&Arc::new(FakeAikido::new()));
        let err = provider
            .read(TEAM_TYPE_NAME, json!({"id": 1, "name": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
        assert_eq!(err.message(), "provider not configured");

        let err = provider
            .read_data_source(USERS_TYPE_NAME, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_configure_once() {
        let provider = provider(&Arc::new(FakeAikido::new()));
        assert_no_errors(&provider.configure(configured_config()).await.unwrap());
        assert!(provider.is_configured());

        let diagnostics = provider.configure(configured_config()).await.unwrap();
        assert_error_contains(&diagnostics, "already configured");
    }

    #[tokio::test]
    async fn test_configure_missing_credentials() {
        let provider = provider(&Arc::new(FakeAikido::new()));
        let diagnostics = provider.configure(json!({})).await.unwrap();

        assert_error_contains(&diagnostics, "Missing Aikido API Client Id");
        assert_error_contains(&diagnostics, "Missing Aikido API Client Secret");
        assert!(!provider.is_configured());
    }

    #[tokio::test]
    async fn test_configure_unknown_credentials() {
        let provider = provider(&Arc::new(FakeAikido::new())).with_env(|name| {
            Some(format!("{}-from-env", name))
        });
        let diagnostics = provider
            .configure(json!({"client_id": UNKNOWN_VALUE, "client_secret": "s"}))
            .await
            .unwrap();

        assert_eq!(diagnostics.len(), 1);
        assert_error_contains(&diagnostics, "Unknown Aikido API Client Id");
        assert!(!provider.is_configured());
    }

    #[tokio::test]
    async fn test_factory_receives_resolved_config() {
        let seen: Arc<Mutex<Option<ResolvedConfig>>> = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&seen);
        let fake: Arc<dyn AikidoApi> = Arc::new(FakeAikido::new());

        let provider = AikidoProvider::with_client_factory("test", move |config| {
            *captured.lock().unwrap() = Some(config.clone());
            Ok(Arc::clone(&fake))
        })
        .with_env(|name| match name {
            config::CLIENT_SECRET_ENV => Some("env-secret".to_string()),
            config::BASE_URL_ENV => Some("http://127.0.0.1:9".to_string()),
            _ => None,
        });

        assert_no_errors(
            &provider
                .configure(json!({"client_id": "cfg-id"}))
                .await
                .unwrap(),
        );

        let seen = seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.credentials.client_id, "cfg-id");
        assert_eq!(seen.credentials.client_secret, "env-secret");
        assert_eq!(seen.base_url, "http://127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_factory_error_becomes_diagnostic() {
        let provider = AikidoProvider::new("test").with_env(no_env);
        let diagnostics = provider
            .configure(json!({
                "client_id": "id",
                "client_secret": "secret",
                "base_url": "ftp://nowhere"
            }))
            .await
            .unwrap();

        assert_error_contains(&diagnostics, "Unable to Create Aikido API Client");
        assert!(!provider.is_configured());
    }

    #[tokio::test]
    async fn test_unknown_types() {
        let provider = provider(&Arc::new(FakeAikido::new()));
        provider.configure(configured_config()).await.unwrap();

        let err = provider.read("aikido_widget", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = provider
            .read_data_source("aikido_widgets", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = provider
            .validate_resource_config("aikido_widget", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_validate_resource_config_runs_validators() {
        let provider = provider(&Arc::new(FakeAikido::new()));
        let diagnostics = provider
            .validate_resource_config(
                TEAM_TYPE_NAME,
                json!({"name": "", "responsibilities": [{"id": 1, "type": "bucket"}]}),
            )
            .await
            .unwrap();

        assert_eq!(diagnostics.len(), 2);
        assert_error_contains(&diagnostics, "name");
        assert_error_contains(&diagnostics, "responsibilities.0.type");
    }

    #[tokio::test]
    async fn test_validate_provider_config_types() {
        let provider = provider(&Arc::new(FakeAikido::new()));
        assert_no_errors(
            &provider
                .validate_provider_config(json!({"client_id": UNKNOWN_VALUE}))
                .await
                .unwrap(),
        );

        let diagnostics = provider
            .validate_provider_config(json!({"client_secret": 5}))
            .await
            .unwrap();
        assert_error_contains(&diagnostics, "client_secret");
    }
}
