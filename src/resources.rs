//! Resource and data source handlers.
//!
//! Each handler owns one entity type and receives the shared API client when
//! the provider is configured. The set of handlers is closed: the provider root
//! dispatches to them by type name.

pub mod team;
pub mod users;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::Schema;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::{describe, validate_result};

pub use team::{find_team, team_schema, TeamResource, TeamState, TEAM_TYPE_NAME};
pub use users::{users_schema, UsersDataSource, UsersState, USERS_TYPE_NAME};

/// A managed entity with a full create/read/update/delete lifecycle.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Fully qualified type name, e.g. `aikido_team`.
    fn type_name(&self) -> &'static str;

    /// Schema of the resource's configuration and state.
    fn schema(&self) -> Schema;

    /// Compute the planned state. `proposed_state` is null for a destroy plan.
    fn plan(
        &self,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create the remote entity and return the state to persist.
    async fn create(&self, planned_state: Value) -> Result<Value, ProviderError>;

    /// Refresh state from the remote entity.
    async fn read(&self, current_state: Value) -> Result<Value, ProviderError>;

    /// Apply planned changes to the remote entity.
    async fn update(&self, prior_state: Value, planned_state: Value)
        -> Result<Value, ProviderError>;

    /// Delete the remote entity.
    async fn delete(&self, current_state: Value) -> Result<(), ProviderError>;

    /// Bring an existing remote entity under management.
    async fn import(&self, id: &str) -> Result<Vec<ImportedResource>, ProviderError>;
}

/// A read-only projection of remote data.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fully qualified type name, e.g. `aikido_users`.
    fn type_name(&self) -> &'static str;

    /// Schema of the data source.
    fn schema(&self) -> Schema;

    /// Fetch the data and return the resulting state.
    async fn read(&self, config: Value) -> Result<Value, ProviderError>;
}

/// Check `value` against `schema`, folding all diagnostics into one error.
pub(crate) fn ensure_valid(schema: &Schema, value: &Value) -> Result<(), ProviderError> {
    validate_result(schema, value).map_err(|diagnostics| {
        ProviderError::Validation(describe(&diagnostics))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, StringValidator};
    use serde_json::json;

    #[test]
    fn test_ensure_valid_folds_diagnostics() {
        let schema = Schema::v0()
            .with_attribute(
                "name",
                Attribute::required_string().with_validator(StringValidator::length_at_least(1)),
            )
            .with_attribute("kind", Attribute::required_string());

        assert!(ensure_valid(&schema, &json!({"name": "a", "kind": "b"})).is_ok());

        let err = ensure_valid(&schema, &json!({"name": ""})).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(err.message().contains("kind"));
        assert!(err.message().contains("name"));
    }
}
