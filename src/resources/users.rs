//! The `aikido_users` data source.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use super::DataSource;
use crate::client::{AikidoApi, ListUsersFilters, User};
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

/// Type name of the users data source.
pub const USERS_TYPE_NAME: &str = "aikido_users";

/// State produced by a read: every user, in API order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersState {
    /// Users as reported by the API.
    pub users: Vec<User>,
}

/// Schema of `aikido_users`.
pub fn users_schema() -> Schema {
    let user = AttributeType::object([
        ("id", AttributeType::Int64),
        ("full_name", AttributeType::String),
        ("email", AttributeType::String),
        ("active", AttributeType::Int64),
        ("last_login_timestamp", AttributeType::Int64),
        ("role", AttributeType::String),
        ("auth_type", AttributeType::String),
    ]);

    Schema::v0()
        .with_description("All active users of the Aikido workspace.")
        .with_attribute(
            "users",
            Attribute::new(AttributeType::list(user), AttributeFlags::computed())
                .with_description("Users of the workspace"),
        )
}

/// Handler for `aikido_users`.
pub struct UsersDataSource {
    client: Arc<dyn AikidoApi>,
}

impl UsersDataSource {
    /// Create a handler using `client` for the listing.
    pub fn new(client: Arc<dyn AikidoApi>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for UsersDataSource {
    fn type_name(&self) -> &'static str {
        USERS_TYPE_NAME
    }

    fn schema(&self) -> Schema {
        users_schema()
    }

    #[instrument(skip_all, fields(data_source_type = USERS_TYPE_NAME))]
    async fn read(&self, _config: Value) -> Result<Value, ProviderError> {
        let users = self
            .client
            .list_users(ListUsersFilters::default())
            .await
            .map_err(|e| ProviderError::from(e).with_context("Unable to read Aikido users"))?;

        info!(count = users.len(), "Users listed");
        Ok(serde_json::to_value(UsersState { users })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ApiCall, FakeAikido, FakeOperation};
    use serde_json::json;

    fn user(id: i64, name: &str) -> User {
        User {
            id,
            full_name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            active: 1,
            last_login_timestamp: 1_700_000_000,
            role: "member".to_string(),
            auth_type: "github".to_string(),
        }
    }

    #[tokio::test]
    async fn test_read_maps_every_user_in_order() {
        let fake = Arc::new(FakeAikido::new());
        fake.insert_user(user(2, "Grace"));
        fake.insert_user(user(1, "Ada"));

        let state = UsersDataSource::new(fake.clone())
            .read(Value::Null)
            .await
            .unwrap();

        let users = state["users"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["id"], 2);
        assert_eq!(users[1]["full_name"], "Ada");
        assert_eq!(users[1]["email"], "ada@example.com");
        assert_eq!(users[1]["active"], 1);
        assert_eq!(users[1]["last_login_timestamp"], 1_700_000_000);
        assert_eq!(users[1]["role"], "member");
        assert_eq!(users[1]["auth_type"], "github");

        assert_eq!(
            fake.calls(),
            vec![ApiCall::ListUsers(ListUsersFilters {
                team_id: None,
                include_inactive: false,
            })]
        );
    }

    #[tokio::test]
    async fn test_read_with_no_users_is_empty_list() {
        let fake = Arc::new(FakeAikido::new());
        let state = UsersDataSource::new(fake).read(json!({})).await.unwrap();
        assert_eq!(state, json!({"users": []}));
    }

    #[tokio::test]
    async fn test_read_failure() {
        let fake = Arc::new(FakeAikido::new());
        fake.fail_on(FakeOperation::ListUsers, 401, "token expired");

        let err = UsersDataSource::new(fake).read(json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::PermissionDenied(_)));
        assert!(err.message().contains("Unable to read Aikido users"));
    }

    #[test]
    fn test_schema_is_computed_list() {
        let schema = users_schema();
        let users = &schema.block.attributes["users"];
        assert!(users.flags.computed);
        assert!(!users.flags.optional);
        assert!(matches!(users.attr_type, AttributeType::List(_)));
    }
}
