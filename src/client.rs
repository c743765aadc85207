//! Aikido public API client.
//!
//! Covers exactly the surface the provider consumes: team CRUD, paginated team
//! listing and filtered user listing. Handlers talk to the API through the
//! [`AikidoApi`] trait so they can be exercised against an in-memory fake.

mod error;
mod http;
mod types;

use std::fmt;

use async_trait::async_trait;

pub use error::ClientError;
pub use http::{AikidoClient, AIKIDO_API_BASE};
pub use types::{
    CreateTeamRequest, ListTeamsFilters, ListUsersFilters, Responsibility, ResponsibilityType,
    Team, UpdateTeamRequest, User, DEFAULT_PAGE_SIZE,
};

/// OAuth client credentials for the Aikido API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

impl Credentials {
    /// Bundle a client id and secret.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

// NOTE: Secrets must never reach logs, so Debug redacts them
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Team and user operations of the Aikido public API.
///
/// Update is a full replacement: the responsibilities sent become the team's
/// complete responsibility set.
#[async_trait]
pub trait AikidoApi: Send + Sync {
    /// Create a team and return its new identifier.
    ///
    /// The create endpoint only accepts a name; responsibilities have to be
    /// set with a follow-up [`AikidoApi::update_team`].
    async fn create_team(&self, request: &CreateTeamRequest) -> Result<i64, ClientError>;

    /// Replace a team's name and responsibilities.
    async fn update_team(&self, request: &UpdateTeamRequest) -> Result<(), ClientError>;

    /// Delete a team by identifier.
    async fn delete_team(&self, id: i64) -> Result<(), ClientError>;

    /// List one page of teams. An empty page marks the end of the data.
    async fn list_teams(&self, filters: ListTeamsFilters) -> Result<Vec<Team>, ClientError>;

    /// List users matching the filters.
    async fn list_users(&self, filters: ListUsersFilters) -> Result<Vec<User>, ClientError>;
}
