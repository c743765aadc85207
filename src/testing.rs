//! Testing utilities for the provider.
//!
//! [`ProviderTester`] drives a [`ProviderService`] without a gRPC server and
//! [`FakeAikido`] stands in for the Aikido API, recording every call.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use terraform_provider_aikido::testing::{FakeAikido, ProviderTester};
//! use terraform_provider_aikido::AikidoProvider;
//!
//! # tokio_test::block_on(async {
//! let fake = Arc::new(FakeAikido::new());
//! let tester = ProviderTester::new(AikidoProvider::with_client("test", fake.clone()));
//! tester
//!     .configure(json!({"client_id": "id", "client_secret": "secret"}))
//!     .await
//!     .unwrap();
//!
//! let state = tester
//!     .lifecycle_create("aikido_team", json!({"name": "Platform"}))
//!     .await
//!     .unwrap();
//! assert_eq!(state["name"], "Platform");
//! assert_eq!(fake.teams().len(), 1);
//! # });
//! ```

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{
    AikidoApi, ClientError, CreateTeamRequest, ListTeamsFilters, ListUsersFilters,
    Responsibility, Team, UpdateTeamRequest, User,
};
use crate::error::ProviderError;
use crate::schema::{has_errors, Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// A test harness for provider implementations.
///
/// Wraps a `ProviderService` and exposes simplified methods for testing
/// without a gRPC server.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider, failing on any error diagnostic.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Read data from a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run plan → create → read and return the state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read(resource_type, created_state).await
    }

    /// Run plan → update → read and return the state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read(resource_type, updated_state).await
    }

    /// Run plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Run create → update → delete, returning the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created_state = self.lifecycle_create(resource_type, initial_config).await?;
        let updated_state = self
            .lifecycle_update(resource_type, created_state, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated_state.clone())
            .await?;
        Ok(updated_state)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    if has_errors(&diagnostics) {
        Err(TestError::Diagnostics(
            diagnostics.into_iter().filter(Diagnostic::is_error).collect(),
        ))
    } else {
        Ok(())
    }
}

// =========================================================================
// Fake Aikido API
// =========================================================================

/// A call received by [`FakeAikido`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// `create_team` with the requested name.
    CreateTeam {
        /// Requested team name.
        name: String,
    },
    /// `update_team` with the full request.
    UpdateTeam(UpdateTeamRequest),
    /// `delete_team` with the team id.
    DeleteTeam(i64),
    /// `list_teams` with the page requested.
    ListTeams(ListTeamsFilters),
    /// `list_users` with the filters used.
    ListUsers(ListUsersFilters),
}

/// Operations of [`AikidoApi`], used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOperation {
    /// `create_team`
    CreateTeam,
    /// `update_team`
    UpdateTeam,
    /// `delete_team`
    DeleteTeam,
    /// `list_teams`
    ListTeams,
    /// `list_users`
    ListUsers,
}

#[derive(Default)]
struct FakeState {
    teams: Vec<Team>,
    users: Vec<User>,
    last_id: i64,
    calls: Vec<ApiCall>,
    failure: Option<(FakeOperation, u16, String)>,
    vanish_on_update: bool,
}

/// In-memory [`AikidoApi`].
///
/// Teams get sequential ids starting at 1 and are listed in insertion order,
/// paginated like the real API. Failures can be injected per operation.
#[derive(Default)]
pub struct FakeAikido {
    state: Mutex<FakeState>,
}

impl FakeAikido {
    /// Create an empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a team without recording a call, returning its id.
    pub fn insert_team(
        &self,
        name: impl Into<String>,
        responsibilities: Vec<Responsibility>,
    ) -> i64 {
        let mut state = self.lock();
        state.last_id += 1;
        let id = state.last_id;
        state.teams.push(Team {
            id,
            name: name.into(),
            responsibilities,
        });
        id
    }

    /// Add a user to the listing.
    pub fn insert_user(&self, user: User) {
        self.lock().users.push(user);
    }

    /// Fail every call to `operation` with an API error.
    pub fn fail_on(&self, operation: FakeOperation, status: u16, message: impl Into<String>) {
        self.lock().failure = Some((operation, status, message.into()));
    }

    /// Remove the team from the listing as soon as it is updated.
    pub fn vanish_on_update(&self) {
        self.lock().vanish_on_update = true;
    }

    /// Snapshot of the stored teams.
    pub fn teams(&self) -> Vec<Team> {
        self.lock().teams.clone()
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Number of `list_teams` calls received so far.
    pub fn list_team_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, ApiCall::ListTeams(_)))
            .count()
    }

    fn record(
        &self,
        operation: FakeOperation,
        call: ApiCall,
    ) -> Result<MutexGuard<'_, FakeState>, ClientError> {
        let mut state = self.lock();
        state.calls.push(call);
        if let Some((failing, status, message)) = &state.failure {
            if *failing == operation {
                return Err(ClientError::Api {
                    status: *status,
                    message: message.clone(),
                });
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl AikidoApi for FakeAikido {
    async fn create_team(&self, request: &CreateTeamRequest) -> Result<i64, ClientError> {
        let mut state = self.record(
            FakeOperation::CreateTeam,
            ApiCall::CreateTeam {
                name: request.name.clone(),
            },
        )?;
        state.last_id += 1;
        let id = state.last_id;
        state.teams.push(Team {
            id,
            name: request.name.clone(),
            responsibilities: Vec::new(),
        });
        Ok(id)
    }

    async fn update_team(&self, request: &UpdateTeamRequest) -> Result<(), ClientError> {
        let mut state =
            self.record(FakeOperation::UpdateTeam, ApiCall::UpdateTeam(request.clone()))?;
        if state.vanish_on_update {
            state.teams.retain(|team| team.id != request.id);
            return Ok(());
        }
        match state.teams.iter_mut().find(|team| team.id == request.id) {
            Some(team) => {
                team.name = request.name.clone();
                team.responsibilities = request.responsibilities.clone();
                Ok(())
            },
            None => Err(ClientError::Api {
                status: 404,
                message: format!("team {} not found", request.id),
            }),
        }
    }

    async fn delete_team(&self, id: i64) -> Result<(), ClientError> {
        let mut state = self.record(FakeOperation::DeleteTeam, ApiCall::DeleteTeam(id))?;
        let before = state.teams.len();
        state.teams.retain(|team| team.id != id);
        if state.teams.len() == before {
            return Err(ClientError::Api {
                status: 404,
                message: format!("team {} not found", id),
            });
        }
        Ok(())
    }

    async fn list_teams(&self, filters: ListTeamsFilters) -> Result<Vec<Team>, ClientError> {
        let state = self.record(FakeOperation::ListTeams, ApiCall::ListTeams(filters))?;
        let per_page = filters.per_page as usize;
        Ok(state
            .teams
            .iter()
            .skip(filters.page as usize * per_page)
            .take(per_page)
            .cloned()
            .collect())
    }

    async fn list_users(&self, filters: ListUsersFilters) -> Result<Vec<User>, ClientError> {
        let state = self.record(FakeOperation::ListUsers, ApiCall::ListUsers(filters))?;
        Ok(state
            .users
            .iter()
            .filter(|user| filters.include_inactive || user.active != 0)
            .cloned()
            .collect())
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan updates in place rather than replacing.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResponsibilityType;
    use crate::provider::AikidoProvider;
    use crate::resources::{TEAM_TYPE_NAME, USERS_TYPE_NAME};
    use serde_json::json;
    use std::sync::Arc;

    async fn configured(fake: &Arc<FakeAikido>) -> ProviderTester<AikidoProvider> {
        let tester = ProviderTester::new(
            AikidoProvider::with_client("test", fake.clone()).with_env(|_| None),
        );
        tester
            .configure(json!({"client_id": "id", "client_secret": "secret"}))
            .await
            .unwrap();
        tester
    }

    #[tokio::test]
    async fn test_tester_types() {
        let fake = Arc::new(FakeAikido::new());
        let tester = configured(&fake).await;
        assert_eq!(tester.resource_types(), vec![TEAM_TYPE_NAME]);
        assert_eq!(tester.data_source_types(), vec![USERS_TYPE_NAME]);
        assert!(tester.schema().resources.contains_key(TEAM_TYPE_NAME));
    }

    #[tokio::test]
    async fn test_tester_configure_reports_diagnostics() {
        let tester = ProviderTester::new(
            AikidoProvider::with_client("test", Arc::new(FakeAikido::new())).with_env(|_| None),
        );
        let err = tester.configure(json!({})).await.unwrap_err();
        match err {
            TestError::Diagnostics(diagnostics) => assert_eq!(diagnostics.len(), 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_tester_plan_create() {
        let fake = Arc::new(FakeAikido::new());
        let tester = configured(&fake).await;
        let plan = tester
            .plan_create(TEAM_TYPE_NAME, json!({"name": "Platform"}))
            .await
            .unwrap();

        assert_plan_creates(&plan);
        assert_plan_changes_attribute(&plan, "name");
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_tester_lifecycle_crud() {
        let fake = Arc::new(FakeAikido::new());
        let tester = configured(&fake).await;

        let final_state = tester
            .lifecycle_crud(
                TEAM_TYPE_NAME,
                json!({"name": "initial"}),
                json!({
                    "name": "updated",
                    "responsibilities": [{"id": 8, "type": "domain"}]
                }),
            )
            .await
            .unwrap();

        assert_eq!(final_state["name"], "updated");
        assert_eq!(final_state["responsibilities"][0]["type"], "domain");
        assert!(fake.teams().is_empty());
    }

    #[tokio::test]
    async fn test_tester_plan_update() {
        let fake = Arc::new(FakeAikido::new());
        let tester = configured(&fake).await;
        let state = tester
            .lifecycle_create(TEAM_TYPE_NAME, json!({"name": "same"}))
            .await
            .unwrap();

        let plan = tester
            .plan_update(TEAM_TYPE_NAME, state.clone(), state.clone())
            .await
            .unwrap();
        assert_plan_no_changes(&plan);

        let plan = tester
            .plan_update(TEAM_TYPE_NAME, state, json!({"name": "other"}))
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "name");
    }

    #[tokio::test]
    async fn test_fake_paginates_in_insertion_order() {
        let fake = FakeAikido::new();
        for i in 0..12 {
            fake.insert_team(format!("t{}", i), vec![]);
        }

        let page = fake.list_teams(ListTeamsFilters::page(1)).await.unwrap();
        assert_eq!(
            page.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![11, 12]
        );
        assert!(fake
            .list_teams(ListTeamsFilters::page(2))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(fake.list_team_calls(), 2);
    }

    #[tokio::test]
    async fn test_fake_update_replaces_responsibilities() {
        let fake = FakeAikido::new();
        let id = fake.insert_team(
            "t",
            vec![Responsibility {
                id: 1,
                kind: ResponsibilityType::Cloud,
            }],
        );

        fake.update_team(&UpdateTeamRequest {
            id,
            name: "t".to_string(),
            responsibilities: vec![],
        })
        .await
        .unwrap();

        assert!(fake.teams()[0].responsibilities.is_empty());
    }

    #[tokio::test]
    async fn test_fake_injected_failure() {
        let fake = FakeAikido::new();
        fake.fail_on(FakeOperation::CreateTeam, 500, "down");

        let err = fake
            .create_team(&CreateTeamRequest {
                name: "t".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 500, .. }));
        assert!(fake.teams().is_empty());
        assert_eq!(fake.calls().len(), 1);
    }

    #[test]
    fn test_assert_no_errors() {
        let diagnostics = vec![Diagnostic::warning("Just a warning")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        let diagnostics = vec![Diagnostic::error("An error")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("Missing Aikido API Client Id").with_attribute("client_id"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("Missing Aikido API Client Id"));
        assert!(display.contains("Second error"));
        assert!(display.contains("client_id"));
        assert!(display.contains("More info"));
    }
}
