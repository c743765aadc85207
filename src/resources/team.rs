//! The `aikido_team` resource.
//!
//! The API has no "get team" endpoint, so every read resolves the team by
//! scanning the paginated team listing with [`find_team`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::{ensure_valid, Resource};
use crate::client::{
    AikidoApi, ClientError, CreateTeamRequest, ListTeamsFilters, Responsibility,
    ResponsibilityType, Team, UpdateTeamRequest,
};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock, Schema, StringValidator};
use crate::types::{is_unknown, AttributeChange, ImportedResource, PlanResult};

/// Type name of the team resource.
pub const TEAM_TYPE_NAME: &str = "aikido_team";

/// Persisted state of a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamState {
    /// Remote identifier, absent until the team is created.
    #[serde(default, deserialize_with = "known_id")]
    pub id: Option<i64>,
    /// Team name.
    pub name: String,
    /// Complete, ordered responsibility set.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub responsibilities: Vec<Responsibility>,
}

impl TeamState {
    fn from_value(value: Value) -> Result<Self, ProviderError> {
        Ok(serde_json::from_value(value)?)
    }

    fn to_value(&self) -> Result<Value, ProviderError> {
        Ok(serde_json::to_value(self)?)
    }

    fn require_id(&self) -> Result<i64, ProviderError> {
        self.id.ok_or_else(|| {
            ProviderError::InvalidRequest(format!("team '{}' has no id in state", self.name))
        })
    }
}

impl From<Team> for TeamState {
    fn from(team: Team) -> Self {
        Self {
            id: Some(team.id),
            name: team.name,
            responsibilities: team.responsibilities,
        }
    }
}

// NOTE: A computed id the host has not resolved yet arrives as the unknown sentinel
fn known_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() || is_unknown(&value) {
        return Ok(None);
    }
    value
        .as_i64()
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("expected integer id, got {}", value)))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Responsibility>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Responsibility>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Schema of `aikido_team`.
pub fn team_schema() -> Schema {
    let responsibility = Block::new()
        .with_attribute(
            "id",
            Attribute::required_int64()
                .with_description("ID of the resource the team is responsible for"),
        )
        .with_attribute(
            "type",
            Attribute::required_string()
                .with_description("Type of resource the team is responsible for")
                .with_validator(StringValidator::one_of(
                    ResponsibilityType::ALL.iter().map(|kind| kind.as_str()),
                )),
        );

    Schema::v0()
        .with_description("An Aikido team and the resources it is responsible for.")
        .with_attribute(
            "id",
            Attribute::computed_int64().with_description("ID of the team"),
        )
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_description("Name of the team")
                .with_validator(StringValidator::length_at_least(1)),
        )
        .with_block("responsibilities", NestedBlock::list(responsibility))
}

/// Scan the team listing page by page for the team with `id`.
///
/// Pages are requested from 0 upward with the default page size. The scan
/// stops at the first page containing the team or at the first empty page. A
/// short page does not end the scan, so a miss always costs one extra call.
pub async fn find_team(client: &dyn AikidoApi, id: i64) -> Result<Option<Team>, ClientError> {
    let mut page = 0;
    loop {
        let teams = client.list_teams(ListTeamsFilters::page(page)).await?;
        if teams.is_empty() {
            debug!(team_id = id, pages = page + 1, "Team not found");
            return Ok(None);
        }
        if let Some(team) = teams.into_iter().find(|team| team.id == id) {
            debug!(team_id = id, page, "Team found");
            return Ok(Some(team));
        }
        page += 1;
    }
}

/// Handler for `aikido_team`.
pub struct TeamResource {
    client: Arc<dyn AikidoApi>,
}

impl TeamResource {
    /// Create a handler using `client` for every remote call.
    pub fn new(client: Arc<dyn AikidoApi>) -> Self {
        Self { client }
    }

    async fn fetch(&self, id: i64) -> Result<Option<TeamState>, ProviderError> {
        let team = find_team(self.client.as_ref(), id)
            .await
            .map_err(|e| ProviderError::from(e).with_context("Could not list teams from Aikido"))?;
        Ok(team.map(TeamState::from))
    }

    fn validated(&self, planned_state: Value) -> Result<TeamState, ProviderError> {
        ensure_valid(&team_schema(), &planned_state)?;
        TeamState::from_value(planned_state)
    }
}

#[async_trait]
impl Resource for TeamResource {
    fn type_name(&self) -> &'static str {
        TEAM_TYPE_NAME
    }

    fn schema(&self) -> Schema {
        team_schema()
    }

    fn plan(
        &self,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        let prior = prior_state.filter(|state| !state.is_null());

        if proposed_state.is_null() {
            return Ok(match prior {
                Some(prior) => PlanResult::with_changes(
                    Value::Null,
                    vec![AttributeChange::removed("id", prior["id"].clone())],
                    false,
                ),
                None => PlanResult::no_change(Value::Null),
            });
        }

        ensure_valid(&team_schema(), &proposed_state)?;

        let name = proposed_state
            .get("name")
            .cloned()
            .unwrap_or(Value::Null);
        let responsibilities = match proposed_state.get("responsibilities") {
            None | Some(Value::Null) => json!([]),
            Some(list) => list.clone(),
        };

        let Some(prior) = prior else {
            let planned = json!({
                "id": Value::Null,
                "name": name.clone(),
                "responsibilities": responsibilities.clone(),
            });
            return Ok(PlanResult::with_changes(
                planned,
                vec![
                    AttributeChange::added("name", name),
                    AttributeChange::added("responsibilities", responsibilities),
                ],
                false,
            ));
        };

        let prior_responsibilities = match prior.get("responsibilities") {
            None | Some(Value::Null) => json!([]),
            Some(list) => list.clone(),
        };
        let planned = json!({
            "id": prior["id"].clone(),
            "name": name.clone(),
            "responsibilities": responsibilities.clone(),
        });

        let mut changes = Vec::new();
        if prior["name"] != name {
            changes.push(AttributeChange::modified("name", prior["name"].clone(), name));
        }
        if prior_responsibilities != responsibilities {
            changes.push(AttributeChange::modified(
                "responsibilities",
                prior_responsibilities,
                responsibilities,
            ));
        }

        if changes.is_empty() {
            Ok(PlanResult::no_change(planned))
        } else {
            Ok(PlanResult::with_changes(planned, changes, false))
        }
    }

    #[instrument(skip_all, fields(resource_type = TEAM_TYPE_NAME))]
    async fn create(&self, planned_state: Value) -> Result<Value, ProviderError> {
        let mut team = self.validated(planned_state)?;

        let id = self
            .client
            .create_team(&CreateTeamRequest {
                name: team.name.clone(),
            })
            .await
            .map_err(|e| ProviderError::from(e).with_context("Could not create team"))?;

        self.client
            .update_team(&UpdateTeamRequest {
                id,
                name: team.name.clone(),
                responsibilities: team.responsibilities.clone(),
            })
            .await
            .map_err(|e| {
                warn!(team_id = id, "Team created but responsibilities were not set");
                ProviderError::from(e).with_context(format!(
                    "Team {} was created but its responsibilities could not be set",
                    id
                ))
            })?;

        info!(team_id = id, "Team created");
        team.id = Some(id);
        team.to_value()
    }

    #[instrument(skip_all, fields(resource_type = TEAM_TYPE_NAME))]
    async fn read(&self, current_state: Value) -> Result<Value, ProviderError> {
        let state = TeamState::from_value(current_state)?;
        let id = state.require_id()?;

        match self.fetch(id).await? {
            Some(remote) => remote.to_value(),
            None => Err(ProviderError::NotFound(format!(
                "Could not find team {} ({}) in Aikido. State might need to be cleaned.",
                id, state.name
            ))),
        }
    }

    #[instrument(skip_all, fields(resource_type = TEAM_TYPE_NAME))]
    async fn update(
        &self,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let planned = self.validated(planned_state)?;
        let id = match planned.id {
            Some(id) => id,
            None => TeamState::from_value(prior_state)?.require_id()?,
        };

        self.client
            .update_team(&UpdateTeamRequest {
                id,
                name: planned.name,
                responsibilities: planned.responsibilities,
            })
            .await
            .map_err(|e| ProviderError::from(e).with_context(format!("Could not update team {}", id)))?;

        match self.fetch(id).await? {
            Some(remote) => {
                info!(team_id = id, "Team updated");
                remote.to_value()
            },
            None => Err(ProviderError::NotFound(format!(
                "Team {} was updated but is no longer listed by Aikido",
                id
            ))),
        }
    }

    #[instrument(skip_all, fields(resource_type = TEAM_TYPE_NAME))]
    async fn delete(&self, current_state: Value) -> Result<(), ProviderError> {
        let id = TeamState::from_value(current_state)?.require_id()?;

        self.client
            .delete_team(id)
            .await
            .map_err(|e| ProviderError::from(e).with_context(format!("Could not delete team {}", id)))?;

        info!(team_id = id, "Team deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(resource_type = TEAM_TYPE_NAME))]
    async fn import(&self, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        let team_id: i64 = id.trim().parse().map_err(|_| {
            ProviderError::InvalidRequest(format!(
                "team import id must be a numeric team id, got '{}'",
                id
            ))
        })?;

        match self.fetch(team_id).await? {
            Some(remote) => Ok(vec![ImportedResource::new(
                TEAM_TYPE_NAME,
                remote.to_value()?,
            )]),
            None => Err(ProviderError::NotFound(format!(
                "Could not find team {} in Aikido",
                team_id
            ))),
        }
    }
}
