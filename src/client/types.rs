use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Page size used when scanning teams.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// What kind of external resource a team is responsible for.
///
/// Configuration only accepts the four known kinds. Listings may report kinds
/// this provider does not manage; those decode as [`ResponsibilityType::Other`]
/// so one foreign entry never breaks a whole page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResponsibilityType {
    /// A source code repository.
    CodeRepository,
    /// A container image repository.
    ContainerRepository,
    /// A connected cloud account.
    Cloud,
    /// A monitored domain.
    Domain,
    /// Any other kind reported by the API, kept verbatim.
    Other(String),
}

impl ResponsibilityType {
    /// Every accepted type, in schema order.
    pub const ALL: [ResponsibilityType; 4] = [
        ResponsibilityType::CodeRepository,
        ResponsibilityType::ContainerRepository,
        ResponsibilityType::Cloud,
        ResponsibilityType::Domain,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::CodeRepository => "code_repository",
            Self::ContainerRepository => "container_repository",
            Self::Cloud => "cloud",
            Self::Domain => "domain",
            Self::Other(name) => name,
        }
    }

    fn from_wire(name: String) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .unwrap_or_else(|| Self::Other(name))
    }
}

impl Serialize for ResponsibilityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResponsibilityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from_wire)
    }
}

impl fmt::Display for ResponsibilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponsibilityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown responsibility type '{}'", s))
    }
}

/// A resource a team is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Responsibility {
    /// Identifier of the external resource.
    pub id: i64,
    /// Kind of the external resource.
    #[serde(rename = "type")]
    pub kind: ResponsibilityType,
}

/// A team as returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Numeric team identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Resources the team owns. The API sends null for none.
    #[serde(default, deserialize_with = "null_as_default")]
    pub responsibilities: Vec<Responsibility>,
}

/// Body of the create endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateTeamRequest {
    /// Name of the new team.
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreateTeamResponse {
    pub id: i64,
}

/// Full replacement of a team's name and responsibilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateTeamRequest {
    /// Team to update. Sent in the path, not the body.
    #[serde(skip)]
    pub id: i64,
    /// New name.
    pub name: String,
    /// Complete new responsibility set.
    pub responsibilities: Vec<Responsibility>,
}

/// One page of the team listing. Pages are numbered from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListTeamsFilters {
    /// Zero-based page number.
    pub page: u32,
    /// Teams per page.
    pub per_page: u32,
}

impl ListTeamsFilters {
    /// Page `page` with [`DEFAULT_PAGE_SIZE`] teams per page.
    pub fn page(page: u32) -> Self {
        Self {
            page,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Filters for the user listing. The default lists every active user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListUsersFilters {
    /// Only list members of this team.
    pub team_id: Option<i64>,
    /// Also list deactivated users.
    pub include_inactive: bool,
}

/// A user account in the Aikido workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Numeric user identifier.
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    /// Full display name.
    pub full_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    /// Login email address.
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    /// 1 when the account is active, 0 otherwise.
    pub active: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    /// Unix timestamp of the last login, 0 if never.
    pub last_login_timestamp: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    /// Workspace role.
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    /// How the user signs in.
    pub auth_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

// NOTE: The API sends explicit nulls for fields that were never set
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responsibility_type_round_trip_names() {
        for kind in ResponsibilityType::ALL {
            assert_eq!(
                serde_json::to_value(&kind).unwrap(),
                serde_json::json!(kind.as_str())
            );
            assert_eq!(kind.as_str().parse::<ResponsibilityType>(), Ok(kind));
        }
        assert!("bucket".parse::<ResponsibilityType>().is_err());
    }

    #[test]
    fn test_foreign_responsibility_type_is_kept() {
        let team: Team = serde_json::from_value(serde_json::json!({
            "id": 5,
            "name": "Ops",
            "responsibilities": [
                {"id": 1, "type": "issue_tracker"},
                {"id": 2, "type": "cloud"}
            ]
        }))
        .unwrap();

        assert_eq!(
            team.responsibilities[0].kind,
            ResponsibilityType::Other("issue_tracker".to_string())
        );
        assert_eq!(team.responsibilities[1].kind, ResponsibilityType::Cloud);
        assert_eq!(
            serde_json::to_value(&team.responsibilities[0]).unwrap(),
            serde_json::json!({"id": 1, "type": "issue_tracker"})
        );
    }

    #[test]
    fn test_team_decoding() {
        let team: Team = serde_json::from_value(serde_json::json!({
            "id": 3,
            "name": "Platform",
            "active": true,
            "responsibilities": [{"id": 55, "type": "container_repository"}]
        }))
        .unwrap();
        assert_eq!(team.id, 3);
        assert_eq!(
            team.responsibilities,
            vec![Responsibility {
                id: 55,
                kind: ResponsibilityType::ContainerRepository
            }]
        );

        let team: Team = serde_json::from_value(serde_json::json!({
            "id": 4,
            "name": "Empty",
            "responsibilities": null
        }))
        .unwrap();
        assert!(team.responsibilities.is_empty());
    }

    #[test]
    fn test_user_decoding_tolerates_nulls() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": 9,
            "full_name": "Ada Lovelace",
            "email": "ada@example.com",
            "active": 1,
            "last_login_timestamp": null,
            "role": "admin",
            "auth_type": "github"
        }))
        .unwrap();
        assert_eq!(user.last_login_timestamp, 0);
        assert_eq!(user.active, 1);
    }

    #[test]
    fn test_update_request_body_omits_id() {
        let body = serde_json::to_value(UpdateTeamRequest {
            id: 12,
            name: "Platform".to_string(),
            responsibilities: vec![Responsibility {
                id: 1,
                kind: ResponsibilityType::Cloud,
            }],
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "name": "Platform",
                "responsibilities": [{"id": 1, "type": "cloud"}]
            })
        );
    }
}
