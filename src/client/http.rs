use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::types::{CreateTeamResponse, TokenResponse};
use super::{
    AikidoApi, ClientError, CreateTeamRequest, Credentials, ListTeamsFilters, ListUsersFilters,
    Team, UpdateTeamRequest, User,
};

/// Default API root.
pub const AIKIDO_API_BASE: &str = "https://app.aikido.dev";

const TOKEN_PATH: &str = "/api/oauth/token";
const TEAMS_PATH: &str = "/api/public/v1/teams";
const USERS_PATH: &str = "/api/public/v1/users";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
// Refresh a little early so a token never expires mid-request
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

/// reqwest-backed [`AikidoApi`] implementation.
///
/// Authenticates with the OAuth client-credentials grant and caches the access
/// token until shortly before it expires. No request is ever retried.
pub struct AikidoClient {
    client: reqwest::Client,
    credentials: Credentials,
    base_url: String,
    token: Mutex<Option<AccessToken>>,
}

impl AikidoClient {
    /// Build a client against the public Aikido API.
    pub fn new(credentials: Credentials) -> Result<Self, ClientError> {
        Self::with_base_url(credentials, AIKIDO_API_BASE.to_string())
    }

    /// Build a client against another API root.
    ///
    /// NOTE: Primarily used for testing with mock servers.
    pub fn with_base_url(credentials: Credentials, base_url: String) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ClientError::InvalidConfig {
                message: format!("base URL must be an http(s) URL, got '{}'", base_url),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("terraform-provider-aikido/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::Network)?;

        Ok(Self {
            client,
            credentials,
            base_url,
            token: Mutex::new(None),
        })
    }

    /// The API root requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn access_token(&self) -> Result<String, ClientError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = self.request_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn request_token(&self) -> Result<AccessToken, ClientError> {
        debug!("Requesting Aikido access token");
        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .json(&serde_json::json!({ "grant_type": "client_credentials" }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(ClientError::Auth {
                message: format!("token request rejected ({}): {}", status.as_u16(), message),
            });
        }

        let body: TokenResponse = decode(response, "token response").await?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        Ok(AccessToken {
            value: body.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let token = self.access_token().await?;
        let response = builder.bearer_auth(token).send().await?;

        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "Aikido API responded");
        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(response).await;
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl AikidoApi for AikidoClient {
    #[instrument(skip_all)]
    async fn create_team(&self, request: &CreateTeamRequest) -> Result<i64, ClientError> {
        let response = self
            .execute(self.request(Method::POST, TEAMS_PATH).json(request))
            .await?;
        let created: CreateTeamResponse = decode(response, "create team response").await?;
        debug!(team_id = created.id, "Team created");
        Ok(created.id)
    }

    #[instrument(skip_all, fields(team_id = request.id))]
    async fn update_team(&self, request: &UpdateTeamRequest) -> Result<(), ClientError> {
        let path = format!("{}/{}", TEAMS_PATH, request.id);
        self.execute(self.request(Method::PUT, &path).json(request))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_team(&self, id: i64) -> Result<(), ClientError> {
        let path = format!("{}/{}", TEAMS_PATH, id);
        self.execute(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_teams(&self, filters: ListTeamsFilters) -> Result<Vec<Team>, ClientError> {
        let request = self
            .request(Method::GET, TEAMS_PATH)
            .query(&[("page", filters.page), ("per_page", filters.per_page)]);
        let response = self.execute(request).await?;
        decode(response, "team list").await
    }

    #[instrument(skip(self))]
    async fn list_users(&self, filters: ListUsersFilters) -> Result<Vec<User>, ClientError> {
        let mut request = self
            .request(Method::GET, USERS_PATH)
            .query(&[("include_inactive", u8::from(filters.include_inactive))]);
        if let Some(team_id) = filters.team_id {
            request = request.query(&[("filter_team_id", team_id)]);
        }
        let response = self.execute(request).await?;
        decode(response, "user list").await
    }
}

async fn decode<T: DeserializeOwned>(
    response: Response,
    context: &'static str,
) -> Result<T, ClientError> {
    response.json::<T>().await.map_err(|e| ClientError::Decode {
        context,
        message: e.to_string(),
    })
}

// NOTE: Aikido reports errors as OAuth-style `error_description` or as `message`
async fn error_message(response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|body| {
            ["error_description", "message", "error"]
                .iter()
                .find_map(|key| body.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                "empty response body".to_string()
            } else {
                text
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_base_url() {
        let result = AikidoClient::with_base_url(
            Credentials::new("id", "secret"),
            "ftp://app.aikido.dev".to_string(),
        );
        assert!(matches!(result, Err(ClientError::InvalidConfig { .. })));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = AikidoClient::with_base_url(
            Credentials::new("id", "secret"),
            "https://example.test/".to_string(),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://example.test");
        assert_eq!(
            client.url(TEAMS_PATH),
            "https://example.test/api/public/v1/teams"
        );
    }

    #[test]
    fn test_token_freshness() {
        let fresh = AccessToken {
            value: "t".to_string(),
            expires_at: Instant::now() + Duration::from_secs(600),
        };
        assert!(fresh.is_fresh());

        let stale = AccessToken {
            value: "t".to_string(),
            expires_at: Instant::now() + Duration::from_secs(10),
        };
        assert!(!stale.is_fresh());
    }
}
