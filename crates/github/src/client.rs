use std::time::Duration;

use chrono::DateTime;
use copilot_core::{Metrics, Scope, ScopeType, Seat};
use log::warn;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::{GithubError, Result};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("copilot-tracker/", env!("CARGO_PKG_VERSION"));
const SEATS_PER_PAGE: u64 = 100;
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Client for the Copilot usage and billing-seats endpoints.
#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    api_url: Url,
    token: String,
}

/// Raw billing-seats page as returned by the API.
#[derive(Debug, Deserialize)]
pub(crate) struct SeatsPage {
    total_seats: u64,
    pub(crate) seats: Vec<RawSeat>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSeat {
    assignee: RawAssignee,
    #[serde(default)]
    assigning_team: Option<RawTeam>,
    created_at: String,
    #[serde(default)]
    last_activity_at: Option<String>,
    #[serde(default)]
    last_activity_editor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAssignee {
    login: String,
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RawTeam {
    name: String,
}

impl GithubClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| GithubError::Config(format!("failed to create HTTP client: {err}")))?;

        let mut api_url = Url::parse(base_url)
            .map_err(|err| GithubError::Config(format!("invalid API base URL: {err}")))?;
        // Trailing slash so Url::join appends instead of replacing the path.
        if !api_url.path().ends_with('/') {
            api_url.set_path(&format!("{}/", api_url.path()));
        }

        Ok(Self {
            client,
            api_url,
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path)
            .map_err(|err| GithubError::Config(format!("invalid endpoint path '{path}': {err}")))
    }

    /// Daily usage for an organization or enterprise; the endpoint returns
    /// the whole series in one unpaginated array.
    pub async fn fetch_metrics(&self, scope: &Scope) -> Result<Vec<Metrics>> {
        let path = match scope.scope_type {
            ScopeType::Organization => format!("orgs/{}/copilot/usage", scope.name),
            ScopeType::Enterprise => format!("enterprises/{}/copilot/usage", scope.name),
        };
        let value = self.get_json(self.endpoint(&path)?, &[]).await?;
        parse_metrics(value)
    }

    /// Daily usage narrowed to one team; an unset team yields an empty batch.
    pub async fn fetch_team_metrics(&self, org: &str, team: &str) -> Result<Vec<Metrics>> {
        if team.trim().is_empty() {
            return Ok(Vec::new());
        }
        let path = format!("orgs/{org}/team/{team}/copilot/usage");
        let value = self.get_json(self.endpoint(&path)?, &[]).await?;
        parse_metrics(value)
    }

    /// Current seat assignments for an organization, walking every page up
    /// front. `total_seats` from the first page determines the page count.
    pub async fn fetch_seats(&self, org: &str, today: &str) -> Result<Vec<Seat>> {
        let url = self.endpoint(&format!("orgs/{org}/copilot/billing/seats"))?;
        let first = self.fetch_seats_page(&url, 1).await?;
        let total_pages = first.total_seats.div_ceil(SEATS_PER_PAGE);

        let mut seats: Vec<Seat> = first
            .seats
            .into_iter()
            .map(|raw| map_seat(raw, today))
            .collect();
        for page in 2..=total_pages {
            let next = self.fetch_seats_page(&url, page).await?;
            seats.extend(next.seats.into_iter().map(|raw| map_seat(raw, today)));
        }
        Ok(seats)
    }

    async fn fetch_seats_page(&self, url: &Url, page: u64) -> Result<SeatsPage> {
        let value = self
            .get_json(
                url.clone(),
                &[
                    ("per_page", SEATS_PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|err| GithubError::MalformedResponse(format!("seats page {page}: {err}")))
    }

    async fn get_json(&self, url: Url, query: &[(&str, String)]) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            match self.try_get_json(url.clone(), query).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < MAX_RETRIES && is_transient(&err) => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    warn!("transient error fetching {url}: {err}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_get_json(&self, url: Url, query: &[(&str, String)]) -> Result<Value> {
        let mut request = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GithubError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

fn parse_metrics(value: Value) -> Result<Vec<Metrics>> {
    if !value.is_array() {
        return Err(GithubError::MalformedResponse(
            "expected a JSON array of daily metrics".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|err| GithubError::MalformedResponse(err.to_string()))
}

pub(crate) fn map_seat(raw: RawSeat, today: &str) -> Seat {
    Seat {
        login: raw.assignee.login,
        id: raw.assignee.id,
        team: raw.assigning_team.map(|team| team.name).unwrap_or_default(),
        created_at: raw.created_at,
        last_activity_at: raw
            .last_activity_at
            .as_deref()
            .map(normalize_activity_timestamp),
        last_activity_editor: raw.last_activity_editor,
        day: today.to_string(),
    }
}

/// Activity timestamps are compared for equality across cycles, so they are
/// normalized to minute precision; unparseable values pass through untouched.
pub(crate) fn normalize_activity_timestamp(value: &str) -> String {
    match DateTime::parse_from_rfc3339(value) {
        Ok(parsed) => parsed.format("%Y-%m-%dT%H:%M").to_string(),
        Err(_) => value.to_string(),
    }
}

/// Transport failures, rate limits and server errors are worth retrying;
/// auth failures and malformed payloads are not.
fn is_transient(err: &GithubError) -> bool {
    match err {
        GithubError::Network(inner) => inner.is_timeout() || inner.is_connect(),
        GithubError::Api { status, .. } => *status == 429 || *status >= 500,
        GithubError::MalformedResponse(_) | GithubError::Config(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn usage_day(day: &str) -> Value {
        json!({
            "day": day,
            "total_suggestions_count": 100,
            "total_acceptances_count": 40,
            "total_lines_suggested": 900,
            "total_lines_accepted": 300,
            "total_active_users": 12,
            "breakdown": [{
                "language": "rust",
                "editor": "vscode",
                "suggestions_count": 100,
                "acceptances_count": 40,
                "lines_suggested": 900,
                "lines_accepted": 300,
                "active_users": 12
            }]
        })
    }

    fn seat_entry(id: i64) -> Value {
        json!({
            "created_at": "2024-01-15T00:00:00Z",
            "last_activity_at": "2024-03-01T10:23:45Z",
            "last_activity_editor": "vscode/1.87",
            "assignee": { "login": format!("user-{id}"), "id": id },
            "assigning_team": { "name": "platform" }
        })
    }

    #[tokio::test]
    async fn fetch_metrics_maps_the_usage_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/orgs/octo/copilot/usage")
            .match_header("authorization", "Bearer token-1")
            .match_header("x-github-api-version", GITHUB_API_VERSION)
            .with_status(200)
            .with_body(json!([usage_day("2024-01-01"), usage_day("2024-01-02")]).to_string())
            .create_async()
            .await;

        let client = GithubClient::new(&server.url(), "token-1").expect("client");
        let metrics = client
            .fetch_metrics(&Scope::organization("octo"))
            .await
            .expect("fetch");

        mock.assert_async().await;
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].day, "2024-01-01");
        assert_eq!(metrics[0].total_suggestions_count, 100);
        // Chat fields are absent upstream and default to zero.
        assert_eq!(metrics[0].total_chat_turns, 0);
        assert_eq!(metrics[0].breakdown.len(), 1);
    }

    #[tokio::test]
    async fn enterprise_scope_uses_the_enterprise_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/enterprises/acme/copilot/usage")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = GithubClient::new(&server.url(), "token-1").expect("client");
        let metrics = client
            .fetch_metrics(&Scope::enterprise("acme"))
            .await
            .expect("fetch");

        mock.assert_async().await;
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn non_array_response_is_malformed_and_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/orgs/octo/copilot/usage")
            .with_status(200)
            .with_body("{\"message\": \"unexpected\"}")
            .expect(1)
            .create_async()
            .await;

        let client = GithubClient::new(&server.url(), "token-1").expect("client");
        let err = client
            .fetch_metrics(&Scope::organization("octo"))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, GithubError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/orgs/octo/copilot/usage")
            .with_status(401)
            .with_body("{\"message\": \"Bad credentials\"}")
            .expect(1)
            .create_async()
            .await;

        let client = GithubClient::new(&server.url(), "bad-token").expect("client");
        let err = client
            .fetch_metrics(&Scope::organization("octo"))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, GithubError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn server_errors_are_retried_a_bounded_number_of_times() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/orgs/octo/copilot/usage")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = GithubClient::new(&server.url(), "token-1").expect("client");
        let err = client
            .fetch_metrics(&Scope::organization("octo"))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, GithubError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn fetch_seats_walks_every_page() {
        let mut server = mockito::Server::new_async().await;
        let page_one: Vec<Value> = (1..=100).map(seat_entry).collect();
        let page_two: Vec<Value> = (101..=120).map(seat_entry).collect();
        let first = server
            .mock("GET", "/orgs/octo/copilot/billing/seats")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("per_page".into(), "100".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(json!({ "total_seats": 120, "seats": page_one }).to_string())
            .create_async()
            .await;
        let second = server
            .mock("GET", "/orgs/octo/copilot/billing/seats")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("per_page".into(), "100".into()),
                Matcher::UrlEncoded("page".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(json!({ "total_seats": 120, "seats": page_two }).to_string())
            .create_async()
            .await;

        let client = GithubClient::new(&server.url(), "token-1").expect("client");
        let seats = client.fetch_seats("octo", "2024-03-01").await.expect("fetch");

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(seats.len(), 120);
        assert_eq!(seats[0].login, "user-1");
        assert_eq!(seats[0].team, "platform");
        assert_eq!(seats[0].day, "2024-03-01");
        // Activity timestamps are normalized to minute precision.
        assert_eq!(
            seats[0].last_activity_at.as_deref(),
            Some("2024-03-01T10:23")
        );
        assert_eq!(seats[119].login, "user-120");
    }

    #[tokio::test]
    async fn seat_without_team_or_activity_maps_to_defaults() {
        let mut server = mockito::Server::new_async().await;
        let entry = json!({
            "created_at": "2024-01-15T00:00:00Z",
            "assignee": { "login": "quiet-user", "id": 7 }
        });
        server
            .mock("GET", "/orgs/octo/copilot/billing/seats")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({ "total_seats": 1, "seats": [entry] }).to_string())
            .create_async()
            .await;

        let client = GithubClient::new(&server.url(), "token-1").expect("client");
        let seats = client.fetch_seats("octo", "2024-03-01").await.expect("fetch");

        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].team, "");
        assert_eq!(seats[0].last_activity_at, None);
        assert_eq!(seats[0].last_activity_editor, None);
    }

    #[tokio::test]
    async fn empty_team_yields_an_empty_batch_without_a_request() {
        let server = mockito::Server::new_async().await;
        let client = GithubClient::new(&server.url(), "token-1").expect("client");
        let metrics = client
            .fetch_team_metrics("octo", "  ")
            .await
            .expect("fetch");
        assert!(metrics.is_empty());
    }

    #[test]
    fn unparseable_activity_timestamp_passes_through() {
        assert_eq!(
            normalize_activity_timestamp("2024-03-01T10:23:45Z"),
            "2024-03-01T10:23"
        );
        assert_eq!(normalize_activity_timestamp("not-a-date"), "not-a-date");
    }
}
