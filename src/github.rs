use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, Utc};
use reqwest::header::{ACCEPT, HeaderMap, LINK, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::aggregate::ContributionSource;
use crate::discover::CommitSource;
use crate::settings::Settings;
use crate::stats::YearStats;
use crate::years::Window;

const REST_MEDIA_TYPE: &str = "application/vnd.github+json";

const YEAR_QUERY: &str = r#"
query($login: String!, $from: DateTime!, $to: DateTime!) {
    user(login: $login) {
        contributionsCollection(from: $from, to: $to) {
            totalCommitContributions
            totalIssueContributions
            totalPullRequestContributions
            totalPullRequestReviewContributions
            contributionCalendar {
                totalContributions
                weeks {
                    contributionDays {
                        date
                        contributionCount
                    }
                }
            }
            commitContributionsByRepository(maxRepositories: 100) {
                repository {
                    primaryLanguage {
                        name
                    }
                }
                contributions {
                    totalCount
                }
            }
        }
    }
}
"#;

const REPO_COUNT_QUERY: &str = r#"
query($login: String!) {
    user(login: $login) {
        repositories {
            totalCount
        }
    }
}
"#;

#[derive(Deserialize)]
struct CountObj {
    #[serde(rename = "totalCount")]
    total_count: u64,
}

#[derive(Clone)]
pub struct GithubClient {
    token: Arc<String>,
    http: Arc<Client>,
    settings: Arc<Settings>,
}

impl GithubClient {
    /// Create a client for both the REST and GraphQL endpoints.
    pub fn new(token: String, settings: Settings) -> Result<Self> {
        if token.trim().is_empty() {
            bail!("GitHub token is empty");
        }
        let http = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            token: Arc::new(token),
            http: Arc::new(http),
            settings: Arc::new(settings),
        })
    }

    /// Send a request with retry on rate limiting and 5xx.
    ///
    /// `build` is called once per attempt. Any other non-success status is
    /// handed back to the caller.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_retries = self.settings.max_retries;
        let mut attempt = 0usize;

        loop {
            attempt += 1;

            let resp = build()
                .send()
                .await
                .map_err(|e| anyhow!("Network error sending request: {e}"))?;

            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }

            if let Some(wait) = rate_limit_wait(status, resp.headers(), Utc::now().timestamp()) {
                if attempt >= max_retries {
                    bail!(
                        "GitHub API returned {} (rate-limited) and retries exhausted",
                        status.as_u16()
                    );
                }
                warn!(
                    "Rate limited (HTTP {}), waiting {}s before retry {attempt}/{max_retries}",
                    status.as_u16(),
                    wait.as_secs()
                );
                sleep(wait).await;
                continue;
            }

            if status.is_server_error() && attempt < max_retries {
                let backoff = Duration::from_millis(250u64.saturating_mul(1 << (attempt - 1).min(16)));
                debug!(
                    "HTTP {} from GitHub, backing off {}ms",
                    status.as_u16(),
                    backoff.as_millis()
                );
                sleep(backoff).await;
                continue;
            }

            return Ok(resp);
        }
    }

    /// Low-level GraphQL request with `errors` checking.
    ///
    /// GraphQL reports an exhausted budget as 200 with a `RATE_LIMITED`
    /// error; that case waits for the reset and retries.
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let body = json!({ "query": query, "variables": variables });
        let max_retries = self.settings.max_retries;
        let mut attempt = 0usize;

        loop {
            attempt += 1;

            let resp = self
                .send(|| {
                    self.http
                        .post(&self.settings.graphql_url)
                        .bearer_auth(&*self.token)
                        .json(&body)
                })
                .await?;

            let status = resp.status();
            let headers = resp.headers().clone();

            // Parse JSON (even for non-2xx to capture error payloads)
            let json: Value = resp
                .json()
                .await
                .map_err(|e| anyhow!("Failed to parse JSON from GitHub: {e}"))?;

            if let Some(errors) = json.get("errors") {
                if let Some(wait) = graphql_rate_limit_wait(errors, &headers, Utc::now().timestamp()) {
                    if attempt >= max_retries {
                        bail!("GraphQL budget exhausted and retries exhausted: {errors:#}");
                    }
                    warn!(
                        "GraphQL rate limited, waiting {}s before retry {attempt}/{max_retries}",
                        wait.as_secs()
                    );
                    sleep(wait).await;
                    continue;
                }
                return Err(anyhow!("GraphQL reported errors: {errors:#}"));
            }

            if !status.is_success() {
                bail!("GitHub API returned HTTP {}: {json:#}", status.as_u16());
            }

            return Ok(json);
        }
    }

    /// Follow `Link: rel="next"` from `first` and collect every page.
    ///
    /// 409 means an empty repository on the commits endpoint and yields no items.
    async fn rest_pages<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut next = Some(first.to_string());

        while let Some(url) = next {
            let resp = self
                .send(|| {
                    self.http
                        .get(&url)
                        .bearer_auth(&*self.token)
                        .header(ACCEPT, REST_MEDIA_TYPE)
                })
                .await?;

            let status = resp.status();
            if status == StatusCode::CONFLICT {
                debug!("{url} returned 409, treating as empty");
                break;
            }
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                bail!("GitHub API returned HTTP {} for {url}: {text}", status.as_u16());
            }

            next = next_link(resp.headers());
            let page: Vec<T> = resp
                .json()
                .await
                .with_context(|| format!("Failed to deserialize page {url}"))?;
            out.extend(page);
        }

        Ok(out)
    }

    fn rest_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let base = format!("{}{path}", self.settings.api_url.trim_end_matches('/'));
        Url::parse_with_params(&base, params).with_context(|| format!("Invalid API URL {base}"))
    }
}

impl CommitSource for GithubClient {
    /// Names of every repository owned by `org`.
    async fn repositories(&self, org: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct RepoItem {
            name: String,
        }

        let url = self.rest_url(
            &format!("/orgs/{org}/repos"),
            &[
                ("type", "all".to_string()),
                ("per_page", self.settings.per_page.to_string()),
            ],
        )?;
        let repos: Vec<RepoItem> = self
            .rest_pages(url)
            .await
            .with_context(|| format!("Failed to list repositories of {org}"))?;

        Ok(repos.into_iter().map(|r| r.name).collect())
    }

    /// Logins of the authors of commits in `org/repo` within `window`.
    async fn commit_authors(&self, org: &str, repo: &str, window: &Window) -> Result<BTreeSet<String>> {
        #[derive(Deserialize)]
        struct CommitItem {
            author: Option<CommitAuthor>,
        }
        #[derive(Deserialize)]
        struct CommitAuthor {
            login: Option<String>,
        }

        let url = self.rest_url(
            &format!("/repos/{org}/{repo}/commits"),
            &[
                ("since", window.from_iso()),
                ("until", window.to_iso()),
                ("per_page", self.settings.per_page.to_string()),
            ],
        )?;
        let commits: Vec<CommitItem> = self
            .rest_pages(url)
            .await
            .with_context(|| format!("Failed to list commits of {org}/{repo}"))?;

        // commits without a linked GitHub account have a null author
        Ok(commits
            .into_iter()
            .filter_map(|c| c.author.and_then(|a| a.login))
            .filter(|login| !login.is_empty())
            .collect())
    }
}

impl ContributionSource for GithubClient {
    async fn year_stats(&self, user: &str, year: i32) -> Result<YearStats> {
        let window = Window::year(year)?;
        let json = self
            .graphql(
                YEAR_QUERY,
                json!({ "login": user, "from": window.from_iso(), "to": window.to_iso() }),
            )
            .await?;
        parse_year_stats(json, year).with_context(|| format!("Bad contributions for {user} in {year}"))
    }

    /// Total number of repositories owned by `user`.
    async fn repository_count(&self, user: &str) -> Result<u64> {
        #[derive(Deserialize)]
        struct ReposWrapper {
            data: Option<UserWrapper>,
        }
        #[derive(Deserialize)]
        struct UserWrapper {
            user: Option<RepositoriesCount>,
        }
        #[derive(Deserialize)]
        struct RepositoriesCount {
            repositories: CountObj,
        }

        let json = self.graphql(REPO_COUNT_QUERY, json!({ "login": user })).await?;
        let parsed: ReposWrapper = serde_json::from_value(json)
            .context("Failed to deserialize repository_count response")?;

        parsed
            .data
            .and_then(|d| d.user)
            .map(|r| r.repositories.total_count)
            .ok_or_else(|| anyhow!("User not found: {user}"))
    }
}

/// Decode a `contributionsCollection` response for one year.
fn parse_year_stats(json: Value, year: i32) -> Result<YearStats> {
    #[derive(Deserialize)]
    struct YearResponse {
        data: Option<YearData>,
    }
    #[derive(Deserialize)]
    struct YearData {
        user: Option<YearUser>,
    }
    #[derive(Deserialize)]
    struct YearUser {
        #[serde(rename = "contributionsCollection")]
        contributions_collection: Collection,
    }
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Collection {
        total_commit_contributions: u64,
        total_issue_contributions: u64,
        total_pull_request_contributions: u64,
        total_pull_request_review_contributions: u64,
        contribution_calendar: Calendar,
        #[serde(default)]
        commit_contributions_by_repository: Vec<RepoContributions>,
    }
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Calendar {
        total_contributions: u64,
        #[serde(default)]
        weeks: Vec<Week>,
    }
    #[derive(Deserialize)]
    struct Week {
        #[serde(rename = "contributionDays")]
        contribution_days: Vec<Day>,
    }
    #[derive(Deserialize)]
    struct Day {
        date: String,
        #[serde(rename = "contributionCount")]
        contribution_count: u64,
    }
    #[derive(Deserialize)]
    struct RepoContributions {
        repository: RepoLanguage,
        contributions: CountObj,
    }
    #[derive(Deserialize)]
    struct RepoLanguage {
        #[serde(rename = "primaryLanguage")]
        primary_language: Option<Language>,
    }
    #[derive(Deserialize)]
    struct Language {
        name: String,
    }

    let parsed: YearResponse =
        serde_json::from_value(json).context("Failed to deserialize year_stats response")?;
    let collection = parsed
        .data
        .and_then(|d| d.user)
        .map(|u| u.contributions_collection)
        .ok_or_else(|| anyhow!("User not found or no data available"))?;

    let mut stats = YearStats {
        year,
        contributions: collection.contribution_calendar.total_contributions,
        commits: collection.total_commit_contributions,
        issues: collection.total_issue_contributions,
        pull_requests: collection.total_pull_request_contributions,
        reviews: collection.total_pull_request_review_contributions,
        ..YearStats::empty(year)
    };

    for week in collection.contribution_calendar.weeks {
        for day in week.contribution_days {
            if day.contribution_count == 0 {
                continue;
            }
            let date = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d")
                .with_context(|| format!("Bad calendar date {}", day.date))?;
            let month = date.format("%Y-%m").to_string();
            let total = stats.monthly.entry(month).or_insert(0);
            *total = total.saturating_add(day.contribution_count);
        }
    }

    for repo in collection.commit_contributions_by_repository {
        if let Some(lang) = repo.repository.primary_language {
            let total = stats.languages.entry(lang.name).or_insert(0);
            *total = total.saturating_add(repo.contributions.total_count);
        }
    }

    Ok(stats)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Time until `x-ratelimit-reset`, at least one second.
fn reset_wait(headers: &HeaderMap, now: i64) -> Duration {
    let reset = header_u64(headers, "x-ratelimit-reset").unwrap_or(0) as i64;
    Duration::from_secs((reset - now).max(1) as u64)
}

/// How long to wait before retrying, if `status` means rate limiting.
///
/// GitHub signals primary limits with 403 + `x-ratelimit-remaining: 0` and
/// secondary limits with 403/429 + `Retry-After`.
fn rate_limit_wait(status: StatusCode, headers: &HeaderMap, now: i64) -> Option<Duration> {
    let retry_after = header_u64(headers, RETRY_AFTER.as_str());

    match status {
        StatusCode::TOO_MANY_REQUESTS => Some(Duration::from_secs(retry_after.unwrap_or(2))),
        StatusCode::FORBIDDEN => {
            if let Some(secs) = retry_after {
                return Some(Duration::from_secs(secs));
            }
            if header_u64(headers, "x-ratelimit-remaining") != Some(0) {
                return None;
            }
            Some(reset_wait(headers, now))
        }
        _ => None,
    }
}

/// Wait for a GraphQL `errors` payload that means the budget ran out:
/// an error of type `RATE_LIMITED`, or `x-ratelimit-remaining: 0`.
fn graphql_rate_limit_wait(errors: &Value, headers: &HeaderMap, now: i64) -> Option<Duration> {
    let limited = errors.as_array().is_some_and(|errs| {
        errs.iter()
            .any(|e| e.get("type").and_then(Value::as_str) == Some("RATE_LIMITED"))
    });
    let exhausted = header_u64(headers, "x-ratelimit-remaining") == Some(0);
    if !limited && !exhausted {
        return None;
    }
    match header_u64(headers, RETRY_AFTER.as_str()) {
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(reset_wait(headers, now)),
    }
}

/// URL of the `rel="next"` entry of a `Link` header, if any.
fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(next_link_in)
}

fn next_link_in(value: &str) -> Option<String> {
    value.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let url = parts.next()?.trim();
        let is_next = parts.any(|p| {
            let p = p.trim();
            p == r#"rel="next""# || p == "rel=next"
        });
        let url = url.strip_prefix('<')?.strip_suffix('>')?;
        is_next.then(|| url.to_string())
    })
}
