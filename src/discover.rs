use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::years::Window;

/// Where commit authorship comes from.
pub trait CommitSource {
    async fn repositories(&self, org: &str) -> Result<Vec<String>>;
    async fn commit_authors(&self, org: &str, repo: &str, window: &Window) -> Result<BTreeSet<String>>;
}

/// How hard to try a single repository before skipping it.
#[derive(Debug, Clone, Copy)]
pub struct RepoRetry {
    pub attempts: usize,
    pub delay: Duration,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub contributors: BTreeSet<String>,
    pub repositories: usize,
    pub skipped: Vec<String>,
}

/// Collect the logins of everyone who committed to a repository of `org`
/// within `window`.
///
/// Failing to list the repositories is fatal; a repository that still
/// fails after `retry.attempts` tries is skipped.
pub async fn discover<S: CommitSource>(
    source: &S,
    org: &str,
    window: &Window,
    retry: RepoRetry,
) -> Result<Discovery> {
    let repos = source
        .repositories(org)
        .await
        .with_context(|| format!("Cannot enumerate repositories of {org}"))?;
    info!("Found {} repositories in {org}", repos.len());

    let mut out = Discovery {
        repositories: repos.len(),
        ..Discovery::default()
    };

    for repo in &repos {
        info!("Processing repository: {repo}");
        match authors_with_retry(source, org, repo, window, retry).await {
            Ok(authors) => {
                info!("{repo}: {} commit authors", authors.len());
                out.contributors.extend(authors);
            }
            Err(e) => {
                warn!("Skipping {repo}: {e:#}");
                out.skipped.push(repo.clone());
            }
        }
    }

    Ok(out)
}

async fn authors_with_retry<S: CommitSource>(
    source: &S,
    org: &str,
    repo: &str,
    window: &Window,
    retry: RepoRetry,
) -> Result<BTreeSet<String>> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match source.commit_authors(org, repo, window).await {
            Ok(authors) => return Ok(authors),
            Err(e) if attempt < attempts => {
                warn!("Error fetching commits of {repo}: {e:#}; retrying ({attempt}/{attempts})");
                sleep(retry.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
