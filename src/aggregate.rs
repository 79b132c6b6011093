use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::output::{MonthlyRow, RowAppender, SummaryRow};
use crate::stats::{NO_LANGUAGE, UserSummary, YearStats, summarize};

/// Where per-user statistics come from.
pub trait ContributionSource {
    async fn year_stats(&self, user: &str, year: i32) -> Result<YearStats>;
    async fn repository_count(&self, user: &str) -> Result<u64>;
}

/// Destinations of one aggregation run.
pub struct Sinks {
    pub summaries: RowAppender,
    pub monthly: Option<RowAppender>,
}

#[derive(Debug, Default)]
pub struct Aggregation {
    pub written: usize,
    /// Users already present in the output from an earlier run.
    pub resumed: usize,
    pub skipped: Vec<String>,
}

/// Summarize every user over `years` and append one row per user.
///
/// Users in `done` are not queried again, and their monthly rows are not
/// backfilled. A user whose queries fail is logged and left out so that
/// every written row is complete. Monthly rows are written before the
/// summary row, so a user without a summary row is redone on resume.
pub async fn aggregate<S: ContributionSource>(
    source: &S,
    users: &[String],
    years: &[i32],
    done: &HashSet<String>,
    sinks: &mut Sinks,
) -> Result<Aggregation> {
    let mut run = Aggregation::default();

    for (i, user) in users.iter().enumerate() {
        if done.contains(user) {
            debug!("{user} already in output, skipping");
            run.resumed += 1;
            continue;
        }

        info!("[{}/{}] Collecting {user}", i + 1, users.len());
        let summary = match summarize_user(source, user, years).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Skipping {user}: {e:#}");
                run.skipped.push(user.clone());
                continue;
            }
        };

        // the summary row marks the user as done for resume, so it goes last
        if let Some(monthly) = sinks.monthly.as_mut() {
            for (month, count) in &summary.monthly {
                monthly.append(&MonthlyRow {
                    user: summary.user.clone(),
                    month: month.clone(),
                    contributions: *count,
                })?;
            }
        }
        sinks.summaries.append(&SummaryRow::from(&summary))?;

        info!(
            "{user}: {} contributions, primary language {}",
            summary.contributions, summary.primary_language
        );
        run.written += 1;
    }

    Ok(run)
}

async fn summarize_user<S: ContributionSource>(
    source: &S,
    user: &str,
    years: &[i32],
) -> Result<UserSummary> {
    let mut per_year = Vec::with_capacity(years.len());
    for &year in years {
        let stats = source
            .year_stats(user, year)
            .await
            .with_context(|| format!("year {year}"))?;
        debug!(
            "{user} {year}: {} contributions, language {}",
            stats.contributions,
            stats.primary_language().unwrap_or(NO_LANGUAGE)
        );
        per_year.push(stats);
    }
    let repositories = source
        .repository_count(user)
        .await
        .context("repository count")?;
    Ok(summarize(user, &per_year, repositories))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{existing_users, read_summaries};
    use anyhow::anyhow;
    use std::collections::{BTreeMap, HashMap};
    use std::fs;
    use std::path::PathBuf;

    /// Canned upstream: (user, year) -> stats. Missing pairs are quiet years.
    #[derive(Default)]
    struct FakeStats {
        years: HashMap<(String, i32), YearStats>,
        repos: HashMap<String, u64>,
        broken: HashSet<String>,
    }

    impl FakeStats {
        fn active(mut self, user: &str, year: i32, commits: u64, lang: &str) -> Self {
            let mut languages = BTreeMap::new();
            languages.insert(lang.to_string(), commits);
            let mut monthly = BTreeMap::new();
            monthly.insert(format!("{year}-03"), commits + 1);
            self.years.insert(
                (user.to_string(), year),
                YearStats {
                    year,
                    contributions: commits + 1,
                    commits,
                    issues: 1,
                    pull_requests: 0,
                    reviews: 0,
                    languages,
                    monthly,
                },
            );
            self
        }
    }

    impl ContributionSource for FakeStats {
        async fn year_stats(&self, user: &str, year: i32) -> Result<YearStats> {
            if self.broken.contains(user) {
                return Err(anyhow!("GraphQL reported errors: NOT_FOUND"));
            }
            Ok(self
                .years
                .get(&(user.to_string(), year))
                .cloned()
                .unwrap_or_else(|| YearStats::empty(year)))
        }

        async fn repository_count(&self, user: &str) -> Result<u64> {
            Ok(self.repos.get(user).copied().unwrap_or(0))
        }
    }

    fn tmp(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(name);
        let _ = fs::remove_file(&p);
        p
    }

    fn users(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// one user active only in 2018, one every year since 2017, one never
    fn three_users() -> FakeStats {
        let mut fake = FakeStats::default().active("once", 2018, 4, "Python");
        for year in 2017..=2020 {
            fake = fake.active("steady", year, 10, "Rust");
        }
        fake.repos.insert("steady".to_string(), 12);
        fake
    }

    async fn run_into(
        fake: &FakeStats,
        names: &[&str],
        done: &HashSet<String>,
        path: &PathBuf,
        fresh: bool,
    ) -> Aggregation {
        let mut sinks = Sinks {
            summaries: RowAppender::open(path, fresh).unwrap(),
            monthly: None,
        };
        let years: Vec<i32> = (2017..=2020).collect();
        aggregate(fake, &users(names), &years, done, &mut sinks)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn three_canned_users_give_three_rows() {
        let path = tmp("contrib_census_three_users.csv");
        let fake = three_users();
        let run = run_into(&fake, &["once", "steady", "idle"], &HashSet::new(), &path, true).await;
        assert_eq!(run.written, 3);

        let rows = read_summaries(&path).unwrap();
        assert_eq!(rows.len(), 3);

        let once = &rows[0];
        assert_eq!((once.user.as_str(), once.commits, once.issues), ("once", 4, 1));
        assert_eq!(once.contributions, 5);
        assert_eq!(once.primary_language, "Python");

        let steady = &rows[1];
        assert_eq!(steady.commits, 40);
        assert_eq!(steady.issues, 4);
        assert_eq!(steady.contributions, 44);
        assert_eq!(steady.repositories, 12);
        assert_eq!(steady.primary_language, "Rust");

        let idle = &rows[2];
        assert_eq!(idle.user, "idle");
        assert_eq!(
            (idle.contributions, idle.commits, idle.issues, idle.pull_requests, idle.reviews),
            (0, 0, 0, 0, 0)
        );
        assert_eq!(idle.primary_language, "N/A");
    }

    #[tokio::test]
    async fn rerun_is_byte_identical() {
        let fake = three_users();
        let a = tmp("contrib_census_rerun_a.csv");
        let b = tmp("contrib_census_rerun_b.csv");
        run_into(&fake, &["steady", "idle", "once"], &HashSet::new(), &a, true).await;
        run_into(&fake, &["steady", "idle", "once"], &HashSet::new(), &b, true).await;
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[tokio::test]
    async fn failing_user_is_skipped_and_batch_continues() {
        let path = tmp("contrib_census_skip.csv");
        let mut fake = three_users();
        fake.broken.insert("once".to_string());
        let run = run_into(&fake, &["once", "steady"], &HashSet::new(), &path, true).await;

        assert_eq!(run.skipped, vec!["once".to_string()]);
        assert_eq!(run.written, 1);
        let rows = read_summaries(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user, "steady");
    }

    #[tokio::test]
    async fn resume_skips_users_already_written() {
        let path = tmp("contrib_census_resume.csv");
        let fake = three_users();
        run_into(&fake, &["once"], &HashSet::new(), &path, true).await;

        let done = existing_users(&path).unwrap();
        let run = run_into(&fake, &["once", "steady", "idle"], &done, &path, false).await;
        assert_eq!(run.resumed, 1);
        assert_eq!(run.written, 2);

        let rows = read_summaries(&path).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.user.as_str()).collect();
        assert_eq!(names, vec!["once", "steady", "idle"]);
    }

    #[tokio::test]
    async fn monthly_rows_are_written_per_active_month() {
        let path = tmp("contrib_census_monthly_summary.csv");
        let monthly_path = tmp("contrib_census_monthly.csv");
        let fake = three_users();
        let mut sinks = Sinks {
            summaries: RowAppender::open(&path, true).unwrap(),
            monthly: Some(RowAppender::open(&monthly_path, true).unwrap()),
        };
        aggregate(&fake, &users(&["once", "idle"]), &[2017, 2018], &HashSet::new(), &mut sinks)
            .await
            .unwrap();
        drop(sinks);

        let text = fs::read_to_string(&monthly_path).unwrap();
        assert_eq!(text, "user,month,contributions\nonce,2018-03,5\n");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failed_monthly_write_leaves_user_unfinished() {
        let path = tmp("contrib_census_monthly_fails.csv");
        let fake = three_users();
        let mut sinks = Sinks {
            summaries: RowAppender::open(&path, true).unwrap(),
            // every write to /dev/full fails with ENOSPC
            monthly: Some(RowAppender::open(std::path::Path::new("/dev/full"), false).unwrap()),
        };
        let result = aggregate(&fake, &users(&["once"]), &[2018], &HashSet::new(), &mut sinks).await;
        assert!(result.is_err());
        drop(sinks);

        assert!(read_summaries(&path).unwrap().is_empty());
        assert!(!existing_users(&path).unwrap().contains("once"));
    }
}
