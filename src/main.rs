mod aggregate;
mod discover;
mod github;
mod output;
mod report;
mod settings;
mod stats;
mod years;

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use github::GithubClient;
use settings::Settings;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aggregate::Sinks;
use discover::RepoRetry;
use output::RowAppender;
use years::Window;

#[derive(Parser)]
#[command(name = "contrib-census", author, version)]
#[command(about = "Collects GitHub contribution statistics for cohort studies", long_about = None)]
struct Cli {
    /// Configuration file (default: ./contrib-census.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Auth {
    /// GitHub access token
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    token: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List everyone who committed to an organization's repositories
    Discover {
        #[arg(long)]
        org: String,
        /// First day of the commit window (YYYY-MM-DD)
        #[arg(long)]
        since: NaiveDate,
        /// Last day of the commit window, inclusive (default: today)
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long, default_value = "output_users.csv")]
        out: PathBuf,
        #[command(flatten)]
        auth: Auth,
    },
    /// Sum contributions per user from a start year to today
    Aggregate {
        #[arg(long, default_value = "output_users.csv")]
        users: PathBuf,
        #[arg(long, default_value = "output_contribution.csv")]
        out: PathBuf,
        /// First year to query (default from configuration, 2017)
        #[arg(long)]
        start_year: Option<i32>,
        /// Also write per-month contribution counts here
        #[arg(long)]
        monthly_out: Option<PathBuf>,
        /// Truncate outputs instead of resuming
        #[arg(long)]
        fresh: bool,
        #[command(flatten)]
        auth: Auth,
    },
    /// Grouped descriptive statistics over an aggregation output
    Report {
        #[arg(long, default_value = "output_contribution.csv")]
        input: PathBuf,
        /// CSV with `user,group` columns, e.g. EBL/PBL cohorts
        #[arg(long)]
        groups: Option<PathBuf>,
        /// Markdown output (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// `--verbose` turns on debug for this crate only; HTTP internals stay at info.
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("contrib_census=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Discover {
            org,
            since,
            until,
            out,
            auth,
        } => {
            let window = Window::days(since, until.unwrap_or_else(|| Utc::now().date_naive()))?;
            let retry = RepoRetry {
                attempts: settings.repo_attempts,
                delay: settings.repo_retry_delay(),
            };
            let client = GithubClient::new(auth.token, settings)?;

            info!(
                "Discovering contributors of {org} from {} to {}",
                window.from_iso(),
                window.to_iso()
            );
            let found = discover::discover(&client, &org, &window, retry).await?;
            if !found.skipped.is_empty() {
                warn!(
                    "Skipped {} of {} repositories: {}",
                    found.skipped.len(),
                    found.repositories,
                    found.skipped.join(", ")
                );
            }

            output::write_users(&out, &found.contributors)?;
            println!(
                "Successfully written {} users to {}",
                found.contributors.len(),
                out.display()
            );
        }
        Commands::Aggregate {
            users,
            out,
            start_year,
            monthly_out,
            fresh,
            auth,
        } => {
            let start_year = start_year.unwrap_or(settings.start_year);
            let years = years::years_through(start_year, Utc::now().date_naive())?;
            let users = output::read_users(&users)?;
            let done = if fresh {
                HashSet::new()
            } else {
                output::existing_users(&out)?
            };

            let mut sinks = Sinks {
                summaries: RowAppender::open(&out, fresh)?,
                monthly: monthly_out
                    .as_deref()
                    .map(|p| RowAppender::open(p, fresh))
                    .transpose()?,
            };
            let client = GithubClient::new(auth.token, settings)?;

            info!(
                "Aggregating {} users over {}..={}",
                users.len(),
                start_year,
                years.last().copied().unwrap_or(start_year)
            );
            if monthly_out.is_some() && !done.is_empty() {
                warn!(
                    "{} users are already in {}; their monthly rows are not backfilled",
                    done.len(),
                    out.display()
                );
            }
            let run = aggregate::aggregate(&client, &users, &years, &done, &mut sinks).await?;
            if run.resumed > 0 {
                info!("{} users were already in {}", run.resumed, out.display());
            }
            if !run.skipped.is_empty() {
                warn!(
                    "Skipped {} users: {}",
                    run.skipped.len(),
                    run.skipped.join(", ")
                );
            }
            println!("User data for {} users saved to {}", run.written, out.display());
        }
        Commands::Report { input, groups, out } => {
            let rows = output::read_summaries(&input)?;
            let mapping = groups.as_deref().map(output::read_groups).transpose()?;

            let summaries: Vec<_> = report::group_rows(&rows, mapping.as_ref())
                .into_iter()
                .map(|(group, members)| report::summarize_group(&group, &members))
                .collect();
            let text = report::build_report(&input.display().to_string(), &summaries);

            match out {
                Some(path) => {
                    output::write_text(&path, &text)?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{text}"),
            }
        }
    }

    Ok(())
}
