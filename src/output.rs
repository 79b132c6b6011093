// CSV files shared between the stages.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::stats::UserSummary;

/// Header of the contributor list.
pub const USER_HEADER: &str = "User";

/// One row of the aggregation output. Column order is the file's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub user: String,
    pub contributions: u64,
    pub commits: u64,
    pub issues: u64,
    pub pull_requests: u64,
    pub reviews: u64,
    pub repositories: u64,
    pub primary_language: String,
}

impl From<&UserSummary> for SummaryRow {
    fn from(s: &UserSummary) -> Self {
        Self {
            user: s.user.clone(),
            contributions: s.contributions,
            commits: s.commits,
            issues: s.issues,
            pull_requests: s.pull_requests,
            reviews: s.reviews,
            repositories: s.repositories,
            primary_language: s.primary_language.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRow {
    pub user: String,
    pub month: String,
    pub contributions: u64,
}

/// Write the contributor list, one login per row, sorted.
pub fn write_users(path: &Path, users: &BTreeSet<String>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record([USER_HEADER])?;
    for user in users {
        writer.write_record([user])?;
    }
    writer.flush()?;
    Ok(())
}

/// Read logins from the first column of `path`.
///
/// A leading `User` header is skipped, blanks are ignored and repeats are
/// dropped keeping first-seen order.
pub fn read_users(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut seen = HashSet::new();
    let mut users = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Bad row {} in {}", i + 1, path.display()))?;
        let Some(cell) = record.get(0).map(str::trim) else {
            continue;
        };
        if cell.is_empty() || (i == 0 && cell.eq_ignore_ascii_case(USER_HEADER)) {
            continue;
        }
        if seen.insert(cell.to_string()) {
            users.push(cell.to_string());
        }
    }
    Ok(users)
}

/// Read every row of an aggregation output file.
pub fn read_summaries(path: &Path) -> Result<Vec<SummaryRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<SummaryRow>() {
        rows.push(result.with_context(|| format!("Bad summary row in {}", path.display()))?);
    }
    Ok(rows)
}

/// `user,group` cohort mapping, e.g. `amy,EBL`.
pub fn read_groups(path: &Path) -> Result<HashMap<String, String>> {
    #[derive(Deserialize)]
    struct GroupRow {
        user: String,
        group: String,
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut groups = HashMap::new();
    for result in reader.deserialize::<GroupRow>() {
        let row = result.with_context(|| format!("Bad group row in {}", path.display()))?;
        groups.insert(row.user, row.group);
    }
    Ok(groups)
}

/// Users already written to `path`; empty when the file does not exist.
pub fn existing_users(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    Ok(read_summaries(path)?.into_iter().map(|r| r.user).collect())
}

/// Appends serialized rows to a CSV file, writing the header only when the
/// file starts out empty. Every row is flushed as soon as it is written.
pub struct RowAppender {
    writer: csv::Writer<File>,
    path: String,
}

impl RowAppender {
    /// Open for appending, or truncate first when `fresh`.
    pub fn open(path: &Path, fresh: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!fresh)
            .truncate(fresh)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let empty = file
            .metadata()
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len()
            == 0;

        let writer = csv::WriterBuilder::new()
            .has_headers(empty)
            .from_writer(file);
        Ok(Self {
            writer,
            path: path.display().to_string(),
        })
    }

    pub fn append<T: Serialize>(&mut self, row: &T) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("Failed to write to {}", self.path))?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path))?;
        Ok(())
    }
}

/// Write a whole text file, e.g. a rendered report.
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(text.as_bytes())?;
    Ok(())
}
