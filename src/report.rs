use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use crate::output::SummaryRow;

/// Group of users with no entry in the mapping file.
pub const UNASSIGNED: &str = "unassigned";
/// The single group used when no mapping file is given.
pub const ALL: &str = "all";

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub column: &'static str,
    pub total: u64,
    pub mean: f64,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub group: String,
    pub users: usize,
    pub columns: Vec<ColumnStats>,
    /// Sorted by count descending, then name.
    pub languages: Vec<(String, usize)>,
}

type Column = (&'static str, fn(&SummaryRow) -> u64);

const COLUMNS: [Column; 6] = [
    ("contributions", |r| r.contributions),
    ("commits", |r| r.commits),
    ("issues", |r| r.issues),
    ("pull_requests", |r| r.pull_requests),
    ("reviews", |r| r.reviews),
    ("repositories", |r| r.repositories),
];

/// Split rows by cohort, in group-name order.
pub fn group_rows<'a>(
    rows: &'a [SummaryRow],
    groups: Option<&HashMap<String, String>>,
) -> BTreeMap<String, Vec<&'a SummaryRow>> {
    let mut out: BTreeMap<String, Vec<&SummaryRow>> = BTreeMap::new();
    for row in rows {
        let group = match groups {
            None => ALL.to_string(),
            Some(map) => map
                .get(&row.user)
                .cloned()
                .unwrap_or_else(|| UNASSIGNED.to_string()),
        };
        out.entry(group).or_default().push(row);
    }
    out
}

pub fn summarize_group(group: &str, rows: &[&SummaryRow]) -> GroupSummary {
    let columns = COLUMNS
        .iter()
        .map(|&(column, get)| {
            let values: Vec<u64> = rows.iter().map(|r| get(r)).collect();
            let total: u64 = values.iter().sum();
            ColumnStats {
                column,
                total,
                mean: if values.is_empty() {
                    0.0
                } else {
                    total as f64 / values.len() as f64
                },
                median: median(values),
            }
        })
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        *counts.entry(row.primary_language.as_str()).or_insert(0) += 1;
    }
    let mut languages: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(lang, n)| (lang.to_string(), n))
        .collect();
    languages.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    GroupSummary {
        group: group.to_string(),
        users: rows.len(),
        columns,
        languages,
    }
}

fn median(mut values: Vec<u64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] as f64 + values[mid] as f64) / 2.0
    } else {
        values[mid] as f64
    }
}

pub fn build_report(source: &str, summaries: &[GroupSummary]) -> String {
    let mut output = String::new();
    let users: usize = summaries.iter().map(|s| s.users).sum();

    let _ = writeln!(output, "# Contribution Report");
    let _ = writeln!(
        output,
        "Generated from {} ({} users in {} groups)",
        source,
        users,
        summaries.len()
    );

    if summaries.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "No users recorded.");
        return output;
    }

    for summary in summaries {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {} ({} users)", summary.group, summary.users);
        let _ = writeln!(output);
        let _ = writeln!(output, "| column | total | mean | median |");
        let _ = writeln!(output, "|---|---:|---:|---:|");
        for c in &summary.columns {
            let _ = writeln!(
                output,
                "| {} | {} | {:.2} | {:.1} |",
                c.column, c.total, c.mean, c.median
            );
        }

        let _ = writeln!(output);
        let _ = writeln!(output, "### Primary languages");
        for (lang, n) in &summary.languages {
            let _ = writeln!(output, "- {lang}: {n}");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user: &str, commits: u64, lang: &str) -> SummaryRow {
        SummaryRow {
            user: user.to_string(),
            contributions: commits * 2,
            commits,
            issues: 0,
            pull_requests: 1,
            reviews: 0,
            repositories: 3,
            primary_language: lang.to_string(),
        }
    }

    fn column<'a>(s: &'a GroupSummary, name: &str) -> &'a ColumnStats {
        s.columns.iter().find(|c| c.column == name).unwrap()
    }

    #[test]
    fn median_handles_odd_and_even() {
        assert_eq!(median(vec![5, 1, 3]), 3.0);
        assert_eq!(median(vec![4, 1, 3, 2]), 2.5);
        assert_eq!(median(Vec::new()), 0.0);
    }

    #[test]
    fn rows_are_grouped_by_mapping() {
        let rows = vec![row("amy", 1, "Rust"), row("bob", 2, "Go"), row("cat", 3, "C")];
        let mut map = HashMap::new();
        map.insert("amy".to_string(), "PBL".to_string());
        map.insert("bob".to_string(), "EBL".to_string());

        let grouped = group_rows(&rows, Some(&map));
        let names: Vec<&str> = grouped.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["EBL", "PBL", UNASSIGNED]);
        assert_eq!(grouped[UNASSIGNED][0].user, "cat");

        let all = group_rows(&rows, None);
        assert_eq!(all[ALL].len(), 3);
    }

    #[test]
    fn group_statistics() {
        let rows = vec![
            row("amy", 1, "Rust"),
            row("bob", 10, "Python"),
            row("cat", 4, "Rust"),
            row("dan", 5, "N/A"),
        ];
        let refs: Vec<&SummaryRow> = rows.iter().collect();
        let s = summarize_group("EBL", &refs);

        assert_eq!(s.users, 4);
        let commits = column(&s, "commits");
        assert_eq!(commits.total, 20);
        assert_eq!(commits.mean, 5.0);
        assert_eq!(commits.median, 4.5);
        assert_eq!(column(&s, "pull_requests").total, 4);
        assert_eq!(
            s.languages,
            vec![
                ("Rust".to_string(), 2),
                ("N/A".to_string(), 1),
                ("Python".to_string(), 1)
            ]
        );
    }

    #[test]
    fn report_lists_each_group() {
        let rows = vec![row("amy", 2, "Rust")];
        let refs: Vec<&SummaryRow> = rows.iter().collect();
        let report = build_report("out.csv", &[summarize_group("PBL", &refs)]);
        assert!(report.contains("Generated from out.csv (1 users in 1 groups)"));
        assert!(report.contains("## PBL (1 users)"));
        assert!(report.contains("| commits | 2 | 2.00 | 2.0 |"));
        assert!(report.contains("- Rust: 1"));
    }

    #[test]
    fn empty_report_says_so() {
        assert!(build_report("out.csv", &[]).contains("No users recorded."));
    }
}
