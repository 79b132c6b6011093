use std::collections::BTreeMap;

/// Language written when a user has no language observations.
pub const NO_LANGUAGE: &str = "N/A";

/// Contribution counts of one user in one calendar year.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YearStats {
    pub year: i32,
    pub contributions: u64,
    pub commits: u64,
    pub issues: u64,
    pub pull_requests: u64,
    pub reviews: u64,
    /// Language name -> commit contributions made in repositories with that primary language.
    pub languages: BTreeMap<String, u64>,
    /// `YYYY-MM` -> contributions on the calendar.
    pub monthly: BTreeMap<String, u64>,
}

impl YearStats {
    pub fn empty(year: i32) -> Self {
        Self {
            year,
            ..Self::default()
        }
    }

    pub fn primary_language(&self) -> Option<&str> {
        dominant(&self.languages)
    }
}

/// One output row per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub user: String,
    pub contributions: u64,
    pub commits: u64,
    pub issues: u64,
    pub pull_requests: u64,
    pub reviews: u64,
    pub repositories: u64,
    pub primary_language: String,
    pub monthly: BTreeMap<String, u64>,
}

/// Reduce the per-year records of `user` into a single summary.
///
/// Counts are summed; the language is the one with the highest weight
/// summed across years, ties going to the smallest name. The order of
/// `years` does not matter.
pub fn summarize(user: &str, years: &[YearStats], repositories: u64) -> UserSummary {
    let mut languages: BTreeMap<String, u64> = BTreeMap::new();
    let mut monthly: BTreeMap<String, u64> = BTreeMap::new();
    let mut summary = UserSummary {
        user: user.to_string(),
        contributions: 0,
        commits: 0,
        issues: 0,
        pull_requests: 0,
        reviews: 0,
        repositories,
        primary_language: NO_LANGUAGE.to_string(),
        monthly: BTreeMap::new(),
    };

    for y in years {
        summary.contributions = summary.contributions.saturating_add(y.contributions);
        summary.commits = summary.commits.saturating_add(y.commits);
        summary.issues = summary.issues.saturating_add(y.issues);
        summary.pull_requests = summary.pull_requests.saturating_add(y.pull_requests);
        summary.reviews = summary.reviews.saturating_add(y.reviews);

        for (lang, weight) in &y.languages {
            let total = languages.entry(lang.clone()).or_insert(0);
            *total = total.saturating_add(*weight);
        }
        for (month, count) in &y.monthly {
            let total = monthly.entry(month.clone()).or_insert(0);
            *total = total.saturating_add(*count);
        }
    }

    if let Some(lang) = dominant(&languages) {
        summary.primary_language = lang.to_string();
    }
    summary.monthly = monthly;
    summary
}

/// Highest weight wins; on equal weight the smallest name wins.
fn dominant(weights: &BTreeMap<String, u64>) -> Option<&str> {
    let mut best: Option<(&str, u64)> = None;
    // BTreeMap iterates in name order, so a strict `>` keeps the smallest name on ties
    for (name, &weight) in weights {
        if weight == 0 {
            continue;
        }
        match best {
            Some((_, w)) if weight <= w => {}
            _ => best = Some((name.as_str(), weight)),
        }
    }
    best.map(|(name, _)| name)
}
