//! Job postings: the CSV hand-off between scraping and applying, the
//! exclusion filter and the card-text heuristics.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

pub const SCRAPED_JOBS_FILE: &str = "scraped_jobs.csv";
pub const FILTERED_JOBS_FILE: &str = "filtered_jobs.csv";
pub const NOT_AVAILABLE: &str = "N/A";
pub const DESCRIPTION_UNAVAILABLE: &str = "Description could not be loaded.";

static CARD_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)viewed|promoted|alumni|applicants").expect("card noise pattern"));

/// "City, Region, Country" or a workplace tag such as "(Remote)".
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[^,]+,\s*[^,]+,\s*\S|\((remote|hybrid|on-site)\)").expect("location pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EasyApply {
    Yes,
    No,
}

impl<'de> Deserialize<'de> for EasyApply {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(if raw.trim().eq_ignore_ascii_case("yes") {
            EasyApply::Yes
        } else {
            EasyApply::No
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub is_easy_apply: EasyApply,
    pub description: String,
}

pub fn load_jobs(path: &Path) -> Result<Vec<JobPosting>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let jobs = reader
        .deserialize()
        .collect::<Result<Vec<JobPosting>, _>>()
        .with_context(|| format!("reading {}", path.display()))?;
    info!(count = jobs.len(), file = %path.display(), "loaded jobs");
    Ok(jobs)
}

pub fn save_jobs(path: &Path, jobs: &[JobPosting]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for job in jobs {
        writer.serialize(job).context("writing job record")?;
    }
    writer.flush().context("flushing job records")?;
    info!(count = jobs.len(), file = %path.display(), "saved jobs");
    Ok(())
}

/// One posting per URL, in first-seen order; later duplicates replace the
/// earlier record. Postings without a URL are dropped.
pub fn dedup_by_url(jobs: Vec<JobPosting>) -> Vec<JobPosting> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<JobPosting> = Vec::new();
    for job in jobs {
        if job.url == NOT_AVAILABLE || job.url.is_empty() {
            continue;
        }
        match seen.get(&job.url) {
            Some(&at) => unique[at] = job,
            None => {
                seen.insert(job.url.clone(), unique.len());
                unique.push(job);
            }
        }
    }
    unique
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub title: String,
    pub keyword: String,
}

/// Drops every posting whose title or description mentions an exclusion
/// keyword (case-insensitive). Returns the kept postings and why the others
/// were rejected.
pub fn filter_jobs(
    jobs: Vec<JobPosting>,
    exclusion_keywords: &[String],
) -> (Vec<JobPosting>, Vec<Rejection>) {
    let keywords: Vec<String> = exclusion_keywords
        .iter()
        .map(|k| k.to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

    let mut kept = Vec::new();
    let mut rejected = Vec::new();
    for job in jobs {
        let haystack = format!("{} {}", job.title, job.description).to_lowercase();
        match keywords.iter().find(|k| haystack.contains(k.as_str())) {
            Some(keyword) => {
                info!(title = %job.title, %keyword, "rejected");
                rejected.push(Rejection {
                    title: job.title,
                    keyword: keyword.clone(),
                });
            }
            None => kept.push(job),
        }
    }
    (kept, rejected)
}

pub fn easy_apply_only(jobs: Vec<JobPosting>) -> Vec<JobPosting> {
    jobs.into_iter()
        .filter(|job| job.is_easy_apply == EasyApply::Yes)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardFields {
    pub title: String,
    pub company: String,
    pub location: String,
}

/// Best-effort split of a search-result card's visible text.
///
/// The first line is the title. The company is the last line that is not the
/// title and not engagement noise ("5 applicants", "Promoted"), stopping
/// early once the line after it contains a comma or a workplace tag. The
/// location is the first line that looks like one.
pub fn parse_card_text(text: &str) -> Option<CardFields> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let title = *lines.first()?;

    let mut company = NOT_AVAILABLE;
    for (i, line) in lines.iter().enumerate() {
        if *line == title || CARD_NOISE.is_match(line) {
            continue;
        }
        company = *line;
        if lines
            .get(i + 1)
            .is_some_and(|next| next.contains(',') || LOCATION.is_match(next))
        {
            break;
        }
    }

    let location = lines
        .iter()
        .find(|line| LOCATION.is_match(line))
        .copied()
        .unwrap_or(NOT_AVAILABLE);

    Some(CardFields {
        title: title.to_string(),
        company: company.to_string(),
        location: location.to_string(),
    })
}
