//! Job discovery: log in, search, let the scroll agent reveal listings,
//! then read every card and its description pane.

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agent::{AgentLoop, LoopSettings, ScrollDecider};
use crate::brain::{Brain, Policy};
use crate::config::{AgentSettings, Credentials, SearchCriteria};
use crate::executor::ActionExecutor;
use crate::hands::BrowserSession;
use crate::jobs::{
    DESCRIPTION_UNAVAILABLE, EasyApply, JobPosting, dedup_by_url, parse_card_text,
};
use crate::types::JOB_CARD_SELECTOR;

const SEARCH_URL: &str = "https://www.linkedin.com/jobs/search/";
const JOB_DETAILS_SELECTOR: &str = ".jobs-details__main-content";
const SEARCH_SETTLE: Duration = Duration::from_secs(5);
const CARD_SETTLE: Duration = Duration::from_millis(1500);
const DETAILS_WAIT: Duration = Duration::from_secs(5);

/// Remote-only search for `criteria`.
pub fn search_url(criteria: &SearchCriteria) -> Result<Url> {
    Url::parse_with_params(
        SEARCH_URL,
        [
            ("f_WT", "2"),
            ("keywords", criteria.keywords.as_str()),
            ("location", criteria.location.as_str()),
            ("refresh", "true"),
        ],
    )
    .context("building search URL")
}

/// Text and first link of one result card, as read from the page.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCard {
    pub text: String,
    pub href: Option<String>,
}

/// Builds a posting from a card. Cards without a link are dropped; the
/// description is filled in later.
pub fn card_to_posting(card: &RawCard) -> Option<JobPosting> {
    let fields = parse_card_text(&card.text)?;
    let href = card.href.as_deref()?;
    let url = href.split('?').next().unwrap_or(href).to_string();
    let is_easy_apply = if card.text.to_lowercase().contains("easy apply") {
        EasyApply::Yes
    } else {
        EasyApply::No
    };
    Some(JobPosting {
        title: fields.title,
        company: fields.company,
        location: fields.location,
        url,
        is_easy_apply,
        description: DESCRIPTION_UNAVAILABLE.to_string(),
    })
}

fn read_cards_js() -> String {
    format!(
        r#"JSON.stringify([...document.querySelectorAll({sel})].map(card => {{
  const link = card.querySelector('a');
  return {{ text: card.innerText || '', href: link ? link.href : null }};
}}))"#,
        sel = Value::String(JOB_CARD_SELECTOR.to_string())
    )
}

fn click_card_js(index: usize) -> String {
    format!(
        "(() => {{ const c = document.querySelectorAll({sel})[{index}]; if (!c) return false; c.click(); return true; }})()",
        sel = Value::String(JOB_CARD_SELECTOR.to_string())
    )
}

fn details_text_js() -> String {
    format!(
        "((document.querySelector({sel}) || {{}}).innerText || '').trim()",
        sel = Value::String(JOB_DETAILS_SELECTOR.to_string())
    )
}

/// Runs the whole discovery phase in its own browser session. Returns
/// postings deduplicated by URL.
pub async fn scrape_jobs<P: Policy>(
    brain: &Brain<P>,
    criteria: &SearchCriteria,
    settings: &AgentSettings,
    credentials: &Credentials,
) -> Result<Vec<JobPosting>> {
    let session = BrowserSession::launch(&settings.browser).await?;
    session.login(credentials).await?;

    let url = search_url(criteria)?;
    session.open(url.as_str()).await?;
    info!(%url, "searching");
    tokio::time::sleep(SEARCH_SETTLE).await;

    let story_bank = Value::Null;
    let scroller = AgentLoop::new(
        ScrollDecider::new(brain),
        ActionExecutor::new(brain, &story_bank),
        LoopSettings::new(
            settings.scroll_max_cycles,
            Duration::from_millis(settings.scroll_settle_ms),
        )
        .follow_selector_clicks(settings.follow_load_more),
    );
    let report = scroller.run(&session.view(None)).await;
    info!(outcome = ?report.outcome, cycles = report.cycles, "scrolling finished, collecting cards");

    let jobs = collect_cards(&session).await?;
    let unique = dedup_by_url(jobs);
    info!(unique = unique.len(), "scrape complete");
    Ok(unique)
}

async fn collect_cards(session: &BrowserSession) -> Result<Vec<JobPosting>> {
    // Objects do not come back by value; the script returns them as JSON text.
    let raw = session.evaluate(read_cards_js()).await?;
    let cards: Vec<RawCard> =
        serde_json::from_str(raw.as_str().unwrap_or("[]")).context("reading job cards")?;
    info!(count = cards.len(), "found job cards");

    let mut jobs = Vec::new();
    for (index, card) in cards.iter().enumerate() {
        let Some(mut job) = card_to_posting(card) else {
            debug!(index, "card without title or link, skipping");
            continue;
        };
        match read_description(session, index).await {
            Ok(description) => job.description = description,
            Err(e) => {
                warn!(index, title = %job.title, "could not load description: {e:#}");
                continue;
            }
        }
        info!(title = %job.title, easy_apply = ?job.is_easy_apply, "scraped");
        jobs.push(job);
    }
    Ok(jobs)
}

async fn read_description(session: &BrowserSession, index: usize) -> Result<String> {
    session.evaluate(click_card_js(index)).await?;
    tokio::time::sleep(CARD_SETTLE).await;
    session.wait_for(JOB_DETAILS_SELECTOR, DETAILS_WAIT).await?;
    let text = session.evaluate(details_text_js()).await?;
    Ok(text.as_str().unwrap_or_default().to_string())
}
