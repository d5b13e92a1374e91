//! The batch: scrape, filter, then one application task per job, strictly
//! one after another.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::agent::{
    AgentLoop, EasyApplyClassifier, FormDecider, LoopReport, LoopSettings, Outcome,
};
use crate::application_log::{ApplicationLog, JobStatus};
use crate::brain::{ApplicationData, Brain, Policy};
use crate::config::{AgentSettings, Credentials, Profile};
use crate::executor::ActionExecutor;
use crate::hands::{BrowserSession, LiveView};
use crate::jobs::{
    FILTERED_JOBS_FILE, JobPosting, SCRAPED_JOBS_FILE, easy_apply_only, filter_jobs, load_jobs,
    save_jobs,
};
use crate::materials::save_materials;
use crate::scrape::scrape_jobs;
use crate::types::{EASY_APPLY_MODAL_SELECTOR, JOB_DESCRIPTION_SELECTOR, PAGE_ANALYSIS_MAX_CYCLES};

const JOB_PAGE_WAIT: Duration = Duration::from_secs(15);

/// What the user wants done with the next job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Skip,
    Quit,
}

impl Decision {
    /// `n` quits, `skip` skips, anything else proceeds.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_lowercase().as_str() {
            "n" => Decision::Quit,
            "skip" => Decision::Skip,
            _ => Decision::Proceed,
        }
    }
}

/// Reports from the page-analysis loop and, if it got that far, the form loop.
#[derive(Debug, Clone)]
pub struct ApplyAttempt {
    pub page: LoopReport,
    pub form: Option<LoopReport>,
}

impl ApplyAttempt {
    pub fn succeeded(&self) -> bool {
        self.form
            .as_ref()
            .is_some_and(|form| form.outcome == Outcome::Succeeded)
    }
}

pub fn application_status(attempt: &Result<ApplyAttempt>) -> JobStatus {
    match attempt {
        Ok(attempt) if attempt.succeeded() => JobStatus::AppliedSuccessfully,
        Ok(_) => JobStatus::ApplicationFailed,
        Err(_) => JobStatus::CriticalFailure,
    }
}

/// Finds the Easy Apply button on `page`, then fills the form in `modal`.
pub async fn apply_on_page<P, V, M>(
    brain: &Brain<P>,
    page: &V,
    modal: &M,
    data: ApplicationData,
    story_bank: &Value,
    settings: &AgentSettings,
) -> ApplyAttempt
where
    P: Policy,
    V: LiveView + ?Sized,
    M: LiveView + ?Sized,
{
    let settle = Duration::from_millis(settings.form_settle_ms);
    let detector = AgentLoop::new(
        EasyApplyClassifier,
        ActionExecutor::new(brain, story_bank),
        LoopSettings::new(PAGE_ANALYSIS_MAX_CYCLES, Duration::ZERO),
    );
    let page_report = detector.run(page).await;
    if page_report.outcome != Outcome::Succeeded {
        return ApplyAttempt {
            page: page_report,
            form: None,
        };
    }
    tokio::time::sleep(settle).await;

    info!("handing over to the form agent");
    let filler = AgentLoop::new(
        FormDecider::new(brain, data),
        ActionExecutor::new(brain, story_bank).dry_run_submit(settings.dry_run_submit),
        LoopSettings::new(settings.form_max_cycles, settle),
    );
    let form_report = filler.run(modal).await;
    ApplyAttempt {
        page: page_report,
        form: Some(form_report),
    }
}

/// Runs one application task for a job.
#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, job: &JobPosting) -> Result<ApplyAttempt>;
}

/// Applies through a fresh browser session per job; the session is closed
/// when the task ends, whatever the outcome.
pub struct BrowserApplier<'a, P> {
    brain: &'a Brain<P>,
    profile: &'a Profile,
    credentials: &'a Credentials,
}

impl<'a, P: Policy> BrowserApplier<'a, P> {
    pub fn new(brain: &'a Brain<P>, profile: &'a Profile, credentials: &'a Credentials) -> Self {
        Self {
            brain,
            profile,
            credentials,
        }
    }

    fn application_data(&self) -> ApplicationData {
        let resume = std::path::absolute(&self.profile.resume_path)
            .unwrap_or_else(|_| self.profile.resume_path.clone());
        ApplicationData {
            phone: self.profile.personal_info.phone.clone(),
            resume_path: resume.to_string_lossy().into_owned(),
        }
    }
}

#[async_trait]
impl<P: Policy> Applier for BrowserApplier<'_, P> {
    async fn apply(&self, job: &JobPosting) -> Result<ApplyAttempt> {
        info!(title = %job.title, "starting application agent");
        let session = BrowserSession::launch(&self.profile.agent.browser).await?;
        session.login(self.credentials).await?;
        session.open(&job.url).await?;
        session
            .wait_for(JOB_DESCRIPTION_SELECTOR, JOB_PAGE_WAIT)
            .await
            .context("job page did not load")?;

        let page = session.view(Some("body"));
        let modal = session.view(Some(EASY_APPLY_MODAL_SELECTOR));
        let attempt = apply_on_page(
            self.brain,
            &page,
            &modal,
            self.application_data(),
            &self.profile.story_bank,
            &self.profile.agent,
        )
        .await;
        Ok(attempt)
    }
}

/// Tailors materials and applies to each job in order. A failing job is
/// logged and the batch moves on.
pub async fn process_jobs<P, A, C>(
    brain: &Brain<P>,
    profile: &Profile,
    jobs: &[JobPosting],
    applier: &A,
    log: &ApplicationLog,
    mut confirm: C,
) -> Result<Vec<JobStatus>>
where
    P: Policy,
    A: Applier + ?Sized,
    C: FnMut(usize, usize, &JobPosting) -> Result<Decision>,
{
    let applicant = profile.personal_info.full_name();
    let pause = Duration::from_secs(profile.agent.between_jobs_secs);
    let mut statuses = Vec::new();

    for (index, job) in jobs.iter().enumerate() {
        info!(n = index + 1, total = jobs.len(), title = %job.title, company = %job.company, url = %job.url, "processing job");
        let status = match confirm(index, jobs.len(), job)? {
            Decision::Quit => {
                info!("stopping at user request");
                break;
            }
            Decision::Skip => JobStatus::Skipped,
            Decision::Proceed => apply_to(brain, profile, &applicant, job, applier).await,
        };
        log.record(&job.title, &job.company, status)?;
        statuses.push(status);

        let proceeded = !matches!(status, JobStatus::Skipped);
        if proceeded && index + 1 < jobs.len() && !pause.is_zero() {
            info!(secs = pause.as_secs(), "waiting before next job");
            tokio::time::sleep(pause).await;
        }
    }
    Ok(statuses)
}

async fn apply_to<P, A>(
    brain: &Brain<P>,
    profile: &Profile,
    applicant: &str,
    job: &JobPosting,
    applier: &A,
) -> JobStatus
where
    P: Policy,
    A: Applier + ?Sized,
{
    let resume = match brain.tailor_resume(&profile.resume_data, &job.description).await {
        Ok(resume) => resume,
        Err(e) => {
            warn!(title = %job.title, "resume tailoring failed: {e}");
            return JobStatus::AiResumeFailed;
        }
    };
    let letter = match brain
        .cover_letter(&resume, &job.title, &job.company, applicant)
        .await
    {
        Ok(letter) => letter,
        Err(e) => {
            warn!(title = %job.title, "cover letter failed: {e}");
            return JobStatus::AiCoverLetterFailed;
        }
    };
    if let Err(e) = save_materials(
        &profile.agent.output_dir,
        &job.title,
        &job.company,
        &resume,
        &letter,
    ) {
        warn!(title = %job.title, "could not save materials: {e:#}");
    }

    let attempt = applier.apply(job).await;
    match &attempt {
        Ok(a) if a.succeeded() => info!(title = %job.title, "application complete"),
        Ok(a) => warn!(
            title = %job.title,
            page = ?a.page.outcome,
            form = ?a.form.as_ref().map(|f| &f.outcome),
            "application did not complete"
        ),
        Err(e) => error!(title = %job.title, "application task failed: {e:#}"),
    }
    application_status(&attempt)
}

/// Discovery phase: scrape and write `scraped_jobs.csv`.
pub async fn run_scrape<P: Policy>(
    brain: &Brain<P>,
    profile: &Profile,
    credentials: &Credentials,
    workdir: &Path,
) -> Result<Vec<JobPosting>> {
    let jobs = scrape_jobs(brain, &profile.job_search_criteria, &profile.agent, credentials).await?;
    if jobs.is_empty() {
        warn!("no jobs were scraped");
    } else {
        save_jobs(&workdir.join(SCRAPED_JOBS_FILE), &jobs)?;
    }
    Ok(jobs)
}

/// Filters `scraped_jobs.csv`, writes `filtered_jobs.csv` and returns the
/// Easy Apply postings among the survivors.
pub fn run_filter(profile: &Profile, workdir: &Path) -> Result<Vec<JobPosting>> {
    let scraped = load_jobs(&workdir.join(SCRAPED_JOBS_FILE))
        .context("scraped_jobs.csv not readable; run the scraper first")?;
    let total = scraped.len();
    let keywords = &profile.job_search_criteria.exclusion_keywords;
    info!(count = keywords.len(), keywords = %keywords.join(", "), "filtering");

    let (kept, rejected) = filter_jobs(scraped, keywords);
    info!(kept = kept.len(), total, rejected = rejected.len(), "filtering complete");
    if !kept.is_empty() {
        save_jobs(&workdir.join(FILTERED_JOBS_FILE), &kept)?;
    }

    let easy = easy_apply_only(kept);
    info!(count = easy.len(), "Easy Apply jobs to process");
    Ok(easy)
}
