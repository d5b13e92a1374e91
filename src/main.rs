use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;

use easy_apply_agent::application_log::{APPLICATION_LOG_FILE, ApplicationLog};
use easy_apply_agent::brain::Brain;
use easy_apply_agent::config::{Credentials, DEFAULT_PROFILE, Profile};
use easy_apply_agent::jobs::JobPosting;
use easy_apply_agent::openai::OpenAiPolicy;
use easy_apply_agent::workflow::{
    BrowserApplier, Decision, process_jobs, run_filter, run_scrape,
};

#[derive(Parser)]
#[command(
    name = "easy-apply",
    about = "Scrape, filter and Easy Apply to jobs with an LLM-driven browser agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Profile with personal data, search criteria and agent settings
    #[arg(short, long, global = true, default_value = DEFAULT_PROFILE)]
    profile: PathBuf,

    /// Directory for the job CSVs, the application log and output files
    #[arg(short, long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Apply to every job without asking first
    #[arg(short, long, global = true)]
    yes: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape, filter, then apply
    Run,
    /// Filter the existing scraped_jobs.csv, then apply
    Apply,
    /// Only scrape jobs into scraped_jobs.csv
    Scrape,
    /// Only filter scraped_jobs.csv into filtered_jobs.csv
    Filter,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mut profile = Profile::load(&cli.profile)?;
    profile.agent.output_dir = cli.workdir.join(&profile.agent.output_dir);
    info!(profile = %cli.profile.display(), "configuration loaded");

    if let Commands::Filter = cli.command {
        run_filter(&profile, &cli.workdir)?;
        return Ok(());
    }

    let credentials = Credentials::from_env()?;
    let brain = Brain::new(OpenAiPolicy::new(
        credentials.openai_api_key.clone(),
        profile.agent.model.clone(),
        profile.agent.temperature,
    ));

    match cli.command {
        Commands::Scrape => {
            run_scrape(&brain, &profile, &credentials, &cli.workdir).await?;
            return Ok(());
        }
        Commands::Run => {
            run_scrape(&brain, &profile, &credentials, &cli.workdir).await?;
        }
        Commands::Apply => info!("skipping scraping, using existing scraped_jobs.csv"),
        Commands::Filter => {}
    }

    let jobs = run_filter(&profile, &cli.workdir)?;
    if jobs.is_empty() {
        info!("no Easy Apply jobs left after filtering");
        return Ok(());
    }

    let applier = BrowserApplier::new(&brain, &profile, &credentials);
    let log = ApplicationLog::new(cli.workdir.join(APPLICATION_LOG_FILE));
    let auto = cli.yes;
    let statuses = process_jobs(&brain, &profile, &jobs, &applier, &log, |index, total, job| {
        if auto {
            return Ok(Decision::Proceed);
        }
        ask(index, total, job)
    })
    .await?;

    info!(processed = statuses.len(), log = %log.path().display(), "application log updated");
    Ok(())
}

fn ask(index: usize, total: usize, job: &JobPosting) -> Result<Decision> {
    let mut stdout = io::stdout();
    writeln!(stdout, "\nJob {}/{}: '{}' at '{}'", index + 1, total, job.title, job.company)?;
    writeln!(stdout, "URL: {}", job.url)?;
    write!(stdout, "Proceed with this job? (y/n/skip): ")?;
    stdout.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(Decision::from_answer(&answer))
}
