//! `profile.yml` plus the secrets read from the environment.
//!
//! Secrets are loaded once into [`Credentials`] and handed to whoever needs
//! them; nothing else in the crate reads the environment.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::{FORM_MAX_CYCLES, SCROLL_MAX_CYCLES};

pub const DEFAULT_PROFILE: &str = "profile.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub personal_info: PersonalInfo,
    pub job_search_criteria: SearchCriteria,
    #[serde(default)]
    pub resume_data: Value,
    #[serde(default)]
    pub story_bank: Value,
    pub resume_path: PathBuf,
    #[serde(default)]
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonalInfo {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
}

impl PersonalInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchCriteria {
    pub keywords: String,
    pub location: String,
    #[serde(default)]
    pub exclusion_keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub scroll_max_cycles: usize,
    pub form_max_cycles: usize,
    /// Wait after each scroll action before the next capture.
    pub scroll_settle_ms: u64,
    /// Wait after each form action before the next capture.
    pub form_settle_ms: u64,
    /// Follow `CLICK <selector>` during discovery instead of aborting.
    pub follow_load_more: bool,
    /// Only locate the submit button instead of clicking it.
    pub dry_run_submit: bool,
    pub between_jobs_secs: u64,
    pub output_dir: PathBuf,
    pub browser: BrowserSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4-turbo-preview".to_string(),
            temperature: 0.2,
            scroll_max_cycles: SCROLL_MAX_CYCLES,
            form_max_cycles: FORM_MAX_CYCLES,
            scroll_settle_ms: 3000,
            form_settle_ms: 2000,
            follow_load_more: false,
            dry_run_submit: true,
            between_jobs_secs: 10,
            output_dir: PathBuf::from("output"),
            browser: BrowserSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub profile_dir: Option<PathBuf>,
    pub element_wait_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: false,
            chrome_path: None,
            profile_dir: None,
            element_wait_ms: 10_000,
        }
    }
}

impl BrowserSettings {
    /// Chrome user data directory; persistent so logins survive between runs.
    pub fn profile_dir(&self) -> PathBuf {
        self.profile_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("easy-apply-agent")
                .join("chrome-profile")
        })
    }
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let profile: Profile = serde_yaml::from_str(raw)?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.scroll_max_cycles == 0 || self.agent.form_max_cycles == 0 {
            bail!("cycle budgets must be at least 1");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub linkedin_email: String,
    pub linkedin_password: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{key} not set in environment"))
        };
        Ok(Self {
            openai_api_key: require("OPENAI_API_KEY")?,
            linkedin_email: require("LINKEDIN_EMAIL")?,
            linkedin_password: require("LINKEDIN_PASSWORD")?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"<redacted>")
            .field("linkedin_email", &self.linkedin_email)
            .field("linkedin_password", &"<redacted>")
            .finish()
    }
}
