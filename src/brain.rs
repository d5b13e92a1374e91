use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::perception::Perception;
use crate::protocol::Command;
use crate::types::{FORM_MARKUP_MAX_CHARS, SCROLL_TEXT_MAX_CHARS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Transport or service failure. Never retried here.
    #[error("policy unavailable: {0}")]
    Unavailable(String),
    /// A structured response did not match the requested schema.
    #[error("policy response violates schema: {0}")]
    SchemaViolation(String),
}

/// A function the policy is forced to call, described by a JSON schema.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// The external reasoning service.
#[async_trait]
pub trait Policy: Send + Sync {
    /// One prompt in, free text out.
    async fn complete(&self, prompt: &str) -> Result<String, PolicyError>;

    /// One prompt in, the raw JSON arguments of a forced `function` call out.
    async fn complete_with_function(
        &self,
        prompt: &str,
        function: &FunctionDef,
    ) -> Result<String, PolicyError>;
}

/// Personal data the form-filling policy may use.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationData {
    pub phone: String,
    pub resume_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailoredResume {
    pub tailored_summary: String,
    pub tailored_work_experience: Vec<TailoredExperience>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailoredExperience {
    pub company: String,
    pub role: String,
    pub dates: String,
    pub rewritten_responsibilities: Vec<String>,
}

pub const TAILOR_FUNCTION_NAME: &str = "format_tailored_resume";

fn tailor_function() -> FunctionDef {
    FunctionDef {
        name: TAILOR_FUNCTION_NAME,
        description: "Formats the tailored resume summary and work experience based on the job description.",
        parameters: json!({
            "type": "object",
            "properties": {
                "tailored_summary": {
                    "type": "string",
                    "description": "A new, rewritten professional summary of 2-3 sentences, tailored to the job description."
                },
                "tailored_work_experience": {
                    "type": "array",
                    "description": "Work experience entries with responsibilities rewritten to highlight skills relevant to the job description.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "company": {"type": "string"},
                            "role": {"type": "string"},
                            "dates": {"type": "string"},
                            "rewritten_responsibilities": {
                                "type": "array",
                                "description": "2-4 rewritten responsibility bullet points emphasizing skills from the job description.",
                                "items": {"type": "string"}
                            }
                        },
                        "required": ["company", "role", "dates", "rewritten_responsibilities"]
                    }
                }
            },
            "required": ["tailored_summary", "tailored_work_experience"]
        }),
    }
}

/// Prompt construction around a [`Policy`].
pub struct Brain<P> {
    policy: P,
}

impl<P: Policy> Brain<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    async fn ask(&self, prompt: &str) -> Result<String, PolicyError> {
        let raw = self.policy.complete(prompt).await?;
        let cleaned = clean_response(&raw);
        debug!(response = %cleaned, "policy replied");
        Ok(cleaned)
    }

    pub async fn decide_scroll(
        &self,
        perception: &Perception,
        history: &[Command],
    ) -> Result<String, PolicyError> {
        info!("asking policy how to scroll");
        self.ask(&scroll_prompt(perception, history)).await
    }

    pub async fn decide_form(
        &self,
        perception: &Perception,
        history: &[Command],
        data: &ApplicationData,
    ) -> Result<String, PolicyError> {
        info!("asking policy for the next form action");
        self.ask(&form_prompt(perception, history, data)).await
    }

    /// Free-text answer to an application question, grounded in the story bank.
    pub async fn answer(&self, question: &str, story_bank: &Value) -> Result<String, PolicyError> {
        info!(%question, "asking policy to answer a question");
        self.ask(&answer_prompt(question, story_bank)).await
    }

    pub async fn tailor_resume(
        &self,
        resume: &Value,
        job_description: &str,
    ) -> Result<TailoredResume, PolicyError> {
        info!("asking policy to tailor the resume");
        let arguments = self
            .policy
            .complete_with_function(&tailor_prompt(resume, job_description), &tailor_function())
            .await?;
        parse_tailored_resume(&arguments)
    }

    pub async fn cover_letter(
        &self,
        resume: &TailoredResume,
        job_title: &str,
        company: &str,
        applicant: &str,
    ) -> Result<String, PolicyError> {
        info!(%job_title, %company, "asking policy for a cover letter");
        let letter = self
            .policy
            .complete(&cover_letter_prompt(resume, job_title, company, applicant))
            .await?;
        let letter = letter.trim();
        if letter.is_empty() {
            return Err(PolicyError::SchemaViolation("empty cover letter".to_string()));
        }
        Ok(letter.to_string())
    }
}

pub fn parse_tailored_resume(arguments: &str) -> Result<TailoredResume, PolicyError> {
    serde_json::from_str(arguments)
        .map_err(|e| PolicyError::SchemaViolation(format!("{TAILOR_FUNCTION_NAME}: {e}")))
}

/// Trims the reply and strips the markdown fences or backticks models like
/// to wrap single-line answers in.
pub fn clean_response(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("```text")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .trim_matches('`')
        .trim()
        .to_string()
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((at, _)) => &s[..at],
        None => s,
    }
}

fn history_line(history: &[Command]) -> String {
    if history.is_empty() {
        return "None".to_string();
    }
    history
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn scroll_prompt(perception: &Perception, history: &[Command]) -> String {
    let text = perception.document.text("\n");
    format!(
        r#"You are an expert web scraping agent. Your goal is to scroll a LinkedIn job search page to reveal all possible job listings.
The current simplified text view of the page is:
--- PAGE STATE (first {SCROLL_TEXT_MAX_CHARS} chars) ---
{page}
So far, you have found {jobs} jobs.
The previous actions you have taken are: {history}.
Based on this, what is the best action to take next to find more jobs?
Your available actions are:
1. "SCROLL_WINDOW": Scroll the main window down. This is the most common action.
2. "CLICK <CSS_SELECTOR>": Click a 'load more' button. You must provide a valid CSS selector for the button.
3. "STOP": If you believe all jobs have been loaded, you are stuck, or you see text like "you've seen all jobs".
Analyze the page state. If you see a "See more jobs" or "Load more" button, choose CLICK. Otherwise, SCROLL_WINDOW is the default safe action.
Your response must be ONLY ONE of the actions listed above. For example: `SCROLL_WINDOW` or `CLICK button.jobs-search-results__load-more-button`."#,
        page = truncate_chars(&text, SCROLL_TEXT_MAX_CHARS),
        jobs = perception.jobs_found.unwrap_or(0),
        history = history_line(history),
    )
}

pub fn form_prompt(perception: &Perception, history: &[Command], data: &ApplicationData) -> String {
    let personal = serde_json::to_string_pretty(data).unwrap_or_default();
    format!(
        r#"You are an expert robotic process automation (RPA) agent. Your goal is to fill out and submit this job application form.
Here is your personal data for the application:
--- PERSONAL DATA ---
{personal}
Here is the current state of the application form's HTML. Interactive elements have a unique `agent-id` attribute.
--- FORM HTML (first {FORM_MARKUP_MAX_CHARS} chars) ---
{form}
The previous actions you have taken are: {history}.
Based on the HTML and your personal data, what is the single next action you should take?
Your available actions are:
1. `TYPE <agent-id> <text_to_type>`
2. `SELECT <agent-id> <option_text>`
3. `CLICK <agent-id>`
4. `UPLOAD <agent-id> <file_path>`
5. `ANSWER <agent-id> <question_text>`
6. `SUBMIT <agent-id>`
7. `DONE`
8. `FAIL <reason>`
Your response must be a single line in the format `COMMAND agent-id value`. Do not explain."#,
        form = perception.document.render(FORM_MARKUP_MAX_CHARS),
        history = history_line(history),
    )
}

pub fn answer_prompt(question: &str, story_bank: &Value) -> String {
    let stories = serde_json::to_string_pretty(story_bank).unwrap_or_default();
    format!(
        r#"You are a career coach helping me answer a job application question.
The question is: "{question}"
Here is my "Story Bank" with my key career experiences:
--- STORY BANK ---
{stories}
Please generate a concise, professional answer to the question. The answer should be a single block of text. Do not add any conversational filler."#
    )
}

pub fn tailor_prompt(resume: &Value, job_description: &str) -> String {
    let resume = serde_json::to_string_pretty(resume).unwrap_or_default();
    format!(
        r#"Here is my resume data in JSON format:
--- RESUME DATA ---
{resume}

Here is the job description for a role I want to apply for:
--- JOB DESCRIPTION ---
{job_description}

Please analyze the job description and my resume. Your task is to rewrite my 'summary' and the 'responsibilities' for each work experience to better align with the requirements and keywords found in the job description.
Focus on creating impactful, results-oriented bullet points that mirror the language of the job description where appropriate.
Use the `{TAILOR_FUNCTION_NAME}` function to return your answer."#
    )
}

pub fn cover_letter_prompt(
    resume: &TailoredResume,
    job_title: &str,
    company: &str,
    applicant: &str,
) -> String {
    let context = serde_json::to_string_pretty(resume).unwrap_or_default();
    format!(
        r#"My name is {applicant}. I am applying for the {job_title} role at {company}.
Here is my resume, which has already been tailored for this specific job:
--- TAILORED RESUME CONTEXT ---
{context}

Please write a compelling, professional, and concise cover letter. It should have three paragraphs:
1. Introduction: State the position I'm applying for and my enthusiasm for the company.
2. Body: Highlight 2-3 key qualifications from my tailored resume that make me a perfect fit for the role. Use some of the language from my rewritten responsibilities.
3. Conclusion: Reiterate my interest and include a call to action (e.g., "I am eager to discuss how my skills can contribute to your team's success").

Do not use placeholders like "[Your Name]". Write the letter as if I am the one writing it. Be confident but not arrogant."#
    )
}
