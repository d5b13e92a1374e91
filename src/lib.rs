//! Job application agent for LinkedIn Easy Apply.
//!
//! Scrapes listings, filters them, tailors a resume and cover letter per job
//! with an LLM, then drives Chrome through the Easy Apply form by letting
//! the LLM pick one command at a time against a simplified snapshot of the
//! page.

pub mod agent;
pub mod application_log;
pub mod brain;
pub mod config;
pub mod dom;
pub mod executor;
pub mod hands;
pub mod jobs;
pub mod materials;
pub mod openai;
pub mod perception;
pub mod protocol;
pub mod scrape;
pub mod types;
pub mod workflow;

#[cfg(test)]
mod testing;
