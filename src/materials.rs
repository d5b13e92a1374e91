use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::brain::TailoredResume;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMaterials {
    pub resume: PathBuf,
    pub cover_letter: PathBuf,
}

/// `<AlnumCompany>_<FirstTitleWord>`, shared by both files of one job.
pub fn file_stem(job_title: &str, company: &str) -> String {
    let company: String = company.chars().filter(|c| c.is_alphanumeric()).collect();
    let first_word = job_title.split(' ').next().unwrap_or_default();
    format!("{company}_{first_word}")
}

pub fn render_resume(job_title: &str, company: &str, resume: &TailoredResume) -> String {
    let mut out = format!("Tailored Resume for {job_title} at {company}\n\n");
    out.push_str("--- SUMMARY ---\n");
    out.push_str(&resume.tailored_summary);
    out.push_str("\n\n--- WORK EXPERIENCE ---\n");
    for exp in &resume.tailored_work_experience {
        let _ = writeln!(out, "Company: {}", exp.company);
        let _ = writeln!(out, "Role: {}", exp.role);
        let _ = writeln!(out, "Dates: {}", exp.dates);
        out.push_str("Responsibilities:\n");
        for item in &exp.rewritten_responsibilities {
            let _ = writeln!(out, "- {item}");
        }
        out.push('\n');
    }
    out
}

/// Writes the tailored resume and cover letter for one job under `dir`.
pub fn save_materials(
    dir: &Path,
    job_title: &str,
    company: &str,
    resume: &TailoredResume,
    cover_letter: &str,
) -> Result<SavedMaterials> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let stem = file_stem(job_title, company);

    let resume_path = dir.join(format!("{stem}_Resume.txt"));
    std::fs::write(&resume_path, render_resume(job_title, company, resume))
        .with_context(|| format!("writing {}", resume_path.display()))?;
    info!(file = %resume_path.display(), "saved tailored resume");

    let letter_path = dir.join(format!("{stem}_Cover_Letter.txt"));
    std::fs::write(&letter_path, cover_letter)
        .with_context(|| format!("writing {}", letter_path.display()))?;
    info!(file = %letter_path.display(), "saved cover letter");

    Ok(SavedMaterials {
        resume: resume_path,
        cover_letter: letter_path,
    })
}
