use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::brain::{Brain, Policy, PolicyError};
use crate::hands::{BrowserError, LiveView};
use crate::protocol::{Command, FormCommand, PageCommand, ScrollCommand};
use crate::types::Target;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The command named an id or selector the live page does not have.
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("driver error: {0}")]
    Driver(String),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl From<BrowserError> for ExecError {
    fn from(e: BrowserError) -> Self {
        match e {
            BrowserError::NotFound(target) => ExecError::TargetNotFound(target),
            BrowserError::Driver(msg) => ExecError::Driver(msg),
        }
    }
}

/// Turns one validated command into live-page operations.
pub struct ActionExecutor<'a, P> {
    brain: &'a Brain<P>,
    story_bank: &'a Value,
    dry_run_submit: bool,
}

impl<'a, P: Policy> ActionExecutor<'a, P> {
    pub fn new(brain: &'a Brain<P>, story_bank: &'a Value) -> Self {
        Self {
            brain,
            story_bank,
            dry_run_submit: true,
        }
    }

    /// When set, `SUBMIT` only checks the button exists.
    pub fn dry_run_submit(mut self, dry_run: bool) -> Self {
        self.dry_run_submit = dry_run;
        self
    }

    pub async fn execute<V>(&self, command: &Command, view: &V) -> Result<(), ExecError>
    where
        V: LiveView + ?Sized,
    {
        if let Some(target) = target_of(command)
            && !view.locate(&target).await?
        {
            return Err(ExecError::TargetNotFound(target.to_string()));
        }

        match command {
            Command::Scroll(ScrollCommand::ScrollWindow) => view.scroll_to_bottom().await?,
            Command::Scroll(ScrollCommand::Click { selector }) => {
                view.click(&Target::Selector(selector.clone())).await?
            }
            Command::Form(FormCommand::Click { id })
            | Command::Page(PageCommand::ClickEasyApply { id }) => {
                view.click(&Target::Agent(*id)).await?
            }
            Command::Form(FormCommand::Type { id, text }) => {
                view.type_text(&Target::Agent(*id), text).await?
            }
            Command::Form(FormCommand::Select { id, text }) => {
                view.select_option(&Target::Agent(*id), text).await?
            }
            Command::Form(FormCommand::Upload { id, path }) => {
                view.set_file(&Target::Agent(*id), path).await?
            }
            Command::Form(FormCommand::Answer { id, question }) => {
                let answer = self.brain.answer(question, self.story_bank).await?;
                view.type_text(&Target::Agent(*id), &answer).await?
            }
            Command::Form(FormCommand::Submit { id }) => {
                if self.dry_run_submit {
                    info!(target = %id, "submit located, not clicking (dry run)");
                } else {
                    view.click(&Target::Agent(*id)).await?;
                    info!(target = %id, "application submitted");
                }
            }
            other => debug!(command = %other, "nothing to execute"),
        }
        Ok(())
    }
}

/// The element a command acts on, if any.
fn target_of(command: &Command) -> Option<Target> {
    match command {
        Command::Scroll(ScrollCommand::Click { selector }) => {
            Some(Target::Selector(selector.clone()))
        }
        Command::Form(
            FormCommand::Type { id, .. }
            | FormCommand::Select { id, .. }
            | FormCommand::Click { id }
            | FormCommand::Upload { id, .. }
            | FormCommand::Answer { id, .. }
            | FormCommand::Submit { id },
        )
        | Command::Page(PageCommand::ClickEasyApply { id }) => Some(Target::Agent(*id)),
        _ => None,
    }
}
