//! The perceive → decide → act loop shared by scrolling, easy-apply
//! detection and form filling.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::brain::{ApplicationData, Brain, Policy, PolicyError};
use crate::executor::{ActionExecutor, ExecError};
use crate::hands::LiveView;
use crate::perception::{CaptureOptions, Perception, capture};
use crate::protocol::{
    Command, FormCommand, LoopKind, PageCommand, ScrollCommand, classify_easy_apply, parse,
};
use crate::types::JOB_CARD_SELECTOR;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("unparsable command")]
    Unparseable(String),
    #[error("target not found")]
    TargetNotFound(String),
    #[error("cycle budget exhausted")]
    CycleBudgetExhausted,
    #[error("policy unavailable: {0}")]
    PolicyUnavailable(String),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("navigation to {0} not followed")]
    UnsupportedNavigation(String),
    #[error("external apply not followed")]
    ExternalApply,
}

impl From<PolicyError> for AbortReason {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Unavailable(msg) => AbortReason::PolicyUnavailable(msg),
            PolicyError::SchemaViolation(msg) => AbortReason::SchemaViolation(msg),
        }
    }
}

impl From<ExecError> for AbortReason {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::TargetNotFound(target) => AbortReason::TargetNotFound(target),
            ExecError::Driver(msg) => AbortReason::Driver(msg),
            ExecError::Policy(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continuing,
    Stopped,
    Succeeded,
    Failed(String),
    Aborted(AbortReason),
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Continuing)
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_cycles: usize,
    /// Wait after each executed action before the next capture.
    pub settle: Duration,
    /// Follow `CLICK <selector>` while scrolling instead of aborting.
    pub follow_selector_clicks: bool,
}

impl LoopSettings {
    pub fn new(max_cycles: usize, settle: Duration) -> Self {
        Self {
            max_cycles,
            settle,
            follow_selector_clicks: false,
        }
    }

    pub fn follow_selector_clicks(mut self, follow: bool) -> Self {
        self.follow_selector_clicks = follow;
        self
    }
}

/// Produces the raw response for one cycle.
#[async_trait]
pub trait Decider: Send + Sync {
    fn kind(&self) -> LoopKind;
    fn capture_options(&self) -> CaptureOptions;
    async fn decide(
        &self,
        perception: &Perception,
        history: &[Command],
    ) -> Result<String, PolicyError>;
}

pub struct ScrollDecider<'a, P> {
    brain: &'a Brain<P>,
}

impl<'a, P> ScrollDecider<'a, P> {
    pub fn new(brain: &'a Brain<P>) -> Self {
        Self { brain }
    }
}

#[async_trait]
impl<P: Policy> Decider for ScrollDecider<'_, P> {
    fn kind(&self) -> LoopKind {
        LoopKind::ScrollDiscovery
    }

    fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            assign_ids: false,
            job_marker: Some(JOB_CARD_SELECTOR.to_string()),
        }
    }

    async fn decide(
        &self,
        perception: &Perception,
        history: &[Command],
    ) -> Result<String, PolicyError> {
        self.brain.decide_scroll(perception, history).await
    }
}

pub struct FormDecider<'a, P> {
    brain: &'a Brain<P>,
    data: ApplicationData,
}

impl<'a, P> FormDecider<'a, P> {
    pub fn new(brain: &'a Brain<P>, data: ApplicationData) -> Self {
        Self { brain, data }
    }
}

#[async_trait]
impl<P: Policy> Decider for FormDecider<'_, P> {
    fn kind(&self) -> LoopKind {
        LoopKind::FormFill
    }

    fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            assign_ids: true,
            job_marker: None,
        }
    }

    async fn decide(
        &self,
        perception: &Perception,
        history: &[Command],
    ) -> Result<String, PolicyError> {
        self.brain.decide_form(perception, history, &self.data).await
    }
}

/// Local easy-apply detection; its reply goes through the same parser as a
/// policy reply would.
pub struct EasyApplyClassifier;

#[async_trait]
impl Decider for EasyApplyClassifier {
    fn kind(&self) -> LoopKind {
        LoopKind::EasyApplyDetection
    }

    fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            assign_ids: true,
            job_marker: None,
        }
    }

    async fn decide(
        &self,
        perception: &Perception,
        _history: &[Command],
    ) -> Result<String, PolicyError> {
        Ok(classify_easy_apply(&perception.document).to_string())
    }
}

#[derive(Debug, Clone)]
pub struct LoopReport {
    pub outcome: Outcome,
    /// Commands that were executed, in order.
    pub history: Vec<Command>,
    pub cycles: usize,
}

pub struct AgentLoop<'a, P, D> {
    decider: D,
    executor: ActionExecutor<'a, P>,
    settings: LoopSettings,
}

impl<'a, P: Policy, D: Decider> AgentLoop<'a, P, D> {
    pub fn new(decider: D, executor: ActionExecutor<'a, P>, settings: LoopSettings) -> Self {
        Self {
            decider,
            executor,
            settings,
        }
    }

    /// Runs until a terminal outcome. Each run starts from an empty history.
    pub async fn run<V>(&self, view: &V) -> LoopReport
    where
        V: LiveView + ?Sized,
    {
        let kind = self.decider.kind();
        let options = self.decider.capture_options();
        let mut history = Vec::new();
        let mut cycles = 0;

        info!(%kind, budget = self.settings.max_cycles, "agent loop starting");
        let outcome = loop {
            if cycles >= self.settings.max_cycles {
                break Outcome::Aborted(AbortReason::CycleBudgetExhausted);
            }

            let perception = match capture(view, &options).await {
                Ok(p) => p,
                Err(e) => break Outcome::Aborted(AbortReason::Driver(e.to_string())),
            };
            let raw = match self.decider.decide(&perception, &history).await {
                Ok(raw) => raw,
                Err(e) => break Outcome::Aborted(e.into()),
            };
            let command = match parse(&raw, kind) {
                Ok(command) => command,
                Err(e) => {
                    warn!(%kind, cycle = cycles, raw = %e.raw, "policy reply did not parse");
                    break Outcome::Aborted(AbortReason::Unparseable(e.raw));
                }
            };
            info!(%kind, cycle = cycles, %command, "next action");

            let outcome = self.step(&command, view).await;
            if matches!(outcome, Outcome::Continuing | Outcome::Succeeded)
                && !command.is_terminal()
            {
                history.push(command);
                cycles += 1;
            }
            if outcome.is_terminal() {
                break outcome;
            }
            tokio::time::sleep(self.settings.settle).await;
        };

        match &outcome {
            Outcome::Failed(reason) => info!(%kind, %reason, "policy declared failure"),
            Outcome::Aborted(reason) => warn!(%kind, %reason, cycles, "agent loop aborted"),
            _ => info!(%kind, ?outcome, cycles, "agent loop finished"),
        }
        LoopReport {
            outcome,
            history,
            cycles,
        }
    }

    /// Handles one parsed command. `Continuing` means it executed and the
    /// loop should perceive again.
    async fn step<V>(&self, command: &Command, view: &V) -> Outcome
    where
        V: LiveView + ?Sized,
    {
        match command {
            Command::Scroll(ScrollCommand::Stop) => return Outcome::Stopped,
            Command::Form(FormCommand::Done { .. }) => return Outcome::Succeeded,
            Command::Form(FormCommand::Fail { reason })
            | Command::Page(PageCommand::Fail { reason }) => {
                return Outcome::Failed(
                    reason.clone().unwrap_or_else(|| "no reason given".to_string()),
                );
            }
            Command::Scroll(ScrollCommand::Click { selector })
                if !self.settings.follow_selector_clicks =>
            {
                return Outcome::Aborted(AbortReason::UnsupportedNavigation(selector.clone()));
            }
            Command::Page(PageCommand::ClickApply) => {
                return Outcome::Aborted(AbortReason::ExternalApply);
            }
            _ => {}
        }

        if let Err(e) = self.executor.execute(command, view).await {
            return Outcome::Aborted(e.into());
        }
        match command {
            Command::Page(PageCommand::ClickEasyApply { .. })
            | Command::Form(FormCommand::Submit { .. }) => Outcome::Succeeded,
            _ => Outcome::Continuing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePage, ScriptedPolicy};
    use crate::types::AgentId;
    use serde_json::{Value, json};

    const SEARCH_PAGE: &str = r#"<main>
        <div data-job-id="1"><a href="/jobs/view/1">Rust Engineer</a></div>
        <button class="load-more">See more jobs</button>
    </main>"#;

    const FORM_PAGE: &str = r#"<div class="jobs-easy-apply-modal">
        <input name="phone"><input name="email"><select name="c"><option>UK</option></select>
        <textarea></textarea><input type="file"><button>Submit application</button>
    </div>"#;

    fn data() -> ApplicationData {
        ApplicationData {
            phone: "07700 900000".into(),
            resume_path: "/tmp/cv.pdf".into(),
        }
    }

    fn settings(max_cycles: usize) -> LoopSettings {
        LoopSettings::new(max_cycles, Duration::ZERO)
    }

    #[tokio::test]
    async fn scroll_loop_stops_on_stop() {
        let brain = Brain::new(ScriptedPolicy::new(["SCROLL_WINDOW", "SCROLL_WINDOW", "STOP"]));
        let bank = Value::Null;
        let page = FakePage::new(SEARCH_PAGE);
        let agent = AgentLoop::new(
            ScrollDecider::new(&brain),
            ActionExecutor::new(&brain, &bank),
            settings(10),
        );

        let report = agent.run(&page).await;
        assert_eq!(report.outcome, Outcome::Stopped);
        assert_eq!(report.cycles, 2);
        assert_eq!(page.actions(), ["scroll", "scroll"]);
        assert!(brain.policy().prompts()[2].contains("are: SCROLL_WINDOW, SCROLL_WINDOW."));
        assert!(brain.policy().prompts()[0].contains("found 1 jobs"));
    }

    #[tokio::test]
    async fn endless_scrolling_hits_the_budget() {
        let brain = Brain::new(ScriptedPolicy::repeating("SCROLL_WINDOW"));
        let bank = Value::Null;
        let page = FakePage::new(SEARCH_PAGE);
        let agent = AgentLoop::new(
            ScrollDecider::new(&brain),
            ActionExecutor::new(&brain, &bank),
            settings(10),
        );

        let report = agent.run(&page).await;
        assert_eq!(report.outcome, Outcome::Aborted(AbortReason::CycleBudgetExhausted));
        assert_eq!(brain.policy().calls(), 10);
        assert_eq!(report.history.len(), 10);
    }

    #[tokio::test]
    async fn form_loop_is_bounded_for_any_script() {
        for reply in ["CLICK agent-0", "TYPE agent-1 hello", "SELECT agent-2 UK"] {
            let brain = Brain::new(ScriptedPolicy::repeating(reply));
            let bank = Value::Null;
            let page = FakePage::new(FORM_PAGE);
            let agent = AgentLoop::new(
                FormDecider::new(&brain, data()),
                ActionExecutor::new(&brain, &bank),
                settings(15),
            );
            let report = agent.run(&page).await;
            assert!(report.outcome.is_terminal());
            assert_eq!(brain.policy().calls(), 15, "replying {reply}");
        }
    }

    #[tokio::test]
    async fn selector_click_is_not_followed_by_default() {
        let brain = Brain::new(ScriptedPolicy::new(["CLICK button.load-more", "STOP"]));
        let bank = Value::Null;
        let page = FakePage::new(SEARCH_PAGE);

        let agent = AgentLoop::new(
            ScrollDecider::new(&brain),
            ActionExecutor::new(&brain, &bank),
            settings(10),
        );
        let report = agent.run(&page).await;
        assert_eq!(
            report.outcome,
            Outcome::Aborted(AbortReason::UnsupportedNavigation("button.load-more".into()))
        );
        assert!(page.actions().is_empty());
    }

    #[tokio::test]
    async fn selector_click_can_be_followed() {
        let brain = Brain::new(ScriptedPolicy::new(["CLICK button.load-more", "STOP"]));
        let bank = Value::Null;
        let page = FakePage::new(SEARCH_PAGE);

        let agent = AgentLoop::new(
            ScrollDecider::new(&brain),
            ActionExecutor::new(&brain, &bank),
            settings(10).follow_selector_clicks(true),
        );
        let report = agent.run(&page).await;
        assert_eq!(report.outcome, Outcome::Stopped);
        assert_eq!(page.actions(), ["click button.load-more"]);
    }

    #[tokio::test]
    async fn unparseable_reply_aborts_distinctly_from_fail() {
        let brain = Brain::new(ScriptedPolicy::new(["Let me think about this form."]));
        let bank = Value::Null;
        let page = FakePage::new(FORM_PAGE);
        let agent = AgentLoop::new(
            FormDecider::new(&brain, data()),
            ActionExecutor::new(&brain, &bank),
            settings(15),
        );
        let report = agent.run(&page).await;
        let expected = AbortReason::Unparseable("Let me think about this form.".into());
        assert_eq!(expected.to_string(), "unparsable command");
        assert_eq!(report.outcome, Outcome::Aborted(expected));

        let brain = Brain::new(ScriptedPolicy::new(["FAIL captcha shown"]));
        let agent = AgentLoop::new(
            FormDecider::new(&brain, data()),
            ActionExecutor::new(&brain, &bank),
            settings(15),
        );
        let report = agent.run(&page).await;
        assert_eq!(report.outcome, Outcome::Failed("captcha shown".into()));
        assert!(report.history.is_empty());
    }

    #[tokio::test]
    async fn hallucinated_id_aborts_without_another_call() {
        let brain = Brain::new(ScriptedPolicy::new(["TYPE agent-0 07700 900000", "CLICK agent-42", "DONE"]));
        let bank = Value::Null;
        let page = FakePage::new(FORM_PAGE);
        let agent = AgentLoop::new(
            FormDecider::new(&brain, data()),
            ActionExecutor::new(&brain, &bank),
            settings(15),
        );

        let report = agent.run(&page).await;
        assert_eq!(
            report.outcome,
            Outcome::Aborted(AbortReason::TargetNotFound("agent-42".into()))
        );
        assert_eq!(brain.policy().calls(), 2);
        assert_eq!(report.history.len(), 1);
        assert_eq!(page.actions(), ["type agent-0 07700 900000"]);
    }

    #[tokio::test]
    async fn policy_outage_aborts_the_task() {
        let brain = Brain::new(ScriptedPolicy::failing("503"));
        let bank = Value::Null;
        let page = FakePage::new(FORM_PAGE);
        let agent = AgentLoop::new(
            FormDecider::new(&brain, data()),
            ActionExecutor::new(&brain, &bank),
            settings(15),
        );
        let report = agent.run(&page).await;
        assert!(matches!(
            report.outcome,
            Outcome::Aborted(AbortReason::PolicyUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn driver_error_aborts_the_task() {
        let brain = Brain::new(ScriptedPolicy::new(["SCROLL_WINDOW"]));
        let bank = Value::Null;
        let page = FakePage::broken(SEARCH_PAGE);
        let agent = AgentLoop::new(
            ScrollDecider::new(&brain),
            ActionExecutor::new(&brain, &bank),
            settings(10),
        );
        let report = agent.run(&page).await;
        assert!(matches!(report.outcome, Outcome::Aborted(AbortReason::Driver(_))));
    }

    #[tokio::test]
    async fn page_without_easy_apply_never_consults_policy() {
        let brain = Brain::new(ScriptedPolicy::new(Vec::<String>::new()));
        let bank = Value::Null;
        let page = FakePage::new("<main><h1>Rust Engineer</h1><a href='https://acme.example/jobs'>Apply</a></main>");
        let agent = AgentLoop::new(
            EasyApplyClassifier,
            ActionExecutor::new(&brain, &bank),
            settings(1),
        );

        let report = agent.run(&page).await;
        assert!(matches!(report.outcome, Outcome::Failed(_)));
        assert_eq!(brain.policy().calls(), 0);
        assert!(page.actions().is_empty());
    }

    #[tokio::test]
    async fn easy_apply_button_is_clicked() {
        let brain = Brain::new(ScriptedPolicy::new(Vec::<String>::new()));
        let bank = Value::Null;
        let page = FakePage::new(
            r#"<body><a href="/feed">Home</a><input name="q"><button>Easy Apply</button></body>"#,
        );
        let agent = AgentLoop::new(
            EasyApplyClassifier,
            ActionExecutor::new(&brain, &bank),
            settings(1),
        );

        let report = agent.run(&page).await;
        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(
            report.history,
            [Command::Page(PageCommand::ClickEasyApply { id: AgentId(2) })]
        );
        assert_eq!(page.actions(), ["click agent-2"]);
        assert_eq!(brain.policy().calls(), 0);
    }

    #[tokio::test]
    async fn submit_ends_the_form_loop() {
        let brain = Brain::new(ScriptedPolicy::new(["SUBMIT agent-5"]));
        let bank = Value::Null;
        let page = FakePage::new(FORM_PAGE);
        let agent = AgentLoop::new(
            FormDecider::new(&brain, data()),
            ActionExecutor::new(&brain, &bank).dry_run_submit(false),
            settings(15),
        );

        let report = agent.run(&page).await;
        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(page.actions(), ["click agent-5"]);
        assert_eq!(brain.policy().calls(), 1);
    }

    #[tokio::test]
    async fn multi_step_form_sees_each_new_page() {
        let brain = Brain::new(ScriptedPolicy::new([
            "TYPE agent-0 07700 900000",
            "CLICK agent-1",
            "ANSWER agent-0 Why this company?",
            "Because they ship Rust.",
            "DONE",
        ]));
        let bank = json!({"motivation": "Rust"});
        let page = FakePage::new(r#"<form><input name="phone"><button>Next</button></form>"#)
            .then(r#"<form><input name="phone"><button>Next</button></form>"#)
            .then(r#"<form><textarea name="why"></textarea><button>Review</button></form>"#);
        let agent = AgentLoop::new(
            FormDecider::new(&brain, data()),
            ActionExecutor::new(&brain, &bank),
            settings(15),
        );

        let report = agent.run(&page).await;
        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(
            page.actions(),
            [
                "type agent-0 07700 900000",
                "click agent-1",
                "type agent-0 Because they ship Rust.",
            ]
        );
        assert_eq!(report.cycles, 3);
        let prompts = brain.policy().prompts();
        assert!(prompts[4].contains("<textarea"));
        assert!(prompts[4].contains("ANSWER agent-0 Why this company?."));
    }

    #[test]
    fn abort_reasons_read_well() {
        assert_eq!(AbortReason::TargetNotFound("agent-3".into()).to_string(), "target not found");
        assert_eq!(AbortReason::CycleBudgetExhausted.to_string(), "cycle budget exhausted");
        let from_exec: AbortReason = ExecError::Policy(PolicyError::SchemaViolation("x".into())).into();
        assert_eq!(from_exec, AbortReason::SchemaViolation("x".into()));
    }
}
