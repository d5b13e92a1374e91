//! Test doubles for the two external collaborators: the policy and the page.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::brain::{FunctionDef, Policy, PolicyError};
use crate::dom::simplify;
use crate::hands::{BrowserError, LiveView};
use crate::types::Target;

/// Replays canned responses in order and records every prompt it was given.
pub struct ScriptedPolicy {
    script: Mutex<VecDeque<Result<String, PolicyError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedPolicy {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with the same text.
    pub fn repeating(response: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(response.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::from([Err(PolicyError::Unavailable(
                message.to_string(),
            ))])),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next(&self, prompt: &str) -> Result<String, PolicyError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.script.lock().unwrap().pop_front() {
            Some(response) => response,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| PolicyError::Unavailable("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl Policy for ScriptedPolicy {
    async fn complete(&self, prompt: &str) -> Result<String, PolicyError> {
        self.next(prompt)
    }

    async fn complete_with_function(
        &self,
        prompt: &str,
        _function: &FunctionDef,
    ) -> Result<String, PolicyError> {
        self.next(prompt)
    }
}

/// In-memory page. Agent ids resolve the way the Chrome view resolves them:
/// by replaying the snapshot traversal over the current markup.
pub struct FakePage {
    markup: Mutex<String>,
    next_markups: Mutex<VecDeque<String>>,
    actions: Mutex<Vec<String>>,
    markup_reads: Mutex<usize>,
    broken: bool,
}

impl FakePage {
    pub fn new(markup: &str) -> Self {
        Self {
            markup: Mutex::new(markup.to_string()),
            next_markups: Mutex::new(VecDeque::new()),
            actions: Mutex::new(Vec::new()),
            markup_reads: Mutex::new(0),
            broken: false,
        }
    }

    /// Every page action fails with a driver error.
    pub fn broken(markup: &str) -> Self {
        Self {
            broken: true,
            ..Self::new(markup)
        }
    }

    /// After each successful action the page switches to the next markup.
    pub fn then(self, markup: &str) -> Self {
        self.next_markups.lock().unwrap().push_back(markup.to_string());
        self
    }

    pub fn set_markup(&self, markup: &str) {
        *self.markup.lock().unwrap() = markup.to_string();
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    pub fn markup_reads(&self) -> usize {
        *self.markup_reads.lock().unwrap()
    }

    fn exists(&self, target: &Target) -> bool {
        let markup = self.markup.lock().unwrap().clone();
        match target {
            // Ids only resolve through a fresh snapshot, as in the live page.
            Target::Agent(id) => simplify(&markup, true).find(*id).is_some(),
            Target::Selector(css) => Selector::parse(css)
                .map(|selector| Html::parse_document(&markup).select(&selector).next().is_some())
                .unwrap_or(false),
        }
    }

    fn act(&self, target: Option<&Target>, action: String) -> Result<(), BrowserError> {
        if self.broken {
            return Err(BrowserError::Driver("tab crashed".to_string()));
        }
        if let Some(target) = target
            && !self.exists(target)
        {
            return Err(BrowserError::NotFound(target.to_string()));
        }
        self.actions.lock().unwrap().push(action);
        if let Some(next) = self.next_markups.lock().unwrap().pop_front() {
            self.set_markup(&next);
        }
        Ok(())
    }
}

#[async_trait]
impl LiveView for FakePage {
    async fn markup(&self) -> Result<String, BrowserError> {
        *self.markup_reads.lock().unwrap() += 1;
        Ok(self.markup.lock().unwrap().clone())
    }

    async fn count_matching(&self, selector: &str) -> Result<usize, BrowserError> {
        let selector = Selector::parse(selector)
            .map_err(|e| BrowserError::Driver(format!("bad selector: {e}")))?;
        let markup = self.markup.lock().unwrap().clone();
        Ok(Html::parse_document(&markup).select(&selector).count())
    }

    async fn locate(&self, target: &Target) -> Result<bool, BrowserError> {
        if self.broken {
            return Err(BrowserError::Driver("tab crashed".to_string()));
        }
        Ok(self.exists(target))
    }

    async fn scroll_to_bottom(&self) -> Result<(), BrowserError> {
        self.act(None, "scroll".to_string())
    }

    async fn click(&self, target: &Target) -> Result<(), BrowserError> {
        self.act(Some(target), format!("click {target}"))
    }

    async fn type_text(&self, target: &Target, text: &str) -> Result<(), BrowserError> {
        self.act(Some(target), format!("type {target} {text}"))
    }

    async fn select_option(&self, target: &Target, visible_text: &str) -> Result<(), BrowserError> {
        self.act(Some(target), format!("select {target} {visible_text}"))
    }

    async fn set_file(&self, target: &Target, path: &str) -> Result<(), BrowserError> {
        self.act(Some(target), format!("upload {target} {path}"))
    }
}
