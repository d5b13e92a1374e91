//! Command vocabulary for each agent loop and the grammar that turns a
//! free-text policy response into exactly one typed command.

use std::fmt;
use thiserror::Error;

use crate::dom::SimplifiedDocument;
use crate::types::AgentId;

const EASY_APPLY: &str = "Easy Apply";
pub const EASY_APPLY_TEXT_MISSING: &str = "'Easy Apply' text not found on page.";
pub const EASY_APPLY_ID_MISSING: &str = "Could not isolate agent-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    ScrollDiscovery,
    EasyApplyDetection,
    FormFill,
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopKind::ScrollDiscovery => "scroll-discovery",
            LoopKind::EasyApplyDetection => "easy-apply-detection",
            LoopKind::FormFill => "form-fill",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollCommand {
    ScrollWindow,
    Click { selector: String },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormCommand {
    Type { id: AgentId, text: String },
    Select { id: AgentId, text: String },
    Click { id: AgentId },
    Upload { id: AgentId, path: String },
    Answer { id: AgentId, question: String },
    Submit { id: AgentId },
    Done { reason: Option<String> },
    Fail { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCommand {
    ClickEasyApply { id: AgentId },
    ClickApply,
    Fail { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scroll(ScrollCommand),
    Form(FormCommand),
    Page(PageCommand),
}

/// The response matched no grammar of the loop it was meant for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparsable {kind} command: {raw:?}")]
pub struct Unparseable {
    pub kind: LoopKind,
    pub raw: String,
}

/// Parses one policy response for the given loop.
pub fn parse(raw: &str, kind: LoopKind) -> Result<Command, Unparseable> {
    let parsed = match kind {
        LoopKind::ScrollDiscovery => parse_scroll(raw).map(Command::Scroll),
        LoopKind::EasyApplyDetection => parse_page(raw).map(Command::Page),
        LoopKind::FormFill => parse_form(raw).map(Command::Form),
    };
    parsed.ok_or_else(|| Unparseable {
        kind,
        raw: raw.to_string(),
    })
}

/// `STOP` anywhere wins over everything, then `SCROLL_WINDOW`, then
/// `CLICK <selector>` with the rest of that line as the selector.
fn parse_scroll(raw: &str) -> Option<ScrollCommand> {
    // ASCII uppercasing keeps byte offsets valid for slicing `raw`.
    let upper = raw.to_ascii_uppercase();
    if upper.contains("STOP") {
        return Some(ScrollCommand::Stop);
    }
    if upper.contains("SCROLL_WINDOW") {
        return Some(ScrollCommand::ScrollWindow);
    }
    let at = upper.find("CLICK")?;
    let rest = &raw[at + "CLICK".len()..];
    let selector = rest.lines().next().unwrap_or("").trim().trim_matches('`').trim();
    if selector.is_empty() {
        return None;
    }
    Some(ScrollCommand::Click {
        selector: selector.to_string(),
    })
}

/// Takes the last occurrence of the first keyword found, in the order
/// `CLICK_EASY_APPLY`, `CLICK_APPLY`, `FAIL`.
fn parse_page(raw: &str) -> Option<PageCommand> {
    for keyword in ["CLICK_EASY_APPLY", "CLICK_APPLY", "FAIL"] {
        let Some(at) = raw.rfind(keyword) else {
            continue;
        };
        let operand = raw[at + keyword.len()..]
            .lines()
            .next()
            .unwrap_or("")
            .trim();
        return match keyword {
            "CLICK_EASY_APPLY" => {
                let id = operand.split_whitespace().next()?.parse().ok()?;
                Some(PageCommand::ClickEasyApply { id })
            }
            "CLICK_APPLY" => Some(PageCommand::ClickApply),
            _ => Some(PageCommand::Fail {
                reason: non_empty(operand),
            }),
        };
    }
    None
}

fn parse_form(raw: &str) -> Option<FormCommand> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (verb, rest) = split_token(line);
    let verb = verb.to_ascii_uppercase();

    match verb.as_str() {
        "DONE" => Some(FormCommand::Done {
            reason: non_empty(rest),
        }),
        "FAIL" => Some(FormCommand::Fail {
            reason: non_empty(rest),
        }),
        "CLICK" | "SUBMIT" => {
            let (id, _) = split_token(rest);
            let id = id.parse().ok()?;
            Some(if verb == "CLICK" {
                FormCommand::Click { id }
            } else {
                FormCommand::Submit { id }
            })
        }
        "TYPE" | "SELECT" | "UPLOAD" | "ANSWER" => {
            let (id, value) = split_token(rest);
            let id = id.parse().ok()?;
            let value = non_empty(value)?;
            Some(match verb.as_str() {
                "TYPE" => FormCommand::Type { id, text: value },
                "SELECT" => FormCommand::Select { id, text: value },
                "UPLOAD" => FormCommand::Upload { id, path: value },
                _ => FormCommand::Answer {
                    id,
                    question: value,
                },
            })
        }
        _ => None,
    }
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim_start()),
        None => (s, ""),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Local easy-apply detector. Never consults the policy.
///
/// Stage 0 looks for the phrase anywhere in the visible text; stage 1 picks
/// the first button or link whose text contains it and that carries an id.
pub fn classify_easy_apply(document: &SimplifiedDocument) -> PageCommand {
    if !document.text(" ").contains(EASY_APPLY) {
        return PageCommand::Fail {
            reason: Some(EASY_APPLY_TEXT_MISSING.to_string()),
        };
    }

    document
        .elements()
        .filter(|el| el.tag == "button" || el.tag == "a")
        .filter(|el| el.text(" ").contains(EASY_APPLY))
        .find_map(|el| el.agent_id())
        .map(|id| PageCommand::ClickEasyApply { id })
        .unwrap_or_else(|| PageCommand::Fail {
            reason: Some(EASY_APPLY_ID_MISSING.to_string()),
        })
}

impl Command {
    /// Ends the task without touching the page.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Command::Scroll(ScrollCommand::Stop)
                | Command::Form(FormCommand::Done { .. } | FormCommand::Fail { .. })
                | Command::Page(PageCommand::Fail { .. })
        )
    }
}

fn write_reason(f: &mut fmt::Formatter<'_>, verb: &str, reason: &Option<String>) -> fmt::Result {
    match reason {
        Some(reason) => write!(f, "{verb} {reason}"),
        None => f.write_str(verb),
    }
}

impl fmt::Display for ScrollCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrollCommand::ScrollWindow => f.write_str("SCROLL_WINDOW"),
            ScrollCommand::Click { selector } => write!(f, "CLICK {selector}"),
            ScrollCommand::Stop => f.write_str("STOP"),
        }
    }
}

impl fmt::Display for FormCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormCommand::Type { id, text } => write!(f, "TYPE {id} {text}"),
            FormCommand::Select { id, text } => write!(f, "SELECT {id} {text}"),
            FormCommand::Click { id } => write!(f, "CLICK {id}"),
            FormCommand::Upload { id, path } => write!(f, "UPLOAD {id} {path}"),
            FormCommand::Answer { id, question } => write!(f, "ANSWER {id} {question}"),
            FormCommand::Submit { id } => write!(f, "SUBMIT {id}"),
            FormCommand::Done { reason } => write_reason(f, "DONE", reason),
            FormCommand::Fail { reason } => write_reason(f, "FAIL", reason),
        }
    }
}

impl fmt::Display for PageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageCommand::ClickEasyApply { id } => write!(f, "CLICK_EASY_APPLY {id}"),
            PageCommand::ClickApply => f.write_str("CLICK_APPLY"),
            PageCommand::Fail { reason } => write_reason(f, "FAIL", reason),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Scroll(cmd) => write!(f, "{cmd}"),
            Command::Form(cmd) => write!(f, "{cmd}"),
            Command::Page(cmd) => write!(f, "{cmd}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::simplify;

    fn form(raw: &str) -> Result<Command, Unparseable> {
        parse(raw, LoopKind::FormFill)
    }

    fn scroll(raw: &str) -> Result<Command, Unparseable> {
        parse(raw, LoopKind::ScrollDiscovery)
    }

    #[test]
    fn stop_wins_over_later_scroll_token() {
        let got = scroll("We are done, STOP scrolling now, SCROLL_WINDOW is not needed");
        assert_eq!(got, Ok(Command::Scroll(ScrollCommand::Stop)));
    }

    #[test]
    fn scroll_tokens_are_case_insensitive() {
        assert_eq!(
            scroll("`scroll_window`"),
            Ok(Command::Scroll(ScrollCommand::ScrollWindow))
        );
    }

    #[test]
    fn scroll_click_takes_rest_of_line() {
        let got = scroll("CLICK button.jobs-search-results__load-more-button\nbecause it is there");
        assert_eq!(
            got,
            Ok(Command::Scroll(ScrollCommand::Click {
                selector: "button.jobs-search-results__load-more-button".to_string()
            }))
        );
    }

    #[test]
    fn scroll_click_without_selector_is_unparseable() {
        assert!(scroll("CLICK").is_err());
        assert!(scroll("I think we should wait").is_err());
        assert!(scroll("").is_err());
    }

    #[test]
    fn form_commands_parse_exactly() {
        let cases = [
            (
                "TYPE agent-3 hello world",
                FormCommand::Type { id: AgentId(3), text: "hello world".into() },
            ),
            (
                "select agent-1 United Kingdom",
                FormCommand::Select { id: AgentId(1), text: "United Kingdom".into() },
            ),
            ("CLICK agent-7", FormCommand::Click { id: AgentId(7) }),
            (
                "UPLOAD agent-2 /home/me/resume.pdf",
                FormCommand::Upload { id: AgentId(2), path: "/home/me/resume.pdf".into() },
            ),
            (
                "ANSWER agent-9 Why do you want to work here?",
                FormCommand::Answer { id: AgentId(9), question: "Why do you want to work here?".into() },
            ),
            ("SUBMIT agent-5", FormCommand::Submit { id: AgentId(5) }),
            ("DONE", FormCommand::Done { reason: None }),
            (
                "FAIL captcha on page",
                FormCommand::Fail { reason: Some("captcha on page".into()) },
            ),
        ];
        for (raw, expected) in cases {
            assert_eq!(form(raw), Ok(Command::Form(expected)), "parsing {raw:?}");
        }
    }

    #[test]
    fn form_value_keeps_inner_spacing() {
        let got = form("TYPE agent-0   +44  7700 900000  ");
        assert_eq!(
            got,
            Ok(Command::Form(FormCommand::Type {
                id: AgentId(0),
                text: "+44  7700 900000".into()
            }))
        );
    }

    #[test]
    fn malformed_form_responses_are_unparseable() {
        for raw in [
            "",
            "   ",
            "TYPE",
            "TYPE agent-3",
            "SELECT agent-1",
            "CLICK",
            "CLICK button.submit",
            "SUBMIT <agent-id>",
            "JUMP agent-3",
            "I will now type the phone number",
        ] {
            let err = form(raw).unwrap_err();
            assert_eq!(err.kind, LoopKind::FormFill);
            assert_eq!(err.raw, raw);
        }
    }

    #[test]
    fn page_grammar_takes_last_keyword_occurrence() {
        let got = parse(
            "Sure. CLICK_EASY_APPLY agent-0 no wait CLICK_EASY_APPLY agent-2",
            LoopKind::EasyApplyDetection,
        );
        assert_eq!(got, Ok(Command::Page(PageCommand::ClickEasyApply { id: AgentId(2) })));
        assert_eq!(
            parse("CLICK_APPLY", LoopKind::EasyApplyDetection),
            Ok(Command::Page(PageCommand::ClickApply))
        );
        assert_eq!(
            parse("FAIL", LoopKind::EasyApplyDetection),
            Ok(Command::Page(PageCommand::Fail { reason: None }))
        );
        assert!(parse("CLICK_EASY_APPLY", LoopKind::EasyApplyDetection).is_err());
        assert!(parse("apply please", LoopKind::EasyApplyDetection).is_err());
    }

    #[test]
    fn wire_form_parses_back() {
        let commands = [
            Command::Form(FormCommand::Answer { id: AgentId(4), question: "Years of Rust?".into() }),
            Command::Page(PageCommand::ClickEasyApply { id: AgentId(2) }),
            Command::Scroll(ScrollCommand::ScrollWindow),
        ];
        for command in commands {
            let kind = match command {
                Command::Scroll(_) => LoopKind::ScrollDiscovery,
                Command::Form(_) => LoopKind::FormFill,
                Command::Page(_) => LoopKind::EasyApplyDetection,
            };
            assert_eq!(parse(&command.to_string(), kind), Ok(command));
        }
    }

    #[test]
    fn classifier_fails_fast_without_easy_apply_text() {
        let doc = simplify("<div><button>Apply on company site</button></div>", true);
        assert_eq!(
            classify_easy_apply(&doc),
            PageCommand::Fail { reason: Some(EASY_APPLY_TEXT_MISSING.into()) }
        );
    }

    #[test]
    fn classifier_picks_first_matching_button() {
        let doc = simplify(
            "<div><a href='/x'>Jobs</a><input><button><span>Easy Apply</span></button>\
             <button>Easy Apply</button></div>",
            true,
        );
        assert_eq!(classify_easy_apply(&doc), PageCommand::ClickEasyApply { id: AgentId(2) });
    }

    #[test]
    fn classifier_reports_missing_id() {
        let doc = simplify("<div><p>Easy Apply</p></div>", true);
        assert_eq!(
            classify_easy_apply(&doc),
            PageCommand::Fail { reason: Some(EASY_APPLY_ID_MISSING.into()) }
        );
        let without_ids = simplify("<button>Easy Apply</button>", false);
        assert_eq!(
            classify_easy_apply(&without_ids),
            PageCommand::Fail { reason: Some(EASY_APPLY_ID_MISSING.into()) }
        );
    }

    #[test]
    fn terminal_commands() {
        assert!(Command::Scroll(ScrollCommand::Stop).is_terminal());
        assert!(Command::Form(FormCommand::Done { reason: None }).is_terminal());
        assert!(!Command::Form(FormCommand::Submit { id: AgentId(1) }).is_terminal());
        assert!(!Command::Page(PageCommand::ClickApply).is_terminal());
    }
}
