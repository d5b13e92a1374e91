//! Simplified DOM snapshots.
//!
//! A raw markup document is parsed permissively, stripped of non-content
//! nodes and, when built for interaction, every interactive element gets an
//! `agent-id="agent-<n>"` attribute in pre-order. The same traversal is
//! replayed in the live page by [`crate::hands`] when an id has to be acted
//! on, so the two must stay in sync: same noise set, same interactive set,
//! same order.

use scraper::{ElementRef, Html, Node as HtmlNode};
use std::collections::BTreeMap;

use crate::types::{AGENT_ID_ATTR, AgentId};

/// Tags removed (with their whole subtree) before anything else happens.
pub const NOISE_TAGS: [&str; 7] = ["script", "style", "meta", "link", "header", "footer", "nav"];

/// Tags that receive an agent id.
pub const INTERACTIVE_TAGS: [&str; 5] = ["input", "button", "select", "textarea", "a"];

const VOID_TAGS: [&str; 9] = [
    "area", "br", "col", "embed", "hr", "img", "input", "source", "wbr",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<Node>,
}

impl Drop for Element {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(node) = pending.pop() {
            if let Node::Element(mut element) = node {
                pending.append(&mut element.children);
            }
        }
    }
}

impl Element {
    pub fn is_interactive(&self) -> bool {
        INTERACTIVE_TAGS.contains(&self.tag.as_str())
    }

    pub fn agent_id(&self) -> Option<AgentId> {
        self.attrs.get(AGENT_ID_ATTR).and_then(|v| v.parse().ok())
    }

    /// Text content of this element and its descendants, one entry per text
    /// node, joined with `separator`.
    pub fn text(&self, separator: &str) -> String {
        let mut parts = Vec::new();
        collect_text(self, &mut parts);
        parts.join(separator)
    }

    /// Pre-order iterator over this element and every descendant element.
    pub fn elements(&self) -> Elements<'_> {
        Elements { stack: vec![self] }
    }
}

pub struct Elements<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Elements<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.stack.pop()?;
        for child in element.children.iter().rev() {
            if let Node::Element(child) = child {
                self.stack.push(child);
            }
        }
        Some(element)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimplifiedDocument {
    pub root: Element,
}

impl SimplifiedDocument {
    pub fn elements(&self) -> Elements<'_> {
        self.root.elements()
    }

    /// Interactive elements that carry an agent id, in id order.
    pub fn interactive(&self) -> impl Iterator<Item = (AgentId, &Element)> {
        self.elements()
            .filter_map(|el| el.agent_id().map(|id| (id, el)))
    }

    pub fn find(&self, id: AgentId) -> Option<&Element> {
        self.interactive()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, el)| el)
    }

    /// Visible text of the whole document.
    pub fn text(&self, separator: &str) -> String {
        self.root.text(separator)
    }

    /// Indented markup, one tag or text node per line, cut at the last whole
    /// line that fits in `max_chars`.
    pub fn render(&self, max_chars: usize) -> String {
        let mut out = String::new();
        let mut used = 0;
        for line in render_lines(&self.root) {
            let cost = line.chars().count() + usize::from(!out.is_empty());
            if used + cost > max_chars {
                break;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&line);
            used += cost;
        }
        out
    }
}

/// Parses `raw_markup` into a pruned tree. Malformed input still produces a
/// best-effort tree.
pub fn simplify(raw_markup: &str, assign_ids: bool) -> SimplifiedDocument {
    let html = Html::parse_document(raw_markup);
    let mut root = convert(html.root_element());
    if assign_ids {
        assign_agent_ids(&mut root);
    }
    SimplifiedDocument { root }
}

// Every walk below keeps its own stack: page markup can nest far deeper than
// the thread stack allows.

enum Pending<'a> {
    Element(ElementRef<'a>),
    Text(String),
}

/// An element whose children are still being converted.
struct Frame<'a> {
    source: ElementRef<'a>,
    pending: std::vec::IntoIter<Pending<'a>>,
    children: Vec<Node>,
}

impl<'a> Frame<'a> {
    fn new(source: ElementRef<'a>) -> Self {
        let pending: Vec<Pending<'a>> = source
            .children()
            .filter_map(|child| match child.value() {
                HtmlNode::Element(inner) if NOISE_TAGS.contains(&inner.name()) => None,
                HtmlNode::Element(_) => ElementRef::wrap(child).map(Pending::Element),
                HtmlNode::Text(text) => {
                    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
                    (!collapsed.is_empty()).then_some(Pending::Text(collapsed))
                }
                _ => None,
            })
            .collect();
        Self {
            source,
            pending: pending.into_iter(),
            children: Vec::new(),
        }
    }

    fn finish(self) -> Element {
        let value = self.source.value();
        Element {
            tag: value.name().to_string(),
            attrs: value
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children: self.children,
        }
    }
}

fn convert(root: ElementRef<'_>) -> Element {
    let mut root = Frame::new(root);
    let mut open: Vec<Frame<'_>> = Vec::new();
    loop {
        let frame = open.last_mut().unwrap_or(&mut root);
        match frame.pending.next() {
            Some(Pending::Text(text)) => frame.children.push(Node::Text(text)),
            Some(Pending::Element(child)) => open.push(Frame::new(child)),
            None => match open.pop() {
                Some(done) => {
                    let parent = open.last_mut().unwrap_or(&mut root);
                    parent.children.push(Node::Element(done.finish()));
                }
                None => return root.finish(),
            },
        }
    }
}

fn assign_agent_ids(root: &mut Element) {
    let mut next = 0;
    let mut stack = vec![root];
    while let Some(element) = stack.pop() {
        // Ids already present in the source markup are not ours.
        element.attrs.remove(AGENT_ID_ATTR);
        if element.is_interactive() {
            element
                .attrs
                .insert(AGENT_ID_ATTR.to_string(), AgentId(next).to_string());
            next += 1;
        }
        for child in element.children.iter_mut().rev() {
            if let Node::Element(child) = child {
                stack.push(child);
            }
        }
    }
}

fn collect_text<'a>(element: &'a Element, out: &mut Vec<&'a str>) {
    let mut stack: Vec<&Node> = element.children.iter().rev().collect();
    while let Some(node) = stack.pop() {
        match node {
            Node::Text(text) => out.push(text),
            Node::Element(child) => stack.extend(child.children.iter().rev()),
        }
    }
}

enum Line<'a> {
    Open(&'a Element, usize),
    Text(&'a str, usize),
    Close(&'a Element, usize),
}

/// Rendered lines in document order, generated lazily so a render budget
/// stops the walk early.
fn render_lines(root: &Element) -> impl Iterator<Item = String> + '_ {
    let mut stack = vec![Line::Open(root, 0)];
    std::iter::from_fn(move || {
        let line = stack.pop()?;
        Some(match line {
            Line::Open(element, depth) => {
                if !VOID_TAGS.contains(&element.tag.as_str()) {
                    stack.push(Line::Close(element, depth));
                }
                for child in element.children.iter().rev() {
                    stack.push(match child {
                        Node::Element(child) => Line::Open(child, depth + 1),
                        Node::Text(text) => Line::Text(text, depth),
                    });
                }
                let mut open = format!("{}<{}", " ".repeat(depth), element.tag);
                for (key, value) in &element.attrs {
                    open.push_str(&format!(" {key}=\"{}\"", escape(value, true)));
                }
                open.push('>');
                open
            }
            Line::Text(text, depth) => format!("{} {}", " ".repeat(depth), escape(text, false)),
            Line::Close(element, depth) => format!("{}</{}>", " ".repeat(depth), element.tag),
        })
    })
}

fn escape(raw: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
