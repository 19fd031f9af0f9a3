// src/exam/annotation.rs

//! Highlight and note layer over reading passages.
//!
//! Highlights live only for the passage they were made on and never leave
//! the candidate's machine.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

static MARK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<mark data-hl="\d+"(?: title="[^"]*")?>|</mark>"#).expect("mark tag pattern compiles")
});

pub type HighlightId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Highlight {
    pub id: HighlightId,
    /// Exact passage substring this highlight marks.
    pub text: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A run of passage text, marked or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Plain(&'a str),
    Marked { id: HighlightId, text: &'a str },
}

/// Highlights for the passage currently on screen.
#[derive(Debug, Default)]
pub struct AnnotationLayer {
    passage_id: Option<String>,
    highlights: Vec<Highlight>,
    next_id: HighlightId,
}

impl AnnotationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passage_id(&self) -> Option<&str> {
        self.passage_id.as_deref()
    }

    pub fn highlights(&self) -> &[Highlight] {
        &self.highlights
    }

    /// Switches to a passage, dropping all highlights if it is a different one.
    ///
    /// Returns true when the highlights were reset.
    pub fn set_passage(&mut self, passage_id: &str) -> bool {
        if self.passage_id.as_deref() == Some(passage_id) {
            return false;
        }
        self.passage_id = Some(passage_id.to_string());
        let had_any = !self.highlights.is_empty();
        self.highlights.clear();
        had_any
    }

    /// Highlights the current selection.
    ///
    /// Blank selections are ignored. Highlighting the same text twice returns
    /// the existing highlight, updating its note when one is given.
    pub fn add(&mut self, selection: &str, note: Option<String>) -> Option<HighlightId> {
        let text = selection.trim();
        if text.is_empty() {
            return None;
        }
        let note = note.filter(|n| !n.trim().is_empty());

        if let Some(existing) = self.highlights.iter_mut().find(|h| h.text == text) {
            if note.is_some() {
                existing.note = note;
            }
            return Some(existing.id);
        }

        self.next_id += 1;
        let id = self.next_id;
        self.highlights.push(Highlight {
            id,
            text: text.to_string(),
            note,
            created_at: Utc::now(),
        });
        Some(id)
    }

    pub fn set_note(&mut self, id: HighlightId, note: Option<String>) -> bool {
        match self.highlights.iter_mut().find(|h| h.id == id) {
            Some(h) => {
                h.note = note.filter(|n| !n.trim().is_empty());
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: HighlightId) -> bool {
        let before = self.highlights.len();
        self.highlights.retain(|h| h.id != id);
        self.highlights.len() != before
    }

    /// Removes the highlight whose text is exactly `text`.
    pub fn remove_text(&mut self, text: &str) -> bool {
        let text = text.trim();
        let before = self.highlights.len();
        self.highlights.retain(|h| h.text != text);
        self.highlights.len() != before
    }

    pub fn clear(&mut self) {
        self.highlights.clear();
    }

    /// Owner of every byte of `passage`.
    ///
    /// Longer highlight texts claim first (ties by creation order); every
    /// occurrence of a highlight's text claims the positions nobody owns yet.
    fn claims(&self, passage: &str) -> Vec<Option<HighlightId>> {
        let mut owners: Vec<Option<HighlightId>> = vec![None; passage.len()];

        let mut order: Vec<&Highlight> = self.highlights.iter().collect();
        order.sort_by(|a, b| b.text.len().cmp(&a.text.len()).then(a.id.cmp(&b.id)));

        for highlight in order {
            for (start, matched) in passage.match_indices(highlight.text.as_str()) {
                for owner in &mut owners[start..start + matched.len()] {
                    if owner.is_none() {
                        *owner = Some(highlight.id);
                    }
                }
            }
        }
        owners
    }

    /// Splits the passage into plain and highlighted runs.
    pub fn segments<'a>(&self, passage: &'a str) -> Vec<Segment<'a>> {
        let owners = self.claims(passage);
        let mut segments = Vec::new();
        let mut start = 0;

        while start < passage.len() {
            let owner = owners[start];
            let mut end = start + 1;
            while end < passage.len() && owners[end] == owner {
                end += 1;
            }
            let text = &passage[start..end];
            segments.push(match owner {
                Some(id) => Segment::Marked { id, text },
                None => Segment::Plain(text),
            });
            start = end;
        }
        segments
    }

    /// Renders the passage as HTML with `<mark>` around highlighted runs.
    pub fn render_markup(&self, passage: &str) -> String {
        let mut out = String::with_capacity(passage.len() + 32 * self.highlights.len());
        for segment in self.segments(passage) {
            match segment {
                Segment::Plain(text) => out.push_str(&escape_html(text)),
                Segment::Marked { id, text } => {
                    out.push_str(&format!("<mark data-hl=\"{}\"", id));
                    if let Some(note) = self
                        .highlights
                        .iter()
                        .find(|h| h.id == id)
                        .and_then(|h| h.note.as_deref())
                    {
                        out.push_str(&format!(" title=\"{}\"", escape_html(note)));
                    }
                    out.push('>');
                    out.push_str(&escape_html(text));
                    out.push_str("</mark>");
                }
            }
        }
        out
    }
}

/// Removes highlight markup produced by [`AnnotationLayer::render_markup`],
/// giving back the original passage text.
pub fn strip_markup(markup: &str) -> String {
    unescape_html(&MARK_TAG_RE.replace_all(markup, ""))
}

/// Not `ammonia::clean_text`: it also escapes spaces, quotes and `=`, which
/// `unescape_html` would have to undo for `strip_markup` to round-trip.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_html(text: &str) -> String {
    // &amp; last so "&amp;lt;" comes back as "&lt;"
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
