//! SGR escape sequence scanning.
//!
//! Console output arrives with embedded `ESC [ codes m` sequences. The
//! scanner splits a chunk into runs of text that share one style, and the
//! [`StyleCache`] hands out a single shared [`Style`] per canonical code list.

use std::collections::HashMap;
use std::sync::Arc;

/// Escape introducer that starts every SGR sequence.
pub const ESCAPE_INTRODUCER: &str = "\x1b[";

/// Character that ends the code list of an SGR sequence.
const SGR_TERMINATOR: char = 'm';

/// Key of the reset/normal style. An empty code list resolves here too.
pub const NORMAL_STYLE_KEY: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    fn from_offset(offset: u32) -> Option<Self> {
        Some(match offset {
            0 => Color::Black,
            1 => Color::Red,
            2 => Color::Green,
            3 => Color::Yellow,
            4 => Color::Blue,
            5 => Color::Magenta,
            6 => Color::Cyan,
            7 => Color::White,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Color::Black => "black",
            Color::Red => "red",
            Color::Green => "green",
            Color::Yellow => "yellow",
            Color::Blue => "blue",
            Color::Magenta => "magenta",
            Color::Cyan => "cyan",
            Color::White => "white",
        }
    }
}

/// A rendering attribute contributed by one SGR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleAttribute {
    Bold,
    Light,
    Underline,
    Foreground(Color),
    Background(Color),
}

impl StyleAttribute {
    /// Attribute for a single code, or `None` for codes with no rendering
    /// (including reset and anything unrecognized).
    pub fn from_code(code: &str) -> Option<Self> {
        let code: u32 = code.trim().parse().ok()?;
        match code {
            1 => Some(StyleAttribute::Bold),
            2 => Some(StyleAttribute::Light),
            4 => Some(StyleAttribute::Underline),
            30..=37 => Color::from_offset(code - 30).map(StyleAttribute::Foreground),
            40..=47 => Color::from_offset(code - 40).map(StyleAttribute::Background),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Style {
    key: String,
    attributes: Vec<StyleAttribute>,
}

impl Style {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn attributes(&self) -> &[StyleAttribute] {
        &self.attributes
    }

    pub fn is_normal(&self) -> bool {
        self.key == NORMAL_STYLE_KEY
    }
}

/// A non-empty piece of text rendered in one style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledRun {
    pub style: Arc<Style>,
    pub text: String,
}

impl StyledRun {
    pub fn new(style: Arc<Style>, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }

    pub fn style_key(&self) -> &str {
        self.style.key()
    }
}

/// Canonical key for a `;`-separated code list: codes sorted ascending
/// (numeric codes first, by value) and rejoined with `;`.
pub fn canonical_key(code_list: &str) -> String {
    if code_list.is_empty() {
        return NORMAL_STYLE_KEY.to_string();
    }
    let mut codes: Vec<&str> = code_list.split(';').collect();
    codes.sort_by(|a, b| {
        let parsed_a = a.parse::<u32>().ok();
        let parsed_b = b.parse::<u32>().ok();
        match (parsed_a, parsed_b) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    });
    codes.join(";")
}

/// Lazily populated table of styles keyed by canonical code list.
#[derive(Debug)]
pub struct StyleCache {
    styles: HashMap<String, Arc<Style>>,
}

impl StyleCache {
    pub fn new() -> Self {
        let mut styles = HashMap::new();
        styles.insert(
            NORMAL_STYLE_KEY.to_string(),
            Arc::new(Style {
                key: NORMAL_STYLE_KEY.to_string(),
                attributes: Vec::new(),
            }),
        );
        Self { styles }
    }

    pub fn normal(&self) -> Arc<Style> {
        self.resolve_key(NORMAL_STYLE_KEY)
    }

    /// Resolve a raw code list (as found between `ESC [` and `m`).
    pub fn resolve(&mut self, code_list: &str) -> Arc<Style> {
        let key = canonical_key(code_list);
        if let Some(style) = self.styles.get(&key) {
            return Arc::clone(style);
        }
        let attributes = key.split(';').filter_map(StyleAttribute::from_code).collect();
        let style = Arc::new(Style {
            key: key.clone(),
            attributes,
        });
        tracing::trace!(key = %key, "created console style");
        self.styles.insert(key, Arc::clone(&style));
        style
    }

    fn resolve_key(&self, key: &str) -> Arc<Style> {
        match self.styles.get(key) {
            Some(style) => Arc::clone(style),
            None => Arc::new(Style {
                key: key.to_string(),
                attributes: Vec::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

impl Default for StyleCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `text` into styled runs. Every chunk starts in the normal style.
///
/// A segment without a terminator keeps the previous style and is emitted
/// verbatim; empty segments produce no run.
pub fn scan(text: &str, cache: &mut StyleCache) -> Vec<StyledRun> {
    let mut style = cache.normal();
    let mut runs = Vec::new();

    for (index, segment) in text.split(ESCAPE_INTRODUCER).enumerate() {
        if segment.is_empty() {
            continue;
        }
        let body = if index == 0 {
            segment
        } else {
            match segment.split_once(SGR_TERMINATOR) {
                Some((codes, rest)) => {
                    style = cache.resolve(codes);
                    rest
                }
                None => {
                    tracing::trace!(segment_len = segment.len(), "unterminated escape sequence");
                    segment
                }
            }
        };
        if !body.is_empty() {
            runs.push(StyledRun::new(Arc::clone(&style), body));
        }
    }

    runs
}

/// Concatenated text of `runs`, without styling.
pub fn plain_text(runs: &[StyledRun]) -> String {
    runs.iter().map(|run| run.text.as_str()).collect()
}
