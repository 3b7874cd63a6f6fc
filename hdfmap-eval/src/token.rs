//! Symbol scanning: splits an expression into literal text and namespace
//! symbols before anything is resolved.
//!
//! Recognized forms, longest match first:
//!
//! | form | meaning |
//! |---|---|
//! | `(a\|b\|c)` | first alternative that resolves, optional `?(default)` |
//! | `name@attr` | attribute of a dataset or group |
//! | `name?(default)` | value, or `default` when `name` is missing |
//! | `_name` | dataset path |
//! | `__name` | canonical name of the dataset |
//! | `s_name` | value followed by its units |
//! | `d_name` | unread dataset handle |
//! | `name` | value |

use std::fmt;

use hdfmap_core::{Error, Result};

use crate::functions;

/// Words that are never namespace symbols.
const KEYWORDS: &[&str] = &[
    "and", "or", "not", "if", "else", "in", "True", "False", "None", "np",
];

/// How a plain name reference is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Bare,
    Path,
    CanonicalName,
    StringRepr,
    RawHandle,
}

/// A name with its (optional) prefix split off.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameRef {
    /// Identifier exactly as written, prefix included.
    pub raw: String,
    pub kind: RefKind,
    /// Identifier without the prefix.
    pub name: String,
}

impl NameRef {
    /// Classifies an identifier by its prefix.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let (kind, name) = if let Some(rest) = raw.strip_prefix("__").filter(|r| starts_ident(r)) {
            (RefKind::CanonicalName, rest)
        } else if let Some(rest) = raw.strip_prefix('_').filter(|r| starts_ident(r)) {
            (RefKind::Path, rest)
        } else if let Some(rest) = raw.strip_prefix("s_").filter(|r| starts_ident(r)) {
            (RefKind::StringRepr, rest)
        } else if let Some(rest) = raw.strip_prefix("d_").filter(|r| starts_ident(r)) {
            (RefKind::RawHandle, rest)
        } else {
            (RefKind::Bare, raw)
        };
        Self {
            raw: raw.to_string(),
            kind,
            name: name.to_string(),
        }
    }

    /// The same reference read as a plain name.
    #[must_use]
    pub fn as_bare(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            kind: RefKind::Bare,
            name: self.raw.clone(),
        }
    }
}

fn starts_ident(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
}

/// One recognized symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Name(NameRef),
    Attribute { target: String, attr: String },
    Default { inner: Box<Token>, default: String },
    FallbackGroup {
        alternatives: Vec<Token>,
        default: Option<String>,
    },
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(r) => write!(f, "{}", r.raw),
            Self::Attribute { target, attr } => write!(f, "{target}@{attr}"),
            Self::Default { inner, default } => write!(f, "{inner}?({default})"),
            Self::FallbackGroup {
                alternatives,
                default,
            } => {
                let alts: Vec<String> = alternatives.iter().map(ToString::to_string).collect();
                write!(f, "({})", alts.join("|"))?;
                if let Some(default) = default {
                    write!(f, "?({default})")?;
                }
                Ok(())
            }
        }
    }
}

/// Piece of a scanned expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Symbol(Token),
}

/// Expression split into text and symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scanned {
    pub source: String,
    pub segments: Vec<Segment>,
}

impl Scanned {
    /// Symbols in order of appearance.
    pub fn symbols(&self) -> impl Iterator<Item = &Token> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Symbol(t) => Some(t),
            Segment::Text(_) => None,
        })
    }
}

/// Splits `expression` into text and symbols.
///
/// # Errors
/// Returns [`Error::ExpressionSyntax`] for an unterminated string, an
/// unbalanced fallback group or default, or an `@` without attribute name.
pub fn scan(expression: &str) -> Result<Scanned> {
    Scanner::new(expression).run()
}

struct Scanner<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    segments: Vec<Segment>,
    text: String,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            segments: Vec::new(),
            text: String::new(),
        }
    }

    fn run(mut self) -> Result<Scanned> {
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if c == '\'' || c == '"' {
                let end = self.string_end(self.pos)?;
                self.copy_text(end);
            } else if c.is_ascii_digit() || (c == '.' && self.peek_is(1, |n| n.is_ascii_digit())) {
                let end = self.number_end(self.pos);
                self.copy_text(end);
            } else if c == '(' {
                if let Some((token, end)) = self.fallback_group(self.pos)? {
                    self.push_symbol(token);
                    self.pos = end;
                } else {
                    self.copy_text(self.pos + 1);
                }
            } else if c.is_ascii_alphabetic() || c == '_' {
                self.identifier()?;
            } else {
                self.copy_text(self.pos + 1);
            }
        }
        if !self.text.is_empty() {
            self.segments.push(Segment::Text(std::mem::take(&mut self.text)));
        }
        Ok(Scanned {
            source: self.source.to_string(),
            segments: self.segments,
        })
    }

    fn syntax(&self, message: impl Into<String>) -> Error {
        Error::syntax(self.source, message)
    }

    fn peek_is(&self, offset: usize, pred: impl Fn(char) -> bool) -> bool {
        self.chars.get(self.pos + offset).copied().is_some_and(pred)
    }

    fn copy_text(&mut self, end: usize) {
        self.text.extend(&self.chars[self.pos..end]);
        self.pos = end;
    }

    fn push_symbol(&mut self, token: Token) {
        if !self.text.is_empty() {
            self.segments.push(Segment::Text(std::mem::take(&mut self.text)));
        }
        self.segments.push(Segment::Symbol(token));
    }

    fn string_end(&self, start: usize) -> Result<usize> {
        let quote = self.chars[start];
        let mut i = start + 1;
        while i < self.chars.len() {
            match self.chars[i] {
                '\\' => i += 2,
                c if c == quote => return Ok(i + 1),
                _ => i += 1,
            }
        }
        Err(self.syntax("unterminated string literal"))
    }

    fn number_end(&self, start: usize) -> usize {
        let mut i = start;
        while i < self.chars.len() {
            let c = self.chars[i];
            let exponent_sign =
                (c == '+' || c == '-') && i > start && matches!(self.chars[i - 1], 'e' | 'E');
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
                i += 1;
            } else {
                break;
            }
        }
        i
    }

    /// Index of the `)` matching the `(` at `open`, skipping nested groups and strings.
    fn matching_paren(&self, open: usize) -> Result<Option<usize>> {
        let mut depth = 0usize;
        let mut i = open;
        while i < self.chars.len() {
            match self.chars[i] {
                '\'' | '"' => {
                    i = self.string_end(i)?;
                    continue;
                }
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Ok((self.chars[i] == ')').then_some(i));
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Ok(None)
    }

    fn text_between(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    fn fallback_group(&self, open: usize) -> Result<Option<(Token, usize)>> {
        let Some(close) = self.matching_paren(open)? else {
            let rest = self.text_between(open, self.chars.len());
            if rest.contains('|') && !rest.contains("||") {
                return Err(self.syntax("unbalanced fallback group"));
            }
            return Ok(None);
        };
        let inner = self.text_between(open + 1, close);
        if !inner.contains('|') || inner.contains("||") {
            return Ok(None);
        }
        let mut alternatives = Vec::new();
        for part in split_top_level(&inner, '|') {
            match parse_alternative(part.trim(), self.source)? {
                Some(token) => alternatives.push(token),
                None => return Ok(None),
            }
        }
        let (default, end) = self.default_after(close + 1)?;
        Ok(Some((
            Token::FallbackGroup {
                alternatives,
                default,
            },
            end,
        )))
    }

    /// Parses `?(...)` starting at `at`, returning the default text and the end index.
    fn default_after(&self, at: usize) -> Result<(Option<String>, usize)> {
        if self.chars.get(at) != Some(&'?') || self.chars.get(at + 1) != Some(&'(') {
            return Ok((None, at));
        }
        let close = self
            .matching_paren(at + 1)?
            .ok_or_else(|| self.syntax("unbalanced default value"))?;
        let default = self.text_between(at + 2, close).trim().to_string();
        if default.is_empty() {
            return Err(self.syntax("empty default value"));
        }
        Ok((Some(default), close + 1))
    }

    fn identifier(&mut self) -> Result<()> {
        let start = self.pos;
        let mut end = start;
        while end < self.chars.len() && (self.chars[end].is_ascii_alphanumeric() || self.chars[end] == '_') {
            end += 1;
        }
        let word = self.text_between(start, end);
        let previous = self.text.trim_end().chars().last();

        // Attribute access, method calls and keywords stay literal.
        let after_dot = previous == Some('.');
        let next_non_space = self.chars[end..].iter().copied().find(|c| !c.is_whitespace());
        let is_call = next_non_space == Some('(') && self.chars.get(end) != Some(&'?');
        if after_dot || KEYWORDS.contains(&word.as_str()) || (is_call && functions::is_function(&word)) {
            self.copy_text(end);
            return Ok(());
        }

        let mut token = if self.chars.get(end) == Some(&'@') {
            let attr_start = end + 1;
            let mut attr_end = attr_start;
            while attr_end < self.chars.len()
                && (self.chars[attr_end].is_ascii_alphanumeric() || self.chars[attr_end] == '_')
            {
                attr_end += 1;
            }
            if attr_end == attr_start {
                return Err(self.syntax(format!("missing attribute name after '{word}@'")));
            }
            let attr = self.text_between(attr_start, attr_end);
            end = attr_end;
            Token::Attribute { target: word, attr }
        } else {
            Token::Name(NameRef::parse(&word))
        };

        let (default, after) = self.default_after(end)?;
        if let Some(default) = default {
            token = Token::Default {
                inner: Box::new(token),
                default,
            };
            end = after;
        }
        self.push_symbol(token);
        self.pos = end;
        Ok(())
    }
}

/// Splits on `sep` outside brackets and strings.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut last = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 => {
                parts.push(&text[last..i]);
                last = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[last..]);
    parts
}

/// Parses one fallback alternative; `None` when the text is not a plain symbol.
fn parse_alternative(text: &str, source: &str) -> Result<Option<Token>> {
    let scanned = Scanner::new(text).run().map_err(|e| match e {
        Error::ExpressionSyntax { message, .. } => Error::syntax(source, message),
        other => other,
    })?;
    match scanned.segments.as_slice() {
        [Segment::Symbol(token)] => Ok(Some(token.clone())),
        _ => Ok(None),
    }
}
