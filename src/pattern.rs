// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ignore pattern compiler.
//!
//! Biome ignore files use the same pattern syntax as gitignore. Each line is
//! compiled into a [`Pattern`] by translating its glob syntax into an anchored
//! regular expression.
//!
//! # Rule Sets
//!
//! An ordered sequence of patterns forms a rule set. The __last__ pattern that
//! matches a path governs it: a negated pattern includes the path, any other
//! pattern excludes it, and a path that nothing matches is included. Excluding
//! a directory excludes its entire subtree, so a file cannot be re-included if
//! one of its parent directories is excluded.
//!
//! # Pitfalls
//!
//! Lines that fail to compile (bad encoding, malformed character classes,
//! unterminated brackets) are not reported. They become inert patterns that
//! match nothing, which means that a typo in an ignore file silently ignores
//! nothing rather than aborting a push.
//!
//! # See Also
//!
//! - [gitignore pattern format](https://git-scm.com/docs/gitignore#_pattern_format)

use crate::tree::EntryKind;

use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Compiled ignore pattern.
///
/// The default value is inert, i.e., it never matches anything.
#[derive(Clone, Debug, Default)]
pub struct Pattern {
    regex: Option<Regex>,
    line: String,
    negated: bool,
    dir_only: bool,
}

impl Pattern {
    /// Compile a single line of an ignore file.
    ///
    /// Comments, blank lines, and lines with syntax errors compile into an
    /// inert pattern.
    pub fn parse(line: &str) -> Self {
        if line.starts_with('#') {
            return Self::default();
        }

        let line = trim_right(line);
        if line.is_empty() {
            return Self::default();
        }

        let source = line;
        let mut line = match line.strip_prefix('\\') {
            Some(rest) if rest.starts_with('#') => rest,
            _ => line,
        };

        let mut negated = false;
        if let Some(rest) = line.strip_prefix('!') {
            negated = true;
            line = rest;
        } else if line.starts_with("\\!") {
            line = &line[1..];
        }

        let mut rooted = false;
        if let Some(rest) = line.strip_prefix('/') {
            rooted = true;
            line = rest;
        }

        let mut dir_only = false;
        if let Some(rest) = line.strip_suffix('/') {
            dir_only = true;
            line = rest;
        }

        let Some(tokens) = lex(line).filter(|tokens| !tokens.is_empty()) else {
            return Self::default();
        };

        let mut tokens = tokens.as_slice();
        if let [Token::DoubleStar, rest @ ..] = tokens {
            // INVARIANT: A leading `**/` matches at any depth, so it undoes rooting.
            rooted = false;
            tokens = rest;
        } else if !rooted {
            rooted = tokens
                .iter()
                .any(|token| matches!(token, Token::Literal(lit) if lit.contains('/')));
        }

        let mut prefix = false;
        if let [rest @ .., Token::DoubleStar] = tokens {
            prefix = true;
            tokens = rest;
        }

        let mut expr = String::from(if rooted { "^" } else { "(?:^|.*/)" });
        for token in tokens {
            match token {
                Token::Literal(lit) => expr.push_str(&regex::escape(lit)),
                Token::Star => expr.push_str("[^/]*"),
                Token::QuestionMark => expr.push_str("[^/]"),
                Token::DoubleStar => expr.push_str("(?:.+/)?"),
                Token::Class(class) => {
                    if translate_class(&mut expr, class).is_none() {
                        debug!("malformed character class {class:?} in {source:?}");
                        return Self::default();
                    }
                }
            }
        }

        if !prefix {
            expr.push('$');
        }

        match Regex::new(&expr) {
            Ok(regex) => Self {
                regex: Some(regex),
                line: source.into(),
                negated,
                dir_only,
            },
            Err(error) => {
                debug!("pattern {source:?} compiled to bad expression {expr:?}: {error}");
                Self::default()
            }
        }
    }

    /// Compile a single line of raw bytes.
    ///
    /// Lines that are not valid UTF-8 compile into an inert pattern.
    pub fn parse_bytes(line: &[u8]) -> Self {
        std::str::from_utf8(line)
            .map(Self::parse)
            .unwrap_or_default()
    }

    /// Check if pattern can match anything at all.
    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }

    /// Check if pattern re-includes what it matches.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Check if pattern only applies to directories.
    pub fn is_dir_only(&self) -> bool {
        self.dir_only
    }

    /// Source line of pattern with trailing whitespace removed.
    pub fn as_str(&self) -> &str {
        self.line.as_str()
    }

    /// Match slash-separated relative path of an entry.
    ///
    /// Always false for inert patterns, for directory-only patterns given a
    /// non-directory, and for paths that are empty, rooted, end in a slash, or
    /// contain empty, `.`, or `..` elements.
    pub fn matches(&self, path: &str, kind: EntryKind) -> bool {
        let Some(regex) = &self.regex else {
            return false;
        };

        (kind == EntryKind::Directory || !self.dir_only)
            && is_valid_path(path)
            && regex.is_match(path)
    }

    #[cfg(test)]
    pub(crate) fn expr(&self) -> &str {
        self.regex.as_ref().map(Regex::as_str).unwrap_or_default()
    }
}

impl Display for Pattern {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Governing pattern of a path in rule set.
///
/// Returns the last pattern that matches, if any.
pub fn last_match<'p>(patterns: &'p [Pattern], path: &str, kind: EntryKind) -> Option<&'p Pattern> {
    patterns.iter().rev().find(|pattern| pattern.matches(path, kind))
}

/// Check if rule set excludes a path.
pub fn is_excluded(patterns: &[Pattern], path: &str, kind: EntryKind) -> bool {
    last_match(patterns, path, kind).is_some_and(|pattern| !pattern.is_negated())
}

/// Compile each line of ignore file content.
///
/// Inert lines are dropped.
pub fn parse_lines(data: &[u8]) -> Vec<Pattern> {
    data.split(|&byte| byte == b'\n')
        .map(Pattern::parse_bytes)
        .filter(Pattern::is_valid)
        .collect()
}

/// Compile ignore files in order.
///
/// Missing files are skipped.
///
/// # Errors
///
/// - Return [`PatternError::ReadIgnoreFile`] if an existing ignore file
///   cannot be read.
pub fn parse_files(paths: impl IntoIterator<Item = impl AsRef<Path>>) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();
    for path in paths {
        let path = path.as_ref();
        match read(path) {
            Ok(data) => {
                debug!("read ignore rules from {:?}", path.display());
                patterns.extend(parse_lines(&data));
            }
            Err(error) if error.kind() == ErrorKind::NotFound => continue,
            Err(error) => {
                return Err(PatternError::ReadIgnoreFile {
                    source: error,
                    path: path.into(),
                })
            }
        }
    }

    Ok(patterns)
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('/')
            .all(|elem| !elem.is_empty() && elem != "." && elem != "..")
}

/// Remove trailing whitespace unless it is escaped by a backslash.
fn trim_right(line: &str) -> &str {
    let mut prev_end = line.len();
    for (idx, c) in line.char_indices().rev() {
        let end = idx + c.len_utf8();
        if c == '\\' {
            return &line[..prev_end];
        }

        if !c.is_whitespace() {
            return &line[..end];
        }

        prev_end = end;
    }

    ""
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token<'a> {
    Literal(&'a str),
    Star,
    DoubleStar,
    QuestionMark,
    Class(&'a str),
}

fn push_literal<'a>(tokens: &mut Vec<Token<'a>>, lit: &'a str) {
    if !lit.is_empty() {
        tokens.push(Token::Literal(lit));
    }
}

/// Split pattern into tokens.
///
/// Returns `None` on an unterminated character class.
fn lex(pattern: &str) -> Option<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut literal_start = 0;

    loop {
        // INVARIANT: `pos` sits at the start of a path component here.
        let rest = &pattern[pos..];
        if rest.starts_with("**/") {
            push_literal(&mut tokens, &pattern[literal_start..pos]);
            tokens.push(Token::DoubleStar);
            pos += 3;
            literal_start = pos;
            continue;
        }

        if rest == "**" {
            push_literal(&mut tokens, &pattern[literal_start..pos]);
            tokens.push(Token::DoubleStar);
            return Some(tokens);
        }

        loop {
            let before = pos;
            let Some(c) = pattern[pos..].chars().next() else {
                push_literal(&mut tokens, &pattern[literal_start..]);
                return Some(tokens);
            };
            pos += c.len_utf8();

            match c {
                '/' => break,
                '*' => {
                    push_literal(&mut tokens, &pattern[literal_start..before]);
                    tokens.push(Token::Star);
                    literal_start = pos;
                }
                '?' => {
                    push_literal(&mut tokens, &pattern[literal_start..before]);
                    tokens.push(Token::QuestionMark);
                    literal_start = pos;
                }
                '[' => {
                    push_literal(&mut tokens, &pattern[literal_start..before]);
                    if pattern[pos..].starts_with('!') {
                        pos += 1;
                    }

                    // INVARIANT: A `]` right after the opening bracket is a member.
                    let mut first = true;
                    loop {
                        let c = pattern[pos..].chars().next()?;
                        pos += c.len_utf8();
                        if c == '/' {
                            return None;
                        }

                        if !first && c == ']' {
                            break;
                        }
                        first = false;
                    }

                    tokens.push(Token::Class(&pattern[before..pos]));
                    literal_start = pos;
                }
                '\\' => {
                    push_literal(&mut tokens, &pattern[literal_start..before]);
                    literal_start = pos;
                    let Some(escaped) = pattern[pos..].chars().next() else {
                        // Trailing backslash stands for itself.
                        tokens.push(Token::Literal("\\"));
                        return Some(tokens);
                    };
                    pos += escaped.len_utf8();
                    if escaped == '/' {
                        break;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Translate glob character class into a regular expression class.
///
/// Returns `None` if the class is malformed.
fn translate_class(expr: &mut String, class: &str) -> Option<()> {
    let mut chars = class[1..class.len() - 1].chars().peekable();
    let negated = chars.next_if_eq(&'!').is_some();
    let mut items: Vec<(char, char)> = Vec::new();
    let mut prev: Option<char> = None;

    if let Some(c) = chars.next_if(|c| matches!(c, '^' | '[' | '-')) {
        items.push((c, c));
        prev = Some(c);
    }

    while let Some(c) = chars.next() {
        if c != '-' {
            items.push((c, c));
            prev = Some(c);
            continue;
        }

        // INVARIANT: Hyphens that cannot form a range stand for themselves,
        // i.e., a trailing hyphen or one right after another range.
        let (Some(start), Some(&end)) = (prev, chars.peek()) else {
            items.push(('-', '-'));
            prev = Some('-');
            continue;
        };
        chars.next();

        if start > end {
            return None;
        }

        items.pop();
        prev = None;
        if !negated && start <= '/' && '/' <= end {
            // INVARIANT: A class never matches the path separator.
            if start < '/' {
                items.push((start, '.'));
            }
            if end > '/' {
                items.push(('0', end));
            }
        } else {
            items.push((start, end));
        }
    }

    expr.push('[');
    if negated {
        expr.push('^');
    }

    for (low, high) in items {
        push_class_char(expr, low);
        if low != high {
            expr.push('-');
            push_class_char(expr, high);
        }
    }

    if negated {
        expr.push('/');
    }
    expr.push(']');

    Some(())
}

fn push_class_char(expr: &mut String, c: char) {
    if matches!(
        c,
        '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '#'
            | '&' | '-' | '~'
    ) {
        expr.push('\\');
    }
    expr.push(c);
}

/// Ignore pattern error types.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    /// Existing ignore file cannot be read.
    #[error("failed to read ignore file at {:?}", path.display())]
    ReadIgnoreFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PatternError> = std::result::Result<T, E>;
