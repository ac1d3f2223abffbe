// src/manifest/pattern.rs

//! Glob patterns for file and directory rules
//!
//! Matching follows shell `fnmatch`: `*` and `?` also match `/`, so
//! `*.py` covers `app.py` and `lib/app.py` alike. Besides matching, a
//! pattern knows its specificity (used to pick one rule per path) and can
//! decide whether two patterns share at least one matching path (used to
//! reject ambiguous manifests at load time).

use super::ManifestError;
use crate::filesystem::path::sanitize_path;
use glob::{MatchOptions, Pattern};
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;
use std::fmt;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Ranking of a pattern; greater means more specific
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    /// No wildcard characters at all
    pub literal: bool,
    /// Count of literal characters, `/` separators included
    pub literal_chars: usize,
    /// Count of `/`-separated segments holding a wildcard
    pub wildcard_segments: usize,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.literal, self.literal_chars, Reverse(self.wildcard_segments)).cmp(&(
            other.literal,
            other.literal_chars,
            Reverse(other.wildcard_segments),
        ))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One matching step of a glob
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    Class { negated: bool, ranges: Vec<(char, char)> },
    Star,
}

impl Token {
    fn accepts(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar | Token::Star => true,
            Token::Class { negated, ranges } => {
                ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi) != *negated
            }
        }
    }

    /// Whether some single character satisfies both tokens
    fn intersects(&self, other: &Token) -> bool {
        match (self, other) {
            (Token::Literal(c), t) | (t, Token::Literal(c)) => t.accepts(*c),
            (Token::AnyChar | Token::Star, _) | (_, Token::AnyChar | Token::Star) => true,
            (
                Token::Class { negated: true, .. },
                Token::Class { negated: true, .. },
            ) => true,
            (Token::Class { negated: false, ranges }, negative @ Token::Class { negated: true, .. })
            | (negative @ Token::Class { negated: true, .. }, Token::Class { negated: false, ranges }) => {
                ranges.iter().any(|&(lo, hi)| {
                    (lo..=hi).take(4096).any(|c| negative.accepts(c))
                })
            }
            (Token::Class { ranges: a, .. }, Token::Class { ranges: b, .. }) => a
                .iter()
                .any(|&(alo, ahi)| b.iter().any(|&(blo, bhi)| alo <= bhi && blo <= ahi)),
        }
    }
}

/// A validated rule pattern
#[derive(Debug, Clone)]
pub struct RulePattern {
    raw: String,
    glob: Pattern,
    tokens: Vec<Token>,
    specificity: Specificity,
}

impl RulePattern {
    /// Compile a manifest key into a pattern
    pub fn new(raw: &str) -> Result<Self, ManifestError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let invalid = |reason: String| ManifestError::InvalidGlob {
            pattern: raw.to_string(),
            reason,
        };

        let clean = sanitize_path(trimmed).map_err(|e| invalid(e.to_string()))?;
        let normalized = crate::filesystem::path::match_key(&clean);
        let glob = Pattern::new(&normalized).map_err(|e| invalid(e.msg.to_string()))?;
        let tokens = tokenize(&normalized);

        let literal_chars = tokens.iter().filter(|t| matches!(t, Token::Literal(_))).count();
        let wildcard_segments = normalized
            .split('/')
            .filter(|segment| segment.contains(['*', '?', '[']))
            .count();

        Ok(Self {
            specificity: Specificity {
                literal: wildcard_segments == 0,
                literal_chars,
                wildcard_segments,
            },
            raw: normalized,
            glob,
            tokens,
        })
    }

    /// The normalized pattern text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn specificity(&self) -> Specificity {
        self.specificity
    }

    pub fn is_literal(&self) -> bool {
        self.specificity.literal
    }

    /// Match a `/`-separated relative path
    pub fn matches(&self, path: &str) -> bool {
        if self.is_literal() {
            return self.raw == path;
        }
        self.glob.matches_with(path, MATCH_OPTIONS)
    }

    /// Leading directory prefixes made only of literal segments
    ///
    /// `data/cache/*.bin` yields `data` and `data/cache`. The final segment
    /// is never a prefix since it names the file itself.
    pub fn literal_dir_prefixes(&self) -> Vec<String> {
        let segments: Vec<&str> = self.raw.split('/').collect();
        let mut prefixes = Vec::new();
        for end in 1..segments.len() {
            if segments[end - 1].contains(['*', '?', '[']) {
                break;
            }
            prefixes.push(segments[..end].join("/"));
        }
        prefixes
    }

    /// Whether at least one path is matched by both patterns
    pub fn overlaps(&self, other: &RulePattern) -> bool {
        let (a, b) = (&self.tokens, &other.tokens);
        let mut seen = HashSet::new();
        let mut pending = vec![(0usize, 0usize)];

        while let Some((i, j)) = pending.pop() {
            if !seen.insert((i, j)) {
                continue;
            }
            if i == a.len() && j == b.len() {
                return true;
            }
            // A star may stop consuming at any point
            if a.get(i) == Some(&Token::Star) {
                pending.push((i + 1, j));
            }
            if b.get(j) == Some(&Token::Star) {
                pending.push((i, j + 1));
            }
            match (a.get(i), b.get(j)) {
                (Some(Token::Star), Some(Token::Star)) | (None, _) | (_, None) => {}
                (Some(Token::Star), Some(_)) => pending.push((i, j + 1)),
                (Some(_), Some(Token::Star)) => pending.push((i + 1, j)),
                (Some(x), Some(y)) if x.intersects(y) => pending.push((i + 1, j + 1)),
                _ => {}
            }
        }
        false
    }
}

impl fmt::Display for RulePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                if tokens.last() != Some(&Token::Star) {
                    tokens.push(Token::Star);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::AnyChar);
                i += 1;
            }
            '[' => {
                let (token, next) = parse_class(&chars, i);
                tokens.push(token);
                i = next;
            }
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }
    tokens
}

/// Parse `[...]` starting at `start`; glob has already validated the syntax
fn parse_class(chars: &[char], start: usize) -> (Token, usize) {
    let mut i = start + 1;
    let negated = matches!(chars.get(i), Some('!'));
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    let mut first = true;
    while i < chars.len() && (chars[i] != ']' || first) {
        first = false;
        let lo = chars[i];
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|c| *c != ']') {
            ranges.push((lo, chars[i + 2]));
            i += 3;
        } else {
            ranges.push((lo, lo));
            i += 1;
        }
    }

    // Single-character classes such as `[*]` are escapes for a literal
    let token = match ranges.as_slice() {
        [(lo, hi)] if lo == hi && !negated => Token::Literal(*lo),
        _ => Token::Class { negated, ranges },
    };
    (token, i + 1)
}
