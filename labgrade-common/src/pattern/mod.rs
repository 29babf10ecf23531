//! Line-oriented output patterns.
//!
//! A [`Pattern`] matches one whole line of captured output. Patterns come
//! from two sources:
//!
//! - raw regular expressions (`Pattern::regex("^ALL TESTS PASSED$")`), which
//!   are anchored to the full line whether or not the source carries `^`/`$`
//! - template lines (`Pattern::template_line(" ..0: pte 0x0000000021fda801 ...")`),
//!   compiled into fixed text, indentation wildcards and value captures
//!
//! Matching never keeps state: every query scans the buffer from its first
//! line, so repeating a query against an unchanged buffer gives the same
//! answer.

pub mod derive;

use regex::Regex;

use crate::errors::GradeResult;

/// Marker that stands for one level of indentation in a template.
pub const INDENT_MARKER: &str = "..";

/// Regex for a value placeholder: a zero-extended 64-bit hex word.
pub const VALUE_TOKEN: &str = r"0x00000000[0-9a-f]+";

const INDENT_RE: &str = r"\s*\.\.\s*";

/// Number of trailing output lines quoted in mismatch diagnostics.
pub const EXCERPT_LINES: usize = 10;

/// One piece of a compiled template line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text that must appear verbatim.
    Literal(String),
    /// An indentation marker with any surrounding whitespace.
    Indent,
    /// A hex value; captured as a group.
    Value,
}

/// A compiled, immutable single-line matcher.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
    regex: Regex,
}

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    /// Zero-based line index within the buffer.
    pub line_no: usize,
    /// The full text of the matched line.
    pub line: String,
    /// Captured groups, in order. Unmatched optional groups are empty.
    pub captures: Vec<String>,
}

/// Result of looking for the first occurrence of a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Found(LineMatch),
    NotFound,
}

impl MatchResult {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn into_option(self) -> Option<LineMatch> {
        match self {
            Self::Found(m) => Some(m),
            Self::NotFound => None,
        }
    }
}

impl Pattern {
    /// Compile a raw regular expression, anchored to the whole line.
    pub fn regex(source: &str) -> GradeResult<Self> {
        let body = source.strip_prefix('^').unwrap_or(source);
        let body = match body.strip_suffix('$') {
            Some(stripped) if !stripped.ends_with('\\') => stripped,
            _ => body,
        };
        let regex = Regex::new(&format!("^(?:{body})$"))?;
        Ok(Self {
            source: source.to_string(),
            segments: Vec::new(),
            regex,
        })
    }

    /// Match a line exactly, with no regex interpretation.
    pub fn literal(text: &str) -> GradeResult<Self> {
        Ok(Self {
            source: text.to_string(),
            segments: vec![Segment::Literal(text.to_string())],
            regex: Regex::new(&format!("^{}$", regex::escape(text)))?,
        })
    }

    /// Compile one line of an expected-output template.
    ///
    /// Every `..` (with the whitespace around it) becomes an indentation
    /// wildcard, every token matching [`VALUE_TOKEN`] becomes a capture
    /// group, and the rest must appear verbatim.
    pub fn template_line(line: &str) -> GradeResult<Self> {
        let segments = parse_template_line(line)?;
        let mut re = String::from("^");
        for segment in &segments {
            match segment {
                Segment::Literal(text) => re.push_str(&regex::escape(text)),
                Segment::Indent => re.push_str(INDENT_RE),
                Segment::Value => {
                    re.push('(');
                    re.push_str(VALUE_TOKEN);
                    re.push(')');
                }
            }
        }
        re.push('$');
        Ok(Self {
            source: line.to_string(),
            segments,
            regex: Regex::new(&re)?,
        })
    }

    /// The text this pattern was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Template segments; empty for raw regex patterns.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Check a single line (without its terminator).
    pub fn matches_line(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// First line of `buffer` matching this pattern.
    pub fn find_first(&self, buffer: &str) -> MatchResult {
        self.matches_in(buffer)
            .next()
            .map_or(MatchResult::NotFound, MatchResult::Found)
    }

    /// Every line of `buffer` matching this pattern, in buffer order.
    pub fn find_all(&self, buffer: &str) -> Vec<LineMatch> {
        self.matches_in(buffer).collect()
    }

    pub fn is_match(&self, buffer: &str) -> bool {
        lines(buffer).any(|(_, line)| self.regex.is_match(line))
    }

    fn matches_in<'a>(&'a self, buffer: &'a str) -> impl Iterator<Item = LineMatch> + 'a {
        lines(buffer).filter_map(move |(line_no, line)| {
            self.regex.captures(line).map(|caps| LineMatch {
                line_no,
                line: line.to_string(),
                captures: caps
                    .iter()
                    .skip(1)
                    .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
                    .collect(),
            })
        })
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// A multi-line expected-output template, compiled once.
#[derive(Debug, Clone)]
pub struct Template {
    lines: Vec<Pattern>,
}

impl Template {
    /// Compile every non-blank line of `text` with [`Pattern::template_line`].
    pub fn compile(text: &str) -> GradeResult<Self> {
        let lines = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(Pattern::template_line)
            .collect::<GradeResult<Vec<_>>>()?;
        Ok(Self { lines })
    }

    pub fn lines(&self) -> &[Pattern] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The first template line with no match anywhere in `buffer`.
    pub fn first_missing(&self, buffer: &str) -> Option<&Pattern> {
        self.lines.iter().find(|p| !p.is_match(buffer))
    }

    /// Match the template lines as an ordered sequence.
    ///
    /// Each line must match strictly after the line matched for its
    /// predecessor. Returns the matches, or the first line that could not
    /// be placed.
    pub fn match_in_order<'a>(&'a self, buffer: &str) -> Result<Vec<LineMatch>, &'a Pattern> {
        let mut found = Vec::with_capacity(self.lines.len());
        let mut next_line = 0;
        for pattern in &self.lines {
            let hit = pattern
                .matches_in(buffer)
                .find(|m| m.line_no >= next_line)
                .ok_or(pattern)?;
            next_line = hit.line_no + 1;
            found.push(hit);
        }
        Ok(found)
    }
}

fn parse_template_line(line: &str) -> GradeResult<Vec<Segment>> {
    let value_re = Regex::new(VALUE_TOKEN)?;
    let mut segments = Vec::new();

    for (i, piece) in line.split(INDENT_MARKER).enumerate() {
        if i > 0 {
            // Whitespace on either side of the marker belongs to the wildcard.
            if let Some(Segment::Literal(prev)) = segments.last_mut() {
                let trimmed = prev.trim_end().len();
                prev.truncate(trimmed);
                if prev.is_empty() {
                    segments.pop();
                }
            }
            segments.push(Segment::Indent);
        }
        let piece = if i > 0 { piece.trim_start() } else { piece };

        let mut last = 0;
        for m in value_re.find_iter(piece) {
            if m.start() > last {
                segments.push(Segment::Literal(piece[last..m.start()].to_string()));
            }
            segments.push(Segment::Value);
            last = m.end();
        }
        if last < piece.len() {
            segments.push(Segment::Literal(piece[last..].to_string()));
        }
    }
    Ok(segments)
}

/// Iterate `(index, line)` pairs, dropping a trailing `\r` from each line.
fn lines(buffer: &str) -> impl Iterator<Item = (usize, &str)> {
    buffer
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .enumerate()
}

/// The last few lines of `buffer`, indented, for failure messages.
pub fn excerpt(buffer: &str, max_lines: usize) -> String {
    let all: Vec<&str> = lines(buffer).map(|(_, line)| line).collect();
    if all.is_empty() {
        return "    (no output captured)".to_string();
    }
    let skip = all.len().saturating_sub(max_lines);
    let mut out = String::new();
    if skip > 0 {
        out.push_str(&format!("    ... ({skip} earlier lines omitted)\n"));
    }
    let tail: Vec<String> = all[skip..].iter().map(|line| format!("    {line}")).collect();
    out.push_str(&tail.join("\n"));
    out
}
