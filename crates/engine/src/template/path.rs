//! Reference path grammar: `alias(.segment)*`, with `[n]` accepted as an
//! index segment.

use std::fmt;

use super::TemplateError;

/// Root of a reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alias {
    /// A prior step, by name.
    Step(String),
    /// A prior step, by 0-based index (`steps.<n>`).
    Index(usize),
    /// The most recent step that produced an output.
    Previous,
    /// Execution metadata (`id`, `workflow_id`, `triggered_by`).
    Execution,
}

/// One field access after the alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A parsed placeholder path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPath {
    pub alias: Alias,
    pub segments: Vec<Segment>,
}

pub(crate) const PREVIOUS_STEP: &str = "previous_step";
pub(crate) const STEPS: &str = "steps";
pub(crate) const EXECUTION: &str = "execution";

/// Names that cannot be used as step names because they are aliases.
pub const RESERVED_NAMES: &[&str] = &[PREVIOUS_STEP, STEPS, EXECUTION];

/// Step names and keys accepted in paths.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_key(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl RefPath {
    /// Parse a path such as `fetch.data.items[0].id` or `steps.1.status`.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let invalid = |reason: &str| TemplateError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty reference"));
        }

        let normalized = normalize_brackets(trimmed).ok_or_else(|| invalid("malformed index"))?;
        let mut parts = normalized.split('.');

        let head = parts.next().unwrap_or_default();
        let alias = match head {
            PREVIOUS_STEP => Alias::Previous,
            EXECUTION => Alias::Execution,
            STEPS => {
                let index = parts
                    .next()
                    .ok_or_else(|| invalid("'steps' must be followed by an index"))?;
                let index = index
                    .parse::<usize>()
                    .map_err(|_| invalid("'steps' must be followed by an index"))?;
                Alias::Index(index)
            }
            name if is_identifier(name) => Alias::Step(name.to_string()),
            _ => return Err(invalid("reference must start with a step name")),
        };

        let mut segments = Vec::new();
        for part in parts {
            if !is_key(part) {
                return Err(invalid("empty or malformed segment"));
            }
            match part.parse::<usize>() {
                Ok(i) => segments.push(Segment::Index(i)),
                Err(_) => segments.push(Segment::Key(part.to_string())),
            }
        }

        Ok(Self { alias, segments })
    }

    /// The step name if this path is rooted at a named step.
    pub fn step_name(&self) -> Option<&str> {
        match &self.alias {
            Alias::Step(name) => Some(name),
            _ => None,
        }
    }
}

/// Rewrite `a[0][1].b` as `a.0.1.b`. Returns None on unbalanced brackets or
/// non-numeric indexes.
fn normalize_brackets(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                let mut digits = String::new();
                loop {
                    match chars.next()? {
                        ']' => break,
                        d if d.is_ascii_digit() => digits.push(d),
                        _ => return None,
                    }
                }
                if digits.is_empty() {
                    return None;
                }
                out.push('.');
                out.push_str(&digits);
            }
            ']' => return None,
            c => out.push(c),
        }
    }
    Some(out)
}

impl fmt::Display for RefPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Alias::Step(name) => f.write_str(name)?,
            Alias::Index(i) => write!(f, "{STEPS}.{i}")?,
            Alias::Previous => f.write_str(PREVIOUS_STEP)?,
            Alias::Execution => f.write_str(EXECUTION)?,
        }
        for segment in &self.segments {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}
