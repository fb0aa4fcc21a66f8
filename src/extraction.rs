use std::fmt::Debug;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{utils::HttpSimError, values::ValueStore};

/// Pulls a named value out of a response body. The values known so far are
/// passed along for extractors that need earlier outputs to compute theirs.
///
/// Returning an empty name is treated as a misconfiguration by the step
/// runner and aborts the flow.
pub trait Extractor: Debug + Send + Sync {
    fn extract(&self, body: &str, values: &ValueStore) -> Result<(String, String), HttpSimError>;
}

// ---------------------------------------------------------------------------------------------- //

/// Iterates over the substrings lying strictly between an occurrence of
/// `after_this` and the first `before_this` that follows it, left to right.
/// Every occurrence of `after_this` yields at most one candidate; the
/// iteration ends at the first occurrence that has no closing delimiter.
#[derive(Debug, Clone)]
pub struct Occurrences<'a> {
    body: &'a str,
    after_this: &'a str,
    before_this: &'a str,
    cursor: usize,
    exhausted: bool
}

impl<'a> Occurrences<'a> {
    pub fn new(body: &'a str, after_this: &'a str, before_this: &'a str) -> Self {
        Occurrences {
            body,
            after_this,
            before_this,
            cursor: 0,
            exhausted: false
        }
    }
}

impl<'a> Iterator for Occurrences<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let Some(found_at) = self.body[self.cursor..].find(self.after_this) else {
            self.exhausted = true;
            return None;
        };

        let value_start = self.cursor + found_at + self.after_this.len();
        let Some(value_len) = self.body[value_start..].find(self.before_this) else {
            self.exhausted = true;
            return None;
        };

        // An empty opening delimiter matches everywhere, so step over one char
        // to make sure the cursor always moves forward.
        if self.after_this.is_empty() {
            match self.body[value_start..].chars().next() {
                Some(c) => self.cursor = value_start + c.len_utf8(),
                None => self.exhausted = true
            }
        }
        else {
            self.cursor = value_start;
        }

        Some(&self.body[value_start..value_start + value_len])
    }
}

/// Returns the `occurrence`-th (0-indexed) delimiter-bounded substring.
pub fn string_between_n<'a>(body: &'a str, after_this: &'a str, before_this: &'a str, occurrence: usize) -> Option<&'a str> {
    Occurrences::new(body, after_this, before_this).nth(occurrence)
}

// ---------------------------------------------------------------------------------------------- //

fn unbounded() -> i64 { -1 }

/// Default extractor: the text between `after_this` and `before_this`,
/// optionally constrained and refined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub after_this: String,
    pub before_this: String,
    /// Key the result is stored under
    pub name: String,

    /// Move on to the next occurrence when a candidate breaks a constraint
    #[serde(default)]
    pub iterate: bool,
    /// -1 means no maximum
    #[serde(default = "unbounded")]
    pub max_length: i64,
    /// -1 means no minimum
    #[serde(default = "unbounded")]
    pub min_length: i64,
    /// Pattern the whole candidate must match, empty means no check
    #[serde(default)]
    pub match_regexp: String,
    /// Return an empty value instead of failing
    #[serde(default)]
    pub ignore_not_found: bool,

    /// Applied to the extracted text, its result replaces ours
    #[serde(default)]
    pub again: Option<Box<ExtractionRule>>
}

impl Default for ExtractionRule {
    fn default() -> Self {
        ExtractionRule {
            after_this: String::default(),
            before_this: String::default(),
            name: String::default(),
            iterate: false,
            max_length: unbounded(),
            min_length: unbounded(),
            match_regexp: String::default(),
            ignore_not_found: false,
            again: None
        }
    }
}

impl ExtractionRule {
    pub fn new(after_this: &str, before_this: &str, name: &str) -> Self {
        ExtractionRule {
            after_this: after_this.to_string(),
            before_this: before_this.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// The configured pattern anchored at both ends.
    pub fn anchored_pattern(&self) -> Option<String> {
        if self.match_regexp.is_empty() {
            return None;
        }

        let pattern = self.match_regexp.as_str();
        let starts_anchored = pattern.starts_with('^');
        // A `$` preceded by an odd run of backslashes is a literal dollar
        let escapes = pattern
            .strip_suffix('$')
            .map(|rest| rest.chars().rev().take_while(|c| *c == '\\').count());
        let ends_anchored = matches!(escapes, Some(n) if n % 2 == 0);
        if starts_anchored && ends_anchored {
            return Some(pattern.to_string());
        }

        let inner = if starts_anchored { &pattern[1..] } else { pattern };
        let inner = if ends_anchored { &inner[..inner.len() - 1] } else { inner };
        Some(format!("^(?:{})$", inner))
    }

    fn compile_pattern(&self) -> Result<Option<Regex>, HttpSimError> {
        let Some(pattern) = self.anchored_pattern() else {
            return Ok(None);
        };

        match Regex::new(&pattern) {
            Ok(re) => Ok(Some(re)),
            Err(err) => Err(HttpSimError::InvalidPattern { pattern, reason: err.to_string() })
        }
    }

    /// Validates the rule (and every chained rule) before it is used.
    pub fn check_up(&self) -> Result<(), HttpSimError> {
        if self.name.is_empty() {
            let err_str = format!("extraction rule between '{}' and '{}' has no name", &self.after_this, &self.before_this);
            return Err(HttpSimError::Config(err_str));
        }

        if self.max_length < -1 || self.min_length < -1 {
            let err_str = format!("extraction rule '{}' has a negative length bound other than -1", &self.name);
            return Err(HttpSimError::Config(err_str));
        }

        if self.max_length != -1 && self.min_length > self.max_length {
            let err_str = format!(
                "extraction rule '{}' can never match: min length {} is above max length {}",
                &self.name,
                self.min_length,
                self.max_length
            );
            return Err(HttpSimError::Config(err_str));
        }

        self.compile_pattern()?;

        if let Some(again) = self.again.as_ref() {
            again.check_up()?;
        }

        Ok(())
    }

    /// Checks max length, min length and pattern, in that order.
    fn violated_constraint(&self, candidate: &str, matcher: Option<&Regex>) -> Option<String> {
        let length = candidate.len() as i64;

        if self.max_length != -1 && length > self.max_length {
            return Some(format!("max length of {} reached: {}", self.max_length, candidate));
        }

        if self.min_length != -1 && length < self.min_length {
            return Some(format!("min length of {} reached: {}", self.min_length, candidate));
        }

        if let Some(re) = matcher {
            if !re.is_match(candidate) {
                return Some(format!("regex '{}' not matched: {}", re.as_str(), candidate));
            }
        }

        None
    }
}

impl Extractor for ExtractionRule {
    fn extract(&self, body: &str, values: &ValueStore) -> Result<(String, String), HttpSimError> {
        let matcher = self.compile_pattern()?;

        for (occurrence, candidate) in Occurrences::new(body, &self.after_this, &self.before_this).enumerate() {
            let Some(reason) = self.violated_constraint(candidate, matcher.as_ref()) else {
                if let Some(again) = self.again.as_ref() {
                    debug!("ExtractionRule - '{}' narrowing occurrence {} with '{}'", &self.name, occurrence, &again.name);
                    return again.extract(candidate, values);
                }

                debug!("ExtractionRule - '{}' extracted from occurrence {}", &self.name, occurrence);
                return Ok((self.name.clone(), candidate.to_string()));
            };

            debug!("ExtractionRule - '{}' occurrence {} rejected: {}", &self.name, occurrence, &reason);

            if self.iterate {
                continue;
            }

            if self.ignore_not_found {
                return Ok((self.name.clone(), String::default()));
            }

            return Err(HttpSimError::ConstraintViolation { name: self.name.clone(), reason });
        }

        if self.ignore_not_found {
            debug!("ExtractionRule - '{}' not found, ignored", &self.name);
            return Ok((self.name.clone(), String::default()));
        }

        Err(HttpSimError::NotFound { name: self.name.clone() })
    }
}
