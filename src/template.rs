//! Placeholder substitution for request materials.
//!
//! Supports the subset of the `{{ .Key }}` action syntax that flows need:
//! field lookups (`{{ .csrf }}`), lookups of keys that are not identifiers
//! (`{{ index . "session id" }}`) and the `{{-` / `-}}` whitespace trim
//! markers. Every referenced key must be present in the value store.

mod parser;

use crate::{utils::HttpSimError, values::ValueStore};

use parser::Segment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, HttpSimError> {
        Ok(Template { segments: parser::parse(source)? })
    }

    /// Keys referenced by the template, in order of appearance.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.segments
            .iter()
            .filter_map(|s| {
                match s {
                    Segment::Field(key) => Some(key.as_str()),
                    Segment::Literal(_) => None
                }
            })
    }

    pub fn render(&self, values: &ValueStore) -> Result<String, HttpSimError> {
        let mut output = String::default();
        for segment in self.segments.iter() {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Field(key) => {
                    let Some(value) = values.get(key) else {
                        let err_str = format!("map has no entry for key \"{}\"", key);
                        return Err(HttpSimError::Template(err_str));
                    };

                    output.push_str(value.as_str().as_ref());
                }
            }
        }

        Ok(output)
    }
}

/// Parses and renders `source` in one go.
pub fn render(source: &str, values: &ValueStore) -> Result<String, HttpSimError> {
    Template::parse(source)?.render(values)
}

/// Number of placeholder openings in `text`, without parsing it.
pub fn count_placeholders(text: &str) -> usize {
    text.matches(parser::OPEN).count()
}
