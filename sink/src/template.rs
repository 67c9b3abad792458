//! Field interpolation for path and message templates
//!
//! Two placeholder forms are recognised:
//!
//! - `%{name}` - an event field (`id`, `source`, `type`, `timestamp`,
//!   `payload`) or a metadata key
//! - `%{+FORMAT}` - the event timestamp in UTC, formatted with a strftime
//!   format such as `%Y-%m-%d`
//!
//! Unknown fields are left in the output verbatim so a typo shows up in the
//! file name rather than silently collapsing paths together.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use hdfs_sink::message::Message;
//! use hdfs_sink::template::Template;
//!
//! let template = Template::parse("/logs/%{source}/%{+%Y}.log").unwrap();
//! let msg = Message::with_id("e1", 0, "web-01", "access", Bytes::new());
//! assert_eq!(template.render(&msg), "/logs/web-01/1970.log");
//! ```

use crate::error::{Result, SinkError};
use crate::message::Message;
use chrono::format::{Item, StrftimeItems};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
    Time(String),
}

/// A parsed template, rendered once per event
#[derive(Debug, Clone)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string
    ///
    /// # Errors
    /// Returns `SinkError::Config` if a `%{+...}` placeholder holds an
    /// invalid time format.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw.as_str();

        while let Some(start) = rest.find("%{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                break;
            };

            literal.push_str(&rest[..start]);
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let name = &after[..end];
            match name.strip_prefix('+') {
                Some(format) => {
                    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                        return Err(SinkError::Config(format!(
                            "invalid time format '{format}' in template '{raw}'"
                        )));
                    }
                    segments.push(Segment::Time(format.to_string()));
                }
                None => segments.push(Segment::Field(name.to_string())),
            }

            rest = &after[end + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { raw, segments })
    }

    /// The template as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the template has no placeholders
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Render the template against an event
    pub fn render(&self, msg: &Message) -> String {
        let mut out = String::with_capacity(self.raw.len() + 16);

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => match msg.field(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("%{");
                        out.push_str(name);
                        out.push('}');
                    }
                },
                Segment::Time(format) => {
                    let _ = write!(out, "{}", msg.datetime().format(format));
                }
            }
        }

        out
    }
}
