// src/rabbitmq/diagnostics.rs
use std::borrow::Cow;

/// Message body prepared for a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedBody<'a> {
    pub text: Cow<'a, str>,
    pub structured: bool,
}

/// Pretty-print `raw` as indented JSON, or hand it back untouched.
///
/// Only used for logging. Input that does not parse is an expected case and
/// comes back as-is with `structured == false`.
pub fn format_message_as_json_or_text(raw: &str) -> FormattedBody<'_> {
    match serde_json::from_str::<serde_json::Value>(raw)
        .and_then(|value| serde_json::to_string_pretty(&value))
    {
        Ok(pretty) => FormattedBody {
            text: Cow::Owned(pretty),
            structured: true,
        },
        Err(_) => FormattedBody {
            text: Cow::Borrowed(raw),
            structured: false,
        },
    }
}
