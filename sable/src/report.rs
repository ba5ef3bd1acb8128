#![forbid(unsafe_code)]

use sable_core::{CompileError, Fragment};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SpanRange {
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub schema: &'static str,
    pub kind: String,
    pub message: String,
    pub fragments: Vec<Fragment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<SpanRange>,
}

impl ErrorReport {
    pub fn from_error(err: &CompileError) -> Self {
        ErrorReport {
            schema: "sable.error.v1",
            kind: err.kind().to_string(),
            message: err.message(),
            fragments: err.fragments(),
            span: err.span().map(|s| SpanRange {
                offset: s.offset(),
                len: s.len(),
            }),
        }
    }
}

pub fn render_json(err: &CompileError) -> String {
    let report = ErrorReport::from_error(err);
    serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
}

pub fn render_plain(err: &CompileError) -> String {
    match err.span() {
        Some(span) => format!(
            "error[{}]: {} (at byte offset {}, len {})",
            err.kind(),
            err.message(),
            span.offset(),
            span.len()
        ),
        None => format!("error[{}]: {}", err.kind(), err.message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_core::{ErrorText, TypeError};

    #[test]
    fn json_report_carries_kind_fragments_and_span() {
        let err: CompileError = TypeError {
            message: ErrorText::new().text("unknown type ").code("Mystery"),
            span: Some(sable_core::span(12, 7)),
        }
        .into();
        let json = render_json(&err);
        assert!(json.contains("\"schema\": \"sable.error.v1\""));
        assert!(json.contains("\"kind\": \"TypeError\""));
        assert!(json.contains("Mystery"));
        assert!(json.contains("\"offset\": 12"));
    }
}
