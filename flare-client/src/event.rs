use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a reported error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Something went wrong and the invocation failed.
    Error,
    /// Undesirable behavior that did not fail the invocation.
    Warning,
    /// Informational reports.
    Info,
}

/// Why an error was assigned its [`Severity`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SeverityReasonType {
    /// The error escaped the application code.
    UnhandledException,
    /// A failed future was never awaited.
    UnhandledPromiseRejection,
    /// The application reported the error explicitly.
    HandledException,
}

impl SeverityReasonType {
    /// Returns the wire name of this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnhandledException => "unhandledException",
            Self::UnhandledPromiseRejection => "unhandledPromiseRejection",
            Self::HandledException => "handledException",
        }
    }
}

impl fmt::Display for SeverityReasonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper carrying the [`SeverityReasonType`] as `{"type": ...}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct SeverityReason {
    /// The reason.
    #[serde(rename = "type")]
    pub ty: SeverityReasonType,
}

/// Describes whether a reported error was handled by application code.
///
/// Serializes to the descriptor expected by the diagnostics backend:
///
/// ```json
/// {"severity": "error", "unhandled": true, "severityReason": {"type": "unhandledException"}}
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandledState {
    /// The severity of the report.
    pub severity: Severity,
    /// `true` if the error escaped the application code.
    pub unhandled: bool,
    /// Why the severity was assigned.
    pub severity_reason: SeverityReason,
}

impl HandledState {
    /// The state attached to errors escaping a wrapped handler.
    pub fn unhandled_exception() -> Self {
        Self {
            severity: Severity::Error,
            unhandled: true,
            severity_reason: SeverityReason {
                ty: SeverityReasonType::UnhandledException,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_json_snapshot;

    use super::*;

    #[test]
    fn test_unhandled_exception() {
        assert_json_snapshot!(HandledState::unhandled_exception(), @r###"
        {
          "severity": "error",
          "unhandled": true,
          "severityReason": {
            "type": "unhandledException"
          }
        }
        "###);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            SeverityReasonType::UnhandledPromiseRejection.to_string(),
            "unhandledPromiseRejection"
        );
    }
}
