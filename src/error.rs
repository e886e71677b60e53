//! Error taxonomy for source calls and aggregator construction

use std::time::Duration;
use thiserror::Error;

use crate::types::DataKind;

/// Why a single source could not deliver a single data kind.
///
/// These never escape `get_full_context`; they are turned into breaker
/// reports and warning strings at the per-source call site.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("{source_name} unavailable (availability check failed)")]
    SourceUnavailable { source_name: String },

    #[error("{source_name} rate limited: would wait {wait:?}, budget {budget:?}")]
    RateLimited {
        source_name: String,
        wait: Duration,
        budget: Duration,
    },

    #[error("{source_name} circuit open")]
    CircuitOpen { source_name: String },

    #[error("{source_name} timed out after {after:?}")]
    Timeout { source_name: String, after: Duration },

    #[error("{source_name} returned malformed data: {reason}")]
    MalformedResponse { source_name: String, reason: String },

    #[error("{source_name} transport error: {message}")]
    Transport { source_name: String, message: String },
}

impl SourceError {
    pub fn source_name(&self) -> &str {
        match self {
            SourceError::SourceUnavailable { source_name }
            | SourceError::RateLimited { source_name, .. }
            | SourceError::CircuitOpen { source_name }
            | SourceError::Timeout { source_name, .. }
            | SourceError::MalformedResponse { source_name, .. }
            | SourceError::Transport { source_name, .. } => source_name,
        }
    }

    /// Whether the circuit breaker must be told about this error.
    ///
    /// Admission rejections never reached the source, so they say nothing
    /// about its health.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            SourceError::CircuitOpen { .. } | SourceError::RateLimited { .. }
        )
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            SourceError::SourceUnavailable { .. } => "source_unavailable",
            SourceError::RateLimited { .. } => "rate_limited",
            SourceError::CircuitOpen { .. } => "circuit_open",
            SourceError::Timeout { .. } => "timeout",
            SourceError::MalformedResponse { .. } => "malformed_response",
            SourceError::Transport { .. } => "transport",
        }
    }

    pub fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        SourceError::MalformedResponse {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::Transport {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Warning line attached to the context for a failed fetch
    pub fn to_warning(&self, kind: DataKind) -> String {
        format!("{} {} unavailable: {}", self.source_name(), kind, self)
    }
}

/// Configuration or wiring errors, raised at construction time only
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregatorError {
    #[error("no market data sources configured")]
    NoSources,

    #[error("duplicate source name: {0}")]
    DuplicateSource(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_rejections_do_not_count_as_failures() {
        let open = SourceError::CircuitOpen {
            source_name: "okx".into(),
        };
        let limited = SourceError::RateLimited {
            source_name: "okx".into(),
            wait: Duration::from_secs(3),
            budget: Duration::from_secs(1),
        };
        assert!(!open.counts_as_failure());
        assert!(!limited.counts_as_failure());

        let timeout = SourceError::Timeout {
            source_name: "okx".into(),
            after: Duration::from_secs(5),
        };
        assert!(timeout.counts_as_failure());
        assert!(SourceError::malformed("okx", "ask below bid").counts_as_failure());
    }

    #[test]
    fn test_warning_names_source_and_kind() {
        let err = SourceError::transport("Bybit", "connection reset");
        let warning = err.to_warning(DataKind::OrderBook);
        assert!(warning.starts_with("Bybit order_book unavailable"));
        assert!(warning.contains("connection reset"));
        assert_eq!(err.error_type(), "transport");
    }
}
