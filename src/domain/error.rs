//! Domain error types.

/// Top-level error type for autotrader.
#[derive(Debug, thiserror::Error)]
pub enum TraderError {
    #[error("store error: {reason}")]
    Store { reason: String },

    #[error("store query error: {reason}")]
    StoreQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("strategy descriptor error: {reason}")]
    Descriptor { reason: String },

    #[error("unknown strategy function: {name}")]
    UnknownFunction { name: String },

    #[error("data source {source_name} returned {status}: {message}")]
    Source {
        source_name: String,
        status: u16,
        message: String,
    },

    #[error("transport error against {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("exchange error: {reason}")]
    Exchange { reason: String },

    #[error("no position held in {symbol}")]
    NoPosition { symbol: String },

    #[error("strategy {name} failed: {reason}")]
    Strategy { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Exit codes: 0 success, 1 errors, 2 warnings. Warnings never travel as
/// errors, so every `TraderError` maps to 1.
impl From<&TraderError> for std::process::ExitCode {
    fn from(_err: &TraderError) -> Self {
        std::process::ExitCode::from(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_context() {
        let err = TraderError::Source {
            source_name: "intraquote".into(),
            status: 503,
            message: "throttled".into(),
        };
        assert_eq!(
            err.to_string(),
            "data source intraquote returned 503: throttled"
        );
    }

    #[test]
    fn config_missing_names_section_and_key() {
        let err = TraderError::ConfigMissing {
            section: "platform".into(),
            key: "db_root_path".into(),
        };
        assert!(err.to_string().contains("[platform] db_root_path"));
    }

    #[test]
    fn errors_map_to_exit_code_one() {
        let err = TraderError::Store {
            reason: "locked".into(),
        };
        let code: std::process::ExitCode = (&err).into();
        assert_eq!(
            format!("{code:?}"),
            format!("{:?}", std::process::ExitCode::from(1))
        );
    }
}
