use unisync_common::error::{ErrorInfo, ErrorType, UnisyncError};
use unisync_config::ErrorRetention;
use unisync_vdk::ProviderError;

/// Why a stream, or the run set-up, stopped early.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Persistence(#[from] UnisyncError),

    /// `has_next_page` without a cursor that moves forward.
    #[error("provider cursor did not advance past {cursor:?}")]
    StalledCursor { cursor: Option<String> },
}

/// Persistence failures are platform defects. The not-implemented signal
/// never reaches here; callers turn it into an empty stream first.
pub fn classify(err: &StreamError) -> ErrorInfo {
    match err {
        StreamError::Provider(e) => e
            .error_info()
            .unwrap_or_else(|| ErrorInfo::internal(e.to_string())),
        StreamError::Persistence(e) => ErrorInfo::from(e),
        StreamError::StalledCursor { .. } => {
            ErrorInfo::new(ErrorType::RemoteError, err.to_string())
        }
    }
}

pub fn log_classified(customer_id: &str, provider_name: &str, scope: &str, info: &ErrorInfo) {
    match info.error_type {
        ErrorType::InternalError => tracing::error!(
            customer_id,
            provider_name,
            stream = scope,
            error_type = %info.error_type,
            error = %info.error_detail,
            alert = true,
            "stream failed"
        ),
        ErrorType::RemoteError | ErrorType::UserError => tracing::warn!(
            customer_id,
            provider_name,
            stream = scope,
            error_type = %info.error_type,
            error = %info.error_detail,
            "stream failed"
        ),
    }
}

/// Errors captured during one run.
#[derive(Debug)]
pub struct ErrorLog {
    retention: ErrorRetention,
    entries: Vec<(String, ErrorInfo)>,
}

impl ErrorLog {
    pub fn new(retention: ErrorRetention) -> Self {
        Self {
            retention,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, scope: &str, info: ErrorInfo) {
        self.entries.push((scope.to_string(), info));
    }

    /// The run's terminal error: the last user error when there is one, so
    /// the tenant is asked to reconnect whatever else failed beside it.
    /// Otherwise the last recorded error.
    pub fn terminal(&self) -> Option<ErrorInfo> {
        let (_, last) = self.entries.last()?;
        let lead = self
            .entries
            .iter()
            .rev()
            .map(|(_, info)| info)
            .find(|info| info.error_type.is_fatal())
            .unwrap_or(last);
        match self.retention {
            ErrorRetention::Last => Some(lead.clone()),
            ErrorRetention::All => {
                let detail = self
                    .entries
                    .iter()
                    .map(|(scope, info)| format!("{scope}: {}", info.error_detail))
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(ErrorInfo::new(lead.error_type, detail))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_provider_and_persistence_failures() {
        let auth = StreamError::from(ProviderError::Unauthorized("revoked".into()));
        assert_eq!(classify(&auth).error_type, ErrorType::UserError);

        let remote = StreamError::from(ProviderError::Http {
            status: 502,
            body: "bad gateway".into(),
        });
        assert_eq!(classify(&remote).error_type, ErrorType::RemoteError);

        let db = StreamError::from(UnisyncError::Database("connection reset".into()));
        let info = classify(&db);
        assert_eq!(info.error_type, ErrorType::InternalError);
        assert!(info.error_detail.contains("connection reset"));

        let stalled = StreamError::StalledCursor {
            cursor: Some("c1".into()),
        };
        let info = classify(&stalled);
        assert_eq!(info.error_type, ErrorType::RemoteError);
        assert!(info.error_detail.contains("c1"));
    }

    #[test]
    fn last_retention_keeps_only_the_latest() {
        let mut log = ErrorLog::new(ErrorRetention::Last);
        assert!(log.terminal().is_none());
        log.record("contact", ErrorInfo::new(ErrorType::RemoteError, "502"));
        log.record("account", ErrorInfo::internal("decode"));
        assert_eq!(log.terminal(), Some(ErrorInfo::internal("decode")));
    }

    #[test]
    fn all_retention_joins_details_under_the_last_type() {
        let mut log = ErrorLog::new(ErrorRetention::All);
        log.record("contact", ErrorInfo::internal("decode"));
        log.record("account", ErrorInfo::new(ErrorType::RemoteError, "502"));
        let terminal = log.terminal().unwrap();
        assert_eq!(terminal.error_type, ErrorType::RemoteError);
        assert_eq!(terminal.error_detail, "contact: decode\naccount: 502");
    }

    #[test]
    fn user_error_outranks_later_errors() {
        let mut log = ErrorLog::new(ErrorRetention::Last);
        log.record("contact", ErrorInfo::new(ErrorType::UserError, "token revoked"));
        log.record("account", ErrorInfo::new(ErrorType::RemoteError, "503"));
        assert_eq!(
            log.terminal(),
            Some(ErrorInfo::new(ErrorType::UserError, "token revoked"))
        );

        let mut log = ErrorLog::new(ErrorRetention::All);
        log.record("contact", ErrorInfo::new(ErrorType::UserError, "token revoked"));
        log.record("account", ErrorInfo::internal("decode"));
        let terminal = log.terminal().unwrap();
        assert_eq!(terminal.error_type, ErrorType::UserError);
        assert_eq!(terminal.error_detail, "contact: token revoked\naccount: decode");
    }
}
