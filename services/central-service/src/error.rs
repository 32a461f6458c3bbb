use thiserror::Error;

/// The seven semantic inbound-pipeline error classes from the ERROR HANDLING
/// DESIGN, each carrying the CAS NACK `(resultCode, note)` it maps to.
#[derive(Debug, Error)]
pub enum DisasterIngestError {
    #[error("parsing failure: {0}")]
    Parsing(String),
    #[error("validation failure: {0}")]
    Validation(String),
    #[error("profile failure: unknown event code {0:?}")]
    Profile(String),
    #[error("duplicate message: inbound_id={inbound_id} inbound_seq={inbound_seq}")]
    Duplicate { inbound_id: String, inbound_seq: i64 },
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl DisasterIngestError {
    pub fn result_code(&self) -> &'static str {
        match self {
            DisasterIngestError::Parsing(_) => "810",
            DisasterIngestError::Validation(_) => "210",
            DisasterIngestError::Profile(_) => "220",
            DisasterIngestError::Duplicate { .. } => "300",
            DisasterIngestError::Storage(_) => "810",
        }
    }

    pub fn note_code(&self) -> &'static str {
        self.result_code()
    }

    pub fn note_message(&self) -> String {
        self.to_string()
    }

    /// Whether this storage error is worth retrying (connection wobble,
    /// deadlock) as opposed to a terminal schema/constraint violation.
    pub fn is_transient(&self) -> bool {
        match self {
            DisasterIngestError::Storage(e) => is_transient_sqlx_error(e),
            _ => false,
        }
    }
}

pub fn is_transient_sqlx_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_match_the_cas_nack_mapping() {
        assert_eq!(DisasterIngestError::Parsing("x".into()).result_code(), "810");
        assert_eq!(DisasterIngestError::Validation("x".into()).result_code(), "210");
        assert_eq!(DisasterIngestError::Profile("DIS".into()).result_code(), "220");
        assert_eq!(
            DisasterIngestError::Duplicate { inbound_id: "a".into(), inbound_seq: 1 }.result_code(),
            "300"
        );
    }
}
