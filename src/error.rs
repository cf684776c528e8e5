use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock timeout on {0}")]
    LockTimeout(String),

    #[error("not found")]
    NotFound,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("uid {0} belongs to another identity")]
    UidInUse(u64),

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("invalid file tag")]
    InvalidFileTag,

    #[error("invalid token format")]
    InvalidToken,

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("quota exceeded: using {usage} of {quota} bytes")]
    OverQuota { usage: u64, quota: u64 },

    #[error("mail delivery failed: {0}")]
    Mail(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Storage failures are reported to end users as a generic apology.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Io(_) | Error::Serialization(_) | Error::LockTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_classification() {
        assert!(Error::LockTimeout("accounts".into()).is_storage());
        assert!(Error::Io(std::io::Error::other("disk")).is_storage());
        assert!(!Error::NotFound.is_storage());
        assert!(!Error::Forbidden.is_storage());
    }

    #[test]
    fn test_validation_message_joins_problems() {
        let err = Error::Validation(vec!["name taken".into(), "bad email".into()]);
        assert_eq!(err.to_string(), "validation failed: name taken; bad email");
    }
}
