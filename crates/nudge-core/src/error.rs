//! Error types for nudge operations.
//!
//! Errors carry a structured [`ErrorCode`] for programmatic handling. Routine
//! absence (no job yet, unknown reminder on a fire callback) is reported as
//! `Option`/`bool` by the callers, not through this type.

use thiserror::Error;

/// Result type alias for nudge operations.
pub type NudgeResult<T> = Result<T, NudgeError>;

/// Main error type for all nudge operations.
#[derive(Error, Debug)]
pub enum NudgeError {
    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        suggestion: Option<String>,
    },

    /// Reminder or job not found.
    #[error("Not found: {message}")]
    NotFound {
        message: String,
        code: ErrorCode,
        id: Option<String>,
    },

    /// A job with the same name already exists.
    #[error("Already exists: {message}")]
    AlreadyExists {
        message: String,
        code: ErrorCode,
        name: Option<String>,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The job scheduling service failed.
    #[error("Scheduler error: {message}")]
    Scheduler {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Parse error.
    #[error("Parse error: {message}")]
    Parse { message: String, code: ErrorCode },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,
    ValMissingField,
    ValInvalidFormat,
    ValImmutableField,

    // Reminders (REM_xxx)
    RemNotFound,

    // Jobs (JOB_xxx)
    JobNotFound,
    JobDuplicate,
    JobOperationFailed,

    // Database (DB_xxx)
    DbConnectionFailed,
    DbOperationFailed,

    // Parse (PARSE_xxx)
    ParseInvalidJson,
    ParseInvalidTime,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValMissingField => "VAL_002",
            ErrorCode::ValInvalidFormat => "VAL_003",
            ErrorCode::ValImmutableField => "VAL_004",
            ErrorCode::RemNotFound => "REM_001",
            ErrorCode::JobNotFound => "JOB_001",
            ErrorCode::JobDuplicate => "JOB_002",
            ErrorCode::JobOperationFailed => "JOB_003",
            ErrorCode::DbConnectionFailed => "DB_001",
            ErrorCode::DbOperationFailed => "DB_002",
            ErrorCode::ParseInvalidJson => "PARSE_001",
            ErrorCode::ParseInvalidTime => "PARSE_002",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl NudgeError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            suggestion: None,
        }
    }

    /// Create a validation error with suggestion.
    pub fn validation_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a validation error for a required field that is absent.
    pub fn missing_field(field: &str) -> Self {
        Self::Validation {
            message: format!("Missing required field '{}'", field),
            code: ErrorCode::ValMissingField,
            suggestion: None,
        }
    }

    /// Create a validation error for an attempt to change an immutable field.
    pub fn immutable(field: &str) -> Self {
        Self::Validation {
            message: format!("Field '{}' cannot be changed after creation", field),
            code: ErrorCode::ValImmutableField,
            suggestion: None,
        }
    }

    /// Create an invalid time-of-day error.
    pub fn invalid_time(value: &str) -> Self {
        Self::Validation {
            message: format!("Invalid time '{}'", value),
            code: ErrorCode::ValInvalidFormat,
            suggestion: Some("Use 24-hour HH:MM, e.g. 22:00".to_string()),
        }
    }

    /// Create a reminder not found error.
    pub fn reminder_not_found(reminder_id: impl Into<String>) -> Self {
        let id = reminder_id.into();
        Self::NotFound {
            message: format!("Reminder with id '{}' not found", id),
            code: ErrorCode::RemNotFound,
            id: Some(id),
        }
    }

    /// Create a job not found error.
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        let id = job_id.into();
        Self::NotFound {
            message: format!("Job with id '{}' not found", id),
            code: ErrorCode::JobNotFound,
            id: Some(id),
        }
    }

    /// Create a duplicate job error.
    pub fn job_exists(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::AlreadyExists {
            message: format!("Job named '{}' already exists", name),
            code: ErrorCode::JobDuplicate,
            name: Some(name),
        }
    }

    /// Create a job-service error.
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
            code: ErrorCode::JobOperationFailed,
            source: None,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            code: ErrorCode::ParseInvalidJson,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is a duplicate-name error.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } => *code,
            Self::NotFound { code, .. } => *code,
            Self::AlreadyExists { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::Scheduler { code, .. } => *code,
            Self::Parse { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Get a suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Validation { suggestion, .. } => suggestion.as_deref(),
            Self::NotFound { .. } => Some("Please check the id and ensure it exists"),
            Self::Scheduler { .. } => Some("Please check the job scheduling service"),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for NudgeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = NudgeError::validation("Invalid input");
        assert_eq!(err.code(), ErrorCode::ValInvalidInput);
        assert!(err.to_string().contains("Invalid input"));
    }

    #[test]
    fn test_not_found_errors() {
        let err = NudgeError::reminder_not_found("rem-1");
        assert_eq!(err.code(), ErrorCode::RemNotFound);
        assert!(err.is_not_found());
        assert!(err.suggestion().is_some());

        let err = NudgeError::job_not_found("job-1");
        assert_eq!(err.code(), ErrorCode::JobNotFound);
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
    }

    #[test]
    fn test_invalid_time_has_suggestion() {
        let err = NudgeError::invalid_time("25:00");
        assert_eq!(err.code(), ErrorCode::ValInvalidFormat);
        assert!(err.suggestion().unwrap().contains("HH:MM"));
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::ValInvalidInput.as_str(), "VAL_001");
        assert_eq!(ErrorCode::JobDuplicate.as_str(), "JOB_002");
    }
}
