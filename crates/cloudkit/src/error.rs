//! Error types for provider operations.
//!
//! Errors are categorized so the transport can retry transient failures and
//! callers can treat "already gone" as success during teardown.

use thiserror::Error;

/// Categories of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connectivity problems and throttling (transient, retryable)
    Network,
    /// A dependent change has not reached the service yet (transient, retryable)
    Propagation,
    /// The addressed resource does not exist
    NotFound,
    /// The resource exists in a state that blocks the call
    Conflict,
    /// Credentials are missing or lack the required permission
    AccessDenied,
    /// Request was rejected as malformed
    InvalidRequest,
    /// The `aws` executable could not be located
    CliNotFound,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Propagation)
    }

    /// Whether a delete that hit this category already reached its goal.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Provider unreachable or throttling",
            Self::Propagation => "Change still propagating",
            Self::NotFound => "Resource not found",
            Self::Conflict => "Resource conflict",
            Self::AccessDenied => "Access denied",
            Self::InvalidRequest => "Invalid request",
            Self::CliNotFound => "AWS CLI not installed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check connectivity to the provider endpoint and try again",
            Self::Propagation => {
                "Re-run in a minute; new roles and function updates take a while to settle"
            }
            Self::NotFound => "No action needed when tearing down",
            Self::Conflict => "Wait for in-flight updates to finish, then re-run",
            Self::AccessDenied => "Check the active profile and its IAM permissions",
            Self::InvalidRequest => "Check the deployment configuration values",
            Self::CliNotFound => "Install the AWS CLI v2 and make sure it is on PATH",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while talking to the provider.
#[derive(Debug, Error)]
pub enum Error {
    /// Connectivity error or throttling
    #[error("network error: {message}")]
    Network {
        /// Detailed message from the failed call
        message: String,
    },

    /// A recent change is not visible to the service yet
    #[error("not settled yet: {message}")]
    Propagation {
        /// Provider message
        message: String,
    },

    /// Addressed resource does not exist
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind (role, function, rule, ...)
        kind: &'static str,
        /// Logical name of the resource
        name: String,
    },

    /// The call conflicts with the current resource state
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// Credentials rejected or missing permission
    #[error("access denied: {message}")]
    AccessDenied {
        /// Provider message
        message: String,
    },

    /// Malformed request
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Provider message
        message: String,
    },

    /// `aws` executable not found
    #[error("AWS CLI not found. Install it from https://aws.amazon.com/cli/")]
    CliNotFound,

    /// Command execution failed without a recognizable cause
    #[error("command failed: {message}")]
    CommandFailed {
        /// What was being attempted
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Network { .. } => ErrorCategory::Network,
            Error::Propagation { .. } => ErrorCategory::Propagation,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::AccessDenied { .. } => ErrorCategory::AccessDenied,
            Error::InvalidRequest { .. } => ErrorCategory::InvalidRequest,
            Error::CliNotFound => ErrorCategory::CliNotFound,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error means the resource is already absent.
    pub fn is_not_found(&self) -> bool {
        self.category().is_ignorable()
    }

    /// Create an error from `aws` command output.
    ///
    /// The CLI prints `An error occurred (Code) when calling the Op operation: msg`;
    /// the code decides the category.
    pub fn from_cli_output(stderr: &str, kind: &'static str, name: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_lowercase();

        if lower.contains("nosuchentity")
            || lower.contains("resourcenotfound")
            || lower.contains("nosuchbucket")
            || lower.contains("nosuchkey")
            || lower.contains("(404)")
            || lower.contains("not found")
        {
            return Error::not_found(kind, name);
        }

        // A role created moments ago is not yet assumable, and a function
        // refuses further calls while an earlier update is applied.
        if lower.contains("cannot be assumed")
            || lower.contains("update is in progress")
            || lower.contains("cannot be performed at this time")
        {
            return Error::Propagation { message };
        }

        if lower.contains("throttl")
            || lower.contains("toomanyrequests")
            || lower.contains("could not connect")
            || lower.contains("connect timeout")
            || lower.contains("read timeout")
            || lower.contains("serviceunavailable")
            || lower.contains("requestlimitexceeded")
        {
            return Error::Network { message };
        }

        if lower.contains("entityalreadyexists")
            || lower.contains("resourceconflict")
            || lower.contains("bucketalreadyownedbyyou")
            || lower.contains("conflict")
        {
            return Error::Conflict { message };
        }

        if lower.contains("accessdenied")
            || lower.contains("unauthorized")
            || lower.contains("expiredtoken")
            || lower.contains("unable to locate credentials")
        {
            return Error::AccessDenied { message };
        }

        if lower.contains("validation")
            || lower.contains("invalidparameter")
            || lower.contains("malformed")
        {
            return Error::InvalidRequest { message };
        }

        Error::CommandFailed {
            message: format!("aws call failed for {kind} {name}"),
            stderr: message,
        }
    }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Propagation.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::Conflict.is_retryable());
    }

    #[test]
    fn test_not_found_is_ignorable() {
        assert!(ErrorCategory::NotFound.is_ignorable());
        assert!(!ErrorCategory::AccessDenied.is_ignorable());
    }

    #[test]
    fn test_from_cli_output_not_found() {
        let err = Error::from_cli_output(
            "An error occurred (NoSuchEntity) when calling the GetRole operation: The role with name job1 cannot be found.",
            "role",
            "job1",
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "role not found: job1");
    }

    #[test]
    fn test_from_cli_output_lambda_not_found() {
        let err = Error::from_cli_output(
            "An error occurred (ResourceNotFoundException) when calling the GetFunction operation: Function not found",
            "function",
            "job1",
        );
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_from_cli_output_throttling() {
        let err = Error::from_cli_output(
            "An error occurred (ThrottlingException) when calling the PutRule operation: Rate exceeded",
            "rule",
            "job1",
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_cli_output_conflict() {
        let err = Error::from_cli_output(
            "An error occurred (ResourceConflictException) when calling the AddPermission operation: The statement id (job1) provided already exists.",
            "permission",
            "job1",
        );
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_from_cli_output_role_not_yet_assumable() {
        let err = Error::from_cli_output(
            "An error occurred (InvalidParameterValueException) when calling the CreateFunction operation: The role defined for the function cannot be assumed by Lambda.",
            "function",
            "job1",
        );
        assert_eq!(err.category(), ErrorCategory::Propagation);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_cli_output_update_in_progress() {
        let err = Error::from_cli_output(
            "An error occurred (ResourceConflictException) when calling the UpdateFunctionCode operation: The operation cannot be performed at this time. An update is in progress for resource: arn:aws:lambda:eu-west-1:123:function:job1",
            "function",
            "job1",
        );
        assert_eq!(err.category(), ErrorCategory::Propagation);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_cli_output_bad_parameter_is_not_retried() {
        let err = Error::from_cli_output(
            "An error occurred (InvalidParameterValueException) when calling the CreateFunction operation: The runtime parameter of python2.7 is no longer supported",
            "function",
            "job1",
        );
        assert_eq!(err.category(), ErrorCategory::InvalidRequest);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_every_category_has_advice() {
        for category in [
            ErrorCategory::Network,
            ErrorCategory::Propagation,
            ErrorCategory::NotFound,
            ErrorCategory::Conflict,
            ErrorCategory::AccessDenied,
            ErrorCategory::InvalidRequest,
            ErrorCategory::CliNotFound,
            ErrorCategory::Other,
        ] {
            assert!(!category.description().is_empty());
            assert!(!category.advice().is_empty());
        }
    }

    #[test]
    fn test_from_cli_output_access_denied() {
        let err = Error::from_cli_output(
            "An error occurred (AccessDenied) when calling the CreateRole operation",
            "role",
            "job1",
        );
        assert_eq!(err.category(), ErrorCategory::AccessDenied);
    }

    #[test]
    fn test_from_cli_output_unknown() {
        let err = Error::from_cli_output("segmentation fault", "role", "job1");
        assert_eq!(err.category(), ErrorCategory::Other);
    }
}
