//! Error types for the Tenant operator

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur during operator operations
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error (store unreachable, conflict on write, ...)
    #[error("Kubernetes API error: {0}")]
    KubeApi(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Object does not exist in the host store
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Object was created concurrently by another actor
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// An artifact a later phase depends on is absent or unreadable
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// Key material could not be generated
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate could not be built, signed or decoded
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Invalid resource state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Several independent failures from one reconcile pass
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<OperatorError>),
}

fn join_messages(errors: &[OperatorError]) -> String {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("[{}]", messages.join(", "))
}

impl OperatorError {
    /// Collapse a list of errors: none for an empty list, the error itself for
    /// a single entry, an `Aggregate` otherwise.
    pub fn aggregate(errors: Vec<OperatorError>) -> Option<OperatorError> {
        let mut errors = errors;
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(OperatorError::Aggregate(errors)),
        }
    }

    /// Infrastructure faults that leave conditions untouched and are retried
    /// with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            OperatorError::KubeApi(_) | OperatorError::KeyGeneration(_) => true,
            OperatorError::Aggregate(errors) => errors.iter().all(|e| e.is_transient()),
            _ => false,
        }
    }

    /// Failures caused by unusable inputs rather than the environment.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            OperatorError::Certificate(_)
                | OperatorError::MissingDependency(_)
                | OperatorError::InvalidState(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, OperatorError::AlreadyExists(_))
    }
}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) if response.code == 404 => {
                OperatorError::NotFound(response.message.clone())
            }
            kube::Error::Api(response)
                if response.code == 409 && response.reason == "AlreadyExists" =>
            {
                OperatorError::AlreadyExists(response.message.clone())
            }
            _ => OperatorError::KubeApi(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::KubeApi("test error".to_string());
        assert!(err.to_string().contains("Kubernetes API error"));
    }

    #[test]
    fn test_aggregate_empty_and_single() {
        assert!(OperatorError::aggregate(vec![]).is_none());

        let single = OperatorError::aggregate(vec![OperatorError::NotFound("x".into())]);
        assert!(matches!(single, Some(OperatorError::NotFound(_))));
    }

    #[test]
    fn test_aggregate_keeps_every_message() {
        let err = OperatorError::aggregate(vec![
            OperatorError::Certificate("bad pem".into()),
            OperatorError::KubeApi("patch failed".into()),
        ])
        .unwrap();

        let message = err.to_string();
        assert!(message.contains("bad pem"));
        assert!(message.contains("patch failed"));
    }

    #[test]
    fn test_classification() {
        assert!(OperatorError::KubeApi("down".into()).is_transient());
        assert!(OperatorError::KeyGeneration("entropy".into()).is_transient());
        assert!(!OperatorError::Certificate("cn".into()).is_transient());
        assert!(OperatorError::Certificate("cn".into()).is_contract_violation());
        assert!(OperatorError::MissingDependency("server-cert".into()).is_contract_violation());
        assert!(OperatorError::AlreadyExists("x".into()).is_already_exists());
    }

    #[test]
    fn test_kube_error_mapping() {
        let not_found = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "secrets \"server-cert\" not found".into(),
            reason: "NotFound".into(),
            code: 404,
        });
        assert!(OperatorError::from(not_found).is_not_found());

        let exists = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "secrets \"server-cert\" already exists".into(),
            reason: "AlreadyExists".into(),
            code: 409,
        });
        assert!(OperatorError::from(exists).is_already_exists());

        let conflict = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "the object has been modified".into(),
            reason: "Conflict".into(),
            code: 409,
        });
        assert!(OperatorError::from(conflict).is_transient());
    }
}
