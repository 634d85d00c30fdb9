use thiserror::Error;

/// skr error types
#[derive(Error, Debug)]
pub enum SkrError {
    /// Unknown reference, digest, tag or repository
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed reference or digest string
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed manifest or config document
    #[error("Manifest decode error: {0}")]
    ManifestDecode(String),

    /// Archive entry that would escape its extraction root
    #[error("Archive safety violation: {0}")]
    ArchiveSafety(String),

    /// Structurally invalid artifact (wrong layer count, missing fields)
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Skill descriptor error
    #[error("Skill error: {0}")]
    Skill(String),

    /// Remote registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SkrError {
    /// Whether this error means "the thing asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, SkrError::NotFound(_))
    }

    /// Prefix the message with `context`, keeping the error kind.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            SkrError::NotFound(m) => SkrError::NotFound(format!("{}: {}", context, m)),
            SkrError::InvalidReference(m) => {
                SkrError::InvalidReference(format!("{}: {}", context, m))
            }
            SkrError::Io(e) => {
                SkrError::Io(std::io::Error::new(e.kind(), format!("{}: {}", context, e)))
            }
            SkrError::ManifestDecode(m) => SkrError::ManifestDecode(format!("{}: {}", context, m)),
            SkrError::ArchiveSafety(m) => SkrError::ArchiveSafety(format!("{}: {}", context, m)),
            SkrError::SchemaViolation(m) => {
                SkrError::SchemaViolation(format!("{}: {}", context, m))
            }
            SkrError::Skill(m) => SkrError::Skill(format!("{}: {}", context, m)),
            SkrError::Registry { registry, message } => SkrError::Registry {
                registry,
                message: format!("{}: {}", context, message),
            },
            SkrError::Config(m) => SkrError::Config(format!("{}: {}", context, m)),
            SkrError::Serialization(m) => SkrError::Serialization(format!("{}: {}", context, m)),
            SkrError::Other(m) => SkrError::Other(format!("{}: {}", context, m)),
        }
    }
}

impl From<serde_json::Error> for SkrError {
    fn from(err: serde_json::Error) -> Self {
        SkrError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for SkrError {
    fn from(err: serde_yaml::Error) -> Self {
        SkrError::Serialization(err.to_string())
    }
}

/// Result type alias for skr operations
pub type Result<T> = std::result::Result<T, SkrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let error = SkrError::NotFound("my-skill:v1".to_string());
        assert_eq!(error.to_string(), "Not found: my-skill:v1");
        assert!(error.is_not_found());
    }

    #[test]
    fn test_invalid_reference_display() {
        let error = SkrError::InvalidReference("empty reference".to_string());
        assert_eq!(error.to_string(), "Invalid reference: empty reference");
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_archive_safety_display() {
        let error = SkrError::ArchiveSafety("../evil".to_string());
        assert_eq!(error.to_string(), "Archive safety violation: ../evil");
    }

    #[test]
    fn test_schema_violation_display() {
        let error = SkrError::SchemaViolation("expected exactly 1 layer, got 2".to_string());
        assert_eq!(
            error.to_string(),
            "Schema violation: expected exactly 1 layer, got 2"
        );
    }

    #[test]
    fn test_registry_error_display() {
        let error = SkrError::Registry {
            registry: "ghcr.io".to_string(),
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: ghcr.io - Authentication failed"
        );
    }

    #[test]
    fn test_context_keeps_kind() {
        let error = SkrError::NotFound("base:v1".to_string()).context("failed to resolve app:v1");
        assert!(error.is_not_found());
        assert_eq!(
            error.to_string(),
            "Not found: failed to resolve app:v1: base:v1"
        );

        let io = SkrError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ))
        .context("writing blob");
        match io {
            SkrError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: SkrError = io_error.into();
        assert!(matches!(error, SkrError::Io(_)));
        assert!(error.to_string().contains("file not found"));
        // An I/O NotFound is not a store-level NotFound
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: SkrError = result.unwrap_err().into();
        assert!(matches!(error, SkrError::Serialization(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: SkrError = result.unwrap_err().into();
        assert!(matches!(error, SkrError::Serialization(_)));
    }
}
