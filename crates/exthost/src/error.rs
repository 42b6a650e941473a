//! Error type for the fallible seams of the loader.
//!
//! The registry's public surface reports expected failures through its
//! message handler and empty results; these errors appear at the library
//! and scanner boundaries and inside diagnostics.

/// Errors produced while opening libraries or reading their metadata.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("failed to load library: {0}")]
    LoadFailed(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("interface mismatch: descriptor provides {got}, requested {expected}")]
    InterfaceMismatch { expected: String, got: String },
}

/// Result type for extension operations.
pub type Result<T> = std::result::Result<T, ExtensionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failed_display() {
        let err = ExtensionError::LoadFailed("no such file".to_string());
        assert!(err.to_string().contains("failed to load library"));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_interface_mismatch_names_both_sides() {
        let err = ExtensionError::InterfaceMismatch {
            expected: "Calculator".to_string(),
            got: "Greeter".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Calculator"));
        assert!(msg.contains("Greeter"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ExtensionError = io.into();
        assert!(matches!(err, ExtensionError::Io(_)));
    }
}
