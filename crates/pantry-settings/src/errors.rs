use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The merged document does not deserialize into [`PantrySettings`](crate::PantrySettings).
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("{field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/pantry.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = err.to_string();
        assert!(text.contains("/etc/pantry.json"));
        assert!(text.contains("denied"));
    }

    #[test]
    fn invalid_names_the_field() {
        let err = SettingsError::invalid("transport.url", "must not be empty");
        assert_eq!(err.to_string(), "transport.url: must not be empty");
    }

    #[test]
    fn shape_error_converts_from_serde() {
        let json_err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err: SettingsError = json_err.into();
        assert!(matches!(err, SettingsError::Shape(_)));
        assert!(std::error::Error::source(&SettingsError::Read {
            path: PathBuf::new(),
            source: std::io::Error::other("x"),
        })
        .is_some());
    }
}
