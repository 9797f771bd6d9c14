use secrecy::{ExposeSecret, SecretString};

/// Bearer token presented during the handshake (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let cred = Credential::new("T1-secret");
        let debug = format!("{cred:?}");
        assert!(!debug.contains("T1-secret"), "token leaked in debug: {debug}");
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn expose_returns_token() {
        let cred = Credential::from("T1");
        assert_eq!(cred.expose(), "T1");
        assert!(!cred.is_empty());
        assert!(Credential::new("").is_empty());
    }
}
