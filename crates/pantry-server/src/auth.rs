use std::collections::BTreeMap;

use pantry_core::UserId;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("empty token")]
    EmptyToken,
    #[error("unknown token")]
    UnknownToken,
}

/// Maps handshake tokens to users.
///
/// With an empty table every non-empty token is accepted as `user_<token>`,
/// which is what the mock backend does.
#[derive(Clone, Debug, Default)]
pub struct TokenAuthenticator {
    tokens: BTreeMap<String, UserId>,
}

impl TokenAuthenticator {
    pub fn new(tokens: &BTreeMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|(token, user)| (token.clone(), UserId::from_raw(user.as_str())))
                .collect(),
        }
    }

    /// Accept any non-empty token.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        if self.is_open() {
            return Ok(UserId::from_raw(format!("user_{token}")));
        }
        self.tokens.get(token).cloned().ok_or(AuthError::UnknownToken)
    }
}
