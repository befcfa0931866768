//! Hiven Access Tokens
//!
//! User and bot accounts authenticate with a single opaque token. The
//! token is validated locally against the configured token lengths before
//! any network call is made.

use thiserror::Error;

/// Errors raised while validating an access token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// The token is empty.
    #[error("invalid credential: token is empty")]
    Empty,

    /// The token length is not one of the accepted lengths.
    #[error("invalid credential: token length {len} is not one of {expected:?}")]
    InvalidLength {
        /// Observed token length.
        len: usize,
        /// Accepted token lengths.
        expected: Vec<usize>,
    },
}

/// A validated access token.
///
/// The `Debug` implementation redacts the token so it can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Validate `raw` against the accepted token lengths.
    ///
    /// Surrounding whitespace is trimmed first.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Empty`] for an empty token and
    /// [`CredentialError::InvalidLength`] when its length is not in
    /// `accepted_lengths`.
    pub fn parse(raw: &str, accepted_lengths: &[usize]) -> Result<Self, CredentialError> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(CredentialError::Empty);
        }

        let len = token.chars().count();
        if !accepted_lengths.contains(&len) {
            return Err(CredentialError::InvalidLength {
                len,
                expected: accepted_lengths.to_vec(),
            });
        }

        Ok(Self(token.to_owned()))
    }

    /// Token value, as sent in the `Authorization` header and the `AUTH`
    /// frame.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Token").field(&"[REDACTED]").finish()
    }
}
