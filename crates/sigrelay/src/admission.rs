use crate::error::RelayError;
use subtle::ConstantTimeEq;

/// Whether registration is gated on the admission token.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    /// Every `register` must carry the configured token.
    Secure,
    /// Tokens are ignored.
    Insecure,
}

/// Registration-time admission check.
#[derive(Debug, Clone)]
pub struct Admission {
    mode: AdmissionMode,
    token: Option<String>,
}

impl Admission {
    /// Build the check for `mode`. In secure mode a `None` token rejects
    /// every registration.
    #[must_use]
    pub fn new(mode: AdmissionMode, token: Option<String>) -> Self {
        Self { mode, token }
    }

    /// Admission that accepts every registration.
    #[must_use]
    pub fn open() -> Self {
        Self::new(AdmissionMode::Insecure, None)
    }

    /// Validate the token presented with a `register`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidToken`] in secure mode when `supplied`
    /// does not exactly equal the configured token, or no token is configured.
    pub fn check(&self, supplied: Option<&str>) -> Result<(), RelayError> {
        if self.mode == AdmissionMode::Insecure {
            return Ok(());
        }
        match (self.token.as_deref(), supplied) {
            (Some(expected), Some(supplied))
                if bool::from(expected.as_bytes().ct_eq(supplied.as_bytes())) =>
            {
                Ok(())
            }
            _ => Err(RelayError::InvalidToken),
        }
    }
}
