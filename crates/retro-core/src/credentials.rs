use std::fmt;

use secrecy::{ExposeSecret, SecretString};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("client id must not be empty")]
    EmptyClientId,
    #[error("client secret must not be empty")]
    EmptySecret,
}

/// Identifies the caller to the room service across reconnects.
///
/// Owned by the caller and handed to the session manager read-only. The
/// secret never appears in `Debug` output or logs.
#[derive(Clone)]
pub struct Credentials {
    client_id: String,
    secret: SecretString,
}

impl Credentials {
    pub fn new(
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let client_id = client_id.into();
        let secret = secret.into();
        if client_id.trim().is_empty() {
            return Err(CredentialsError::EmptyClientId);
        }
        if secret.is_empty() {
            return Err(CredentialsError::EmptySecret);
        }
        Ok(Self {
            client_id,
            secret: SecretString::from(secret),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secret() {
        let creds = Credentials::new("client-1", "hunter2").unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("client-1"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn exposes_secret_on_request() {
        let creds = Credentials::new("client-1", "hunter2").unwrap();
        assert_eq!(creds.client_id(), "client-1");
        assert_eq!(creds.expose_secret(), "hunter2");
    }

    #[test]
    fn rejects_empty_parts() {
        assert_eq!(
            Credentials::new("  ", "x").unwrap_err(),
            CredentialsError::EmptyClientId
        );
        assert_eq!(
            Credentials::new("id", "").unwrap_err(),
            CredentialsError::EmptySecret
        );
    }
}
