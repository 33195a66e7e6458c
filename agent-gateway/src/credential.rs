//! Bearer credential shared with the parent platform and the inbound gate.

use std::sync::{Arc, RwLock};

use crate::error::{GatewayError, GatewayResult};

/// Snapshot of the credential and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    token: Option<String>,
    platform_url: Option<String>,
    container_id: String,
}

impl Credential {
    /// Creates a credential. Empty tokens disable authentication.
    #[must_use]
    pub fn new(
        token: Option<String>,
        platform_url: Option<String>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            token: token.filter(|token| !token.is_empty()),
            platform_url,
            container_id: container_id.into(),
        }
    }

    /// Current bearer token, if authentication is enabled.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Issuing platform.
    #[must_use]
    pub fn platform_url(&self) -> Option<&str> {
        self.platform_url.as_deref()
    }

    /// Container the credential belongs to.
    #[must_use]
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Checks a presented token against this credential.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unauthorized`] when a token is configured and
    /// `presented` is missing or different.
    pub fn verify(&self, presented: Option<&str>) -> GatewayResult<()> {
        let Some(expected) = self.token() else {
            return Ok(());
        };
        match presented {
            Some(presented) if secure_eq(presented, expected) => Ok(()),
            _ => Err(GatewayError::Unauthorized(
                "Unauthorized: Token does not match".to_owned(),
            )),
        }
    }
}

/// Shared, atomically replaced credential.
///
/// # Panics
///
/// Methods panic if the internal lock was poisoned by a panicking writer.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    current: Arc<RwLock<Arc<Credential>>>,
}

impl CredentialStore {
    /// Creates a store holding `credential`.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(credential))),
        }
    }

    /// Current credential.
    #[must_use]
    pub fn current(&self) -> Arc<Credential> {
        Arc::clone(&self.current.read().expect("credential lock poisoned"))
    }

    /// Checks a presented token against the current credential.
    ///
    /// # Errors
    ///
    /// See [`Credential::verify`].
    pub fn verify(&self, presented: Option<&str>) -> GatewayResult<()> {
        self.current().verify(presented)
    }

    /// Replaces the token, keeping platform and container.
    pub(crate) fn replace_token(&self, token: String) {
        let mut current = self.current.write().expect("credential lock poisoned");
        let next = Credential::new(
            Some(token),
            current.platform_url.clone(),
            current.container_id.clone(),
        );
        *current = Arc::new(next);
    }
}

/// Extracts the token from an `Authorization` header value. The `Bearer`
/// scheme matches in any case; values without it are taken as the raw token.
#[must_use]
pub fn bearer_token(header: &str) -> &str {
    let header = header.trim();
    match header.split_once(char::is_whitespace) {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
        _ => header,
    }
}

/// Compares two secrets in time independent of where they first differ.
#[must_use]
pub fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
