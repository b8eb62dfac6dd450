//! Ingress authentication
//!
//! One opaque API key minted at process start guards every endpoint except
//! the public health probe. Extension endpoints additionally accept a
//! bearer token issued by the host platform.

use poisson_core::{Error, Result};

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone, Debug)]
pub struct GatewayAuth {
    api_key: String,
    ext_token: Option<String>,
    enabled: bool,
}

impl GatewayAuth {
    /// Mint a fresh key for this process lifetime.
    pub fn mint(ext_token: Option<String>) -> Self {
        Self {
            api_key: uuid::Uuid::new_v4().to_string(),
            ext_token,
            enabled: true,
        }
    }

    /// No-auth mode for local development.
    pub fn disabled() -> Self {
        Self {
            api_key: String::new(),
            ext_token: None,
            enabled: false,
        }
    }

    /// The minted key, for injection into the dashboard.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn verify(&self, provided: Option<&str>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let provided = provided.ok_or_else(|| Error::auth_failed("api key required"))?;
        if !constant_time_eq(self.api_key.as_bytes(), provided.as_bytes()) {
            return Err(Error::auth_failed("invalid api key"));
        }
        Ok(())
    }

    /// Extension endpoints: the API key or the host-issued bearer token.
    pub fn verify_ext(&self, provided: Option<&str>) -> Result<()> {
        if self.verify(provided).is_ok() {
            return Ok(());
        }
        match (&self.ext_token, provided) {
            (Some(expected), Some(given))
                if constant_time_eq(expected.as_bytes(), given.as_bytes()) =>
            {
                Ok(())
            }
            _ => Err(Error::auth_failed("invalid extension token")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_key_verifies() {
        let auth = GatewayAuth::mint(None);
        let key = auth.api_key().to_string();
        assert!(auth.verify(Some(&key)).is_ok());
        assert!(auth.verify(Some("wrong")).is_err());
        assert!(auth.verify(None).is_err());
    }

    #[test]
    fn disabled_accepts_anything() {
        let auth = GatewayAuth::disabled();
        assert!(auth.verify(None).is_ok());
        assert!(auth.verify(Some("whatever")).is_ok());
    }

    #[test]
    fn ext_accepts_either_credential() {
        let auth = GatewayAuth::mint(Some("host-token".into()));
        let key = auth.api_key().to_string();
        assert!(auth.verify_ext(Some(&key)).is_ok());
        assert!(auth.verify_ext(Some("host-token")).is_ok());
        assert!(auth.verify_ext(Some("nope")).is_err());
        // The host token does not open non-extension endpoints.
        assert!(auth.verify(Some("host-token")).is_err());
    }
}
