//! Signing-key provider
//!
//! The engine consumes signing keys through a trait so key rotation and
//! external key stores stay outside the core. Rotation scheduling is the
//! provider's concern, not the engine's.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

/// Supplies the keys used to encode and verify access tokens
pub trait KeyProvider: Send + Sync {
    /// Signing algorithm for newly issued tokens
    fn algorithm(&self) -> Algorithm;

    /// Key used to sign newly issued tokens
    fn encoding_key(&self) -> &EncodingKey;

    /// Key used to verify presented tokens
    fn decoding_key(&self) -> &DecodingKey;

    /// Key id placed in the JWT header, when the provider has one
    fn key_id(&self) -> Option<&str> {
        None
    }
}

/// A fixed symmetric key, derived from configuration at process start
pub struct StaticKeyProvider {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    key_id: Option<String>,
}

impl StaticKeyProvider {
    /// HS256 provider from a shared secret
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            key_id: None,
        }
    }

    /// Attach a key id to the JWT header
    pub fn with_key_id(mut self, kid: impl Into<String>) -> Self {
        self.key_id = Some(kid.into());
        self
    }
}

impl KeyProvider for StaticKeyProvider {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }
}
