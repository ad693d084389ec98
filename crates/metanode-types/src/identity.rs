//! Node identity keys.
//!
//! Every node owns an Ed25519 signing key; its [`PeerId`] is the multihash
//! of the public half.

use crate::error::ParseError;
use crate::peer::PeerId;
use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;

/// The local node's key pair.
#[derive(Clone)]
pub struct NodeIdentity {
    signing_key: SigningKey,
}

impl NodeIdentity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore an identity from a hex-encoded 32-byte secret key.
    pub fn from_secret_hex(secret: &str) -> Result<Self, ParseError> {
        let bytes = hex::decode(secret.trim())
            .map_err(|e| ParseError::InvalidKey(format!("invalid hex: {e}")))?;
        let bytes: [u8; SECRET_KEY_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            ParseError::InvalidKey(format!(
                "expected {SECRET_KEY_LENGTH} bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    /// Hex encoding of the secret key, suitable for `identity_secret` in config.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key())
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_roundtrip_preserves_peer_id() {
        let identity = NodeIdentity::generate();
        let restored = NodeIdentity::from_secret_hex(&identity.secret_hex()).unwrap();
        assert_eq!(restored.peer_id(), identity.peer_id());
    }

    #[test]
    fn test_distinct_identities() {
        assert_ne!(
            NodeIdentity::generate().peer_id(),
            NodeIdentity::generate().peer_id()
        );
    }

    #[test]
    fn test_bad_secret_rejected() {
        assert!(matches!(
            NodeIdentity::from_secret_hex("zz"),
            Err(ParseError::InvalidKey(_))
        ));
        assert!(matches!(
            NodeIdentity::from_secret_hex("abcd"),
            Err(ParseError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let identity = NodeIdentity::generate();
        let debug = format!("{identity:?}");
        assert!(!debug.contains(&identity.secret_hex()));
    }
}
