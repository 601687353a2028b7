//! HMAC-SHA256 envelope signing.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation prefix for per-probe key derivation.
const PROBE_KEY_DOMAIN: &str = "legator-probe-signing|";

/// Signs and verifies command envelopes with a shared HMAC-SHA256 key.
///
/// The signed content is `request_id | canonical_payload` where the payload
/// bytes are the canonical JSON serialization as emitted by the producer.
/// The verifier must re-serialize the payload identically before calling
/// [`EnvelopeSigner::verify`].
#[derive(Clone)]
pub struct EnvelopeSigner {
    key: Vec<u8>,
}

impl EnvelopeSigner {
    /// Create a signer from a shared key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EmptyKey`] when `key` is empty.
    pub fn new(key: impl Into<Vec<u8>>) -> CryptoResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        Ok(Self { key })
    }

    /// Sign `request_id | payload` and return the hex-encoded MAC.
    #[must_use]
    pub fn sign(&self, request_id: &str, payload: &[u8]) -> String {
        hex::encode(self.mac(request_id, payload))
    }

    /// Verify a hex-encoded signature over `request_id | payload`.
    ///
    /// Comparison is constant-time over the decoded MAC bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHex`] when `signature` is not hex and
    /// [`CryptoError::SignatureMismatch`] when the MAC does not match.
    pub fn verify(&self, request_id: &str, payload: &[u8], signature: &str) -> CryptoResult<()> {
        let provided = hex::decode(signature).map_err(|_| CryptoError::InvalidHex)?;
        let expected = self.mac(request_id, payload);
        if expected.ct_eq(provided.as_slice()).into() {
            Ok(())
        } else {
            Err(CryptoError::SignatureMismatch)
        }
    }

    fn mac(&self, request_id: &str, payload: &[u8]) -> Vec<u8> {
        // Key length was validated at construction.
        #[allow(clippy::expect_used)]
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any non-empty key length");
        mac.update(request_id.as_bytes());
        mac.update(b"|");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for EnvelopeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeSigner").finish_non_exhaustive()
    }
}

/// Derive a probe's signing key from the control plane's master secret.
///
/// `probe_key = HMAC-SHA256(master, "legator-probe-signing|" || probe_id)`.
/// Each probe gets an independent key; leaking one probe's key does not
/// expose the master or any sibling probe's key.
#[must_use]
pub fn derive_probe_key(master: &[u8], probe_id: &str) -> Vec<u8> {
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(master).expect("HMAC accepts any key length");
    mac.update(PROBE_KEY_DOMAIN.as_bytes());
    mac.update(probe_id.as_bytes());
    mac.finalize().into_bytes().to_vec()
}
