//! Verification of gateway payment callbacks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const FAILURE_TAG: &str = "failed";

#[derive(Clone)]
pub struct SignatureVerifier { secret: String }

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self { Self { secret: secret.into() } }

    fn mac(&self, gateway_order_id: &str, payment_id: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(gateway_order_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        Some(mac)
    }

    /// Hex signature the gateway sends for `(gateway_order_id, payment_id)`.
    pub fn sign(&self, gateway_order_id: &str, payment_id: &str) -> Option<String> {
        self.mac(gateway_order_id, payment_id).map(|mac| hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else { return false };
        self.mac(gateway_order_id, payment_id).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
    }

    /// Signature a server-to-server failure callback carries for `order_id`.
    pub fn sign_failure(&self, order_id: &str) -> Option<String> {
        self.sign(order_id, FAILURE_TAG)
    }

    pub fn verify_failure(&self, order_id: &str, signature: &str) -> bool {
        self.verify(order_id, FAILURE_TAG, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let v = SignatureVerifier::new("whsec_test");
        let sig = v.sign("order_N1", "pay_P1").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(v.verify("order_N1", "pay_P1", &sig));
        assert!(!v.verify("order_N1", "pay_P2", &sig));
        assert!(!v.verify("order_N1", "pay_P1", "not-hex"));
        assert!(!SignatureVerifier::new("other").verify("order_N1", "pay_P1", &sig));
    }

    #[test]
    fn test_failure_signature_is_bound_to_order() {
        let v = SignatureVerifier::new("whsec_test");
        let sig = v.sign_failure("0191b4c2-order").unwrap();
        assert!(v.verify_failure("0191b4c2-order", &sig));
        assert!(!v.verify_failure("0191b4c2-other", &sig));
        // A confirmation signature cannot be replayed as a failure
        let confirm = v.sign("0191b4c2-order", "pay_P1").unwrap();
        assert!(!v.verify_failure("0191b4c2-order", &confirm));
    }
}
