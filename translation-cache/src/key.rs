use sha2::{Digest, Sha256};

/// Version prefix of the stable cache key format. Bump when the layout of
/// stored entries changes incompatibly.
const KEY_VERSION: &str = "v1";

/// Stable exact-match key: `v1:<backend>:<src>:<tgt>:<sha256(text)[..16]>`.
pub fn exact_key(backend: &str, src: &str, tgt: &str, text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut fingerprint = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        fingerprint.push_str(&format!("{byte:02x}"));
    }
    format!("{KEY_VERSION}:{backend}:{src}:{tgt}:{fingerprint}")
}

/// Prefix covering every exact key written for one backend; used for
/// model-version invalidation.
pub fn backend_prefix(backend: &str) -> String {
    format!("{KEY_VERSION}:{backend}:")
}
