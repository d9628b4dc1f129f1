//! Code generation, hashing, and timing-safe verification.
//!
//! Codes are uniform random integers in `[0, 10^length)` drawn from the OS
//! RNG and left-padded with zeros. The stored hash binds the code to its
//! challenge id through a salted SHA-256 digest, so a leaked document cannot
//! be replayed against another challenge.

use base64ct::{Base64Unpadded, Encoding};
use constant_time_eq::constant_time_eq;
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

const SALT_BYTES: usize = 16;

/// Generate a zero-padded numeric code of `length` digits.
///
/// `length` must be at most 19 so `10^length` fits in a `u64`; the CLI
/// bounds it far lower.
#[must_use]
pub fn generate(length: u32) -> String {
    let upper = 10u64.pow(length);
    let value = OsRng.gen_range(0..upper);
    format!("{value:0width$}", width = length as usize)
}

/// Salt and digest a code for storage. Returns `(salt, code_hash)`.
#[must_use]
pub fn hash(challenge_id: &str, code: &str) -> (String, String) {
    let mut salt_bytes = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = Base64Unpadded::encode_string(&salt_bytes);
    let code_hash = digest(challenge_id, code, &salt);
    (salt, code_hash)
}

/// Recompute the digest and compare against the stored hash in constant
/// time. A malformed stored hash is a plain non-match, never an error.
#[must_use]
pub fn verify(challenge_id: &str, code: &str, salt: &str, code_hash: &str) -> bool {
    let computed = digest(challenge_id, code, salt);
    constant_time_eq(computed.as_bytes(), code_hash.as_bytes())
}

fn digest(challenge_id: &str, code: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hasher.update(b":");
    hasher.update(salt.as_bytes());
    Base64Unpadded::encode_string(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_have_requested_length() {
        for length in 4..=8 {
            let code = generate(length);
            assert_eq!(code.len(), length as usize);
            assert!(code.chars().all(|c| c.is_ascii_digit()), "code: {code}");
        }
    }

    #[test]
    fn generated_codes_stay_in_range() {
        for _ in 0..50 {
            let code = generate(6);
            let value: u64 = code.parse().expect("numeric code");
            assert!(value < 1_000_000);
        }
    }

    #[test]
    fn generation_is_not_constant() {
        let mut distinct = std::collections::HashSet::new();
        for _ in 0..20 {
            distinct.insert(generate(6));
        }
        assert!(distinct.len() > 1);
    }

    #[test]
    fn hash_round_trips() {
        let (salt, code_hash) = hash("01J0000000000000000000TEST", "042617");
        assert!(verify("01J0000000000000000000TEST", "042617", &salt, &code_hash));
    }

    #[test]
    fn wrong_code_does_not_verify() {
        let (salt, code_hash) = hash("challenge-1", "042617");
        assert!(!verify("challenge-1", "042618", &salt, &code_hash));
    }

    #[test]
    fn digest_is_bound_to_the_challenge_id() {
        let (salt, code_hash) = hash("challenge-1", "042617");
        assert!(!verify("challenge-2", "042617", &salt, &code_hash));
    }

    #[test]
    fn digest_is_bound_to_the_salt() {
        let (_, code_hash) = hash("challenge-1", "042617");
        let (other_salt, _) = hash("challenge-1", "042617");
        assert!(!verify("challenge-1", "042617", &other_salt, &code_hash));
    }

    #[test]
    fn malformed_stored_hash_is_a_non_match() {
        let (salt, _) = hash("challenge-1", "042617");
        assert!(!verify("challenge-1", "042617", &salt, "not-base64!!!"));
        assert!(!verify("challenge-1", "042617", &salt, ""));
    }

    #[test]
    fn salts_are_unique_per_hash() {
        let (salt_a, _) = hash("challenge-1", "042617");
        let (salt_b, _) = hash("challenge-1", "042617");
        assert_ne!(salt_a, salt_b);
    }
}
