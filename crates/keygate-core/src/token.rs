//! Activation code and credential material generation.
//!
//! Codes are short, human-transcribable strings in the form
//! `AT-XXXX-XXXX-XXXX` where every `X` is drawn uniformly from `[A-Z0-9]`.
//! The generator makes no uniqueness promise; the persistence layer rejects
//! colliding writes and the issuer treats that rejection as a retryable
//! conflict. With a 36^12 code space a collision is vanishingly unlikely,
//! but it must never silently overwrite an existing token.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Alphabet used for activation codes and generated passwords.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Prefix of every activation code.
pub const CODE_PREFIX: &str = "AT-";

/// Number of segments following the prefix.
const SEGMENT_COUNT: usize = 3;

/// Characters per segment.
const SEGMENT_LEN: usize = 4;

/// Length of a generated account password.
const PASSWORD_LEN: usize = 12;

/// A generated activation code (`AT-XXXX-XXXX-XXXX`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivationCode(String);

impl ActivationCode {
    /// Generates a fresh code from thread-local entropy.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut code = String::with_capacity(CODE_PREFIX.len() + SEGMENT_COUNT * (SEGMENT_LEN + 1));
        code.push_str(CODE_PREFIX);
        for segment in 0..SEGMENT_COUNT {
            if segment > 0 {
                code.push('-');
            }
            for _ in 0..SEGMENT_LEN {
                let idx = rng.gen_range(0..CODE_ALPHABET.len());
                code.push(char::from(CODE_ALPHABET[idx]));
            }
        }
        Self(code)
    }

    /// Returns `true` if `candidate` has the exact shape of a generated code.
    #[must_use]
    pub fn is_well_formed(candidate: &str) -> bool {
        let Some(rest) = candidate.strip_prefix(CODE_PREFIX) else {
            return false;
        };
        let segments: Vec<&str> = rest.split('-').collect();
        segments.len() == SEGMENT_COUNT
            && segments.iter().all(|s| {
                s.len() == SEGMENT_LEN && s.bytes().all(|b| CODE_ALPHABET.contains(&b))
            })
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActivationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates a random per-account password.
///
/// Replaces the static default-password literal of the legacy flow: the
/// password is created per provisioned account and only ever leaves the
/// process through the notification channel.
#[must_use]
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            char::from(CODE_ALPHABET[idx])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_is_well_formed() {
        for _ in 0..64 {
            let code = ActivationCode::generate();
            assert!(
                ActivationCode::is_well_formed(code.as_str()),
                "malformed code: {code}"
            );
            assert_eq!(code.as_str().len(), 17);
        }
    }

    #[test]
    fn codes_use_only_the_declared_alphabet() {
        let code = ActivationCode::generate();
        let body: String = code.as_str().chars().skip(CODE_PREFIX.len()).collect();
        for segment in body.split('-') {
            assert!(segment.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn well_formed_rejects_bad_shapes() {
        assert!(ActivationCode::is_well_formed("AT-AB12-CD34-EF56"));
        assert!(!ActivationCode::is_well_formed("AT-ab12-CD34-EF56"));
        assert!(!ActivationCode::is_well_formed("XX-AB12-CD34-EF56"));
        assert!(!ActivationCode::is_well_formed("AT-AB12-CD34"));
        assert!(!ActivationCode::is_well_formed("AT-AB12-CD34-EF567"));
        assert!(!ActivationCode::is_well_formed(""));
    }

    #[test]
    fn consecutive_codes_differ() {
        // Not a uniqueness guarantee, just a sanity check that the generator
        // is actually sampling entropy.
        let a = ActivationCode::generate();
        let b = ActivationCode::generate();
        let c = ActivationCode::generate();
        assert!(a != b || b != c);
    }

    #[test]
    fn password_length_and_alphabet() {
        let password = generate_password();
        assert_eq!(password.len(), 12);
        assert!(password.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }
}
