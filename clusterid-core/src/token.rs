//! Random identity tokens.
//!
//! A token is [`TOKEN_LENGTH_BYTES`] bytes from the operating system's
//! CSPRNG, hex-encoded to a 16 character lowercase string.

use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::constants::TOKEN_LENGTH_BYTES;
use crate::error::{ClusterIdResult, IdentityError};

/// Source of new identity tokens.
///
/// The resolver draws from this when it has to provision the record.
pub trait TokenSource: Send + Sync {
    fn new_token(&self) -> ClusterIdResult<String>;
}

/// Token source backed by the operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsTokenSource;

impl TokenSource for OsTokenSource {
    fn new_token(&self) -> ClusterIdResult<String> {
        new_token()
    }
}

/// Generate a new token from the operating system RNG.
pub fn new_token() -> ClusterIdResult<String> {
    new_token_from(&mut OsRng)
}

/// Generate a new token from the given fallible RNG.
///
/// Fails with [`IdentityError::EntropyUnavailable`] if the RNG cannot
/// supply bytes.
pub fn new_token_from<R>(rng: &mut R) -> ClusterIdResult<String>
where
    R: TryRngCore + ?Sized,
{
    let mut bytes = [0u8; TOKEN_LENGTH_BYTES];
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| IdentityError::EntropyUnavailable {
            reason: e.to_string(),
        })?;
    Ok(hex::encode(bytes))
}

/// True if `token` has the shape produced by [`new_token`].
pub fn is_valid_token(token: &str) -> bool {
    token.len() == TOKEN_LENGTH_BYTES * 2
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterIdError;
    use proptest::prelude::*;
    use std::collections::HashSet;

    struct DrainedRng;

    impl TryRngCore for DrainedRng {
        type Error = std::io::Error;

        fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
            Err(std::io::Error::other("entropy pool drained"))
        }

        fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
            Err(std::io::Error::other("entropy pool drained"))
        }

        fn try_fill_bytes(&mut self, _dst: &mut [u8]) -> Result<(), Self::Error> {
            Err(std::io::Error::other("entropy pool drained"))
        }
    }

    #[test]
    fn test_token_shape() {
        let token = new_token().unwrap();
        assert_eq!(token.len(), 16);
        assert!(is_valid_token(&token));
    }

    #[test]
    fn test_tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..256).map(|_| new_token().unwrap()).collect();
        assert_eq!(tokens.len(), 256);
    }

    #[test]
    fn test_drained_rng_is_entropy_unavailable() {
        let err = new_token_from(&mut DrainedRng).unwrap_err();
        match err {
            ClusterIdError::Identity(IdentityError::EntropyUnavailable { reason }) => {
                assert!(reason.contains("drained"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_is_valid_token_rejects_uppercase_and_length() {
        assert!(!is_valid_token("0123456789ABCDEF"));
        assert!(!is_valid_token("0123456789abcde"));
        assert!(!is_valid_token("0123456789abcdefg"));
        assert!(is_valid_token("0123456789abcdef"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Every generated token is 16 lowercase hex characters.
        #[test]
        fn prop_token_always_lowercase_hex(_seed in any::<u8>()) {
            let token = OsTokenSource.new_token().unwrap();
            prop_assert!(is_valid_token(&token), "bad token {}", token);
        }
    }
}
