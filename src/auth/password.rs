//! Password hashing: PBKDF2-HMAC-SHA256 with a random per-password salt.
//!
//! Stored format: `pbkdf2-sha256$<iterations>$<salt b64>$<hash b64>`.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tokio::task::JoinError;

type HmacSha256 = Hmac<Sha256>;

const SCHEME: &str = "pbkdf2-sha256";
const DEFAULT_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;

/// Hash a password for storage.
pub fn hash_password(password: &str) -> String {
    hash_with_iterations(password, DEFAULT_ITERATIONS)
}

fn hash_with_iterations(password: &str, iterations: u32) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let derived = pbkdf2(password.as_bytes(), &salt, iterations);
    format!(
        "{SCHEME}${iterations}${}${}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(derived)
    )
}

/// Compared against when no account matches, so a miss costs as much as a hit.
static DECOY_HASH: LazyLock<String> = LazyLock::new(|| hash_password("letter-desk-decoy"));

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_async(password: String) -> Result<String, JoinError> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await
}

/// [`verify_password`] on the blocking pool.
///
/// With no stored hash the decoy is checked and the result is always `false`.
pub async fn verify_password_async(
    password: String,
    stored: Option<String>,
) -> Result<bool, JoinError> {
    tokio::task::spawn_blocking(move || match stored {
        Some(stored) => verify_password(&password, &stored),
        None => {
            let _ = verify_password(&password, &DECOY_HASH);
            false
        }
    })
    .await
}

/// Check a password against a stored hash. Unparseable hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(expected))
    else {
        return false;
    };

    let derived = pbkdf2(password.as_bytes(), &salt, iterations);
    constant_time_eq(&derived, &expected)
}

/// Single-block PBKDF2 (32-byte output).
fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let prf = HmacSha256::new_from_slice(password)
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));

    let mut mac = prf.clone();
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut u: [u8; 32] = mac.finalize().into_bytes().into();
    let mut out = u;

    for _ in 1..iterations.max(1) {
        let mut mac = prf.clone();
        mac.update(&u);
        u = mac.finalize().into_bytes().into();
        for (o, b) in out.iter_mut().zip(u.iter()) {
            *o ^= b;
        }
    }
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let h = hash_with_iterations("admin123", 10);
        assert!(verify_password("admin123", &h));
        assert!(!verify_password("admin124", &h));
    }

    #[test]
    fn salts_differ() {
        let a = hash_with_iterations("same", 10);
        let b = hash_with_iterations("same", 10);
        assert_ne!(a, b);
    }

    #[test]
    fn junk_hash_never_matches() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "bcrypt$10$abc$def"));
        assert!(!verify_password("x", "pbkdf2-sha256$nope$abc$def"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn hashing_leaves_the_runtime_free() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        });

        let stored = hash_password_async("admin123".into()).await.unwrap();
        ticker.abort();

        assert!(ticks.load(Ordering::Relaxed) > 0);
        assert!(
            verify_password_async("admin123".into(), Some(stored.clone()))
                .await
                .unwrap()
        );
        assert!(
            !verify_password_async("wrong".into(), Some(stored))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn missing_account_still_pays_for_a_verify() {
        assert!(DECOY_HASH.starts_with("pbkdf2-sha256$100000$"));
        assert!(!verify_password_async("letter-desk-decoy".into(), None).await.unwrap());
        assert!(!verify_password_async("anything".into(), None).await.unwrap());
    }

    #[test]
    fn pbkdf2_matches_rfc7914_vector() {
        // RFC 7914 §11: PBKDF2-HMAC-SHA256("passwd", "salt", 1), first 32 bytes.
        let out = pbkdf2(b"passwd", b"salt", 1);
        assert_eq!(
            out[..8],
            [0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f]
        );
    }
}
