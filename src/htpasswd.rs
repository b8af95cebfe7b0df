//! Credential generation primitives.
//!
//! Random usernames/passwords, deterministic salted resource names, Apache
//! `$apr1$` (MD5-crypt variant) password hashing, and htpasswd line
//! validation. Everything here is pure; persistence lives in the controller.

use md5::{Digest, Md5};
use rand::Rng;
use sha2::Sha256;

use crate::error::{Error, Result};

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const APR1_MAGIC: &str = "$apr1$";

/// Alphabet used by crypt(3)-style base64, not the RFC 4648 one.
const ITOA64: &[u8] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generate a random alphanumeric string of the given length.
pub fn generate_random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Derive a stable, non-guessable resource name from a base name and a salt.
///
/// The same `(base, salt)` pair always yields the same name, so callers get
/// deterministic names by fixing the salt and unguessable ones by generating
/// it.
pub fn generate_random_name(base: &str, salt: &str) -> String {
    let digest = Sha256::digest(format!("{base}-{salt}").as_bytes());
    format!("{base}-{}", hex::encode(&digest[..8]))
}

/// Hash a password with the Apache `$apr1$` scheme.
///
/// Output format is `$apr1$<salt>$<22-char digest>`. The salt must be 1-8
/// characters and must not contain `$`.
pub fn apr1_hash(password: &str, salt: &str) -> Result<String> {
    if salt.is_empty() || salt.len() > 8 || salt.contains('$') {
        return Err(Error::HashError(format!(
            "invalid apr1 salt {salt:?}: must be 1-8 characters without '$'"
        )));
    }
    let pw = password.as_bytes();
    let sb = salt.as_bytes();

    let mut ctx = Md5::new();
    ctx.update(pw);
    ctx.update(APR1_MAGIC.as_bytes());
    ctx.update(sb);

    let mut alt = Md5::new();
    alt.update(pw);
    alt.update(sb);
    alt.update(pw);
    let alt_digest = alt.finalize();

    let mut remaining = pw.len();
    while remaining > 0 {
        let take = remaining.min(16);
        ctx.update(&alt_digest[..take]);
        remaining -= take;
    }

    let mut bits = pw.len();
    while bits > 0 {
        if bits & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&pw[..1]);
        }
        bits >>= 1;
    }

    let mut digest = ctx.finalize();

    // Stretching rounds, exactly as crypt(3) does for md5-crypt.
    for round in 0..1000 {
        let mut c = Md5::new();
        if round & 1 == 1 {
            c.update(pw);
        } else {
            c.update(digest);
        }
        if round % 3 != 0 {
            c.update(sb);
        }
        if round % 7 != 0 {
            c.update(pw);
        }
        if round & 1 == 1 {
            c.update(digest);
        } else {
            c.update(pw);
        }
        digest = c.finalize();
    }

    let mut encoded = String::with_capacity(22);
    for &(a, b, c) in &[(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        let v = (u32::from(digest[a]) << 16) | (u32::from(digest[b]) << 8) | u32::from(digest[c]);
        to64(&mut encoded, v, 4);
    }
    to64(&mut encoded, u32::from(digest[11]), 2);

    Ok(format!("{APR1_MAGIC}{salt}${encoded}"))
}

fn to64(out: &mut String, mut v: u32, chars: usize) {
    for _ in 0..chars {
        out.push(ITOA64[(v & 0x3f) as usize] as char);
        v >>= 6;
    }
}

/// Validate the `user:hash` shape of an htpasswd line: exactly one colon
/// separator with non-empty parts on both sides.
pub fn validate_htpasswd_format(line: &str) -> bool {
    let mut parts = line.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(user), Some(hash), None) => !user.is_empty() && !hash.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apr1_known_vectors() {
        // Reference vectors produced by `openssl passwd -apr1 -salt <salt>`.
        let hash = apr1_hash("myPassword", "r31.....").unwrap();
        assert_eq!(hash, "$apr1$r31.....$HqJZimcKQFAMYayBlzkrA/");

        let hash = apr1_hash("apache", "lZL6V/ci").unwrap();
        assert_eq!(hash, "$apr1$lZL6V/ci$OU1IGgk.X0nG.yXfWLr/5/");
    }

    #[test]
    fn test_apr1_output_shape() {
        let hash = apr1_hash("secret", "abcd1234").unwrap();
        assert!(hash.starts_with("$apr1$abcd1234$"));
        let digest = hash.rsplit('$').next().unwrap();
        assert_eq!(digest.len(), 22);
        assert!(digest.bytes().all(|b| ITOA64.contains(&b)));
    }

    #[test]
    fn test_apr1_rejects_bad_salt() {
        assert!(apr1_hash("secret", "").is_err());
        assert!(apr1_hash("secret", "ninechars").is_err());
        assert!(apr1_hash("secret", "ab$cd").is_err());
    }

    #[test]
    fn test_htpasswd_format_validation() {
        assert!(validate_htpasswd_format("user:$apr1$salt$hash"));
        assert!(validate_htpasswd_format("user:password"));
        assert!(!validate_htpasswd_format("foo"));
        assert!(!validate_htpasswd_format("user:"));
        assert!(!validate_htpasswd_format(":hash"));
        assert!(!validate_htpasswd_format("a:b:c"));
        assert!(!validate_htpasswd_format(""));
    }

    #[test]
    fn test_random_name_is_deterministic() {
        let a = generate_random_name("my-auth", "configmap");
        let b = generate_random_name("my-auth", "configmap");
        assert_eq!(a, b);
        assert!(a.starts_with("my-auth-"));
        // 8 bytes of sha256, hex encoded
        assert_eq!(a.len(), "my-auth-".len() + 16);
    }

    #[test]
    fn test_random_name_varies_with_salt() {
        let a = generate_random_name("my-auth", "configmap");
        let b = generate_random_name("my-auth", "deployment");
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_string_charset_and_length() {
        let s = generate_random_string(20);
        assert_eq!(s.len(), 20);
        assert!(s.bytes().all(|b| CHARSET.contains(&b)));
    }
}
