//! MySQL authentication plugins.
//!
//! - `mysql_native_password`: SHA1 double hash (legacy default)
//! - `caching_sha2_password`: SHA256 scramble with a full-auth fallback
//! - `sha256_password`: password over TLS, or RSA-encrypted
//! - `mysql_clear_password`: plain password, only when explicitly allowed
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! Fast auth (if cached on server):
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))
//! ```
//!
//! Full auth sends the password itself: in clear over TLS or a unix socket,
//! otherwise RSA-encrypted with the server's public key.
//!
//! Nothing in this module logs or formats password-derived bytes.

use mywire_core::Error;
use mywire_core::error::ConnectionErrorKind;
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Response codes for caching_sha2_password protocol.
pub mod caching_sha2 {
    /// Header of an auth-more-data packet
    pub const AUTH_MORE_DATA: u8 = 0x01;
    /// Request for public key (client sends 0x02)
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Fast auth success
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Full auth needed (secure channel or RSA)
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// sha256_password: ask the server for its public key.
pub const SHA256_REQUEST_PUBLIC_KEY: u8 = 0x01;

/// Password and plugin policy for one connection attempt.
#[derive(Clone)]
pub struct AuthPolicy {
    pub password: String,
    pub allow_native_passwords: bool,
    pub allow_cleartext_passwords: bool,
    pub allow_public_key_retrieval: bool,
    pub server_public_key: Option<RsaPublicKey>,
}

impl std::fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPolicy")
            .field("allow_native_passwords", &self.allow_native_passwords)
            .field("allow_cleartext_passwords", &self.allow_cleartext_passwords)
            .field("allow_public_key_retrieval", &self.allow_public_key_retrieval)
            .field("server_public_key", &self.server_public_key.is_some())
            .finish_non_exhaustive()
    }
}

/// Resolve the plugin actually used: unknown plugins fall back to
/// mysql_native_password.
pub fn effective_plugin(name: &str) -> &'static str {
    match name {
        plugins::MYSQL_NATIVE_PASSWORD => plugins::MYSQL_NATIVE_PASSWORD,
        plugins::CACHING_SHA2_PASSWORD => plugins::CACHING_SHA2_PASSWORD,
        plugins::SHA256_PASSWORD => plugins::SHA256_PASSWORD,
        plugins::MYSQL_CLEAR_PASSWORD => plugins::MYSQL_CLEAR_PASSWORD,
        other => {
            tracing::warn!(plugin = other, "unknown auth plugin, using mysql_native_password");
            plugins::MYSQL_NATIVE_PASSWORD
        }
    }
}

/// First auth response for `plugin` (already resolved by [`effective_plugin`]).
///
/// `secure` is true over TLS or a host-local socket.
pub fn initial_response(
    plugin: &str,
    scramble: &[u8],
    policy: &AuthPolicy,
    secure: bool,
) -> Result<Vec<u8>, Error> {
    let password = policy.password.as_str();
    match plugin {
        plugins::CACHING_SHA2_PASSWORD => Ok(caching_sha2_password(password, scramble)),
        plugins::SHA256_PASSWORD => {
            if password.is_empty() {
                Ok(vec![0])
            } else if secure {
                Ok(password_with_nul(password))
            } else if let Some(key) = &policy.server_public_key {
                encrypt_password(password, scramble, key)
            } else if policy.allow_public_key_retrieval {
                Ok(vec![SHA256_REQUEST_PUBLIC_KEY])
            } else {
                Err(public_key_retrieval_disabled())
            }
        }
        plugins::MYSQL_CLEAR_PASSWORD => {
            if !policy.allow_cleartext_passwords {
                return Err(auth_error(
                    "server requested mysql_clear_password, which is not allowed",
                ));
            }
            Ok(password_with_nul(password))
        }
        _ => {
            if !policy.allow_native_passwords {
                return Err(auth_error(
                    "server requested mysql_native_password, which is not allowed",
                ));
            }
            Ok(mysql_native_password(password, scramble))
        }
    }
}

/// mysql_native_password response: 20 bytes, or empty for an empty password.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    let seed = &auth_data[..auth_data.len().min(20)];

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// caching_sha2_password fast-auth response: 32 bytes, or empty for an empty password.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    let seed = trim_scramble(auth_data);

    let password_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let password_hash_hash: [u8; 32] = Sha256::digest(password_hash).into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    password_hash
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// MySQL sends a 20-byte scramble followed by NUL.
fn trim_scramble(auth_data: &[u8]) -> &[u8] {
    if auth_data.len() == 21 && auth_data.last() == Some(&0) {
        &auth_data[..20]
    } else {
        auth_data
    }
}

pub fn password_with_nul(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// Parse a PEM public key in either SPKI or PKCS#1 form.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, Error> {
    RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .map_err(|e| Error::config(format!("invalid RSA public key: {e}")))
}

/// RSA-OAEP(SHA1) encryption of `(password + NUL) XOR scramble`.
pub fn encrypt_password(
    password: &str,
    scramble: &[u8],
    key: &RsaPublicKey,
) -> Result<Vec<u8>, Error> {
    let seed = trim_scramble(scramble);
    if seed.is_empty() {
        return Err(Error::protocol("empty auth scramble"));
    }
    let mut plain = password_with_nul(password);
    for (i, b) in plain.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }
    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &plain)
        .map_err(|e| auth_error(format!("RSA encryption of the password failed: {e}")))
}

pub(crate) fn auth_error(message: impl Into<String>) -> Error {
    Error::connection(ConnectionErrorKind::Authentication, message)
}

pub(crate) fn public_key_retrieval_disabled() -> Error {
    auth_error(
        "full authentication needs the server's RSA public key; \
         configure server_public_key, use TLS, or allow public key retrieval",
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::EncodePublicKey;

    pub(crate) fn policy(password: &str) -> AuthPolicy {
        AuthPolicy {
            password: password.to_string(),
            allow_native_passwords: true,
            allow_cleartext_passwords: false,
            allow_public_key_retrieval: false,
            server_public_key: None,
        }
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_mysql_native_password_empty() {
        assert!(mysql_native_password("", &[0; 20]).is_empty());
    }

    #[test]
    fn test_mysql_native_password_deterministic() {
        let seed = [
            0x3b, 0x55, 0x78, 0x7d, 0x2c, 0x5f, 0x7c, 0x72, 0x49, 0x52, 0x3f, 0x28, 0x47, 0x6f,
            0x77, 0x28, 0x5f, 0x28, 0x46, 0x69,
        ];
        let token = mysql_native_password("secret", &seed);
        assert_eq!(token.len(), 20);
        assert_eq!(mysql_native_password("secret", &seed), token);
        assert_ne!(mysql_native_password("other", &seed), token);
    }

    #[test]
    fn test_caching_sha2_password_trailing_nul() {
        let mut seed = vec![7u8; 20];
        let without = caching_sha2_password("secret", &seed);
        seed.push(0);
        assert_eq!(caching_sha2_password("secret", &seed), without);
        assert_eq!(without.len(), 32);
        assert!(caching_sha2_password("", &seed).is_empty());
    }

    #[test]
    fn test_native_scramble_matches_definition() {
        let seed = [1u8; 20];
        let stage1: [u8; 20] = Sha1::digest(b"pw").into();
        let stage2: [u8; 20] = Sha1::digest(stage1).into();
        let mut concat = seed.to_vec();
        concat.extend_from_slice(&stage2);
        let stage3: [u8; 20] = Sha1::digest(&concat).into();
        let expected: Vec<u8> = stage1.iter().zip(stage3).map(|(a, b)| a ^ b).collect();
        assert_eq!(hex(&mysql_native_password("pw", &seed)), hex(&expected));
    }

    #[test]
    fn test_unknown_plugin_falls_back_to_native() {
        assert_eq!(effective_plugin("auth_gssapi_client"), plugins::MYSQL_NATIVE_PASSWORD);
        assert_eq!(effective_plugin("sha256_password"), plugins::SHA256_PASSWORD);
    }

    #[test]
    fn test_clear_password_requires_opt_in() {
        let mut p = policy("pw");
        let err = initial_response(plugins::MYSQL_CLEAR_PASSWORD, &[], &p, true).unwrap_err();
        assert!(err.is_authentication());
        p.allow_cleartext_passwords = true;
        assert_eq!(
            initial_response(plugins::MYSQL_CLEAR_PASSWORD, &[], &p, true).unwrap(),
            b"pw\0".to_vec()
        );
    }

    #[test]
    fn test_native_can_be_disabled() {
        let mut p = policy("pw");
        p.allow_native_passwords = false;
        assert!(initial_response(plugins::MYSQL_NATIVE_PASSWORD, &[0; 20], &p, false).is_err());
    }

    #[test]
    fn test_sha256_password_paths() {
        let mut p = policy("pw");
        assert_eq!(
            initial_response(plugins::SHA256_PASSWORD, &[1; 20], &p, true).unwrap(),
            b"pw\0".to_vec()
        );
        assert!(initial_response(plugins::SHA256_PASSWORD, &[1; 20], &p, false).is_err());
        p.allow_public_key_retrieval = true;
        assert_eq!(
            initial_response(plugins::SHA256_PASSWORD, &[1; 20], &p, false).unwrap(),
            vec![SHA256_REQUEST_PUBLIC_KEY]
        );
        assert_eq!(
            initial_response(plugins::SHA256_PASSWORD, &[1; 20], &policy(""), false).unwrap(),
            vec![0]
        );
    }

    #[test]
    fn test_rsa_encrypt_round_trip() {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap();
        let key = parse_public_key(&pem).unwrap();

        let scramble = [9u8; 20];
        let cipher = encrypt_password("pw", &scramble, &key).unwrap();
        let plain = private.decrypt(rsa::Oaep::new::<Sha1>(), &cipher).unwrap();
        let recovered: Vec<u8> = plain
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ scramble[i % 20])
            .collect();
        assert_eq!(recovered, b"pw\0");
    }

    #[test]
    fn test_invalid_public_key() {
        assert!(matches!(parse_public_key("garbage"), Err(Error::Config(_))));
    }

    #[test]
    fn test_policy_debug_hides_password() {
        let rendered = format!("{:?}", policy("hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
