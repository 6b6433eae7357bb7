//! Authentication plug-ins (spec §4.3, component C3).
//!
//! Each plug-in computes the bytes to send as the initial auth response (or,
//! for the auth-switch/full-auth continuations, the bytes to send next).
//! `mysql_native_password`/`caching_sha2_password` scrambles are adapted from
//! the teacher's `protocol/connection/handshake.rs`; `sha256_password`,
//! `mysql_old_password`, `mysql_clear_password`, `client_ed25519` and
//! `dialog` are new, grounded on the same RFC the teacher's two plug-ins
//! follow (MySQL's `sql/auth/sha2_password.cc` / `password.c` scramble
//! formulas) and on `sqlx-mysql`'s use of the `rsa` crate for the
//! RSA-OAEP full-auth path.

use rand::RngCore;
use rsa::Oaep;
use rsa::pkcs8::DecodePublicKey;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::error::{Error, Result};

/// `mysql_native_password`: `SHA1(password) XOR SHA1(challenge ++ SHA1(SHA1(password)))`.
pub fn native_password_scramble(password: &str, challenge: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(challenge);
    hasher.update(stage2);
    let token_hash = hasher.finalize();

    stage1.iter().zip(token_hash.iter()).map(|(a, b)| a ^ b).collect()
}

/// `caching_sha2_password` fast-auth scramble:
/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) ++ challenge)`.
/// `sha256_password` uses the identical formula over a fresh challenge.
pub fn sha2_password_scramble(password: &str, challenge: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);
    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(challenge);
    let scramble = hasher.finalize();

    stage1.iter().zip(scramble.iter()).map(|(a, b)| a ^ b).collect()
}

/// Result of the byte sent after the initial `caching_sha2_password`/
/// `sha256_password` scramble (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastAuthResult {
    Success,
    FullAuthRequired,
}

pub fn read_fast_auth_result(payload: &[u8]) -> Result<FastAuthResult> {
    match payload.first() {
        Some(0x03) => Ok(FastAuthResult::Success),
        Some(0x04) => Ok(FastAuthResult::FullAuthRequired),
        _ => Err(Error::internal("unexpected caching_sha2 fast-auth byte")),
    }
}

/// Full-auth path for `caching_sha2_password`/`sha256_password` over an
/// unencrypted channel: RSA-OAEP encrypt `password XOR challenge` (repeated
/// to length) using the server's RSA public key (spec §4.3, §9 open
/// question: resolved by following MySQL's `sql/auth/sha2_password.cc`
/// behaviour, which is what the server public key is for).
pub fn rsa_encrypt_password(
    password: &str,
    challenge: &[u8],
    server_public_key_pem: &str,
) -> Result<Vec<u8>> {
    let public_key = rsa::RsaPublicKey::from_public_key_pem(server_public_key_pem)
        .map_err(|e| Error::InterfaceError(format!("invalid server public key: {e}")))?;

    let mut to_encrypt: Vec<u8> = password.as_bytes().to_vec();
    to_encrypt.push(0);
    for (i, byte) in to_encrypt.iter_mut().enumerate() {
        *byte ^= challenge[i % challenge.len()];
    }

    let mut rng = rand::rngs::OsRng;
    public_key
        .encrypt(&mut rng, Oaep::new::<Sha1>(), &to_encrypt)
        .map_err(|e| Error::OperationalError {
            errno: 0,
            message: format!("RSA-OAEP encryption failed: {e}"),
        })
}

/// A cleartext password is sent NUL-terminated, over TLS only (spec §4.3).
pub fn clear_password_response(password: &str) -> Vec<u8> {
    let mut out = password.as_bytes().to_vec();
    out.push(0);
    out
}

/// Pre-4.1 `mysql_old_password`: a 9-byte scramble derived from two
/// pseudo-random seeds. Offered for completeness; no modern server
/// advertises it by default (spec §9 non-goal: pre-4.1 protocol is
/// explicitly excluded from the transport layer, but the plug-in name can
/// still appear in an `AuthSwitchRequest` on ancient servers).
pub fn old_password_scramble(password: &str, challenge: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![0];
    }

    let (mut seed1, mut seed2) = hash_password_323(password);
    let mut out = Vec::with_capacity(9);
    let extra = 0x33_u64;
    for &c in &challenge[..challenge.len().min(8)] {
        seed1 = (seed1.wrapping_mul(3).wrapping_add(seed2)) ^ (c as u64);
        seed2 = seed1.wrapping_add(seed2).wrapping_add(extra);
        let val = (seed1 % 31) as u8 + 64;
        out.push(val);
    }
    let extra_byte = (seed1 % 31) as u8 + 64;
    out.iter_mut().for_each(|b| *b ^= extra_byte);
    out.push(extra_byte ^ b' ');
    out
}

fn hash_password_323(password: &str) -> (u64, u64) {
    let (mut nr, mut nr2) = (1345345333u64, 0x12345671u64);
    let mut add = 7u64;
    for &c in password.as_bytes() {
        if c == b' ' || c == b'\t' {
            continue;
        }
        let tmp = c as u64;
        nr ^= (((nr & 63).wrapping_add(add)).wrapping_mul(tmp)).wrapping_add(nr << 8);
        nr2 = nr2.wrapping_add((nr2 << 8) ^ nr);
        add = add.wrapping_add(tmp);
    }
    (nr & 0x7fffffff, nr2 & 0x7fffffff)
}

/// `client_ed25519`: sign the server's challenge with the account's Ed25519
/// keypair (MariaDB's `ed25519` plug-in). No pack example exercises this
/// algorithm directly; `ed25519-dalek` is the standard crate for it.
pub fn ed25519_sign(password: &str, challenge: &[u8]) -> Vec<u8> {
    use ed25519_dalek::{Signer, SigningKey};

    let seed = Sha512TruncatedHash::digest(password.as_bytes());
    let signing_key = SigningKey::from_bytes(&seed);
    let signature = signing_key.sign(challenge);
    signature.to_bytes().to_vec()
}

/// MariaDB derives the Ed25519 seed as `SHA512(password)` truncated to 32
/// bytes, rather than a raw 32-byte secret key.
struct Sha512TruncatedHash;

impl Sha512TruncatedHash {
    fn digest(input: &[u8]) -> [u8; 32] {
        use sha2::{Digest, Sha512};
        let full = Sha512::digest(input);
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&full[..32]);
        seed
    }
}

/// `dialog`: the server sends a prompt (in the `AuthSwitchRequest` data, or
/// in subsequent `0x01`-prefixed extra-auth-data packets), the client
/// answers. This driver only supports the degenerate single-round case
/// (password prompt answered with the connection's configured password),
/// matching every other plug-in's "one password, one round" shape.
pub fn dialog_response(password: &str) -> Vec<u8> {
    let mut out = password.as_bytes().to_vec();
    out.push(0);
    out
}

/// A fresh 20-byte nonce, used when a plug-in switch requires the client to
/// request a new challenge (defensive default; servers normally supply one).
pub fn random_challenge() -> [u8; 20] {
    let mut out = [0u8; 20];
    rand::rngs::OsRng.fill_bytes(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_password_empty_password_is_empty_response() {
        assert!(native_password_scramble("", b"01234567890123456789").is_empty());
    }

    #[test]
    fn native_password_scramble_is_20_bytes() {
        let out = native_password_scramble("hunter2", b"01234567890123456789");
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn sha2_password_scramble_is_32_bytes() {
        let out = sha2_password_scramble("hunter2", b"01234567890123456789");
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn clear_password_is_nul_terminated() {
        assert_eq!(clear_password_response("hunter2"), b"hunter2\0");
    }

    #[test]
    fn old_password_scramble_is_9_bytes() {
        let out = old_password_scramble("hunter2", b"01234567");
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn fast_auth_result_bytes() {
        assert_eq!(read_fast_auth_result(&[0x03]).unwrap(), FastAuthResult::Success);
        assert_eq!(
            read_fast_auth_result(&[0x04]).unwrap(),
            FastAuthResult::FullAuthRequired
        );
        assert!(read_fast_auth_result(&[0x05]).is_err());
    }
}
