//! `X-Hub-Signature` verification.
//!
//! The hub signs every delivery with HMAC over the raw body, keyed by the
//! `hub.secret` we sent at subscribe time. The header looks like
//! `sha1=<hex>`; the algorithm name selects the digest.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

pub const HEADER_SIGNATURE: &str = "x-hub-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sha1" => Some(Algorithm::Sha1),
            "sha256" => Some(Algorithm::Sha256),
            "sha384" => Some(Algorithm::Sha384),
            "sha512" => Some(Algorithm::Sha512),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signature mismatch")]
    Mismatch,
}

/// Check `header` (e.g. `sha1=ab12…`) against an HMAC of `body` keyed by
/// `secret`. The digest comparison is constant time.
pub fn verify(secret: &[u8], body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let (algo, digest_hex) = header.split_once('=').ok_or(SignatureError::Malformed)?;
    let algorithm = Algorithm::from_name(algo)
        .ok_or_else(|| SignatureError::UnsupportedAlgorithm(algo.to_string()))?;
    let expected = hex::decode(digest_hex.trim()).map_err(|_| SignatureError::Malformed)?;

    let ok = match algorithm {
        Algorithm::Sha1 => mac_matches::<Hmac<Sha1>>(secret, body, &expected),
        Algorithm::Sha256 => mac_matches::<Hmac<Sha256>>(secret, body, &expected),
        Algorithm::Sha384 => mac_matches::<Hmac<Sha384>>(secret, body, &expected),
        Algorithm::Sha512 => mac_matches::<Hmac<Sha512>>(secret, body, &expected),
    };
    if ok {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Header value the hub would send for `body`. Handy for tests and tools.
pub fn sign(algorithm: Algorithm, secret: &[u8], body: &[u8]) -> String {
    let digest = match algorithm {
        Algorithm::Sha1 => compute::<Hmac<Sha1>>(secret, body),
        Algorithm::Sha256 => compute::<Hmac<Sha256>>(secret, body),
        Algorithm::Sha384 => compute::<Hmac<Sha384>>(secret, body),
        Algorithm::Sha512 => compute::<Hmac<Sha512>>(secret, body),
    };
    format!("{}={}", algorithm.name(), hex::encode(digest))
}

fn mac_matches<M: Mac + KeyInit>(secret: &[u8], body: &[u8], expected: &[u8]) -> bool {
    let Ok(mut mac) = <M as Mac>::new_from_slice(secret) else {
        return false;
    };
    Mac::update(&mut mac, body);
    mac.verify_slice(expected).is_ok()
}

fn compute<M: Mac + KeyInit>(secret: &[u8], body: &[u8]) -> Vec<u8> {
    match <M as Mac>::new_from_slice(secret) {
        Ok(mut mac) => {
            Mac::update(&mut mac, body);
            mac.finalize().into_bytes().to_vec()
        }
        // HMAC accepts keys of any length
        Err(_) => Vec::new(),
    }
}
