//! AES-256-CBC encryption with versioned envelopes
//!
//! New payloads are always written as the tagged, authenticated envelope:
//! `v2:{kdf_version}:{iv_hex}:{ciphertext_hex}:{mac_hex}`
//! - IV: 16 bytes (128 bits), fresh per call
//! - Ciphertext: AES-256-CBC with PKCS#7 padding under the AES subkey
//! - MAC: HMAC-SHA256 under the authentication key, over everything before
//!   the final `:`
//!
//! Two older envelopes remain readable:
//! - `{iv_hex}:{ciphertext_hex}` - unauthenticated CBC under the AES subkey
//! - legacy no-IV: base64 of `Salted__` + 8-byte salt + ciphertext, with key
//!   and IV derived by OpenSSL's EVP_BytesToKey (MD5) from the hex form of
//!   the general encryption key
//!
//! Error messages never include IVs, ciphertext or plaintext.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use super::{SecretString, VaultKey};
use crate::error::{Result, VaultError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;
const BLOCK_LEN: usize = 16;
const TAGGED_PREFIX: &str = "v2";
const LEGACY_MAGIC: &[u8; 8] = b"Salted__";
const LEGACY_SALT_LEN: usize = 8;

/// Generic failure for anything that looks like a wrong key or tampering
fn wrong_key() -> VaultError {
    VaultError::Decryption("wrong key or corrupted data".to_string())
}

fn malformed(what: &str) -> VaultError {
    VaultError::Decryption(format!("malformed envelope: {}", what))
}

/// Which envelope a payload uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeFormat {
    /// Base64 OpenSSL salted format without a stored IV
    Legacy,
    /// `iv:ciphertext`, no version tag, no MAC
    Untagged,
    /// `v2:kdf:iv:ciphertext:mac`
    Tagged,
}

/// Parsed encrypted payload
#[derive(Clone)]
pub enum Envelope {
    Tagged {
        kdf_version: u16,
        iv: [u8; IV_LEN],
        ciphertext: Vec<u8>,
        mac: [u8; MAC_LEN],
    },
    Untagged {
        iv: [u8; IV_LEN],
        ciphertext: Vec<u8>,
    },
    Legacy {
        salt: [u8; LEGACY_SALT_LEN],
        ciphertext: Vec<u8>,
    },
}

impl Envelope {
    /// Parse any supported envelope
    pub fn parse(payload: &str) -> Result<Self> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(malformed("empty payload"));
        }

        if let Some((tag, _)) = payload.split_once(':') {
            if tag == TAGGED_PREFIX {
                return Self::parse_tagged(payload);
            }
            if is_version_tag(tag) {
                return Err(VaultError::Decryption(format!(
                    "unsupported envelope version '{}'",
                    tag
                )));
            }
            return Self::parse_untagged(payload);
        }

        Self::parse_legacy(payload)
    }

    fn parse_tagged(payload: &str) -> Result<Self> {
        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() != 5 {
            return Err(malformed("expected v2:kdf:iv:ciphertext:mac"));
        }

        let kdf_version = parts[1]
            .parse::<u16>()
            .map_err(|_| malformed("invalid KDF version"))?;
        let iv = decode_fixed::<IV_LEN>(parts[2], "IV")?;
        let ciphertext = decode_hex(parts[3], "ciphertext")?;
        let mac = decode_fixed::<MAC_LEN>(parts[4], "MAC")?;

        Ok(Self::Tagged {
            kdf_version,
            iv,
            ciphertext,
            mac,
        })
    }

    fn parse_untagged(payload: &str) -> Result<Self> {
        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() != 2 {
            return Err(malformed("expected iv:ciphertext"));
        }

        let iv = decode_fixed::<IV_LEN>(parts[0], "IV")?;
        let ciphertext = decode_hex(parts[1], "ciphertext")?;

        Ok(Self::Untagged { iv, ciphertext })
    }

    fn parse_legacy(payload: &str) -> Result<Self> {
        let raw = BASE64
            .decode(payload)
            .map_err(|_| malformed("unrecognised format"))?;

        if raw.len() <= LEGACY_MAGIC.len() + LEGACY_SALT_LEN || !raw.starts_with(LEGACY_MAGIC) {
            return Err(malformed("unrecognised format"));
        }

        let mut salt = [0u8; LEGACY_SALT_LEN];
        salt.copy_from_slice(&raw[LEGACY_MAGIC.len()..LEGACY_MAGIC.len() + LEGACY_SALT_LEN]);
        let ciphertext = raw[LEGACY_MAGIC.len() + LEGACY_SALT_LEN..].to_vec();

        Ok(Self::Legacy { salt, ciphertext })
    }

    /// Format of this envelope
    pub fn format(&self) -> EnvelopeFormat {
        match self {
            Self::Tagged { .. } => EnvelopeFormat::Tagged,
            Self::Untagged { .. } => EnvelopeFormat::Untagged,
            Self::Legacy { .. } => EnvelopeFormat::Legacy,
        }
    }

    /// KDF version recorded in the envelope, if the format records one
    pub fn kdf_version(&self) -> Option<u16> {
        match self {
            Self::Tagged { kdf_version, .. } => Some(*kdf_version),
            _ => None,
        }
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tagged {
                kdf_version,
                iv,
                ciphertext,
                mac,
            } => write!(
                f,
                "{}:{}",
                authenticated_part(*kdf_version, iv, ciphertext),
                hex::encode(mac)
            ),
            Self::Untagged { iv, ciphertext } => {
                write!(f, "{}:{}", hex::encode(iv), hex::encode(ciphertext))
            }
            Self::Legacy { salt, ciphertext } => {
                let mut raw = Vec::with_capacity(LEGACY_MAGIC.len() + salt.len() + ciphertext.len());
                raw.extend_from_slice(LEGACY_MAGIC);
                raw.extend_from_slice(salt);
                raw.extend_from_slice(ciphertext);
                f.write_str(&BASE64.encode(raw))
            }
        }
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("format", &self.format())
            .field("kdf_version", &self.kdf_version())
            .finish()
    }
}

fn is_version_tag(tag: &str) -> bool {
    tag.len() > 1 && tag.starts_with('v') && tag[1..].bytes().all(|b| b.is_ascii_digit())
}

fn decode_hex(s: &str, what: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|_| malformed(&format!("{} is not valid hex", what)))
}

fn decode_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N]> {
    let bytes = decode_hex(s, what)?;
    if bytes.len() != N {
        return Err(malformed(&format!(
            "invalid {} length: expected {}, got {}",
            what,
            N,
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn authenticated_part(kdf_version: u16, iv: &[u8], ciphertext: &[u8]) -> String {
    format!(
        "{}:{}:{}:{}",
        TAGGED_PREFIX,
        kdf_version,
        hex::encode(iv),
        hex::encode(ciphertext)
    )
}

/// HMAC-SHA256 of `data` under `key`
pub(crate) fn compute_mac(key: &[u8], data: &[u8]) -> Result<[u8; MAC_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| VaultError::KeyDerivation("invalid MAC key length".to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn verify_mac(key: &[u8], data: &[u8], tag: &[u8]) -> Result<()> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| VaultError::KeyDerivation("invalid MAC key length".to_string()))?;
    mac.update(data);
    mac.verify_slice(tag).map_err(|_| wrong_key())
}

fn cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| VaultError::KeyDerivation("invalid AES key or IV length".to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(malformed("ciphertext is not a whole number of blocks"));
    }
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| VaultError::KeyDerivation("invalid AES key or IV length".to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| wrong_key())
}

/// OpenSSL EVP_BytesToKey with MD5 and one round: 32-byte key, 16-byte IV
fn evp_bytes_to_key(passphrase: &[u8], salt: &[u8]) -> ([u8; 32], [u8; IV_LEN]) {
    let mut derived = Vec::with_capacity(48);
    let mut block: Vec<u8> = Vec::new();

    while derived.len() < 48 {
        let mut hasher = Md5::new();
        hasher.update(&block);
        hasher.update(passphrase);
        hasher.update(salt);
        block = hasher.finalize().to_vec();
        derived.extend_from_slice(&block);
    }

    let mut key = [0u8; 32];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..32]);
    iv.copy_from_slice(&derived[32..48]);

    derived.zeroize();
    block.zeroize();
    (key, iv)
}

/// Recovered bytes must be non-empty UTF-8; anything else means wrong key
fn into_secret(mut bytes: Vec<u8>) -> Result<SecretString> {
    if bytes.is_empty() {
        return Err(wrong_key());
    }
    match String::from_utf8(bytes) {
        Ok(s) => Ok(SecretString::new(s)),
        Err(e) => {
            bytes = e.into_bytes();
            bytes.zeroize();
            Err(wrong_key())
        }
    }
}

/// Encrypt a credential string into a tagged envelope
///
/// # Errors
/// [`VaultError::InvalidInput`] if `plaintext` is empty.
pub fn encrypt(plaintext: &str, key: &VaultKey) -> Result<String> {
    if plaintext.is_empty() {
        return Err(VaultError::InvalidInput(
            "cannot encrypt an empty value".to_string(),
        ));
    }

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = cbc_encrypt(key.aes_key(), &iv, plaintext.as_bytes())?;
    let kdf_version = key.params().version;
    let mac = compute_mac(
        key.authentication_key(),
        authenticated_part(kdf_version, &iv, &ciphertext).as_bytes(),
    )?;

    Ok(Envelope::Tagged {
        kdf_version,
        iv,
        ciphertext,
        mac,
    }
    .to_string())
}

/// Decrypt any supported envelope
///
/// # Errors
/// - [`VaultError::KeyVersionMismatch`] when a tagged envelope was written
///   under a different KDF version than `key`
/// - [`VaultError::Decryption`] for a wrong key, tampering, malformed input,
///   or an empty result
pub fn decrypt(payload: &str, key: &VaultKey) -> Result<SecretString> {
    match Envelope::parse(payload)? {
        Envelope::Tagged {
            kdf_version,
            iv,
            ciphertext,
            mac,
        } => {
            let current = key.params().version;
            if kdf_version != current {
                return Err(VaultError::KeyVersionMismatch {
                    stored: kdf_version,
                    current,
                });
            }
            verify_mac(
                key.authentication_key(),
                authenticated_part(kdf_version, &iv, &ciphertext).as_bytes(),
                &mac,
            )?;
            into_secret(cbc_decrypt(key.aes_key(), &iv, &ciphertext)?)
        }
        Envelope::Untagged { iv, ciphertext } => {
            into_secret(cbc_decrypt(key.aes_key(), &iv, &ciphertext)?)
        }
        Envelope::Legacy { salt, ciphertext } => {
            let mut passphrase = hex::encode(key.encryption_key());
            let (mut legacy_key, mut legacy_iv) = evp_bytes_to_key(passphrase.as_bytes(), &salt);
            passphrase.zeroize();

            let result = cbc_decrypt(&legacy_key, &legacy_iv, &ciphertext);
            legacy_key.zeroize();
            legacy_iv.zeroize();
            into_secret(result?)
        }
    }
}

/// Detect the envelope format without decrypting
pub fn envelope_format(payload: &str) -> Option<EnvelopeFormat> {
    Envelope::parse(payload).ok().map(|e| e.format())
}

/// Write an `iv:ciphertext` envelope, for exercising backward compatibility
#[cfg(test)]
pub(crate) fn encrypt_untagged(plaintext: &str, key: &VaultKey) -> Result<String> {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    let ciphertext = cbc_encrypt(key.aes_key(), &iv, plaintext.as_bytes())?;
    Ok(Envelope::Untagged { iv, ciphertext }.to_string())
}

/// Write a legacy salted envelope, for exercising backward compatibility
#[cfg(test)]
pub(crate) fn encrypt_legacy(plaintext: &str, key: &VaultKey) -> Result<String> {
    let mut salt = [0u8; LEGACY_SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let passphrase = hex::encode(key.encryption_key());
    let (legacy_key, legacy_iv) = evp_bytes_to_key(passphrase.as_bytes(), &salt);
    let ciphertext = cbc_encrypt(&legacy_key, &legacy_iv, plaintext.as_bytes())?;
    Ok(Envelope::Legacy { salt, ciphertext }.to_string())
}
