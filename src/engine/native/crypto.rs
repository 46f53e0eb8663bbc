//! Decryption of password-encrypted xlsx packages.
//!
//! An encrypted workbook is a compound file holding an `EncryptionInfo`
//! stream (the key encryptor description) and an `EncryptedPackage` stream
//! (the zip package, AES-CBC encrypted in 4096-byte segments). Only the Agile
//! scheme (EncryptionInfo version 4.4) written by current office suites is
//! decrypted. The data integrity HMAC is not verified.

use super::password::{HashAlgorithm, utf16le};
use super::xml::{self, Attributes};
use aes::{Aes128, Aes192, Aes256};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, KeyIvInit};
use std::io::{Cursor, Read};
use thiserror::Error;

/// First bytes of every compound (OLE) file
pub const COMPOUND_FILE_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const SEGMENT_LEN: usize = 4096;

const BLOCK_VERIFIER_HASH_INPUT: [u8; 8] = [0xfe, 0xa7, 0xd2, 0x76, 0x3b, 0x4b, 0x9e, 0x79];
const BLOCK_VERIFIER_HASH_VALUE: [u8; 8] = [0xd7, 0xaa, 0x0f, 0x6d, 0x30, 0x61, 0x34, 0x4e];
const BLOCK_KEY_VALUE: [u8; 8] = [0x14, 0x6e, 0x0b, 0xe7, 0xab, 0xac, 0xd0, 0xd6];

/// Errors while decrypting an encrypted package
#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("the password is not correct")]
    InvalidPassword,

    #[error("unsupported encryption: {0}")]
    Unsupported(String),

    #[error("invalid encryption data: {0}")]
    Malformed(String),

    #[error("compound file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `bytes` start with the compound file signature
pub fn is_compound_file(bytes: &[u8]) -> bool {
    bytes.starts_with(&COMPOUND_FILE_SIGNATURE)
}

/// Decrypt an encrypted package and return the plain zip bytes
pub fn decrypt_package(bytes: &[u8], password: &str) -> Result<Vec<u8>, DecryptError> {
    let mut compound = cfb::CompoundFile::open(Cursor::new(bytes))?;

    if !compound.is_stream("/EncryptionInfo") || !compound.is_stream("/EncryptedPackage") {
        return Err(DecryptError::Unsupported(
            "compound file is not an encrypted workbook package".to_string(),
        ));
    }

    let mut info_bytes = Vec::new();
    compound.open_stream("/EncryptionInfo")?.read_to_end(&mut info_bytes)?;
    let mut package_bytes = Vec::new();
    compound
        .open_stream("/EncryptedPackage")?
        .read_to_end(&mut package_bytes)?;

    let info = AgileEncryptionInfo::parse(&info_bytes)?;
    let secret_key = info.secret_key(password)?;
    info.decrypt_package(&secret_key, &package_bytes)
}

/// Parameters of the package key (`keyData`)
#[derive(Debug, Clone, PartialEq)]
struct KeyData {
    salt: Vec<u8>,
    hash: HashAlgorithm,
    block_size: usize,
    key_bits: usize,
}

/// Parameters of the password key encryptor (`p:encryptedKey`)
#[derive(Debug, Clone, PartialEq)]
struct PasswordKeyEncryptor {
    salt: Vec<u8>,
    hash: HashAlgorithm,
    spin_count: u32,
    block_size: usize,
    key_bits: usize,
    encrypted_verifier_hash_input: Vec<u8>,
    encrypted_verifier_hash_value: Vec<u8>,
    encrypted_key_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
struct AgileEncryptionInfo {
    key_data: KeyData,
    password: PasswordKeyEncryptor,
}

impl AgileEncryptionInfo {
    fn parse(bytes: &[u8]) -> Result<Self, DecryptError> {
        if bytes.len() < 8 {
            return Err(DecryptError::Malformed("EncryptionInfo is truncated".to_string()));
        }
        let major = u16::from_le_bytes([bytes[0], bytes[1]]);
        let minor = u16::from_le_bytes([bytes[2], bytes[3]]);

        match (major, minor) {
            (4, 4) => {}
            (2..=4, 2) => {
                return Err(DecryptError::Unsupported(format!(
                    "Standard encryption (version {major}.{minor})"
                )));
            }
            _ => {
                return Err(DecryptError::Unsupported(format!(
                    "EncryptionInfo version {major}.{minor}"
                )));
            }
        }

        let document = std::str::from_utf8(&bytes[8..])
            .map_err(|_| DecryptError::Malformed("EncryptionInfo XML is not UTF-8".to_string()))?;
        let parse_error = |e: quick_xml::Error| DecryptError::Malformed(e.to_string());

        let key_data = xml::find_element(document, "keyData")
            .map_err(parse_error)?
            .ok_or_else(|| DecryptError::Malformed("missing keyData".to_string()))?;

        let encrypted_key = xml::find_elements(document, "encryptedKey")
            .map_err(parse_error)?
            .into_iter()
            .find(|span| xml::attribute(&span.attributes, "spinCount").is_some())
            .ok_or_else(|| {
                DecryptError::Unsupported("no password key encryptor".to_string())
            })?;

        let key_attrs = &key_data.attributes;
        let pw_attrs = &encrypted_key.attributes;
        check_cipher(key_attrs)?;
        check_cipher(pw_attrs)?;

        Ok(Self {
            key_data: KeyData {
                salt: base64_attr(key_attrs, "saltValue")?,
                hash: hash_attr(key_attrs)?,
                block_size: number_attr(key_attrs, "blockSize")?,
                key_bits: number_attr(key_attrs, "keyBits")?,
            },
            password: PasswordKeyEncryptor {
                salt: base64_attr(pw_attrs, "saltValue")?,
                hash: hash_attr(pw_attrs)?,
                spin_count: number_attr(pw_attrs, "spinCount")?,
                block_size: number_attr(pw_attrs, "blockSize")?,
                key_bits: number_attr(pw_attrs, "keyBits")?,
                encrypted_verifier_hash_input: base64_attr(pw_attrs, "encryptedVerifierHashInput")?,
                encrypted_verifier_hash_value: base64_attr(pw_attrs, "encryptedVerifierHashValue")?,
                encrypted_key_value: base64_attr(pw_attrs, "encryptedKeyValue")?,
            },
        })
    }

    /// Verify the password and recover the package key
    fn secret_key(&self, password: &str) -> Result<Vec<u8>, DecryptError> {
        let encryptor = &self.password;
        if encryptor.key_bits == 0 || encryptor.key_bits % 8 != 0 {
            return Err(DecryptError::Malformed("keyBits is not a whole number of bytes".to_string()));
        }
        let key_len = encryptor.key_bits / 8;
        let iv = fit(&encryptor.salt, encryptor.block_size);
        let h = password_hash(encryptor.hash, password, &encryptor.salt, encryptor.spin_count);

        let derive = |block: &[u8]| fit(&encryptor.hash.digest(&[&h, block]), key_len);

        let verifier_input = aes_cbc_decrypt(
            &derive(&BLOCK_VERIFIER_HASH_INPUT),
            &iv,
            &encryptor.encrypted_verifier_hash_input,
        )?;
        let verifier_value = aes_cbc_decrypt(
            &derive(&BLOCK_VERIFIER_HASH_VALUE),
            &iv,
            &encryptor.encrypted_verifier_hash_value,
        )?;

        let salt_len = encryptor.salt.len().min(verifier_input.len());
        let expected = encryptor.hash.digest(&[&verifier_input[..salt_len]]);
        let digest_len = encryptor.hash.output_len();
        if verifier_value.len() < digest_len || verifier_value[..digest_len] != expected[..] {
            return Err(DecryptError::InvalidPassword);
        }

        let key_value = aes_cbc_decrypt(
            &derive(&BLOCK_KEY_VALUE),
            &iv,
            &encryptor.encrypted_key_value,
        )?;
        let package_key_len = self.key_data.key_bits / 8;
        if package_key_len == 0 || key_value.len() < package_key_len {
            return Err(DecryptError::Malformed("decrypted key is truncated".to_string()));
        }
        Ok(key_value[..package_key_len].to_vec())
    }

    /// Decrypt the `EncryptedPackage` stream segment by segment
    fn decrypt_package(&self, key: &[u8], stream: &[u8]) -> Result<Vec<u8>, DecryptError> {
        if stream.len() < 8 {
            return Err(DecryptError::Malformed("EncryptedPackage is truncated".to_string()));
        }
        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(&stream[..8]);
        let declared_size = u64::from_le_bytes(size_bytes) as usize;

        let mut plain = Vec::with_capacity(stream.len() - 8);
        for (index, segment) in stream[8..].chunks(SEGMENT_LEN).enumerate() {
            let iv = fit(
                &self
                    .key_data
                    .hash
                    .digest(&[&self.key_data.salt, &(index as u32).to_le_bytes()]),
                self.key_data.block_size,
            );
            // Trailing bytes past the last whole block are padding
            let usable = segment.len() - segment.len() % 16;
            plain.extend(aes_cbc_decrypt(key, &iv, &segment[..usable])?);
        }

        if plain.len() < declared_size {
            return Err(DecryptError::Malformed(format!(
                "package declares {} bytes but only {} were decrypted",
                declared_size,
                plain.len()
            )));
        }
        plain.truncate(declared_size);
        Ok(plain)
    }
}

/// Iterated password hash of the key encryptor: `H0 = H(salt || pw)`, `Hn = H(LE32(n-1) || Hn-1)`
fn password_hash(hash: HashAlgorithm, password: &str, salt: &[u8], spin_count: u32) -> Vec<u8> {
    let mut h = hash.digest(&[salt, &utf16le(password)]);
    for round in 0..spin_count {
        h = hash.digest(&[&round.to_le_bytes(), &h]);
    }
    h
}

/// Truncate to `len`, or pad with 0x36 bytes
fn fit(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0x36u8; len];
    let take = bytes.len().min(len);
    out[..take].copy_from_slice(&bytes[..take]);
    out
}

fn aes_cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if data.len() % 16 != 0 {
        return Err(DecryptError::Malformed(format!(
            "ciphertext length {} is not a multiple of the block size",
            data.len()
        )));
    }
    let mut buf = data.to_vec();
    let bad_key = |_| DecryptError::Malformed(format!("invalid key length {}", key.len()));
    let bad_data = |_| DecryptError::Malformed("ciphertext could not be decrypted".to_string());

    match key.len() {
        16 => {
            cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(bad_data)?;
        }
        24 => {
            cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(bad_data)?;
        }
        32 => {
            cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(bad_data)?;
        }
        other => {
            return Err(DecryptError::Malformed(format!("invalid key length {other}")));
        }
    }
    Ok(buf)
}

fn check_cipher(attributes: &Attributes) -> Result<(), DecryptError> {
    let algorithm = xml::attribute(attributes, "cipherAlgorithm").unwrap_or("AES");
    let chaining = xml::attribute(attributes, "cipherChaining").unwrap_or("ChainingModeCBC");
    if algorithm != "AES" || chaining != "ChainingModeCBC" {
        return Err(DecryptError::Unsupported(format!("{algorithm} with {chaining}")));
    }
    Ok(())
}

fn base64_attr(attributes: &Attributes, name: &str) -> Result<Vec<u8>, DecryptError> {
    let value = xml::attribute(attributes, name)
        .ok_or_else(|| DecryptError::Malformed(format!("missing {name}")))?;
    BASE64
        .decode(value.trim())
        .map_err(|_| DecryptError::Malformed(format!("{name} is not base64")))
}

fn number_attr<T: std::str::FromStr>(attributes: &Attributes, name: &str) -> Result<T, DecryptError> {
    xml::attribute(attributes, name)
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| DecryptError::Malformed(format!("missing or invalid {name}")))
}

fn hash_attr(attributes: &Attributes) -> Result<HashAlgorithm, DecryptError> {
    let name = xml::attribute(attributes, "hashAlgorithm")
        .ok_or_else(|| DecryptError::Malformed("missing hashAlgorithm".to_string()))?;
    HashAlgorithm::from_name(name)
        .ok_or_else(|| DecryptError::Unsupported(format!("hash algorithm {name}")))
}
