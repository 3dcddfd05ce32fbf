//! The encrypted GDPR export container.
//!
//! `CONNECTIAS_GDPR_EXPORT` | u32 version | u8 salt_len | salt | u8 iv_len |
//! iv | u32 ciphertext_len | ciphertext+tag, every multi-byte field in
//! network (big-endian) order. The plaintext wrapped by the cipher is a ZIP
//! archive containing `export.json` plus CSV siblings, built by
//! [`ExportBuilder`]. Key material is derived from a caller-supplied
//! passphrase via PBKDF2-HMAC-SHA256, 150,000 iterations, never persisted.

use std::io::{Cursor, Read, Write};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;
use zip::write::FileOptions;

use crate::error::{HostError, HostResult};

pub const MAGIC: &[u8; 22] = b"CONNECTIAS_GDPR_EXPORT";
pub const FORMAT_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const PBKDF2_ITERATIONS: u32 = 150_000;

/// One CSV sibling bundled into the ZIP alongside `export.json`.
#[derive(Debug, Clone)]
pub struct CsvSibling {
    pub file_name: String,
    pub contents: String,
}

/// The data a GDPR export packages for one user: the structured JSON
/// document plus whatever tabular CSV breakdowns accompany it (e.g. a
/// per-plugin analytics summary).
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub export_json: serde_json::Value,
    pub csv_siblings: Vec<CsvSibling>,
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn zip_bundle(bundle: &ExportBundle) -> HostResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        writer.start_file("export.json", options).map_err(|e| HostError::Internal(e.to_string()))?;
        let json = serde_json::to_vec_pretty(&bundle.export_json).map_err(|e| HostError::Internal(e.to_string()))?;
        writer.write_all(&json).map_err(HostError::Io)?;

        for sibling in &bundle.csv_siblings {
            writer.start_file(&sibling.file_name, options).map_err(|e| HostError::Internal(e.to_string()))?;
            writer.write_all(sibling.contents.as_bytes()).map_err(HostError::Io)?;
        }

        writer.finish().map_err(|e| HostError::Internal(e.to_string()))?;
    }
    Ok(buffer.into_inner())
}

fn unzip_bundle(zip_bytes: &[u8]) -> HostResult<ExportBundle> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(zip_bytes)).map_err(|e| HostError::Internal(e.to_string()))?;

    let mut export_json = serde_json::Value::Null;
    let mut csv_siblings = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| HostError::Internal(e.to_string()))?;
        let name = entry.name().to_string();
        let mut contents = String::new();
        entry.read_to_string(&mut contents).map_err(HostError::Io)?;

        if name == "export.json" {
            export_json = serde_json::from_str(&contents).map_err(|e| HostError::Internal(e.to_string()))?;
        } else {
            csv_siblings.push(CsvSibling { file_name: name, contents });
        }
    }

    Ok(ExportBundle { export_json, csv_siblings })
}

/// Encrypt `bundle` with `passphrase`, producing the on-disk container
/// format this module documents above.
pub fn encrypt(bundle: &ExportBundle, passphrase: &str) -> HostResult<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut key_bytes = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    key_bytes.zeroize();

    let plaintext = zip_bundle(bundle)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_ref())
        .map_err(|_| HostError::Internal("export encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + 1 + SALT_LEN + 1 + IV_LEN + 4 + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    out.push(SALT_LEN as u8);
    out.extend_from_slice(&salt);
    out.push(IV_LEN as u8);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Header fields read back from a container, exposed for tests and
/// diagnostics without requiring decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportHeader {
    pub version: u32,
    pub salt_len: usize,
    pub iv_len: usize,
}

fn read_header(container: &[u8]) -> HostResult<(ExportHeader, usize)> {
    let mut cursor = 0usize;
    let bad = || HostError::InvalidArgument("malformed export container".to_string());

    if container.len() < MAGIC.len() || &container[..MAGIC.len()] != MAGIC.as_slice() {
        return Err(bad());
    }
    cursor += MAGIC.len();

    let version = u32::from_be_bytes(container.get(cursor..cursor + 4).ok_or_else(bad)?.try_into().unwrap());
    cursor += 4;
    if version != FORMAT_VERSION {
        return Err(HostError::InvalidArgument(format!("unsupported export format version {version}")));
    }

    let salt_len = *container.get(cursor).ok_or_else(bad)? as usize;
    cursor += 1;
    cursor += salt_len;

    let iv_len = *container.get(cursor).ok_or_else(bad)? as usize;
    cursor += 1;
    cursor += iv_len;

    Ok((ExportHeader { version, salt_len, iv_len }, cursor))
}

/// Decrypt a container previously produced by [`encrypt`].
pub fn decrypt(container: &[u8], passphrase: &str) -> HostResult<ExportBundle> {
    let bad = || HostError::InvalidArgument("malformed export container".to_string());

    let (_header, mut cursor) = read_header(container)?;
    let salt_start = MAGIC.len() + 4 + 1;
    let salt_len = container[salt_start - 1] as usize;
    let salt = &container[salt_start..salt_start + salt_len];

    let iv_len_pos = salt_start + salt_len;
    let iv_len = container[iv_len_pos] as usize;
    let iv_start = iv_len_pos + 1;
    let iv = &container[iv_start..iv_start + iv_len];

    let ciphertext_len =
        u32::from_be_bytes(container.get(cursor..cursor + 4).ok_or_else(bad)?.try_into().unwrap()) as usize;
    cursor += 4;
    let ciphertext = container.get(cursor..cursor + ciphertext_len).ok_or_else(bad)?;

    let mut key_bytes = derive_key(passphrase, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    key_bytes.zeroize();

    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| HostError::InvalidArgument("export decryption failed (wrong passphrase?)".to_string()))?;

    unzip_bundle(&plaintext)
}

/// Read just the header fields, without attempting decryption.
pub fn header(container: &[u8]) -> HostResult<ExportHeader> {
    read_header(container).map(|(header, _)| header)
}
