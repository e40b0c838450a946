use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use x509_parser::parse_x509_certificate;

/// The proxy's CA certificate with everything the targets derive from it
#[derive(Debug, Clone)]
pub struct CaCertificate {
    path: PathBuf,
    pem: String,
    der: Vec<u8>,
    subject: String,
    common_name: Option<String>,
    spki_fingerprint: String,
    subject_hash: String,
}

impl CaCertificate {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!("Loading CA certificate from {:?}", path);
        let pem = fs::read_to_string(path)?;
        Self::from_pem(path.to_path_buf(), pem)
    }

    pub fn from_pem(path: PathBuf, pem: String) -> Result<Self> {
        let der = rustls_pemfile::certs(&mut pem.as_bytes())
            .next()
            .ok_or_else(|| Error::Certificate(format!("No certificate found in {:?}", path)))?
            .map_err(|e| Error::Certificate(format!("Invalid PEM in {:?}: {}", path, e)))?
            .as_ref()
            .to_vec();

        let (_, cert) = parse_x509_certificate(&der)
            .map_err(|e| Error::Certificate(format!("Invalid certificate in {:?}: {}", path, e)))?;
        let subject = cert.subject();

        let common_name = subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        let rendered = subject.to_string();
        let spki_fingerprint = STANDARD.encode(Sha256::digest(cert.public_key().raw));
        let subject_hash = subject_hash_old(subject.as_raw());

        Ok(Self {
            subject: rendered,
            common_name,
            spki_fingerprint,
            subject_hash,
            path,
            pem,
            der,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// e.g. `CN=Tether CA, O=Tether`
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Name used when the CA is looked up in OS and NSS stores
    pub fn display_name(&self) -> &str {
        self.common_name().unwrap_or("Tether CA")
    }

    /// base64(SHA-256(SubjectPublicKeyInfo)), the form Chromium's SPKI
    /// allow-list flag expects
    pub fn spki_fingerprint(&self) -> &str {
        &self.spki_fingerprint
    }

    /// OpenSSL's legacy subject hash, which names Android system CA files
    pub fn subject_hash(&self) -> &str {
        &self.subject_hash
    }

    /// Colon-separated SHA-256 of the whole certificate
    pub fn sha256_fingerprint(&self) -> String {
        Sha256::digest(&self.der)
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Human-readable description appended after the PEM in self-describing
    /// certificate files
    pub fn text_summary(&self) -> String {
        format!(
            "Certificate:\n    Subject: {}\n    SHA-256 Fingerprint: {}\n    Public Key SHA-256 (SPKI): {}\n",
            self.subject,
            self.sha256_fingerprint(),
            self.spki_fingerprint
        )
    }
}

/// MD5 of the DER subject, first four bytes read little-endian
fn subject_hash_old(subject_der: &[u8]) -> String {
    let digest = Md5::digest(subject_der);
    let hash = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    format!("{:08x}", hash)
}
