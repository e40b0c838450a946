use crate::{Error, Result};
use rcgen::{CertificateParams, DistinguishedName, DnType};
use std::fs;
use std::path::{Path, PathBuf};
use tether_core::CaCertificate;

pub const DEFAULT_CA_NAME: &str = "Tether CA";

/// Self-signed CA whose certificate the targets are taught to trust
pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
}

impl CertificateAuthority {
    pub fn generate(common_name: &str) -> Result<Self> {
        tracing::info!("Generating new CA certificate {:?}", common_name);

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, "Tether");
        params.distinguished_name = dn;

        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];

        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| Error::Generation(format!("key pair: {}", e)))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Generation(format!("self-signed certificate: {}", e)))?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    pub fn load_from_pem(cert_path: &Path, key_path: &Path) -> Result<Self> {
        tracing::debug!("Loading CA from {:?}", cert_path);
        Ok(Self {
            cert_pem: fs::read_to_string(cert_path)?,
            key_pem: fs::read_to_string(key_path)?,
        })
    }

    pub fn save_to_pem(&self, cert_path: &Path, key_path: &Path) -> Result<()> {
        tracing::info!("Saving CA certificate to {:?}", cert_path);
        if let Some(parent) = cert_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(cert_path, &self.cert_pem)?;
        fs::write(key_path, &self.key_pem)?;
        Ok(())
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Key file lives next to the certificate with a `.key` extension
    pub fn key_path_for(cert_path: &Path) -> PathBuf {
        cert_path.with_extension("key")
    }

    /// Load the pair at `cert_path`, or generate and save one. The flag is
    /// true when a new CA was written.
    pub fn load_or_generate(cert_path: &Path) -> Result<(Self, bool)> {
        let key_path = Self::key_path_for(cert_path);
        if cert_path.exists() && key_path.exists() {
            return Ok((Self::load_from_pem(cert_path, &key_path)?, false));
        }

        tracing::info!("No CA found at {:?}, generating one", cert_path);
        let ca = Self::generate(DEFAULT_CA_NAME)?;
        ca.save_to_pem(cert_path, &key_path)?;
        Ok((ca, true))
    }

    pub fn certificate(&self, cert_path: &Path) -> Result<CaCertificate> {
        Ok(CaCertificate::from_pem(
            cert_path.to_path_buf(),
            self.cert_pem.clone(),
        )?)
    }
}
