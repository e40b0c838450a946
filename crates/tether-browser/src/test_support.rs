use std::path::{Path, PathBuf};
use tether_core::{CaCertificate, TargetContext, TetherConfig};

/// A "browser" that just stays alive until killed
#[cfg(unix)]
pub fn fake_browser(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-browser");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn test_context(dir: &Path) -> TargetContext {
    let mut params = rcgen::CertificateParams::default();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "Tether CA");
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();

    let ca_path = dir.join("ca.crt");
    std::fs::write(&ca_path, cert.pem()).unwrap();
    let ca = CaCertificate::load(&ca_path).unwrap();

    let config = TetherConfig {
        config_root: dir.to_path_buf(),
        ..Default::default()
    };
    TargetContext::new(config, ca)
}
