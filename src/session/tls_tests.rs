use super::*;
use crate::identity::IdentityKind;
use rcgen::{BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose};

struct Pki {
    ca_pem: String,
    leaf_der: CertificateDer<'static>,
    leaf_pem: String,
    leaf_key_pem: String,
}

fn make_pki() -> Pki {
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.distinguished_name.push(DnType::CommonName, "jsh test CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign, KeyUsagePurpose::DigitalSignature];
    let ca_key = KeyPair::generate().unwrap();
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let mut leaf_params = CertificateParams::new(vec!["server.test".to_string()]).unwrap();
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
    let leaf_key = KeyPair::generate().unwrap();
    let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

    Pki {
        ca_pem: ca.pem(),
        leaf_der: leaf.der().clone(),
        leaf_pem: leaf.pem(),
        leaf_key_pem: leaf_key.serialize_pem(),
    }
}

#[test]
fn roots_are_loaded_from_directory() {
    let pki = make_pki();
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("ca.pem"), &pki.ca_pem).unwrap();
    std::fs::write(tmp.path().join("README"), "not a cert").unwrap();
    let roots = load_roots(&[tmp.path().to_path_buf(), tmp.path().join("missing")]);
    assert_eq!(roots.len(), 1);
}

#[test]
fn host_name_mismatch_is_tolerated() {
    let pki = make_pki();
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("ca.pem"), &pki.ca_pem).unwrap();
    let verifier = CaChainVerifier::new(load_roots(&[tmp.path().to_path_buf()])).unwrap();

    let other = ServerName::try_from("alias.example").unwrap();
    assert!(verifier.verify_server_cert(&pki.leaf_der, &[], &other, &[], UnixTime::now()).is_ok());
    let right = ServerName::try_from("server.test").unwrap();
    assert!(verifier.verify_server_cert(&pki.leaf_der, &[], &right, &[], UnixTime::now()).is_ok());
}

#[test]
fn unknown_issuer_is_rejected() {
    let trusted = make_pki();
    let stranger = make_pki();
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("ca.pem"), &trusted.ca_pem).unwrap();
    let verifier = CaChainVerifier::new(load_roots(&[tmp.path().to_path_buf()])).unwrap();

    let name = ServerName::try_from("server.test").unwrap();
    assert!(verifier.verify_server_cert(&stranger.leaf_der, &[], &name, &[], UnixTime::now()).is_err());
}

#[test]
fn empty_trust_store_is_a_tls_error() {
    let err = CaChainVerifier::new(RootCertStore::empty()).unwrap_err();
    assert!(matches!(err, AppError::Tls { .. }));
}

#[test]
fn client_config_uses_identity_pair() {
    let pki = make_pki();
    let tmp = tempfile::tempdir().unwrap();
    let ca_dir = tmp.path().join("ca");
    std::fs::create_dir(&ca_dir).unwrap();
    std::fs::write(ca_dir.join("ca.pem"), &pki.ca_pem).unwrap();
    std::fs::write(tmp.path().join("cert.pem"), &pki.leaf_pem).unwrap();
    std::fs::write(tmp.path().join("key.pem"), &pki.leaf_key_pem).unwrap();
    let id = Identity {
        kind: IdentityKind::User,
        cert: tmp.path().join("cert.pem"),
        key: tmp.path().join("key.pem"),
        not_after: None,
    };
    assert!(client_config(&id, &[ca_dir]).is_ok());

    let missing = Identity { key: tmp.path().join("nope.pem"), ..id };
    assert!(matches!(client_config(&missing, &[tmp.path().join("ca")]).unwrap_err(), AppError::Tls { .. }));
}
