//! X.509 certificate handling for attestation authorities.
//!
//! Certificates are exchanged with the authority service as PEM text. This
//! module parses them with `x509-parser` to read back the subject attributes,
//! CA constraints and key usage the hierarchy depends on.

use crate::subject::CustomAttribute;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;

/// Key usage bits the attestation profile cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage {
    /// digitalSignature.
    pub digital_signature: bool,
    /// keyCertSign.
    pub key_cert_sign: bool,
    /// cRLSign.
    pub crl_sign: bool,
    /// Extension marked critical.
    pub critical: bool,
}

/// Basic constraints of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaConstraints {
    /// cA flag.
    pub ca: bool,
    /// pathLenConstraint.
    pub path_len: Option<u32>,
}

/// An X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    /// Creates a certificate from PEM-encoded data.
    pub fn from_pem(pem_str: &str) -> Result<Self> {
        let parsed = pem::parse(pem_str).map_err(|e| Error::Certificate(format!("failed to parse PEM: {e}")))?;
        if parsed.tag() != "CERTIFICATE" {
            return Err(Error::Certificate(format!("unexpected PEM label {}", parsed.tag())));
        }
        let certificate = Self {
            der: parsed.into_contents(),
        };
        certificate.with_parsed(|_| Ok(()))?;
        Ok(certificate)
    }

    /// SHA-256 fingerprint of the DER encoding, hex encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    fn with_parsed<T>(&self, f: impl FnOnce(&X509Certificate<'_>) -> Result<T>) -> Result<T> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| Error::Certificate(format!("failed to parse certificate: {e}")))?;
        f(&cert)
    }

    /// Subject attributes in encoding order, as dotted OID and string value.
    pub fn subject_attributes(&self) -> Result<Vec<CustomAttribute>> {
        self.with_parsed(|cert| {
            cert.subject()
                .iter_attributes()
                .map(|attr| {
                    let value = attr
                        .as_str()
                        .map_err(|e| Error::Certificate(format!("non-string subject attribute: {e}")))?;
                    Ok(CustomAttribute::new(attr.attr_type().to_id_string(), value))
                })
                .collect()
        })
    }

    /// True when subject and issuer are the same name.
    pub fn is_self_issued(&self) -> Result<bool> {
        self.with_parsed(|cert| Ok(cert.subject().as_raw() == cert.issuer().as_raw()))
    }

    /// Basic constraints, if present.
    pub fn ca_constraints(&self) -> Result<Option<CaConstraints>> {
        self.with_parsed(|cert| {
            let constraints = cert
                .basic_constraints()
                .map_err(|e| Error::Certificate(format!("invalid basic constraints: {e}")))?;
            Ok(constraints.map(|bc| CaConstraints {
                ca: bc.value.ca,
                path_len: bc.value.path_len_constraint,
            }))
        })
    }

    /// Key usage, if present.
    pub fn key_usage(&self) -> Result<Option<KeyUsage>> {
        self.with_parsed(|cert| {
            let usage = cert
                .key_usage()
                .map_err(|e| Error::Certificate(format!("invalid key usage: {e}")))?;
            Ok(usage.map(|ku| KeyUsage {
                digital_signature: ku.value.digital_signature(),
                key_cert_sign: ku.value.key_cert_sign(),
                crl_sign: ku.value.crl_sign(),
                critical: ku.critical,
            }))
        })
    }

    /// End of the validity window.
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        self.with_parsed(|cert| {
            DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
                .ok_or_else(|| Error::Certificate("invalid not_after timestamp".to_string()))
        })
    }

    /// Checks that `issuer`'s key signed this certificate.
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<()> {
        let (_, issuer_cert) = x509_parser::parse_x509_certificate(&issuer.der)
            .map_err(|e| Error::Certificate(format!("failed to parse issuer certificate: {e}")))?;
        self.with_parsed(|cert| {
            cert.verify_signature(Some(issuer_cert.public_key()))
                .map_err(|e| Error::Certificate(format!("signature verification failed: {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};

    fn self_signed() -> Certificate {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::new(vec![]).unwrap();
        params.distinguished_name.push(DnType::CommonName, "Test PAA");
        params
            .distinguished_name
            .push(DnType::CustomDnType(crate::oid::components(crate::oid::MATTER_VENDOR_ID).unwrap()), "FFF1");
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(1));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.self_signed(&key).unwrap();
        Certificate::from_pem(&cert.pem()).unwrap()
    }

    #[test]
    fn test_inspects_self_signed_ca() {
        let cert = self_signed();
        assert!(cert.is_self_issued().unwrap());
        assert_eq!(
            cert.ca_constraints().unwrap(),
            Some(CaConstraints {
                ca: true,
                path_len: Some(1)
            })
        );
        let usage = cert.key_usage().unwrap().unwrap();
        assert!(usage.key_cert_sign && usage.crl_sign);
        assert!(!usage.digital_signature);
        cert.verify_issued_by(&cert).unwrap();
    }

    #[test]
    fn test_subject_attributes_keep_custom_oids() {
        let attrs = self_signed().subject_attributes().unwrap();
        assert_eq!(attrs[0], CustomAttribute::new(crate::oid::COMMON_NAME, "Test PAA"));
        assert_eq!(attrs[1], CustomAttribute::new(crate::oid::MATTER_VENDOR_ID, "FFF1"));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let cert = self_signed();
        assert_eq!(cert.fingerprint().len(), 64);
        assert_ne!(cert.fingerprint(), self_signed().fingerprint());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Certificate::from_pem("garbage").is_err());
        let bogus = pem::encode(&pem::Pem::new("CERTIFICATE", vec![0x30, 0x00]));
        assert!(Certificate::from_pem(&bogus).is_err());
    }
}
