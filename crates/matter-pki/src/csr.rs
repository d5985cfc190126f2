//! Certificate signing requests produced by newly created authorities.
//!
//! The request travels to the signer as a JSON string value. Its PEM line
//! breaks are escaped once, here, into the two characters `\n`; nothing
//! downstream is expected to escape them again.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

const PEM_LABEL: &str = "CERTIFICATE REQUEST";
const ESCAPED_NEWLINE: &str = "\\n";

/// A PEM-encoded signing request. Read-only once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Csr(String);

impl Csr {
    /// Wraps a PEM-encoded request after checking its label and signature.
    pub fn from_pem(pem_str: &str) -> Result<Self> {
        let der = decode(pem_str)?;
        let (_, request) = X509CertificationRequest::from_der(&der)
            .map_err(|e| Error::Certificate(format!("failed to parse CSR: {e}")))?;
        request
            .verify_signature()
            .map_err(|e| Error::Certificate(format!("CSR signature verification failed: {e}")))?;
        Ok(Self(pem_str.to_string()))
    }

    /// Reverses [`Csr::escaped_for_json`].
    pub fn from_escaped(escaped: &str) -> Result<Self> {
        Self::from_pem(&escaped.replace(ESCAPED_NEWLINE, "\n"))
    }

    /// The PEM text.
    pub fn as_pem(&self) -> &str {
        &self.0
    }

    /// The request with every line break replaced by a literal `\n`.
    ///
    /// CRLF and LF both map to a single escape. The result contains no raw
    /// line-break characters and can be embedded in a JSON string verbatim.
    pub fn escaped_for_json(&self) -> String {
        self.0.replace("\r\n", "\n").replace('\n', ESCAPED_NEWLINE)
    }
}

fn decode(pem_str: &str) -> Result<Vec<u8>> {
    let parsed = pem::parse(pem_str).map_err(|e| Error::Certificate(format!("failed to parse PEM: {e}")))?;
    if parsed.tag() != PEM_LABEL {
        return Err(Error::Certificate(format!(
            "PEM label is {}, expected {PEM_LABEL}",
            parsed.tag()
        )));
    }
    Ok(parsed.into_contents())
}
