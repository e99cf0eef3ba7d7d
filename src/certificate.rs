//! Certificate material: the issued certificate, its private key, and the
//! shared secret, plus the derived values the signing pipeline and the QR
//! payload need.
use base64ct::{Base64, Encoding};
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey};
use k256::pkcs8::DecodePrivateKey;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use thiserror::Error;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to decode certificate base64: {0}")]
    CertificateDecode(String),
    #[error("failed to parse certificate: {0}")]
    CertificateParse(String),
    #[error("failed to parse private key: {0}")]
    KeyParse(String),
    #[error("failed to DER-encode {context}: {message}")]
    DerEncode {
        context: &'static str,
        message: String,
    },
    #[error("signing failed: {0}")]
    Signing(String),
}

/// The UID attribute phpseclib and older tooling print as a dotted OID;
/// the authority expects its mnemonic in the issuer string.
const DOMAIN_COMPONENT_OID: &str = "0.9.2342.19200300.100.1.25";

/// Parsed certificate, private key, and shared secret. All fields are set
/// at construction and never mutated; the key is used only for signing.
#[derive(Clone)]
pub struct CertificateMaterial {
    raw: String,
    certificate: Certificate,
    signing_key: SigningKey,
    secret: String,
}

impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("raw", &self.raw)
            .field("secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl CertificateMaterial {
    /// `raw_cert` is the base64 DER certificate as issued (the binary
    /// security token). `private_key` accepts PKCS#8 PEM or bare base64
    /// PKCS#8 DER, matching the forms the authority hands back.
    pub fn new(
        raw_cert: &str,
        private_key: &str,
        secret: &str,
    ) -> Result<Self, CertificateError> {
        let cleaned: String = raw_cert.split_whitespace().collect();
        let der = Base64::decode_vec(&cleaned)
            .map_err(|e| CertificateError::CertificateDecode(e.to_string()))?;
        let certificate = Certificate::from_der(&der)
            .map_err(|e| CertificateError::CertificateParse(e.to_string()))?;
        let signing_key = parse_private_key(private_key)?;
        Ok(Self {
            raw: raw_cert.to_string(),
            certificate,
            signing_key,
            secret: secret.to_string(),
        })
    }

    pub fn raw_certificate(&self) -> &str {
        &self.raw
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Base64 of the lowercase-hex SHA-256 of the raw base64 certificate
    /// text. The hex indirection is what the authority validates against.
    pub fn digest(&self) -> String {
        hex_base64(&Sha256::digest(self.raw.as_bytes()))
    }

    /// Issuer DN with the domain-component OID renamed to `DC`, in the
    /// most-specific-first order the QR and XAdES fields require.
    pub fn formatted_issuer(&self) -> String {
        format_issuer_dn(&self.certificate.tbs_certificate.issuer.to_string())
    }

    /// Certificate serial number as a decimal string, arbitrary precision.
    pub fn serial_decimal(&self) -> String {
        let bytes = self.certificate.tbs_certificate.serial_number.as_bytes();
        if bytes.is_empty() {
            return "0".to_string();
        }
        // Schoolbook base-256 to base-10, least significant digit first.
        let mut digits: Vec<u8> = vec![0];
        for &byte in bytes {
            let mut carry = byte as u32;
            for digit in digits.iter_mut() {
                let value = (*digit as u32) * 256 + carry;
                *digit = (value % 10) as u8;
                carry = value / 10;
            }
            while carry > 0 {
                digits.push((carry % 10) as u8);
                carry /= 10;
            }
        }
        while digits.len() > 1 && digits.last() == Some(&0) {
            digits.pop();
        }
        digits.iter().rev().map(|d| (b'0' + *d) as char).collect()
    }

    /// SubjectPublicKeyInfo DER bytes of the certificate's public key.
    pub fn public_key_der(&self) -> Result<Vec<u8>, CertificateError> {
        self.certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| CertificateError::DerEncode {
                context: "subject public key info",
                message: e.to_string(),
            })
    }

    /// Public key as base64, with no PEM armor or line breaks.
    pub fn raw_public_key(&self) -> Result<String, CertificateError> {
        Ok(Base64::encode_string(&self.public_key_der()?))
    }

    /// The certificate's signature BIT STRING value as encoded, including
    /// the leading unused-bits octet.
    pub fn raw_signature(&self) -> Vec<u8> {
        let bits = &self.certificate.signature;
        let mut bytes = Vec::with_capacity(bits.raw_bytes().len() + 1);
        bytes.push(bits.unused_bits());
        bytes.extend_from_slice(bits.raw_bytes());
        bytes
    }

    /// [`Self::raw_signature`] with the first byte removed, which yields the
    /// plain DER ECDSA signature the QR payload carries.
    pub fn cert_signature(&self) -> Vec<u8> {
        self.raw_signature()[1..].to_vec()
    }

    /// `Basic base64(base64(cert) + ":" + secret)`.
    pub fn auth_header(&self) -> String {
        let token = format!("{}:{}", self.raw, self.secret);
        format!("Basic {}", Base64::encode_string(token.as_bytes()))
    }

    /// DER ECDSA signature over SHA-256 of `digest`. Deterministic
    /// (RFC 6979), so identical input yields identical output.
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, CertificateError> {
        let signature: Signature = self
            .signing_key
            .try_sign(digest)
            .map_err(|e| CertificateError::Signing(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

fn parse_private_key(private_key: &str) -> Result<SigningKey, CertificateError> {
    if private_key.contains("-----BEGIN") {
        return SigningKey::from_pkcs8_pem(private_key)
            .map_err(|e| CertificateError::KeyParse(e.to_string()));
    }
    let cleaned: String = private_key.split_whitespace().collect();
    let der = Base64::decode_vec(&cleaned)
        .map_err(|e| CertificateError::KeyParse(format!("invalid base64: {e}")))?;
    SigningKey::from_pkcs8_der(&der).map_err(|e| CertificateError::KeyParse(e.to_string()))
}

/// Base64 of the lowercase hex rendering of a hash. Both the certificate
/// digest and the signed-properties digest use this shape.
pub(crate) fn hex_base64(hash: &[u8]) -> String {
    let mut hex = String::with_capacity(hash.len() * 2);
    for byte in hash {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    Base64::encode_string(hex.as_bytes())
}

/// `Name`'s Display already emits RFC 4514 most-specific-first order, so
/// only the OID substitution and the spaced join are applied here.
fn format_issuer_dn(dn: &str) -> String {
    dn.split(',')
        .map(|part| part.trim().replacen(DOMAIN_COMPONENT_OID, "DC", 1))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use x509_cert::name::Name;

    #[test]
    fn issuer_formatting_keeps_most_specific_first() {
        let name = Name::from_str("CN=eInvoicing CA,O=ZATCA,C=SA").unwrap();
        assert_eq!(
            format_issuer_dn(&name.to_string()),
            "CN=eInvoicing CA, O=ZATCA, C=SA"
        );
    }

    #[test]
    fn issuer_formatting_renames_domain_component_oid() {
        let dn = format!("CN=TSZEINVOICE-SubCA-1,{DOMAIN_COMPONENT_OID}=extgazt");
        assert_eq!(
            format_issuer_dn(&dn),
            "CN=TSZEINVOICE-SubCA-1, DC=extgazt"
        );
    }
}
