//! ZATCA e-invoice signing toolkit: XML canonicalization and digesting,
//! XAdES signature embedding, TLV QR payloads, and CSR issuance.
//!
//! # Examples
//! ```rust,no_run
//! use zatca_sign::certificate::CertificateMaterial;
//! use zatca_sign::sign::InvoiceSigner;
//!
//! # fn run(cert_b64: &str, key_pem: &str, secret: &str, xml: &str) -> Result<(), zatca_sign::Error> {
//! let certificate = CertificateMaterial::new(cert_b64, key_pem, secret)?;
//! let signed = InvoiceSigner::new(certificate).sign(xml)?;
//! println!("{}", signed.qr_code());
//! # Ok(())
//! # }
//! ```
pub mod certificate;
pub mod config;
pub mod csr;
pub mod qr;
pub mod sign;
pub mod storage;
pub mod tlv;
pub mod xml;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Certificate(#[from] certificate::CertificateError),
    #[error(transparent)]
    Signing(#[from] sign::SigningError),
    #[error(transparent)]
    Qr(#[from] qr::QrCodeError),
    #[error(transparent)]
    Xml(#[from] xml::XmlError),
    #[error(transparent)]
    Tlv(#[from] tlv::TlvError),
    #[error(transparent)]
    Csr(#[from] csr::CsrError),
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    #[error(transparent)]
    Environment(#[from] config::EnvironmentParseError),
}
