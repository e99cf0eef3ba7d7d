//! CSR issuance with the authority-specific subject extensions.
//!
//! Three stages: [`CsrBuilder`] collects fields, [`CsrRequest`] is the
//! validated form, and [`CsrRequest::generate`] produces the key pair and
//! the signed request. Export before generation is unrepresentable.
use crate::config::EnvironmentType;
use crate::storage::{Storage, StorageError};
use base64ct::{Base64, Encoding};
use k256::ecdsa::{DerSignature, SigningKey};
use k256::pkcs8::EncodePrivateKey;
use rand_core::OsRng;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;
use x509_cert::{
    builder::{Builder, RequestBuilder},
    der::{
        asn1, pem::LineEnding, Encode, EncodePem, Error as DerError, Length, Result as DerResult,
        Writer,
    },
    ext::{
        pkix::{name::GeneralName, SubjectAltName},
        AsExtension, Extension,
    },
    name,
    request::CertReq,
};

#[derive(Debug, Error)]
pub enum CsrError {
    #[error("missing required CSR field '{field}'")]
    MissingField { field: &'static str },

    #[error("invalid organization identifier '{value}': must be 15 digits starting and ending with 3")]
    InvalidOrganizationIdentifier { value: String },

    #[error("invalid country code '{value}': must be exactly two letters")]
    InvalidCountryCode { value: String },

    #[error("invalid invoice type {value}: must be at most 9999")]
    InvalidInvoiceType { value: u16 },

    #[error("invalid subject distinguished name constructed from provided fields: {message}")]
    InvalidSubject { message: String },

    #[error("invalid Subject Alternative Name (SAN) from fields: {message}")]
    InvalidSan { message: String },

    #[error("failed to construct CSR request: {message}")]
    RequestBuild { message: String },

    #[error("failed adding CSR extension '{which}': {message}")]
    AddExtension {
        which: &'static str,
        message: String,
    },

    #[error("failed to build CSR: {message}")]
    CsrBuild { message: String },

    #[error("failed DER encoding for {context}: {source}")]
    DerEncode {
        context: &'static str,
        #[source]
        source: DerError,
    },

    #[error("failed to export private key: {message}")]
    KeyExport { message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Microsoft certificate-template-name extension. The authority reads the
/// marker string from it to route the request to the right signing CA.
struct TemplateNameExtension(asn1::PrintableString);

impl const_oid::AssociatedOid for TemplateNameExtension {
    const OID: const_oid::ObjectIdentifier =
        const_oid::ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.20.2");
}

impl Encode for TemplateNameExtension {
    fn encoded_len(&self) -> DerResult<Length> {
        self.0.encoded_len()
    }
    fn encode(&self, encoder: &mut impl Writer) -> DerResult<()> {
        self.0.encode(encoder)
    }
}

impl AsExtension for TemplateNameExtension {
    fn critical(&self, _name: &name::Name, _exts: &[Extension]) -> bool {
        false
    }
}

impl EnvironmentType {
    const fn template_name(&self) -> &'static str {
        match self {
            EnvironmentType::NonProduction => "TSTZATCA-Code-Signing",
            EnvironmentType::Simulation => "PREZATCA-Code-Signing",
            EnvironmentType::Production => "ZATCA-Code-Signing",
        }
    }

    fn to_extension(self) -> Result<TemplateNameExtension, CsrError> {
        let value =
            asn1::PrintableString::new(self.template_name()).map_err(|e| CsrError::RequestBuild {
                message: format!("invalid template name for extension: {e}"),
            })?;
        Ok(TemplateNameExtension(value))
    }
}

/// Collects the fields of a certificate request. Free-text fields are
/// sanitized because they are interpolated into distinguished-name text.
#[derive(Debug, Clone, Default)]
pub struct CsrBuilder {
    common_name: Option<String>,
    organization_name: Option<String>,
    organization_unit_name: Option<String>,
    organization_identifier: Option<String>,
    country_name: Option<String>,
    serial_number: Option<String>,
    invoice_type: Option<u16>,
    location_address: Option<String>,
    business_category: Option<String>,
    environment: EnvironmentType,
}

impl CsrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn common_name(mut self, value: &str) -> Self {
        self.common_name = Some(value.to_string());
        self
    }

    pub fn organization_name(mut self, value: &str) -> Self {
        self.organization_name = Some(value.to_string());
        self
    }

    pub fn organization_unit_name(mut self, value: &str) -> Self {
        self.organization_unit_name = Some(value.to_string());
        self
    }

    /// 15-digit VAT registration number; must start and end with `3`.
    pub fn organization_identifier(mut self, value: &str) -> Self {
        self.organization_identifier = Some(value.to_string());
        self
    }

    /// Two-letter ISO country code. Defaults to `SA`.
    pub fn country_name(mut self, value: &str) -> Self {
        self.country_name = Some(value.to_string());
        self
    }

    /// Composite device serial: `1-<solution>|2-<model>|3-<serial>`.
    pub fn serial_number(mut self, solution: &str, model: &str, serial: &str) -> Self {
        self.serial_number = Some(format!(
            "1-{}|2-{}|3-{}",
            sanitize(solution),
            sanitize(model),
            sanitize(serial)
        ));
        self
    }

    /// Invoice type code, zero-padded to four digits. Defaults to 1100.
    pub fn invoice_type(mut self, value: u16) -> Self {
        self.invoice_type = Some(value);
        self
    }

    pub fn location_address(mut self, value: &str) -> Self {
        self.location_address = Some(value.to_string());
        self
    }

    pub fn business_category(mut self, value: &str) -> Self {
        self.business_category = Some(value.to_string());
        self
    }

    pub fn environment(mut self, value: EnvironmentType) -> Self {
        self.environment = value;
        self
    }

    /// Validates every field and produces the immutable request form.
    /// Validation happens entirely before any cryptographic work.
    pub fn build(self) -> Result<CsrRequest, CsrError> {
        let common_name = required_text(self.common_name, "common_name")?;
        let organization_name = required_text(self.organization_name, "organization_name")?;
        let organization_unit_name =
            required_text(self.organization_unit_name, "organization_unit_name")?;
        let serial_number = self
            .serial_number
            .ok_or(CsrError::MissingField {
                field: "serial_number",
            })?;
        let location_address = required_text(self.location_address, "location_address")?;
        let business_category = required_text(self.business_category, "business_category")?;

        let organization_identifier =
            self.organization_identifier
                .ok_or(CsrError::MissingField {
                    field: "organization_identifier",
                })?;
        if organization_identifier.len() != 15
            || !organization_identifier.bytes().all(|b| b.is_ascii_digit())
            || !organization_identifier.starts_with('3')
            || !organization_identifier.ends_with('3')
        {
            return Err(CsrError::InvalidOrganizationIdentifier {
                value: organization_identifier,
            });
        }

        let country_name = self.country_name.unwrap_or_else(|| "SA".to_string());
        if country_name.len() != 2 || !country_name.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(CsrError::InvalidCountryCode {
                value: country_name,
            });
        }
        let country_name = country_name.to_ascii_uppercase();

        let invoice_type = self.invoice_type.unwrap_or(1100);
        if invoice_type > 9999 {
            return Err(CsrError::InvalidInvoiceType {
                value: invoice_type,
            });
        }

        Ok(CsrRequest {
            common_name,
            organization_name,
            organization_unit_name,
            organization_identifier,
            country_name,
            serial_number,
            invoice_type,
            location_address,
            business_category,
            environment: self.environment,
        })
    }
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, CsrError> {
    let value = value.ok_or(CsrError::MissingField { field })?;
    let cleaned = sanitize(&value);
    if cleaned.is_empty() {
        return Err(CsrError::MissingField { field });
    }
    Ok(cleaned)
}

/// Strips everything but alphanumerics, whitespace, hyphen, and underscore.
/// The fields end up inside distinguished-name text, so stray separators
/// would change the parsed structure.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect::<String>()
        .trim()
        .to_string()
}

/// A validated certificate request, ready to generate.
#[derive(Debug, Clone)]
pub struct CsrRequest {
    common_name: String,
    organization_name: String,
    organization_unit_name: String,
    organization_identifier: String,
    country_name: String,
    serial_number: String,
    invoice_type: u16,
    location_address: String,
    business_category: String,
    environment: EnvironmentType,
}

impl CsrRequest {
    fn subject(&self) -> Result<name::Name, CsrError> {
        name::Name::from_str(&format!(
            "C={},OU={},O={},CN={}",
            self.country_name, self.organization_unit_name, self.organization_name,
            self.common_name
        ))
        .map_err(|e| CsrError::InvalidSubject {
            message: e.to_string(),
        })
    }

    fn san_extension(&self) -> Result<SubjectAltName, CsrError> {
        let name = name::Name::from_str(&format!(
            "sn={},uid={},title={:04},registeredAddress={},businessCategory={}",
            self.serial_number,
            self.organization_identifier,
            self.invoice_type,
            self.location_address,
            self.business_category
        ))
        .map_err(|e| CsrError::InvalidSan {
            message: e.to_string(),
        })?;
        Ok(SubjectAltName::from(vec![GeneralName::DirectoryName(name)]))
    }

    /// Generates a fresh secp256k1 key pair and signs the request with it.
    pub fn generate(self) -> Result<GeneratedCsr, CsrError> {
        let signing_key = SigningKey::random(&mut OsRng);
        let csr = self.build_with(&signing_key)?;
        debug!(environment = self.environment.as_str(), "generated CSR");
        Ok(GeneratedCsr { csr, signing_key })
    }

    fn build_with(&self, signer: &SigningKey) -> Result<CertReq, CsrError> {
        let subject = self.subject()?;
        let template_extension = self.environment.to_extension()?;
        let san_extension = self.san_extension()?;

        let mut builder =
            RequestBuilder::new(subject, signer).map_err(|e| CsrError::RequestBuild {
                message: e.to_string(),
            })?;
        builder
            .add_extension(&template_extension)
            .map_err(|e| CsrError::AddExtension {
                which: "TemplateName",
                message: e.to_string(),
            })?;
        builder
            .add_extension(&san_extension)
            .map_err(|e| CsrError::AddExtension {
                which: "SubjectAltName",
                message: e.to_string(),
            })?;
        builder
            .build::<DerSignature>()
            .map_err(|e| CsrError::CsrBuild {
                message: e.to_string(),
            })
    }
}

/// The generated request and its private key, ready for export.
pub struct GeneratedCsr {
    csr: CertReq,
    signing_key: SigningKey,
}

impl GeneratedCsr {
    pub fn csr(&self) -> &CertReq {
        &self.csr
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn csr_der(&self) -> Result<Vec<u8>, CsrError> {
        self.csr.to_der().map_err(|e| CsrError::DerEncode {
            context: "certificate request",
            source: e,
        })
    }

    pub fn csr_pem(&self) -> Result<String, CsrError> {
        self.csr
            .to_pem(LineEnding::LF)
            .map_err(|e| CsrError::DerEncode {
                context: "certificate request (PEM)",
                source: e,
            })
    }

    /// Base64 of the DER request, the form the onboarding API accepts.
    pub fn csr_base64(&self) -> Result<String, CsrError> {
        Ok(Base64::encode_string(&self.csr_der()?))
    }

    pub fn private_key_pem(&self) -> Result<String, CsrError> {
        let pem = self
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CsrError::KeyExport {
                message: e.to_string(),
            })?;
        Ok(pem.to_string())
    }

    pub fn save(
        &self,
        storage: &Storage,
        csr_path: &str,
        key_path: &str,
    ) -> Result<(), CsrError> {
        storage.put(csr_path, self.csr_pem()?.as_bytes())?;
        storage.put(key_path, self.private_key_pem()?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> CsrBuilder {
        CsrBuilder::new()
            .common_name("My Device")
            .organization_name("My Company")
            .organization_unit_name("IT Department")
            .organization_identifier("312345678901233")
            .serial_number("Saleh", "1n", "SME00023")
            .location_address("Riyadh 1234 Street")
            .business_category("Technology")
    }

    #[test]
    fn builds_with_defaults() {
        let request = builder().build().unwrap();
        assert_eq!(request.country_name, "SA");
        assert_eq!(request.invoice_type, 1100);
        assert_eq!(request.serial_number, "1-Saleh|2-1n|3-SME00023");
    }

    #[test]
    fn missing_field_is_named() {
        let result = CsrBuilder::new().common_name("x").build();
        match result {
            Err(CsrError::MissingField { field }) => {
                assert_eq!(field, "organization_name");
            }
            other => panic!("expected MissingField, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn organization_identifier_pattern_is_enforced() {
        for bad in ["123456789012345", "31234567890123", "3123456789012a3"] {
            assert!(matches!(
                builder().organization_identifier(bad).build(),
                Err(CsrError::InvalidOrganizationIdentifier { .. })
            ));
        }
        assert!(builder().organization_identifier("312345678901233").build().is_ok());
    }

    #[test]
    fn country_code_must_be_two_letters() {
        assert!(matches!(
            builder().country_name("SAU").build(),
            Err(CsrError::InvalidCountryCode { .. })
        ));
        assert!(matches!(
            builder().country_name("S1").build(),
            Err(CsrError::InvalidCountryCode { .. })
        ));
        let request = builder().country_name("sa").build().unwrap();
        assert_eq!(request.country_name, "SA");
    }

    #[test]
    fn invoice_type_range_is_enforced() {
        assert!(matches!(
            builder().invoice_type(10000).build(),
            Err(CsrError::InvalidInvoiceType { value: 10000 })
        ));
        assert!(builder().invoice_type(100).build().is_ok());
    }

    #[test]
    fn sanitize_strips_dn_separators() {
        assert_eq!(sanitize("Acme, Inc. <CN=evil>"), "Acme Inc CNevil");
        assert_eq!(sanitize("  plain-name_1  "), "plain-name_1");
    }

    #[test]
    fn template_marker_tracks_environment() {
        assert_eq!(
            EnvironmentType::NonProduction.template_name(),
            "TSTZATCA-Code-Signing"
        );
        assert_eq!(
            EnvironmentType::Simulation.template_name(),
            "PREZATCA-Code-Signing"
        );
        assert_eq!(
            EnvironmentType::Production.template_name(),
            "ZATCA-Code-Signing"
        );
    }
}
