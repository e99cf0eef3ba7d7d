//! Signing pipeline: strip placeholders, hash, sign, then splice the
//! signature extension and QR reference back into the rendered document.
//!
//! The canonical bytes are computed on the stripped tree, so signing an
//! already-signed invoice removes the previous blocks first and produces
//! the same digest as signing the pristine input.
use crate::certificate::{hex_base64, CertificateError, CertificateMaterial};
use crate::qr::{QrCodeError, QrPayload};
use crate::storage::{Storage, StorageError};
use crate::xml::{XmlError, XmlInvoice};
use base64ct::{Base64, Encoding};
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Qr(#[from] QrCodeError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("splice anchor '{anchor}' not found in invoice XML")]
    AnchorNotFound { anchor: &'static str },
    #[error("invalid invoice timestamp '{value}': {message}")]
    InvalidTimestamp { value: String, message: String },
}

const PROFILE_ANCHOR: &str = "<cbc:ProfileID>";
const SUPPLIER_ANCHOR: &str = "<cac:AccountingSupplierParty>";

const UBL_EXTENSIONS_XPATH: &str = "//ext:UBLExtensions";
const SIGNATURE_XPATH: &str = "//cac:Signature";
const QR_ID_XPATH: &str =
    "//cac:AdditionalDocumentReference/cbc:ID[normalize-space(text())='QR']";

/// Signs invoices with a fixed [`CertificateMaterial`]. One signer can sign
/// any number of invoices; each call owns its own document state.
pub struct InvoiceSigner {
    certificate: CertificateMaterial,
}

impl InvoiceSigner {
    pub fn new(certificate: CertificateMaterial) -> Self {
        Self { certificate }
    }

    pub fn certificate(&self) -> &CertificateMaterial {
        &self.certificate
    }

    /// Runs the full pipeline over `xml` and returns the signed document
    /// with its derived values. Deterministic: the signature scheme is
    /// RFC 6979 and the signing time comes from the invoice itself, so
    /// identical input always yields identical output.
    pub fn sign(&self, xml: &str) -> Result<SignedInvoice, SigningError> {
        let mut doc = XmlInvoice::parse(xml)?;

        let removed = doc.remove_nodes(UBL_EXTENSIONS_XPATH)?
            + doc.remove_nodes(SIGNATURE_XPATH)?
            + doc.remove_parents_of(QR_ID_XPATH)?;
        debug!(removed, "stripped signature placeholders");

        let digest = doc.digest()?;
        let invoice_hash = Base64::encode_string(&digest);
        let signature = Base64::encode_string(&self.certificate.sign(&digest)?);
        debug!(%invoice_hash, "computed invoice digest and signature");

        let signing_time = issue_datetime(&doc)?;
        let signed_props = signed_properties_xml(
            &signing_time.format("%Y-%m-%dT%H:%M:%S").to_string(),
            &self.certificate.digest(),
            &self.certificate.formatted_issuer(),
            &self.certificate.serial_decimal(),
        );
        let signed_props_hash = hex_base64(&Sha256::digest(signed_props.as_bytes()));

        let extension = extension_block(
            &invoice_hash,
            &signature,
            self.certificate.raw_certificate(),
            &signed_props,
            &signed_props_hash,
        );

        let qr_code = QrPayload::from_document(&doc)?
            .with_signing_parts(
                &invoice_hash,
                &signature,
                self.certificate.public_key_der()?,
                self.certificate.cert_signature(),
            )
            .encode()?;
        debug!(qr_len = qr_code.len(), "encoded QR payload");

        let rendered = doc.render();
        let spliced = splice_before(
            &rendered,
            PROFILE_ANCHOR,
            &format!("<ext:UBLExtensions>{extension}</ext:UBLExtensions>\n    "),
        )?;
        let spliced = splice_before(
            &spliced,
            SUPPLIER_ANCHOR,
            &format!("{}\n    ", qr_and_signature_node(&qr_code)),
        )?;

        Ok(SignedInvoice {
            xml: strip_blank_lines(&spliced),
            invoice_hash,
            signature,
            qr_code,
            certificate: self.certificate.clone(),
        })
    }
}

/// A signed invoice and the values derived while signing it. Immutable.
#[derive(Debug, Clone)]
pub struct SignedInvoice {
    xml: String,
    invoice_hash: String,
    signature: String,
    qr_code: String,
    certificate: CertificateMaterial,
}

impl SignedInvoice {
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Base64 SHA-256 of the canonical stripped document.
    pub fn invoice_hash(&self) -> &str {
        &self.invoice_hash
    }

    /// Base64 DER ECDSA signature over the invoice digest.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Base64 TLV QR payload.
    pub fn qr_code(&self) -> &str {
        &self.qr_code
    }

    pub fn certificate(&self) -> &CertificateMaterial {
        &self.certificate
    }

    pub fn save(&self, storage: &Storage, path: &str) -> Result<(), SigningError> {
        storage.put(path, self.xml.as_bytes())?;
        Ok(())
    }
}

/// Signing time is `{IssueDate}T{IssueTime}` from the document, not the
/// wall clock, so re-signing the same invoice reproduces the same bytes.
fn issue_datetime(doc: &XmlInvoice) -> Result<NaiveDateTime, SigningError> {
    let issue_date = doc.text_at("//cbc:IssueDate", "issue date")?;
    let issue_time = doc.text_at("//cbc:IssueTime", "issue time")?;
    let value = format!("{issue_date}T{}", issue_time.trim_end_matches('Z'));
    NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S").map_err(|e| {
        SigningError::InvalidTimestamp {
            value,
            message: e.to_string(),
        }
    })
}

/// The XAdES signed-properties fragment. Its digest is computed over this
/// exact text, indentation included, so the authority can re-derive the
/// same hash from the embedded copy. Never reformat.
fn signed_properties_xml(
    signing_time: &str,
    cert_digest: &str,
    issuer: &str,
    serial: &str,
) -> String {
    format!(
        r#"<xades:SignedProperties xmlns:xades="http://uri.etsi.org/01903/v1.3.2#" Id="xadesSignedProperties">
                                    <xades:SignedSignatureProperties>
                                        <xades:SigningTime>{signing_time}</xades:SigningTime>
                                        <xades:SigningCertificate>
                                            <xades:Cert>
                                                <xades:CertDigest>
                                                    <ds:DigestMethod xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>
                                                    <ds:DigestValue xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{cert_digest}</ds:DigestValue>
                                                </xades:CertDigest>
                                                <xades:IssuerSerial>
                                                    <ds:X509IssuerName xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{issuer}</ds:X509IssuerName>
                                                    <ds:X509SerialNumber xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{serial}</ds:X509SerialNumber>
                                                </xades:IssuerSerial>
                                            </xades:Cert>
                                        </xades:SigningCertificate>
                                    </xades:SignedSignatureProperties>
                                </xades:SignedProperties>"#
    )
}

/// The content of the `ext:UBLExtensions` block: one extension holding the
/// enveloped XAdES signature. `signed_props` is embedded verbatim so the
/// text that was hashed is the text that ships.
fn extension_block(
    invoice_hash: &str,
    signature: &str,
    raw_certificate: &str,
    signed_props: &str,
    signed_props_hash: &str,
) -> String {
    format!(
        r##"
        <ext:UBLExtension>
            <ext:ExtensionURI>urn:oasis:names:specification:ubl:dsig:enveloped:xades</ext:ExtensionURI>
            <ext:ExtensionContent>
                <sig:UBLDocumentSignatures xmlns:sig="urn:oasis:names:specification:ubl:schema:xsd:CommonSignatureComponents-2" xmlns:sac="urn:oasis:names:specification:ubl:schema:xsd:SignatureAggregateComponents-2" xmlns:sbc="urn:oasis:names:specification:ubl:schema:xsd:SignatureBasicComponents-2">
                    <sac:SignatureInformation>
                        <cbc:ID>urn:oasis:names:specification:ubl:signature:1</cbc:ID>
                        <sbc:ReferencedSignatureID>urn:oasis:names:specification:ubl:signature:Invoice</sbc:ReferencedSignatureID>
                        <ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Id="signature">
                            <ds:SignedInfo>
                                <ds:CanonicalizationMethod Algorithm="http://www.w3.org/2006/12/xml-c14n11"/>
                                <ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"/>
                                <ds:Reference Id="invoiceSignedData" URI="">
                                    <ds:Transforms>
                                        <ds:Transform Algorithm="http://www.w3.org/TR/1999/REC-xpath-19991116">
                                            <ds:XPath>not(//ancestor-or-self::ext:UBLExtensions)</ds:XPath>
                                        </ds:Transform>
                                        <ds:Transform Algorithm="http://www.w3.org/TR/1999/REC-xpath-19991116">
                                            <ds:XPath>not(//ancestor-or-self::cac:Signature)</ds:XPath>
                                        </ds:Transform>
                                        <ds:Transform Algorithm="http://www.w3.org/TR/1999/REC-xpath-19991116">
                                            <ds:XPath>not(//ancestor-or-self::cac:AdditionalDocumentReference[cbc:ID='QR'])</ds:XPath>
                                        </ds:Transform>
                                        <ds:Transform Algorithm="http://www.w3.org/2006/12/xml-c14n11"/>
                                    </ds:Transforms>
                                    <ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>
                                    <ds:DigestValue>{invoice_hash}</ds:DigestValue>
                                </ds:Reference>
                                <ds:Reference Type="http://www.w3.org/2000/09/xmldsig#SignatureProperties" URI="#xadesSignedProperties">
                                    <ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>
                                    <ds:DigestValue>{signed_props_hash}</ds:DigestValue>
                                </ds:Reference>
                            </ds:SignedInfo>
                            <ds:SignatureValue>{signature}</ds:SignatureValue>
                            <ds:KeyInfo>
                                <ds:X509Data>
                                    <ds:X509Certificate>{raw_certificate}</ds:X509Certificate>
                                </ds:X509Data>
                            </ds:KeyInfo>
                            <ds:Object>
                                <xades:QualifyingProperties xmlns:xades="http://uri.etsi.org/01903/v1.3.2#" Target="signature">
                                    {signed_props}
                                </xades:QualifyingProperties>
                            </ds:Object>
                        </ds:Signature>
                    </sac:SignatureInformation>
                </sig:UBLDocumentSignatures>
            </ext:ExtensionContent>
        </ext:UBLExtension>
    "##
    )
}

/// The QR document reference plus the `cac:Signature` stub that points at
/// the enveloped signature.
fn qr_and_signature_node(qr_code: &str) -> String {
    format!(
        r#"<cac:AdditionalDocumentReference>
        <cbc:ID>QR</cbc:ID>
        <cac:Attachment>
            <cbc:EmbeddedDocumentBinaryObject mimeCode="text/plain">{qr_code}</cbc:EmbeddedDocumentBinaryObject>
        </cac:Attachment>
    </cac:AdditionalDocumentReference>
    <cac:Signature>
        <cbc:ID>urn:oasis:names:specification:ubl:signature:Invoice</cbc:ID>
        <cbc:SignatureMethod>urn:oasis:names:specification:ubl:dsig:enveloped:xades</cbc:SignatureMethod>
    </cac:Signature>"#
    )
}

/// Inserts `fragment` immediately before the first occurrence of `anchor`.
/// A missing anchor is an error: splicing must never silently produce a
/// document without its signature blocks.
fn splice_before(
    xml: &str,
    anchor: &'static str,
    fragment: &str,
) -> Result<String, SigningError> {
    if !xml.contains(anchor) {
        return Err(SigningError::AnchorNotFound { anchor });
    }
    Ok(xml.replacen(anchor, &format!("{fragment}{anchor}"), 1))
}

fn strip_blank_lines(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    for line in xml.lines() {
        if line.trim().is_empty() {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_inserts_before_first_anchor_only() {
        let xml = "<a>\n    <cbc:ProfileID>x</cbc:ProfileID>\n    <cbc:ProfileID>y</cbc:ProfileID>\n</a>";
        let out = splice_before(xml, PROFILE_ANCHOR, "<ins/>\n    ").unwrap();
        assert_eq!(out.matches("<ins/>").count(), 1);
        assert!(out.find("<ins/>").unwrap() < out.find("<cbc:ProfileID>").unwrap());
    }

    #[test]
    fn splice_fails_on_missing_anchor() {
        match splice_before("<a/>", SUPPLIER_ANCHOR, "<ins/>") {
            Err(SigningError::AnchorNotFound { anchor }) => {
                assert_eq!(anchor, SUPPLIER_ANCHOR);
            }
            other => panic!("expected AnchorNotFound, got {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_stripped() {
        let spliced = "<a>\n\n  \t\n  <b/>\n\n</a>\n";
        assert_eq!(strip_blank_lines(spliced), "<a>\n  <b/>\n</a>\n");
    }

    #[test]
    fn issue_datetime_rejects_garbage() {
        let xml = r#"<?xml version="1.0"?>
<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2" xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
  <cbc:IssueDate>not-a-date</cbc:IssueDate>
  <cbc:IssueTime>12:00:00</cbc:IssueTime>
</Invoice>"#;
        let doc = XmlInvoice::parse(xml).unwrap();
        match issue_datetime(&doc) {
            Err(SigningError::InvalidTimestamp { value, .. }) => {
                assert_eq!(value, "not-a-dateT12:00:00");
            }
            other => panic!("expected InvalidTimestamp, got {other:?}"),
        }
    }

    #[test]
    fn issue_datetime_tolerates_trailing_z() {
        let xml = r#"<?xml version="1.0"?>
<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2" xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
  <cbc:IssueDate>2024-01-01</cbc:IssueDate>
  <cbc:IssueTime>12:30:00Z</cbc:IssueTime>
</Invoice>"#;
        let doc = XmlInvoice::parse(xml).unwrap();
        let time = issue_datetime(&doc).unwrap();
        assert_eq!(time.format("%Y-%m-%dT%H:%M:%S").to_string(), "2024-01-01T12:30:00");
    }

    #[test]
    fn signed_properties_fragment_is_stable() {
        let a = signed_properties_xml("2024-01-01T12:30:00", "digest==", "CN=eInvoicing", "42");
        let b = signed_properties_xml("2024-01-01T12:30:00", "digest==", "CN=eInvoicing", "42");
        assert_eq!(a, b);
        assert!(a.contains("xmlns:xades=\"http://uri.etsi.org/01903/v1.3.2#\""));
        assert!(a.contains(
            "<ds:DigestValue xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">digest==</ds:DigestValue>"
        ));
        assert!(a.contains("<xades:SigningTime>2024-01-01T12:30:00</xades:SigningTime>"));
    }
}
