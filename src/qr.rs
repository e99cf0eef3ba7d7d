//! Compliance QR payload: field extraction plus TLV assembly.
//!
//! Readers decode the payload positionally by tag id, so the tag order here
//! is a wire contract: 1 seller name, 2 VAT number, 3 timestamp, 4 total
//! with VAT, 5 VAT total, 6 invoice digest, 7 signature, 8 public key,
//! 9 certificate signature.
use crate::tlv::{Tag, TlvError, TlvList};
use crate::xml::{XmlError, XmlInvoice};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QrCodeError {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Tlv(#[from] TlvError),
    #[error("QR payload exceeds 700 characters once base64 encoded (len={len})")]
    EncodedTooLong { len: usize },
}

#[derive(Debug, Clone)]
pub struct QrPayload {
    seller_name: String,
    seller_vat: String,
    timestamp: String,
    total_with_vat: String,
    total_vat: String,
    invoice_hash: Option<String>,
    signature: Option<String>,
    public_key: Option<Vec<u8>>,
    cert_signature: Option<Vec<u8>>,
}

impl QrPayload {
    /// Pulls the invoice-side fields out of the (already stripped) document.
    pub fn from_document(doc: &XmlInvoice) -> Result<Self, QrCodeError> {
        let seller_name = doc.text_at(
            "//cac:AccountingSupplierParty//cac:PartyLegalEntity/cbc:RegistrationName",
            "seller name",
        )?;
        let seller_vat = doc.text_at(
            "//cac:AccountingSupplierParty//cac:PartyTaxScheme//cbc:CompanyID",
            "seller VAT",
        )?;
        let issue_date = doc.text_at("//cbc:IssueDate", "issue date")?;
        let issue_time = doc.text_at("//cbc:IssueTime", "issue time")?;
        let total_with_vat = doc.text_at(
            "//cac:LegalMonetaryTotal/cbc:TaxInclusiveAmount",
            "total with VAT",
        )?;
        let total_vat = doc.text_at("//cac:TaxTotal/cbc:TaxAmount", "total VAT")?;

        let timestamp = format!("{issue_date}T{}Z", issue_time.trim_end_matches('Z'));
        Ok(Self {
            seller_name,
            seller_vat,
            timestamp,
            total_with_vat,
            total_vat,
            invoice_hash: None,
            signature: None,
            public_key: None,
            cert_signature: None,
        })
    }

    /// Attaches the signing-side fields (tags 6-9).
    pub fn with_signing_parts(
        mut self,
        invoice_hash: &str,
        signature: &str,
        public_key: Vec<u8>,
        cert_signature: Vec<u8>,
    ) -> Self {
        self.invoice_hash = Some(invoice_hash.to_string());
        self.signature = Some(signature.to_string());
        self.public_key = Some(public_key);
        self.cert_signature = Some(cert_signature);
        self
    }

    /// TLV-encodes the payload and wraps it in base64.
    pub fn encode(&self) -> Result<String, QrCodeError> {
        let mut tags = vec![
            Tag::new(1, self.seller_name.as_bytes())?,
            Tag::new(2, self.seller_vat.as_bytes())?,
            Tag::new(3, self.timestamp.as_bytes())?,
            Tag::new(4, self.total_with_vat.as_bytes())?,
            Tag::new(5, self.total_vat.as_bytes())?,
        ];
        if let Some(hash) = self.invoice_hash.as_deref() {
            tags.push(Tag::new(6, hash.as_bytes())?);
        }
        if let Some(signature) = self.signature.as_deref() {
            tags.push(Tag::new(7, signature.as_bytes())?);
        }
        if let Some(public_key) = self.public_key.as_deref() {
            tags.push(Tag::new(8, public_key)?);
        }
        if let Some(cert_signature) = self.cert_signature.as_deref() {
            tags.push(Tag::new(9, cert_signature)?);
        }

        let encoded = TlvList::from_tags(tags)?.to_base64();
        if encoded.len() > 700 {
            return Err(QrCodeError::EncodedTooLong { len: encoded.len() });
        }
        Ok(encoded)
    }
}
