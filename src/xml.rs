//! Mutable invoice document with canonical serialization.
//!
//! Wraps a `libxml` tree. The signing pipeline owns exactly one of these per
//! run: parse, strip the signature placeholders, canonicalize, hash, then
//! render for textual splicing.
use libxml::{
    parser::Parser,
    tree::{c14n, Document},
    xpath,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub(crate) const INVOICE_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub(crate) const CBC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
pub(crate) const CAC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub(crate) const EXT_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2";
pub(crate) const SIG_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonSignatureComponents-2";
pub(crate) const SAC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:SignatureAggregateComponents-2";
pub(crate) const SBC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:SignatureBasicComponents-2";
pub(crate) const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub(crate) const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("failed to parse invoice XML: {0}")]
    Parse(String),
    #[error("XPath context error: {0}")]
    Context(String),
    #[error("XPath evaluation failed for '{expr}'")]
    Evaluate { expr: String },
    #[error("missing {label} in invoice XML")]
    MissingValue { label: &'static str },
    #[error("empty {label} in invoice XML")]
    EmptyValue { label: &'static str },
    #[error("failed to duplicate document: {0}")]
    Duplicate(String),
    #[error("failed to canonicalize invoice XML: {0}")]
    Canonicalize(String),
}

/// An exclusively-owned, mutable invoice document.
pub struct XmlInvoice {
    doc: Document,
}

impl XmlInvoice {
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let doc = Parser::default()
            .parse_string(xml)
            .map_err(|e| XmlError::Parse(format!("{e:?}")))?;
        Ok(Self { doc })
    }

    /// Unlinks every node matched by `expr`. Zero matches is not an error,
    /// so repeating the same removal is a no-op.
    pub fn remove_nodes(&mut self, expr: &str) -> Result<usize, XmlError> {
        let nodes = self.evaluate(expr)?;
        let removed = nodes.len();
        for mut node in nodes {
            node.unlink();
        }
        Ok(removed)
    }

    /// Unlinks the parent of every node matched by `expr`. Used to delete a
    /// placeholder block identified by one child's content, e.g. the QR
    /// document reference whose `cbc:ID` equals `QR`.
    pub fn remove_parents_of(&mut self, expr: &str) -> Result<usize, XmlError> {
        let nodes = self.evaluate(expr)?;
        let mut removed = 0;
        for node in nodes {
            if let Some(mut parent) = node.get_parent() {
                parent.unlink();
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Exclusive C14N without comments over a duplicate of the tree. The
    /// mode is a compatibility constant: the authority hashes the same
    /// serialization, so attribute order and insignificant whitespace must
    /// never leak into the bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, XmlError> {
        let copy = self
            .doc
            .dup()
            .map_err(|e| XmlError::Duplicate(format!("{e:?}")))?;
        let options = c14n::CanonicalizationOptions {
            mode: c14n::CanonicalizationMode::ExclusiveCanonical1_0,
            inclusive_ns_prefixes: vec![],
            with_comments: false,
        };
        let canonical = copy
            .canonicalize(options, None)
            .map_err(|e| XmlError::Canonicalize(format!("{e:?}")))?;
        Ok(canonical.into_bytes())
    }

    /// SHA-256 of [`Self::canonical_bytes`].
    pub fn digest(&self) -> Result<Vec<u8>, XmlError> {
        Ok(Sha256::digest(self.canonical_bytes()?).to_vec())
    }

    /// The document's serialized form, used only for textual splicing of
    /// the signature fragments, never for hashing.
    pub fn render(&self) -> String {
        self.doc.to_string()
    }

    /// Trimmed text of the first node matching `expr`.
    pub fn text_at(&self, expr: &str, label: &'static str) -> Result<String, XmlError> {
        let nodes = self.evaluate(expr)?;
        let node = nodes
            .first()
            .ok_or(XmlError::MissingValue { label })?;
        let value = node.get_content().trim().to_string();
        if value.is_empty() {
            return Err(XmlError::EmptyValue { label });
        }
        Ok(value)
    }

    fn evaluate(&self, expr: &str) -> Result<Vec<libxml::tree::Node>, XmlError> {
        let ctx = self.context()?;
        Ok(ctx
            .evaluate(expr)
            .map_err(|_| XmlError::Evaluate {
                expr: expr.to_string(),
            })?
            .get_nodes_as_vec())
    }

    fn context(&self) -> Result<xpath::Context, XmlError> {
        let ctx = xpath::Context::new(&self.doc)
            .map_err(|e| XmlError::Context(format!("{e:?}")))?;
        for (prefix, ns) in [
            ("ubl", INVOICE_NS),
            ("cbc", CBC_NS),
            ("cac", CAC_NS),
            ("ext", EXT_NS),
            ("sig", SIG_NS),
            ("sac", SAC_NS),
            ("sbc", SBC_NS),
            ("ds", DS_NS),
            ("xades", XADES_NS),
        ] {
            ctx.register_namespace(prefix, ns)
                .map_err(|e| XmlError::Context(format!("{e:?}")))?;
        }
        Ok(ctx)
    }
}
