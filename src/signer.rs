//! Enveloped XML-DSig signatures over fiscal documents.
//!
//! The authority's schema version (4.00 documents / 1.00 events) mandates
//! plain C14N 1.0 canonicalization, SHA-1 digests and RSA-SHA1 signatures.
//! This is an external compliance constraint: "upgrading" the digest or
//! signature algorithm makes the authority reject the document.
//!
//! Documents rendered by this crate are already in canonical form by
//! construction (no comments, no processing instructions past the prolog,
//! double-quoted attributes in schema order, no inter-tag whitespace), so
//! canonicalization reduces to prolog removal, inter-tag whitespace
//! collapse, empty-element expansion and namespace injection on the
//! referenced element.

use std::sync::Arc;

use base64::prelude::*;
use openssl::hash::MessageDigest;
use openssl::sign::{Signer, Verifier};

use crate::certificate::CertificateMaterial;
use crate::error::{Result, SefazError};

/// XML-DSig namespace.
pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
/// Plain (non-exclusive) C14N 1.0 algorithm identifier.
pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
/// RSA-SHA1 signature algorithm identifier.
pub const RSA_SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
/// SHA-1 digest algorithm identifier.
pub const SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
/// Enveloped-signature transform identifier.
pub const ENVELOPED_TRANSFORM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Document namespace injected on the referenced element when digesting.
pub const NFE_NS: &str = "http://www.portalfiscal.inf.br/nfe";

/// Signs fiscal XML with the tenant's certificate material.
pub struct XmlSigner {
    material: Arc<CertificateMaterial>,
}

impl XmlSigner {
    /// Create a signer over the given material.
    pub fn new(material: Arc<CertificateMaterial>) -> Self {
        Self { material }
    }

    /// Produce an enveloped signature over the element `<referenced_tag>`
    /// carrying an `Id` attribute.
    ///
    /// The signature element is inserted immediately after the referenced
    /// element's closing tag. For a document root block (`infNFe`) that
    /// yields the schema order `infNFe, (infNFeSupl,) Signature` once the
    /// QR supplement is injected between them.
    ///
    /// # Errors
    ///
    /// Returns [`SefazError::Signature`] if the referenced element or its
    /// `Id` attribute is absent; a signature must never target an
    /// unresolvable reference.
    pub fn sign(&self, xml: &str, referenced_tag: &str) -> Result<String> {
        let xml = canonicalize(xml);

        let element = extract_element(&xml, referenced_tag).ok_or_else(|| {
            SefazError::signature(format!("no <{}> element to sign", referenced_tag))
        })?;
        let id = element_id(&element).ok_or_else(|| {
            SefazError::signature(format!("<{}> carries no Id attribute", referenced_tag))
        })?;

        let digest_input = inject_default_ns(&element, NFE_NS);
        let digest = sha1(digest_input.as_bytes())?;
        let digest_b64 = BASE64_STANDARD.encode(digest);

        let signed_info = format!(
            concat!(
                "<SignedInfo xmlns=\"{ns}\">",
                "<CanonicalizationMethod Algorithm=\"{c14n}\"></CanonicalizationMethod>",
                "<SignatureMethod Algorithm=\"{sig}\"></SignatureMethod>",
                "<Reference URI=\"#{id}\">",
                "<Transforms>",
                "<Transform Algorithm=\"{env}\"></Transform>",
                "<Transform Algorithm=\"{c14n}\"></Transform>",
                "</Transforms>",
                "<DigestMethod Algorithm=\"{dig}\"></DigestMethod>",
                "<DigestValue>{value}</DigestValue>",
                "</Reference>",
                "</SignedInfo>"
            ),
            ns = XMLDSIG_NS,
            c14n = C14N_ALGORITHM,
            sig = RSA_SHA1_ALGORITHM,
            env = ENVELOPED_TRANSFORM,
            dig = SHA1_ALGORITHM,
            id = id,
            value = digest_b64,
        );

        let mut signer = Signer::new(MessageDigest::sha1(), &self.material.private_key)
            .map_err(|e| SefazError::signature(format!("signer init: {}", e)))?;
        signer
            .update(signed_info.as_bytes())
            .map_err(|e| SefazError::signature(format!("signer update: {}", e)))?;
        let signature_bytes = signer
            .sign_to_vec()
            .map_err(|e| SefazError::signature(format!("RSA-SHA1 signing failed: {}", e)))?;
        let signature_b64 = BASE64_STANDARD.encode(&signature_bytes);

        let certificate_b64 = self.material.certificate_base64()?;

        // The emitted SignedInfo omits the redundant xmlns (inherited from
        // Signature); the canonical form used for signing declares it.
        let signed_info_inline = signed_info.replace(
            &format!("<SignedInfo xmlns=\"{}\">", XMLDSIG_NS),
            "<SignedInfo>",
        );
        let signature_element = format!(
            concat!(
                "<Signature xmlns=\"{ns}\">",
                "{signed_info}",
                "<SignatureValue>{value}</SignatureValue>",
                "<KeyInfo><X509Data><X509Certificate>{cert}</X509Certificate></X509Data></KeyInfo>",
                "</Signature>"
            ),
            ns = XMLDSIG_NS,
            signed_info = signed_info_inline,
            value = signature_b64,
            cert = certificate_b64,
        );

        let closing = format!("</{}>", referenced_tag);
        let insert_at = xml
            .find(&closing)
            .map(|i| i + closing.len())
            .ok_or_else(|| {
                SefazError::signature(format!("<{}> has no closing tag", referenced_tag))
            })?;

        let mut signed = String::with_capacity(xml.len() + signature_element.len());
        signed.push_str(&xml[..insert_at]);
        signed.push_str(&signature_element);
        signed.push_str(&xml[insert_at..]);
        Ok(signed)
    }

    /// Verify an enveloped signature produced by [`XmlSigner::sign`].
    ///
    /// Recomputes the reference digest over the (signature-free) element
    /// and checks the RSA-SHA1 signature over the canonical `SignedInfo`
    /// against this signer's certificate.
    pub fn verify(&self, signed_xml: &str, referenced_tag: &str) -> Result<bool> {
        let element = extract_element(signed_xml, referenced_tag).ok_or_else(|| {
            SefazError::signature(format!("no <{}> element found", referenced_tag))
        })?;
        let digest_input = inject_default_ns(&element, NFE_NS);
        let expected_digest = BASE64_STANDARD.encode(sha1(digest_input.as_bytes())?);

        let digest_value = tag_text(signed_xml, "DigestValue")
            .ok_or_else(|| SefazError::signature("signature carries no DigestValue"))?;
        if digest_value != expected_digest {
            return Ok(false);
        }

        let signed_info = extract_element(signed_xml, "SignedInfo")
            .ok_or_else(|| SefazError::signature("signature carries no SignedInfo"))?;
        let canonical_signed_info = if signed_info.starts_with("<SignedInfo xmlns=") {
            signed_info
        } else {
            inject_default_ns(&signed_info, XMLDSIG_NS)
        };

        let signature_value = tag_text(signed_xml, "SignatureValue")
            .ok_or_else(|| SefazError::signature("signature carries no SignatureValue"))?;
        let signature_bytes = BASE64_STANDARD.decode(signature_value.as_bytes())?;

        let public_key = self
            .material
            .certificate
            .public_key()
            .map_err(|e| SefazError::signature(format!("public key extraction: {}", e)))?;
        let mut verifier = Verifier::new(MessageDigest::sha1(), &public_key)
            .map_err(|e| SefazError::signature(format!("verifier init: {}", e)))?;
        verifier
            .update(canonical_signed_info.as_bytes())
            .map_err(|e| SefazError::signature(format!("verifier update: {}", e)))?;
        verifier
            .verify(&signature_bytes)
            .map_err(|e| SefazError::signature(format!("verification failed: {}", e)))
    }
}

fn sha1(data: &[u8]) -> Result<Vec<u8>> {
    openssl::hash::hash(MessageDigest::sha1(), data)
        .map(|d| d.to_vec())
        .map_err(|e| SefazError::signature(format!("SHA-1 digest failed: {}", e)))
}

// ---------------------------------------------------------------------------
// Canonicalization helpers
// ---------------------------------------------------------------------------

/// Bring XML into the canonical form used for digesting: strip the BOM and
/// prolog, collapse inter-tag whitespace, expand empty-element tags.
pub fn canonicalize(xml: &str) -> String {
    let stripped = strip_prolog(xml.trim_start_matches('\u{feff}'));
    let collapsed = collapse_inter_tag_whitespace(&stripped);
    expand_empty_elements(&collapsed)
}

/// Remove the `<?xml ...?>` prolog if present.
pub fn strip_prolog(xml: &str) -> String {
    let trimmed = xml.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<?xml") {
        if let Some(end) = rest.find("?>") {
            return rest[end + 2..].trim_start().to_owned();
        }
    }
    trimmed.to_owned()
}

/// Collapse whitespace runs between a closing `>` and the next `<`.
///
/// Whitespace inside text content (between `>` and `<` where the run is
/// not the entire segment) is preserved; fiscal XML carries no mixed
/// content, so a fully-blank segment is always formatting.
pub fn collapse_inter_tag_whitespace(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut segment_start = 0usize;
    let bytes = xml.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'>' {
            out.push_str(&xml[segment_start..=i]);
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'<' {
                // Formatting only: drop the run.
                segment_start = j;
            } else {
                segment_start = i + 1;
            }
            i = segment_start.max(i + 1);
            continue;
        }
        i += 1;
    }
    out.push_str(&xml[segment_start..]);
    out
}

/// Expand `<tag .../>` into `<tag ...></tag>` (C14N requires start/end
/// pairs; the authority also rejects self-closed elements in the signed
/// block).
pub fn expand_empty_elements(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let bytes = xml.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'<' && i + 1 < bytes.len() && bytes[i + 1] != b'/' && bytes[i + 1] != b'?'
            && bytes[i + 1] != b'!'
        {
            // Scan to the matching '>' outside attribute quotes.
            let mut j = i + 1;
            let mut quote: Option<u8> = None;
            while j < bytes.len() {
                match (quote, bytes[j]) {
                    (Some(q), c) if c == q => quote = None,
                    (None, b'"') | (None, b'\'') => quote = Some(bytes[j]),
                    (None, b'>') => break,
                    _ => {}
                }
                j += 1;
            }
            if j < bytes.len() && j > i + 1 && bytes[j - 1] == b'/' {
                let inner = &xml[i + 1..j - 1];
                let name_end = inner
                    .find(|c: char| c.is_ascii_whitespace())
                    .unwrap_or(inner.len());
                let name = &inner[..name_end];
                out.push('<');
                out.push_str(inner.trim_end());
                out.push('>');
                out.push_str("</");
                out.push_str(name);
                out.push('>');
                i = j + 1;
                continue;
            }
        }
        out.push(xml[i..].chars().next().unwrap());
        i += xml[i..].chars().next().unwrap().len_utf8();
    }
    out
}

/// Extract an element (start tag through matching close) by local name.
///
/// Fiscal documents never nest an element inside itself, so the first
/// start tag and the first closing tag delimit the element.
pub fn extract_element(xml: &str, tag: &str) -> Option<String> {
    let start = find_start_tag(xml, tag)?;
    let closing = format!("</{}>", tag);
    let end = xml[start..].find(&closing)? + start + closing.len();
    Some(xml[start..end].to_owned())
}

fn find_start_tag(xml: &str, tag: &str) -> Option<usize> {
    let mut from = 0usize;
    let open = format!("<{}", tag);
    while let Some(pos) = xml[from..].find(&open) {
        let at = from + pos;
        let after = xml.as_bytes().get(at + open.len());
        match after {
            Some(b' ') | Some(b'>') | Some(b'\t') | Some(b'\n') | Some(b'\r') => return Some(at),
            _ => from = at + open.len(),
        }
    }
    None
}

/// Read the `Id` attribute from an element's start tag.
pub fn element_id(element: &str) -> Option<String> {
    let start_end = element.find('>')?;
    let start_tag = &element[..start_end];
    let at = start_tag.find(" Id=\"")?;
    let rest = &start_tag[at + 5..];
    let end = rest.find('"')?;
    Some(rest[..end].to_owned())
}

/// Inject a default namespace declaration into the element's start tag
/// unless one is already present.
pub fn inject_default_ns(element: &str, ns: &str) -> String {
    let Some(start_end) = element.find('>') else {
        return element.to_owned();
    };
    let start_tag = &element[..start_end];
    if start_tag.contains("xmlns=") {
        return element.to_owned();
    }
    let name_end = start_tag[1..]
        .find(|c: char| c.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start_end);
    format!(
        "{} xmlns=\"{}\"{}",
        &element[..name_end],
        ns,
        &element[name_end..]
    )
}

/// Text content of the first occurrence of `<tag>`.
pub fn tag_text(xml: &str, tag: &str) -> Option<String> {
    let start = find_start_tag(xml, tag)?;
    let content_start = xml[start..].find('>')? + start + 1;
    let end = xml[content_start..].find(&format!("</{}>", tag))? + content_start;
    Some(xml[content_start..end].to_owned())
}
