// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 The sefaz-client Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Structural validation of rendered and received documents.
//!
//! Authorities reject documents for structural reasons a schema validator
//! does not always catch locally: blocks out of order, self-closed empty
//! elements inside the signed block (an artifact of some third-party XML
//! writers), missing namespaces, or a digest algorithm the schema version
//! does not accept. This module re-parses the XML and checks those
//! invariants, returning a report instead of failing, so callers can
//! decide what is fatal.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::DocumentModel;
use crate::error::Result;
use crate::signer::{NFE_NS, SHA1_ALGORITHM};

/// Outcome of a structural validation pass.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// True when every check passed.
    pub ok: bool,
    /// First violation, when not ok.
    pub error: Option<String>,
    /// Every violation found, in document order.
    pub details: Vec<String>,
}

impl ValidationReport {
    fn passed() -> Self {
        Self {
            ok: true,
            error: None,
            details: Vec::new(),
        }
    }

    fn failed(details: Vec<String>) -> Self {
        Self {
            ok: false,
            error: details.first().cloned(),
            details,
        }
    }
}

/// What the validator should expect from the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationContext {
    /// Require an enveloped signature with the mandated digest algorithm.
    pub require_signature: bool,
}

/// Blocks the consumer model (65) must not carry.
const NFCE_PROHIBITED: &[&str] = &["transporta", "retTransp", "veicTransp", "reboque", "vol", "cobr", "dup"];

/// Expected order of `infNFe` children. `det` repeats; optional blocks
/// may be absent but never reordered.
const BLOCK_ORDER: &[(&str, bool)] = &[
    ("ide", true),
    ("emit", true),
    ("avulsa", false),
    ("dest", false),
    ("retirada", false),
    ("entrega", false),
    ("autXML", false),
    ("det", true),
    ("total", true),
    ("transp", true),
    ("cobr", false),
    ("pag", true),
    ("infIntermed", false),
    ("infAdic", false),
    ("exporta", false),
    ("compra", false),
    ("cana", false),
    ("infRespTec", false),
];

/// Validate a document's structure.
///
/// # Errors
///
/// Returns `Err` only for parser-level malformed XML; every expected
/// structural violation lands in the returned report.
pub fn validate(xml: &str, context: ValidationContext) -> Result<ValidationReport> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut violations: Vec<String> = Vec::new();

    let mut root_ns: Option<String> = None;
    let mut inf_children: Vec<String> = Vec::new();
    let mut inf_descendants: Vec<String> = Vec::new();
    let mut model: Option<DocumentModel> = None;
    let mut saw_signature = false;
    let mut digest_algorithm: Option<String> = None;
    let mut qr_code: Option<String> = None;
    let mut url_chave: Option<String> = None;
    let mut saw_supplement = false;
    let mut pending_text_of: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

                if root_ns.is_none() && (name == "NFe" || name == "nfeProc") {
                    // The namespace must be declared on the document root
                    // (or the authorization wrapper around it).
                    let xmlns = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"xmlns")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                    root_ns = Some(xmlns.unwrap_or_default());
                }

                if stack.last().map(String::as_str) == Some("infNFe") {
                    inf_children.push(name.clone());
                }
                if stack.iter().any(|s| s == "infNFe") {
                    inf_descendants.push(name.clone());
                }
                match name.as_str() {
                    "Signature" => saw_signature = true,
                    "infNFeSupl" => saw_supplement = true,
                    "mod" | "qrCode" | "urlChave" => pending_text_of = Some(name.clone()),
                    "DigestMethod" => {
                        digest_algorithm = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"Algorithm")
                            .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                    }
                    _ => {}
                }

                stack.push(name);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if stack.iter().any(|s| s == "infNFe" || s == "infNFeSupl") {
                    violations.push(format!(
                        "self-closing <{}/> inside the signed block",
                        name
                    ));
                }
                if name == "DigestMethod" {
                    digest_algorithm = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"Algorithm")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                }
                if stack.last().map(String::as_str) == Some("infNFe") {
                    inf_children.push(name.clone());
                }
                if stack.iter().any(|s| s == "infNFe") {
                    inf_descendants.push(name);
                }
            }
            Event::Text(t) => {
                if let Some(tag) = pending_text_of.take() {
                    let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                    match tag.as_str() {
                        "mod" => model = DocumentModel::from_code(text.trim()),
                        "qrCode" => qr_code = Some(text),
                        "urlChave" => url_chave = Some(text),
                        _ => {}
                    }
                }
            }
            Event::CData(t) => {
                if let Some(tag) = pending_text_of.take() {
                    let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                    match tag.as_str() {
                        "qrCode" => qr_code = Some(text),
                        "urlChave" => url_chave = Some(text),
                        _ => {}
                    }
                }
            }
            Event::End(_) => {
                pending_text_of = None;
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(crate::error::SefazError::structural(format!(
            "malformed XML: <{}> never closed",
            stack.last().expect("stack is non-empty")
        )));
    }

    match root_ns.as_deref() {
        None => violations.push("document has no NFe root element".to_owned()),
        Some(NFE_NS) => {}
        Some(other) => violations.push(format!(
            "wrong root namespace '{}', expected '{}'",
            other, NFE_NS
        )),
    }

    check_block_order(&inf_children, &mut violations);

    if model == Some(DocumentModel::Nfce) {
        for name in &inf_descendants {
            if NFCE_PROHIBITED.contains(&name.as_str()) {
                violations.push(format!("block <{}> is prohibited in NFC-e", name));
            }
        }

        if saw_supplement {
            check_qr_field("qrCode", qr_code.as_deref(), &mut violations);
            check_qr_field("urlChave", url_chave.as_deref(), &mut violations);
        } else if saw_signature {
            // The supplement is injected after signing; a signed NFC-e
            // without it will not render a scannable DANFE.
            violations.push("signed NFC-e carries no infNFeSupl".to_owned());
        }
    }

    if context.require_signature {
        if !saw_signature {
            violations.push("document carries no enveloped signature".to_owned());
        } else {
            match digest_algorithm.as_deref() {
                Some(SHA1_ALGORITHM) => {}
                Some(other) => violations.push(format!(
                    "digest algorithm '{}' differs from the mandated '{}'",
                    other, SHA1_ALGORITHM
                )),
                None => violations.push("signature carries no DigestMethod".to_owned()),
            }
        }
    }

    if violations.is_empty() {
        Ok(ValidationReport::passed())
    } else {
        Ok(ValidationReport::failed(violations))
    }
}

fn check_block_order(children: &[String], violations: &mut Vec<String>) {
    if children.is_empty() {
        violations.push("infNFe block is empty or absent".to_owned());
        return;
    }

    let rank_of = |name: &str| BLOCK_ORDER.iter().position(|(n, _)| *n == name);

    let mut last_rank = 0usize;
    let mut seen = vec![false; BLOCK_ORDER.len()];
    for child in children {
        match rank_of(child) {
            Some(rank) => {
                if rank < last_rank {
                    violations.push(format!(
                        "block <{}> appears after <{}>, out of schema order",
                        child, BLOCK_ORDER[last_rank].0
                    ));
                }
                seen[rank] = true;
                last_rank = rank.max(last_rank);
            }
            None => violations.push(format!("unknown block <{}> inside infNFe", child)),
        }
    }

    for (index, (name, required)) in BLOCK_ORDER.iter().enumerate() {
        if *required && !seen[index] {
            violations.push(format!("mandatory block <{}> is missing", name));
        }
    }
}

fn check_qr_field(name: &str, value: Option<&str>, violations: &mut Vec<String>) {
    match value {
        None => violations.push(format!("QR supplement field <{}> is empty", name)),
        Some(text) if text.trim().is_empty() => {
            violations.push(format!("QR supplement field <{}> is empty", name))
        }
        Some(text) if text.trim() != text => violations.push(format!(
            "QR supplement field <{}> carries incidental whitespace",
            name
        )),
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::document::test_support::{form, key_for};
    use crate::document::DocumentBuilder;

    fn rendered(model: DocumentModel) -> String {
        let form = form(model);
        let key = key_for(&form);
        DocumentBuilder::new(Environment::Homologation, None)
            .render(&form, &key)
            .unwrap()
    }

    #[test]
    fn test_builder_output_round_trips() {
        let report = validate(&rendered(DocumentModel::Nfe), ValidationContext::default()).unwrap();
        assert!(report.ok, "{:?}", report.details);
    }

    #[test]
    fn test_nfce_builder_output_round_trips() {
        // Unsigned NFC-e: no supplement expected yet.
        let report =
            validate(&rendered(DocumentModel::Nfce), ValidationContext::default()).unwrap();
        assert!(report.ok, "{:?}", report.details);
    }

    #[test]
    fn test_out_of_order_blocks_flagged() {
        let xml = format!(
            "<NFe xmlns=\"{}\"><infNFe Id=\"NFe1\"><emit></emit><ide></ide>\
             <det nItem=\"1\"></det><total></total><transp></transp><pag></pag></infNFe></NFe>",
            NFE_NS
        );
        let report = validate(&xml, ValidationContext::default()).unwrap();
        assert!(!report.ok);
        assert!(report
            .details
            .iter()
            .any(|d| d.contains("out of schema order")));
    }

    #[test]
    fn test_missing_mandatory_block_flagged() {
        let xml = format!(
            "<NFe xmlns=\"{}\"><infNFe Id=\"NFe1\"><ide></ide><emit></emit>\
             <det nItem=\"1\"></det><total></total><transp></transp></infNFe></NFe>",
            NFE_NS
        );
        let report = validate(&xml, ValidationContext::default()).unwrap();
        assert!(report.details.iter().any(|d| d.contains("<pag>")));
    }

    #[test]
    fn test_self_closing_inside_signed_block_flagged() {
        let xml = format!(
            "<NFe xmlns=\"{}\"><infNFe Id=\"NFe1\"><ide><cNF/></ide><emit></emit>\
             <det nItem=\"1\"></det><total></total><transp></transp><pag></pag></infNFe></NFe>",
            NFE_NS
        );
        let report = validate(&xml, ValidationContext::default()).unwrap();
        assert!(report
            .details
            .iter()
            .any(|d| d.contains("self-closing")), "{:?}", report.details);
    }

    #[test]
    fn test_wrong_namespace_flagged() {
        let xml = "<NFe xmlns=\"http://example.com/errado\"><infNFe Id=\"NFe1\"><ide></ide>\
                   <emit></emit><det nItem=\"1\"></det><total></total><transp></transp>\
                   <pag></pag></infNFe></NFe>";
        let report = validate(xml, ValidationContext::default()).unwrap();
        assert!(report.details.iter().any(|d| d.contains("namespace")));
    }

    #[test]
    fn test_nfce_prohibited_blocks_flagged() {
        let xml = format!(
            "<NFe xmlns=\"{}\"><infNFe Id=\"NFe1\"><ide><mod>65</mod></ide><emit></emit>\
             <det nItem=\"1\"></det><total></total><transp></transp><cobr></cobr>\
             <pag></pag></infNFe></NFe>",
            NFE_NS
        );
        let report = validate(&xml, ValidationContext::default()).unwrap();
        assert!(report
            .details
            .iter()
            .any(|d| d.contains("prohibited in NFC-e")), "{:?}", report.details);
    }

    #[test]
    fn test_qr_whitespace_flagged() {
        let xml = format!(
            "<NFe xmlns=\"{}\"><infNFe Id=\"NFe1\"><ide><mod>65</mod></ide><emit></emit>\
             <det nItem=\"1\"></det><total></total><transp></transp><pag></pag></infNFe>\
             <infNFeSupl><qrCode> https://qr?p=x </qrCode><urlChave>https://consulta</urlChave>\
             </infNFeSupl></NFe>",
            NFE_NS
        );
        let report = validate(&xml, ValidationContext::default()).unwrap();
        assert!(report
            .details
            .iter()
            .any(|d| d.contains("incidental whitespace")), "{:?}", report.details);
    }

    #[test]
    fn test_signature_digest_algorithm_checked() {
        let xml = format!(
            "<NFe xmlns=\"{}\"><infNFe Id=\"NFe1\"><ide></ide><emit></emit>\
             <det nItem=\"1\"></det><total></total><transp></transp><pag></pag></infNFe>\
             <Signature><SignedInfo><DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"></DigestMethod>\
             </SignedInfo></Signature></NFe>",
            NFE_NS
        );
        let report = validate(
            &xml,
            ValidationContext {
                require_signature: true,
            },
        )
        .unwrap();
        assert!(report
            .details
            .iter()
            .any(|d| d.contains("digest algorithm")), "{:?}", report.details);
    }

    #[test]
    fn test_missing_signature_when_required() {
        let report = validate(
            &rendered(DocumentModel::Nfe),
            ValidationContext {
                require_signature: true,
            },
        )
        .unwrap();
        assert!(report
            .details
            .iter()
            .any(|d| d.contains("no enveloped signature")));
    }

    #[test]
    fn test_malformed_xml_is_hard_error() {
        assert!(validate("<NFe><infNFe>", ValidationContext::default()).is_err());
    }

    #[test]
    fn test_signed_validated_round_trip() {
        use crate::certificate::test_support::pkcs12_fixture;
        use crate::certificate::CertificateMaterial;
        use crate::signer::XmlSigner;
        use std::sync::Arc;

        let der = pkcs12_fixture("EMPRESA TESTE LTDA:12345678000195", "segredo");
        let material = Arc::new(CertificateMaterial::from_pkcs12(&der, "segredo").unwrap());
        let signer = XmlSigner::new(material);
        let signed = signer.sign(&rendered(DocumentModel::Nfe), "infNFe").unwrap();

        let report = validate(
            &signed,
            ValidationContext {
                require_signature: true,
            },
        )
        .unwrap();
        assert!(report.ok, "{:?}", report.details);
    }
}
