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

//! DF-e distribution feed (`NFeDistribuicaoDFe`).
//!
//! A pull feed of documents relevant to a tax id since a sequence number
//! (NSU). Each document arrives as a `docZip` node: base64-encoded,
//! gzip-compressed XML. A payload that fails to decompress is passed
//! through as its raw bytes rather than dropped, so callers can still
//! audit what the authority delivered.

use std::io::Read;

use base64::prelude::*;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::access_key::{digits_only, AccessKey};
use crate::config::{Environment, Uf};
use crate::error::{Result, SefazError};
use crate::signer::{tag_text, NFE_NS};

/// WSDL namespace of the distribution service.
pub const SERVICE_NS: &str = "http://www.portalfiscal.inf.br/nfe/wsdl/NFeDistribuicaoDFe";
/// SOAP action of the feed operation.
pub const ACTION: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NFeDistribuicaoDFe/nfeDistDFeInteresse";

/// Codes the feed answers with: 137 (no documents) and 138 (documents
/// found).
pub const SUCCESS_CODES: &[&str] = &["137", "138"];

/// How the feed is addressed.
#[derive(Debug, Clone)]
pub enum DistributionQuery {
    /// Everything after the given NSU (`distNSU/ultNSU`).
    AfterNsu(u64),
    /// One specific NSU (`consNSU/NSU`).
    SingleNsu(u64),
    /// One specific document by access key (`consChNFe/chNFe`).
    ByKey(AccessKey),
}

impl DistributionQuery {
    /// Render the `distDFeInt` payload for the interested party.
    pub fn to_xml(&self, environment: Environment, uf: Uf, tax_id: &str) -> String {
        let selector = match self {
            Self::AfterNsu(nsu) => {
                format!("<distNSU><ultNSU>{:015}</ultNSU></distNSU>", nsu)
            }
            Self::SingleNsu(nsu) => format!("<consNSU><NSU>{:015}</NSU></consNSU>", nsu),
            Self::ByKey(key) => format!("<consChNFe><chNFe>{}</chNFe></consChNFe>", key.as_str()),
        };
        format!(
            concat!(
                "<distDFeInt xmlns=\"{ns}\" versao=\"1.01\">",
                "<tpAmb>{tpamb}</tpAmb>",
                "<cUFAutor>{cuf}</cUFAutor>",
                "<CNPJ>{cnpj}</CNPJ>",
                "{selector}",
                "</distDFeInt>"
            ),
            ns = NFE_NS,
            tpamb = environment.code(),
            cuf = uf.ibge_code(),
            cnpj = digits_only(tax_id),
            selector = selector,
        )
    }
}

/// One unpacked feed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionDocument {
    /// Sequence number of this envelope.
    pub nsu: u64,
    /// Schema identifier announced by the feed (`resNFe_v1.01`,
    /// `procNFe_v4.00`, ...).
    pub schema: String,
    /// Access key referenced by the payload, when present.
    pub document_key: Option<String>,
    /// Issuer tax id extracted from the payload, when present.
    pub issuer_id: Option<String>,
    /// Receiver tax id extracted from the payload, when present.
    pub receiver_id: Option<String>,
    /// Decompressed payload XML, or the raw (still compressed) bytes
    /// when decompression failed.
    pub payload: Vec<u8>,
    /// Whether `payload` holds decompressed XML.
    pub decompressed: bool,
}

impl DistributionDocument {
    /// The payload as UTF-8 text, when it decompressed.
    pub fn xml(&self) -> Option<String> {
        if self.decompressed {
            Some(String::from_utf8_lossy(&self.payload).into_owned())
        } else {
            None
        }
    }
}

/// One feed response: cursor state plus unpacked documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionBatch {
    /// Last NSU delivered in this batch; the next pull resumes here.
    pub last_nsu: u64,
    /// Highest NSU available at the authority.
    pub max_nsu: u64,
    /// Unpacked documents, possibly empty.
    pub documents: Vec<DistributionDocument>,
}

/// Parse a `retDistDFeInt` body into a batch.
pub fn parse_batch(xml: &str) -> Result<DistributionBatch> {
    let last_nsu = tag_text(xml, "ultNSU")
        .and_then(|t| t.trim().parse().ok())
        .unwrap_or(0);
    let max_nsu = tag_text(xml, "maxNSU")
        .and_then(|t| t.trim().parse().ok())
        .unwrap_or(0);

    let mut documents = Vec::new();
    let mut from = 0usize;
    while let Some(pos) = xml[from..].find("<docZip") {
        let at = from + pos;
        let Some(tag_end_rel) = xml[at..].find('>') else {
            break;
        };
        let tag_end = at + tag_end_rel;
        let start_tag = &xml[at..tag_end];
        let Some(close_rel) = xml[tag_end..].find("</docZip>") else {
            break;
        };
        let content = &xml[tag_end + 1..tag_end + close_rel];
        from = tag_end + close_rel + "</docZip>".len();

        let nsu: u64 = attribute(start_tag, "NSU")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let schema = attribute(start_tag, "schema").unwrap_or_default();

        documents.push(unpack_document(nsu, schema, content.trim())?);
    }

    Ok(DistributionBatch {
        last_nsu,
        max_nsu,
        documents,
    })
}

fn unpack_document(nsu: u64, schema: String, content_b64: &str) -> Result<DistributionDocument> {
    let compressed = BASE64_STANDARD.decode(content_b64.as_bytes())?;

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut xml = String::new();
    match decoder.read_to_string(&mut xml) {
        Ok(_) => {
            let document_key = tag_text(&xml, "chNFe")
                .map(|k| k.trim().to_owned())
                .or_else(|| {
                    // procNFe payloads carry the key in the infNFe Id.
                    crate::signer::extract_element(&xml, "infNFe")
                        .and_then(|e| crate::signer::element_id(&e))
                        .map(|id| id.trim_start_matches("NFe").to_owned())
                });
            let issuer_id = crate::signer::extract_element(&xml, "emit")
                .and_then(|e| tag_text(&e, "CNPJ").or_else(|| tag_text(&e, "CPF")))
                .or_else(|| tag_text(&xml, "CNPJ"));
            let receiver_id = crate::signer::extract_element(&xml, "dest")
                .and_then(|e| tag_text(&e, "CNPJ").or_else(|| tag_text(&e, "CPF")));

            Ok(DistributionDocument {
                nsu,
                schema,
                document_key,
                issuer_id,
                receiver_id,
                payload: xml.into_bytes(),
                decompressed: true,
            })
        }
        Err(e) => {
            tracing::warn!(nsu, error = %e, "docZip did not decompress; passing raw bytes through");
            Ok(DistributionDocument {
                nsu,
                schema,
                document_key: None,
                issuer_id: None,
                receiver_id: None,
                payload: compressed,
                decompressed: false,
            })
        }
    }
}

fn attribute(start_tag: &str, name: &str) -> Option<String> {
    let marker = format!("{}=\"", name);
    let at = start_tag.find(&marker)? + marker.len();
    let end = start_tag[at..].find('"')? + at;
    Some(start_tag[at..end].to_owned())
}
