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

//! Document authorization (`NFeAutorizacao4`).

use crate::signer::{collapse_inter_tag_whitespace, strip_prolog, NFE_NS};

/// WSDL namespace of the authorization service.
pub const SERVICE_NS: &str = "http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4";
/// SOAP action of the lot submission operation.
pub const ACTION: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4/nfeAutorizacaoLote";

/// Codes that authorize the document: 100 (authorized) and
/// 150 (authorized out of deadline).
pub const SUCCESS_CODES: &[&str] = &["100", "150"];

/// Normalize XML received from callers before submission: strip the BOM
/// and prolog, collapse inter-tag whitespace, and unwrap a stale
/// `enviNFe` batch wrapper left over from a previous submission echo.
pub fn normalize(xml: &str) -> String {
    let xml = strip_prolog(xml.trim_start_matches('\u{feff}'));
    let xml = collapse_inter_tag_whitespace(xml.trim());

    if xml.starts_with("<enviNFe") {
        if let Some(start) = xml.find("<NFe") {
            if let Some(end) = xml.rfind("</NFe>") {
                return xml[start..end + "</NFe>".len()].to_owned();
            }
        }
    }
    xml
}

/// Wrap a signed document in the synchronous submission batch.
pub fn batch_envelope(batch_id: &str, signed_xml: &str) -> String {
    format!(
        "<enviNFe xmlns=\"{ns}\" versao=\"4.00\"><idLote>{id}</idLote><indSinc>1</indSinc>{doc}</enviNFe>",
        ns = NFE_NS,
        id = batch_id,
        doc = signed_xml,
    )
}
