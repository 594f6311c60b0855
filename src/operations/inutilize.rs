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

//! Number-range inutilization (`NfeInutilizacao4`).
//!
//! Voids an unused numbering range so the gap left by skipped or failed
//! emissions is formally closed.

use crate::access_key::digits_only;
use crate::config::{DocumentModel, Environment, Uf};
use crate::document::model::{escape_xml, fixed_width};
use crate::error::{Result, SefazError};
use crate::signer::NFE_NS;

/// WSDL namespace of the inutilization service.
pub const SERVICE_NS: &str = "http://www.portalfiscal.inf.br/nfe/wsdl/NfeInutilizacao4";
/// SOAP action of the inutilization operation.
pub const ACTION: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NfeInutilizacao4/nfeInutilizacaoNF";

/// The single code meaning the range was inutilized.
pub const SUCCESS_CODES: &[&str] = &["102"];

/// One range to void.
#[derive(Debug, Clone)]
pub struct InutilizationRequest {
    /// Two-digit year of the range (`ano`).
    pub year: u16,
    /// Document model the range belongs to.
    pub model: DocumentModel,
    /// Series.
    pub series: u16,
    /// First number of the range.
    pub from: u32,
    /// Last number of the range (inclusive).
    pub to: u32,
    /// Justification, at least 15 characters.
    pub justification: String,
}

impl InutilizationRequest {
    /// Validate the request. Runs before any signing or network call.
    pub fn validate(&self) -> Result<()> {
        let length = self.justification.chars().count();
        if length < 15 || length > 255 {
            return Err(SefazError::validation(format!(
                "inutilization justification must have 15..=255 characters, got {}",
                length
            )));
        }
        if self.from == 0 || self.from > self.to {
            return Err(SefazError::validation(format!(
                "invalid number range {}..={}",
                self.from, self.to
            )));
        }
        if self.to > 999_999_999 {
            return Err(SefazError::validation("range end does not fit 9 digits"));
        }
        Ok(())
    }

    /// The `Id` over which the request is signed: jurisdiction + year +
    /// issuer + model + series + range bounds, all fixed-width.
    pub fn request_id(&self, uf: Uf, issuer_cnpj: &str) -> String {
        format!(
            "ID{uf}{year:02}{cnpj}{model}{series}{from}{to}",
            uf = uf.ibge_code(),
            year = self.year % 100,
            cnpj = fixed_width(issuer_cnpj, 14),
            model = self.model.code(),
            series = fixed_width(&self.series.to_string(), 3),
            from = fixed_width(&self.from.to_string(), 9),
            to = fixed_width(&self.to.to_string(), 9),
        )
    }

    /// Render the unsigned `<inutNFe>` payload.
    pub fn to_xml(&self, environment: Environment, uf: Uf, issuer_cnpj: &str) -> Result<String> {
        self.validate()?;
        Ok(format!(
            concat!(
                "<inutNFe xmlns=\"{ns}\" versao=\"4.00\">",
                "<infInut Id=\"{id}\">",
                "<tpAmb>{tpamb}</tpAmb>",
                "<xServ>INUTILIZAR</xServ>",
                "<cUF>{cuf}</cUF>",
                "<ano>{year:02}</ano>",
                "<CNPJ>{cnpj}</CNPJ>",
                "<mod>{model}</mod>",
                "<serie>{series}</serie>",
                "<nNFIni>{from}</nNFIni>",
                "<nNFFin>{to}</nNFFin>",
                "<xJust>{just}</xJust>",
                "</infInut>",
                "</inutNFe>"
            ),
            ns = NFE_NS,
            id = self.request_id(uf, issuer_cnpj),
            tpamb = environment.code(),
            cuf = uf.ibge_code(),
            year = self.year % 100,
            cnpj = digits_only(issuer_cnpj),
            model = self.model.code(),
            series = self.series,
            from = self.from,
            to = self.to,
            just = escape_xml(&self.justification),
        ))
    }
}
