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

//! Status queries: by access key (`NfeConsultaProtocolo4`) or by batch
//! receipt (`NFeRetAutorizacao4`).

use crate::access_key::AccessKey;
use crate::config::Environment;
use crate::error::{Result, SefazError};
use crate::signer::NFE_NS;

/// WSDL namespace of the protocol-query service.
pub const PROTOCOL_SERVICE_NS: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NFeConsultaProtocolo4";
/// SOAP action of the protocol query.
pub const PROTOCOL_ACTION: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NFeConsultaProtocolo4/nfeConsultaNF";

/// WSDL namespace of the receipt-query service.
pub const RECEIPT_SERVICE_NS: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NFeRetAutorizacao4";
/// SOAP action of the receipt query.
pub const RECEIPT_ACTION: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NFeRetAutorizacao4/nfeRetAutorizacaoLote";

/// WSDL namespace of the service-status service.
pub const STATUS_SERVICE_NS: &str = "http://www.portalfiscal.inf.br/nfe/wsdl/NfeStatusServico4";
/// SOAP action of the status operation.
pub const STATUS_ACTION: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NfeStatusServico4/nfeStatusServicoNF";

/// Codes resolving a key query: authorized (100/150), denied (101/151,
/// document exists and was cancelled), and registered events (135/136/155).
pub const KEY_SUCCESS_CODES: &[&str] = &["100", "101", "150", "151", "135", "136", "155"];

/// Code the status service answers with when it is up.
pub const STATUS_SUCCESS_CODES: &[&str] = &["107"];

/// Code resolving a receipt query: 104 (batch processed); the embedded
/// `protNFe` carries the per-document result.
pub const RECEIPT_SUCCESS_CODES: &[&str] = &["104"];

/// Render the service-status payload for a jurisdiction.
pub fn status_payload(environment: Environment, uf: crate::config::Uf) -> String {
    format!(
        concat!(
            "<consStatServ xmlns=\"{ns}\" versao=\"4.00\">",
            "<tpAmb>{tpamb}</tpAmb>",
            "<cUF>{cuf}</cUF>",
            "<xServ>STATUS</xServ>",
            "</consStatServ>"
        ),
        ns = NFE_NS,
        tpamb = environment.code(),
        cuf = uf.ibge_code(),
    )
}

/// What a query input routes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// 44-digit access key, routed to the protocol-query endpoint.
    Key(AccessKey),
    /// 15-digit batch receipt, routed to the async-receipt endpoint.
    Receipt(String),
}

impl QueryTarget {
    /// Classify an input as a key or receipt by its digit count.
    pub fn from_input(input: &str) -> Result<Self> {
        let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
        match digits.len() {
            44 => Ok(Self::Key(AccessKey::parse(&digits)?)),
            15 => Ok(Self::Receipt(digits)),
            other => Err(SefazError::validation(format!(
                "query input must have 44 digits (key) or 15 (receipt), got {}",
                other
            ))),
        }
    }

    /// Render the query payload.
    pub fn to_xml(&self, environment: Environment) -> String {
        match self {
            Self::Key(key) => format!(
                concat!(
                    "<consSitNFe xmlns=\"{ns}\" versao=\"4.00\">",
                    "<tpAmb>{tpamb}</tpAmb>",
                    "<xServ>CONSULTAR</xServ>",
                    "<chNFe>{key}</chNFe>",
                    "</consSitNFe>"
                ),
                ns = NFE_NS,
                tpamb = environment.code(),
                key = key.as_str(),
            ),
            Self::Receipt(receipt) => format!(
                concat!(
                    "<consReciNFe xmlns=\"{ns}\" versao=\"4.00\">",
                    "<tpAmb>{tpamb}</tpAmb>",
                    "<nRec>{receipt}</nRec>",
                    "</consReciNFe>"
                ),
                ns = NFE_NS,
                tpamb = environment.code(),
                receipt = receipt,
            ),
        }
    }

    /// Success codes applicable to this query type.
    pub fn success_codes(&self) -> &'static [&'static str] {
        match self {
            Self::Key(_) => KEY_SUCCESS_CODES,
            Self::Receipt(_) => RECEIPT_SUCCESS_CODES,
        }
    }
}
