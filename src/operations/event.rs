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

//! Post-authorization events (`NFeRecepcaoEvento4`): cancellation,
//! correction letter, and recipient manifestation.
//!
//! Every event type has its own authority type-code, its own
//! justification-length rule (enforced before any network call), and an
//! `Id` built from type-code + access key + zero-padded sequence, which
//! keeps outbound event identifiers distinct per document.

use chrono::{DateTime, FixedOffset};

use crate::access_key::AccessKey;
use crate::config::Environment;
use crate::document::model::escape_xml;
use crate::error::{Result, SefazError};
use crate::signer::NFE_NS;

/// WSDL namespace of the event service.
pub const SERVICE_NS: &str = "http://www.portalfiscal.inf.br/nfe/wsdl/NFeRecepcaoEvento4";
/// SOAP action of the event reception operation.
pub const ACTION: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NFeRecepcaoEvento4/nfeRecepcaoEvento";

/// Codes meaning the event was registered: 135 (registered), 136
/// (registered, document not found) and 155 (cancellation out of
/// deadline, still registered).
pub const SUCCESS_CODES: &[&str] = &["135", "136", "155"];

/// Fixed usage-conditions text the correction letter must embed.
pub const CORRECTION_USAGE_TERMS: &str =
    "A Carta de Correcao e disciplinada pelo paragrafo 1o-A do art. 7o do Convenio S/N, \
     de 15 de dezembro de 1970 e pode ser utilizada para regularizacao de erro ocorrido \
     na emissao de documento fiscal, desde que o erro nao esteja relacionado com: I - as \
     variaveis que determinam o valor do imposto tais como: base de calculo, aliquota, \
     diferenca de preco, quantidade, valor da operacao ou da prestacao; II - a correcao de \
     dados cadastrais que implique mudanca do remetente ou do destinatario; III - a data de \
     emissao ou de saida.";

/// Event kinds with their authority type-codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// 110111 - cancellation of an authorized document.
    Cancellation,
    /// 110110 - correction letter (CC-e).
    Correction,
    /// 210200 - manifestation: awareness of the operation.
    ManifestAwareness,
    /// 210210 - manifestation: operation confirmed.
    ManifestConfirmation,
    /// 210220 - manifestation: operation unknown.
    ManifestUnawareness,
    /// 210240 - manifestation: operation not performed.
    ManifestNotPerformed,
}

impl EventType {
    /// The `tpEvento` wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cancellation => "110111",
            Self::Correction => "110110",
            Self::ManifestAwareness => "210200",
            Self::ManifestConfirmation => "210210",
            Self::ManifestUnawareness => "210220",
            Self::ManifestNotPerformed => "210240",
        }
    }

    /// The `descEvento` wire text, which the authority matches verbatim.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Cancellation => "Cancelamento",
            Self::Correction => "Carta de Correcao",
            Self::ManifestAwareness => "Ciencia da Operacao",
            Self::ManifestConfirmation => "Confirmacao da Operacao",
            Self::ManifestUnawareness => "Desconhecimento da Operacao",
            Self::ManifestNotPerformed => "Operacao nao Realizada",
        }
    }

    /// Whether this is a recipient-manifestation event (routed to the
    /// national environment, `cOrgao` 91).
    pub fn is_manifestation(&self) -> bool {
        matches!(
            self,
            Self::ManifestAwareness
                | Self::ManifestConfirmation
                | Self::ManifestUnawareness
                | Self::ManifestNotPerformed
        )
    }

    /// (min, max) justification length, when one is required.
    fn justification_bounds(&self) -> Option<(usize, usize)> {
        match self {
            Self::Cancellation => Some((15, 255)),
            Self::Correction => Some((15, 1000)),
            Self::ManifestNotPerformed => Some((15, 255)),
            _ => None,
        }
    }
}

/// One event to transmit.
#[derive(Debug, Clone)]
pub struct EventRequest {
    /// Event kind.
    pub event_type: EventType,
    /// Access key of the target document.
    pub key: AccessKey,
    /// Sequence number (1 for the first event of a type).
    pub sequence: u16,
    /// Justification (cancellation, not-performed) or correction text.
    pub justification: Option<String>,
    /// Authorization protocol, required for cancellation.
    pub protocol: Option<String>,
}

impl EventRequest {
    /// The event `Id`: type-code + access key + zero-padded sequence.
    pub fn event_id(&self) -> String {
        format!(
            "ID{}{}{:02}",
            self.event_type.code(),
            self.key.as_str(),
            self.sequence
        )
    }

    /// Validate the request. Runs before any signing or network call.
    pub fn validate(&self) -> Result<()> {
        if self.sequence == 0 {
            return Err(SefazError::validation("event sequence starts at 1"));
        }
        if self.event_type == EventType::Cancellation && self.protocol.is_none() {
            return Err(SefazError::validation(
                "cancellation requires the authorization protocol",
            ));
        }

        if let Some((min, max)) = self.event_type.justification_bounds() {
            let text = self.justification.as_deref().unwrap_or("");
            let length = text.chars().count();
            if length < min || length > max {
                return Err(SefazError::validation(format!(
                    "{} justification must have {}..={} characters, got {}",
                    self.event_type.description(),
                    min,
                    max,
                    length
                )));
            }
        }
        Ok(())
    }

    /// Render the unsigned `<evento>` element.
    pub fn to_xml(
        &self,
        environment: Environment,
        author_tax_id: &str,
        event_time: DateTime<FixedOffset>,
    ) -> Result<String> {
        self.validate()?;

        // Manifestations are national events; everything else is
        // addressed to the document's jurisdiction.
        let organ = if self.event_type.is_manifestation() {
            "91".to_owned()
        } else {
            self.key.uf_code().to_owned()
        };

        let mut detail = format!(
            "<descEvento>{}</descEvento>",
            self.event_type.description()
        );
        match self.event_type {
            EventType::Cancellation => {
                detail.push_str(&format!(
                    "<nProt>{}</nProt><xJust>{}</xJust>",
                    escape_xml(self.protocol.as_deref().unwrap_or_default()),
                    escape_xml(self.justification.as_deref().unwrap_or_default()),
                ));
            }
            EventType::Correction => {
                detail.push_str(&format!(
                    "<xCorrecao>{}</xCorrecao><xCondUso>{}</xCondUso>",
                    escape_xml(self.justification.as_deref().unwrap_or_default()),
                    CORRECTION_USAGE_TERMS,
                ));
            }
            EventType::ManifestNotPerformed => {
                detail.push_str(&format!(
                    "<xJust>{}</xJust>",
                    escape_xml(self.justification.as_deref().unwrap_or_default()),
                ));
            }
            _ => {}
        }

        Ok(format!(
            concat!(
                "<evento xmlns=\"{ns}\" versao=\"1.00\">",
                "<infEvento Id=\"{id}\">",
                "<cOrgao>{organ}</cOrgao>",
                "<tpAmb>{tpamb}</tpAmb>",
                "<CNPJ>{cnpj}</CNPJ>",
                "<chNFe>{key}</chNFe>",
                "<dhEvento>{when}</dhEvento>",
                "<tpEvento>{tpevento}</tpEvento>",
                "<nSeqEvento>{seq}</nSeqEvento>",
                "<verEvento>1.00</verEvento>",
                "<detEvento versao=\"1.00\">{detail}</detEvento>",
                "</infEvento>",
                "</evento>"
            ),
            ns = NFE_NS,
            id = self.event_id(),
            organ = organ,
            tpamb = environment.code(),
            cnpj = crate::access_key::digits_only(author_tax_id),
            key = self.key.as_str(),
            when = event_time.format("%Y-%m-%dT%H:%M:%S%:z"),
            tpevento = self.event_type.code(),
            seq = self.sequence,
            detail = detail,
        ))
    }
}

/// Wrap a signed event in the submission batch.
pub fn batch_envelope(signed_event: &str) -> String {
    format!(
        "<envEvento xmlns=\"{ns}\" versao=\"1.00\"><idLote>1</idLote>{event}</envEvento>",
        ns = NFE_NS,
        event = signed_event,
    )
}
