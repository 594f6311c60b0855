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

//! Endpoint resolution.
//!
//! Each jurisdiction either hosts its own webservices (SP, PR, ...) or
//! delegates to a shared environment; SVRS serves as the generic fallback
//! for every jurisdiction without an entry of its own. The DF-e
//! distribution feed is national and always served by the AN environment.

use url::Url;

use crate::config::{DocumentModel, Environment, SefazClientConfig, Uf};
use crate::error::Result;

/// The webservice a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Document authorization (`NFeAutorizacao4`).
    Authorization,
    /// Asynchronous batch receipt lookup (`NFeRetAutorizacao4`).
    ReceiptQuery,
    /// Protocol lookup by access key (`NfeConsultaProtocolo4`).
    ProtocolQuery,
    /// Event reception: cancellation, correction, manifestation
    /// (`NFeRecepcaoEvento4`).
    Event,
    /// Number-range inutilization (`NfeInutilizacao4`).
    Inutilization,
    /// Service status (`NfeStatusServico4`).
    Status,
    /// National DF-e distribution feed (`NFeDistribuicaoDFe`).
    Distribution,
    /// Recipient manifestation events, served by the national
    /// environment rather than the issuing jurisdiction.
    NationalEvent,
}

impl Service {
    /// Path segment of the service on every known host.
    fn path(&self) -> &'static str {
        match self {
            Self::Authorization => "NFeAutorizacao4.asmx",
            Self::ReceiptQuery => "NFeRetAutorizacao4.asmx",
            Self::ProtocolQuery => "NfeConsultaProtocolo4.asmx",
            Self::Event => "NFeRecepcaoEvento4.asmx",
            Self::Inutilization => "NfeInutilizacao4.asmx",
            Self::Status => "NfeStatusServico4.asmx",
            Self::Distribution => "NFeDistribuicaoDFe.asmx",
            Self::NationalEvent => "NFeRecepcaoEvento4.asmx",
        }
    }

    fn is_national(&self) -> bool {
        matches!(self, Self::Distribution | Self::NationalEvent)
    }
}

/// Resolves service and portal URLs for one configured client.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    uf: Uf,
    environment: Environment,
    model: DocumentModel,
    override_base: Option<Url>,
}

impl EndpointRegistry {
    /// Build a registry from the client configuration.
    pub fn from_config(config: &SefazClientConfig) -> Self {
        Self {
            uf: config.uf,
            environment: config.environment,
            model: config.model,
            override_base: config.endpoint_override.clone(),
        }
    }

    /// Resolve the URL for a service.
    pub fn resolve(&self, service: Service) -> Result<Url> {
        if let Some(base) = &self.override_base {
            return Ok(base.join(service.path())?);
        }

        // Distribution and manifestation are national; everything else is
        // jurisdictional.
        let host = if service.is_national() {
            match self.environment {
                Environment::Production => "https://www1.nfe.fazenda.gov.br/ws/",
                Environment::Homologation => "https://hom1.nfe.fazenda.gov.br/ws/",
            }
        } else {
            self.jurisdiction_base()
        };

        Ok(Url::parse(host)?.join(service.path())?)
    }

    /// Base URL of the jurisdiction's webservice host.
    fn jurisdiction_base(&self) -> &'static str {
        use DocumentModel::*;
        use Environment::*;
        match (self.uf, self.environment, self.model) {
            (Uf::Sp, Production, Nfe) => "https://nfe.fazenda.sp.gov.br/ws/",
            (Uf::Sp, Homologation, Nfe) => "https://homologacao.nfe.fazenda.sp.gov.br/ws/",
            (Uf::Sp, Production, Nfce) => "https://nfce.fazenda.sp.gov.br/ws/",
            (Uf::Sp, Homologation, Nfce) => "https://homologacao.nfce.fazenda.sp.gov.br/ws/",

            (Uf::Pr, Production, _) => "https://nfe.sefa.pr.gov.br/nfe/",
            (Uf::Pr, Homologation, _) => "https://homologacao.nfe.sefa.pr.gov.br/nfe/",

            (Uf::Mg, Production, _) => "https://nfe.fazenda.mg.gov.br/nfe2/services/",
            (Uf::Mg, Homologation, _) => "https://hnfe.fazenda.mg.gov.br/nfe2/services/",

            // Shared SVRS environment: the generic fallback for every
            // jurisdiction without a dedicated deployment.
            (_, Production, _) => "https://nfe.svrs.rs.gov.br/ws/",
            (_, Homologation, _) => "https://nfe-homologacao.svrs.rs.gov.br/ws/",
        }
    }

    /// QR-code base URL printed into `qrCode` (NFC-e).
    pub fn qr_code_url(&self) -> &'static str {
        use Environment::*;
        match (self.uf, self.environment) {
            (Uf::Sp, Production) => "https://www.nfce.fazenda.sp.gov.br/qrcode",
            (Uf::Sp, Homologation) => "https://www.homologacao.nfce.fazenda.sp.gov.br/qrcode",
            (Uf::Pr, Production) => "http://www.fazenda.pr.gov.br/nfce/qrcode",
            (Uf::Pr, Homologation) => "http://www.fazenda.pr.gov.br/nfce/qrcode",
            (Uf::Mg, Production) => "https://nfce.fazenda.mg.gov.br/portalnfce/sistema/qrcode.xhtml",
            (Uf::Mg, Homologation) => {
                "https://hnfce.fazenda.mg.gov.br/portalnfce/sistema/qrcode.xhtml"
            }
            (_, Production) => "https://www.sefaz.rs.gov.br/NFCE/NFCE-COM.aspx",
            (_, Homologation) => "https://www.sefaz.rs.gov.br/NFCE/NFCE-COM.aspx",
        }
    }

    /// Consultation portal URL printed into `urlChave` (NFC-e).
    pub fn consultation_url(&self) -> &'static str {
        use Environment::*;
        match (self.uf, self.environment) {
            (Uf::Sp, Production) => "https://www.nfce.fazenda.sp.gov.br/consulta",
            (Uf::Sp, Homologation) => "https://www.homologacao.nfce.fazenda.sp.gov.br/consulta",
            (Uf::Pr, _) => "http://www.fazenda.pr.gov.br/nfce/consulta",
            (Uf::Mg, _) => "https://nfce.fazenda.mg.gov.br/portalnfce",
            (_, _) => "https://www.sefaz.rs.gov.br/nfce/consulta",
        }
    }
}
