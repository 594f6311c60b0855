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

//! Configuration types for the SEFAZ client.
//!
//! This module provides configuration structures for setting up a client,
//! including the target environment, issuing jurisdiction, document model,
//! timeouts, retry policy and TLS trust settings.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Authority environment the client talks to.
///
/// The flag is embedded in every document as `tpAmb`; a signed document
/// whose `tpAmb` disagrees with this setting is rejected locally before
/// any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Environment {
    /// Production (`tpAmb = 1`). Documents have fiscal validity.
    Production,
    /// Homologation / test (`tpAmb = 2`). Documents have no fiscal validity.
    Homologation,
}

impl Environment {
    /// The `tpAmb` wire value.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Production => "1",
            Self::Homologation => "2",
        }
    }

    /// Parse a `tpAmb` wire value.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::Production),
            "2" => Some(Self::Homologation),
            _ => None,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Fiscal document model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentModel {
    /// NF-e, model 55 (general electronic invoice).
    Nfe,
    /// NFC-e, model 65 (consumer retail invoice, requires QR code).
    Nfce,
}

impl DocumentModel {
    /// The `mod` wire value.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Nfe => "55",
            Self::Nfce => "65",
        }
    }

    /// Parse a `mod` wire value.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "55" => Some(Self::Nfe),
            "65" => Some(Self::Nfce),
            _ => None,
        }
    }
}

/// Brazilian federative unit (issuing jurisdiction).
///
/// The IBGE numeric code prefixes every access key and selects the
/// authority endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Uf {
    Ac, Al, Ap, Am, Ba, Ce, Df, Es, Go, Ma, Mt, Ms, Mg, Pa, Pb, Pr, Pe, Pi,
    Rj, Rn, Rs, Ro, Rr, Sc, Sp, Se, To,
}

impl Uf {
    /// Two-digit IBGE code used in access keys and `cUF`.
    pub fn ibge_code(&self) -> &'static str {
        match self {
            Self::Ro => "11",
            Self::Ac => "12",
            Self::Am => "13",
            Self::Rr => "14",
            Self::Pa => "15",
            Self::Ap => "16",
            Self::To => "17",
            Self::Ma => "21",
            Self::Pi => "22",
            Self::Ce => "23",
            Self::Rn => "24",
            Self::Pb => "25",
            Self::Pe => "26",
            Self::Al => "27",
            Self::Se => "28",
            Self::Ba => "29",
            Self::Mg => "31",
            Self::Es => "32",
            Self::Rj => "33",
            Self::Sp => "35",
            Self::Pr => "41",
            Self::Sc => "42",
            Self::Rs => "43",
            Self::Ms => "50",
            Self::Mt => "51",
            Self::Go => "52",
            Self::Df => "53",
        }
    }

    /// Two-letter acronym (`SP`, `RS`, ...).
    pub fn acronym(&self) -> &'static str {
        match self {
            Self::Ac => "AC",
            Self::Al => "AL",
            Self::Ap => "AP",
            Self::Am => "AM",
            Self::Ba => "BA",
            Self::Ce => "CE",
            Self::Df => "DF",
            Self::Es => "ES",
            Self::Go => "GO",
            Self::Ma => "MA",
            Self::Mt => "MT",
            Self::Ms => "MS",
            Self::Mg => "MG",
            Self::Pa => "PA",
            Self::Pb => "PB",
            Self::Pr => "PR",
            Self::Pe => "PE",
            Self::Pi => "PI",
            Self::Rj => "RJ",
            Self::Rn => "RN",
            Self::Rs => "RS",
            Self::Ro => "RO",
            Self::Rr => "RR",
            Self::Sc => "SC",
            Self::Sp => "SP",
            Self::Se => "SE",
            Self::To => "TO",
        }
    }

    /// Parse from the two-letter acronym, case-insensitive.
    pub fn from_acronym(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AC" => Some(Self::Ac),
            "AL" => Some(Self::Al),
            "AP" => Some(Self::Ap),
            "AM" => Some(Self::Am),
            "BA" => Some(Self::Ba),
            "CE" => Some(Self::Ce),
            "DF" => Some(Self::Df),
            "ES" => Some(Self::Es),
            "GO" => Some(Self::Go),
            "MA" => Some(Self::Ma),
            "MT" => Some(Self::Mt),
            "MS" => Some(Self::Ms),
            "MG" => Some(Self::Mg),
            "PA" => Some(Self::Pa),
            "PB" => Some(Self::Pb),
            "PR" => Some(Self::Pr),
            "PE" => Some(Self::Pe),
            "PI" => Some(Self::Pi),
            "RJ" => Some(Self::Rj),
            "RN" => Some(Self::Rn),
            "RS" => Some(Self::Rs),
            "RO" => Some(Self::Ro),
            "RR" => Some(Self::Rr),
            "SC" => Some(Self::Sc),
            "SP" => Some(Self::Sp),
            "SE" => Some(Self::Se),
            "TO" => Some(Self::To),
            _ => None,
        }
    }
}

/// NFC-e security credential (CSC) used to salt the QR-code digest.
#[derive(Clone, Serialize, Deserialize)]
pub struct CscCredential {
    /// CSC identifier assigned by the jurisdiction (`cIdToken`).
    pub id: String,
    /// CSC secret.
    pub token: String,
}

impl std::fmt::Debug for CscCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CscCredential")
            .field("id", &self.id)
            .field("token", &"***")
            .finish()
    }
}

/// Technical responsible block (`infRespTec`) appended to documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalResponsible {
    /// CNPJ of the software vendor.
    pub cnpj: String,
    /// Contact name.
    pub contact: String,
    /// Contact e-mail.
    pub email: String,
    /// Contact phone.
    pub phone: String,
}

/// Trust anchor configuration for server certificate verification.
#[derive(Clone)]
pub enum TrustAnchors {
    /// Use Mozilla's root CA store (webpki-roots). The production SEFAZ
    /// endpoints chain to publicly trusted roots.
    WebPki,

    /// Use explicit CA certificates (PEM-encoded). Some homologation
    /// endpoints chain to ICP-Brasil roots absent from the web PKI.
    Explicit(Vec<Vec<u8>>),

    /// Accept any server certificate (insecure, for testing only).
    ///
    /// **WARNING**: This disables all server certificate verification.
    InsecureAcceptAny,
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(certs) => write!(f, "Explicit({} certs)", certs.len()),
            Self::InsecureAcceptAny => write!(f, "InsecureAcceptAny"),
        }
    }
}

/// Optional local schema validator hook.
///
/// When present, rendered XML is validated against the published schema
/// before transmission; when absent, submission proceeds with a logged
/// warning. The callback returns the validator's own message on failure.
pub type SchemaValidator = Arc<dyn Fn(&str) -> std::result::Result<(), String> + Send + Sync>;

/// Configuration for a [`crate::SefazClient`].
#[derive(Clone)]
pub struct SefazClientConfig {
    /// Target environment (production or homologation).
    pub environment: Environment,

    /// Issuing jurisdiction.
    pub uf: Uf,

    /// Document model this client issues.
    pub model: DocumentModel,

    /// Per-call network timeout.
    pub timeout: Duration,

    /// Fixed delay between same-version fallback attempts.
    ///
    /// This is deliberately not an exponential backoff: the fallback
    /// matrix is bounded and same-document resubmission must stay rare.
    pub retry_delay: Duration,

    /// Attempts per SOAP version in the fallback chain.
    pub attempts_per_version: u32,

    /// Trust anchors for server certificate verification.
    pub trust_anchors: TrustAnchors,

    /// NFC-e CSC credential, required to emit model-65 QR codes.
    pub csc: Option<CscCredential>,

    /// Technical responsible block appended to rendered documents.
    pub technical_responsible: Option<TechnicalResponsible>,

    /// Optional local schema validator.
    pub schema_validator: Option<SchemaValidator>,

    /// Override the endpoint registry with a fixed base URL.
    ///
    /// Intended for tests against a mock server; when set, every
    /// operation is routed to this URL.
    pub endpoint_override: Option<url::Url>,
}

impl std::fmt::Debug for SefazClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SefazClientConfig")
            .field("environment", &self.environment)
            .field("uf", &self.uf)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("retry_delay", &self.retry_delay)
            .field("attempts_per_version", &self.attempts_per_version)
            .field("trust_anchors", &self.trust_anchors)
            .field("csc", &self.csc.is_some())
            .field("schema_validator", &self.schema_validator.is_some())
            .field("endpoint_override", &self.endpoint_override)
            .finish()
    }
}

impl SefazClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SefazClientConfigBuilder {
        SefazClientConfigBuilder::new()
    }
}

/// Builder for [`SefazClientConfig`].
#[derive(Default)]
pub struct SefazClientConfigBuilder {
    environment: Option<Environment>,
    uf: Option<Uf>,
    model: Option<DocumentModel>,
    timeout: Option<Duration>,
    retry_delay: Option<Duration>,
    attempts_per_version: Option<u32>,
    trust_anchors: Option<TrustAnchors>,
    csc: Option<CscCredential>,
    technical_responsible: Option<TechnicalResponsible>,
    schema_validator: Option<SchemaValidator>,
    endpoint_override: Option<url::Url>,
}

impl SefazClientConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target environment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Set the issuing jurisdiction.
    pub fn uf(mut self, uf: Uf) -> Self {
        self.uf = Some(uf);
        self
    }

    /// Set the document model.
    pub fn model(mut self, model: DocumentModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the per-call network timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the fixed delay between fallback attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set the number of attempts per SOAP version in the fallback chain.
    pub fn attempts_per_version(mut self, attempts: u32) -> Self {
        self.attempts_per_version = Some(attempts);
        self
    }

    /// Use Mozilla's root CA store for server verification.
    pub fn trust_webpki_roots(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::WebPki);
        self
    }

    /// Use explicit CA certificates (PEM) for server verification.
    pub fn trust_explicit(mut self, ca_certs: Vec<Vec<u8>>) -> Self {
        self.trust_anchors = Some(TrustAnchors::Explicit(ca_certs));
        self
    }

    /// Accept any server certificate (insecure, for testing only).
    pub fn trust_any_insecure(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::InsecureAcceptAny);
        self
    }

    /// Set the NFC-e CSC credential.
    pub fn csc(mut self, id: impl Into<String>, token: impl Into<String>) -> Self {
        self.csc = Some(CscCredential {
            id: id.into(),
            token: token.into(),
        });
        self
    }

    /// Set the technical responsible block.
    pub fn technical_responsible(mut self, resp: TechnicalResponsible) -> Self {
        self.technical_responsible = Some(resp);
        self
    }

    /// Install a local schema validator hook.
    pub fn schema_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.schema_validator = Some(Arc::new(validator));
        self
    }

    /// Route every operation to a fixed base URL (tests).
    pub fn endpoint_override(mut self, url: impl AsRef<str>) -> Result<Self, url::ParseError> {
        self.endpoint_override = Some(url::Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment, jurisdiction or model is not
    /// set, or if an NFC-e client is configured without a CSC credential.
    pub fn build(self) -> Result<SefazClientConfig, &'static str> {
        let environment = self.environment.ok_or("environment is required")?;
        let uf = self.uf.ok_or("uf is required")?;
        let model = self.model.ok_or("model is required")?;

        if model == DocumentModel::Nfce && self.csc.is_none() {
            return Err("NFC-e requires a CSC credential for QR-code emission");
        }

        Ok(SefazClientConfig {
            environment,
            uf,
            model,
            timeout: self.timeout.unwrap_or(Duration::from_secs(30)),
            retry_delay: self.retry_delay.unwrap_or(Duration::from_secs(2)),
            attempts_per_version: self.attempts_per_version.unwrap_or(2),
            trust_anchors: self.trust_anchors.unwrap_or(TrustAnchors::WebPki),
            csc: self.csc,
            technical_responsible: self.technical_responsible,
            schema_validator: self.schema_validator,
            endpoint_override: self.endpoint_override,
        })
    }
}
