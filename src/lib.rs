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

//! # sefaz-client
//!
//! An async Rust client for Brazilian electronic fiscal documents (NF-e
//! model 55, NFC-e model 65) against the SEFAZ SOAP/XML webservices.
//!
//! The crate owns the fiscal document submission engine: it renders
//! schema-ordered document XML from a normalized model, validates its
//! structure, signs it with an enveloped XML-DSig signature from a
//! PKCS#12 certificate, transmits it over SOAP with a hand-built raw-TLS
//! fallback, and resolves the authority's multi-shape responses into
//! uniform outcome values.
//!
//! ## Features
//!
//! - **Async-first design** using Tokio
//! - **All document operations**: authorize, cancel, correction letter,
//!   inutilize, protocol/receipt query, DF-e distribution, manifestation
//! - **TLS client authentication** from the same PKCS#12 material used
//!   for signing
//! - **Deterministic fallback matrix**: SOAP 1.2 ×2 then SOAP 1.1 ×2
//!   over a hand-built envelope on transient failures
//! - **Per-tenant certificate vault** with explicit invalidation
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sefaz_client::{
//!     CertificateMaterial, DocumentModel, Environment, SefazClient,
//!     SefazClientConfig, Uf,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pkcs12 = std::fs::read("certificado.pfx")?;
//!     let material = Arc::new(CertificateMaterial::from_pkcs12(&pkcs12, "senha")?);
//!
//!     let config = SefazClientConfig::builder()
//!         .environment(Environment::Homologation)
//!         .uf(Uf::Sp)
//!         .model(DocumentModel::Nfe)
//!         .build()?;
//!
//!     let client = SefazClient::new(config, material)?;
//!
//!     // Query a document by access key
//!     let outcome = client
//!         .query("35250712345678000195550010000042421123456784")
//!         .await?;
//!     println!("{}: {}", outcome.status, outcome.message);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Submission pipeline
//!
//! [`SefazClient::submit`] runs the full pipeline from a normalized
//! [`document::DocumentForm`]: access-key derivation, XML rendering in
//! strict schema order, structural validation, optional local schema
//! validation, RSA-SHA1 enveloped signing, NFC-e QR supplement, a hard
//! environment (`tpAmb`) guard, transmission, and response resolution.
//! Every outcome preserves the authority's status code and message
//! verbatim for audit.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod access_key;
pub mod certificate;
pub mod client;
pub mod config;
pub mod document;
pub mod endpoints;
pub mod error;
pub mod operations;
pub mod response;
pub mod signer;
pub mod transport;
pub mod validator;

// Re-export main types at crate root for convenience
pub use access_key::{AccessKey, EmissionType};
pub use certificate::{
    CertificateMaterial, CertificateStore, CertificateVault, CryptoProviderConfig,
};
pub use client::{EventOutcome, LifecycleState, SefazClient, SubmissionOutcome};
pub use config::{
    DocumentModel, Environment, SefazClientConfig, SefazClientConfigBuilder, TrustAnchors, Uf,
};
pub use error::{Result, SefazError};
pub use operations::distribution::{DistributionBatch, DistributionDocument, DistributionQuery};
pub use operations::event::EventType;
pub use operations::inutilize::InutilizationRequest;
pub use response::ResolvedStatus;
pub use signer::XmlSigner;
pub use validator::{ValidationContext, ValidationReport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests; also rendered as `verProc`.
pub const USER_AGENT: &str = concat!("sefaz-client/", env!("CARGO_PKG_VERSION"));
