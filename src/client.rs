//! The transmission client.
//!
//! `SefazClient` owns the submission state machine: it renders, validates,
//! signs and transmits documents, sends post-authorization events, and
//! interprets authority responses into immutable outcome values. Lifecycle
//! state transitions are derived exclusively from resolved responses;
//! nothing else moves a document between states.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::access_key::AccessKey;
use crate::certificate::CertificateMaterial;
use crate::config::{DocumentModel, SefazClientConfig, TrustAnchors};
use crate::document::model::DocumentForm;
use crate::document::qrcode::{self, QrCodeParams};
use crate::document::DocumentBuilder;
use crate::endpoints::{EndpointRegistry, Service};
use crate::error::{Result, SefazError};
use crate::operations::distribution::{self, DistributionBatch, DistributionQuery};
use crate::operations::event::{EventRequest, EventType};
use crate::operations::inutilize::InutilizationRequest;
use crate::operations::query::QueryTarget;
use crate::operations::{authorize, event, inutilize, is_success, query};
use crate::response::{resolve, ResolvedStatus};
use crate::signer::{tag_text, XmlSigner};
use crate::transport::{
    build_http_client, FallbackPolicy, HttpSoapTransport, RawSoapTransport, SoapRequest,
    SoapVersion,
};
use crate::validator::{validate, ValidationContext};

/// Document lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Rendered, not yet signed.
    Built,
    /// Signed, not yet transmitted.
    Signed,
    /// Transmitted, no final answer yet.
    Submitted,
    /// Authorized by the authority (100/150).
    Authorized,
    /// Rejected by the authority.
    Rejected,
    /// Accepted for asynchronous processing; query the receipt later.
    Pending,
    /// Cancelled by a registered event. Reachable only from authorized.
    Cancelled,
    /// Correction letter acknowledged. Reachable only from authorized.
    CorrectionAcknowledged,
    /// Number range voided.
    RangeInutilized,
}

/// Immutable result of one document submission or query.
///
/// Produced once per call and never mutated; a later query supersedes it
/// with a new value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    /// Whether the resolved status is in the operation's success set.
    pub success: bool,
    /// Authority status code, verbatim.
    pub status: String,
    /// Authority reason text, verbatim.
    pub message: String,
    /// Authorization protocol, when issued.
    pub protocol: Option<String>,
    /// Access key the outcome refers to.
    pub resolved_access_key: Option<String>,
    /// Resulting lifecycle state.
    pub state: LifecycleState,
    /// Raw response body, preserved for audit.
    pub raw_response: String,
    /// The signed XML as transmitted, when this outcome is a submission.
    pub signed_xml_echo: Option<String>,
}

impl SubmissionOutcome {
    /// Convert a failed outcome into [`SefazError::AuthorityRejection`],
    /// preserving the authority's wording.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(SefazError::rejection(self.status, self.message))
        }
    }
}

/// Immutable result of one event transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventOutcome {
    /// Whether the resolved status is in the event's success set.
    pub success: bool,
    /// Authority status code, verbatim.
    pub status: String,
    /// Authority reason text, verbatim.
    pub message: String,
    /// Event registration protocol, when issued.
    pub protocol: Option<String>,
    /// Resulting lifecycle state, when the event changes one.
    pub state: Option<LifecycleState>,
    /// Raw response body, preserved for audit.
    pub raw_response: String,
}

/// Client for fiscal document transmission against the authority.
pub struct SefazClient {
    config: SefazClientConfig,
    registry: EndpointRegistry,
    material: Arc<CertificateMaterial>,
    signer: XmlSigner,
    primary: HttpSoapTransport,
    fallback: RawSoapTransport,
    policy: FallbackPolicy,
}

impl SefazClient {
    /// Create a client over the given configuration and certificate
    /// material.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS stack cannot be configured from the
    /// material.
    pub fn new(config: SefazClientConfig, material: Arc<CertificateMaterial>) -> Result<Self> {
        let http = build_http_client(&config, Some(&material))?;
        let insecure = matches!(config.trust_anchors, TrustAnchors::InsecureAcceptAny);
        let registry = EndpointRegistry::from_config(&config);
        let policy = FallbackPolicy::from_config(&config);

        Ok(Self {
            registry,
            signer: XmlSigner::new(Arc::clone(&material)),
            primary: HttpSoapTransport::new(http),
            fallback: RawSoapTransport::new(Some(Arc::clone(&material)), config.timeout, insecure),
            material,
            policy,
            config,
        })
    }

    /// The client configuration.
    pub fn config(&self) -> &SefazClientConfig {
        &self.config
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Build, sign and submit a document from the normalized model.
    ///
    /// Runs the full pipeline: render, structural validation, optional
    /// local schema validation, signing, QR supplement (NFC-e),
    /// environment guard, transmission with fallback, and resolution.
    pub async fn submit(&self, form: &DocumentForm) -> Result<SubmissionOutcome> {
        if form.model != self.config.model {
            return Err(SefazError::validation(format!(
                "form model {} differs from the configured model {}",
                form.model.code(),
                self.config.model.code()
            )));
        }

        let key = AccessKey::generate(
            self.config.uf,
            form.issued_at,
            &form.issuer.cnpj,
            form.model,
            form.series,
            form.number,
            form.emission,
        )?;
        tracing::debug!(key = %key, "access key derived");

        let builder = DocumentBuilder::new(
            self.config.environment,
            self.config.technical_responsible.as_ref(),
        );
        let xml = builder.render(form, &key)?;

        self.signed_submit(&xml, &key).await
    }

    /// Normalize and submit caller-provided document XML.
    ///
    /// Unsigned documents get their `tpAmb` forced to the configured
    /// environment and are then signed; a document that is already signed
    /// with a mismatched `tpAmb` is a hard error and produces zero
    /// network calls.
    pub async fn submit_xml(&self, xml: &str) -> Result<SubmissionOutcome> {
        let mut xml = authorize::normalize(xml);

        if !xml.contains("<Signature") {
            xml = self.force_environment(&xml);
        }

        let id = crate::signer::extract_element(&xml, "infNFe")
            .and_then(|e| crate::signer::element_id(&e))
            .ok_or_else(|| SefazError::validation("document carries no infNFe Id"))?;
        let key = AccessKey::parse(id.trim_start_matches("NFe"))?;

        self.signed_submit(&xml, &key).await
    }

    async fn signed_submit(&self, xml: &str, key: &AccessKey) -> Result<SubmissionOutcome> {
        let report = validate(xml, ValidationContext::default())?;
        if !report.ok {
            return Err(SefazError::structural(
                report.error.unwrap_or_else(|| "structural check failed".into()),
            ));
        }

        match &self.config.schema_validator {
            Some(validator) => {
                validator(xml).map_err(SefazError::Validation)?;
            }
            None => tracing::warn!(
                "no local schema validator configured; submitting without schema validation"
            ),
        }

        let mut signed = if xml.contains("<Signature") {
            xml.to_owned()
        } else {
            self.signer.sign(xml, "infNFe")?
        };

        if self.config.model == DocumentModel::Nfce && !signed.contains("<infNFeSupl>") {
            signed = self.append_qr_supplement(&signed, key)?;
        }

        // A signed document is immutable: a tpAmb disagreeing with the
        // configured environment can only surface as an error.
        self.check_environment(&signed)?;

        let report = validate(&signed, ValidationContext { require_signature: true })?;
        if !report.ok {
            return Err(SefazError::structural(
                report.error.unwrap_or_else(|| "signed document failed checks".into()),
            ));
        }

        let batch_id = key.number().trim_start_matches('0');
        let payload = authorize::batch_envelope(batch_id, &signed);
        let request = self.request_for(Service::Authorization, authorize::SERVICE_NS, authorize::ACTION, payload)?;
        let raw = self.transmit(&request).await?;

        let resolved = self.resolved(&raw)?;
        let success = is_success(&resolved.status, authorize::SUCCESS_CODES);
        let state = submit_state(&resolved.status);

        tracing::debug!(status = %resolved.status, ?state, "submission resolved");
        Ok(SubmissionOutcome {
            success,
            state,
            resolved_access_key: resolved.key.clone().or_else(|| Some(key.as_str().to_owned())),
            status: resolved.status,
            message: resolved.message,
            protocol: resolved.protocol,
            raw_response: raw,
            signed_xml_echo: Some(signed),
        })
    }

    fn append_qr_supplement(&self, signed: &str, key: &AccessKey) -> Result<String> {
        let csc = self
            .config
            .csc
            .as_ref()
            .ok_or_else(|| SefazError::validation("NFC-e requires a CSC credential"))?;

        let total = tag_text(signed, "vNF")
            .and_then(|v| {
                let digits: String = v.chars().filter(|c| c.is_ascii_digit()).collect();
                digits.parse::<i64>().ok()
            })
            .map(crate::document::model::Money)
            .unwrap_or_default();
        let digest_hex = qrcode::digest_value_hex(signed)?;
        let issue_day = tag_text(signed, "dhEmi")
            .and_then(|d| d.get(8..10).and_then(|s| s.parse().ok()))
            .unwrap_or_else(|| chrono::Local::now().day());
        let emission = match tag_text(signed, "tpEmis").as_deref() {
            Some("9") => crate::access_key::EmissionType::OfflineContingency,
            _ => crate::access_key::EmissionType::Normal,
        };

        let payload = qrcode::qr_payload(&QrCodeParams {
            key,
            environment: self.config.environment,
            uf: self.config.uf,
            csc,
            emission,
            total,
            digest_hex: &digest_hex,
            issue_day,
        })?;
        let qr_url = format!("{}?p={}", self.registry.qr_code_url(), payload);
        let supplement = qrcode::build_supplement(&qr_url, self.registry.consultation_url());
        qrcode::inject_supplement(signed, &supplement)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Cancel an authorized document.
    pub async fn cancel(
        &self,
        key: AccessKey,
        protocol: impl Into<String>,
        justification: impl Into<String>,
    ) -> Result<EventOutcome> {
        self.send_event(EventRequest {
            event_type: EventType::Cancellation,
            key,
            sequence: 1,
            justification: Some(justification.into()),
            protocol: Some(protocol.into()),
        })
        .await
    }

    /// Send a correction letter (CC-e) for an authorized document.
    pub async fn correct(
        &self,
        key: AccessKey,
        sequence: u16,
        correction: impl Into<String>,
    ) -> Result<EventOutcome> {
        self.send_event(EventRequest {
            event_type: EventType::Correction,
            key,
            sequence,
            justification: Some(correction.into()),
            protocol: None,
        })
        .await
    }

    /// Manifest against a document issued to this tax id.
    ///
    /// Only "not performed" takes a justification; the other kinds
    /// reject one as a validation error.
    pub async fn manifest(
        &self,
        key: AccessKey,
        kind: EventType,
        justification: Option<String>,
    ) -> Result<EventOutcome> {
        if !kind.is_manifestation() {
            return Err(SefazError::validation(format!(
                "{} is not a manifestation event",
                kind.code()
            )));
        }
        if justification.is_some() && kind != EventType::ManifestNotPerformed {
            return Err(SefazError::validation(
                "only the not-performed manifestation takes a justification",
            ));
        }
        self.send_event(EventRequest {
            event_type: kind,
            key,
            sequence: 1,
            justification,
            protocol: None,
        })
        .await
    }

    async fn send_event(&self, request: EventRequest) -> Result<EventOutcome> {
        request.validate()?;

        let author = self
            .material
            .subject_tax_id
            .clone()
            .unwrap_or_else(|| request.key.issuer_tax_id().to_owned());
        let now = chrono::Local::now().fixed_offset();
        let unsigned = request.to_xml(self.config.environment, &author, now)?;
        let signed = self.signer.sign(&unsigned, "infEvento")?;
        let payload = event::batch_envelope(&signed);

        let service = if request.event_type.is_manifestation() {
            Service::NationalEvent
        } else {
            Service::Event
        };
        let soap = self.request_for(service, event::SERVICE_NS, event::ACTION, payload)?;
        let raw = self.transmit(&soap).await?;

        let resolved = self.resolved(&raw)?;
        let success = is_success(&resolved.status, event::SUCCESS_CODES);
        let state = if success {
            match request.event_type {
                EventType::Cancellation => Some(LifecycleState::Cancelled),
                EventType::Correction => Some(LifecycleState::CorrectionAcknowledged),
                _ => None,
            }
        } else {
            None
        };

        Ok(EventOutcome {
            success,
            state,
            status: resolved.status,
            message: resolved.message,
            protocol: resolved.protocol,
            raw_response: raw,
        })
    }

    /// Void an unused numbering range.
    pub async fn inutilize(&self, request: InutilizationRequest) -> Result<EventOutcome> {
        request.validate()?;

        let issuer = self
            .material
            .subject_tax_id
            .clone()
            .ok_or_else(|| SefazError::certificate("certificate carries no tax id"))?;
        let unsigned = request.to_xml(self.config.environment, self.config.uf, &issuer)?;
        let signed = self.signer.sign(&unsigned, "infInut")?;

        let soap = self.request_for(
            Service::Inutilization,
            inutilize::SERVICE_NS,
            inutilize::ACTION,
            signed,
        )?;
        let raw = self.transmit(&soap).await?;

        let resolved = self.resolved(&raw)?;
        let success = is_success(&resolved.status, inutilize::SUCCESS_CODES);
        Ok(EventOutcome {
            success,
            state: success.then_some(LifecycleState::RangeInutilized),
            status: resolved.status,
            message: resolved.message,
            protocol: resolved.protocol,
            raw_response: raw,
        })
    }

    // =========================================================================
    // Queries and distribution
    // =========================================================================

    /// Query a document by 44-digit access key or a batch by 15-digit
    /// receipt number. Routing is decided by the digit count.
    pub async fn query(&self, input: &str) -> Result<SubmissionOutcome> {
        let target = QueryTarget::from_input(input)?;
        let payload = target.to_xml(self.config.environment);

        let (service, ns, action) = match &target {
            QueryTarget::Key(_) => (
                Service::ProtocolQuery,
                query::PROTOCOL_SERVICE_NS,
                query::PROTOCOL_ACTION,
            ),
            QueryTarget::Receipt(_) => (
                Service::ReceiptQuery,
                query::RECEIPT_SERVICE_NS,
                query::RECEIPT_ACTION,
            ),
        };
        let soap = self.request_for(service, ns, action, payload)?;
        let raw = self.transmit(&soap).await?;

        let resolved = self.resolved(&raw)?;
        // On a processed batch the embedded protNFe overrides the 104
        // envelope status, so receipt queries accept the per-document
        // codes as well.
        let success = match &target {
            QueryTarget::Key(_) => is_success(&resolved.status, target.success_codes()),
            QueryTarget::Receipt(_) => {
                is_success(&resolved.status, target.success_codes())
                    || is_success(&resolved.status, query::KEY_SUCCESS_CODES)
            }
        };

        Ok(SubmissionOutcome {
            success,
            state: query_state(&resolved.status),
            resolved_access_key: resolved.key.clone(),
            status: resolved.status,
            message: resolved.message,
            protocol: resolved.protocol,
            raw_response: raw,
            signed_xml_echo: None,
        })
    }

    /// Check whether the jurisdiction's authorization service is up.
    ///
    /// Resolves the authority's own status tuple (107 when operational);
    /// useful before deciding to enter contingency emission.
    pub async fn service_status(&self) -> Result<ResolvedStatus> {
        let payload = query::status_payload(self.config.environment, self.config.uf);
        let soap = self.request_for(
            Service::Status,
            query::STATUS_SERVICE_NS,
            query::STATUS_ACTION,
            payload,
        )?;
        let raw = self.transmit(&soap).await?;
        self.resolved(&raw)
    }

    /// Pull the DF-e distribution feed for this certificate's tax id.
    pub async fn distribute(&self, query: DistributionQuery) -> Result<DistributionBatch> {
        let tax_id = self
            .material
            .subject_tax_id
            .clone()
            .ok_or_else(|| SefazError::certificate("certificate carries no tax id"))?;
        let payload = query.to_xml(self.config.environment, self.config.uf, &tax_id);

        let soap = self.request_for(
            Service::Distribution,
            distribution::SERVICE_NS,
            distribution::ACTION,
            payload,
        )?;
        let raw = self.transmit(&soap).await?;

        let resolved = self.resolved(&raw)?;
        if !is_success(&resolved.status, distribution::SUCCESS_CODES) {
            return Err(SefazError::rejection(resolved.status, resolved.message));
        }
        distribution::parse_batch(&raw)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn request_for(
        &self,
        service: Service,
        service_ns: &str,
        action: &str,
        payload: String,
    ) -> Result<SoapRequest> {
        Ok(SoapRequest {
            url: self.registry.resolve(service)?,
            action: action.to_owned(),
            service_ns: service_ns.to_owned(),
            payload,
            version: SoapVersion::V12,
        })
    }

    async fn transmit(&self, request: &SoapRequest) -> Result<String> {
        self.policy
            .execute(&self.primary, &self.fallback, request)
            .await
    }

    fn resolved(&self, raw: &str) -> Result<ResolvedStatus> {
        match resolve(raw) {
            Some(resolved) if resolved.has_status() => Ok(resolved),
            Some(fault) => Err(SefazError::transient(format!(
                "SOAP fault without structured status: {}",
                fault.message
            ))),
            None => Err(SefazError::structural(
                "authority response carries no recognizable status",
            )),
        }
    }

    /// Force `tpAmb` to the configured environment. Only legal on
    /// unsigned XML.
    fn force_environment(&self, xml: &str) -> String {
        let configured = self.config.environment.code();
        xml.replace("<tpAmb>1</tpAmb>", &format!("<tpAmb>{}</tpAmb>", configured))
            .replace("<tpAmb>2</tpAmb>", &format!("<tpAmb>{}</tpAmb>", configured))
    }

    /// Hard guard: signed XML whose `tpAmb` disagrees with the
    /// configuration never reaches the network.
    fn check_environment(&self, xml: &str) -> Result<()> {
        if let Some(embedded) = tag_text(xml, "tpAmb") {
            let embedded = embedded.trim().to_owned();
            if embedded != self.config.environment.code() {
                return Err(SefazError::mismatch(
                    embedded,
                    self.config.environment.code(),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SefazClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SefazClient")
            .field("config", &self.config)
            .field("material", &self.material)
            .finish()
    }
}

/// Lifecycle after a submission response.
fn submit_state(status: &str) -> LifecycleState {
    match status {
        "100" | "150" => LifecycleState::Authorized,
        // Lot received / in processing: final word comes from the
        // receipt query.
        "103" | "105" => LifecycleState::Pending,
        _ => LifecycleState::Rejected,
    }
}

/// Lifecycle after a query response.
fn query_state(status: &str) -> LifecycleState {
    match status {
        "100" | "150" => LifecycleState::Authorized,
        "101" | "151" | "135" | "155" => LifecycleState::Cancelled,
        "136" => LifecycleState::CorrectionAcknowledged,
        "103" | "105" => LifecycleState::Pending,
        _ => LifecycleState::Rejected,
    }
}
