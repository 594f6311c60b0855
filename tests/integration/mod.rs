//! Integration test utilities and helpers
//!
//! Provides the mock authority server, certificate fixtures and document
//! fixtures shared by the operation tests.

use std::sync::Arc;

use chrono::TimeZone;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sefaz_client::document::{
    Address, CofinsTax, DocumentForm, IcmsTax, Issuer, LineItem, Money, Payment, PaymentMethod,
    PisTax, Quantity, TaxRegime,
};
use sefaz_client::{
    AccessKey, CertificateMaterial, DocumentModel, EmissionType, Environment, SefazClient,
    SefazClientConfig, Uf,
};

/// Service paths under the override base.
pub const PATH_AUTHORIZE: &str = "/ws/NFeAutorizacao4.asmx";
pub const PATH_EVENT: &str = "/ws/NFeRecepcaoEvento4.asmx";
pub const PATH_INUTILIZE: &str = "/ws/NfeInutilizacao4.asmx";
pub const PATH_PROTOCOL_QUERY: &str = "/ws/NfeConsultaProtocolo4.asmx";
pub const PATH_RECEIPT_QUERY: &str = "/ws/NFeRetAutorizacao4.asmx";
pub const PATH_DISTRIBUTION: &str = "/ws/NFeDistribuicaoDFe.asmx";

pub const CONTENT_TYPE_SOAP12: &str = "application/soap+xml; charset=utf-8";

/// Mock authority server for integration tests
pub struct MockSefazServer {
    server: MockServer,
}

impl MockSefazServer {
    /// Start the mock server.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Override base URL for the client configuration.
    pub fn ws_base(&self) -> String {
        format!("{}/ws/", self.server.uri())
    }

    /// Access the inner server for custom mocking or request inspection.
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Number of requests the server has received so far.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Mount a SOAP response on a service path.
    pub async fn mock_response(&self, service_path: &str, body: &str) {
        Mock::given(method("POST"))
            .and(path(service_path))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body.to_owned())
                    .insert_header("Content-Type", CONTENT_TYPE_SOAP12),
            )
            .mount(&self.server)
            .await;
    }

    /// Mount a response that answers only the first `n` requests.
    pub async fn mock_response_n_times(&self, service_path: &str, body: &str, n: u64) {
        Mock::given(method("POST"))
            .and(path(service_path))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body.to_owned())
                    .insert_header("Content-Type", CONTENT_TYPE_SOAP12),
            )
            .up_to_n_times(n)
            .mount(&self.server)
            .await;
    }
}

/// SOAP-wrap a result payload the way the authority frames it.
pub fn soap_result(inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\">\
         <soap:Body><nfeResultMsg>{}</nfeResultMsg></soap:Body></soap:Envelope>",
        inner
    )
}

/// An authorization response carrying an embedded protocol.
pub fn authorized_body(key: &str, protocol: &str) -> String {
    soap_result(&format!(
        "<retEnviNFe versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
         <tpAmb>2</tpAmb><cStat>104</cStat><xMotivo>Lote processado</xMotivo>\
         <protNFe versao=\"4.00\"><infProt><tpAmb>2</tpAmb><chNFe>{key}</chNFe>\
         <nProt>{protocol}</nProt><cStat>100</cStat>\
         <xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe></retEnviNFe>",
        key = key,
        protocol = protocol,
    ))
}

/// A rejection response with the authority's own wording.
pub fn rejected_body(status: &str, reason: &str) -> String {
    soap_result(&format!(
        "<retEnviNFe versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
         <tpAmb>2</tpAmb><cStat>104</cStat><xMotivo>Lote processado</xMotivo>\
         <protNFe versao=\"4.00\"><infProt><cStat>{status}</cStat>\
         <xMotivo>{reason}</xMotivo></infProt></protNFe></retEnviNFe>",
        status = status,
        reason = reason,
    ))
}

/// An event registration response.
pub fn event_body(status: &str, reason: &str, protocol: &str) -> String {
    soap_result(&format!(
        "<retEnvEvento versao=\"1.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
         <cStat>128</cStat><xMotivo>Lote de evento processado</xMotivo>\
         <retEvento versao=\"1.00\"><infEvento><tpAmb>2</tpAmb><cStat>{status}</cStat>\
         <xMotivo>{reason}</xMotivo><nProt>{protocol}</nProt></infEvento></retEvento>\
         </retEnvEvento>",
        status = status,
        reason = reason,
        protocol = protocol,
    ))
}

/// In-memory PKCS#12 material with an ICP-Brasil-style subject CN.
pub fn test_material() -> Arc<CertificateMaterial> {
    use openssl::hash::MessageDigest;
    use openssl::pkcs12::Pkcs12;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Builder, X509NameBuilder};

    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "EMPRESA TESTE LTDA:12345678000195")
        .unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder
        .set_not_before(&openssl::asn1::Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&openssl::asn1::Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    let pkcs12 = Pkcs12::builder()
        .name("integration test")
        .pkey(&pkey)
        .cert(&cert)
        .build2("segredo")
        .unwrap();
    let der = pkcs12.to_der().unwrap();

    Arc::new(CertificateMaterial::from_pkcs12(&der, "segredo").unwrap())
}

/// A client routed at the mock server.
pub fn test_client(mock: &MockSefazServer, model: DocumentModel) -> SefazClient {
    test_client_in(mock, model, Environment::Homologation)
}

/// A client routed at the mock server, in a chosen environment.
pub fn test_client_in(
    mock: &MockSefazServer,
    model: DocumentModel,
    environment: Environment,
) -> SefazClient {
    let mut builder = SefazClientConfig::builder()
        .environment(environment)
        .uf(Uf::Sp)
        .model(model)
        .retry_delay(std::time::Duration::from_millis(5))
        .trust_any_insecure()
        .endpoint_override(mock.ws_base())
        .unwrap();
    if model == DocumentModel::Nfce {
        builder = builder.csc("000001", "TOKEN-CSC-TESTE");
    }
    SefazClient::new(builder.build().unwrap(), test_material()).unwrap()
}

/// A minimal consumer sale for submission tests.
pub fn sale_form(model: DocumentModel) -> DocumentForm {
    let issued_at = chrono::FixedOffset::west_opt(3 * 3600)
        .unwrap()
        .with_ymd_and_hms(2025, 7, 14, 10, 30, 0)
        .unwrap();

    let address = Address {
        street: "Rua das Laranjeiras".into(),
        number: "100".into(),
        district: "Centro".into(),
        municipality_code: "3550308".into(),
        municipality: "Sao Paulo".into(),
        uf: Uf::Sp,
        postal_code: "01001000".into(),
        phone: None,
    };

    let items = vec![LineItem {
        code: "001".into(),
        gtin: None,
        description: "Produto Teste".into(),
        ncm: "21069090".into(),
        cfop: "5102".into(),
        unit: "UN".into(),
        quantity: Quantity(10_000),
        unit_price: Money(1999),
        discount: Money::ZERO,
        icms: IcmsTax::simplified_no_credit("102"),
        pis: PisTax::exempt(),
        cofins: CofinsTax::exempt(),
        ipi: None,
    }];
    let total: Money = items.iter().map(LineItem::gross_value).sum();

    DocumentForm {
        model,
        series: 1,
        number: 42,
        issued_at,
        operation_nature: "VENDA AO CONSUMIDOR".into(),
        emission: EmissionType::Normal,
        issuer: Issuer {
            cnpj: "12345678000195".into(),
            legal_name: "Mercearia Boa Vista Ltda".into(),
            trade_name: None,
            state_registration: "111222333444".into(),
            tax_regime: TaxRegime::SimplesNacional,
            address,
        },
        recipient: None,
        items,
        payments: vec![Payment {
            method: PaymentMethod::Cash,
            amount: total,
        }],
        change: Money::ZERO,
        freight: None,
        additional_info: None,
    }
}

/// A parseable access key for query/event tests.
pub fn known_key() -> AccessKey {
    AccessKey::parse("35250712345678000195550010000042421123456784").unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mock = MockSefazServer::start().await;
        assert!(mock.ws_base().starts_with("http://"));
        assert!(mock.ws_base().ends_with("/ws/"));
    }

    #[tokio::test]
    async fn test_material_fixture_has_tax_id() {
        let material = test_material();
        assert_eq!(
            material.subject_tax_id.as_deref(),
            Some("12345678000195")
        );
    }
}
