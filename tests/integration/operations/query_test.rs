//! Integration tests for protocol and receipt queries.

use crate::integration::*;
use sefaz_client::{DocumentModel, LifecycleState, SefazError};

#[tokio::test]
async fn test_key_query_resolves_authorization() {
    let mock = MockSefazServer::start().await;
    let key = known_key();
    mock.mock_response(
        PATH_PROTOCOL_QUERY,
        &soap_result(&format!(
            "<retConsSitNFe versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo>\
             <protNFe><infProt><chNFe>{}</chNFe><nProt>135250000000001</nProt>\
             <cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe>\
             </retConsSitNFe>",
            key.as_str()
        )),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.query(key.as_str()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.status, "100");
    assert_eq!(outcome.state, LifecycleState::Authorized);
    assert_eq!(outcome.resolved_access_key.as_deref(), Some(key.as_str()));
}

#[tokio::test]
async fn test_cancellation_event_wins_over_authorization() {
    let mock = MockSefazServer::start().await;
    let key = known_key();
    mock.mock_response(
        PATH_PROTOCOL_QUERY,
        &soap_result(&format!(
            "<retConsSitNFe versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo>\
             <protNFe><infProt><chNFe>{key}</chNFe><nProt>135250000000001</nProt>\
             <cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe>\
             <procEventoNFe><retEvento versao=\"1.00\"><infEvento><tpEvento>110111</tpEvento>\
             <cStat>135</cStat><xMotivo>Evento registrado e vinculado a NF-e</xMotivo>\
             <chNFe>{key}</chNFe><nProt>135250000000099</nProt></infEvento></retEvento>\
             </procEventoNFe></retConsSitNFe>",
            key = key.as_str()
        )),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.query(key.as_str()).await.unwrap();

    assert_eq!(outcome.status, "135", "the later cancellation event must win");
    assert_eq!(outcome.state, LifecycleState::Cancelled);
    assert_eq!(outcome.protocol.as_deref(), Some("135250000000099"));
}

#[tokio::test]
async fn test_receipt_query_routes_to_receipt_endpoint() {
    let mock = MockSefazServer::start().await;
    let key = known_key();
    mock.mock_response(
        PATH_RECEIPT_QUERY,
        &soap_result(&format!(
            "<retConsReciNFe versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <nRec>351000012345678</nRec><cStat>104</cStat><xMotivo>Lote processado</xMotivo>\
             <protNFe><infProt><chNFe>{}</chNFe><nProt>135250000000001</nProt>\
             <cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe>\
             </retConsReciNFe>",
            key.as_str()
        )),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.query("351000012345678").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.status, "100", "embedded protNFe overrides the 104 envelope");
    assert_eq!(outcome.state, LifecycleState::Authorized);

    let requests = mock.inner().received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), PATH_RECEIPT_QUERY);
}

#[tokio::test]
async fn test_unknown_document_query() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_PROTOCOL_QUERY,
        &soap_result(
            "<retConsSitNFe versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <cStat>217</cStat><xMotivo>NF-e nao consta na base de dados da SEFAZ</xMotivo>\
             </retConsSitNFe>",
        ),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.query(known_key().as_str()).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.status, "217");
    assert_eq!(outcome.state, LifecycleState::Rejected);
}

#[tokio::test]
async fn test_service_status() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        "/ws/NfeStatusServico4.asmx",
        &soap_result(
            "<retConsStatServ versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <tpAmb>2</tpAmb><cStat>107</cStat><xMotivo>Servico em Operacao</xMotivo>\
             </retConsStatServ>",
        ),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let status = client.service_status().await.unwrap();

    assert_eq!(status.status, "107");
    assert_eq!(status.message, "Servico em Operacao");
}

#[tokio::test]
async fn test_malformed_query_input_rejected_locally() {
    let mock = MockSefazServer::start().await;
    let client = test_client(&mock, DocumentModel::Nfe);

    let err = client.query("12345").await.unwrap_err();
    assert!(matches!(err, SefazError::Validation(_)));
    assert_eq!(mock.request_count().await, 0);
}
