//! Integration tests for number-range inutilization.

use crate::integration::*;
use sefaz_client::{DocumentModel, InutilizationRequest, LifecycleState, SefazError};

fn range_request() -> InutilizationRequest {
    InutilizationRequest {
        year: 25,
        model: DocumentModel::Nfe,
        series: 1,
        from: 101,
        to: 110,
        justification: "Faixa pulada por falha no emissor".into(),
    }
}

fn inutilization_body(status: &str, reason: &str) -> String {
    soap_result(&format!(
        "<retInutNFe versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
         <infInut><tpAmb>2</tpAmb><cStat>{}</cStat><xMotivo>{}</xMotivo>\
         <nProt>135250000000200</nProt></infInut></retInutNFe>",
        status, reason
    ))
}

#[tokio::test]
async fn test_successful_inutilization() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_INUTILIZE,
        &inutilization_body("102", "Inutilizacao de numero homologado"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.inutilize(range_request()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.status, "102");
    assert_eq!(outcome.state, Some(LifecycleState::RangeInutilized));
    assert_eq!(outcome.protocol.as_deref(), Some("135250000000200"));
}

#[tokio::test]
async fn test_short_justification_fails_before_network() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(PATH_INUTILIZE, &inutilization_body("102", "x")).await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let mut request = range_request();
    request.justification = "curta demais".into();

    let err = client.inutilize(request).await.unwrap_err();
    assert!(matches!(err, SefazError::Validation(_)));
    assert_eq!(mock.request_count().await, 0);
}

#[tokio::test]
async fn test_rejected_range_surfaces_status() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_INUTILIZE,
        &inutilization_body("241", "Rejeicao: Um numero da faixa ja foi utilizado"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.inutilize(range_request()).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.status, "241");
    assert_eq!(outcome.state, None);
}
