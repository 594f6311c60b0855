//! Integration tests for the DF-e distribution feed.

use crate::integration::*;

use base64::prelude::*;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

use sefaz_client::{DistributionQuery, DocumentModel, SefazError};

fn gzip_b64(xml: &str) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    BASE64_STANDARD.encode(encoder.finish().unwrap())
}

fn feed_body(doc_zips: &[(u64, &str, String)], last_nsu: u64, max_nsu: u64) -> String {
    let mut lote = String::new();
    for (nsu, schema, content) in doc_zips {
        lote.push_str(&format!(
            "<docZip NSU=\"{:015}\" schema=\"{}\">{}</docZip>",
            nsu, schema, content
        ));
    }
    soap_result(&format!(
        "<retDistDFeInt versao=\"1.01\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
         <tpAmb>2</tpAmb><cStat>138</cStat><xMotivo>Documento localizado</xMotivo>\
         <ultNSU>{:015}</ultNSU><maxNSU>{:015}</maxNSU>\
         <loteDistDFeInt>{}</loteDistDFeInt></retDistDFeInt>",
        last_nsu, max_nsu, lote
    ))
}

#[tokio::test]
async fn test_feed_unpacks_gzip_documents() {
    let mock = MockSefazServer::start().await;
    let key = known_key();
    let summary = format!(
        "<resNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\"><chNFe>{}</chNFe>\
         <CNPJ>98765432000188</CNPJ><xNome>Fornecedor Ltda</xNome></resNFe>",
        key.as_str()
    );
    mock.mock_response(
        PATH_DISTRIBUTION,
        &feed_body(&[(51, "resNFe_v1.01", gzip_b64(&summary))], 51, 80),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let batch = client.distribute(DistributionQuery::AfterNsu(50)).await.unwrap();

    assert_eq!(batch.last_nsu, 51);
    assert_eq!(batch.max_nsu, 80);
    assert_eq!(batch.documents.len(), 1);

    let document = &batch.documents[0];
    assert_eq!(document.nsu, 51);
    assert_eq!(document.schema, "resNFe_v1.01");
    assert!(document.decompressed);
    assert_eq!(document.document_key.as_deref(), Some(key.as_str()));
    assert_eq!(document.xml().unwrap(), summary);
}

#[tokio::test]
async fn test_corrupt_payload_is_passed_through_raw() {
    let mock = MockSefazServer::start().await;
    let corrupt = BASE64_STANDARD.encode(b"not gzip at all");
    mock.mock_response(
        PATH_DISTRIBUTION,
        &feed_body(&[(52, "procNFe_v4.00", corrupt)], 52, 52),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let batch = client.distribute(DistributionQuery::AfterNsu(51)).await.unwrap();

    let document = &batch.documents[0];
    assert!(!document.decompressed, "undecodable payloads are kept, not dropped");
    assert_eq!(document.payload, b"not gzip at all");
}

#[tokio::test]
async fn test_empty_feed_reports_cursor_only() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_DISTRIBUTION,
        &soap_result(
            "<retDistDFeInt versao=\"1.01\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <tpAmb>2</tpAmb><cStat>137</cStat><xMotivo>Nenhum documento localizado</xMotivo>\
             <ultNSU>000000000000099</ultNSU><maxNSU>000000000000099</maxNSU></retDistDFeInt>",
        ),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let batch = client.distribute(DistributionQuery::AfterNsu(99)).await.unwrap();

    assert!(batch.documents.is_empty());
    assert_eq!(batch.last_nsu, 99);
}

#[tokio::test]
async fn test_feed_rejection_is_authority_error() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_DISTRIBUTION,
        &soap_result(
            "<retDistDFeInt versao=\"1.01\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <cStat>589</cStat><xMotivo>Rejeicao: Uso indevido do servico</xMotivo>\
             <ultNSU>0</ultNSU><maxNSU>0</maxNSU></retDistDFeInt>",
        ),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let err = client
        .distribute(DistributionQuery::AfterNsu(0))
        .await
        .unwrap_err();

    assert!(matches!(err, SefazError::AuthorityRejection { .. }));
    assert_eq!(err.authority_status(), Some("589"));
}
