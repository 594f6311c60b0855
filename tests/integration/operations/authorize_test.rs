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

//! Integration tests for document authorization.

use crate::integration::*;
use sefaz_client::document::DocumentBuilder;
use sefaz_client::{
    DocumentModel, Environment, LifecycleState, SefazError, XmlSigner,
};

#[tokio::test]
async fn test_successful_authorization() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_AUTHORIZE,
        &authorized_body("35250712345678000195550010000042421123456784", "135250000000001"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.submit(&sale_form(DocumentModel::Nfe)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.status, "100");
    assert_eq!(outcome.state, LifecycleState::Authorized);
    assert_eq!(outcome.protocol.as_deref(), Some("135250000000001"));
    assert!(outcome.signed_xml_echo.as_deref().unwrap().contains("<Signature"));
    assert!(!outcome.raw_response.is_empty());
}

#[tokio::test]
async fn test_rejection_preserves_authority_wording() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_AUTHORIZE,
        &rejected_body("539", "Rejeicao: Duplicidade de NF-e com diferenca na Chave de Acesso"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.submit(&sale_form(DocumentModel::Nfe)).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.status, "539");
    assert_eq!(outcome.state, LifecycleState::Rejected);
    assert_eq!(
        outcome.message,
        "Rejeicao: Duplicidade de NF-e com diferenca na Chave de Acesso"
    );

    // The failed outcome converts into an AuthorityRejection verbatim.
    let err = outcome.into_result().unwrap_err();
    assert_eq!(err.authority_status(), Some("539"));
}

#[tokio::test]
async fn test_nfce_submission_carries_qr_supplement() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_AUTHORIZE,
        &authorized_body("35250712345678000195650010000042421123456784", "135250000000002"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfce);
    let outcome = client.submit(&sale_form(DocumentModel::Nfce)).await.unwrap();

    let signed = outcome.signed_xml_echo.unwrap();
    let supplement_at = signed.find("<infNFeSupl>").expect("QR supplement present");
    assert!(supplement_at > signed.find("</infNFe>").unwrap());
    assert!(supplement_at < signed.find("<Signature").unwrap());
    assert!(signed.contains("<qrCode>"));
    assert!(signed.contains("<urlChave>"));
}

#[tokio::test]
async fn test_environment_mismatch_makes_zero_network_calls() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(PATH_AUTHORIZE, &authorized_body("x", "y")).await;

    // Render and sign against production while the client is configured
    // for homologation.
    let form = sale_form(DocumentModel::Nfe);
    let key = sefaz_client::AccessKey::compose(
        sefaz_client::Uf::Sp,
        form.issued_at,
        &form.issuer.cnpj,
        form.model,
        form.series,
        form.number,
        form.emission,
        7_654_321,
    )
    .unwrap();
    let xml = DocumentBuilder::new(Environment::Production, None)
        .render(&form, &key)
        .unwrap();
    let signed = XmlSigner::new(test_material()).sign(&xml, "infNFe").unwrap();

    let client = test_client_in(&mock, DocumentModel::Nfe, Environment::Homologation);
    let err = client.submit_xml(&signed).await.unwrap_err();

    assert!(matches!(err, SefazError::ProtocolMismatch { .. }));
    assert_eq!(mock.request_count().await, 0, "mismatch must stop before the network");
}

#[tokio::test]
async fn test_unsigned_xml_gets_environment_forced_and_signed() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_AUTHORIZE,
        &authorized_body("35250712345678000195550010000042421123456784", "135250000000001"),
    )
    .await;

    // Unsigned production-flagged XML is normalized, not rejected.
    let form = sale_form(DocumentModel::Nfe);
    let key = sefaz_client::AccessKey::compose(
        sefaz_client::Uf::Sp,
        form.issued_at,
        &form.issuer.cnpj,
        form.model,
        form.series,
        form.number,
        form.emission,
        7_654_321,
    )
    .unwrap();
    let xml = DocumentBuilder::new(Environment::Production, None)
        .render(&form, &key)
        .unwrap();

    let client = test_client_in(&mock, DocumentModel::Nfe, Environment::Homologation);
    let outcome = client.submit_xml(&xml).await.unwrap();

    assert!(outcome.success);
    let signed = outcome.signed_xml_echo.unwrap();
    assert!(signed.contains("<tpAmb>2</tpAmb>"));
    assert!(!signed.contains("<tpAmb>1</tpAmb>"));
}

#[tokio::test]
async fn test_model_mismatch_is_validation_error() {
    let mock = MockSefazServer::start().await;
    let client = test_client(&mock, DocumentModel::Nfe);

    let err = client
        .submit(&sale_form(DocumentModel::Nfce))
        .await
        .unwrap_err();
    assert!(matches!(err, SefazError::Validation(_)));
    assert_eq!(mock.request_count().await, 0);
}
