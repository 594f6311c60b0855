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

//! Integration tests for the SOAP fallback matrix.

use crate::integration::*;
use sefaz_client::DocumentModel;

#[tokio::test]
async fn test_empty_responses_exhaust_exact_fallback_matrix() {
    let mock = MockSefazServer::start().await;
    // Every attempt gets an empty body, which requires fallback.
    mock.mock_response(PATH_AUTHORIZE, "").await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let err = client.submit(&sale_form(DocumentModel::Nfe)).await.unwrap_err();

    assert!(err.is_transient(), "exhausted matrix surfaces the last error: {:?}", err);
    // 1 primary attempt + SOAP 1.2 x2 + SOAP 1.1 x2 on the raw fallback.
    assert_eq!(mock.request_count().await, 5);
}

#[tokio::test]
async fn test_fallback_recovers_on_first_raw_attempt() {
    let mock = MockSefazServer::start().await;
    // First request (primary) is swallowed; the next one succeeds.
    mock.mock_response_n_times(PATH_AUTHORIZE, "", 1).await;
    mock.mock_response(
        PATH_AUTHORIZE,
        &authorized_body("35250712345678000195550010000042421123456784", "135250000000001"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.submit(&sale_form(DocumentModel::Nfe)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(mock.request_count().await, 2, "no attempts after the first success");
}

#[tokio::test]
async fn test_start_element_fault_triggers_fallback_without_transport_error() {
    let mock = MockSefazServer::start().await;
    let fault = "<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\">\
                 <soap:Body><soap:Fault><faultstring>Unexpected element: expected \
                 START_ELEMENT</faultstring></soap:Fault></soap:Body></soap:Envelope>";
    mock.mock_response_n_times(PATH_AUTHORIZE, fault, 1).await;
    mock.mock_response(
        PATH_AUTHORIZE,
        &authorized_body("35250712345678000195550010000042421123456784", "135250000000001"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.submit(&sale_form(DocumentModel::Nfe)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(mock.request_count().await, 2);
}

#[tokio::test]
async fn test_fallback_attempts_switch_soap_versions() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(PATH_AUTHORIZE, "").await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let _ = client.submit(&sale_form(DocumentModel::Nfe)).await;

    let requests = mock.inner().received_requests().await.unwrap();
    assert_eq!(requests.len(), 5);

    let content_types: Vec<String> = requests
        .iter()
        .map(|r| {
            r.headers
                .get("content-type")
                .map(|v| v.to_str().unwrap_or_default().to_owned())
                .unwrap_or_default()
        })
        .collect();

    // Primary + first two fallback attempts are SOAP 1.2; the last two
    // are SOAP 1.1 with a SOAPAction header.
    assert!(content_types[0].starts_with("application/soap+xml"));
    assert!(content_types[1].starts_with("application/soap+xml"));
    assert!(content_types[2].starts_with("application/soap+xml"));
    assert!(content_types[3].starts_with("text/xml"));
    assert!(content_types[4].starts_with("text/xml"));
    assert!(requests[3].headers.contains_key("soapaction"));
    assert!(requests[4].headers.contains_key("soapaction"));
}

#[tokio::test]
async fn test_rejection_is_never_retried() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_AUTHORIZE,
        &rejected_body("539", "Rejeicao: Duplicidade de NF-e"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client.submit(&sale_form(DocumentModel::Nfe)).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(
        mock.request_count().await,
        1,
        "an authority rejection is a final answer, not a retry trigger"
    );
    let second = client
        .submit(&sale_form(DocumentModel::Nfe))
        .await
        .unwrap();
    assert!(!second.success);
}
