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

//! Integration tests for cancellation, correction and manifestation.

use crate::integration::*;
use sefaz_client::{DocumentModel, EventType, LifecycleState, SefazError};

#[tokio::test]
async fn test_successful_cancellation() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_EVENT,
        &event_body("135", "Evento registrado e vinculado a NF-e", "135250000000099"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client
        .cancel(
            known_key(),
            "135250000000001",
            "Erro de digitacao no pedido do cliente",
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.status, "135");
    assert_eq!(outcome.state, Some(LifecycleState::Cancelled));
    assert_eq!(outcome.protocol.as_deref(), Some("135250000000099"));
}

#[tokio::test]
async fn test_cancellation_out_of_deadline_still_registers() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_EVENT,
        &event_body("155", "Cancelamento homologado fora de prazo", "135250000000100"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client
        .cancel(known_key(), "135250000000001", "Cliente desistiu da compra efetuada")
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.status, "155");
}

#[tokio::test]
async fn test_short_justification_never_reaches_network() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(PATH_EVENT, &event_body("135", "x", "y")).await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let err = client
        .cancel(known_key(), "135250000000001", "curta")
        .await
        .unwrap_err();

    assert!(matches!(err, SefazError::Validation(_)));
    assert_eq!(mock.request_count().await, 0);
}

#[tokio::test]
async fn test_correction_letter_acknowledged() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_EVENT,
        &event_body("135", "Evento registrado e vinculado a NF-e", "135250000000101"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client
        .correct(known_key(), 1, "Corrigir a razao social do transportador")
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.state, Some(LifecycleState::CorrectionAcknowledged));
}

#[tokio::test]
async fn test_event_rejection_surfaces_authority_message() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(
        PATH_EVENT,
        &event_body("573", "Rejeicao: Duplicidade de evento", "000000000000000"),
    )
    .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client
        .cancel(known_key(), "135250000000001", "Erro de digitacao no pedido")
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.status, "573");
    assert_eq!(outcome.message, "Rejeicao: Duplicidade de evento");
    assert_eq!(outcome.state, None);
}

#[tokio::test]
async fn test_manifestation_without_justification() {
    let mock = MockSefazServer::start().await;
    mock.mock_response(PATH_EVENT, &event_body("135", "Evento registrado", "135250000000102"))
        .await;

    let client = test_client(&mock, DocumentModel::Nfe);
    let outcome = client
        .manifest(known_key(), EventType::ManifestAwareness, None)
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.state, None, "manifestation does not move document state");
}

#[tokio::test]
async fn test_not_performed_requires_justification() {
    let mock = MockSefazServer::start().await;
    let client = test_client(&mock, DocumentModel::Nfe);

    let err = client
        .manifest(known_key(), EventType::ManifestNotPerformed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SefazError::Validation(_)));

    // And a justification on the other kinds is rejected too.
    let err = client
        .manifest(
            known_key(),
            EventType::ManifestConfirmation,
            Some("Justificativa indevida aqui".into()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SefazError::Validation(_)));
    assert_eq!(mock.request_count().await, 0);
}

#[tokio::test]
async fn test_non_manifestation_kind_rejected_by_manifest() {
    let mock = MockSefazServer::start().await;
    let client = test_client(&mock, DocumentModel::Nfe);

    let err = client
        .manifest(known_key(), EventType::Cancellation, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SefazError::Validation(_)));
}
