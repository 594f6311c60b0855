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

//! The 44-digit document access key.
//!
//! Every fiscal document is identified by an access key composed of 43
//! fixed-width numeric fields plus a mod-11 check digit:
//!
//! ```text
//! cUF(2) AAMM(4) CNPJ(14) mod(2) serie(3) nNF(9) tpEmis(1) cNF(8) cDV(1)
//! ```
//!
//! The key is derived once and immutable; it is embedded in the document
//! XML (`Id="NFe<key>"`), in event identifiers, and in the NFC-e QR code.

use chrono::{DateTime, Datelike, FixedOffset};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{DocumentModel, Uf};
use crate::error::{Result, SefazError};

/// A validated 44-digit access key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessKey(String);

/// Emission type digit (`tpEmis`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmissionType {
    /// Normal emission against the jurisdiction's own service.
    Normal,
    /// Offline contingency (NFC-e).
    OfflineContingency,
    /// SVC-AN contingency service.
    SvcAn,
    /// SVC-RS contingency service.
    SvcRs,
}

impl EmissionType {
    /// The `tpEmis` wire digit.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Normal => "1",
            Self::SvcAn => "6",
            Self::SvcRs => "7",
            Self::OfflineContingency => "9",
        }
    }
}

impl AccessKey {
    /// Generate a key for the given document attributes, drawing the
    /// 8-digit `cNF` salt from the operating system CSPRNG.
    pub fn generate(
        uf: Uf,
        issue: DateTime<FixedOffset>,
        issuer_cnpj: &str,
        model: DocumentModel,
        series: u16,
        number: u32,
        emission: EmissionType,
    ) -> Result<Self> {
        let salt: u32 = OsRng.gen_range(0..100_000_000);
        Self::compose(uf, issue, issuer_cnpj, model, series, number, emission, salt)
    }

    /// Compose a key with an explicit `cNF` salt.
    ///
    /// Deterministic given identical inputs; the generated variant differs
    /// only in how the salt is drawn.
    #[allow(clippy::too_many_arguments)]
    pub fn compose(
        uf: Uf,
        issue: DateTime<FixedOffset>,
        issuer_cnpj: &str,
        model: DocumentModel,
        series: u16,
        number: u32,
        emission: EmissionType,
        salt: u32,
    ) -> Result<Self> {
        let cnpj = digits_only(issuer_cnpj);
        if cnpj.len() != 14 {
            return Err(SefazError::validation(format!(
                "issuer tax id must have 14 digits, got {}",
                cnpj.len()
            )));
        }
        if series > 999 {
            return Err(SefazError::validation(format!(
                "series {} does not fit 3 digits",
                series
            )));
        }
        if number == 0 || number > 999_999_999 {
            return Err(SefazError::validation(format!(
                "document number {} does not fit 9 digits",
                number
            )));
        }
        if salt >= 100_000_000 {
            return Err(SefazError::validation(format!(
                "cNF salt {} does not fit 8 digits",
                salt
            )));
        }

        let body = format!(
            "{uf}{yy:02}{mm:02}{cnpj}{model}{series:03}{number:09}{emission}{salt:08}",
            uf = uf.ibge_code(),
            yy = issue.year() % 100,
            mm = issue.month(),
            cnpj = cnpj,
            model = model.code(),
            series = series,
            number = number,
            emission = emission.code(),
            salt = salt,
        );
        debug_assert_eq!(body.len(), 43);

        let check = mod11_check_digit(&body);
        Ok(Self(format!("{}{}", body, check)))
    }

    /// Parse and validate an existing 44-digit key.
    ///
    /// Rejects keys with the wrong length, non-digit characters, or a
    /// check digit that does not match the first 43 digits.
    pub fn parse(key: &str) -> Result<Self> {
        if key.len() != 44 || !key.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SefazError::validation(format!(
                "access key must be 44 digits, got '{}'",
                key
            )));
        }
        let expected = mod11_check_digit(&key[..43]);
        let actual = key.as_bytes()[43] - b'0';
        if expected != actual {
            return Err(SefazError::validation(format!(
                "access key check digit mismatch: expected {}, got {}",
                expected, actual
            )));
        }
        Ok(Self(key.to_owned()))
    }

    /// The full 44-digit key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// IBGE code of the issuing jurisdiction (digits 0..2).
    pub fn uf_code(&self) -> &str {
        &self.0[0..2]
    }

    /// Issuer tax id (digits 6..20).
    pub fn issuer_tax_id(&self) -> &str {
        &self.0[6..20]
    }

    /// Document model (digits 20..22).
    pub fn model_code(&self) -> &str {
        &self.0[20..22]
    }

    /// Document series (digits 22..25).
    pub fn series(&self) -> &str {
        &self.0[22..25]
    }

    /// Document number (digits 25..34).
    pub fn number(&self) -> &str {
        &self.0[25..34]
    }

    /// Emission type digit (digit 34).
    pub fn emission_code(&self) -> &str {
        &self.0[34..35]
    }

    /// The `cNF` salt (digits 35..43).
    pub fn salt(&self) -> &str {
        &self.0[35..43]
    }

    /// The mod-11 check digit (`cDV`, digit 43).
    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[43] - b'0'
    }
}

impl std::fmt::Display for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the mod-11 check digit over a run of ASCII digits.
///
/// Weights cycle 2..9 starting from the rightmost digit; a remainder of
/// 0 or 1 maps to check digit 0, otherwise the digit is `11 - remainder`.
pub fn mod11_check_digit(digits: &str) -> u8 {
    let mut weight = 2u32;
    let mut sum = 0u32;
    for b in digits.bytes().rev() {
        sum += u32::from(b - b'0') * weight;
        weight = if weight == 9 { 2 } else { weight + 1 };
    }
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        (11 - remainder) as u8
    }
}

/// Strip every non-digit character (formatting like `12.345.678/0001-95`).
pub fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}
