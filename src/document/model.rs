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

//! Normalized input model for document rendering.
//!
//! The surrounding system (the excluded CRUD layer) maps its sale records
//! into these types. Monetary amounts are integer centavos and quantities
//! are integer ten-thousandths, so tax arithmetic is exact and the wire
//! formatting (2 and 4 decimals respectively) is a pure rendering concern.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::access_key::EmissionType;
use crate::config::{DocumentModel, Uf};
use crate::document::taxes::{CofinsTax, IcmsTax, IpiTax, PisTax};

/// Monetary amount in centavos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Money(pub i64);

impl Money {
    /// Zero.
    pub const ZERO: Money = Money(0);

    /// Wire format with exactly 2 decimals.
    pub fn format(&self) -> String {
        format!("{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }
}

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

/// Quantity in ten-thousandths of the commercial unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quantity(pub i64);

impl Quantity {
    /// Wire format with exactly 4 decimals.
    pub fn format(&self) -> String {
        format!("{}.{:04}", self.0 / 10_000, (self.0 % 10_000).abs())
    }
}

/// Percentage rate in basis points (18% = 1800).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rate(pub i64);

impl Rate {
    /// Wire format with exactly 2 decimals.
    pub fn format(&self) -> String {
        format!("{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }

    /// Apply the rate to an amount, rounding half away from zero.
    pub fn apply(&self, amount: Money) -> Money {
        let raw = amount.0 * self.0;
        Money((raw + 5_000) / 10_000)
    }
}

/// Issuer tax regime (`CRT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxRegime {
    /// Simples Nacional (`CRT = 1`); line taxes use CSOSN codes.
    SimplesNacional,
    /// Simples Nacional above the gross-revenue sublimit (`CRT = 2`).
    SimplesExcesso,
    /// Normal regime (`CRT = 3`); line taxes use CST codes.
    Normal,
}

impl TaxRegime {
    /// The `CRT` wire value.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SimplesNacional => "1",
            Self::SimplesExcesso => "2",
            Self::Normal => "3",
        }
    }

    /// Whether line-item ICMS uses the simplified (CSOSN) shapes.
    pub fn is_simplified(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// Postal address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    /// Street name (`xLgr`).
    pub street: String,
    /// Street number (`nro`).
    pub number: String,
    /// District (`xBairro`).
    pub district: String,
    /// 7-digit IBGE municipality code (`cMun`).
    pub municipality_code: String,
    /// Municipality name (`xMun`).
    pub municipality: String,
    /// Federative unit.
    pub uf: Uf,
    /// 8-digit postal code (`CEP`).
    pub postal_code: String,
    /// Contact phone, digits only (`fone`).
    pub phone: Option<String>,
}

/// Issuing company profile (`emit`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issuer {
    /// CNPJ, digits only or formatted.
    pub cnpj: String,
    /// Legal name (`xNome`).
    pub legal_name: String,
    /// Trade name (`xFant`).
    pub trade_name: Option<String>,
    /// State registration (`IE`).
    pub state_registration: String,
    /// Tax regime (`CRT`).
    pub tax_regime: TaxRegime,
    /// Establishment address.
    pub address: Address,
}

/// Recipient identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecipientId {
    /// Legal entity CNPJ.
    Cnpj(String),
    /// Natural person CPF.
    Cpf(String),
    /// Foreign buyer document (`idEstrangeiro`).
    Foreign(String),
}

/// Document recipient (`dest`). Optional for NFC-e below the
/// identification threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Tax identification.
    pub id: RecipientId,
    /// Name (`xNome`).
    pub name: String,
    /// Address; NFC-e commonly omits it.
    pub address: Option<Address>,
    /// State-registration indicator (`indIEDest`): 1 taxpayer,
    /// 2 exempt, 9 non-taxpayer.
    pub state_registration_indicator: u8,
    /// Contact e-mail.
    pub email: Option<String>,
}

/// One sale line (`det`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    /// Internal product code (`cProd`).
    pub code: String,
    /// GTIN/EAN; rendered as `SEM GTIN` when absent.
    pub gtin: Option<String>,
    /// Description (`xProd`).
    pub description: String,
    /// 8-digit NCM classification.
    pub ncm: String,
    /// 4-digit CFOP.
    pub cfop: String,
    /// Commercial unit (`uCom`).
    pub unit: String,
    /// Quantity in the commercial unit.
    pub quantity: Quantity,
    /// Unit price in centavos.
    pub unit_price: Money,
    /// Unconditional discount (`vDesc`).
    pub discount: Money,
    /// ICMS treatment.
    pub icms: IcmsTax,
    /// PIS treatment.
    pub pis: PisTax,
    /// COFINS treatment.
    pub cofins: CofinsTax,
    /// IPI treatment, when the item is industrialized.
    pub ipi: Option<IpiTax>,
}

impl LineItem {
    /// Gross line value (`vProd`): quantity × unit price, rounded half
    /// away from zero.
    pub fn gross_value(&self) -> Money {
        let raw = self.quantity.0 * self.unit_price.0;
        Money((raw + 5_000) / 10_000)
    }
}

/// Payment method (`tPag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// 01 - cash.
    Cash,
    /// 02 - cheque.
    Cheque,
    /// 03 - credit card.
    CreditCard,
    /// 04 - debit card.
    DebitCard,
    /// 05 - store credit.
    StoreCredit,
    /// 15 - bank slip (boleto).
    BankSlip,
    /// 17 - instant payment (PIX).
    Pix,
    /// 90 - no payment (adjustment documents).
    None,
    /// 99 - other.
    Other,
}

impl PaymentMethod {
    /// The `tPag` wire value.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cash => "01",
            Self::Cheque => "02",
            Self::CreditCard => "03",
            Self::DebitCard => "04",
            Self::StoreCredit => "05",
            Self::BankSlip => "15",
            Self::Pix => "17",
            Self::None => "90",
            Self::Other => "99",
        }
    }
}

/// One payment entry (`detPag`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Method.
    pub method: PaymentMethod,
    /// Amount paid.
    pub amount: Money,
}

/// Freight information (`transp`), meaningful for NF-e only; NFC-e must
/// not carry transporter/volume blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Freight {
    /// Freight mode (`modFrete`): 0 issuer, 1 recipient, 9 none.
    pub mode: u8,
    /// Freight value added to the document total.
    pub value: Money,
}

/// The normalized document, assembled by the caller from sale records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentForm {
    /// Document model (55/65).
    pub model: DocumentModel,
    /// Series (0..=999).
    pub series: u16,
    /// Sequential number (1..=999_999_999).
    pub number: u32,
    /// Issue timestamp with explicit offset (`dhEmi`).
    pub issued_at: DateTime<FixedOffset>,
    /// Nature of the operation (`natOp`), e.g. `VENDA`.
    pub operation_nature: String,
    /// Emission type.
    pub emission: EmissionType,
    /// Issuer profile.
    pub issuer: Issuer,
    /// Recipient, when identified.
    pub recipient: Option<Recipient>,
    /// Sale lines, at least one.
    pub items: Vec<LineItem>,
    /// Payments, at least one.
    pub payments: Vec<Payment>,
    /// Change returned to the consumer (`vTroco`).
    pub change: Money,
    /// Freight (NF-e only).
    pub freight: Option<Freight>,
    /// Free-text additional information (`infCpl`).
    pub additional_info: Option<String>,
}

impl DocumentForm {
    /// Sum of gross line values.
    pub fn total_gross(&self) -> Money {
        self.items.iter().map(LineItem::gross_value).sum()
    }

    /// Sum of line discounts.
    pub fn total_discount(&self) -> Money {
        self.items.iter().map(|i| i.discount).sum()
    }

    /// Sum of payment amounts.
    pub fn total_paid(&self) -> Money {
        self.payments.iter().map(|p| p.amount).sum()
    }
}

/// Left-pad with zeros or truncate from the left to exactly `width`
/// digits. Codes wider than the field keep their least-significant
/// digits, matching the authority's fixed-width rule.
pub fn fixed_width(digits: &str, width: usize) -> String {
    let clean: String = digits.chars().filter(|c| c.is_ascii_digit()).collect();
    if clean.len() >= width {
        clean[clean.len() - width..].to_owned()
    } else {
        format!("{:0>width$}", clean, width = width)
    }
}

/// Escape XML text content.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
