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

//! Per-line tax sub-trees.
//!
//! The ICMS group is the delicate one: the simplified-regime CSOSN codes
//! and the normal-regime CST codes each select a distinct, non-
//! interchangeable XML shape, and emitting the wrong shape is an instant
//! authority rejection. Unsupported codes fail fast instead of emitting a
//! best-guess structure.

use serde::{Deserialize, Serialize};

use crate::document::model::{Money, Rate, TaxRegime};
use crate::error::{Result, SefazError};

/// ICMS treatment for one line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcmsTax {
    /// Merchandise origin (`orig`, 0..=8).
    pub origin: u8,
    /// CSOSN (3 digits, simplified regime) or CST (2 digits, normal).
    pub code: String,
    /// Regular ICMS rate (`pICMS`), for shapes that tax the line.
    pub rate: Rate,
    /// Tax-substitution rate (`pICMSST`), for 201/202/203.
    pub st_rate: Rate,
    /// Simples Nacional credit rate (`pCredSN`), for 101/201.
    pub credit_rate: Rate,
    /// Retained ST base (`vBCSTRet`), for 500/60.
    pub retained_base: Money,
    /// Retained ST value (`vICMSSTRet`), for 500/60.
    pub retained_value: Money,
}

impl IcmsTax {
    /// Simplified-regime shape without credit or ST (102/103/300/400).
    pub fn simplified_no_credit(csosn: &str) -> Self {
        Self {
            origin: 0,
            code: csosn.to_owned(),
            rate: Rate(0),
            st_rate: Rate(0),
            credit_rate: Rate(0),
            retained_base: Money::ZERO,
            retained_value: Money::ZERO,
        }
    }

    /// Simplified-regime shape with credit transfer (101).
    pub fn simplified_with_credit(credit_rate: Rate) -> Self {
        Self {
            origin: 0,
            code: "101".to_owned(),
            rate: Rate(0),
            st_rate: Rate(0),
            credit_rate,
            retained_base: Money::ZERO,
            retained_value: Money::ZERO,
        }
    }

    /// Normal-regime fully taxed shape (CST 00).
    pub fn normal_taxed(rate: Rate) -> Self {
        Self {
            origin: 0,
            code: "00".to_owned(),
            rate,
            st_rate: Rate(0),
            credit_rate: Rate(0),
            retained_base: Money::ZERO,
            retained_value: Money::ZERO,
        }
    }
}

/// Totals contribution of one rendered ICMS sub-tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcmsContribution {
    /// `vBC` contribution.
    pub base: Money,
    /// `vICMS` contribution.
    pub value: Money,
    /// `vBCST` contribution.
    pub st_base: Money,
    /// `vST` contribution.
    pub st_value: Money,
}

/// Render the `<ICMS>` group for a line.
///
/// `taxable` is the line's gross value, which doubles as the calculation
/// base for the shapes that tax the line.
pub fn render_icms(
    tax: &IcmsTax,
    regime: TaxRegime,
    taxable: Money,
) -> Result<(String, IcmsContribution)> {
    if tax.origin > 8 {
        return Err(SefazError::validation(format!(
            "ICMS origin {} outside 0..=8",
            tax.origin
        )));
    }

    if regime.is_simplified() {
        render_icms_csosn(tax, taxable)
    } else {
        render_icms_cst(tax, taxable)
    }
}

fn render_icms_csosn(tax: &IcmsTax, taxable: Money) -> Result<(String, IcmsContribution)> {
    let orig = tax.origin;
    let code = tax.code.as_str();
    let mut contrib = IcmsContribution::default();

    let inner = match code {
        "101" => {
            let credit = tax.credit_rate.apply(taxable);
            format!(
                "<ICMSSN101><orig>{o}</orig><CSOSN>101</CSOSN>\
                 <pCredSN>{p}</pCredSN><vCredICMSSN>{v}</vCredICMSSN></ICMSSN101>",
                o = orig,
                p = tax.credit_rate.format(),
                v = credit.format(),
            )
        }
        "102" | "103" | "300" | "400" => format!(
            "<ICMSSN102><orig>{o}</orig><CSOSN>{c}</CSOSN></ICMSSN102>",
            o = orig,
            c = code,
        ),
        "201" => {
            let st_value = tax.st_rate.apply(taxable);
            let credit = tax.credit_rate.apply(taxable);
            contrib.st_base = taxable;
            contrib.st_value = st_value;
            format!(
                "<ICMSSN201><orig>{o}</orig><CSOSN>201</CSOSN><modBCST>4</modBCST>\
                 <vBCST>{b}</vBCST><pICMSST>{pst}</pICMSST><vICMSST>{vst}</vICMSST>\
                 <pCredSN>{pc}</pCredSN><vCredICMSSN>{vc}</vCredICMSSN></ICMSSN201>",
                o = orig,
                b = taxable.format(),
                pst = tax.st_rate.format(),
                vst = st_value.format(),
                pc = tax.credit_rate.format(),
                vc = credit.format(),
            )
        }
        "202" | "203" => {
            let st_value = tax.st_rate.apply(taxable);
            contrib.st_base = taxable;
            contrib.st_value = st_value;
            format!(
                "<ICMSSN202><orig>{o}</orig><CSOSN>{c}</CSOSN><modBCST>4</modBCST>\
                 <vBCST>{b}</vBCST><pICMSST>{pst}</pICMSST><vICMSST>{vst}</vICMSST></ICMSSN202>",
                o = orig,
                c = code,
                b = taxable.format(),
                pst = tax.st_rate.format(),
                vst = st_value.format(),
            )
        }
        "500" => format!(
            "<ICMSSN500><orig>{o}</orig><CSOSN>500</CSOSN>\
             <vBCSTRet>{b}</vBCSTRet><vICMSSTRet>{v}</vICMSSTRet></ICMSSN500>",
            o = orig,
            b = tax.retained_base.format(),
            v = tax.retained_value.format(),
        ),
        "900" => {
            let value = tax.rate.apply(taxable);
            contrib.base = taxable;
            contrib.value = value;
            format!(
                "<ICMSSN900><orig>{o}</orig><CSOSN>900</CSOSN><modBC>3</modBC>\
                 <vBC>{b}</vBC><pICMS>{p}</pICMS><vICMS>{v}</vICMS></ICMSSN900>",
                o = orig,
                b = taxable.format(),
                p = tax.rate.format(),
                v = value.format(),
            )
        }
        other => {
            return Err(SefazError::validation(format!(
                "unsupported CSOSN code '{}'",
                other
            )))
        }
    };

    Ok((format!("<ICMS>{}</ICMS>", inner), contrib))
}

fn render_icms_cst(tax: &IcmsTax, taxable: Money) -> Result<(String, IcmsContribution)> {
    let orig = tax.origin;
    let code = tax.code.as_str();
    let mut contrib = IcmsContribution::default();

    let inner = match code {
        "00" => {
            let value = tax.rate.apply(taxable);
            contrib.base = taxable;
            contrib.value = value;
            format!(
                "<ICMS00><orig>{o}</orig><CST>00</CST><modBC>3</modBC>\
                 <vBC>{b}</vBC><pICMS>{p}</pICMS><vICMS>{v}</vICMS></ICMS00>",
                o = orig,
                b = taxable.format(),
                p = tax.rate.format(),
                v = value.format(),
            )
        }
        "20" => {
            // Reduced base: the caller expresses the reduction through the
            // effective rate; the base stays the gross value.
            let value = tax.rate.apply(taxable);
            contrib.base = taxable;
            contrib.value = value;
            format!(
                "<ICMS20><orig>{o}</orig><CST>20</CST><modBC>3</modBC><pRedBC>0.00</pRedBC>\
                 <vBC>{b}</vBC><pICMS>{p}</pICMS><vICMS>{v}</vICMS></ICMS20>",
                o = orig,
                b = taxable.format(),
                p = tax.rate.format(),
                v = value.format(),
            )
        }
        "40" | "41" | "50" => format!(
            "<ICMS40><orig>{o}</orig><CST>{c}</CST></ICMS40>",
            o = orig,
            c = code,
        ),
        "60" => format!(
            "<ICMS60><orig>{o}</orig><CST>60</CST>\
             <vBCSTRet>{b}</vBCSTRet><vICMSSTRet>{v}</vICMSSTRet></ICMS60>",
            o = orig,
            b = tax.retained_base.format(),
            v = tax.retained_value.format(),
        ),
        "90" => {
            let value = tax.rate.apply(taxable);
            contrib.base = taxable;
            contrib.value = value;
            format!(
                "<ICMS90><orig>{o}</orig><CST>90</CST><modBC>3</modBC>\
                 <vBC>{b}</vBC><pICMS>{p}</pICMS><vICMS>{v}</vICMS></ICMS90>",
                o = orig,
                b = taxable.format(),
                p = tax.rate.format(),
                v = value.format(),
            )
        }
        other => {
            return Err(SefazError::validation(format!(
                "unsupported ICMS CST code '{}'",
                other
            )))
        }
    };

    Ok((format!("<ICMS>{}</ICMS>", inner), contrib))
}

/// PIS treatment for one line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PisTax {
    /// CST (2 digits).
    pub code: String,
    /// Rate (`pPIS`).
    pub rate: Rate,
}

impl PisTax {
    /// Taxed at the standard rate (CST 01).
    pub fn taxed(rate: Rate) -> Self {
        Self {
            code: "01".to_owned(),
            rate,
        }
    }

    /// Exempt / not taxed (CST 07).
    pub fn exempt() -> Self {
        Self {
            code: "07".to_owned(),
            rate: Rate(0),
        }
    }
}

/// COFINS treatment for one line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CofinsTax {
    /// CST (2 digits).
    pub code: String,
    /// Rate (`pCOFINS`).
    pub rate: Rate,
}

impl CofinsTax {
    /// Taxed at the standard rate (CST 01).
    pub fn taxed(rate: Rate) -> Self {
        Self {
            code: "01".to_owned(),
            rate,
        }
    }

    /// Exempt / not taxed (CST 07).
    pub fn exempt() -> Self {
        Self {
            code: "07".to_owned(),
            rate: Rate(0),
        }
    }
}

/// Render the `<PIS>` group. Returns the XML and the `vPIS` contribution.
pub fn render_pis(tax: &PisTax, taxable: Money) -> Result<(String, Money)> {
    render_contribution("PIS", &tax.code, tax.rate, taxable)
}

/// Render the `<COFINS>` group. Returns the XML and the `vCOFINS`
/// contribution.
pub fn render_cofins(tax: &CofinsTax, taxable: Money) -> Result<(String, Money)> {
    render_contribution("COFINS", &tax.code, tax.rate, taxable)
}

fn render_contribution(
    group: &str,
    code: &str,
    rate: Rate,
    taxable: Money,
) -> Result<(String, Money)> {
    let (inner, value) = match code {
        "01" | "02" => {
            let value = rate.apply(taxable);
            (
                format!(
                    "<{g}Aliq><CST>{c}</CST><vBC>{b}</vBC><p{g}>{p}</p{g}><v{g}>{v}</v{g}></{g}Aliq>",
                    g = group,
                    c = code,
                    b = taxable.format(),
                    p = rate.format(),
                    v = value.format(),
                ),
                value,
            )
        }
        "04" | "05" | "06" | "07" | "08" | "09" => (
            format!("<{g}NT><CST>{c}</CST></{g}NT>", g = group, c = code),
            Money::ZERO,
        ),
        "49" | "99" => {
            let value = rate.apply(taxable);
            (
                format!(
                    "<{g}Outr><CST>{c}</CST><vBC>{b}</vBC><p{g}>{p}</p{g}><v{g}>{v}</v{g}></{g}Outr>",
                    g = group,
                    c = code,
                    b = taxable.format(),
                    p = rate.format(),
                    v = value.format(),
                ),
                value,
            )
        }
        other => {
            return Err(SefazError::validation(format!(
                "unsupported {} CST code '{}'",
                group, other
            )))
        }
    };

    Ok((format!("<{g}>{inner}</{g}>", g = group, inner = inner), value))
}

/// IPI treatment for one line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpiTax {
    /// CST (2 digits).
    pub code: String,
    /// Rate (`pIPI`).
    pub rate: Rate,
}

/// Render the `<IPI>` group. Returns the XML and the `vIPI` contribution.
pub fn render_ipi(tax: &IpiTax, taxable: Money) -> Result<(String, Money)> {
    let (inner, value) = match tax.code.as_str() {
        "00" | "49" | "50" | "99" => {
            let value = tax.rate.apply(taxable);
            (
                format!(
                    "<IPITrib><CST>{c}</CST><vBC>{b}</vBC><pIPI>{p}</pIPI><vIPI>{v}</vIPI></IPITrib>",
                    c = tax.code,
                    b = taxable.format(),
                    p = tax.rate.format(),
                    v = value.format(),
                ),
                value,
            )
        }
        "01" | "02" | "03" | "04" | "05" | "51" | "52" | "53" | "54" | "55" => (
            format!("<IPINT><CST>{c}</CST></IPINT>", c = tax.code),
            Money::ZERO,
        ),
        other => {
            return Err(SefazError::validation(format!(
                "unsupported IPI CST code '{}'",
                other
            )))
        }
    };

    Ok((
        format!("<IPI><cEnq>999</cEnq>{}</IPI>", inner),
        value,
    ))
}
