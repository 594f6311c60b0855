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

//! Document rendering.
//!
//! [`DocumentBuilder`] is a pure transform from the normalized input model
//! to the document XML string. The authority validates element *order* as
//! well as presence, so the information block is rendered strictly as
//! `ide, emit, (dest)?, det+, total, transp, pag, (infAdic)?,
//! (infRespTec)?`, every monetary field with exactly 2 decimals, every
//! quantity with exactly 4, and the classification codes at their fixed
//! widths. Totals are derived from the line items; no independent total
//! can be supplied.

pub mod model;
pub mod qrcode;
pub mod taxes;

pub use model::{
    Address, DocumentForm, Freight, Issuer, LineItem, Money, Payment, PaymentMethod, Quantity,
    Rate, Recipient, RecipientId, TaxRegime,
};
pub use taxes::{CofinsTax, IcmsTax, IpiTax, PisTax};

use crate::access_key::AccessKey;
use crate::config::{DocumentModel, Environment, TechnicalResponsible};
use crate::document::model::{escape_xml, fixed_width};
use crate::document::taxes::IcmsContribution;
use crate::error::{Result, SefazError};
use crate::signer::NFE_NS;

/// Schema version rendered into `infNFe@versao`.
pub const SCHEMA_VERSION: &str = "4.00";

/// Recipient name the authority requires in homologation.
pub const HOMOLOG_RECIPIENT_NAME: &str =
    "NF-E EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL";

/// Renders document XML from the normalized model.
pub struct DocumentBuilder<'a> {
    environment: Environment,
    technical_responsible: Option<&'a TechnicalResponsible>,
}

impl<'a> DocumentBuilder<'a> {
    /// Create a builder for the given environment.
    pub fn new(
        environment: Environment,
        technical_responsible: Option<&'a TechnicalResponsible>,
    ) -> Self {
        Self {
            environment,
            technical_responsible,
        }
    }

    /// Render the full document XML for a form and its derived access key.
    ///
    /// # Errors
    ///
    /// Returns [`SefazError::Validation`] when the form is internally
    /// inconsistent (no lines, payments that do not close against the
    /// total, key/form disagreement, freight on NFC-e) or when a line
    /// carries an unsupported tax code.
    pub fn render(&self, form: &DocumentForm, key: &AccessKey) -> Result<String> {
        self.check_form(form, key)?;

        let mut totals = Totals::default();
        let mut det = String::new();
        for (index, item) in form.items.iter().enumerate() {
            det.push_str(&self.render_line(form, item, index + 1, &mut totals)?);
        }

        let total_block = self.render_totals(form, &totals);
        let v_nf = totals.document_total(form);

        let paid = form.total_paid();
        if paid - form.change != v_nf {
            return Err(SefazError::validation(format!(
                "payments ({}) minus change ({}) do not close against the document total ({})",
                paid.format(),
                form.change.format(),
                v_nf.format()
            )));
        }

        let mut inf = String::new();
        inf.push_str(&self.render_ide(form, key));
        inf.push_str(&self.render_emit(form));
        if let Some(recipient) = &form.recipient {
            inf.push_str(&self.render_dest(form, recipient));
        }
        inf.push_str(&det);
        inf.push_str(&total_block);
        inf.push_str(&self.render_transp(form));
        inf.push_str(&self.render_pag(form));
        if let Some(text) = &form.additional_info {
            inf.push_str(&format!(
                "<infAdic><infCpl>{}</infCpl></infAdic>",
                escape_xml(text)
            ));
        }
        if let Some(resp) = self.technical_responsible {
            inf.push_str(&format!(
                "<infRespTec><CNPJ>{}</CNPJ><xContato>{}</xContato><email>{}</email><fone>{}</fone></infRespTec>",
                fixed_width(&resp.cnpj, 14),
                escape_xml(&resp.contact),
                escape_xml(&resp.email),
                crate::access_key::digits_only(&resp.phone),
            ));
        }

        Ok(format!(
            "<NFe xmlns=\"{ns}\"><infNFe Id=\"NFe{key}\" versao=\"{version}\">{inf}</infNFe></NFe>",
            ns = NFE_NS,
            key = key.as_str(),
            version = SCHEMA_VERSION,
            inf = inf,
        ))
    }

    fn check_form(&self, form: &DocumentForm, key: &AccessKey) -> Result<()> {
        if form.items.is_empty() {
            return Err(SefazError::validation("document has no line items"));
        }
        if form.payments.is_empty() {
            return Err(SefazError::validation("document has no payments"));
        }
        if form.model == DocumentModel::Nfce && form.freight.is_some() {
            return Err(SefazError::validation(
                "NFC-e must not carry freight information",
            ));
        }
        if key.model_code() != form.model.code() {
            return Err(SefazError::validation(format!(
                "access key model {} disagrees with form model {}",
                key.model_code(),
                form.model.code()
            )));
        }
        if key.series() != fixed_width(&form.series.to_string(), 3)
            || key.number() != fixed_width(&form.number.to_string(), 9)
        {
            return Err(SefazError::validation(
                "access key series/number disagree with the form",
            ));
        }
        if key.uf_code() != form.issuer.address.uf.ibge_code() {
            return Err(SefazError::validation(
                "access key jurisdiction disagrees with the issuer address",
            ));
        }
        Ok(())
    }

    fn render_ide(&self, form: &DocumentForm, key: &AccessKey) -> String {
        let issuer_uf = form.issuer.address.uf;
        let destination = form
            .recipient
            .as_ref()
            .and_then(|r| r.address.as_ref())
            .map(|a| if a.uf == issuer_uf { "1" } else { "2" })
            .unwrap_or("1");
        let print_format = match form.model {
            DocumentModel::Nfe => "1",
            DocumentModel::Nfce => "4",
        };

        format!(
            concat!(
                "<ide>",
                "<cUF>{cuf}</cUF>",
                "<cNF>{cnf}</cNF>",
                "<natOp>{natop}</natOp>",
                "<mod>{model}</mod>",
                "<serie>{serie}</serie>",
                "<nNF>{nnf}</nNF>",
                "<dhEmi>{dhemi}</dhEmi>",
                "<tpNF>1</tpNF>",
                "<idDest>{iddest}</idDest>",
                "<cMunFG>{cmun}</cMunFG>",
                "<tpImp>{tpimp}</tpImp>",
                "<tpEmis>{tpemis}</tpEmis>",
                "<cDV>{cdv}</cDV>",
                "<tpAmb>{tpamb}</tpAmb>",
                "<finNFe>1</finNFe>",
                "<indFinal>1</indFinal>",
                "<indPres>1</indPres>",
                "<procEmi>0</procEmi>",
                "<verProc>{verproc}</verProc>",
                "</ide>"
            ),
            cuf = issuer_uf.ibge_code(),
            cnf = key.salt(),
            natop = escape_xml(&form.operation_nature),
            model = form.model.code(),
            serie = form.series,
            nnf = form.number,
            dhemi = form.issued_at.format("%Y-%m-%dT%H:%M:%S%:z"),
            iddest = destination,
            cmun = fixed_width(&form.issuer.address.municipality_code, 7),
            tpimp = print_format,
            tpemis = form.emission.code(),
            cdv = key.check_digit(),
            tpamb = self.environment.code(),
            verproc = crate::USER_AGENT,
        )
    }

    fn render_address(tag: &str, address: &Address) -> String {
        let mut out = format!(
            concat!(
                "<{tag}>",
                "<xLgr>{xlgr}</xLgr>",
                "<nro>{nro}</nro>",
                "<xBairro>{xbairro}</xBairro>",
                "<cMun>{cmun}</cMun>",
                "<xMun>{xmun}</xMun>",
                "<UF>{uf}</UF>",
                "<CEP>{cep}</CEP>",
                "<cPais>1058</cPais>",
                "<xPais>BRASIL</xPais>"
            ),
            tag = tag,
            xlgr = escape_xml(&address.street),
            nro = escape_xml(&address.number),
            xbairro = escape_xml(&address.district),
            cmun = fixed_width(&address.municipality_code, 7),
            xmun = escape_xml(&address.municipality),
            uf = address.uf.acronym(),
            cep = fixed_width(&address.postal_code, 8),
        );
        if let Some(phone) = &address.phone {
            out.push_str(&format!(
                "<fone>{}</fone>",
                crate::access_key::digits_only(phone)
            ));
        }
        out.push_str(&format!("</{}>", tag));
        out
    }

    fn render_emit(&self, form: &DocumentForm) -> String {
        let issuer = &form.issuer;
        let mut out = format!(
            "<emit><CNPJ>{}</CNPJ><xNome>{}</xNome>",
            fixed_width(&issuer.cnpj, 14),
            escape_xml(&issuer.legal_name),
        );
        if let Some(trade_name) = &issuer.trade_name {
            out.push_str(&format!("<xFant>{}</xFant>", escape_xml(trade_name)));
        }
        out.push_str(&Self::render_address("enderEmit", &issuer.address));
        out.push_str(&format!(
            "<IE>{}</IE><CRT>{}</CRT></emit>",
            escape_xml(&issuer.state_registration),
            issuer.tax_regime.code(),
        ));
        out
    }

    fn render_dest(&self, form: &DocumentForm, recipient: &Recipient) -> String {
        let id = match &recipient.id {
            RecipientId::Cnpj(cnpj) => format!("<CNPJ>{}</CNPJ>", fixed_width(cnpj, 14)),
            RecipientId::Cpf(cpf) => format!("<CPF>{}</CPF>", fixed_width(cpf, 11)),
            RecipientId::Foreign(doc) => {
                format!("<idEstrangeiro>{}</idEstrangeiro>", escape_xml(doc))
            }
        };
        let name = match self.environment {
            Environment::Homologation => HOMOLOG_RECIPIENT_NAME.to_owned(),
            Environment::Production => escape_xml(&recipient.name),
        };

        let mut out = format!("<dest>{}<xNome>{}</xNome>", id, name);
        if let Some(address) = &recipient.address {
            out.push_str(&Self::render_address("enderDest", address));
        }
        out.push_str(&format!(
            "<indIEDest>{}</indIEDest>",
            recipient.state_registration_indicator
        ));
        if let Some(email) = &recipient.email {
            out.push_str(&format!("<email>{}</email>", escape_xml(email)));
        }
        out.push_str("</dest>");
        out
    }

    fn render_line(
        &self,
        form: &DocumentForm,
        item: &LineItem,
        number: usize,
        totals: &mut Totals,
    ) -> Result<String> {
        let gross = item.gross_value();
        let taxable = gross - item.discount;

        let (icms_xml, icms) = taxes::render_icms(&item.icms, form.issuer.tax_regime, taxable)?;
        let (pis_xml, pis_value) = taxes::render_pis(&item.pis, taxable)?;
        let (cofins_xml, cofins_value) = taxes::render_cofins(&item.cofins, taxable)?;
        let ipi = item
            .ipi
            .as_ref()
            .map(|t| taxes::render_ipi(t, taxable))
            .transpose()?;

        totals.add_line(gross, item.discount, &icms, pis_value, cofins_value);
        let mut imposto = icms_xml;
        if let Some((ipi_xml, ipi_value)) = ipi {
            totals.ipi = totals.ipi + ipi_value;
            imposto.push_str(&ipi_xml);
        }
        imposto.push_str(&pis_xml);
        imposto.push_str(&cofins_xml);

        let gtin = item
            .gtin
            .as_deref()
            .filter(|g| !g.is_empty())
            .map(escape_xml)
            .unwrap_or_else(|| "SEM GTIN".to_owned());

        let mut prod = format!(
            concat!(
                "<prod>",
                "<cProd>{cprod}</cProd>",
                "<cEAN>{gtin}</cEAN>",
                "<xProd>{xprod}</xProd>",
                "<NCM>{ncm}</NCM>",
                "<CFOP>{cfop}</CFOP>",
                "<uCom>{unit}</uCom>",
                "<qCom>{qcom}</qCom>",
                "<vUnCom>{vun}</vUnCom>",
                "<vProd>{vprod}</vProd>",
                "<cEANTrib>{gtin}</cEANTrib>",
                "<uTrib>{unit}</uTrib>",
                "<qTrib>{qcom}</qTrib>",
                "<vUnTrib>{vun}</vUnTrib>"
            ),
            cprod = escape_xml(&item.code),
            gtin = gtin,
            xprod = escape_xml(&item.description),
            ncm = fixed_width(&item.ncm, 8),
            cfop = fixed_width(&item.cfop, 4),
            unit = escape_xml(&item.unit),
            qcom = item.quantity.format(),
            vun = item.unit_price.format(),
            vprod = gross.format(),
        );
        if item.discount > Money::ZERO {
            prod.push_str(&format!("<vDesc>{}</vDesc>", item.discount.format()));
        }
        prod.push_str("<indTot>1</indTot></prod>");

        Ok(format!(
            "<det nItem=\"{n}\">{prod}<imposto>{imposto}</imposto></det>",
            n = number,
            prod = prod,
            imposto = imposto,
        ))
    }

    fn render_totals(&self, form: &DocumentForm, totals: &Totals) -> String {
        let freight = form.freight.as_ref().map(|f| f.value).unwrap_or(Money::ZERO);
        let v_nf = totals.document_total(form);
        format!(
            concat!(
                "<total><ICMSTot>",
                "<vBC>{vbc}</vBC>",
                "<vICMS>{vicms}</vICMS>",
                "<vICMSDeson>0.00</vICMSDeson>",
                "<vFCP>0.00</vFCP>",
                "<vBCST>{vbcst}</vBCST>",
                "<vST>{vst}</vST>",
                "<vFCPST>0.00</vFCPST>",
                "<vFCPSTRet>0.00</vFCPSTRet>",
                "<vProd>{vprod}</vProd>",
                "<vFrete>{vfrete}</vFrete>",
                "<vSeg>0.00</vSeg>",
                "<vDesc>{vdesc}</vDesc>",
                "<vII>0.00</vII>",
                "<vIPI>{vipi}</vIPI>",
                "<vIPIDevol>0.00</vIPIDevol>",
                "<vPIS>{vpis}</vPIS>",
                "<vCOFINS>{vcofins}</vCOFINS>",
                "<vOutro>0.00</vOutro>",
                "<vNF>{vnf}</vNF>",
                "</ICMSTot></total>"
            ),
            vbc = totals.icms_base.format(),
            vicms = totals.icms.format(),
            vbcst = totals.st_base.format(),
            vst = totals.st.format(),
            vprod = totals.gross.format(),
            vfrete = freight.format(),
            vdesc = totals.discount.format(),
            vipi = totals.ipi.format(),
            vpis = totals.pis.format(),
            vcofins = totals.cofins.format(),
            vnf = v_nf.format(),
        )
    }

    fn render_transp(&self, form: &DocumentForm) -> String {
        let mode = match (form.model, &form.freight) {
            (DocumentModel::Nfce, _) => 9,
            (DocumentModel::Nfe, Some(freight)) => freight.mode,
            (DocumentModel::Nfe, None) => 9,
        };
        format!("<transp><modFrete>{}</modFrete></transp>", mode)
    }

    fn render_pag(&self, form: &DocumentForm) -> String {
        let mut out = String::from("<pag>");
        for payment in &form.payments {
            out.push_str(&format!(
                "<detPag><tPag>{}</tPag><vPag>{}</vPag></detPag>",
                payment.method.code(),
                payment.amount.format(),
            ));
        }
        if form.change > Money::ZERO {
            out.push_str(&format!("<vTroco>{}</vTroco>", form.change.format()));
        }
        out.push_str("</pag>");
        out
    }
}

/// Accumulated totals over the rendered lines.
#[derive(Debug, Default)]
struct Totals {
    gross: Money,
    discount: Money,
    icms_base: Money,
    icms: Money,
    st_base: Money,
    st: Money,
    ipi: Money,
    pis: Money,
    cofins: Money,
}

impl Totals {
    fn add_line(
        &mut self,
        gross: Money,
        discount: Money,
        icms: &IcmsContribution,
        pis: Money,
        cofins: Money,
    ) {
        self.gross = self.gross + gross;
        self.discount = self.discount + discount;
        self.icms_base = self.icms_base + icms.base;
        self.icms = self.icms + icms.value;
        self.st_base = self.st_base + icms.st_base;
        self.st = self.st + icms.st_value;
        self.pis = self.pis + pis;
        self.cofins = self.cofins + cofins;
    }

    /// `vNF`: gross - discount + ST + freight + IPI.
    fn document_total(&self, form: &DocumentForm) -> Money {
        let freight = form.freight.as_ref().map(|f| f.value).unwrap_or(Money::ZERO);
        self.gross - self.discount + self.st + freight + self.ipi
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_block_order_is_fixed() {
        let form = form(DocumentModel::Nfce);
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        let xml = builder.render(&form, &key).unwrap();

        let positions: Vec<usize> = ["<ide>", "<emit>", "<det ", "<total>", "<transp>", "<pag>"]
            .iter()
            .map(|tag| xml.find(tag).unwrap_or_else(|| panic!("missing {}", tag)))
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted, "blocks out of order");
    }

    #[test]
    fn test_id_attribute_carries_key() {
        let form = form(DocumentModel::Nfce);
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        let xml = builder.render(&form, &key).unwrap();
        assert!(xml.contains(&format!("Id=\"NFe{}\"", key.as_str())));
        assert!(xml.contains(&format!("<cNF>{}</cNF>", key.salt())));
        assert!(xml.contains(&format!("<cDV>{}</cDV>", key.check_digit())));
    }

    #[test]
    fn test_totals_derive_from_lines() {
        let form = form(DocumentModel::Nfce);
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        let xml = builder.render(&form, &key).unwrap();

        // 2 × 5.00 + 1 × 9.90 = 19.90
        assert!(xml.contains("<vProd>19.90</vProd>"));
        assert!(xml.contains("<vNF>19.90</vNF>"));
    }

    #[test]
    fn test_money_and_quantity_precision() {
        let form = form(DocumentModel::Nfce);
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        let xml = builder.render(&form, &key).unwrap();
        assert!(xml.contains("<qCom>2.0000</qCom>"));
        assert!(xml.contains("<vUnCom>5.00</vUnCom>"));
    }

    #[test]
    fn test_payments_must_close_against_total() {
        let mut form = form(DocumentModel::Nfce);
        form.payments = vec![Payment {
            method: PaymentMethod::Cash,
            amount: Money(100),
        }];
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        let err = builder.render(&form, &key).unwrap_err();
        assert!(matches!(err, SefazError::Validation(_)));
    }

    #[test]
    fn test_change_closes_overpayment() {
        let mut form = form(DocumentModel::Nfce);
        form.payments = vec![Payment {
            method: PaymentMethod::Cash,
            amount: Money(2000),
        }];
        form.change = Money(10);
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        let xml = builder.render(&form, &key).unwrap();
        assert!(xml.contains("<vTroco>0.10</vTroco>"));
    }

    #[test]
    fn test_nfce_rejects_freight() {
        let mut form = form(DocumentModel::Nfce);
        form.freight = Some(Freight {
            mode: 0,
            value: Money(500),
        });
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        assert!(matches!(
            builder.render(&form, &key),
            Err(SefazError::Validation(_))
        ));
    }

    #[test]
    fn test_homolog_recipient_name_is_forced() {
        let mut form = form(DocumentModel::Nfce);
        form.recipient = Some(Recipient {
            id: RecipientId::Cpf("123.456.789-09".into()),
            name: "Cliente Real".into(),
            address: None,
            state_registration_indicator: 9,
            email: None,
        });
        // Payments already close; recipient does not change totals.
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        let xml = builder.render(&form, &key).unwrap();
        assert!(xml.contains(HOMOLOG_RECIPIENT_NAME));
        assert!(!xml.contains("Cliente Real"));
        assert!(xml.contains("<CPF>12345678909</CPF>"));
    }

    #[test]
    fn test_technical_responsible_block() {
        let resp = TechnicalResponsible {
            cnpj: "99888777000166".into(),
            contact: "Suporte".into(),
            email: "suporte@example.com".into(),
            phone: "(11) 4002-8922".into(),
        };
        let form = form(DocumentModel::Nfce);
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, Some(&resp));
        let xml = builder.render(&form, &key).unwrap();
        assert!(xml.contains("<infRespTec><CNPJ>99888777000166</CNPJ>"));
        assert!(xml.contains("<fone>1140028922</fone>"));
    }

    #[test]
    fn test_key_mismatch_is_rejected() {
        let form = form(DocumentModel::Nfce);
        let mut other = form.clone();
        other.number = 43;
        let wrong_key = key_for(&other);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        assert!(matches!(
            builder.render(&form, &wrong_key),
            Err(SefazError::Validation(_))
        ));
    }

    #[test]
    fn test_ncm_cfop_widths() {
        let mut form = form(DocumentModel::Nfce);
        form.items[0].ncm = "123".into();
        form.items[0].cfop = "5.102".into();
        let key = key_for(&form);
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        let xml = builder.render(&form, &key).unwrap();
        assert!(xml.contains("<NCM>00000123</NCM>"));
        assert!(xml.contains("<CFOP>5102</CFOP>"));
    }

    #[test]
    fn test_empty_items_rejected() {
        let mut form = form(DocumentModel::Nfce);
        let key = key_for(&form);
        form.items.clear();
        let builder = DocumentBuilder::new(Environment::Homologation, None);
        assert!(matches!(
            builder.render(&form, &key),
            Err(SefazError::Validation(_))
        ));
    }
}
