//! NFC-e QR-code supplement (`infNFeSupl`).
//!
//! The QR payload is jurisdiction-dependent: most jurisdictions use the
//! generic scheme (payload fields plus a SHA-256 digest salted with the
//! CSC secret), while Paraná keeps a SHA-1 digest over four fields. The
//! supplement is injected between the signed block and the signature, in
//! the schema order `infNFe, infNFeSupl, Signature`.

use openssl::hash::MessageDigest;

use crate::access_key::{AccessKey, EmissionType};
use crate::config::{CscCredential, Environment, Uf};
use crate::document::model::Money;
use crate::error::{Result, SefazError};

/// Inputs for QR payload construction.
pub struct QrCodeParams<'a> {
    /// Document access key.
    pub key: &'a AccessKey,
    /// Target environment.
    pub environment: Environment,
    /// Issuing jurisdiction (selects the digest scheme).
    pub uf: Uf,
    /// CSC credential.
    pub csc: &'a CscCredential,
    /// Emission type; offline contingency extends the payload.
    pub emission: EmissionType,
    /// Document total (`vNF`), used by the offline payload.
    pub total: Money,
    /// Hex-encoded signature digest, used by the offline payload.
    pub digest_hex: &'a str,
    /// Issue day of month (1..=31), used by the offline payload.
    pub issue_day: u32,
}

/// Build the QR payload (the part after `?p=`).
pub fn qr_payload(params: &QrCodeParams<'_>) -> Result<String> {
    match params.uf {
        Uf::Pr => qr_payload_parana(params),
        _ => qr_payload_generic(params),
    }
}

/// Generic scheme: payload fields, then a SHA-256 digest of the fields
/// concatenated with the CSC secret.
fn qr_payload_generic(params: &QrCodeParams<'_>) -> Result<String> {
    let base = match params.emission {
        EmissionType::OfflineContingency => format!(
            "{}|2|{}|{}|{}|{}|{}",
            params.key.as_str(),
            params.environment.code(),
            params.issue_day,
            params.total.format(),
            params.digest_hex,
            params.csc.id,
        ),
        _ => format!(
            "{}|2|{}|{}",
            params.key.as_str(),
            params.environment.code(),
            params.csc.id,
        ),
    };
    let digest = hash_hex(
        MessageDigest::sha256(),
        format!("{}{}", base, params.csc.token).as_bytes(),
    )?;
    Ok(format!("{}|{}", base, digest))
}

/// Paraná scheme: SHA-1 over key, environment, CSC id and secret; the
/// payload carries exactly four fields.
fn qr_payload_parana(params: &QrCodeParams<'_>) -> Result<String> {
    let digest = hash_hex(
        MessageDigest::sha1(),
        format!(
            "{}{}{}{}",
            params.key.as_str(),
            params.environment.code(),
            params.csc.id,
            params.csc.token
        )
        .as_bytes(),
    )?;
    Ok(format!(
        "{}|{}|{}|{}",
        params.key.as_str(),
        params.environment.code(),
        params.csc.id,
        digest
    ))
}

/// Assemble the supplement block: `qrCode` then `urlChave`, in that order.
pub fn build_supplement(qr_url: &str, consultation_url: &str) -> String {
    format!(
        "<infNFeSupl><qrCode>{}</qrCode><urlChave>{}</urlChave></infNFeSupl>",
        qr_url, consultation_url
    )
}

/// Insert the supplement immediately after the signed block.
pub fn inject_supplement(signed_xml: &str, supplement: &str) -> Result<String> {
    let closing = "</infNFe>";
    let at = signed_xml
        .find(closing)
        .map(|i| i + closing.len())
        .ok_or_else(|| SefazError::structural("document carries no infNFe block"))?;

    let mut out = String::with_capacity(signed_xml.len() + supplement.len());
    out.push_str(&signed_xml[..at]);
    out.push_str(supplement);
    out.push_str(&signed_xml[at..]);
    Ok(out)
}

/// Hex-encode the signature's `DigestValue` for the offline payload.
pub fn digest_value_hex(signed_xml: &str) -> Result<String> {
    use base64::prelude::*;
    let b64 = crate::signer::tag_text(signed_xml, "DigestValue")
        .ok_or_else(|| SefazError::structural("signed document carries no DigestValue"))?;
    let bytes = BASE64_STANDARD.decode(b64.as_bytes())?;
    Ok(hex(&bytes))
}

fn hash_hex(digest: MessageDigest, data: &[u8]) -> Result<String> {
    let out = openssl::hash::hash(digest, data)
        .map_err(|e| SefazError::structural(format!("QR digest failed: {}", e)))?;
    Ok(hex(&out))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
