//! Authority response resolution.
//!
//! Responses arrive in several nesting and encoding shapes: status tags at
//! the top level, tags nested inside a `protNFe`/`infProt` block, event
//! results inside `retEvento` blocks (a status query can report the
//! original authorization *and* a later cancellation, and the event must
//! win), and whole inner documents escaped inside CDATA or entity-encoded
//! text. Instead of the ad hoc regex cascade such payloads tend to breed,
//! resolution runs an ordered chain of typed extractors; the first hit
//! wins, and the chain order encodes the override semantics.

use crate::signer::tag_text;

/// Uniform resolution of one authority response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStatus {
    /// Numeric status code (`cStat`) as received; empty only for bare
    /// SOAP faults, which carry no structured status.
    pub status: String,
    /// Reason text (`xMotivo`, or the fault reason).
    pub message: String,
    /// Protocol number (`nProt`), when the authority issued one.
    pub protocol: Option<String>,
    /// Access key echoed by the authority (`chNFe`).
    pub key: Option<String>,
}

impl ResolvedStatus {
    /// Whether a structured status code was found.
    pub fn has_status(&self) -> bool {
        !self.status.is_empty()
    }
}

/// One step of the resolution chain.
trait Extract {
    fn extract(&self, xml: &str) -> Option<ResolvedStatus>;
}

/// Resolve a raw response body.
///
/// Chain order (first hit wins): last `retEvento` block, `protNFe`
/// override, top-level tags, escaped inner XML, SOAP fault.
pub fn resolve(raw: &str) -> Option<ResolvedStatus> {
    let steps: [&dyn Extract; 5] = [
        &LastEventBlock,
        &ProtocolBlock,
        &TopLevelTags,
        &EscapedInnerXml,
        &SoapFault,
    ];
    steps.iter().find_map(|step| step.extract(raw))
}

/// Collect every occurrence of an element by local name.
fn all_elements(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut found = Vec::new();
    let mut from = 0usize;
    while let Some(pos) = xml[from..].find(&open) {
        let at = from + pos;
        match xml.as_bytes().get(at + open.len()) {
            Some(b' ') | Some(b'>') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {}
            _ => {
                from = at + open.len();
                continue;
            }
        }
        let Some(end_rel) = xml[at..].find(&close) else {
            break;
        };
        let end = at + end_rel + close.len();
        found.push(xml[at..end].to_owned());
        from = end;
    }
    found
}

fn status_from_fragment(fragment: &str) -> Option<ResolvedStatus> {
    let status = tag_text(fragment, "cStat")?;
    let message = tag_text(fragment, "xMotivo").unwrap_or_default();
    Some(ResolvedStatus {
        status: status.trim().to_owned(),
        message: message.trim().to_owned(),
        protocol: tag_text(fragment, "nProt").map(|p| p.trim().to_owned()),
        key: tag_text(fragment, "chNFe").map(|k| k.trim().to_owned()),
    })
}

/// The *last* `retEvento` block. A status query reporting authorization
/// plus a later cancellation event must resolve to the event.
struct LastEventBlock;

impl Extract for LastEventBlock {
    fn extract(&self, xml: &str) -> Option<ResolvedStatus> {
        let events = all_elements(xml, "retEvento");
        let last = events.last()?;
        let fragment = crate::signer::extract_element(last, "infEvento")
            .unwrap_or_else(|| last.clone());
        status_from_fragment(&fragment)
    }
}

/// `protNFe`/`infProt` block, overriding envelope-level tags.
struct ProtocolBlock;

impl Extract for ProtocolBlock {
    fn extract(&self, xml: &str) -> Option<ResolvedStatus> {
        let prot = crate::signer::extract_element(xml, "protNFe")?;
        let fragment =
            crate::signer::extract_element(&prot, "infProt").unwrap_or(prot);
        status_from_fragment(&fragment)
    }
}

/// Direct top-level tags.
struct TopLevelTags;

impl Extract for TopLevelTags {
    fn extract(&self, xml: &str) -> Option<ResolvedStatus> {
        status_from_fragment(xml)
    }
}

/// Inner XML escaped inside CDATA or entity-encoded text, used when the
/// outer envelope carries no direct `cStat`.
struct EscapedInnerXml;

impl Extract for EscapedInnerXml {
    fn extract(&self, xml: &str) -> Option<ResolvedStatus> {
        if let Some(start) = xml.find("<![CDATA[") {
            let inner_start = start + "<![CDATA[".len();
            if let Some(len) = xml[inner_start..].find("]]>") {
                let inner = &xml[inner_start..inner_start + len];
                if let Some(resolved) = resolve_inner(inner) {
                    return Some(resolved);
                }
            }
        }

        if xml.contains("&lt;") {
            let unescaped = xml
                .replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&quot;", "\"")
                .replace("&apos;", "'")
                .replace("&amp;", "&");
            return resolve_inner(&unescaped);
        }

        None
    }
}

/// Re-run the structured extractors over decoded inner XML. The fault
/// extractor is deliberately excluded: a fault inside escaped content is
/// not a fault of this response.
fn resolve_inner(inner: &str) -> Option<ResolvedStatus> {
    let steps: [&dyn Extract; 3] = [&LastEventBlock, &ProtocolBlock, &TopLevelTags];
    steps.iter().find_map(|step| step.extract(inner))
}

/// SOAP fault reason, surfaced only when no structured status was found
/// anywhere else in the chain.
struct SoapFault;

impl Extract for SoapFault {
    fn extract(&self, xml: &str) -> Option<ResolvedStatus> {
        let reason = tag_text(xml, "faultstring")
            .or_else(|| tag_text(xml, "soap:Text"))
            .or_else(|| tag_text(xml, "env:Text"))
            .or_else(|| tag_text(xml, "Text"))
            .or_else(|| tag_text(xml, "Reason"))?;
        Some(ResolvedStatus {
            status: String::new(),
            message: reason.trim().to_owned(),
            protocol: None,
            key: None,
        })
    }
}
