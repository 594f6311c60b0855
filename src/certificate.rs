//! Certificate material and the per-tenant vault.
//!
//! Fiscal documents are signed with A1-profile PKCS#12 certificates issued
//! by ICP-Brasil CAs. The same material authenticates the TLS channel to
//! the authority. The vault parses containers once and caches the result
//! per tenant; entries are invalidated explicitly on re-upload, never by
//! time.
//!
//! Containers produced by older CAs use RC2/3DES encryption that OpenSSL 3
//! moved to the legacy provider. [`CryptoProviderConfig`] makes that
//! activation explicit and scoped to the vault, instead of mutating
//! process-wide environment configuration; it never affects the outbound
//! TLS cipher policy.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use openssl::asn1::Asn1Time;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::provider::Provider;
use openssl::x509::X509;

use crate::access_key::digits_only;
use crate::error::{Result, SefazError};

/// Crypto provider configuration injected into [`CertificateVault::new`].
#[derive(Debug, Clone, Default)]
pub struct CryptoProviderConfig {
    /// Load the OpenSSL legacy provider so PKCS#12 containers encrypted
    /// with RC2/3DES still parse. Scoped to certificate parsing; the TLS
    /// cipher policy is unaffected.
    pub enable_legacy_provider: bool,
}

impl CryptoProviderConfig {
    /// Configuration with the legacy provider enabled.
    pub fn with_legacy_provider() -> Self {
        Self {
            enable_legacy_provider: true,
        }
    }
}

/// Decrypted certificate material for one tenant.
///
/// Holds the private key and certificate chain transiently in memory; the
/// surrounding system owns encrypted-at-rest storage.
pub struct CertificateMaterial {
    /// Signing/TLS private key.
    pub private_key: PKey<Private>,
    /// Leaf certificate.
    pub certificate: X509,
    /// Intermediate chain, possibly empty.
    pub chain: Vec<X509>,
    /// Tax id (CNPJ/CPF) extracted from the subject CN, if present.
    pub subject_tax_id: Option<String>,
}

impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("subject_tax_id", &self.subject_tax_id)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

impl CertificateMaterial {
    /// Parse a PKCS#12 container.
    ///
    /// # Errors
    ///
    /// Returns [`SefazError::Certificate`] if the password is wrong, the
    /// container carries no private-key or certificate bag, or the leaf
    /// certificate is already expired.
    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self> {
        let pkcs12 = Pkcs12::from_der(der)
            .map_err(|e| SefazError::certificate(format!("not a PKCS#12 container: {}", e)))?;
        let parsed = pkcs12
            .parse2(password)
            .map_err(|e| SefazError::certificate(format!("container did not decrypt: {}", e)))?;

        let private_key = parsed
            .pkey
            .ok_or_else(|| SefazError::certificate("container has no private-key bag"))?;
        let certificate = parsed
            .cert
            .ok_or_else(|| SefazError::certificate("container has no certificate bag"))?;
        let chain = parsed
            .ca
            .map(|stack| stack.into_iter().collect())
            .unwrap_or_default();

        let now = Asn1Time::days_from_now(0)
            .map_err(|e| SefazError::certificate(format!("clock conversion failed: {}", e)))?;
        if certificate.not_after() < &now {
            return Err(SefazError::certificate(format!(
                "certificate expired at {}",
                certificate.not_after()
            )));
        }

        let subject_tax_id = extract_tax_id(&certificate);

        Ok(Self {
            private_key,
            certificate,
            chain,
            subject_tax_id,
        })
    }

    /// Export the material as PEM for the rustls-backed HTTP client.
    ///
    /// Returns `(certificate_chain_pem, private_key_pem)` with the leaf
    /// first, as reqwest's identity loader expects.
    pub fn identity_pem(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut cert_pem = self
            .certificate
            .to_pem()
            .map_err(|e| SefazError::certificate(format!("certificate PEM export: {}", e)))?;
        for ca in &self.chain {
            let pem = ca
                .to_pem()
                .map_err(|e| SefazError::certificate(format!("chain PEM export: {}", e)))?;
            cert_pem.extend_from_slice(&pem);
        }
        let key_pem = self
            .private_key
            .private_key_to_pem_pkcs8()
            .map_err(|e| SefazError::certificate(format!("key PEM export: {}", e)))?;
        Ok((cert_pem, key_pem))
    }

    /// Leaf certificate as base64 DER, without PEM delimiters, for
    /// embedding in `KeyInfo/X509Data/X509Certificate`.
    pub fn certificate_base64(&self) -> Result<String> {
        use base64::prelude::*;
        let der = self
            .certificate
            .to_der()
            .map_err(|e| SefazError::certificate(format!("certificate DER export: {}", e)))?;
        Ok(BASE64_STANDARD.encode(der))
    }
}

/// Extract the tax id from an ICP-Brasil subject CN (`NAME:CNPJ`).
fn extract_tax_id(cert: &X509) -> Option<String> {
    let cn = cert
        .subject_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()?
        .data()
        .as_utf8()
        .ok()?;
    let raw = cn.to_string();
    let tail = raw.rsplit(':').next()?;
    let digits = digits_only(tail);
    if digits.len() == 11 || digits.len() == 14 {
        Some(digits)
    } else {
        None
    }
}

/// Source of encrypted PKCS#12 bytes, provided by the surrounding system.
pub trait CertificateStore: Send + Sync {
    /// Fetch the decrypted container bytes and password for a tenant.
    fn fetch(&self, tenant: &str) -> Result<(Vec<u8>, String)>;
}

/// Per-tenant certificate cache.
///
/// Reads are concurrent; writes (re-upload) take the write lock so no
/// reader ever observes a half-written entry.
pub struct CertificateVault {
    store: Arc<dyn CertificateStore>,
    cache: RwLock<HashMap<String, Arc<CertificateMaterial>>>,
    // Held for the vault's lifetime; dropping unloads the provider.
    _legacy_provider: Option<Provider>,
}

impl CertificateVault {
    /// Create a vault backed by the given store.
    ///
    /// # Errors
    ///
    /// Returns [`SefazError::Certificate`] if the legacy provider was
    /// requested but could not be loaded.
    pub fn new(store: Arc<dyn CertificateStore>, crypto: CryptoProviderConfig) -> Result<Self> {
        let legacy = if crypto.enable_legacy_provider {
            let provider = Provider::try_load(None, "legacy", true).map_err(|e| {
                SefazError::certificate(format!("legacy provider unavailable: {}", e))
            })?;
            tracing::debug!("OpenSSL legacy provider loaded for PKCS#12 parsing");
            Some(provider)
        } else {
            None
        };

        Ok(Self {
            store,
            cache: RwLock::new(HashMap::new()),
            _legacy_provider: legacy,
        })
    }

    /// Return cached material for a tenant, loading through the store on
    /// first access.
    pub fn material_for(&self, tenant: &str) -> Result<Arc<CertificateMaterial>> {
        if let Some(material) = self.cache.read().expect("vault lock poisoned").get(tenant) {
            return Ok(Arc::clone(material));
        }

        let (der, password) = self.store.fetch(tenant)?;
        let material = Arc::new(CertificateMaterial::from_pkcs12(&der, &password)?);

        let mut cache = self.cache.write().expect("vault lock poisoned");
        // A concurrent loader may have won the race; keep the first entry
        // so all readers share one parse.
        let entry = cache
            .entry(tenant.to_owned())
            .or_insert_with(|| Arc::clone(&material));
        Ok(Arc::clone(entry))
    }

    /// Drop the cached entry for a tenant. Called on re-upload; the next
    /// access reloads through the store.
    pub fn invalidate(&self, tenant: &str) {
        self.cache
            .write()
            .expect("vault lock poisoned")
            .remove(tenant);
        tracing::debug!(tenant, "certificate cache entry invalidated");
    }

    /// Replace a tenant's material directly from freshly uploaded bytes.
    pub fn replace(&self, tenant: &str, der: &[u8], password: &str) -> Result<Arc<CertificateMaterial>> {
        let material = Arc::new(CertificateMaterial::from_pkcs12(der, password)?);
        self.cache
            .write()
            .expect("vault lock poisoned")
            .insert(tenant.to_owned(), Arc::clone(&material));
        Ok(material)
    }
}

impl std::fmt::Debug for CertificateVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cache.read().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("CertificateVault")
            .field("cached_tenants", &cached)
            .field("legacy_provider", &self._legacy_provider.is_some())
            .finish()
    }
}
