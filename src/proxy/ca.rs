//! Certificate authority for TLS interception.
//!
//! Intercepted connections are terminated with a leaf certificate for the
//! target name, signed by this CA. Clients must trust the CA for
//! interception to be transparent.
//!
//! The CA is loaded from a PEM certificate and key. If either is missing or
//! unusable the proxy falls back to a freshly generated CA, so it can still
//! start; intercepted clients will then reject the handshake unless they skip
//! verification.
//!
//! # Example
//!
//! ```ignore
//! use sni_warden::proxy::ca::CertificateAuthority;
//! use std::path::Path;
//!
//! let ca = CertificateAuthority::load_or_generate(Path::new("ca.crt"), Path::new("ca.key"))?;
//! let leaf = ca.generate_cert("api.example.com")?;
//! ```

use super::error::CaError;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose, SanType,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

/// Validity period of generated leaf certificates.
const LEAF_VALIDITY_DAYS: i64 = 1;

/// Validity period of a generated fallback CA.
const CA_VALIDITY_DAYS: i64 = 365;

/// Common name of a generated fallback CA.
const FALLBACK_CA_NAME: &str = "sni-warden Interception CA";

/// Signing CA for intercepted connections.
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert_der: CertificateDer<'static>,
    cert_pem: String,
}

/// A leaf certificate and its private key, ready for rustls.
pub struct LeafCertificate {
    /// DER-encoded leaf certificate.
    pub cert_der: CertificateDer<'static>,
    /// PKCS#8 private key of the leaf.
    pub key_der: PrivateKeyDer<'static>,
}

fn new_key_pair() -> Result<KeyPair, CaError> {
    KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .map_err(|e| CaError::KeyGeneration(e.to_string()))
}

/// Whether the basic constraints of `cert_der` mark it as a CA.
fn is_ca_certificate(cert_der: &CertificateDer<'_>) -> Result<bool, CaError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| CaError::Parse(format!("certificate: {}", e)))?;
    let constraints = cert
        .basic_constraints()
        .map_err(|e| CaError::Parse(format!("basic constraints: {}", e)))?;
    Ok(constraints.is_some_and(|ext| ext.value.ca))
}

fn validity(params: &mut CertificateParams, days: i64) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(1);
    params.not_after = now + Duration::days(days);
}

impl CertificateAuthority {
    /// Generate a new in-memory CA.
    pub fn generate() -> Result<Self, CaError> {
        info!("Generating interception CA certificate");
        let key_pair = new_key_pair()?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(FALLBACK_CA_NAME.to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        validity(&mut params, CA_VALIDITY_DAYS);

        let cert = params
            .clone()
            .self_signed(&key_pair)
            .map_err(|e| CaError::CertGeneration(e.to_string()))?;

        Ok(Self {
            issuer: Issuer::new(params, key_pair),
            cert_der: cert.der().clone(),
            cert_pem: cert.pem(),
        })
    }

    /// Build a CA from PEM-encoded certificate and private key.
    ///
    /// Only the first certificate of `cert_pem` is used, so a bundle with
    /// the CA first is accepted.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| CaError::Parse("no certificate in PEM".to_string()))?
            .map_err(|e| CaError::Parse(format!("certificate: {}", e)))?;
        if !is_ca_certificate(&cert_der)? {
            return Err(CaError::Parse(
                "certificate is not marked as a CA".to_string(),
            ));
        }

        let key_pair =
            KeyPair::from_pem(key_pem).map_err(|e| CaError::Parse(format!("key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_der(&cert_der, key_pair)
            .map_err(|e| CaError::Parse(format!("certificate: {}", e)))?;

        Ok(Self {
            issuer,
            cert_der,
            cert_pem: cert_pem.to_string(),
        })
    }

    /// Load a CA from PEM files.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|source| CaError::ReadFile {
                path: path.to_path_buf(),
                source,
            })
        };
        let ca = Self::from_pem(&read(cert_path)?, &read(key_path)?)?;
        info!("Loaded interception CA from {}", cert_path.display());
        Ok(ca)
    }

    /// Load a CA from PEM files, generating one if loading fails.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        Self::from_files(cert_path, key_path).or_else(|e| {
            warn!("Unable to load CA certificate: {}", e);
            warn!("Using a generated CA; intercepted clients will not trust it");
            Self::generate()
        })
    }

    /// The CA certificate as PEM.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// The CA certificate as DER, for appending to served chains.
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// Issue a leaf certificate for `name`.
    ///
    /// `name` is a DNS name, an IP address (optionally bracketed) or `*` for
    /// clients that sent no SNI.
    pub fn generate_cert(&self, name: &str) -> Result<LeafCertificate, CaError> {
        if name.is_empty() {
            return Err(CaError::InvalidName(name.to_string()));
        }
        debug!("Issuing leaf certificate for {}", name);

        let san = match name.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(
                name.try_into()
                    .map_err(|_| CaError::InvalidName(name.to_string()))?,
            ),
        };

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(name.to_string()));
        params.distinguished_name = dn;
        params.subject_alt_names = vec![san];
        validity(&mut params, LEAF_VALIDITY_DAYS);

        let key_pair = new_key_pair()?;
        let cert = params
            .signed_by(&key_pair, &self.issuer)
            .map_err(|e| CaError::Signing(e.to_string()))?;

        Ok(LeafCertificate {
            cert_der: cert.der().clone(),
            key_der: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        })
    }
}
