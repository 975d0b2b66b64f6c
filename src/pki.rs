//! PKI operations for hosted control-plane certificates
//!
//! Generates the self-signed certificate authorities of a tenant's trust
//! domains and the leaf certificates they sign. Everything here is pure: no
//! I/O besides the system entropy source.
//!
//! Two independent trust domains exist per tenant:
//!
//! - `server`: signs the API server serving cert, the kubelet client cert and
//!   every kubeconfig client cert
//! - `front-proxy`: signs the aggregation-layer proxy client cert
//!
//! The domains never share a key.

use crate::error::{OperatorError, Result};
use chrono::{DateTime, Duration, Utc};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509Ref, X509};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// RSA modulus size for every generated key
pub const RSA_KEY_SIZE: u32 = 2048;

/// Validity of CA certificates. Hosted control planes do not rotate CAs.
pub const CA_VALIDITY_YEARS: i64 = 10;

/// Default validity of leaf certificates when the caller gives no NotAfter
pub const CERT_VALIDITY_YEARS: i64 = 10;

/// CA NotBefore is backdated by this many minutes to tolerate node clock skew
pub const CLOCK_SKEW_MINUTES: i64 = 5;

const SERIAL_BITS: i32 = 63;
const ORGANIZATION: &str = "kcp";

/// Extended key usage of a leaf certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtKeyUsage {
    ServerAuth,
    ClientAuth,
}

/// Subject alternative names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AltNames {
    pub dns_names: Vec<String>,
    pub ips: Vec<IpAddr>,
}

impl AltNames {
    pub fn is_empty(&self) -> bool {
        self.dns_names.is_empty() && self.ips.is_empty()
    }

    /// De-duplicated copy: DNS names sorted, IPs kept in first-seen order.
    pub fn normalized(&self) -> AltNames {
        let dns_names = self
            .dns_names
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut seen = BTreeSet::new();
        let ips = self.ips.iter().copied().filter(|ip| seen.insert(*ip)).collect();

        AltNames { dns_names, ips }
    }
}

/// Trust domain governed by one CA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDomain {
    Server,
    FrontProxy,
}

impl TrustDomain {
    pub fn common_name(&self) -> &'static str {
        match self {
            TrustDomain::Server => "ca",
            TrustDomain::FrontProxy => "front-proxy-ca",
        }
    }

    pub fn organization(&self) -> &'static str {
        ORGANIZATION
    }
}

/// Leaf certificate request
#[derive(Debug, Clone, Default)]
pub struct CertConfig {
    pub common_name: String,
    pub organization: Vec<String>,
    pub alt_names: AltNames,
    pub usages: Vec<ExtKeyUsage>,
    /// Overrides the default NotAfter
    pub not_after: Option<DateTime<Utc>>,
}

impl CertConfig {
    pub fn new(common_name: &str, usages: &[ExtKeyUsage]) -> Self {
        Self {
            common_name: common_name.to_string(),
            usages: usages.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_organization(mut self, organization: &str) -> Self {
        self.organization.push(organization.to_string());
        self
    }

    pub fn with_alt_names(mut self, alt_names: AltNames) -> Self {
        self.alt_names = alt_names;
        self
    }
}

/// Generate a self-signed CA for a trust domain.
pub fn new_ca(domain: TrustDomain, alt_names: &AltNames) -> Result<(X509, PKey<Private>)> {
    let key = new_private_key()?;
    let cert = self_signed_ca_cert(domain, alt_names, &key)
        .map_err(|e| OperatorError::Certificate(format!("unable to create self-signed CA: {}", e)))?;
    Ok((cert, key))
}

/// Generate a fresh key and a non-CA certificate for it signed by the given CA.
///
/// Fails without touching the entropy source when the request declares no
/// extended key usage or no CommonName.
pub fn new_cert_and_key(
    ca_cert: &X509Ref,
    ca_key: &PKeyRef<Private>,
    config: &CertConfig,
) -> Result<(X509, PKey<Private>)> {
    if config.usages.is_empty() {
        return Err(OperatorError::Certificate(
            "must specify at least one ExtKeyUsage".to_string(),
        ));
    }
    if config.common_name.is_empty() {
        return Err(OperatorError::Certificate("must specify a CommonName".to_string()));
    }

    let key = new_private_key()?;
    let cert = signed_cert(config, &key, ca_cert, ca_key)?;
    Ok((cert, key))
}

/// Generate the service-account token signing key pair. No certificate wraps it.
pub fn new_pub_and_key() -> Result<(PKey<Public>, PKey<Private>)> {
    let key = new_private_key()?;
    let public = public_half(&key)
        .map_err(|e| OperatorError::KeyGeneration(format!("unable to derive public key: {}", e)))?;
    Ok((public, key))
}

pub fn encode_cert_pem(cert: &X509Ref) -> Result<Vec<u8>> {
    cert.to_pem()
        .map_err(|e| OperatorError::Certificate(format!("unable to encode certificate: {}", e)))
}

/// PKCS#1 `RSA PRIVATE KEY` block.
pub fn encode_private_key_pem(key: &PKeyRef<Private>) -> Result<Vec<u8>> {
    key.rsa()
        .and_then(|rsa| rsa.private_key_to_pem())
        .map_err(|e| OperatorError::Certificate(format!("unable to encode private key: {}", e)))
}

/// PKIX `PUBLIC KEY` block.
pub fn encode_public_key_pem(key: &PKeyRef<Public>) -> Result<Vec<u8>> {
    key.public_key_to_pem()
        .map_err(|e| OperatorError::Certificate(format!("unable to encode public key: {}", e)))
}

pub fn decode_cert_pem(pem: &[u8]) -> Result<X509> {
    X509::from_pem(pem)
        .map_err(|e| OperatorError::Certificate(format!("unable to decode certificate PEM: {}", e)))
}

pub fn decode_private_key_pem(pem: &[u8]) -> Result<PKey<Private>> {
    PKey::private_key_from_pem(pem)
        .map_err(|e| OperatorError::Certificate(format!("unable to decode private key PEM: {}", e)))
}

fn new_private_key() -> Result<PKey<Private>> {
    Rsa::generate(RSA_KEY_SIZE)
        .and_then(PKey::from_rsa)
        .map_err(|e| OperatorError::KeyGeneration(format!("unable to create private key: {}", e)))
}

fn public_half(key: &PKeyRef<Private>) -> std::result::Result<PKey<Public>, ErrorStack> {
    let rsa = key.rsa()?;
    let public = Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
    PKey::from_rsa(public)
}

fn random_serial() -> Result<Asn1Integer> {
    let generate = || -> std::result::Result<Asn1Integer, ErrorStack> {
        let mut serial = BigNum::new()?;
        serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
        serial.to_asn1_integer()
    };
    generate().map_err(|e| OperatorError::KeyGeneration(format!("unable to generate serial: {}", e)))
}

fn subject_name(common_name: &str, organization: &[String]) -> std::result::Result<X509Name, ErrorStack> {
    let mut builder = X509Name::builder()?;
    builder.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    for org in organization {
        builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, org)?;
    }
    Ok(builder.build())
}

fn asn1_time(at: DateTime<Utc>) -> std::result::Result<Asn1Time, ErrorStack> {
    Asn1Time::from_unix(at.timestamp() as _)
}

fn append_alt_names(
    builder: &mut X509Builder,
    alt_names: &AltNames,
    issuer: Option<&X509Ref>,
) -> std::result::Result<(), ErrorStack> {
    if alt_names.is_empty() {
        return Ok(());
    }
    let mut san = SubjectAlternativeName::new();
    for dns in &alt_names.dns_names {
        san.dns(dns);
    }
    for ip in &alt_names.ips {
        san.ip(&ip.to_string());
    }
    let extension = san.build(&builder.x509v3_context(issuer, None))?;
    builder.append_extension(extension)
}

fn self_signed_ca_cert(
    domain: TrustDomain,
    alt_names: &AltNames,
    key: &PKeyRef<Private>,
) -> Result<X509> {
    let serial = random_serial()?;
    let now = Utc::now();
    let not_before = now - Duration::minutes(CLOCK_SKEW_MINUTES);
    let not_after = now + Duration::days(365 * CA_VALIDITY_YEARS);

    let build = || -> std::result::Result<X509, ErrorStack> {
        let name = subject_name(domain.common_name(), &[domain.organization().to_string()])?;
        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(key)?;
        let not_before = asn1_time(not_before)?;
        let not_after = asn1_time(not_after)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.append_extension(BasicConstraints::new().critical().ca().pathlen(0).build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .key_cert_sign()
                .build()?,
        )?;
        builder.append_extension(
            SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?,
        )?;
        append_alt_names(&mut builder, &alt_names.normalized(), None)?;

        builder.sign(key, MessageDigest::sha256())?;
        Ok(builder.build())
    };

    build().map_err(|e| OperatorError::Certificate(e.to_string()))
}

fn signed_cert(
    config: &CertConfig,
    key: &PKeyRef<Private>,
    ca_cert: &X509Ref,
    ca_key: &PKeyRef<Private>,
) -> Result<X509> {
    let serial = random_serial()?;
    let not_after = config
        .not_after
        .unwrap_or_else(|| Utc::now() + Duration::days(365 * CERT_VALIDITY_YEARS));
    let alt_names = config.alt_names.normalized();

    let build = || -> std::result::Result<X509, ErrorStack> {
        let name = subject_name(&config.common_name, &config.organization)?;
        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(ca_cert.subject_name())?;
        builder.set_pubkey(key)?;
        builder.set_not_before(ca_cert.not_before())?;
        let requested = asn1_time(not_after)?;
        // Never outlive the issuing CA.
        if &*requested > ca_cert.not_after() {
            builder.set_not_after(ca_cert.not_after())?;
        } else {
            builder.set_not_after(&requested)?;
        }

        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;

        let mut eku = ExtendedKeyUsage::new();
        for usage in &config.usages {
            match usage {
                ExtKeyUsage::ServerAuth => eku.server_auth(),
                ExtKeyUsage::ClientAuth => eku.client_auth(),
            };
        }
        builder.append_extension(eku.build()?)?;

        builder.append_extension(
            SubjectKeyIdentifier::new().build(&builder.x509v3_context(Some(ca_cert), None))?,
        )?;
        builder.append_extension(
            AuthorityKeyIdentifier::new()
                .keyid(true)
                .build(&builder.x509v3_context(Some(ca_cert), None))?,
        )?;
        append_alt_names(&mut builder, &alt_names, Some(ca_cert))?;

        builder.sign(ca_key, MessageDigest::sha256())?;
        Ok(builder.build())
    };

    build().map_err(|e| {
        OperatorError::Certificate(format!(
            "unable to sign certificate for {}: {}",
            config.common_name, e
        ))
    })
}
