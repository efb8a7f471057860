//! Self-signed X.509 certificate issuance for the CastV2 TLS listener.
//!
//! Real Cast receivers ship a certificate chaining to Google's device CA;
//! this bridge has no CA to chain to; senders that speak to it must be
//! configured to trust (or skip verification of) a bespoke self-signed leaf.
//! The DER is hand-emitted rather than built with a certificate-generation
//! library, since nothing here needs SANs, extensions, or multi-year
//! validity negotiation — one fixed-shape v3 certificate, good for a decade,
//! is all a bridge instance ever issues.

use anyhow::{Context, Result};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::Sha256;

const RSA_BITS: usize = 2048;
const COMMON_NAME: &str = "CastV2";
const NOT_BEFORE: &str = "250101000000Z";
const NOT_AFTER: &str = "350101000000Z";
/// sha256WithRSAEncryption
const OID_SHA256_WITH_RSA: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
/// rsaEncryption
const OID_RSA_ENCRYPTION: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];

/// An RSA keypair plus the self-signed certificate chaining to it.
pub struct IssuedCert {
    pub cert_der: CertificateDer<'static>,
    pub key_der: PrivateKeyDer<'static>,
    pub cert_pem: String,
}

/// Issue a fresh self-signed certificate. Called once at startup; the
/// resulting cert+key is held for the lifetime of the process, never
/// persisted to disk (no cross-restart cert continuity — every restart
/// gets a new identity, which is fine since nothing pins this leaf across
/// restarts either).
pub fn issue() -> Result<IssuedCert> {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS).context("generating RSA-2048 key")?;
    let public_key = RsaPublicKey::from(&private_key);

    let tbs = build_tbs_certificate(&public_key)?;
    let signature = sign(&private_key, &tbs)?;

    let cert_der = der_sequence(&[
        tbs,
        algorithm_identifier(&OID_SHA256_WITH_RSA),
        der_bit_string(&signature),
    ]);

    let key_doc = private_key
        .to_pkcs8_der()
        .context("encoding RSA private key as PKCS8")?;

    let cert_pem = pem::encode(&pem::Pem::new("CERTIFICATE", cert_der.clone()));

    Ok(IssuedCert {
        cert_der: CertificateDer::from(cert_der),
        key_der: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_doc.as_bytes().to_vec())),
        cert_pem,
    })
}

fn sign(private_key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key.sign(message);
    Ok(signature.to_vec())
}

fn build_tbs_certificate(public_key: &RsaPublicKey) -> Result<Vec<u8>> {
    let version = der_tlv(0xa0, &der_integer(&[2])); // [0] EXPLICIT INTEGER v3
    let serial_number = der_integer(&[1]);
    let signature_alg = algorithm_identifier(&OID_SHA256_WITH_RSA);
    let name = rdn_sequence(COMMON_NAME);
    let validity = der_sequence(&[der_utc_time(NOT_BEFORE)?, der_utc_time(NOT_AFTER)?]);
    let subject_public_key_info = subject_public_key_info(public_key);

    Ok(der_sequence(&[
        version,
        serial_number,
        signature_alg,
        name.clone(),
        validity,
        name,
        subject_public_key_info,
    ]))
}

fn rdn_sequence(common_name: &str) -> Vec<u8> {
    // Name ::= RDNSequence, one RDN holding a single commonName AttributeTypeAndValue.
    const OID_COMMON_NAME: [u8; 3] = [0x55, 0x04, 0x03];
    let atv = der_sequence(&[der_oid(&OID_COMMON_NAME), der_tlv(0x0c, common_name.as_bytes())]);
    let rdn = der_tlv(0x31, &atv); // SET OF
    der_sequence(&[rdn])
}

fn subject_public_key_info(public_key: &RsaPublicKey) -> Vec<u8> {
    let modulus = der_integer(&public_key.n().to_bytes_be());
    let exponent = der_integer(&public_key.e().to_bytes_be());
    let rsa_public_key = der_sequence(&[modulus, exponent]);
    let algorithm = algorithm_identifier_null(&OID_RSA_ENCRYPTION);
    der_sequence(&[algorithm, der_bit_string(&rsa_public_key)])
}

fn algorithm_identifier(oid_bytes: &[u8]) -> Vec<u8> {
    algorithm_identifier_null(oid_bytes)
}

fn algorithm_identifier_null(oid_bytes: &[u8]) -> Vec<u8> {
    der_sequence(&[der_oid(oid_bytes), vec![0x05, 0x00]])
}

/// DER length octets: short form under 128, 1-byte long form under 256,
/// 2-byte long form under 65536. Anything larger has no business appearing
/// in a certificate this small, so it's rejected rather than supported.
fn der_len(len: usize) -> Vec<u8> {
    if len < 128 {
        vec![len as u8]
    } else if len < 256 {
        vec![0x81, len as u8]
    } else if len < 65536 {
        vec![0x82, (len >> 8) as u8, (len & 0xff) as u8]
    } else {
        panic!("DER content length {len} exceeds the 65536-byte cap for this encoder");
    }
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + content.len());
    out.push(tag);
    out.extend(der_len(content.len()));
    out.extend_from_slice(content);
    out
}

fn der_sequence(items: &[Vec<u8>]) -> Vec<u8> {
    let content: Vec<u8> = items.iter().flatten().copied().collect();
    der_tlv(0x30, &content)
}

fn der_oid(oid_bytes: &[u8]) -> Vec<u8> {
    der_tlv(0x06, oid_bytes)
}

fn der_bit_string(bytes: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(1 + bytes.len());
    content.push(0x00); // no unused bits
    content.extend_from_slice(bytes);
    der_tlv(0x03, &content)
}

/// INTEGER content, minimally encoded big-endian with a leading zero byte
/// inserted when the high bit is set (DER integers are signed).
fn der_integer(bytes: &[u8]) -> Vec<u8> {
    let mut trimmed = bytes;
    while trimmed.len() > 1 && trimmed[0] == 0 {
        trimmed = &trimmed[1..];
    }
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.is_empty() {
        content.push(0);
    } else if trimmed[0] & 0x80 != 0 {
        content.push(0);
        content.extend_from_slice(trimmed);
    } else {
        content.extend_from_slice(trimmed);
    }
    der_tlv(0x02, &content)
}

fn der_utc_time(timestamp: &str) -> Result<Vec<u8>> {
    if timestamp.len() != 13 || !timestamp.ends_with('Z') {
        anyhow::bail!("UTCTime value '{timestamp}' must be 13 bytes ending in 'Z'");
    }
    Ok(der_tlv(0x17, timestamp.as_bytes()))
}
