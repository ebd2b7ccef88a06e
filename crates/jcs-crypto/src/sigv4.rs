//! AWS Signature Version 4 building blocks
//!
//! Everything here is pure string/byte manipulation: the request verifier in
//! the gateway and the outbound [`crate::RequestSigner`] both assemble their
//! signatures from these pieces, so a request signed by one is accepted by
//! the other.

use crate::hashing::{hmac_sha256, hmac_sha256_verify, sha256_hex, SHA256_BYTE_SIZE};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Algorithm identifier for SigV4
pub const SIGN_V4_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Payload hash used when the body is not part of the signature
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// SHA-256 of the empty string
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// ISO8601 basic format used by `x-amz-date`
pub const ISO8601_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Date format used in credential scopes
pub const YYYYMMDD_FORMAT: &str = "%Y%m%d";

/// Service name in the credential scope
pub const SERVICE_S3: &str = "s3";

/// Terminator of the credential scope
pub const SCOPE_TERMINATOR: &str = "aws4_request";

/// `YYYYMMDD/region/s3/aws4_request`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialScope {
    pub date: NaiveDate,
    pub region: String,
}

impl CredentialScope {
    pub fn new(date: NaiveDate, region: impl Into<String>) -> Self {
        Self {
            date,
            region: region.into(),
        }
    }

    /// Parse `<access-key>/YYYYMMDD/<region>/s3/aws4_request`, returning the
    /// access key alongside the scope. The date is returned unparsed so that
    /// callers can report a malformed date separately from a malformed
    /// credential.
    pub fn split_credential(credential: &str) -> Option<(&str, &str, &str)> {
        let parts: Vec<&str> = credential.split('/').collect();
        if parts.len() != 5 || parts[3] != SERVICE_S3 || parts[4] != SCOPE_TERMINATOR {
            return None;
        }
        let date = parts[1];
        if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((parts[0], date, parts[2]))
    }
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.date.format(YYYYMMDD_FORMAT),
            self.region,
            SERVICE_S3,
            SCOPE_TERMINATOR
        )
    }
}

/// Signed headers in canonical order: lower-cased names, sorted
#[derive(Clone, Debug, Default)]
pub struct CanonicalHeaders {
    entries: BTreeMap<String, Vec<String>>,
}

impl CanonicalHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value for `name`; repeated names are joined with `,`
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `name1;name2;...`
    pub fn signed_header_names(&self) -> String {
        self.entries.keys().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    /// One `name:value\n` line per header with whitespace runs collapsed
    pub fn canonical_block(&self) -> String {
        let mut block = String::new();
        for (name, values) in &self.entries {
            let joined = values.join(",");
            block.push_str(name);
            block.push(':');
            block.push_str(&joined.split_whitespace().collect::<Vec<_>>().join(" "));
            block.push('\n');
        }
        block
    }
}

/// Canonicalize a raw query string.
///
/// Pairs are decoded, sorted by key then value, and re-encoded with the
/// RFC 3986 unreserved set so that spaces become `%20`. Keys listed in
/// `exclude` (compared exactly) are dropped.
pub fn canonical_query_string(raw_query: &str, exclude: &[&str]) -> String {
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(raw_query.as_bytes())
        .filter(|(k, _)| !exclude.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Assemble the canonical request string
pub fn canonical_request(
    method: &str,
    encoded_path: &str,
    canonical_query: &str,
    headers: &CanonicalHeaders,
    payload_hash: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        encoded_path,
        canonical_query,
        headers.canonical_block(),
        headers.signed_header_names(),
        payload_hash
    )
}

/// `AWS4-HMAC-SHA256\n<timestamp>\n<scope>\n<hex(sha256(canonical))>`
pub fn string_to_sign(
    timestamp: &DateTime<Utc>,
    scope: &CredentialScope,
    canonical_request: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        SIGN_V4_ALGORITHM,
        timestamp.format(ISO8601_FORMAT),
        scope,
        sha256_hex(canonical_request.as_bytes())
    )
}

/// Key derived from a secret through the four chained HMAC steps
#[derive(Clone)]
pub struct SigningKey([u8; SHA256_BYTE_SIZE]);

impl SigningKey {
    pub fn derive(secret_key: &str, date: NaiveDate, region: &str) -> Self {
        let k_date = hmac_sha256(
            format!("AWS4{}", secret_key).as_bytes(),
            date.format(YYYYMMDD_FORMAT).to_string().as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE_S3.as_bytes());
        Self(hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes()))
    }

    /// Hex signature over `string_to_sign`
    pub fn sign(&self, string_to_sign: &str) -> String {
        hex::encode(hmac_sha256(&self.0, string_to_sign.as_bytes()))
    }

    /// Constant-time check of a lower-case hex signature
    pub fn verify(&self, string_to_sign: &str, signature: &str) -> bool {
        // signatures are compared as the lower-case hex strings they are sent as
        if signature.bytes().any(|b| b.is_ascii_uppercase()) {
            return false;
        }
        match hex::decode(signature) {
            Ok(claimed) => hmac_sha256_verify(&self.0, string_to_sign.as_bytes(), &claimed),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}
