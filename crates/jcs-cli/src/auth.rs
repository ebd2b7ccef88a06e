//! AWS Signature Version 4 verification
//!
//! Supports header-signed and presigned-query requests. The verifier only
//! establishes which access key signed a request; mapping keys to users is
//! left to the caller through [`SecretKeyProvider`].

use crate::classify::request_host;
use crate::error::S3ErrorCode;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use http::header::{AUTHORIZATION, DATE};
use http::{HeaderMap, Method, Uri};
use jcs_core::MetadataStore;
use jcs_crypto::{
    canonical_query_string, canonical_request, string_to_sign, CanonicalHeaders, CredentialScope,
    SigningKey, EMPTY_SHA256, ISO8601_FORMAT, SIGN_V4_ALGORITHM, UNSIGNED_PAYLOAD,
    YYYYMMDD_FORMAT,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const SIGN_V2_ALGORITHM: &str = "AWS";
const AMZ_ACCESS_KEY_ID: &str = "AWSAccessKeyId";
const AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
const AMZ_CONTENT_SHA256_QUERY: &str = "X-Amz-Content-Sha256";
const AMZ_CREDENTIAL: &str = "X-Amz-Credential";
const AMZ_DATE: &str = "x-amz-date";
const AMZ_DATE_QUERY: &str = "X-Amz-Date";
const AMZ_EXPIRES: &str = "X-Amz-Expires";
const AMZ_SIGNED_HEADERS: &str = "X-Amz-SignedHeaders";
const AMZ_SIGNATURE: &str = "X-Amz-Signature";

/// Longest validity a presigned request may ask for (7 days)
pub const MAX_PRESIGN_EXPIRES_SECS: i64 = 7 * 24 * 60 * 60;

/// Default tolerance for request dates in the future
pub const DEFAULT_MAX_SKEW_SECS: u64 = 15 * 60;

/// A failed verification, tagged with the S3 error it maps to
#[derive(Error, Debug, Clone)]
#[error("{}: {reason}", .code.as_str())]
pub struct AuthError {
    code: S3ErrorCode,
    reason: String,
}

impl AuthError {
    pub fn new(code: S3ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> S3ErrorCode {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

fn fail<T>(code: S3ErrorCode, reason: impl Into<String>) -> Result<T, AuthError> {
    Err(AuthError::new(code, reason))
}

/// Looks up the secret belonging to an access key
#[async_trait]
pub trait SecretKeyProvider: Send + Sync {
    async fn secret_key(&self, access_key: &str) -> Option<String>;
}

/// Secrets taken from the users in a metadata store
pub struct MetadataSecrets(pub Arc<dyn MetadataStore>);

#[async_trait]
impl SecretKeyProvider for MetadataSecrets {
    async fn secret_key(&self, access_key: &str) -> Option<String> {
        match self.0.get_user_by_access_key(access_key).await {
            Ok(user) => Some(user.secret_key),
            Err(e) => {
                debug!(access_key, error = %e, "secret key lookup failed");
                None
            }
        }
    }
}

/// Values parsed out of a signed request; lives for one verification
#[derive(Debug)]
struct SignedRequest {
    access_key: String,
    credential_date: NaiveDate,
    region: String,
    date: DateTime<Utc>,
    signed_headers: Vec<String>,
    signature: String,
    /// Presigned requests only
    expires: Option<i64>,
}

/// Verifies SigV4 header and presigned-query signatures
#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    max_skew: Duration,
    max_age: Duration,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self {
            max_skew: Duration::seconds(DEFAULT_MAX_SKEW_SECS as i64),
            max_age: Duration::seconds(MAX_PRESIGN_EXPIRES_SECS),
        }
    }
}

impl SignatureVerifier {
    pub fn new(max_skew_secs: u64) -> Self {
        Self {
            max_skew: Duration::seconds(max_skew_secs as i64),
            ..Self::default()
        }
    }

    /// Verify a request as of `now`, returning the signing access key
    pub async fn verify<P>(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        now: DateTime<Utc>,
        secrets: &P,
    ) -> Result<String, AuthError>
    where
        P: SecretKeyProvider + ?Sized,
    {
        let query = parse_query(uri);
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let presigned = if authorization.starts_with(SIGN_V4_ALGORITHM) {
            false
        } else if has_key(&query, AMZ_CREDENTIAL) {
            true
        } else if authorization.starts_with(SIGN_V2_ALGORITHM) || has_key(&query, AMZ_ACCESS_KEY_ID) {
            return fail(
                S3ErrorCode::SignatureVersionNotSupported,
                "signature version 2 is not supported",
            );
        } else {
            return fail(
                S3ErrorCode::AuthorizationHeaderMalformed,
                "no recognizable authorization",
            );
        };

        let signed = if presigned {
            parse_presigned(&query, headers)?
        } else {
            parse_authorization(authorization, &query, headers)?
        };

        self.check_time(&signed, now)?;

        let secret = match secrets.secret_key(&signed.access_key).await {
            Some(secret) => secret,
            None => {
                return fail(
                    S3ErrorCode::InvalidAccessKeyId,
                    format!("unknown access key {}", signed.access_key),
                )
            }
        };

        let exclude: &[&str] = if presigned { &[AMZ_SIGNATURE] } else { &[] };
        let canonical_query = canonical_query_string(uri.query().unwrap_or(""), exclude);
        let canonical_headers = extract_signed_headers(&signed.signed_headers, uri, headers, &query)?;
        let payload_hash = payload_hash(presigned, headers, &query);

        let request = canonical_request(
            method.as_str(),
            uri.path(),
            &canonical_query,
            &canonical_headers,
            &payload_hash,
        );
        let scope = CredentialScope::new(signed.credential_date, signed.region.as_str());
        let to_sign = string_to_sign(&signed.date, &scope, &request);
        let key = SigningKey::derive(&secret, signed.date.date_naive(), &signed.region);

        if !key.verify(&to_sign, &signed.signature) {
            return fail(
                S3ErrorCode::SignatureDoesNotMatch,
                format!("signature mismatch for access key {}", signed.access_key),
            );
        }
        Ok(signed.access_key)
    }

    fn check_time(&self, signed: &SignedRequest, now: DateTime<Utc>) -> Result<(), AuthError> {
        if signed.date > now + self.max_skew {
            return fail(
                S3ErrorCode::RequestTimeTooSkewed,
                format!("request date {} is ahead of {}", signed.date, now),
            );
        }
        let age = now - signed.date;
        if age > self.max_age {
            return fail(
                S3ErrorCode::ExpiredPresignRequest,
                format!("request date {} is too old", signed.date),
            );
        }
        if let Some(expires) = signed.expires {
            if expires < 0 {
                return fail(S3ErrorCode::NegativeExpires, expires.to_string());
            }
            if expires > MAX_PRESIGN_EXPIRES_SECS {
                return fail(S3ErrorCode::MaximumExpires, expires.to_string());
            }
            if age.num_seconds() > expires {
                return fail(
                    S3ErrorCode::ExpiredPresignRequest,
                    format!("presigned request expired {}s after signing", expires),
                );
            }
        }
        Ok(())
    }
}

fn parse_authorization(
    authorization: &str,
    query: &[(String, String)],
    headers: &HeaderMap,
) -> Result<SignedRequest, AuthError> {
    let malformed = |reason: &str| AuthError::new(S3ErrorCode::AuthorizationHeaderMalformed, reason);

    let fields: Vec<&str> = authorization[SIGN_V4_ALGORITHM.len()..]
        .split(',')
        .map(str::trim)
        .collect();
    let [credential, signed_headers, signature] = fields.as_slice() else {
        return Err(malformed("expected three authorization fields"));
    };

    let credential = credential
        .strip_prefix("Credential=")
        .ok_or_else(|| malformed("missing Credential"))?;
    let (access_key, date, region) =
        CredentialScope::split_credential(credential).ok_or_else(|| malformed("bad credential"))?;
    let credential_date = NaiveDate::parse_from_str(date, YYYYMMDD_FORMAT)
        .map_err(|_| malformed("bad credential date"))?;
    let date = request_date(headers, query).ok_or_else(|| malformed("bad request date"))?;

    let signed_headers = signed_headers
        .strip_prefix("SignedHeaders=")
        .ok_or_else(|| malformed("missing SignedHeaders"))?;
    let signature = signature
        .strip_prefix("Signature=")
        .ok_or_else(|| malformed("missing Signature"))?;

    Ok(SignedRequest {
        access_key: access_key.to_string(),
        credential_date,
        region: region.to_string(),
        date,
        signed_headers: signed_headers.split(';').map(str::to_string).collect(),
        signature: signature.to_string(),
        expires: None,
    })
}

fn parse_presigned(query: &[(String, String)], headers: &HeaderMap) -> Result<SignedRequest, AuthError> {
    let credential = query_value(query, AMZ_CREDENTIAL).unwrap_or("");
    let (access_key, date, region) = CredentialScope::split_credential(credential)
        .ok_or_else(|| AuthError::new(S3ErrorCode::CredMalformed, credential))?;
    let credential_date = NaiveDate::parse_from_str(date, YYYYMMDD_FORMAT)
        .map_err(|_| AuthError::new(S3ErrorCode::MalformedCredentialDate, date))?;
    let date = request_date(headers, query)
        .ok_or_else(|| AuthError::new(S3ErrorCode::MalformedPresignedDate, "bad request date"))?;
    let raw_expires = query_value(query, AMZ_EXPIRES).unwrap_or("");
    let expires: i64 = raw_expires
        .parse()
        .map_err(|_| AuthError::new(S3ErrorCode::MalformedExpires, raw_expires))?;

    Ok(SignedRequest {
        access_key: access_key.to_string(),
        credential_date,
        region: region.to_string(),
        date,
        signed_headers: query_value(query, AMZ_SIGNED_HEADERS)
            .unwrap_or("")
            .split(';')
            .map(str::to_string)
            .collect(),
        signature: query_value(query, AMZ_SIGNATURE).unwrap_or("").to_string(),
        expires: Some(expires),
    })
}

/// `x-amz-date` header, then `X-Amz-Date` query, then an RFC1123 `Date`
fn request_date(headers: &HeaderMap, query: &[(String, String)]) -> Option<DateTime<Utc>> {
    let amz_date = headers
        .get(AMZ_DATE)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .or_else(|| query_value(query, AMZ_DATE_QUERY).filter(|s| !s.is_empty()));
    match amz_date {
        Some(raw) => NaiveDateTime::parse_from_str(raw, ISO8601_FORMAT)
            .ok()
            .map(|dt| dt.and_utc()),
        None => {
            let raw = headers.get(DATE)?.to_str().ok()?;
            DateTime::parse_from_rfc2822(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
    }
}

/// Collect the values of every signed header.
///
/// Values come from the headers, then the query string. `host`, `expect`,
/// `transfer-encoding` and `content-length` have fallbacks because proxies
/// and HTTP stacks may consume them before we see the request.
fn extract_signed_headers(
    signed: &[String],
    uri: &Uri,
    headers: &HeaderMap,
    query: &[(String, String)],
) -> Result<CanonicalHeaders, AuthError> {
    if !signed.iter().any(|h| h == "host") {
        return fail(S3ErrorCode::UnsignedHeaders, "host is not signed");
    }

    let mut canonical = CanonicalHeaders::new();
    for name in signed {
        let values: Vec<String> = headers
            .get_all(name.as_str())
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        if !values.is_empty() {
            for value in values {
                canonical.add(name, value);
            }
            continue;
        }

        let from_query: Vec<&str> = query
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect();
        if !from_query.is_empty() {
            for value in from_query {
                canonical.add(name, value);
            }
            continue;
        }

        match name.as_str() {
            "expect" => canonical.add(name, "100-continue"),
            "host" => canonical.add(name, request_host(uri, headers)),
            "transfer-encoding" => {}
            "content-length" => canonical.add(name, "0"),
            other => {
                return fail(
                    S3ErrorCode::UnsignedHeaders,
                    format!("signed header {} is missing", other),
                )
            }
        }
    }
    Ok(canonical)
}

fn payload_hash(presigned: bool, headers: &HeaderMap, query: &[(String, String)]) -> String {
    let header = headers.get(AMZ_CONTENT_SHA256).and_then(|v| v.to_str().ok());
    if presigned {
        query_value(query, AMZ_CONTENT_SHA256_QUERY)
            .or(header)
            .unwrap_or(UNSIGNED_PAYLOAD)
            .to_string()
    } else {
        header.unwrap_or(EMPTY_SHA256).to_string()
    }
}

fn parse_query(uri: &Uri) -> Vec<(String, String)> {
    uri.query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

fn has_key(query: &[(String, String)], name: &str) -> bool {
    query.iter().any(|(k, _)| k == name)
}

fn query_value<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}
