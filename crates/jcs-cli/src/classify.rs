//! S3 request classification
//!
//! Decides from method, path, query and a few headers what kind of S3
//! operation a request is, before anything is authenticated. Only coarse
//! kinds are needed; the interesting ones are single-object reads and
//! writes.

use http::{HeaderMap, Method, Uri};
use std::collections::BTreeMap;

/// Host marker of the alternate writer front end
pub const DEFAULT_ALTERNATE_WRITER_MARKER: &str = "nori-write";

const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";
const COPY_SOURCE_RANGE_HEADER: &str = "x-amz-copy-source-range";
const META_PREFIX: &str = "x-amz-meta-";

/// Coarse S3 operation kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// Bucket ACL/policy, create, delete and other bucket-level writes
    AdminBucket,
    /// `GET /`
    ListBuckets,
    ListObjects,
    HeadBucket,
    /// GET/HEAD on an object
    ReadObject,
    /// PUT/POST/DELETE on an object, and bucket-level batch delete
    WriteObject,
    /// POST to an object through the alternate writer host
    AlternateWriter,
    NotImplemented,
}

/// What the gateway does after a successful forward
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    /// Fetch the object from the primary and fan it out
    Upload,
    /// Propagate the delete to every location
    Delete,
    /// Propagate each key the primary deleted in a multi-object delete
    BatchDelete,
}

/// Source of a server-side copy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopySource {
    pub bucket: String,
    pub key: String,
    pub range: Option<String>,
}

/// A classified request
#[derive(Clone, Debug)]
pub struct S3Request {
    pub kind: RequestKind,
    pub method: Method,
    pub bucket: String,
    pub key: String,
    pub copy_source: Option<CopySource>,
    /// `x-amz-meta-*` headers with the prefix stripped, names lower-cased
    pub metadata: BTreeMap<String, String>,
    query: Vec<(String, String)>,
}

impl S3Request {
    pub fn has_bucket_and_key(&self) -> bool {
        !self.bucket.is_empty() && !self.key.is_empty()
    }

    /// Whether the query string carries `name`, with or without a value
    pub fn has_query(&self, name: &str) -> bool {
        self.query.iter().any(|(k, _)| k == name)
    }

    /// `/bucket/key` as decoded from the path
    pub fn resource(&self) -> String {
        match (self.bucket.is_empty(), self.key.is_empty()) {
            (true, _) => "/".to_string(),
            (false, true) => format!("/{}", self.bucket),
            (false, false) => format!("/{}/{}", self.bucket, self.key),
        }
    }

    /// Synchronization to run once the primary accepted a write.
    ///
    /// Multipart part uploads, initiations and aborts leave no complete
    /// object behind, so they are forwarded without synchronization.
    pub fn sync_action(&self) -> Option<SyncAction> {
        if self.kind != RequestKind::WriteObject || self.bucket.is_empty() {
            return None;
        }
        if self.key.is_empty() {
            return (self.method == Method::POST && self.has_query("delete"))
                .then_some(SyncAction::BatchDelete);
        }
        match self.method {
            Method::PUT if !self.has_query("uploadId") => Some(SyncAction::Upload),
            Method::POST if !self.has_query("uploads") => Some(SyncAction::Upload),
            Method::DELETE if !self.has_query("uploadId") => Some(SyncAction::Delete),
            _ => None,
        }
    }

    /// Whether the read path should try to restore the object first
    pub fn needs_restore(&self) -> bool {
        self.kind == RequestKind::ReadObject
            && self.has_bucket_and_key()
            && !self.has_query("uploadId")
    }
}

/// Classifies requests; holds the alternate writer host marker
#[derive(Clone, Debug)]
pub struct Classifier {
    alternate_writer_marker: String,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_ALTERNATE_WRITER_MARKER)
    }
}

impl Classifier {
    pub fn new(alternate_writer_marker: impl Into<String>) -> Self {
        Self {
            alternate_writer_marker: alternate_writer_marker.into(),
        }
    }

    pub fn classify(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> S3Request {
        let (bucket, key) = split_path(&percent_decode(uri.path()));
        let query: Vec<(String, String)> = uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let mut request = S3Request {
            kind: RequestKind::NotImplemented,
            method: method.clone(),
            bucket,
            key,
            copy_source: None,
            metadata: extract_metadata(headers),
            query,
        };
        let kind = self.kind_of(&mut request, uri, headers);
        request.kind = kind;
        request
    }

    fn kind_of(&self, request: &mut S3Request, uri: &Uri, headers: &HeaderMap) -> RequestKind {
        if request.has_query("acl") || request.has_query("policy") {
            return RequestKind::AdminBucket;
        }

        if request.key.is_empty() {
            if request.bucket.is_empty() {
                return match request.method {
                    Method::GET => RequestKind::ListBuckets,
                    _ => RequestKind::NotImplemented,
                };
            }
            return match request.method {
                Method::GET => RequestKind::ListObjects,
                Method::HEAD => RequestKind::HeadBucket,
                Method::POST if request.has_query("delete") => RequestKind::WriteObject,
                Method::POST | Method::PUT | Method::DELETE => RequestKind::AdminBucket,
                _ => RequestKind::NotImplemented,
            };
        }

        match request.method {
            Method::GET | Method::HEAD => RequestKind::ReadObject,
            Method::DELETE => RequestKind::WriteObject,
            Method::POST => {
                if request_host(uri, headers).contains(self.alternate_writer_marker.as_str()) {
                    RequestKind::AlternateWriter
                } else {
                    RequestKind::WriteObject
                }
            }
            Method::PUT => match header_str(headers, COPY_SOURCE_HEADER) {
                Some(raw) if !raw.is_empty() => {
                    let (bucket, key) = split_path(&unescape_copy_source(raw));
                    let missing_key = key.is_empty();
                    request.copy_source = Some(CopySource {
                        bucket,
                        key,
                        range: header_str(headers, COPY_SOURCE_RANGE_HEADER).map(str::to_string),
                    });
                    if missing_key {
                        RequestKind::NotImplemented
                    } else {
                        RequestKind::WriteObject
                    }
                }
                _ => RequestKind::WriteObject,
            },
            _ => RequestKind::NotImplemented,
        }
    }
}

/// Split `/bucket/key/with/slashes` at the first `/` after the leading one
pub fn split_path(path: &str) -> (String, String) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.split_once('/') {
        Some((bucket, key)) => (bucket.to_string(), key.to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

fn percent_decode(path: &str) -> String {
    urlencoding::decode(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// Query-style unescape: `+` becomes a space, and a value with a malformed
/// `%` escape is kept as sent
fn unescape_copy_source(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let malformed = bytes.iter().enumerate().any(|(i, &b)| {
        b == b'%'
            && bytes
                .get(i + 1..i + 3)
                .is_none_or(|hex| !hex.iter().all(u8::is_ascii_hexdigit))
    });
    if malformed {
        return raw.to_string();
    }
    urlencoding::decode(&raw.replace('+', " "))
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn extract_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    for name in headers.keys() {
        let Some(meta) = name.as_str().strip_prefix(META_PREFIX) else {
            continue;
        };
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        metadata.insert(meta.to_string(), joined);
    }
    metadata
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Host the client addressed, from the `Host` header or the URI authority
pub fn request_host(uri: &Uri, headers: &HeaderMap) -> String {
    header_str(headers, http::header::HOST.as_str())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default()
}
