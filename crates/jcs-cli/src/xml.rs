//! XML response bodies

use chrono::{DateTime, SecondsFormat, Utc};
use jcs_core::Bucket;
use serde::{Deserialize, Serialize};

/// XML declaration prefixed to every body
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

#[derive(Serialize)]
#[serde(rename = "Error")]
pub struct ErrorBody<'a> {
    #[serde(rename = "Code")]
    pub code: &'a str,
    #[serde(rename = "Message")]
    pub message: &'a str,
    #[serde(rename = "Resource")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<&'a str>,
    #[serde(rename = "RequestId")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename = "ListAllMyBucketsResult")]
pub struct ListAllMyBucketsResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Owner")]
    pub owner: Owner,
    #[serde(rename = "Buckets")]
    pub buckets: Buckets,
}

#[derive(Serialize)]
pub struct Owner {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
}

#[derive(Serialize)]
pub struct Buckets {
    #[serde(rename = "Bucket")]
    pub bucket: Vec<BucketEntry>,
}

#[derive(Serialize)]
pub struct BucketEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CreationDate")]
    pub creation_date: String,
}

/// `<Delete>` body of a multi-object delete
#[derive(Deserialize)]
struct DeleteRequest {
    #[serde(rename = "Object", default)]
    objects: Vec<ObjectKey>,
}

/// `<DeleteResult>` returned for a multi-object delete
#[derive(Deserialize)]
struct DeleteResult {
    #[serde(rename = "Error", default)]
    errors: Vec<ObjectKey>,
}

#[derive(Deserialize)]
struct ObjectKey {
    #[serde(rename = "Key")]
    key: String,
}

/// Keys named by a multi-object delete request
pub fn delete_request_keys(body: &[u8]) -> Result<Vec<String>, quick_xml::de::DeError> {
    let request: DeleteRequest = quick_xml::de::from_reader(body)?;
    Ok(request.objects.into_iter().map(|o| o.key).collect())
}

/// Keys a multi-object delete reported as failed
pub fn delete_result_failed_keys(body: &[u8]) -> Result<Vec<String>, quick_xml::de::DeError> {
    let result: DeleteResult = quick_xml::de::from_reader(body)?;
    Ok(result.errors.into_iter().map(|e| e.key).collect())
}

/// Serialize `value` behind the XML declaration
pub fn to_document<T: Serialize>(value: &T) -> Result<String, quick_xml::se::SeError> {
    let body = quick_xml::se::to_string(value)?;
    Ok(format!("{}\n{}", XML_DECLARATION, body))
}

/// `<Error>` document for one failed request
pub fn error_document(
    code: &str,
    message: &str,
    resource: Option<&str>,
    request_id: Option<&str>,
) -> String {
    let body = ErrorBody {
        code,
        message,
        resource,
        request_id,
    };
    to_document(&body).unwrap_or_else(|_| {
        format!(
            "{}\n<Error><Code>{}</Code><Message>{}</Message></Error>",
            XML_DECLARATION,
            escape(code),
            escape(message)
        )
    })
}

/// `ListAllMyBucketsResult` for the buckets owned by `username`
pub fn list_all_my_buckets(username: &str, buckets: &[Bucket]) -> Result<String, quick_xml::se::SeError> {
    let result = ListAllMyBucketsResult {
        xmlns: S3_NAMESPACE,
        owner: Owner {
            id: username.to_string(),
            display_name: username.to_string(),
        },
        buckets: Buckets {
            bucket: buckets
                .iter()
                .map(|b| BucketEntry {
                    name: b.name.clone(),
                    creation_date: format_timestamp(&b.created_at),
                })
                .collect(),
        },
    };
    to_document(&result)
}

/// ISO8601 with millisecond precision, as S3 renders dates
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
