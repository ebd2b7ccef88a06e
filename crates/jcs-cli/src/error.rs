//! Error types and S3 error codes

use crate::auth::AuthError;
use crate::xml;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use jcs_cloudstore::CloudError;
use jcs_core::CoreError;
use jcs_crypto::CryptoError;
use thiserror::Error;
use tracing::warn;

/// S3 error codes
///
/// Several variants share a wire code; the presigned-query errors all render
/// as `AuthorizationQueryParametersError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S3ErrorCode {
    InvalidCopyDest,
    InvalidCopySource,
    InvalidMetadataDirective,
    InvalidRequestBody,
    InvalidMaxUploads,
    InvalidMaxKeys,
    InvalidEncodingMethod,
    InvalidMaxParts,
    InvalidPartNumber,
    InvalidPartNumberMarker,
    InvalidPolicyDocument,
    AccessDenied,
    BadDigest,
    EntityTooSmall,
    EntityTooLarge,
    PolicyTooLarge,
    IncompleteBody,
    InternalError,
    InvalidAccessKeyId,
    InvalidBucketName,
    InvalidDigest,
    InvalidRange,
    MalformedXML,
    MissingContentLength,
    MissingContentMD5,
    MissingRequestBody,
    NoSuchBucket,
    NoSuchBucketPolicy,
    NoSuchBucketLifecycle,
    NoSuchKey,
    NoSuchUpload,
    NoSuchVersion,
    NotImplemented,
    PreconditionFailed,
    RequestTimeTooSkewed,
    SignatureDoesNotMatch,
    MethodNotAllowed,
    InvalidPart,
    InvalidPartOrder,
    InvalidObjectState,
    AuthorizationHeaderMalformed,
    MalformedPOSTRequest,
    POSTFileRequired,
    SignatureVersionNotSupported,
    BucketNotEmpty,
    BucketAlreadyExists,
    AllAccessDisabled,
    MalformedPolicy,
    MissingFields,
    MissingCredTag,
    CredMalformed,
    MalformedDate,
    MalformedPresignedDate,
    MalformedCredentialDate,
    MalformedCredentialRegion,
    InvalidRegion,
    InvalidService,
    InvalidRequestVersion,
    MissingSignTag,
    MissingSignHeadersTag,
    MalformedExpires,
    NegativeExpires,
    AuthHeaderEmpty,
    MissingDateHeader,
    InvalidQuerySignatureAlgo,
    ExpiredPresignRequest,
    RequestNotReadyYet,
    SlowDown,
    InvalidPrefixMarker,
    BadRequest,
    KeyTooLong,
    UnsignedHeaders,
    InvalidQueryParams,
    BucketAlreadyOwnedByYou,
    InvalidDuration,
    InvalidBucketObjectLockConfiguration,
    ObjectLocked,
    InvalidRetentionDate,
    PastObjectLockRetainDate,
    UnknownWORMModeDirective,
    ObjectLockInvalidHeaders,
    InvalidCopyPartRange,
    InvalidCopyPartRangeSource,
    MetadataTooLarge,
    UnsupportedMetadata,
    MaximumExpires,
    NotFound,
}

impl S3ErrorCode {
    /// Get the error code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCopyDest => "InvalidRequest",
            Self::InvalidCopySource => "InvalidArgument",
            Self::InvalidMetadataDirective => "InvalidArgument",
            Self::InvalidRequestBody => "InvalidArgument",
            Self::InvalidMaxUploads => "InvalidArgument",
            Self::InvalidMaxKeys => "InvalidArgument",
            Self::InvalidEncodingMethod => "InvalidArgument",
            Self::InvalidMaxParts => "InvalidArgument",
            Self::InvalidPartNumber => "InvalidArgument",
            Self::InvalidPartNumberMarker => "InvalidArgument",
            Self::InvalidPolicyDocument => "InvalidPolicyDocument",
            Self::AccessDenied => "AccessDenied",
            Self::BadDigest => "BadDigest",
            Self::EntityTooSmall => "EntityTooSmall",
            Self::EntityTooLarge => "EntityTooLarge",
            Self::PolicyTooLarge => "PolicyTooLarge",
            Self::IncompleteBody => "IncompleteBody",
            Self::InternalError => "InternalError",
            Self::InvalidAccessKeyId => "InvalidAccessKeyId",
            Self::InvalidBucketName => "InvalidBucketName",
            Self::InvalidDigest => "InvalidDigest",
            Self::InvalidRange => "InvalidRange",
            Self::MalformedXML => "MalformedXML",
            Self::MissingContentLength => "MissingContentLength",
            Self::MissingContentMD5 => "MissingContentMD5",
            Self::MissingRequestBody => "MissingRequestBodyError",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchBucketPolicy => "NoSuchBucketPolicy",
            Self::NoSuchBucketLifecycle => "NoSuchBucketLifecycle",
            Self::NoSuchKey => "NoSuchKey",
            Self::NoSuchUpload => "NoSuchUpload",
            Self::NoSuchVersion => "NoSuchVersion",
            Self::NotImplemented => "NotImplemented",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::InvalidPart => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::InvalidObjectState => "InvalidObjectState",
            Self::AuthorizationHeaderMalformed => "AuthorizationHeaderMalformed",
            Self::MalformedPOSTRequest => "MalformedPOSTRequest",
            Self::POSTFileRequired => "InvalidArgument",
            Self::SignatureVersionNotSupported => "InvalidRequest",
            Self::BucketNotEmpty => "BucketNotEmpty",
            Self::BucketAlreadyExists => "BucketAlreadyExists",
            Self::AllAccessDisabled => "AllAccessDisabled",
            Self::MalformedPolicy => "MalformedPolicy",
            Self::MissingFields => "MissingFields",
            Self::MissingCredTag => "InvalidRequest",
            Self::CredMalformed => "AuthorizationQueryParametersError",
            Self::MalformedDate => "MalformedDate",
            Self::MalformedPresignedDate => "AuthorizationQueryParametersError",
            Self::MalformedCredentialDate => "AuthorizationQueryParametersError",
            Self::MalformedCredentialRegion => "AuthorizationQueryParametersError",
            Self::InvalidRegion => "InvalidRegion",
            Self::InvalidService => "AuthorizationQueryParametersError",
            Self::InvalidRequestVersion => "AuthorizationQueryParametersError",
            Self::MissingSignTag => "AccessDenied",
            Self::MissingSignHeadersTag => "InvalidArgument",
            Self::MalformedExpires => "AuthorizationQueryParametersError",
            Self::NegativeExpires => "AuthorizationQueryParametersError",
            Self::AuthHeaderEmpty => "InvalidArgument",
            Self::MissingDateHeader => "AccessDenied",
            Self::InvalidQuerySignatureAlgo => "AuthorizationQueryParametersError",
            Self::ExpiredPresignRequest => "AccessDenied",
            Self::RequestNotReadyYet => "AccessDenied",
            Self::SlowDown => "SlowDown",
            Self::InvalidPrefixMarker => "InvalidPrefixMarker",
            Self::BadRequest => "BadRequest",
            Self::KeyTooLong => "KeyTooLongError",
            Self::UnsignedHeaders => "AccessDenied",
            Self::InvalidQueryParams => "AuthorizationQueryParametersError",
            Self::BucketAlreadyOwnedByYou => "BucketAlreadyOwnedByYou",
            Self::InvalidDuration => "InvalidDuration",
            Self::InvalidBucketObjectLockConfiguration => "InvalidRequest",
            Self::ObjectLocked => "InvalidRequest",
            Self::InvalidRetentionDate => "InvalidRequest",
            Self::PastObjectLockRetainDate => "InvalidRequest",
            Self::UnknownWORMModeDirective => "InvalidRequest",
            Self::ObjectLockInvalidHeaders => "InvalidRequest",
            Self::InvalidCopyPartRange => "InvalidArgument",
            Self::InvalidCopyPartRangeSource => "InvalidArgument",
            Self::MetadataTooLarge => "InvalidArgument",
            Self::UnsupportedMetadata => "InvalidArgument",
            Self::MaximumExpires => "AuthorizationQueryParametersError",
            Self::NotFound => "NotFound",
        }
    }

    /// Canonical description sent to clients
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidCopyDest => "This copy request is illegal because it is trying to copy an object to itself without changing the object's metadata, storage class, website redirect location or encryption attributes.",
            Self::InvalidCopySource => "Copy Source must mention the source bucket and key: sourcebucket/sourcekey.",
            Self::InvalidMetadataDirective => "Unknown metadata directive.",
            Self::InvalidRequestBody => "Body shouldn't be set for this request.",
            Self::InvalidMaxUploads => "Argument max-uploads must be an integer between 0 and 2147483647.",
            Self::InvalidMaxKeys => "Argument maxKeys must be an integer between 0 and 2147483647.",
            Self::InvalidEncodingMethod => "Invalid Encoding Method specified in Request.",
            Self::InvalidMaxParts => "Argument max-parts must be an integer between 0 and 2147483647.",
            Self::InvalidPartNumber => "Argument partNumber must be an integer.",
            Self::InvalidPartNumberMarker => "Argument partNumberMarker must be an integer.",
            Self::InvalidPolicyDocument => "The content of the form does not meet the conditions specified in the policy document.",
            Self::AccessDenied => "Access Denied.",
            Self::BadDigest => "The Content-Md5 you specified did not match what we received.",
            Self::EntityTooSmall => "Your proposed upload is smaller than the minimum allowed object size.",
            Self::EntityTooLarge => "Your proposed upload exceeds the maximum allowed object size.",
            Self::PolicyTooLarge => "Policy exceeds the maximum allowed document size.",
            Self::IncompleteBody => "You did not provide the number of bytes specified by the Content-Length HTTP header.",
            Self::InternalError => "We encountered an internal error, please try again.",
            Self::InvalidAccessKeyId => "The access key ID you provided does not exist in our records.",
            Self::InvalidBucketName => "The specified bucket is not valid.",
            Self::InvalidDigest => "The Content-Md5 you specified is not valid.",
            Self::InvalidRange => "The requested range is not satisfiable.",
            Self::MalformedXML => "The XML you provided was not well-formed or did not validate against our published schema.",
            Self::MissingContentLength => "You must provide the Content-Length HTTP header.",
            Self::MissingContentMD5 => "Missing required header for this request: Content-Md5.",
            Self::MissingRequestBody => "Request body is empty.",
            Self::NoSuchBucket => "The specified bucket does not exist.",
            Self::NoSuchBucketPolicy => "The bucket policy does not exist.",
            Self::NoSuchBucketLifecycle => "The bucket lifecycle configuration does not exist.",
            Self::NoSuchKey => "The specified key does not exist.",
            Self::NoSuchUpload => "The specified multipart upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.",
            Self::NoSuchVersion => "Indicates that the version ID specified in the request does not match an existing version.",
            Self::NotImplemented => "A header you provided implies functionality that is not implemented.",
            Self::PreconditionFailed => "At least one of the pre-conditions you specified did not hold.",
            Self::RequestTimeTooSkewed => "The difference between the request time and the server's time is too large.",
            Self::SignatureDoesNotMatch => "The request signature we calculated does not match the signature you provided. Check your key and signing method.",
            Self::MethodNotAllowed => "The specified method is not allowed against this resource.",
            Self::InvalidPart => "One or more of the specified parts could not be found. The part may not have been uploaded, or the specified entity tag may not match the part's entity tag.",
            Self::InvalidPartOrder => "The list of parts was not in ascending order. The parts list must be specified in order by part number.",
            Self::InvalidObjectState => "The operation is not valid for the current state of the object.",
            Self::AuthorizationHeaderMalformed => "The authorization header is malformed; the region is wrong; expecting 'us-east-1'.",
            Self::MalformedPOSTRequest => "The body of your POST request is not well-formed multipart/form-data.",
            Self::POSTFileRequired => "POST requires exactly one file upload per request.",
            Self::SignatureVersionNotSupported => "The authorization mechanism you have provided is not supported. Please use AWS4-HMAC-SHA256.",
            Self::BucketNotEmpty => "The bucket you tried to delete is not empty.",
            Self::BucketAlreadyExists => "The requested bucket name is not available. The bucket namespace is shared by all users of the system. Please select a different name and try again.",
            Self::AllAccessDisabled => "All access to this bucket has been disabled.",
            Self::MalformedPolicy => "Policy has invalid resource.",
            Self::MissingFields => "Missing fields in request.",
            Self::MissingCredTag => "Missing Credential field for this request.",
            Self::CredMalformed => "Error parsing the X-Amz-Credential parameter; the Credential is mal-formed; expecting \"<YOUR-AKID>/YYYYMMDD/REGION/SERVICE/aws4_request\".",
            Self::MalformedDate => "Invalid date format header, expected to be in ISO8601, RFC1123 or RFC1123Z time format.",
            Self::MalformedPresignedDate => "X-Amz-Date must be in the ISO8601 Long Format \"yyyyMMdd'T'HHmmss'Z'\".",
            Self::MalformedCredentialDate => "Error parsing the X-Amz-Credential parameter; incorrect date format. This date in the credential must be in the format \"yyyyMMdd\".",
            Self::MalformedCredentialRegion => "Error parsing the X-Amz-Credential parameter; the region is wrong.",
            Self::InvalidRegion => "Region does not match.",
            Self::InvalidService => "Error parsing the X-Amz-Credential parameter; incorrect service. This endpoint belongs to \"s3\".",
            Self::InvalidRequestVersion => "Error parsing the X-Amz-Credential parameter; incorrect terminal. This endpoint uses \"aws4_request\".",
            Self::MissingSignTag => "Signature header missing Signature field.",
            Self::MissingSignHeadersTag => "Signature header missing SignedHeaders field.",
            Self::MalformedExpires => "X-Amz-Expires should be a number.",
            Self::NegativeExpires => "X-Amz-Expires must be non-negative.",
            Self::AuthHeaderEmpty => "Authorization header is invalid -- one and only one ' ' (space) required.",
            Self::MissingDateHeader => "AWS authentication requires a valid Date or x-amz-date header.",
            Self::InvalidQuerySignatureAlgo => "X-Amz-Algorithm only supports \"AWS4-HMAC-SHA256\".",
            Self::ExpiredPresignRequest => "Request has expired.",
            Self::RequestNotReadyYet => "Request is not valid yet.",
            Self::SlowDown => "Please reduce your request.",
            Self::InvalidPrefixMarker => "Invalid marker prefix combination.",
            Self::BadRequest => "400 BadRequest.",
            Self::KeyTooLong => "Your key is too long.",
            Self::UnsignedHeaders => "There were headers present in the request which were not signed.",
            Self::InvalidQueryParams => "Query-string authentication version 4 requires the X-Amz-Algorithm, X-Amz-Credential, X-Amz-Signature, X-Amz-Date, X-Amz-SignedHeaders, and X-Amz-Expires parameters.",
            Self::BucketAlreadyOwnedByYou => "Your previous request to create the named bucket succeeded and you already own it.",
            Self::InvalidDuration => "Duration provided in the request is invalid.",
            Self::InvalidBucketObjectLockConfiguration => "Bucket is missing ObjectLockConfiguration.",
            Self::ObjectLocked => "Object is WORM protected and cannot be overwritten.",
            Self::InvalidRetentionDate => "Date must be provided in ISO 8601 format.",
            Self::PastObjectLockRetainDate => "the retain until date must be in the future.",
            Self::UnknownWORMModeDirective => "unknown wormMode directive.",
            Self::ObjectLockInvalidHeaders => "x-amz-object-lock-retain-until-date and x-amz-object-lock-mode must both be supplied.",
            Self::InvalidCopyPartRange => "The x-amz-copy-source-range value must be of the form bytes=first-last where first and last are the zero-based offsets of the first and last bytes to copy.",
            Self::InvalidCopyPartRangeSource => "Range specified is not valid for source object.",
            Self::MetadataTooLarge => "Your metadata headers exceed the maximum allowed metadata size.",
            Self::UnsupportedMetadata => "Your metadata headers are not supported.",
            Self::MaximumExpires => "X-Amz-Expires must be less than a week (in seconds); that is, the given X-Amz-Expires must be less than 604800 seconds.",
            Self::NotFound => "The resource you request is not found.",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCopyDest
            | Self::InvalidCopySource
            | Self::InvalidMetadataDirective
            | Self::InvalidRequestBody
            | Self::InvalidMaxUploads
            | Self::InvalidMaxKeys
            | Self::InvalidEncodingMethod
            | Self::InvalidMaxParts
            | Self::InvalidPartNumber
            | Self::InvalidPartNumberMarker
            | Self::InvalidPolicyDocument
            | Self::BadDigest
            | Self::EntityTooSmall
            | Self::EntityTooLarge
            | Self::PolicyTooLarge
            | Self::IncompleteBody
            | Self::InvalidBucketName
            | Self::InvalidDigest
            | Self::MalformedXML
            | Self::MissingContentMD5
            | Self::InvalidPart
            | Self::InvalidPartOrder
            | Self::AuthorizationHeaderMalformed
            | Self::MalformedPOSTRequest
            | Self::POSTFileRequired
            | Self::SignatureVersionNotSupported
            | Self::MalformedPolicy
            | Self::MissingFields
            | Self::MissingCredTag
            | Self::CredMalformed
            | Self::MalformedDate
            | Self::MalformedPresignedDate
            | Self::MalformedCredentialDate
            | Self::MalformedCredentialRegion
            | Self::InvalidRegion
            | Self::InvalidService
            | Self::InvalidRequestVersion
            | Self::MissingSignTag
            | Self::MissingSignHeadersTag
            | Self::MalformedExpires
            | Self::NegativeExpires
            | Self::AuthHeaderEmpty
            | Self::MissingDateHeader
            | Self::InvalidQuerySignatureAlgo
            | Self::InvalidPrefixMarker
            | Self::BadRequest
            | Self::KeyTooLong
            | Self::UnsignedHeaders
            | Self::InvalidQueryParams
            | Self::InvalidDuration
            | Self::InvalidBucketObjectLockConfiguration
            | Self::ObjectLocked
            | Self::InvalidRetentionDate
            | Self::PastObjectLockRetainDate
            | Self::UnknownWORMModeDirective
            | Self::ObjectLockInvalidHeaders
            | Self::InvalidCopyPartRange
            | Self::InvalidCopyPartRangeSource
            | Self::MetadataTooLarge
            | Self::UnsupportedMetadata
            | Self::MaximumExpires => StatusCode::BAD_REQUEST,
            Self::AccessDenied
            | Self::InvalidAccessKeyId
            | Self::RequestTimeTooSkewed
            | Self::SignatureDoesNotMatch
            | Self::InvalidObjectState
            | Self::AllAccessDisabled
            | Self::ExpiredPresignRequest
            | Self::RequestNotReadyYet => StatusCode::FORBIDDEN,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::MissingContentLength
            | Self::MissingRequestBody => StatusCode::LENGTH_REQUIRED,
            Self::NoSuchBucket
            | Self::NoSuchBucketPolicy
            | Self::NoSuchBucketLifecycle
            | Self::NoSuchKey
            | Self::NoSuchUpload
            | Self::NoSuchVersion
            | Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::BucketNotEmpty
            | Self::BucketAlreadyExists
            | Self::BucketAlreadyOwnedByYou => StatusCode::CONFLICT,
            Self::SlowDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("S3 error: {code:?} - {message}")]
    S3Error {
        code: S3ErrorCode,
        message: String,
        resource: Option<String>,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Backend request failed: {0}")]
    Backend(#[from] reqwest::Error),
}

impl ApiError {
    /// Create a new S3 error
    pub fn s3(code: S3ErrorCode, message: impl Into<String>) -> Self {
        Self::S3Error {
            code,
            message: message.into(),
            resource: None,
        }
    }

    /// Create with resource
    pub fn s3_with_resource(
        code: S3ErrorCode,
        message: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self::S3Error {
            code,
            message: message.into(),
            resource: Some(resource.into()),
        }
    }

    /// Get the error code
    pub fn error_code(&self) -> S3ErrorCode {
        match self {
            Self::S3Error { code, .. } => *code,
            Self::Auth(e) => e.code(),
            Self::Core(CoreError::BucketNotFound(_)) => S3ErrorCode::NotFound,
            Self::Internal(_)
            | Self::Core(_)
            | Self::Cloud(_)
            | Self::Crypto(_)
            | Self::Backend(_) => S3ErrorCode::InternalError,
        }
    }

    fn resource(&self) -> Option<&str> {
        match self {
            Self::S3Error { resource, .. } => resource.as_deref(),
            _ => None,
        }
    }

    /// Render the error for a client.
    ///
    /// The body always carries the canonical description of the code; the
    /// error's own message only reaches the logs. HEAD responses get the
    /// headers, including the document's length, without a body.
    pub fn to_response(&self, is_head: bool, request_id: &str) -> Response {
        let code = self.error_code();
        if code == S3ErrorCode::InternalError {
            warn!(error = %self, request_id, "request failed");
        }

        let mut builder = Response::builder()
            .status(code.status_code())
            .header(header::CONTENT_TYPE, "application/xml")
            .header("x-amz-error-code", code.as_str());
        if let Ok(value) = HeaderValue::from_str(request_id) {
            builder = builder.header("x-amz-request-id", value);
        }
        if code == S3ErrorCode::MethodNotAllowed {
            builder = builder.header(header::ALLOW, "GET, HEAD");
        }

        let document = xml::error_document(
            code.as_str(),
            code.description(),
            self.resource(),
            Some(request_id),
        );
        // HEAD answers advertise the length of the body they leave out
        builder = builder.header(header::CONTENT_LENGTH, document.len());
        let body = if is_head {
            Body::empty()
        } else {
            Body::from(document)
        };

        builder.body(body).unwrap_or_else(|_| {
            let mut fallback = Response::new(Body::empty());
            *fallback.status_mut() = code.status_code();
            fallback
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.to_response(false, &request_id)
    }
}
