//! Reverse proxy to the primary backend
//!
//! [`ProxyDirector`] rewrites an inbound request for the backend; it is a
//! pure header transform so it can be tested without a network.
//! [`BackendProxy`] sends the rewritten request over a pooled client,
//! streaming bodies in both directions.

use crate::config::{BackendConfig, GatewayConfig};
use crate::error::{ApiError, S3ErrorCode};
use axum::body::Body;
use axum::response::Response;
use chrono::{DateTime, Utc};
use http::header::{self, HeaderName};
use http::{HeaderMap, Method, Uri};
use jcs_crypto::{Credentials, RequestSigner, UNSIGNED_PAYLOAD};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Headers that only describe one connection
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Query parameters of a presigned request
const PRESIGN_PARAMS: &[&str] = &[
    "X-Amz-Algorithm",
    "X-Amz-Credential",
    "X-Amz-Date",
    "X-Amz-Expires",
    "X-Amz-SignedHeaders",
    "X-Amz-Signature",
    "X-Amz-Content-Sha256",
];

/// Rewrites inbound requests to target the primary backend
#[derive(Clone, Debug)]
pub struct ProxyDirector {
    scheme: String,
    authority: String,
    signer: Option<RequestSigner>,
}

impl ProxyDirector {
    pub fn new(backend: &BackendConfig) -> Result<Self, ApiError> {
        let endpoint = if backend.endpoint.contains("://") {
            backend.endpoint.clone()
        } else {
            format!("http://{}", backend.endpoint)
        };
        let url = Url::parse(&endpoint)
            .map_err(|e| ApiError::Internal(format!("invalid backend endpoint {}: {}", endpoint, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ApiError::Internal(format!("backend endpoint {} has no host", endpoint)))?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let signer = backend.sign_requests.then(|| {
            RequestSigner::new(
                Credentials::new(backend.access_key.clone(), backend.secret_key.clone()),
                backend.region.clone(),
            )
        });

        Ok(Self {
            scheme: url.scheme().to_string(),
            authority,
            signer,
        })
    }

    /// `host[:port]` of the backend
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Target URL and outbound headers for an inbound request.
    ///
    /// Hop-by-hop headers are dropped. With signing enabled the `Host`
    /// header is replaced, a literal `Content-Length: 0` is removed (some
    /// backends ignore it and then reject the signature), presign query
    /// parameters are stripped and the request is signed again with the
    /// backend credentials in unsigned-payload mode.
    pub fn direct(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<(String, HeaderMap), ApiError> {
        let mut outbound = headers.clone();
        for name in HOP_BY_HOP {
            outbound.remove(*name);
        }

        let path = uri.path();
        let mut query = uri.query().map(str::to_string);

        if let Some(signer) = &self.signer {
            if outbound
                .get(header::CONTENT_LENGTH)
                .is_some_and(|v| v.as_bytes() == b"0")
            {
                outbound.remove(header::CONTENT_LENGTH);
            }
            query = query.map(|q| strip_presign_params(&q)).filter(|q| !q.is_empty());
            signer.sign(
                method,
                &self.authority,
                path,
                query.as_deref(),
                &mut outbound,
                UNSIGNED_PAYLOAD,
                now,
            )?;
        }

        let mut target = format!("{}://{}{}", self.scheme, self.authority, path);
        if let Some(query) = query {
            target.push('?');
            target.push_str(&query);
        }
        Ok((target, outbound))
    }
}

/// Drop presign parameters from a raw query, keeping the rest verbatim
fn strip_presign_params(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| {
            let name = pair.split('=').next().unwrap_or("");
            !name.is_empty() && !PRESIGN_PARAMS.contains(&name)
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Forwards requests to the primary backend over a pooled client
#[derive(Clone)]
pub struct BackendProxy {
    client: reqwest::Client,
    director: ProxyDirector,
}

impl BackendProxy {
    pub fn new(config: &GatewayConfig) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .tcp_keepalive(Duration::from_secs(config.tcp_keepalive_secs))
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = config.proxy_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            director: ProxyDirector::new(&config.backend)?,
        })
    }

    pub fn director(&self) -> &ProxyDirector {
        &self.director
    }

    /// Send a request to the backend and stream its answer back.
    ///
    /// The backend call lives inside the returned future; dropping it
    /// aborts the call.
    #[instrument(skip_all, fields(method = %method, uri = %uri))]
    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<Response, ApiError> {
        let has_body = headers.contains_key(header::TRANSFER_ENCODING)
            || headers
                .get(header::CONTENT_LENGTH)
                .is_some_and(|v| v.as_bytes() != b"0");
        let (target, outbound) = self.director.direct(&method, uri, headers, Utc::now())?;
        debug!(target = %target, "forwarding to backend");

        let mut request = self.client.request(method, target).headers(outbound);
        if has_body {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let upstream = request.send().await.map_err(|e| {
            ApiError::s3(S3ErrorCode::InternalError, format!("backend unreachable: {}", e))
        })?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(response_headers) = response.headers_mut() {
            for (name, value) in upstream.headers() {
                if !is_hop_by_hop(name) {
                    response_headers.append(name.clone(), value.clone());
                }
            }
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| ApiError::Internal(e.to_string()))
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}
