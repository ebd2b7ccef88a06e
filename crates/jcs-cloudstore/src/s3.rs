//! S3 REST client for secondary clouds

use crate::{CloudError, CloudStore, ObjectStream, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{StreamExt, TryStreamExt};
use http::header::{HeaderValue, CONTENT_LENGTH};
use http::{HeaderMap, Method, StatusCode};
use jcs_crypto::{Credentials, RequestSigner, DEFAULT_REGION, UNSIGNED_PAYLOAD};
use reqwest::{Body, Client, Response};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// How bucket names are placed in request URLs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addressing {
    /// `https://endpoint/bucket/key`
    Path,
    /// `https://bucket.endpoint/key`
    VirtualHosted,
}

impl Addressing {
    /// Aliyun OSS only accepts virtual-hosted requests
    pub fn for_cloud(name: &str) -> Self {
        if name.starts_with("aliyun") {
            Addressing::VirtualHosted
        } else {
            Addressing::Path
        }
    }
}

/// Configuration for one S3-compatible cloud
#[derive(Clone, Debug)]
pub struct S3Config {
    /// Cloud name
    pub name: String,
    /// Endpoint, with or without scheme (e.g. "http://localhost:9000")
    pub endpoint: String,
    pub credentials: Credentials,
    pub region: String,
    pub addressing: Addressing,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

impl S3Config {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            addressing: Addressing::for_cloud(&name),
            name,
            endpoint: endpoint.into(),
            credentials: Credentials::new(access_key, secret_key),
            region: DEFAULT_REGION.to_string(),
            timeout: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_addressing(mut self, addressing: Addressing) -> Self {
        self.addressing = addressing;
        self
    }
}

/// A resolved request target
#[derive(Debug, PartialEq, Eq)]
struct Target {
    url: Url,
    host: String,
    path: String,
}

/// SigV4-signing client for an S3-compatible cloud
#[derive(Clone)]
pub struct S3CloudStore {
    client: Client,
    config: S3Config,
    signer: RequestSigner,
    endpoint: Url,
}

impl S3CloudStore {
    /// Create a client with its own connection pool
    pub fn new(config: S3Config) -> Result<Self> {
        let mut builder = Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| CloudError::Configuration(e.to_string()))?;
        Self::with_client(config, client)
    }

    /// Create a client sharing an existing connection pool
    pub fn with_client(config: S3Config, client: Client) -> Result<Self> {
        let endpoint = parse_endpoint(&config.endpoint)?;
        let signer = RequestSigner::new(config.credentials.clone(), config.region.clone());
        Ok(Self {
            client,
            config,
            signer,
            endpoint,
        })
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    fn target(&self, bucket: &str, key: &str) -> Result<Target> {
        let base_host = self
            .endpoint
            .host_str()
            .ok_or_else(|| CloudError::Configuration(format!("endpoint has no host: {}", self.endpoint)))?;
        let encoded_key = encode_key(key);

        let (host, path) = match self.config.addressing {
            Addressing::Path => (base_host.to_string(), format!("/{}/{}", bucket, encoded_key)),
            Addressing::VirtualHosted => {
                (format!("{}.{}", bucket, base_host), format!("/{}", encoded_key))
            }
        };
        let authority = match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };

        let url = Url::parse(&format!("{}://{}{}", self.endpoint.scheme(), authority, path))
            .map_err(|e| CloudError::Configuration(e.to_string()))?;
        Ok(Target {
            url,
            host: authority,
            path,
        })
    }

    async fn send(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        body: Option<(Body, u64)>,
    ) -> Result<Response> {
        let target = self.target(bucket, key)?;
        let mut headers = HeaderMap::new();
        if let Some((_, length)) = &body {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(*length));
        }
        self.signer.sign(
            &method,
            &target.host,
            &target.path,
            None,
            &mut headers,
            UNSIGNED_PAYLOAD,
            Utc::now(),
        )?;

        let mut request = self.client.request(method, target.url).headers(headers);
        if let Some((body, _)) = body {
            request = request.body(body);
        }
        let response = request.send().await?;
        check_status(response, bucket, key).await
    }
}

#[async_trait]
impl CloudStore for S3CloudStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip(self), fields(cloud = %self.config.name))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectStream> {
        let response = self.send(Method::GET, bucket, key, None).await?;
        Ok(response.bytes_stream().map_err(CloudError::from).boxed())
    }

    #[instrument(skip(self, body), fields(cloud = %self.config.name))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectStream,
        length: u64,
    ) -> Result<()> {
        let body = Body::wrap_stream(body);
        self.send(Method::PUT, bucket, key, Some((body, length)))
            .await?;
        debug!(length, "object stored");
        Ok(())
    }

    #[instrument(skip(self), fields(cloud = %self.config.name))]
    async fn stat_object(&self, bucket: &str, key: &str) -> Result<u64> {
        let response = self.send(Method::HEAD, bucket, key, None).await?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CloudError::Http("missing content-length".to_string()))
    }

    #[instrument(skip(self), fields(cloud = %self.config.name))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        match self.send(Method::DELETE, bucket, key, None).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

async fn check_status(response: Response, bucket: &str, key: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(CloudError::not_found(bucket, key));
    }
    let message = response.text().await.unwrap_or_default();
    Err(CloudError::Status {
        status: status.as_u16(),
        message,
    })
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };
    Url::parse(&with_scheme).map_err(|e| CloudError::Configuration(format!("{}: {}", endpoint, e)))
}

/// URI-encode each path segment of an object key
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
