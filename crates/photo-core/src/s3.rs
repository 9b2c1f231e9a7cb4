use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_sdk_s3::{
    config::{Builder, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use tracing::{error, info};
use url::Url;

use crate::blob::{object_url, BlobStore, StorageError};

const FALLBACK_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    /// Custom endpoint (MinIO and friends). Enables path-style addressing.
    pub endpoint: Option<String>,
    /// Used when the AWS environment chain has no region.
    pub region: Option<String>,
    /// Base URL objects are addressed under. Must already include the bucket
    /// when the provider needs it in the path.
    pub public_url: Option<String>,
}

/// Blob store backed by `PutObject`, which always overwrites.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    public_base: Url,
}

impl S3BlobStore {
    pub async fn connect(config: S3Config) -> Result<Self, StorageError> {
        info!(
            bucket = %config.bucket,
            endpoint = config.endpoint.as_deref().unwrap_or("aws"),
            "connecting to S3 blob storage"
        );

        let fallback = Region::new(
            config
                .region
                .clone()
                .unwrap_or_else(|| FALLBACK_REGION.to_string()),
        );
        let region_provider = RegionProviderChain::default_provider().or_else(fallback);
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut builder = Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        let region = shared
            .region()
            .map(|region| region.as_ref().to_string())
            .unwrap_or_else(|| FALLBACK_REGION.to_string());
        let public_base = resolve_public_base(&config, &region)?;

        Ok(Self::with_client(client, config.bucket, public_base))
    }

    pub fn with_client(client: Client, bucket: impl Into<String>, public_base: Url) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_object(&self, name: &str, content: Bytes) -> Result<String, StorageError> {
        info!(bucket = %self.bucket, object = name, bytes = content.len(), "uploading file to S3 blob storage");

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(ByteStream::from(content))
            .send()
            .await;

        if let Err(err) = result {
            let message = DisplayErrorContext(&err).to_string();
            error!(bucket = %self.bucket, object = name, error = %message, "S3 blob storage error");
            return Err(StorageError::new(message));
        }

        let url = object_url(&self.public_base, &[name])?;
        info!(bucket = %self.bucket, object = name, url = %url, "file uploaded to S3 blob storage");
        Ok(url)
    }
}

/// Picks the base URL objects are addressed under: an explicit public URL,
/// else `<endpoint>/<bucket>` (path style), else the AWS virtual-hosted form.
pub fn resolve_public_base(config: &S3Config, region: &str) -> Result<Url, StorageError> {
    let parse = |raw: &str| {
        Url::parse(raw).map_err(|err| StorageError::new(format!("invalid URL '{raw}': {err}")))
    };

    if let Some(public) = &config.public_url {
        return parse(public);
    }
    if let Some(endpoint) = &config.endpoint {
        let endpoint = parse(endpoint)?;
        return parse(&object_url(&endpoint, &[&config.bucket])?);
    }
    parse(&format!(
        "https://{}.s3.{}.amazonaws.com/",
        config.bucket, region
    ))
}
