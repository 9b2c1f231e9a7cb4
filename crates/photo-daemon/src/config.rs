use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::{bail, Context, Result};
use photo_core::S3Config;
use url::Url;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DB_URL: &str = "sqlite://photos.db";
const DEFAULT_LOCAL_BLOB_DIR: &str = "./blobs";
const DEFAULT_MAX_UPLOAD_MIB: usize = 50;

/// Path the local blob directory is served under.
pub const LOCAL_BLOB_ROUTE: &str = "/blobs";

/// Where uploaded bytes go.
#[derive(Debug, Clone, PartialEq)]
pub enum BlobBackendConfig {
    S3(S3Config),
    Local { root: PathBuf },
}

/// Startup inputs, read once before the listener binds.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub db_url: String,
    pub blob: BlobBackendConfig,
    pub public_base_url: String,
    pub cors_allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let listen_addr: SocketAddr = var("PHOTO_API_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("invalid PHOTO_API_ADDR")?;

        let db_url = var("PHOTO_DB_DSN")
            .or_else(|| var("DATABASE_URL"))
            .unwrap_or_else(|| DEFAULT_DB_URL.to_string());

        let blob = match var("PHOTO_BLOB_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "s3" => BlobBackendConfig::S3(S3Config {
                bucket: var("PHOTO_S3_BUCKET")
                    .context("PHOTO_S3_BUCKET must be configured for the s3 blob backend")?,
                endpoint: var("PHOTO_S3_ENDPOINT"),
                region: var("PHOTO_S3_REGION"),
                public_url: var("PHOTO_S3_PUBLIC_URL"),
            }),
            "local" => BlobBackendConfig::Local {
                root: PathBuf::from(
                    var("PHOTO_LOCAL_BLOB_DIR").unwrap_or_else(|| DEFAULT_LOCAL_BLOB_DIR.into()),
                ),
            },
            other => bail!("unknown PHOTO_BLOB_BACKEND '{other}' (expected 's3' or 'local')"),
        };

        let public_base_url =
            var("PHOTO_PUBLIC_BASE_URL").unwrap_or_else(|| format!("http://{listen_addr}"));
        Url::parse(&public_base_url).context("invalid PHOTO_PUBLIC_BASE_URL")?;

        let cors_allowed_origins = var("PHOTO_CORS_ALLOWED_ORIGINS")
            .map(|raw| parse_string_list(&raw))
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec!["*".to_string()]);

        let max_upload_mib = match var("PHOTO_MAX_UPLOAD_MIB") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid PHOTO_MAX_UPLOAD_MIB '{raw}'"))?,
            None => DEFAULT_MAX_UPLOAD_MIB,
        };
        let max_upload_bytes = mi_bytes(max_upload_mib).with_context(|| {
            format!("PHOTO_MAX_UPLOAD_MIB {max_upload_mib} does not fit in memory addressing")
        })?;

        Ok(Self {
            listen_addr,
            db_url,
            blob,
            public_base_url,
            cors_allowed_origins,
            max_upload_bytes,
        })
    }

    /// Base URL for objects written by the local backend.
    pub fn local_blob_base(&self) -> Result<Url> {
        let raw = format!(
            "{}{}",
            self.public_base_url.trim_end_matches('/'),
            LOCAL_BLOB_ROUTE
        );
        Url::parse(&raw).with_context(|| format!("invalid local blob base URL '{raw}'"))
    }
}

fn mi_bytes(value: usize) -> Option<usize> {
    value.checked_mul(1024 * 1024)
}

fn parse_string_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|item| {
            let trimmed = item.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}
