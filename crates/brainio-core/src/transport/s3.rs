use std::io;
use std::path::Path;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, PutPayload, UploadPart};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};
use url::Url;

use super::Transport;
use crate::env::S3Settings;
use crate::error::{BrainioError, Result};

pub const LOCATION_TYPE: &str = "S3";
const UPLOAD_CHUNK: usize = 8 * 1024 * 1024;
const MAX_PARTS_IN_FLIGHT: usize = 4;

/// Bucket and key extracted from an S3 object URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    /// Key as it appears in the URL (still percent-encoded).
    pub key: String,
    /// Region named by the host, if any.
    pub region: Option<String>,
}

impl S3Location {
    /// Accepts `s3://bucket/key`, virtual-hosted
    /// `https://bucket.s3.region.amazonaws.com/key` and path-style
    /// `https://s3.region.amazonaws.com/bucket/key` (or `s3-region`).
    pub fn parse(location: &str) -> Result<Self> {
        let url = Url::parse(location).map_err(|err| malformed(location, err.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| malformed(location, "URL has no hostname"))?;
        let path = url.path().trim_start_matches('/');

        let (bucket, key, region) = if url.scheme() == "s3" {
            (host.to_string(), path.to_string(), None)
        } else if let Some((bucket, rest)) = split_virtual_host(host) {
            (bucket.to_string(), path.to_string(), region_from(rest))
        } else if let Some(rest) = host
            .strip_prefix("s3.")
            .or_else(|| host.strip_prefix("s3-"))
        {
            let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
            (bucket.to_string(), key.to_string(), region_from(rest))
        } else {
            return Err(malformed(location, "host is not an S3 endpoint"));
        };

        if bucket.is_empty() {
            return Err(malformed(location, "no bucket name"));
        }
        if key.is_empty() || key.ends_with('/') {
            return Err(malformed(location, "no object key"));
        }
        Ok(Self {
            bucket,
            key,
            region,
        })
    }

    pub fn object_path(&self) -> Result<ObjectPath> {
        ObjectPath::from_url_path(&self.key).map_err(|err| {
            BrainioError::transport(LOCATION_TYPE, format!("{}/{}", self.bucket, self.key), err)
        })
    }
}

fn split_virtual_host(host: &str) -> Option<(&str, &str)> {
    host.split_once(".s3.")
        .or_else(|| host.split_once(".s3-"))
}

/// `us-east-1.amazonaws.com` → `us-east-1`; bare `amazonaws.com` names no region.
fn region_from(rest: &str) -> Option<String> {
    let label = rest.split('.').next()?;
    if label.is_empty() || label == "amazonaws" {
        None
    } else {
        Some(label.to_string())
    }
}

fn malformed(location: &str, reason: impl Into<String>) -> BrainioError {
    let reason: String = reason.into();
    BrainioError::transport(LOCATION_TYPE, location, format!("malformed S3 URL: {reason}"))
}

enum FetchError {
    Store(object_store::Error),
    Local(io::Error),
}

impl From<object_store::Error> for FetchError {
    fn from(err: object_store::Error) -> Self {
        Self::Store(err)
    }
}

impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        Self::Local(err)
    }
}

/// Errors worth repeating without a signature: anything the store reported,
/// except ones that no credential change can fix.
fn is_retryable(err: &object_store::Error) -> bool {
    !matches!(
        err,
        object_store::Error::InvalidPath { .. }
            | object_store::Error::NotSupported { .. }
            | object_store::Error::NotImplemented { .. }
            | object_store::Error::UnknownConfigurationKey { .. }
    )
}

/// Amazon S3 (or a compatible endpoint) through `object_store`.
#[derive(Debug, Clone)]
pub struct ObjectStorageTransport {
    settings: S3Settings,
    builder: AmazonS3Builder,
}

impl ObjectStorageTransport {
    /// Credentials come from the usual `AWS_*` environment variables.
    pub fn new(settings: S3Settings) -> Self {
        Self::with_builder(settings, AmazonS3Builder::from_env())
    }

    /// Uses `builder` as the base for every request instead of the environment.
    pub fn with_builder(settings: S3Settings, builder: AmazonS3Builder) -> Self {
        Self { settings, builder }
    }

    fn store(
        &self,
        location: &S3Location,
        anonymous: bool,
    ) -> std::result::Result<AmazonS3, object_store::Error> {
        let region = location
            .region
            .as_deref()
            .unwrap_or(&self.settings.default_region);
        let mut builder = self
            .builder
            .clone()
            .with_bucket_name(&location.bucket)
            .with_region(region);
        if let Some(endpoint) = &self.settings.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        if anonymous {
            builder = builder.with_skip_signature(true);
        }
        builder.build()
    }

    fn runtime(location: &str) -> Result<Runtime> {
        Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| BrainioError::transport(LOCATION_TYPE, location, err))
    }

    fn fetch(
        &self,
        runtime: &Runtime,
        location: &S3Location,
        path: &ObjectPath,
        local: &Path,
        anonymous: bool,
    ) -> std::result::Result<u64, FetchError> {
        let store = self.store(location, anonymous)?;
        runtime.block_on(async {
            let mut stream = store.get(path).await?.into_stream();
            let mut file = tokio::fs::File::create(local).await?;
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<u64, FetchError>(written)
        })
    }
}

/// Streams `file` as parts of at most [`UPLOAD_CHUNK`] bytes, then completes the upload.
async fn send_parts(
    upload: &mut dyn MultipartUpload,
    file: &mut tokio::fs::File,
    local: &Path,
    location: &str,
) -> Result<()> {
    let store_err =
        |err: object_store::Error| BrainioError::transport(LOCATION_TYPE, location, err);
    let mut in_flight: FuturesUnordered<UploadPart> = FuturesUnordered::new();
    let mut buf = vec![0u8; UPLOAD_CHUNK];
    loop {
        let read = fill(file, &mut buf)
            .await
            .map_err(|err| BrainioError::io(local, err))?;
        if read == 0 {
            break;
        }
        while in_flight.len() >= MAX_PARTS_IN_FLIGHT {
            if let Some(done) = in_flight.next().await {
                done.map_err(store_err)?;
            }
        }
        in_flight.push(upload.put_part(PutPayload::from(buf[..read].to_vec())));
        if read < buf.len() {
            break;
        }
    }
    while let Some(done) = in_flight.next().await {
        done.map_err(store_err)?;
    }
    upload.complete().await.map_err(store_err)?;
    Ok(())
}

/// Reads until `buf` is full or the file ends; parts other than the last
/// must be full-sized.
async fn fill(file: &mut tokio::fs::File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            read => filled += read,
        }
    }
    Ok(filled)
}

impl Transport for ObjectStorageTransport {
    fn location_type(&self) -> &str {
        LOCATION_TYPE
    }

    fn upload(&self, local: &Path, location: &str) -> Result<()> {
        let parsed = S3Location::parse(location)?;
        let path = parsed.object_path()?;
        let store = self
            .store(&parsed, false)
            .map_err(|err| BrainioError::transport(LOCATION_TYPE, location, err))?;
        let runtime = Self::runtime(location)?;

        runtime.block_on(async {
            let mut file = tokio::fs::File::open(local)
                .await
                .map_err(|err| BrainioError::io(local, err))?;
            let mut upload = store
                .put_multipart(&path)
                .await
                .map_err(|err| BrainioError::transport(LOCATION_TYPE, location, err))?;
            if let Err(err) = send_parts(upload.as_mut(), &mut file, local, location).await {
                if let Err(abort) = upload.abort().await {
                    warn!(location, error = %abort, "failed to abort multipart upload");
                }
                return Err(err);
            }
            debug!(location, local = %local.display(), "uploaded object");
            Ok::<(), BrainioError>(())
        })
    }

    fn download(&self, location: &str, local: &Path) -> Result<()> {
        let parsed = S3Location::parse(location)?;
        let path = parsed.object_path()?;
        let runtime = Self::runtime(location)?;

        let first = match self.fetch(&runtime, &parsed, &path, local, false) {
            Ok(bytes) => {
                debug!(location, bytes, "downloaded object");
                return Ok(());
            }
            Err(FetchError::Local(err)) => return Err(BrainioError::io(local, err)),
            Err(FetchError::Store(err)) => err,
        };
        if !is_retryable(&first) {
            return Err(BrainioError::transport(LOCATION_TYPE, location, first));
        }

        warn!(location, error = %first, "authenticated S3 download failed, retrying unsigned");
        match self.fetch(&runtime, &parsed, &path, local, true) {
            Ok(bytes) => {
                debug!(location, bytes, "downloaded object without signature");
                Ok(())
            }
            Err(FetchError::Local(err)) => Err(BrainioError::io(local, err)),
            Err(FetchError::Store(err)) => {
                Err(BrainioError::transport(LOCATION_TYPE, location, err))
            }
        }
    }
}
