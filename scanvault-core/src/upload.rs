//! Megadoc uploads to S3-compatible object storage.

use std::path::Path;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::S3Config;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{Megadoc, Status};

/// Object-store client for megadoc files. One instance per process; the
/// underlying client holds its own connection pool and is safe to share.
#[derive(Clone)]
pub struct Uploader {
    client: Client,
    bucket: String,
    retries: u32,
}

impl Uploader {
    /// Build a client from the `[s3]` section plus `S3_KEY`/`S3_SECRET`.
    pub fn from_config(s3: &S3Config, retries: u32) -> Result<Self> {
        let credentials = Credentials::new(
            s3.access_key()?,
            s3.secret_key()?,
            None,
            None,
            "scanvault",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(s3.region.clone()))
            .endpoint_url(&s3.endpoint)
            .credentials_provider(credentials)
            .build();
        Ok(Self {
            client: Client::from_conf(config),
            bucket: s3.space.clone(),
            retries,
        })
    }

    /// Upload a built megadoc and mark it `SUCCESS`.
    ///
    /// The file is streamed with ACL `public-read`, a guessed content type,
    /// and `Content-Disposition: attachment`. Transient failures retry with
    /// `attempt² + jitter` backoff; exhaustion leaves the megadoc in
    /// `SENDING` so the upload can be re-invoked later.
    pub async fn upload_megadoc(
        &self,
        db: &Db,
        megadoc: &mut Megadoc,
        data_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = data_path.join(&megadoc.path);
        if !path.is_file() {
            return Err(Error::not_found(format!("file not found: {}", path.display())));
        }

        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();
        info!(
            "uploading megadoc <{}> at {} to {}",
            megadoc.meta.guid,
            path.display(),
            megadoc.url
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.put_object(&path, &megadoc.path, &content_type).await {
                Ok(()) => break,
                Err(e) if attempt <= self.retries => {
                    let delay = (attempt * attempt) as f64 + fastrand::f64();
                    warn!(
                        "error uploading megadoc <{}>, retrying in {delay:.2} seconds \
                         (attempt {attempt} of {}): {e}",
                        megadoc.meta.guid, self.retries
                    );
                    tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                }
                Err(e) => {
                    return Err(Error::UploadFailed {
                        guid: megadoc.meta.guid.clone(),
                        attempts: attempt,
                        cause: e.to_string(),
                    });
                }
            }
        }

        db.write(|conn| megadoc.set_status(conn, Status::Success))?;
        info!("done uploading megadoc <{}> to {}", megadoc.meta.guid, megadoc.url);
        Ok(())
    }

    async fn put_object(&self, path: &Path, key: &str, content_type: &str) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| Error::Upload(e.to_string()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .content_type(content_type)
            .content_disposition("attachment")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Upload(e.to_string()))?;
        Ok(())
    }
}
