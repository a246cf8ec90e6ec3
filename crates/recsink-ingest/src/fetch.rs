//! Blob storage reads

use async_trait::async_trait;
use aws_sdk_s3::{
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::get_object::GetObjectError,
    Client,
};
use recsink_common::types::ObjectRef;
use tracing::{debug, instrument};

use crate::error::FetchError;

/// Resolves an object reference to its full contents.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch(&self, object: &ObjectRef) -> Result<Vec<u8>, FetchError>;
}

/// [`ObjectFetcher`] backed by S3 `GetObject`
#[derive(Clone)]
pub struct S3Fetcher {
    client: Client,
}

impl S3Fetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectFetcher for S3Fetcher {
    #[instrument(skip(self), fields(bucket = %object.container, key = %object.key))]
    async fn fetch(&self, object: &ObjectRef) -> Result<Vec<u8>, FetchError> {
        debug!("Downloading s3://{}", object);

        let response = self
            .client
            .get_object()
            .bucket(&object.container)
            .key(&object.key)
            .send()
            .await
            .map_err(|err| classify_get_error(object, err))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|err| FetchError::Interrupted {
                container: object.container.clone(),
                key: object.key.clone(),
                reason: err.to_string(),
            })?
            .into_bytes()
            .to_vec();

        debug!(bytes = data.len(), "Downloaded s3://{}", object);

        Ok(data)
    }
}

fn classify_get_error<R: std::fmt::Debug>(
    object: &ObjectRef,
    err: SdkError<GetObjectError, R>,
) -> FetchError {
    let container = object.container.clone();
    let key = object.key.clone();

    match err.as_service_error() {
        Some(service) if service.is_no_such_key() || service.code() == Some("NotFound") => {
            FetchError::NotFound { container, key }
        },
        Some(service) if service.code() == Some("AccessDenied") => {
            FetchError::AccessDenied { container, key }
        },
        Some(service) => FetchError::Service {
            container,
            key,
            reason: DisplayErrorContext(service).to_string(),
        },
        None => FetchError::Transport(DisplayErrorContext(&err).to_string()),
    }
}
