//! Process-wide dependencies
//!
//! Clients are built once at startup and shared by every invocation. They
//! hold no per-invocation state, so they are used without locking.

use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::info;

use crate::config::{AwsConfig, Config};
use crate::dispatch::EventDispatcher;
use crate::fetch::{ObjectFetcher, S3Fetcher};
use crate::store::{DynamoStore, RecordStore};
use crate::writer::BatchWriter;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub fetcher: Arc<dyn ObjectFetcher>,
    pub store: Arc<dyn RecordStore>,
}

impl AppContext {
    /// Assemble a context from already-built collaborators.
    pub fn new(config: Config, fetcher: Arc<dyn ObjectFetcher>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            config: Arc::new(config),
            fetcher,
            store,
        }
    }

    /// Build the S3 and DynamoDB clients from the ambient AWS configuration.
    pub async fn initialize(config: Config) -> Self {
        let shared = load_sdk_config(&config.aws).await;
        let s3 = s3_client(&shared, &config.aws);
        let dynamodb = dynamodb_client(&shared, &config.aws);

        info!(
            table = %config.table,
            region = ?shared.region(),
            "AWS clients initialized"
        );

        Self::new(
            config,
            Arc::new(S3Fetcher::new(s3)),
            Arc::new(DynamoStore::new(dynamodb)),
        )
    }

    /// Same context with a different record store, e.g. for dry runs.
    pub fn with_store(self, store: Arc<dyn RecordStore>) -> Self {
        Self { store, ..self }
    }

    pub fn dispatcher(&self) -> EventDispatcher {
        let writer = BatchWriter::new(self.store.clone(), self.config.writer_config());
        EventDispatcher::new(self.fetcher.clone(), writer)
            .with_concurrency(self.config.ingest.concurrency)
    }
}

async fn load_sdk_config(aws: &AwsConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &aws.region {
        loader = loader.region(Region::new(region.clone()));
    }
    loader.load().await
}

fn s3_client(shared: &SdkConfig, aws: &AwsConfig) -> aws_sdk_s3::Client {
    let mut builder = aws_sdk_s3::config::Builder::from(shared).force_path_style(aws.s3_path_style);
    if let Some(endpoint) = &aws.s3_endpoint {
        builder = builder.endpoint_url(endpoint);
    }
    aws_sdk_s3::Client::from_conf(builder.build())
}

fn dynamodb_client(shared: &SdkConfig, aws: &AwsConfig) -> aws_sdk_dynamodb::Client {
    let mut builder = aws_sdk_dynamodb::config::Builder::from(shared);
    if let Some(endpoint) = &aws.dynamodb_endpoint {
        builder = builder.endpoint_url(endpoint);
    }
    aws_sdk_dynamodb::Client::from_conf(builder.build())
}
