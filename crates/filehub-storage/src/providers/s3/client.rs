//! S3 client construction for AWS and S3-compatible endpoints.

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::Client;
use tracing::info;

use filehub_core::config::S3StorageConfig;
use filehub_core::error::AppError;
use filehub_core::result::AppResult;

/// Build an S3 client from configuration.
///
/// An empty endpoint targets AWS; otherwise the endpoint is used as-is
/// (MinIO, Ceph, ...). Empty credentials fall back to the default
/// provider chain.
pub async fn build_client(config: &S3StorageConfig) -> AppResult<Client> {
    if config.bucket.is_empty() {
        return Err(AppError::configuration("storage.s3.bucket must be set"));
    }

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()));
    if !config.access_key.is_empty() {
        loader = loader.credentials_provider(Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "filehub",
        ));
    }
    let sdk_config = loader.load().await;

    let mut builder =
        aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.force_path_style);
    if !config.endpoint.is_empty() {
        builder = builder.endpoint_url(&config.endpoint);
    }

    info!(
        endpoint = %config.endpoint,
        region = %config.region,
        bucket = %config.bucket,
        "Initialized S3 client"
    );
    Ok(Client::from_conf(builder.build()))
}
