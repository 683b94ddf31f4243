//! Listing and batched deletion of key prefixes.

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_core::traits::storage::StorageObjectMeta;

/// List every object under `prefix`, following continuation tokens.
pub async fn list_all(client: &Client, bucket: &str, prefix: &str) -> AppResult<Vec<StorageObjectMeta>> {
    let mut objects = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(token.take())
            .send()
            .await
            .map_err(|e| {
                AppError::storage(format!(
                    "Failed to list prefix {prefix}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        for object in page.contents() {
            let Some(key) = object.key() else {
                continue;
            };
            objects.push(StorageObjectMeta {
                key: key.to_string(),
                size_bytes: object.size().unwrap_or(0).max(0) as u64,
                last_modified: object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                etag: object.e_tag().map(str::to_string),
                is_directory: key.ends_with('/'),
            });
        }

        match page.next_continuation_token() {
            Some(next) if page.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
            _ => break,
        }
    }

    Ok(objects)
}

/// Delete everything under `prefix` in batches of at most `batch_size`
/// keys, listing again until the prefix is empty or `max_rounds` is spent.
pub async fn delete_all(
    client: &Client,
    bucket: &str,
    prefix: &str,
    batch_size: usize,
    max_rounds: u32,
) -> AppResult<u64> {
    let batch_size = batch_size.clamp(1, 1000);
    let mut deleted = 0u64;

    for round in 0..max_rounds.max(1) {
        let objects = list_all(client, bucket, prefix).await?;
        if objects.is_empty() {
            return Ok(deleted);
        }
        debug!(prefix, round, count = objects.len(), "Deleting prefix batch");

        for chunk in objects.chunks(batch_size) {
            let identifiers = chunk
                .iter()
                .map(|o| ObjectIdentifier::builder().key(&o.key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::storage(format!("Invalid object key: {e}")))?;
            let count = identifiers.len() as u64;
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .map_err(|e| AppError::storage(format!("Invalid delete request: {e}")))?;

            let output = client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| {
                    AppError::storage(format!(
                        "Failed to delete objects under {prefix}: {}",
                        DisplayErrorContext(&e)
                    ))
                })?;

            let failed = output.errors().len() as u64;
            if failed > 0 {
                warn!(prefix, failed, "Some objects could not be deleted");
            }
            deleted += count.saturating_sub(failed);
        }
    }

    let remaining = list_all(client, bucket, prefix).await?;
    if remaining.is_empty() {
        Ok(deleted)
    } else {
        Err(AppError::storage(format!(
            "Prefix {prefix} still holds {} objects after {max_rounds} rounds",
            remaining.len()
        )))
    }
}
