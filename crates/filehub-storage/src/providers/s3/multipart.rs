//! Multipart upload driver.
//!
//! Every failure path after `CreateMultipartUpload` issues an explicit
//! `AbortMultipartUpload` so no parts are left billing in the bucket.

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, warn};

use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_core::traits::storage::ByteStream;

/// Upload `stream` to `bucket/key` in parts of `part_size` bytes.
pub async fn upload(
    client: &Client,
    bucket: &str,
    key: &str,
    stream: ByteStream,
    size: u64,
    part_size: u64,
) -> AppResult<u64> {
    let created = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| {
            AppError::storage(format!(
                "Failed to start multipart upload for {key}: {}",
                DisplayErrorContext(&e)
            ))
        })?;
    let upload_id = created
        .upload_id()
        .ok_or_else(|| AppError::storage(format!("No upload id returned for {key}")))?
        .to_string();

    match upload_parts(client, bucket, key, &upload_id, stream, size, part_size).await {
        Ok(written) => Ok(written),
        Err(e) => {
            abort(client, bucket, key, &upload_id).await;
            Err(e)
        }
    }
}

async fn upload_parts(
    client: &Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
    mut stream: ByteStream,
    size: u64,
    part_size: u64,
) -> AppResult<u64> {
    let part_size = part_size.max(5 * 1024 * 1024) as usize;
    let mut parts = Vec::new();
    let mut buffer = BytesMut::with_capacity(part_size);
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| AppError::storage(format!("Stream read error for {key}: {e}")))?;
        total += chunk.len() as u64;
        buffer.extend_from_slice(&chunk);
        while buffer.len() >= part_size {
            let part = buffer.split_to(part_size);
            let number = parts.len() as i32 + 1;
            parts.push(upload_part(client, bucket, key, upload_id, number, part.to_vec()).await?);
        }
    }
    if !buffer.is_empty() {
        let number = parts.len() as i32 + 1;
        parts.push(upload_part(client, bucket, key, upload_id, number, buffer.to_vec()).await?);
    }

    if total != size {
        return Err(AppError::storage(format!(
            "Size mismatch for {key}: expected {size} bytes, received {total}"
        )));
    }

    client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build(),
        )
        .send()
        .await
        .map_err(|e| {
            AppError::storage(format!(
                "Failed to complete multipart upload for {key}: {}",
                DisplayErrorContext(&e)
            ))
        })?;

    debug!(key, bytes = total, "Completed multipart upload");
    Ok(total)
}

async fn upload_part(
    client: &Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
    number: i32,
    data: Vec<u8>,
) -> AppResult<CompletedPart> {
    let output = client
        .upload_part()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .part_number(number)
        .body(S3Body::from(data))
        .send()
        .await
        .map_err(|e| {
            AppError::storage(format!(
                "Failed to upload part {number} of {key}: {}",
                DisplayErrorContext(&e)
            ))
        })?;

    Ok(CompletedPart::builder()
        .set_e_tag(output.e_tag().map(str::to_string))
        .part_number(number)
        .build())
}

/// Abort a multipart upload, logging (not returning) any failure.
pub async fn abort(client: &Client, bucket: &str, key: &str, upload_id: &str) {
    let result = client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await;
    if let Err(e) = result {
        warn!(
            key,
            upload_id,
            error = %DisplayErrorContext(&e),
            "Failed to abort multipart upload"
        );
    }
}

/// Abort every multipart upload initiated before `older_than`.
pub async fn abort_stale(client: &Client, bucket: &str, older_than: DateTime<Utc>) -> AppResult<u64> {
    let mut aborted = 0u64;
    let mut key_marker: Option<String> = None;
    let mut upload_id_marker: Option<String> = None;

    loop {
        let page = client
            .list_multipart_uploads()
            .bucket(bucket)
            .set_key_marker(key_marker.clone())
            .set_upload_id_marker(upload_id_marker.clone())
            .send()
            .await
            .map_err(|e| {
                AppError::storage(format!(
                    "Failed to list multipart uploads: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        for upload in page.uploads() {
            let initiated = upload
                .initiated()
                .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));
            let (Some(key), Some(id)) = (upload.key(), upload.upload_id()) else {
                continue;
            };
            if initiated.is_some_and(|t| t < older_than) {
                abort(client, bucket, key, id).await;
                aborted += 1;
            }
        }

        if !page.is_truncated().unwrap_or(false) {
            break;
        }
        key_marker = page.next_key_marker().map(str::to_string);
        upload_id_marker = page.next_upload_id_marker().map(str::to_string);
        if key_marker.is_none() && upload_id_marker.is_none() {
            break;
        }
    }

    Ok(aborted)
}
