//! Stream adapter that hashes content while it is being stored.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use sha2::{Digest, Sha256};

use filehub_core::traits::storage::ByteStream;

/// SHA-256 hex digest and byte count of a fully consumed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Lowercase hex SHA-256.
    pub sha256: String,
    /// Bytes observed.
    pub bytes: u64,
}

/// Handle to the digest produced once the wrapped stream reaches its end.
#[derive(Debug, Clone, Default)]
pub struct DigestHandle(Arc<Mutex<Option<ContentDigest>>>);

impl DigestHandle {
    /// The digest, or `None` if the stream was not read to the end.
    pub fn finish(&self) -> Option<ContentDigest> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }

    fn complete(&self, digest: ContentDigest) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(digest);
        }
    }
}

pin_project! {
    /// Pass-through stream that feeds every chunk into SHA-256.
    pub struct HashingStream {
        #[pin]
        inner: ByteStream,
        hasher: Option<Sha256>,
        bytes: u64,
        handle: DigestHandle,
    }
}

impl HashingStream {
    /// Wrap `inner`, returning the stream and the handle to read the digest from.
    pub fn new(inner: ByteStream) -> (Self, DigestHandle) {
        let handle = DigestHandle::default();
        let stream = Self {
            inner,
            hasher: Some(Sha256::new()),
            bytes: 0,
            handle: handle.clone(),
        };
        (stream, handle)
    }

    /// Box the stream back into a [`ByteStream`].
    pub fn boxed(self) -> ByteStream {
        Box::pin(self)
    }
}

impl Stream for HashingStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(chunk)) => {
                if let Some(hasher) = this.hasher.as_mut() {
                    hasher.update(&chunk);
                }
                *this.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                this.hasher.take();
                Poll::Ready(Some(Err(e)))
            }
            None => {
                if let Some(hasher) = this.hasher.take() {
                    this.handle.complete(ContentDigest {
                        sha256: format!("{:x}", hasher.finalize()),
                        bytes: *this.bytes,
                    });
                }
                Poll::Ready(None)
            }
        }
    }
}

/// Hex SHA-256 of an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
