// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Lazy stream handle -> explicit resource object (§9 design note, §3 `StreamDescriptor`).

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;

/// A byte range request, inclusive on both ends, as resolved by the range parser (§4.2 step 6/7).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// How a [`StreamDescriptor`] that lacks a native `get_range` should be treated when a Range
/// request arrives (§3 invariant, §4.2 step 7 fallback path).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RangeFallbackPolicy {
    /// Drop the Range header entirely and return the whole body as 200.
    Full,
    /// Wrap the full-body stream in a byte-slice filter (the default).
    Software,
}

impl Default for RangeFallbackPolicy {
    fn default() -> Self {
        RangeFallbackPolicy::Software
    }
}

pub type BoxByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Whether the upstream truthfully honored a Range request, as reported by the driver after
/// the fact (§3 `StreamHandle`). Used by the video-seek guard and the multi-range probe to
/// detect backends that silently ignore `getRange` and serve the full body instead.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RangeSupport {
    pub supports_range: Option<bool>,
    pub upstream_status: Option<u16>,
    pub upstream_content_range: Option<(u64, u64, Option<u64>)>,
}

impl RangeSupport {
    /// True if the upstream response is consistent with having honored the requested range:
    /// either an explicit 206 with a Content-Range, or a 200 whose advertised range happens to
    /// match what was asked for (some backends report this way).
    pub fn honored(&self, requested: ByteRange) -> bool {
        match (self.upstream_status, self.upstream_content_range) {
            (Some(206), Some((start, end, _))) => start == requested.start && end == requested.end,
            (Some(200), Some((start, end, _))) => start == requested.start && end == requested.end,
            _ => self.supports_range == Some(true),
        }
    }
}

/// Disposition of a stream as observed by its consumer; reported via `Drop` so premature
/// cancellation (the client disconnecting mid-body) is detectable even when no explicit
/// `close()` call is reachable. Mirrors the cancellation-tracking idiom used for metered reads.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Disposition {
    Incomplete,
    Complete,
    Error,
}

/// A handle to an open byte stream plus the means to release upstream resources. `close` is
/// mandatory and must be invoked (directly or via `Drop`) on every exit path of the range
/// service (§9).
pub struct StreamHandle {
    pub stream: BoxByteStream,
    pub range_support: RangeSupport,
    cancel: CancellationToken,
    disposition: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn new(stream: BoxByteStream, cancel: CancellationToken) -> Self {
        StreamHandle {
            stream,
            range_support: RangeSupport::default(),
            cancel,
            disposition: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_range_support(mut self, range_support: RangeSupport) -> Self {
        self.range_support = range_support;
        self
    }

    /// Signal upstream abort. Idempotent.
    pub fn close(&self) {
        self.disposition.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        // A handle dropped without an explicit `close()` call (client disconnected before the
        // driver's stream was drained) still must cancel the upstream fetch.
        if !self.disposition.load(Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }
}

/// Uniform lazy handle returned by drivers (§3). Only `size` may be unknown (streaming
/// upstreams that don't report Content-Length); when unknown, Range cannot be served in
/// RFC-compliant form (§3 invariant) and the range service must fall through to 200.
#[async_trait]
pub trait StreamDescriptor: Send + Sync {
    fn size(&self) -> Option<u64>;
    fn content_type(&self) -> Option<&str>;
    fn etag(&self) -> Option<&str>;
    fn last_modified(&self) -> Option<i64>;
    fn range_fallback_policy(&self) -> RangeFallbackPolicy {
        RangeFallbackPolicy::Software
    }

    async fn get_stream(&self, cancel: CancellationToken) -> Result<StreamHandle, StorageError>;

    /// `None` if the driver has no native range support for this object; the range service
    /// then falls back per `range_fallback_policy()`.
    async fn get_range(
        &self,
        _range: ByteRange,
        _cancel: CancellationToken,
    ) -> Result<Option<StreamHandle>, StorageError> {
        Ok(None)
    }

    fn supports_native_range(&self) -> bool {
        false
    }

    /// A bounded diagnostic probe for a size this descriptor could not determine up front
    /// (§4.2 step 5). Default: unsupported.
    async fn probe_size(&self, _cancel: CancellationToken) -> Option<u64> {
        None
    }
}

pub type BoxStreamDescriptor = Box<dyn StreamDescriptor>;
