// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! HTTP Range Streaming Service (§4.2, component D): translates a driver's `StreamDescriptor`
//! into an RFC 7232/7233-conformant response decision. This module computes the *decision*
//! (status, headers, which bytes/parts to stream) -- `storagehub` is responsible for turning a
//! `RangeResponse` into an actual `axum::response::Response`.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::stream::{BoxByteStream, ByteRange, RangeFallbackPolicy, StreamDescriptor, StreamHandle};

const VIDEO_SEEK_GUARD_THRESHOLD: u64 = 100 * 1024 * 1024;
const SOFTWARE_SLICE_LOG_HINT: &str = "software byte-slicing fallback";

/// Logical purpose of a stream response, selecting cache policy (§4.2, Glossary).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Channel {
    FsWeb,
    Webdav,
    Proxy,
    Share,
    Internal,
}

impl Channel {
    pub fn cache_control(self) -> Option<&'static str> {
        match self {
            Channel::FsWeb | Channel::Webdav => Some("private, no-cache"),
            Channel::Proxy | Channel::Share => Some("public, max-age=3600"),
            Channel::Internal => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// The inbound request as it matters to the range service; everything else (routing, auth) is
/// handled by `storagehub` before this point.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub method: Option<HttpMethod>,
    pub if_none_match: Option<String>,
    pub if_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub if_unmodified_since: Option<String>,
    pub if_range: Option<String>,
    pub range: Option<String>,
    pub request_content_type: Option<String>,
    pub sec_fetch_dest: Option<String>,
    pub accept: Option<String>,
    pub path_extension: Option<String>,
    pub channel: Channel,
}

impl RequestContext {
    pub fn new(channel: Channel) -> Self {
        RequestContext {
            method: Some(HttpMethod::Get),
            channel,
            ..Default::default()
        }
    }

    /// §4.2 step 7 video-seek guard predicate: content-type starts with `video/`,
    /// `Sec-Fetch-Dest: video`, `Accept` includes `video/`, or path extension is a known
    /// video container.
    fn looks_like_video(&self) -> bool {
        const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "avi"];
        self.request_content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("video/"))
            || self.sec_fetch_dest.as_deref() == Some("video")
            || self.accept.as_deref().is_some_and(|a| a.contains("video/"))
            || self
                .path_extension
                .as_deref()
                .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResponseHeaders {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub cache_control: Option<String>,
    pub multipart_boundary: Option<String>,
    pub log_note: Option<String>,
}

pub enum RangeResponse {
    /// 304: no entity headers, but ETag/Last-Modified/Cache-Control are present.
    NotModified(ResponseHeaders),
    /// 412.
    PreconditionFailed(ResponseHeaders),
    /// 416, `Content-Range: bytes */size`, no body.
    RangeNotSatisfiable(ResponseHeaders),
    /// 200 with the full body (or no body for HEAD).
    Full(ResponseHeaders, Option<BoxByteStream>),
    /// 206 with a single range's body.
    Partial(ResponseHeaders, Option<BoxByteStream>),
    /// 206 `multipart/byteranges` with two or more parts.
    MultiPart(ResponseHeaders, Option<BoxByteStream>),
}

impl RangeResponse {
    pub fn headers(&self) -> &ResponseHeaders {
        match self {
            RangeResponse::NotModified(h)
            | RangeResponse::PreconditionFailed(h)
            | RangeResponse::RangeNotSatisfiable(h)
            | RangeResponse::Full(h, _)
            | RangeResponse::Partial(h, _)
            | RangeResponse::MultiPart(h, _) => h,
        }
    }
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

fn etag_list_matches(header_value: &str, etag: &str) -> bool {
    let header_value = header_value.trim();
    if header_value == "*" {
        return true;
    }
    header_value
        .split(',')
        .map(|t| strip_weak(t.trim()))
        .any(|t| t == strip_weak(etag))
}

/// §4.2 step 3: conditional evaluation on `etag`/`lastModified`.
fn evaluate_conditional(
    ctx: &RequestContext,
    etag: Option<&str>,
    last_modified: Option<DateTime<Utc>>,
) -> Option<ConditionalOutcome> {
    if let (Some(inm), Some(etag)) = (&ctx.if_none_match, etag) {
        if etag_list_matches(inm, etag) {
            return Some(ConditionalOutcome::NotModified);
        }
    }
    if let (Some(im), Some(etag)) = (&ctx.if_match, etag) {
        if !etag_list_matches(im, etag) {
            return Some(ConditionalOutcome::PreconditionFailed);
        }
    }
    if let (Some(ims), Some(lm)) = (&ctx.if_modified_since, last_modified) {
        if let Some(ims) = parse_http_date(ims) {
            if lm <= ims {
                return Some(ConditionalOutcome::NotModified);
            }
        }
    }
    if let (Some(ius), Some(lm)) = (&ctx.if_unmodified_since, last_modified) {
        if let Some(ius) = parse_http_date(ius) {
            if lm > ius {
                return Some(ConditionalOutcome::PreconditionFailed);
            }
        }
    }
    None
}

enum ConditionalOutcome {
    NotModified,
    PreconditionFailed,
}

/// §4.2 step 4: If-Range. Unparsable dates are treated as a mismatch (ignore Range).
fn if_range_matches(ctx: &RequestContext, etag: Option<&str>, last_modified: Option<DateTime<Utc>>) -> bool {
    let Some(if_range) = &ctx.if_range else {
        return true; // no If-Range header: Range always applies
    };
    if let Some(etag) = etag {
        if if_range.starts_with('"') || if_range.starts_with("W/") {
            return strip_weak(if_range) == strip_weak(etag);
        }
    }
    match (parse_http_date(if_range), last_modified) {
        (Some(d), Some(lm)) => d == lm,
        _ => false,
    }
}

/// One requested segment, parsed from a `Range: bytes=...` header (RFC 7233 §2.1 semantics for
/// `start-`, `-suffix`, and `start-end`).
#[derive(Clone, Copy, Debug)]
enum RawSegment {
    StartEnd(u64, u64),
    StartOnly(u64),
    SuffixLength(u64),
}

fn parse_range_header(value: &str) -> Option<Vec<RawSegment>> {
    let value = value.trim();
    let rest = value.strip_prefix("bytes=")?;
    let mut segments = Vec::new();
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(suffix) = part.strip_prefix('-') {
            segments.push(RawSegment::SuffixLength(suffix.parse().ok()?));
        } else if let Some((start, end)) = part.split_once('-') {
            let start: u64 = start.parse().ok()?;
            if end.is_empty() {
                segments.push(RawSegment::StartOnly(start));
            } else {
                let end: u64 = end.parse().ok()?;
                if end < start {
                    return None;
                }
                segments.push(RawSegment::StartEnd(start, end));
            }
        } else {
            return None;
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

fn resolve_segment(segment: RawSegment, size: u64) -> Option<ByteRange> {
    let (start, end) = match segment {
        RawSegment::StartEnd(start, end) => (start, end.min(size.saturating_sub(1))),
        RawSegment::StartOnly(start) => (start, size.saturating_sub(1)),
        RawSegment::SuffixLength(len) => {
            if len == 0 {
                return None;
            }
            let len = len.min(size);
            (size - len, size.saturating_sub(1))
        }
    };
    if start >= size || start > end {
        None
    } else {
        Some(ByteRange { start, end })
    }
}

fn base_headers(descriptor: &dyn StreamDescriptor, channel: Channel) -> ResponseHeaders {
    ResponseHeaders {
        status: 200,
        content_type: descriptor.content_type().map(str::to_owned),
        content_length: None,
        content_range: None,
        accept_ranges: true,
        etag: descriptor.etag().map(str::to_owned),
        last_modified: descriptor
            .last_modified()
            .and_then(|ms| DateTime::from_timestamp_millis(ms))
            .map(|dt| dt.to_rfc2822()),
        cache_control: channel.cache_control().map(str::to_owned),
        multipart_boundary: None,
        log_note: None,
    }
}

fn is_head(ctx: &RequestContext) -> bool {
    ctx.method == Some(HttpMethod::Head)
}

/// Drives the full §4.2 algorithm, steps 2-7. Step 1 (mount/driver resolution) is the caller's
/// responsibility (`mount.rs` / `storagehub`'s routing layer).
pub async fn serve_range(
    ctx: &RequestContext,
    descriptor: &dyn StreamDescriptor,
    cancel: CancellationToken,
) -> Result<RangeResponse, StorageError> {
    let etag = descriptor.etag();
    let last_modified_ms = descriptor.last_modified();
    let last_modified = last_modified_ms.and_then(DateTime::from_timestamp_millis);

    // Step 3: conditional evaluation.
    if let Some(outcome) = evaluate_conditional(ctx, etag, last_modified) {
        let mut headers = base_headers(descriptor, ctx.channel);
        return Ok(match outcome {
            ConditionalOutcome::NotModified => {
                headers.status = 304;
                headers.accept_ranges = false;
                RangeResponse::NotModified(headers)
            }
            ConditionalOutcome::PreconditionFailed => {
                headers.status = 412;
                headers.accept_ranges = false;
                RangeResponse::PreconditionFailed(headers)
            }
        });
    }

    let Some(range_header) = &ctx.range else {
        let mut headers = base_headers(descriptor, ctx.channel);
        headers.content_length = descriptor.size();
        let stream = if is_head(ctx) {
            None
        } else {
            Some(open_full_stream(descriptor, cancel).await?)
        };
        return Ok(RangeResponse::Full(headers, stream));
    };

    // Step 4: If-Range.
    if !if_range_matches(ctx, etag, last_modified) {
        let mut headers = base_headers(descriptor, ctx.channel);
        headers.content_length = descriptor.size();
        let stream = if is_head(ctx) {
            None
        } else {
            Some(open_full_stream(descriptor, cancel).await?)
        };
        return Ok(RangeResponse::Full(headers, stream));
    }

    // Step 5: probe size if unknown.
    let size = match descriptor.size() {
        Some(size) => Some(size),
        None => {
            tokio::time::timeout(std::time::Duration::from_secs(8), descriptor.probe_size(cancel.clone()))
                .await
                .ok()
                .flatten()
        }
    };

    let Some(size) = size else {
        // Size unknown: Range cannot be served RFC-compliantly (§3 invariant).
        let headers = base_headers(descriptor, ctx.channel);
        let stream = if is_head(ctx) {
            None
        } else {
            Some(open_full_stream(descriptor, cancel).await?)
        };
        return Ok(RangeResponse::Full(headers, stream));
    };

    let Some(raw_segments) = parse_range_header(range_header) else {
        // Syntactically invalid: ignore Range, 200.
        let mut headers = base_headers(descriptor, ctx.channel);
        headers.content_length = Some(size);
        let stream = if is_head(ctx) {
            None
        } else {
            Some(open_full_stream(descriptor, cancel).await?)
        };
        return Ok(RangeResponse::Full(headers, stream));
    };

    // Step 6: multi-range.
    if raw_segments.len() > 1 {
        if !descriptor.supports_native_range() {
            let mut headers = base_headers(descriptor, ctx.channel);
            headers.content_length = Some(size);
            let stream = if is_head(ctx) {
                None
            } else {
                Some(open_full_stream(descriptor, cancel).await?)
            };
            return Ok(RangeResponse::Full(headers, stream));
        }

        let resolved: Vec<ByteRange> = raw_segments
            .iter()
            .filter_map(|seg| resolve_segment(*seg, size))
            .collect();

        if resolved.is_empty() {
            let mut headers = base_headers(descriptor, ctx.channel);
            headers.status = 416;
            headers.content_range = Some(format!("bytes */{size}"));
            return Ok(RangeResponse::RangeNotSatisfiable(headers));
        }

        let total_requested: u64 = resolved.iter().map(ByteRange::len).sum();
        if total_requested > size {
            let mut headers = base_headers(descriptor, ctx.channel);
            headers.content_length = Some(size);
            let stream = if is_head(ctx) {
                None
            } else {
                Some(open_full_stream(descriptor, cancel).await?)
            };
            return Ok(RangeResponse::Full(headers, stream));
        }

        if resolved.len() == 1 {
            return serve_single_range(ctx, descriptor, size, resolved[0], cancel).await;
        }

        // Probe upstream with a 1-byte range for the first segment.
        let probe_range = ByteRange {
            start: resolved[0].start,
            end: resolved[0].start,
        };
        let probe = descriptor.get_range(probe_range, cancel.clone()).await?;
        let honored = probe
            .as_ref()
            .is_some_and(|h| h.range_support.honored(probe_range));
        if let Some(handle) = probe {
            handle.close();
        }
        if !honored {
            let mut headers = base_headers(descriptor, ctx.channel);
            headers.content_length = Some(size);
            let stream = if is_head(ctx) {
                None
            } else {
                Some(open_full_stream(descriptor, cancel).await?)
            };
            return Ok(RangeResponse::Full(headers, stream));
        }

        return serve_multipart(ctx, descriptor, size, resolved, cancel).await;
    }

    // Step 7: single range.
    let Some(range) = resolve_segment(raw_segments[0], size) else {
        let mut headers = base_headers(descriptor, ctx.channel);
        headers.status = 416;
        headers.content_range = Some(format!("bytes */{size}"));
        return Ok(RangeResponse::RangeNotSatisfiable(headers));
    };

    serve_single_range(ctx, descriptor, size, range, cancel).await
}

async fn open_full_stream(
    descriptor: &dyn StreamDescriptor,
    cancel: CancellationToken,
) -> Result<BoxByteStream, StorageError> {
    Ok(descriptor.get_stream(cancel).await?.stream)
}

async fn serve_single_range(
    ctx: &RequestContext,
    descriptor: &dyn StreamDescriptor,
    size: u64,
    range: ByteRange,
    cancel: CancellationToken,
) -> Result<RangeResponse, StorageError> {
    // Video-seek guard.
    if range.start > VIDEO_SEEK_GUARD_THRESHOLD && ctx.looks_like_video() {
        let probe = descriptor
            .get_range(ByteRange { start: range.start, end: range.start }, cancel.clone())
            .await?;
        let honored = probe
            .as_ref()
            .is_some_and(|h| h.range_support.honored(ByteRange { start: range.start, end: range.start }));
        if let Some(handle) = probe {
            handle.close();
        }
        if !honored {
            let mut headers = base_headers(descriptor, ctx.channel);
            headers.content_length = Some(size);
            headers.log_note = Some("video seek guard: upstream ignores Range, serving 200".to_owned());
            let stream = if is_head(ctx) {
                None
            } else {
                Some(open_full_stream(descriptor, cancel).await?)
            };
            return Ok(RangeResponse::Full(headers, stream));
        }
    }

    if descriptor.supports_native_range() {
        if let Some(handle) = descriptor.get_range(range, cancel.clone()).await? {
            if handle.range_support.supports_range != Some(false) {
                let mut headers = base_headers(descriptor, ctx.channel);
                headers.status = 206;
                headers.content_range = Some(format!("bytes {}-{}/{size}", range.start, range.end));
                headers.content_length = Some(range.len());
                let stream = if is_head(ctx) {
                    handle.close();
                    None
                } else {
                    Some(handle.stream)
                };
                return Ok(RangeResponse::Partial(headers, stream));
            }
            handle.close();
        }
    }

    // Fallback path.
    let mut headers = base_headers(descriptor, ctx.channel);
    headers.status = 206;
    headers.content_range = Some(format!("bytes {}-{}/{size}", range.start, range.end));
    headers.log_note = Some(SOFTWARE_SLICE_LOG_HINT.to_owned());
    match descriptor.range_fallback_policy() {
        RangeFallbackPolicy::Full => {
            headers.status = 200;
            headers.content_range = None;
            headers.content_length = Some(size);
            let stream = if is_head(ctx) {
                None
            } else {
                Some(open_full_stream(descriptor, cancel).await?)
            };
            Ok(RangeResponse::Full(headers, stream))
        }
        RangeFallbackPolicy::Software => {
            // Content-Length is deliberately omitted: the client terminates on stream close.
            let stream = if is_head(ctx) {
                None
            } else {
                let full = open_full_stream(descriptor, cancel).await?;
                Some(software_slice(full, range))
            };
            Ok(RangeResponse::Partial(headers, stream))
        }
    }
}

/// Wraps a full-body stream in a byte-slice filter that discards `[0, start)` and truncates at
/// `end` (§4.2 "Soft slice", Glossary).
fn software_slice(stream: BoxByteStream, range: ByteRange) -> BoxByteStream {
    let mut consumed: u64 = 0;
    let mut emitted: u64 = 0;
    let wanted = range.len();
    Box::pin(async_stream::stream! {
        tokio::pin!(stream);
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            if emitted >= wanted {
                return;
            }
            let chunk_start = consumed;
            let chunk_end = consumed + chunk.len() as u64;
            consumed = chunk_end;

            if chunk_end <= range.start {
                continue;
            }
            let local_start = range.start.saturating_sub(chunk_start) as usize;
            let remaining = (wanted - emitted) as usize;
            let local_end = (chunk.len() - local_start).min(remaining) + local_start;
            if local_start >= chunk.len() {
                continue;
            }
            let slice = chunk.slice(local_start..local_end);
            emitted += slice.len() as u64;
            yield Ok(slice);
        }
    })
}

async fn serve_multipart(
    ctx: &RequestContext,
    descriptor: &dyn StreamDescriptor,
    size: u64,
    ranges: Vec<ByteRange>,
    cancel: CancellationToken,
) -> Result<RangeResponse, StorageError> {
    let boundary: String = {
        let mut rng = rand::thread_rng();
        (0..32)
            .map(|_| {
                let chars: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
                chars[rng.gen_range(0..chars.len())] as char
            })
            .collect()
    };
    let content_type = descriptor.content_type().map(str::to_owned);

    let mut headers = base_headers(descriptor, ctx.channel);
    headers.status = 206;
    headers.multipart_boundary = Some(boundary.clone());
    headers.content_length = None;

    if is_head(ctx) {
        return Ok(RangeResponse::MultiPart(headers, None));
    }

    let mut part_streams = Vec::with_capacity(ranges.len());
    for range in &ranges {
        let handle = descriptor
            .get_range(*range, cancel.clone())
            .await?
            .ok_or_else(|| StorageError::StreamClosed("driver dropped a multipart range mid-response".to_owned()))?;
        part_streams.push((*range, handle.stream));
    }

    let body = Box::pin(async_stream::stream! {
        use futures::StreamExt;
        for (range, part_stream) in part_streams {
            let preamble = format!(
                "--{boundary}\r\nContent-Type: {}\r\nContent-Range: bytes {}-{}/{size}\r\n\r\n",
                content_type.as_deref().unwrap_or("application/octet-stream"),
                range.start,
                range.end,
            );
            yield Ok(Bytes::from(preamble));
            tokio::pin!(part_stream);
            while let Some(chunk) = part_stream.next().await {
                yield chunk;
            }
            yield Ok(Bytes::from_static(b"\r\n"));
        }
        yield Ok(Bytes::from(format!("--{boundary}--\r\n")));
    });

    Ok(RangeResponse::MultiPart(headers, Some(body)))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;

    use super::*;

    struct FixedDescriptor {
        content: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<i64>,
        native_range_probe: Mutex<Option<RangeSupportSpec>>,
    }

    #[derive(Clone, Copy)]
    enum RangeSupportSpec {
        Honors,
        Ignores,
    }

    impl FixedDescriptor {
        fn new(content: Vec<u8>) -> Self {
            FixedDescriptor {
                content,
                etag: None,
                last_modified: None,
                native_range_probe: Mutex::new(None),
            }
        }

        fn with_etag(mut self, etag: &str) -> Self {
            self.etag = Some(etag.to_owned());
            self
        }

        fn with_native_range(self, spec: RangeSupportSpec) -> Self {
            *self.native_range_probe.lock().unwrap() = Some(spec);
            self
        }
    }

    #[async_trait]
    impl StreamDescriptor for FixedDescriptor {
        fn size(&self) -> Option<u64> {
            Some(self.content.len() as u64)
        }
        fn content_type(&self) -> Option<&str> {
            Some("application/octet-stream")
        }
        fn etag(&self) -> Option<&str> {
            self.etag.as_deref()
        }
        fn last_modified(&self) -> Option<i64> {
            self.last_modified
        }

        async fn get_stream(&self, cancel: CancellationToken) -> Result<StreamHandle, StorageError> {
            let body = self.content.clone();
            let s: BoxByteStream = Box::pin(stream::iter(vec![Ok(Bytes::from(body))]));
            Ok(StreamHandle::new(s, cancel))
        }

        fn supports_native_range(&self) -> bool {
            self.native_range_probe.lock().unwrap().is_some()
        }

        async fn get_range(
            &self,
            range: ByteRange,
            cancel: CancellationToken,
        ) -> Result<Option<StreamHandle>, StorageError> {
            let Some(spec) = *self.native_range_probe.lock().unwrap() else {
                return Ok(None);
            };
            match spec {
                RangeSupportSpec::Honors => {
                    let slice = self.content[range.start as usize..=range.end as usize].to_vec();
                    let s: BoxByteStream = Box::pin(stream::iter(vec![Ok(Bytes::from(slice))]));
                    let mut handle = StreamHandle::new(s, cancel);
                    handle.range_support.supports_range = Some(true);
                    handle.range_support.upstream_status = Some(206);
                    handle.range_support.upstream_content_range = Some((range.start, range.end, self.size()));
                    Ok(Some(handle))
                }
                RangeSupportSpec::Ignores => {
                    let s: BoxByteStream = Box::pin(stream::iter(vec![Ok(Bytes::from(self.content.clone()))]));
                    let mut handle = StreamHandle::new(s, cancel);
                    handle.range_support.supports_range = Some(false);
                    handle.range_support.upstream_status = Some(200);
                    Ok(Some(handle))
                }
            }
        }
    }

    async fn drain(stream: BoxByteStream) -> Vec<u8> {
        use futures::StreamExt;
        let mut out = Vec::new();
        tokio::pin!(stream);
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    fn body(content: usize) -> Vec<u8> {
        (0..content).map(|i| (i % 256) as u8).collect()
    }

    #[tokio::test]
    async fn s1_single_range_software_sliced() {
        let descriptor = FixedDescriptor::new(body(1000));
        let mut ctx = RequestContext::new(Channel::FsWeb);
        ctx.range = Some("bytes=0-499".to_owned());
        let resp = serve_range(&ctx, &descriptor, CancellationToken::new()).await.unwrap();
        assert_eq!(resp.headers().status, 206);
        assert_eq!(resp.headers().content_range.as_deref(), Some("bytes 0-499/1000"));
        if let RangeResponse::Partial(_, Some(stream)) = resp {
            let bytes = drain(stream).await;
            assert_eq!(bytes.len(), 500);
            assert_eq!(bytes, body(1000)[0..500]);
        } else {
            panic!("expected Partial");
        }
    }

    #[tokio::test]
    async fn s2_suffix_range() {
        let descriptor = FixedDescriptor::new(body(1000));
        let mut ctx = RequestContext::new(Channel::FsWeb);
        ctx.range = Some("bytes=-200".to_owned());
        let resp = serve_range(&ctx, &descriptor, CancellationToken::new()).await.unwrap();
        assert_eq!(resp.headers().content_range.as_deref(), Some("bytes 800-999/1000"));
        if let RangeResponse::Partial(_, Some(stream)) = resp {
            let bytes = drain(stream).await;
            assert_eq!(bytes, body(1000)[800..1000]);
        } else {
            panic!("expected Partial");
        }
    }

    #[tokio::test]
    async fn s3_unsatisfiable_range() {
        let descriptor = FixedDescriptor::new(body(1000));
        let mut ctx = RequestContext::new(Channel::FsWeb);
        ctx.range = Some("bytes=2000-3000".to_owned());
        let resp = serve_range(&ctx, &descriptor, CancellationToken::new()).await.unwrap();
        assert_eq!(resp.headers().status, 416);
        assert_eq!(resp.headers().content_range.as_deref(), Some("bytes */1000"));
    }

    #[tokio::test]
    async fn s4_if_none_match() {
        let descriptor = FixedDescriptor::new(body(1000)).with_etag("\"v1\"");
        let mut ctx = RequestContext::new(Channel::FsWeb);
        ctx.if_none_match = Some("\"v1\"".to_owned());
        let resp = serve_range(&ctx, &descriptor, CancellationToken::new()).await.unwrap();
        assert_eq!(resp.headers().status, 304);
        assert_eq!(resp.headers().etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn s5_video_seek_guard_ignores_range() {
        let descriptor = FixedDescriptor::new(body(1)).with_native_range(RangeSupportSpec::Ignores);
        // Stand in for a 200 MiB file without materializing it; size is reported separately.
        struct Wrapper(FixedDescriptor, u64);
        #[async_trait]
        impl StreamDescriptor for Wrapper {
            fn size(&self) -> Option<u64> {
                Some(self.1)
            }
            fn content_type(&self) -> Option<&str> {
                Some("video/mp4")
            }
            fn etag(&self) -> Option<&str> {
                None
            }
            fn last_modified(&self) -> Option<i64> {
                None
            }
            async fn get_stream(&self, cancel: CancellationToken) -> Result<StreamHandle, StorageError> {
                self.0.get_stream(cancel).await
            }
            fn supports_native_range(&self) -> bool {
                true
            }
            async fn get_range(
                &self,
                range: ByteRange,
                cancel: CancellationToken,
            ) -> Result<Option<StreamHandle>, StorageError> {
                self.0.get_range(range, cancel).await
            }
        }
        let descriptor = Wrapper(descriptor, 209_715_200);
        let mut ctx = RequestContext::new(Channel::FsWeb);
        ctx.range = Some("bytes=157286400-".to_owned());
        ctx.request_content_type = Some("video/mp4".to_owned());
        let resp = serve_range(&ctx, &descriptor, CancellationToken::new()).await.unwrap();
        assert_eq!(resp.headers().status, 200);
        assert!(resp.headers().log_note.as_deref().unwrap().contains("video seek guard"));
    }

    #[tokio::test]
    async fn s8_multi_range_when_upstream_honors() {
        let descriptor = FixedDescriptor::new(body(1000)).with_native_range(RangeSupportSpec::Honors);
        let mut ctx = RequestContext::new(Channel::FsWeb);
        ctx.range = Some("bytes=0-49,100-149".to_owned());
        let resp = serve_range(&ctx, &descriptor, CancellationToken::new()).await.unwrap();
        assert_eq!(resp.headers().status, 206);
        assert!(resp.headers().multipart_boundary.is_some());
        if let RangeResponse::MultiPart(headers, Some(stream)) = resp {
            let body = drain(stream).await;
            let text = String::from_utf8_lossy(&body);
            let boundary = headers.multipart_boundary.unwrap();
            assert_eq!(text.matches(&format!("--{boundary}")).count(), 3); // 2 parts + terminator
            assert!(text.contains("Content-Range: bytes 0-49/1000"));
            assert!(text.contains("Content-Range: bytes 100-149/1000"));
        } else {
            panic!("expected MultiPart");
        }
    }
}
