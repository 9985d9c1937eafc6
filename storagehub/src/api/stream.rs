// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Turns a [`storage::range::RangeResponse`] into an axum `Response` (§4.2/§6). `range.rs`
//! deliberately stops at a framework-neutral decision value; this is the one place that knows
//! about `axum::http`.

use std::path::Path;

use axum::body::{boxed, Empty, StreamBody};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use storage::range::{Channel, HttpMethod, RangeResponse, RequestContext};
use storage::stream::StreamDescriptor;

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_owned)
}

/// Builds a [`RequestContext`] from the incoming request. `request_content_type` is seeded from
/// the descriptor's own content type (there is no equivalent request header for a GET) so the
/// video-seek guard (§4.2 step 7) still fires for video objects served without an explicit
/// `Accept`/`Sec-Fetch-Dest` hint.
pub fn request_context(headers: &HeaderMap, method: &Method, request_path: &str, descriptor: &dyn StreamDescriptor, channel: Channel) -> RequestContext {
    let mut ctx = RequestContext::new(channel);
    ctx.method = Some(if *method == Method::HEAD { HttpMethod::Head } else { HttpMethod::Get });
    ctx.if_none_match = header_str(headers, header::IF_NONE_MATCH);
    ctx.if_match = header_str(headers, header::IF_MATCH);
    ctx.if_modified_since = header_str(headers, header::IF_MODIFIED_SINCE);
    ctx.if_unmodified_since = header_str(headers, header::IF_UNMODIFIED_SINCE);
    ctx.if_range = header_str(headers, header::IF_RANGE);
    ctx.range = header_str(headers, header::RANGE);
    ctx.sec_fetch_dest = headers.get("sec-fetch-dest").and_then(|v| v.to_str().ok()).map(str::to_owned);
    ctx.accept = header_str(headers, header::ACCEPT);
    ctx.path_extension = Path::new(request_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_owned);
    ctx.request_content_type = descriptor.content_type().map(str::to_owned);
    ctx
}

/// Renders the range service's decision as an axum `Response`, synthesizing the
/// `multipart/byteranges` content type (§6: "exactly-these headers") since `ResponseHeaders`
/// only ever carries a part's own content type.
pub fn into_response(range_response: RangeResponse, is_head: bool) -> Response {
    let is_multipart = matches!(range_response, RangeResponse::MultiPart(_, _));
    let (headers, body) = match range_response {
        RangeResponse::NotModified(headers) => (headers, None),
        RangeResponse::PreconditionFailed(headers) => (headers, None),
        RangeResponse::RangeNotSatisfiable(headers) => (headers, None),
        RangeResponse::Full(headers, body) => (headers, body),
        RangeResponse::Partial(headers, body) => (headers, body),
        RangeResponse::MultiPart(headers, body) => (headers, body),
    };

    let status = StatusCode::from_u16(headers.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);

    let content_type = if is_multipart {
        format!("multipart/byteranges; boundary={}", headers.multipart_boundary.as_deref().unwrap_or(""))
    } else {
        headers.content_type.clone().unwrap_or_else(|| "application/octet-stream".to_owned())
    };
    builder = builder.header(header::CONTENT_TYPE, content_type);

    if let Some(len) = headers.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len.to_string());
    }
    if let Some(content_range) = &headers.content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    if headers.accept_ranges {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    if let Some(etag) = &headers.etag {
        builder = builder.header(header::ETAG, etag);
    }
    if let Some(last_modified) = &headers.last_modified {
        builder = builder.header(header::LAST_MODIFIED, last_modified);
    }
    if let Some(cache_control) = &headers.cache_control {
        builder = builder.header(header::CACHE_CONTROL, cache_control);
    }

    let response_body = match body.filter(|_| !is_head) {
        Some(stream) => boxed(StreamBody::new(stream)),
        None => boxed(Empty::new()),
    };

    builder.body(response_body).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to build range response");
        Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(boxed(Empty::new())).expect("static response is valid")
    })
}
