//! Conversion endpoints.
//!
//! `POST /convert-image` and `POST /convert-video` accept either a raw
//! request body or a `multipart/form-data` upload with a `file` field, and
//! respond with the converted file as an attachment.

use std::io;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;

use wc_core::{Error, MediaKind};
use wc_pipeline::{ConversionRequest, ConvertedMedia};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Header carrying the job id on successful conversions.
pub const X_JOB_ID: &str = "x-job-id";

/// Slack allowed on top of the upload limit for multipart framing.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Multipart field names treated as the upload.
const FILE_FIELDS: &[&str] = &["file", "upload", "image", "video"];

#[derive(Debug, Default, Deserialize)]
pub struct ConvertParams {
    /// WebP quality, 60..=100 (images only).
    pub quality: Option<u8>,
    /// Original file name for raw-body uploads.
    pub filename: Option<String>,
}

/// POST /convert-image
pub async fn convert_image(
    State(ctx): State<AppContext>,
    request: Request,
) -> Result<Response, AppError> {
    handle(ctx, MediaKind::Image, request).await
}

/// POST /convert-video
pub async fn convert_video(
    State(ctx): State<AppContext>,
    request: Request,
) -> Result<Response, AppError> {
    handle(ctx, MediaKind::Video, request).await
}

async fn handle(ctx: AppContext, kind: MediaKind, request: Request) -> Result<Response, AppError> {
    let request_id = RequestId::of(&request);
    let tag = |err: Error| {
        let err = AppError::new(err);
        match &request_id {
            Some(id) => err.with_request_id(id.clone()),
            None => err,
        }
    };

    let params = Query::<ConvertParams>::try_from_uri(request.uri())
        .map(|Query(params)| params)
        .map_err(|e| tag(Error::invalid(format!("invalid query string: {e}"))))?;

    let converted = if is_multipart(request.headers()) {
        convert_multipart(&ctx, kind, params, request).await
    } else {
        convert_raw(&ctx, kind, params, request).await
    };
    let media = converted.map_err(tag)?;

    converted_response(media).map_err(tag)
}

async fn convert_raw(
    ctx: &AppContext,
    kind: MediaKind,
    params: ConvertParams,
    request: Request,
) -> wc_core::Result<ConvertedMedia> {
    let headers = request.headers();
    let content_type = header_str(headers, CONTENT_TYPE.as_str()).map(String::from);
    let declared_len = declared_length(headers)?;

    let body = request
        .into_body()
        .into_data_stream()
        .map_err(io::Error::other)
        .boxed();

    ctx.service
        .convert(ConversionRequest {
            kind,
            filename: params.filename,
            content_type,
            declared_len,
            quality: params.quality,
            body,
        })
        .await
}

async fn convert_multipart(
    ctx: &AppContext,
    kind: MediaKind,
    params: ConvertParams,
    request: Request,
) -> wc_core::Result<ConvertedMedia> {
    if let Some(len) = declared_length(request.headers())? {
        let ceiling = ctx.service.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD);
        if len > ceiling {
            return Err(Error::invalid(format!(
                "upload of {len} bytes exceeds the {} byte limit",
                ctx.service.max_upload_bytes()
            )));
        }
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| Error::invalid(format!("malformed multipart request: {}", e.body_text())))?;

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| Error::invalid(format!("malformed multipart body: {e}")))?;
        let Some(field) = field else {
            return Err(Error::invalid(format!(
                "multipart body has no file field (expected \"{}\")",
                FILE_FIELDS[0]
            )));
        };

        let is_upload = field.file_name().is_some()
            || field.name().is_some_and(|name| FILE_FIELDS.contains(&name));
        if !is_upload {
            continue;
        }

        let filename = field
            .file_name()
            .map(String::from)
            .or_else(|| params.filename.clone());
        let content_type = field.content_type().map(String::from);
        // Framing errors come from the client's bytes, not the transport.
        let body = field
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            .boxed();

        return ctx
            .service
            .convert(ConversionRequest {
                kind,
                filename,
                content_type,
                declared_len: None,
                quality: params.quality,
                body,
            })
            .await;
    }
}

fn converted_response(media: ConvertedMedia) -> wc_core::Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, media.content_type)
        .header(CONTENT_LENGTH, media.len)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", media.file_name),
        )
        .header(X_JOB_ID, media.job_id.to_string())
        .body(Body::from_stream(media.body))
        .map_err(|e| Error::Internal(format!("failed to build response: {e}")))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    header_str(headers, CONTENT_TYPE.as_str())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn declared_length(headers: &HeaderMap) -> wc_core::Result<Option<u64>> {
    header_str(headers, CONTENT_LENGTH.as_str())
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| Error::invalid("invalid Content-Length header"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn multipart_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_multipart(&headers));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("Multipart/Form-Data; boundary=xyz"),
        );
        assert!(is_multipart(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        assert!(!is_multipart(&headers));
    }

    #[test]
    fn content_length_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers).unwrap(), None);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1024"));
        assert_eq!(declared_length(&headers).unwrap(), Some(1024));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert!(matches!(
            declared_length(&headers),
            Err(Error::InvalidInput(_))
        ));
    }
}
