//! Sending seekable resources with validators and byte ranges.

use crate::response::{ResponseError, ResponseWriter};
use hearth_core::{Method, Request};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// Weak validator built from the resource length and modification time.
#[must_use]
pub fn weak_etag(length: u64, modified: Option<SystemTime>) -> String {
    match modified.and_then(unix_secs) {
        Some(secs) => format!("W/\"{length:x}-{secs:x}\""),
        None => format!("W/\"{length:x}\""),
    }
}

fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(tag)
}

/// Weak comparison of an `If-None-Match` / `If-Range` list against `etag`.
fn etag_matches(header: &str, etag: &str) -> bool {
    let ours = opaque_tag(etag);
    header
        .split(',')
        .any(|candidate| candidate.trim() == "*" || opaque_tag(candidate) == ours)
}

/// Parse a single `Range: bytes=...` value against a resource of `length`
/// bytes, returning the inclusive `(start, end)`.
///
/// Accepts `a-b`, `a-` and `a`. Multiple ranges, suffix ranges and anything
/// unsatisfiable yield `None`, in which case the whole resource is sent.
/// Suffix ranges (`bytes=-N`) are deliberately unsupported: answering them
/// with a full 200 is always valid, and clients that resume downloads use
/// the `a-` form.
#[must_use]
pub fn parse_range(value: &str, length: u64) -> Option<(u64, u64)> {
    let ranges = value.trim().strip_prefix("bytes=")?.trim();
    if ranges.contains(',') {
        return None;
    }
    let last = length.checked_sub(1)?;
    let (start, end) = match ranges.split_once('-') {
        None => (ranges.parse::<u64>().ok()?, last),
        Some((start, end)) => {
            let start = start.trim().parse::<u64>().ok()?;
            let end = end.trim();
            let end = if end.is_empty() {
                last
            } else {
                end.parse::<u64>().ok()?
            };
            (start, end)
        }
    };
    (start <= end && end <= last).then_some((start, end))
}

impl ResponseWriter<'_> {
    /// Send `content` (of `length` bytes) in answer to `request`.
    ///
    /// Handles `OPTIONS` and rejects other methods than `GET`/`HEAD` with
    /// 405, answers conditional requests with 304, serves a single byte
    /// range with 206 and otherwise sends the whole resource. The content
    /// type is left to the caller.
    pub fn send_resource<R: Read + Seek>(
        &mut self,
        request: &Request<'_>,
        mut content: R,
        length: u64,
        modified: Option<SystemTime>,
    ) -> Result<(), ResponseError> {
        match request.method() {
            Method::Get | Method::Head => {}
            Method::Options => {
                self.set_status_code(204)?;
                self.set_header("Allow", "OPTIONS, GET, HEAD")?;
                return self.send_headers();
            }
            _ => {
                self.set_status_code(405)?;
                self.set_header("Allow", "OPTIONS, GET, HEAD")?;
                self.set_header("Content-Type", "text/plain")?;
                return self.send_body(b"405 Method Not Allowed");
            }
        }

        let headers = request.headers();
        let etag = weak_etag(length, modified);
        let modified_secs = modified.and_then(unix_secs);

        let not_modified = match headers.get("If-None-Match") {
            Some(tags) => etag_matches(tags, &etag),
            None => headers
                .get("If-Modified-Since")
                .and_then(|since| httpdate::parse_http_date(since).ok())
                .and_then(unix_secs)
                .zip(modified_secs)
                .is_some_and(|(since, modified)| modified <= since),
        };

        let mut range = match headers.get_all("Range") {
            [single] => parse_range(single, length),
            _ => None,
        };
        if let Some(validator) = headers.get("If-Range") {
            let current = if validator.trim_start().starts_with("W/")
                || validator.trim_start().starts_with('"')
            {
                etag_matches(validator, &etag)
            } else {
                httpdate::parse_http_date(validator)
                    .ok()
                    .and_then(unix_secs)
                    .zip(modified_secs)
                    .is_some_and(|(date, modified)| date == modified)
            };
            if !current {
                range = None;
            }
        }

        self.set_header("Accept-Ranges", "bytes")?;
        self.set_header("ETag", &etag)?;
        if let Some(modified) = modified {
            self.set_header("Last-Modified", &httpdate::fmt_http_date(modified))?;
        }

        if not_modified {
            self.set_status_code(304)?;
            return self.send_headers();
        }

        let amount = match range {
            Some((start, end)) => {
                content.seek(SeekFrom::Start(start))?;
                self.set_status_code(206)?;
                self.set_header("Content-Range", &format!("bytes {start}-{end}/{length}"))?;
                end - start + 1
            }
            None => {
                self.set_status_code(200)?;
                length
            }
        };
        self.set_content_length(amount)?;
        self.disable_buffer()?;
        self.send_headers()?;
        if request.is_head() {
            return Ok(());
        }
        io::copy(&mut content.take(amount), self)?;
        Ok(())
    }

    /// Send the file at `path` with [`send_resource`](Self::send_resource).
    ///
    /// Returns `Ok(false)` without touching the response when the file does
    /// not exist, leaving room for a 404 fallback.
    pub fn send_file(
        &mut self,
        request: &Request<'_>,
        path: impl AsRef<Path>,
    ) -> Result<bool, ResponseError> {
        let file = match File::open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Ok(false);
        }
        self.send_resource(request, file, metadata.len(), metadata.modified().ok())?;
        Ok(true)
    }
}
