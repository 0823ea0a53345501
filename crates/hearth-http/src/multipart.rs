//! `multipart/form-data` decoding.
//!
//! Two stacked [`BoundaryReader`]s split the body: the outer one stops at the
//! closing delimiter `\r\n--boundary--`, the inner one at each part
//! delimiter. Text fields are collected in memory against the POST budget;
//! file parts are spooled to temporary files.

use crate::body::{BodyError, BoundaryReader};
use crate::parser::{self, ParseError};
use crate::query::percent_decode_path;
use hearth_core::UploadedFile;
use log::{trace, warn};
use std::io::{self, Read};
use std::path::PathBuf;

/// Maximum boundary length (RFC 2046).
const MAX_BOUNDARY_LEN: usize = 70;

/// Error from decoding a multipart body.
#[derive(Debug)]
pub enum MultipartError {
    /// Missing boundary in Content-Type header.
    MissingBoundary,
    /// Invalid boundary format.
    InvalidBoundary,
    /// A part without a `name` in its Content-Disposition.
    MissingName,
    /// Invalid part headers.
    InvalidPartHeaders(ParseError),
    /// Text fields exceed the POST limit.
    FieldsTooLarge { size: u64, max: u64 },
    /// Error from the underlying body decoder, including the upload limit.
    Body(BodyError),
    /// I/O error while spooling part data.
    Io(io::Error),
}

impl MultipartError {
    /// The response status for this error, or `None` when the connection
    /// must be dropped without a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::MissingBoundary
            | Self::InvalidBoundary
            | Self::MissingName
            | Self::InvalidPartHeaders(_) => Some(400),
            Self::FieldsTooLarge { .. } | Self::Body(BodyError::TooLarge { .. }) => Some(413),
            Self::Body(_) | Self::Io(_) => None,
        }
    }
}

impl std::fmt::Display for MultipartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingBoundary => write!(f, "missing boundary in multipart Content-Type"),
            Self::InvalidBoundary => write!(f, "invalid multipart boundary"),
            Self::MissingName => write!(f, "multipart part without a field name"),
            Self::InvalidPartHeaders(e) => write!(f, "invalid multipart part headers: {e}"),
            Self::FieldsTooLarge { size, max } => {
                write!(f, "form fields too large: {size} bytes exceeds limit of {max}")
            }
            Self::Body(e) => write!(f, "multipart body error: {e}"),
            Self::Io(e) => write!(f, "multipart I/O error: {e}"),
        }
    }
}

impl std::error::Error for MultipartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPartHeaders(e) => Some(e),
            Self::Body(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MultipartError {
    fn from(e: io::Error) -> Self {
        match BodyError::from(e) {
            BodyError::Io(e) => Self::Io(e),
            other => Self::Body(other),
        }
    }
}

impl From<BodyError> for MultipartError {
    fn from(e: BodyError) -> Self {
        Self::Body(e)
    }
}

/// Extract the boundary parameter from a `multipart/form-data` content type.
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let content_type = content_type.trim();
    let main = content_type.split(';').next().unwrap_or("").trim();
    if !main.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::InvalidBoundary);
    }

    for part in content_type.split(';').skip(1) {
        let Some((k, v)) = part.trim().split_once('=') else {
            continue;
        };
        if k.trim().eq_ignore_ascii_case("boundary") {
            let boundary = v.trim().trim_matches('"').trim_matches('\'');
            if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
                return Err(MultipartError::InvalidBoundary);
            }
            return Ok(boundary.to_string());
        }
    }

    Err(MultipartError::MissingBoundary)
}

/// `name` and `filename` from a part's Content-Disposition value.
///
/// The filename is percent-decoded without `+` translation.
fn parse_content_disposition(value: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut filename = None;

    for part in value.split(';') {
        let Some((key, raw_value)) = part.trim().split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("name") {
            name = Some(unquote(raw_value).to_string());
        } else if key.eq_ignore_ascii_case("filename") {
            filename = Some(percent_decode_path(unquote(raw_value)).into_owned());
        }
    }
    (name, filename)
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Limits applied while decoding.
#[derive(Debug, Clone)]
pub struct MultipartLimits {
    /// Budget for all text fields: name + value + 2 per field. 0 = unlimited.
    pub post_limit: u64,
    /// Size limit of each part's header block.
    pub header_limit: usize,
    /// Directory for spooled uploads; `None` uses the system temp dir.
    pub upload_dir: Option<PathBuf>,
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self {
            post_limit: 2 * 1024 * 1024,
            header_limit: 16 * 1024,
            upload_dir: None,
        }
    }
}

/// Decoded form: text fields in arrival order and spooled uploads.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadedFile>,
}

/// Decode a multipart body.
///
/// A later file with the same field name replaces the earlier one, whose
/// spool file is deleted. On error every file spooled so far is removed.
pub fn read_multipart<R: Read>(
    body: R,
    boundary: &str,
    limits: &MultipartLimits,
) -> Result<MultipartForm, MultipartError> {
    let outer = BoundaryReader::new(body, format!("\r\n--{boundary}--"));
    let mut parts = BoundaryReader::new(outer, format!("--{boundary}\r\n"));
    let mut form = MultipartForm::default();

    // Preamble
    io::copy(&mut parts, &mut io::sink())?;
    if !parts.is_matched() {
        return Ok(form);
    }
    parts.set_sequence(Some(format!("\r\n--{boundary}\r\n").into_bytes()));

    let mut post_size = 0u64;
    loop {
        parts.resume();
        let headers = parser::read_headers(&mut parts, limits.header_limit).map_err(|e| match e {
            ParseError::Io(e) => MultipartError::from(e),
            other => MultipartError::InvalidPartHeaders(other),
        })?;
        let disposition = headers.get("Content-Disposition").unwrap_or("");
        let (name, filename) = parse_content_disposition(disposition);
        let name = name.ok_or(MultipartError::MissingName)?;
        let content_type = headers.get("Content-Type").unwrap_or("text/plain").to_string();

        match filename {
            None => {
                let value = read_field(&mut parts, &name, post_size, limits.post_limit)?;
                post_size += (name.len() + value.len() + 2) as u64;
                trace!("multipart field {name:?}: {} bytes", value.len());
                form.fields.push((name, value));
            }
            Some(filename) => {
                let upload = spool_file(&mut parts, name, filename, content_type, limits)?;
                trace!("multipart upload {:?}: {} bytes", upload.field_name(), upload.len());
                if let Some(pos) = form
                    .files
                    .iter()
                    .position(|f| f.field_name() == upload.field_name())
                {
                    let replaced = form.files.remove(pos);
                    if let Err(e) = replaced.delete() {
                        warn!("failed to delete replaced upload: {e}");
                    }
                }
                form.files.push(upload);
            }
        }

        if parts.is_matched() {
            continue;
        }
        if parts.get_ref().is_matched() {
            return Ok(form);
        }
        return Err(MultipartError::Body(BodyError::UnexpectedEof {
            received: 0,
            expected: None,
        }));
    }
}

fn read_field<R: Read>(
    part: &mut R,
    name: &str,
    post_size: u64,
    post_limit: u64,
) -> Result<String, MultipartError> {
    let mut value = Vec::new();
    if post_limit == 0 {
        part.read_to_end(&mut value)?;
    } else {
        let used = post_size + name.len() as u64 + 2;
        let budget = post_limit.saturating_sub(used);
        part.take(budget + 1).read_to_end(&mut value)?;
        if value.len() as u64 > budget {
            return Err(MultipartError::FieldsTooLarge {
                size: used + value.len() as u64,
                max: post_limit,
            });
        }
    }
    Ok(String::from_utf8_lossy(&value).into_owned())
}

fn spool_file<R: Read>(
    part: &mut R,
    name: String,
    filename: String,
    content_type: String,
    limits: &MultipartLimits,
) -> Result<UploadedFile, MultipartError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("hearth-upload-");
    let spool = match &limits.upload_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    let (mut file, path) = spool.into_parts();
    let len = io::copy(part, &mut file)?;
    Ok(UploadedFile::new(name, filename, content_type, len, path))
}
