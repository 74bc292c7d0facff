// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// multipart/form-data body parser for print uploads.

use weighbridge_core::error::{Result, WeighbridgeError};

use crate::http::find_subsequence;

/// One form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

impl Part {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).trim().to_owned()
    }
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_owned())
        .filter(|boundary| !boundary.is_empty())
}

pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>> {
    let delimiter = format!("--{boundary}").into_bytes();
    let next_delimiter = format!("\r\n--{boundary}").into_bytes();

    let mut pos = find_subsequence(body, &delimiter)
        .ok_or_else(|| bad("missing opening boundary"))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        let rest = rest
            .strip_prefix(b"\r\n")
            .ok_or_else(|| bad("boundary not followed by CRLF"))?;
        pos += 2;

        let header_end =
            find_subsequence(rest, b"\r\n\r\n").ok_or_else(|| bad("unterminated part headers"))?;
        let headers = String::from_utf8_lossy(&rest[..header_end]);
        let data_start = pos + header_end + 4;

        let data_len = find_subsequence(&body[data_start..], &next_delimiter)
            .ok_or_else(|| bad("missing closing boundary"))?;

        let (name, filename) = content_disposition(&headers)?;
        parts.push(Part {
            name,
            filename,
            data: body[data_start..data_start + data_len].to_vec(),
        });

        pos = data_start + data_len + next_delimiter.len();
    }
}

/// `name` and `filename` from the part's Content-Disposition header.
fn content_disposition(headers: &str) -> Result<(String, Option<String>)> {
    let value = headers
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-disposition"))
        .map(|(_, value)| value)
        .ok_or_else(|| bad("part without content-disposition"))?;

    let mut name = None;
    let mut filename = None;
    for param in header_params(value).into_iter().skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = unquote(raw.trim());
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(raw),
            "filename" => filename = Some(raw),
            _ => {}
        }
    }
    let name = name.ok_or_else(|| bad("part without a name"))?;
    Ok((name, filename))
}

/// Split a header value on `;`, leaving quoted strings intact.
fn header_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

/// Value of a parameter, with one pair of surrounding quotes and any
/// backslash escapes removed.
fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_owned();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            _ => out.push(c),
        }
    }
    out
}

fn bad(reason: &str) -> WeighbridgeError {
    WeighbridgeError::BadRequest(format!("multipart: {reason}"))
}
