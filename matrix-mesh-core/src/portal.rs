//! Captive-portal web form for pushing a custom pattern.
//!
//! Routes:
//! - `GET /` form with the current custom pattern in the textarea
//! - `POST /` with url-encoded field `state`: install and rebroadcast it
//! - `GET /clear` drop the custom pattern, back to the built-in rotation
//!
//! Requests are parsed from one bounded buffer; responses close the connection.

use core::fmt::{self, Write};

use heapless::{String, Vec};
use log::{debug, info};

use crate::node::{MeshNode, MAX_PATTERN_TEXT_LEN};
use crate::pattern::PATTERN_SIDE;
use crate::render::CoordinateMap;

/// Largest request accepted, headers and body together
pub const MAX_REQUEST_LEN: usize = 4096;

/// Room needed for the largest response
pub const MAX_RESPONSE_LEN: usize = 2048 + MAX_PATTERN_TEXT_LEN + MAX_STATE_LEN;

/// Form field carrying the pattern text
pub const STATE_FIELD: &str = "state";

/// Decoded form field size: browsers end textarea lines with `\r\n`
pub const MAX_STATE_LEN: usize = PATTERN_SIDE * (PATTERN_SIDE + 2);

const STATE_PLACEHOLDER: &str = "$STATE";

const FORM: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Board admin</title>
    <style>
        body { font-family: sans-serif; background: #16213e; color: #fff; padding: 20px; }
        textarea { font-family: monospace; line-height: 1; background: #0f3460; color: #fff; }
        a { color: #e94560; }
    </style>
</head>
<body>
    <h3>State</h3>
    <form action="/" method="post">
        <textarea rows="32" cols="32" name="state">$STATE</textarea>
        <p><input type="submit" value="Update"></p>
    </form>
    <p>Use <code>*</code> for a lit cell and a space for an unlit one. <a href="/clear">Back to rotation</a></p>
</body>
</html>
"#;

/// Errors that can occur while reading a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalError {
    /// Headers or body not fully received yet
    Incomplete,
    /// Request line or headers unreadable
    Malformed,
    /// Request does not fit [`MAX_REQUEST_LEN`]
    TooLarge,
    /// Response does not fit the output buffer
    ResponseTooLarge,
}

impl From<fmt::Error> for PortalError {
    fn from(_: fmt::Error) -> Self {
        PortalError::ResponseTooLarge
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

/// HTTP status codes the portal answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    PayloadTooLarge,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::PayloadTooLarge => 413,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::PayloadTooLarge => "Payload Too Large",
        }
    }
}

/// What a request asks the portal to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ShowForm,
    Submit,
    Clear,
    NotFound,
}

/// A fully received request borrowing the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: Method,
    pub path: &'a str,
    pub body: &'a [u8],
}

impl<'a> Request<'a> {
    /// Parse `buffer` once it holds the headers and the whole body.
    ///
    /// Returns [`PortalError::Incomplete`] while more bytes are needed.
    pub fn parse(buffer: &'a [u8]) -> Result<Self, PortalError> {
        let Some(header_end) = find(buffer, b"\r\n\r\n") else {
            if buffer.len() >= MAX_REQUEST_LEN {
                return Err(PortalError::TooLarge);
            }
            return Err(PortalError::Incomplete);
        };
        let head = core::str::from_utf8(&buffer[..header_end]).map_err(|_| PortalError::Malformed)?;
        let mut lines = head.split("\r\n");

        let mut request_line = lines.next().ok_or(PortalError::Malformed)?.split(' ');
        let method = match request_line.next() {
            Some("GET") => Method::Get,
            Some("POST") => Method::Post,
            Some(_) => Method::Other,
            None => return Err(PortalError::Malformed),
        };
        let target = request_line.next().ok_or(PortalError::Malformed)?;
        let path = target.split('?').next().unwrap_or(target);

        let mut content_length = 0;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| PortalError::Malformed)?;
            }
        }

        let body_start = header_end + 4;
        if body_start + content_length > MAX_REQUEST_LEN {
            return Err(PortalError::TooLarge);
        }
        let body_end = body_start + content_length;
        if buffer.len() < body_end {
            return Err(PortalError::Incomplete);
        }

        Ok(Self {
            method,
            path,
            body: &buffer[body_start..body_end],
        })
    }

    pub fn route(&self) -> Route {
        match (self.method, self.path) {
            (Method::Get, "/") => Route::ShowForm,
            (Method::Post, "/") => Route::Submit,
            (Method::Get, "/clear") => Route::Clear,
            _ => Route::NotFound,
        }
    }
}

/// Look up `name` in an `application/x-www-form-urlencoded` body and decode it
pub fn form_field<const N: usize>(body: &[u8], name: &str) -> Option<String<N>> {
    let body = core::str::from_utf8(body).ok()?;
    body.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then(|| url_decode(value))
    })
}

/// Decode `+` and `%XX` escapes. Output past `N` bytes is cut off.
pub fn url_decode<const N: usize>(encoded: &str) -> String<N> {
    let mut bytes: Vec<u8, N> = Vec::new();
    let mut input = encoded.bytes();

    while let Some(byte) = input.next() {
        let decoded = match byte {
            b'+' => b' ',
            b'%' => {
                let high = input.next().and_then(hex_value);
                let low = input.next().and_then(hex_value);
                match (high, low) {
                    (Some(high), Some(low)) => high << 4 | low,
                    _ => continue,
                }
            }
            other => other,
        };
        if bytes.push(decoded).is_err() {
            break;
        }
    }

    // a cut in the middle of a multi-byte character drops the tail
    match core::str::from_utf8(&bytes) {
        Ok(text) => String::try_from(text).unwrap_or_default(),
        Err(err) => String::try_from(core::str::from_utf8(&bytes[..err.valid_up_to()]).unwrap_or(""))
            .unwrap_or_default(),
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|digit| digit as u8)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Write the status line and headers
pub fn write_head<W: Write>(out: &mut W, status: Status, content_type: &str) -> fmt::Result {
    write!(
        out,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
        status.code(),
        status.reason(),
        content_type
    )
}

/// Write the form with `state` in the textarea
pub fn render_form<W: Write>(out: &mut W, state: &str) -> fmt::Result {
    let (before, after) = FORM.split_once(STATE_PLACEHOLDER).unwrap_or((FORM, ""));
    out.write_str(before)?;
    for ch in state.chars() {
        match ch {
            '<' => out.write_str("&lt;")?,
            '>' => out.write_str("&gt;")?,
            '&' => out.write_str("&amp;")?,
            other => out.write_char(other)?,
        }
    }
    out.write_str(after)
}

/// Answer for a request that could not be read
pub fn write_error<W: Write>(out: &mut W, error: PortalError) -> fmt::Result {
    let status = match error {
        PortalError::TooLarge => Status::PayloadTooLarge,
        _ => Status::BadRequest,
    };
    write_head(out, status, "text/plain")?;
    out.write_str(status.reason())
}

/// Serve one request against `node`, writing the whole response into `out`.
pub fn respond<M: CoordinateMap, W: Write>(
    request: &Request<'_>,
    node: &mut MeshNode<M>,
    out: &mut W,
) -> Result<Status, PortalError> {
    let status = match request.route() {
        Route::ShowForm => {
            write_head(out, Status::Ok, "text/html")?;
            render_form(out, &node.custom_text())?;
            Status::Ok
        }
        Route::Submit => match form_field::<MAX_STATE_LEN>(request.body, STATE_FIELD) {
            Some(state) => {
                info!("Portal: new pattern submitted ({} bytes)", state.len());
                node.submit_custom_pattern(&state);
                write_head(out, Status::Ok, "text/plain")?;
                write!(out, "OK, updated state to \n{}", state)?;
                Status::Ok
            }
            None => {
                write_head(out, Status::BadRequest, "text/plain")?;
                out.write_str("Missing param")?;
                Status::BadRequest
            }
        },
        Route::Clear => {
            node.clear_custom_pattern();
            write_head(out, Status::Ok, "text/html")?;
            render_form(out, "")?;
            Status::Ok
        }
        Route::NotFound => {
            debug!("Portal: no route for {:?} {}", request.method, request.path);
            write_head(out, Status::NotFound, "text/plain")?;
            out.write_str("Not Found")?;
            Status::NotFound
        }
    };
    Ok(status)
}
