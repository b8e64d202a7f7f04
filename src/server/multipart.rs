//! `multipart/form-data` body parsing.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultipartError {
    #[error("expected a multipart/form-data body")]
    NotMultipart,
    #[error("multipart Content-Type has no boundary")]
    MissingBoundary,
    #[error("malformed multipart body: {0}")]
    Malformed(&'static str),
    #[error("missing form field `{0}`")]
    MissingField(String),
    #[error("form field `{0}` is empty")]
    EmptyField(String),
}

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: &'a [u8],
}

/// Extracts the boundary from a `multipart/form-data` Content-Type header value.
pub fn boundary(content_type: &str) -> Result<&str, MultipartError> {
    let mut params = split_params(content_type);
    let mime = params.next().unwrap_or_default();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()))
        .filter(|b| !b.is_empty())
        .ok_or(MultipartError::MissingBoundary)
}

/// Splits a multipart body into its parts.
///
/// The preamble before the first delimiter and the epilogue after the closing delimiter are
/// ignored. Parts without any headers are allowed.
pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>, MultipartError> {
    let delimiter = format!("--{boundary}");
    let part_end = format!("\r\n--{boundary}");

    let start = find(body, delimiter.as_bytes())
        .ok_or(MultipartError::Malformed("no boundary delimiter found"))?;
    let mut pos = start + delimiter.len();
    let mut parts = Vec::new();
    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }

        // Transport padding may follow the delimiter.
        let padding = rest
            .iter()
            .take_while(|&&b| b == b' ' || b == b'\t')
            .count();
        let rest = &rest[padding..];
        let header_start = if rest.starts_with(b"\r\n") {
            pos + padding + 2
        } else if rest.starts_with(b"\n") {
            pos + padding + 1
        } else {
            return Err(MultipartError::Malformed("garbage after boundary delimiter"));
        };

        let len = find(&body[header_start..], part_end.as_bytes())
            .ok_or(MultipartError::Malformed("unterminated part"))?;
        parts.push(parse_part(&body[header_start..header_start + len])?);
        pos = header_start + len + part_end.len();
    }
}

/// Returns the contents of the form field `name`.
///
/// A field that is present but holds no data is an error, since there is nothing to process.
pub fn field<'a>(parts: &[Part<'a>], name: &str) -> Result<&'a [u8], MultipartError> {
    let part = parts
        .iter()
        .find(|part| part.name.as_deref() == Some(name))
        .ok_or_else(|| MultipartError::MissingField(name.to_string()))?;
    if part.data.is_empty() {
        return Err(MultipartError::EmptyField(name.to_string()));
    }
    Ok(part.data)
}

fn parse_part(raw: &[u8]) -> Result<Part<'_>, MultipartError> {
    let (head, data) = if let Some(data) = raw.strip_prefix(b"\r\n") {
        (&[][..], data)
    } else {
        let end = find(raw, b"\r\n\r\n")
            .ok_or(MultipartError::Malformed("part headers are not terminated"))?;
        (&raw[..end], &raw[end + 4..])
    };

    let head = std::str::from_utf8(head)
        .map_err(|_| MultipartError::Malformed("part headers are not valid UTF-8"))?;
    let mut part = Part {
        name: None,
        filename: None,
        content_type: None,
        data,
    };
    for line in head.split("\r\n").filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or(MultipartError::Malformed("malformed part header"))?;
        let key = key.trim();
        if key.eq_ignore_ascii_case("Content-Disposition") {
            for param in split_params(value).skip(1) {
                let Some((k, v)) = param.split_once('=') else {
                    continue;
                };
                let v = unquote(v.trim()).to_string();
                match k.trim().to_ascii_lowercase().as_str() {
                    "name" => part.name = Some(v),
                    "filename" => part.filename = Some(v),
                    _ => {}
                }
            }
        } else if key.eq_ignore_ascii_case("Content-Type") {
            part.content_type = Some(value.trim().to_string());
        }
    }
    Ok(part)
}

/// Splits a header value at `;`, except inside of quoted strings.
fn split_params(value: &str) -> impl Iterator<Item = &str> {
    let mut in_quotes = false;
    let mut start = 0;
    let mut pieces = Vec::new();
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                pieces.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(value[start..].trim());
    pieces.into_iter()
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"preamble\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"comment\"\r\n\
        \r\n\
        hi\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; filename=\"a;name=x.png\"; name=\"image\"\r\n\
        Content-Type: image/png\r\n\
        \r\n\
        \x89PNG\r\n--not-the-boundary\r\n\
        --XyZ--\r\n";

    #[test]
    fn boundary_from_content_type() {
        assert_eq!(
            boundary("multipart/form-data; boundary=XyZ"),
            Ok("XyZ")
        );
        assert_eq!(
            boundary("Multipart/Form-Data;charset=utf-8; boundary=\"a b\""),
            Ok("a b")
        );
        assert_eq!(
            boundary("application/json"),
            Err(MultipartError::NotMultipart)
        );
        assert_eq!(
            boundary("multipart/form-data"),
            Err(MultipartError::MissingBoundary)
        );
    }

    #[test]
    fn parses_parts() {
        let parts = parse(BODY, "XyZ").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name.as_deref(), Some("comment"));
        assert_eq!(parts[0].data, b"hi");

        // `name` is matched as a parameter, not as a substring of `filename`.
        assert_eq!(parts[1].name.as_deref(), Some("image"));
        assert_eq!(parts[1].filename.as_deref(), Some("a;name=x.png"));
        assert_eq!(parts[1].content_type.as_deref(), Some("image/png"));
        assert_eq!(parts[1].data, b"\x89PNG\r\n--not-the-boundary");

        assert_eq!(field(&parts, "image").unwrap(), b"\x89PNG\r\n--not-the-boundary");
    }

    #[test]
    fn missing_and_empty_fields() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"image\"\r\n\r\n\r\n--b--";
        let parts = parse(body, "b").unwrap();
        assert_eq!(
            field(&parts, "image"),
            Err(MultipartError::EmptyField("image".into()))
        );
        assert_eq!(
            field(&parts, "photo"),
            Err(MultipartError::MissingField("photo".into()))
        );
    }

    #[test]
    fn part_without_headers() {
        let parts = parse(b"--b\r\n\r\ndata\r\n--b--\r\n", "b").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, None);
        assert_eq!(parts[0].data, b"data");
    }

    #[test]
    fn malformed_bodies() {
        assert!(matches!(
            parse(b"no delimiter here", "b"),
            Err(MultipartError::Malformed(_))
        ));
        assert!(matches!(
            parse(b"--b\r\nContent-Disposition: form-data; name=\"image\"\r\n\r\nabc", "b"),
            Err(MultipartError::Malformed(_))
        ));
        assert!(matches!(
            parse(b"--bjunk\r\n\r\n\r\n--b--", "b"),
            Err(MultipartError::Malformed(_))
        ));
    }
}
