use encoding_rs::{Encoding, UTF_8};
use http::{HeaderMap, header};
use mime::Mime;
use std::borrow::Cow;
use std::fmt;
use std::io;

/// Character encoding text sinks write with.
///
/// Labels are resolved the way browsers resolve them, so `latin1`,
/// `ISO-8859-1` and `us-ascii` all map to `windows-1252`. Only encodings that
/// can also be produced are accepted; `UTF-16` and the replacement encoding
/// are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charset(&'static Encoding);

impl Charset {
    /// Looks up a charset by label, ignoring case and surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Charset> {
        Encoding::for_label_no_replacement(label.as_bytes())
            .filter(|encoding| encoding.output_encoding() == *encoding)
            .map(Charset)
    }

    /// Picks the charset for a declared label, falling back to UTF-8.
    pub fn resolve(declared: Option<&str>) -> io::Result<Charset> {
        match declared {
            None => Ok(Charset::default()),
            Some(label) => Charset::from_label(label).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported charset: {label}"),
                )
            }),
        }
    }

    /// Canonical name of the charset.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// The underlying encoding.
    pub fn encoding(&self) -> &'static Encoding {
        self.0
    }

    /// Encodes `s` in this charset.
    ///
    /// Characters the charset cannot represent are written as HTML numeric
    /// character references (`&#10003;`). UTF-8 input is borrowed as is.
    pub fn encode<'s>(&self, s: &'s str) -> Cow<'s, [u8]> {
        let (bytes, _, _) = self.0.encode(s);
        bytes
    }
}

impl Default for Charset {
    fn default() -> Self {
        Charset(UTF_8)
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the `charset` parameter of the `Content-Type` header, if any.
pub fn declared_charset(headers: &HeaderMap) -> Option<String> {
    let content_type: Mime = headers
        .get(header::CONTENT_TYPE)?
        .to_str()
        .ok()?
        .parse()
        .ok()?;

    let charset = content_type.get_param(mime::CHARSET)?;
    let charset = charset.as_str().trim_matches('"');
    (!charset.is_empty()).then(|| charset.to_owned())
}
