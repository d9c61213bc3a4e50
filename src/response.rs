use crate::charset::{Charset, declared_charset};
use crate::error::{Error, Result, Sink};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use std::fmt;
use std::io::{self, Write};

/// The response-writing surface handed to request handlers.
///
/// A handler may use exactly one of [`byte_sink`](HttpResponse::byte_sink) or
/// [`text_sink`](HttpResponse::text_sink) per response; asking for the other
/// one afterwards fails with [`Error::State`].
pub trait HttpResponse {
    /// Returns the response headers.
    fn headers(&self) -> &HeaderMap;

    /// Returns a single header value.
    fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers().get(name)
    }

    /// Sets a header, replacing any previous values.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Adds a header value, keeping previous values.
    fn append_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Removes all values of a header.
    fn remove_header(&mut self, name: &HeaderName);

    /// Sets the response status.
    fn set_status(&mut self, status: StatusCode);

    /// Declares the body length.
    fn set_content_length(&mut self, len: u64) {
        self.set_header(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    /// Returns the charset declared in `Content-Type`, if any.
    fn character_encoding(&self) -> Option<String> {
        declared_charset(self.headers())
    }

    /// Returns the binary output sink.
    fn byte_sink(&mut self) -> Result<ByteSink<'_>>;

    /// Returns the character output sink.
    fn text_sink(&mut self) -> Result<TextSink<'_>>;

    /// Pushes everything written so far to the client.
    fn flush_buffer(&mut self) -> Result<()>;
}

/// Binary output of a response.
pub struct ByteSink<'a> {
    inner: Box<dyn Write + 'a>,
}

impl<'a> ByteSink<'a> {
    /// Wraps a writer.
    pub fn new(inner: impl Write + 'a) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Write for ByteSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl fmt::Debug for ByteSink<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSink").finish_non_exhaustive()
    }
}

/// Character output of a response, encoding text with the response charset.
pub struct TextSink<'a> {
    inner: Box<dyn Write + 'a>,
    charset: Charset,
}

impl<'a> TextSink<'a> {
    /// Wraps a writer, encoding text with `charset`.
    pub fn new(inner: impl Write + 'a, charset: Charset) -> Self {
        Self {
            inner: Box::new(inner),
            charset,
        }
    }

    /// The charset text is encoded with.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Writes a string.
    pub fn write_str(&mut self, s: &str) -> io::Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        self.inner.write_all(&self.charset.encode(s))
    }

    /// Writes a single character.
    pub fn write_char(&mut self, c: char) -> io::Result<()> {
        self.write_str(c.encode_utf8(&mut [0u8; 4]))
    }

    /// Writes formatted text. This is what `write!` calls.
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        match args.as_str() {
            Some(s) => self.write_str(s),
            None => self.write_str(&args.to_string()),
        }
    }

    /// Flushes buffered text down to the transport.
    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl fmt::Debug for TextSink<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextSink")
            .field("charset", &self.charset.name())
            .finish_non_exhaustive()
    }
}

/// An in-memory response: headers and body are kept until
/// [`into_response`](BufferedResponse::into_response) turns them into an
/// [`http::Response`].
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    active: Option<Sink>,
    committed: bool,
}

impl BufferedResponse {
    /// Creates an empty `200 OK` response.
    pub fn new() -> Self {
        Self::default()
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[cfg(test)]
    pub(crate) fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    /// Whether [`flush_buffer`](HttpResponse::flush_buffer) has been called.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Converts into an [`http::Response`].
    pub fn into_response(self) -> http::Response<Bytes> {
        let mut response = http::Response::new(Bytes::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    fn claim(&mut self, requested: Sink) -> Result<()> {
        match self.active {
            Some(active) if active != requested => Err(Error::State { requested, active }),
            _ => {
                self.active = Some(requested);
                Ok(())
            }
        }
    }
}

impl HttpResponse for BufferedResponse {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    fn remove_header(&mut self, name: &HeaderName) {
        self.headers.remove(name);
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn byte_sink(&mut self) -> Result<ByteSink<'_>> {
        self.claim(Sink::Bytes)?;
        Ok(ByteSink::new(&mut self.body))
    }

    fn text_sink(&mut self) -> Result<TextSink<'_>> {
        let charset = Charset::resolve(self.character_encoding().as_deref())
            .map_err(|err| Error::io(Sink::Text, err))?;
        self.claim(Sink::Text)?;
        Ok(TextSink::new(&mut self.body, charset))
    }

    fn flush_buffer(&mut self) -> Result<()> {
        self.committed = true;
        Ok(())
    }
}
