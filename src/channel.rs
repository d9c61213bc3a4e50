use crate::charset::Charset;
use crate::encoder::{GzipEncoder, OUTPUT_BUFFER_SIZE};
use crate::error::{Error, Result, Sink, is_tagged};
use crate::response::{ByteSink, HttpResponse, TextSink};
use compression_core::Level;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use std::cell::Cell;
use std::fmt;
use std::io::{self, Write};
use tracing::Span;

/// Which sink the handler picked, together with the encoder behind it.
enum SinkState {
    /// No sink handed out yet.
    Idle,
    /// Binary output, fed straight into the encoder.
    Bytes(GzipEncoder),
    /// Character output, staged in `pending` before it reaches the encoder.
    Text {
        encoder: GzipEncoder,
        charset: Charset,
        pending: Vec<u8>,
    },
}

/// Logs failures under the channel's span and remembers that it did.
struct Reporter {
    span: Span,
    logged: Cell<bool>,
}

impl Reporter {
    fn log(&self, sink: Sink, err: &dyn fmt::Display, message: &str) {
        self.logged.set(true);
        tracing::error!(parent: &self.span, sink = %sink, error = %err, "{message}");
    }

    /// Logs a failure reported by the wrapped response. I/O failures are
    /// retagged with `sink`.
    fn reraise(&self, sink: Sink, err: Error, message: &str) -> Error {
        self.log(sink, &err, message);
        match err {
            Error::Io { source, .. } => Error::io(sink, source),
            other => other,
        }
    }

    /// Logs a fresh write failure and tags it with `sink`. Already tagged
    /// failures were logged where they were tagged and pass through.
    fn fail(&self, sink: Sink, err: io::Error, message: &str) -> io::Error {
        if is_tagged(&err) {
            return err;
        }
        self.log(sink, &err, message);
        Error::io(sink, err).into_io()
    }
}

/// A response whose body is gzip compressed on its way to the transport.
///
/// The encoder is created the first time a sink is requested. Once a sink
/// kind has been chosen the other one is refused with [`Error::State`].
/// [`finalize`](ResponseChannel::finalize) writes the gzip trailer and commits
/// the underlying response.
pub struct ResponseChannel<'a, R: ?Sized> {
    response: &'a mut R,
    state: SinkState,
    level: Level,
    reporter: Reporter,
}

impl<'a, R> ResponseChannel<'a, R>
where
    R: HttpResponse + ?Sized,
{
    /// Wraps `response`. Events are recorded under `span`.
    pub fn new(response: &'a mut R, level: Level, span: Span) -> Self {
        Self {
            response,
            state: SinkState::Idle,
            level,
            reporter: Reporter {
                span,
                logged: Cell::new(false),
            },
        }
    }

    /// Returns the wrapped response.
    pub fn inner(&self) -> &R {
        self.response
    }

    /// Whether a failure has already been logged by this channel.
    pub fn has_logged_failure(&self) -> bool {
        self.reporter.logged.get()
    }

    /// Finishes the gzip stream and commits the underlying response.
    ///
    /// Pending text goes first, then the encoder writes its trailer, then the
    /// transport is flushed. A handler that wrote nothing still produces a
    /// valid, empty gzip stream.
    pub fn finalize(mut self) -> Result<()> {
        if let SinkState::Idle = self.state {
            self.state = SinkState::Bytes(self.open_encoder(Sink::Encoder)?);
        }

        if let Some(mut writer) = self.writer() {
            writer.finish()?;
        }

        if let SinkState::Bytes(encoder) | SinkState::Text { encoder, .. } = &self.state {
            tracing::debug!(
                parent: &self.reporter.span,
                bytes_in = encoder.bytes_in(),
                bytes_out = encoder.bytes_out(),
                "gzip stream finished"
            );
        }

        self.commit()
    }

    fn open_encoder(&mut self, sink: Sink) -> Result<GzipEncoder> {
        // Make sure the transport hands out its raw output before committing to gzip.
        let opened = self.response.byte_sink().map(drop);
        if let Err(err) = opened {
            return Err(self
                .reporter
                .reraise(sink, err, "failed to open gzip output stream"));
        }

        tracing::trace!(parent: &self.reporter.span, sink = %sink, "gzip output stream opened");
        Ok(GzipEncoder::new(self.level))
    }

    fn writer(&mut self) -> Option<GzipWriter<'_, R>> {
        let (encoder, pending, sink) = match &mut self.state {
            SinkState::Idle => return None,
            SinkState::Bytes(encoder) => (encoder, None, Sink::Bytes),
            SinkState::Text {
                encoder, pending, ..
            } => (encoder, Some(pending), Sink::Text),
        };

        Some(GzipWriter {
            encoder,
            pending,
            response: &mut *self.response,
            reporter: &self.reporter,
            sink,
        })
    }

    fn commit(&mut self) -> Result<()> {
        self.response.flush_buffer().map_err(|err| {
            self.reporter
                .reraise(Sink::Transport, err, "failed to flush response buffer")
        })
    }

    fn swallows(&self, name: &HeaderName) -> bool {
        if *name == header::CONTENT_LENGTH {
            tracing::trace!(
                parent: &self.reporter.span,
                "ignoring content length on gzip response"
            );
            return true;
        }
        false
    }
}

impl<R> HttpResponse for ResponseChannel<'_, R>
where
    R: HttpResponse + ?Sized,
{
    fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.swallows(&name) {
            self.response.set_header(name, value);
        }
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.swallows(&name) {
            self.response.append_header(name, value);
        }
    }

    fn remove_header(&mut self, name: &HeaderName) {
        self.response.remove_header(name);
    }

    fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    fn set_content_length(&mut self, _len: u64) {
        // Compressed length is unknown until the encoder finishes.
    }

    fn character_encoding(&self) -> Option<String> {
        self.response.character_encoding()
    }

    fn byte_sink(&mut self) -> Result<ByteSink<'_>> {
        if let SinkState::Idle = self.state {
            self.state = SinkState::Bytes(self.open_encoder(Sink::Bytes)?);
        }

        match self.writer() {
            Some(writer) if writer.sink == Sink::Bytes => Ok(ByteSink::new(writer)),
            _ => Err(Error::State {
                requested: Sink::Bytes,
                active: Sink::Text,
            }),
        }
    }

    fn text_sink(&mut self) -> Result<TextSink<'_>> {
        if let SinkState::Idle = self.state {
            let declared = self.response.character_encoding();
            let charset = Charset::resolve(declared.as_deref()).map_err(|err| {
                self.reporter.log(Sink::Text, &err, "failed to create text sink");
                Error::io(Sink::Text, err)
            })?;
            let encoder = self.open_encoder(Sink::Text)?;
            self.state = SinkState::Text {
                encoder,
                charset,
                pending: Vec::with_capacity(OUTPUT_BUFFER_SIZE),
            };
        }

        let charset = match self.state {
            SinkState::Text { charset, .. } => charset,
            _ => {
                return Err(Error::State {
                    requested: Sink::Text,
                    active: Sink::Bytes,
                });
            }
        };

        match self.writer() {
            Some(writer) => Ok(TextSink::new(writer, charset)),
            None => Err(Error::State {
                requested: Sink::Text,
                active: Sink::Bytes,
            }),
        }
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer() {
            writer.flush()?;
        }
        self.commit()
    }
}

/// Routes sink writes through the encoder into the transport's raw output.
///
/// In text mode bytes are staged in `pending` and only reach the encoder when
/// the buffer would overflow or on flush.
struct GzipWriter<'c, R: ?Sized> {
    encoder: &'c mut GzipEncoder,
    pending: Option<&'c mut Vec<u8>>,
    response: &'c mut R,
    reporter: &'c Reporter,
    sink: Sink,
}

/// Reacquires the transport's raw output for one encoder call.
fn raw_output<'r, R>(response: &'r mut R, reporter: &Reporter) -> io::Result<ByteSink<'r>>
where
    R: HttpResponse + ?Sized,
{
    response.byte_sink().map_err(|err| {
        reporter
            .reraise(Sink::Transport, err, "failed to reopen transport output")
            .into_io()
    })
}

impl<R> GzipWriter<'_, R>
where
    R: HttpResponse + ?Sized,
{
    fn compress(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut raw = raw_output(&mut *self.response, self.reporter)?;
        self.encoder.write(buf, &mut raw)
    }

    fn spill(&mut self) -> io::Result<()> {
        let Self {
            encoder,
            pending,
            response,
            reporter,
            ..
        } = self;

        if let Some(pending) = pending.as_deref_mut().filter(|p| !p.is_empty()) {
            let mut raw = raw_output(&mut **response, *reporter)?;
            encoder.write(pending, &mut raw)?;
            pending.clear();
        }
        Ok(())
    }

    fn drain(&mut self) -> io::Result<()> {
        self.spill()?;
        let mut raw = raw_output(&mut *self.response, self.reporter)?;
        self.encoder.flush(&mut raw)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.spill().map_err(|err| self.fail(err))?;
        let reporter = self.reporter;
        let mut raw = raw_output(&mut *self.response, reporter)?;
        self.encoder
            .finish(&mut raw)
            .map_err(|err| reporter.fail(Sink::Encoder, err, "failed to close gzip output stream"))
    }

    fn fail(&self, err: io::Error) -> io::Error {
        self.reporter
            .fail(self.sink, err, "failed to write gzip output")
    }
}

impl<R> Write for GzipWriter<'_, R>
where
    R: HttpResponse + ?Sized,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(staged) = self.pending.as_deref().map(Vec::len) else {
            self.compress(buf).map_err(|err| self.fail(err))?;
            return Ok(buf.len());
        };

        // Make room first so a failed write leaves `pending` as it was.
        if staged + buf.len() >= OUTPUT_BUFFER_SIZE {
            self.spill().map_err(|err| self.fail(err))?;
        }

        if buf.len() >= OUTPUT_BUFFER_SIZE {
            self.compress(buf).map_err(|err| self.fail(err))?;
        } else if let Some(pending) = self.pending.as_deref_mut() {
            pending.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain().map_err(|err| self.fail(err))
    }
}
