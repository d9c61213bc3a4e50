use std::fmt;
use std::io;

/// Result type alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Identifies which sink an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// The binary output sink.
    Bytes,
    /// The character output sink.
    Text,
    /// The gzip encoder sitting between a sink and the transport.
    Encoder,
    /// The transport-level response itself.
    Transport,
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sink::Bytes => "byte",
            Sink::Text => "text",
            Sink::Encoder => "encoder",
            Sink::Transport => "transport",
        })
    }
}

/// Errors raised while writing a response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A sink was requested after the mutually exclusive one was chosen.
    #[error("cannot acquire {requested} sink: {active} sink already in use")]
    State {
        /// The sink the caller asked for.
        requested: Sink,
        /// The sink that was already handed out.
        active: Sink,
    },

    /// Writing, flushing or closing the output failed.
    #[error("I/O failure on {sink} sink: {source}")]
    Io {
        /// The sink that failed.
        sink: Sink,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },

    /// The downstream handler failed.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Creates an I/O error tagged with the failing sink.
    pub fn io(sink: Sink, source: io::Error) -> Self {
        Error::Io { sink, source }
    }

    /// Wraps an arbitrary downstream failure.
    pub fn handler(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Handler(err.into())
    }

    /// Returns true for I/O failures.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io { .. })
    }

    /// Status code to answer with when the response can still be replaced.
    pub fn status_code(&self) -> http::StatusCode {
        http::StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Packs this error into an [`io::Error`] so it can travel through
    /// [`std::io::Write`]. Converting back with `From` restores it.
    pub(crate) fn into_io(self) -> io::Error {
        let kind = match &self {
            Error::Io { source, .. } => source.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

/// Returns true if `err` already carries an [`Error`].
pub(crate) fn is_tagged(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<Error>())
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if !is_tagged(&err) {
            return Error::Handler(Box::new(err));
        }

        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Error::Handler(other),
            None => Error::Handler("I/O failure without details".into()),
        }
    }
}
