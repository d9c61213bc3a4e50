//! Gzip response filter for synchronous HTTP handlers.
//!
//! A [`RequestGate`] sits in front of a [`Handler`]. When the request's
//! `Accept-Encoding` header contains `gzip`, the handler writes into a
//! [`ResponseChannel`] instead of the raw response, and every byte it writes
//! is gzip compressed on its way out.
//!
//! # Example
//!
//! ```ignore
//! use http_gzip_filter::{GzipLayer, HandlerService, HttpResponse, handler_fn};
//! use tower::ServiceBuilder;
//!
//! let handler = handler_fn(|_req: &http::Request<()>, res: &mut dyn HttpResponse| {
//!     res.text_sink()?.write_str("hello world")?;
//!     Ok(())
//! });
//!
//! let service = HandlerService::new(
//!     ServiceBuilder::new()
//!         .layer(GzipLayer::new())
//!         .service(handler),
//! );
//! ```
//!
//! # Response Channel Rules
//!
//! - A handler may use the byte sink or the text sink, never both. Asking for
//!   the second one fails with [`Error::State`].
//! - The gzip encoder is created on first sink access and finished exactly once,
//!   when the channel is finalized after the handler returns.
//! - A handler that writes nothing still produces a valid, empty gzip body.
//! - Pending text is flushed before the encoder, and the encoder writes its
//!   trailer before the underlying response is committed.
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to `gzip`
//! - `Content-Length` header is removed and later attempts to set it are ignored
//! - `Vary` header includes `Accept-Encoding`

#![deny(missing_docs)]

mod channel;
mod charset;
mod encoder;
mod error;
mod gate;
mod layer;
mod response;
mod service;
#[cfg(test)]
mod testing;

pub use channel::ResponseChannel;
pub use charset::{Charset, declared_charset};
pub use encoder::{GzipEncoder, OUTPUT_BUFFER_SIZE};
pub use error::{Error, Result, Sink};
pub use gate::{Handler, HandlerFn, RequestGate, accepts_gzip, handler_fn};
pub use layer::GzipLayer;
pub use response::{BufferedResponse, ByteSink, HttpResponse, TextSink};
pub use service::HandlerService;
