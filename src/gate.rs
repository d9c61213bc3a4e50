use crate::channel::ResponseChannel;
use crate::error::{Error, Result};
use crate::response::HttpResponse;
use compression_core::Level;
use http::{HeaderMap, HeaderValue, Request, header};
use tracing::Span;

/// A synchronous request handler writing into an [`HttpResponse`].
pub trait Handler<B> {
    /// Handles `req`, writing the answer into `res`.
    fn handle(&self, req: &Request<B>, res: &mut dyn HttpResponse) -> Result<()>;
}

impl<B, H> Handler<B> for &H
where
    H: Handler<B> + ?Sized,
{
    fn handle(&self, req: &Request<B>, res: &mut dyn HttpResponse) -> Result<()> {
        (**self).handle(req, res)
    }
}

/// A [`Handler`] backed by a closure. See [`handler_fn`].
#[derive(Debug, Clone, Copy)]
pub struct HandlerFn<F> {
    f: F,
}

/// Turns a closure into a [`Handler`].
pub fn handler_fn<B, F>(f: F) -> HandlerFn<F>
where
    F: Fn(&Request<B>, &mut dyn HttpResponse) -> Result<()>,
{
    HandlerFn { f }
}

impl<B, F> Handler<B> for HandlerFn<F>
where
    F: Fn(&Request<B>, &mut dyn HttpResponse) -> Result<()>,
{
    fn handle(&self, req: &Request<B>, res: &mut dyn HttpResponse) -> Result<()> {
        (self.f)(req, res)
    }
}

/// Gzip compresses responses for clients that accept it.
///
/// When `Accept-Encoding` mentions `gzip` the inner handler writes into a
/// [`ResponseChannel`], which is finalized after the handler returns.
/// Otherwise the inner handler gets the response untouched.
#[derive(Debug, Clone)]
pub struct RequestGate<H> {
    inner: H,
    level: Level,
    span: Span,
}

impl<H> RequestGate<H> {
    /// Creates a gate in front of `inner`.
    pub fn new(inner: H, level: Level, span: Span) -> Self {
        Self { inner, level, span }
    }

    /// Returns a reference to the inner handler.
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Consumes this gate, returning the inner handler.
    pub fn into_inner(self) -> H {
        self.inner
    }

    fn report(&self, err: &Error) {
        tracing::error!(parent: &self.span, error = %err, "request handler failed");
    }
}

impl<B, H> Handler<B> for RequestGate<H>
where
    H: Handler<B>,
{
    fn handle(&self, req: &Request<B>, res: &mut dyn HttpResponse) -> Result<()> {
        if !accepts_gzip(req.headers()) {
            return self
                .inner
                .handle(req, res)
                .inspect_err(|err| self.report(err));
        }

        tracing::trace!(parent: &self.span, uri = %req.uri(), "gzip compression enabled");

        // Headers go out before the first body byte.
        res.set_header(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        res.remove_header(&header::CONTENT_LENGTH);
        add_vary_accept_encoding(res);

        let mut channel = ResponseChannel::new(res, self.level, self.span.clone());
        if let Err(err) = self.inner.handle(req, &mut channel) {
            // Failures inside the channel were logged where they happened.
            if !channel.has_logged_failure() {
                self.report(&err);
            }
            return Err(err);
        }
        channel.finalize()
    }
}

/// Returns true if the request's `Accept-Encoding` contains `gzip`.
///
/// This is a plain, case-sensitive substring test; quality values are not
/// parsed, so `gzip;q=0` still counts.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"))
}

/// Adds Accept-Encoding to the Vary header if not already present.
fn add_vary_accept_encoding(res: &mut dyn HttpResponse) {
    let listed = res.headers().get_all(header::VARY).iter().any(|vary| {
        vary.to_str().is_ok_and(|vary| {
            vary.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            })
        })
    });

    if !listed {
        res.append_header(
            header::VARY,
            HeaderValue::from_static("accept-encoding"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Sink;
    use crate::response::BufferedResponse;
    use crate::testing::ErrorCounter;
    use std::io::{self, Read, Write};

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn request(accept_encoding: Option<&'static str>) -> Request<()> {
        let mut builder = Request::builder().uri("/greeting");
        if let Some(value) = accept_encoding {
            builder = builder.header(header::ACCEPT_ENCODING, value);
        }
        builder.body(()).unwrap()
    }

    fn gate<H>(inner: H) -> RequestGate<H> {
        RequestGate::new(inner, Level::Default, Span::none())
    }

    fn hello_text() -> HandlerFn<impl Fn(&Request<()>, &mut dyn HttpResponse) -> Result<()>> {
        handler_fn(|_: &Request<()>, res: &mut dyn HttpResponse| {
            res.set_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            res.text_sink()?.write_str("hello world")?;
            Ok(())
        })
    }

    #[test]
    fn test_accepts_gzip() {
        assert!(accepts_gzip(request(Some("gzip")).headers()));
        assert!(accepts_gzip(request(Some("gzip,deflate")).headers()));
        assert!(accepts_gzip(request(Some("br, x-gzip")).headers()));
        assert!(accepts_gzip(request(Some("gzip;q=0")).headers()));
        assert!(!accepts_gzip(request(Some("GZIP")).headers()));
        assert!(!accepts_gzip(request(Some("deflate, br")).headers()));
        assert!(!accepts_gzip(request(None).headers()));
    }

    #[test]
    fn test_text_handler_compressed() {
        let mut response = BufferedResponse::new();
        gate(hello_text())
            .handle(&request(Some("gzip,deflate")), &mut response)
            .unwrap();

        assert_eq!(response.header(&header::CONTENT_ENCODING).unwrap(), "gzip");
        assert!(response.is_committed());
        assert_eq!(gunzip(response.body()), b"hello world");
    }

    #[test]
    fn test_no_gzip_passes_through() {
        let mut response = BufferedResponse::new();
        gate(hello_text())
            .handle(&request(Some("deflate")), &mut response)
            .unwrap();

        assert!(response.header(&header::CONTENT_ENCODING).is_none());
        assert!(response.header(&header::VARY).is_none());
        assert_eq!(response.body(), b"hello world");
    }

    #[test]
    fn test_byte_handler_compressed() {
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 199) as u8).collect();
        let expected = payload.clone();
        let handler = handler_fn(move |_: &Request<()>, res: &mut dyn HttpResponse| {
            let mut sink = res.byte_sink()?;
            for chunk in payload.chunks(4096) {
                sink.write_all(chunk)?;
                sink.flush()?;
            }
            Ok(())
        });

        let mut response = BufferedResponse::new();
        gate(handler)
            .handle(&request(Some("gzip")), &mut response)
            .unwrap();

        assert_eq!(gunzip(response.body()), expected);
    }

    #[test]
    fn test_empty_handler_still_finalized() {
        let handler = handler_fn(|_: &Request<()>, _: &mut dyn HttpResponse| Ok(()));

        let mut response = BufferedResponse::new();
        gate(handler)
            .handle(&request(Some("gzip")), &mut response)
            .unwrap();

        assert!(response.is_committed());
        assert!(!response.body().is_empty());
        assert!(gunzip(response.body()).is_empty());
    }

    #[test]
    fn test_content_length_dropped() {
        let handler = handler_fn(|_: &Request<()>, res: &mut dyn HttpResponse| {
            res.set_content_length(5);
            res.byte_sink()?.write_all(b"hello")?;
            Ok(())
        });

        let mut response = BufferedResponse::new();
        response.set_content_length(5);
        gate(handler)
            .handle(&request(Some("gzip")), &mut response)
            .unwrap();

        assert!(response.header(&header::CONTENT_LENGTH).is_none());
        assert_eq!(gunzip(response.body()), b"hello");
    }

    #[test]
    fn test_vary_header_added() {
        let mut response = BufferedResponse::new();
        response.append_header(header::VARY, HeaderValue::from_static("origin"));
        gate(hello_text())
            .handle(&request(Some("gzip")), &mut response)
            .unwrap();

        let vary_values: Vec<_> = response
            .headers()
            .get_all(header::VARY)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(vary_values, vec!["origin", "accept-encoding"]);
    }

    #[test]
    fn test_vary_header_not_duplicated() {
        let mut response = BufferedResponse::new();
        response.append_header(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        gate(hello_text())
            .handle(&request(Some("gzip")), &mut response)
            .unwrap();

        assert_eq!(response.headers().get_all(header::VARY).iter().count(), 1);
    }

    #[test]
    fn test_mixed_sinks_fail_with_state_error() {
        let handler = handler_fn(|_: &Request<()>, res: &mut dyn HttpResponse| {
            res.byte_sink()?.write_all(b"binary")?;
            res.text_sink()?.write_str("text")?;
            Ok(())
        });

        let mut response = BufferedResponse::new();
        let err = gate(handler)
            .handle(&request(Some("gzip")), &mut response)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::State {
                requested: Sink::Text,
                active: Sink::Bytes,
            }
        ));
        assert_eq!(err.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_handler_error_returned_unchanged() {
        let handler = handler_fn(|_: &Request<()>, _: &mut dyn HttpResponse| {
            Err(Error::handler("template missing"))
        });

        for accept in [Some("gzip"), None] {
            let mut response = BufferedResponse::new();
            let err = gate(&handler)
                .handle(&request(accept), &mut response)
                .unwrap_err();

            assert_eq!(err.to_string(), "handler failed: template missing");
            assert!(!response.is_committed());
            assert!(response.body().is_empty());
        }
    }

    #[test]
    fn test_sink_failure_logged_once_on_both_paths() {
        let handler = handler_fn(|_: &Request<()>, res: &mut dyn HttpResponse| {
            res.set_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=x-no-such-charset"),
            );
            res.text_sink()?.write_str("unreachable")?;
            Ok(())
        });

        for accept in [Some("gzip"), None] {
            let mut response = BufferedResponse::new();
            let (result, errors) =
                ErrorCounter::count(|| gate(&handler).handle(&request(accept), &mut response));

            assert!(matches!(result, Err(Error::Io { sink: Sink::Text, .. })));
            assert_eq!(errors, 1, "accept-encoding {accept:?}");
        }
    }

    #[test]
    fn test_handler_io_error_logged_once() {
        let handler = handler_fn(|_: &Request<()>, _: &mut dyn HttpResponse| {
            Err(Error::io(Sink::Transport, io::Error::other("upstream closed")))
        });

        for accept in [Some("gzip"), None] {
            let mut response = BufferedResponse::new();
            let (result, errors) =
                ErrorCounter::count(|| gate(&handler).handle(&request(accept), &mut response));

            assert!(result.unwrap_err().is_io());
            assert_eq!(errors, 1, "accept-encoding {accept:?}");
        }
    }
}
