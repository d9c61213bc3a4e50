use crate::error::Error;
use crate::gate::Handler;
use crate::response::{BufferedResponse, HttpResponse};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::{Ready, ready};
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that runs a [`Handler`] against an in-memory response.
///
/// Misuse and handler failures become a `500` response. I/O failures are
/// returned as the service error since the response can no longer be trusted.
#[derive(Debug, Clone)]
pub struct HandlerService<H> {
    handler: H,
}

impl<H> HandlerService<H> {
    /// Creates a new service around `handler`.
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Returns a reference to the handler.
    pub fn inner(&self) -> &H {
        &self.handler
    }

    /// Returns a mutable reference to the handler.
    pub fn inner_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Consumes this service, returning the handler.
    pub fn into_inner(self) -> H {
        self.handler
    }
}

impl<H, B> Service<Request<B>> for HandlerService<H>
where
    H: Handler<B>,
{
    type Response = Response<Full<Bytes>>;
    type Error = Error;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let mut response = BufferedResponse::new();
        let result = self
            .handler
            .handle(&req, &mut response)
            .and_then(|()| response.flush_buffer());

        ready(match result {
            Ok(()) => Ok(response.into_response().map(Full::new)),
            Err(err) if err.is_io() => Err(err),
            Err(err) => {
                let mut response = Response::new(Full::new(Bytes::new()));
                *response.status_mut() = err.status_code();
                Ok(response)
            }
        })
    }
}
