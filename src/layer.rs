use crate::gate::RequestGate;
use compression_core::Level;
use tower::Layer;
use tracing::Span;

/// A Tower layer that puts a [`RequestGate`] in front of a handler.
///
/// # Example
///
/// ```ignore
/// use compression_core::Level;
/// use http_gzip_filter::{GzipLayer, HandlerService};
/// use tower::ServiceBuilder;
///
/// let service = HandlerService::new(
///     ServiceBuilder::new()
///         .layer(GzipLayer::new().level(Level::Best))
///         .service(my_handler),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct GzipLayer {
    level: Level,
    span: Span,
}

impl GzipLayer {
    /// Creates a new gzip layer with default settings.
    pub fn new() -> Self {
        Self {
            level: Level::Default,
            span: Span::none(),
        }
    }

    /// Sets the compression level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the span the filter's events are recorded under.
    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl Default for GzipLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Layer<H> for GzipLayer {
    type Service = RequestGate<H>;

    fn layer(&self, inner: H) -> Self::Service {
        tracing::debug!(parent: &self.span, level = ?self.level, "gzip filter installed");
        RequestGate::new(inner, self.level, self.span.clone())
    }
}
