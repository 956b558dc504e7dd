//! Response classification and payload conversion.
//!
//! A [`ContentHandler`] turns one completed HTTP response into exactly one
//! [`Classified`] outcome. Converters are tried in priority order; the first
//! one that recognizes the body wins.

pub mod generic;
pub mod rss2;

use html_escape::decode_html_entities;
use reqwest::StatusCode;

use crate::domain::FeedSnapshot;
use crate::fetcher::FetchResponse;

pub use generic::GenericFeedConverter;
pub use rss2::Rss2Converter;

/// Converts a raw payload into a typed value.
pub trait ContentConverter<T>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `None` when the body is not this converter's format so the
    /// next converter in priority order may attempt it.
    fn convert(&self, uri: &str, body: &[u8]) -> Option<T>;
}

/// Outcome of classifying one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified<T> {
    Value(T),
    Redirect(StatusCode),
    ClientError(StatusCode),
    ServerError(StatusCode),
    Unsupported(StatusCode),
}

impl<T> Classified<T> {
    /// Status of a non-value outcome.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Classified::Value(_) => None,
            Classified::Redirect(s)
            | Classified::ClientError(s)
            | Classified::ServerError(s)
            | Classified::Unsupported(s) => Some(*s),
        }
    }
}

pub struct ContentHandler<T> {
    converters: Vec<Box<dyn ContentConverter<T>>>,
}

impl<T> Default for ContentHandler<T> {
    fn default() -> Self {
        Self {
            converters: Vec::new(),
        }
    }
}

impl<T> ContentHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a converter with the lowest priority so far.
    pub fn with_converter(mut self, converter: impl ContentConverter<T> + 'static) -> Self {
        self.converters.push(Box::new(converter));
        self
    }

    pub fn converter_names(&self) -> Vec<&'static str> {
        self.converters.iter().map(|c| c.name()).collect()
    }

    pub fn classify(&self, uri: &str, response: &FetchResponse) -> Classified<T> {
        let status = response.status;
        match status.as_u16() / 100 {
            2 => self
                .converters
                .iter()
                .find_map(|c| c.convert(uri, &response.body))
                .map(Classified::Value)
                .unwrap_or(Classified::Unsupported(status)),
            3 => Classified::Redirect(status),
            4 => Classified::ClientError(status),
            5 => Classified::ServerError(status),
            _ => Classified::Unsupported(status),
        }
    }
}

impl ContentHandler<FeedSnapshot> {
    /// RSS 2.0 first, then every other syndication format.
    pub fn feeds() -> Self {
        Self::new()
            .with_converter(Rss2Converter)
            .with_converter(GenericFeedConverter)
    }
}

pub(crate) fn clean_text(s: &str) -> Option<String> {
    let decoded = decode_html_entities(s.trim()).to_string();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(&'static str);

    impl ContentConverter<String> for Always {
        fn name(&self) -> &'static str {
            self.0
        }

        fn convert(&self, _uri: &str, body: &[u8]) -> Option<String> {
            Some(format!("{}:{}", self.0, String::from_utf8_lossy(body)))
        }
    }

    struct Never;

    impl ContentConverter<String> for Never {
        fn name(&self) -> &'static str {
            "never"
        }

        fn convert(&self, _uri: &str, _body: &[u8]) -> Option<String> {
            None
        }
    }

    fn response(status: u16, body: &str) -> FetchResponse {
        FetchResponse {
            status: StatusCode::from_u16(status).unwrap(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_classify_by_status_digit() {
        let handler = ContentHandler::new().with_converter(Always("a"));
        let uri = "http://example.test/rss";

        assert_eq!(
            handler.classify(uri, &response(200, "x")),
            Classified::Value("a:x".to_string())
        );
        assert_eq!(
            handler.classify(uri, &response(304, "")),
            Classified::Redirect(StatusCode::NOT_MODIFIED)
        );
        assert_eq!(
            handler.classify(uri, &response(404, "")),
            Classified::ClientError(StatusCode::NOT_FOUND)
        );
        assert_eq!(
            handler.classify(uri, &response(503, "")),
            Classified::ServerError(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[test]
    fn test_converters_tried_in_priority_order() {
        let handler = ContentHandler::new()
            .with_converter(Never)
            .with_converter(Always("second"))
            .with_converter(Always("third"));
        assert_eq!(handler.converter_names(), vec!["never", "second", "third"]);
        assert_eq!(
            handler.classify("u", &response(200, "x")),
            Classified::Value("second:x".to_string())
        );
    }

    #[test]
    fn test_unrecognized_body_is_unsupported() {
        let handler = ContentHandler::new().with_converter(Never);
        assert_eq!(
            handler.classify("u", &response(200, "hello")),
            Classified::Unsupported(StatusCode::OK)
        );
    }

    #[test]
    fn test_feed_handler_rejects_html() {
        let handler = ContentHandler::feeds();
        let page = response(200, "<html><body>not a feed</body></html>");
        assert!(matches!(
            handler.classify("http://example.test/", &page),
            Classified::Unsupported(_)
        ));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Tom &amp; Jerry "), Some("Tom & Jerry".into()));
        assert_eq!(clean_text("   "), None);
    }
}
