//! Source adapter implementations of the
//! [`SourceAdapter`](crate::traits::SourceAdapter) seam.

pub mod http;

pub use http::HttpSource;
