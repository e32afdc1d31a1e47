//! # Connector Transport
//!
//! HTTP seam for the Google Drive connector.
//!
//! The [`HttpTransport`] trait is the only path to the network. Production
//! code installs [`ReqwestTransport`]; tests script the trait directly.
//! Status-code classification and retry live one layer up, in the request
//! pipeline, so the transport stays a dumb pipe.

pub mod client;
pub mod http;

pub use client::ReqwestTransport;
pub use http::{
    ByteStream, ErrorDetail, HttpMethod, HttpRequest, HttpResponse, HttpTransport, Result,
    StreamingResponse, TransportError,
};
