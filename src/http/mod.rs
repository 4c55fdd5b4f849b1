//! HTTP client module
//!
//! Shared by the `http` unit kind and the external status sink.

mod client;

pub use client::{HttpClient, HttpError, HttpRequest, HttpResponse};
