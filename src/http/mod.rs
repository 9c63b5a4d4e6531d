//! HTTP access to the system under test
//!
//! Every exchange can be turned into a [`crate::models::RequestRecord`] and
//! stored with the test result that made it.

mod client;

pub use client::{HttpClient, HttpError, HttpRequest, HttpResponse};
