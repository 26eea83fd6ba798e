//! Dense retrieval adapters.

pub mod http;

pub use http::HttpRetrievalService;
