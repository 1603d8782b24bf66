//! Request-pipeline defences, outermost first: response headers, CORS,
//! anti-forgery tokens, input sanitization.

pub mod cors;
pub mod csrf;
pub mod headers;
pub mod sanitize;
