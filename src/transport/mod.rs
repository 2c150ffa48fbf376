//! Transport layer: the Base HTTP Transport wraps a Runtime Adapter
//! with the interceptor chain; the Enhanced Transport composes it with
//! rate limiting and retries.

pub mod base;
pub mod enhanced;

pub use base::BaseTransport;
pub use enhanced::EnhancedTransport;
