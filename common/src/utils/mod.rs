//! Utility functions and helpers.

pub mod query_text;
pub mod time_range;
pub mod url;

// Re-export commonly used types
pub use query_text::{header_from_select, is_schema_discovery};
pub use time_range::{TimeInput, TimeRange};
pub use url::{normalize_endpoint, Scheme};
