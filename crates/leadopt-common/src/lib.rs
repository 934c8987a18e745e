//! leadopt-common: errors, the allow-listed HTTP client and the retry/poll
//! protocol shared by every leadopt crate.

pub mod error;
pub mod http;
pub mod retry;
pub mod sandbox;

pub use error::{LeadOptError, Result};
pub use http::HttpFetcher;
pub use retry::{poll_for_keys, retry_async, PollPolicy, RetryPolicy};
pub use sandbox::SandboxClient;
