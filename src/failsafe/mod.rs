//! Failsafe mechanisms for background work

mod retry;

pub use retry::{RetryPolicy, with_retry};
