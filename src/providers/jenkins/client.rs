mod builds;
mod core;

pub use self::core::{JenkinsClient, RetryPolicy};
