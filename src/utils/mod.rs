pub mod dates;
pub mod retry;

pub use dates::{is_valid_date, parse_day, random_date, today_utc, DAY_FORMAT};
pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
