//! Error type definitions for the relay.
//!
//! The taxonomy follows the failure boundaries of the pipeline: upstream
//! fetches, durable stores, and image transcoding each have their own error
//! enum, and `AppError` ties them together at the application layer.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Upstream fetch errors
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Durable store errors
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Image transcoding errors
    #[error("transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    /// A cache entry that can never be admitted
    #[error("entry of {size} bytes exceeds cache capacity of {capacity} bytes")]
    OverCapacity { size: usize, capacity: usize },

    /// Delivery failures at the notification sink boundary
    #[error("delivery to {channel} failed: {message}")]
    Delivery { channel: String, message: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Convenience alias used throughout the crate
pub type AppResult<T> = Result<T, AppError>;

/// Errors returned by the upstream fetch capability
#[derive(Error, Debug)]
pub enum FetchError {
    /// The upstream has no record for the requested date. Terminal, never
    /// retried.
    #[error("no record published for {date}")]
    NotFound { date: String },

    /// Network failures and upstream 5xx responses. Retryable with bounded
    /// backoff.
    #[error("upstream failure: {message}")]
    Transient { message: String },

    /// The upstream answered but the payload did not parse. Terminal for the
    /// item.
    #[error("malformed upstream payload: {message}")]
    Decode { message: String },
}

impl FetchError {
    pub fn transient<M: Into<String>>(message: M) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn decode<M: Into<String>>(message: M) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn not_found<D: Into<String>>(date: D) -> Self {
        Self::NotFound { date: date.into() }
    }

    /// Whether a bounded retry is worth attempting
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors raised by the durable key/value stores
///
/// Any of these out of `add`/`set`/`remove` means the operation did not
/// happen: the in-memory index was not updated and the caller may retry.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed for key {key}: {message}")]
    Serialize { key: String, message: String },

    /// The durable log itself is inconsistent. Only raised at load time.
    #[error("log corrupted at line {line}: {message}")]
    Corrupt { line: usize, message: String },
}

impl StoreError {
    pub fn serialize<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::Serialize {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn corrupt<M: Into<String>>(line: usize, message: M) -> Self {
        Self::Corrupt {
            line,
            message: message.into(),
        }
    }
}

/// Errors raised while fitting an image into the delivery byte budget
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// Unrecognized or corrupt source bytes
    #[error("could not decode source image: {message}")]
    Decode { message: String },

    /// Every quality step was tried and none produced a buffer under budget
    #[error("no quality level fits {size} byte image into {budget} byte budget")]
    BudgetUnsatisfiable { size: usize, budget: usize },

    #[error("jpeg encoding failed: {message}")]
    Encode { message: String },
}

impl TranscodeError {
    pub fn decode<M: Into<String>>(message: M) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn encode<M: Into<String>>(message: M) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }
}

impl AppError {
    pub fn delivery<C: Into<String>, M: Into<String>>(channel: C, message: M) -> Self {
        Self::Delivery {
            channel: channel.into(),
            message: message.into(),
        }
    }

    pub fn configuration<M: Into<String>>(message: M) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the underlying cause is worth a bounded retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch(e) if e.is_transient())
    }
}
