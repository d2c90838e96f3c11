pub mod types;

pub use types::{AppError, AppResult, FetchError, StoreError, TranscodeError};
