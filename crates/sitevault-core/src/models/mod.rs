pub mod cleanup;
pub mod progress;
pub mod transaction;
pub mod upload;

pub use cleanup::CleanupResult;
pub use progress::{ProgressStatus, UploadProgress};
pub use transaction::{TransactionMetadata, TransactionStatus, UploadTransaction};
pub use upload::{ProgressCallback, UploadConfig, UploadFile, UploadReceipt};
