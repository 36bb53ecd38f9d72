mod expire;
mod finish_upload;
mod put_part;

pub use expire::RemoveUploadOperation;
pub use finish_upload::{FinishUploadOperation, Part};
pub use put_part::PutPartOperation;
