mod error;
mod paths;
mod schema;
mod store;

pub use error::ThreadStoreError;
pub use paths::{crash_dump_file_name, detached_dump_key, sanitize_timestamp_for_filename};
pub use schema::{DocumentMeta, ThreadDocument, ThreadRecord, FORMAT_VERSION};
pub use store::{now_rfc3339, write_crash_dump, ThreadStore};
