#[macro_use]
pub mod macros;
pub mod file_format;
pub mod key_index_vec;
pub mod log_setup;
pub mod normalize_string;
pub mod serde_io;

pub use file_format::FileFormat;
pub use serde_io::{deserialize, read_file, serialize, write_file, Result};

pub fn is_debug() -> bool {
    cfg!(debug_assertions)
}
