//! Filesystem and text helpers.

pub mod fs;
mod text;

pub use text::{brief_list, get_shebang, is_valid_name, shell_join, shell_quote, split_list};
