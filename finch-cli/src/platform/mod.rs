//! 终端相关的输出

mod cli;

pub use cli::{print_error, print_source_context};
