//! 词法分析

pub mod scanner;
pub mod token_kind;
pub mod types;

pub use scanner::{Scanner, Token};
pub use token_kind::TokenKind;
pub use types::{Coordinate, Span};
