pub mod analyzer;
pub mod api;
pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod schema;
mod serialization;

pub use api::{compile, Compilation, Options};
pub use serialization::Value;
