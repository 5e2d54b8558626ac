//! Tokenisation and the full-text compression codec.

pub mod codec;
pub mod parser;

pub use codec::{compress_file, decompress};
pub use parser::{parse_text, parse_text_into_array, WordMap, WordParseConfig};
