use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParserError>;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("empty content")]
    EmptyContent,

    #[error("tree-sitter error: {0}")]
    TreeSitter(String),

    #[error("parse error: {0}")]
    Parse(String),
}
