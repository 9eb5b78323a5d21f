pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub(crate) enum Error {
    #[error("Error: {0}")]
    Lex(String),
    #[error("Error: {0}")]
    Parse(String),
    #[error("Error: {0}")]
    Codegen(String),
    #[error("Could not create ExecutionEngine: {0}")]
    Jit(String),
}
