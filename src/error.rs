use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed `B<digits>/S<digits>` rule string.
    #[error("invalid rule string: {0:?}")]
    InvalidRule(String),

    /// Malformed RLE pattern stream.
    #[error("pattern read failed: {0}")]
    ReadFailed(String),
}
