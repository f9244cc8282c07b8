use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Signature image is empty")]
    Empty,

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum StampError {
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Invalid signature image: {0}")]
    InvalidImage(String),

    #[error("Invalid placement: {0}")]
    InvalidPlacement(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
