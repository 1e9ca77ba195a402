use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareBridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid content reference: {0}")]
    Url(#[from] url::ParseError),

    #[error("Content registry error: {0}")]
    Registry(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Metadata probe error: {0}")]
    Probe(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Listener not found: {0}")]
    ListenerNotFound(u64),

    #[error("Channel send error")]
    ChannelSend,
}

impl serde::Serialize for ShareBridgeError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShareBridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_as_message() {
        let err = ShareBridgeError::ListenerNotFound(7);
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Listener not found: 7\"");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ShareBridgeError = io.into();
        assert!(matches!(err, ShareBridgeError::Io(_)));
    }
}
