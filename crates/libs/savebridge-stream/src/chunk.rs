use crate::stream::StreamError;

/// Anything a writer may hand to [`crate::WritableStream::write`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteChunk {
    Bytes(Vec<u8>),
    /// A window onto a larger buffer.
    View { buffer: Vec<u8>, offset: usize, len: usize },
    Blob(Blob),
    Text(String),
}

/// Immutable bytes with a MIME type, assembled from parts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blob {
    parts: Vec<Vec<u8>>,
    mime_type: String,
}

impl Blob {
    pub fn new(parts: Vec<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self { parts, mime_type: mime_type.into() }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }
}

impl WriteChunk {
    /// The raw bytes a chunk stands for. Text is UTF-8 encoded.
    pub fn into_bytes(self) -> Result<Vec<u8>, StreamError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::View { buffer, offset, len } => {
                let end = offset.checked_add(len).filter(|end| *end <= buffer.len());
                let Some(end) = end else {
                    return Err(StreamError::InvalidChunk(format!(
                        "view {offset}+{len} exceeds buffer of {} bytes",
                        buffer.len()
                    )));
                };
                Ok(buffer[offset..end].to_vec())
            }
            Self::Blob(blob) => Ok(blob.parts.concat()),
            Self::Text(text) => Ok(text.into_bytes()),
        }
    }
}

impl From<Vec<u8>> for WriteChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for WriteChunk {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for WriteChunk {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for WriteChunk {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Blob> for WriteChunk {
    fn from(blob: Blob) -> Self {
        Self::Blob(blob)
    }
}
