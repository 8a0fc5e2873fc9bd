// Response bodies that are either buffered or still arriving from a source

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::fmt;

use crate::error::EdgeError;

/// Body pieces in arrival order
pub type ByteStream = BoxStream<'static, Result<Bytes, EdgeError>>;

pub enum Body {
    Full(Bytes),
    /// `length` is the declared length when the source sent one
    Stream {
        length: Option<u64>,
        stream: ByteStream,
    },
}

impl Body {
    pub fn empty() -> Self {
        Body::Full(Bytes::new())
    }

    pub fn from_stream(length: Option<u64>, stream: ByteStream) -> Self {
        Body::Stream { length, stream }
    }

    pub fn len(&self) -> Option<u64> {
        match self {
            Body::Full(bytes) => Some(bytes.len() as u64),
            Body::Stream { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream { .. })
    }

    /// The bytes of a buffered body; `None` while still streaming
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Full(bytes) => Some(bytes),
            Body::Stream { .. } => None,
        }
    }

    pub fn into_stream(self) -> ByteStream {
        match self {
            Body::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Body::Stream { stream, .. } => stream,
        }
    }

    /// Read the whole body into memory
    pub async fn collect(self) -> Result<Bytes, EdgeError> {
        match self {
            Body::Full(bytes) => Ok(bytes),
            Body::Stream { length, stream } => {
                let capacity = length.unwrap_or(0).min(1024 * 1024) as usize;
                let buffer = stream
                    .try_fold(BytesMut::with_capacity(capacity), |mut buffer, piece| async move {
                        buffer.extend_from_slice(&piece);
                        Ok(buffer)
                    })
                    .await?;
                Ok(buffer.freeze())
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Stream { length, .. } => f.debug_struct("Stream").field("length", length).finish(),
        }
    }
}
