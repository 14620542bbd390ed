//! Frame source traits for the streaming server.

use std::collections::HashMap;
use std::collections::VecDeque;

use bytes::Bytes;

use crate::Result;
use crate::error::TransportError;

/// Trait for encoded-frame sources
///
/// Sources abstract over where frames come from (files, generators, tests)
/// and yield frames without pacing; the server applies the frame-rate clock.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Get the next encoded frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - New frame available
    /// - `Ok(None)` - Source exhausted (normal termination)
    /// - `Err(e)` - Error occurred
    async fn next_frame(&mut self) -> Result<Option<Bytes>>;
}

/// Resolves media names from PLAY requests to frame sources.
pub trait Catalog: Send + Sync + 'static {
    /// Open a source for `name`, or `NotFound` when the catalog has no
    /// such media.
    fn open(&self, name: &str) -> Result<Box<dyn FrameSource>>;
}

/// A frame source backed by an in-memory frame list.
pub struct VecFrameSource {
    frames: VecDeque<Bytes>,
}

impl VecFrameSource {
    pub fn new(frames: impl IntoIterator<Item = Bytes>) -> Self {
        Self { frames: frames.into_iter().collect() }
    }
}

#[async_trait::async_trait]
impl FrameSource for VecFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        Ok(self.frames.pop_front())
    }
}

/// A catalog mapping names to fixed frame lists.
#[derive(Default)]
pub struct MemoryCatalog {
    media: HashMap<String, Vec<Bytes>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, frames: Vec<Bytes>) {
        self.media.insert(name.into(), frames);
    }
}

impl Catalog for MemoryCatalog {
    fn open(&self, name: &str) -> Result<Box<dyn FrameSource>> {
        match self.media.get(name) {
            Some(frames) => Ok(Box::new(VecFrameSource::new(frames.clone()))),
            None => Err(TransportError::NotFound { name: name.to_string() }),
        }
    }
}
