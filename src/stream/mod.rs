//! Media stream handling: chunking, reassembly, playback, throttling.

pub mod chunk;
pub mod playback;
pub mod reassembly;
pub mod throttle;

pub use chunk::{
    CHUNK_HEADER_SIZE, ChunkHeader, END_OF_STREAM_FRAME_ID, END_OF_STREAM_TOTAL_CHUNKS,
    end_of_stream_payload, split_frame,
};
pub use playback::{DisplayedFrame, PlaybackBuffer, PlaybackScheduler};
pub use reassembly::ReassemblyBuffer;
pub use throttle::{DisplayRate, Throttle, ThrottleExt};
