//! # mediamux-webm
//!
//! Reading and writing of WebM container files: the VP8 + Vorbis profile
//! of Matroska/EBML.
//!
//! The crate has two coordinated halves over one EBML primitive layer:
//!
//! - [`WebmMuxer`] assembles tracks, clusters and cue points and streams
//!   them to a [`mediamux_core::ByteSink`]. Sizes that are unknown until
//!   the end (Segment, Cluster, Duration, SeekHead) are written as
//!   fixed-width placeholders and back-patched on
//!   [`finalize`](WebmMuxer::finalize) — or left as legal "unknown size"
//!   markers when the sink cannot seek, which is the live-streaming shape.
//! - [`WebmDemuxer`] parses the same structure back from a
//!   [`mediamux_core::ByteSource`] with positioned reads. It is
//!   crank-driven: any call may report how many bytes must be available
//!   before it can complete, so partially downloaded files parse as far as
//!   their bytes reach. Clusters load lazily and seeks go through the cue
//!   index.
//!
//! ## Example: writing a file
//!
//! ```
//! use mediamux_core::MemoryWriter;
//! use mediamux_webm::{VideoTrackConfig, WebmMuxer};
//!
//! let mut muxer = WebmMuxer::new(MemoryWriter::new());
//! let video = muxer.add_video_track(VideoTrackConfig::new(640, 480)).unwrap();
//!
//! muxer.add_frame(&[0u8; 32], video, 0, true).unwrap();
//! muxer.add_frame(&[0u8; 16], video, 33_000_000, false).unwrap();
//! muxer.finalize().unwrap();
//!
//! let bytes = muxer.into_inner().into_inner();
//! assert_eq!(&bytes[0..4], &[0x1A, 0x45, 0xDF, 0xA3]);
//! ```
//!
//! ## Example: reading it back
//!
//! ```
//! # use mediamux_core::{MemoryWriter, SliceSource};
//! # use mediamux_webm::{VideoTrackConfig, WebmMuxer, WebmDemuxer};
//! # let mut muxer = WebmMuxer::new(MemoryWriter::new());
//! # let video = muxer.add_video_track(VideoTrackConfig::new(640, 480)).unwrap();
//! # muxer.add_frame(&[7u8; 32], video, 0, true).unwrap();
//! # muxer.finalize().unwrap();
//! # let bytes = muxer.into_inner().into_inner();
//! let mut demuxer = WebmDemuxer::open(SliceSource::new(bytes)).unwrap();
//! demuxer.load().unwrap();
//!
//! let video = demuxer.tracks().unwrap().by_number(1).unwrap();
//! assert_eq!(video.codec_id, "V_VP8");
//!
//! let first = demuxer.first_block(1).unwrap().unwrap();
//! assert_eq!(demuxer.read_frame(first).unwrap(), vec![7u8; 32]);
//! ```

pub mod demuxer;
pub mod ebml;
pub mod elements;
pub mod error;
pub mod muxer;

pub use elements::codec_ids;
pub use error::{Result, WebmError};

pub use muxer::{
    AudioTrackConfig, MuxerConfig, MuxerState, VideoTrackConfig, WebmMuxer,
    DEFAULT_TIMECODE_SCALE,
};

pub use demuxer::{
    AudioInfo, Block, BlockEntry, BlockGroup, BlockRef, CuePoint, Cues, EbmlHeader, SegmentInfo,
    TrackInfo, TrackPosition, TrackSettings, Tracks, VideoInfo, WebmDemuxer,
};
