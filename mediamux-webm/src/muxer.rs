//! WebM muxer implementation.
//!
//! The muxer assembles an in-memory description of tracks, clusters and cue
//! points while streaming elements to a [`ByteSink`]. EBML prefixes every
//! element with its payload length, so elements whose size is unknown until
//! later (Segment, Cluster, Duration, SeekHead) are written as fixed-width
//! placeholders and back-patched during [`WebmMuxer::finalize`].
//!
//! Whether back-patching happens at all is a capability of the sink:
//! a seekable sink yields a fully indexed file (sizes, duration, SeekHead,
//! Cues), a non-seekable sink yields a live stream that keeps the legal
//! "unknown size" placeholders and carries no index.

use crate::ebml;
use crate::elements::*;
use crate::error::{Result, WebmError};

use mediamux_core::ByteSink;
use rand::RngCore;
use tracing::{debug, trace};

/// Default timecode scale: 1,000,000 ns per tick, i.e. millisecond ticks.
pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

const APP_NAME: &str = concat!("mediamux-webm-", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Size placeholders
// ============================================================================

/// Width of every reserved size field. Eight bytes hold any payload this
/// format can express, so a placeholder can always be patched in place.
const SIZE_SLOT_WIDTH: u64 = 8;

/// A fixed-width size field written as "unknown" and awaiting its value.
#[derive(Debug, Clone, Copy)]
struct SizeSlot {
    position: u64,
}

fn reserve_size<W: ByteSink>(writer: &mut W) -> Result<SizeSlot> {
    let position = writer.position();
    ebml::write_unknown_size(writer)?;
    Ok(SizeSlot { position })
}

/// Patch a reserved size field. On a non-seekable sink this is a no-op and
/// the placeholder stays in the stream.
fn commit_size<W: ByteSink>(writer: &mut W, slot: SizeSlot, size: u64) -> Result<()> {
    if !writer.is_seekable() {
        return Ok(());
    }
    let return_pos = writer.position();
    writer.seek(slot.position)?;
    ebml::write_vint_at_width(writer, size, SIZE_SLOT_WIDTH)?;
    writer.seek(return_pos)?;
    Ok(())
}

// ============================================================================
// Track configuration and model
// ============================================================================

/// Video track parameters. The WebM profile fixes the codec to VP8.
#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    /// Pixel width.
    pub width: u64,
    /// Pixel height.
    pub height: u64,
    /// Codec private data, if the stream carries any.
    pub codec_private: Option<Vec<u8>>,
}

impl VideoTrackConfig {
    /// Create a video track configuration.
    pub fn new(width: u64, height: u64) -> Self {
        Self { width, height, codec_private: None }
    }

    /// Attach codec private data.
    pub fn with_codec_private(mut self, data: Vec<u8>) -> Self {
        self.codec_private = Some(data);
        self
    }
}

/// Audio track parameters. The WebM profile fixes the codec to Vorbis.
#[derive(Debug, Clone)]
pub struct AudioTrackConfig {
    /// Sample rate in Hz. Serialized as a 4-byte float.
    pub sample_rate: f64,
    /// Channel count.
    pub channels: u64,
    /// Bits per sample, if meaningful for the stream.
    pub bit_depth: Option<u64>,
    /// Codec private data (the Vorbis header packets).
    pub codec_private: Option<Vec<u8>>,
}

impl AudioTrackConfig {
    /// Create an audio track configuration.
    pub fn new(sample_rate: f64, channels: u64) -> Self {
        Self { sample_rate, channels, bit_depth: None, codec_private: None }
    }

    /// Set the bit depth.
    pub fn with_bit_depth(mut self, bit_depth: u64) -> Self {
        self.bit_depth = Some(bit_depth);
        self
    }

    /// Attach codec private data.
    pub fn with_codec_private(mut self, data: Vec<u8>) -> Self {
        self.codec_private = Some(data);
        self
    }
}

#[derive(Debug, Clone)]
enum TrackKind {
    Video { pixel_width: u64, pixel_height: u64 },
    Audio { sample_rate: f64, channels: u64, bit_depth: Option<u64> },
}

#[derive(Debug, Clone)]
struct Track {
    number: u64,
    uid: u64,
    codec_id: &'static str,
    codec_private: Option<Vec<u8>>,
    kind: TrackKind,
}

/// 56 random bits, accumulated a byte at a time so the value stays clear of
/// the sign bit of readers that treat UIDs as signed 64-bit.
fn make_track_uid() -> u64 {
    let mut bytes = [0u8; 7];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().fold(0u64, |uid, &b| (uid << 8) | u64::from(b))
}

impl Track {
    fn track_type(&self) -> u64 {
        match self.kind {
            TrackKind::Video { .. } => TRACK_TYPE_VIDEO,
            TrackKind::Audio { .. } => TRACK_TYPE_AUDIO,
        }
    }

    fn is_video(&self) -> bool {
        matches!(self.kind, TrackKind::Video { .. })
    }

    fn settings_size(&self) -> u64 {
        match &self.kind {
            TrackKind::Video { pixel_width, pixel_height } => {
                let inner = ebml::uint_element_size(PIXEL_WIDTH, *pixel_width)
                    + ebml::uint_element_size(PIXEL_HEIGHT, *pixel_height);
                ebml::master_element_size(VIDEO, inner) + inner
            }
            TrackKind::Audio { channels, bit_depth, .. } => {
                let mut inner = ebml::float_element_size(SAMPLING_FREQUENCY)
                    + ebml::uint_element_size(CHANNELS, *channels);
                if let Some(depth) = bit_depth {
                    inner += ebml::uint_element_size(BIT_DEPTH, *depth);
                }
                ebml::master_element_size(AUDIO, inner) + inner
            }
        }
    }

    fn payload_size(&self) -> u64 {
        let mut size = ebml::uint_element_size(TRACK_NUMBER, self.number)
            + ebml::uint_element_size(TRACK_UID, self.uid)
            + ebml::uint_element_size(TRACK_TYPE, self.track_type())
            + ebml::string_element_size(CODEC_ID, self.codec_id);
        if let Some(private) = &self.codec_private {
            size += ebml::binary_element_size(CODEC_PRIVATE, private.len() as u64);
        }
        size + self.settings_size()
    }

    fn size(&self) -> u64 {
        let payload = self.payload_size();
        ebml::master_element_size(TRACK_ENTRY, payload) + payload
    }

    fn write<W: ByteSink>(&self, writer: &mut W) -> Result<()> {
        let payload = self.payload_size();
        ebml::write_master_element(writer, TRACK_ENTRY, payload)?;
        let start = writer.position();

        ebml::write_uint_element(writer, TRACK_NUMBER, self.number)?;
        ebml::write_uint_element(writer, TRACK_UID, self.uid)?;
        ebml::write_uint_element(writer, TRACK_TYPE, self.track_type())?;
        ebml::write_string_element(writer, CODEC_ID, self.codec_id)?;
        if let Some(private) = &self.codec_private {
            ebml::write_binary_element(writer, CODEC_PRIVATE, private)?;
        }

        match &self.kind {
            TrackKind::Video { pixel_width, pixel_height } => {
                let inner = ebml::uint_element_size(PIXEL_WIDTH, *pixel_width)
                    + ebml::uint_element_size(PIXEL_HEIGHT, *pixel_height);
                ebml::write_master_element(writer, VIDEO, inner)?;
                ebml::write_uint_element(writer, PIXEL_WIDTH, *pixel_width)?;
                ebml::write_uint_element(writer, PIXEL_HEIGHT, *pixel_height)?;
            }
            TrackKind::Audio { sample_rate, channels, bit_depth } => {
                let mut inner = ebml::float_element_size(SAMPLING_FREQUENCY)
                    + ebml::uint_element_size(CHANNELS, *channels);
                if let Some(depth) = bit_depth {
                    inner += ebml::uint_element_size(BIT_DEPTH, *depth);
                }
                ebml::write_master_element(writer, AUDIO, inner)?;
                ebml::write_float_element(writer, SAMPLING_FREQUENCY, *sample_rate as f32)?;
                ebml::write_uint_element(writer, CHANNELS, *channels)?;
                if let Some(depth) = bit_depth {
                    ebml::write_uint_element(writer, BIT_DEPTH, *depth)?;
                }
            }
        }

        debug_assert_eq!(writer.position() - start, payload);
        Ok(())
    }
}

/// Track collection. Numbers are handed out as 1-based insertion order and
/// never reused, so they are unique by construction.
#[derive(Debug, Default)]
struct Tracks {
    entries: Vec<Track>,
}

impl Tracks {
    fn add(&mut self, codec_id: &'static str, codec_private: Option<Vec<u8>>, kind: TrackKind) -> u64 {
        let number = self.entries.len() as u64 + 1;
        self.entries.push(Track {
            number,
            uid: make_track_uid(),
            codec_id,
            codec_private,
            kind,
        });
        number
    }

    fn by_number(&self, number: u64) -> Option<&Track> {
        self.entries.iter().find(|t| t.number == number)
    }

    fn is_video(&self, number: u64) -> bool {
        self.by_number(number).is_some_and(Track::is_video)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn payload_size(&self) -> u64 {
        self.entries.iter().map(Track::size).sum()
    }

    fn write<W: ByteSink>(&self, writer: &mut W) -> Result<()> {
        let payload = self.payload_size();
        ebml::write_master_element(writer, TRACKS, payload)?;
        let start = writer.position();
        for track in &self.entries {
            track.write(writer)?;
        }
        debug_assert_eq!(writer.position() - start, payload);
        Ok(())
    }
}

// ============================================================================
// Clusters
// ============================================================================

#[derive(Debug)]
struct Cluster {
    /// Base timecode, in timecode ticks.
    timecode: u64,
    /// Bytes of payload written so far (Timecode element plus blocks).
    payload_size: u64,
    size_slot: Option<SizeSlot>,
    header_written: bool,
    finalized: bool,
}

impl Cluster {
    fn new(timecode: u64) -> Self {
        Self {
            timecode,
            payload_size: 0,
            size_slot: None,
            header_written: false,
            finalized: false,
        }
    }

    /// Written lazily on the first frame: ID, reserved size, base timecode.
    fn write_header<W: ByteSink>(&mut self, writer: &mut W) -> Result<()> {
        debug_assert!(!self.finalized);
        ebml::write_id(writer, CLUSTER)?;
        self.size_slot = Some(reserve_size(writer)?);
        ebml::write_uint_element(writer, TIMECODE, self.timecode)?;
        self.payload_size += ebml::uint_element_size(TIMECODE, self.timecode);
        self.header_written = true;
        Ok(())
    }

    fn add_frame<W: ByteSink>(
        &mut self,
        writer: &mut W,
        frame: &[u8],
        track_number: u64,
        relative_timecode: i16,
        is_key: bool,
    ) -> Result<()> {
        debug_assert!(!self.finalized);
        if !self.header_written {
            self.write_header(writer)?;
        }
        let element_size =
            ebml::write_simple_block(writer, frame, track_number, relative_timecode, is_key)?;
        self.payload_size += element_size;
        Ok(())
    }

    /// Patch the reserved size field with the final payload size.
    fn finalize<W: ByteSink>(&mut self, writer: &mut W) -> Result<()> {
        debug_assert!(!self.finalized);
        if let Some(slot) = self.size_slot {
            commit_size(writer, slot, self.payload_size)?;
        }
        self.finalized = true;
        Ok(())
    }
}

// ============================================================================
// SeekHead
// ============================================================================

/// Number of seek entries the reserved table holds: SegmentInfo, Tracks,
/// first Cluster, Cues.
const SEEK_ENTRY_COUNT: usize = 4;

#[derive(Debug, Default)]
struct SeekHead {
    entries: [Option<(u64, u64)>; SEEK_ENTRY_COUNT],
    start_pos: Option<u64>,
}

impl SeekHead {
    /// Worst-case size of one Seek entry: a 4-byte SeekID value and an
    /// 8-byte SeekPosition value.
    fn max_entry_size() -> u64 {
        let payload = ebml::uint_element_size(SEEK_ID, 0xFFFF_FFFF)
            + ebml::uint_element_size(SEEK_POSITION, u64::MAX);
        ebml::master_element_size(SEEK, payload) + payload
    }

    /// Exact byte length of the reserved region; the rewritten table plus
    /// its residue Void must occupy the same range.
    fn reserved_size() -> u64 {
        let entries = SEEK_ENTRY_COUNT as u64 * Self::max_entry_size();
        ebml::master_element_size(SEEK_HEAD, entries) + entries
    }

    /// Hold the table's spot in the stream with a Void element.
    fn reserve<W: ByteSink>(&mut self, writer: &mut W) -> Result<()> {
        self.start_pos = Some(writer.position());
        ebml::write_void(writer, Self::reserved_size())?;
        Ok(())
    }

    fn add_entry(&mut self, id: u64, pos: u64) -> Result<()> {
        for slot in self.entries.iter_mut() {
            if slot.is_none() {
                *slot = Some((id, pos));
                return Ok(());
            }
        }
        Err(WebmError::SeekHeadFull)
    }

    /// Rewrite the real table over the reserved Void and pad the remainder.
    fn finalize<W: ByteSink>(&self, writer: &mut W) -> Result<()> {
        if !writer.is_seekable() {
            return Ok(());
        }
        let Some(start) = self.start_pos else {
            return Ok(());
        };

        let mut payload = 0u64;
        let mut entry_sizes = [0u64; SEEK_ENTRY_COUNT];
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some((id, pos)) = entry {
                entry_sizes[i] = ebml::uint_element_size(SEEK_ID, *id)
                    + ebml::uint_element_size(SEEK_POSITION, *pos);
                payload += ebml::master_element_size(SEEK, entry_sizes[i]) + entry_sizes[i];
            }
        }
        if payload == 0 {
            return Ok(());
        }

        let return_pos = writer.position();
        writer.seek(start)?;

        ebml::write_master_element(writer, SEEK_HEAD, payload)?;
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some((id, pos)) = entry {
                ebml::write_master_element(writer, SEEK, entry_sizes[i])?;
                ebml::write_uint_element(writer, SEEK_ID, *id)?;
                ebml::write_uint_element(writer, SEEK_POSITION, *pos)?;
            }
        }

        let used = writer.position() - start;
        let residue = Self::reserved_size() - used;
        // A 1-byte residue cannot be encoded, but reaching it would need a
        // petabyte-scale segment position; real tables leave 0 or >= 2.
        if residue > 0 {
            ebml::write_void(writer, residue)?;
        }

        writer.seek(return_pos)?;
        Ok(())
    }
}

// ============================================================================
// SegmentInfo
// ============================================================================

#[derive(Debug)]
struct SegmentInfo {
    timecode_scale: u64,
    /// Duration in timecode ticks; negative until known.
    duration: f64,
    muxing_app: String,
    writing_app: String,
    duration_pos: Option<u64>,
}

impl SegmentInfo {
    fn new(timecode_scale: u64, writing_app: String) -> Self {
        Self {
            timecode_scale,
            duration: -1.0,
            muxing_app: APP_NAME.to_string(),
            writing_app,
            duration_pos: None,
        }
    }

    fn payload_size(&self) -> u64 {
        let mut size = ebml::uint_element_size(TIMECODE_SCALE, self.timecode_scale)
            + ebml::string_element_size(MUXING_APP, &self.muxing_app)
            + ebml::string_element_size(WRITING_APP, &self.writing_app);
        if self.duration > 0.0 {
            size += ebml::float_element_size(DURATION);
        }
        size
    }

    fn write<W: ByteSink>(&mut self, writer: &mut W) -> Result<()> {
        let payload = self.payload_size();
        ebml::write_master_element(writer, INFO, payload)?;
        let start = writer.position();

        ebml::write_uint_element(writer, TIMECODE_SCALE, self.timecode_scale)?;
        if self.duration > 0.0 {
            // Remember where the element sits so finalize can rewrite it.
            self.duration_pos = Some(writer.position());
            ebml::write_float_element(writer, DURATION, self.duration as f32)?;
        }
        ebml::write_string_element(writer, MUXING_APP, &self.muxing_app)?;
        ebml::write_string_element(writer, WRITING_APP, &self.writing_app)?;

        debug_assert_eq!(writer.position() - start, payload);
        Ok(())
    }

    fn finalize<W: ByteSink>(&self, writer: &mut W) -> Result<()> {
        if self.duration <= 0.0 || !writer.is_seekable() {
            return Ok(());
        }
        let Some(pos) = self.duration_pos else {
            return Ok(());
        };
        let return_pos = writer.position();
        writer.seek(pos)?;
        ebml::write_float_element(writer, DURATION, self.duration as f32)?;
        writer.seek(return_pos)?;
        Ok(())
    }
}

// ============================================================================
// Cues
// ============================================================================

#[derive(Debug, Clone)]
struct CuePoint {
    /// Cue time in timecode ticks.
    time: u64,
    track: u64,
    /// Cluster offset from the start of the segment payload.
    cluster_pos: u64,
    /// 1-based block index within the cluster; omitted on the wire when 1.
    block_number: u64,
}

impl CuePoint {
    fn payload_size(&self) -> u64 {
        let mut positions = ebml::uint_element_size(CUE_TRACK, self.track)
            + ebml::uint_element_size(CUE_CLUSTER_POSITION, self.cluster_pos);
        if self.block_number > 1 {
            positions += ebml::uint_element_size(CUE_BLOCK_NUMBER, self.block_number);
        }
        ebml::uint_element_size(CUE_TIME, self.time)
            + ebml::master_element_size(CUE_TRACK_POSITIONS, positions)
            + positions
    }

    fn size(&self) -> u64 {
        let payload = self.payload_size();
        ebml::master_element_size(CUE_POINT, payload) + payload
    }

    fn write<W: ByteSink>(&self, writer: &mut W) -> Result<()> {
        let payload = self.payload_size();
        ebml::write_master_element(writer, CUE_POINT, payload)?;
        let start = writer.position();

        ebml::write_uint_element(writer, CUE_TIME, self.time)?;

        let mut positions = ebml::uint_element_size(CUE_TRACK, self.track)
            + ebml::uint_element_size(CUE_CLUSTER_POSITION, self.cluster_pos);
        if self.block_number > 1 {
            positions += ebml::uint_element_size(CUE_BLOCK_NUMBER, self.block_number);
        }
        ebml::write_master_element(writer, CUE_TRACK_POSITIONS, positions)?;
        ebml::write_uint_element(writer, CUE_TRACK, self.track)?;
        ebml::write_uint_element(writer, CUE_CLUSTER_POSITION, self.cluster_pos)?;
        if self.block_number > 1 {
            ebml::write_uint_element(writer, CUE_BLOCK_NUMBER, self.block_number)?;
        }

        debug_assert_eq!(writer.position() - start, payload);
        Ok(())
    }
}

/// Cue index under construction. Points are appended at cluster-open time
/// and cluster open times are monotonic, so the index is sorted by
/// construction and ready for binary search on the read side.
#[derive(Debug, Default)]
struct Cues {
    entries: Vec<CuePoint>,
}

impl Cues {
    fn add(&mut self, cue: CuePoint) {
        debug_assert!(self.entries.last().map_or(true, |prev| prev.time <= cue.time));
        self.entries.push(cue);
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn write<W: ByteSink>(&self, writer: &mut W) -> Result<()> {
        let payload: u64 = self.entries.iter().map(CuePoint::size).sum();
        ebml::write_master_element(writer, CUES, payload)?;
        let start = writer.position();
        for cue in &self.entries {
            cue.write(writer)?;
        }
        debug_assert_eq!(writer.position() - start, payload);
        Ok(())
    }
}

// ============================================================================
// Muxer configuration
// ============================================================================

/// Muxer configuration.
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Nanoseconds per timecode tick.
    pub timecode_scale: u64,
    /// WritingApp string stored in SegmentInfo.
    pub writing_app: String,
    /// Whether to collect and emit a Cues index (seekable sinks only).
    pub output_cues: bool,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            writing_app: APP_NAME.to_string(),
            output_cues: true,
        }
    }
}

impl MuxerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timecode scale (nanoseconds per tick).
    pub fn with_timecode_scale(mut self, scale: u64) -> Self {
        self.timecode_scale = scale;
        self
    }

    /// Set the writing application string.
    pub fn with_writing_app(mut self, app: impl Into<String>) -> Self {
        self.writing_app = app.into();
        self
    }

    /// Enable or disable cue generation.
    pub fn with_cues(mut self, enabled: bool) -> Self {
        self.output_cues = enabled;
        self
    }
}

/// Muxer lifecycle, derived from what has been written so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    /// Tracks may still be added; nothing written.
    TracksOpen,
    /// Headers are on the wire; the track list is frozen.
    HeaderWritten,
    /// A cluster is accepting frames.
    ClusterOpen,
    /// Terminal; every deferred value has been resolved.
    Finalized,
}

// ============================================================================
// Muxer
// ============================================================================

/// WebM muxer over a byte sink.
pub struct WebmMuxer<W: ByteSink> {
    writer: W,
    info: SegmentInfo,
    seek_head: SeekHead,
    tracks: Tracks,
    cues: Cues,
    clusters: Vec<Cluster>,
    output_cues: bool,
    header_written: bool,
    finalized: bool,
    /// Next frame must open a fresh cluster.
    new_cluster: bool,
    size_slot: Option<SizeSlot>,
    /// Position right after the segment size field. SeekHead and cue
    /// offsets are relative to this.
    payload_start: u64,
    /// Running maximum timestamp in nanoseconds.
    last_timestamp: u64,
    /// Track the cue index points at; first video track by default.
    cues_track: u64,
}

impl<W: ByteSink> WebmMuxer<W> {
    /// Create a muxer with the default configuration.
    pub fn new(writer: W) -> Self {
        Self::with_config(writer, MuxerConfig::default())
    }

    /// Create a muxer with a custom configuration.
    pub fn with_config(writer: W, config: MuxerConfig) -> Self {
        Self {
            writer,
            info: SegmentInfo::new(config.timecode_scale, config.writing_app.clone()),
            seek_head: SeekHead::default(),
            tracks: Tracks::default(),
            cues: Cues::default(),
            clusters: Vec::new(),
            output_cues: config.output_cues,
            header_written: false,
            finalized: false,
            new_cluster: true,
            size_slot: None,
            payload_start: 0,
            last_timestamp: 0,
            cues_track: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MuxerState {
        if self.finalized {
            MuxerState::Finalized
        } else if self.clusters.iter().any(|c| c.header_written && !c.finalized) {
            MuxerState::ClusterOpen
        } else if self.header_written {
            MuxerState::HeaderWritten
        } else {
            MuxerState::TracksOpen
        }
    }

    /// Add a VP8 video track. Returns the assigned 1-based track number.
    pub fn add_video_track(&mut self, config: VideoTrackConfig) -> Result<u64> {
        if self.header_written {
            return Err(WebmError::TracksFrozen);
        }
        Ok(self.tracks.add(
            codec_ids::V_VP8,
            config.codec_private,
            TrackKind::Video { pixel_width: config.width, pixel_height: config.height },
        ))
    }

    /// Add a Vorbis audio track. Returns the assigned 1-based track number.
    pub fn add_audio_track(&mut self, config: AudioTrackConfig) -> Result<u64> {
        if self.header_written {
            return Err(WebmError::TracksFrozen);
        }
        Ok(self.tracks.add(
            codec_ids::A_VORBIS,
            config.codec_private,
            TrackKind::Audio {
                sample_rate: config.sample_rate,
                channels: config.channels,
                bit_depth: config.bit_depth,
            },
        ))
    }

    /// Whether `track_number` names a video track.
    pub fn track_is_video(&self, track_number: u64) -> bool {
        self.tracks.is_video(track_number)
    }

    /// Pin the cue index to a specific track instead of the default.
    pub fn cues_track(&mut self, track_number: u64) -> Result<()> {
        if self.tracks.by_number(track_number).is_none() {
            return Err(WebmError::TrackNotFound { track_number });
        }
        self.cues_track = track_number;
        Ok(())
    }

    /// Enable or disable cue output. Only meaningful before the first frame.
    pub fn output_cues(&mut self, enabled: bool) {
        self.output_cues = enabled;
    }

    /// Append one frame.
    ///
    /// The first frame triggers header emission and freezes the track list.
    /// A key frame on a video track closes the open cluster and starts a
    /// new one; audio-only streams stay in a single cluster.
    pub fn add_frame(
        &mut self,
        frame: &[u8],
        track_number: u64,
        timestamp_ns: u64,
        is_key: bool,
    ) -> Result<()> {
        if self.finalized {
            return Err(WebmError::MuxerFinalized);
        }
        if frame.is_empty() {
            return Err(WebmError::EmptyPayload("frame"));
        }
        if self.tracks.by_number(track_number).is_none() {
            return Err(WebmError::TrackNotFound { track_number });
        }

        if !self.header_written {
            self.write_segment_header(true)?;
            let offset = self.writer.position() - self.payload_start;
            self.seek_head.add_entry(CLUSTER, offset)?;

            if self.output_cues && self.cues_track == 0 {
                self.cues_track = self
                    .tracks
                    .entries
                    .iter()
                    .find(|t| t.is_video())
                    .unwrap_or(&self.tracks.entries[0])
                    .number;
            }
        }

        if is_key && self.tracks.is_video(track_number) {
            self.new_cluster = true;
        }

        let scale = self.info.timecode_scale;
        if self.new_cluster {
            let timecode = timestamp_ns / scale;

            if self.writer.is_seekable() {
                if let Some(prev) = self.clusters.last_mut() {
                    if !prev.finalized {
                        prev.finalize(&mut self.writer)?;
                    }
                }
                if self.output_cues {
                    self.cues.add(CuePoint {
                        time: timecode,
                        track: self.cues_track,
                        cluster_pos: self.writer.position() - self.payload_start,
                        block_number: 1,
                    });
                }
            }

            trace!(timecode, index = self.clusters.len(), "opening cluster");
            self.clusters.push(Cluster::new(timecode));
            self.new_cluster = false;
        }

        let cluster = self.clusters.last_mut().expect("a cluster is open");
        let relative = (timestamp_ns / scale) as i64 - cluster.timecode as i64;
        if relative < 0 || relative > i16::MAX as i64 {
            return Err(WebmError::TimecodeOutOfRange { relative });
        }

        cluster.add_frame(&mut self.writer, frame, track_number, relative as i16, is_key)?;

        if timestamp_ns > self.last_timestamp {
            self.last_timestamp = timestamp_ns;
        }
        Ok(())
    }

    /// Resolve every deferred value and close the segment. One-shot: a
    /// second call fails, as does any `add_frame` afterwards.
    ///
    /// On a non-seekable sink the placeholders stay in the stream, no index
    /// is written, and the output remains a legal live-profile file.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(WebmError::MuxerFinalized);
        }

        if !self.header_written {
            // Header-only file: the duration element is simply absent.
            self.write_segment_header(false)?;
        }

        if let Some(cluster) = self.clusters.last_mut() {
            if !cluster.finalized {
                cluster.finalize(&mut self.writer)?;
            }
        }

        if self.last_timestamp > 0 {
            self.info.duration = self.last_timestamp as f64 / self.info.timecode_scale as f64;
        }
        self.info.finalize(&mut self.writer)?;

        if self.writer.is_seekable() {
            if self.output_cues && !self.cues.is_empty() {
                let offset = self.writer.position() - self.payload_start;
                self.seek_head.add_entry(CUES, offset)?;
                self.cues.write(&mut self.writer)?;
            }

            self.seek_head.finalize(&mut self.writer)?;

            if let Some(slot) = self.size_slot {
                let segment_size = self.writer.position() - self.payload_start;
                commit_size(&mut self.writer, slot, segment_size)?;
            }
        }

        debug!(
            clusters = self.clusters.len(),
            duration_ticks = self.info.duration,
            seekable = self.writer.is_seekable(),
            "finalized segment"
        );
        self.finalized = true;
        Ok(())
    }

    /// Consume the muxer and return the sink.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Borrow the sink.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn write_segment_header(&mut self, preallocate_duration: bool) -> Result<()> {
        debug_assert!(!self.header_written);
        if self.tracks.is_empty() {
            return Err(WebmError::Other("no tracks added".to_string()));
        }

        write_ebml_header(&mut self.writer, "webm")?;

        ebml::write_id(&mut self.writer, SEGMENT)?;
        self.size_slot = Some(reserve_size(&mut self.writer)?);
        self.payload_start = self.writer.position();

        if preallocate_duration && self.writer.is_seekable() {
            // Claim the duration's bytes now; finalize writes the real value.
            self.info.duration = 1.0;
        }

        self.seek_head.reserve(&mut self.writer)?;

        let offset = self.writer.position() - self.payload_start;
        self.seek_head.add_entry(INFO, offset)?;
        self.info.write(&mut self.writer)?;

        let offset = self.writer.position() - self.payload_start;
        self.seek_head.add_entry(TRACKS, offset)?;
        self.tracks.write(&mut self.writer)?;

        self.header_written = true;
        debug!(payload_start = self.payload_start, "wrote segment headers");
        Ok(())
    }
}

/// Write the document-level EBML header for a WebM file.
fn write_ebml_header<W: ByteSink>(writer: &mut W, doc_type: &str) -> Result<()> {
    let payload = ebml::uint_element_size(EBML_VERSION, 1)
        + ebml::uint_element_size(EBML_READ_VERSION, 1)
        + ebml::uint_element_size(EBML_MAX_ID_LENGTH, 4)
        + ebml::uint_element_size(EBML_MAX_SIZE_LENGTH, 8)
        + ebml::string_element_size(DOC_TYPE, doc_type)
        + ebml::uint_element_size(DOC_TYPE_VERSION, 2)
        + ebml::uint_element_size(DOC_TYPE_READ_VERSION, 2);

    ebml::write_master_element(writer, EBML, payload)?;
    let start = writer.position();

    ebml::write_uint_element(writer, EBML_VERSION, 1)?;
    ebml::write_uint_element(writer, EBML_READ_VERSION, 1)?;
    ebml::write_uint_element(writer, EBML_MAX_ID_LENGTH, 4)?;
    ebml::write_uint_element(writer, EBML_MAX_SIZE_LENGTH, 8)?;
    ebml::write_string_element(writer, DOC_TYPE, doc_type)?;
    ebml::write_uint_element(writer, DOC_TYPE_VERSION, 2)?;
    ebml::write_uint_element(writer, DOC_TYPE_READ_VERSION, 2)?;

    debug_assert_eq!(writer.position() - start, payload);
    Ok(())
}
