//! WebM demuxer implementation.
//!
//! The demuxer is crank-driven: every entry point either completes against
//! the bytes the source currently holds or returns
//! [`WebmError::BufferNotFull`] so the caller can feed the source and retry.
//! Nothing blocks and nothing is consumed twice; the only state a retry
//! observes is the advancing parse position.
//!
//! Clusters are discovered incrementally ([`WebmDemuxer::parse_cluster`])
//! and loaded lazily: a freshly discovered cluster knows only its offset
//! (kept as a negative sentinel until the header is verified); its timecode
//! and block entries are materialized on first access. Seeking goes through
//! the [`Cues`] index when the file carries one and falls back to a binary
//! search of the cluster array.

use crate::ebml;
use crate::elements::*;
use crate::error::{Result, WebmError};

use mediamux_core::ByteSource;
use tracing::{debug, trace};

/// Default timecode scale when the file does not carry one.
pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Upper bound on clusters visited per block-iteration call. Guards against
/// pathological streams with no block for the requested track.
const CLUSTER_SCAN_LIMIT: usize = 100;

/// Cluster-array reservation when the duration gives no better estimate.
const DEFAULT_CLUSTER_RESERVE: usize = 2048;

// ============================================================================
// EBML document header
// ============================================================================

/// Parsed EBML document header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbmlHeader {
    /// EBML version.
    pub version: u64,
    /// EBML read version.
    pub read_version: u64,
    /// Maximum ID length.
    pub max_id_length: u64,
    /// Maximum size length.
    pub max_size_length: u64,
    /// Document type string.
    pub doc_type: String,
    /// Document type version.
    pub doc_type_version: u64,
    /// Document type read version.
    pub doc_type_read_version: u64,
}

impl Default for EbmlHeader {
    fn default() -> Self {
        Self {
            version: 1,
            read_version: 1,
            max_id_length: 4,
            max_size_length: 8,
            doc_type: String::new(),
            doc_type_version: 1,
            doc_type_read_version: 1,
        }
    }
}

impl EbmlHeader {
    /// Whether this header declares a WebM document.
    pub fn is_webm(&self) -> bool {
        self.doc_type == "webm"
    }

    /// Locate and parse the EBML header.
    ///
    /// Scans up to the first 1024 bytes for the header's leading `0x1A`,
    /// decodes the recognized children and skips the rest. Returns the
    /// header and the position just past it.
    pub fn parse<R: ByteSource>(reader: &R) -> Result<(Self, u64)> {
        let len = reader.length();
        let mut pos = 0u64;

        'candidate: loop {
            let scan_end = 1024.min(len.available);
            let mut byte = 0u8;
            while pos < scan_end {
                byte = {
                    let mut b = [0u8; 1];
                    reader.read_at(pos, &mut b)?;
                    b[0]
                };
                if byte == 0x1A {
                    break;
                }
                pos += 1;
            }

            if byte != 0x1A {
                let at_eof = len.total.map_or(false, |t| len.available >= t);
                if pos >= 1024 || at_eof {
                    return Err(WebmError::InvalidWebm(
                        "no EBML header within the first 1024 bytes".to_string(),
                    ));
                }
                return Err(WebmError::BufferNotFull { needed: len.available + 5 });
            }

            // Candidate byte: the full 4-byte ID plus the first size byte
            // must be resident before the candidate can be judged.
            if let Some(total) = len.total {
                if total - pos < 5 {
                    return Err(WebmError::InvalidWebm("EBML header truncated".to_string()));
                }
            }
            if len.available - pos < 5 {
                return Err(WebmError::BufferNotFull { needed: pos + 5 });
            }

            let (id, id_len) = ebml::read_id(reader, pos)?;
            if id == EBML {
                pos += id_len;
                break 'candidate;
            }
            // A stray 0x1A; drop it and keep scanning.
            pos += 1;
        }

        let (size, size_len) = ebml::read_size(reader, pos)?;
        let size = size.ok_or(WebmError::UnsupportedUnknownSize { element: "EBML" })?;
        pos += size_len;

        if let Some(total) = len.total {
            if pos + size > total {
                return Err(WebmError::InvalidElementSize {
                    offset: pos,
                    message: "EBML header extends past the end of the stream".to_string(),
                });
            }
        }
        if pos + size > len.available {
            return Err(WebmError::BufferNotFull { needed: pos + size });
        }

        let stop = pos + size;
        let mut header = EbmlHeader::default();

        while pos < stop {
            if let Some(v) = ebml::match_uint(reader, &mut pos, EBML_VERSION)? {
                header.version = v;
            } else if let Some(v) = ebml::match_uint(reader, &mut pos, EBML_READ_VERSION)? {
                header.read_version = v;
            } else if let Some(v) = ebml::match_uint(reader, &mut pos, EBML_MAX_ID_LENGTH)? {
                header.max_id_length = v;
            } else if let Some(v) = ebml::match_uint(reader, &mut pos, EBML_MAX_SIZE_LENGTH)? {
                header.max_size_length = v;
            } else if let Some(v) = ebml::match_string(reader, &mut pos, DOC_TYPE)? {
                header.doc_type = v;
            } else if let Some(v) = ebml::match_uint(reader, &mut pos, DOC_TYPE_VERSION)? {
                header.doc_type_version = v;
            } else if let Some(v) = ebml::match_uint(reader, &mut pos, DOC_TYPE_READ_VERSION)? {
                header.doc_type_read_version = v;
            } else {
                let (_, size, payload) = child_header(reader, pos, stop)?;
                pos = payload + size;
            }
        }

        Ok((header, stop))
    }
}

/// Decode one child element header inside `[pos, stop)` and validate that
/// its payload fits the bound.
fn child_header<R: ByteSource>(reader: &R, pos: u64, stop: u64) -> Result<(u64, u64, u64)> {
    let (id, id_len) = ebml::sync_read_id(reader, pos, stop)?;
    let (size, size_len) = ebml::sync_read_size(reader, pos + id_len, stop)?;
    let size = size.ok_or(WebmError::UnsupportedUnknownSize { element: element_name(id) })?;
    let payload = pos + id_len + size_len;
    if payload + size > stop {
        return Err(WebmError::InvalidElementSize {
            offset: pos + id_len,
            message: format!("{} payload crosses its enclosing bound", element_name(id)),
        });
    }
    Ok((id, size, payload))
}

// ============================================================================
// Segment info
// ============================================================================

/// Parsed segment information.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    /// Nanoseconds per timecode tick.
    pub timecode_scale: u64,
    /// Raw duration in timecode ticks, as stored.
    pub duration: Option<f64>,
    /// Muxing application.
    pub muxing_app: Option<String>,
    /// Writing application.
    pub writing_app: Option<String>,
    /// Title.
    pub title: Option<String>,
}

impl Default for SegmentInfo {
    fn default() -> Self {
        Self {
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            duration: None,
            muxing_app: None,
            writing_app: None,
            title: None,
        }
    }
}

impl SegmentInfo {
    /// Duration in nanoseconds, when the file declares one.
    pub fn duration_ns(&self) -> Option<u64> {
        self.duration.map(|d| (d * self.timecode_scale as f64) as u64)
    }

    fn parse<R: ByteSource>(reader: &R, start: u64, size: u64) -> Result<Self> {
        let stop = start + size;
        let mut pos = start;
        let mut info = SegmentInfo::default();

        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            match id {
                TIMECODE_SCALE => info.timecode_scale = ebml::read_uint(reader, payload, size)?,
                DURATION => info.duration = Some(ebml::read_float(reader, payload, size)?),
                MUXING_APP => info.muxing_app = Some(ebml::read_string(reader, payload, size)?),
                WRITING_APP => info.writing_app = Some(ebml::read_string(reader, payload, size)?),
                TITLE => info.title = Some(ebml::read_string(reader, payload, size)?),
                _ => {}
            }
            pos = payload + size;
        }

        if info.timecode_scale == 0 {
            return Err(WebmError::InvalidElementSize {
                offset: start,
                message: "zero timecode scale".to_string(),
            });
        }
        Ok(info)
    }
}

// ============================================================================
// Tracks
// ============================================================================

/// Video-specific track settings.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    /// Pixel width.
    pub pixel_width: u64,
    /// Pixel height.
    pub pixel_height: u64,
    /// Declared frame rate, if any.
    pub frame_rate: Option<f64>,
}

/// Audio-specific track settings.
#[derive(Debug, Clone)]
pub struct AudioInfo {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Channel count.
    pub channels: u64,
    /// Bits per sample, if declared.
    pub bit_depth: Option<u64>,
}

/// Per-kind track settings.
#[derive(Debug, Clone)]
pub enum TrackSettings {
    /// Video track settings.
    Video(VideoInfo),
    /// Audio track settings.
    Audio(AudioInfo),
}

/// One parsed TrackEntry.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// 1-based track number.
    pub number: u64,
    /// Track UID.
    pub uid: u64,
    /// Codec identifier string.
    pub codec_id: String,
    /// Codec private data.
    pub codec_private: Option<Vec<u8>>,
    /// Track name.
    pub name: Option<String>,
    /// Kind-specific settings.
    pub settings: TrackSettings,
}

impl TrackInfo {
    /// Whether this is a video track.
    pub fn is_video(&self) -> bool {
        matches!(self.settings, TrackSettings::Video(_))
    }

    /// The numeric track type code (1 video, 2 audio).
    pub fn track_type(&self) -> u64 {
        match self.settings {
            TrackSettings::Video(_) => TRACK_TYPE_VIDEO,
            TrackSettings::Audio(_) => TRACK_TYPE_AUDIO,
        }
    }

    /// Whether `block` is acceptable as a seek landing point for this
    /// track: video wants key frames, audio takes anything.
    fn vet_block(&self, block: &Block) -> bool {
        !self.is_video() || block.is_key()
    }
}

/// Parsed Tracks collection.
#[derive(Debug, Clone, Default)]
pub struct Tracks {
    entries: Vec<TrackInfo>,
}

impl Tracks {
    /// Number of tracks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a track by its 1-based number.
    pub fn by_number(&self, number: u64) -> Option<&TrackInfo> {
        self.entries.iter().find(|t| t.number == number)
    }

    /// Look up a track by array index.
    pub fn by_index(&self, index: usize) -> Option<&TrackInfo> {
        self.entries.get(index)
    }

    /// Iterate over all tracks.
    pub fn iter(&self) -> impl Iterator<Item = &TrackInfo> {
        self.entries.iter()
    }

    fn parse<R: ByteSource>(reader: &R, start: u64, size: u64) -> Result<Self> {
        let stop = start + size;
        let mut pos = start;
        let mut tracks = Tracks::default();

        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            if id == TRACK_ENTRY {
                if let Some(track) = Self::parse_entry(reader, payload, size)? {
                    tracks.entries.push(track);
                }
            }
            pos = payload + size;
        }

        Ok(tracks)
    }

    fn parse_entry<R: ByteSource>(
        reader: &R,
        start: u64,
        size: u64,
    ) -> Result<Option<TrackInfo>> {
        let stop = start + size;
        let mut pos = start;

        let mut number = 0u64;
        let mut uid = 0u64;
        let mut track_type = 0u64;
        let mut codec_id = String::new();
        let mut codec_private = None;
        let mut name = None;
        let mut video_span: Option<(u64, u64)> = None;
        let mut audio_span: Option<(u64, u64)> = None;

        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            match id {
                TRACK_NUMBER => number = ebml::read_uint(reader, payload, size)?,
                TRACK_UID => uid = ebml::read_uint(reader, payload, size)?,
                TRACK_TYPE => track_type = ebml::read_uint(reader, payload, size)?,
                CODEC_ID => codec_id = ebml::read_string(reader, payload, size)?,
                CODEC_PRIVATE => codec_private = Some(ebml::read_bytes(reader, payload, size)?),
                NAME => name = Some(ebml::read_string(reader, payload, size)?),
                VIDEO => video_span = Some((payload, size)),
                AUDIO => audio_span = Some((payload, size)),
                _ => {}
            }
            pos = payload + size;
        }

        if number == 0 {
            return Err(WebmError::MissingElement("TrackNumber"));
        }

        let settings = match track_type {
            TRACK_TYPE_VIDEO => {
                let (start, size) =
                    video_span.ok_or(WebmError::MissingElement("Video settings"))?;
                TrackSettings::Video(Self::parse_video(reader, start, size)?)
            }
            TRACK_TYPE_AUDIO => {
                let (start, size) =
                    audio_span.ok_or(WebmError::MissingElement("Audio settings"))?;
                TrackSettings::Audio(Self::parse_audio(reader, start, size)?)
            }
            // The WebM profile carries no other track kinds.
            _ => return Ok(None),
        };

        Ok(Some(TrackInfo { number, uid, codec_id, codec_private, name, settings }))
    }

    fn parse_video<R: ByteSource>(reader: &R, start: u64, size: u64) -> Result<VideoInfo> {
        let stop = start + size;
        let mut pos = start;
        let mut video = VideoInfo { pixel_width: 0, pixel_height: 0, frame_rate: None };

        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            match id {
                PIXEL_WIDTH => video.pixel_width = ebml::read_uint(reader, payload, size)?,
                PIXEL_HEIGHT => video.pixel_height = ebml::read_uint(reader, payload, size)?,
                FRAME_RATE => video.frame_rate = Some(ebml::read_float(reader, payload, size)?),
                _ => {}
            }
            pos = payload + size;
        }

        Ok(video)
    }

    fn parse_audio<R: ByteSource>(reader: &R, start: u64, size: u64) -> Result<AudioInfo> {
        let stop = start + size;
        let mut pos = start;
        let mut audio = AudioInfo { sample_rate: 8000.0, channels: 1, bit_depth: None };

        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            match id {
                SAMPLING_FREQUENCY => audio.sample_rate = ebml::read_float(reader, payload, size)?,
                CHANNELS => audio.channels = ebml::read_uint(reader, payload, size)?,
                BIT_DEPTH => audio.bit_depth = Some(ebml::read_uint(reader, payload, size)?),
                _ => {}
            }
            pos = payload + size;
        }

        Ok(audio)
    }
}

// ============================================================================
// Blocks
// ============================================================================

/// One decoded block header. The frame payload is *not* copied; the block
/// remembers its `(offset, length)` within the source instead.
#[derive(Debug, Clone)]
pub struct Block {
    track: u64,
    timecode: i16,
    flags: u8,
    frame_off: u64,
    frame_len: u64,
}

impl Block {
    fn parse<R: ByteSource>(reader: &R, start: u64, size: u64) -> Result<Self> {
        let stop = start + size;

        let (track, track_len) = ebml::read_vint(reader, start)?;
        if track == 0 {
            return Err(WebmError::InvalidBlock("zero track number".to_string()));
        }
        let mut pos = start + track_len;
        if stop.saturating_sub(pos) < 3 {
            return Err(WebmError::InvalidBlock("block header too small".to_string()));
        }

        let timecode = ebml::read_int(reader, pos, 2)? as i16;
        pos += 2;
        let flags = ebml::read_bytes(reader, pos, 1)?[0];
        pos += 1;

        Ok(Self { track, timecode, flags, frame_off: pos, frame_len: stop - pos })
    }

    /// Track number this block belongs to.
    pub fn track_number(&self) -> u64 {
        self.track
    }

    /// Cluster-relative timecode in ticks.
    pub fn relative_timecode(&self) -> i16 {
        self.timecode
    }

    /// Absolute timecode in ticks, given the owning cluster's base.
    pub fn timecode(&self, cluster_timecode: u64) -> i64 {
        cluster_timecode as i64 + self.timecode as i64
    }

    /// Absolute time in nanoseconds.
    pub fn time_ns(&self, cluster_timecode: u64, timecode_scale: u64) -> u64 {
        (self.timecode(cluster_timecode).max(0) as u64) * timecode_scale
    }

    /// Key-frame flag.
    pub fn is_key(&self) -> bool {
        self.flags & 0x80 != 0
    }

    fn set_key(&mut self, key: bool) {
        if key {
            self.flags |= 0x80;
        } else {
            self.flags &= 0x7F;
        }
    }

    /// Length of the raw frame payload.
    pub fn frame_len(&self) -> u64 {
        self.frame_len
    }

    /// Absolute source offset of the raw frame payload.
    pub fn frame_offset(&self) -> u64 {
        self.frame_off
    }

    /// Read the frame payload into an owned buffer.
    pub fn read_frame<R: ByteSource>(&self, reader: &R) -> Result<Vec<u8>> {
        ebml::read_bytes(reader, self.frame_off, self.frame_len)
    }
}

/// A BlockGroup: one block plus its reference information.
#[derive(Debug, Clone)]
pub struct BlockGroup {
    block: Block,
    prev_timecode: i16,
    next_timecode: i16,
}

impl BlockGroup {
    /// Relative timecode of the backward reference, when present.
    pub fn prev_timecode(&self) -> i16 {
        self.prev_timecode
    }

    /// Relative timecode of the forward reference, when present.
    pub fn next_timecode(&self) -> i16 {
        self.next_timecode
    }

    fn parse<R: ByteSource>(reader: &R, start: u64, size: u64) -> Result<Self> {
        let stop = start + size;
        let mut pos = start;

        let mut block: Option<Block> = None;
        let mut was_simple = false;
        let mut has_reference = false;
        let mut prev_timecode = 0i16;
        let mut next_timecode = 0i16;

        while pos < stop {
            if let Some(t) = ebml::match_i16(reader, &mut pos, REFERENCE_BLOCK)? {
                has_reference = true;
                if t < 0 {
                    prev_timecode = t;
                } else {
                    next_timecode = t;
                }
                continue;
            }
            let (id, size, payload) = child_header(reader, pos, stop)?;
            match id {
                SIMPLE_BLOCK => {
                    was_simple = true;
                    block = Some(Block::parse(reader, payload, size)?);
                }
                BLOCK => block = Some(Block::parse(reader, payload, size)?),
                _ => {}
            }
            pos = payload + size;
        }

        let mut block = block.ok_or(WebmError::MissingElement("Block"))?;
        if !was_simple {
            // A group's key-ness is defined by the absence of references.
            block.set_key(!has_reference);
        }

        Ok(Self { block, prev_timecode, next_timecode })
    }
}

/// One entry in a cluster's block index.
#[derive(Debug, Clone)]
pub enum BlockEntry {
    /// A bare SimpleBlock.
    SimpleBlock(Block),
    /// A BlockGroup wrapping one block.
    BlockGroup(BlockGroup),
}

impl BlockEntry {
    /// The block carried by this entry.
    pub fn block(&self) -> &Block {
        match self {
            BlockEntry::SimpleBlock(b) => b,
            BlockEntry::BlockGroup(g) => &g.block,
        }
    }
}

// ============================================================================
// Clusters
// ============================================================================

/// A discovered cluster. Offsets are relative to the segment payload; a
/// negative `pos` marks a cluster whose header has not been verified yet.
#[derive(Debug)]
struct Cluster {
    index: usize,
    pos: i64,
    size: i64,
    timecode: i64,
    entries: Option<Vec<BlockEntry>>,
}

impl Cluster {
    fn preloaded(index: usize, offset: u64) -> Self {
        debug_assert!(offset > 0);
        Self { index, pos: -(offset as i64), size: -1, timecode: -1, entries: None }
    }

    fn offset(&self) -> u64 {
        self.pos.unsigned_abs()
    }

    /// Verify the cluster header at the recorded offset and pull out the
    /// required Timecode child.
    fn load<R: ByteSource>(&mut self, reader: &R, segment_start: u64) -> Result<()> {
        if self.pos > 0 {
            return Ok(());
        }

        let offset = self.offset();
        let mut pos = segment_start + offset;

        let (id, id_len) = ebml::read_id(reader, pos)?;
        if id != CLUSTER {
            return Err(WebmError::InvalidElementSize {
                offset: pos,
                message: format!("expected Cluster, found {}", element_name(id)),
            });
        }
        pos += id_len;

        let (size, size_len) = ebml::read_size(reader, pos)?;
        let size = size.ok_or(WebmError::UnsupportedUnknownSize { element: "Cluster" })?;
        pos += size_len;

        let stop = pos + size;
        let mut timecode = None;

        while pos < stop {
            if let Some(tc) = ebml::match_uint(reader, &mut pos, TIMECODE)? {
                timecode = Some(tc);
                break;
            }
            let (id, size, payload) = child_header(reader, pos, stop)?;
            if id == BLOCK_GROUP || id == SIMPLE_BLOCK {
                break;
            }
            pos = payload + size;
        }

        let timecode = timecode.ok_or(WebmError::MissingElement("Timecode"))?;
        self.pos = offset as i64;
        self.size = size as i64;
        self.timecode = timecode as i64;
        trace!(index = self.index, offset, timecode, "loaded cluster header");
        Ok(())
    }

    /// Build the flat block-entry index: one counting pass, then one
    /// materializing pass.
    fn load_entries<R: ByteSource>(&mut self, reader: &R, segment_start: u64) -> Result<()> {
        if self.entries.is_some() {
            return Ok(());
        }
        self.load(reader, segment_start)?;

        let mut pos = segment_start + self.offset();
        let (_, id_len) = ebml::read_id(reader, pos)?;
        pos += id_len;
        let (_, size_len) = ebml::read_size(reader, pos)?;
        pos += size_len;

        let payload_start = pos;
        let stop = payload_start + self.size as u64;

        let mut count = 0usize;
        while pos < stop {
            if let Some(tc) = ebml::match_uint(reader, &mut pos, TIMECODE)? {
                if tc as i64 != self.timecode {
                    return Err(WebmError::Other(format!(
                        "cluster timecode changed from {} to {tc} between loads",
                        self.timecode
                    )));
                }
                continue;
            }
            let (id, size, payload) = child_header(reader, pos, stop)?;
            if id == BLOCK_GROUP || id == SIMPLE_BLOCK {
                count += 1;
            }
            pos = payload + size;
        }

        let mut entries = Vec::with_capacity(count);
        pos = payload_start;
        while pos < stop {
            if ebml::match_uint(reader, &mut pos, TIMECODE)?.is_some() {
                continue;
            }
            let (id, size, payload) = child_header(reader, pos, stop)?;
            match id {
                SIMPLE_BLOCK => {
                    entries.push(BlockEntry::SimpleBlock(Block::parse(reader, payload, size)?));
                }
                BLOCK_GROUP => {
                    entries.push(BlockEntry::BlockGroup(BlockGroup::parse(reader, payload, size)?));
                }
                _ => {}
            }
            pos = payload + size;
        }

        debug_assert_eq!(entries.len(), count);
        self.entries = Some(entries);
        Ok(())
    }
}

// ============================================================================
// Cues
// ============================================================================

/// Where a cue point lands for one track.
#[derive(Debug, Clone)]
pub struct TrackPosition {
    /// Track number.
    pub track: u64,
    /// Cluster offset from the start of the segment payload.
    pub cluster_pos: u64,
    /// 1-based block number within the cluster (1 when absent).
    pub block: u64,
}

impl TrackPosition {
    fn parse<R: ByteSource>(reader: &R, start: u64, size: u64) -> Result<Self> {
        let stop = start + size;
        let mut pos = start;

        let mut track = 0u64;
        let mut cluster_pos = None;
        let mut block = 1u64;

        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            match id {
                CUE_TRACK => track = ebml::read_uint(reader, payload, size)?,
                CUE_CLUSTER_POSITION => {
                    cluster_pos = Some(ebml::read_uint(reader, payload, size)?);
                }
                CUE_BLOCK_NUMBER => block = ebml::read_uint(reader, payload, size)?,
                _ => {}
            }
            pos = payload + size;
        }

        if track == 0 {
            return Err(WebmError::MissingElement("CueTrack"));
        }
        let cluster_pos = cluster_pos.ok_or(WebmError::MissingElement("CueClusterPosition"))?;
        if block == 0 {
            return Err(WebmError::InvalidBlock("zero cue block number".to_string()));
        }
        Ok(Self { track, cluster_pos, block })
    }
}

/// One cue point: a time plus per-track positions.
#[derive(Debug, Clone)]
pub struct CuePoint {
    /// Cue time in timecode ticks.
    pub timecode: u64,
    /// Positions, one per indexed track.
    pub track_positions: Vec<TrackPosition>,
}

impl CuePoint {
    /// Cue time in nanoseconds.
    pub fn time_ns(&self, timecode_scale: u64) -> u64 {
        self.timecode * timecode_scale
    }

    /// The position record for `track`, when this point indexes it.
    pub fn position_for(&self, track: u64) -> Option<&TrackPosition> {
        self.track_positions.iter().find(|tp| tp.track == track)
    }

    fn parse<R: ByteSource>(reader: &R, start: u64, size: u64) -> Result<Self> {
        let stop = start + size;

        // Count positions first, then materialize into an exact-size array.
        let mut pos = start;
        let mut timecode = None;
        let mut count = 0usize;
        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            match id {
                CUE_TIME => timecode = Some(ebml::read_uint(reader, payload, size)?),
                CUE_TRACK_POSITIONS => count += 1,
                _ => {}
            }
            pos = payload + size;
        }

        let timecode = timecode.ok_or(WebmError::MissingElement("CueTime"))?;
        if count == 0 {
            return Err(WebmError::MissingElement("CueTrackPositions"));
        }

        let mut track_positions = Vec::with_capacity(count);
        pos = start;
        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            if id == CUE_TRACK_POSITIONS {
                track_positions.push(TrackPosition::parse(reader, payload, size)?);
            }
            pos = payload + size;
        }

        Ok(Self { timecode, track_positions })
    }
}

/// Parsed cue index, sorted by time as the format requires.
#[derive(Debug, Clone, Default)]
pub struct Cues {
    cue_points: Vec<CuePoint>,
}

impl Cues {
    /// Number of cue points.
    pub fn len(&self) -> usize {
        self.cue_points.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.cue_points.is_empty()
    }

    /// Cue point by index.
    pub fn get(&self, index: usize) -> Option<&CuePoint> {
        self.cue_points.get(index)
    }

    /// Iterate over all cue points.
    pub fn iter(&self) -> impl Iterator<Item = &CuePoint> {
        self.cue_points.iter()
    }

    fn parse<R: ByteSource>(reader: &R, start: u64, size: u64) -> Result<Self> {
        let stop = start + size;

        let mut pos = start;
        let mut count = 0usize;
        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            if id == CUE_POINT {
                count += 1;
            }
            pos = payload + size;
        }

        let mut cue_points = Vec::with_capacity(count);
        pos = start;
        while pos < stop {
            let (id, size, payload) = child_header(reader, pos, stop)?;
            if id == CUE_POINT {
                cue_points.push(CuePoint::parse(reader, payload, size)?);
            }
            pos = payload + size;
        }

        Ok(Self { cue_points })
    }

    /// Greatest cue point with `time <= time_ns`, along with its position
    /// record for `track`. Queries before the first cue land on the first
    /// cue.
    pub fn find(
        &self,
        time_ns: u64,
        track: u64,
        timecode_scale: u64,
    ) -> Option<(&CuePoint, &TrackPosition)> {
        let first = self.cue_points.first()?;
        if time_ns <= first.time_ns(timecode_scale) {
            return first.position_for(track).map(|tp| (first, tp));
        }

        let mut lo = 0usize;
        let mut hi = self.cue_points.len();
        while lo < hi {
            // [0, lo) <= time_ns, [lo, hi) unknown, [hi, len) > time_ns
            let mid = lo + (hi - lo) / 2;
            if self.cue_points[mid].time_ns(timecode_scale) <= time_ns {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        debug_assert!(lo > 0);

        let cue = &self.cue_points[lo - 1];
        debug_assert!(cue.time_ns(timecode_scale) <= time_ns);
        cue.position_for(track).map(|tp| (cue, tp))
    }

    /// Smallest cue point strictly after `time_ns` for `track`.
    pub fn find_next(
        &self,
        time_ns: u64,
        track: u64,
        timecode_scale: u64,
    ) -> Option<(&CuePoint, &TrackPosition)> {
        let mut lo = 0usize;
        let mut hi = self.cue_points.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.cue_points[mid].time_ns(timecode_scale) <= time_ns {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let cue = self.cue_points.get(lo)?;
        debug_assert!(cue.time_ns(timecode_scale) > time_ns);
        cue.position_for(track).map(|tp| (cue, tp))
    }
}

// ============================================================================
// Demuxer
// ============================================================================

/// Index of one block entry within the demuxer's cluster array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    /// Cluster index.
    pub cluster: usize,
    /// Entry index within the cluster.
    pub entry: usize,
}

/// WebM demuxer over a positioned byte source.
pub struct WebmDemuxer<R: ByteSource> {
    reader: R,
    ebml_header: EbmlHeader,
    /// Absolute position of the segment payload.
    start: u64,
    /// Segment payload size.
    size: u64,
    /// Parse position for header/cluster discovery.
    pos: u64,
    headers_done: bool,
    info: Option<SegmentInfo>,
    tracks: Option<Tracks>,
    cues: Option<Cues>,
    clusters: Vec<Cluster>,
}

impl<R: ByteSource> WebmDemuxer<R> {
    /// Locate the Segment element and construct a demuxer covering its
    /// payload.
    ///
    /// Scans level-0 elements after the EBML header; anything before the
    /// Segment (Void, junk) is skipped.
    pub fn open(reader: R) -> Result<Self> {
        let (ebml_header, mut pos) = EbmlHeader::parse(&reader)?;
        if !ebml_header.is_webm() {
            return Err(WebmError::InvalidWebm(format!(
                "document type '{}', expected 'webm'",
                ebml_header.doc_type
            )));
        }

        let total = reader.length().total;
        loop {
            if let Some(total) = total {
                if pos >= total {
                    return Err(WebmError::MissingElement("Segment"));
                }
            }

            let (id, id_len) = ebml::read_id(&reader, pos)?;
            let (size, size_len) = ebml::read_size(&reader, pos + id_len)?;
            let payload = pos + id_len + size_len;

            if id == SEGMENT {
                let size = match size {
                    Some(s) => s,
                    // Unknown segment size: everything up to end of stream.
                    None => total
                        .ok_or(WebmError::UnsupportedUnknownSize { element: "Segment" })?
                        - payload,
                };
                if let Some(total) = total {
                    if payload + size > total {
                        return Err(WebmError::InvalidElementSize {
                            offset: pos + id_len,
                            message: "segment extends past the end of the stream".to_string(),
                        });
                    }
                }
                debug!(start = payload, size, "located segment");
                return Ok(Self {
                    reader,
                    ebml_header,
                    start: payload,
                    size,
                    pos: payload,
                    headers_done: false,
                    info: None,
                    tracks: None,
                    cues: None,
                    clusters: Vec::new(),
                });
            }

            let size = size.ok_or(WebmError::UnsupportedUnknownSize {
                element: element_name(id),
            })?;
            pos = payload + size;
        }
    }

    /// The parsed EBML document header.
    pub fn ebml_header(&self) -> &EbmlHeader {
        &self.ebml_header
    }

    /// Segment information, once [`WebmDemuxer::parse_headers`] succeeded.
    pub fn info(&self) -> Option<&SegmentInfo> {
        self.info.as_ref()
    }

    /// Track collection, once [`WebmDemuxer::parse_headers`] succeeded.
    pub fn tracks(&self) -> Option<&Tracks> {
        self.tracks.as_ref()
    }

    /// Cue index, when the file carries one and it has been reached.
    pub fn cues(&self) -> Option<&Cues> {
        self.cues.as_ref()
    }

    /// Nanoseconds per timecode tick.
    pub fn timecode_scale(&self) -> u64 {
        self.info.as_ref().map_or(DEFAULT_TIMECODE_SCALE, |i| i.timecode_scale)
    }

    /// Segment payload bytes not yet swept by cluster discovery.
    pub fn unparsed(&self) -> u64 {
        (self.start + self.size).saturating_sub(self.pos)
    }

    /// Number of clusters discovered so far.
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Offset of cluster `index` from the start of the segment payload.
    /// This is the value cue points carry in `CueClusterPosition`.
    pub fn cluster_offset(&self, index: usize) -> Option<u64> {
        self.clusters.get(index).map(Cluster::offset)
    }

    /// Advance through level-1 elements until the first cluster.
    ///
    /// Materializes SegmentInfo, Tracks and (when it precedes the clusters)
    /// Cues on first sight. Elements are consumed whole: if one is not
    /// fully resident the call returns [`WebmError::BufferNotFull`] without
    /// advancing past it.
    pub fn parse_headers(&mut self) -> Result<()> {
        if self.headers_done {
            return Ok(());
        }
        let stop = self.start + self.size;

        while self.pos < stop {
            let idpos = self.pos;
            let (id, id_len) = ebml::read_id(&self.reader, idpos)?;
            if idpos + id_len > stop {
                return Err(WebmError::InvalidElementSize {
                    offset: idpos,
                    message: "element ID crosses the segment bound".to_string(),
                });
            }
            if id == CLUSTER {
                // Leave the parse position on the cluster for discovery.
                break;
            }

            let (size, size_len) = ebml::read_size(&self.reader, idpos + id_len)?;
            let size = size.ok_or(WebmError::UnsupportedUnknownSize {
                element: element_name(id),
            })?;
            let payload = idpos + id_len + size_len;
            if payload + size > stop {
                return Err(WebmError::InvalidElementSize {
                    offset: idpos + id_len,
                    message: format!("{} payload crosses the segment bound", element_name(id)),
                });
            }
            // Whole element or nothing.
            if payload + size > self.reader.length().available {
                return Err(WebmError::BufferNotFull { needed: payload + size });
            }

            match id {
                INFO if self.info.is_none() => {
                    self.info = Some(SegmentInfo::parse(&self.reader, payload, size)?);
                }
                TRACKS if self.tracks.is_none() => {
                    self.tracks = Some(Tracks::parse(&self.reader, payload, size)?);
                }
                CUES if self.cues.is_none() => {
                    self.cues = Some(Cues::parse(&self.reader, payload, size)?);
                }
                _ => {}
            }
            self.pos = payload + size;
        }

        if self.info.is_none() {
            return Err(WebmError::MissingElement("Info"));
        }
        if self.tracks.is_none() {
            return Err(WebmError::MissingElement("Tracks"));
        }

        self.headers_done = true;
        debug!(
            tracks = self.tracks.as_ref().map_or(0, Tracks::len),
            has_cues = self.cues.is_some(),
            "parsed segment headers"
        );
        Ok(())
    }

    /// Discover the next cluster.
    ///
    /// Scans forward from the parse position, skipping non-cluster elements
    /// (a late Cues element is materialized on the way past). Returns
    /// `Ok(true)` when a cluster was appended, `Ok(false)` at the end of
    /// the segment. Before returning a cluster, one element past it (or
    /// its final byte, at end of segment) is read so the whole cluster
    /// body is guaranteed resident.
    pub fn parse_cluster(&mut self) -> Result<bool> {
        if !self.headers_done {
            self.parse_headers()?;
        }
        let stop = self.start + self.size;
        let mut pos = self.pos;
        let mut cluster_off = None;

        while pos < stop {
            let idpos = pos;
            let (id, id_len) = ebml::sync_read_id(&self.reader, pos, stop)?;
            pos += id_len;
            let (size, size_len) = ebml::sync_read_size(&self.reader, pos, stop)?;
            pos += size_len;
            let size = size.ok_or(WebmError::UnsupportedUnknownSize {
                element: element_name(id),
            })?;
            if size == 0 {
                continue;
            }
            let payload = pos;
            pos += size;
            if pos > stop {
                return Err(WebmError::InvalidElementSize {
                    offset: idpos + id_len,
                    message: format!("{} payload crosses the segment bound", element_name(id)),
                });
            }

            if id == CLUSTER {
                cluster_off = Some(idpos - self.start);
                break;
            }
            if id == CUES && self.cues.is_none() {
                self.cues = Some(Cues::parse(&self.reader, payload, size)?);
                trace!(cue_points = self.cues.as_ref().map_or(0, Cues::len), "parsed late cues");
            }
        }

        let Some(offset) = cluster_off else {
            self.pos = stop;
            return Ok(false);
        };

        // Guarantee the cluster body is resident: read the header of the
        // element that follows it, or the cluster's last byte at EOF.
        let next_pos = if pos >= stop {
            ebml::read_bytes(&self.reader, pos - 1, 1)?;
            stop
        } else {
            let following = pos;
            let (_, id_len) = ebml::sync_read_id(&self.reader, pos, stop)?;
            ebml::sync_read_size(&self.reader, pos + id_len, stop)?;
            following
        };

        let index = self.clusters.len();
        self.append_cluster(Cluster::preloaded(index, offset));
        self.pos = next_pos;
        trace!(index, offset, "discovered cluster");
        Ok(true)
    }

    /// Sweep the whole segment: headers plus every cluster.
    pub fn load(&mut self) -> Result<()> {
        self.parse_headers()?;
        while self.parse_cluster()? {}
        Ok(())
    }

    fn append_cluster(&mut self, cluster: Cluster) {
        if self.clusters.capacity() == 0 {
            self.clusters.reserve(self.preferred_cluster_capacity());
        }
        self.clusters.push(cluster);
    }

    /// Initial cluster-array reservation: one cluster per second of
    /// declared duration when known, else a generous default.
    fn preferred_cluster_capacity(&self) -> usize {
        self.info
            .as_ref()
            .and_then(SegmentInfo::duration_ns)
            .map(|ns| ns.div_ceil(1_000_000_000) as usize)
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_CLUSTER_RESERVE)
    }

    fn pump_needed(&self) -> WebmError {
        WebmError::BufferNotFull { needed: self.reader.length().available + 1 }
    }

    fn cluster_by_ref(&self, at: BlockRef) -> Result<&Cluster> {
        self.clusters
            .get(at.cluster)
            .ok_or_else(|| WebmError::Other(format!("cluster index {} out of range", at.cluster)))
    }

    /// Base timecode of cluster `index`, in ticks. Loads the cluster
    /// header on first access.
    pub fn cluster_timecode(&mut self, index: usize) -> Result<u64> {
        let cluster = self
            .clusters
            .get_mut(index)
            .ok_or_else(|| WebmError::Other(format!("cluster index {index} out of range")))?;
        cluster.load(&self.reader, self.start)?;
        Ok(cluster.timecode as u64)
    }

    /// Base time of cluster `index`, in nanoseconds.
    pub fn cluster_time_ns(&mut self, index: usize) -> Result<u64> {
        let scale = self.timecode_scale();
        Ok(self.cluster_timecode(index)? * scale)
    }

    /// Number of block entries in cluster `index`. Builds the block index
    /// on first access.
    pub fn block_count(&mut self, index: usize) -> Result<usize> {
        self.load_entries(index)?;
        Ok(self.clusters[index].entries.as_ref().map_or(0, Vec::len))
    }

    /// The block entry at `at`.
    pub fn block_entry(&mut self, at: BlockRef) -> Result<&BlockEntry> {
        self.load_entries(at.cluster)?;
        self.cluster_by_ref(at)?
            .entries
            .as_ref()
            .and_then(|entries| entries.get(at.entry))
            .ok_or_else(|| WebmError::Other(format!("block entry {} out of range", at.entry)))
    }

    /// Absolute time of the block at `at`, in nanoseconds.
    pub fn block_time_ns(&mut self, at: BlockRef) -> Result<u64> {
        let timecode = self.cluster_timecode(at.cluster)?;
        let scale = self.timecode_scale();
        Ok(self.block_entry(at)?.block().time_ns(timecode, scale))
    }

    /// Copy the raw frame bytes of the block at `at`.
    pub fn read_frame(&mut self, at: BlockRef) -> Result<Vec<u8>> {
        let (offset, len) = {
            let block = self.block_entry(at)?.block();
            (block.frame_offset(), block.frame_len())
        };
        ebml::read_bytes(&self.reader, offset, len)
    }

    fn load_entries(&mut self, index: usize) -> Result<()> {
        let start = self.start;
        let cluster = self
            .clusters
            .get_mut(index)
            .ok_or_else(|| WebmError::Other(format!("cluster index {index} out of range")))?;
        cluster.load_entries(&self.reader, start)
    }

    /// First block entry belonging to `track_number`.
    ///
    /// `Ok(None)` is end of stream. [`WebmError::BufferNotFull`] means the
    /// discovered clusters are exhausted but the segment has unparsed
    /// remainder: pump [`WebmDemuxer::parse_cluster`] and retry.
    pub fn first_block(&mut self, track_number: u64) -> Result<Option<BlockRef>> {
        self.scan_for_block(track_number, 0, 0)
    }

    /// Next block entry for `track_number` after `current`.
    pub fn next_block(&mut self, track_number: u64, current: BlockRef) -> Result<Option<BlockRef>> {
        self.scan_for_block(track_number, current.cluster, current.entry + 1)
    }

    fn scan_for_block(
        &mut self,
        track_number: u64,
        mut cluster: usize,
        mut entry: usize,
    ) -> Result<Option<BlockRef>> {
        for _ in 0..CLUSTER_SCAN_LIMIT {
            if cluster >= self.clusters.len() {
                if self.unparsed() == 0 {
                    return Ok(None);
                }
                return Err(self.pump_needed());
            }

            self.load_entries(cluster)?;
            let entries = self.clusters[cluster].entries.as_ref().expect("entries loaded");
            for (i, candidate) in entries.iter().enumerate().skip(entry) {
                if candidate.block().track_number() == track_number {
                    return Ok(Some(BlockRef { cluster, entry: i }));
                }
            }

            cluster += 1;
            entry = 0;
        }

        // Nothing for this track within the scan bound; treat as end.
        Ok(None)
    }

    /// First entry in cluster `index` acceptable as a landing point for
    /// `track_number` (any block for audio, a key frame for video).
    pub fn entry_for_track(
        &mut self,
        index: usize,
        track_number: u64,
    ) -> Result<Option<BlockRef>> {
        let track = self.require_track(track_number)?;
        self.load_entries(index)?;
        let entries = self.clusters[index].entries.as_ref().expect("entries loaded");
        for (i, candidate) in entries.iter().enumerate() {
            let block = candidate.block();
            if block.track_number() == track_number && track.vet_block(block) {
                return Ok(Some(BlockRef { cluster: index, entry: i }));
            }
        }
        Ok(None)
    }

    /// Last key-frame entry for `track_number` in cluster `index`.
    pub fn max_key_entry(&mut self, index: usize, track_number: u64) -> Result<Option<BlockRef>> {
        self.load_entries(index)?;
        let entries = self.clusters[index].entries.as_ref().expect("entries loaded");
        for (i, candidate) in entries.iter().enumerate().rev() {
            let block = candidate.block();
            if block.track_number() == track_number && block.is_key() {
                return Ok(Some(BlockRef { cluster: index, entry: i }));
            }
        }
        Ok(None)
    }

    fn require_track(&self, track_number: u64) -> Result<TrackInfo> {
        self.tracks
            .as_ref()
            .and_then(|t| t.by_number(track_number))
            .cloned()
            .ok_or(WebmError::TrackNotFound { track_number })
    }

    /// Index of the cluster a seek to `time_ns` on `track_number` should
    /// land in.
    ///
    /// Audio tracks binary-search the cluster array. Video tracks try the
    /// cue index first and fall back to a binary search followed by a
    /// backward walk to the greatest cluster holding a usable key frame.
    pub fn cluster_containing(
        &mut self,
        time_ns: u64,
        track_number: u64,
    ) -> Result<Option<usize>> {
        if self.clusters.is_empty() {
            return Ok(None);
        }
        let track = self.require_track(track_number)?;

        if time_ns <= self.cluster_time_ns(0)? {
            return Ok(Some(0));
        }

        if !track.is_video() {
            return Ok(Some(self.cluster_floor(time_ns)?));
        }

        if let Some(index) = self.search_cues(time_ns, track_number)? {
            return Ok(Some(index));
        }

        let floor = self.cluster_floor(time_ns)?;
        if let Some(at) = self.entry_for_track(floor, track_number)? {
            if self.block_time_ns(at)? <= time_ns {
                return Ok(Some(floor));
            }
        }

        // Walk backwards for the greatest earlier cluster with a key frame.
        let mut index = floor;
        while index > 0 {
            index -= 1;
            if self.max_key_entry(index, track_number)?.is_some() {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Greatest cluster index whose time is `<= time_ns`. Requires a
    /// non-empty cluster array and `time_ns` past the first cluster.
    fn cluster_floor(&mut self, time_ns: u64) -> Result<usize> {
        let mut lo = 0usize;
        let mut hi = self.clusters.len();
        while lo < hi {
            // [0, lo) <= time_ns, [lo, hi) unknown, [hi, len) > time_ns
            let mid = lo + (hi - lo) / 2;
            if self.cluster_time_ns(mid)? <= time_ns {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        debug_assert!(lo > 0);
        Ok(lo - 1)
    }

    /// Resolve `time_ns` through the cue index to a cluster index.
    fn search_cues(&mut self, time_ns: u64, track_number: u64) -> Result<Option<usize>> {
        if self.cues.as_ref().map_or(true, Cues::is_empty) || self.clusters.is_empty() {
            return Ok(None);
        }

        // Clamp to the last discovered cluster while the segment is still
        // partially parsed, so the cue search cannot point past the index.
        let last_time = self.cluster_time_ns(self.clusters.len() - 1)?;
        let query = if self.unparsed() == 0 || time_ns < last_time { time_ns } else { last_time };

        let scale = self.timecode_scale();
        let cues = self.cues.as_ref().expect("cues checked above");
        let Some((cue, position)) = cues.find(query, track_number, scale) else {
            return Ok(None);
        };
        trace!(
            cue_time = cue.timecode,
            cluster_pos = position.cluster_pos,
            "seeking via cue index"
        );
        let wanted = position.cluster_pos;

        // The cluster array is ordered by file position; find the exact
        // offset the cue names.
        let mut lo = 0usize;
        let mut hi = self.clusters.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let pos = self.clusters[mid].offset();
            if pos < wanted {
                lo = mid + 1;
            } else if pos > wanted {
                hi = mid;
            } else {
                return Ok(Some(mid));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::muxer::{AudioTrackConfig, VideoTrackConfig, WebmMuxer};
    use mediamux_core::{MemoryWriter, SliceSource};

    fn mux_simple_file() -> Vec<u8> {
        let mut muxer = WebmMuxer::new(MemoryWriter::new());
        let video = muxer.add_video_track(VideoTrackConfig::new(640, 480)).unwrap();
        let audio = muxer
            .add_audio_track(AudioTrackConfig::new(44100.0, 2).with_bit_depth(16))
            .unwrap();

        for i in 0..3u64 {
            let t = i * 40_000_000;
            muxer.add_frame(&[0x10 + i as u8; 20], video, t, true).unwrap();
            muxer.add_frame(&[0x80 + i as u8; 12], audio, t, true).unwrap();
        }
        muxer.finalize().unwrap();
        muxer.into_inner().into_inner()
    }

    #[test]
    fn test_open_parses_ebml_header() {
        let demuxer = WebmDemuxer::open(SliceSource::new(mux_simple_file())).unwrap();
        let header = demuxer.ebml_header();
        assert!(header.is_webm());
        assert_eq!(header.version, 1);
        assert_eq!(header.max_id_length, 4);
        assert_eq!(header.max_size_length, 8);
        assert_eq!(header.doc_type_version, 2);
    }

    #[test]
    fn test_open_rejects_non_webm() {
        let garbage = vec![0x42u8; 64];
        assert!(WebmDemuxer::open(SliceSource::new(garbage)).is_err());
    }

    #[test]
    fn test_parse_headers_materializes_info_and_tracks() {
        let mut demuxer = WebmDemuxer::open(SliceSource::new(mux_simple_file())).unwrap();
        demuxer.parse_headers().unwrap();

        let info = demuxer.info().unwrap();
        assert_eq!(info.timecode_scale, 1_000_000);
        assert!(info.muxing_app.is_some());

        let tracks = demuxer.tracks().unwrap();
        assert_eq!(tracks.len(), 2);

        let video = tracks.by_number(1).unwrap();
        assert!(video.is_video());
        assert_eq!(video.codec_id, "V_VP8");
        match &video.settings {
            TrackSettings::Video(v) => {
                assert_eq!(v.pixel_width, 640);
                assert_eq!(v.pixel_height, 480);
            }
            other => panic!("expected video settings, got {other:?}"),
        }

        let audio = tracks.by_number(2).unwrap();
        assert_eq!(audio.codec_id, "A_VORBIS");
        match &audio.settings {
            TrackSettings::Audio(a) => {
                assert_eq!(a.sample_rate, 44100.0);
                assert_eq!(a.channels, 2);
                assert_eq!(a.bit_depth, Some(16));
            }
            other => panic!("expected audio settings, got {other:?}"),
        }
    }

    #[test]
    fn test_load_discovers_all_clusters() {
        let mut demuxer = WebmDemuxer::open(SliceSource::new(mux_simple_file())).unwrap();
        demuxer.load().unwrap();
        assert_eq!(demuxer.cluster_count(), 3);
        assert_eq!(demuxer.unparsed(), 0);

        assert_eq!(demuxer.cluster_timecode(0).unwrap(), 0);
        assert_eq!(demuxer.cluster_timecode(1).unwrap(), 40);
        assert_eq!(demuxer.cluster_timecode(2).unwrap(), 80);
        assert_eq!(demuxer.block_count(0).unwrap(), 2);
    }

    #[test]
    fn test_block_iteration_filters_by_track() {
        let mut demuxer = WebmDemuxer::open(SliceSource::new(mux_simple_file())).unwrap();
        demuxer.load().unwrap();

        let mut times = Vec::new();
        let mut at = demuxer.first_block(2).unwrap();
        while let Some(r) = at {
            let entry = demuxer.block_entry(r).unwrap();
            assert_eq!(entry.block().track_number(), 2);
            times.push(demuxer.block_time_ns(r).unwrap());
            at = demuxer.next_block(2, r).unwrap();
        }
        assert_eq!(times, vec![0, 40_000_000, 80_000_000]);
    }

    #[test]
    fn test_read_frame_round_trips_bytes() {
        let mut demuxer = WebmDemuxer::open(SliceSource::new(mux_simple_file())).unwrap();
        demuxer.load().unwrap();

        let first = demuxer.first_block(1).unwrap().unwrap();
        assert_eq!(demuxer.read_frame(first).unwrap(), vec![0x10; 20]);

        let second = demuxer.next_block(1, first).unwrap().unwrap();
        assert_eq!(demuxer.read_frame(second).unwrap(), vec![0x11; 20]);
    }

    #[test]
    fn test_cues_binary_search() {
        let mut demuxer = WebmDemuxer::open(SliceSource::new(mux_simple_file())).unwrap();
        demuxer.load().unwrap();
        let scale = demuxer.timecode_scale();

        let cues = demuxer.cues().expect("file carries cues");
        assert_eq!(cues.len(), 3);

        // Before the first cue: clamped to the first cue.
        let (cue, tp) = cues.find(0, 1, scale).unwrap();
        assert_eq!(cue.timecode, 0);
        assert_eq!(tp.track, 1);

        let (cue, _) = cues.find(55_000_000, 1, scale).unwrap();
        assert_eq!(cue.timecode, 40);

        let (cue, _) = cues.find_next(55_000_000, 1, scale).unwrap();
        assert_eq!(cue.timecode, 80);
        assert!(cues.find_next(90_000_000, 1, scale).is_none());
    }

    #[test]
    fn test_cue_monotonicity() {
        let mut demuxer = WebmDemuxer::open(SliceSource::new(mux_simple_file())).unwrap();
        demuxer.load().unwrap();
        let cues = demuxer.cues().unwrap();
        let points: Vec<_> = cues.iter().collect();
        for pair in points.windows(2) {
            assert!(pair[0].timecode <= pair[1].timecode);
            assert!(
                pair[0].track_positions[0].cluster_pos <= pair[1].track_positions[0].cluster_pos
            );
        }
    }

    #[test]
    fn test_cluster_containing_video_and_audio() {
        let mut demuxer = WebmDemuxer::open(SliceSource::new(mux_simple_file())).unwrap();
        demuxer.load().unwrap();

        // Video goes through the cue index.
        assert_eq!(demuxer.cluster_containing(0, 1).unwrap(), Some(0));
        assert_eq!(demuxer.cluster_containing(55_000_000, 1).unwrap(), Some(1));
        assert_eq!(demuxer.cluster_containing(80_000_000, 1).unwrap(), Some(2));
        assert_eq!(demuxer.cluster_containing(500_000_000, 1).unwrap(), Some(2));

        // Audio binary-searches the cluster array.
        assert_eq!(demuxer.cluster_containing(41_000_000, 2).unwrap(), Some(1));
    }

    #[test]
    fn test_block_group_key_follows_references() {
        // A BlockGroup with a ReferenceBlock child is not a key frame; one
        // without is.
        let mut group = Vec::new();
        // Block: track 1, timecode 0, flags 0, one payload byte.
        let block_payload = [0x81, 0x00, 0x00, 0x00, 0xAB];
        group.extend_from_slice(&[0xA1, 0x80 | block_payload.len() as u8]);
        group.extend_from_slice(&block_payload);

        let src = SliceSource::new(group.clone());
        let parsed = BlockGroup::parse(&src, 0, group.len() as u64).unwrap();
        assert!(parsed.block.is_key());

        // Same group plus ReferenceBlock(-40).
        group.extend_from_slice(&[0xFB, 0x81, (-40i8) as u8]);
        let src = SliceSource::new(group.clone());
        let parsed = BlockGroup::parse(&src, 0, group.len() as u64).unwrap();
        assert!(!parsed.block.is_key());
        assert_eq!(parsed.prev_timecode(), -40);
    }

    #[test]
    fn test_block_ref_out_of_range_is_an_error() {
        let mut demuxer = WebmDemuxer::open(SliceSource::new(mux_simple_file())).unwrap();
        demuxer.load().unwrap();
        assert!(demuxer.block_entry(BlockRef { cluster: 9, entry: 0 }).is_err());
        assert!(demuxer.block_entry(BlockRef { cluster: 0, entry: 99 }).is_err());
    }
}
