//! WebM element definitions and constants.
//!
//! WebM is a constrained profile of Matroska; this module defines the EBML
//! element IDs for exactly that profile. IDs are the full class-D values as
//! they appear on the wire, marker bits included.

// ============================================================================
// EBML Header Elements
// ============================================================================

/// EBML (root of the EBML header).
pub const EBML: u64 = 0x1A45DFA3;
/// EBMLVersion.
pub const EBML_VERSION: u64 = 0x4286;
/// EBMLReadVersion.
pub const EBML_READ_VERSION: u64 = 0x42F7;
/// EBMLMaxIDLength.
pub const EBML_MAX_ID_LENGTH: u64 = 0x42F2;
/// EBMLMaxSizeLength.
pub const EBML_MAX_SIZE_LENGTH: u64 = 0x42F3;
/// DocType.
pub const DOC_TYPE: u64 = 0x4282;
/// DocTypeVersion.
pub const DOC_TYPE_VERSION: u64 = 0x4287;
/// DocTypeReadVersion.
pub const DOC_TYPE_READ_VERSION: u64 = 0x4285;

// ============================================================================
// Segment and SeekHead
// ============================================================================

/// Segment (the single level-0 container for everything else).
pub const SEGMENT: u64 = 0x18538067;

/// SeekHead (index of level-1 element offsets).
pub const SEEK_HEAD: u64 = 0x114D9B74;
/// Seek (one SeekHead entry).
pub const SEEK: u64 = 0x4DBB;
/// SeekID.
pub const SEEK_ID: u64 = 0x53AB;
/// SeekPosition (offset relative to the segment payload).
pub const SEEK_POSITION: u64 = 0x53AC;

// ============================================================================
// Segment Info
// ============================================================================

/// Info (segment information).
pub const INFO: u64 = 0x1549A966;
/// TimecodeScale (nanoseconds per timecode tick).
pub const TIMECODE_SCALE: u64 = 0x2AD7B1;
/// Duration (float, in timecode ticks).
pub const DURATION: u64 = 0x4489;
/// Title.
pub const TITLE: u64 = 0x7BA9;
/// MuxingApp.
pub const MUXING_APP: u64 = 0x4D80;
/// WritingApp.
pub const WRITING_APP: u64 = 0x5741;

// ============================================================================
// Tracks
// ============================================================================

/// Tracks container.
pub const TRACKS: u64 = 0x1654AE6B;
/// TrackEntry.
pub const TRACK_ENTRY: u64 = 0xAE;
/// TrackNumber.
pub const TRACK_NUMBER: u64 = 0xD7;
/// TrackUID.
pub const TRACK_UID: u64 = 0x73C5;
/// TrackType.
pub const TRACK_TYPE: u64 = 0x83;
/// TrackName.
pub const NAME: u64 = 0x536E;
/// CodecID.
pub const CODEC_ID: u64 = 0x86;
/// CodecPrivate.
pub const CODEC_PRIVATE: u64 = 0x63A2;

/// Video settings container.
pub const VIDEO: u64 = 0xE0;
/// PixelWidth.
pub const PIXEL_WIDTH: u64 = 0xB0;
/// PixelHeight.
pub const PIXEL_HEIGHT: u64 = 0xBA;
/// FrameRate (informational).
pub const FRAME_RATE: u64 = 0x2383E3;

/// Audio settings container.
pub const AUDIO: u64 = 0xE1;
/// SamplingFrequency (4-byte float).
pub const SAMPLING_FREQUENCY: u64 = 0xB5;
/// Channels.
pub const CHANNELS: u64 = 0x9F;
/// BitDepth.
pub const BIT_DEPTH: u64 = 0x6264;

// Track type codes.
/// Video track type.
pub const TRACK_TYPE_VIDEO: u64 = 1;
/// Audio track type.
pub const TRACK_TYPE_AUDIO: u64 = 2;

// ============================================================================
// Clusters
// ============================================================================

/// Cluster (one group of blocks sharing a base timecode).
pub const CLUSTER: u64 = 0x1F43B675;
/// Timecode (cluster base timecode, in ticks).
pub const TIMECODE: u64 = 0xE7;
/// SimpleBlock.
pub const SIMPLE_BLOCK: u64 = 0xA3;
/// BlockGroup.
pub const BLOCK_GROUP: u64 = 0xA0;
/// Block (inside a BlockGroup).
pub const BLOCK: u64 = 0xA1;
/// ReferenceBlock (presence marks a dependent frame).
pub const REFERENCE_BLOCK: u64 = 0xFB;

// ============================================================================
// Cues
// ============================================================================

/// Cues (seek index).
pub const CUES: u64 = 0x1C53BB6B;
/// CuePoint.
pub const CUE_POINT: u64 = 0xBB;
/// CueTime.
pub const CUE_TIME: u64 = 0xB3;
/// CueTrackPositions.
pub const CUE_TRACK_POSITIONS: u64 = 0xB7;
/// CueTrack.
pub const CUE_TRACK: u64 = 0xF7;
/// CueClusterPosition.
pub const CUE_CLUSTER_POSITION: u64 = 0xF1;
/// CueBlockNumber (1-based; omitted on the wire when 1).
pub const CUE_BLOCK_NUMBER: u64 = 0x5378;

// ============================================================================
// Utility
// ============================================================================

/// Void (padding).
pub const VOID: u64 = 0xEC;
/// CRC-32.
pub const CRC32: u64 = 0xBF;

// ============================================================================
// Codec ID strings
// ============================================================================

/// Codec identifiers carried by the WebM profile.
pub mod codec_ids {
    /// VP8 video.
    pub const V_VP8: &str = "V_VP8";
    /// Vorbis audio.
    pub const A_VORBIS: &str = "A_VORBIS";
}

/// Get a human-readable name for an element ID.
pub fn element_name(id: u64) -> &'static str {
    match id {
        EBML => "EBML",
        EBML_VERSION => "EBMLVersion",
        EBML_READ_VERSION => "EBMLReadVersion",
        EBML_MAX_ID_LENGTH => "EBMLMaxIDLength",
        EBML_MAX_SIZE_LENGTH => "EBMLMaxSizeLength",
        DOC_TYPE => "DocType",
        DOC_TYPE_VERSION => "DocTypeVersion",
        DOC_TYPE_READ_VERSION => "DocTypeReadVersion",
        SEGMENT => "Segment",
        SEEK_HEAD => "SeekHead",
        SEEK => "Seek",
        SEEK_ID => "SeekID",
        SEEK_POSITION => "SeekPosition",
        INFO => "Info",
        TIMECODE_SCALE => "TimecodeScale",
        DURATION => "Duration",
        TITLE => "Title",
        MUXING_APP => "MuxingApp",
        WRITING_APP => "WritingApp",
        TRACKS => "Tracks",
        TRACK_ENTRY => "TrackEntry",
        TRACK_NUMBER => "TrackNumber",
        TRACK_UID => "TrackUID",
        TRACK_TYPE => "TrackType",
        NAME => "TrackName",
        CODEC_ID => "CodecID",
        CODEC_PRIVATE => "CodecPrivate",
        VIDEO => "Video",
        PIXEL_WIDTH => "PixelWidth",
        PIXEL_HEIGHT => "PixelHeight",
        FRAME_RATE => "FrameRate",
        AUDIO => "Audio",
        SAMPLING_FREQUENCY => "SamplingFrequency",
        CHANNELS => "Channels",
        BIT_DEPTH => "BitDepth",
        CLUSTER => "Cluster",
        TIMECODE => "Timecode",
        SIMPLE_BLOCK => "SimpleBlock",
        BLOCK_GROUP => "BlockGroup",
        BLOCK => "Block",
        REFERENCE_BLOCK => "ReferenceBlock",
        CUES => "Cues",
        CUE_POINT => "CuePoint",
        CUE_TIME => "CueTime",
        CUE_TRACK_POSITIONS => "CueTrackPositions",
        CUE_TRACK => "CueTrack",
        CUE_CLUSTER_POSITION => "CueClusterPosition",
        CUE_BLOCK_NUMBER => "CueBlockNumber",
        VOID => "Void",
        CRC32 => "CRC32",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_names() {
        assert_eq!(element_name(EBML), "EBML");
        assert_eq!(element_name(SEGMENT), "Segment");
        assert_eq!(element_name(CLUSTER), "Cluster");
        assert_eq!(element_name(SIMPLE_BLOCK), "SimpleBlock");
        assert_eq!(element_name(0xFFFF_FFFF), "Unknown");
    }

    #[test]
    fn test_track_type_codes() {
        assert_eq!(TRACK_TYPE_VIDEO, 1);
        assert_eq!(TRACK_TYPE_AUDIO, 2);
    }

    #[test]
    fn test_ids_match_wire_layout() {
        // Level-0/level-1 IDs serialize at 4 bytes, common children at 1-2.
        assert_eq!(SEGMENT, 0x18538067);
        assert_eq!(SEEK_HEAD, 0x114D9B74);
        assert_eq!(CUES, 0x1C53BB6B);
        assert_eq!(TIMECODE, 0xE7);
        assert_eq!(CUE_BLOCK_NUMBER, 0x5378);
    }
}
