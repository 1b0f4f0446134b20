//! End-to-end mux/demux scenarios over in-memory sinks and sources.

use mediamux_core::{ByteSource, MemoryWriter, SliceSource, StreamWriter, WindowSource};
use mediamux_webm::ebml::{self, ElementHeader};
use mediamux_webm::elements;
use mediamux_webm::{
    AudioTrackConfig, VideoTrackConfig, WebmDemuxer, WebmError, WebmMuxer,
};

/// Walk the level-0/level-1 structure of `bytes` and return the absolute
/// span `(payload_pos, payload_size)` of the first element with `id` at
/// nesting positions described by `path`.
fn find_element(bytes: &[u8], path: &[u64]) -> Option<(u64, u64)> {
    let src = SliceSource::new(bytes.to_vec());
    let mut pos = 0u64;
    let mut end = bytes.len() as u64;

    for (depth, &wanted) in path.iter().enumerate() {
        let mut found = None;
        while pos < end {
            let header = ElementHeader::read_at(&src, pos).ok()?;
            let payload = pos + header.header_len;
            // An unknown size extends to the enclosing bound.
            let size = header.size.unwrap_or(end - payload);
            if header.id == wanted {
                found = Some((payload, size));
                break;
            }
            pos = payload + size;
        }
        let (payload, size) = found?;
        if depth + 1 == path.len() {
            return Some((payload, size));
        }
        pos = payload;
        end = payload + size;
    }
    None
}

/// Collect `(id, payload_pos, payload_size)` for every child of a span.
fn children_of(bytes: &[u8], start: u64, size: u64) -> Vec<(u64, u64, u64)> {
    let src = SliceSource::new(bytes.to_vec());
    let stop = start + size;
    let mut pos = start;
    let mut out = Vec::new();
    while pos < stop {
        let header = ElementHeader::read_at(&src, pos).expect("well-formed children");
        let payload = pos + header.header_len;
        let child_size = header.size.expect("concrete child size");
        out.push((header.id, payload, child_size));
        pos = payload + child_size;
    }
    out
}

#[test]
fn header_only_file() {
    let mut muxer = WebmMuxer::new(MemoryWriter::new());
    muxer.add_video_track(VideoTrackConfig::new(640, 480)).unwrap();
    muxer.finalize().unwrap();
    let bytes = muxer.into_inner().into_inner();

    // The EBML header parses and declares webm.
    let mut demuxer = WebmDemuxer::open(SliceSource::new(bytes.clone())).unwrap();
    demuxer.load().unwrap();
    assert!(demuxer.ebml_header().is_webm());
    assert_eq!(demuxer.cluster_count(), 0);

    // SegmentInfo: default scale, no duration.
    let info = demuxer.info().unwrap();
    assert_eq!(info.timecode_scale, 1_000_000);
    assert_eq!(info.duration, None);

    // Tracks: exactly one video track, number 1.
    let tracks = demuxer.tracks().unwrap();
    assert_eq!(tracks.len(), 1);
    let track = tracks.by_number(1).unwrap();
    assert!(track.is_video());

    // The rewritten SeekHead lists exactly Info and Tracks.
    let (seek_start, seek_size) =
        find_element(&bytes, &[elements::SEGMENT, elements::SEEK_HEAD]).unwrap();
    let src = SliceSource::new(bytes.clone());
    let mut listed = Vec::new();
    for (id, payload, size) in children_of(&bytes, seek_start, seek_size) {
        assert_eq!(id, elements::SEEK);
        for (child, child_payload, child_size) in children_of(&bytes, payload, size) {
            if child == elements::SEEK_ID {
                listed.push(ebml::read_uint(&src, child_payload, child_size).unwrap());
            }
        }
    }
    assert_eq!(listed, vec![elements::INFO, elements::TRACKS]);

    // No cues were written.
    assert!(find_element(&bytes, &[elements::SEGMENT, elements::CUES]).is_none());
    assert!(demuxer.cues().is_none());
}

#[test]
fn two_frames_share_one_cluster() {
    let f1 = vec![0xAA; 24];
    let f2 = vec![0xBB; 18];

    let mut muxer = WebmMuxer::new(MemoryWriter::new());
    let video = muxer.add_video_track(VideoTrackConfig::new(320, 240)).unwrap();
    muxer.add_frame(&f1, video, 0, true).unwrap();
    muxer.add_frame(&f2, video, 33_000_000, false).unwrap();
    muxer.finalize().unwrap();
    let bytes = muxer.into_inner().into_inner();

    let mut demuxer = WebmDemuxer::open(SliceSource::new(bytes)).unwrap();
    demuxer.load().unwrap();

    assert_eq!(demuxer.cluster_count(), 1);
    assert_eq!(demuxer.cluster_timecode(0).unwrap(), 0);
    assert_eq!(demuxer.block_count(0).unwrap(), 2);

    let first = demuxer.first_block(video).unwrap().unwrap();
    let second = demuxer.next_block(video, first).unwrap().unwrap();
    assert!(demuxer.next_block(video, second).unwrap().is_none());

    let b1 = demuxer.block_entry(first).unwrap().block().clone();
    let b2 = demuxer.block_entry(second).unwrap().block().clone();
    assert_eq!(b1.relative_timecode(), 0);
    assert!(b1.is_key());
    assert_eq!(b2.relative_timecode(), 33);
    assert!(!b2.is_key());

    assert_eq!(demuxer.read_frame(first).unwrap(), f1);
    assert_eq!(demuxer.read_frame(second).unwrap(), f2);

    // One cue point, pointing the video track at the only cluster.
    let cues = demuxer.cues().unwrap();
    assert_eq!(cues.len(), 1);
    let cue = cues.get(0).unwrap();
    assert_eq!(cue.timecode, 0);
    let tp = cue.position_for(video).unwrap();
    assert_eq!(tp.block, 1);
    assert_eq!(Some(tp.cluster_pos), demuxer.cluster_offset(0));
}

#[test]
fn key_frames_split_clusters_and_cues_track_them() {
    let mut muxer = WebmMuxer::new(MemoryWriter::new());
    let video = muxer.add_video_track(VideoTrackConfig::new(320, 240)).unwrap();
    for i in 0..3u64 {
        muxer.add_frame(&[i as u8; 16], video, i * 40_000_000, true).unwrap();
    }
    muxer.finalize().unwrap();
    let bytes = muxer.into_inner().into_inner();

    let mut demuxer = WebmDemuxer::open(SliceSource::new(bytes)).unwrap();
    demuxer.load().unwrap();

    assert_eq!(demuxer.cluster_count(), 3);
    let cues = demuxer.cues().unwrap();
    assert_eq!(cues.len(), 3);

    for i in 0..3usize {
        assert_eq!(demuxer.cluster_timecode(i).unwrap(), i as u64 * 40);
        let cue = demuxer.cues().unwrap().get(i).unwrap();
        assert_eq!(cue.timecode, i as u64 * 40);
        let tp = cue.position_for(1).unwrap();
        assert_eq!(Some(tp.cluster_pos), demuxer.cluster_offset(i));
    }
}

#[test]
fn live_sink_keeps_placeholders_and_writes_no_index() {
    let frames: &[(&[u8], u64, bool)] = &[
        (&[0xAA; 24], 0, true),
        (&[0xBB; 18], 33_000_000, false),
    ];

    let mut muxer = WebmMuxer::new(StreamWriter::new(Vec::new()));
    let video = muxer.add_video_track(VideoTrackConfig::new(320, 240)).unwrap();
    for &(frame, t, key) in frames {
        muxer.add_frame(frame, video, t, key).unwrap();
    }
    muxer.finalize().unwrap();
    let bytes = muxer.into_inner().into_inner();

    const PLACEHOLDER: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

    // Segment size is still the unknown-size marker.
    let segment_id = bytes
        .windows(4)
        .position(|w| w == [0x18, 0x53, 0x80, 0x67])
        .expect("segment present");
    assert_eq!(&bytes[segment_id + 4..segment_id + 12], &PLACEHOLDER);

    // So is the cluster's.
    let cluster_id = bytes
        .windows(4)
        .position(|w| w == [0x1F, 0x43, 0xB6, 0x75])
        .expect("cluster present");
    assert_eq!(&bytes[cluster_id + 4..cluster_id + 12], &PLACEHOLDER);

    // No Cues element anywhere.
    assert!(!bytes.windows(4).any(|w| w == [0x1C, 0x53, 0xBB, 0x6B]));

    // The SeekHead reservation was never rewritten: the segment payload
    // still begins with one big Void.
    let payload_start = segment_id as u64 + 4 + 8;
    let src = SliceSource::new(bytes.clone());
    let first = ElementHeader::read_at(&src, payload_start).unwrap();
    assert_eq!(first.id, elements::VOID);
    assert_eq!(first.header_len + first.size.unwrap(), 89);

    // SegmentInfo carries no Duration.
    let (info_start, info_size) =
        find_element(&bytes, &[elements::SEGMENT, elements::INFO]).unwrap();
    let child_ids: Vec<u64> = children_of(&bytes, info_start, info_size)
        .into_iter()
        .map(|(id, _, _)| id)
        .collect();
    assert!(!child_ids.contains(&elements::DURATION));
    assert!(child_ids.contains(&elements::TIMECODE_SCALE));
}

#[test]
fn incremental_parse_one_byte_at_a_time() {
    let mut muxer = WebmMuxer::new(MemoryWriter::new());
    let video = muxer.add_video_track(VideoTrackConfig::new(320, 240)).unwrap();
    for i in 0..3u64 {
        muxer.add_frame(&[i as u8; 16], video, i * 40_000_000, true).unwrap();
    }
    muxer.finalize().unwrap();
    let bytes = muxer.into_inner().into_inner();
    let total = bytes.len() as u64;

    let source = WindowSource::new(bytes);
    let mut fed = 0u64;
    let mut feed_one = |n: &mut u64| {
        *n += 1;
        assert!(*n <= total, "parser demanded bytes past the end of the file");
        source.set_available(*n);
    };

    // Open: retried as bytes trickle in.
    let mut demuxer = loop {
        match WebmDemuxer::open(&source) {
            Ok(d) => break d,
            Err(WebmError::BufferNotFull { .. }) => feed_one(&mut fed),
            Err(other) => panic!("unexpected open failure: {other}"),
        }
    };

    loop {
        match demuxer.parse_headers() {
            Ok(()) => break,
            Err(WebmError::BufferNotFull { needed }) => {
                assert!(needed > source.length().available);
                feed_one(&mut fed);
            }
            Err(other) => panic!("unexpected header failure: {other}"),
        }
    }

    loop {
        match demuxer.parse_cluster() {
            Ok(true) => {}
            Ok(false) => break,
            Err(WebmError::BufferNotFull { .. }) => feed_one(&mut fed),
            Err(other) => panic!("unexpected cluster failure: {other}"),
        }
    }

    assert_eq!(demuxer.cluster_count(), 3);

    let scale = demuxer.timecode_scale();
    let (cue, _) = demuxer.cues().unwrap().find(55_000_000, video, scale).unwrap();
    assert_eq!(cue.timecode, 40);
}

#[test]
fn cluster_binary_search_matches_linear_scan() {
    const CLUSTERS: u64 = 1000;
    const SPACING_NS: u64 = 100_000_000;

    let mut muxer = WebmMuxer::new(MemoryWriter::new());
    let video = muxer.add_video_track(VideoTrackConfig::new(160, 120)).unwrap();
    let audio = muxer.add_audio_track(AudioTrackConfig::new(48000.0, 2)).unwrap();
    for i in 0..CLUSTERS {
        let t = i * SPACING_NS;
        muxer.add_frame(&[0x55; 8], video, t, true).unwrap();
        muxer.add_frame(&[0x66; 4], audio, t, true).unwrap();
    }
    muxer.finalize().unwrap();
    let bytes = muxer.into_inner().into_inner();

    let mut demuxer = WebmDemuxer::open(SliceSource::new(bytes)).unwrap();
    demuxer.load().unwrap();
    assert_eq!(demuxer.cluster_count(), CLUSTERS as usize);

    // Deterministic pseudo-random queries across the whole timeline.
    let mut state = 0x2545F491_4F6C_DD1Du64;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state % (CLUSTERS * SPACING_NS + SPACING_NS)
    };

    for track in [video, audio] {
        for _ in 0..50 {
            let t = next();
            let found = demuxer.cluster_containing(t, track).unwrap().unwrap();
            let found_time = demuxer.cluster_time_ns(found).unwrap();
            assert!(found_time <= t || found == 0, "landed after the query time");

            if found + 1 < demuxer.cluster_count() {
                let next_time = demuxer.cluster_time_ns(found + 1).unwrap();
                assert!(next_time > t, "a later cluster still satisfies the query");
            }
        }
    }
}

#[test]
fn round_trip_preserves_per_track_streams() {
    // (track, timestamp_ns, key, fill, len)
    let script: &[(u64, u64, bool, u8, usize)] = &[
        (1, 0, true, 0x01, 30),
        (2, 0, true, 0x81, 11),
        (2, 21_000_000, true, 0x82, 12),
        (1, 33_000_000, false, 0x02, 25),
        (2, 42_000_000, true, 0x83, 13),
        (2, 63_000_000, true, 0x84, 14),
        (1, 66_000_000, true, 0x03, 40),
        (1, 99_000_000, false, 0x04, 22),
    ];

    let mut muxer = WebmMuxer::new(MemoryWriter::new());
    let video = muxer.add_video_track(VideoTrackConfig::new(640, 360)).unwrap();
    let audio = muxer
        .add_audio_track(AudioTrackConfig::new(44100.0, 1).with_codec_private(vec![2, 0xF0, 0x0D]))
        .unwrap();
    assert_eq!((video, audio), (1, 2));

    for &(track, t, key, fill, len) in script {
        muxer.add_frame(&vec![fill; len], track, t, key).unwrap();
    }
    muxer.finalize().unwrap();
    let bytes = muxer.into_inner().into_inner();

    let mut demuxer = WebmDemuxer::open(SliceSource::new(bytes)).unwrap();
    demuxer.load().unwrap();

    let info = demuxer.info().unwrap();
    assert_eq!(info.duration, Some(99.0));
    assert_eq!(info.duration_ns(), Some(99_000_000));

    let audio_track = demuxer.tracks().unwrap().by_number(audio).unwrap();
    assert_eq!(audio_track.codec_private.as_deref(), Some(&[2u8, 0xF0, 0x0D][..]));

    for track in [video, audio] {
        let expected: Vec<_> =
            script.iter().filter(|&&(tr, ..)| tr == track).collect();

        let mut seen = Vec::new();
        let mut at = demuxer.first_block(track).unwrap();
        while let Some(r) = at {
            let time = demuxer.block_time_ns(r).unwrap();
            let key = demuxer.block_entry(r).unwrap().block().is_key();
            let data = demuxer.read_frame(r).unwrap();
            seen.push((time, key, data));
            at = demuxer.next_block(track, r).unwrap();
        }

        assert_eq!(seen.len(), expected.len());
        for (&&(_, t, key, fill, len), (seen_t, seen_key, seen_data)) in
            expected.iter().zip(&seen)
        {
            assert_eq!(*seen_t, t);
            assert_eq!(*seen_key, key);
            assert_eq!(seen_data, &vec![fill; len]);
        }
    }
}

#[test]
fn rejects_frames_too_far_from_cluster_base() {
    let mut muxer = WebmMuxer::new(MemoryWriter::new());
    let audio = muxer.add_audio_track(AudioTrackConfig::new(48000.0, 2)).unwrap();

    muxer.add_frame(&[1, 2, 3], audio, 0, true).unwrap();
    // i16::MAX ticks of 1 ms each is the worst representable gap.
    muxer.add_frame(&[1, 2, 3], audio, 32_767_000_000, true).unwrap();
    let err = muxer.add_frame(&[1, 2, 3], audio, 32_768_000_000, true).unwrap_err();
    assert!(matches!(err, WebmError::TimecodeOutOfRange { .. }));
}

#[test]
fn seek_head_region_is_byte_stable() {
    // The rewritten SeekHead plus its residue Void must occupy exactly
    // the 89-byte range reserved up front, leaving Info at a fixed offset.
    let mut muxer = WebmMuxer::new(MemoryWriter::new());
    let video = muxer.add_video_track(VideoTrackConfig::new(64, 64)).unwrap();
    muxer.add_frame(&[9u8; 5], video, 0, true).unwrap();
    muxer.finalize().unwrap();
    let bytes = muxer.into_inner().into_inner();

    let segment_id = bytes.windows(4).position(|w| w == [0x18, 0x53, 0x80, 0x67]).unwrap();
    let payload_start = segment_id as u64 + 4 + 8;

    // SeekHead first, then its residue Void, and Info begins exactly 89
    // bytes into the payload.
    let src = SliceSource::new(bytes.clone());
    let head = ElementHeader::read_at(&src, payload_start).unwrap();
    assert_eq!(head.id, elements::SEEK_HEAD);
    let head_end = payload_start + head.header_len + head.size.unwrap();

    let residue = ElementHeader::read_at(&src, head_end).unwrap();
    assert_eq!(residue.id, elements::VOID);
    let residue_end = head_end + residue.header_len + residue.size.unwrap();
    assert_eq!(residue_end, payload_start + 89);

    let info = ElementHeader::read_at(&src, residue_end).unwrap();
    assert_eq!(info.id, elements::INFO);
}
