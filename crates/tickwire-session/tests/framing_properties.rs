//! Property-based tests for framing, fragmentation, and packing.
//!
//! The central law: fragmentation is transparent. For any payload and
//! any fragment size down to one byte, sending through the fragmenter
//! and feeding the frames to a reassembler yields the original bytes.

use bytes::Bytes;
use proptest::prelude::*;
use tickwire_session::{
    fragment::{Fragmenter, Reassembler},
    pack::{PackReader, PackWriter},
    wire::{FrameFlags, decode_frame},
};

fn reassemble(frames: &[Bytes]) -> Option<Bytes> {
    let mut reassembler = Reassembler::default();
    let mut out = None;
    for raw in frames {
        let (frame, used) = decode_frame(raw).expect("frame should parse").expect("complete");
        assert_eq!(used, raw.len(), "each frame is exactly one unit");
        if frame.is_first_fragment() || frame.is_continuation() {
            if let Some(done) = reassembler.feed(&frame).expect("fragments should chain") {
                out = Some(done.payload);
            }
        } else {
            out = Some(Bytes::copy_from_slice(frame.payload));
        }
    }
    assert_eq!(reassembler.in_flight(), 0, "nothing may linger after the last fragment");
    out
}

#[test]
fn prop_fragmentation_is_transparent() {
    proptest!(|(
        payload in prop::collection::vec(any::<u8>(), 1..4096),
        fragment_size in 1usize..512,
    )| {
        let mut fragmenter = Fragmenter::default();
        let frames = fragmenter
            .frame_message(&payload, fragment_size, false)
            .expect("framing should succeed");

        let expected_frames = if payload.len() <= fragment_size {
            1
        } else {
            payload.len().div_ceil(fragment_size)
        };
        prop_assert_eq!(frames.len(), expected_frames);

        let out = reassemble(&frames).expect("one message comes out");
        prop_assert_eq!(&out[..], &payload[..]);
    });
}

#[test]
fn prop_fragment_ids_recycle_without_collision() {
    proptest!(|(messages in prop::collection::vec(
        prop::collection::vec(any::<u8>(), 64..256),
        1..300,
    ))| {
        // More messages than the one-byte id space forces recycling;
        // feeding each message's frames in order must still reassemble
        // every one.
        let mut fragmenter = Fragmenter::default();
        let mut reassembler = Reassembler::default();
        for payload in &messages {
            let frames = fragmenter
                .frame_message(payload, 32, false)
                .expect("framing should succeed");
            let mut done = None;
            for raw in &frames {
                let (frame, _) = decode_frame(raw).unwrap().unwrap();
                if let Some(out) = reassembler.feed(&frame).expect("fragments should chain") {
                    done = Some(out.payload);
                }
            }
            prop_assert_eq!(&done.expect("message completes")[..], &payload[..]);
        }
    });
}

#[test]
fn prop_pack_round_trip() {
    proptest!(|(messages in prop::collection::vec(
        prop::collection::vec(any::<u8>(), 0..64),
        0..16,
    ))| {
        let capacity = messages.iter().map(|m| PackWriter::cost(m.len())).sum::<usize>().max(2);
        let mut writer = PackWriter::new(capacity, messages.len().max(1));
        for message in &messages {
            writer.push(message).expect("sized to fit");
        }
        let payload = writer.finish();

        let round: Vec<Vec<u8>> = PackReader::new(&payload)
            .map(|m| m.map(<[u8]>::to_vec))
            .collect::<Result<_, _>>()
            .expect("pack should parse");
        prop_assert_eq!(round, messages);
    });
}

#[test]
fn ping_and_data_wire_dumps_are_stable() {
    use tickwire_session::wire::{ExtFlags, encode_frame, encode_ping};

    assert_eq!(hex::encode(encode_ping()), "000302");

    // 2-byte length, data flag, payload.
    let frame = encode_frame(FrameFlags::DATA, ExtFlags::default(), 0, 0, b"\xAA\xBB").unwrap();
    assert_eq!(hex::encode(&frame), "000502aabb");

    // First fragment: extended flag, frag header (U30 total + id); a
    // total of 40 fits the one-byte U30 form.
    let frame = encode_frame(FrameFlags::DATA, ExtFlags::FRAG_HEADER, 40, 7, b"\x01").unwrap();
    assert_eq!(hex::encode(&frame), "00070308280701");
}

#[test]
fn boundary_frame_sizes() {
    // A message one byte under the frame ceiling still travels whole;
    // at the ceiling it must fragment into two frames.
    let mut fragmenter = Fragmenter::default();

    let just_fits = vec![0x42u8; 0xFFFF - 3];
    let frames = fragmenter.frame_message(&just_fits, 0xFFFF, false).unwrap();
    assert_eq!(frames.len(), 1);
    let (frame, _) = decode_frame(&frames[0]).unwrap().unwrap();
    assert!(frame.flags.contains(FrameFlags::DATA));

    let too_big = vec![0x42u8; 0xFFFF];
    let frames = fragmenter.frame_message(&too_big, 0xFFFF, false).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(reassemble(&frames).unwrap().len(), 0xFFFF);
}
