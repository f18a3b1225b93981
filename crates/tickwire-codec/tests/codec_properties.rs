//! Property-based tests for the wire codec.
//!
//! These verify the round-trip laws for ALL valid inputs, not just
//! specific examples: every primitive decodes back to itself (blanks
//! included), containers read back exactly the entries written, and the
//! encode level stack is balanced around every container pair.

use bytes::BytesMut;
use proptest::{prelude::*, test_runner::TestCaseError};
use tickwire_codec::{
    DataType, DecodeIterator, EncodeIterator,
    field_list::{self, FieldList, FieldListFlags},
    map::{self, Map, MapEntryAction},
    msg::{
        CopyFlags, KeyFlags, Msg, MsgKey, RefreshFlags, RefreshMsg, UpdateFlags, UpdateMsg,
        copy_msg, decode_msg, encode_msg,
    },
    prim,
    value::{
        DataState, Date, DateTime, PrimitiveValue, Qos, QosRate, QosTimeliness, Real,
        RealHint, State, StreamState, Time,
    },
};

fn encoder() -> EncodeIterator {
    EncodeIterator::new(BytesMut::with_capacity(8192), (14, 1))
}

fn arbitrary_real() -> impl Strategy<Value = Real> {
    prop_oneof![
        (any::<i64>(), -14i8..=7).prop_map(|(m, e)| Real::from_exponent(m, e)),
        (any::<i64>(), 0u32..=8)
            .prop_map(|(m, d)| Real { hint: RealHint::Fraction(1 << d), mantissa: m }),
        Just(Real { hint: RealHint::Infinity, mantissa: 0 }),
        Just(Real { hint: RealHint::NegInfinity, mantissa: 0 }),
        Just(Real { hint: RealHint::NotANumber, mantissa: 0 }),
    ]
}

fn arbitrary_time() -> impl Strategy<Value = Time> {
    (0u8..=23, 0u8..=59, 0u8..=60, 0u16..=999, 0u16..=999, 0u16..=999).prop_map(
        |(hour, minute, second, millisecond, microsecond, nanosecond)| Time {
            hour,
            minute,
            second,
            millisecond,
            microsecond,
            nanosecond,
        },
    )
}

fn arbitrary_date() -> impl Strategy<Value = Date> {
    (0u8..=31, 0u8..=12, any::<u16>()).prop_map(|(day, month, year)| Date { day, month, year })
}

fn arbitrary_qos() -> impl Strategy<Value = Qos> {
    (0u8..=3, 0u8..=3, any::<bool>(), any::<u16>(), any::<u16>()).prop_map(
        |(t, r, dynamic, time_info, rate_info)| {
            let timeliness = match t {
                0 => QosTimeliness::Unspecified,
                1 => QosTimeliness::Realtime,
                2 => QosTimeliness::DelayedUnknown,
                _ => QosTimeliness::Delayed,
            };
            let rate = match r {
                0 => QosRate::Unspecified,
                1 => QosRate::TickByTick,
                2 => QosRate::JustInTimeConflated,
                _ => QosRate::TimeConflated,
            };
            Qos {
                timeliness,
                rate,
                dynamic,
                time_info: if timeliness == QosTimeliness::Delayed { time_info } else { 0 },
                rate_info: if rate == QosRate::TimeConflated { rate_info } else { 0 },
            }
        },
    )
}

fn arbitrary_primitive() -> impl Strategy<Value = (DataType, PrimitiveValue<Vec<u8>>)> {
    prop_oneof![
        any::<i64>().prop_map(|v| (DataType::Int, PrimitiveValue::Int(v))),
        any::<u64>().prop_map(|v| (DataType::UInt, PrimitiveValue::UInt(v))),
        any::<u32>().prop_map(|v| (DataType::Float, PrimitiveValue::Float(f32::from_bits(v)))),
        any::<u64>().prop_map(|v| (DataType::Double, PrimitiveValue::Double(f64::from_bits(v)))),
        arbitrary_real().prop_map(|v| (DataType::Real, PrimitiveValue::Real(v))),
        arbitrary_date().prop_map(|v| (DataType::Date, PrimitiveValue::Date(v))),
        arbitrary_time().prop_map(|v| (DataType::Time, PrimitiveValue::Time(v))),
        (arbitrary_date(), arbitrary_time())
            .prop_map(|(date, time)| (DataType::DateTime, PrimitiveValue::DateTime(DateTime { date, time }))),
        arbitrary_qos().prop_map(|v| (DataType::Qos, PrimitiveValue::Qos(v))),
        any::<u16>().prop_map(|v| (DataType::Enum, PrimitiveValue::Enum(v))),
        prop::collection::vec(any::<u8>(), 0..256)
            .prop_map(|v| (DataType::Buffer, PrimitiveValue::Buffer(v))),
    ]
}

#[test]
fn prop_primitive_round_trip() {
    proptest!(|((ty, value) in arbitrary_primitive())| {
        let mut it = encoder();
        prim::put_primitive_ls(&mut it, &value).expect("encode should succeed");
        let written = it.written().to_vec();

        let mut dec = DecodeIterator::new(&written, (14, 1));
        let content = prim::get_buffer15(&mut dec).expect("length prefix should parse");
        prop_assert!(dec.is_empty(), "decoder must consume exactly what was written");

        let round = prim::primitive_from_content(ty, content).expect("decode should succeed");
        let expected = match &value {
            // Bit patterns survive even for NaN floats, so compare bits.
            PrimitiveValue::Float(f) => {
                let PrimitiveValue::Float(r) = round else {
                    return Err(TestCaseError::fail("float decoded as wrong variant"));
                };
                prop_assert_eq!(f.to_bits(), r.to_bits());
                return Ok(());
            }
            PrimitiveValue::Double(f) => {
                let PrimitiveValue::Double(r) = round else {
                    return Err(TestCaseError::fail("double decoded as wrong variant"));
                };
                prop_assert_eq!(f.to_bits(), r.to_bits());
                return Ok(());
            }
            // An empty buffer encodes as zero length, the blank form.
            PrimitiveValue::Buffer(b) if b.is_empty() => PrimitiveValue::Blank(ty),
            PrimitiveValue::Buffer(b) => PrimitiveValue::Buffer(b.as_slice()),
            PrimitiveValue::Int(v) => PrimitiveValue::Int(*v),
            PrimitiveValue::UInt(v) => PrimitiveValue::UInt(*v),
            PrimitiveValue::Real(v) => PrimitiveValue::Real(*v),
            // The all-zero date is the blank sentinel.
            PrimitiveValue::Date(v) if v.is_blank() => PrimitiveValue::Blank(ty),
            PrimitiveValue::Date(v) => PrimitiveValue::Date(*v),
            PrimitiveValue::Time(v) => PrimitiveValue::Time(*v),
            PrimitiveValue::DateTime(v) => PrimitiveValue::DateTime(*v),
            PrimitiveValue::Qos(v) => PrimitiveValue::Qos(*v),
            PrimitiveValue::Enum(v) => PrimitiveValue::Enum(*v),
            other => panic!("unexpected strategy variant: {other:?}"),
        };
        prop_assert_eq!(round, expected);
    });
}

#[test]
fn canonical_wire_dumps_are_stable() {
    // Int -1: one length byte, one content byte.
    let mut it = encoder();
    prim::put_int_ls(&mut it, -1).unwrap();
    assert_eq!(hex::encode(it.written()), "01ff");

    // Blank real: a bare zero length.
    let mut it = encoder();
    prim::put_blank_ls(&mut it).unwrap();
    assert_eq!(hex::encode(it.written()), "00");

    // The two-field quote record: a fixed fifteen-byte sequence.
    let header =
        FieldList { flags: FieldListFlags::HAS_STANDARD_DATA, ..FieldList::default() };
    let mut it = encoder();
    header.encode_init(&mut it).unwrap();
    field_list::encode_entry_preencoded(&mut it, 22, b"AAA.N").unwrap();
    field_list::encode_entry(&mut it, 4, &PrimitiveValue::<&[u8]>::Enum(1)).unwrap();
    field_list::encode_complete(&mut it, true).unwrap();
    assert_eq!(it.written().len(), 15);
    assert_eq!(hex::encode(it.written()), "0800020016054141412e4e00040101");
}

#[test]
fn prop_blank_round_trips_as_blank() {
    let types = [
        DataType::Int,
        DataType::UInt,
        DataType::Real,
        DataType::Date,
        DataType::Time,
        DataType::DateTime,
        DataType::Enum,
        DataType::Buffer,
    ];
    for ty in types {
        let mut it = encoder();
        prim::put_blank_ls(&mut it).unwrap();
        let written = it.written().to_vec();
        let mut dec = DecodeIterator::new(&written, (14, 1));
        let content = prim::get_buffer15(&mut dec).unwrap();
        let round = prim::primitive_from_content(ty, content).unwrap();
        assert_eq!(round, PrimitiveValue::Blank(ty), "blank {ty:?}");
    }
}

#[test]
fn prop_field_list_round_trip() {
    proptest!(|(entries in prop::collection::vec(
        (any::<i16>(), prop::collection::vec(any::<u8>(), 0..64)),
        0..32,
    ))| {
        let header = FieldList {
            flags: FieldListFlags::HAS_STANDARD_DATA,
            ..FieldList::default()
        };
        let mut it = encoder();
        let depth_before = it.depth();
        header.encode_init(&mut it).expect("init should succeed");
        for (fid, content) in &entries {
            field_list::encode_entry_preencoded(&mut it, *fid, content)
                .expect("entry should fit");
        }
        field_list::encode_complete(&mut it, true).expect("complete should succeed");
        prop_assert_eq!(it.depth(), depth_before, "level stack must balance");

        let buf = it.take().expect("no container left open");
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (_, mut reader) = FieldList::decode(&mut dec, None).expect("decode should succeed");

        let mut round = Vec::new();
        while let Some(entry) = reader.next_entry().expect("entries should parse") {
            let field_list::FieldEntryData::Raw(content) = entry.data else {
                return Err(TestCaseError::fail("standard entry decoded as set data"));
            };
            round.push((entry.field_id, content.to_vec()));
        }
        prop_assert_eq!(round, entries);
    });
}

#[test]
fn prop_map_round_trip_preserves_order_and_actions() {
    proptest!(|(entries in prop::collection::vec(
        (
            prop::collection::vec(any::<u8>(), 1..32),
            prop_oneof![Just(MapEntryAction::Add), Just(MapEntryAction::Update), Just(MapEntryAction::Delete)],
            prop::collection::vec(any::<u8>(), 1..64),
        ),
        0..16,
    ))| {
        let header: Map<&[u8]> = Map {
            key_type: DataType::Buffer,
            container_type: DataType::Opaque,
            ..Map::default()
        };
        let mut it = encoder();
        header.encode_init(&mut it).expect("init should succeed");
        for (key, action, payload) in &entries {
            let body = (*action != MapEntryAction::Delete).then_some(payload.as_slice());
            map::encode_entry(
                &mut it,
                *action,
                &PrimitiveValue::Buffer(key.as_slice()),
                None,
                body,
            )
            .expect("entry should fit");
        }
        map::encode_complete(&mut it, true).expect("complete should succeed");

        let buf = it.take().expect("no container left open");
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (_, mut reader) = Map::decode(&mut dec).expect("decode should succeed");

        let mut round = Vec::new();
        while let Some(entry) = reader.next_entry().expect("entries should parse") {
            round.push((entry.key.to_vec(), entry.action, entry.payload.to_vec()));
        }
        let expected: Vec<_> = entries
            .iter()
            .map(|(key, action, payload)| {
                let body = if *action == MapEntryAction::Delete {
                    Vec::new()
                } else {
                    payload.clone()
                };
                (key.clone(), *action, body)
            })
            .collect();
        prop_assert_eq!(round, expected);
    });
}

#[test]
fn prop_update_msg_round_trip() {
    proptest!(|(
        stream_id in any::<i32>(),
        domain in any::<u8>(),
        seq_num in any::<u32>(),
        update_type in 0u8..=11,
        payload in prop::collection::vec(any::<u8>(), 0..512),
        perm in prop::option::of(prop::collection::vec(any::<u8>(), 1..32)),
    )| {
        let mut flags = UpdateFlags::HAS_SEQ_NUM;
        if perm.is_some() {
            flags |= UpdateFlags::HAS_PERM_DATA;
        }
        let msg: Msg<&[u8]> = Msg::Update(UpdateMsg {
            domain,
            stream_id,
            container_type: DataType::FieldList,
            flags,
            update_type,
            seq_num,
            conf_info: Default::default(),
            perm_data: perm.as_deref(),
            post_user: None,
            extended_header: None,
            key: None,
            payload: &payload,
        });

        let mut it = encoder();
        encode_msg(&mut it, &msg).expect("encode should succeed");
        let buf = it.take().expect("no container left open");

        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let round = decode_msg(&mut dec).expect("decode should succeed");
        prop_assert_eq!(round, msg);
    });
}

#[test]
fn prop_deep_copy_retained_buffers_compare_equal() {
    proptest!(|(
        name in prop::collection::vec(any::<u8>(), 1..16),
        group in prop::collection::vec(any::<u8>(), 0..8),
        payload in prop::collection::vec(any::<u8>(), 0..256),
        retain_payload in any::<bool>(),
        retain_group in any::<bool>(),
    )| {
        let msg: Msg<&[u8]> = Msg::Refresh(RefreshMsg {
            domain: 6,
            stream_id: 1,
            container_type: DataType::Opaque,
            flags: RefreshFlags::HAS_MSG_KEY | RefreshFlags::REFRESH_COMPLETE,
            state: State {
                stream_state: StreamState::Open,
                data_state: DataState::Ok,
                code: 0,
                text: b"ok",
            },
            group_id: &group,
            seq_num: 0,
            part_num: 0,
            perm_data: None,
            qos: None,
            post_user: None,
            extended_header: None,
            key: Some(MsgKey {
                flags: KeyFlags::HAS_NAME,
                name: Some(name.as_slice()),
                ..MsgKey::default()
            }),
            req_key: None,
            payload: &payload,
        });

        let mut retain = CopyFlags::KEY_NAME | CopyFlags::STATE_TEXT;
        if retain_payload {
            retain |= CopyFlags::PAYLOAD;
        }
        if retain_group {
            retain |= CopyFlags::GROUP_ID;
        }
        let copied = copy_msg(&msg, retain, None);

        let Msg::Refresh(c) = &copied else {
            return Err(TestCaseError::fail("copy changed the message class"));
        };
        if retain_payload {
            prop_assert_eq!(c.payload.as_ref(), payload.as_slice());
        } else {
            prop_assert!(c.payload.is_empty());
        }
        if retain_group {
            prop_assert_eq!(c.group_id.as_ref(), group.as_slice());
        } else {
            prop_assert!(c.group_id.is_empty());
        }
        let key = c.key.as_ref().expect("key is structural and survives");
        prop_assert_eq!(key.name.as_ref().expect("name retained").as_ref(), name.as_slice());
        prop_assert_eq!(c.state.text.as_ref(), b"ok");
    });
}
