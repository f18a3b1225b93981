//! Message decoding.
//!
//! The header length bounds the header region, so trailing header bytes
//! a newer peer may add are skipped rather than rejected. Every decoded
//! message is validated before it is handed back; validation failures
//! drop the message, not the channel.

use crate::{
    error::{CodecError, Result},
    iter::DecodeIterator,
    msg::{
        AckFlags, AckMsg, CloseFlags, CloseMsg, ConflationInfo, GenericFlags, GenericMsg,
        KeyFlags, Msg, MsgKey, NakCode, PostFlags, PostMsg, PostUserInfo, PostUserRights,
        Priority, RefreshFlags, RefreshMsg, RequestFlags, RequestMsg, StatusFlags,
        StatusMsg, UpdateFlags, UpdateMsg,
    },
    prim,
    types::{CONTAINER_TYPE_MIN, DataType, MsgClass},
};

fn container_from_byte(byte: u8) -> Result<DataType> {
    if byte >= CONTAINER_TYPE_MIN {
        return Err(CodecError::InvalidData("payload container byte out of range"));
    }
    DataType::from_wire(byte + CONTAINER_TYPE_MIN)
}

fn get_key<'a>(it: &mut DecodeIterator<'a>) -> Result<MsgKey<&'a [u8]>> {
    let content = prim::get_buffer15(it)?;
    let mut k = it.child(content);
    let flags =
        KeyFlags::from_bits(prim::get_u15(&mut k)?).ok_or(CodecError::InvalidData("unknown key flags"))?;
    let mut key = MsgKey { flags, ..MsgKey::default() };
    if flags.contains(KeyFlags::HAS_SERVICE_ID) {
        key.service_id = prim::get_u16opt(&mut k)?;
    }
    if flags.contains(KeyFlags::HAS_NAME) {
        key.name = Some(prim::get_buffer15(&mut k)?);
    }
    if flags.contains(KeyFlags::HAS_NAME_TYPE) {
        key.name_type = k.get_u8()?;
    }
    if flags.contains(KeyFlags::HAS_FILTER) {
        key.filter = k.get_u32()?;
    }
    if flags.contains(KeyFlags::HAS_IDENTIFIER) {
        key.identifier = k.get_i32()?;
    }
    if flags.contains(KeyFlags::HAS_ATTRIB) {
        key.attrib_container_type = container_from_byte(k.get_u8()?)?;
        key.attrib = Some(prim::get_buffer16(&mut k)?);
    }
    Ok(key)
}

fn get_post_user(it: &mut DecodeIterator<'_>) -> Result<PostUserInfo> {
    Ok(PostUserInfo { user_addr: it.get_u32()?, user_id: it.get_u32()? })
}

/// Decode one message from the iterator, consuming it entirely.
///
/// The returned message borrows the decode buffer; use
/// [`super::copy_msg`] when it must outlive the frame.
pub fn decode_msg<'a>(it: &mut DecodeIterator<'a>) -> Result<Msg<&'a [u8]>> {
    let header_len = it.get_u16()?;
    let header = it.take(usize::from(header_len))?;
    let mut h = it.child(header);
    let payload = it.take_rest();

    let class = MsgClass::from_wire(h.get_u8()?)?;
    let domain = h.get_u8()?;
    let stream_id = h.get_i32()?;
    let container_type = container_from_byte(h.get_u8()?)?;

    let msg = match class {
        MsgClass::Request => decode_request(&mut h, domain, stream_id, container_type, payload)?,
        MsgClass::Refresh => decode_refresh(&mut h, domain, stream_id, container_type, payload)?,
        MsgClass::Status => decode_status(&mut h, domain, stream_id, container_type, payload)?,
        MsgClass::Update => decode_update(&mut h, domain, stream_id, container_type, payload)?,
        MsgClass::Close => decode_close(&mut h, domain, stream_id, container_type, payload)?,
        MsgClass::Ack => decode_ack(&mut h, domain, stream_id, container_type, payload)?,
        MsgClass::Generic => decode_generic(&mut h, domain, stream_id, container_type, payload)?,
        MsgClass::Post => decode_post(&mut h, domain, stream_id, container_type, payload)?,
    };
    msg.validate()?;
    Ok(msg)
}

fn decode_request<'a>(
    h: &mut DecodeIterator<'a>,
    domain: u8,
    stream_id: i32,
    container_type: DataType,
    payload: &'a [u8],
) -> Result<Msg<&'a [u8]>> {
    let flags = RequestFlags::from_bits(prim::get_u15(h)?)
        .ok_or(CodecError::InvalidData("unknown request flags"))?;
    let mut m = RequestMsg {
        domain,
        stream_id,
        container_type,
        flags,
        key: MsgKey::default(),
        priority: Priority::default(),
        qos: None,
        worst_qos: None,
        extended_header: None,
        payload,
    };
    if flags.contains(RequestFlags::HAS_PRIORITY) {
        m.priority = Priority { class: h.get_u8()?, count: h.get_u16()? };
    }
    if flags.contains(RequestFlags::HAS_QOS) {
        m.qos = Some(prim::get_qos(h)?);
    }
    if flags.contains(RequestFlags::HAS_WORST_QOS) {
        m.worst_qos = Some(prim::get_qos(h)?);
    }
    if flags.contains(RequestFlags::HAS_EXTENDED_HEADER) {
        m.extended_header = Some(prim::get_buffer15(h)?);
    }
    m.key = get_key(h)?;
    Ok(Msg::Request(m))
}

fn decode_refresh<'a>(
    h: &mut DecodeIterator<'a>,
    domain: u8,
    stream_id: i32,
    container_type: DataType,
    payload: &'a [u8],
) -> Result<Msg<&'a [u8]>> {
    let flags = RefreshFlags::from_bits(prim::get_u15(h)?)
        .ok_or(CodecError::InvalidData("unknown refresh flags"))?;
    let mut m = RefreshMsg {
        domain,
        stream_id,
        container_type,
        flags,
        state: crate::value::State {
            stream_state: crate::value::StreamState::Unspecified,
            data_state: crate::value::DataState::NoChange,
            code: 0,
            text: &[][..],
        },
        group_id: &[][..],
        seq_num: 0,
        part_num: 0,
        perm_data: None,
        qos: None,
        post_user: None,
        extended_header: None,
        key: None,
        req_key: None,
        payload,
    };
    if flags.contains(RefreshFlags::HAS_SEQ_NUM) {
        m.seq_num = h.get_u32()?;
    }
    if flags.contains(RefreshFlags::HAS_PART_NUM) {
        m.part_num = prim::get_u15(h)?;
    }
    m.state = prim::get_state(h)?;
    m.group_id = prim::get_buffer15(h)?;
    if flags.contains(RefreshFlags::HAS_PERM_DATA) {
        m.perm_data = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(RefreshFlags::HAS_QOS) {
        m.qos = Some(prim::get_qos(h)?);
    }
    if flags.contains(RefreshFlags::HAS_POST_USER_INFO) {
        m.post_user = Some(get_post_user(h)?);
    }
    if flags.contains(RefreshFlags::HAS_EXTENDED_HEADER) {
        m.extended_header = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(RefreshFlags::HAS_MSG_KEY) {
        m.key = Some(get_key(h)?);
    }
    if flags.contains(RefreshFlags::HAS_REQ_MSG_KEY) {
        m.req_key = Some(get_key(h)?);
    }
    Ok(Msg::Refresh(m))
}

fn decode_status<'a>(
    h: &mut DecodeIterator<'a>,
    domain: u8,
    stream_id: i32,
    container_type: DataType,
    payload: &'a [u8],
) -> Result<Msg<&'a [u8]>> {
    let flags = StatusFlags::from_bits(prim::get_u15(h)?)
        .ok_or(CodecError::InvalidData("unknown status flags"))?;
    let mut m = StatusMsg {
        domain,
        stream_id,
        container_type,
        flags,
        state: None,
        group_id: None,
        perm_data: None,
        post_user: None,
        extended_header: None,
        key: None,
        req_key: None,
        payload,
    };
    if flags.contains(StatusFlags::HAS_STATE) {
        m.state = Some(prim::get_state(h)?);
    }
    if flags.contains(StatusFlags::HAS_GROUP_ID) {
        m.group_id = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(StatusFlags::HAS_PERM_DATA) {
        m.perm_data = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(StatusFlags::HAS_POST_USER_INFO) {
        m.post_user = Some(get_post_user(h)?);
    }
    if flags.contains(StatusFlags::HAS_EXTENDED_HEADER) {
        m.extended_header = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(StatusFlags::HAS_MSG_KEY) {
        m.key = Some(get_key(h)?);
    }
    if flags.contains(StatusFlags::HAS_REQ_MSG_KEY) {
        m.req_key = Some(get_key(h)?);
    }
    Ok(Msg::Status(m))
}

fn decode_update<'a>(
    h: &mut DecodeIterator<'a>,
    domain: u8,
    stream_id: i32,
    container_type: DataType,
    payload: &'a [u8],
) -> Result<Msg<&'a [u8]>> {
    let flags = UpdateFlags::from_bits(prim::get_u15(h)?)
        .ok_or(CodecError::InvalidData("unknown update flags"))?;
    let mut m = UpdateMsg {
        domain,
        stream_id,
        container_type,
        flags,
        update_type: h.get_u8()?,
        seq_num: 0,
        conf_info: ConflationInfo::default(),
        perm_data: None,
        post_user: None,
        extended_header: None,
        key: None,
        payload,
    };
    if flags.contains(UpdateFlags::HAS_SEQ_NUM) {
        m.seq_num = h.get_u32()?;
    }
    if flags.contains(UpdateFlags::HAS_CONF_INFO) {
        m.conf_info = ConflationInfo { count: prim::get_u15(h)?, time: h.get_u16()? };
    }
    if flags.contains(UpdateFlags::HAS_PERM_DATA) {
        m.perm_data = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(UpdateFlags::HAS_POST_USER_INFO) {
        m.post_user = Some(get_post_user(h)?);
    }
    if flags.contains(UpdateFlags::HAS_EXTENDED_HEADER) {
        m.extended_header = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(UpdateFlags::HAS_MSG_KEY) {
        m.key = Some(get_key(h)?);
    }
    Ok(Msg::Update(m))
}

fn decode_close<'a>(
    h: &mut DecodeIterator<'a>,
    domain: u8,
    stream_id: i32,
    container_type: DataType,
    payload: &'a [u8],
) -> Result<Msg<&'a [u8]>> {
    let flags = CloseFlags::from_bits(prim::get_u15(h)?)
        .ok_or(CodecError::InvalidData("unknown close flags"))?;
    let mut m = CloseMsg { domain, stream_id, container_type, flags, extended_header: None, payload };
    if flags.contains(CloseFlags::HAS_EXTENDED_HEADER) {
        m.extended_header = Some(prim::get_buffer15(h)?);
    }
    Ok(Msg::Close(m))
}

fn decode_ack<'a>(
    h: &mut DecodeIterator<'a>,
    domain: u8,
    stream_id: i32,
    container_type: DataType,
    payload: &'a [u8],
) -> Result<Msg<&'a [u8]>> {
    let flags = AckFlags::from_bits(prim::get_u15(h)?)
        .ok_or(CodecError::InvalidData("unknown ack flags"))?;
    let mut m = AckMsg {
        domain,
        stream_id,
        container_type,
        flags,
        ack_id: h.get_u32()?,
        nak_code: NakCode::None,
        seq_num: 0,
        text: None,
        extended_header: None,
        key: None,
        payload,
    };
    if flags.contains(AckFlags::HAS_NAK_CODE) {
        m.nak_code = NakCode::from_wire(h.get_u8()?)?;
    }
    if flags.contains(AckFlags::HAS_SEQ_NUM) {
        m.seq_num = h.get_u32()?;
    }
    if flags.contains(AckFlags::HAS_TEXT) {
        m.text = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(AckFlags::HAS_EXTENDED_HEADER) {
        m.extended_header = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(AckFlags::HAS_MSG_KEY) {
        m.key = Some(get_key(h)?);
    }
    Ok(Msg::Ack(m))
}

fn decode_generic<'a>(
    h: &mut DecodeIterator<'a>,
    domain: u8,
    stream_id: i32,
    container_type: DataType,
    payload: &'a [u8],
) -> Result<Msg<&'a [u8]>> {
    let flags = GenericFlags::from_bits(prim::get_u15(h)?)
        .ok_or(CodecError::InvalidData("unknown generic flags"))?;
    let mut m = GenericMsg {
        domain,
        stream_id,
        container_type,
        flags,
        seq_num: 0,
        secondary_seq_num: 0,
        part_num: 0,
        perm_data: None,
        extended_header: None,
        key: None,
        req_key: None,
        payload,
    };
    if flags.contains(GenericFlags::HAS_SEQ_NUM) {
        m.seq_num = h.get_u32()?;
    }
    if flags.contains(GenericFlags::HAS_SECONDARY_SEQ_NUM) {
        m.secondary_seq_num = h.get_u32()?;
    }
    if flags.contains(GenericFlags::HAS_PART_NUM) {
        m.part_num = prim::get_u15(h)?;
    }
    if flags.contains(GenericFlags::HAS_PERM_DATA) {
        m.perm_data = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(GenericFlags::HAS_EXTENDED_HEADER) {
        m.extended_header = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(GenericFlags::HAS_MSG_KEY) {
        m.key = Some(get_key(h)?);
    }
    if flags.contains(GenericFlags::HAS_REQ_MSG_KEY) {
        m.req_key = Some(get_key(h)?);
    }
    Ok(Msg::Generic(m))
}

fn decode_post<'a>(
    h: &mut DecodeIterator<'a>,
    domain: u8,
    stream_id: i32,
    container_type: DataType,
    payload: &'a [u8],
) -> Result<Msg<&'a [u8]>> {
    let flags = PostFlags::from_bits(prim::get_u15(h)?)
        .ok_or(CodecError::InvalidData("unknown post flags"))?;
    let mut m = PostMsg {
        domain,
        stream_id,
        container_type,
        flags,
        post_user: get_post_user(h)?,
        post_id: 0,
        seq_num: 0,
        part_num: 0,
        post_user_rights: PostUserRights::default(),
        perm_data: None,
        extended_header: None,
        key: None,
        payload,
    };
    if flags.contains(PostFlags::HAS_POST_ID) {
        m.post_id = h.get_u32()?;
    }
    if flags.contains(PostFlags::HAS_SEQ_NUM) {
        m.seq_num = h.get_u32()?;
    }
    if flags.contains(PostFlags::HAS_PART_NUM) {
        m.part_num = prim::get_u15(h)?;
    }
    if flags.contains(PostFlags::HAS_POST_USER_RIGHTS) {
        m.post_user_rights = PostUserRights::from_bits(prim::get_u15(h)?)
            .ok_or(CodecError::InvalidData("unknown post user rights"))?;
    }
    if flags.contains(PostFlags::HAS_PERM_DATA) {
        m.perm_data = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(PostFlags::HAS_EXTENDED_HEADER) {
        m.extended_header = Some(prim::get_buffer15(h)?);
    }
    if flags.contains(PostFlags::HAS_MSG_KEY) {
        m.key = Some(get_key(h)?);
    }
    Ok(Msg::Post(m))
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::{
        iter::EncodeIterator,
        msg::encode_msg,
        value::{DataState, Qos, State, StreamState},
    };

    fn enc() -> EncodeIterator {
        EncodeIterator::new(BytesMut::with_capacity(1024), (14, 1))
    }

    fn market_price_key() -> MsgKey<&'static [u8]> {
        MsgKey {
            flags: KeyFlags::HAS_SERVICE_ID | KeyFlags::HAS_NAME | KeyFlags::HAS_NAME_TYPE,
            service_id: 260,
            name: Some(b"IBM.N"),
            name_type: 1,
            ..MsgKey::default()
        }
    }

    #[test]
    fn request_round_trip() {
        let msg: Msg<&[u8]> = Msg::Request(RequestMsg {
            domain: crate::types::domain::MARKET_PRICE,
            stream_id: 6,
            container_type: DataType::NoData,
            flags: RequestFlags::STREAMING | RequestFlags::HAS_QOS | RequestFlags::HAS_PRIORITY,
            key: market_price_key(),
            priority: Priority { class: 1, count: 2 },
            qos: Some(Qos::realtime_tick_by_tick()),
            worst_qos: None,
            extended_header: None,
            payload: &[],
        });

        let mut it = enc();
        encode_msg(&mut it, &msg).unwrap();
        let buf = it.take().unwrap();

        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let round = decode_msg(&mut dec).unwrap();
        assert_eq!(round, msg);
    }

    #[test]
    fn refresh_round_trip_with_all_buffers() {
        let msg: Msg<&[u8]> = Msg::Refresh(RefreshMsg {
            domain: crate::types::domain::MARKET_PRICE,
            stream_id: 6,
            container_type: DataType::FieldList,
            flags: RefreshFlags::SOLICITED
                | RefreshFlags::REFRESH_COMPLETE
                | RefreshFlags::HAS_SEQ_NUM
                | RefreshFlags::HAS_PERM_DATA
                | RefreshFlags::HAS_MSG_KEY
                | RefreshFlags::HAS_EXTENDED_HEADER,
            state: State {
                stream_state: StreamState::Open,
                data_state: DataState::Ok,
                code: 0,
                text: b"All is well".as_slice(),
            },
            group_id: b"\x00\x01",
            seq_num: 42,
            part_num: 0,
            perm_data: Some(b"\x03\x09\x62\x35"),
            qos: None,
            post_user: None,
            extended_header: Some(b"\xEE\xFF"),
            key: Some(market_price_key()),
            req_key: None,
            payload: b"\x08\x00\x01\x00\x16\x05AAA.N",
        });

        let mut it = enc();
        encode_msg(&mut it, &msg).unwrap();
        let buf = it.take().unwrap();

        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let round = decode_msg(&mut dec).unwrap();
        assert_eq!(round, msg);
    }

    #[test]
    fn nak_round_trip() {
        let msg: Msg<&[u8]> = Msg::Ack(AckMsg {
            domain: crate::types::domain::MARKET_PRICE,
            stream_id: 6,
            container_type: DataType::NoData,
            flags: AckFlags::HAS_NAK_CODE | AckFlags::HAS_TEXT,
            ack_id: 77,
            nak_code: NakCode::SymbolUnknown,
            seq_num: 0,
            text: Some(b"no such symbol"),
            extended_header: None,
            key: None,
            payload: &[],
        });

        let mut it = enc();
        encode_msg(&mut it, &msg).unwrap();
        let buf = it.take().unwrap();

        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let round = decode_msg(&mut dec).unwrap();
        assert_eq!(round, msg);
    }

    #[test]
    fn unknown_domain_passes_through() {
        let msg: Msg<&[u8]> = Msg::Close(CloseMsg {
            domain: 213, // not in the registry; must be forwarded intact
            stream_id: -9,
            container_type: DataType::NoData,
            flags: CloseFlags::ACK_REQUESTED,
            extended_header: None,
            payload: &[],
        });

        let mut it = enc();
        encode_msg(&mut it, &msg).unwrap();
        let buf = it.take().unwrap();

        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let round = decode_msg(&mut dec).unwrap();
        assert_eq!(round.domain(), 213);
        assert_eq!(round, msg);
    }

    #[test]
    fn truncated_header_is_incomplete() {
        let msg: Msg<&[u8]> = Msg::Close(CloseMsg {
            domain: 6,
            stream_id: 1,
            container_type: DataType::NoData,
            flags: CloseFlags::default(),
            extended_header: None,
            payload: &[],
        });
        let mut it = enc();
        encode_msg(&mut it, &msg).unwrap();
        let buf = it.take().unwrap();

        let mut dec = DecodeIterator::new(&buf[..buf.len() - 2], (14, 1));
        assert!(matches!(
            decode_msg(&mut dec),
            Err(CodecError::IncompleteData { .. })
        ));
    }
}
