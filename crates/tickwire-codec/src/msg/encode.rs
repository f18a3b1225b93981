//! Message encoding.
//!
//! Two paths: [`encode_msg`] writes a complete message whose payload
//! bytes are at hand; [`encode_msg_init`] / [`encode_msg_complete`]
//! bracket a streamed payload encoded by the container modules.
//!
//! The two-byte header length is reserved up front and patched once the
//! header is fully written, so both paths stay single-pass.

use crate::{
    error::{CodecError, Result},
    iter::{EncodeIterator, EncodeLevel, LevelState, MarkWidth},
    msg::{
        AckFlags, AckMsg, CloseFlags, CloseMsg, GenericFlags, GenericMsg, KeyFlags, Msg,
        MsgKey, NakCode, PostFlags, PostMsg, RefreshFlags, RefreshMsg, RequestFlags,
        RequestMsg, StatusFlags, StatusMsg, UpdateFlags, UpdateMsg,
    },
    prim,
    types::{CONTAINER_TYPE_MIN, DataType},
};

fn put_container_byte(it: &mut EncodeIterator, ty: DataType) -> Result<()> {
    if !ty.is_container() {
        return Err(CodecError::InvalidArgument("message payload must be a container type"));
    }
    it.put_u8(ty.to_wire() - CONTAINER_TYPE_MIN)
}

fn put_key<B: AsRef<[u8]>>(it: &mut EncodeIterator, key: &MsgKey<B>) -> Result<()> {
    let mark = it.reserve_mark(MarkWidth::U15Two)?;
    let content_start = it.position();
    prim::put_u15(it, key.flags.bits())?;
    if key.flags.contains(KeyFlags::HAS_SERVICE_ID) {
        prim::put_u16opt(it, key.service_id)?;
    }
    if key.flags.contains(KeyFlags::HAS_NAME) {
        let name = key
            .name
            .as_ref()
            .ok_or(CodecError::InvalidArgument("key flags name but carries none"))?;
        prim::put_buffer15(it, name.as_ref())?;
    }
    if key.flags.contains(KeyFlags::HAS_NAME_TYPE) {
        it.put_u8(key.name_type)?;
    }
    if key.flags.contains(KeyFlags::HAS_FILTER) {
        it.put_u32(key.filter)?;
    }
    if key.flags.contains(KeyFlags::HAS_IDENTIFIER) {
        it.put_i32(key.identifier)?;
    }
    if key.flags.contains(KeyFlags::HAS_ATTRIB) {
        let attrib = key
            .attrib
            .as_ref()
            .ok_or(CodecError::InvalidArgument("key flags attrib but carries none"))?;
        put_container_byte(it, key.attrib_container_type)?;
        prim::put_buffer16(it, attrib.as_ref())?;
    }
    let len = it.position() - content_start;
    it.complete_mark(mark, len)
}

fn put_opt_buffer15<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    flagged: bool,
    buffer: Option<&B>,
    what: &'static str,
) -> Result<()> {
    if !flagged {
        return Ok(());
    }
    let bytes = buffer.ok_or(CodecError::InvalidArgument(what))?;
    prim::put_buffer15(it, bytes.as_ref())
}

fn put_header<B: AsRef<[u8]>>(it: &mut EncodeIterator, msg: &Msg<B>) -> Result<usize> {
    let start = it.position();
    it.put_u16(0)?; // header length, patched below
    it.put_u8(msg.class().to_wire())?;
    it.put_u8(msg.domain())?;
    it.put_i32(msg.stream_id())?;
    put_container_byte(it, msg.container_type())?;

    match msg {
        Msg::Request(m) => put_request_fields(it, m)?,
        Msg::Refresh(m) => put_refresh_fields(it, m)?,
        Msg::Status(m) => put_status_fields(it, m)?,
        Msg::Update(m) => put_update_fields(it, m)?,
        Msg::Close(m) => put_close_fields(it, m)?,
        Msg::Ack(m) => put_ack_fields(it, m)?,
        Msg::Generic(m) => put_generic_fields(it, m)?,
        Msg::Post(m) => put_post_fields(it, m)?,
    }

    let header_len = it.position() - (start + 2);
    if header_len > usize::from(u16::MAX) {
        return Err(CodecError::InvalidData("message header too long"));
    }
    it.patch(start, &(header_len as u16).to_be_bytes())?;
    Ok(start)
}

fn put_request_fields<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    m: &RequestMsg<B>,
) -> Result<()> {
    prim::put_u15(it, m.flags.bits())?;
    if m.flags.contains(RequestFlags::HAS_PRIORITY) {
        it.put_u8(m.priority.class)?;
        it.put_u16(m.priority.count)?;
    }
    if m.flags.contains(RequestFlags::HAS_QOS) {
        let qos = m.qos.ok_or(CodecError::InvalidArgument("qos flag without qos"))?;
        prim::put_qos(it, qos)?;
    }
    if m.flags.contains(RequestFlags::HAS_WORST_QOS) {
        let qos =
            m.worst_qos.ok_or(CodecError::InvalidArgument("worst-qos flag without qos"))?;
        prim::put_qos(it, qos)?;
    }
    put_opt_buffer15(
        it,
        m.flags.contains(RequestFlags::HAS_EXTENDED_HEADER),
        m.extended_header.as_ref(),
        "extended-header flag without header",
    )?;
    put_key(it, &m.key)
}

fn put_refresh_fields<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    m: &RefreshMsg<B>,
) -> Result<()> {
    prim::put_u15(it, m.flags.bits())?;
    if m.flags.contains(RefreshFlags::HAS_SEQ_NUM) {
        it.put_u32(m.seq_num)?;
    }
    if m.flags.contains(RefreshFlags::HAS_PART_NUM) {
        prim::put_u15(it, m.part_num)?;
    }
    prim::put_state(it, &m.state)?;
    prim::put_buffer15(it, m.group_id.as_ref())?;
    put_opt_buffer15(
        it,
        m.flags.contains(RefreshFlags::HAS_PERM_DATA),
        m.perm_data.as_ref(),
        "perm-data flag without data",
    )?;
    if m.flags.contains(RefreshFlags::HAS_QOS) {
        let qos = m.qos.ok_or(CodecError::InvalidArgument("qos flag without qos"))?;
        prim::put_qos(it, qos)?;
    }
    if m.flags.contains(RefreshFlags::HAS_POST_USER_INFO) {
        let info =
            m.post_user.ok_or(CodecError::InvalidArgument("post-user flag without info"))?;
        it.put_u32(info.user_addr)?;
        it.put_u32(info.user_id)?;
    }
    put_opt_buffer15(
        it,
        m.flags.contains(RefreshFlags::HAS_EXTENDED_HEADER),
        m.extended_header.as_ref(),
        "extended-header flag without header",
    )?;
    if m.flags.contains(RefreshFlags::HAS_MSG_KEY) {
        let key = m.key.as_ref().ok_or(CodecError::InvalidArgument("key flag without key"))?;
        put_key(it, key)?;
    }
    if m.flags.contains(RefreshFlags::HAS_REQ_MSG_KEY) {
        let key = m
            .req_key
            .as_ref()
            .ok_or(CodecError::InvalidArgument("req-key flag without key"))?;
        put_key(it, key)?;
    }
    Ok(())
}

fn put_status_fields<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    m: &StatusMsg<B>,
) -> Result<()> {
    prim::put_u15(it, m.flags.bits())?;
    if m.flags.contains(StatusFlags::HAS_STATE) {
        let state =
            m.state.as_ref().ok_or(CodecError::InvalidArgument("state flag without state"))?;
        prim::put_state(it, state)?;
    }
    put_opt_buffer15(
        it,
        m.flags.contains(StatusFlags::HAS_GROUP_ID),
        m.group_id.as_ref(),
        "group-id flag without group",
    )?;
    put_opt_buffer15(
        it,
        m.flags.contains(StatusFlags::HAS_PERM_DATA),
        m.perm_data.as_ref(),
        "perm-data flag without data",
    )?;
    if m.flags.contains(StatusFlags::HAS_POST_USER_INFO) {
        let info =
            m.post_user.ok_or(CodecError::InvalidArgument("post-user flag without info"))?;
        it.put_u32(info.user_addr)?;
        it.put_u32(info.user_id)?;
    }
    put_opt_buffer15(
        it,
        m.flags.contains(StatusFlags::HAS_EXTENDED_HEADER),
        m.extended_header.as_ref(),
        "extended-header flag without header",
    )?;
    if m.flags.contains(StatusFlags::HAS_MSG_KEY) {
        let key = m.key.as_ref().ok_or(CodecError::InvalidArgument("key flag without key"))?;
        put_key(it, key)?;
    }
    if m.flags.contains(StatusFlags::HAS_REQ_MSG_KEY) {
        let key = m
            .req_key
            .as_ref()
            .ok_or(CodecError::InvalidArgument("req-key flag without key"))?;
        put_key(it, key)?;
    }
    Ok(())
}

fn put_update_fields<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    m: &UpdateMsg<B>,
) -> Result<()> {
    prim::put_u15(it, m.flags.bits())?;
    it.put_u8(m.update_type)?;
    if m.flags.contains(UpdateFlags::HAS_SEQ_NUM) {
        it.put_u32(m.seq_num)?;
    }
    if m.flags.contains(UpdateFlags::HAS_CONF_INFO) {
        prim::put_u15(it, m.conf_info.count)?;
        it.put_u16(m.conf_info.time)?;
    }
    put_opt_buffer15(
        it,
        m.flags.contains(UpdateFlags::HAS_PERM_DATA),
        m.perm_data.as_ref(),
        "perm-data flag without data",
    )?;
    if m.flags.contains(UpdateFlags::HAS_POST_USER_INFO) {
        let info =
            m.post_user.ok_or(CodecError::InvalidArgument("post-user flag without info"))?;
        it.put_u32(info.user_addr)?;
        it.put_u32(info.user_id)?;
    }
    put_opt_buffer15(
        it,
        m.flags.contains(UpdateFlags::HAS_EXTENDED_HEADER),
        m.extended_header.as_ref(),
        "extended-header flag without header",
    )?;
    if m.flags.contains(UpdateFlags::HAS_MSG_KEY) {
        let key = m.key.as_ref().ok_or(CodecError::InvalidArgument("key flag without key"))?;
        put_key(it, key)?;
    }
    Ok(())
}

fn put_close_fields<B: AsRef<[u8]>>(it: &mut EncodeIterator, m: &CloseMsg<B>) -> Result<()> {
    prim::put_u15(it, m.flags.bits())?;
    put_opt_buffer15(
        it,
        m.flags.contains(CloseFlags::HAS_EXTENDED_HEADER),
        m.extended_header.as_ref(),
        "extended-header flag without header",
    )
}

fn put_ack_fields<B: AsRef<[u8]>>(it: &mut EncodeIterator, m: &AckMsg<B>) -> Result<()> {
    prim::put_u15(it, m.flags.bits())?;
    it.put_u32(m.ack_id)?;
    if m.flags.contains(AckFlags::HAS_NAK_CODE) {
        if m.nak_code == NakCode::None {
            return Err(CodecError::InvalidArgument("nak-code flag without code"));
        }
        it.put_u8(m.nak_code as u8)?;
    }
    if m.flags.contains(AckFlags::HAS_SEQ_NUM) {
        it.put_u32(m.seq_num)?;
    }
    put_opt_buffer15(
        it,
        m.flags.contains(AckFlags::HAS_TEXT),
        m.text.as_ref(),
        "text flag without text",
    )?;
    put_opt_buffer15(
        it,
        m.flags.contains(AckFlags::HAS_EXTENDED_HEADER),
        m.extended_header.as_ref(),
        "extended-header flag without header",
    )?;
    if m.flags.contains(AckFlags::HAS_MSG_KEY) {
        let key = m.key.as_ref().ok_or(CodecError::InvalidArgument("key flag without key"))?;
        put_key(it, key)?;
    }
    Ok(())
}

fn put_generic_fields<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    m: &GenericMsg<B>,
) -> Result<()> {
    prim::put_u15(it, m.flags.bits())?;
    if m.flags.contains(GenericFlags::HAS_SEQ_NUM) {
        it.put_u32(m.seq_num)?;
    }
    if m.flags.contains(GenericFlags::HAS_SECONDARY_SEQ_NUM) {
        it.put_u32(m.secondary_seq_num)?;
    }
    if m.flags.contains(GenericFlags::HAS_PART_NUM) {
        prim::put_u15(it, m.part_num)?;
    }
    put_opt_buffer15(
        it,
        m.flags.contains(GenericFlags::HAS_PERM_DATA),
        m.perm_data.as_ref(),
        "perm-data flag without data",
    )?;
    put_opt_buffer15(
        it,
        m.flags.contains(GenericFlags::HAS_EXTENDED_HEADER),
        m.extended_header.as_ref(),
        "extended-header flag without header",
    )?;
    if m.flags.contains(GenericFlags::HAS_MSG_KEY) {
        let key = m.key.as_ref().ok_or(CodecError::InvalidArgument("key flag without key"))?;
        put_key(it, key)?;
    }
    if m.flags.contains(GenericFlags::HAS_REQ_MSG_KEY) {
        let key = m
            .req_key
            .as_ref()
            .ok_or(CodecError::InvalidArgument("req-key flag without key"))?;
        put_key(it, key)?;
    }
    Ok(())
}

fn put_post_fields<B: AsRef<[u8]>>(it: &mut EncodeIterator, m: &PostMsg<B>) -> Result<()> {
    prim::put_u15(it, m.flags.bits())?;
    it.put_u32(m.post_user.user_addr)?;
    it.put_u32(m.post_user.user_id)?;
    if m.flags.contains(PostFlags::HAS_POST_ID) {
        it.put_u32(m.post_id)?;
    }
    if m.flags.contains(PostFlags::HAS_SEQ_NUM) {
        it.put_u32(m.seq_num)?;
    }
    if m.flags.contains(PostFlags::HAS_PART_NUM) {
        prim::put_u15(it, m.part_num)?;
    }
    if m.flags.contains(PostFlags::HAS_POST_USER_RIGHTS) {
        prim::put_u15(it, m.post_user_rights.bits())?;
    }
    put_opt_buffer15(
        it,
        m.flags.contains(PostFlags::HAS_PERM_DATA),
        m.perm_data.as_ref(),
        "perm-data flag without data",
    )?;
    put_opt_buffer15(
        it,
        m.flags.contains(PostFlags::HAS_EXTENDED_HEADER),
        m.extended_header.as_ref(),
        "extended-header flag without header",
    )?;
    if m.flags.contains(PostFlags::HAS_MSG_KEY) {
        let key = m.key.as_ref().ok_or(CodecError::InvalidArgument("key flag without key"))?;
        put_key(it, key)?;
    }
    Ok(())
}

/// Encode a complete message, payload included.
pub fn encode_msg<B: AsRef<[u8]>>(it: &mut EncodeIterator, msg: &Msg<B>) -> Result<()> {
    put_header(it, msg)?;
    it.put_slice(msg.payload())
}

/// Encode the message header and open a level for a streamed payload.
/// Pair with [`encode_msg_complete`].
pub fn encode_msg_init<B: AsRef<[u8]>>(it: &mut EncodeIterator, msg: &Msg<B>) -> Result<()> {
    if !msg.payload().is_empty() {
        return Err(CodecError::InvalidArgument(
            "streamed encode expects an empty payload field",
        ));
    }
    let start = put_header(it, msg)?;
    it.push_level(EncodeLevel {
        container: DataType::Msg,
        state: LevelState::EntryOpen,
        start,
        size_mark: None,
        entry_mark: None,
        count_pos: None,
        count: 0,
        flags: 0,
        sub_type: msg.container_type().to_wire(),
    })
}

/// Close a streamed message. With `success == false` everything written
/// since [`encode_msg_init`] is rolled back.
pub fn encode_msg_complete(it: &mut EncodeIterator, success: bool) -> Result<()> {
    it.expect_level(DataType::Msg, &[LevelState::EntryOpen])?;
    let level = it.pop_level()?;
    if !success {
        it.truncate(level.start);
    }
    Ok(())
}
