//! Deep copy of decoded messages.
//!
//! A decoded message borrows its frame, which the transport reclaims
//! when the read callback returns. [`copy_msg`] gives a message an
//! independent life: one exact-size allocation holds every retained
//! sub-buffer, and the copied message's descriptors are slices of that
//! allocation. Sub-buffers left out of the retain mask come back absent
//! with their flags cleared, so later readers see "not present" rather
//! than a dangling descriptor.
//!
//! Rust ownership stands in for the original release routine: dropping
//! the returned message frees the one allocation, and a double release
//! is unrepresentable.

use bitflags::bitflags;

use bytes::{Bytes, BytesMut};

use crate::msg::{
    AckFlags, AckMsg, CloseMsg, GenericFlags, GenericMsg, KeyFlags, Msg, MsgKey, PostFlags,
    PostMsg, RefreshFlags, RefreshMsg, RequestMsg, StatusFlags, StatusMsg, UpdateFlags,
    UpdateMsg,
};

bitflags! {
    /// Which sub-buffers survive a [`copy_msg`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CopyFlags: u16 {
        /// State text (refresh, status).
        const STATE_TEXT = 0x0001;
        /// Permission data.
        const PERM_DATA = 0x0002;
        /// Group id.
        const GROUP_ID = 0x0004;
        /// Ack/nak text.
        const NAK_TEXT = 0x0008;
        /// Extended header.
        const EXTENDED_HEADER = 0x0010;
        /// Message-key name.
        const KEY_NAME = 0x0020;
        /// Message-key attributes.
        const KEY_ATTRIB = 0x0040;
        /// Request-key name.
        const REQ_KEY_NAME = 0x0080;
        /// Request-key attributes.
        const REQ_KEY_ATTRIB = 0x0100;
        /// Payload.
        const PAYLOAD = 0x0200;
    }
}

impl CopyFlags {
    /// Retain everything.
    #[must_use]
    pub fn all_buffers() -> Self {
        Self::all()
    }
}

/// One buffer-bearing slot in a message. Each occurs at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    StateText,
    PermData,
    GroupId,
    NakText,
    ExtHeader,
    KeyName,
    KeyAttrib,
    ReqKeyName,
    ReqKeyAttrib,
    Payload,
}

const ROLE_COUNT: usize = 10;

impl Role {
    fn idx(self) -> usize {
        self as usize
    }

    fn retained(self, flags: CopyFlags) -> bool {
        let bit = match self {
            Self::StateText => CopyFlags::STATE_TEXT,
            Self::PermData => CopyFlags::PERM_DATA,
            Self::GroupId => CopyFlags::GROUP_ID,
            Self::NakText => CopyFlags::NAK_TEXT,
            Self::ExtHeader => CopyFlags::EXTENDED_HEADER,
            Self::KeyName => CopyFlags::KEY_NAME,
            Self::KeyAttrib => CopyFlags::KEY_ATTRIB,
            Self::ReqKeyName => CopyFlags::REQ_KEY_NAME,
            Self::ReqKeyAttrib => CopyFlags::REQ_KEY_ATTRIB,
            Self::Payload => CopyFlags::PAYLOAD,
        };
        flags.contains(bit)
    }
}

/// Deep-copy `msg`, retaining the sub-buffers named in `retain`.
///
/// `filter_mask`, when given, is ANDed onto the message-key filter of
/// the copy, narrowing the filter-list entries the copy claims interest
/// in.
pub fn copy_msg<B: AsRef<[u8]>>(
    msg: &Msg<B>,
    retain: CopyFlags,
    filter_mask: Option<u32>,
) -> Msg<Bytes> {
    // Pass 1: exact size of the retained bytes.
    let mut total = 0usize;
    visit_buffers(msg, |role, bytes| {
        if role.retained(retain) {
            total += bytes.len();
        }
    });

    // Pass 2: one allocation, every retained buffer appended.
    let mut arena = BytesMut::with_capacity(total);
    let mut ranges: [Option<(usize, usize)>; ROLE_COUNT] = [None; ROLE_COUNT];
    visit_buffers(msg, |role, bytes| {
        if role.retained(retain) {
            let start = arena.len();
            arena.extend_from_slice(bytes);
            ranges[role.idx()] = Some((start, bytes.len()));
        }
    });
    debug_assert_eq!(arena.len(), total);
    let data = arena.freeze();

    // Pass 3: rebuild with descriptors sliced out of the allocation.
    let slice = |role: Role| -> Option<Bytes> {
        ranges[role.idx()].map(|(start, len)| data.slice(start..start + len))
    };
    rebuild(msg, filter_mask, &slice)
}

fn visit_buffers<B: AsRef<[u8]>>(msg: &Msg<B>, mut visit: impl FnMut(Role, &[u8])) {
    fn visit_key<B: AsRef<[u8]>>(
        key: &MsgKey<B>,
        name_role: Role,
        attrib_role: Role,
        visit: &mut impl FnMut(Role, &[u8]),
    ) {
        if let Some(name) = &key.name {
            visit(name_role, name.as_ref());
        }
        if let Some(attrib) = &key.attrib {
            visit(attrib_role, attrib.as_ref());
        }
    }

    match msg {
        Msg::Request(m) => {
            if let Some(ext) = &m.extended_header {
                visit(Role::ExtHeader, ext.as_ref());
            }
            visit_key(&m.key, Role::KeyName, Role::KeyAttrib, &mut visit);
            visit(Role::Payload, m.payload.as_ref());
        }
        Msg::Refresh(m) => {
            visit(Role::StateText, m.state.text.as_ref());
            visit(Role::GroupId, m.group_id.as_ref());
            if let Some(perm) = &m.perm_data {
                visit(Role::PermData, perm.as_ref());
            }
            if let Some(ext) = &m.extended_header {
                visit(Role::ExtHeader, ext.as_ref());
            }
            if let Some(key) = &m.key {
                visit_key(key, Role::KeyName, Role::KeyAttrib, &mut visit);
            }
            if let Some(req_key) = &m.req_key {
                visit_key(req_key, Role::ReqKeyName, Role::ReqKeyAttrib, &mut visit);
            }
            visit(Role::Payload, m.payload.as_ref());
        }
        Msg::Status(m) => {
            if let Some(state) = &m.state {
                visit(Role::StateText, state.text.as_ref());
            }
            if let Some(group) = &m.group_id {
                visit(Role::GroupId, group.as_ref());
            }
            if let Some(perm) = &m.perm_data {
                visit(Role::PermData, perm.as_ref());
            }
            if let Some(ext) = &m.extended_header {
                visit(Role::ExtHeader, ext.as_ref());
            }
            if let Some(key) = &m.key {
                visit_key(key, Role::KeyName, Role::KeyAttrib, &mut visit);
            }
            if let Some(req_key) = &m.req_key {
                visit_key(req_key, Role::ReqKeyName, Role::ReqKeyAttrib, &mut visit);
            }
            visit(Role::Payload, m.payload.as_ref());
        }
        Msg::Update(m) => {
            if let Some(perm) = &m.perm_data {
                visit(Role::PermData, perm.as_ref());
            }
            if let Some(ext) = &m.extended_header {
                visit(Role::ExtHeader, ext.as_ref());
            }
            if let Some(key) = &m.key {
                visit_key(key, Role::KeyName, Role::KeyAttrib, &mut visit);
            }
            visit(Role::Payload, m.payload.as_ref());
        }
        Msg::Close(m) => {
            if let Some(ext) = &m.extended_header {
                visit(Role::ExtHeader, ext.as_ref());
            }
            visit(Role::Payload, m.payload.as_ref());
        }
        Msg::Ack(m) => {
            if let Some(text) = &m.text {
                visit(Role::NakText, text.as_ref());
            }
            if let Some(ext) = &m.extended_header {
                visit(Role::ExtHeader, ext.as_ref());
            }
            if let Some(key) = &m.key {
                visit_key(key, Role::KeyName, Role::KeyAttrib, &mut visit);
            }
            visit(Role::Payload, m.payload.as_ref());
        }
        Msg::Generic(m) => {
            if let Some(perm) = &m.perm_data {
                visit(Role::PermData, perm.as_ref());
            }
            if let Some(ext) = &m.extended_header {
                visit(Role::ExtHeader, ext.as_ref());
            }
            if let Some(key) = &m.key {
                visit_key(key, Role::KeyName, Role::KeyAttrib, &mut visit);
            }
            if let Some(req_key) = &m.req_key {
                visit_key(req_key, Role::ReqKeyName, Role::ReqKeyAttrib, &mut visit);
            }
            visit(Role::Payload, m.payload.as_ref());
        }
        Msg::Post(m) => {
            if let Some(perm) = &m.perm_data {
                visit(Role::PermData, perm.as_ref());
            }
            if let Some(ext) = &m.extended_header {
                visit(Role::ExtHeader, ext.as_ref());
            }
            if let Some(key) = &m.key {
                visit_key(key, Role::KeyName, Role::KeyAttrib, &mut visit);
            }
            visit(Role::Payload, m.payload.as_ref());
        }
    }
}

fn copy_key<B: AsRef<[u8]>>(
    key: &MsgKey<B>,
    name_role: Role,
    attrib_role: Role,
    filter_mask: Option<u32>,
    slice: &impl Fn(Role) -> Option<Bytes>,
) -> MsgKey<Bytes> {
    let mut flags = key.flags;
    let name = if key.name.is_some() {
        let copied = slice(name_role);
        if copied.is_none() {
            flags.remove(KeyFlags::HAS_NAME);
        }
        copied
    } else {
        None
    };
    let attrib = if key.attrib.is_some() {
        let copied = slice(attrib_role);
        if copied.is_none() {
            flags.remove(KeyFlags::HAS_ATTRIB);
        }
        copied
    } else {
        None
    };
    let mut filter = key.filter;
    if let Some(mask) = filter_mask {
        if flags.contains(KeyFlags::HAS_FILTER) {
            filter &= mask;
        }
    }
    MsgKey {
        flags,
        service_id: key.service_id,
        name,
        name_type: key.name_type,
        filter,
        identifier: key.identifier,
        attrib_container_type: key.attrib_container_type,
        attrib,
    }
}

#[allow(clippy::too_many_lines)]
fn rebuild<B: AsRef<[u8]>>(
    msg: &Msg<B>,
    filter_mask: Option<u32>,
    slice: &impl Fn(Role) -> Option<Bytes>,
) -> Msg<Bytes> {
    let payload = slice(Role::Payload).unwrap_or_default();
    match msg {
        Msg::Request(m) => {
            let mut flags = m.flags;
            let extended_header = m.extended_header.as_ref().and_then(|_| {
                let copied = slice(Role::ExtHeader);
                if copied.is_none() {
                    flags.remove(super::RequestFlags::HAS_EXTENDED_HEADER);
                }
                copied
            });
            Msg::Request(RequestMsg {
                domain: m.domain,
                stream_id: m.stream_id,
                container_type: m.container_type,
                flags,
                key: copy_key(&m.key, Role::KeyName, Role::KeyAttrib, filter_mask, slice),
                priority: m.priority,
                qos: m.qos,
                worst_qos: m.worst_qos,
                extended_header,
                payload,
            })
        }
        Msg::Refresh(m) => {
            let mut flags = m.flags;
            let state = crate::value::State {
                stream_state: m.state.stream_state,
                data_state: m.state.data_state,
                code: m.state.code,
                text: slice(Role::StateText).unwrap_or_default(),
            };
            let group_id = slice(Role::GroupId).unwrap_or_default();
            let perm_data = m.perm_data.as_ref().and_then(|_| {
                let copied = slice(Role::PermData);
                if copied.is_none() {
                    flags.remove(RefreshFlags::HAS_PERM_DATA);
                }
                copied
            });
            let extended_header = m.extended_header.as_ref().and_then(|_| {
                let copied = slice(Role::ExtHeader);
                if copied.is_none() {
                    flags.remove(RefreshFlags::HAS_EXTENDED_HEADER);
                }
                copied
            });
            let key = m
                .key
                .as_ref()
                .map(|k| copy_key(k, Role::KeyName, Role::KeyAttrib, filter_mask, slice));
            let req_key = m
                .req_key
                .as_ref()
                .map(|k| copy_key(k, Role::ReqKeyName, Role::ReqKeyAttrib, None, slice));
            Msg::Refresh(RefreshMsg {
                domain: m.domain,
                stream_id: m.stream_id,
                container_type: m.container_type,
                flags,
                state,
                group_id,
                seq_num: m.seq_num,
                part_num: m.part_num,
                perm_data,
                qos: m.qos,
                post_user: m.post_user,
                extended_header,
                key,
                req_key,
                payload,
            })
        }
        Msg::Status(m) => {
            let mut flags = m.flags;
            let state = m.state.as_ref().map(|s| crate::value::State {
                stream_state: s.stream_state,
                data_state: s.data_state,
                code: s.code,
                text: slice(Role::StateText).unwrap_or_default(),
            });
            let group_id = m.group_id.as_ref().and_then(|_| {
                let copied = slice(Role::GroupId);
                if copied.is_none() {
                    flags.remove(StatusFlags::HAS_GROUP_ID);
                }
                copied
            });
            let perm_data = m.perm_data.as_ref().and_then(|_| {
                let copied = slice(Role::PermData);
                if copied.is_none() {
                    flags.remove(StatusFlags::HAS_PERM_DATA);
                }
                copied
            });
            let extended_header = m.extended_header.as_ref().and_then(|_| {
                let copied = slice(Role::ExtHeader);
                if copied.is_none() {
                    flags.remove(StatusFlags::HAS_EXTENDED_HEADER);
                }
                copied
            });
            let key = m
                .key
                .as_ref()
                .map(|k| copy_key(k, Role::KeyName, Role::KeyAttrib, filter_mask, slice));
            let req_key = m
                .req_key
                .as_ref()
                .map(|k| copy_key(k, Role::ReqKeyName, Role::ReqKeyAttrib, None, slice));
            Msg::Status(StatusMsg {
                domain: m.domain,
                stream_id: m.stream_id,
                container_type: m.container_type,
                flags,
                state,
                group_id,
                perm_data,
                post_user: m.post_user,
                extended_header,
                key,
                req_key,
                payload,
            })
        }
        Msg::Update(m) => {
            let mut flags = m.flags;
            let perm_data = m.perm_data.as_ref().and_then(|_| {
                let copied = slice(Role::PermData);
                if copied.is_none() {
                    flags.remove(UpdateFlags::HAS_PERM_DATA);
                }
                copied
            });
            let extended_header = m.extended_header.as_ref().and_then(|_| {
                let copied = slice(Role::ExtHeader);
                if copied.is_none() {
                    flags.remove(UpdateFlags::HAS_EXTENDED_HEADER);
                }
                copied
            });
            let key = m
                .key
                .as_ref()
                .map(|k| copy_key(k, Role::KeyName, Role::KeyAttrib, filter_mask, slice));
            Msg::Update(UpdateMsg {
                domain: m.domain,
                stream_id: m.stream_id,
                container_type: m.container_type,
                flags,
                update_type: m.update_type,
                seq_num: m.seq_num,
                conf_info: m.conf_info,
                perm_data,
                post_user: m.post_user,
                extended_header,
                key,
                payload,
            })
        }
        Msg::Close(m) => {
            let mut flags = m.flags;
            let extended_header = m.extended_header.as_ref().and_then(|_| {
                let copied = slice(Role::ExtHeader);
                if copied.is_none() {
                    flags.remove(super::CloseFlags::HAS_EXTENDED_HEADER);
                }
                copied
            });
            Msg::Close(CloseMsg {
                domain: m.domain,
                stream_id: m.stream_id,
                container_type: m.container_type,
                flags,
                extended_header,
                payload,
            })
        }
        Msg::Ack(m) => {
            let mut flags = m.flags;
            let text = m.text.as_ref().and_then(|_| {
                let copied = slice(Role::NakText);
                if copied.is_none() {
                    flags.remove(AckFlags::HAS_TEXT);
                }
                copied
            });
            let extended_header = m.extended_header.as_ref().and_then(|_| {
                let copied = slice(Role::ExtHeader);
                if copied.is_none() {
                    flags.remove(AckFlags::HAS_EXTENDED_HEADER);
                }
                copied
            });
            let key = m
                .key
                .as_ref()
                .map(|k| copy_key(k, Role::KeyName, Role::KeyAttrib, filter_mask, slice));
            Msg::Ack(AckMsg {
                domain: m.domain,
                stream_id: m.stream_id,
                container_type: m.container_type,
                flags,
                ack_id: m.ack_id,
                nak_code: m.nak_code,
                seq_num: m.seq_num,
                text,
                extended_header,
                key,
                payload,
            })
        }
        Msg::Generic(m) => {
            let mut flags = m.flags;
            let perm_data = m.perm_data.as_ref().and_then(|_| {
                let copied = slice(Role::PermData);
                if copied.is_none() {
                    flags.remove(GenericFlags::HAS_PERM_DATA);
                }
                copied
            });
            let extended_header = m.extended_header.as_ref().and_then(|_| {
                let copied = slice(Role::ExtHeader);
                if copied.is_none() {
                    flags.remove(GenericFlags::HAS_EXTENDED_HEADER);
                }
                copied
            });
            let key = m
                .key
                .as_ref()
                .map(|k| copy_key(k, Role::KeyName, Role::KeyAttrib, filter_mask, slice));
            let req_key = m
                .req_key
                .as_ref()
                .map(|k| copy_key(k, Role::ReqKeyName, Role::ReqKeyAttrib, None, slice));
            Msg::Generic(GenericMsg {
                domain: m.domain,
                stream_id: m.stream_id,
                container_type: m.container_type,
                flags,
                seq_num: m.seq_num,
                secondary_seq_num: m.secondary_seq_num,
                part_num: m.part_num,
                perm_data,
                extended_header,
                key,
                req_key,
                payload,
            })
        }
        Msg::Post(m) => {
            let mut flags = m.flags;
            let perm_data = m.perm_data.as_ref().and_then(|_| {
                let copied = slice(Role::PermData);
                if copied.is_none() {
                    flags.remove(PostFlags::HAS_PERM_DATA);
                }
                copied
            });
            let extended_header = m.extended_header.as_ref().and_then(|_| {
                let copied = slice(Role::ExtHeader);
                if copied.is_none() {
                    flags.remove(PostFlags::HAS_EXTENDED_HEADER);
                }
                copied
            });
            let key = m
                .key
                .as_ref()
                .map(|k| copy_key(k, Role::KeyName, Role::KeyAttrib, filter_mask, slice));
            Msg::Post(PostMsg {
                domain: m.domain,
                stream_id: m.stream_id,
                container_type: m.container_type,
                flags,
                post_user: m.post_user,
                post_id: m.post_id,
                seq_num: m.seq_num,
                part_num: m.part_num,
                post_user_rights: m.post_user_rights,
                perm_data,
                extended_header,
                key,
                payload,
            })
        }
    }
}
