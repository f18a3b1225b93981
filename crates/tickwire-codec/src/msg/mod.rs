//! The message codec: eight classes over a common envelope.
//!
//! Every message carries a class, a domain, a signed stream id, and the
//! container type of its payload. A flag word per class switches the
//! optional header fields on and off. The message key — service, name,
//! filter, identifier, attributes — identifies the subject of a stream.
//!
//! Wire layout:
//!
//! ```text
//! [header length u16]
//! [class u8][domain u8][stream id i32][payload container u8]
//! [flags rb15][class-specific fields][extended header rb15?]
//! [msg key rb15-prefixed?][request key rb15-prefixed?]
//! [payload ...]
//! ```
//!
//! Messages decode borrowing the frame (`Msg<&[u8]>`); when one must
//! outlive its frame, [`copy::copy_msg`] re-homes it into a single owned
//! allocation (`Msg<Bytes>`).

mod copy;
mod decode;
mod encode;

pub use copy::{CopyFlags, copy_msg};
pub use decode::decode_msg;
pub use encode::{encode_msg, encode_msg_complete, encode_msg_init};

use bitflags::bitflags;

use crate::{
    error::{CodecError, Result},
    types::{DataType, MsgClass},
    value::{Qos, State, StreamState},
};

/// A decoded or to-be-encoded message, borrowing (`Msg<&[u8]>`) or
/// owning (`Msg<Bytes>`) its variable-length pieces.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg<B> {
    /// Consumer request.
    Request(RequestMsg<B>),
    /// Provider refresh.
    Refresh(RefreshMsg<B>),
    /// Provider status.
    Status(StatusMsg<B>),
    /// Provider update.
    Update(UpdateMsg<B>),
    /// Stream close.
    Close(CloseMsg<B>),
    /// Acknowledgement.
    Ack(AckMsg<B>),
    /// Generic bidirectional message.
    Generic(GenericMsg<B>),
    /// Consumer post.
    Post(PostMsg<B>),
}

/// A message borrowing every buffer from its inbound frame.
pub type BorrowedMsg<'a> = Msg<&'a [u8]>;
/// A message owning its buffers inside one allocation.
pub type OwnedMsg = Msg<bytes::Bytes>;

bitflags! {
    /// Message-key flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyFlags: u16 {
        /// Service id present.
        const HAS_SERVICE_ID = 0x01;
        /// Name present.
        const HAS_NAME = 0x02;
        /// Name type present.
        const HAS_NAME_TYPE = 0x04;
        /// Filter present.
        const HAS_FILTER = 0x08;
        /// Numeric identifier present.
        const HAS_IDENTIFIER = 0x10;
        /// Attribute sub-container present.
        const HAS_ATTRIB = 0x20;
    }
}

/// The bundle identifying the subject of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgKey<B> {
    /// Which pieces are present.
    pub flags: KeyFlags,
    /// Provider service the item lives on.
    pub service_id: u16,
    /// Item name.
    pub name: Option<B>,
    /// Namespace of `name` (instrument code, user name, ...).
    pub name_type: u8,
    /// Filter bits selecting filter-list entries.
    pub filter: u32,
    /// Numeric identifier, an alternative to `name`.
    pub identifier: i32,
    /// Container type of `attrib`.
    pub attrib_container_type: DataType,
    /// Encoded attribute container.
    pub attrib: Option<B>,
}

impl<B: AsRef<[u8]>> MsgKey<B> {
    /// True when both keys identify the same item: same present pieces,
    /// byte-equal contents.
    pub fn matches<O: AsRef<[u8]>>(&self, other: &MsgKey<O>) -> bool {
        self.flags == other.flags
            && (!self.flags.contains(KeyFlags::HAS_SERVICE_ID)
                || self.service_id == other.service_id)
            && (!self.flags.contains(KeyFlags::HAS_NAME)
                || self.name.as_ref().map(AsRef::as_ref) == other.name.as_ref().map(AsRef::as_ref))
            && (!self.flags.contains(KeyFlags::HAS_NAME_TYPE)
                || self.name_type == other.name_type)
            && (!self.flags.contains(KeyFlags::HAS_FILTER) || self.filter == other.filter)
            && (!self.flags.contains(KeyFlags::HAS_IDENTIFIER)
                || self.identifier == other.identifier)
            && (!self.flags.contains(KeyFlags::HAS_ATTRIB)
                || self.attrib.as_ref().map(AsRef::as_ref)
                    == other.attrib.as_ref().map(AsRef::as_ref))
    }
}

impl<B> Default for MsgKey<B> {
    fn default() -> Self {
        Self {
            flags: KeyFlags::default(),
            service_id: 0,
            name: None,
            name_type: 0,
            filter: 0,
            identifier: 0,
            attrib_container_type: DataType::NoData,
            attrib: None,
        }
    }
}

/// Request priority: class first, count as a tiebreaker within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Priority {
    /// Priority class; higher is more urgent.
    pub class: u8,
    /// Number of interested parties behind this request.
    pub count: u16,
}

/// Identity a post or refresh attributes to its originating user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostUserInfo {
    /// Originating host address.
    pub user_addr: u32,
    /// Originating user id.
    pub user_id: u32,
}

/// Conflation details on an update that merged several ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConflationInfo {
    /// How many updates were merged.
    pub count: u16,
    /// Merge interval in milliseconds.
    pub time: u16,
}

bitflags! {
    /// Rights granted to the poster of contributed data.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PostUserRights: u16 {
        /// May create items.
        const CREATE = 0x01;
        /// May delete items.
        const DELETE = 0x02;
        /// May modify permission data.
        const MODIFY_PERM = 0x04;
    }
}

/// Reason a request or post was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum NakCode {
    /// No negative acknowledgement.
    #[default]
    None = 0,
    /// Access denied.
    AccessDenied = 1,
    /// The source refused the request.
    DeniedBySource = 2,
    /// The source is down.
    SourceDown = 3,
    /// The source is unknown.
    SourceUnknown = 4,
    /// No resources available.
    NoResources = 5,
    /// No response from the source.
    NoResponse = 6,
    /// Symbol unknown to the source.
    SymbolUnknown = 7,
    /// Item not open.
    NotOpen = 8,
    /// Content of the post was invalid.
    InvalidContent = 9,
    /// Gateway between here and the source is down.
    GatewayDown = 10,
}

impl NakCode {
    pub(crate) fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::AccessDenied),
            2 => Ok(Self::DeniedBySource),
            3 => Ok(Self::SourceDown),
            4 => Ok(Self::SourceUnknown),
            5 => Ok(Self::NoResources),
            6 => Ok(Self::NoResponse),
            7 => Ok(Self::SymbolUnknown),
            8 => Ok(Self::NotOpen),
            9 => Ok(Self::InvalidContent),
            10 => Ok(Self::GatewayDown),
            _ => Err(CodecError::InvalidData("unknown nak code")),
        }
    }
}

/// Well-known update types carried by [`UpdateMsg::update_type`].
pub mod update_type {
    /// Not specified.
    pub const UNSPECIFIED: u8 = 0;
    /// Quote change.
    pub const QUOTE: u8 = 1;
    /// Trade print.
    pub const TRADE: u8 = 2;
    /// News alert.
    pub const NEWS_ALERT: u8 = 3;
    /// Volume alert.
    pub const VOLUME_ALERT: u8 = 4;
    /// Order indication.
    pub const ORDER_INDICATION: u8 = 5;
    /// Closing run.
    pub const CLOSING_RUN: u8 = 6;
    /// Correction of an earlier value.
    pub const CORRECTION: u8 = 7;
    /// Market digest.
    pub const MARKET_DIGEST: u8 = 8;
    /// Quote followed by a trade.
    pub const QUOTES_TRADE: u8 = 9;
    /// Multiple kinds merged.
    pub const MULTIPLE: u8 = 10;
    /// Verification pass, no change expected.
    pub const VERIFY: u8 = 11;
}

bitflags! {
    /// Request message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RequestFlags: u16 {
        /// Extended header present.
        const HAS_EXTENDED_HEADER = 0x0001;
        /// Priority present.
        const HAS_PRIORITY = 0x0002;
        /// Stream stays open for updates.
        const STREAMING = 0x0004;
        /// Updates should echo the message key.
        const MSG_KEY_IN_UPDATES = 0x0008;
        /// Updates should carry conflation info.
        const CONF_INFO_IN_UPDATES = 0x0010;
        /// Reissue without a refresh.
        const NO_REFRESH = 0x0020;
        /// Preferred QoS present.
        const HAS_QOS = 0x0040;
        /// Worst acceptable QoS present.
        const HAS_WORST_QOS = 0x0080;
        /// Private stream requested.
        const PRIVATE_STREAM = 0x0100;
        /// Pause delivery on this stream.
        const PAUSE = 0x0200;
        /// Payload carries a view definition.
        const HAS_VIEW = 0x0400;
        /// Payload carries a batch of item names.
        const HAS_BATCH = 0x0800;
        /// Qualified stream requested.
        const QUALIFIED_STREAM = 0x1000;
    }
}

/// Consumer request opening, reissuing, pausing, or batching streams.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMsg<B> {
    /// Domain type.
    pub domain: u8,
    /// Stream id.
    pub stream_id: i32,
    /// Payload container type.
    pub container_type: DataType,
    /// Flags.
    pub flags: RequestFlags,
    /// Identifies the requested item. Always present on a request.
    pub key: MsgKey<B>,
    /// Priority, when `HAS_PRIORITY`.
    pub priority: Priority,
    /// Preferred QoS, when `HAS_QOS`.
    pub qos: Option<Qos>,
    /// Worst acceptable QoS, when `HAS_WORST_QOS`.
    pub worst_qos: Option<Qos>,
    /// Extended header, when flagged.
    pub extended_header: Option<B>,
    /// Encoded payload (batch names, view definition), possibly empty.
    pub payload: B,
}

bitflags! {
    /// Refresh message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RefreshFlags: u16 {
        /// Extended header present.
        const HAS_EXTENDED_HEADER = 0x0001;
        /// Permission data present.
        const HAS_PERM_DATA = 0x0002;
        /// Message key present.
        const HAS_MSG_KEY = 0x0008;
        /// Sequence number present.
        const HAS_SEQ_NUM = 0x0010;
        /// Answering a request (vs. unsolicited).
        const SOLICITED = 0x0020;
        /// Final part of the refresh.
        const REFRESH_COMPLETE = 0x0040;
        /// QoS present.
        const HAS_QOS = 0x0080;
        /// Receiver should drop cached data first.
        const CLEAR_CACHE = 0x0100;
        /// Receiver must not cache this message.
        const DO_NOT_CACHE = 0x0200;
        /// Part of a private stream.
        const PRIVATE_STREAM = 0x0400;
        /// Post-user info present.
        const HAS_POST_USER_INFO = 0x0800;
        /// Part number present.
        const HAS_PART_NUM = 0x1000;
        /// Request key echoed back.
        const HAS_REQ_MSG_KEY = 0x2000;
    }
}

/// Provider refresh: a full image for a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshMsg<B> {
    /// Domain type.
    pub domain: u8,
    /// Stream id.
    pub stream_id: i32,
    /// Payload container type.
    pub container_type: DataType,
    /// Flags.
    pub flags: RefreshFlags,
    /// Stream and data condition. Always present on a refresh.
    pub state: State<B>,
    /// Item group for bulk status transitions. Always present.
    pub group_id: B,
    /// Sequence number, when flagged.
    pub seq_num: u32,
    /// Part number of a multi-part refresh, when flagged.
    pub part_num: u16,
    /// Permission data, when flagged.
    pub perm_data: Option<B>,
    /// QoS actually provided, when flagged.
    pub qos: Option<Qos>,
    /// Originating user of posted data, when flagged.
    pub post_user: Option<PostUserInfo>,
    /// Extended header, when flagged.
    pub extended_header: Option<B>,
    /// Message key, when flagged.
    pub key: Option<MsgKey<B>>,
    /// Request key echo, when flagged.
    pub req_key: Option<MsgKey<B>>,
    /// Encoded payload.
    pub payload: B,
}

bitflags! {
    /// Update message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateFlags: u16 {
        /// Extended header present.
        const HAS_EXTENDED_HEADER = 0x0001;
        /// Permission data present.
        const HAS_PERM_DATA = 0x0002;
        /// Message key present.
        const HAS_MSG_KEY = 0x0008;
        /// Sequence number present.
        const HAS_SEQ_NUM = 0x0010;
        /// Conflation info present.
        const HAS_CONF_INFO = 0x0020;
        /// Receiver must not cache this update.
        const DO_NOT_CACHE = 0x0040;
        /// Intermediaries must not conflate this update.
        const DO_NOT_CONFLATE = 0x0080;
        /// Receiver must not ripple fields.
        const DO_NOT_RIPPLE = 0x0100;
        /// Post-user info present.
        const HAS_POST_USER_INFO = 0x0200;
        /// May be dropped under pressure.
        const DISCARDABLE = 0x0400;
    }
}

/// Provider update: an incremental change.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMsg<B> {
    /// Domain type.
    pub domain: u8,
    /// Stream id.
    pub stream_id: i32,
    /// Payload container type.
    pub container_type: DataType,
    /// Flags.
    pub flags: UpdateFlags,
    /// Kind of change, see [`update_type`].
    pub update_type: u8,
    /// Sequence number, when flagged.
    pub seq_num: u32,
    /// Conflation info, when flagged.
    pub conf_info: ConflationInfo,
    /// Permission data, when flagged.
    pub perm_data: Option<B>,
    /// Originating user of posted data, when flagged.
    pub post_user: Option<PostUserInfo>,
    /// Extended header, when flagged.
    pub extended_header: Option<B>,
    /// Message key, when flagged.
    pub key: Option<MsgKey<B>>,
    /// Encoded payload.
    pub payload: B,
}

bitflags! {
    /// Status message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u16 {
        /// Extended header present.
        const HAS_EXTENDED_HEADER = 0x0001;
        /// Permission data present.
        const HAS_PERM_DATA = 0x0002;
        /// Message key present.
        const HAS_MSG_KEY = 0x0008;
        /// Group id present.
        const HAS_GROUP_ID = 0x0010;
        /// State present.
        const HAS_STATE = 0x0020;
        /// Receiver should drop cached data.
        const CLEAR_CACHE = 0x0040;
        /// Part of a private stream.
        const PRIVATE_STREAM = 0x0080;
        /// Post-user info present.
        const HAS_POST_USER_INFO = 0x0100;
        /// Request key echoed back.
        const HAS_REQ_MSG_KEY = 0x0200;
    }
}

/// Provider status: a stream condition change without data.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMsg<B> {
    /// Domain type.
    pub domain: u8,
    /// Stream id.
    pub stream_id: i32,
    /// Payload container type.
    pub container_type: DataType,
    /// Flags.
    pub flags: StatusFlags,
    /// Stream and data condition, when flagged.
    pub state: Option<State<B>>,
    /// Item group, when flagged.
    pub group_id: Option<B>,
    /// Permission data, when flagged.
    pub perm_data: Option<B>,
    /// Originating user of posted data, when flagged.
    pub post_user: Option<PostUserInfo>,
    /// Extended header, when flagged.
    pub extended_header: Option<B>,
    /// Message key, when flagged.
    pub key: Option<MsgKey<B>>,
    /// Request key echo, when flagged.
    pub req_key: Option<MsgKey<B>>,
    /// Encoded payload.
    pub payload: B,
}

bitflags! {
    /// Close message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CloseFlags: u16 {
        /// Extended header present.
        const HAS_EXTENDED_HEADER = 0x01;
        /// Sender wants the close acknowledged.
        const ACK_REQUESTED = 0x02;
        /// Payload carries a batch of stream ids to close.
        const HAS_BATCH = 0x04;
    }
}

/// Stream close, from either side.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseMsg<B> {
    /// Domain type.
    pub domain: u8,
    /// Stream id.
    pub stream_id: i32,
    /// Payload container type.
    pub container_type: DataType,
    /// Flags.
    pub flags: CloseFlags,
    /// Extended header, when flagged.
    pub extended_header: Option<B>,
    /// Encoded payload (batch close list), possibly empty.
    pub payload: B,
}

bitflags! {
    /// Ack message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AckFlags: u16 {
        /// Extended header present.
        const HAS_EXTENDED_HEADER = 0x01;
        /// Text present.
        const HAS_TEXT = 0x02;
        /// Part of a private stream.
        const PRIVATE_STREAM = 0x04;
        /// Sequence number present.
        const HAS_SEQ_NUM = 0x08;
        /// Message key present.
        const HAS_MSG_KEY = 0x10;
        /// Nak code present: this is a negative acknowledgement.
        const HAS_NAK_CODE = 0x20;
        /// Part of a qualified stream.
        const QUALIFIED_STREAM = 0x40;
    }
}

/// Acknowledgement of a post or close.
#[derive(Debug, Clone, PartialEq)]
pub struct AckMsg<B> {
    /// Domain type.
    pub domain: u8,
    /// Stream id.
    pub stream_id: i32,
    /// Payload container type.
    pub container_type: DataType,
    /// Flags.
    pub flags: AckFlags,
    /// Id this acknowledges (post id or close id). Always present.
    pub ack_id: u32,
    /// Refusal reason, when `HAS_NAK_CODE`.
    pub nak_code: NakCode,
    /// Sequence number, when flagged.
    pub seq_num: u32,
    /// Human-readable text, when flagged.
    pub text: Option<B>,
    /// Extended header, when flagged.
    pub extended_header: Option<B>,
    /// Message key, when flagged.
    pub key: Option<MsgKey<B>>,
    /// Encoded payload.
    pub payload: B,
}

bitflags! {
    /// Generic message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GenericFlags: u16 {
        /// Extended header present.
        const HAS_EXTENDED_HEADER = 0x0001;
        /// Permission data present.
        const HAS_PERM_DATA = 0x0002;
        /// Message key present.
        const HAS_MSG_KEY = 0x0004;
        /// Sequence number present.
        const HAS_SEQ_NUM = 0x0008;
        /// Final part of a multi-part exchange.
        const MESSAGE_COMPLETE = 0x0010;
        /// Secondary sequence number present.
        const HAS_SECONDARY_SEQ_NUM = 0x0020;
        /// Part number present.
        const HAS_PART_NUM = 0x0040;
        /// Request key echoed back.
        const HAS_REQ_MSG_KEY = 0x0080;
    }
}

/// Free-form bidirectional message on an open stream.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericMsg<B> {
    /// Domain type.
    pub domain: u8,
    /// Stream id.
    pub stream_id: i32,
    /// Payload container type.
    pub container_type: DataType,
    /// Flags.
    pub flags: GenericFlags,
    /// Sequence number, when flagged.
    pub seq_num: u32,
    /// Secondary sequence number, when flagged.
    pub secondary_seq_num: u32,
    /// Part number, when flagged.
    pub part_num: u16,
    /// Permission data, when flagged.
    pub perm_data: Option<B>,
    /// Extended header, when flagged.
    pub extended_header: Option<B>,
    /// Message key, when flagged.
    pub key: Option<MsgKey<B>>,
    /// Request key echo, when flagged.
    pub req_key: Option<MsgKey<B>>,
    /// Encoded payload.
    pub payload: B,
}

bitflags! {
    /// Post message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PostFlags: u16 {
        /// Extended header present.
        const HAS_EXTENDED_HEADER = 0x0001;
        /// Post id present.
        const HAS_POST_ID = 0x0002;
        /// Message key present.
        const HAS_MSG_KEY = 0x0004;
        /// Sequence number present.
        const HAS_SEQ_NUM = 0x0008;
        /// Final part of a multi-part post.
        const POST_COMPLETE = 0x0010;
        /// Sender wants the post acknowledged.
        const ACK = 0x0020;
        /// Permission data present.
        const HAS_PERM_DATA = 0x0040;
        /// Part number present.
        const HAS_PART_NUM = 0x0080;
        /// Post-user rights present.
        const HAS_POST_USER_RIGHTS = 0x0100;
    }
}

/// Consumer post: contributed data flowing upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct PostMsg<B> {
    /// Domain type.
    pub domain: u8,
    /// Stream id.
    pub stream_id: i32,
    /// Payload container type.
    pub container_type: DataType,
    /// Flags.
    pub flags: PostFlags,
    /// Originating user. Always present on a post.
    pub post_user: PostUserInfo,
    /// Post id, when flagged.
    pub post_id: u32,
    /// Sequence number, when flagged.
    pub seq_num: u32,
    /// Part number, when flagged.
    pub part_num: u16,
    /// Rights claimed by the poster, when flagged.
    pub post_user_rights: PostUserRights,
    /// Permission data, when flagged.
    pub perm_data: Option<B>,
    /// Extended header, when flagged.
    pub extended_header: Option<B>,
    /// Message key, when flagged.
    pub key: Option<MsgKey<B>>,
    /// Encoded payload.
    pub payload: B,
}

impl<B: AsRef<[u8]>> Msg<B> {
    /// Message class.
    #[must_use]
    pub fn class(&self) -> MsgClass {
        match self {
            Self::Request(_) => MsgClass::Request,
            Self::Refresh(_) => MsgClass::Refresh,
            Self::Status(_) => MsgClass::Status,
            Self::Update(_) => MsgClass::Update,
            Self::Close(_) => MsgClass::Close,
            Self::Ack(_) => MsgClass::Ack,
            Self::Generic(_) => MsgClass::Generic,
            Self::Post(_) => MsgClass::Post,
        }
    }

    /// Domain type.
    #[must_use]
    pub fn domain(&self) -> u8 {
        match self {
            Self::Request(m) => m.domain,
            Self::Refresh(m) => m.domain,
            Self::Status(m) => m.domain,
            Self::Update(m) => m.domain,
            Self::Close(m) => m.domain,
            Self::Ack(m) => m.domain,
            Self::Generic(m) => m.domain,
            Self::Post(m) => m.domain,
        }
    }

    /// Stream id.
    #[must_use]
    pub fn stream_id(&self) -> i32 {
        match self {
            Self::Request(m) => m.stream_id,
            Self::Refresh(m) => m.stream_id,
            Self::Status(m) => m.stream_id,
            Self::Update(m) => m.stream_id,
            Self::Close(m) => m.stream_id,
            Self::Ack(m) => m.stream_id,
            Self::Generic(m) => m.stream_id,
            Self::Post(m) => m.stream_id,
        }
    }

    /// Payload container type.
    #[must_use]
    pub fn container_type(&self) -> DataType {
        match self {
            Self::Request(m) => m.container_type,
            Self::Refresh(m) => m.container_type,
            Self::Status(m) => m.container_type,
            Self::Update(m) => m.container_type,
            Self::Close(m) => m.container_type,
            Self::Ack(m) => m.container_type,
            Self::Generic(m) => m.container_type,
            Self::Post(m) => m.container_type,
        }
    }

    /// Encoded payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Request(m) => m.payload.as_ref(),
            Self::Refresh(m) => m.payload.as_ref(),
            Self::Status(m) => m.payload.as_ref(),
            Self::Update(m) => m.payload.as_ref(),
            Self::Close(m) => m.payload.as_ref(),
            Self::Ack(m) => m.payload.as_ref(),
            Self::Generic(m) => m.payload.as_ref(),
            Self::Post(m) => m.payload.as_ref(),
        }
    }

    /// Message key, when carried.
    #[must_use]
    pub fn key(&self) -> Option<&MsgKey<B>> {
        match self {
            Self::Request(m) => Some(&m.key),
            Self::Refresh(m) => m.key.as_ref(),
            Self::Status(m) => m.key.as_ref(),
            Self::Update(m) => m.key.as_ref(),
            Self::Close(_) => None,
            Self::Ack(m) => m.key.as_ref(),
            Self::Generic(m) => m.key.as_ref(),
            Self::Post(m) => m.key.as_ref(),
        }
    }

    /// Structural validation, applied right after decode.
    ///
    /// Checks that flagged pieces are actually present, that names are
    /// present when flagged, that state-bearing messages carry a usable
    /// stream state, and that a request never carries a worst QoS
    /// without a preferred QoS.
    pub fn validate(&self) -> Result<()> {
        fn check_key<B: AsRef<[u8]>>(key: &MsgKey<B>) -> Result<()> {
            if key.flags.contains(KeyFlags::HAS_NAME) && key.name.is_none() {
                return Err(CodecError::InvalidData("key flags name but carries none"));
            }
            if key.flags.contains(KeyFlags::HAS_ATTRIB) && key.attrib.is_none() {
                return Err(CodecError::InvalidData("key flags attrib but carries none"));
            }
            Ok(())
        }
        fn check_state<B: AsRef<[u8]>>(state: &State<B>, allow_unspecified: bool) -> Result<()> {
            if state.stream_state == StreamState::Unspecified && !allow_unspecified {
                return Err(CodecError::InvalidData("stream state must be specified"));
            }
            Ok(())
        }

        if let Some(key) = self.key() {
            check_key(key)?;
        }
        match self {
            Self::Request(m) => {
                if m.worst_qos.is_some() && m.qos.is_none() {
                    return Err(CodecError::InvalidData("worst qos without preferred qos"));
                }
                if m.flags.contains(RequestFlags::HAS_QOS) != m.qos.is_some() {
                    return Err(CodecError::InvalidData("qos flag does not match presence"));
                }
            }
            Self::Refresh(m) => {
                check_state(&m.state, false)?;
                if let Some(req_key) = &m.req_key {
                    check_key(req_key)?;
                }
            }
            Self::Status(m) => {
                if m.flags.contains(StatusFlags::HAS_STATE) {
                    let state = m
                        .state
                        .as_ref()
                        .ok_or(CodecError::InvalidData("state flag without state"))?;
                    check_state(state, true)?;
                }
                if let Some(req_key) = &m.req_key {
                    check_key(req_key)?;
                }
            }
            Self::Ack(m) => {
                if m.flags.contains(AckFlags::HAS_NAK_CODE) == (m.nak_code == NakCode::None) {
                    return Err(CodecError::InvalidData("nak code does not match its flag"));
                }
            }
            Self::Generic(m) => {
                if let Some(req_key) = &m.req_key {
                    check_key(req_key)?;
                }
            }
            Self::Update(_) | Self::Close(_) | Self::Post(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_matching_ignores_absent_pieces() {
        let mut a: MsgKey<&[u8]> = MsgKey::default();
        a.flags = KeyFlags::HAS_NAME | KeyFlags::HAS_SERVICE_ID;
        a.service_id = 12;
        a.name = Some(b"IBM.N");

        let mut b = a.clone();
        b.identifier = 99; // not flagged, must not matter
        assert!(a.matches(&b));

        b.flags |= KeyFlags::HAS_IDENTIFIER;
        assert!(!a.matches(&b));
    }

    #[test]
    fn request_worst_qos_requires_qos() {
        let msg: Msg<&[u8]> = Msg::Request(RequestMsg {
            domain: crate::types::domain::MARKET_PRICE,
            stream_id: 5,
            container_type: DataType::NoData,
            flags: RequestFlags::STREAMING | RequestFlags::HAS_WORST_QOS,
            key: MsgKey::default(),
            priority: Priority::default(),
            qos: None,
            worst_qos: Some(Qos::realtime_tick_by_tick()),
            extended_header: None,
            payload: &[],
        });
        assert!(msg.validate().is_err());
    }

    #[test]
    fn nak_codes_are_stable() {
        assert_eq!(NakCode::from_wire(10).unwrap(), NakCode::GatewayDown);
        assert_eq!(NakCode::from_wire(7).unwrap(), NakCode::SymbolUnknown);
        assert!(NakCode::from_wire(11).is_err());
    }
}
