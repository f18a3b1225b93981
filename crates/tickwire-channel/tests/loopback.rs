//! End-to-end tests over loopback sockets.
//!
//! A real server and client handshake over 127.0.0.1, then exchange
//! application messages through the full stack: codec buffers, priority
//! queues, framing, fragmentation, and the callbacks.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use tickwire_channel::{
    BindOptions, ChannelConfig, ChannelError, ChannelHandler, ChannelInfo, ConnectOptions,
    ConnectionType, Priority, ProxyOptions, Server, client,
};

#[derive(Debug)]
enum Event {
    Active(Box<ChannelInfo>),
    Message(Bytes),
    Inactive(Option<ChannelError>),
}

struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl Recorder {
    fn pair() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ChannelHandler for Recorder {
    fn channel_active(&mut self, info: &ChannelInfo) {
        let _ = self.tx.send(Event::Active(Box::new(info.clone())));
    }

    fn message(&mut self, buffer: Bytes) {
        let _ = self.tx.send(Event::Message(buffer));
    }

    fn channel_inactive(&mut self, error: Option<ChannelError>) {
        let _ = self.tx.send(Event::Inactive(error));
    }
}

fn test_config() -> ChannelConfig {
    ChannelConfig {
        // Enough that tests never race the driver returning slabs.
        guaranteed_output_buffers: 256,
        tick_interval: Duration::from_millis(50),
        ..ChannelConfig::default()
    }
}

async fn expect_active(rx: &mut mpsc::UnboundedReceiver<Event>) -> Box<ChannelInfo> {
    match timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(Event::Active(info))) => info,
        other => panic!("expected Active, got {other:?}"),
    }
}

async fn expect_message(rx: &mut mpsc::UnboundedReceiver<Event>) -> Bytes {
    match timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(Event::Message(buffer))) => buffer,
        other => panic!("expected Message, got {other:?}"),
    }
}

/// Bind a server, connect a client, wait for both actives.
async fn connected_pair(
    server_config: ChannelConfig,
    client_config: ChannelConfig,
) -> (
    tickwire_channel::Channel,
    mpsc::UnboundedReceiver<Event>,
    tickwire_channel::Channel,
    mpsc::UnboundedReceiver<Event>,
) {
    let server = Server::bind(BindOptions {
        address: "127.0.0.1:0".to_string(),
        channel: server_config,
        ..BindOptions::default()
    })
    .unwrap();
    let addr = server.local_addr().unwrap();

    let (server_recorder, mut server_rx) = Recorder::pair();
    let accept = tokio::spawn(async move { server.accept(server_recorder).await.unwrap() });

    let (client_recorder, mut client_rx) = Recorder::pair();
    let client_channel = client::connect(
        ConnectOptions {
            address: addr.to_string(),
            channel: client_config,
            ..ConnectOptions::default()
        },
        client_recorder,
    )
    .await
    .unwrap();

    let server_channel = accept.await.unwrap();
    expect_active(&mut server_rx).await;
    expect_active(&mut client_rx).await;
    (server_channel, server_rx, client_channel, client_rx)
}

#[tokio::test(flavor = "multi_thread")]
async fn handshake_negotiates_and_reports_info() {
    let server = Server::bind(BindOptions {
        address: "127.0.0.1:0".to_string(),
        channel: ChannelConfig { max_fragment_size: 4096, ..test_config() },
        ..BindOptions::default()
    })
    .unwrap();
    let addr = server.local_addr().unwrap();

    let (server_recorder, mut server_rx) = Recorder::pair();
    tokio::spawn(async move {
        let _channel = server.accept(server_recorder).await.unwrap();
        // Hold the channel open until the test ends.
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let (client_recorder, mut client_rx) = Recorder::pair();
    let _client = client::connect(
        ConnectOptions {
            address: addr.to_string(),
            channel: test_config(),
            ..ConnectOptions::default()
        },
        client_recorder,
    )
    .await
    .unwrap();

    let client_info = expect_active(&mut client_rx).await;
    let server_info = expect_active(&mut server_rx).await;

    assert_eq!(client_info.negotiated.version, 14);
    // The smaller fragment proposal wins on both sides.
    assert_eq!(client_info.negotiated.max_fragment_size, 4096);
    assert_eq!(server_info.negotiated.max_fragment_size, 4096);
    assert_eq!(client_info.negotiated.ping_timeout, Duration::from_secs(60));
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_survive_fragmentation() {
    let small_frag = ChannelConfig { max_fragment_size: 64, ..test_config() };
    let (_server_channel, mut server_rx, client_channel, _client_rx) =
        connected_pair(small_frag.clone(), small_frag).await;

    // Well past the 64-byte fragment size.
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let mut buffer = client_channel.get_buffer().unwrap();
    buffer.extend_from_slice(&payload);
    client_channel.write_and_flush(buffer, Priority::High).unwrap();

    let delivered = expect_message(&mut server_rx).await;
    assert_eq!(&delivered[..], &payload[..]);
}

#[tokio::test(flavor = "multi_thread")]
async fn per_priority_order_is_preserved() {
    let (_server_channel, mut server_rx, client_channel, _client_rx) =
        connected_pair(test_config(), test_config()).await;

    // Tagged messages: [priority tag, sequence] across three priorities.
    let lanes: [(u8, Priority); 3] =
        [(b'H', Priority::High), (b'M', Priority::Medium), (b'L', Priority::Low)];
    let per_lane = 20u8;
    for seq in 0..per_lane {
        for (tag, priority) in lanes {
            let mut buffer = client_channel.get_buffer().unwrap();
            buffer.extend_from_slice(&[tag, seq]);
            client_channel.write(buffer, priority).unwrap();
        }
    }
    client_channel.flush().unwrap();

    let mut seen: std::collections::HashMap<u8, Vec<u8>> = std::collections::HashMap::new();
    for _ in 0..(usize::from(per_lane) * 3) {
        let message = expect_message(&mut server_rx).await;
        seen.entry(message[0]).or_default().push(message[1]);
    }
    for (tag, sequence) in seen {
        let expected: Vec<u8> = (0..per_lane).collect();
        assert_eq!(sequence, expected, "lane {}", char::from(tag));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn encoded_update_round_trips_through_the_stack() {
    use tickwire_codec::{
        DataType, DecodeIterator, EncodeIterator,
        field_list::{self, FieldList, FieldListFlags},
        msg::{Msg, UpdateFlags, UpdateMsg, decode_msg, encode_msg_complete, encode_msg_init},
        value::PrimitiveValue,
    };

    let (_server_channel, mut server_rx, client_channel, _client_rx) =
        connected_pair(test_config(), test_config()).await;

    // Encode an update straight into a pool buffer.
    let buffer = client_channel.get_buffer().unwrap();
    let mut iter = EncodeIterator::new(buffer, (14, 1));
    let update: Msg<&[u8]> = Msg::Update(UpdateMsg {
        domain: tickwire_codec::types::domain::MARKET_PRICE,
        stream_id: 6,
        container_type: DataType::FieldList,
        flags: UpdateFlags::HAS_SEQ_NUM,
        update_type: tickwire_codec::msg::update_type::QUOTE,
        seq_num: 17,
        conf_info: Default::default(),
        perm_data: None,
        post_user: None,
        extended_header: None,
        key: None,
        payload: &[],
    });
    encode_msg_init(&mut iter, &update).unwrap();
    let fields =
        FieldList { flags: FieldListFlags::HAS_STANDARD_DATA, ..FieldList::default() };
    fields.encode_init(&mut iter).unwrap();
    field_list::encode_entry(
        &mut iter,
        22,
        &PrimitiveValue::<&[u8]>::Real(tickwire_codec::value::Real::from_exponent(10025, -2)),
    )
    .unwrap();
    field_list::encode_complete(&mut iter, true).unwrap();
    encode_msg_complete(&mut iter, true).unwrap();
    let buffer = iter.take().unwrap();

    client_channel.write_and_flush(buffer, Priority::High).unwrap();

    let delivered = expect_message(&mut server_rx).await;
    let mut dec = DecodeIterator::new(&delivered, (14, 1));
    let decoded = decode_msg(&mut dec).unwrap();
    let Msg::Update(m) = decoded else { panic!("expected update") };
    assert_eq!(m.seq_num, 17);
    assert_eq!(m.container_type, DataType::FieldList);

    let mut payload_dec = dec.child(m.payload);
    let (_, mut reader) = FieldList::decode(&mut payload_dec, None).unwrap();
    let entry = reader.next_entry().unwrap().unwrap();
    assert_eq!(entry.field_id, 22);
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_peer_trips_the_ping_timeout() {
    use tokio::io::AsyncWriteExt;

    let config = ChannelConfig {
        ping_timeout: Duration::from_secs(1),
        tick_interval: Duration::from_millis(50),
        ..test_config()
    };
    let server = Server::bind(BindOptions {
        address: "127.0.0.1:0".to_string(),
        channel: config,
        ..BindOptions::default()
    })
    .unwrap();
    let addr = server.local_addr().unwrap();

    let (server_recorder, mut server_rx) = Recorder::pair();
    tokio::spawn(async move {
        let _channel = server.accept(server_recorder).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    // A raw client that completes the handshake, then goes silent
    // without closing the socket.
    let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = tickwire_session::handshake::ConnectionRequest {
        version: tickwire_session::wire::CONN_VERSION_14,
        session_flags: 0,
        ping_timeout_secs: 1,
        major: 14,
        minor: 1,
        max_fragment_size: 6144,
        compression: tickwire_session::CompressionType::None,
        hostname: Bytes::new(),
        component: Bytes::new(),
    };
    raw.write_all(&request.encode().unwrap()).await.unwrap();

    expect_active(&mut server_rx).await;

    // Within the timeout plus a tick the server must give up.
    match timeout(Duration::from_secs(3), server_rx.recv()).await {
        Ok(Some(Event::Inactive(Some(error)))) => {
            assert!(
                matches!(
                    error,
                    ChannelError::Session(tickwire_session::SessionError::PingTimeout { .. })
                ),
                "unexpected error {error:?}"
            );
        }
        other => panic!("expected ping-timeout inactive, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_failure_reports_exactly_one_inactive() {
    let (recorder, mut rx) = Recorder::pair();
    let result = client::connect(
        ConnectOptions {
            connection_type: ConnectionType::Http,
            address: "feed.example.com:14002".to_string(),
            proxy: Some(ProxyOptions {
                host: "127.0.0.1".to_string(),
                port: 1, // nothing listens here
                user: None,
                password: None,
                domain: None,
            }),
            channel: test_config(),
            ..ConnectOptions::default()
        },
        recorder,
    )
    .await;
    assert!(result.is_err());

    match timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(Event::Inactive(Some(ChannelError::SystemFailure { text, .. })))) => {
            assert!(text.contains("Curl failed"), "{text}");
        }
        other => panic!("expected system-failure inactive, got {other:?}"),
    }

    // No further callbacks of any kind.
    match timeout(Duration::from_millis(300), rx.recv()).await {
        Err(_) | Ok(None) => {}
        Ok(Some(event)) => panic!("unexpected extra event {event:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn orderly_close_delivers_inactive_once() {
    let (server_channel, mut server_rx, client_channel, mut client_rx) =
        connected_pair(test_config(), test_config()).await;

    client_channel.close().unwrap();

    match timeout(Duration::from_secs(5), client_rx.recv()).await {
        Ok(Some(Event::Inactive(None))) => {}
        other => panic!("expected clean inactive, got {other:?}"),
    }
    // The server sees the FIN and goes inactive too.
    match timeout(Duration::from_secs(5), server_rx.recv()).await {
        Ok(Some(Event::Inactive(_))) => {}
        other => panic!("expected server inactive, got {other:?}"),
    }
    drop(server_channel);
}
