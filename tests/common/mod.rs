//! Shared test infrastructure for handler and loopback integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tokio::net::UdpSocket;

use cluster_dns::config::ZoneConfig;
use cluster_dns::error::ForwardError;
use cluster_dns::forward::{Exchanger, Forwarder};
use cluster_dns::{ClusterAuthority, DnsHandler, RecordStore};

// --- Constants ---

pub const DOMAIN: &str = "swan.";
pub const TTL: u32 = 60;
pub const UPSTREAM_IP: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and stored
/// as raw wire-format bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Size of the captured reply on the wire.
    pub fn wire_len(&self) -> usize {
        self.buf.lock().unwrap().len()
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Config builders ---

pub fn test_zone_config() -> ZoneConfig {
    let mut config = ZoneConfig::new(DOMAIN, "127.0.0.1:0".parse().unwrap());
    config.ttl = TTL;
    config.exchange_timeout_ms = 500;
    config
}

// --- Store builder ---

pub struct TestStoreBuilder {
    store: RecordStore,
}

impl TestStoreBuilder {
    pub fn new() -> Self {
        Self {
            store: RecordStore::new(),
        }
    }

    pub fn a(self, name: &str, ip: &str) -> Self {
        self.store.add_a(name, ip);
        self
    }

    pub fn srv(self, name: &str, target: &str) -> Self {
        self.store.add_srv(name, target);
        self
    }

    /// `count` SRV targets `node-<i>.<name>:<port>`, each with its own A record.
    pub fn service(self, name: &str, count: u16) -> Self {
        for i in 0..count {
            let host = format!("node-{i}.{name}");
            self.store.add_srv(name, &format!("{host}:{}", 8000 + i));
            self.store.add_a(&host, &format!("10.1.{}.{}", i / 250, i % 250 + 1));
        }
        self
    }

    pub fn build(self) -> RecordStore {
        self.store
    }
}

// --- Fake upstream exchangers ---

/// Answers every query with one A record for the question name.
pub struct StaticExchanger {
    pub ip: Ipv4Addr,
    pub seen: Mutex<Vec<Message>>,
}

impl StaticExchanger {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            seen: Mutex::new(Vec::new()),
        }
    }
}

/// Reply an upstream would give to `query`.
pub fn upstream_reply(query: &Message, ip: Ipv4Addr) -> Message {
    upstream_reply_with(query, &[ip])
}

/// Upstream reply with one A record per address for every question.
pub fn upstream_reply_with(query: &Message, ips: &[Ipv4Addr]) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true);
    for q in query.queries() {
        reply.add_query(q.clone());
        for &ip in ips {
            reply.add_answer(Record::from_rdata(q.name().clone(), 300, RData::A(A(ip))));
        }
    }
    reply
}

#[async_trait]
impl Exchanger for StaticExchanger {
    async fn exchange(&self, query: &Message, _addr: SocketAddr) -> Result<Message, ForwardError> {
        self.seen.lock().unwrap().push(query.clone());
        Ok(upstream_reply(query, self.ip))
    }
}

/// Answers every query with `count` A records, more than a plain UDP
/// reply can carry.
pub struct BulkExchanger {
    ips: Vec<Ipv4Addr>,
}

impl BulkExchanger {
    pub fn new(count: u8) -> Self {
        Self {
            ips: (1..=count).map(|i| Ipv4Addr::new(203, 0, 113, i)).collect(),
        }
    }
}

#[async_trait]
impl Exchanger for BulkExchanger {
    async fn exchange(&self, query: &Message, _addr: SocketAddr) -> Result<Message, ForwardError> {
        Ok(upstream_reply_with(query, &self.ips))
    }
}

/// Every exchange times out.
pub struct FailingExchanger;

#[async_trait]
impl Exchanger for FailingExchanger {
    async fn exchange(&self, _query: &Message, addr: SocketAddr) -> Result<Message, ForwardError> {
        Err(ForwardError::Timeout {
            addr,
            stage: "read",
            timeout: Duration::from_millis(1),
        })
    }
}

/// Every exchange panics.
pub struct PanickingExchanger;

#[async_trait]
impl Exchanger for PanickingExchanger {
    async fn exchange(&self, _query: &Message, _addr: SocketAddr) -> Result<Message, ForwardError> {
        panic!("upstream exchanger exploded");
    }
}

pub fn upstream_addr() -> SocketAddr {
    "10.255.0.53:53".parse().unwrap()
}

pub fn forwarder_with(exchanger: Arc<dyn Exchanger>) -> Forwarder {
    Forwarder::new(vec![upstream_addr()])
        .with_exchanger(Protocol::Udp, exchanger.clone())
        .with_exchanger(Protocol::Tcp, exchanger)
}

/// UDP upstream on localhost answering every query like [`StaticExchanger`].
pub async fn spawn_fake_upstream(ip: Ipv4Addr) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(query) = Message::from_vec(&buf[..len]) else {
                continue;
            };
            let reply = upstream_reply(&query, ip).to_vec().unwrap();
            let _ = socket.send_to(&reply, peer).await;
        }
    });
    addr
}

// --- Query/Request construction ---

/// Build a DNS query message.
pub fn build_query(name: &str, record_type: RecordType, id: u16) -> Message {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg
}

/// Build a DNS query advertising an EDNS payload size.
pub fn build_edns_query(name: &str, record_type: RecordType, id: u16, payload: u16) -> Message {
    let mut msg = build_query(name, record_type, id);
    let mut edns = Edns::new();
    edns.set_max_payload(payload);
    msg.set_edns(edns);
    msg
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Wrap a message as a server-side `Request` arriving over `protocol`.
pub fn to_request(msg: &Message, protocol: Protocol) -> Request {
    let bytes = msg.to_vec().unwrap();
    let src: SocketAddr = "10.0.0.100:12345".parse().unwrap();
    Request::new(parse_message_request(&bytes), src, protocol)
}

/// Build a handler over `store` with the given forwarder.
pub fn build_handler(config: &ZoneConfig, store: RecordStore, forwarder: Forwarder) -> DnsHandler {
    let authority =
        ClusterAuthority::new(config, store).expect("failed to create ClusterAuthority");
    DnsHandler::new(Arc::new(authority), forwarder, config.recurse_on)
}

// --- Response helpers ---

/// Send a request through the handler and return the parsed reply and its wire size.
pub async fn execute(handler: &DnsHandler, msg: &Message, protocol: Protocol) -> (Message, usize) {
    let request = to_request(msg, protocol);
    let response = TestResponseHandler::new();
    handler.handle_request(&request, response.clone()).await;
    let len = response.wire_len();
    (response.into_message(), len)
}

/// Execute a UDP query through the handler and return the parsed reply.
pub async fn execute_query(
    handler: &DnsHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    execute(handler, &build_query(name, record_type, id), Protocol::Udp)
        .await
        .0
}

/// Extract A addresses from a record section.
pub fn extract_a_ips(records: &[Record]) -> Vec<Ipv4Addr> {
    records
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(a.0),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected A addresses.
pub fn assert_a_response(msg: &Message, expected_ips: &[Ipv4Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_a_ips(msg.answers());
    actual.sort();
    let mut expected: Vec<Ipv4Addr> = expected_ips.to_vec();
    expected.sort();
    assert_eq!(
        actual, expected,
        "A records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}

/// Assert an empty reply with exactly one SOA in the authority section.
pub fn assert_negative(msg: &Message, expected: ResponseCode) {
    assert_response_code(msg, expected);
    assert!(msg.answers().is_empty(), "unexpected answers: {:?}", msg.answers());
    assert_eq!(msg.name_servers().len(), 1);
    assert_eq!(msg.name_servers()[0].record_type(), RecordType::SOA);
}
