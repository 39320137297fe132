//! Loopback device emulator for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::client::ClientConfig;
use crate::codec::{DecodedRequest, StbRequestCodec, FRAME_MARKER, RESPONSE_HEADER_LEN};
use crate::payload::extract_tag;
use crate::types::CommandCode;

/// What the emulator does after receiving a request.
pub(crate) enum Reply {
    Xml(String),
    /// Bytes written to the socket as they are
    Raw(Bytes),
    Silence,
    Close,
}

type Responder = Box<dyn Fn(&DecodedRequest) -> Reply + Send + Sync>;

#[derive(Default)]
struct Shared {
    received: Mutex<Vec<DecodedRequest>>,
    responders: Mutex<HashMap<u16, Responder>>,
    connections: AtomicUsize,
}

pub(crate) struct MockStb {
    address: String,
    shared: Arc<Shared>,
}

impl MockStb {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let shared = Arc::new(Shared::default());

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, accept_shared.clone()));
            }
        });

        Self { address, shared }
    }

    /// An address nothing listens on.
    pub(crate) async fn unused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn respond(&self, code: CommandCode, xml: &str) {
        let xml = xml.to_string();
        self.respond_with(code, move |_| Reply::Xml(xml.clone()));
    }

    pub(crate) fn respond_with<F>(&self, code: CommandCode, responder: F)
    where
        F: Fn(&DecodedRequest) -> Reply + Send + Sync + 'static,
    {
        self.shared
            .responders
            .lock()
            .unwrap()
            .insert(code.as_u16(), Box::new(responder));
    }

    pub(crate) fn received(&self) -> Vec<DecodedRequest> {
        self.shared.received.lock().unwrap().clone()
    }

    pub(crate) fn received_codes(&self) -> Vec<u16> {
        self.received().iter().map(|r| r.code).collect()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` requests arrived.
    pub(crate) async fn wait_for_commands(&self, count: usize) -> Vec<DecodedRequest> {
        for _ in 0..1000 {
            let received = self.received();
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} requests, got {:?}", self.received_codes());
    }

    /// Wait until at least `count` requests with `code` arrived.
    pub(crate) async fn wait_for_code(&self, code: CommandCode, count: usize) -> Vec<DecodedRequest> {
        for _ in 0..1000 {
            let matching: Vec<_> = self
                .received()
                .into_iter()
                .filter(|r| r.code == code.as_u16())
                .collect();
            if matching.len() >= count {
                return matching;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} {code} requests, got {:?}", self.received_codes());
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let mut framed = Framed::new(stream, StbRequestCodec::new());
    while let Some(Ok(request)) = framed.next().await {
        shared.received.lock().unwrap().push(request.clone());

        let reply = shared
            .responders
            .lock()
            .unwrap()
            .get(&request.code)
            .map(|responder| responder(&request))
            .unwrap_or(Reply::Silence);

        match reply {
            Reply::Xml(xml) => {
                if framed.send(xml.as_str()).await.is_err() {
                    return;
                }
            }
            Reply::Raw(bytes) => {
                if framed.get_mut().write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Reply::Silence => {}
            Reply::Close => return,
        }
    }
}

/// Configuration with test-sized delays and timeouts.
pub(crate) fn fast_config(address: &str) -> ClientConfig {
    let mut config = ClientConfig::new(address)
        .connect_timeout(Duration::from_secs(2))
        .command_pacing(Duration::ZERO)
        .handshake_delays(Duration::ZERO, Duration::ZERO)
        .handshake_timeout(Duration::from_millis(50))
        .page_timeout(Duration::from_millis(300))
        .lookup_timeouts(Duration::from_millis(300), Duration::from_millis(300))
        .zap_settle(Duration::from_millis(150))
        .favorite_pacing(Duration::ZERO);
    config.time_timeout = Duration::from_millis(300);
    config
}

/// Responder serving channel pages for program ids `0..limit`.
pub(crate) fn channel_pages(limit: u32) -> impl Fn(&DecodedRequest) -> Reply + Send + Sync + 'static {
    move |request| {
        let payload = request.payload.as_deref().unwrap_or_default();
        let from: u32 = extract_tag(payload, "FromIndex").parse().unwrap_or(0);
        let to: u32 = extract_tag(payload, "ToIndex").parse().unwrap_or(0);
        let xml: String = (from..=to)
            .take_while(|i| *i < limit)
            .map(|i| {
                format!(
                    "<parm><ProgramId>{i:014}</ProgramId><ProgramName>Channel {i}</ProgramName>\
                     <ProgramIndex>{i}</ProgramIndex><ProgramType>1</ProgramType></parm>"
                )
            })
            .collect();
        Reply::Xml(xml)
    }
}

/// Well-formed response frame whose payload is not zlib data.
pub(crate) fn corrupt_frame() -> Bytes {
    let payload = b"xxxxx";
    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + payload.len());
    buf.put_slice(&FRAME_MARKER);
    buf.put_u32_le(payload.len() as u32);
    buf.put_bytes(0, RESPONSE_HEADER_LEN - FRAME_MARKER.len() - 4);
    buf.put_slice(payload);
    buf.freeze()
}
