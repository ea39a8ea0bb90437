// Shared fixtures: a fake lighting bridge speaking Engine.IO over a local
// websocket, and wiremock stand-ins for the Ring cloud endpoints.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use ring_lighting::protocol::{self, Envelope, Packet, DEVICE_LIST, DEVICE_SET};
use ring_lighting::{Bridge, LightingConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/oauth/token";
pub const LOCATIONS_PATH: &str = "/rhq/v1/devices/v1/locations";
pub const TICKETS_PATH: &str = "/api/v1/clap/tickets";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Fake bridge ─────────────────────────────────────────────────────

#[derive(Clone)]
struct Script {
    devices: Vec<Value>,
    silent: bool,
    hang_up: bool,
}

/// Local websocket server answering like a lighting bridge
pub struct FakeBridge {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Envelope>>>,
}

impl FakeBridge {
    /// A bridge that answers device listings with `devices` and acknowledges switches
    pub async fn start(devices: Vec<Value>) -> Self {
        Self::launch(Script {
            devices,
            silent: false,
            hang_up: false,
        })
        .await
    }

    /// A bridge that completes the handshake but never answers messages
    pub async fn silent() -> Self {
        Self::launch(Script {
            devices: Vec::new(),
            silent: true,
            hang_up: false,
        })
        .await
    }

    /// A bridge that completes the handshake, then drops the socket on the first message
    pub async fn hangs_up() -> Self {
        Self::launch(Script {
            devices: Vec::new(),
            silent: false,
            hang_up: true,
        })
        .await
    }

    async fn launch(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let counter = connections.clone();
        let log = received.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, script.clone(), log.clone()));
            }
        });

        Self {
            addr,
            connections,
            received,
        }
    }

    /// `host:port`, as the ticket endpoint would report it
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn channel_url(&self) -> String {
        format!("ws://{}/?authcode=tkt&ack=false&EIO=3", self.addr)
    }

    pub fn bridge(&self, location_id: &str, location_name: &str) -> Bridge {
        Bridge {
            location_id: location_id.to_string(),
            location_name: location_name.to_string(),
            channel_url: self.channel_url(),
            bridge_ids: vec![format!("bridge-{location_id}")],
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().unwrap().clone()
    }
}

async fn serve(stream: TcpStream, script: Script, received: Arc<Mutex<Vec<Envelope>>>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let open = r#"0{"sid":"fake","pingInterval":25000,"pingTimeout":60000,"upgrades":[]}"#;
    if ws.send(Message::Text(open.to_string())).await.is_err()
        || ws.send(Message::Text("40".to_string())).await.is_err()
    {
        return;
    }

    while let Some(Ok(frame)) = ws.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = match protocol::decode(&text) {
            Ok(Packet::Ping) => "3".to_string(),
            Ok(Packet::Message(envelope)) => {
                received.lock().unwrap().push((*envelope).clone());
                if script.hang_up {
                    let _ = ws.close(None).await;
                    return;
                }
                if script.silent {
                    continue;
                }
                let Some(answer) = answer(&envelope, &script) else {
                    continue;
                };
                protocol::encode_message(&answer).unwrap()
            }
            _ => continue,
        };
        if ws.send(Message::Text(reply)).await.is_err() {
            break;
        }
    }
}

fn answer(request: &Envelope, script: &Script) -> Option<Envelope> {
    let src = request.dst.clone().unwrap_or_default();
    let mut reply = Envelope::new(request.msg.clone(), "client", request.seq.unwrap_or(0));
    reply.extra.insert("src".to_string(), json!(src));
    match request.msg.as_str() {
        DEVICE_LIST => reply.body = Some(Value::Array(script.devices.clone())),
        DEVICE_SET => reply.body = Some(json!([{ "acknowledged": true }])),
        _ => return None,
    }
    Some(reply)
}

/// Device document for a light
pub fn light(zid: &str, name: &str) -> Value {
    device_doc(zid, name, 2)
}

/// Device document for something that is not a light
pub fn sensor(zid: &str, name: &str) -> Value {
    device_doc(zid, name, 5)
}

fn device_doc(zid: &str, name: &str, category: u64) -> Value {
    json!({
        "general": { "v2": { "zid": zid, "name": name, "categoryId": category, "deviceType": "test" } },
        "context": {}
    })
}

// ── Fake cloud ──────────────────────────────────────────────────────

pub fn config(server: &MockServer, session_path: &Path) -> LightingConfig {
    let uri = server.uri();
    LightingConfig {
        oauth_url: format!("{uri}{TOKEN_PATH}"),
        locations_url: format!("{uri}{LOCATIONS_PATH}"),
        tickets_url: format!("{uri}{TICKETS_PATH}"),
        channel_scheme: "ws".to_string(),
        request_timeout_ms: 500,
        connect_timeout_ms: 2_000,
        http_timeout_secs: 5,
        ..LightingConfig::default()
    }
    .with_session_path(session_path)
    .with_refresh_token("seed-refresh")
}

pub async fn mock_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-2",
            "expires_in": 3600,
            "scope": "client",
            "token_type": "Bearer"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub async fn mock_locations(server: &MockServer, locations: &[(&str, &str)]) {
    let user_locations: Vec<Value> = locations
        .iter()
        .map(|(id, name)| json!({ "location_id": id, "name": name }))
        .collect();
    Mock::given(method("GET"))
        .and(path(LOCATIONS_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "user_locations": user_locations })),
        )
        .mount(server)
        .await;
}

pub async fn mock_ticket(server: &MockServer, location_id: &str, bridge: &FakeBridge) {
    Mock::given(method("GET"))
        .and(path(TICKETS_PATH))
        .and(query_param("locationID", location_id))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "host": bridge.host(),
            "ticket": "tkt",
            "assets": [{ "uuid": format!("bridge-{location_id}"), "kind": "base_station_v1" }]
        })))
        .mount(server)
        .await;
}

pub async fn mock_no_bridge(server: &MockServer, location_id: &str) {
    Mock::given(method("GET"))
        .and(path(TICKETS_PATH))
        .and(query_param("locationID", location_id))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "error": "no assets found for location" })),
        )
        .mount(server)
        .await;
}
