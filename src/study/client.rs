//! Remote-study client (C4): HTTP login/study/chapter fetch, plus the
//! websocket session (outbound sends, inbound dispatch, heartbeat).
//!
//! Grounded in `rusty-timer/services/forwarder/src/uplink.rs`'s
//! `UplinkSession` shape: connect, split sink/stream, a typed `WsStream`
//! alias, and a dedicated heartbeat task racing the reader.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::Rng;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::RelayError;

const ACCEPT_HEADER: &str = "application/vnd.lichess.v2+json";

/// The two production domains this relay is allowed to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    Live,
    Staging,
}

impl Host {
    pub fn from_authority(authority: &str) -> Option<Host> {
        match authority {
            "lichess.org" => Some(Host::Live),
            "listage.ovh" => Some(Host::Staging),
            _ => None,
        }
    }

    pub fn domain(self) -> &'static str {
        match self {
            Host::Live => "lichess.org",
            Host::Staging => "listage.ovh",
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// HTTP + websocket handle to one remote study. Owns the single HTTP
/// session (connection pooling across every call) and, once connected,
/// the websocket write half shared between the heartbeat task and the
/// sync engine's outbound sends.
pub struct StudyClient {
    http: reqwest::Client,
    host: Host,
    study_id: String,
    username: String,
    log_ws: bool,
    write: Option<Arc<Mutex<WsSink>>>,
    should_stop: Arc<AtomicBool>,
}

impl StudyClient {
    pub fn new(host: Host, study_id: impl Into<String>, log_ws: bool) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(StudyClient {
            http,
            host,
            study_id: study_id.into(),
            username: String::new(),
            log_ws,
            write: None,
            should_stop: Arc::new(AtomicBool::new(false)),
        })
    }

    fn base_url(&self) -> String {
        format!("https://{}", self.host.domain())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `POST /login`. Sets the session cookie jar on success.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), RelayError> {
        self.username = username.to_string();
        let resp = self
            .http
            .post(format!("{}/login", self.base_url()))
            .header("Accept", ACCEPT_HEADER)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RelayError::AuthFailure(format!(
                "login returned {}",
                resp.status()
            )));
        }
        info!("logged in as {}", username);
        Ok(())
    }

    /// `GET /study/<id>?_=<epoch>`, cache-busted.
    pub async fn fetch_study_json(&self, study_id: &str) -> Result<String, RelayError> {
        let url = format!(
            "{}/study/{}?_={}",
            self.base_url(),
            study_id,
            epoch_seconds()
        );
        let resp = self.http.get(&url).header("Accept", ACCEPT_HEADER).send().await?;
        if !resp.status().is_success() {
            return Err(RelayError::StudyUnavailable(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }
        Ok(resp.text().await?)
    }

    /// `GET /study/<id>/<chapterId>?_=<epoch>`, cache-busted.
    pub async fn fetch_chapter_json(
        &self,
        study_id: &str,
        chapter_id: &str,
    ) -> Result<String, RelayError> {
        let url = format!(
            "{}/study/{}/{}?_={}",
            self.base_url(),
            study_id,
            chapter_id,
            epoch_seconds()
        );
        let resp = self.http.get(&url).header("Accept", ACCEPT_HEADER).send().await?;
        if !resp.status().is_success() {
            return Err(RelayError::StudyUnavailable(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }
        Ok(resp.text().await?)
    }

    /// Connect the websocket and spawn the heartbeat task. Returns the
    /// reader half for the caller to drive in its own task/loop.
    pub async fn connect_ws(&mut self) -> Result<SplitStream<WsStream>, RelayError> {
        let sri = random_sri();
        let url = format!(
            "wss://socket.{}/study/{}/socket/v2?sri={}",
            self.host.domain(),
            self.study_id,
            sri
        );
        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Accept", ACCEPT_HEADER.parse().expect("static header value"));

        let (ws, _response) = connect_async(request).await?;
        let (write, read) = ws.split();
        let write = Arc::new(Mutex::new(write));
        self.write = Some(write.clone());
        self.should_stop.store(false, Ordering::SeqCst);

        spawn_heartbeat(write, self.should_stop.clone(), self.log_ws);
        Ok(read)
    }

    /// Whether the reader task has latched a terminal transport failure.
    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    /// Latch the terminal state; called by the reader loop on close/error.
    pub fn latch_stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    async fn send(&self, payload: Value) -> Result<(), RelayError> {
        let write = self
            .write
            .as_ref()
            .expect("sending on a detached websocket is a programmer error");
        let text = payload.to_string();
        if self.log_ws {
            debug!("-> [SENDING]: {}", text);
        }
        write.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }

    pub async fn create_chapter_from_pgn(&self, pgn: &str) -> Result<(), RelayError> {
        self.send(json!({
            "t": "addChapter",
            "d": {
                "name": "Chapter 1",
                "game": null,
                "variant": "Automatic",
                "fen": null,
                "pgn": pgn.trim(),
                "orientation": "white",
                "mode": "normal",
                "initial": false,
                "sticky": false,
            }
        }))
        .await
    }

    /// Append one move. `uci` is 4 or 5 characters (5 carries a promotion
    /// suffix); `promotion_name` is the spelled-out role (`"queen"` etc.).
    #[allow(clippy::too_many_arguments)]
    pub async fn add_move(
        &self,
        chapter_id: &str,
        path: &str,
        fen: &str,
        uci: &str,
        promotion_name: Option<&str>,
        clock: Option<&str>,
    ) -> Result<(), RelayError> {
        let mut d = json!({
            "orig": &uci[0..2],
            "dest": &uci[2..4],
            "fen": fen,
            "path": path,
            "ch": chapter_id,
            "sticky": false,
            "promote": true,
        });
        if let Some(name) = promotion_name {
            d["promotion"] = json!(name);
        }
        if let Some(clock) = clock {
            d["clock"] = json!(clock);
        }
        self.send(json!({ "t": "anaMove", "d": d })).await
    }

    pub async fn set_tag(&self, chapter_id: &str, name: &str, value: &str) -> Result<(), RelayError> {
        self.send(json!({
            "t": "setTag",
            "d": { "chapterId": chapter_id, "name": name, "value": value }
        }))
        .await
    }

    pub async fn set_move_comment(
        &self,
        chapter_id: &str,
        path: &str,
        text: &str,
    ) -> Result<(), RelayError> {
        self.send(json!({
            "t": "setComment",
            "d": { "ch": chapter_id, "path": path, "text": text }
        }))
        .await
    }

    pub async fn talk(&self, message: &str) -> Result<(), RelayError> {
        self.send(json!({ "t": "talk", "d": message })).await
    }
}

/// A decoded inbound websocket push, dispatched by the caller's reader
/// loop against the chapter cache / study membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Server pushed a newly created chapter; refresh it.
    AddChapter { chapter_id: String },
    /// Refresh one chapter, or force a full sync if no id is given.
    Reload { chapter_id: Option<String> },
    /// A chat line from `author`; `force_sync` is true when it is a
    /// contributor's `"sync "`-prefixed command.
    ChatMessage { author: String, force_sync: bool },
    /// A frame this client has no handler for; ignored upstream.
    Unhandled,
}

/// Parse one inbound websocket text frame into a dispatchable event.
pub fn parse_inbound(text: &str) -> Result<Option<InboundEvent>, RelayError> {
    let value: Value = serde_json::from_str(text)?;
    if value.is_null() {
        return Ok(None);
    }
    let t = value.get("t").and_then(Value::as_str).unwrap_or("");
    let d = value.get("d");

    let event = match t {
        "addChapter" => {
            let chapter_id = d
                .and_then(|d| d.get("p"))
                .and_then(|p| p.get("chapterId"))
                .and_then(Value::as_str)
                .map(str::to_string);
            match chapter_id {
                Some(chapter_id) => InboundEvent::AddChapter { chapter_id },
                None => InboundEvent::Unhandled,
            }
        }
        "reload" => InboundEvent::Reload {
            chapter_id: d
                .and_then(|d| d.get("chapterId"))
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        "message" => match d {
            Some(d) => {
                let author = d.get("u").and_then(Value::as_str).unwrap_or("").to_string();
                let force_sync = d
                    .get("t")
                    .and_then(Value::as_str)
                    .map(|s| s.starts_with("sync "))
                    .unwrap_or(false);
                InboundEvent::ChatMessage { author, force_sync }
            }
            None => InboundEvent::Unhandled,
        },
        _ => InboundEvent::Unhandled,
    };
    Ok(Some(event))
}

fn spawn_heartbeat(write: Arc<Mutex<WsSink>>, should_stop: Arc<AtomicBool>, log_ws: bool) {
    tokio::spawn(async move {
        loop {
            if should_stop.load(Ordering::SeqCst) {
                break;
            }
            let payload = json!({ "t": "p" }).to_string();
            if log_ws {
                debug!("-> [SENDING]: {}", payload);
            }
            if write.lock().await.send(Message::Text(payload)).await.is_err() {
                warn!("heartbeat send failed, latching should_stop");
                should_stop.store(true, Ordering::SeqCst);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    });
}

fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn random_sri() -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..10)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_resolves_from_authority() {
        assert_eq!(Host::from_authority("lichess.org"), Some(Host::Live));
        assert_eq!(Host::from_authority("listage.ovh"), Some(Host::Staging));
        assert_eq!(Host::from_authority("example.com"), None);
    }

    #[test]
    fn random_sri_is_ten_ascii_letters() {
        let sri = random_sri();
        assert_eq!(sri.len(), 10);
        assert!(sri.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn parses_add_chapter_push() {
        let text = r#"{"t":"addChapter","d":{"p":{"chapterId":"abc123"}}}"#;
        let event = parse_inbound(text).unwrap().unwrap();
        assert_eq!(
            event,
            InboundEvent::AddChapter { chapter_id: "abc123".to_string() }
        );
    }

    #[test]
    fn parses_reload_with_and_without_chapter_id() {
        let with_id = parse_inbound(r#"{"t":"reload","d":{"chapterId":"x"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(with_id, InboundEvent::Reload { chapter_id: Some("x".to_string()) });

        let without_id = parse_inbound(r#"{"t":"reload","d":{}}"#).unwrap().unwrap();
        assert_eq!(without_id, InboundEvent::Reload { chapter_id: None });
    }

    #[test]
    fn parses_sync_chat_command() {
        let text = r#"{"t":"message","d":{"u":"alice","t":"sync please"}}"#;
        let event = parse_inbound(text).unwrap().unwrap();
        assert_eq!(
            event,
            InboundEvent::ChatMessage { author: "alice".to_string(), force_sync: true }
        );
    }

    #[test]
    fn non_sync_chat_does_not_force_sync() {
        let text = r#"{"t":"message","d":{"u":"alice","t":"hello"}}"#;
        let event = parse_inbound(text).unwrap().unwrap();
        assert_eq!(
            event,
            InboundEvent::ChatMessage { author: "alice".to_string(), force_sync: false }
        );
    }

    #[test]
    fn unknown_message_type_is_unhandled() {
        let event = parse_inbound(r#"{"t":"crowd","d":{}}"#).unwrap().unwrap();
        assert_eq!(event, InboundEvent::Unhandled);
    }

    #[test]
    fn null_frame_yields_none() {
        assert_eq!(parse_inbound("null").unwrap(), None);
    }
}
