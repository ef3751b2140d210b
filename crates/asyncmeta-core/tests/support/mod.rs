//! In-memory directory servers for dispatcher tests.
//!
//! Each scripted target answers every request it receives according to its
//! [`Script`] and counts connects, binds, sends and abandons.

#![allow(dead_code)]

use asyncmeta_common::protocol::error::{AsyncMetaError, Result};
use asyncmeta_common::{
    Attribute, Connection, Connector, Dn, LdapResult, MessageId, OutboundMessage, OutboundRequest,
    RemoteSession, ResponseMessage, ResultCode, SearchEntry, TargetConfig, TargetDescriptor,
};
use asyncmeta_core::{Collaborators, DispatchConfig, Dispatcher, SearchEvent, TargetRegistry};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn dn(s: &str) -> Dn {
    Dn::parse(s).unwrap()
}

/// How a scripted target behaves.
#[derive(Debug, Clone)]
pub struct Script {
    pub bind_code: ResultCode,
    pub refuse_connect: bool,
    pub connect_delay_ms: u64,
    /// Number of upcoming sends that fail as if the connection had dropped.
    pub failing_sends: usize,
    pub entries: Vec<SearchEntry>,
    pub references: Vec<String>,
    pub result: LdapResult,
    pub reply_delay_ms: u64,
    /// Never answers anything but binds.
    pub silent: bool,
    /// Drops the connection as soon as a request arrives.
    pub drop_on_request: bool,
    /// Answers non-search requests with a search entry first.
    pub stray_entries: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            bind_code: ResultCode::Success,
            refuse_connect: false,
            connect_delay_ms: 0,
            failing_sends: 0,
            entries: Vec::new(),
            references: Vec::new(),
            result: LdapResult::success(),
            reply_delay_ms: 0,
            silent: false,
            drop_on_request: false,
            stray_entries: false,
        }
    }
}

impl Script {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn answering(code: ResultCode) -> Self {
        Self {
            result: LdapResult::new(code),
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            refuse_connect: true,
            ..Self::default()
        }
    }

    /// `count` entries `uid=user<n>,<suffix>`.
    pub fn with_entries(mut self, suffix: &str, count: usize) -> Self {
        self.entries = (0..count)
            .map(|i| {
                SearchEntry::new(
                    dn(&format!("uid=user{},{}", i, suffix)),
                    vec![Attribute::new("uid", [format!("user{}", i)])],
                )
            })
            .collect();
        self
    }

    pub fn with_result(mut self, result: LdapResult) -> Self {
        self.result = result;
        self
    }

    pub fn with_bind_code(mut self, code: ResultCode) -> Self {
        self.bind_code = code;
        self
    }

    pub fn with_reply_delay(mut self, ms: u64) -> Self {
        self.reply_delay_ms = ms;
        self
    }

    pub fn with_connect_delay(mut self, ms: u64) -> Self {
        self.connect_delay_ms = ms;
        self
    }

    pub fn with_failing_sends(mut self, count: usize) -> Self {
        self.failing_sends = count;
        self
    }

    pub fn with_references(mut self, urls: &[&str]) -> Self {
        self.references = urls.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn with_stray_entries(mut self) -> Self {
        self.stray_entries = true;
        self
    }

    pub fn dropping_on_request(mut self) -> Self {
        self.drop_on_request = true;
        self
    }
}

/// One scripted server and what it has seen.
#[derive(Default)]
pub struct ScriptedTarget {
    script: Mutex<Script>,
    pub connects: AtomicUsize,
    pub binds: AtomicUsize,
    pub sends: AtomicUsize,
    pub abandons: AtomicUsize,
    requests: Mutex<Vec<OutboundMessage>>,
}

impl ScriptedTarget {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn set_script(&self, script: Script) {
        *self.script() = script;
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn abandons(&self) -> usize {
        self.abandons.load(Ordering::SeqCst)
    }

    /// Requests received, binds excluded.
    pub fn requests(&self) -> Vec<OutboundMessage> {
        self.requests.lock().unwrap().clone()
    }

    /// Replies to a request, in the order the target sends them.
    fn replies(&self, msgid: MessageId, request: &OutboundRequest) -> Vec<ResponseMessage> {
        let script = self.script();
        let mut replies = Vec::new();
        if let OutboundRequest::Search { .. } = request {
            replies.extend(
                script
                    .entries
                    .iter()
                    .cloned()
                    .map(|entry| ResponseMessage::entry(msgid, entry)),
            );
            if !script.references.is_empty() {
                replies.push(ResponseMessage::reference(msgid, script.references.clone()));
            }
        } else if script.stray_entries {
            replies.push(ResponseMessage::entry(
                msgid,
                SearchEntry::new(dn("cn=stray"), Vec::new()),
            ));
        }
        replies.push(ResponseMessage::result(msgid, script.result.clone()));
        replies
    }
}

/// The client end of one scripted connection.
#[derive(Default)]
struct Wire {
    tx: Mutex<Option<mpsc::UnboundedSender<ResponseMessage>>>,
    next_msgid: AtomicI32,
    closed: AtomicBool,
    abandoned: Mutex<HashSet<MessageId>>,
}

impl Wire {
    fn deliver(&self, message: ResponseMessage) {
        if self.abandoned.lock().unwrap().contains(&message.msgid) {
            return;
        }
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(message);
        }
    }

    fn hang_up(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tx.lock().unwrap().take();
    }
}

pub struct ScriptedSession {
    target: Arc<ScriptedTarget>,
    wire: Arc<Wire>,
}

impl RemoteSession for ScriptedSession {
    fn send(&self, message: OutboundMessage) -> Result<MessageId> {
        if self.wire.closed.load(Ordering::SeqCst) {
            return Err(AsyncMetaError::ServerDown("connection closed".into()));
        }
        let msgid = self.wire.next_msgid.fetch_add(1, Ordering::SeqCst) + 1;

        if let OutboundRequest::Bind { .. } = message.request {
            self.target.binds.fetch_add(1, Ordering::SeqCst);
            let code = self.target.script().bind_code;
            let wire = Arc::clone(&self.wire);
            tokio::spawn(async move {
                wire.deliver(ResponseMessage::result(msgid, LdapResult::new(code)));
            });
            return Ok(msgid);
        }

        let (silent, drop_on_request, delay_ms) = {
            let mut script = self.target.script();
            if script.failing_sends > 0 {
                script.failing_sends -= 1;
                drop(script);
                self.wire.hang_up();
                return Err(AsyncMetaError::ServerDown("broken pipe".into()));
            }
            (script.silent, script.drop_on_request, script.reply_delay_ms)
        };

        self.target.sends.fetch_add(1, Ordering::SeqCst);
        self.target.requests.lock().unwrap().push(message.clone());

        if drop_on_request {
            self.wire.hang_up();
            return Ok(msgid);
        }
        if silent {
            return Ok(msgid);
        }

        let replies = self.target.replies(msgid, &message.request);
        let wire = Arc::clone(&self.wire);
        tokio::spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            for reply in replies {
                wire.deliver(reply);
            }
        });
        Ok(msgid)
    }

    fn abandon(&self, msgid: MessageId) -> Result<()> {
        self.target.abandons.fetch_add(1, Ordering::SeqCst);
        self.wire.abandoned.lock().unwrap().insert(msgid);
        Ok(())
    }

    fn close(&self) {
        self.wire.hang_up();
    }
}

/// Connects to scripted targets by name.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    targets: Arc<HashMap<String, Arc<ScriptedTarget>>>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<(&str, Script)>) -> Self {
        let targets = scripts
            .into_iter()
            .map(|(name, script)| {
                let target = ScriptedTarget::default();
                target.set_script(script);
                (name.to_string(), Arc::new(target))
            })
            .collect();
        Self {
            targets: Arc::new(targets),
        }
    }

    pub fn target(&self, name: &str) -> Arc<ScriptedTarget> {
        Arc::clone(&self.targets[name])
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&self, target: &TargetDescriptor) -> Result<Connection<ScriptedSession>> {
        let Some(scripted) = self.targets.get(&target.name).cloned() else {
            return Err(AsyncMetaError::Connect(format!("no such host {}", target.uri)));
        };
        scripted.connects.fetch_add(1, Ordering::SeqCst);

        let (refuse, delay_ms) = {
            let script = scripted.script();
            (script.refuse_connect, script.connect_delay_ms)
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if refuse {
            return Err(AsyncMetaError::Connect("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let wire = Arc::new(Wire::default());
        *wire.tx.lock().unwrap() = Some(tx);
        Ok(Connection::new(
            ScriptedSession {
                target: scripted,
                wire,
            },
            rx,
        ))
    }
}

/// Targets named after their position: `(name, suffix)`.
pub fn target_configs(targets: &[(&str, &str)]) -> Vec<TargetConfig> {
    targets
        .iter()
        .map(|(name, suffix)| TargetConfig::new(*name, format!("ldap://{}.example", name), *suffix))
        .collect()
}

pub fn dispatcher(
    configs: Vec<TargetConfig>,
    connector: &ScriptedConnector,
    config: DispatchConfig,
) -> Dispatcher<ScriptedConnector> {
    let registry = TargetRegistry::from_configs(configs, None).unwrap();
    Dispatcher::new(registry, connector.clone(), Collaborators::default(), config)
}

/// People under `ou=people,dc=x`, groups under `ou=groups,dc=x`.
pub fn people_and_groups(
    people: Script,
    groups: Script,
    config: DispatchConfig,
) -> (Dispatcher<ScriptedConnector>, ScriptedConnector) {
    let connector = ScriptedConnector::new(vec![("people", people), ("groups", groups)]);
    let dispatcher = dispatcher(
        target_configs(&[("people", "ou=people,dc=x"), ("groups", "ou=groups,dc=x")]),
        &connector,
        config,
    );
    (dispatcher, connector)
}

/// Everything streamed so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<SearchEvent>) -> (Vec<SearchEntry>, Vec<Vec<String>>) {
    let mut entries = Vec::new();
    let mut references = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            SearchEvent::Entry(entry) => entries.push(entry),
            SearchEvent::Reference(urls) => references.push(urls),
        }
    }
    (entries, references)
}
