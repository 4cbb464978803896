//! Shared fixtures: in-memory mailbox transport, scripted LLM backend,
//! mutable tenant registry and runtime factory.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use mailbot::config::TenantConfig;
use mailbot::dedup::{DedupStore, FileDedupStore, IdHashing};
use mailbot::error::{ConfigError, Error, LlmError, RegistryError, TransportError};
use mailbot::registry::{TenantRegistry, TenantSummary};
use mailbot::reply::{CompletionBackend, LlmReplyGenerator};
use mailbot::stats::TenantStats;
use mailbot::tenant::{RuntimeFactory, TenantRuntime};
use mailbot::transport::{Activity, InboundEmail, MailTransport, OutgoingReply, ReplyMode};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const FALLBACK: &str = "Hej! Detta är ett automatiskt svar på ditt mail.";

pub fn tenant_json(id: &str) -> String {
    format!(
        r#"{{
        "company": {{"id": "{id}", "name": "Acme AB", "email": "info@acme.se"}},
        "mail_server": {{
            "imap_host": "imap.acme.se",
            "smtp_host": "smtp.acme.se",
            "username": "info@acme.se",
            "password": "hunter2"
        }},
        "ai": {{"prompt_template": "Du svarar för {{company_name}}."}},
        "bot": {{"check_interval": 60, "max_messages_per_check": 5}},
        "storage": {{}}
    }}"#
    )
}

pub fn tenant_config(id: &str) -> TenantConfig {
    TenantConfig::from_json(&tenant_json(id), id).unwrap()
}

pub fn email(id: &str, subject: &str) -> InboundEmail {
    InboundEmail {
        id: id.to_string(),
        thread_id: id.to_string(),
        from_address: format!("{id}@customer.se"),
        subject: subject.to_string(),
        snippet: format!("Question in {id}"),
        body: format!("Question in {id}"),
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// Observable state of a fake mailbox. Fetching never marks mail seen, like
/// `BODY.PEEK[]`; only `mark_seen` does.
#[derive(Default)]
pub struct Mailbox {
    /// Oldest first; a fetch returns the newest unseen entries.
    pub unread: Vec<InboundEmail>,
    pub seen: HashSet<String>,
    pub submitted: Vec<(OutgoingReply, ReplyMode)>,
    pub fail_connect: bool,
    /// Message ids whose reply submission fails.
    pub fail_submit: HashSet<String>,
    /// Panic inside the next N fetches.
    pub panic_fetches: usize,
    /// Scripted results for `wait_for_activity`; when empty, the wait times
    /// out. An `Err("panic")` entry panics instead of failing.
    pub activity: VecDeque<Result<Activity, String>>,
    /// How long each fetch takes.
    pub fetch_delay: Duration,
    pub connects: usize,
    pub disconnects: usize,
    pub last_disconnect: Option<Instant>,
    pub fetches: usize,
}

impl Mailbox {
    pub fn with_unread(unread: Vec<InboundEmail>) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            unread,
            ..Self::default()
        }))
    }

    pub fn replies_to(&self, message_id: &str) -> usize {
        self.submitted
            .iter()
            .filter(|(r, _)| r.in_reply_to.as_deref() == Some(message_id))
            .count()
    }
}

pub struct MockTransport {
    mailbox: Arc<Mutex<Mailbox>>,
    connected: bool,
}

impl MockTransport {
    pub fn new(mailbox: Arc<Mutex<Mailbox>>) -> Self {
        Self {
            mailbox,
            connected: false,
        }
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut mb = self.mailbox.lock().unwrap();
        mb.connects += 1;
        if mb.fail_connect {
            return Err(TransportError::ConnectFailed {
                host: "imap.acme.se".into(),
                reason: "connection refused".into(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut mb = self.mailbox.lock().unwrap();
        mb.disconnects += 1;
        mb.last_disconnect = Some(Instant::now());
        self.connected = false;
    }

    async fn fetch_unread(&mut self, max: usize) -> Vec<InboundEmail> {
        let delay = {
            let mut mb = self.mailbox.lock().unwrap();
            mb.fetches += 1;
            if mb.panic_fetches > 0 {
                mb.panic_fetches -= 1;
                drop(mb);
                panic!("mailbox exploded");
            }
            mb.fetch_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.connected {
            return Vec::new();
        }
        let mb = self.mailbox.lock().unwrap();
        let unseen: Vec<&InboundEmail> = mb
            .unread
            .iter()
            .filter(|m| !mb.seen.contains(&m.id))
            .collect();
        let skip = unseen.len().saturating_sub(max);
        unseen.into_iter().skip(skip).cloned().collect()
    }

    async fn submit_reply(&mut self, reply: &OutgoingReply, mode: ReplyMode) -> bool {
        let mut mb = self.mailbox.lock().unwrap();
        if let Some(id) = &reply.in_reply_to
            && mb.fail_submit.contains(id)
        {
            return false;
        }
        mb.submitted.push((reply.clone(), mode));
        true
    }

    async fn mark_seen(&mut self, message_id: &str) -> bool {
        self.mailbox
            .lock()
            .unwrap()
            .seen
            .insert(message_id.to_string());
        true
    }

    async fn wait_for_activity(&mut self, timeout: Duration) -> Result<Activity, TransportError> {
        let next = self.mailbox.lock().unwrap().activity.pop_front();
        match next {
            Some(Ok(activity)) => Ok(activity),
            Some(Err(reason)) if reason == "panic" => panic!("worker exploded"),
            Some(Err(reason)) => Err(TransportError::Protocol(reason)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(Activity::TimedOut)
            }
        }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────

/// Backend answering every prompt with a fixed result.
pub struct StubBackend {
    reply: Result<String, String>,
}

impl StubBackend {
    pub fn ok(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(reason.to_string()),
        })
    }
}

#[async_trait]
impl CompletionBackend for StubBackend {
    fn provider(&self) -> &'static str {
        "stub"
    }

    async fn complete(&self, _prompt: &str, _model: &str, _max: u64) -> Result<String, LlmError> {
        self.reply.clone().map_err(|reason| LlmError::RequestFailed {
            provider: "stub".into(),
            reason,
        })
    }
}

// ── Runtime ─────────────────────────────────────────────────────────

pub struct Harness {
    pub runtime: TenantRuntime,
    pub mailbox: Arc<Mutex<Mailbox>>,
    pub store: Arc<FileDedupStore>,
    pub stats: Arc<TenantStats>,
}

pub fn harness(
    config: TenantConfig,
    mailbox: Arc<Mutex<Mailbox>>,
    backend: Arc<StubBackend>,
    store_path: &Path,
) -> Harness {
    let store = Arc::new(FileDedupStore::open(store_path, IdHashing::Plain));
    let stats = TenantStats::new();
    let runtime = TenantRuntime {
        generator: Arc::new(LlmReplyGenerator::new(backend, &config)),
        config,
        transport: Box::new(MockTransport::new(Arc::clone(&mailbox))),
        dedup: Arc::clone(&store) as Arc<dyn DedupStore>,
        stats: Arc::clone(&stats) as Arc<dyn mailbot::stats::StatsRecorder>,
    };
    Harness {
        runtime,
        mailbox,
        store,
        stats,
    }
}

// ── Registry / factory ──────────────────────────────────────────────

/// Registry whose active list tests edit while the supervisor runs.
#[derive(Default)]
pub struct MockRegistry {
    pub active: Mutex<Vec<String>>,
}

impl MockRegistry {
    pub fn with(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
        })
    }

    pub fn set(&self, ids: &[&str]) {
        *self.active.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }
}

#[async_trait]
impl TenantRegistry for MockRegistry {
    async fn list_active(&self) -> Result<Vec<TenantSummary>, RegistryError> {
        Ok(self
            .active
            .lock()
            .unwrap()
            .iter()
            .map(|id| TenantSummary {
                id: id.clone(),
                name: format!("Tenant {id}"),
                status: "active".into(),
            })
            .collect())
    }

    async fn load_config(&self, tenant_id: &str) -> Result<TenantConfig, RegistryError> {
        if self.active.lock().unwrap().iter().any(|id| id == tenant_id) {
            Ok(tenant_config(tenant_id))
        } else {
            Err(ConfigError::TenantNotFound(tenant_id.to_string()).into())
        }
    }
}

/// Builds mock runtimes, one fresh mailbox per build, and records when.
pub struct MockFactory {
    registry: Arc<MockRegistry>,
    dir: tempfile::TempDir,
    /// Activity script for the n-th build of a tenant (0-based); later builds
    /// get an empty script.
    scripts: Mutex<HashMap<(String, usize), Vec<Result<Activity, String>>>>,
    /// Fetch delay for the n-th build of a tenant.
    fetch_delays: Mutex<HashMap<(String, usize), Duration>>,
    pub builds: Mutex<HashMap<String, Vec<Instant>>>,
    pub mailboxes: Mutex<HashMap<String, Vec<Arc<Mutex<Mailbox>>>>>,
}

impl MockFactory {
    pub fn new(registry: Arc<MockRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            dir: tempfile::tempdir().unwrap(),
            scripts: Mutex::new(HashMap::new()),
            fetch_delays: Mutex::new(HashMap::new()),
            builds: Mutex::new(HashMap::new()),
            mailboxes: Mutex::new(HashMap::new()),
        })
    }

    pub fn script(&self, tenant: &str, build: usize, activity: Vec<Result<Activity, String>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((tenant.to_string(), build), activity);
    }

    pub fn slow_fetch(&self, tenant: &str, build: usize, delay: Duration) {
        self.fetch_delays
            .lock()
            .unwrap()
            .insert((tenant.to_string(), build), delay);
    }

    pub fn build_count(&self, tenant: &str) -> usize {
        self.builds.lock().unwrap().get(tenant).map_or(0, Vec::len)
    }

    pub fn build_times(&self, tenant: &str) -> Vec<Instant> {
        self.builds
            .lock()
            .unwrap()
            .get(tenant)
            .cloned()
            .unwrap_or_default()
    }

    pub fn mailbox(&self, tenant: &str, build: usize) -> Arc<Mutex<Mailbox>> {
        Arc::clone(&self.mailboxes.lock().unwrap()[tenant][build])
    }
}

#[async_trait]
impl RuntimeFactory for MockFactory {
    async fn build(&self, tenant_id: &str) -> Result<TenantRuntime, Error> {
        let config = self.registry.load_config(tenant_id).await?;

        let build = {
            let mut builds = self.builds.lock().unwrap();
            let times = builds.entry(tenant_id.to_string()).or_default();
            times.push(Instant::now());
            times.len() - 1
        };
        let script = self
            .scripts
            .lock()
            .unwrap()
            .remove(&(tenant_id.to_string(), build))
            .unwrap_or_default();
        let fetch_delay = self
            .fetch_delays
            .lock()
            .unwrap()
            .remove(&(tenant_id.to_string(), build))
            .unwrap_or_default();

        let mailbox = Arc::new(Mutex::new(Mailbox {
            activity: script.into(),
            fetch_delay,
            ..Mailbox::default()
        }));
        self.mailboxes
            .lock()
            .unwrap()
            .entry(tenant_id.to_string())
            .or_default()
            .push(Arc::clone(&mailbox));

        let path = self.dir.path().join(format!("{tenant_id}.json"));
        Ok(harness(config, mailbox, StubBackend::ok("Tack!"), &path).runtime)
    }
}

/// Poll `check` until it holds or [`TEST_TIMEOUT`] passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
