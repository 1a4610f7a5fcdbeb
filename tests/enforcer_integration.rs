//! A stand-in policy engine wired to the watcher contract.

use policy_watcher::prelude::*;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Minimal enforcer: keeps rules in memory, persists them to a file, and
/// tells peers through its watcher whenever it saves.
struct Enforcer {
    rules: parking_lot::RwLock<Vec<String>>,
    storage: std::path::PathBuf,
    loads: AtomicUsize,
    watcher: parking_lot::RwLock<Option<Arc<dyn Watcher>>>,
}

impl Enforcer {
    fn new(storage: std::path::PathBuf) -> Arc<Self> {
        let enforcer = Arc::new(Self {
            rules: parking_lot::RwLock::new(Vec::new()),
            storage,
            loads: AtomicUsize::new(0),
            watcher: parking_lot::RwLock::new(None),
        });
        enforcer.load_policy();
        enforcer
    }

    fn load_policy(&self) {
        let text = fs::read_to_string(&self.storage).unwrap_or_default();
        *self.rules.write() = text.lines().map(str::to_string).collect();
        self.loads.fetch_add(1, Ordering::SeqCst);
    }

    /// Installs the watcher and, by default, reloads the policy on every
    /// notification.
    fn set_watcher(self: &Arc<Self>, watcher: Arc<dyn Watcher>) {
        let weak = Arc::downgrade(self);
        watcher
            .set_update_callback(Box::new(move |_| {
                if let Some(enforcer) = weak.upgrade() {
                    enforcer.load_policy();
                }
            }))
            .unwrap();
        *self.watcher.write() = Some(watcher);
    }

    async fn add_policy(&self, rule: &str) -> Result<()> {
        self.rules.write().push(rule.to_string());
        self.save_policy().await
    }

    async fn save_policy(&self) -> Result<()> {
        let text = self.rules.read().join("\n");
        fs::write(&self.storage, text).unwrap();
        let watcher = self.watcher.read().clone();
        match watcher {
            Some(watcher) => watcher.update().await,
            None => Ok(()),
        }
    }

    fn has_policy(&self, rule: &str) -> bool {
        self.rules.read().iter().any(|r| r == rule)
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_peer_enforcer_reloads_after_save() {
    let temp_dir = TempDir::new().unwrap();
    let storage = temp_dir.path().join("policy.csv");
    fs::write(&storage, "p, alice, data1, read").unwrap();

    let bus = MemoryBus::new();
    bus.bind("mem://enforcers");

    let writer = Enforcer::new(storage.clone());
    let reader = Enforcer::new(storage.clone());

    writer.set_watcher(Arc::new(
        Notifier::connect(&bus, NotifierConfig::new("mem://enforcers"))
            .await
            .unwrap(),
    ));
    reader.set_watcher(Arc::new(
        Notifier::connect(&bus, NotifierConfig::new("mem://enforcers"))
            .await
            .unwrap(),
    ));

    assert!(!reader.has_policy("p, bob, data2, write"));

    tokio_test::assert_ok!(writer.add_policy("p, bob, data2, write").await);

    wait_until(|| reader.has_policy("p, bob, data2, write")).await;
    assert!(reader.has_policy("p, alice, data1, read"));
}

#[tokio::test]
async fn test_explicit_callback_overrides_default_reload() {
    let temp_dir = TempDir::new().unwrap();
    let storage = temp_dir.path().join("policy.csv");

    let bus = MemoryBus::new();
    bus.bind("mem://enforcers");

    let enforcer = Enforcer::new(storage);
    let watcher: Arc<dyn Watcher> = Arc::new(
        Notifier::connect(&bus, NotifierConfig::new("mem://enforcers"))
            .await
            .unwrap(),
    );
    enforcer.set_watcher(Arc::clone(&watcher));

    let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();
    watcher
        .set_update_callback(Box::new(move |_| {
            let _ = tx.send("enforcer");
        }))
        .unwrap();

    let loads_before = enforcer.loads.load(Ordering::SeqCst);
    enforcer.save_policy().await.unwrap();

    let got = timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("the enforcer didn't send a message in time");
    assert_eq!(got, Some("enforcer"));
    assert_eq!(enforcer.loads.load(Ordering::SeqCst), loads_before);

    watcher.close().await;
}

#[tokio::test]
async fn test_save_after_watcher_closed_reports_not_connected() {
    let temp_dir = TempDir::new().unwrap();
    let storage = temp_dir.path().join("policy.csv");

    let bus = MemoryBus::new();
    bus.bind("mem://enforcers");

    let enforcer = Enforcer::new(storage);
    let watcher: Arc<dyn Watcher> = Arc::new(
        Notifier::connect(&bus, NotifierConfig::new("mem://enforcers"))
            .await
            .unwrap(),
    );
    enforcer.set_watcher(Arc::clone(&watcher));
    watcher.close().await;

    let result = enforcer.add_policy("p, carol, data3, read").await;
    assert!(matches!(result, Err(WatcherError::NotConnected)));
    // The local change is kept; only the broadcast failed.
    assert!(enforcer.has_policy("p, carol, data3, read"));
}
