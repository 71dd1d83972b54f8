//! The rule filter plugin core.
//!
//! [`RuleFilter`] owns the rule-list map, the published matcher
//! snapshot, and the background machinery around them: the debounced
//! reload pipeline, the auto-updater task, and shutdown. Hot-path
//! matching reads the snapshot through an [`ArcSwap`], so queries never
//! contend with downloads, parses, or manifest writes.

use crate::config::FilterConfig;
use crate::download;
use crate::engine::{parse_rules, DomainMatch, DomainMatcher, RuleSnapshot};
use crate::store::{self, RuleList};
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use futures::future::join_all;
use std::collections::HashMap;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);
const UPDATE_TICK: Duration = Duration::from_secs(60);

const MANIFEST_FILE: &str = "config.json";

/// Manages URL-backed AdGuard rule lists and answers block decisions.
///
/// Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct RuleFilter {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) dir: PathBuf,
    pub(crate) manifest_path: PathBuf,
    /// Rule-list map and per-list metadata. Never held across an await;
    /// blocking maintenance threads may hold it during file reads.
    pub(crate) rules: RwLock<HashMap<String, RuleList>>,
    /// Published `(allow, deny)` snapshot; replaced wholesale on reload.
    pub(crate) snapshot: ArcSwap<RuleSnapshot>,
    /// Serializes rebuilds so at most one runs at a time.
    reload_lock: Mutex<()>,
    /// Debounce generation; a scheduled reload fires only if still newest.
    reload_serial: AtomicU64,
    pub(crate) http: reqwest::Client,
    pub(crate) shutdown: CancellationToken,
}

/// Per-list fields captured under the read lock for use off-lock.
#[derive(Clone)]
pub(crate) struct ListMeta {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) path: PathBuf,
}

impl RuleFilter {
    /// Initializes the plugin: creates the working directory, loads the
    /// manifest, performs the initial download + reload, and starts the
    /// auto-updater.
    ///
    /// # Errors
    ///
    /// Directory creation and SOCKS5 proxy setup failures are fatal. A
    /// corrupt manifest is not: it is logged and the plugin starts with
    /// an empty rule set for the administrator to repair.
    pub async fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.dir)
            .with_context(|| format!("failed to create directory {}", config.dir.display()))?;
        info!(dir = %config.dir.display(), "rule filter working directory");

        let http = download::build_http_client(config.socks5.as_deref())?;

        let manifest_path = config.dir.join(MANIFEST_FILE);
        let rules = match store::load_manifest(&manifest_path, &config.dir) {
            Ok(rules) => {
                info!(count = rules.len(), "loaded rule list manifest");
                rules
            }
            Err(err) => {
                error!(%err, "failed to load manifest, starting with empty config");
                HashMap::new()
            }
        };

        let filter = Self {
            inner: Arc::new(Inner {
                dir: config.dir,
                manifest_path,
                rules: RwLock::new(rules),
                snapshot: ArcSwap::from_pointee(RuleSnapshot::default()),
                reload_lock: Mutex::new(()),
                reload_serial: AtomicU64::new(0),
                http,
                shutdown: CancellationToken::new(),
            }),
        };

        filter.reload_all(true).await;
        filter.spawn_auto_updater();

        Ok(filter)
    }

    /// Signals shutdown: in-flight downloads abort, the auto-updater
    /// exits, and pending debounced reloads are dropped.
    pub fn shutdown(&self) {
        info!("rule filter shutting down");
        self.inner.shutdown.cancel();
    }

    /// The currently published matcher snapshot.
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.inner.snapshot.load_full()
    }

    /// Returns true when the domain should be blocked.
    pub fn is_blocked(&self, domain: &str) -> bool {
        self.inner.snapshot.load().is_blocked(domain)
    }

    /// Schedules a debounced rebuild of the matcher snapshot.
    ///
    /// Fire-and-forget: bursts of triggers within the debounce window
    /// coalesce into a single rebuild that starts 500 ms after the last
    /// trigger. Does nothing once shutdown has been signaled.
    pub fn trigger_reload(&self) {
        let serial = self.inner.reload_serial.fetch_add(1, Ordering::SeqCst) + 1;
        let filter = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RELOAD_DEBOUNCE).await;
            if filter.inner.shutdown.is_cancelled() {
                debug!("debounced reload skipped, plugin is shutting down");
                return;
            }
            if filter.inner.reload_serial.load(Ordering::SeqCst) == serial {
                debug!("debounced reload firing");
                filter.reload_all(false).await;
            } else {
                debug!("debounced reload superseded by a newer trigger");
            }
        });
    }

    /// Rebuilds the matcher snapshot from all enabled rule files.
    ///
    /// Serialized by `reload_lock`. On the initial load, enabled lists
    /// with no local file are downloaded first; download errors are
    /// logged and the affected list simply contributes nothing.
    pub(crate) async fn reload_all(&self, initial: bool) {
        let _guard = self.inner.reload_lock.lock().await;
        info!("reloading all rule lists");

        let enabled: Vec<ListMeta> = {
            let rules = self.inner.rules.read().unwrap();
            rules
                .values()
                .filter(|list| list.enabled)
                .map(|list| ListMeta {
                    id: list.id.clone(),
                    name: list.name.clone(),
                    path: list.local_path.clone(),
                })
                .collect()
        };

        if initial {
            let missing: Vec<&ListMeta> =
                enabled.iter().filter(|meta| !meta.path.exists()).collect();
            join_all(missing.into_iter().map(|meta| async move {
                if let Err(err) = self.download_guarded(&meta.id).await {
                    error!(list = %meta.name, %err, "initial download failed");
                }
            }))
            .await;
        }

        let worker = self.clone();
        let enabled_meta = enabled.clone();
        let built = tokio::task::spawn_blocking(move || {
            let counts_changed = worker.refresh_rule_counts();
            let (snapshot, total) = worker.build_snapshot(&enabled_meta);
            (counts_changed, snapshot, total)
        })
        .await;

        let (counts_changed, snapshot, total) = match built {
            Ok(parts) => parts,
            Err(err) => {
                error!(%err, "reload worker failed");
                return;
            }
        };

        if counts_changed {
            let filter = self.clone();
            tokio::spawn(async move {
                if let Err(err) = filter.save_manifest().await {
                    error!(%err, "failed to save manifest after rule count refresh");
                }
            });
        }

        self.inner.snapshot.store(Arc::new(snapshot));
        info!(total, "reload complete, active rules from enabled lists");
    }

    /// Re-parses every list's local file to refresh `rule_count`.
    ///
    /// Runs on a blocking thread. Returns true when any count changed.
    fn refresh_rule_counts(&self) -> bool {
        let mut rules = self.inner.rules.write().unwrap();
        let mut changed = false;
        for list in rules.values_mut() {
            let count = match std::fs::File::open(&list.local_path) {
                Ok(file) => {
                    let mut allow = DomainMatcher::new();
                    let mut deny = DomainMatcher::new();
                    parse_rules(BufReader::new(file), &mut allow, &mut deny).added
                }
                Err(_) => 0,
            };
            if list.rule_count != count {
                list.rule_count = count;
                changed = true;
            }
        }
        changed
    }

    /// Parses all enabled rule files into a fresh snapshot.
    ///
    /// Runs on a blocking thread. A list whose file cannot be opened is
    /// skipped; a stream error mid-file keeps the rules parsed so far.
    fn build_snapshot(&self, enabled: &[ListMeta]) -> (RuleSnapshot, usize) {
        let mut allow = DomainMatcher::new();
        let mut deny = DomainMatcher::new();
        let mut total = 0;

        for meta in enabled {
            let file = match std::fs::File::open(&meta.path) {
                Ok(file) => file,
                Err(err) => {
                    warn!(list = %meta.name, path = %meta.path.display(), %err,
                        "skipping enabled rule list, cannot open local file");
                    continue;
                }
            };
            let outcome = parse_rules(BufReader::new(file), &mut allow, &mut deny);
            if let Some(err) = outcome.error {
                error!(list = %meta.name, %err, "failed reading rule file mid-parse");
            }
            total += outcome.added;
        }

        (RuleSnapshot::new(allow, deny), total)
    }

    /// Writes the manifest atomically: serialize under the read lock,
    /// write to `config.json.tmp`, rename into place.
    pub(crate) async fn save_manifest(&self) -> Result<()> {
        let data = {
            let rules = self.inner.rules.read().unwrap();
            store::serialize_manifest(&rules)?
        };

        let tmp = self.inner.manifest_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .context("failed to write temporary manifest")?;
        tokio::fs::rename(&tmp, &self.inner.manifest_path)
            .await
            .context("failed to move temporary manifest into place")?;
        Ok(())
    }

    fn spawn_auto_updater(&self) {
        let filter = self.clone();
        tokio::spawn(async move {
            filter.auto_update_loop().await;
        });
    }

    /// Periodic refresh of lists whose update interval has elapsed.
    async fn auto_update_loop(self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(UPDATE_TICK) => {}
                _ = self.inner.shutdown.cancelled() => {
                    info!("auto-updater stopped");
                    return;
                }
            }

            let due: Vec<ListMeta> = {
                let rules = self.inner.rules.read().unwrap();
                let now = chrono::Utc::now();
                rules
                    .values()
                    .filter(|list| list.update_due(now))
                    .map(|list| ListMeta {
                        id: list.id.clone(),
                        name: list.name.clone(),
                        path: list.local_path.clone(),
                    })
                    .collect()
            };
            if due.is_empty() {
                continue;
            }

            info!(count = due.len(), "auto-update: refreshing due rule lists");
            let this = &self;
            join_all(due.iter().map(|meta| async move {
                if let Err(err) = this.download_guarded(&meta.id).await {
                    error!(list = %meta.name, %err, "auto-update download failed");
                }
            }))
            .await;

            info!("auto-update: downloads finished, triggering reload");
            self.trigger_reload();
        }
    }
}

impl DomainMatch for RuleFilter {
    fn is_blocked(&self, domain: &str) -> bool {
        self.inner.snapshot.load().is_blocked(domain)
    }
}
