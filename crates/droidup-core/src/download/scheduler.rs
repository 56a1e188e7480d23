//! Bounded worker pool for artifact downloads.
//!
//! The producer feeds tasks into a queue of capacity N, interleaved
//! round-robin by catalog so no single server gets all N workers while
//! another still has work. Every task is acknowledged with its result;
//! only after all acknowledgements does the producer push one `Done`
//! sentinel per worker. A fetch that panics is acknowledged as
//! [`FetchError::Aborted`], so the producer never waits on a lost task.

use super::{FetchError, FetchOutcome, FetchRequest, ValidatorStore, fetch_conditional};
use crate::paths::{InvalidUrl, cache_file, join_locator};
use crate::reporter::Reporter;
use crate::resolver::ResolvedUpdate;
use async_trait::async_trait;
use futures::FutureExt;
use reqwest::Client;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// One artifact to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Fairness key: the catalog address.
    pub catalog: String,
    /// Package id.
    pub package: String,
    /// Display label.
    pub label: String,
    /// Version being fetched.
    pub version: String,
    /// Absolute source URL.
    pub url: String,
    /// Destination in the artifact cache.
    pub dest: PathBuf,
    /// Published digest, if any.
    pub sha256: Option<String>,
}

impl DownloadTask {
    /// Task fetching the candidate of `update` into `apps_root`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidUrl`] if the catalog address and locator do not
    /// form a URL.
    pub fn for_update(update: &ResolvedUpdate, apps_root: &Path) -> Result<Self, InvalidUrl> {
        let url = join_locator(&update.catalog_address, &update.candidate.locator)?;
        let dest = cache_file(apps_root, url.as_str())?;
        Ok(Self {
            catalog: update.catalog_address.clone(),
            package: update.candidate.package.to_string(),
            label: update.candidate.label.clone(),
            version: update.candidate.version_name.clone(),
            url: url.to_string(),
            dest,
            sha256: update.candidate.sha256.clone(),
        })
    }
}

/// Performs one task.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `task` into its destination.
    async fn fetch(&self, task: &DownloadTask) -> Result<FetchOutcome, FetchError>;
}

/// [`Fetcher`] over HTTP, with one client (session) per catalog.
#[derive(Debug)]
pub struct HttpFetcher {
    clients: HashMap<String, Client>,
    fallback: Client,
    validators: Arc<ValidatorStore>,
}

impl HttpFetcher {
    /// Create a fetcher recording validators into `validators`.
    pub fn new(validators: Arc<ValidatorStore>) -> Self {
        Self {
            clients: HashMap::new(),
            fallback: Client::new(),
            validators,
        }
    }

    /// Use `client` for tasks of `catalog`.
    #[must_use]
    pub fn with_client(mut self, catalog: impl Into<String>, client: Client) -> Self {
        self.clients.insert(catalog.into(), client);
        self
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, task: &DownloadTask) -> Result<FetchOutcome, FetchError> {
        let client = self.clients.get(&task.catalog).unwrap_or(&self.fallback);
        let request = FetchRequest::new(&task.url, &task.dest).verify(task.sha256.as_deref());
        fetch_conditional(client, &request, &self.validators).await
    }
}

/// Interleave `items` by `key`: one item per key per round, keys in
/// ascending order, items of one key in their original order.
pub fn round_robin<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut groups: BTreeMap<K, VecDeque<T>> = BTreeMap::new();
    let mut total = 0;
    for item in items {
        groups.entry(key(&item)).or_default().push_back(item);
        total += 1;
    }

    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        for queue in groups.values_mut() {
            if let Some(item) = queue.pop_front() {
                out.push(item);
            }
        }
    }
    out
}

/// Results of a download batch.
#[derive(Debug, Default)]
pub struct DownloadReport {
    /// Tasks whose artifact is now in the cache.
    pub completed: Vec<(DownloadTask, FetchOutcome)>,
    /// Tasks that failed, with the reason.
    pub failed: Vec<(DownloadTask, FetchError)>,
}

impl DownloadReport {
    /// Number of tasks in the batch.
    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    /// Returns `true` if `package` has a usable artifact.
    pub fn is_completed(&self, package: &str) -> bool {
        self.completed.iter().any(|(t, _)| t.package == package)
    }
}

enum Job {
    Task(DownloadTask),
    Done,
}

type Ack = (DownloadTask, Result<FetchOutcome, FetchError>);

/// Run `tasks` on `workers` concurrent workers.
///
/// A failed task is recorded in the report; it never stops the others.
pub async fn run_downloads<F, R>(
    tasks: Vec<DownloadTask>,
    workers: usize,
    fetcher: Arc<F>,
    reporter: R,
) -> DownloadReport
where
    F: Fetcher + ?Sized + 'static,
    R: Reporter + Clone + 'static,
{
    let workers = workers.max(1);
    let (job_tx, job_rx) = mpsc::channel::<Job>(workers);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<Ack>();

    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        handles.push(tokio::spawn(worker(
            id,
            job_rx.clone(),
            fetcher.clone(),
            reporter.clone(),
            ack_tx.clone(),
        )));
    }
    drop(ack_tx);

    let ordered = round_robin(tasks, |t| t.catalog.clone());
    let expected = ordered.len();
    tracing::info!("Downloading {expected} artifacts with {workers} workers");

    let mut report = DownloadReport::default();
    for task in ordered {
        if job_tx.send(Job::Task(task)).await.is_err() {
            break;
        }
    }
    while report.total() < expected {
        let Some((task, result)) = ack_rx.recv().await else {
            break;
        };
        match result {
            Ok(outcome) => report.completed.push((task, outcome)),
            Err(e) => report.failed.push((task, e)),
        }
    }

    for _ in 0..workers {
        if job_tx.send(Job::Done).await.is_err() {
            break;
        }
    }
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("Download worker panicked: {e}");
        }
    }
    report
}

async fn worker<F, R>(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    fetcher: Arc<F>,
    reporter: R,
    acks: mpsc::UnboundedSender<Ack>,
) where
    F: Fetcher + ?Sized,
    R: Reporter,
{
    loop {
        let job = jobs.lock().await.recv().await;
        let task = match job {
            Some(Job::Task(task)) => task,
            Some(Job::Done) | None => break,
        };

        tracing::debug!("Worker {id}: {}", task.url);
        reporter.downloading(&task.label, &task.version);
        let result = AssertUnwindSafe(fetcher.fetch(&task))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(FetchError::Aborted(format!("worker {id} panicked on {}", task.url))));
        match &result {
            Ok(FetchOutcome::Downloaded { bytes }) => {
                reporter.done(&task.label, &task.version, "downloaded", Some(*bytes));
            }
            Ok(_) => reporter.done(&task.label, &task.version, "cached", None),
            Err(e) => {
                tracing::warn!("Download of {} failed: {e}", task.url);
                reporter.failed(&task.label, &task.version, &e.to_string());
            }
        }
        if acks.send((task, result)).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;
    use droidup_schema::{Candidate, InstalledApp, PackageId, VersionCode};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn task(catalog: &str, n: usize) -> DownloadTask {
        DownloadTask {
            catalog: catalog.to_string(),
            package: format!("{catalog}.app{n}"),
            label: format!("{catalog}{n}"),
            version: "1.0".to_string(),
            url: format!("https://{catalog}/app{n}.apk"),
            dest: PathBuf::from(format!("/tmp/{catalog}/app{n}.apk")),
            sha256: None,
        }
    }

    #[derive(Default)]
    struct MockFetcher {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        order: StdMutex<Vec<String>>,
        fail: Vec<String>,
        panic_on: Vec<String>,
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, task: &DownloadTask) -> Result<FetchOutcome, FetchError> {
            self.order.lock().unwrap().push(task.label.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            assert!(!self.panic_on.contains(&task.label), "fetch of {} blew up", task.label);

            if self.fail.contains(&task.label) {
                return Err(FetchError::Io(std::io::Error::other("boom")));
            }
            Ok(FetchOutcome::Downloaded { bytes: 1 })
        }
    }

    #[test]
    fn test_round_robin_interleaves_catalogs() {
        let items = vec![task("a", 1), task("a", 2), task("a", 3), task("b", 1)];
        let labels: Vec<String> = round_robin(items, |t| t.catalog.clone())
            .into_iter()
            .map(|t| t.label)
            .collect();
        assert_eq!(labels, vec!["a1", "b1", "a2", "a3"]);
    }

    #[test]
    fn test_round_robin_never_repeats_while_others_remain() {
        let items: Vec<(char, usize)> = vec![('x', 0), ('y', 0), ('x', 1), ('z', 0), ('x', 2), ('y', 1)];
        let ordered = round_robin(items, |i| i.0);
        let keys: String = ordered.iter().map(|i| i.0).collect();
        assert_eq!(keys, "xyzxyx");
        let xs: Vec<usize> = ordered.iter().filter(|i| i.0 == 'x').map(|i| i.1).collect();
        assert_eq!(xs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_single_worker_follows_fair_order() {
        let fetcher = Arc::new(MockFetcher::default());
        let tasks = vec![task("a", 1), task("a", 2), task("a", 3), task("b", 1)];

        let report = run_downloads(tasks, 1, fetcher.clone(), NullReporter).await;
        assert_eq!(report.completed.len(), 4);
        assert_eq!(*fetcher.order.lock().unwrap(), vec!["a1", "b1", "a2", "a3"]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fetcher = Arc::new(MockFetcher::default());
        let tasks: Vec<DownloadTask> = (0..12).map(|n| task(["a", "b", "c"][n % 3], n)).collect();

        let report = run_downloads(tasks, 3, fetcher.clone(), NullReporter).await;
        assert_eq!(report.completed.len(), 12);
        let max = fetcher.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "observed {max} concurrent fetches");
        assert!(max > 1, "workers never overlapped");
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let fetcher = Arc::new(MockFetcher {
            fail: vec!["a2".to_string()],
            ..MockFetcher::default()
        });
        let tasks = vec![task("a", 1), task("a", 2), task("b", 1)];

        let report = run_downloads(tasks, 2, fetcher, NullReporter).await;
        assert_eq!(report.total(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.label, "a2");
        assert!(report.is_completed("a.app1"));
        assert!(!report.is_completed("a.app2"));
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_reported_as_failure() {
        let fetcher = Arc::new(MockFetcher {
            panic_on: vec!["b1".to_string()],
            ..MockFetcher::default()
        });
        let tasks = vec![task("a", 1), task("b", 1), task("a", 2), task("b", 2)];

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            run_downloads(tasks, 2, fetcher, NullReporter),
        )
        .await
        .expect("batch finished");
        assert_eq!(report.total(), 4);
        assert_eq!(report.completed.len(), 3);
        assert_eq!(report.failed[0].0.label, "b1");
        assert!(matches!(report.failed[0].1, FetchError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = run_downloads(Vec::new(), 4, Arc::new(MockFetcher::default()), NullReporter).await;
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn test_task_for_update() {
        let update = ResolvedUpdate {
            installed: InstalledApp {
                package: PackageId::new("org.example"),
                label: "Example".into(),
                version_code: VersionCode(1),
                version_name: None,
                system: false,
                removed: false,
                installer: None,
                signer: None,
            },
            candidate: Candidate {
                package: PackageId::new("org.example"),
                label: "Example".into(),
                version_code: VersionCode(2),
                version_name: "2.0".into(),
                min_sdk: 1,
                abis: Vec::new(),
                signer: None,
                locator: "/org.example_2.apk".into(),
                sha256: Some("abc".into()),
            },
            catalog_name: "F-Droid".into(),
            catalog_address: "https://f-droid.org/repo/".into(),
        };

        let task = DownloadTask::for_update(&update, Path::new("/cache/apps")).unwrap();
        assert_eq!(task.url, "https://f-droid.org/repo/org.example_2.apk");
        assert_eq!(
            task.dest,
            PathBuf::from("/cache/apps/f-droid.org/repo/org.example_2.apk")
        );
        assert_eq!(task.sha256.as_deref(), Some("abc"));
    }
}
