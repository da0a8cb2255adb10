//! File watching, debouncing and the rebuild loop.
//!
//! ```text
//! notify ──▶ FileWatcher ──▶ debounce (quiet window) ──▶ RebuildSignal ──▶ rebuild loop
//! ```
//!
//! The rebuild loop renders one pass at a time. Triggers that arrive while a
//! pass is running are folded into a single follow-up pass.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc as async_mpsc, Notify};
use versa_static::SiteRenderer;

use crate::livereload::{ReloadHub, ReloadMessage};
use crate::server::ServerError;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
}

/// A filtered file system event.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub timestamp: Instant,
}

/// File watcher for detecting changes.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Create a new file watcher for the given paths.
    ///
    /// Returns the watcher and a channel to receive events. Events stop when
    /// the watcher is dropped.
    pub fn new(
        paths: &[PathBuf],
    ) -> Result<(Self, async_mpsc::Receiver<WatchEvent>), notify::Error> {
        Self::ignoring(paths, &[])
    }

    /// Like [`FileWatcher::new`], but drops events for anything below one of
    /// the `ignored` directories.
    pub fn ignoring(
        paths: &[PathBuf],
        ignored: &[PathBuf],
    ) -> Result<(Self, async_mpsc::Receiver<WatchEvent>), notify::Error> {
        let ignored = ignored.to_vec();
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(256);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            match res {
                Ok(event) => {
                    let _ = sync_tx.send(event);
                }
                Err(e) => tracing::warn!("Watch error: {}", e),
            }
        })?;

        for path in paths {
            if path.exists() {
                watcher.watch(path, RecursiveMode::Recursive)?;
            } else {
                tracing::warn!("Not watching missing path {}", path.display());
            }
        }

        std::thread::spawn(move || {
            while let Ok(event) = sync_rx.recv() {
                for path in event.paths {
                    if ignored.iter().any(|dir| path.starts_with(dir)) {
                        continue;
                    }
                    if let Some(e) = classify_event(&path, &event.kind) {
                        if async_tx.blocking_send(e).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok((Self { _watcher: watcher }, async_rx))
    }
}

/// Classify a notify event into a WatchEvent, dropping editor artifacts.
fn classify_event(path: &Path, kind: &EventKind) -> Option<WatchEvent> {
    if is_temp_file(path) {
        return None;
    }

    let kind = match kind {
        EventKind::Create(_) => WatchEventKind::Created,
        EventKind::Modify(_) => WatchEventKind::Modified,
        EventKind::Remove(_) => WatchEventKind::Removed,
        _ => return None,
    };

    Some(WatchEvent {
        kind,
        path: path.to_path_buf(),
        timestamp: Instant::now(),
    })
}

/// Swap, backup and hidden files written by editors.
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "swp" | "swo" | "tmp" | "bak" | "bck" | "backup")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// Collapse bursts of events into single triggers.
///
/// After the first event of a burst, `on_quiet` fires once no further event
/// arrived for `window`. Returns when the event channel closes.
pub async fn debounce<F>(
    mut events: async_mpsc::Receiver<WatchEvent>,
    window: Duration,
    mut on_quiet: F,
) where
    F: FnMut(Vec<WatchEvent>),
{
    while let Some(first) = events.recv().await {
        let mut burst = vec![first];

        loop {
            match tokio::time::timeout(window, events.recv()).await {
                Ok(Some(event)) => burst.push(event),
                Ok(None) => {
                    on_quiet(burst);
                    return;
                }
                Err(_) => break,
            }
        }

        on_quiet(burst);
    }
}

/// Single-slot dirty flag between the debouncer and the rebuild loop.
///
/// Any number of requests made while the loop is busy leave exactly one
/// pending rebuild behind.
#[derive(Debug, Clone, Default)]
pub struct RebuildSignal {
    dirty: Arc<Notify>,
}

impl RebuildSignal {
    /// Mark the output as stale.
    pub fn request(&self) {
        self.dirty.notify_one();
    }

    /// Wait until the output is marked stale, clearing the flag.
    pub async fn wait(&self) {
        self.dirty.notified().await;
    }
}

/// Re-renders the site whenever the template sources change.
///
/// Watch-triggered passes only run the renderer. Production placeholders are
/// left as-is in development mode.
pub struct SourceWatcher {
    renderer: SiteRenderer,
    window: Duration,
}

impl SourceWatcher {
    /// Create a watcher for the renderer's source directory.
    pub fn new(renderer: SiteRenderer, window: Duration) -> Self {
        Self { renderer, window }
    }

    /// Watch until the event stream ends.
    ///
    /// Writes to the output directory never count as source changes, even
    /// when it lives inside the source tree.
    pub async fn run(self) -> Result<(), ServerError> {
        let config = self.renderer.config();
        if let Err(e) = tokio::fs::create_dir_all(&config.output_dir).await {
            tracing::error!(
                "Failed to create output directory {}: {}",
                config.output_dir.display(),
                e
            );
        }

        let source_dir = canonical(&config.source_dir);
        let output_dir = canonical(&config.output_dir);
        let (watcher, rx) = FileWatcher::ignoring(&[source_dir.clone()], &[output_dir])
            .map_err(|e| ServerError::WatchError(e.to_string()))?;

        tracing::info!("Watching {} for changes", source_dir.display());

        let signal = RebuildSignal::default();
        let renderer = self.renderer;
        let worker = tokio::spawn(rebuild_loop(signal.clone(), move || {
            let renderer = renderer.clone();
            async move { rebuild(&renderer).await }
        }));

        debounce(rx, self.window, |burst| {
            if let Some(last) = burst.last() {
                tracing::info!(
                    "{} change(s), last {:?} {}; rebuilding",
                    burst.len(),
                    last.kind,
                    last.path.display()
                );
            }
            signal.request();
        })
        .await;

        drop(watcher);
        worker.abort();
        Ok(())
    }
}

/// Run `rebuild` once per pending request, one at a time.
async fn rebuild_loop<F, Fut>(signal: RebuildSignal, mut rebuild: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        signal.wait().await;
        rebuild().await;
    }
}

async fn rebuild(renderer: &SiteRenderer) {
    let pass = renderer.render().await;
    if pass.failed > 0 {
        tracing::warn!(
            "Rebuilt {} pages with {} failures in {}ms",
            pass.pages,
            pass.failed,
            pass.duration_ms
        );
    } else {
        tracing::info!("Rebuilt {} pages in {}ms", pass.pages, pass.duration_ms);
    }
}

/// Resolve symlinks so event paths and configured paths share one prefix.
fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Broadcast a reload whenever the output tree settles after a change.
pub async fn watch_output(
    output_dir: PathBuf,
    window: Duration,
    hub: ReloadHub,
) -> Result<(), ServerError> {
    let (watcher, rx) =
        FileWatcher::new(&[output_dir]).map_err(|e| ServerError::WatchError(e.to_string()))?;

    debounce(rx, window, |_| {
        tracing::debug!("Output changed, notifying {} client(s)", hub.subscriber_count());
        hub.send(ReloadMessage::Reload);
    })
    .await;

    drop(watcher);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::sync::broadcast::error::TryRecvError;
    use versa_releases::{CompatibilityEntry, VersionPlan};
    use versa_static::BuildConfig;

    fn renderer(root: &Path, output_dir: PathBuf) -> SiteRenderer {
        let config = BuildConfig {
            source_dir: root.join("src"),
            static_dir: root.join("static"),
            output_dir,
            site_url: "https://docs.example.com".to_string(),
            release_url: "http://127.0.0.1:1/{version}".to_string(),
            ..Default::default()
        };
        let matrix = [CompatibilityEntry {
            product_version: "5.0".to_string(),
            api_versions: vec!["2.1".to_string()],
        }];
        SiteRenderer::new(Arc::new(config), VersionPlan::new(&matrix, None).unwrap())
    }

    async fn wait_for_content(path: &Path, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(content) = fs::read_to_string(path) {
                if content.contains(needle) {
                    return content;
                }
            }
            assert!(Instant::now() < deadline, "timeout waiting for {}", path.display());
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    fn event(path: &str) -> WatchEvent {
        WatchEvent {
            kind: WatchEventKind::Modified,
            path: PathBuf::from(path),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn ignores_editor_artifacts() {
        let modify = EventKind::Modify(notify::event::ModifyKind::Any);

        assert!(classify_event(Path::new("src/.index.html.jinja.swp"), &modify).is_none());
        assert!(classify_event(Path::new("src/index.html.jinja~"), &modify).is_none());
        assert!(classify_event(Path::new("src/page.tmp"), &modify).is_none());
        assert_eq!(
            classify_event(Path::new("src/index.html.jinja"), &modify).map(|e| e.kind),
            Some(WatchEventKind::Modified)
        );
    }

    #[test]
    fn ignores_access_events() {
        let access = EventKind::Access(notify::event::AccessKind::Any);

        assert!(classify_event(Path::new("src/index.html.jinja"), &access).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_produces_one_trigger() {
        let (tx, rx) = async_mpsc::channel(16);
        let triggers = Arc::new(AtomicUsize::new(0));
        let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));

        let counter = Arc::clone(&triggers);
        let seen = Arc::clone(&sizes);
        let task = tokio::spawn(debounce(rx, Duration::from_millis(300), move |burst| {
            counter.fetch_add(1, Ordering::SeqCst);
            seen.lock().unwrap().push(burst.len());
        }));

        for i in 0..5 {
            tx.send(event(&format!("src/page{i}.html.jinja"))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(triggers.load(Ordering::SeqCst), 1);

        tx.send(event("src/index.html.jinja")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(triggers.load(Ordering::SeqCst), 2);

        drop(tx);
        task.await.unwrap();
        assert_eq!(*sizes.lock().unwrap(), vec![5, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_waits_for_quiet_window() {
        let (tx, rx) = async_mpsc::channel(16);
        let triggers = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&triggers);
        tokio::spawn(debounce(rx, Duration::from_millis(300), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tx.send(event("src/a.html.jinja")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(triggers.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(triggers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_during_a_rebuild_coalesce() {
        let signal = RebuildSignal::default();

        signal.request();
        signal.request();
        signal.request();

        signal.wait().await;
        let second = tokio::time::timeout(Duration::from_millis(50), signal.wait()).await;
        assert!(second.is_err(), "only one rebuild should be pending");

        signal.request();
        let third = tokio::time::timeout(Duration::from_millis(50), signal.wait()).await;
        assert!(third.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn change_during_render_schedules_one_more_render() {
        let signal = RebuildSignal::default();
        let renders = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&renders);
        let worker = tokio::spawn(rebuild_loop(signal.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }));

        signal.request();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        signal.request();
        signal.request();
        signal.request();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(renders.load(Ordering::SeqCst), 2);

        worker.abort();
    }

    #[tokio::test]
    async fn source_edit_rerenders_without_injection() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let out = src.join("dist");
        fs::create_dir_all(&out).unwrap();
        fs::write(src.join("index.html.jinja"), "first").unwrap();

        let renderer = renderer(temp.path(), out.clone());
        let task = tokio::spawn(SourceWatcher::new(renderer, Duration::from_millis(50)).run());
        tokio::time::sleep(Duration::from_millis(200)).await;

        fs::write(
            src.join("index.html.jinja"),
            "second <a href=\"__VERSA_SITE_URL__/\">{{ latest }}</a>",
        )
        .unwrap();

        let page = wait_for_content(&out.join("index.html"), "second").await;
        assert_eq!(page, "second <a href=\"__VERSA_SITE_URL__/\">2.1</a>");

        // Rendering into the nested output must not trigger further passes
        tokio::time::sleep(Duration::from_millis(300)).await;
        let settled = fs::metadata(out.join("index.html")).unwrap().modified().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let later = fs::metadata(out.join("index.html")).unwrap().modified().unwrap();
        assert_eq!(settled, later);

        task.abort();
    }

    #[tokio::test]
    async fn ignored_directory_produces_no_events() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let out = src.join("dist");
        fs::create_dir_all(&out).unwrap();

        let (watcher, mut rx) = FileWatcher::ignoring(&[src.clone()], &[out.clone()]).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(out.join("index.html"), "rendered").unwrap();
        let quiet = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(quiet.is_err(), "output writes should be ignored");

        fs::write(src.join("index.html.jinja"), "source").unwrap();
        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        drop(watcher);

        assert_eq!(event.path.file_name().unwrap(), "index.html.jinja");
    }

    #[tokio::test]
    async fn output_burst_sends_one_reload() {
        let temp = tempdir().unwrap();
        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();

        let task = tokio::spawn(watch_output(
            temp.path().to_path_buf(),
            Duration::from_millis(200),
            hub.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;

        for i in 0..5 {
            fs::write(temp.path().join(format!("page{i}.html")), "page").unwrap();
        }

        let message = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await;
        assert_eq!(message.unwrap().unwrap(), ReloadMessage::Reload);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        task.abort();
    }

    #[tokio::test]
    async fn watches_file_changes() {
        let temp = tempdir().unwrap();
        let test_file = temp.path().join("index.html.jinja");

        let (watcher, mut rx) = FileWatcher::new(&[temp.path().to_path_buf()]).unwrap();

        // Give inotify time to set up
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(&test_file, "{{ latest }}").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await;
        drop(watcher);

        assert!(event.is_ok(), "timeout waiting for file watch event");
        assert!(event.unwrap().is_some(), "channel should not be closed");
    }
}
