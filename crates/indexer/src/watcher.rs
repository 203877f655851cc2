use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use ragd_protocol::{ApiError, FileKind, Result};

use crate::indexer::ProjectIndexer;
use crate::ParserRegistry;

/// Coalesce bursts of file events for this long before re-indexing.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Filesystem watcher feeding incremental re-index.
///
/// Events are debounced and deduplicated; only files the parser registry can
/// classify are re-indexed. Dropping the watcher stops the stream.
pub struct ProjectWatcher {
    _watcher: RecommendedWatcher,
    handle: tokio::task::JoinHandle<()>,
}

impl ProjectWatcher {
    pub fn start(
        indexer: Arc<ProjectIndexer>,
        project: String,
        root: PathBuf,
    ) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let event_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let Ok(event) = event else { return };
            if !matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) {
                return;
            }
            for path in event.paths {
                if let Ok(relative) = path.strip_prefix(&event_root) {
                    let _ = tx.send(relative.to_path_buf());
                }
            }
        })
        .map_err(|e| ApiError::Unknown(format!("watcher init failed: {e}")))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ApiError::Unknown(format!("watch {} failed: {e}", root.display())))?;

        let handle = tokio::spawn(async move {
            loop {
                let Some(first) = rx.recv().await else { break };
                let mut changed = vec![first];

                // Debounce: keep draining until the burst goes quiet.
                loop {
                    match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
                        Ok(Some(path)) => changed.push(path),
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }

                changed.sort();
                changed.dedup();
                changed.retain(|path| {
                    ParserRegistry::classify(&path.to_string_lossy()) != FileKind::Unknown
                });
                if changed.is_empty() {
                    continue;
                }

                log::debug!("watcher: re-indexing {} changed files", changed.len());
                match indexer.index_files(&project, &root, &changed).await {
                    Ok(chunks) => log::info!("watcher: refreshed {chunks} chunks"),
                    Err(err) => log::warn!("watcher: incremental index failed: {err}"),
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            handle,
        })
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}
