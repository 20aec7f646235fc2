//! OS file watching for script hot-reload.
//!
//! [`ScriptWatcher`] wraps `notify::RecommendedWatcher` (inotify on Linux,
//! kqueue/FSEvents on macOS) behind a channel and reports which `.lua`
//! files under a directory were created, modified or renamed. It is only a
//! trigger: the runtime still decides what to reload by comparing stamps,
//! so a burst of events for one save costs a single scan.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

/// Classification of a file system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// A new file or directory was created.
    Create,
    /// File content or metadata was modified (not a rename).
    Modify,
    /// A file or directory was renamed or moved.
    Rename,
    /// A file or directory was deleted.
    Delete,
    /// Access events, watcher-internal events, etc.
    Other,
}

impl FileEventKind {
    /// Map `notify::EventKind` to a [`FileEventKind`].
    #[must_use]
    pub fn classify(kind: &notify::EventKind) -> Self {
        match kind {
            notify::EventKind::Create(_) => Self::Create,
            notify::EventKind::Modify(notify::event::ModifyKind::Name(_)) => Self::Rename,
            notify::EventKind::Modify(_) => Self::Modify,
            notify::EventKind::Remove(_) => Self::Delete,
            _ => Self::Other,
        }
    }

    /// Whether the event can change what a script file contains.
    #[must_use]
    pub fn changes_content(self) -> bool {
        matches!(self, Self::Create | Self::Modify | Self::Rename)
    }
}

/// Watches a directory tree for changed `.lua` files.
pub struct ScriptWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Result<Event, notify::Error>>,
    root: PathBuf,
    active: bool,
}

impl std::fmt::Debug for ScriptWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptWatcher")
            .field("root", &self.root)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl ScriptWatcher {
    /// Create a watcher for scripts under `root`.
    ///
    /// Does not start watching until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns an error if the OS file watcher cannot be initialized
    /// (e.g., system resource limits).
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .context("Failed to create file watcher")?;

        Ok(Self {
            watcher,
            rx,
            root: root.into(),
            active: false,
        })
    }

    /// Start watching the root directory recursively.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist or watch
    /// registration fails (e.g., too many watches on Linux).
    pub fn start(&mut self) -> Result<()> {
        self.watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch: {}", self.root.display()))?;
        self.active = true;
        log::info!("Watching for Lua file changes: {:?}", self.root);
        Ok(())
    }

    /// Stop watching. Safe to call when not watching.
    pub fn stop(&mut self) {
        if self.active {
            let _ = self.watcher.unwatch(&self.root);
            self.active = false;
            log::info!("Stopped watching Lua files: {:?}", self.root);
        }
    }

    /// Whether [`start`](Self::start) succeeded and [`stop`](Self::stop)
    /// has not been called since.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The watched directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Drain buffered events (non-blocking).
    ///
    /// Returns the deduplicated paths, relative to the root and using `/`
    /// separators, of `.lua` files that were created, modified or renamed.
    /// Deletes are ignored. Watcher errors are logged and skipped.
    #[must_use]
    pub fn poll_changes(&self) -> Vec<String> {
        let mut changes = Vec::new();

        while let Ok(result) = self.rx.try_recv() {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("File watcher error: {e}");
                    continue;
                }
            };
            if !FileEventKind::classify(&event.kind).changes_content() {
                continue;
            }
            for path in &event.paths {
                if let Some(script) = self.script_path(path) {
                    if !changes.contains(&script) {
                        changes.push(script);
                    }
                }
            }
        }

        changes
    }

    /// Convert an event path into a root-relative script path.
    ///
    /// Returns `None` for non-`.lua` files and paths outside the root.
    fn script_path(&self, path: &Path) -> Option<String> {
        if !path.extension().is_some_and(|ext| ext == "lua") {
            return None;
        }
        let relative = path.strip_prefix(&self.root).ok()?;
        Some(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(root: &str) -> ScriptWatcher {
        ScriptWatcher::new(root).expect("Should create watcher")
    }

    #[test]
    fn test_script_path_is_root_relative() {
        let w = watcher("/srv/scripts");
        assert_eq!(
            w.script_path(Path::new("/srv/scripts/ai/enemies.lua")),
            Some("ai/enemies.lua".to_string())
        );
        assert_eq!(
            w.script_path(Path::new("/srv/scripts/main.lua")),
            Some("main.lua".to_string())
        );
    }

    #[test]
    fn test_script_path_filters_other_files() {
        let w = watcher("/srv/scripts");
        assert_eq!(w.script_path(Path::new("/srv/scripts/notes.txt")), None);
        assert_eq!(w.script_path(Path::new("/srv/scripts/Makefile")), None);
        assert_eq!(w.script_path(Path::new("/elsewhere/main.lua")), None);
    }

    #[test]
    fn test_classify() {
        use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode};
        use notify::EventKind;

        assert_eq!(FileEventKind::classify(&EventKind::Create(CreateKind::File)), FileEventKind::Create);
        assert_eq!(
            FileEventKind::classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            FileEventKind::Modify
        );
        assert_eq!(
            FileEventKind::classify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            FileEventKind::Rename
        );
        assert_eq!(FileEventKind::classify(&EventKind::Remove(RemoveKind::File)), FileEventKind::Delete);
        assert_eq!(FileEventKind::classify(&EventKind::Access(AccessKind::Read)), FileEventKind::Other);
    }

    #[test]
    fn test_only_content_changes_count() {
        assert!(FileEventKind::Create.changes_content());
        assert!(FileEventKind::Modify.changes_content());
        assert!(FileEventKind::Rename.changes_content());
        assert!(!FileEventKind::Delete.changes_content());
        assert!(!FileEventKind::Other.changes_content());
    }

    #[test]
    fn test_start_on_missing_directory_fails() {
        let mut w = watcher("/nonexistent/path/abc123");
        assert!(w.start().is_err());
        assert!(!w.is_active());
    }

    #[test]
    fn test_start_and_stop_real_directory() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let mut w = ScriptWatcher::new(dir.path()).expect("Should create watcher");

        w.start().expect("Should watch temp dir");
        assert!(w.is_active());
        assert!(w.poll_changes().is_empty());

        w.stop();
        assert!(!w.is_active());
        w.stop();
    }

    #[test]
    fn test_debug_impl() {
        let debug = format!("{:?}", watcher("/srv/scripts"));
        assert!(debug.contains("ScriptWatcher"));
        assert!(debug.contains("/srv/scripts"));
    }
}
