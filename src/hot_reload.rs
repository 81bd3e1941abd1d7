// Shader hot-reload
//
// Watches the directories holding the configured SPIR-V files. The event
// loop polls once per iteration and rebuilds the pipeline on a change.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};

pub struct ShaderWatcher {
    // Dropping the watcher stops the notifications
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    files: Vec<PathBuf>,
}

impl ShaderWatcher {
    pub fn new(files: &[&Path]) -> Result<Self> {
        let (tx, events) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })
        .context("Failed to create shader file watcher")?;

        let files: Vec<PathBuf> = files.iter().map(|file| absolute(file)).collect();
        let dirs: BTreeSet<&Path> = files.iter().filter_map(|file| file.parent()).collect();

        // Directories, not files: editors and compilers often replace the file
        for dir in dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch shader directory {:?}", dir))?;
            log::info!("Watching {:?} for shader changes", dir);
        }

        Ok(Self {
            _watcher: watcher,
            events,
            files,
        })
    }

    /// Drain pending events; true if any touched a watched shader
    pub fn poll(&self) -> bool {
        let mut changed = false;
        loop {
            match self.events.try_recv() {
                Ok(Ok(event)) => changed |= touches_any(&event, &self.files),
                Ok(Err(e)) => log::warn!("Shader watcher error: {}", e),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("Shader watcher stopped");
                    break;
                }
            }
        }
        changed
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// A create or modify event naming one of `files`
pub fn touches_any(event: &Event, files: &[PathBuf]) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|path| files.contains(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};

    fn files() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/app/shaders/triangle.vert.spv"),
            PathBuf::from("/app/shaders/triangle.frag.spv"),
        ]
    }

    #[test]
    fn modified_shader_triggers_reload() {
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/app/shaders/triangle.frag.spv"));
        assert!(touches_any(&event, &files()));
    }

    #[test]
    fn recreated_shader_triggers_reload() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/app/shaders/triangle.vert.spv"));
        assert!(touches_any(&event, &files()));
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/app/shaders/triangle.vert"));
        assert!(!touches_any(&event, &files()));

        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/other/triangle.vert.spv"));
        assert!(!touches_any(&event, &files()));
    }

    #[test]
    fn reads_and_removals_are_ignored() {
        let path = PathBuf::from("/app/shaders/triangle.vert.spv");

        let event = Event::new(EventKind::Access(AccessKind::Any)).add_path(path.clone());
        assert!(!touches_any(&event, &files()));

        let event = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path);
        assert!(!touches_any(&event, &files()));
    }

    #[test]
    fn relative_paths_are_made_absolute() {
        assert!(absolute(Path::new("shaders/triangle.vert.spv")).is_absolute());
        assert_eq!(absolute(Path::new("/x/y.spv")), PathBuf::from("/x/y.spv"));
    }
}
