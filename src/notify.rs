use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::options::OptionValue;

/// Receives committed option changes. Called synchronously from
/// `ConfigStore::set`; implementations must tolerate repeated notifications
/// carrying the same value.
pub trait OptionListener: Send + Sync {
    fn on_change(&self, option: &str, value: &OptionValue);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Option name -> listeners in subscription order.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    by_option: BTreeMap<String, Vec<(ListenerId, Arc<dyn OptionListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, option: &str, listener: Arc<dyn OptionListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_option
            .entry(option.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        for listeners in self.by_option.values_mut() {
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            removed |= listeners.len() != before;
        }
        self.by_option.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    pub fn notify(&self, option: &str, value: &OptionValue) {
        let Some(listeners) = self.by_option.get(option) else {
            return;
        };
        for (id, listener) in listeners {
            debug!(option, listener = id.0, "option change delivered");
            listener.on_change(option, value);
        }
    }

    pub fn len(&self) -> usize {
        self.by_option.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
struct TrackedPaths {
    outdir: Utf8PathBuf,
    prefix: String,
}

/// Follows `outdir` and `filenameprefix` on a live configuration and keeps
/// the output root on disk.
#[derive(Debug, Default)]
pub struct OutputPathTracker {
    paths: Mutex<TrackedPaths>,
}

impl OutputPathTracker {
    pub const OPTIONS: [&'static str; 2] = ["outdir", "filenameprefix"];

    pub fn new(outdir: impl Into<Utf8PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            paths: Mutex::new(TrackedPaths {
                outdir: outdir.into(),
                prefix: prefix.into(),
            }),
        }
    }

    pub fn outdir(&self) -> Utf8PathBuf {
        self.lock().outdir.clone()
    }

    pub fn prefix(&self) -> String {
        self.lock().prefix.clone()
    }

    /// `<outdir>/<prefix><suffix>`
    pub fn product_path(&self, suffix: &str) -> Utf8PathBuf {
        let paths = self.lock();
        paths.outdir.join(format!("{}{suffix}", paths.prefix))
    }

    pub fn ensure_outdir(&self) {
        let outdir = self.outdir();
        ensure_dir(&outdir);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackedPaths> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OptionListener for OutputPathTracker {
    fn on_change(&self, option: &str, value: &OptionValue) {
        let Some(text) = value.as_str() else {
            return;
        };
        match option {
            "outdir" => {
                let outdir = Utf8PathBuf::from(text);
                ensure_dir(&outdir);
                self.lock().outdir = outdir;
            }
            "filenameprefix" => self.lock().prefix = text.to_string(),
            _ => {}
        }
    }
}

fn ensure_dir(path: &Utf8Path) {
    if let Err(err) = fs::create_dir_all(path.as_std_path()) {
        warn!(path = %path, error = %err, "unable to create output directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl OptionListener for Recorder {
        fn on_change(&self, option: &str, value: &OptionValue) {
            self.seen
                .lock()
                .unwrap()
                .push((option.to_string(), value.to_string()));
        }
    }

    #[test]
    fn delivers_only_to_matching_option() {
        let mut registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.subscribe("tmin", recorder.clone());
        registry.notify("tmax", &OptionValue::Int(10));
        registry.notify("tmin", &OptionValue::Int(5));
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![("tmin".to_string(), "5".to_string())]
        );
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let mut registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let id = registry.subscribe("tmin", recorder.clone());
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(registry.is_empty());
        registry.notify("tmin", &OptionValue::Int(5));
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn tracker_creates_outdir_idempotently() {
        let temp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(temp.path().join("runs/a")).unwrap();
        let tracker = OutputPathTracker::new("unused", "prefix");
        let value = OptionValue::Str(target.to_string());
        tracker.on_change("outdir", &value);
        tracker.on_change("outdir", &value);
        assert!(target.as_std_path().is_dir());
        assert_eq!(tracker.product_path(".log"), target.join("prefix.log"));
    }
}
