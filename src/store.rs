use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::error::AnalysisError;

/// Product layout under an analysis output root:
/// `maps/<n>`, `mle/<n>`, `calcbkg`, `lc/<i>`, `ap/<n>`.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn maps_root(&self) -> Utf8PathBuf {
        self.root.join("maps")
    }

    pub fn mle_root(&self) -> Utf8PathBuf {
        self.root.join("mle")
    }

    pub fn ap_root(&self) -> Utf8PathBuf {
        self.root.join("ap")
    }

    pub fn calc_bkg_dir(&self) -> Utf8PathBuf {
        self.root.join("calcbkg")
    }

    pub fn light_curve_root(&self) -> Utf8PathBuf {
        self.root.join("lc")
    }

    pub fn light_curve_bin_dir(&self, index: usize) -> Utf8PathBuf {
        self.light_curve_root().join(index.to_string())
    }

    /// Creates and returns `<parent>/<n>` for the smallest positive `n` not
    /// already present, so earlier runs are never overwritten.
    pub fn allocate_numbered_dir(parent: &Utf8Path) -> Result<Utf8PathBuf, AnalysisError> {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| AnalysisError::Filesystem(format!("create {parent}: {err}")))?;
        let mut n = 1usize;
        loop {
            let candidate = parent.join(n.to_string());
            match fs::create_dir(candidate.as_std_path()) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(err) => {
                    return Err(AnalysisError::Filesystem(format!(
                        "create {candidate}: {err}"
                    )));
                }
            }
        }
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), AnalysisError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| AnalysisError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".agan-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| AnalysisError::Filesystem(err.to_string()))?;
        std::io::Write::write_all(&mut temp, content)
            .map_err(|err| AnalysisError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| AnalysisError::Filesystem(format!("write {path}: {err}")))?;
        Ok(())
    }

    pub fn write_text_atomic(path: &Utf8Path, content: &str) -> Result<(), AnalysisError> {
        Self::write_bytes_atomic(path, content.as_bytes())
    }

    pub fn read_text(path: &Utf8Path) -> Result<String, AnalysisError> {
        fs::read_to_string(path.as_std_path())
            .map_err(|err| AnalysisError::Filesystem(format!("read {path}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new("/work/out");
        assert!(store.maps_root().ends_with("out/maps"));
        assert!(store.light_curve_bin_dir(3).ends_with("lc/3"));
        assert!(store.calc_bkg_dir().ends_with("calcbkg"));
    }

    #[test]
    fn numbered_dirs_never_reuse_existing() {
        let temp = tempfile::tempdir().unwrap();
        let parent = Utf8PathBuf::from_path_buf(temp.path().join("maps")).unwrap();
        let first = Store::allocate_numbered_dir(&parent).unwrap();
        let second = Store::allocate_numbered_dir(&parent).unwrap();
        assert!(first.ends_with("maps/1"));
        assert!(second.ends_with("maps/2"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("nested/file.txt")).unwrap();
        Store::write_text_atomic(&path, "one").unwrap();
        Store::write_text_atomic(&path, "two").unwrap();
        assert_eq!(Store::read_text(&path).unwrap(), "two");
    }
}
