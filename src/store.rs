// store - persisting the outputs of an exchange.
use log::{debug, warn};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::common::{KexError, Result};

/// The three persisted strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifacts {
    /// Private scalar, decimal.
    pub private: String,
    /// Decimal (DH) or `{'x': X, 'y': Y}` (ECDH).
    pub public: String,
    /// SHA-256 digest of the shared value, lowercase hex.
    pub shared: String,
}

pub trait ArtifactSink {
    fn store(&mut self, artifacts: &Artifacts) -> Result<()>;
}

/// Writes `<name>.priv`, `<name>.pub` and `<name>.shared` into a directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
    name: String,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            dir: dir.into(),
            name: name.to_owned(),
        }
    }

    pub fn path(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, ext))
    }

    /// Remove files written earlier in a failed run. Returns how many are
    /// left behind.
    fn roll_back<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> usize {
        let mut left = 0;
        for path in paths {
            match fs::remove_file(path) {
                Ok(()) => debug!("removed {}", path.display()),
                Err(e) => {
                    warn!("cannot remove partial artifact {}: {}", path.display(), e);
                    left += 1;
                }
            }
        }
        left
    }

    fn write(path: &Path, contents: &str) -> Result<()> {
        fs::write(path, contents).map_err(|source| KexError::Persist {
            path: path.to_owned(),
            source,
        })
    }
}

impl ArtifactSink for FileStore {
    /// Either all three files are written or none is left behind.
    fn store(&mut self, artifacts: &Artifacts) -> Result<()> {
        let files = [
            (self.path("priv"), &artifacts.private),
            (self.path("pub"), &artifacts.public),
            (self.path("shared"), &artifacts.shared),
        ];
        for (i, (path, contents)) in files.iter().enumerate() {
            if let Err(e) = Self::write(path, contents) {
                Self::roll_back(files[..i].iter().map(|(written, _)| written));
                return Err(e);
            }
            debug!("wrote {}", path.display());
        }
        Ok(())
    }
}

/// Keeps artifacts in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub stored: Vec<Artifacts>,
}

impl ArtifactSink for MemorySink {
    fn store(&mut self, artifacts: &Artifacts) -> Result<()> {
        self.stored.push(artifacts.clone());
        Ok(())
    }
}

#[cfg(test)]
fn scratch_dir(tag: &str) -> PathBuf {
    use rand::RngCore;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let dir = std::env::temp_dir().join(format!(
        "kex-{}-{:016x}",
        tag,
        ChaCha20Rng::from_entropy().next_u64()
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
fn sample() -> Artifacts {
    Artifacts {
        private: "6".to_owned(),
        public: "8".to_owned(),
        shared: "d4735e3a265e16eee03f59718b9b5d03019c07d8b6c51f90da3a666eec13ab35".to_owned(),
    }
}

#[test]
fn test_file_store_layout() {
    let dir = scratch_dir("layout");
    let mut store = FileStore::new(&dir, "server");
    store.store(&sample()).unwrap();
    assert_eq!(fs::read_to_string(dir.join("server.priv")).unwrap(), "6");
    assert_eq!(fs::read_to_string(dir.join("server.pub")).unwrap(), "8");
    assert_eq!(
        fs::read_to_string(dir.join("server.shared")).unwrap(),
        sample().shared
    );
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_file_store_missing_dir() {
    let dir = scratch_dir("missing").join("does-not-exist");
    let mut store = FileStore::new(&dir, "client");
    assert!(matches!(
        store.store(&sample()),
        Err(KexError::Persist { .. })
    ));
    assert!(!dir.join("client.priv").exists());
}

#[test]
fn test_file_store_rolls_back() {
    let dir = scratch_dir("rollback");
    // A directory where the .pub file should go makes the second write fail.
    fs::create_dir_all(dir.join("client.pub")).unwrap();
    let mut store = FileStore::new(&dir, "client");
    assert!(store.store(&sample()).is_err());
    assert!(!dir.join("client.priv").exists());
    assert!(!dir.join("client.shared").exists());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_roll_back_reports_leftovers() {
    let dir = scratch_dir("leftover");
    let file = dir.join("client.priv");
    let stuck = dir.join("client.pub");
    fs::write(&file, "6").unwrap();
    // remove_file refuses directories.
    fs::create_dir_all(&stuck).unwrap();
    assert_eq!(FileStore::roll_back([&file, &stuck]), 1);
    assert!(!file.exists());
    assert!(stuck.exists());
    assert_eq!(FileStore::roll_back([&file]), 1);
    fs::remove_dir_all(&dir).unwrap();
}
