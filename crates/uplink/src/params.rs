use std::fs;
use std::io;
use std::path::PathBuf;

/// File-per-key store for the handful of values that must survive the
/// process: `LastAthenaPingTime` (connectivity health signal for the
/// supervisor) and `DongleId`.
#[derive(Debug, Clone)]
pub struct Params {
    root: PathBuf,
}

impl Params {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.root.join(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Write via tmp + rename so a crash never leaves a torn value.
    pub fn put(&self, key: &str, value: &str) -> io::Result<()> {
        let tmp = self.root.join(format!(".{key}.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, self.root.join(key))
    }

    /// Removing an absent key is not an error.
    pub fn delete(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.root.join(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
