//! Shared secret guarding the `/__admin` routes.

use anyhow::{Context as _, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use subtle::ConstantTimeEq;
use tracing::info;

const KEY_BYTES: usize = 32;

#[derive(Clone)]
pub struct AdminKey(String);

impl std::fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminKey(..)")
    }
}

impl AdminKey {
    /// Reads the key at `path`, generating and persisting a new one when the
    /// file does not exist yet.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read admin key {}", path.display()))?;
            let key = raw.trim();
            if key.is_empty() {
                anyhow::bail!("Admin key file {} is empty", path.display());
            }
            return Ok(Self(key.to_string()));
        }

        let key = Self::generate();
        write_private(path, key.0.as_bytes())?;
        info!(path = %path.display(), "Generated new admin key");
        Ok(key)
    }

    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; KEY_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented key.
    #[must_use]
    pub fn verify(&self, provided: &str) -> bool {
        self.0.as_bytes().ct_eq(provided.as_bytes()).into()
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to create admin key {}", path.display()))?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create_new(path)
        .with_context(|| format!("Failed to create admin key {}", path.display()))?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("aniways-{name}-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn generated_key_is_persisted_and_reloaded() {
        let dir = scratch_dir("admin-key");
        let path = dir.join("tmp").join("admin.key");

        let first = AdminKey::load_or_create(&path).unwrap();
        assert_eq!(first.as_str().len(), KEY_BYTES * 2);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));

        let second = AdminKey::load_or_create(&path).unwrap();
        assert_eq!(first.as_str(), second.as_str());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn verify_requires_exact_match() {
        let key = AdminKey::generate();
        assert!(key.verify(key.as_str()));
        assert!(!key.verify(""));
        assert!(!key.verify(&key.as_str().to_uppercase().replace(char::is_numeric, "z")));

        let mut last_flipped = key.as_str().to_string();
        let last = last_flipped.pop().unwrap();
        last_flipped.push(if last == '0' { '1' } else { '0' });
        assert!(!key.verify(&last_flipped));
        assert!(!key.verify(&format!("{}0", key.as_str())));
        assert!(!key.verify(&key.as_str()[..KEY_BYTES]));
    }
}
