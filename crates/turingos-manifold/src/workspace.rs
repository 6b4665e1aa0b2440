//! Workspace-confined file access.
//!
//! Pointer parsing already rejects absolute paths and `..` segments; this
//! module additionally resolves symlinks and refuses anything whose real
//! location is outside the workspace root.

use std::path::{Path, PathBuf};

use crate::error::ManifoldError;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    /// Relative paths (files or directories) agents may read but never write.
    protected: Vec<String>,
}

impl Workspace {
    /// Create (if needed) and canonicalize `root`.
    pub fn open(root: impl AsRef<Path>, protected: Vec<String>) -> Result<Self, ManifoldError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| ManifoldError::io(&root.display().to_string(), e))?;
        let root = root
            .canonicalize()
            .map_err(|e| ManifoldError::io(&root.display().to_string(), e))?;
        Ok(Self { root, protected })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn confine(&self, pointer: &str, candidate: &Path) -> Result<(), ManifoldError> {
        if candidate.starts_with(&self.root) {
            Ok(())
        } else {
            Err(ManifoldError::AccessDenied {
                pointer: pointer.to_string(),
                reason: "resolves outside the workspace".into(),
            })
        }
    }

    fn is_protected(&self, rel: &str) -> bool {
        let rel = rel.trim().trim_start_matches("./");
        self.protected.iter().any(|p| {
            let p = p.trim_end_matches('/');
            rel == p || rel.starts_with(&format!("{p}/"))
        })
    }

    /// Read a file, or list a directory.
    pub fn read(&self, rel: &str) -> Result<String, ManifoldError> {
        let joined = self.root.join(rel.trim());
        let real = joined.canonicalize().map_err(|e| ManifoldError::io(rel, e))?;
        self.confine(rel, &real)?;
        if real.is_dir() {
            return self.list(rel, &real);
        }
        std::fs::read_to_string(&real).map_err(|e| ManifoldError::io(rel, e))
    }

    fn list(&self, rel: &str, dir: &Path) -> Result<String, ManifoldError> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map_err(|e| ManifoldError::io(rel, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();
        Ok(format!("[DIR] {}\n{}", rel.trim(), names.join("\n")))
    }

    /// Overwrite (or create) a file, creating parent directories.
    pub fn write(&self, rel: &str, payload: &str) -> Result<(), ManifoldError> {
        let rel = rel.trim();
        if self.is_protected(rel) {
            return Err(ManifoldError::AccessDenied {
                pointer: rel.to_string(),
                reason: "path is kernel-owned".into(),
            });
        }
        let joined = self.root.join(rel);
        let parent = joined
            .parent()
            .ok_or_else(|| ManifoldError::NotWritable(rel.to_string()))?;
        std::fs::create_dir_all(parent).map_err(|e| ManifoldError::io(rel, e))?;
        let real_parent = parent.canonicalize().map_err(|e| ManifoldError::io(rel, e))?;
        self.confine(rel, &real_parent)?;
        if joined.is_dir() {
            return Err(ManifoldError::NotWritable(rel.to_string()));
        }
        // A symlink at the leaf could still point outside.
        if let Ok(real) = joined.canonicalize() {
            self.confine(rel, &real)?;
        }
        std::fs::write(&joined, payload).map_err(|e| ManifoldError::io(rel, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace(dir: &TempDir) -> Workspace {
        Workspace::open(dir.path(), vec![".halt-standard.lock.json".into(), ".turingos".into()])
            .unwrap()
    }

    #[test]
    fn write_then_read() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        ws.write("out/result.txt", "42").unwrap();
        assert_eq!(ws.read("out/result.txt").unwrap(), "42");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            workspace(&dir).read("nope.txt"),
            Err(ManifoldError::NotFound(_))
        ));
    }

    #[test]
    fn directories_are_listed() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        ws.write("b.txt", "").unwrap();
        ws.write("a/x.txt", "").unwrap();
        let listing = ws.read(".").unwrap();
        assert_eq!(listing, "[DIR] .\na/\nb.txt");
    }

    #[test]
    fn protected_paths_refuse_writes() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        let err = ws.write(".halt-standard.lock.json", "{}").unwrap_err();
        assert!(err.to_string().starts_with("EACCES"));
        assert!(ws.write(".turingos/capabilities.json", "{}").is_err());
        assert!(ws.write(".turingos_notes.md", "ok").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_refused() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        assert!(matches!(
            ws.read("link/secret.txt"),
            Err(ManifoldError::AccessDenied { .. })
        ));
        assert!(ws.write("link/new.txt", "x").is_err());
    }
}
