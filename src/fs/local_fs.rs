//! A direct pass-through to the real filesystem, for the demonstration
//! binary and any embedder that wants the interpreter to read/write actual
//! project files rather than the sandboxed [`InMemoryFs`](super::InMemoryFs).
//! `mod.rs` already anticipates a non-memory backend ("OverlayFs ...
//! future"); this is the plain version of that idea, with no copy-on-write
//! layer.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;

use super::types::{CpOptions, DirentEntry, FileSystem, FsError, FsStat, MkdirOptions, RmOptions};

#[derive(Debug, Clone, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

fn map_err(err: std::io::Error, path: &str, operation: &str) -> FsError {
    match err.kind() {
        std::io::ErrorKind::NotFound => FsError::NotFound { path: path.to_string(), operation: operation.to_string() },
        std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists { path: path.to_string(), operation: operation.to_string() },
        std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied { path: path.to_string(), operation: operation.to_string() },
        _ => FsError::Other { message: format!("{operation} '{path}': {err}") },
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    async fn read_file(&self, path: &str) -> Result<String, FsError> {
        tokio::fs::read_to_string(path).await.map_err(|e| map_err(e, path, "read"))
    }

    async fn read_file_buffer(&self, path: &str) -> Result<Vec<u8>, FsError> {
        tokio::fs::read(path).await.map_err(|e| map_err(e, path, "read"))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| map_err(e, path, "write"))?;
        }
        tokio::fs::write(path, content).await.map_err(|e| map_err(e, path, "write"))
    }

    async fn append_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new().append(true).create(true).open(path).await.map_err(|e| map_err(e, path, "append"))?;
        file.write_all(content).await.map_err(|e| map_err(e, path, "append"))
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn stat(&self, path: &str) -> Result<FsStat, FsError> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| map_err(e, path, "stat"))?;
        Ok(to_fs_stat(&meta))
    }

    async fn lstat(&self, path: &str) -> Result<FsStat, FsError> {
        let meta = tokio::fs::symlink_metadata(path).await.map_err(|e| map_err(e, path, "lstat"))?;
        Ok(to_fs_stat(&meta))
    }

    async fn mkdir(&self, path: &str, options: &MkdirOptions) -> Result<(), FsError> {
        if options.recursive {
            tokio::fs::create_dir_all(path).await
        } else {
            tokio::fs::create_dir(path).await
        }
        .map_err(|e| map_err(e, path, "mkdir"))
    }

    async fn readdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let mut entries = tokio::fs::read_dir(path).await.map_err(|e| map_err(e, path, "readdir"))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_err(e, path, "readdir"))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn readdir_with_file_types(&self, path: &str) -> Result<Vec<DirentEntry>, FsError> {
        let mut entries = tokio::fs::read_dir(path).await.map_err(|e| map_err(e, path, "readdir"))?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_err(e, path, "readdir"))? {
            let file_type = entry.file_type().await.map_err(|e| map_err(e, path, "readdir"))?;
            out.push(DirentEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_file: file_type.is_file(),
                is_directory: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn rm(&self, path: &str, options: &RmOptions) -> Result<(), FsError> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && options.force => return Ok(()),
            Err(e) => return Err(map_err(e, path, "rm")),
        };
        let result = if meta.is_dir() && options.recursive {
            tokio::fs::remove_dir_all(path).await
        } else if meta.is_dir() {
            tokio::fs::remove_dir(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if options.force && e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_err(e, path, "rm")),
        }
    }

    async fn cp(&self, src: &str, dest: &str, options: &CpOptions) -> Result<(), FsError> {
        let meta = tokio::fs::metadata(src).await.map_err(|e| map_err(e, src, "cp"))?;
        if meta.is_dir() {
            if !options.recursive {
                return Err(FsError::IsDirectory { path: src.to_string(), operation: "cp".to_string() });
            }
            copy_dir_recursive(src, dest).await.map_err(|e| map_err(e, src, "cp"))
        } else {
            tokio::fs::copy(src, dest).await.map(|_| ()).map_err(|e| map_err(e, src, "cp"))
        }
    }

    async fn mv(&self, src: &str, dest: &str) -> Result<(), FsError> {
        tokio::fs::rename(src, dest).await.map_err(|e| map_err(e, src, "mv"))
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await.map_err(|e| map_err(e, path, "chmod"))
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            Ok(())
        }
    }

    async fn symlink(&self, target: &str, link_path: &str) -> Result<(), FsError> {
        #[cfg(unix)]
        {
            tokio::fs::symlink(target, link_path).await.map_err(|e| map_err(e, link_path, "symlink"))
        }
        #[cfg(not(unix))]
        {
            Err(FsError::Other { message: "symlinks unsupported on this platform".to_string() })
        }
    }

    async fn link(&self, existing_path: &str, new_path: &str) -> Result<(), FsError> {
        tokio::fs::hard_link(existing_path, new_path).await.map_err(|e| map_err(e, new_path, "link"))
    }

    async fn readlink(&self, path: &str) -> Result<String, FsError> {
        tokio::fs::read_link(path).await.map(|p| p.to_string_lossy().into_owned()).map_err(|e| map_err(e, path, "readlink"))
    }

    async fn realpath(&self, path: &str) -> Result<String, FsError> {
        tokio::fs::canonicalize(path).await.map(|p| p.to_string_lossy().into_owned()).map_err(|e| map_err(e, path, "realpath"))
    }

    async fn utimes(&self, path: &str, mtime: SystemTime) -> Result<(), FsError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| map_err(e, path, "utimes"))?;
        file.set_modified(mtime).await.map_err(|e| map_err(e, path, "utimes"))
    }

    fn resolve_path(&self, base: &str, path: &str) -> String {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return normalize(candidate);
        }
        normalize(&Path::new(base).join(candidate))
    }

    fn get_all_paths(&self) -> Vec<String> {
        Vec::new()
    }
}

fn normalize(path: &Path) -> String {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().into_owned()
}

fn to_fs_stat(meta: &std::fs::Metadata) -> FsStat {
    FsStat {
        is_file: meta.is_file(),
        is_directory: meta.is_dir(),
        is_symlink: meta.file_type().is_symlink(),
        #[cfg(unix)]
        mode: {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        },
        #[cfg(not(unix))]
        mode: 0,
        size: meta.len(),
        mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    }
}

fn copy_dir_recursive<'a>(src: &'a str, dest: &'a str) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(dest).await?;
        let mut entries = tokio::fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let child_src = entry.path();
            let child_dest = Path::new(dest).join(entry.file_name());
            if file_type.is_dir() {
                copy_dir_recursive(&child_src.to_string_lossy(), &child_dest.to_string_lossy()).await?;
            } else {
                tokio::fs::copy(&child_src, &child_dest).await?;
            }
        }
        Ok(())
    })
}
