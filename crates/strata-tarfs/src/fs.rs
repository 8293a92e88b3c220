//! The random-access tar filesystem

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use tracing::debug;

use crate::path::normalize;
use crate::TarFsError;

/// Longest symlink/hardlink chain followed before giving up
const MAX_LINK_DEPTH: usize = 32;

/// What kind of object an archive entry is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink(String),
    Hardlink(String),
    /// Devices, fifos, and anything else a scanner has no use for
    Other,
}

/// One indexed archive entry
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    offset: u64,
}

/// A read-only, symlink-resolving view of one layer's tar bytes
///
/// One pass over the archive builds the entry index; afterwards any file can
/// be read by seeking into the underlying reader. Later archive entries for
/// the same path override earlier ones, matching how a tar is extracted.
/// Whiteout entries appear as ordinary files; they are interpreted during
/// coalescing, not here.
pub struct TarFs<R> {
    reader: Mutex<R>,
    index: HashMap<String, Entry>,
    order: Vec<String>,
}

impl<R: Read + Seek> TarFs<R> {
    /// Index the archive. The reader must be positioned at the start of the
    /// decompressed tar stream.
    pub fn new(reader: R) -> Result<Self, TarFsError> {
        let mut archive = tar::Archive::new(reader);
        let mut index: HashMap<String, Entry> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        {
            let entries = archive
                .entries()
                .map_err(|e| TarFsError::Malformed(e.to_string()))?;
            for entry in entries {
                let entry = entry.map_err(|e| TarFsError::Malformed(e.to_string()))?;
                let raw = entry
                    .path()
                    .map_err(|e| TarFsError::Malformed(e.to_string()))?;
                let path = normalize(&raw.to_string_lossy());
                if path.is_empty() {
                    continue;
                }
                let header = entry.header();
                let kind = match header.entry_type() {
                    tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::File,
                    tar::EntryType::Directory => EntryKind::Directory,
                    tar::EntryType::Symlink => {
                        let target = entry
                            .link_name()
                            .map_err(|e| TarFsError::Malformed(e.to_string()))?
                            .ok_or_else(|| {
                                TarFsError::Malformed(format!("symlink {path:?} has no target"))
                            })?;
                        EntryKind::Symlink(target.to_string_lossy().into_owned())
                    }
                    tar::EntryType::Link => {
                        let target = entry
                            .link_name()
                            .map_err(|e| TarFsError::Malformed(e.to_string()))?
                            .ok_or_else(|| {
                                TarFsError::Malformed(format!("hardlink {path:?} has no target"))
                            })?;
                        // hardlink targets are archive-rooted
                        EntryKind::Hardlink(normalize(&target.to_string_lossy()))
                    }
                    _ => EntryKind::Other,
                };
                if index.insert(
                    path.clone(),
                    Entry {
                        path: path.clone(),
                        kind,
                        size: entry.size(),
                        offset: entry.raw_file_position(),
                    },
                ).is_none()
                {
                    order.push(path);
                }
            }
        }

        let reader = archive.into_inner();
        debug!(entries = order.len(), "indexed layer tar");
        Ok(Self {
            reader: Mutex::new(reader),
            index,
            order,
        })
    }

    /// All entry paths in archive order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Look up an entry without resolving a final symlink
    pub fn lookup(&self, path: &str) -> Option<&Entry> {
        self.index.get(&normalize(path))
    }

    /// A symlink's literal target, unresolved
    pub fn read_link(&self, path: &str) -> Result<String, TarFsError> {
        let normalized = normalize(path);
        match self.index.get(&normalized).map(|e| &e.kind) {
            Some(EntryKind::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(TarFsError::NotSymlink(normalized)),
            None => Err(TarFsError::NotFound(normalized)),
        }
    }

    /// Resolve a path through any symlinks along it, including a final one.
    ///
    /// Resolution never leaves the archive: absolute targets restart at the
    /// tar root and `..` clamps there. Chains longer than [`MAX_LINK_DEPTH`]
    /// and cycles are rejected.
    pub fn resolve(&self, path: &str) -> Result<String, TarFsError> {
        let normalized = normalize(path);
        let mut pending: Vec<String> = normalized.split('/').rev().map(String::from).collect();
        let mut out: Vec<String> = Vec::new();
        let mut depth = 0usize;

        while let Some(comp) = pending.pop() {
            match comp.as_str() {
                "" | "." => continue,
                ".." => {
                    out.pop();
                    continue;
                }
                _ => {}
            }
            out.push(comp);
            let current = out.join("/");
            let target = match self.index.get(&current).map(|e| &e.kind) {
                Some(EntryKind::Symlink(t)) => t.clone(),
                _ => continue,
            };
            depth += 1;
            if depth > MAX_LINK_DEPTH {
                return Err(TarFsError::LinkDepth(normalized));
            }
            out.pop();
            if target.starts_with('/') {
                out.clear();
            }
            for c in target.split('/').rev() {
                pending.push(c.to_string());
            }
        }
        Ok(out.join("/"))
    }

    /// Read a file's full contents, resolving symlinks and hardlinks.
    ///
    /// Repeated reads of the same path return identical bytes.
    pub fn open(&self, path: &str) -> Result<Vec<u8>, TarFsError> {
        let resolved = self.resolve(path)?;
        let mut entry = self
            .index
            .get(&resolved)
            .ok_or_else(|| TarFsError::NotFound(resolved.clone()))?;

        let mut depth = 0usize;
        while let EntryKind::Hardlink(target) = &entry.kind {
            depth += 1;
            if depth > MAX_LINK_DEPTH {
                return Err(TarFsError::LinkDepth(resolved));
            }
            entry = self
                .index
                .get(target)
                .ok_or_else(|| TarFsError::NotFound(target.clone()))?;
        }

        match entry.kind {
            EntryKind::File => {}
            EntryKind::Directory => return Err(TarFsError::IsDirectory(resolved)),
            _ => return Err(TarFsError::NotFound(resolved)),
        }

        let mut reader = self
            .reader
            .lock()
            .map_err(|_| TarFsError::Malformed("reader poisoned".into()))?;
        reader.seek(SeekFrom::Start(entry.offset))?;
        let mut buf = vec![0u8; entry.size as usize];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a file as UTF-8 text, lossily
    pub fn read_to_string(&self, path: &str) -> Result<String, TarFsError> {
        let bytes = self.open(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// True when the path resolves to an existing file or directory
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path)
            .ok()
            .map(|p| self.index.contains_key(&p))
            .unwrap_or(false)
    }

    /// Entry paths directly or transitively under a directory
    pub fn paths_under<'a>(&'a self, dir: &str) -> impl Iterator<Item = &'a str> {
        let prefix = format!("{}/", normalize(dir));
        self.order
            .iter()
            .map(|s| s.as_str())
            .filter(move |p| p.starts_with(&prefix))
    }
}
