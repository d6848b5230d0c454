//! Full-copy tree walker.
//!
//! Symlinks are followed. The walk uses an explicit stack; each frame carries
//! the `(dev, ino)` chain of its ancestors so a link back to an ancestor is
//! reported as a cycle while two links to the same sibling tree are not.

use std::fs::{self, File, Metadata};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use backupd_core::{BackupItem, ItemKind};

use crate::error::{io_err, source_err, SyncError};
use crate::report::{CopyStats, ItemWarning, WarningKind};

/// Deepest directory nesting a single item may have.
pub const MAX_DEPTH: usize = 256;

type DirId = (u64, u64);

/// What a single item copy produced. Item-level failures come back as `Err`,
/// with [`SyncError::Source`] when the item itself cannot be read; problems
/// with nested entries are collected in `warnings`.
#[derive(Debug, Default)]
pub(crate) struct TreeCopy {
    pub stats: CopyStats,
    pub warnings: Vec<ItemWarning>,
}

struct Frame {
    src: PathBuf,
    dst: PathBuf,
    ancestors: Vec<DirId>,
}

/// Copy a probed item to `dst`, replacing whatever is there with the same
/// name. Contents of an existing destination directory that have no source
/// counterpart are left alone.
pub(crate) fn copy_item(item: &BackupItem, dst: &Path) -> Result<TreeCopy, SyncError> {
    match item.kind {
        ItemKind::File => {
            let meta = fs::metadata(&item.path).map_err(|e| source_err(&item.path, e))?;
            copy_file(&item.path, &meta, dst).map_err(|e| e.into_sync(&item.path))?;
            Ok(TreeCopy {
                stats: CopyStats { files: 1, dirs: 0 },
                warnings: Vec::new(),
            })
        }
        ItemKind::Directory => copy_tree(&item.path, dst),
    }
}

fn copy_tree(src_root: &Path, dst_root: &Path) -> Result<TreeCopy, SyncError> {
    let mut out = TreeCopy::default();
    let mut stack = vec![Frame {
        src: src_root.to_path_buf(),
        dst: dst_root.to_path_buf(),
        ancestors: Vec::new(),
    }];

    while let Some(frame) = stack.pop() {
        let meta = fs::metadata(&frame.src).map_err(|e| source_err(&frame.src, e))?;
        let id = (meta.dev(), meta.ino());
        if frame.ancestors.contains(&id) {
            return Err(SyncError::CopyCycle { path: frame.src });
        }
        if frame.ancestors.len() >= MAX_DEPTH {
            return Err(SyncError::TooDeep {
                path: src_root.to_path_buf(),
                limit: MAX_DEPTH,
            });
        }

        // An unreadable directory leaves nothing behind in the destination.
        let entries = match fs::read_dir(&frame.src) {
            Ok(entries) => entries,
            Err(err) if frame.ancestors.is_empty() => return Err(source_err(&frame.src, err)),
            Err(err) => {
                out.warnings.push(ItemWarning::from_source_error(&frame.src, &err));
                continue;
            }
        };

        ensure_dir(&frame.dst)?;
        out.stats.dirs += 1;

        let mut ancestors = frame.ancestors;
        ancestors.push(id);

        let mut children = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => children.push(entry.file_name()),
                Err(err) => out
                    .warnings
                    .push(ItemWarning::from_source_error(&frame.src, &err)),
            }
        }
        children.sort();

        for name in children {
            let src = frame.src.join(&name);
            let dst = frame.dst.join(&name);
            match fs::metadata(&src) {
                Ok(meta) if meta.is_dir() => stack.push(Frame {
                    src,
                    dst,
                    ancestors: ancestors.clone(),
                }),
                Ok(meta) if meta.is_file() => match copy_file(&src, &meta, &dst) {
                    Ok(()) => out.stats.files += 1,
                    Err(FileCopyError::Source(err)) => {
                        out.warnings.push(ItemWarning::from_source_error(&src, &err))
                    }
                    Err(FileCopyError::Dest(path, err)) => out.warnings.push(ItemWarning::new(
                        path,
                        WarningKind::CopyFailed,
                        err.to_string(),
                    )),
                },
                Ok(_) => out.warnings.push(ItemWarning::new(
                    src,
                    WarningKind::SourceUnreadable,
                    "not a regular file or directory",
                )),
                // Dangling symlinks land here as NotFound.
                Err(err) => out.warnings.push(ItemWarning::from_source_error(&src, &err)),
            }
        }
    }

    Ok(out)
}

enum FileCopyError {
    Source(io::Error),
    Dest(PathBuf, io::Error),
}

impl FileCopyError {
    fn into_sync(self, src: &Path) -> SyncError {
        match self {
            FileCopyError::Source(err) => source_err(src, err),
            FileCopyError::Dest(path, err) => io_err(path, err),
        }
    }
}

/// Copy one regular file, preserving permission bits and mtime.
fn copy_file(src: &Path, meta: &Metadata, dst: &Path) -> Result<(), FileCopyError> {
    let dest_err = |e| FileCopyError::Dest(dst.to_path_buf(), e);

    let mut reader = File::open(src).map_err(FileCopyError::Source)?;

    match fs::symlink_metadata(dst) {
        Ok(existing) if existing.is_dir() => fs::remove_dir_all(dst).map_err(dest_err)?,
        Ok(existing) if existing.file_type().is_symlink() || existing.permissions().readonly() => {
            fs::remove_file(dst).map_err(dest_err)?
        }
        _ => {}
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(dest_err)?;
    }

    let mut writer = File::create(dst).map_err(dest_err)?;
    io::copy(&mut reader, &mut writer).map_err(dest_err)?;
    drop(writer);

    fs::set_permissions(dst, meta.permissions()).map_err(dest_err)?;
    filetime::set_file_mtime(dst, FileTime::from_last_modification_time(meta)).map_err(dest_err)?;
    Ok(())
}

/// Make `dst` a real directory, replacing a file or symlink of the same name.
fn ensure_dir(dst: &Path) -> Result<(), SyncError> {
    match fs::symlink_metadata(dst) {
        Ok(existing) if existing.is_dir() => return Ok(()),
        Ok(_) => fs::remove_file(dst).map_err(|e| io_err(dst, e))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(dst, err)),
    }
    fs::create_dir_all(dst).map_err(|e| io_err(dst, e))
}
