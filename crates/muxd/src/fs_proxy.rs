//! File CRUD scoped to a session's project root.
//!
//! Every operation resolves the requested path and rejects it unless the
//! canonical result lies inside the project root. Thin external-collaborator
//! contract per the interface spec, implemented defensively since it's the
//! one surface that takes untrusted paths directly from clients.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Resolve `requested` against `root`, refusing anything that escapes it.
fn confine(root: &Path, requested: &str) -> Result<PathBuf> {
  let candidate = root.join(requested.trim_start_matches('/'));
  let root_canon = root.canonicalize().context("resolve project root")?;

  let resolved = if candidate.exists() {
    candidate.canonicalize().context("resolve requested path")?
  } else {
    let parent = candidate.parent().unwrap_or(root).to_path_buf();
    let parent_canon = parent.canonicalize().unwrap_or(parent);
    parent_canon.join(candidate.file_name().unwrap_or_default())
  };

  if resolved == root_canon || resolved.starts_with(root_canon.join("")) {
    Ok(resolved)
  } else {
    bail!("outside project")
  }
}

pub fn browse(root: &Path, requested: &str) -> Result<Vec<String>> {
  let path = confine(root, requested)?;
  let mut entries = Vec::new();
  for entry in fs::read_dir(&path).context("read directory")? {
    let entry = entry.context("read directory entry")?;
    let name = entry.file_name().to_string_lossy().into_owned();
    if name.starts_with('.') {
      continue;
    }
    entries.push(name);
  }
  entries.sort_by_key(|n| n.to_lowercase());
  Ok(entries)
}

pub fn read(root: &Path, requested: &str) -> Result<String> {
  let path = confine(root, requested)?;
  let meta = fs::metadata(&path).context("stat file")?;
  if meta.len() > MAX_FILE_BYTES {
    bail!("file too large");
  }
  fs::read_to_string(&path).context("read file")
}

pub fn write(root: &Path, requested: &str, content: &str) -> Result<()> {
  if content.len() as u64 > MAX_FILE_BYTES {
    bail!("file too large");
  }
  let path = confine(root, requested)?;
  fs::write(&path, content).context("write file")
}

pub fn create_file(root: &Path, requested: &str) -> Result<()> {
  let path = confine(root, requested)?;
  if path.exists() {
    bail!("already exists");
  }
  fs::write(&path, []).context("create file")
}

pub fn create_directory(root: &Path, requested: &str) -> Result<()> {
  let path = confine(root, requested)?;
  fs::create_dir_all(&path).context("create directory")
}

pub fn rename(root: &Path, from: &str, to: &str) -> Result<()> {
  let root_canon = root.canonicalize().context("resolve project root")?;
  let from_path = confine(root, from)?;
  if from_path == root_canon {
    bail!("cannot rename project root");
  }
  let to_path = confine(root, to)?;
  if to_path.exists() {
    bail!("refusing to overwrite existing target");
  }
  fs::rename(&from_path, &to_path).context("rename")
}

pub fn delete(root: &Path, requested: &str) -> Result<()> {
  let root_canon = root.canonicalize().context("resolve project root")?;
  let path = confine(root, requested)?;
  if path == root_canon {
    bail!("cannot delete project root");
  }
  if path.is_dir() {
    fs::remove_dir_all(&path).context("delete directory")
  } else {
    fs::remove_file(&path).context("delete file")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_path_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let err = read(dir.path(), "../../etc/passwd").unwrap_err();
    assert!(err.to_string().contains("outside project"));
  }

  #[test]
  fn round_trips_write_then_read() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "notes.txt", "hello").unwrap();
    assert_eq!(read(dir.path(), "notes.txt").unwrap(), "hello");
  }

  #[test]
  fn rejects_oversized_write() {
    let dir = tempfile::tempdir().unwrap();
    let huge = "x".repeat(MAX_FILE_BYTES as usize + 1);
    let err = write(dir.path(), "big.txt", &huge).unwrap_err();
    assert!(err.to_string().contains("too large"));
  }

  #[test]
  fn refuses_to_delete_project_root() {
    let dir = tempfile::tempdir().unwrap();
    let err = delete(dir.path(), "").unwrap_err();
    assert!(err.to_string().contains("project root"));
  }

  #[test]
  fn refuses_to_overwrite_on_rename() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "a").unwrap();
    fs::write(dir.path().join("b.txt"), "b").unwrap();
    let err = rename(dir.path(), "a.txt", "b.txt").unwrap_err();
    assert!(err.to_string().contains("overwrite"));
  }
}
