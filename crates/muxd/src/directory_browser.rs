//! Directory browser for the session-creation picker: given a path (with
//! `~` expansion), return its immediate child directories, hidden entries
//! excluded, sorted case-insensitive.

use std::path::{Path, PathBuf};

pub struct Listing {
  pub path: String,
  pub directories: Vec<String>,
  pub error: Option<String>,
}

fn expand_home(path: &str) -> PathBuf {
  if let Some(rest) = path.strip_prefix('~')
    && (rest.is_empty() || rest.starts_with('/'))
  {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
    return PathBuf::from(home).join(rest.trim_start_matches('/'));
  }
  PathBuf::from(path)
}

#[must_use]
pub fn list(requested: &str) -> Listing {
  let path = expand_home(requested);
  match read_child_directories(&path) {
    Ok(directories) => Listing {
      path: path.display().to_string(),
      directories,
      error: None,
    },
    Err(err) => Listing {
      path: path.display().to_string(),
      directories: Vec::new(),
      error: Some(err.to_string()),
    },
  }
}

fn read_child_directories(path: &Path) -> std::io::Result<Vec<String>> {
  let mut dirs = Vec::new();
  for entry in std::fs::read_dir(path)? {
    let entry = entry?;
    if !entry.file_type()?.is_dir() {
      continue;
    }
    let name = entry.file_name().to_string_lossy().into_owned();
    if name.starts_with('.') {
      continue;
    }
    dirs.push(name);
  }
  dirs.sort_by_key(|n| n.to_lowercase());
  Ok(dirs)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lists_child_directories_excluding_hidden() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("zeta")).unwrap();
    std::fs::create_dir(dir.path().join("Alpha")).unwrap();
    std::fs::create_dir(dir.path().join(".hidden")).unwrap();
    std::fs::write(dir.path().join("file.txt"), "x").unwrap();

    let listing = list(dir.path().to_str().unwrap());
    assert_eq!(listing.directories, vec!["Alpha".to_string(), "zeta".to_string()]);
    assert!(listing.error.is_none());
  }

  #[test]
  fn missing_path_reports_error() {
    let listing = list("/definitely/does/not/exist/anywhere");
    assert!(listing.error.is_some());
  }
}
