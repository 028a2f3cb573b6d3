use std::io::{self, Write};
use std::path::Path;

/// Ensure the parent directory of `p` exists.
pub fn ensure_parent_dir(p: &Path) -> io::Result<()> {
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Replace `p` with `contents` through a temp file in the same directory, so
/// readers never observe a half-written file.
pub fn write_atomic(p: &Path, contents: &[u8]) -> io::Result<()> {
    ensure_parent_dir(p)?;
    let dir = match p.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(p).map_err(|e| e.error)?;
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(p: &Path) -> io::Result<bool> {
    match std::fs::remove_file(p) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join("a").join("b").join("config.json");
        write_atomic(&p, b"one").expect("first write");
        write_atomic(&p, b"two").expect("second write");
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "two");
        let leftovers: Vec<_> = std::fs::read_dir(p.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(leftovers.len(), 1, "temp file left behind: {leftovers:?}");
    }

    #[test]
    fn test_remove_if_exists() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join("x");
        assert!(!remove_if_exists(&p).unwrap());
        std::fs::write(&p, "1").unwrap();
        assert!(remove_if_exists(&p).unwrap());
        assert!(!p.exists());
    }
}
