// Small text files on disk.
// Writes go through a temp file and rename so readers never see a partial file.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Write text atomically, creating parent directories as needed.
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Read a text file, `None` if it does not exist.
pub fn read_text(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)?;
    Ok(Some(contents))
}

/// Delete a file if present.
pub fn delete(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_text() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("token");

        write_text(&path, "gho_abc").unwrap();
        assert_eq!(read_text(&path).unwrap(), Some("gho_abc".to_string()));
        assert!(!path.with_extension("tmp").exists());

        delete(&path).unwrap();
        assert!(read_text(&path).unwrap().is_none());
    }

    #[test]
    fn test_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.json");
        assert!(read_text(&path).unwrap().is_none());
        assert!(delete(&path).is_ok());
    }
}
