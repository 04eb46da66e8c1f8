use std::fs::File;
use std::io::{self, Cursor};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::{ExtendedFileOptions, FileOptions};
use zip::ZipWriter;

use crate::error::Result;

/// Zips a directory tree into memory. Entry names are relative to `dir`,
/// optionally placed under `prefix/` (the module proxy protocol requires
/// `<module-path>@<version>/…` prefixes). Dotfiles are skipped.
pub fn zip_directory(dir: &Path, prefix: Option<&str>) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options: FileOptions<'_, ExtendedFileOptions> = FileOptions::default();

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| {
            !e.file_name()
                .to_str()
                .is_some_and(|name| name.starts_with('.'))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let relative = entry
            .path()
            .strip_prefix(dir)
            .expect("walked entries live under dir");
        let name = match prefix {
            Some(prefix) => format!("{prefix}/{}", relative.display()),
            None => relative.display().to_string(),
        };
        writer.start_file(name, options.clone())?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut writer)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use zip::ZipArchive;

    #[test]
    fn zips_with_a_version_prefix() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("main.go"), "package main").unwrap();
        fs::write(dir.path().join("sub/util.go"), "package sub").unwrap();
        fs::write(dir.path().join(".hidden"), "skip me").unwrap();

        let bytes = zip_directory(dir.path(), Some("example.com/m@v0.0.0-dev")).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"example.com/m@v0.0.0-dev/main.go".to_string()));
        assert!(names.contains(&"example.com/m@v0.0.0-dev/sub/util.go".to_string()));
        assert!(!names.iter().any(|n| n.contains(".hidden")));
    }
}
