//! ZIP bundling for full backups.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

use super::BackupError;

/// Name of the SQL dump inside a full backup archive.
pub const DUMP_ENTRY: &str = "database.sql";
/// Prefix of the uploaded files inside a full backup archive.
pub const UPLOADS_PREFIX: &str = "uploads";

/// Writes `dest` containing the dump and, when given, the uploads directory.
/// Returns the number of files written.
pub fn create_archive(dump: &Path, uploads: Option<&Path>, dest: &Path) -> Result<usize, BackupError> {
    let mut zip = ZipWriter::new(File::create(dest)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(DUMP_ENTRY, options)?;
    io::copy(&mut File::open(dump)?, &mut zip)?;
    let mut files = 1;

    if let Some(uploads) = uploads.filter(|p| p.is_dir()) {
        zip.add_directory(format!("{UPLOADS_PREFIX}/"), options)?;
        files += add_dir(&mut zip, uploads, UPLOADS_PREFIX, options)?;
    }
    zip.finish()?;
    Ok(files)
}

fn add_dir(
    zip: &mut ZipWriter<File>,
    dir: &Path,
    prefix: &str,
    options: FileOptions,
) -> Result<usize, BackupError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    let mut files = 0;
    for entry in entries {
        let name = format!("{prefix}/{}", entry.file_name().to_string_lossy());
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
            files += add_dir(zip, &path, &name, options)?;
        } else {
            zip.start_file(name, options)?;
            io::copy(&mut File::open(&path)?, zip)?;
            files += 1;
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn bundles_dump_and_nested_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("dump.sql");
        fs::write(&dump, "CREATE TABLE t();").unwrap();
        let uploads = dir.path().join("uploads");
        fs::create_dir_all(uploads.join("photos")).unwrap();
        fs::write(uploads.join("readme.txt"), "hi").unwrap();
        fs::write(uploads.join("photos/site.jpg"), [0xff, 0xd8]).unwrap();

        let dest = dir.path().join("backup.zip");
        let files = create_archive(&dump, Some(&uploads), &dest).unwrap();
        assert_eq!(files, 3);

        let mut archive = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut sql = String::new();
        archive
            .by_name(DUMP_ENTRY)
            .unwrap()
            .read_to_string(&mut sql)
            .unwrap();
        assert_eq!(sql, "CREATE TABLE t();");
        assert!(archive.by_name("uploads/readme.txt").is_ok());
        assert!(archive.by_name("uploads/photos/site.jpg").is_ok());
    }

    #[test]
    fn missing_uploads_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("dump.sql");
        fs::write(&dump, "-- empty").unwrap();
        let dest = dir.path().join("backup.zip");
        let files = create_archive(&dump, Some(&dir.path().join("nope")), &dest).unwrap();
        assert_eq!(files, 1);
    }
}
