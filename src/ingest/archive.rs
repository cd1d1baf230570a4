use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

use super::enumerate::ImageEntry;

/// Copies one file. Split out so copy behaviour can be observed in tests.
pub trait FileCopier {
    fn copy(&mut self, src: &Path, dst: &Path) -> io::Result<()>;
}

/// Byte-for-byte copy that keeps permissions and access/modification times.
///
/// Times are set through the handle that wrote the bytes and permissions are
/// applied last, so a read-only source still archives on every platform.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetadataPreservingCopier;

impl FileCopier for MetadataPreservingCopier {
    fn copy(&mut self, src: &Path, dst: &Path) -> io::Result<()> {
        let mut reader = File::open(src)?;
        let meta = reader.metadata()?;
        let mut writer = File::create(dst)?;
        io::copy(&mut reader, &mut writer)?;
        let mut times = FileTimes::new().set_modified(meta.modified()?);
        if let Ok(accessed) = meta.accessed() {
            times = times.set_accessed(accessed);
        }
        writer.set_times(times)?;
        writer.set_permissions(meta.permissions())?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Copied,
    AlreadyPresent,
}

/// Raw archive keyed by original file name.
pub struct ContentStore<C: FileCopier = MetadataPreservingCopier> {
    root: PathBuf,
    copier: C,
}

impl ContentStore<MetadataPreservingCopier> {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self::with_copier(root, MetadataPreservingCopier)
    }
}

impl<C: FileCopier> ContentStore<C> {
    pub fn with_copier<P: Into<PathBuf>>(root: P, copier: C) -> Self {
        Self {
            root: root.into(),
            copier,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn copier(&self) -> &C {
        &self.copier
    }

    /// Archive destination for a file name.
    pub fn destination(&self, file_name: &OsStr) -> PathBuf {
        self.root.join(file_name)
    }

    /// Copy `entry` into the archive unless a file of that name is already there.
    pub fn archive(&mut self, entry: &ImageEntry) -> Result<(PathBuf, ArchiveOutcome)> {
        let dst = self.destination(&entry.os_name);
        if dst.exists() {
            log::debug!("archive hit: {}", dst.display());
            return Ok((dst, ArchiveOutcome::AlreadyPresent));
        }
        fs::create_dir_all(&self.root).with_context(|| {
            format!("failed to create archive folder {}", self.root.display())
        })?;
        self.copier.copy(&entry.path, &dst).with_context(|| {
            format!(
                "failed to archive {} to {}",
                entry.path.display(),
                dst.display()
            )
        })?;
        log::debug!("archived {} -> {}", entry.path.display(), dst.display());
        Ok((dst, ArchiveOutcome::Copied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingCopier {
        copies: usize,
    }

    impl FileCopier for CountingCopier {
        fn copy(&mut self, src: &Path, dst: &Path) -> io::Result<()> {
            self.copies += 1;
            fs::copy(src, dst).map(|_| ())
        }
    }

    #[test]
    fn archive_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("in").join("a.jpg");
        fs::create_dir_all(src.parent().unwrap())?;
        fs::write(&src, b"pixels")?;
        let entry = ImageEntry::from_path(src)?;

        let mut store = ContentStore::with_copier(dir.path().join("raw_all"), CountingCopier::default());
        let (first, outcome) = store.archive(&entry)?;
        assert_eq!(outcome, ArchiveOutcome::Copied);
        let (second, outcome) = store.archive(&entry)?;
        assert_eq!(outcome, ArchiveOutcome::AlreadyPresent);

        assert_eq!(first, second);
        assert_eq!(store.copier().copies, 1);
        assert_eq!(fs::read_dir(store.root())?.count(), 1);
        assert_eq!(fs::read(first)?, b"pixels");
        Ok(())
    }

    #[test]
    fn existing_destination_is_never_overwritten() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let raw = dir.path().join("raw_all");
        fs::create_dir_all(&raw)?;
        fs::write(raw.join("a.jpg"), b"old")?;
        let src = dir.path().join("a.jpg");
        fs::write(&src, b"new")?;

        let mut store = ContentStore::new(&raw);
        let (path, outcome) = store.archive(&ImageEntry::from_path(src)?)?;
        assert_eq!(outcome, ArchiveOutcome::AlreadyPresent);
        assert_eq!(fs::read(path)?, b"old");
        Ok(())
    }

    #[test]
    fn copy_preserves_modification_time() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("a.png");
        fs::write(&src, b"png")?;
        let past = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        File::options()
            .write(true)
            .open(&src)?
            .set_times(FileTimes::new().set_modified(past))?;

        let mut store = ContentStore::new(dir.path().join("raw_all"));
        let (dst, _) = store.archive(&ImageEntry::from_path(src)?)?;
        assert_eq!(fs::metadata(dst)?.modified()?, past);
        Ok(())
    }

    #[test]
    fn read_only_source_archives_with_its_metadata() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("locked.jpg");
        fs::write(&src, b"jpeg")?;
        let past = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(2_000_000);
        File::options()
            .write(true)
            .open(&src)?
            .set_times(FileTimes::new().set_modified(past))?;
        let mut perms = fs::metadata(&src)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(&src, perms)?;

        let mut store = ContentStore::new(dir.path().join("raw_all"));
        let (dst, outcome) = store.archive(&ImageEntry::from_path(src)?)?;
        assert_eq!(outcome, ArchiveOutcome::Copied);
        assert_eq!(fs::read(&dst)?, b"jpeg");
        let meta = fs::metadata(&dst)?;
        assert_eq!(meta.modified()?, past);
        assert!(meta.permissions().readonly());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_archive_to_distinct_files() -> Result<()> {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in");
        fs::create_dir_all(&input)?;
        let first = input.join(OsStr::from_bytes(b"look\xff.jpg"));
        let second = input.join(OsStr::from_bytes(b"look\xfe.jpg"));
        fs::write(&first, b"first")?;
        fs::write(&second, b"second")?;

        let first = ImageEntry::from_path(first)?;
        let second = ImageEntry::from_path(second)?;
        assert_eq!(first.file_name, second.file_name);

        let mut store = ContentStore::new(dir.path().join("raw_all"));
        let (a, outcome_a) = store.archive(&first)?;
        let (b, outcome_b) = store.archive(&second)?;
        assert_eq!(outcome_a, ArchiveOutcome::Copied);
        assert_eq!(outcome_b, ArchiveOutcome::Copied);
        assert_ne!(a, b);
        assert_eq!(fs::read(a)?, b"first");
        assert_eq!(fs::read(b)?, b"second");
        Ok(())
    }

    #[test]
    fn missing_source_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let entry = ImageEntry::from_path(dir.path().join("ghost.jpg"))?;
        let mut store = ContentStore::new(dir.path().join("raw_all"));
        assert!(store.archive(&entry).is_err());
        Ok(())
    }
}
