//! Rename that tolerates an existing destination.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::RngCore;

/// Move `src` to `dest`, replacing `dest` if it exists.
///
/// Where the platform refuses to rename over an existing file, the old
/// destination is first moved to a backup name and restored if the second
/// rename fails.
pub fn rename_over_existing(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if refused_because_dest_exists(&e, dest) => rename_with_backup(src, dest),
        Err(e) => Err(e),
    }
}

fn refused_because_dest_exists(err: &io::Error, dest: &Path) -> bool {
    // rename(2) refuses to replace a non-empty directory
    err.kind() == io::ErrorKind::AlreadyExists
        || dest.is_dir()
        || (err.kind() == io::ErrorKind::PermissionDenied && cfg!(windows) && dest.exists())
}

pub(crate) fn rename_with_backup(src: &Path, dest: &Path) -> io::Result<()> {
    let backup = backup_path(dest);
    fs::rename(dest, &backup)?;

    if let Err(e) = fs::rename(src, dest) {
        if let Err(restore) = fs::rename(&backup, dest) {
            tracing::warn!(
                "Could not restore {} from {}: {}",
                dest.display(),
                backup.display(),
                restore
            );
        }
        return Err(e);
    }

    let removed = if backup.is_dir() {
        fs::remove_dir_all(&backup)
    } else {
        fs::remove_file(&backup)
    };
    if let Err(e) = removed {
        tracing::debug!("Leaving backup {}: {}", backup.display(), e);
    }
    Ok(())
}

fn backup_path(dest: &Path) -> PathBuf {
    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);
    let mut name = OsString::from(dest.as_os_str());
    name.push(format!(".bak-{}", hex::encode(suffix)));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn renames_into_empty_slot() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a");
        let dest = temp.path().join("b");
        fs::write(&src, "new").unwrap();

        rename_over_existing(&src, &dest).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
    }

    #[test]
    fn replaces_existing_file() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a");
        let dest = temp.path().join("b");
        fs::write(&src, "new").unwrap();
        fs::write(&dest, "old").unwrap();

        rename_over_existing(&src, &dest).unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
    }

    #[test]
    fn replaces_existing_directory() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("incoming");
        let dest = temp.path().join("data");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("new.txt"), "new").unwrap();
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("old.txt"), "old").unwrap();

        rename_over_existing(&src, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("new.txt")).unwrap(), "new");
        assert!(!dest.join("old.txt").exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn backup_sequence_leaves_no_backup_behind() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a");
        let dest = temp.path().join("b");
        fs::write(&src, "new").unwrap();
        fs::write(&dest, "old").unwrap();

        rename_with_backup(&src, &dest).unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bak-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn backup_sequence_restores_on_failure() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("missing");
        let dest = temp.path().join("b");
        fs::write(&dest, "old").unwrap();

        assert!(rename_with_backup(&src, &dest).is_err());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "old");
    }

    #[test]
    fn backup_names_are_unique() {
        let dest = Path::new("/tmp/state.yml");
        let a = backup_path(dest);
        let b = backup_path(dest);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().starts_with("/tmp/state.yml.bak-"));
    }
}
