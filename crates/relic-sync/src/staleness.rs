use relic_core::time::system_time_ns;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Most recent modification instant (ns since the Unix epoch) of a file or subtree.
///
/// For a directory this is the maximum over every descendant, including the
/// subdirectories' own timestamps; an empty directory yields its own
/// timestamp. Symbolic links are never followed: a link contributes its own
/// timestamp.
pub fn last_modified(path: &Path) -> io::Result<i64> {
    let metadata = fs::symlink_metadata(path)?;
    let own = system_time_ns(metadata.modified()?);
    if !metadata.is_dir() {
        return Ok(own);
    }

    let mut latest: Option<i64> = None;
    for entry in WalkDir::new(path).follow_links(false).min_depth(1) {
        let entry = entry?;
        let mtime = system_time_ns(entry.metadata()?.modified()?);
        latest = Some(latest.map_or(mtime, |l| l.max(mtime)));
    }

    Ok(latest.unwrap_or(own))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn set_mtime(path: &Path, secs_after_epoch: u64) {
        let file = File::options().write(true).open(path).or_else(|_| File::open(path)).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
            .unwrap();
    }

    #[test]
    fn file_returns_its_own_mtime() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.las");
        fs::write(&file, b"x").unwrap();
        set_mtime(&file, 1_000);
        assert_eq!(last_modified(&file).unwrap(), 1_000 * 1_000_000_000);
    }

    #[test]
    fn empty_directory_returns_its_own_mtime() {
        let dir = tempdir().unwrap();
        let leaf = dir.path().join("leaf");
        fs::create_dir(&leaf).unwrap();
        set_mtime(&leaf, 500);
        assert_eq!(last_modified(&leaf).unwrap(), 500 * 1_000_000_000);
    }

    #[test]
    fn directory_takes_the_deepest_maximum() {
        let dir = tempdir().unwrap();
        let leaf = dir.path().join("leaf");
        let nested = leaf.join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        let shallow = leaf.join("top.txt");
        let deep = nested.join("deep.txt");
        fs::write(&shallow, b"1").unwrap();
        fs::write(&deep, b"2").unwrap();

        for (path, secs) in [
            (&shallow, 100),
            (&deep, 900),
            (&nested, 50),
            (&leaf.join("a/b"), 50),
            (&leaf.join("a"), 50),
            (&leaf, 2_000),
        ] {
            set_mtime(path, secs);
        }

        // the leaf's own timestamp is not part of the maximum
        assert_eq!(last_modified(&leaf).unwrap(), 900 * 1_000_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_terminate() {
        let dir = tempdir().unwrap();
        let leaf = dir.path().join("leaf");
        fs::create_dir(&leaf).unwrap();
        fs::write(leaf.join("f"), b"1").unwrap();
        std::os::unix::fs::symlink(&leaf, leaf.join("loop")).unwrap();
        assert!(last_modified(&leaf).unwrap() > 0);
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(last_modified(&dir.path().join("gone")).is_err());
    }
}
