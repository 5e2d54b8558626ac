//! Filesystem walker support: the ignore rules applied to every discovered
//! path, asynchronous directory enumeration, and crawl statistics.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::CrawlingConfig;

/// Whole basenames that are never indexed.
const IGNORED_NAMES: &[&str] = &[
    "po",
    "CVS",
    "Makefile",
    "SCCS",
    "ltmain.sh",
    "libtool",
    "config.status",
    "conftest",
    "confdefs.h",
];

const IGNORED_SUFFIXES: &[&str] = &[
    "~", ".o", ".la", ".lo", ".loT", ".in", ".csproj", ".m4", ".rej", ".gmo", ".orig", ".pc",
    ".omf", ".aux", ".tmp", ".po", ".vmdk", ".vmx", ".vmxf", ".vmsd", ".nvram", ".part",
];

const IGNORED_PREFIXES: &[&str] = &["autom4te", "conftest.", "confstat", "config."];

pub struct Crawler {
    patterns: GlobSet,
    exclude_dirs: Vec<PathBuf>,
    temp_black_list: Mutex<HashSet<String>>,
    tmp_dir: PathBuf,

    dirs_in_progress: AtomicU32,
    files_found: AtomicU32,
    files_ignored: AtomicU32,
    timer: Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl Crawler {
    pub fn new(config: &CrawlingConfig) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignored_patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => tracing::warn!("bad ignore pattern '{pattern}': {e}"),
            }
        }
        let patterns = builder.build().unwrap_or_else(|e| {
            tracing::warn!("ignore patterns unusable: {e}");
            GlobSet::empty()
        });

        Crawler {
            patterns,
            exclude_dirs: config.exclude_dirs.clone(),
            temp_black_list: Mutex::new(HashSet::new()),
            tmp_dir: std::env::temp_dir(),
            dirs_in_progress: AtomicU32::new(0),
            files_found: AtomicU32::new(0),
            files_ignored: AtomicU32::new(0),
            timer: Mutex::new(None),
        }
    }

    /// Blacklist a basename for the rest of this run.
    pub fn blacklist(&self, basename: &str) {
        self.temp_black_list
            .lock()
            .unwrap()
            .insert(basename.to_string());
    }

    pub fn should_ignore(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        if path_str.is_empty() {
            return true;
        }

        for prefix in ["/proc/", "/dev/", "/tmp/"] {
            if path_str.starts_with(prefix) {
                return true;
            }
        }
        if path.starts_with(&self.tmp_dir) {
            return true;
        }
        if self.exclude_dirs.iter().any(|d| path.starts_with(d)) {
            return true;
        }

        let Some(basename) = path.file_name().and_then(|n| n.to_str()) else {
            return true;
        };
        if basename.starts_with('.') {
            return true;
        }
        if IGNORED_NAMES.contains(&basename) {
            return true;
        }
        if self.temp_black_list.lock().unwrap().contains(basename) {
            return true;
        }
        if IGNORED_SUFFIXES.iter().any(|s| basename.ends_with(s)) {
            return true;
        }
        if IGNORED_PREFIXES.iter().any(|p| basename.starts_with(p)) {
            return true;
        }
        if self.patterns.is_match(basename) {
            return true;
        }

        false
    }

    /// Enumerate the children of `dir`, applying the ignore rules and
    /// updating the crawl counters. Symlinks are not followed.
    pub async fn enumerate_directory(&self, dir: &Path) -> Vec<CrawlEntry> {
        self.dirs_crawling_increment();

        let mut entries = Vec::new();
        match tokio::fs::read_dir(dir).await {
            Ok(mut reader) => loop {
                match reader.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        if self.should_ignore(&path) {
                            self.files_ignored.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!("ignored: {}", path.display());
                            continue;
                        }
                        self.files_found.fetch_add(1, Ordering::Relaxed);
                        let is_dir = entry
                            .file_type()
                            .await
                            .map(|t| t.is_dir())
                            .unwrap_or(false);
                        entries.push(CrawlEntry { path, is_dir });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("error reading {}: {e}", dir.display());
                        break;
                    }
                }
            },
            Err(e) => {
                tracing::info!("cannot enumerate {}: {e}", dir.display());
            }
        }

        self.dirs_crawling_decrement();
        entries
    }

    fn dirs_crawling_increment(&self) {
        if self.dirs_in_progress.fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::info!("starting to crawl file system");
            *self.timer.lock().unwrap() = Some(Instant::now());
            self.files_found.store(0, Ordering::Relaxed);
            self.files_ignored.store(0, Ordering::Relaxed);
        }
    }

    fn dirs_crawling_decrement(&self) {
        if self.dirs_in_progress.fetch_sub(1, Ordering::SeqCst) == 1 {
            let elapsed = self
                .timer
                .lock()
                .unwrap()
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or_default();
            tracing::info!(
                "finished crawling files in {elapsed:.4} seconds, {} found, {} ignored",
                self.files_found.load(Ordering::Relaxed),
                self.files_ignored.load(Ordering::Relaxed)
            );
        }
    }

    pub fn files_found(&self) -> u32 {
        self.files_found.load(Ordering::Relaxed)
    }

    pub fn files_ignored(&self) -> u32 {
        self.files_ignored.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawler() -> Crawler {
        Crawler::new(&CrawlingConfig::default())
    }

    #[test]
    fn system_prefixes_are_ignored() {
        let c = crawler();
        assert!(c.should_ignore(Path::new("/proc/1234/fd")));
        assert!(c.should_ignore(Path::new("/dev/sda")));
        assert!(c.should_ignore(Path::new("/tmp/scratch.txt")));
        assert!(!c.should_ignore(Path::new("/home/u/notes.txt")));
    }

    #[test]
    fn dot_files_are_ignored() {
        let c = crawler();
        assert!(c.should_ignore(Path::new("/home/u/.bashrc")));
        assert!(!c.should_ignore(Path::new("/home/u/bashrc")));
    }

    #[test]
    fn ignored_names_match_exactly() {
        let c = crawler();
        for name in IGNORED_NAMES {
            assert!(
                c.should_ignore(&Path::new("/home/u").join(name)),
                "{name} should be ignored"
            );
        }
        // near misses are accepted
        assert!(!c.should_ignore(Path::new("/home/u/Makefiles")));
        assert!(!c.should_ignore(Path::new("/home/u/xpo")));
    }

    #[test]
    fn ignored_suffixes_and_near_misses() {
        let c = crawler();
        for suffix in IGNORED_SUFFIXES {
            let path = format!("/home/u/file{suffix}");
            assert!(c.should_ignore(Path::new(&path)), "{path} should be ignored");
        }
        assert!(!c.should_ignore(Path::new("/home/u/file.obj")));
        assert!(!c.should_ignore(Path::new("/home/u/file.lart")));
        assert!(!c.should_ignore(Path::new("/home/u/parts")));
    }

    #[test]
    fn ignored_prefixes_and_near_misses() {
        let c = crawler();
        for prefix in IGNORED_PREFIXES {
            let path = format!("/home/u/{prefix}xyz");
            assert!(c.should_ignore(Path::new(&path)), "{path} should be ignored");
        }
        assert!(!c.should_ignore(Path::new("/home/u/configure")));
        assert!(!c.should_ignore(Path::new("/home/u/conftests")));
    }

    #[test]
    fn configured_patterns_apply() {
        let config = CrawlingConfig {
            ignored_patterns: vec!["*.iso".to_string()],
            ..CrawlingConfig::default()
        };
        let c = Crawler::new(&config);
        assert!(c.should_ignore(Path::new("/home/u/disk.iso")));
        assert!(!c.should_ignore(Path::new("/home/u/disk.img")));
    }

    #[test]
    fn temp_blacklist_is_dynamic() {
        let c = crawler();
        assert!(!c.should_ignore(Path::new("/home/u/volatile.txt")));
        c.blacklist("volatile.txt");
        assert!(c.should_ignore(Path::new("/home/u/volatile.txt")));
    }

    #[test]
    fn excluded_dirs_prune_subtrees() {
        let config = CrawlingConfig {
            exclude_dirs: vec![PathBuf::from("/home/u/secret")],
            ..CrawlingConfig::default()
        };
        let c = Crawler::new(&config);
        assert!(c.should_ignore(Path::new("/home/u/secret/plans.txt")));
        assert!(!c.should_ignore(Path::new("/home/u/public/plans.txt")));
    }

    #[tokio::test]
    async fn enumeration_filters_and_counts() {
        // not under /tmp: paths there are ignored by the system-prefix rule
        let dir = tempfile::tempdir_in(".").unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("keep.txt"), "x").unwrap();
        std::fs::write(root.join("skip.o"), "x").unwrap();
        std::fs::write(root.join(".hidden"), "x").unwrap();

        let c = crawler();
        let entries = c.enumerate_directory(&root).await;

        let mut names: Vec<String> = entries
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["keep.txt", "sub"]);
        assert!(entries.iter().any(|e| e.is_dir));
        assert_eq!(c.files_found(), 2);
        assert_eq!(c.files_ignored(), 2);
    }
}
