//! Per-module extraction seam. Format-specific extractors (mail stores and
//! the like) live outside the core and implement [`MetadataExtractor`];
//! file-change watching implements [`DirectoryWatcher`]. The built-in
//! filesystem module covers plain files and directories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::ontology::Ontology;

/// Service-row attributes gathered during extraction.
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    pub mime: Option<String>,
    pub size: i64,
    pub is_dir: bool,
    pub is_link: bool,
    pub offset: i64,
    pub mtime: i64,
    pub aux_id: i64,
}

/// Where the full text for the content blob comes from, if anywhere.
#[derive(Debug, Clone)]
pub enum FullTextSource {
    /// Stream the file itself through the text pipeline.
    FromFile(PathBuf),
    /// Extractor-supplied text (e.g. a decoded mail body).
    Inline(String),
}

#[derive(Debug, Default)]
pub struct Extraction {
    /// Service type name this entity belongs to.
    pub service_type: String,
    pub info: ServiceInfo,
    /// Ordered `(field name, value)` pairs.
    pub metadata: Vec<(String, String)>,
    pub full_text: Option<FullTextSource>,
}

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Module name as listed in the roster.
    fn module(&self) -> &str;

    /// Roots this module wants crawled.
    fn directories(&self) -> Vec<PathBuf>;

    async fn extract(&self, path: &Path) -> Result<Extraction>;
}

/// A filesystem change reported by a watcher backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
}

/// Inotify-equivalent backend; implementations push [`ChangeEvent`]s into
/// the sender they were constructed with.
pub trait DirectoryWatcher: Send + Sync {
    fn watch(&self, dir: &Path) -> Result<()>;
    fn unwatch(&self, dir: &Path);
}

fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") | Some("log") | Some("text") => "text/plain",
        Some("md") | Some("rst") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("xml") => "text/xml",
        Some("c") => "text/x-csrc",
        Some("h") => "text/x-chdr",
        Some("cpp") | Some("cc") | Some("cxx") => "text/x-c++src",
        Some("py") => "text/x-python",
        Some("rs") => "text/x-rust",
        Some("sh") => "application/x-shellscript",
        Some("pdf") => "application/pdf",
        Some("ps") => "application/postscript",
        Some("doc") => "application/msword",
        Some("odt") => "application/vnd.oasis.opendocument.text",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/x-wav",
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("desktop") => "application/x-desktop",
        _ => "application/octet-stream",
    }
}

/// The built-in `files` module: stat-based metadata plus full text for
/// text-like content.
pub struct FsExtractor {
    ontology: Arc<Ontology>,
    roots: Vec<PathBuf>,
}

impl FsExtractor {
    pub fn new(ontology: Arc<Ontology>, roots: Vec<PathBuf>) -> Self {
        FsExtractor { ontology, roots }
    }
}

#[async_trait]
impl MetadataExtractor for FsExtractor {
    fn module(&self) -> &str {
        "files"
    }

    fn directories(&self) -> Vec<PathBuf> {
        self.roots.clone()
    }

    async fn extract(&self, path: &Path) -> Result<Extraction> {
        let stat = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|_| Error::ExtractionFailed(path.display().to_string()))?;

        let is_link = stat.file_type().is_symlink();
        let is_dir = stat.is_dir();
        let mime = if is_dir {
            "inode/directory".to_string()
        } else {
            mime_from_extension(path).to_string()
        };
        let mtime = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut metadata = vec![
            ("File:Name".to_string(), name),
            ("File:Path".to_string(), parent),
            ("File:Mime".to_string(), mime.clone()),
            ("File:Size".to_string(), stat.len().to_string()),
            ("File:Modified".to_string(), mtime.to_string()),
        ];
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            metadata.push(("File:Ext".to_string(), ext.to_string()));
        }
        if is_link {
            if let Ok(target) = tokio::fs::read_link(path).await {
                metadata.push((
                    "File:Link".to_string(),
                    target.to_string_lossy().into_owned(),
                ));
            }
        }

        let service_type = if is_dir {
            "Folders".to_string()
        } else {
            self.ontology.service_by_mime(&mime)
        };

        let full_text = if !is_dir && !is_link && mime.starts_with("text/") {
            Some(FullTextSource::FromFile(path.to_path_buf()))
        } else {
            None
        };

        Ok(Extraction {
            service_type,
            info: ServiceInfo {
                mime: Some(mime),
                size: stat.len() as i64,
                is_dir,
                is_link,
                offset: 0,
                mtime,
                aux_id: 0,
            },
            metadata,
            full_text,
        })
    }
}

/// The module registry the indexer walks: roster order preserved.
pub type ExtractorMap = HashMap<String, Arc<dyn MetadataExtractor>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(roots: Vec<PathBuf>) -> FsExtractor {
        FsExtractor::new(Arc::new(Ontology::with_defaults()), roots)
    }

    #[tokio::test]
    async fn extracts_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello world hello").unwrap();

        let extraction = extractor(vec![]).extract(&path).await.unwrap();
        assert_eq!(extraction.service_type, "Text");
        assert!(!extraction.info.is_dir);
        assert_eq!(extraction.info.size, 17);

        let map: HashMap<_, _> = extraction.metadata.iter().cloned().collect();
        assert_eq!(map.get("File:Name").unwrap(), "notes.txt");
        assert_eq!(map.get("File:Mime").unwrap(), "text/plain");
        assert_eq!(map.get("File:Ext").unwrap(), "txt");
        assert!(matches!(
            extraction.full_text,
            Some(FullTextSource::FromFile(_))
        ));
    }

    #[tokio::test]
    async fn directories_resolve_to_folders() {
        let dir = tempfile::tempdir().unwrap();
        let extraction = extractor(vec![]).extract(dir.path()).await.unwrap();
        assert_eq!(extraction.service_type, "Folders");
        assert!(extraction.info.is_dir);
        assert!(extraction.full_text.is_none());
    }

    #[tokio::test]
    async fn missing_files_fail_extraction() {
        let err = extractor(vec![])
            .extract(Path::new("/no/such/file.txt"))
            .await;
        assert!(matches!(err, Err(Error::ExtractionFailed(_))));
    }

    #[tokio::test]
    async fn binary_files_have_no_full_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();

        let extraction = extractor(vec![]).extract(&path).await.unwrap();
        assert_eq!(extraction.service_type, "Images");
        assert!(extraction.full_text.is_none());
    }
}
