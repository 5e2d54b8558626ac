//! In-memory catalogue of service types and metadata fields for the life of
//! the process, plus MIME -> service and directory -> service resolution.

pub mod defaults;
pub mod loader;
pub mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub use types::{CollationKey, DbKind, Field, FieldKind, ServiceType};

use loader::{parse_field_file, parse_service_file, ServiceDescription};

pub struct Ontology {
    services_by_name: HashMap<CollationKey, Arc<ServiceType>>,
    services_by_id: HashMap<i32, Arc<ServiceType>>,
    fields_by_name: HashMap<CollationKey, Arc<Field>>,
    fields_by_id: HashMap<i32, Arc<Field>>,
    mime_service: HashMap<String, i32>,
    /// Scanned linearly when a MIME has no exact match; first prefix wins.
    mime_prefixes: Vec<(String, i32)>,
    /// `(path, service_name)` assignments, consulted by descending-prefix
    /// match.
    dir_services: RwLock<Vec<(PathBuf, String)>>,
    /// Xesam name -> native field names.
    xesam_fields: HashMap<CollationKey, Vec<String>>,
    /// Xesam class -> native service name.
    xesam_services: HashMap<CollationKey, String>,
}

impl Ontology {
    /// Load every `*.service` / `*.metadata` description file in `dir`,
    /// falling back to the embedded defaults when none are found. Unreadable
    /// files are logged and skipped.
    pub fn load(dir: &Path) -> Self {
        let mut services = Vec::new();
        let mut fields = Vec::new();

        if let Ok(entries) = std::fs::read_dir(dir) {
            let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
            paths.sort();

            for path in paths {
                let ext = path.extension().and_then(|e| e.to_str());
                let text = match std::fs::read_to_string(&path) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!("cannot read description file {}: {e}", path.display());
                        continue;
                    }
                };
                match ext {
                    Some("service") => services.extend(parse_service_file(&text)),
                    Some("metadata") => fields.extend(parse_field_file(&text)),
                    _ => {}
                }
            }
        }

        if services.is_empty() {
            services = parse_service_file(defaults::DEFAULT_SERVICES);
        }
        if fields.is_empty() {
            fields = parse_field_file(defaults::DEFAULT_FIELDS);
        }

        Self::from_descriptions(services, fields)
    }

    pub fn with_defaults() -> Self {
        Self::from_descriptions(
            parse_service_file(defaults::DEFAULT_SERVICES),
            parse_field_file(defaults::DEFAULT_FIELDS),
        )
    }

    pub fn from_descriptions(descriptions: Vec<ServiceDescription>, fields: Vec<Field>) -> Self {
        let mut ontology = Ontology {
            services_by_name: HashMap::new(),
            services_by_id: HashMap::new(),
            fields_by_name: HashMap::new(),
            fields_by_id: HashMap::new(),
            mime_service: HashMap::new(),
            mime_prefixes: Vec::new(),
            dir_services: RwLock::new(Vec::new()),
            xesam_fields: HashMap::new(),
            xesam_services: HashMap::new(),
        };

        let mut next_service_id = 1;
        for desc in descriptions {
            let mut service = desc.service;
            service.id = next_service_id;
            next_service_id += 1;

            let service = Arc::new(service);
            for mime in desc.mimes {
                ontology.mime_service.insert(mime, service.id);
            }
            for prefix in desc.mime_prefixes {
                ontology.mime_prefixes.push((prefix, service.id));
            }
            ontology
                .services_by_name
                .insert(CollationKey::new(&service.name), Arc::clone(&service));
            ontology.services_by_id.insert(service.id, service);
        }

        let mut next_field_id = 1;
        for mut field in fields {
            field.id = next_field_id;
            next_field_id += 1;

            let field = Arc::new(field);
            ontology
                .fields_by_name
                .insert(CollationKey::new(&field.name), Arc::clone(&field));
            ontology.fields_by_id.insert(field.id, field);
        }

        for (xesam, natives) in defaults::DEFAULT_XESAM_FIELDS {
            ontology.xesam_fields.insert(
                CollationKey::new(xesam),
                natives.iter().map(|s| s.to_string()).collect(),
            );
        }
        for (xesam, native) in defaults::DEFAULT_XESAM_SERVICES {
            ontology
                .xesam_services
                .insert(CollationKey::new(xesam), native.to_string());
        }

        ontology
    }

    pub fn service_by_name(&self, name: &str) -> Option<Arc<ServiceType>> {
        self.services_by_name
            .get(&CollationKey::new(name))
            .cloned()
    }

    pub fn service_by_id(&self, id: i32) -> Option<Arc<ServiceType>> {
        self.services_by_id.get(&id).cloned()
    }

    pub fn service_id_by_name(&self, name: &str) -> Option<i32> {
        self.service_by_name(name).map(|s| s.id)
    }

    pub fn service_name_by_id(&self, id: i32) -> Option<String> {
        self.service_by_id(id).map(|s| s.name.clone())
    }

    pub fn is_valid_service(&self, name: &str) -> bool {
        self.service_by_name(name).is_some()
    }

    pub fn service_parent(&self, name: &str) -> Option<String> {
        let service = self.service_by_name(name)?;
        if service.parent.is_empty() {
            None
        } else {
            Some(service.parent.clone())
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceType>> {
        self.services_by_id.values()
    }

    pub fn fields(&self) -> impl Iterator<Item = &Arc<Field>> {
        self.fields_by_id.values()
    }

    /// Exact MIME map first, then the ordered prefix list, else `"Other"`.
    pub fn service_by_mime(&self, mime: &str) -> String {
        if let Some(id) = self.mime_service.get(mime) {
            if let Some(name) = self.service_name_by_id(*id) {
                return name;
            }
        }
        for (prefix, id) in &self.mime_prefixes {
            if mime.starts_with(prefix.as_str()) {
                if let Some(name) = self.service_name_by_id(*id) {
                    return name;
                }
            }
        }
        "Other".to_string()
    }

    pub fn add_directory_service(&self, path: impl Into<PathBuf>, service: impl Into<String>) {
        let mut dirs = self.dir_services.write().unwrap();
        dirs.push((path.into(), service.into()));
        // longest prefix first
        dirs.sort_by(|a, b| b.0.as_os_str().len().cmp(&a.0.as_os_str().len()));
    }

    pub fn remove_directory_service(&self, path: &Path) {
        self.dir_services.write().unwrap().retain(|(p, _)| p != path);
    }

    /// Descending-prefix match over the directory assignments.
    pub fn service_for_directory(&self, path: &Path) -> Option<String> {
        let dirs = self.dir_services.read().unwrap();
        dirs.iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, service)| service.clone())
    }

    pub fn field_def(&self, name: &str) -> Option<Arc<Field>> {
        self.fields_by_name.get(&CollationKey::new(name)).cloned()
    }

    pub fn field_by_id(&self, id: i32) -> Option<Arc<Field>> {
        self.fields_by_id.get(&id).cloned()
    }

    pub fn field_id(&self, name: &str) -> Option<i32> {
        self.field_def(name).map(|f| f.id)
    }

    /// A field's own id plus the ids of every field that lists it as a
    /// parent (aliases).
    pub fn related_field_ids(&self, name: &str) -> Vec<i32> {
        let mut ids = Vec::new();
        if let Some(field) = self.field_def(name) {
            ids.push(field.id);
        }
        let key = CollationKey::new(name);
        for field in self.fields_by_id.values() {
            if field
                .parents
                .iter()
                .any(|p| CollationKey::new(p) == key)
            {
                ids.push(field.id);
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Native field names a Xesam field reference expands to. Unmapped names
    /// fall through to themselves when registered natively.
    pub fn xesam_field_names(&self, name: &str) -> Vec<String> {
        if let Some(natives) = self.xesam_fields.get(&CollationKey::new(name)) {
            return natives.clone();
        }
        if self.field_def(name).is_some() {
            return vec![name.to_string()];
        }
        Vec::new()
    }

    pub fn xesam_service_name(&self, name: &str) -> Option<String> {
        if let Some(native) = self.xesam_services.get(&CollationKey::new(name)) {
            return Some(native.clone());
        }
        self.service_by_name(name).map(|s| s.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_id_lookups_agree() {
        let ontology = Ontology::with_defaults();
        for service in ontology.services() {
            let by_name = ontology.service_by_name(&service.name).unwrap();
            assert_eq!(by_name.id, service.id);
            let by_id = ontology.service_by_id(service.id).unwrap();
            assert_eq!(by_id.name, service.name);
        }
        for field in ontology.fields() {
            assert_eq!(ontology.field_id(&field.name), Some(field.id));
            assert_eq!(
                ontology.field_by_id(field.id).unwrap().name,
                field.name
            );
        }
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let ontology = Ontology::with_defaults();
        assert_eq!(
            ontology.service_id_by_name("files"),
            ontology.service_id_by_name("Files")
        );
        assert!(ontology.field_def("file:mime").is_some());
    }

    #[test]
    fn mime_resolution() {
        let ontology = Ontology::with_defaults();
        assert_eq!(ontology.service_by_mime("inode/directory"), "Folders");
        assert_eq!(ontology.service_by_mime("application/pdf"), "Documents");
        // prefix match
        assert_eq!(ontology.service_by_mime("image/x-xcf"), "Images");
        // no match at all
        assert_eq!(ontology.service_by_mime("chemical/x-pdb"), "Other");
    }

    #[test]
    fn directory_assignment_prefers_longest_prefix() {
        let ontology = Ontology::with_defaults();
        ontology.add_directory_service("/home/u", "Files");
        ontology.add_directory_service("/home/u/.evolution", "EvolutionEmails");

        assert_eq!(
            ontology.service_for_directory(Path::new("/home/u/.evolution/mail/inbox")),
            Some("EvolutionEmails".to_string())
        );
        assert_eq!(
            ontology.service_for_directory(Path::new("/home/u/docs")),
            Some("Files".to_string())
        );
        assert_eq!(
            ontology.service_for_directory(Path::new("/var/tmp")),
            None
        );
    }

    #[test]
    fn alias_expansion_includes_children() {
        let ontology = Ontology::with_defaults();
        let name_ids = ontology.related_field_ids("File:Name");
        let own = ontology.field_id("File:Name").unwrap();
        let child = ontology.field_id("Email:Subject").unwrap();
        assert!(name_ids.contains(&own));
        assert!(name_ids.contains(&child));
    }

    #[test]
    fn loads_description_files_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("custom.service"),
            "[Notes]\nDatabase=file\nEnabled=true\nMimes=application/x-note\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("custom.metadata"),
            "[Note:Tag]\nDataType=Keyword\nWeight=5\n",
        )
        .unwrap();

        let ontology = Ontology::load(dir.path());
        assert!(ontology.service_by_name("Notes").is_some());
        assert_eq!(ontology.service_by_mime("application/x-note"), "Notes");
        assert_eq!(
            ontology.field_def("Note:Tag").unwrap().kind,
            FieldKind::Keyword
        );
    }

    #[test]
    fn missing_directory_falls_back_to_defaults() {
        let ontology = Ontology::load(Path::new("/no/such/ontology/dir"));
        assert!(ontology.service_by_name("Files").is_some());
    }

    #[test]
    fn xesam_maps_resolve() {
        let ontology = Ontology::with_defaults();
        assert_eq!(
            ontology.xesam_field_names("xesam:mimeType"),
            vec!["File:Mime".to_string()]
        );
        // native names pass through
        assert_eq!(
            ontology.xesam_field_names("File:Size"),
            vec!["File:Size".to_string()]
        );
        assert_eq!(
            ontology.xesam_service_name("xesam:Image"),
            Some("Images".to_string())
        );
        assert!(ontology.xesam_service_name("NoSuchClass").is_none());
    }
}
