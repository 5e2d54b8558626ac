//! Owns the canonical set of databases, their on-disk paths and tuning
//! profiles, the attach topology, and first-run schema bootstrap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::interface::{DbInterface, TuningProfile};
use crate::db::{procedures, schema, Param};
use crate::error::{Error, Result};
use crate::ontology::{DbKind, Ontology};

pub const PAGE_SIZE_DEFAULT: i64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Database {
    Common,
    Cache,
    FileMeta,
    FileContents,
    EmailMeta,
    EmailContents,
    WordIndex,
    Xesam,
}

#[derive(Debug, Clone, Copy)]
enum Location {
    DataDir,
    UserDataDir,
    SysTmpDir,
}

struct Definition {
    db: Database,
    file: &'static str,
    name: &'static str,
    location: Location,
    cache_size: i64,
    page_size: Option<i64>,
    scalar_functions: bool,
    uncompress_function: bool,
    schema: &'static str,
    triggers: Option<&'static str>,
}

const DEFINITIONS: &[Definition] = &[
    Definition {
        db: Database::Common,
        file: "common.db",
        name: "common",
        location: Location::UserDataDir,
        cache_size: 32,
        page_size: Some(PAGE_SIZE_DEFAULT),
        scalar_functions: false,
        uncompress_function: false,
        schema: schema::COMMON_SCHEMA,
        triggers: None,
    },
    Definition {
        db: Database::Cache,
        file: "cache.db",
        name: "cache",
        location: Location::SysTmpDir,
        cache_size: 128,
        page_size: None,
        scalar_functions: false,
        uncompress_function: false,
        schema: schema::CACHE_SCHEMA,
        triggers: None,
    },
    Definition {
        db: Database::FileMeta,
        file: "file-meta.db",
        name: "file-meta",
        location: Location::DataDir,
        cache_size: 512,
        page_size: Some(PAGE_SIZE_DEFAULT),
        scalar_functions: true,
        uncompress_function: false,
        schema: schema::META_SCHEMA,
        triggers: Some(schema::META_TRIGGERS),
    },
    Definition {
        db: Database::FileContents,
        file: "file-contents.db",
        name: "file-contents",
        location: Location::DataDir,
        cache_size: 1024,
        page_size: Some(PAGE_SIZE_DEFAULT),
        scalar_functions: false,
        uncompress_function: true,
        schema: schema::CONTENTS_SCHEMA,
        triggers: None,
    },
    Definition {
        db: Database::EmailMeta,
        file: "email-meta.db",
        name: "email-meta",
        location: Location::DataDir,
        cache_size: 512,
        page_size: Some(PAGE_SIZE_DEFAULT),
        scalar_functions: true,
        uncompress_function: false,
        schema: schema::META_SCHEMA,
        triggers: Some(schema::META_TRIGGERS),
    },
    Definition {
        db: Database::EmailContents,
        file: "email-contents.db",
        name: "email-contents",
        location: Location::DataDir,
        cache_size: 512,
        page_size: Some(PAGE_SIZE_DEFAULT),
        scalar_functions: false,
        uncompress_function: true,
        schema: schema::CONTENTS_SCHEMA,
        triggers: None,
    },
    Definition {
        db: Database::WordIndex,
        file: "word-index.db",
        name: "word-index",
        location: Location::DataDir,
        cache_size: 512,
        page_size: Some(PAGE_SIZE_DEFAULT),
        scalar_functions: false,
        uncompress_function: false,
        schema: schema::WORD_INDEX_SCHEMA,
        triggers: None,
    },
    Definition {
        db: Database::Xesam,
        file: "xesam.db",
        name: "xesam",
        location: Location::DataDir,
        cache_size: 128,
        page_size: None,
        scalar_functions: false,
        uncompress_function: false,
        schema: schema::XESAM_SCHEMA,
        triggers: None,
    },
];

#[derive(Debug, Clone)]
pub struct DbPaths {
    pub data_dir: PathBuf,
    pub user_data_dir: PathBuf,
    pub sys_tmp_dir: PathBuf,
}

impl DbPaths {
    /// All three locations under one root; used by tests and simple setups.
    pub fn single_dir(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        DbPaths {
            data_dir: root.clone(),
            user_data_dir: root.clone(),
            sys_tmp_dir: root,
        }
    }

    fn dir_for(&self, location: Location) -> &Path {
        match location {
            Location::DataDir => &self.data_dir,
            Location::UserDataDir => &self.user_data_dir,
            Location::SysTmpDir => &self.sys_tmp_dir,
        }
    }

    fn path_for(&self, def: &Definition) -> PathBuf {
        self.dir_for(def.location).join(def.file)
    }
}

pub struct DbManager {
    interfaces: HashMap<Database, Arc<DbInterface>>,
}

impl DbManager {
    /// Open every canonical database, bootstrapping schemas on first run and
    /// wiring the attach topology. `low_memory` halves every cache size.
    pub async fn open(
        paths: &DbPaths,
        low_memory: bool,
        ontology: &Arc<Ontology>,
        procedure_file: Option<&Path>,
    ) -> Result<Self> {
        for dir in [&paths.data_dir, &paths.user_data_dir, &paths.sys_tmp_dir] {
            std::fs::create_dir_all(dir)?;
        }

        let table = procedures::load(procedure_file);
        let mut interfaces = HashMap::new();
        let mut fresh = Vec::new();

        for def in DEFINITIONS {
            let path = paths.path_for(def);
            let needs_setup = !path.exists();

            let cache_size = if low_memory {
                def.cache_size / 2
            } else {
                def.cache_size
            };
            let profile = TuningProfile {
                cache_size,
                page_size: def.page_size,
                scalar_functions: def.scalar_functions,
                uncompress_function: def.uncompress_function,
            };
            let ontology_arg = if def.scalar_functions {
                Some(Arc::clone(ontology))
            } else {
                None
            };

            let iface = DbInterface::open(def.name, &path, profile, Arc::clone(&table), ontology_arg)?;

            if needs_setup {
                tracing::info!("creating database {}", path.display());
                for statement in def.schema.split(';') {
                    let statement = statement.trim();
                    if !statement.is_empty() {
                        iface.batch(statement).await?;
                    }
                }
                if let Some(triggers) = def.triggers {
                    for statement in triggers.split('!') {
                        let statement = statement.trim();
                        if !statement.is_empty() {
                            iface.batch(statement).await?;
                        }
                    }
                }
                fresh.push(def.db);
            }

            interfaces.insert(def.db, iface);
        }

        let manager = DbManager { interfaces };
        manager.attach_all(paths).await?;
        manager.bootstrap(&fresh, ontology).await?;
        Ok(manager)
    }

    async fn attach_all(&self, paths: &DbPaths) -> Result<()> {
        let common = self.path(paths, Database::Common);
        let cache = self.path(paths, Database::Cache);
        let wordidx = self.path(paths, Database::WordIndex);

        for db in [Database::FileMeta, Database::EmailMeta] {
            let iface = self.interface(db);
            iface.attach(&common, "common").await?;
            iface.attach(&cache, "cache").await?;
            iface.attach(&wordidx, "wordidx").await?;
        }

        // the xesam handle resolves type names and live-search rows too
        let xesam = self.interface(Database::Xesam);
        xesam.attach(&common, "common").await?;
        xesam.attach(&cache, "cache").await?;
        Ok(())
    }

    fn path(&self, paths: &DbPaths, db: Database) -> PathBuf {
        let def = DEFINITIONS.iter().find(|d| d.db == db).unwrap();
        paths.path_for(def)
    }

    async fn bootstrap(&self, fresh: &[Database], ontology: &Arc<Ontology>) -> Result<()> {
        if fresh.contains(&Database::Common) {
            let common = self.interface(Database::Common);
            common
                .batch(
                    "INSERT INTO Options (OptionKey, OptionValue) VALUES ('Sequence', '0');
                     INSERT INTO Options (OptionKey, OptionValue) VALUES ('EventSequence', '0');",
                )
                .await?;
        }

        // Mirror the ontology so SQL joins over types and fields work. Rows
        // already present keep their TypeCount.
        let common = self.interface(Database::Common);
        for service in ontology.services() {
            let mut sql = String::from(
                "INSERT OR IGNORE INTO ServiceTypes (TypeID, TypeName, Parent, Enabled, \
                 Embedded, HasMetadata, HasFullText, HasThumbs, ContentMetadata, \
                 ShowServiceFiles, ShowServiceDirectories, Database",
            );
            for i in 0..service.key_metadata.len() {
                sql.push_str(&format!(", KeyMetadata{}", i + 1));
            }
            sql.push_str(") VALUES (?,?,?,?,?,?,?,?,?,?,?,?");
            sql.push_str(&", ?".repeat(service.key_metadata.len()));
            sql.push(')');

            let mut params: Vec<Param> = vec![
                service.id.into(),
                Param::text(&service.name),
                Param::text(&service.parent),
                i32::from(service.enabled).into(),
                i32::from(service.embedded).into(),
                i32::from(service.has_metadata).into(),
                i32::from(service.has_fulltext).into(),
                i32::from(service.has_thumbs).into(),
                match &service.content_metadata {
                    Some(c) => Param::text(c),
                    None => Param::Null,
                },
                i32::from(service.show_files).into(),
                i32::from(service.show_directories).into(),
                Param::text(match service.db {
                    DbKind::File => "file",
                    DbKind::Email => "email",
                    DbKind::Data => "data",
                    DbKind::Xesam => "xesam",
                }),
            ];
            params.extend(service.key_metadata.iter().map(|k| Param::text(k)));
            common.query(sql, params).await?;
        }

        for field in ontology.fields() {
            common
                .query(
                    "INSERT OR IGNORE INTO MetaDataTypes (ID, MetaName, DataTypeID, Embedded, \
                     MultipleValues, Delimited, Filtered, StoreMetadata, Weight) \
                     VALUES (?,?,?,?,?,?,?,?,?)",
                    vec![
                        field.id.into(),
                        Param::text(&field.name),
                        (field.kind as i32).into(),
                        i32::from(field.embedded).into(),
                        i32::from(field.multiple_values).into(),
                        i32::from(field.delimited).into(),
                        i32::from(field.filtered).into(),
                        i32::from(field.store_metadata).into(),
                        field.weight.into(),
                    ],
                )
                .await?;
        }

        let xesam = self.interface(Database::Xesam);
        for (xesam_name, service_name) in crate::ontology::defaults::DEFAULT_XESAM_SERVICES {
            xesam
                .query(
                    "INSERT OR IGNORE INTO XesamServiceMapping (XesamName, ServiceName) VALUES (?,?)",
                    vec![Param::text(*xesam_name), Param::text(*service_name)],
                )
                .await?;
        }
        for (xesam_name, fields) in crate::ontology::defaults::DEFAULT_XESAM_FIELDS {
            for field in *fields {
                xesam
                    .query(
                        "INSERT OR IGNORE INTO XesamFieldMapping (XesamName, FieldName) \
                         SELECT ?, ? WHERE NOT EXISTS \
                         (SELECT 1 FROM XesamFieldMapping WHERE XesamName = ? AND FieldName = ?)",
                        vec![
                            Param::text(*xesam_name),
                            Param::text(*field),
                            Param::text(*xesam_name),
                            Param::text(*field),
                        ],
                    )
                    .await?;
            }
        }

        Ok(())
    }

    pub fn interface(&self, db: Database) -> Arc<DbInterface> {
        Arc::clone(
            self.interfaces
                .get(&db)
                .unwrap_or_else(|| panic!("database {db:?} not opened")),
        )
    }

    /// Row store for a service type's underlying database kind.
    pub fn meta_for(&self, kind: DbKind) -> Arc<DbInterface> {
        match kind {
            DbKind::Email => self.interface(Database::EmailMeta),
            _ => self.interface(Database::FileMeta),
        }
    }

    /// Content-blob store for a service type's underlying database kind.
    pub fn contents_for(&self, kind: DbKind) -> Arc<DbInterface> {
        match kind {
            DbKind::Email => self.interface(Database::EmailContents),
            _ => self.interface(Database::FileContents),
        }
    }

    /// Delete the index databases so the next start rebuilds them. The common
    /// database survives: it carries user-set backup metadata.
    pub fn remove_index_files(paths: &DbPaths) -> Result<()> {
        for def in DEFINITIONS {
            if matches!(def.db, Database::Common) {
                continue;
            }
            let path = paths.path_for(def);
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|e| Error::DbQuery(format!("cannot remove {}: {e}", path.display())))?;
                tracing::info!("removed {} for reindex", path.display());
            }
        }
        Ok(())
    }
}
