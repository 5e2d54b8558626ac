//! Schema bootstrap scripts, one per canonical database. Plain DDL scripts
//! split on `;`, trigger scripts on `!`, executed in order at database
//! creation.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Execute a bootstrap script with the given statement delimiter.
pub fn execute_script(conn: &Connection, script: &str, delimiter: char) -> Result<()> {
    for statement in script.split(delimiter) {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        conn.execute_batch(statement)
            .map_err(|e| Error::DbQuery(format!("bootstrap statement failed: {e}")))?;
    }
    Ok(())
}

pub const COMMON_SCHEMA: &str = "
CREATE TABLE Options (
    OptionKey   TEXT PRIMARY KEY,
    OptionValue TEXT NOT NULL DEFAULT ''
);

CREATE TABLE ServiceTypes (
    TypeID                 INTEGER PRIMARY KEY,
    TypeName               TEXT UNIQUE NOT NULL,
    Parent                 TEXT NOT NULL DEFAULT '',
    Enabled                INTEGER NOT NULL DEFAULT 1,
    Embedded               INTEGER NOT NULL DEFAULT 1,
    HasMetadata            INTEGER NOT NULL DEFAULT 0,
    HasFullText            INTEGER NOT NULL DEFAULT 0,
    HasThumbs              INTEGER NOT NULL DEFAULT 0,
    ContentMetadata        TEXT,
    ShowServiceFiles       INTEGER NOT NULL DEFAULT 0,
    ShowServiceDirectories INTEGER NOT NULL DEFAULT 0,
    KeyMetadata1  TEXT, KeyMetadata2  TEXT, KeyMetadata3  TEXT,
    KeyMetadata4  TEXT, KeyMetadata5  TEXT, KeyMetadata6  TEXT,
    KeyMetadata7  TEXT, KeyMetadata8  TEXT, KeyMetadata9  TEXT,
    KeyMetadata10 TEXT, KeyMetadata11 TEXT,
    Database               TEXT NOT NULL DEFAULT 'file',
    TypeCount              INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE MetaDataTypes (
    ID             INTEGER PRIMARY KEY,
    MetaName       TEXT UNIQUE NOT NULL,
    DataTypeID     INTEGER NOT NULL DEFAULT 0,
    Embedded       INTEGER NOT NULL DEFAULT 1,
    MultipleValues INTEGER NOT NULL DEFAULT 0,
    Delimited      INTEGER NOT NULL DEFAULT 0,
    Filtered       INTEGER NOT NULL DEFAULT 0,
    StoreMetadata  INTEGER NOT NULL DEFAULT 1,
    Weight         INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE BackupServices (
    ID   INTEGER PRIMARY KEY AUTOINCREMENT,
    Path TEXT NOT NULL,
    Name TEXT NOT NULL,
    UNIQUE (Path, Name)
);

CREATE TABLE BackupMetaData (
    ID         INTEGER PRIMARY KEY AUTOINCREMENT,
    ServiceID  INTEGER NOT NULL,
    MetaDataID INTEGER NOT NULL,
    UserValue  TEXT
);
";

pub const CACHE_SCHEMA: &str = "
CREATE TABLE Events (
    EventID   INTEGER PRIMARY KEY,
    ServiceID INTEGER NOT NULL,
    EventType TEXT NOT NULL CHECK (EventType IN ('Create','Update','Delete'))
);

CREATE TABLE LiveSearches (
    ServiceID INTEGER NOT NULL,
    SearchID  TEXT NOT NULL,
    PRIMARY KEY (ServiceID, SearchID)
);
CREATE INDEX LiveSearchesSearchIndex ON LiveSearches (SearchID);

CREATE TABLE PendingFiles (
    FileID     INTEGER PRIMARY KEY AUTOINCREMENT,
    FileUri    TEXT NOT NULL,
    ModuleName TEXT NOT NULL DEFAULT 'files',
    Action     INTEGER NOT NULL DEFAULT 0,
    MimeType   TEXT,
    IsDir      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE MatchRules (
    RuleID INTEGER PRIMARY KEY AUTOINCREMENT,
    Sender TEXT NOT NULL,
    Rule   TEXT NOT NULL
);
";

pub const META_SCHEMA: &str = "
CREATE TABLE Services (
    ID            INTEGER PRIMARY KEY,
    Path          TEXT NOT NULL,
    Name          TEXT NOT NULL,
    ServiceTypeID INTEGER NOT NULL DEFAULT 0,
    Mime          TEXT,
    Size          INTEGER NOT NULL DEFAULT 0,
    IsDirectory   INTEGER NOT NULL DEFAULT 0,
    IsLink        INTEGER NOT NULL DEFAULT 0,
    Offset        INTEGER NOT NULL DEFAULT 0,
    IndexTime     INTEGER NOT NULL DEFAULT 0,
    AuxilaryID    INTEGER NOT NULL DEFAULT 0,
    Enabled       INTEGER NOT NULL DEFAULT 1,
    KeyMetadata1  TEXT, KeyMetadata2  TEXT, KeyMetadata3  TEXT,
    KeyMetadata4  TEXT, KeyMetadata5  TEXT, KeyMetadata6  TEXT,
    KeyMetadata7  TEXT, KeyMetadata8  TEXT, KeyMetadata9  TEXT,
    KeyMetadata10 TEXT, KeyMetadata11 TEXT
);
CREATE UNIQUE INDEX ServiceUriIndex ON Services (Path, Name) WHERE Enabled = 1;
CREATE INDEX ServicePathIndex ON Services (Path);

CREATE TABLE ServiceMetaData (
    ID              INTEGER PRIMARY KEY AUTOINCREMENT,
    ServiceID       INTEGER NOT NULL,
    MetaDataID      INTEGER NOT NULL,
    MetaDataValue   TEXT,
    MetaDataDisplay TEXT
);
CREATE INDEX ServiceMetaDataIndex ON ServiceMetaData (ServiceID, MetaDataID);

CREATE TABLE ServiceNumericMetaData (
    ID            INTEGER PRIMARY KEY AUTOINCREMENT,
    ServiceID     INTEGER NOT NULL,
    MetaDataID    INTEGER NOT NULL,
    MetaDataValue INTEGER
);
CREATE INDEX ServiceNumericMetaDataIndex ON ServiceNumericMetaData (ServiceID, MetaDataID);

CREATE TABLE ServiceKeywordMetaData (
    ID            INTEGER PRIMARY KEY AUTOINCREMENT,
    ServiceID     INTEGER NOT NULL,
    MetaDataID    INTEGER NOT NULL,
    MetaDataValue TEXT
);
CREATE INDEX ServiceKeywordMetaDataIndex ON ServiceKeywordMetaData (ServiceID, MetaDataID);

CREATE TABLE SearchResults1 (
    SID   INTEGER NOT NULL,
    Score INTEGER NOT NULL DEFAULT 0
);
";

/// Metadata rows cascade when their service row goes away.
pub const META_TRIGGERS: &str = "
CREATE TRIGGER DeleteServiceMetaData AFTER DELETE ON Services
BEGIN
    DELETE FROM ServiceMetaData WHERE ServiceID = old.ID;
    DELETE FROM ServiceNumericMetaData WHERE ServiceID = old.ID;
    DELETE FROM ServiceKeywordMetaData WHERE ServiceID = old.ID;
END
";

pub const CONTENTS_SCHEMA: &str = "
CREATE TABLE ServiceContents (
    ServiceID  INTEGER NOT NULL,
    MetaDataID INTEGER NOT NULL,
    Content    BLOB,
    PRIMARY KEY (ServiceID, MetaDataID)
);
";

pub const WORD_INDEX_SCHEMA: &str = "
CREATE TABLE WordIndex (
    Word          TEXT NOT NULL,
    ServiceID     INTEGER NOT NULL,
    ServiceTypeID INTEGER NOT NULL DEFAULT 0,
    Score         INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (Word, ServiceID)
);
CREATE INDEX WordIndexServiceIndex ON WordIndex (ServiceID);
";

pub const XESAM_SCHEMA: &str = "
CREATE TABLE XesamServiceMapping (
    XesamName   TEXT PRIMARY KEY,
    ServiceName TEXT NOT NULL
);

CREATE TABLE XesamFieldMapping (
    ID        INTEGER PRIMARY KEY AUTOINCREMENT,
    XesamName TEXT NOT NULL,
    FieldName TEXT NOT NULL
);
";
