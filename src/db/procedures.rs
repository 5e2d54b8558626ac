//! The shared stored-procedure table: `name -> SQL template`, loaded once and
//! read-only afterwards. The file format is one procedure per line, split on
//! the first whitespace; blank lines and lines without whitespace are
//! skipped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub fn parse_procedures(text: &str) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, sql)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let sql = sql.trim();
        if sql.is_empty() {
            continue;
        }
        table.insert(name.to_string(), sql.to_string());
    }
    table
}

/// Load the built-in table, overlaid by `path` when it exists.
pub fn load(path: Option<&Path>) -> Arc<HashMap<String, String>> {
    let mut table = parse_procedures(DEFAULT_PROCEDURES);
    if let Some(path) = path {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let extra = parse_procedures(&text);
                tracing::info!(
                    "loaded {} stored procedures from {}",
                    extra.len(),
                    path.display()
                );
                table.extend(extra);
            }
            Err(e) => {
                tracing::warn!("cannot read procedure file {}: {e}", path.display());
            }
        }
    }
    Arc::new(table)
}

pub const DEFAULT_PROCEDURES: &str = "\
GetNewID SELECT OptionValue FROM Options WHERE OptionKey = 'Sequence'
UpdateNewID UPDATE Options SET OptionValue = ? WHERE OptionKey = 'Sequence'
GetNewEventID SELECT OptionValue FROM Options WHERE OptionKey = 'EventSequence'
UpdateNewEventID UPDATE Options SET OptionValue = ? WHERE OptionKey = 'EventSequence'
GetRelatedServiceIDs SELECT TypeID FROM ServiceTypes WHERE TypeName = ? OR Parent = ?
IncStat UPDATE ServiceTypes SET TypeCount = TypeCount + 1 WHERE TypeName = ?
DecStat UPDATE ServiceTypes SET TypeCount = TypeCount - 1 WHERE TypeName = ? AND TypeCount > 0
GetStats SELECT TypeName, TypeCount FROM ServiceTypes WHERE TypeCount > 0 ORDER BY TypeID
CreateService INSERT INTO Services (ID, Path, Name, ServiceTypeID, Mime, Size, IsDirectory, IsLink, Offset, IndexTime, AuxilaryID) VALUES (?,?,?,?,?,?,?,?,?,?,?)
DeleteService1 DELETE FROM Services WHERE ID = ?
GetServiceID SELECT ID, IndexTime, IsDirectory, ServiceTypeID FROM Services WHERE Path = ? AND Name = ?
GetServiceByID SELECT Path, Name, Mime, ServiceTypeID, IsDirectory FROM Services WHERE ID = ?
UpdateService UPDATE Services SET Mime = ?, Size = ?, IndexTime = ? WHERE ID = ?
GetFileByID SELECT Path, Name, Mime FROM Services WHERE ID = ?
GetFileByID2 SELECT Path || '/' || Name, Name, Mime FROM Services WHERE ID = ?
GetEmailByID SELECT Path || '/' || Name, Name, Mime FROM Services WHERE ID = ?
GetApplicationByID SELECT Path || '/' || Name, Name, Mime FROM Services WHERE ID = ?
GetFileMTime SELECT IndexTime FROM Services WHERE Path = ? AND Name = ?
UpdateFileMove UPDATE Services SET Path = ?, Name = ? WHERE ID = ?
SelectFileChildWithoutDirs SELECT Path, Name FROM Services WHERE Path = ? AND IsDirectory = 0
SelectFileSubFolders SELECT ID, Path, Name FROM Services WHERE (Path = ? OR Path GLOB ?) AND IsDirectory = 1
SelectSubFileIDs SELECT ID, ServiceTypeID FROM Services WHERE Path = ? OR Path GLOB ?
SetMetadata INSERT INTO ServiceMetaData (ServiceID, MetaDataID, MetaDataValue, MetaDataDisplay) VALUES (?,?,?,?)
SetMetadataKeyword INSERT INTO ServiceKeywordMetaData (ServiceID, MetaDataID, MetaDataValue) VALUES (?,?,?)
SetMetadataNumeric INSERT INTO ServiceNumericMetaData (ServiceID, MetaDataID, MetaDataValue) VALUES (?,?,?)
GetMetadata SELECT MetaDataValue FROM ServiceMetaData WHERE ServiceID = ? AND MetaDataID = ?
GetMetadataKeyword SELECT MetaDataValue FROM ServiceKeywordMetaData WHERE ServiceID = ? AND MetaDataID = ?
GetMetadataNumeric SELECT MetaDataValue FROM ServiceNumericMetaData WHERE ServiceID = ? AND MetaDataID = ?
DeleteMetadata DELETE FROM ServiceMetaData WHERE ServiceID = ? AND MetaDataID = ?
DeleteMetadataKeyword DELETE FROM ServiceKeywordMetaData WHERE ServiceID = ? AND MetaDataID = ?
DeleteMetadataNumeric DELETE FROM ServiceNumericMetaData WHERE ServiceID = ? AND MetaDataID = ?
DeleteServiceMetadata DELETE FROM ServiceMetaData WHERE ServiceID = ?
DeleteServiceKeywordMetadata DELETE FROM ServiceKeywordMetaData WHERE ServiceID = ?
DeleteServiceNumericMetadata DELETE FROM ServiceNumericMetaData WHERE ServiceID = ?
GetAllIndexable SELECT M.MetaDataValue, T.Weight, T.Filtered, T.Delimited FROM ServiceMetaData M, MetaDataTypes T WHERE M.ServiceID = ? AND M.MetaDataID = T.ID AND T.DataTypeID IN (0,1)
GetAllIndexableKeywords SELECT K.MetaDataValue, T.Weight, T.Filtered, T.Delimited FROM ServiceKeywordMetaData K, MetaDataTypes T WHERE K.ServiceID = ? AND K.MetaDataID = T.ID
GetKeywordList SELECT K.MetaDataValue, count(*) FROM Services S, ServiceKeywordMetaData K WHERE S.ID = K.ServiceID AND S.Enabled = 1 AND S.ServiceTypeID IN (SELECT TypeID FROM ServiceTypes WHERE TypeName = ? OR Parent = ?) GROUP BY K.MetaDataValue ORDER BY 2 DESC
SaveServiceContents INSERT OR REPLACE INTO ServiceContents (ServiceID, MetaDataID, Content) VALUES (?,?,?)
GetAllContents SELECT uncompress(Content) FROM ServiceContents WHERE ServiceID = ?
DeleteAllContents DELETE FROM ServiceContents WHERE ServiceID = ?
DeleteSearchResults1 DELETE FROM SearchResults1
InsertSearchResult1 INSERT INTO SearchResults1 (SID, Score) VALUES (?,?)
CreateEvent INSERT INTO Events (EventID, ServiceID, EventType) VALUES (?,?,?)
GetEvents SELECT EventID, ServiceID, EventType FROM Events ORDER BY EventID
DeleteHandledEvents DELETE FROM Events WHERE EventID <= ?
GetLiveSearchHitCount SELECT count(*) FROM LiveSearches WHERE SearchID = ?
LiveSearchStopSearch DELETE FROM LiveSearches WHERE SearchID = ?
GetLiveSearchAllIDs SELECT ServiceID FROM LiveSearches WHERE SearchID = ? ORDER BY ServiceID
GetLiveSearchDeletedIDs SELECT E.ServiceID FROM Events E, LiveSearches X WHERE E.ServiceID = X.ServiceID AND X.SearchID = ? AND E.EventType = 'Delete'
LiveSearchInsertID INSERT OR IGNORE INTO LiveSearches (ServiceID, SearchID) VALUES (?,?)
LiveSearchRemoveID DELETE FROM LiveSearches WHERE SearchID = ? AND ServiceID = ?
InsertPendingFile INSERT INTO PendingFiles (FileUri, ModuleName, Action, MimeType, IsDir) VALUES (?,?,?,?,?)
GetPendingFiles SELECT FileID, FileUri, ModuleName, IsDir FROM PendingFiles ORDER BY FileID LIMIT 5000
RemovePendingFiles DELETE FROM PendingFiles WHERE FileID <= ?
CountPendingFiles SELECT count(*) FROM PendingFiles
GetBackupServiceByUri SELECT ID FROM BackupServices WHERE Path = ? AND Name = ?
InsertBackupService INSERT INTO BackupServices (Path, Name) VALUES (?,?)
UpdateBackupService UPDATE BackupServices SET Path = ?, Name = ? WHERE Path = ? AND Name = ?
SetBackupMetadata INSERT INTO BackupMetaData (ServiceID, MetaDataID, UserValue) VALUES (?,?,?)
WordIndexGetHits SELECT ServiceID, ServiceTypeID, Score FROM WordIndex WHERE Word = ? ORDER BY Score DESC
WordIndexGetHitCount SELECT count(*) FROM WordIndex WHERE Word = ?
WordIndexInsert INSERT INTO WordIndex (Word, ServiceID, ServiceTypeID, Score) VALUES (?,?,?,?)
WordIndexUpsert INSERT INTO WordIndex (Word, ServiceID, ServiceTypeID, Score) VALUES (?,?,?,?) ON CONFLICT (Word, ServiceID) DO UPDATE SET Score = Score + excluded.Score
WordIndexPrune DELETE FROM WordIndex WHERE Word = ? AND ServiceID = ? AND Score <= 0
WordIndexRemove DELETE FROM WordIndex WHERE Word = ? AND ServiceID = ?
WordIndexWords SELECT DISTINCT Word FROM WordIndex
";
