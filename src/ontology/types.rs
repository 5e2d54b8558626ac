/// Case-folded key used wherever names are matched case-and-locale
/// insensitively. Raw strings are never used as map keys for folded lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollationKey(String);

impl CollationKey {
    pub fn new(s: &str) -> Self {
        CollationKey(s.chars().flat_map(|c| c.to_lowercase()).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The value kind of a metadata field; determines the backing table. The
/// discriminants are stored in `MetaDataTypes.DataTypeID` and must stay
/// stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Keyword = 0,
    Index = 1,
    FullText = 2,
    String = 3,
    Integer = 4,
    Double = 5,
    Date = 6,
    Blob = 7,
}

impl FieldKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Keyword" => Some(FieldKind::Keyword),
            "Index" => Some(FieldKind::Index),
            "FullText" => Some(FieldKind::FullText),
            "String" => Some(FieldKind::String),
            "Integer" => Some(FieldKind::Integer),
            "Double" => Some(FieldKind::Double),
            "Date" => Some(FieldKind::Date),
            "Blob" => Some(FieldKind::Blob),
            _ => None,
        }
    }

    /// Table carrying values of this kind, keyed `(ServiceID, MetaDataID)`.
    pub fn metadata_table(self) -> &'static str {
        match self {
            FieldKind::Index | FieldKind::String | FieldKind::Double => "ServiceMetaData",
            FieldKind::Integer | FieldKind::Date => "ServiceNumericMetaData",
            FieldKind::Keyword => "ServiceKeywordMetaData",
            FieldKind::FullText | FieldKind::Blob => "ServiceContents",
        }
    }

    /// Whether comparisons against this kind bind as numbers.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldKind::Integer | FieldKind::Double | FieldKind::Date
        )
    }
}

/// Which underlying database a service type's rows live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbKind {
    #[default]
    File,
    Email,
    Data,
    Xesam,
}

impl DbKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "file" | "Files" => Some(DbKind::File),
            "email" | "Emails" => Some(DbKind::Email),
            "data" => Some(DbKind::Data),
            "xesam" => Some(DbKind::Xesam),
            _ => None,
        }
    }
}

/// A class of indexable things, loaded from a description file and immutable
/// at runtime.
#[derive(Debug, Clone, Default)]
pub struct ServiceType {
    pub id: i32,
    pub name: String,
    pub parent: String,
    pub enabled: bool,
    pub embedded: bool,
    pub has_metadata: bool,
    pub has_fulltext: bool,
    pub has_thumbs: bool,
    pub show_files: bool,
    pub show_directories: bool,
    pub content_metadata: Option<String>,
    /// Field names denormalised onto `KeyMetadata1..11` on the service row.
    pub key_metadata: Vec<String>,
    pub db: DbKind,
}

/// A metadata attribute descriptor, immutable at runtime.
#[derive(Debug, Clone)]
pub struct Field {
    pub id: i32,
    pub name: String,
    pub kind: FieldKind,
    /// Indexing boost applied to tokens extracted from this field.
    pub weight: i32,
    /// Owner-supplied (extracted) rather than user-writable.
    pub embedded: bool,
    pub multiple_values: bool,
    pub delimited: bool,
    pub filtered: bool,
    pub store_metadata: bool,
    /// Alias parents; a query on a parent also matches this field.
    pub parents: Vec<String>,
}

impl Default for Field {
    fn default() -> Self {
        Field {
            id: 0,
            name: String::new(),
            kind: FieldKind::String,
            weight: 1,
            embedded: true,
            multiple_values: false,
            delimited: false,
            filtered: false,
            store_metadata: true,
            parents: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collation_key_folds_case() {
        assert_eq!(CollationKey::new("Files"), CollationKey::new("FILES"));
        assert_eq!(CollationKey::new("Straße").as_str(), "straße");
    }

    #[test]
    fn kind_tables() {
        assert_eq!(FieldKind::Index.metadata_table(), "ServiceMetaData");
        assert_eq!(FieldKind::Date.metadata_table(), "ServiceNumericMetaData");
        assert_eq!(
            FieldKind::Keyword.metadata_table(),
            "ServiceKeywordMetaData"
        );
        assert!(FieldKind::Date.is_numeric());
        assert!(!FieldKind::Keyword.is_numeric());
    }

    #[test]
    fn unknown_kind_name_is_none() {
        assert!(FieldKind::from_name("Text").is_none());
    }
}
