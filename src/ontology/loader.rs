//! Parser for the grouped key/value description files that declare service
//! types and metadata fields. Each `[Group]` names an entity; scalar keys set
//! attributes and list keys are split on `;` or `,`. A malformed key or an
//! unknown data type skips that entity but the file's other groups still load.

use super::types::{DbKind, Field, FieldKind, ServiceType};

#[derive(Debug, Default)]
pub struct Group {
    pub name: String,
    pub pairs: Vec<(String, String)>,
}

/// Split a description file into groups. Lines starting with `#` are
/// comments; keys without `=` are ignored.
pub fn parse_groups(text: &str) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            groups.push(Group {
                name: name.trim().to_string(),
                pairs: Vec::new(),
            });
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if let Some(group) = groups.last_mut() {
            group
                .pairs
                .push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    groups
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "True" | "TRUE" | "1" | "yes")
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One service-type entity plus its MIME bindings.
#[derive(Debug)]
pub struct ServiceDescription {
    pub service: ServiceType,
    pub mimes: Vec<String>,
    pub mime_prefixes: Vec<String>,
}

pub fn parse_service_file(text: &str) -> Vec<ServiceDescription> {
    let mut out = Vec::new();

    for group in parse_groups(text) {
        let mut service = ServiceType {
            name: group.name.clone(),
            enabled: true,
            ..ServiceType::default()
        };
        let mut mimes = Vec::new();
        let mut mime_prefixes = Vec::new();

        for (key, value) in &group.pairs {
            match key.as_str() {
                "Parent" => service.parent = value.clone(),
                "Enabled" => service.enabled = parse_bool(value),
                "Embedded" => service.embedded = parse_bool(value),
                "HasMetadata" => service.has_metadata = parse_bool(value),
                "HasFullText" => service.has_fulltext = parse_bool(value),
                "HasThumbs" => service.has_thumbs = parse_bool(value),
                "ShowServiceFiles" => service.show_files = parse_bool(value),
                "ShowServiceDirectories" => service.show_directories = parse_bool(value),
                "ContentMetadata" => service.content_metadata = Some(value.clone()),
                "Database" => match DbKind::from_name(value) {
                    Some(db) => service.db = db,
                    None => {
                        tracing::warn!(
                            "service '{}': unknown database kind '{value}', skipping entity",
                            group.name
                        );
                        continue;
                    }
                },
                "Mimes" => mimes = parse_list(value),
                "MimePrefixes" => mime_prefixes = parse_list(value),
                "TabularMetadata" => {
                    service.key_metadata = parse_list(value);
                    service.key_metadata.truncate(11);
                }
                // TileMetadata and anything else is display-side only
                _ => {}
            }
        }

        out.push(ServiceDescription {
            service,
            mimes,
            mime_prefixes,
        });
    }

    out
}

pub fn parse_field_file(text: &str) -> Vec<Field> {
    let mut out = Vec::new();

    'group: for group in parse_groups(text) {
        let mut field = Field {
            name: group.name.clone(),
            ..Field::default()
        };

        for (key, value) in &group.pairs {
            match key.as_str() {
                "DataType" => match FieldKind::from_name(value) {
                    Some(kind) => field.kind = kind,
                    None => {
                        tracing::warn!(
                            "field '{}': unknown data type '{value}', skipping entity",
                            group.name
                        );
                        continue 'group;
                    }
                },
                "Weight" => field.weight = value.parse().unwrap_or(1),
                "Embedded" => field.embedded = parse_bool(value),
                "MultipleValues" => field.multiple_values = parse_bool(value),
                "Delimited" => field.delimited = parse_bool(value),
                "Filtered" => field.filtered = parse_bool(value),
                "StoreMetadata" => field.store_metadata = parse_bool(value),
                "Parents" => field.parents = parse_list(value),
                _ => {}
            }
        }

        out.push(field);
    }

    out
}
