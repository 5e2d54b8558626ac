//! Structured XML query translation into SQL fragments.
//!
//! The parse context is a state stack mirroring the XML nesting. Field
//! references expand through the xesam alias map into the set of native
//! field ids; comparisons are emitted as disjunctions across that set. The
//! WHERE clause is parenthesised to preserve operator precedence literally.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::ontology::{Field, FieldKind, Ontology};

/// The three SQL fragments a parsed query lowers to.
#[derive(Debug, Clone, Default)]
pub struct QueryFragments {
    /// Always `FROM Services S`.
    pub from_sql: String,
    /// The JOIN chain for every referenced metadata field.
    pub join_sql: String,
    /// `WHERE (…)`, starting with the service-class predicate.
    pub where_sql: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Query,
    And,
    Or,
    Field,
    Operator(Op),
    Literal(LiteralKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    Regex,
    StartsWith,
    InSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiteralKind {
    Integer,
    Date,
    Str,
    Float,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicOp {
    None,
    And,
    Or,
}

/// One referenced native field and the alias it joins under.
struct FieldData {
    field: std::sync::Arc<Field>,
    alias: String,
    is_condition: bool,
}

impl FieldData {
    fn table(&self) -> &'static str {
        self.field.kind.metadata_table()
    }

    fn where_column(&self) -> String {
        match self.field.kind {
            FieldKind::Double => format!("{}.MetaDataDisplay", self.alias),
            _ => format!("{}.MetaDataValue", self.alias),
        }
    }
}

struct ParserData<'a> {
    ontology: &'a Ontology,
    stack: Vec<State>,
    fields: Vec<FieldData>,
    where_sql: String,
    current_field: Option<String>,
    current_value: String,
    current_literal: Option<LiteralKind>,
    current_logic: LogicOp,
    statement_count: usize,
    /// Saved statement counts of enclosing logic groups.
    count_stack: Vec<usize>,
}

fn line_col(xml: &str, byte_pos: usize) -> (usize, usize) {
    let upto = &xml[..byte_pos.min(xml.len())];
    let line = upto.matches('\n').count() + 1;
    let column = upto.rfind('\n').map(|p| byte_pos - p).unwrap_or(byte_pos + 1);
    (line, column)
}

fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

fn attribute(start: &BytesStart<'_>, name: &str) -> Option<String> {
    start
        .try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn operator_for(name: &str) -> Option<Op> {
    match name {
        "equals" => Some(Op::Equals),
        "greaterThan" => Some(Op::GreaterThan),
        "greaterOrEqual" => Some(Op::GreaterOrEqual),
        "lessThan" => Some(Op::LessThan),
        "lessOrEqual" => Some(Op::LessOrEqual),
        "contains" => Some(Op::Contains),
        "regex" => Some(Op::Regex),
        "startsWith" => Some(Op::StartsWith),
        "inSet" => Some(Op::InSet),
        _ => None,
    }
}

fn literal_for(name: &str) -> Option<LiteralKind> {
    match name {
        "integer" => Some(LiteralKind::Integer),
        "date" => Some(LiteralKind::Date),
        "string" => Some(LiteralKind::Str),
        "float" => Some(LiteralKind::Float),
        "boolean" => Some(LiteralKind::Boolean),
        _ => None,
    }
}

/// Date literals normalise to epoch seconds before binding.
fn parse_date_epoch(raw: &str) -> Option<i64> {
    if let Ok(epoch) = raw.parse::<i64>() {
        return Some(epoch);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
    }
    None
}

fn compared(value: &str, numeric: bool) -> String {
    if numeric {
        value.to_string()
    } else {
        format!("'{}'", quote(value))
    }
}

impl<'a> ParserData<'a> {
    fn top(&self) -> State {
        *self.stack.last().unwrap_or(&State::Start)
    }

    fn connector(&mut self) {
        match self.current_logic {
            LogicOp::And => self.where_sql.push_str(" AND "),
            LogicOp::Or => self.where_sql.push_str(" OR "),
            LogicOp::None => {}
        }
    }

    /// Register (or reuse) the alias row for each native field a reference
    /// expands to.
    fn add_metadata_fields(&mut self, name: &str) -> Result<Vec<usize>> {
        let native_names = self.ontology.xesam_field_names(name);
        if native_names.is_empty() {
            return Err(Error::UnknownField(name.to_string()));
        }

        let mut indices = Vec::new();
        for native in native_names {
            if let Some(pos) = self
                .fields
                .iter()
                .position(|f| f.field.name.eq_ignore_ascii_case(&native))
            {
                self.fields[pos].is_condition = true;
                indices.push(pos);
                continue;
            }
            let field = self
                .ontology
                .field_def(&native)
                .ok_or_else(|| Error::UnknownField(native.clone()))?;
            let alias = format!("M{}", self.fields.len());
            self.fields.push(FieldData {
                field,
                alias,
                is_condition: true,
            });
            indices.push(self.fields.len() - 1);
        }
        Ok(indices)
    }

    fn literal_value(&self) -> Result<String> {
        let raw = self.current_value.trim();
        match self.current_literal {
            Some(LiteralKind::Boolean) => match raw {
                "true" => Ok("1".to_string()),
                "false" => Ok("0".to_string()),
                other => Err(Error::parse(
                    0,
                    0,
                    format!("invalid boolean literal '{other}'"),
                )),
            },
            Some(LiteralKind::Date) => Ok(parse_date_epoch(raw)
                .ok_or_else(|| Error::parse(0, 0, format!("invalid date literal '{raw}'")))?
                .to_string()),
            _ => Ok(raw.to_string()),
        }
    }

    fn build_sql(&mut self, op: Op) -> Result<()> {
        let Some(field_name) = self.current_field.take() else {
            return Err(Error::parse(0, 0, "comparison without a field reference"));
        };
        if self.current_literal.is_none() {
            return Err(Error::parse(
                0,
                0,
                format!("comparison on '{field_name}' without a literal"),
            ));
        }

        self.statement_count += 1;
        if self.statement_count > 1 {
            self.connector();
        }

        let indices = self.add_metadata_fields(&field_name)?;
        let value = self.literal_value()?;
        let raw = self.current_value.trim().to_string();
        let literal_numeric = matches!(
            self.current_literal,
            Some(LiteralKind::Integer)
                | Some(LiteralKind::Float)
                | Some(LiteralKind::Date)
                | Some(LiteralKind::Boolean)
        );

        self.where_sql.push_str(" ( ");
        for (i, idx) in indices.iter().enumerate() {
            let data = &self.fields[*idx];
            let numeric = literal_numeric || data.field.kind.is_numeric();
            let column = data.where_column();

            if i > 0 {
                self.where_sql.push_str(" OR ");
            }

            let predicate = match op {
                Op::Equals => {
                    if raw.contains('*') {
                        format!("({column} GLOB '{}')", quote(&raw))
                    } else if numeric {
                        format!("({column} = {value})")
                    } else {
                        format!("({column} = '{}')", quote(&value))
                    }
                }
                Op::GreaterThan => format!("({column} > {})", compared(&value, numeric)),
                Op::GreaterOrEqual => format!("({column} >= {})", compared(&value, numeric)),
                Op::LessThan => format!("({column} < {})", compared(&value, numeric)),
                Op::LessOrEqual => format!("({column} <= {})", compared(&value, numeric)),
                Op::Contains => format!("({column} LIKE '%{}%')", quote(&raw)),
                Op::StartsWith => {
                    if raw.contains('*') {
                        format!("({column} LIKE '{}')", quote(&raw))
                    } else {
                        format!("({column} LIKE '{}%')", quote(&raw))
                    }
                }
                Op::Regex => format!("({column} REGEXP '{}')", quote(&raw)),
                Op::InSet => {
                    let items: Vec<String> = raw
                        .split(',')
                        .map(|item| {
                            let item = item.trim();
                            if numeric {
                                item.to_string()
                            } else {
                                format!("'{}'", quote(item))
                            }
                        })
                        .collect();
                    format!("({column} IN ({}))", items.join(","))
                }
            };
            self.where_sql.push_str(&predicate);
        }
        self.where_sql.push_str(" ) ");

        self.current_value.clear();
        self.current_literal = None;
        Ok(())
    }

    fn handle_start(&mut self, name: &str, start: &BytesStart<'_>) -> Result<()> {
        match name {
            "query" => {
                if self.top() != State::Start {
                    return Err(Error::parse(0, 0, "query element not expected here"));
                }
                let content = attribute(start, "content");
                let source = attribute(start, "source");

                let content_service = match content {
                    Some(name) => self
                        .ontology
                        .xesam_service_name(&name)
                        .ok_or(Error::UnknownService(name))?,
                    None => "Files".to_string(),
                };
                let source_service = match source {
                    Some(name) => self
                        .ontology
                        .xesam_service_name(&name)
                        .ok_or(Error::UnknownService(name))?,
                    None => content_service.clone(),
                };

                self.where_sql.push_str(&format!(
                    " (S.ServiceTypeID IN (SELECT TypeID FROM ServiceTypes \
                     WHERE TypeName = '{}' OR Parent = '{}')) AND ",
                    quote(&content_service),
                    quote(&source_service)
                ));
                self.stack.push(State::Query);
            }
            "field" => {
                if !matches!(self.top(), State::Operator(_)) {
                    return Err(Error::parse(0, 0, "field element not expected here"));
                }
                let name = attribute(start, "name").ok_or_else(|| {
                    Error::parse(0, 0, "field element requires a name attribute")
                })?;
                self.current_field = Some(name);
                self.stack.push(State::Field);
            }
            "and" | "or" => {
                if !matches!(self.top(), State::Query | State::And | State::Or) {
                    return Err(Error::parse(
                        0,
                        0,
                        format!("{name} element not expected here"),
                    ));
                }
                if self.statement_count >= 1 {
                    self.connector();
                }
                if attribute(start, "negate").as_deref() == Some("true") {
                    self.where_sql.push_str(" NOT ");
                }
                self.where_sql.push_str(" ( ");
                self.count_stack.push(self.statement_count);
                self.statement_count = 0;
                if name == "and" {
                    self.current_logic = LogicOp::And;
                    self.stack.push(State::And);
                } else {
                    self.current_logic = LogicOp::Or;
                    self.stack.push(State::Or);
                }
            }
            other => {
                if let Some(op) = operator_for(other) {
                    if !matches!(self.top(), State::Query | State::And | State::Or) {
                        return Err(Error::parse(
                            0,
                            0,
                            format!("{other} element not expected here"),
                        ));
                    }
                    self.stack.push(State::Operator(op));
                } else if let Some(kind) = literal_for(other) {
                    if !matches!(self.top(), State::Operator(_)) {
                        return Err(Error::parse(
                            0,
                            0,
                            format!("{other} literal not expected here"),
                        ));
                    }
                    self.current_literal = Some(kind);
                    self.current_value.clear();
                    self.stack.push(State::Literal(kind));
                } else {
                    return Err(Error::parse(0, 0, format!("unknown element '{other}'")));
                }
            }
        }
        Ok(())
    }

    fn handle_end(&mut self, name: &str) -> Result<()> {
        match name {
            "query" => {
                if self.top() != State::Query {
                    return Err(Error::parse(0, 0, "mismatched query end"));
                }
                self.stack.pop();
            }
            "field" => {
                if self.top() != State::Field {
                    return Err(Error::parse(0, 0, "mismatched field end"));
                }
                self.stack.pop();
            }
            "and" | "or" => {
                let expected = if name == "and" { State::And } else { State::Or };
                if self.top() != expected {
                    return Err(Error::parse(0, 0, format!("mismatched {name} end")));
                }
                self.where_sql.push_str(" ) ");
                self.stack.pop();
                // the closed group counts as one statement of its parent
                self.statement_count = self.count_stack.pop().unwrap_or(0) + 1;
                self.current_logic = match self.top() {
                    State::And => LogicOp::And,
                    State::Or => LogicOp::Or,
                    _ => LogicOp::None,
                };
            }
            other => {
                if operator_for(other).is_some() {
                    let State::Operator(op) = self.top() else {
                        return Err(Error::parse(0, 0, format!("mismatched {other} end")));
                    };
                    self.stack.pop();
                    self.build_sql(op)?;
                } else if literal_for(other).is_some() {
                    if !matches!(self.top(), State::Literal(_)) {
                        return Err(Error::parse(0, 0, format!("mismatched {other} end")));
                    }
                    self.stack.pop();
                } else {
                    return Err(Error::parse(0, 0, format!("unknown element '{other}'")));
                }
            }
        }
        Ok(())
    }
}

fn locate(err: Error, xml: &str, pos: usize) -> Error {
    match err {
        Error::QueryParse {
            line: 0, message, ..
        } => {
            let (line, column) = line_col(xml, pos);
            Error::QueryParse {
                line,
                column,
                message,
            }
        }
        other => other,
    }
}

/// Translate a query document into `(FROM, JOIN, WHERE)` fragments.
pub fn parse_query(ontology: &Ontology, xml: &str) -> Result<QueryFragments> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut data = ParserData {
        ontology,
        stack: vec![State::Start],
        fields: Vec::new(),
        where_sql: String::new(),
        current_field: None,
        current_value: String::new(),
        current_literal: None,
        current_logic: LogicOp::None,
        statement_count: 0,
        count_stack: Vec::new(),
    };

    loop {
        let position = reader.buffer_position();
        let event = reader.read_event().map_err(|e| {
            let (line, column) = line_col(xml, reader.buffer_position());
            Error::QueryParse {
                line,
                column,
                message: format!("malformed query: {e}"),
            }
        })?;

        match event {
            Event::Start(ref start) => {
                let name = element_name(start, xml, position)?;
                data.handle_start(&name, start)
                    .map_err(|e| locate(e, xml, position))?;
            }
            Event::Empty(ref start) => {
                let name = element_name(start, xml, position)?;
                data.handle_start(&name, start)
                    .map_err(|e| locate(e, xml, position))?;
                data.handle_end(&name).map_err(|e| locate(e, xml, position))?;
            }
            Event::End(ref end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                data.handle_end(&name).map_err(|e| locate(e, xml, position))?;
            }
            Event::Text(ref text) => {
                if matches!(data.top(), State::Literal(_)) {
                    let chunk = text.unescape().map_err(|e| {
                        locate(
                            Error::parse(0, 0, format!("bad character data: {e}")),
                            xml,
                            position,
                        )
                    })?;
                    data.current_value.push_str(&chunk);
                }
            }
            Event::Eof => break,
            // comments are not interpreted
            _ => {}
        }
    }

    if data.stack != vec![State::Start] {
        return Err(Error::parse(
            line_col(xml, xml.len()).0,
            1,
            "unterminated query document",
        ));
    }

    let mut where_sql = data.where_sql;
    if let Some(stripped) = where_sql.strip_suffix(" AND ") {
        // a query with no predicate children keeps only the class filter
        where_sql = stripped.to_string();
    }

    let mut join_sql = String::new();
    for field_data in &data.fields {
        if field_data.is_condition {
            let related = ontology
                .related_field_ids(&field_data.field.name)
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            join_sql.push_str(&format!(
                " INNER JOIN {} {} ON (S.ID = {}.ServiceID AND {}.MetaDataID IN ({}))",
                field_data.table(),
                field_data.alias,
                field_data.alias,
                field_data.alias,
                related
            ));
        } else {
            join_sql.push_str(&format!(
                " LEFT OUTER JOIN {} {} ON (S.ID = {}.ServiceID AND {}.MetaDataID = {})",
                field_data.table(),
                field_data.alias,
                field_data.alias,
                field_data.alias,
                field_data.field.id
            ));
        }
    }

    Ok(QueryFragments {
        from_sql: "FROM Services S".to_string(),
        join_sql,
        where_sql: format!("WHERE{where_sql}"),
    })
}

fn element_name(start: &BytesStart<'_>, xml: &str, position: usize) -> Result<String> {
    std::str::from_utf8(start.name().as_ref())
        .map(str::to_string)
        .map_err(|_| {
            let (line, column) = line_col(xml, position);
            Error::QueryParse {
                line,
                column,
                message: "invalid element name".to_string(),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::Ontology;

    fn translate(xml: &str) -> Result<QueryFragments> {
        let ontology = Ontology::with_defaults();
        parse_query(&ontology, xml)
    }

    #[test]
    fn integer_comparison_joins_numeric_table() {
        let fragments = translate(
            "<query content='Files'><greaterThan><field name='File:Size'/>\
             <integer>1000000</integer></greaterThan></query>",
        )
        .unwrap();

        assert_eq!(fragments.from_sql, "FROM Services S");
        assert!(fragments
            .join_sql
            .contains("INNER JOIN ServiceNumericMetaData M0"));
        assert!(fragments.where_sql.contains("(M0.MetaDataValue > 1000000)"));
        assert!(fragments.where_sql.contains("TypeName = 'Files'"));
    }

    #[test]
    fn contains_lowers_to_like() {
        let fragments = translate(
            "<query content='Files'><contains><field name='File:Name'/>\
             <string>note</string></contains></query>",
        )
        .unwrap();
        assert!(fragments
            .where_sql
            .contains("(M0.MetaDataValue LIKE '%note%')"));
        assert!(fragments.join_sql.contains("INNER JOIN ServiceMetaData M0"));
    }

    #[test]
    fn equals_with_wildcard_lowers_to_glob() {
        let fragments = translate(
            "<query content='Files'><equals><field name='File:Name'/>\
             <string>report*</string></equals></query>",
        )
        .unwrap();
        assert!(fragments.where_sql.contains("GLOB 'report*'"));
    }

    #[test]
    fn starts_with_appends_wildcard() {
        let fragments = translate(
            "<query content='Files'><startsWith><field name='File:Name'/>\
             <string>draft</string></startsWith></query>",
        )
        .unwrap();
        assert!(fragments.where_sql.contains("LIKE 'draft%'"));
    }

    #[test]
    fn in_set_splits_on_commas() {
        let fragments = translate(
            "<query content='Files'><inSet><field name='File:Ext'/>\
             <string>png,jpg,gif</string></inSet></query>",
        )
        .unwrap();
        assert!(fragments.where_sql.contains("IN ('png','jpg','gif')"));
    }

    #[test]
    fn regex_uses_user_function() {
        let fragments = translate(
            "<query content='Files'><regex><field name='File:Name'/>\
             <string>^rep.*$</string></regex></query>",
        )
        .unwrap();
        assert!(fragments.where_sql.contains("REGEXP '^rep.*$'"));
    }

    #[test]
    fn boolean_literals_map_to_numbers() {
        let fragments = translate(
            "<query content='Files'><equals><field name='File:Size'/>\
             <boolean>true</boolean></equals></query>",
        )
        .unwrap();
        assert!(fragments.where_sql.contains("= 1)"));

        let err = translate(
            "<query content='Files'><equals><field name='File:Size'/>\
             <boolean>maybe</boolean></equals></query>",
        );
        assert!(matches!(err, Err(Error::QueryParse { .. })));
    }

    #[test]
    fn date_literals_normalise_to_epoch() {
        let fragments = translate(
            "<query content='Files'><greaterThan><field name='File:Modified'/>\
             <date>1970-01-02</date></greaterThan></query>",
        )
        .unwrap();
        assert!(fragments.where_sql.contains("> 86400)"));
    }

    #[test]
    fn logic_nesting_and_negation() {
        let fragments = translate(
            "<query content='Files'><and negate='true'>\
             <contains><field name='File:Name'/><string>a</string></contains>\
             <contains><field name='File:Name'/><string>b</string></contains>\
             </and></query>",
        )
        .unwrap();
        let w = &fragments.where_sql;
        assert!(w.contains(" NOT "));
        assert!(w.contains("LIKE '%a%'"));
        assert!(w.contains("AND"));
        assert!(w.contains("LIKE '%b%'"));
        // one alias reused for the same field
        assert_eq!(fragments.join_sql.matches("INNER JOIN").count(), 1);
    }

    #[test]
    fn sibling_groups_get_a_connector() {
        let fragments = translate(
            "<query content='Files'><and>\
             <or>\
             <contains><field name='File:Name'/><string>a</string></contains>\
             <contains><field name='File:Name'/><string>b</string></contains>\
             </or>\
             <contains><field name='File:Ext'/><string>txt</string></contains>\
             </and></query>",
        )
        .unwrap();
        let w = &fragments.where_sql;
        assert!(w.contains("OR"));
        // the trailing statement connects to the closed inner group
        let or_group_end = w.rfind("'%b%'").unwrap();
        let tail = &w[or_group_end..];
        assert!(tail.contains("AND"));
        assert!(tail.contains("'%txt%'"));
    }

    #[test]
    fn alias_map_expands_to_disjunction() {
        // xesam:title maps to File:Name and Email:Subject
        let fragments = translate(
            "<query content='Files'><equals><field name='xesam:title'/>\
             <string>hello</string></equals></query>",
        )
        .unwrap();
        assert!(fragments
            .where_sql
            .contains("(M0.MetaDataValue = 'hello') OR (M1.MetaDataValue = 'hello')"));
        assert_eq!(fragments.join_sql.matches("INNER JOIN").count(), 2);
    }

    #[test]
    fn unknown_service_and_field_are_structured_errors() {
        assert!(matches!(
            translate("<query content='Martians'></query>"),
            Err(Error::UnknownService(_))
        ));
        assert!(matches!(
            translate(
                "<query content='Files'><equals><field name='No:Such'/>\
                 <string>x</string></equals></query>"
            ),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn malformed_xml_reports_position() {
        let err = translate("<query content='Files'><and></query>");
        match err {
            Err(Error::QueryParse { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_element_is_rejected() {
        let err = translate("<query content='Files'><sortBy/></query>");
        assert!(matches!(err, Err(Error::QueryParse { .. })));
    }

    #[test]
    fn empty_query_keeps_class_filter_only() {
        let fragments = translate("<query content='Files'></query>").unwrap();
        assert!(fragments.where_sql.starts_with("WHERE"));
        assert!(fragments.where_sql.contains("ServiceTypeID IN"));
        assert!(!fragments.where_sql.trim_end().ends_with("AND"));
        assert!(fragments.join_sql.is_empty());
    }
}
