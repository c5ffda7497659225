//! Source extractors.
//!
//! Each reader turns one input file into raw records without interpreting
//! them: no key normalization, no numeric coercion. A file that is missing or
//! malformed fails the run; there is no partial-success mode.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, info};

use crate::error::ExtractError;

/// A single raw cell.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Missing,
    Text(String),
    Number(f64),
}

impl RawValue {
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            RawValue::Missing
        } else {
            RawValue::Text(text.to_string())
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, RawValue::Missing)
    }

    /// Textual form of the cell; numbers render without a trailing `.0`.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            RawValue::Missing => None,
            RawValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
            RawValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(Cow::Owned(format!("{}", *n as i64)))
            }
            RawValue::Number(n) => Some(Cow::Owned(n.to_string())),
        }
    }
}

pub type RawRecord = BTreeMap<String, RawValue>;

/// Header plus records, as read from a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl RawTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|source| ExtractError::Io {
        origin: path.display().to_string(),
        source,
    })
}

// =============================================================================
// Delimited files
// =============================================================================

pub fn read_delimited(path: &Path) -> Result<RawTable, ExtractError> {
    info!(path = %path.display(), "reading delimited file");
    let bytes = read_bytes(path)?;
    parse_delimited(&bytes, &path.display().to_string())
}

/// Parse comma-separated bytes. Columns map 1:1 to fields; empty cells are
/// missing. Ragged rows are an error.
pub fn parse_delimited(bytes: &[u8], origin: &str) -> Result<RawTable, ExtractError> {
    let (text, had_errors) = encoding_rs::UTF_8.decode_with_bom_removal(bytes);
    if had_errors {
        debug!(origin, "replaced invalid UTF-8 sequences while decoding");
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let csv_error = |source| ExtractError::Csv {
        origin: origin.to_string(),
        source,
    };

    let columns: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.to_string())
        .collect();
    check_unique_columns(&columns, origin)?;

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(csv_error)?;
        let record: RawRecord = columns
            .iter()
            .zip(row.iter())
            .map(|(column, cell)| (column.clone(), RawValue::from_text(cell)))
            .collect();
        records.push(record);
    }

    if records.is_empty() {
        return Err(ExtractError::layout(origin, "no data rows"));
    }

    debug!(origin, rows = records.len(), columns = columns.len(), "parsed delimited file");
    Ok(RawTable { columns, records })
}

fn check_unique_columns(columns: &[String], origin: &str) -> Result<(), ExtractError> {
    let mut seen = std::collections::BTreeSet::new();
    for column in columns {
        if !seen.insert(column.as_str()) {
            return Err(ExtractError::layout(
                origin,
                format!("duplicate column '{column}'"),
            ));
        }
    }
    Ok(())
}

// =============================================================================
// Spreadsheets
// =============================================================================

/// Read an entity × year grid. Workbooks go through calamine (first sheet
/// unless one is named); a `.csv` export of the same grid is also accepted.
pub fn read_spreadsheet(path: &Path, sheet: Option<&str>) -> Result<RawTable, ExtractError> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        return read_delimited(path);
    }

    let origin = path.display().to_string();
    info!(path = %origin, "reading workbook");

    let workbook_error = |message: String| ExtractError::Workbook {
        origin: origin.clone(),
        message,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(e.to_string()))?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| workbook_error("workbook has no sheets".to_string()))?,
    };
    debug!(sheet = %sheet_name, "using sheet");

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| workbook_error(format!("sheet '{sheet_name}': {e}")))?;

    grid_to_table(&range, &origin)
}

/// First row is the header; fully empty rows are skipped.
pub fn grid_to_table(range: &Range<Data>, origin: &str) -> Result<RawTable, ExtractError> {
    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| ExtractError::layout(origin, "sheet is empty"))?;

    let columns: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(idx, cell)| match header_text(cell) {
            Some(text) => text,
            None => format!("unnamed_{idx}"),
        })
        .collect();
    check_unique_columns(&columns, origin)?;

    let mut records = Vec::new();
    for row in rows {
        let record: RawRecord = columns
            .iter()
            .zip(row.iter())
            .map(|(column, cell)| (column.clone(), cell_value(cell)))
            .collect();
        if record.values().all(RawValue::is_missing) {
            continue;
        }
        records.push(record);
    }

    if records.is_empty() {
        return Err(ExtractError::layout(origin, "no data rows"));
    }

    Ok(RawTable { columns, records })
}

fn header_text(cell: &Data) -> Option<String> {
    match cell_value(cell) {
        RawValue::Missing => None,
        other => other.as_text().map(|t| t.into_owned()),
    }
}

fn cell_value(cell: &Data) -> RawValue {
    match cell {
        Data::Empty | Data::Error(_) => RawValue::Missing,
        Data::String(s) => RawValue::from_text(s),
        Data::Float(f) => RawValue::Number(*f),
        Data::Int(i) => RawValue::Number(*i as f64),
        other => RawValue::from_text(&other.to_string()),
    }
}

// =============================================================================
// Hierarchical feed (XML)
// =============================================================================

/// One `<field>` element of a feed record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedField {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
}

pub type FeedRecord = Vec<FeedField>;

pub fn read_feed(path: &Path) -> Result<Vec<FeedRecord>, ExtractError> {
    info!(path = %path.display(), "reading XML feed");
    let bytes = read_bytes(path)?;
    parse_feed(&bytes, &path.display().to_string())
}

/// Walk `<data><record><field name="..">..</field>..</record>..</data>`
/// under any root element. Fields are collected in document order.
pub fn parse_feed(xml: &[u8], origin: &str) -> Result<Vec<FeedRecord>, ExtractError> {
    let xml_error = |message: String| ExtractError::Xml {
        origin: origin.to_string(),
        message,
    };

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut records: Vec<FeedRecord> = Vec::new();
    let mut record: Option<FeedRecord> = None;
    let mut field: Option<FeedField> = None;
    let mut buf = Vec::new();

    loop {
        let position = reader.buffer_position();
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_error(format!("{e} near byte {position}")))?
        {
            Event::Start(ref e) => {
                let local = e.local_name().as_ref().to_vec();
                match (parent(&stack), local.as_slice()) {
                    (Some(b"data"), b"record") => record = Some(Vec::new()),
                    (Some(b"record"), b"field") if record.is_some() => {
                        field = Some(start_field(e, &xml_error)?);
                    }
                    _ => {}
                }
                stack.push(local);
            }
            Event::Empty(ref e) => {
                let local = e.local_name();
                if parent(&stack) == Some(&b"record"[..]) && local.as_ref() == b"field" {
                    if let Some(current) = record.as_mut() {
                        current.push(start_field(e, &xml_error)?);
                    }
                }
            }
            Event::Text(ref t) => {
                if let Some(current) = field.as_mut() {
                    let text = t.unescape().map_err(|e| xml_error(e.to_string()))?;
                    current.text.get_or_insert_with(String::new).push_str(&text);
                }
            }
            Event::CData(ref t) => {
                if let Some(current) = field.as_mut() {
                    let text = String::from_utf8_lossy(t);
                    current.text.get_or_insert_with(String::new).push_str(&text);
                }
            }
            Event::End(_) => {
                match stack.pop().as_deref() {
                    Some(b"field") => {
                        if let (Some(done), Some(current)) = (field.take(), record.as_mut()) {
                            current.push(done);
                        }
                    }
                    Some(b"record") => {
                        if let Some(done) = record.take() {
                            records.push(done);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(xml_error("unexpected end of document".to_string()));
    }
    if records.is_empty() {
        return Err(ExtractError::layout(origin, "no data/record elements"));
    }

    debug!(origin, records = records.len(), "parsed XML feed");
    Ok(records)
}

fn parent(stack: &[Vec<u8>]) -> Option<&[u8]> {
    stack.last().map(Vec::as_slice)
}

fn start_field(
    e: &BytesStart<'_>,
    xml_error: &impl Fn(String) -> ExtractError,
) -> Result<FeedField, ExtractError> {
    let mut field = FeedField::default();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_error(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| xml_error(err.to_string()))?
            .into_owned();
        if key == "name" {
            field.name = value;
        } else {
            field.attributes.insert(key, value);
        }
    }
    if field.name.is_empty() {
        return Err(xml_error("<field> without a name attribute".to_string()));
    }
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // -------------------------------------------------------------------------
    // DELIMITED
    // -------------------------------------------------------------------------

    #[test]
    fn test_delimited_maps_columns_one_to_one() {
        let csv = "country,Safety Value,Safety Category\nGermany,': 65.2,High\nChad,,\n";
        let table = parse_delimited(csv.as_bytes(), "survey").unwrap();

        assert_eq!(table.columns, vec!["country", "Safety Value", "Safety Category"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0]["Safety Value"], RawValue::Text("': 65.2".into()));
        assert_eq!(table.records[1]["Safety Value"], RawValue::Missing);
        assert_eq!(table.records[1]["Safety Category"], RawValue::Missing);
    }

    #[test]
    fn test_delimited_strips_bom_and_trims_headers() {
        let csv = "\u{feff} country , value \nPeru,1\n";
        let table = parse_delimited(csv.as_bytes(), "survey").unwrap();
        assert_eq!(table.columns, vec!["country", "value"]);
    }

    #[test]
    fn test_delimited_quoted_commas_survive() {
        let csv = "country,value\n\"Korea, Rep.\",\"1,234\"\n";
        let table = parse_delimited(csv.as_bytes(), "survey").unwrap();
        assert_eq!(table.records[0]["country"], RawValue::Text("Korea, Rep.".into()));
        assert_eq!(table.records[0]["value"], RawValue::Text("1,234".into()));
    }

    #[test]
    fn test_delimited_ragged_row_fails() {
        let csv = "country,value\nPeru,1,extra\n";
        let err = parse_delimited(csv.as_bytes(), "survey").unwrap_err();
        assert!(matches!(err, ExtractError::Csv { .. }));
    }

    #[test]
    fn test_delimited_header_only_fails() {
        let err = parse_delimited(b"country,value\n", "survey").unwrap_err();
        assert!(matches!(err, ExtractError::Layout { .. }));
    }

    #[test]
    fn test_delimited_duplicate_header_fails() {
        let err = parse_delimited(b"country,country\nA,B\n", "survey").unwrap_err();
        assert!(err.to_string().contains("duplicate column"));
    }

    #[test]
    fn test_missing_file_fails() {
        let err = read_delimited(Path::new("/nonexistent/survey.csv")).unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }

    // -------------------------------------------------------------------------
    // SPREADSHEET
    // -------------------------------------------------------------------------

    fn gdp_grid() -> Range<Data> {
        let mut range = Range::new((0, 0), (2, 2));
        range.set_value((0, 0), Data::String("Country".into()));
        range.set_value((0, 1), Data::Float(2020.0));
        range.set_value((0, 2), Data::String("2021".into()));
        range.set_value((1, 0), Data::String("Germany".into()));
        range.set_value((1, 1), Data::Float(3_940_142.5));
        range.set_value((1, 2), Data::String("no data".into()));
        range
    }

    #[test]
    fn test_grid_header_numbers_render_as_years() {
        let table = grid_to_table(&gdp_grid(), "gdp.xlsx").unwrap();
        assert_eq!(table.columns, vec!["Country", "2020", "2021"]);
    }

    #[test]
    fn test_grid_cells_keep_their_raw_type_and_skip_empty_rows() {
        let table = grid_to_table(&gdp_grid(), "gdp.xlsx").unwrap();
        assert_eq!(table.len(), 1);
        let row = &table.records[0];
        assert_eq!(row["Country"], RawValue::Text("Germany".into()));
        assert_eq!(row["2020"], RawValue::Number(3_940_142.5));
        assert_eq!(row["2021"], RawValue::Text("no data".into()));
    }

    #[test]
    fn test_spreadsheet_accepts_csv_export() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Country,2020,2021").unwrap();
        writeln!(file, "Germany,3940142.5,4259934.9").unwrap();

        let table = read_spreadsheet(file.path(), None).unwrap();
        assert_eq!(table.columns, vec!["Country", "2020", "2021"]);
        assert_eq!(table.records[0]["2021"], RawValue::Text("4259934.9".into()));
    }

    #[test]
    fn test_spreadsheet_garbage_workbook_fails() {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        file.write_all(b"definitely not a zip archive").unwrap();
        let err = read_spreadsheet(file.path(), None).unwrap_err();
        assert!(matches!(err, ExtractError::Workbook { .. }));
    }

    // -------------------------------------------------------------------------
    // FEED
    // -------------------------------------------------------------------------

    const FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Root xmlns:wb="http://www.worldbank.org">
  <data>
    <record>
      <field name="Country or Area" key="DEU">Germany</field>
      <field name="Item" key="SP.POP.TOTL">Population, total</field>
      <field name="Year">2023</field>
      <field name="Value">84482267</field>
    </record>
    <record>
      <field name="Year">2023</field>
      <field name="Country or Area" key="CIV">Cote d&apos;Ivoire</field>
      <field name="Item" key="SP.POP.TOTL">Population, total</field>
      <field name="Value" />
    </record>
  </data>
</Root>"#;

    #[test]
    fn test_feed_collects_fields_with_attributes() {
        let records = parse_feed(FEED.as_bytes(), "pop.xml").unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].name, "Country or Area");
        assert_eq!(first[0].attributes["key"], "DEU");
        assert_eq!(first[0].text.as_deref(), Some("Germany"));
    }

    #[test]
    fn test_feed_unescapes_text_and_keeps_empty_fields() {
        let records = parse_feed(FEED.as_bytes(), "pop.xml").unwrap();
        let second = &records[1];
        assert_eq!(second[1].text.as_deref(), Some("Cote d'Ivoire"));
        assert_eq!(second[3].name, "Value");
        assert_eq!(second[3].text, None);
    }

    #[test]
    fn test_feed_ignores_fields_outside_records() {
        let xml = r#"<Root><field name="stray">x</field><data><record><field name="Year">2020</field></record></data></Root>"#;
        let records = parse_feed(xml.as_bytes(), "pop.xml").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 1);
    }

    #[test]
    fn test_feed_malformed_xml_fails() {
        let xml = "<Root><data><record><field name=\"Year\">2020</record></data></Root>";
        let err = parse_feed(xml.as_bytes(), "pop.xml").unwrap_err();
        assert!(matches!(err, ExtractError::Xml { .. }));
    }

    #[test]
    fn test_feed_without_records_fails() {
        let err = parse_feed(b"<Root><data></data></Root>", "pop.xml").unwrap_err();
        assert!(matches!(err, ExtractError::Layout { .. }));
    }
}
