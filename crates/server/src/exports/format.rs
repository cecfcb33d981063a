//! Rendering of tabular export data into CSV, JSON and XLSX files.

use crate::entity::data_export::ExportFormat;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("XLSX error: {0}")]
    Xlsx(#[from] XlsxError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Export has more than {limit} rows; narrow the filters")]
    TooManyRows { limit: u64 },
    #[error("Query failed: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Empty,
}

impl Cell {
    fn to_text(&self) -> String {
        match self {
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Text(v) => v.clone(),
            Cell::Bool(v) => v.to_string(),
            Cell::Empty => String::new(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Cell::Int(v) => Value::from(*v),
            // Non finite floats have no JSON representation
            Cell::Float(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
            Cell::Text(v) => Value::String(v.clone()),
            Cell::Bool(v) => Value::Bool(*v),
            Cell::Empty => Value::Null,
        }
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(i64::from(v))
    }
}

impl From<u64> for Cell {
    fn from(v: u64) -> Self {
        Cell::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map_or(Cell::Empty, Into::into)
    }
}

/// Named columns plus rows of cells, one sheet worth of data.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTable {
    pub name: String,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<Cell>>,
}

impl ExportTable {
    pub fn new(name: impl Into<String>, columns: Vec<&'static str>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
        match format {
            ExportFormat::Csv => self.to_csv(),
            ExportFormat::Json => self.to_json(),
            ExportFormat::Xlsx => self.to_xlsx(),
        }
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, ExportError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::to_text))?;
        }
        writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
    }

    /// Array of objects keyed by column name.
    pub fn to_json(&self) -> Result<Vec<u8>, ExportError> {
        let objects: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let object: Map<String, Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(column, cell)| ((*column).to_string(), cell.to_json()))
                    .collect();
                Value::Object(object)
            })
            .collect();
        Ok(serde_json::to_vec_pretty(&objects)?)
    }

    pub fn to_xlsx(&self) -> Result<Vec<u8>, ExportError> {
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name(&self.name)?;
        for (col, name) in self.columns.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *name, &header)?;
        }
        for (index, row) in self.rows.iter().enumerate() {
            let r = index as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                let c = col as u16;
                match cell {
                    Cell::Int(v) => {
                        sheet.write_number(r, c, *v as f64)?;
                    }
                    Cell::Float(v) if v.is_finite() => {
                        sheet.write_number(r, c, *v)?;
                    }
                    Cell::Float(_) | Cell::Empty => {}
                    Cell::Text(v) => {
                        sheet.write_string(r, c, v)?;
                    }
                    Cell::Bool(v) => {
                        sheet.write_boolean(r, c, *v)?;
                    }
                }
            }
        }
        Ok(workbook.save_to_buffer()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ExportTable {
        let mut t = ExportTable::new("readings", vec!["id", "value", "unit", "note"]);
        t.push(vec![1.into(), 21.5.into(), "celsius".into(), Cell::Empty]);
        t.push(vec![2.into(), 22.0.into(), "celsius".into(), "a, b".into()]);
        t
    }

    #[test]
    fn csv_has_header_and_quotes_commas() {
        let out = String::from_utf8(table().to_csv().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "id,value,unit,note");
        assert_eq!(lines[1], "1,21.5,celsius,");
        assert_eq!(lines[2], "2,22,celsius,\"a, b\"");
    }

    #[test]
    fn json_is_array_of_objects() {
        let value: Value = serde_json::from_slice(&table().to_json().unwrap()).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[0]["value"], 21.5);
        assert_eq!(rows[0]["note"], Value::Null);
        assert_eq!(rows[1]["note"], "a, b");
    }

    #[test]
    fn xlsx_is_a_zip_container() {
        let bytes = table().to_xlsx().unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));
    }

    #[test]
    fn empty_table_still_renders_header() {
        let t = ExportTable::new("alerts", vec!["id"]);
        assert!(t.is_empty());
        assert_eq!(t.to_csv().unwrap(), b"id\n");
        assert_eq!(t.to_json().unwrap(), b"[]");
    }
}
