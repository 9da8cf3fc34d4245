#![forbid(unsafe_code)]

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, WriterBuilder};
use dl_columnar::{Column, ColumnError};
use dl_frame::{ColumnLabel, Dataset, DatasetOptions, FrameError, Table};
use dl_runtime::LinkConfig;
use dl_types::{DType, ErrorKind, NullKind, Scalar};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("cannot derive a dataset name from {path}")]
    UnnamedSource { path: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl IoError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Column(err) => err.kind(),
            Self::Frame(err) => err.kind(),
            Self::MissingHeaders
            | Self::UnnamedSource { .. }
            | Self::Csv(_)
            | Self::Io(_)
            | Self::Utf8(_) => ErrorKind::Io,
        }
    }
}

/// Parse CSV text into a table, keeping header order.
///
/// Empty fields are missing. A column whose fields are all integers, floats
/// or booleans gets that type; any other mix stays text.
pub fn read_csv_str(input: &str) -> Result<Table, IoError> {
    read_csv(input.as_bytes())
}

pub fn read_csv_path(path: impl AsRef<Path>) -> Result<Table, IoError> {
    read_csv(File::open(path)?)
}

/// Read a CSV file as a dataset named after the file stem.
pub fn read_dataset_path(
    path: impl AsRef<Path>,
    options: DatasetOptions,
    config: &LinkConfig,
) -> Result<Dataset, IoError> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IoError::UnnamedSource {
            path: path.display().to_string(),
        })?
        .to_owned();
    let table = read_csv_path(path)?;
    let options = DatasetOptions {
        source: Some(path.to_path_buf()),
        ..options
    };
    Ok(Dataset::new(name, table, options, config)?)
}

fn read_csv(input: impl Read) -> Result<Table, IoError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(input);

    let headers = reader.headers().cloned().map_err(IoError::from)?;
    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }

    let mut fields = vec![Vec::<String>::new(); headers.len()];
    for row in reader.records() {
        let record = row?;
        for (idx, values) in fields.iter_mut().enumerate() {
            values.push(record.get(idx).unwrap_or_default().trim().to_owned());
        }
    }

    let columns = fields
        .into_iter()
        .map(|values| typed_column(&values))
        .collect::<Result<Vec<_>, _>>()?;
    let labels = headers.iter().map(ColumnLabel::from).collect::<Vec<_>>();
    Ok(Table::new(labels, columns)?)
}

fn typed_column(fields: &[String]) -> Result<Column, ColumnError> {
    let parsed = fields.iter().map(|field| parse_scalar(field)).collect::<Vec<_>>();
    match Column::from_values(parsed) {
        Ok(column) => Ok(column),
        Err(ColumnError::Type(_)) => Column::new(
            DType::Utf8,
            fields
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Scalar::Null(NullKind::Null)
                    } else {
                        Scalar::Utf8(field.clone())
                    }
                })
                .collect(),
        ),
        Err(err) => Err(err),
    }
}

fn parse_scalar(field: &str) -> Scalar {
    if field.is_empty() {
        return Scalar::Null(NullKind::Null);
    }

    if let Ok(value) = field.parse::<i64>() {
        return Scalar::Int64(value);
    }
    if let Ok(value) = field.parse::<f64>() {
        return Scalar::Float64(value);
    }
    if let Ok(value) = field.parse::<bool>() {
        return Scalar::Bool(value);
    }

    Scalar::Utf8(field.to_owned())
}

/// Render a table as CSV; two-level labels are written as `level.name`.
pub fn write_csv_string(table: &Table) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    writer.write_record(table.labels().iter().map(ToString::to_string))?;
    for row_idx in 0..table.nrows() {
        let row = table
            .columns()
            .iter()
            .map(|column| column.value(row_idx).map_or_else(String::new, scalar_to_csv));
        writer.write_record(row)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

pub fn write_csv_path(table: &Table, path: impl AsRef<Path>) -> Result<(), IoError> {
    std::fs::write(path, write_csv_string(table)?)?;
    Ok(())
}

fn datetime_to_csv(value: &NaiveDateTime) -> String {
    if value.time() == NaiveTime::MIN {
        value.format("%Y-%m-%d").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn scalar_to_csv(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Null(_) => String::new(),
        Scalar::Bool(v) => v.to_string(),
        Scalar::Int64(v) => v.to_string(),
        Scalar::Float64(v) => {
            if v.is_nan() {
                String::new()
            } else {
                v.to_string()
            }
        }
        Scalar::Utf8(v) => v.clone(),
        Scalar::Datetime(v) => datetime_to_csv(v),
    }
}
