//! Reading tables from and writing them to data files.
use polars::prelude::*;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::domain::GridError;
use crate::table::{CellValue, FieldType, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Parquet,
    Arrow,
}

#[derive(Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub file_size: u64,
    pub file_type: FileType,
}

pub fn detect_file_type(path: &Path) -> Result<FileType, GridError> {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
        .as_deref()
    {
        Some("CSV") => Ok(FileType::Csv),
        Some("PARQUET") | Some("PQ") => Ok(FileType::Parquet),
        Some("ARROW") | Some("IPC") | Some("FEATHER") => Ok(FileType::Arrow),
        _ => Err(GridError::UnknownFileType),
    }
}

pub fn get_file_info(path: &Path) -> Result<FileInfo, GridError> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => GridError::FileNotFound,
        ErrorKind::PermissionDenied => GridError::PermissionDenied,
        _ => GridError::IoError(e),
    })?;
    if !metadata.is_file() {
        return Err(GridError::LoadingFailed("Not a file!".into()));
    }

    Ok(FileInfo {
        path: path.to_path_buf(),
        file_size: metadata.len(),
        file_type: detect_file_type(path)?,
    })
}

/// Loads a whole data file into a table named after the file. Numeric
/// columns become number fields, everything else text; nulls are empty cells.
pub fn load_table(path: &Path) -> Result<Table, GridError> {
    let file_info = get_file_info(path)?;
    debug!("Loading {:?}", file_info);
    let frame = match file_info.file_type {
        FileType::Csv => load_csv(&file_info.path)?,
        FileType::Parquet => load_parquet(&file_info.path)?,
        FileType::Arrow => load_arrow(&file_info.path)?,
    };

    // Every column is converted on its own thread.
    let start_time = Instant::now();
    let df = frame.collect()?;
    let columns: Vec<(String, FieldType, Vec<CellValue>)> = df
        .get_column_names()
        .par_iter()
        .map(|name| load_column(&df, name))
        .collect::<Result<_, PolarsError>>()?;

    let name = file_info
        .path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("???")
        .to_string();
    let table = Table::from_columns(name, columns);
    info!(
        "Loaded {} rows and {} columns ({} bytes) in {}ms",
        table.len(),
        table.fields().len(),
        file_info.file_size,
        start_time.elapsed().as_millis()
    );
    Ok(table)
}

fn is_numeric_type(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn load_column(
    df: &DataFrame,
    col_name: &str,
) -> Result<(String, FieldType, Vec<CellValue>), PolarsError> {
    let column = df.column(col_name)?;
    if is_numeric_type(column.dtype()) {
        let col = column.cast(&DataType::Float64)?;
        let data = col
            .f64()?
            .into_iter()
            .map(|v| v.map_or(CellValue::Empty, CellValue::Number))
            .collect();
        return Ok((col_name.to_string(), FieldType::Number, data));
    }

    let col = column.cast(&DataType::String)?;
    let data = col
        .str()?
        .into_iter()
        .map(|v| match v {
            Some(s) => CellValue::Text(s.replace("\r\n", " ").replace('\n', " ")),
            None => CellValue::Empty,
        })
        .collect();
    Ok((col_name.to_string(), FieldType::Text, data))
}

fn load_csv(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyCsvReader::new(PlPath::Local(path.into()))
        .with_has_header(true)
        .finish()
}

fn load_parquet(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_parquet(PlPath::Local(path.into()), ScanArgsParquet::default())
}

fn load_arrow(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_ipc(
        PlPath::Local(path.into()),
        polars::io::ipc::IpcScanOptions,
        UnifiedScanArgs::default(),
    )
}

/// Writes every record of `table` to a CSV file with a header line, columns
/// in display order.
pub fn write_csv(table: &Table, path: &Path) -> Result<(), GridError> {
    let start_time = Instant::now();
    let columns: Vec<Column> = table
        .fields()
        .par_iter()
        .map(|field| {
            let id = field.id();
            match field.field_type() {
                FieldType::Number => {
                    let values: Vec<Option<f64>> = table
                        .records()
                        .iter()
                        .map(|r| match r.get(id) {
                            CellValue::Number(n) => Some(*n),
                            _ => None,
                        })
                        .collect();
                    Column::new(field.name().into(), values)
                }
                FieldType::Text => {
                    let values: Vec<Option<String>> = table
                        .records()
                        .iter()
                        .map(|r| match r.get(id) {
                            CellValue::Empty => None,
                            value => Some(value.to_string()),
                        })
                        .collect();
                    Column::new(field.name().into(), values)
                }
            }
        })
        .collect();
    let mut df = DataFrame::new(columns)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)?;
    info!(
        "Wrote {} rows to {:?} in {}ms",
        table.len(),
        path,
        start_time.elapsed().as_millis()
    );
    Ok(())
}
