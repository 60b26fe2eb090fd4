use std::fmt;
use std::io::Error;
use std::time::Duration;

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;

use crate::filter::Operator;
use crate::table::{FieldId, FieldType, Side};

pub const PAGE_SIZE: usize = 100;
pub const ROW_HEIGHT: usize = 40;
pub const OVERSCAN: usize = 10;
pub const LOAD_THRESHOLD: usize = 10;
pub const LOAD_LATENCY_MS: u64 = 300;
pub const EVENT_POLL_TIME: u64 = 100;
pub const MAX_COLUMN_WIDTH: usize = 30;
pub const DEMO_ROWS: usize = 100;
pub const BULK_ROWS: usize = 100_000;

pub const HELP_TEXT: &str = "
Movement
  ←↓↑→ hjkl   Move the active cell
  PgUp/PgDn   Move one page
  Home/End gG First/last loaded row

Editing
  Enter       Edit the active cell, Enter/Tab commit, Esc cancels
  a           Add a row
  b           Add rows in bulk (asks for a count)
  n / N       Add a text / number column
  m           Column menu (sort, filter, insert, duplicate, rename, delete)
              Inserted columns are text unless named like Score:number
  < / >       Move the active column left / right
  T           New empty table

Viewing
  /           Search all columns
  f           Filter the active column
  x           Clear all filters and the search
  s / S       Sort the active column ascending / descending
  L           Load the next page
  y / Y       Copy cell / row to the clipboard
  ?           This help
  q, Ctrl-c   Quit
";

#[derive(Debug)]
pub enum GridError {
    IoError(Error),
    PolarsError(PolarsError),
    LoadingFailed(String),
    FileNotFound,
    PermissionDenied,
    UnknownFileType,
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::IoError(e) => write!(f, "io error: {e}"),
            GridError::PolarsError(e) => write!(f, "polars error: {e}"),
            GridError::LoadingFailed(reason) => write!(f, "loading failed: {reason}"),
            GridError::FileNotFound => write!(f, "file not found"),
            GridError::PermissionDenied => write!(f, "permission denied"),
            GridError::UnknownFileType => write!(f, "unknown file type"),
        }
    }
}

impl std::error::Error for GridError {}

impl From<Error> for GridError {
    fn from(err: Error) -> Self {
        GridError::IoError(err)
    }
}

impl From<PolarsError> for GridError {
    fn from(err: PolarsError) -> Self {
        GridError::PolarsError(err)
    }
}

/// Reasons an engine operation refused to run. None of them are fatal, the
/// grid reports them through its status message and carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BlankName,
    LastField,
    MissingOperand,
    InvalidNumber,
    UnsupportedOperator,
    UnknownField,
    Busy,
    NoMorePages,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Rejection::BlankName => "Name must not be empty",
            Rejection::LastField => "Cannot delete the last column",
            Rejection::MissingOperand => "This filter needs a value",
            Rejection::InvalidNumber => "Filter value is not a number",
            Rejection::UnsupportedOperator => "Operator does not apply to this column type",
            Rejection::UnknownField => "Column no longer exists",
            Rejection::Busy => "Still working, try again in a moment",
            Rejection::NoMorePages => "All rows are loaded",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, Setters)]
pub struct GridConfig {
    pub page_size: usize,
    pub row_height: usize,
    pub overscan: usize,
    pub load_threshold: usize,
    pub load_latency: Duration,
    pub event_poll_time: u64,
    pub max_column_width: usize,
    pub bulk_rows: usize,
    #[setters(strip_option)]
    pub seed: Option<u64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            page_size: PAGE_SIZE,
            row_height: ROW_HEIGHT,
            overscan: OVERSCAN,
            load_threshold: LOAD_THRESHOLD,
            load_latency: Duration::from_millis(LOAD_LATENCY_MS),
            event_poll_time: EVENT_POLL_TIME,
            max_column_width: MAX_COLUMN_WIDTH,
            bulk_rows: BULK_ROWS,
            seed: None,
        }
    }
}

/// What a line of command input is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CMDMode {
    Search,
    AddField(FieldType),
    InsertField(FieldId, Side),
    RenameField(FieldId),
    FilterValue(FieldId, Operator),
    BulkRows,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveBeginning,
    MoveEnd,
    /// Rows available for the table body.
    Resize(usize),
    Enter,
    Exit,
    Blur,
    Help,
    Search,
    FieldMenu,
    Filter,
    ClearFilters,
    SortAscending,
    SortDescending,
    AddRecord,
    AddBulk,
    AddTextField,
    AddNumberField,
    MoveFieldLeft,
    MoveFieldRight,
    NewTable,
    LoadMore,
    CopyCell,
    CopyRow,
    RawKey(KeyEvent),
}
