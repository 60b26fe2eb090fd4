//! A virtualized, editable and filterable data grid engine.
//!
//! The [`grid::Grid`] owns a [`table::Table`] and keeps the derived views in
//! step with it: the paged prefix ([`pager`]), the rows passing search and
//! filters ([`filter`]) and the window of rows worth rendering ([`viewport`]).
pub mod domain;
pub mod filter;
pub mod generator;
pub mod grid;
pub mod inputter;
pub mod loader;
pub mod pager;
pub mod remote;
pub mod table;
pub mod viewport;

pub use domain::{GridConfig, GridError, Message, Rejection};
pub use grid::Grid;
pub use table::{CellValue, Field, FieldId, FieldType, Record, RecordId, Table};
