use std::time::Instant;

use ratatui::crossterm::event::KeyEvent;
use tracing::{debug, info, trace, warn};

use crate::domain::{CMDMode, DEMO_ROWS, GridConfig, GridError, Message, Rejection};
use crate::filter::{self, FilterId, FilterSet, Operator};
use crate::generator::{self, RecordGenerator, SyntheticGenerator};
use crate::inputter::{InputOutcome, Inputter};
use crate::pager::{PageTicket, Pager};
use crate::table::{
    CellValue, Field, FieldId, FieldType, Record, RecordId, Side, SortDirection, Table, TableId,
};
use crate::viewport::{Viewport, VirtualWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Loading,
    Processing,
    Quitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    SortAscending,
    SortDescending,
    Filter,
    InsertLeft,
    InsertRight,
    Duplicate,
    Rename,
    Delete,
}

impl MenuAction {
    pub const ALL: [MenuAction; 8] = [
        MenuAction::SortAscending,
        MenuAction::SortDescending,
        MenuAction::Filter,
        MenuAction::InsertLeft,
        MenuAction::InsertRight,
        MenuAction::Duplicate,
        MenuAction::Rename,
        MenuAction::Delete,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MenuAction::SortAscending => "Sort ascending",
            MenuAction::SortDescending => "Sort descending",
            MenuAction::Filter => "Filter ...",
            MenuAction::InsertLeft => "Insert column left",
            MenuAction::InsertRight => "Insert column right",
            MenuAction::Duplicate => "Duplicate column",
            MenuAction::Rename => "Rename column",
            MenuAction::Delete => "Delete column",
        }
    }
}

/// The popover currently shown on top of the table. `selected` is the
/// highlighted entry of its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Popover {
    None,
    Filter { field: FieldId, selected: usize },
    FieldMenu { field: FieldId, selected: usize },
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Position of the active cell: `row` indexes the display sequence, `column`
/// the fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveCell {
    pub row: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct EditState {
    pub record: RecordId,
    pub field: FieldId,
    pub input: Inputter,
}

#[derive(Debug, Clone, Copy)]
struct PendingPage {
    ticket: PageTicket,
    ready_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct BulkJob {
    table: TableId,
    count: usize,
}

pub type TableCallback = Box<dyn FnMut(&Table)>;

/// Owns the table and everything derived from it. Every mutation goes through
/// here and is followed by an explicit recomputation of the display set and
/// the virtual window.
pub struct Grid {
    config: GridConfig,
    table: Table,
    pager: Pager,
    filters: FilterSet,
    search: String,
    display: Vec<usize>,
    viewport: Viewport,
    window: VirtualWindow,
    active: ActiveCell,
    editing: Option<EditState>,
    popover: Popover,
    cmd: Option<(CMDMode, Inputter)>,
    pending_page: Option<PendingPage>,
    pending_bulk: Option<BulkJob>,
    generator: Box<dyn RecordGenerator>,
    on_replace: Option<TableCallback>,
    pub status: Status,
    status_message: String,
    last_status_message_update: Instant,
}

impl Grid {
    /// Starts on `table`, or on the demo table when the host has none.
    pub fn new(config: GridConfig, table: Option<Table>) -> Self {
        let generator: Box<dyn RecordGenerator> = match config.seed {
            Some(seed) => Box::new(SyntheticGenerator::seeded(seed)),
            None => Box::new(SyntheticGenerator::random()),
        };
        let table = match table {
            Some(table) => table,
            None => generator::demo_table(DEMO_ROWS, generator.seed()),
        };
        info!(
            "Opening \"{}\" with {} rows and {} columns",
            table.name(),
            table.len(),
            table.fields().len()
        );
        let pager = Pager::new(&table, config.page_size);
        let viewport = Viewport::new(config.row_height, config.overscan, config.load_threshold);
        let mut grid = Grid {
            config,
            table,
            pager,
            filters: FilterSet::default(),
            search: String::new(),
            display: Vec::new(),
            viewport,
            window: VirtualWindow::default(),
            active: ActiveCell::default(),
            editing: None,
            popover: Popover::None,
            cmd: None,
            pending_page: None,
            pending_bulk: None,
            generator,
            on_replace: None,
            status: Status::Ready,
            status_message: String::new(),
            last_status_message_update: Instant::now(),
        };
        grid.refresh_display(true);
        grid
    }

    pub fn with_generator(mut self, generator: Box<dyn RecordGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Called with the new table whenever the table is replaced wholesale.
    pub fn on_table_replaced(mut self, callback: impl FnMut(&Table) + 'static) -> Self {
        self.on_replace = Some(Box::new(callback));
        self
    }

    // -------------------- Read access ---------------------- //

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    /// Positions in the record sequence of the rows on display, in order.
    pub fn display(&self) -> &[usize] {
        &self.display
    }

    pub fn display_record(&self, idx: usize) -> Option<&Record> {
        self.display.get(idx).map(|&i| &self.table.records()[i])
    }

    pub fn window(&self) -> VirtualWindow {
        self.window
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// The rows of the current window with their display index.
    pub fn window_rows(&self) -> impl Iterator<Item = (usize, &Record)> {
        self.window
            .range()
            .filter_map(move |idx| self.display_record(idx).map(|r| (idx, r)))
    }

    pub fn active(&self) -> ActiveCell {
        self.active
    }

    pub fn active_field(&self) -> Option<&Field> {
        self.table.fields().get(self.active.column)
    }

    pub fn active_record(&self) -> Option<&Record> {
        self.display_record(self.active.row)
    }

    pub fn editing(&self) -> Option<&EditState> {
        self.editing.as_ref()
    }

    pub fn popover(&self) -> Popover {
        self.popover
    }

    pub fn cmd(&self) -> Option<(CMDMode, &Inputter)> {
        self.cmd.as_ref().map(|(mode, input)| (*mode, input))
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn last_status_message_update(&self) -> Instant {
        self.last_status_message_update
    }

    pub fn is_bulk_pending(&self) -> bool {
        self.pending_bulk.is_some()
    }

    /// Keys go to an input line instead of being mapped to messages.
    pub fn raw_keyevents(&self) -> bool {
        self.editing.is_some() || self.cmd.is_some()
    }

    pub fn active_cell_text(&self) -> Option<String> {
        let field = self.active_field()?;
        Some(self.active_record()?.get(field.id()).to_string())
    }

    /// The active row as one comma separated line.
    pub fn active_row_text(&self) -> Option<String> {
        let record = self.active_record()?;
        let content = self
            .table
            .fields()
            .iter()
            .map(|f| wrap_cell_content(&record.get(f.id()).to_string()))
            .collect::<Vec<String>>();
        Some(content.join(","))
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.last_status_message_update = Instant::now();
    }

    fn reject(&mut self, rejection: Rejection) {
        warn!("Rejected: {rejection}");
        self.set_status_message(rejection.to_string());
    }

    // -------------------- Derived views ---------------------- //

    /// Recomputes the display set from the loaded prefix. With `reset` the
    /// display is a different sequence: measurements are dropped and the view
    /// returns to the top.
    fn refresh_display(&mut self, reset: bool) {
        let loaded = self.pager.loaded_records(&self.table);
        self.display = filter::recompute(loaded, self.table.fields(), &self.filters, &self.search);
        if reset {
            self.viewport.reset(self.display.len());
            self.active.row = 0;
        } else {
            self.viewport.set_count(self.display.len());
        }
        self.clamp_active();
        self.update_window();
    }

    fn clamp_active(&mut self) {
        self.active.row = self.active.row.min(self.display.len().saturating_sub(1));
        self.active.column = self.active.column.min(self.table.fields().len() - 1);
    }

    /// Recomputes the window and asks for the next page once it gets close
    /// to the end of what is loaded.
    fn update_window(&mut self) {
        self.window = self.viewport.window();
        trace!(
            "Window {:?} of {} rows, extent {}",
            self.window.range(),
            self.display.len(),
            self.window.total_extent
        );
        // An empty prefix has no window to reach the end of.
        let starved = self.pager.loaded() == 0;
        if (starved || self.viewport.near_end(&self.window)) && self.pager.can_request() {
            // the loader has been checked, this cannot be rejected
            let _ = self.request_more();
        }
    }

    // -------------------- Scheduling ---------------------- //

    /// Starts loading the next page. It lands after the configured latency,
    /// on the first `tick` past it.
    pub fn request_more(&mut self) -> Result<(), Rejection> {
        let ticket = self.pager.request_more()?;
        self.pending_page = Some(PendingPage {
            ticket,
            ready_at: Instant::now() + self.config.load_latency,
        });
        self.status = Status::Loading;
        self.set_status_message("Loading ...");
        Ok(())
    }

    /// Runs whatever deferred work is due: a page load whose latency has
    /// passed and a pending bulk generation. Results meant for a table that
    /// has since been replaced are dropped. Returns whether anything changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if let Some(pending) = self.pending_page
            && now >= pending.ready_at
        {
            self.pending_page = None;
            match self.pager.complete(pending.ticket, &self.table) {
                Some(added) => {
                    self.refresh_display(false);
                    self.set_status_message(format!(
                        "Loaded {added} rows, {} of {}",
                        self.pager.loaded(),
                        self.table.len()
                    ));
                    changed = true;
                }
                None => debug!("Dropped page {} of a previous table", pending.ticket.page),
            }
        }
        if let Some(job) = self.pending_bulk.take() {
            if job.table == self.table.id() {
                self.run_bulk(job.count);
                changed = true;
            } else {
                debug!(
                    "Dropped generation of {} rows for a previous table",
                    job.count
                );
            }
        }
        self.status = if self.status == Status::Quitting {
            Status::Quitting
        } else if self.pending_page.is_some() {
            Status::Loading
        } else {
            Status::Ready
        };
        changed
    }

    fn run_bulk(&mut self, count: usize) {
        let (fields, first_row) = (self.table.fields(), self.table.len());
        let rows = generator::generate_rows(self.generator.as_ref(), fields, first_row, count);
        let added = self.table.push_records(rows);
        self.pager.reconcile(&self.table);
        self.refresh_display(false);
        info!("Added {added} rows, table now has {}", self.table.len());
        self.set_status_message(format!("Added {added} rows"));
    }

    // -------------------- Table lifecycle ---------------------- //

    /// Swaps in a new table. Filters, search and paging start over and the
    /// host is notified.
    pub fn replace_table(&mut self, table: Table) {
        info!(
            "Replacing \"{}\" with \"{}\" ({} rows)",
            self.table.name(),
            table.name(),
            table.len()
        );
        self.table = table;
        self.filters.clear();
        self.search.clear();
        self.pager.reset(&self.table);
        self.editing = None;
        self.cmd = None;
        self.popover = Popover::None;
        self.active = ActiveCell::default();
        self.refresh_display(true);
        if let Some(callback) = self.on_replace.as_mut() {
            callback(&self.table);
        }
    }

    /// A new table with the default schema, empty or with `rows` generated rows.
    pub fn new_table(&mut self, rows: usize) {
        let table = generator::blank_table("Untitled Table", rows, self.generator.as_ref());
        self.replace_table(table);
        self.set_status_message("New table");
    }

    // -------------------- Schema ---------------------- //

    pub fn add_field(&mut self, name: &str, field_type: FieldType) -> Option<FieldId> {
        let Some(field) = self.table.add_field(name, field_type) else {
            self.reject(Rejection::BlankName);
            return None;
        };
        self.refresh_display(false);
        self.active.column = self.table.fields().len() - 1;
        Some(field.id())
    }

    pub fn insert_field(
        &mut self,
        anchor: FieldId,
        side: Side,
        name: &str,
        field_type: FieldType,
    ) -> Option<FieldId> {
        if name.trim().is_empty() {
            self.reject(Rejection::BlankName);
            return None;
        }
        let field = self.table.insert_field(anchor, side, name, field_type)?;
        self.refresh_display(false);
        if let Some(idx) = self.table.field_index(field.id()) {
            self.active.column = idx;
        }
        Some(field.id())
    }

    pub fn rename_field(&mut self, field: FieldId, name: &str) -> bool {
        if name.trim().is_empty() {
            self.reject(Rejection::BlankName);
            return false;
        }
        self.table.rename_field(field, name)
    }

    pub fn duplicate_field(&mut self, field: FieldId) -> Option<FieldId> {
        let copy = self.table.duplicate_field(field)?;
        self.refresh_display(false);
        Some(copy.id())
    }

    pub fn delete_field(&mut self, field: FieldId) -> Result<(), Rejection> {
        match self.table.delete_field(field) {
            Ok(deleted) => {
                self.filters.retain_fields(&self.table);
                if let Some(edit) = &self.editing
                    && edit.field == deleted.id()
                {
                    self.editing = None;
                }
                self.refresh_display(false);
                self.set_status_message(format!("Deleted column \"{}\"", deleted.name()));
                Ok(())
            }
            Err(Rejection::UnknownField) => Ok(()),
            Err(rejection) => {
                self.reject(rejection);
                Err(rejection)
            }
        }
    }

    pub fn move_field(&mut self, field: FieldId, to: usize) -> bool {
        if !self.table.move_field(field, to) {
            return false;
        }
        if let Some(idx) = self.table.field_index(field) {
            self.active.column = idx;
        }
        self.update_window();
        true
    }

    // -------------------- Rows ---------------------- //

    /// Appends a row and makes it the active one when it is on display.
    pub fn add_record(&mut self, defaults: &[(FieldId, CellValue)]) -> RecordId {
        let id = self.table.add_record(defaults).id();
        self.pager.extend_loaded(1, &self.table);
        self.refresh_display(false);
        if let Ok(pos) = self.display.binary_search(&(self.table.len() - 1)) {
            self.active.row = pos;
            self.viewport.scroll_into_view(pos);
            self.update_window();
        }
        id
    }

    /// Schedules `count` generated rows. The work happens on the next
    /// `tick`, so the host gets to draw in between.
    pub fn add_bulk_records(&mut self, count: usize) -> Result<(), Rejection> {
        if self.pending_bulk.is_some() {
            self.reject(Rejection::Busy);
            return Err(Rejection::Busy);
        }
        self.pending_bulk = Some(BulkJob {
            table: self.table.id(),
            count,
        });
        self.status = Status::Processing;
        self.set_status_message(format!("Generating {count} rows ..."));
        Ok(())
    }

    pub fn update_cell(
        &mut self,
        record: RecordId,
        field: FieldId,
        input: &str,
    ) -> Option<CellValue> {
        let value = self.table.update_cell(record, field, input)?;
        self.refresh_display(false);
        Some(value)
    }

    /// Sorts the records themselves and starts paging over from the top.
    pub fn sort_by(&mut self, field: FieldId, direction: SortDirection) {
        if !self.table.sort_by(field, direction) {
            return;
        }
        self.pager.reset(&self.table);
        self.refresh_display(true);
        if let Some(f) = self.table.field(field) {
            let message = format!("Sorted by \"{}\" {:?}", f.name(), direction);
            self.set_status_message(message);
        }
    }

    // -------------------- Filtering ---------------------- //

    pub fn add_filter(
        &mut self,
        field: FieldId,
        operator: Operator,
        value: &str,
    ) -> Result<FilterId, Rejection> {
        match self.filters.add(&self.table, field, operator, value) {
            Ok(id) => {
                self.refresh_display(true);
                self.set_status_message(format!("{} matching rows", self.display.len()));
                Ok(id)
            }
            Err(rejection) => {
                self.reject(rejection);
                Err(rejection)
            }
        }
    }

    pub fn remove_filter(&mut self, id: FilterId) -> bool {
        let removed = self.filters.remove(id);
        if removed {
            self.refresh_display(true);
        }
        removed
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
        self.search.clear();
        self.refresh_display(true);
        self.set_status_message("Filters cleared");
    }

    pub fn set_search(&mut self, term: &str) {
        self.search = term.trim().to_string();
        self.refresh_display(true);
    }

    // -------------------- Viewport ---------------------- //

    /// Height of the container, in the unit of the row height.
    pub fn resize(&mut self, height: usize) {
        self.viewport.set_height(height);
        self.update_window();
    }

    pub fn scroll_to(&mut self, offset: usize) {
        self.viewport.scroll_to(offset);
        self.update_window();
    }

    pub fn scroll_by(&mut self, delta: isize) {
        self.viewport.scroll_by(delta);
        self.update_window();
    }

    pub fn measure_row(&mut self, idx: usize, height: usize) {
        self.viewport.measure(idx, height);
        self.update_window();
    }

    // -------------------- Navigation ---------------------- //

    /// Moves the active cell one step. Nothing happens at the edges.
    pub fn move_active(&mut self, direction: Direction) {
        let ActiveCell { row, column } = self.active;
        let (row, column) = match direction {
            Direction::Up if row > 0 => (row - 1, column),
            Direction::Down if row + 1 < self.display.len() => (row + 1, column),
            Direction::Left if column > 0 => (row, column - 1),
            Direction::Right if column + 1 < self.table.fields().len() => (row, column + 1),
            _ => return,
        };
        trace!("Active cell {:?} => ({row}, {column})", self.active);
        self.select_row(row);
        self.active.column = column;
    }

    pub fn select_row(&mut self, row: usize) {
        if self.display.is_empty() {
            return;
        }
        self.active.row = row.min(self.display.len() - 1);
        self.viewport.scroll_into_view(self.active.row);
        self.update_window();
    }

    fn rows_per_page(&self) -> usize {
        (self.viewport.height() / self.viewport.row_height()).max(1)
    }

    // -------------------- Editing ---------------------- //

    /// Enters edit mode on the active cell with its current value as the
    /// working string.
    pub fn begin_edit(&mut self) -> bool {
        let (Some(record), Some(field)) = (self.active_record(), self.active_field()) else {
            return false;
        };
        let working = record.get(field.id()).to_string();
        trace!("Editing {:?}/{:?}: \"{working}\"", record.id(), field.id());
        self.editing = Some(EditState {
            record: record.id(),
            field: field.id(),
            input: Inputter::with_text(&working),
        });
        true
    }

    pub fn edit_key(&mut self, key: KeyEvent) {
        let Some(edit) = self.editing.as_mut() else {
            return;
        };
        match edit.input.read(key) {
            InputOutcome::Editing => {}
            InputOutcome::Commit => {
                self.commit_edit();
            }
            InputOutcome::CommitNext => {
                self.commit_edit();
                self.move_active(Direction::Right);
            }
            InputOutcome::Cancel => self.cancel_edit(),
        }
    }

    /// Stores the working string, coerced to the column type, and leaves
    /// edit mode.
    pub fn commit_edit(&mut self) -> Option<CellValue> {
        let edit = self.editing.take()?;
        self.update_cell(edit.record, edit.field, edit.input.text())
    }

    pub fn cancel_edit(&mut self) {
        if let Some(edit) = self.editing.take() {
            trace!("Discarded edit of {:?}/{:?}", edit.record, edit.field);
        }
    }

    /// Focus left the cell, which commits like Enter.
    pub fn blur(&mut self) {
        if self.editing.is_some() {
            self.commit_edit();
        }
    }

    // -------------------- Popovers ---------------------- //

    pub fn open_field_menu(&mut self, field: FieldId) {
        if self.table.field(field).is_some() {
            self.blur();
            self.popover = Popover::FieldMenu { field, selected: 0 };
        }
    }

    pub fn open_filter(&mut self, field: FieldId) {
        if self.table.field(field).is_some() {
            self.blur();
            self.popover = Popover::Filter { field, selected: 0 };
        }
    }

    pub fn open_help(&mut self) {
        self.popover = Popover::Help;
    }

    pub fn close_popover(&mut self) {
        self.popover = Popover::None;
    }

    /// Moves the highlighted entry of the open popover, clamped to its list.
    pub fn popover_move(&mut self, delta: isize) {
        let len = match self.popover {
            Popover::FieldMenu { .. } => MenuAction::ALL.len(),
            Popover::Filter { field, .. } => self
                .table
                .field(field)
                .map_or(0, |f| Operator::for_type(f.field_type()).len()),
            Popover::None | Popover::Help => return,
        };
        if let Popover::FieldMenu { selected, .. } | Popover::Filter { selected, .. } =
            &mut self.popover
        {
            let last = len.saturating_sub(1);
            *selected = selected.saturating_add_signed(delta).min(last);
        }
    }

    /// Applies the highlighted entry of the open popover.
    pub fn popover_confirm(&mut self) {
        match self.popover {
            Popover::FieldMenu { field, selected } => {
                self.popover = Popover::None;
                self.apply_menu_action(field, MenuAction::ALL[selected]);
            }
            Popover::Filter { field, selected } => {
                self.popover = Popover::None;
                let Some(field_type) = self.table.field(field).map(|f| f.field_type()) else {
                    return;
                };
                let operator = Operator::for_type(field_type)[selected];
                if operator.needs_operand() {
                    self.enter_cmd_mode(CMDMode::FilterValue(field, operator));
                } else {
                    let _ = self.add_filter(field, operator, "");
                }
            }
            Popover::Help => self.popover = Popover::None,
            Popover::None => {}
        }
    }

    pub fn apply_menu_action(&mut self, field: FieldId, action: MenuAction) {
        debug!("Menu action {:?} on {:?}", action, field);
        match action {
            MenuAction::SortAscending => self.sort_by(field, SortDirection::Ascending),
            MenuAction::SortDescending => self.sort_by(field, SortDirection::Descending),
            MenuAction::Filter => self.open_filter(field),
            MenuAction::InsertLeft => {
                self.enter_cmd_mode(CMDMode::InsertField(field, Side::Left))
            }
            MenuAction::InsertRight => {
                self.enter_cmd_mode(CMDMode::InsertField(field, Side::Right))
            }
            MenuAction::Duplicate => {
                self.duplicate_field(field);
            }
            MenuAction::Rename => self.enter_cmd_mode(CMDMode::RenameField(field)),
            MenuAction::Delete => {
                let _ = self.delete_field(field);
            }
        }
    }

    // -------------------- Command input ---------------------- //

    pub fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode {:?}", mode);
        self.blur();
        self.popover = Popover::None;
        let prefill = match mode {
            CMDMode::Search => self.search.clone(),
            CMDMode::RenameField(field) => self
                .table
                .field(field)
                .map(|f| f.name().to_string())
                .unwrap_or_default(),
            _ => String::new(),
        };
        self.cmd = Some((mode, Inputter::with_text(&prefill)));
    }

    fn cmd_key(&mut self, key: KeyEvent) {
        let Some((_, input)) = self.cmd.as_mut() else {
            return;
        };
        match input.read(key) {
            InputOutcome::Editing => {}
            InputOutcome::Cancel => self.cmd = None,
            InputOutcome::Commit | InputOutcome::CommitNext => {
                if let Some((mode, input)) = self.cmd.take() {
                    self.handle_cmd_input(mode, input.text());
                }
            }
        }
    }

    pub fn handle_cmd_input(&mut self, mode: CMDMode, text: &str) {
        trace!("Handle cmd input {:?} \"{}\"", mode, text);
        match mode {
            CMDMode::Search => self.set_search(text),
            CMDMode::AddField(field_type) => {
                self.add_field(text, field_type);
            }
            CMDMode::InsertField(anchor, side) => {
                let (name, field_type) = parse_field_def(text);
                self.insert_field(anchor, side, name, field_type);
            }
            CMDMode::RenameField(field) => {
                self.rename_field(field, text);
            }
            CMDMode::FilterValue(field, operator) => {
                let _ = self.add_filter(field, operator, text);
            }
            CMDMode::BulkRows => {
                let text = text.trim();
                let count = if text.is_empty() {
                    Ok(self.config.bulk_rows)
                } else {
                    text.replace('_', "").parse::<usize>()
                };
                match count {
                    Ok(count) => {
                        let _ = self.add_bulk_records(count);
                    }
                    Err(_) => self.set_status_message(format!("\"{text}\" is not a row count")),
                }
            }
        }
    }

    // -------------------- Message handling ---------------------- //

    pub fn quit(&mut self) {
        self.status = Status::Quitting;
    }

    pub fn update(&mut self, message: Message) -> Result<(), GridError> {
        trace!("Update: {:?}", message);
        if let Message::Resize(height) = message {
            self.resize(height * self.config.row_height);
            return Ok(());
        }
        if self.cmd.is_some() {
            if let Message::RawKey(key) = message {
                self.cmd_key(key);
            }
            return Ok(());
        }
        if self.editing.is_some() {
            match message {
                Message::RawKey(key) => self.edit_key(key),
                Message::Blur => self.blur(),
                _ => {}
            }
            return Ok(());
        }
        match self.popover {
            Popover::FieldMenu { .. } | Popover::Filter { .. } => match message {
                Message::Quit => self.quit(),
                Message::MoveUp => self.popover_move(-1),
                Message::MoveDown => self.popover_move(1),
                Message::Enter => self.popover_confirm(),
                Message::Exit => self.close_popover(),
                _ => (),
            },
            Popover::Help => match message {
                Message::Quit => self.quit(),
                Message::Exit | Message::Enter | Message::Help => self.close_popover(),
                _ => (),
            },
            Popover::None => self.update_table(message),
        }
        Ok(())
    }

    fn update_table(&mut self, message: Message) {
        let active_field = self.active_field().map(|f| f.id());
        match message {
            Message::Quit => self.quit(),
            Message::MoveUp => self.move_active(Direction::Up),
            Message::MoveDown => self.move_active(Direction::Down),
            Message::MoveLeft => self.move_active(Direction::Left),
            Message::MoveRight => self.move_active(Direction::Right),
            Message::MovePageUp => {
                self.select_row(self.active.row.saturating_sub(self.rows_per_page()))
            }
            Message::MovePageDown => self.select_row(self.active.row + self.rows_per_page()),
            Message::MoveBeginning => self.select_row(0),
            Message::MoveEnd => self.select_row(self.display.len().saturating_sub(1)),
            Message::Enter => {
                self.begin_edit();
            }
            Message::Exit => self.close_popover(),
            Message::Help => self.open_help(),
            Message::Search => self.enter_cmd_mode(CMDMode::Search),
            Message::FieldMenu => {
                if let Some(field) = active_field {
                    self.open_field_menu(field);
                }
            }
            Message::Filter => {
                if let Some(field) = active_field {
                    self.open_filter(field);
                }
            }
            Message::ClearFilters => self.clear_filters(),
            Message::SortAscending => {
                if let Some(field) = active_field {
                    self.sort_by(field, SortDirection::Ascending);
                }
            }
            Message::SortDescending => {
                if let Some(field) = active_field {
                    self.sort_by(field, SortDirection::Descending);
                }
            }
            Message::AddRecord => {
                self.add_record(&[]);
            }
            Message::AddBulk => self.enter_cmd_mode(CMDMode::BulkRows),
            Message::AddTextField => self.enter_cmd_mode(CMDMode::AddField(FieldType::Text)),
            Message::AddNumberField => self.enter_cmd_mode(CMDMode::AddField(FieldType::Number)),
            Message::MoveFieldLeft => {
                if let Some(field) = active_field {
                    self.move_field(field, self.active.column.saturating_sub(1));
                }
            }
            Message::MoveFieldRight => {
                if let Some(field) = active_field {
                    self.move_field(field, self.active.column + 1);
                }
            }
            Message::NewTable => self.new_table(0),
            Message::LoadMore => {
                if let Err(rejection) = self.request_more() {
                    self.reject(rejection);
                }
            }
            // Clipboard access belongs to the host
            Message::CopyCell | Message::CopyRow => {}
            Message::Resize(_) | Message::Blur | Message::RawKey(_) => {}
        }
    }
}

/// "Score:number" is a number column named Score, anything else a text column.
fn parse_field_def(text: &str) -> (&str, FieldType) {
    match text.rsplit_once(':') {
        Some((name, kind)) if kind.trim().eq_ignore_ascii_case("number") => {
            (name, FieldType::Number)
        }
        Some((name, kind)) if kind.trim().eq_ignore_ascii_case("text") => (name, FieldType::Text),
        _ => (text, FieldType::Text),
    }
}

fn wrap_cell_content(c: &str) -> String {
    let needs_escaping = c.contains('"');
    let needs_wrapping = c.chars().any(|c| c == ' ' || c == '\t' || c == ',');
    let mut out = String::from(c);

    if needs_escaping {
        out = out.replace('"', "\"\"");
    }
    if needs_wrapping || needs_escaping {
        out = format!("\"{out}\"");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use ratatui::crossterm::event::{KeyCode, KeyModifiers};

    use crate::pager::PageState;

    fn config() -> GridConfig {
        GridConfig::default()
            .seed(11)
            .load_latency(Duration::ZERO)
            .overscan(5)
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn table_with(rows: usize) -> Table {
        let schema = [("Name", FieldType::Text), ("Age", FieldType::Number)];
        let mut table = Table::new("t", &schema);
        let name = table.fields()[0].id();
        let age = table.fields()[1].id();
        for i in 0..rows {
            table.add_record(&[
                (name, CellValue::Text(format!("row {i}"))),
                (age, CellValue::Number(i as f64)),
            ]);
        }
        table
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_into_edit(grid: &mut Grid, text: &str) {
        let len = grid.editing().map_or(0, |e| e.input.text().chars().count());
        for _ in 0..len {
            grid.edit_key(key(KeyCode::Backspace));
        }
        for c in text.chars() {
            grid.edit_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn starts_with_the_demo_table() {
        let grid = Grid::new(config(), None);
        assert_eq!(grid.table().name(), "Sample Table");
        assert_eq!(grid.table().len(), 100);
        assert_eq!(grid.display().len(), 100);
        assert!(!grid.pager().has_more());
    }

    #[test]
    fn paging_through_250_rows() {
        let mut grid = Grid::new(config(), Some(table_with(250)));
        assert_eq!(grid.pager().loaded(), 100);
        assert!(grid.pager().has_more());

        grid.request_more().unwrap();
        grid.tick(later());
        assert_eq!(grid.pager().loaded(), 200);
        assert_eq!(grid.display().len(), 200);
        assert!(grid.pager().has_more());

        grid.request_more().unwrap();
        grid.tick(later());
        assert_eq!(grid.pager().loaded(), 250);
        assert!(!grid.pager().has_more());

        assert_eq!(grid.request_more(), Err(Rejection::NoMorePages));
        assert!(!grid.tick(later()));
        assert_eq!(grid.pager().loaded(), 250);
    }

    #[test]
    fn overlapping_loads_are_rejected() {
        let mut grid = Grid::new(config(), Some(table_with(500)));
        grid.request_more().unwrap();
        assert_eq!(grid.request_more(), Err(Rejection::Busy));
        assert_eq!(grid.status, Status::Loading);
        grid.tick(later());
        assert_eq!(grid.pager().loaded(), 200);
        assert_eq!(grid.status, Status::Ready);
    }

    #[test]
    fn loads_wait_for_the_latency() {
        let config = config().load_latency(Duration::from_secs(5));
        let mut grid = Grid::new(config, Some(table_with(300)));
        grid.request_more().unwrap();
        assert!(!grid.tick(Instant::now()));
        assert_eq!(grid.pager().state(), PageState::Loading);
        assert!(grid.tick(Instant::now() + Duration::from_secs(10)));
        assert_eq!(grid.pager().loaded(), 200);
    }

    #[test]
    fn stale_page_after_replacement_is_dropped() {
        let mut grid = Grid::new(config(), Some(table_with(300)));
        grid.request_more().unwrap();
        grid.replace_table(table_with(300));
        grid.tick(later());
        assert_eq!(grid.pager().loaded(), 100);
        assert_eq!(grid.display().len(), 100);
    }

    #[test]
    fn scrolling_near_the_end_loads_the_next_page() {
        let mut grid = Grid::new(config(), Some(table_with(250)));
        grid.update(Message::Resize(15)).unwrap();
        assert_eq!(grid.window().range(), 0..20);
        assert!(!grid.pager().is_loading());

        grid.update(Message::MoveEnd).unwrap();
        assert_eq!(grid.active().row, 99);
        assert!(grid.pager().is_loading());
        grid.tick(later());
        assert_eq!(grid.display().len(), 200);
        assert_eq!(grid.active().row, 99);
    }

    #[test]
    fn window_tracks_the_filtered_set() {
        let mut grid = Grid::new(config().page_size(1000), Some(table_with(1000)));
        grid.resize(600);
        let window = grid.window();
        assert_eq!(window.range(), 0..20);
        assert_eq!(window.total_extent, 1000 * 40);
        assert_eq!(grid.window_rows().count(), 20);

        let age = grid.table().fields()[1].id();
        grid.add_filter(age, Operator::Lt, "10").unwrap();
        assert_eq!(grid.window().range(), 0..10);
        assert_eq!(grid.window().total_extent, 400);
    }

    #[test]
    fn bulk_generation_is_deferred_and_exclusive() {
        let mut grid = Grid::new(config(), Some(table_with(50)));
        grid.add_bulk_records(1000).unwrap();
        assert_eq!(grid.add_bulk_records(10), Err(Rejection::Busy));
        assert_eq!(grid.table().len(), 50);
        assert_eq!(grid.status, Status::Processing);

        assert!(grid.tick(Instant::now()));
        assert_eq!(grid.table().len(), 1050);
        assert_eq!(grid.pager().loaded(), 50);
        assert!(grid.pager().has_more());
        assert!(!grid.is_bulk_pending());
        assert!(grid.add_bulk_records(10).is_ok());
    }

    #[test]
    fn bulk_generation_for_a_replaced_table_is_dropped() {
        let mut grid = Grid::new(config(), Some(table_with(10)));
        grid.add_bulk_records(100).unwrap();
        grid.replace_table(table_with(5));
        grid.tick(Instant::now());
        assert_eq!(grid.table().len(), 5);
    }

    #[test]
    fn replacement_notifies_the_host_but_edits_do_not() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let record_name = move |table: &Table| sink.borrow_mut().push(table.name().to_string());
        let mut grid = Grid::new(config(), Some(table_with(3))).on_table_replaced(record_name);

        let record = grid.table().records()[0].id();
        let age = grid.table().fields()[1].id();
        grid.update_cell(record, age, "5");
        assert!(seen.borrow().is_empty());

        grid.new_table(0);
        assert_eq!(*seen.borrow(), vec!["Untitled Table".to_string()]);
        assert!(grid.table().is_empty());
        assert_eq!(grid.table().fields().len(), 5);
    }

    #[test]
    fn replacement_resets_filters_and_paging() {
        let mut grid = Grid::new(config(), Some(table_with(300)));
        let age = grid.table().fields()[1].id();
        grid.add_filter(age, Operator::Gt, "10").unwrap();
        grid.set_search("row");
        grid.request_more().unwrap();
        grid.tick(later());

        grid.new_table(250);
        assert!(grid.filters().is_empty());
        assert_eq!(grid.search(), "");
        assert_eq!(grid.pager().loaded(), 100);
        assert_eq!(grid.pager().page(), 1);
    }

    #[test]
    fn editing_round_trips_coerced_values() {
        let mut grid = Grid::new(config(), Some(table_with(3)));
        grid.move_active(Direction::Right);
        assert!(grid.begin_edit());
        assert_eq!(grid.editing().unwrap().input.text(), "0");
        type_into_edit(&mut grid, "42");
        grid.edit_key(key(KeyCode::Enter));
        assert!(grid.editing().is_none());

        let age = grid.table().fields()[1].id();
        let record = grid.active_record().unwrap();
        assert_eq!(*record.get(age), CellValue::Number(42.0));
    }

    #[test]
    fn escape_discards_the_working_value() {
        let mut grid = Grid::new(config(), Some(table_with(3)));
        grid.begin_edit();
        type_into_edit(&mut grid, "changed");
        grid.edit_key(key(KeyCode::Esc));
        assert!(grid.editing().is_none());
        assert_eq!(grid.active_cell_text().unwrap(), "row 0");
    }

    #[test]
    fn tab_commits_and_moves_right() {
        let mut grid = Grid::new(config(), Some(table_with(3)));
        grid.begin_edit();
        type_into_edit(&mut grid, "renamed");
        grid.edit_key(key(KeyCode::Tab));
        assert_eq!(grid.active().column, 1);
        let name = grid.table().fields()[0].id();
        let record = grid.active_record().unwrap();
        assert_eq!(record.get(name).to_string(), "renamed");
    }

    #[test]
    fn blur_commits_the_edit() {
        let mut grid = Grid::new(config(), Some(table_with(3)));
        grid.update(Message::Enter).unwrap();
        assert!(grid.raw_keyevents());
        grid.update(Message::RawKey(key(KeyCode::Char('!')))).unwrap();
        grid.update(Message::Blur).unwrap();
        assert!(!grid.raw_keyevents());
        assert_eq!(grid.active_cell_text().unwrap(), "row 0!");
    }

    #[test]
    fn navigation_stops_at_the_edges() {
        let mut grid = Grid::new(config(), Some(table_with(3)));
        grid.move_active(Direction::Up);
        grid.move_active(Direction::Left);
        assert_eq!(grid.active(), ActiveCell { row: 0, column: 0 });
        grid.move_active(Direction::Right);
        grid.move_active(Direction::Right);
        grid.move_active(Direction::Down);
        grid.move_active(Direction::Down);
        grid.move_active(Direction::Down);
        assert_eq!(grid.active(), ActiveCell { row: 2, column: 1 });
    }

    #[test]
    fn deleting_the_last_field_is_refused() {
        let table = Table::new("t", &[("Only", FieldType::Text)]);
        let mut grid = Grid::new(config(), Some(table));
        let only = grid.table().fields()[0].id();
        assert_eq!(grid.delete_field(only), Err(Rejection::LastField));
        assert_eq!(grid.table().fields().len(), 1);
        assert_eq!(grid.status_message(), Rejection::LastField.to_string());
    }

    #[test]
    fn deleting_a_field_drops_its_filters() {
        let mut grid = Grid::new(config(), Some(table_with(20)));
        let age = grid.table().fields()[1].id();
        grid.add_filter(age, Operator::Lt, "5").unwrap();
        assert_eq!(grid.display().len(), 5);
        grid.move_active(Direction::Right);
        grid.delete_field(age).unwrap();
        assert!(grid.filters().is_empty());
        assert_eq!(grid.display().len(), 20);
        assert_eq!(grid.active().column, 0);
    }

    #[test]
    fn sorting_resets_to_the_first_page() {
        let mut grid = Grid::new(config(), Some(table_with(250)));
        grid.request_more().unwrap();
        grid.tick(later());
        assert_eq!(grid.pager().loaded(), 200);

        let age = grid.table().fields()[1].id();
        grid.sort_by(age, SortDirection::Descending);
        assert_eq!(grid.pager().loaded(), 100);
        assert_eq!(grid.pager().page(), 1);
        let first = grid.display_record(0).unwrap();
        assert_eq!(first.get(age), &CellValue::Number(249.0));
    }

    #[test]
    fn filters_only_see_the_loaded_page() {
        let mut grid = Grid::new(config(), Some(table_with(250)));
        let age = grid.table().fields()[1].id();
        grid.add_filter(age, Operator::Gte, "150").unwrap();
        assert!(grid.display().is_empty());

        grid.request_more().unwrap();
        grid.tick(later());
        assert_eq!(grid.display().len(), 50);
    }

    #[test]
    fn rejected_filters_leave_the_display_alone() {
        let mut grid = Grid::new(config(), Some(table_with(20)));
        let name = grid.table().fields()[0].id();
        let added = grid.add_filter(name, Operator::Contains, " ");
        assert_eq!(added, Err(Rejection::MissingOperand));
        assert!(grid.filters().is_empty());
        assert_eq!(grid.display().len(), 20);
    }

    #[test]
    fn removing_a_filter_restores_rows() {
        let mut grid = Grid::new(config(), Some(table_with(20)));
        let age = grid.table().fields()[1].id();
        let keep = grid.add_filter(age, Operator::Gte, "10").unwrap();
        let drop = grid.add_filter(age, Operator::Lt, "12").unwrap();
        assert_eq!(grid.display().len(), 2);
        assert!(grid.remove_filter(drop));
        assert!(!grid.remove_filter(drop));
        assert_eq!(grid.display().len(), 10);
        assert!(grid.remove_filter(keep));
        assert_eq!(grid.display().len(), 20);
    }

    struct Constant;

    impl RecordGenerator for Constant {
        fn value(&self, field: &Field, row: usize, _rng: &mut rand::rngs::StdRng) -> CellValue {
            match field.field_type() {
                FieldType::Text => CellValue::Text(format!("r{row}")),
                FieldType::Number => CellValue::Number(7.0),
            }
        }

        fn seed(&self) -> u64 {
            0
        }
    }

    #[test]
    fn bulk_rows_come_from_the_generator() {
        let mut grid = Grid::new(config(), Some(table_with(2))).with_generator(Box::new(Constant));
        grid.add_bulk_records(3).unwrap();
        grid.tick(Instant::now());
        // the new rows are past the loaded prefix and arrive with the next page
        assert_eq!(grid.display().len(), 2);
        grid.tick(later());
        let name = grid.table().fields()[0].id();
        let age = grid.table().fields()[1].id();
        let last = &grid.table().records()[4];
        assert_eq!(*last.get(name), CellValue::Text("r4".into()));
        assert_eq!(*last.get(age), CellValue::Number(7.0));
        assert_eq!(grid.display().len(), 5);
    }

    #[test]
    fn bulk_rows_reach_an_empty_table() {
        let empty = Table::new("t", &[("Name", FieldType::Text)]);
        let mut grid = Grid::new(config(), Some(empty)).with_generator(Box::new(Constant));
        grid.resize(600);
        assert!(!grid.pager().has_more());
        grid.add_bulk_records(500).unwrap();
        grid.tick(Instant::now());
        assert_eq!(grid.status, Status::Loading);
        assert!(grid.pager().is_loading());
        grid.tick(later());
        assert_eq!(grid.display().len(), 100);
        assert!(grid.pager().has_more());
        assert_eq!(grid.status, Status::Ready);
    }

    #[test]
    fn measured_rows_change_the_extent() {
        let mut grid = Grid::new(config(), Some(table_with(10)));
        grid.resize(200);
        assert_eq!(grid.window().total_extent, 400);
        grid.measure_row(0, 100);
        assert_eq!(grid.window().total_extent, 460);
        grid.scroll_to(1000);
        assert_eq!(grid.viewport().scroll_offset(), 260);
    }

    #[test]
    fn added_rows_become_active() {
        let mut grid = Grid::new(config(), Some(table_with(3)));
        let id = grid.add_record(&[]);
        assert_eq!(grid.table().len(), 4);
        assert_eq!(grid.active().row, 3);
        assert_eq!(grid.active_record().unwrap().id(), id);
    }

    #[test]
    fn field_menu_drives_structural_edits() {
        let mut grid = Grid::new(config(), Some(table_with(3)));
        grid.update(Message::FieldMenu).unwrap();
        let popover = grid.popover();
        assert!(matches!(popover, Popover::FieldMenu { selected: 0, .. }));

        // Duplicate
        for _ in 0..5 {
            grid.update(Message::MoveDown).unwrap();
        }
        grid.update(Message::Enter).unwrap();
        assert_eq!(grid.popover(), Popover::None);
        assert_eq!(grid.table().fields()[2].name(), "Name Copy");

        // Insert right, via the command line
        grid.update(Message::FieldMenu).unwrap();
        for _ in 0..4 {
            grid.update(Message::MoveDown).unwrap();
        }
        grid.update(Message::Enter).unwrap();
        let mode = grid.cmd().map(|(mode, _)| mode);
        assert!(matches!(mode, Some(CMDMode::InsertField(_, Side::Right))));
        for c in "Score:number".chars() {
            grid.update(Message::RawKey(key(KeyCode::Char(c)))).unwrap();
        }
        grid.update(Message::RawKey(key(KeyCode::Enter))).unwrap();
        let score = &grid.table().fields()[1];
        assert_eq!(score.name(), "Score");
        assert_eq!(score.field_type(), FieldType::Number);

        // Menu selection is clamped
        grid.update(Message::FieldMenu).unwrap();
        for _ in 0..20 {
            grid.update(Message::MoveDown).unwrap();
        }
        let popover = grid.popover();
        assert!(matches!(popover, Popover::FieldMenu { selected: 7, .. }));
        grid.update(Message::Exit).unwrap();
        assert_eq!(grid.popover(), Popover::None);
    }

    #[test]
    fn filter_popover_asks_for_a_value_when_needed() {
        let mut grid = Grid::new(config(), Some(table_with(20)));
        grid.move_active(Direction::Right);
        grid.update(Message::Filter).unwrap();
        // Gt
        grid.update(Message::MoveDown).unwrap();
        grid.update(Message::Enter).unwrap();
        for c in "14".chars() {
            grid.update(Message::RawKey(key(KeyCode::Char(c)))).unwrap();
        }
        grid.update(Message::RawKey(key(KeyCode::Enter))).unwrap();
        assert_eq!(grid.display().len(), 5);

        grid.update(Message::Filter).unwrap();
        // IsEmpty needs no operand
        for _ in 0..5 {
            grid.update(Message::MoveDown).unwrap();
        }
        grid.update(Message::Enter).unwrap();
        assert!(grid.cmd().is_none());
        assert_eq!(grid.filters().len(), 2);
        assert!(grid.display().is_empty());

        grid.update(Message::ClearFilters).unwrap();
        assert_eq!(grid.display().len(), 20);
    }

    #[test]
    fn search_through_the_command_line() {
        let mut grid = Grid::new(config(), Some(table_with(20)));
        grid.update(Message::Search).unwrap();
        for c in "ROW 1".chars() {
            grid.update(Message::RawKey(key(KeyCode::Char(c)))).unwrap();
        }
        grid.update(Message::RawKey(key(KeyCode::Enter))).unwrap();
        assert_eq!(grid.search(), "ROW 1");
        // row 1, row 10 ..= row 19
        assert_eq!(grid.display().len(), 11);
    }

    #[test]
    fn moving_fields_follows_the_active_column() {
        let mut grid = Grid::new(config(), Some(table_with(3)));
        let name = grid.table().fields()[0].id();
        grid.update(Message::MoveFieldRight).unwrap();
        assert_eq!(grid.table().fields()[1].id(), name);
        assert_eq!(grid.active().column, 1);
    }

    #[test]
    fn copy_helpers_quote_like_csv() {
        let mut grid = Grid::new(config(), Some(table_with(1)));
        let record = grid.table().records()[0].id();
        let name = grid.table().fields()[0].id();
        grid.update_cell(record, name, "say \"hi\"");
        assert_eq!(grid.active_row_text().unwrap(), "\"say \"\"hi\"\"\",0");
    }

    #[test]
    fn field_defs() {
        let score = parse_field_def("Score:number");
        assert_eq!(score, ("Score", FieldType::Number));
        assert_eq!(parse_field_def("Notes:TEXT"), ("Notes", FieldType::Text));
        assert_eq!(parse_field_def("a:b"), ("a:b", FieldType::Text));
    }
}
