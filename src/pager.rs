use tracing::{debug, info};

use crate::domain::Rejection;
use crate::table::{Record, Table, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Idle,
    Loading,
    Exhausted,
}

/// Handed out by `request_more` and given back on completion. Identifies the
/// table the load was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTicket {
    pub table: TableId,
    pub page: usize,
}

/// Simulated server paging over an in-memory table: the loaded rows are
/// always a prefix of the table's record sequence.
#[derive(Debug, Clone)]
pub struct Pager {
    table: TableId,
    page_size: usize,
    page: usize,
    loaded: usize,
    has_more: bool,
    state: PageState,
}

impl Pager {
    pub fn new(table: &Table, page_size: usize) -> Self {
        let mut pager = Pager {
            table: table.id(),
            page_size: page_size.max(1),
            page: 0,
            loaded: 0,
            has_more: false,
            state: PageState::Idle,
        };
        pager.reset(table);
        pager
    }

    /// Back to the first page of `table`.
    pub fn reset(&mut self, table: &Table) {
        self.table = table.id();
        self.page = 1;
        self.loaded = self.page_size.min(table.len());
        self.has_more = self.loaded < table.len();
        self.state = PageState::Idle;
        debug!(
            "Pager reset: {} of {} rows loaded, more: {}",
            self.loaded,
            table.len(),
            self.has_more
        );
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn loaded(&self) -> usize {
        self.loaded
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.state == PageState::Loading
    }

    pub fn can_request(&self) -> bool {
        self.state == PageState::Idle && self.has_more
    }

    /// The loaded prefix of `table`.
    pub fn loaded_records<'a>(&self, table: &'a Table) -> &'a [Record] {
        &table.records()[..self.loaded.min(table.len())]
    }

    /// Starts loading the next page. Only one load can be outstanding.
    pub fn request_more(&mut self) -> Result<PageTicket, Rejection> {
        match self.state {
            PageState::Loading => Err(Rejection::Busy),
            PageState::Exhausted => Err(Rejection::NoMorePages),
            PageState::Idle if !self.has_more => Err(Rejection::NoMorePages),
            PageState::Idle => {
                self.state = PageState::Loading;
                debug!("Requesting page {}", self.page + 1);
                Ok(PageTicket {
                    table: self.table,
                    page: self.page + 1,
                })
            }
        }
    }

    /// Appends the page `ticket` asked for. Returns the number of rows added,
    /// `None` when the ticket belongs to another table or no load is running.
    pub fn complete(&mut self, ticket: PageTicket, table: &Table) -> Option<usize> {
        if ticket.table != self.table || table.id() != self.table {
            debug!(
                "Discarding stale page {} for {:?}",
                ticket.page, ticket.table
            );
            return None;
        }
        if self.state != PageState::Loading {
            return None;
        }
        let start = self.loaded.min(table.len());
        let end = (start + self.page_size).min(table.len());
        let added = end - start;
        self.loaded = end;
        self.has_more = end < table.len();
        if added == 0 {
            self.state = PageState::Exhausted;
        } else {
            self.page += 1;
            self.state = if self.has_more {
                PageState::Idle
            } else {
                PageState::Exhausted
            };
        }
        info!(
            "Loaded page {}: {} of {} rows",
            self.page,
            self.loaded,
            table.len()
        );
        Some(added)
    }

    /// Re-aligns with `table` after its record count changed. The loaded
    /// prefix keeps its length, new rows past it can be paged in again.
    pub fn reconcile(&mut self, table: &Table) {
        if table.id() != self.table {
            self.reset(table);
            return;
        }
        self.loaded = self.loaded.min(table.len());
        self.has_more = self.loaded < table.len();
        if self.state == PageState::Exhausted && self.has_more {
            self.state = PageState::Idle;
        }
    }

    /// Grows the loaded prefix by `count` rows appended at the end of a fully
    /// loaded table, so that rows added by the user show up right away.
    pub fn extend_loaded(&mut self, count: usize, table: &Table) {
        if self.loaded + count >= table.len() && !self.has_more {
            self.loaded = table.len();
        }
        self.reconcile(table);
    }
}
