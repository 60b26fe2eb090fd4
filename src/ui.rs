use std::time::Duration;

use ratatui::{
    Frame,
    layout::{Constraint, Flex, Layout, Position, Rect},
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::{
        Block, Cell, Clear, List, ListState, Paragraph, Row, Scrollbar, ScrollbarOrientation,
        ScrollbarState, Table,
    },
};
use tracing::trace;

use tg::domain::{CMDMode, GridConfig, HELP_TEXT};
use tg::filter::Operator;
use tg::grid::{Grid, MenuAction, Popover};
use tg::table::{Field, FieldType, Record, Side};

pub const CMDLINE_HEIGHT: usize = 1;
pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const SCROLLBAR_WIDTH: usize = 1;
pub const COLUMN_WIDTH_MARGIN: usize = 2;
const COLUMN_SPACING: usize = 1;
const STATUS_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct TableUI {
    max_column_width: usize,
    column_offset: usize,
}

impl TableUI {
    pub fn new(cfg: &GridConfig) -> Self {
        Self {
            max_column_width: cfg.max_column_width,
            column_offset: 0,
        }
    }

    pub fn draw(&mut self, grid: &Grid, frame: &mut Frame) {
        let [body, statusline] = Layout::vertical([
            Constraint::Fill(1),
            Constraint::Length(CMDLINE_HEIGHT as u16),
        ])
        .areas(frame.area());
        let [table_area, scrollbar_area] = Layout::horizontal([
            Constraint::Fill(1),
            Constraint::Length(SCROLLBAR_WIDTH as u16),
        ])
        .areas(body);

        self.draw_table(grid, frame, table_area);
        draw_scrollbar(grid, frame, scrollbar_area);
        draw_statusline(grid, frame, statusline);

        match grid.popover() {
            Popover::None => {}
            Popover::FieldMenu { field, selected } => {
                let title = grid.table().field(field).map_or("", |f| f.name());
                let items: Vec<&str> = MenuAction::ALL.iter().map(|a| a.label()).collect();
                draw_list(frame, body, title, items, selected);
            }
            Popover::Filter { field, selected } => {
                let Some(field) = grid.table().field(field) else {
                    return;
                };
                let title = format!("Filter {}", field.name());
                let items: Vec<&str> = Operator::for_type(field.field_type())
                    .iter()
                    .map(|o| o.label())
                    .collect();
                draw_list(frame, body, &title, items, selected);
            }
            Popover::Help => {
                let lines = HELP_TEXT.lines().count() as u16;
                let width = HELP_TEXT
                    .lines()
                    .map(|l| l.chars().count())
                    .max()
                    .unwrap_or(0) as u16;
                let area = popup_area(body, width + 4, lines + 2);
                frame.render_widget(Clear, area);
                frame.render_widget(
                    Paragraph::new(HELP_TEXT).block(Block::bordered().title(" Help ")),
                    area,
                );
            }
        }
    }

    fn draw_table(&mut self, grid: &Grid, frame: &mut Frame, area: Rect) {
        let window = grid.window();
        let body_rows = (area.height as usize).saturating_sub(TABLE_HEADER_HEIGHT);
        // The overscan rows above the viewport are not drawn in a terminal.
        let rows: Vec<(usize, &Record)> = grid
            .window_rows()
            .filter(|(idx, _)| *idx >= window.first_visible)
            .take(body_rows)
            .collect();

        let fields = grid.table().fields();
        let widths: Vec<usize> = fields
            .iter()
            .map(|f| self.column_width(f, &rows))
            .collect();
        let active = grid.active();
        self.scroll_columns(active.column, &widths, area.width as usize);
        let visible = visible_columns(&widths, self.column_offset, area.width as usize);
        trace!("Drawing rows {:?} columns {:?}", window.range(), visible);

        let header = Row::new(fields[visible.clone()].iter().map(|f| {
            let name = match f.field_type() {
                FieldType::Text => f.name().to_string(),
                FieldType::Number => format!("# {}", f.name()),
            };
            Cell::from(name)
        }))
        .bold()
        .underlined();

        let editing = grid.editing();
        let body: Vec<Row> = rows
            .iter()
            .map(|(idx, record)| {
                let is_active_row = *idx == active.row;
                let cells = visible.clone().map(|column| {
                    let field = &fields[column];
                    let is_active = is_active_row && column == active.column;
                    if is_active && let Some(edit) = editing {
                        let text = edit.input.text().to_string();
                        return Cell::from(text).black().on_yellow();
                    }
                    let text = record.get(field.id()).to_string();
                    let line = match field.field_type() {
                        FieldType::Number => Line::from(text).right_aligned(),
                        FieldType::Text => Line::from(text),
                    };
                    let cell = Cell::from(line);
                    if is_active { cell.reversed() } else { cell }
                });
                let row = Row::new(cells);
                if is_active_row {
                    row.style(Style::new().bg(Color::DarkGray))
                } else {
                    row
                }
            })
            .collect();

        if body.is_empty() {
            let [header_area, message_area] = Layout::vertical([
                Constraint::Length(TABLE_HEADER_HEIGHT as u16),
                Constraint::Fill(1),
            ])
            .areas(area);
            let constraints = visible
                .clone()
                .map(|c| Constraint::Length(widths[c] as u16));
            frame.render_widget(
                Table::new(Vec::<Row>::new(), constraints).header(header),
                header_area,
            );
            let unfiltered = grid.filters().is_empty() && grid.search().is_empty();
            let pager = grid.pager();
            let message = match (pager.is_loading(), pager.has_more(), unfiltered) {
                (true, _, _) => "Loading ...",
                (false, true, true) => "No rows loaded yet, press L to load more",
                (false, true, false) => "No matching rows loaded yet, press L to load more",
                (false, false, true) => "No rows, press a to add one",
                (false, false, false) => "No matching rows, press x to clear the filters",
            };
            frame.render_widget(Paragraph::new(message).centered().italic(), message_area);
            return;
        }

        let constraints = visible.map(|c| Constraint::Length(widths[c] as u16));
        let table = Table::new(body, constraints)
            .column_spacing(COLUMN_SPACING as u16)
            .header(header);
        frame.render_widget(table, area);
    }

    fn column_width(&self, field: &Field, rows: &[(usize, &Record)]) -> usize {
        let content = rows
            .iter()
            .map(|(_, r)| r.get(field.id()).to_string().chars().count())
            .max()
            .unwrap_or(0);
        let header = field.name().chars().count() + 2;
        (content.max(header) + COLUMN_WIDTH_MARGIN).min(self.max_column_width)
    }

    /// Shifts the first drawn column so the active one fits on screen.
    fn scroll_columns(&mut self, active: usize, widths: &[usize], width: usize) {
        self.column_offset = self.column_offset.min(widths.len().saturating_sub(1));
        if active < self.column_offset {
            self.column_offset = active;
        }
        while self.column_offset < active {
            let used: usize = widths[self.column_offset..=active]
                .iter()
                .map(|w| w + COLUMN_SPACING)
                .sum();
            if used <= width {
                break;
            }
            self.column_offset += 1;
        }
    }
}

/// Columns starting at `offset` that fit into `width`, at least one.
fn visible_columns(widths: &[usize], offset: usize, width: usize) -> std::ops::Range<usize> {
    let mut used = 0;
    let mut end = offset;
    for w in widths.iter().skip(offset) {
        if end > offset && used + w > width {
            break;
        }
        used += w + COLUMN_SPACING;
        end += 1;
    }
    offset..end.min(widths.len())
}

fn draw_scrollbar(grid: &Grid, frame: &mut Frame, area: Rect) {
    let viewport = grid.viewport();
    let content = viewport.total_extent().saturating_sub(viewport.height());
    let mut state = ScrollbarState::new(content)
        .position(viewport.scroll_offset())
        .viewport_content_length(viewport.height());
    let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
        .begin_symbol(None)
        .end_symbol(None);
    frame.render_stateful_widget(scrollbar, area, &mut state);
}

fn cmd_prompt(grid: &Grid, mode: CMDMode) -> String {
    let field_name = |id| grid.table().field(id).map_or("?", |f| f.name()).to_string();
    match mode {
        CMDMode::Search => "/".to_string(),
        CMDMode::AddField(FieldType::Text) => "New text column: ".to_string(),
        CMDMode::AddField(FieldType::Number) => "New number column: ".to_string(),
        CMDMode::InsertField(anchor, side) => {
            let side = match side {
                Side::Left => "left of",
                Side::Right => "right of",
            };
            format!("New column {side} {}: ", field_name(anchor))
        }
        CMDMode::RenameField(field) => format!("Rename {} to: ", field_name(field)),
        CMDMode::FilterValue(field, operator) => {
            format!("{} {} ", field_name(field), operator.label())
        }
        CMDMode::BulkRows => format!("Rows to add [{}]: ", grid.config().bulk_rows),
    }
}

fn draw_statusline(grid: &Grid, frame: &mut Frame, area: Rect) {
    if let Some((mode, input)) = grid.cmd() {
        let prompt = cmd_prompt(grid, mode);
        let x = area.x + (prompt.chars().count() + input.cursor()) as u16;
        let line = Line::from(vec![Span::from(prompt).bold(), Span::from(input.text())]);
        frame.render_widget(Paragraph::new(line), area);
        frame.set_cursor_position(Position::new(x.min(area.right().saturating_sub(1)), area.y));
        return;
    }
    if let Some(edit) = grid.editing() {
        let name = grid.table().field(edit.field).map_or("", |f| f.name());
        let prompt = format!("Edit {name}: ");
        let x = area.x + (prompt.chars().count() + edit.input.cursor()) as u16;
        let text = Span::from(edit.input.text());
        let line = Line::from(vec![Span::from(prompt).bold(), text]);
        frame.render_widget(Paragraph::new(line), area);
        frame.set_cursor_position(Position::new(x.min(area.right().saturating_sub(1)), area.y));
        return;
    }

    let pager = grid.pager();
    let mut spans = vec![
        Span::from(format!(" {} ", grid.table().name())).bold().reversed(),
        Span::from(format!(
            " {} shown, {} of {} loaded",
            grid.display().len(),
            pager.loaded(),
            grid.table().len()
        )),
    ];
    if !grid.filters().is_empty() {
        let count = grid.filters().len();
        spans.push(Span::from(format!(" | {count} filters")).yellow());
    }
    if !grid.search().is_empty() {
        spans.push(Span::from(format!(" | /{}", grid.search())).yellow());
    }
    if pager.is_loading() || grid.is_bulk_pending() {
        spans.push(Span::from(" | working ...").italic());
    }

    let message = if grid.last_status_message_update().elapsed() < STATUS_MESSAGE_TIMEOUT {
        grid.status_message()
    } else {
        ""
    };
    let [left, right] = Layout::horizontal([
        Constraint::Fill(1),
        Constraint::Length(message.chars().count() as u16 + 1),
    ])
    .areas(area);
    frame.render_widget(Paragraph::new(Line::from(spans)), left);
    frame.render_widget(Paragraph::new(message).right_aligned(), right);
}

fn draw_list(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    items: Vec<&str>,
    selected: usize,
) {
    let width = items
        .iter()
        .map(|i| i.chars().count())
        .chain(std::iter::once(title.chars().count()))
        .max()
        .unwrap_or(0) as u16;
    let popup = popup_area(area, width + 6, items.len() as u16 + 2);
    let list = List::new(items)
        .block(Block::bordered().title(format!(" {title} ")))
        .highlight_style(Style::new().reversed())
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(selected));
    frame.render_widget(Clear, popup);
    frame.render_stateful_widget(list, popup, &mut state);
}

fn popup_area(area: Rect, width: u16, height: u16) -> Rect {
    let [area] = Layout::horizontal([Constraint::Length(width)])
        .flex(Flex::Center)
        .areas(area);
    let [area] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    area
}
