use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tracing::{debug, trace};

use crate::domain::Rejection;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);
static EMPTY: CellValue = CellValue::Empty;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(u64);

impl TableId {
    fn next() -> Self {
        TableId(NEXT_TABLE_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Number,
}

impl FieldType {
    pub fn default_value(self) -> CellValue {
        match self {
            FieldType::Text => CellValue::Text(String::new()),
            FieldType::Number => CellValue::Number(0.0),
        }
    }

    /// Turns a typed-in string into a value of this type. Blank input on a
    /// number column is stored as empty, anything else that does not parse to
    /// a finite number becomes NaN.
    pub fn coerce(self, input: &str) -> CellValue {
        match self {
            FieldType::Text => CellValue::Text(input.to_string()),
            FieldType::Number => {
                let trimmed = input.trim();
                if trimmed.is_empty() {
                    CellValue::Empty
                } else {
                    let n = trimmed.parse::<f64>().ok().filter(|n| n.is_finite());
                    CellValue::Number(n.unwrap_or(f64::NAN))
                }
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Empty,
}

impl CellValue {
    /// `Empty` or the empty string.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// The numeric reading of the value, `None` when it has none (empty,
    /// NaN, or text that does not parse).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if !n.is_nan() => Some(*n),
            CellValue::Number(_) | CellValue::Empty => None,
            CellValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| !n.is_nan()),
        }
    }

    pub fn coerce_to(&self, field_type: FieldType) -> CellValue {
        match (self, field_type) {
            (CellValue::Empty, _) => CellValue::Empty,
            (CellValue::Text(s), FieldType::Number) => field_type.coerce(s),
            (CellValue::Number(n), FieldType::Text) => CellValue::Text(format_number(*n)),
            (value, _) => value.clone(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Empty => Ok(()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    id: FieldId,
    name: String,
    field_type: FieldType,
}

impl Field {
    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: RecordId,
    values: HashMap<FieldId, CellValue>,
}

impl Record {
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Missing entries read as empty.
    pub fn get(&self, field: FieldId) -> &CellValue {
        self.values.get(&field).unwrap_or(&EMPTY)
    }

    pub fn values(&self) -> &HashMap<FieldId, CellValue> {
        &self.values
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Ordered typed fields plus the rows. Every record only ever holds keys of
/// current fields.
#[derive(Debug, Clone)]
pub struct Table {
    id: TableId,
    name: String,
    fields: Vec<Field>,
    records: Vec<Record>,
    next_field: u64,
    next_record: u64,
}

impl Table {
    /// An empty table with the given schema. A schema without any field gets
    /// a single text column so the table is never fieldless.
    pub fn new(name: impl Into<String>, schema: &[(&str, FieldType)]) -> Self {
        let mut table = Table {
            id: TableId::next(),
            name: name.into(),
            fields: Vec::with_capacity(schema.len().max(1)),
            records: Vec::new(),
            next_field: 1,
            next_record: 1,
        };
        for (name, field_type) in schema {
            let field = table.make_field(name.to_string(), *field_type);
            table.fields.push(field);
        }
        if table.fields.is_empty() {
            let field = table.make_field("Name".to_string(), FieldType::Text);
            table.fields.push(field);
        }
        table
    }

    /// Builds a table from column-major data, e.g. a loaded file. Values are
    /// coerced to their column type, short columns are padded with the default.
    pub fn from_columns(
        name: impl Into<String>,
        columns: Vec<(String, FieldType, Vec<CellValue>)>,
    ) -> Self {
        let schema: Vec<(&str, FieldType)> = columns
            .iter()
            .map(|(name, field_type, _)| (name.as_str(), *field_type))
            .collect();
        let mut table = Table::new(name, &schema);
        let nrows = columns
            .iter()
            .map(|(_, _, data)| data.len())
            .max()
            .unwrap_or(0);
        let ids: Vec<FieldId> = table.fields.iter().map(|f| f.id).collect();

        let mut rows: Vec<HashMap<FieldId, CellValue>> = (0..nrows)
            .map(|_| HashMap::with_capacity(ids.len()))
            .collect();
        for ((_, field_type, data), id) in columns.into_iter().zip(ids.iter()) {
            for (row, value) in data.into_iter().enumerate() {
                rows[row].insert(*id, value.coerce_to(field_type));
            }
        }
        table.push_records(rows);
        table
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_index(&self, id: FieldId) -> Option<usize> {
        self.fields.iter().position(|f| f.id == id)
    }

    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn record_index(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    fn make_field(&mut self, name: String, field_type: FieldType) -> Field {
        let id = FieldId(self.next_field);
        self.next_field += 1;
        Field {
            id,
            name,
            field_type,
        }
    }

    fn backfill(&mut self, field: &Field) {
        let default = field.field_type.default_value();
        for record in self.records.iter_mut() {
            record.values.insert(field.id, default.clone());
        }
    }

    /// Appends a column, `None` if the name is blank.
    pub fn add_field(&mut self, name: &str, field_type: FieldType) -> Option<Field> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let field = self.make_field(name.to_string(), field_type);
        self.backfill(&field);
        self.fields.push(field.clone());
        debug!(
            "Added field {:?} \"{}\" ({})",
            field.id,
            field.name,
            field_type.label()
        );
        Some(field)
    }

    pub fn insert_field(
        &mut self,
        anchor: FieldId,
        side: Side,
        name: &str,
        field_type: FieldType,
    ) -> Option<Field> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let anchor_idx = self.field_index(anchor)?;
        let at = match side {
            Side::Left => anchor_idx,
            Side::Right => anchor_idx + 1,
        };
        let field = self.make_field(name.to_string(), field_type);
        self.backfill(&field);
        self.fields.insert(at, field.clone());
        debug!("Inserted field {:?} at position {at}", field.id);
        Some(field)
    }

    /// Returns whether the name changed.
    pub fn rename_field(&mut self, id: FieldId, name: &str) -> bool {
        let name = name.trim();
        match self.fields.iter_mut().find(|f| f.id == id) {
            Some(field) if !name.is_empty() && field.name != name => {
                field.name = name.to_string();
                true
            }
            _ => false,
        }
    }

    /// New column named after the source with a " Copy" suffix. Values are
    /// backfilled with the type default, not copied.
    pub fn duplicate_field(&mut self, id: FieldId) -> Option<Field> {
        let source = self.field(id)?;
        let name = format!("{} Copy", source.name);
        let field_type = source.field_type;
        let field = self.make_field(name, field_type);
        self.backfill(&field);
        self.fields.push(field.clone());
        Some(field)
    }

    pub fn delete_field(&mut self, id: FieldId) -> Result<Field, Rejection> {
        let idx = self.field_index(id).ok_or(Rejection::UnknownField)?;
        if self.fields.len() == 1 {
            return Err(Rejection::LastField);
        }
        let field = self.fields.remove(idx);
        for record in self.records.iter_mut() {
            record.values.remove(&id);
        }
        debug!("Deleted field {:?} \"{}\"", field.id, field.name);
        Ok(field)
    }

    /// Moves a column to `to`, clamped to the last position.
    pub fn move_field(&mut self, id: FieldId, to: usize) -> bool {
        let Some(from) = self.field_index(id) else {
            return false;
        };
        let to = to.min(self.fields.len() - 1);
        if from == to {
            return false;
        }
        let field = self.fields.remove(from);
        self.fields.insert(to, field);
        true
    }

    /// Appends a row with every field defaulted. Overrides for unknown fields
    /// are ignored, known ones are coerced to the field type.
    pub fn add_record(&mut self, defaults: &[(FieldId, CellValue)]) -> &Record {
        let mut values: HashMap<FieldId, CellValue> = self
            .fields
            .iter()
            .map(|f| (f.id, f.field_type.default_value()))
            .collect();
        for (id, value) in defaults {
            if let Some(field) = self.field(*id) {
                values.insert(*id, value.coerce_to(field.field_type));
            }
        }
        let id = RecordId(self.next_record);
        self.next_record += 1;
        self.records.push(Record { id, values });
        &self.records[self.records.len() - 1]
    }

    /// Appends prepared rows, keeping the key invariant: unknown keys are
    /// dropped, missing fields are backfilled. Returns the number appended.
    pub fn push_records(&mut self, rows: Vec<HashMap<FieldId, CellValue>>) -> usize {
        let count = rows.len();
        self.records.reserve(count);
        for mut values in rows {
            values.retain(|id, _| self.fields.iter().any(|f| f.id == *id));
            for field in self.fields.iter() {
                values
                    .entry(field.id)
                    .or_insert_with(|| field.field_type.default_value());
            }
            let id = RecordId(self.next_record);
            self.next_record += 1;
            self.records.push(Record { id, values });
        }
        count
    }

    /// Stores `input` coerced to the field type. Returns the stored value, or
    /// `None` if the record or field is gone.
    pub fn update_cell(
        &mut self,
        record: RecordId,
        field: FieldId,
        input: &str,
    ) -> Option<CellValue> {
        let field_type = self.field(field)?.field_type;
        let record = self.records.iter_mut().find(|r| r.id == record)?;
        let value = field_type.coerce(input);
        trace!("Update {:?}/{:?} => {:?}", record.id, field, value);
        record.values.insert(field, value.clone());
        Some(value)
    }

    /// Stable sort of the records themselves.
    pub fn sort_by(&mut self, field: FieldId, direction: SortDirection) -> bool {
        let Some(field_type) = self.field(field).map(|f| f.field_type) else {
            return false;
        };
        let compare = |a: &Record, b: &Record| -> Ordering {
            let (a, b) = (a.get(field), b.get(field));
            match field_type {
                FieldType::Number => sort_number(a).total_cmp(&sort_number(b)),
                FieldType::Text => compare_text(&a.to_string(), &b.to_string()),
            }
        };
        match direction {
            SortDirection::Ascending => self.records.sort_by(compare),
            SortDirection::Descending => self.records.sort_by(|a, b| compare(b, a)),
        }
        true
    }
}

/// Absent and unparsable values count as zero.
fn sort_number(value: &CellValue) -> f64 {
    value.as_number().unwrap_or(0.0)
}

/// Case-insensitive primary order, so that "Apple" < "banana" < "cherry".
/// Ties put the lowercase spelling first ("apple" < "Apple"). Letters compare
/// by code point after lowercasing, accented ones sort after "z".
pub fn compare_text(a: &str, b: &str) -> Ordering {
    let mut a_iter = a.chars().flat_map(|c| c.to_lowercase());
    let mut b_iter = b.chars().flat_map(|c| c.to_lowercase());
    loop {
        match (a_iter.next(), b_iter.next()) {
            (Some(ac), Some(bc)) => match ac.cmp(&bc) {
                Ordering::Equal => continue,
                ord => return ord,
            },
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => return b.cmp(a),
        }
    }
}
