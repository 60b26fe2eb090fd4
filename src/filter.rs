use std::fmt;
use std::time::Instant;

use rayon::prelude::*;
use tracing::debug;

use crate::domain::Rejection;
use crate::table::{CellValue, Field, FieldId, FieldType, Record, Table};

/// Operator as requested by the user, before it is bound to a column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Contains,
    NotContains,
    Equals,
    Gt,
    Lt,
    Gte,
    Lte,
    IsEmpty,
    IsNotEmpty,
}

impl Operator {
    pub const TEXT: [Operator; 5] = [
        Operator::Contains,
        Operator::NotContains,
        Operator::Equals,
        Operator::IsEmpty,
        Operator::IsNotEmpty,
    ];
    pub const NUMBER: [Operator; 7] = [
        Operator::Equals,
        Operator::Gt,
        Operator::Lt,
        Operator::Gte,
        Operator::Lte,
        Operator::IsEmpty,
        Operator::IsNotEmpty,
    ];

    pub fn for_type(field_type: FieldType) -> &'static [Operator] {
        match field_type {
            FieldType::Text => &Self::TEXT,
            FieldType::Number => &Self::NUMBER,
        }
    }

    pub fn needs_operand(self) -> bool {
        !matches!(self, Operator::IsEmpty | Operator::IsNotEmpty)
    }

    pub fn label(self) -> &'static str {
        match self {
            Operator::Contains => "contains",
            Operator::NotContains => "does not contain",
            Operator::Equals => "is",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::IsEmpty => "is empty",
            Operator::IsNotEmpty => "is not empty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOperator {
    Contains,
    NotContains,
    Equals,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberOperator {
    Equals,
    Gt,
    Lt,
    Gte,
    Lte,
    IsEmpty,
    IsNotEmpty,
}

impl TryFrom<Operator> for TextOperator {
    type Error = Rejection;

    fn try_from(op: Operator) -> Result<Self, Self::Error> {
        Ok(match op {
            Operator::Contains => TextOperator::Contains,
            Operator::NotContains => TextOperator::NotContains,
            Operator::Equals => TextOperator::Equals,
            Operator::IsEmpty => TextOperator::IsEmpty,
            Operator::IsNotEmpty => TextOperator::IsNotEmpty,
            _ => return Err(Rejection::UnsupportedOperator),
        })
    }
}

impl TryFrom<Operator> for NumberOperator {
    type Error = Rejection;

    fn try_from(op: Operator) -> Result<Self, Self::Error> {
        Ok(match op {
            Operator::Equals => NumberOperator::Equals,
            Operator::Gt => NumberOperator::Gt,
            Operator::Lt => NumberOperator::Lt,
            Operator::Gte => NumberOperator::Gte,
            Operator::Lte => NumberOperator::Lte,
            Operator::IsEmpty => NumberOperator::IsEmpty,
            Operator::IsNotEmpty => NumberOperator::IsNotEmpty,
            _ => return Err(Rejection::UnsupportedOperator),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(pub u64);

/// A predicate on one column. The variant is fixed by the column type at
/// creation and is not revisited later.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Text {
        id: FilterId,
        field: FieldId,
        operator: TextOperator,
        value: String,
    },
    Number {
        id: FilterId,
        field: FieldId,
        operator: NumberOperator,
        value: f64,
    },
}

impl Filter {
    /// Binds `operator` and `value` to `field`. Comparison operators need a
    /// non-blank operand, numeric ones a finite number.
    pub fn new(
        id: FilterId,
        field: &Field,
        operator: Operator,
        value: &str,
    ) -> Result<Filter, Rejection> {
        let value = value.trim();
        if operator.needs_operand() && value.is_empty() {
            return Err(Rejection::MissingOperand);
        }
        match field.field_type() {
            FieldType::Text => Ok(Filter::Text {
                id,
                field: field.id(),
                operator: TextOperator::try_from(operator)?,
                value: value.to_lowercase(),
            }),
            FieldType::Number => {
                let operator = NumberOperator::try_from(operator)?;
                let value = if operator_needs_number(operator) {
                    value
                        .parse::<f64>()
                        .ok()
                        .filter(|n| n.is_finite())
                        .ok_or(Rejection::InvalidNumber)?
                } else {
                    0.0
                };
                Ok(Filter::Number {
                    id,
                    field: field.id(),
                    operator,
                    value,
                })
            }
        }
    }

    pub fn id(&self) -> FilterId {
        match self {
            Filter::Text { id, .. } | Filter::Number { id, .. } => *id,
        }
    }

    pub fn field(&self) -> FieldId {
        match self {
            Filter::Text { field, .. } | Filter::Number { field, .. } => *field,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Text {
                field,
                operator,
                value,
                ..
            } => text_matches(*operator, value, record.get(*field)),
            Filter::Number {
                field,
                operator,
                value,
                ..
            } => number_matches(*operator, *value, record.get(*field)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Text { operator, value, .. } => match operator {
                TextOperator::Contains => write!(f, "contains \"{value}\""),
                TextOperator::NotContains => write!(f, "does not contain \"{value}\""),
                TextOperator::Equals => write!(f, "is \"{value}\""),
                TextOperator::IsEmpty => f.write_str("is empty"),
                TextOperator::IsNotEmpty => f.write_str("is not empty"),
            },
            Filter::Number { operator, value, .. } => {
                let value = CellValue::Number(*value);
                match operator {
                    NumberOperator::Equals => write!(f, "= {value}"),
                    NumberOperator::Gt => write!(f, "> {value}"),
                    NumberOperator::Lt => write!(f, "< {value}"),
                    NumberOperator::Gte => write!(f, ">= {value}"),
                    NumberOperator::Lte => write!(f, "<= {value}"),
                    NumberOperator::IsEmpty => f.write_str("is empty"),
                    NumberOperator::IsNotEmpty => f.write_str("is not empty"),
                }
            }
        }
    }
}

fn operator_needs_number(operator: NumberOperator) -> bool {
    !matches!(
        operator,
        NumberOperator::IsEmpty | NumberOperator::IsNotEmpty
    )
}

// `needle` is already lowercased
fn text_matches(operator: TextOperator, needle: &str, cell: &CellValue) -> bool {
    match operator {
        TextOperator::IsEmpty => cell.is_blank(),
        TextOperator::IsNotEmpty => !cell.is_blank(),
        TextOperator::Contains => cell.to_string().to_lowercase().contains(needle),
        TextOperator::NotContains => !cell.to_string().to_lowercase().contains(needle),
        TextOperator::Equals => cell.to_string().to_lowercase() == needle,
    }
}

// A value without a numeric reading is empty and never compares.
fn number_matches(operator: NumberOperator, operand: f64, cell: &CellValue) -> bool {
    let number = cell.as_number();
    match (operator, number) {
        (NumberOperator::IsEmpty, n) => n.is_none(),
        (NumberOperator::IsNotEmpty, n) => n.is_some(),
        (_, None) => false,
        (NumberOperator::Equals, Some(n)) => n == operand,
        (NumberOperator::Gt, Some(n)) => n > operand,
        (NumberOperator::Lt, Some(n)) => n < operand,
        (NumberOperator::Gte, Some(n)) => n >= operand,
        (NumberOperator::Lte, Some(n)) => n <= operand,
    }
}

/// Case-insensitive substring match on any field value. `term` is lowercased,
/// an empty term matches everything.
pub fn matches_search(record: &Record, fields: &[Field], term: &str) -> bool {
    term.is_empty()
        || fields
            .iter()
            .any(|f| {
                let text = record.get(f.id()).to_string();
                text.to_lowercase().contains(term)
            })
}

/// The active filters of a table. Evaluation is the conjunction of all of them.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
    next_id: u64,
}

impl FilterSet {
    pub fn add(
        &mut self,
        table: &Table,
        field: FieldId,
        operator: Operator,
        value: &str,
    ) -> Result<FilterId, Rejection> {
        let field = table.field(field).ok_or(Rejection::UnknownField)?;
        let id = FilterId(self.next_id + 1);
        let filter = Filter::new(id, field, operator, value)?;
        debug!("Add filter {:?} on \"{}\": {}", id, field.name(), filter);
        self.next_id += 1;
        self.filters.push(filter);
        Ok(id)
    }

    pub fn remove(&mut self, id: FilterId) -> bool {
        let before = self.filters.len();
        self.filters.retain(|f| f.id() != id);
        self.filters.len() != before
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    /// Drops filters whose column was deleted.
    pub fn retain_fields(&mut self, table: &Table) {
        self.filters.retain(|f| table.field(f.field()).is_some());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }
}

/// Positions in `records` that pass the search and every filter, in order.
pub fn recompute(
    records: &[Record],
    fields: &[Field],
    filters: &FilterSet,
    search: &str,
) -> Vec<usize> {
    let term = search.trim().to_lowercase();
    if filters.is_empty() && term.is_empty() {
        return (0..records.len()).collect();
    }
    let start_time = Instant::now();
    let keep = |record: &Record| matches_search(record, fields, &term) && filters.matches(record);
    let matching: Vec<usize> = records
        .par_iter()
        .enumerate()
        .filter(|(_, record)| keep(record))
        .map(|(idx, _)| idx)
        .collect();
    debug!(
        "Filtered {} of {} rows in {}ms",
        matching.len(),
        records.len(),
        start_time.elapsed().as_millis()
    );
    matching
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ages() -> (Table, FieldId) {
        let mut table = Table::new("t", &[("Age", FieldType::Number)]);
        let age = table.fields()[0].id();
        table.add_record(&[(age, CellValue::Number(20.0))]);
        table.add_record(&[]);
        table.add_record(&[(age, CellValue::Number(30.0))]);
        let second = table.records()[1].id();
        table.update_cell(second, age, "abc");
        (table, age)
    }

    fn shown(table: &Table, filters: &FilterSet, search: &str) -> Vec<usize> {
        recompute(table.records(), table.fields(), filters, search)
    }

    // `None` is a null cell, as loaded from a file
    fn texts(values: &[Option<&str>]) -> (Table, FieldId) {
        let data = values
            .iter()
            .map(|v| match v {
                Some(s) => CellValue::Text(s.to_string()),
                None => CellValue::Empty,
            })
            .collect();
        let table = Table::from_columns(
            "t",
            vec![
                ("Note".to_string(), FieldType::Text, data),
                ("Other".to_string(), FieldType::Text, Vec::new()),
            ],
        );
        let note = table.fields()[0].id();
        (table, note)
    }

    #[test]
    fn numeric_comparison_skips_unparsable_values() {
        let (table, age) = ages();
        let mut filters = FilterSet::default();
        filters.add(&table, age, Operator::Gt, "25").unwrap();
        let result = shown(&table, &filters, "");
        assert_eq!(result, vec![2]);
        let record = &table.records()[result[0]];
        assert_eq!(*record.get(age), CellValue::Number(30.0));
    }

    #[test]
    fn unparsable_numbers_count_as_empty() {
        let (table, age) = ages();
        let mut filters = FilterSet::default();
        filters.add(&table, age, Operator::IsEmpty, "").unwrap();
        assert_eq!(shown(&table, &filters, ""), vec![1]);
        filters.clear();
        filters.add(&table, age, Operator::IsNotEmpty, "").unwrap();
        assert_eq!(shown(&table, &filters, ""), vec![0, 2]);
    }

    #[test]
    fn text_is_empty_covers_blank_and_missing() {
        let (table, note) = texts(&[Some(""), Some("x"), None]);
        let mut filters = FilterSet::default();
        filters.add(&table, note, Operator::IsEmpty, "").unwrap();
        assert_eq!(shown(&table, &filters, ""), vec![0, 2]);
    }

    #[test]
    fn text_operators_ignore_case() {
        let (table, note) = texts(&[Some("Hello World"), Some("hello"), Some("bye")]);
        let check = |op: Operator, value: &str| {
            let mut filters = FilterSet::default();
            filters.add(&table, note, op, value).unwrap();
            shown(&table, &filters, "")
        };
        assert_eq!(check(Operator::Contains, "HELLO"), vec![0, 1]);
        assert_eq!(check(Operator::NotContains, "world"), vec![1, 2]);
        assert_eq!(check(Operator::Equals, "Hello"), vec![1]);
    }

    #[test]
    fn operand_rules_are_enforced() {
        let (table, age) = ages();
        let mut filters = FilterSet::default();
        let mut add = |operator: Operator, value: &str| filters.add(&table, age, operator, value);
        assert_eq!(add(Operator::Gt, "  "), Err(Rejection::MissingOperand));
        assert_eq!(add(Operator::Gt, "ten"), Err(Rejection::InvalidNumber));
        assert_eq!(add(Operator::Gt, "NaN"), Err(Rejection::InvalidNumber));
        assert_eq!(add(Operator::Lt, "inf"), Err(Rejection::InvalidNumber));
        assert_eq!(add(Operator::Lt, "-inf"), Err(Rejection::InvalidNumber));
        let unsupported = add(Operator::Contains, "1");
        assert_eq!(unsupported, Err(Rejection::UnsupportedOperator));
        let missing = filters.add(&table, FieldId(99), Operator::IsEmpty, "");
        assert_eq!(missing, Err(Rejection::UnknownField));
        assert!(filters.is_empty());
    }

    #[test]
    fn filters_and_search_are_conjunctive_and_idempotent() {
        let (table, age) = ages();
        let mut filters = FilterSet::default();
        filters.add(&table, age, Operator::Gte, "20").unwrap();
        filters.add(&table, age, Operator::Lt, "25").unwrap();
        let once = shown(&table, &filters, "");
        let twice = shown(&table, &filters, "");
        assert_eq!(once, vec![0]);
        assert_eq!(once, twice);

        filters.add(&table, age, Operator::Gt, "25").unwrap();
        assert!(shown(&table, &filters, "").is_empty());
    }

    #[test]
    fn search_matches_any_column() {
        let (table, note) = texts(&[Some("Apples"), Some("pears"), Some("")]);
        let filters = FilterSet::default();
        assert_eq!(shown(&table, &filters, "APP"), vec![0]);
        assert_eq!(shown(&table, &filters, "  "), vec![0, 1, 2]);

        let mut filters = FilterSet::default();
        filters.add(&table, note, Operator::IsNotEmpty, "").unwrap();
        assert_eq!(shown(&table, &filters, "s"), vec![0, 1]);
    }

    #[test]
    fn removing_filters() {
        let (mut table, age) = ages();
        let mut filters = FilterSet::default();
        let id = filters.add(&table, age, Operator::IsEmpty, "").unwrap();
        assert!(filters.remove(id));
        assert!(!filters.remove(id));

        filters.add(&table, age, Operator::IsEmpty, "").unwrap();
        table.add_field("Spare", FieldType::Text);
        table.delete_field(age).unwrap();
        filters.retain_fields(&table);
        assert!(filters.is_empty());
    }
}
