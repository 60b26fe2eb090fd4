use std::collections::HashMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::info;

use crate::table::{CellValue, Field, FieldId, FieldType, Table};

const FIRST_NAMES: [&str; 16] = [
    "Ada", "Grace", "Alan", "Linus", "Margaret", "Dennis", "Barbara", "Ken", "Frances", "Edsger",
    "Radia", "Donald", "Katherine", "John", "Hedy", "Niklaus",
];
const LAST_NAMES: [&str; 16] = [
    "Lovelace", "Hopper", "Turing", "Torvalds", "Hamilton", "Ritchie", "Liskov", "Thompson",
    "Allen", "Dijkstra", "Perlman", "Knuth", "Johnson", "McCarthy", "Lamarr", "Wirth",
];
const ROLES: [&str; 4] = ["Developer", "Designer", "Manager", "Analyst"];
const DEPARTMENTS: [&str; 4] = ["Engineering", "Design", "Product", "Marketing"];
const DOMAINS: [&str; 4] = ["company.com", "example.org", "mail.net", "corp.io"];
const WORDS: [&str; 12] = [
    "alpha", "bravo", "delta", "echo", "falcon", "harbor", "indigo", "juniper", "kepler",
    "lumen", "meridian", "nova",
];

/// Produces the values of synthesized rows. Implementations must be pure in
/// `row` so rows can be generated in parallel and reproduced.
pub trait RecordGenerator: Sync {
    fn value(&self, field: &Field, row: usize, rng: &mut StdRng) -> CellValue;

    fn seed(&self) -> u64;
}

/// Picks plausible values from the column name: names, emails, roles and
/// departments for text columns, bounded integers for number columns.
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    seed: u64,
}

impl SyntheticGenerator {
    pub fn seeded(seed: u64) -> Self {
        Self { seed }
    }

    pub fn random() -> Self {
        Self {
            seed: rand::random(),
        }
    }
}

impl RecordGenerator for SyntheticGenerator {
    fn value(&self, field: &Field, row: usize, rng: &mut StdRng) -> CellValue {
        let name = field.name().to_lowercase();
        match field.field_type() {
            FieldType::Number => {
                let (low, high) = if name.contains("age") {
                    (18, 80)
                } else {
                    (0, 1000)
                };
                CellValue::Number(rng.gen_range(low..=high) as f64)
            }
            FieldType::Text => {
                let first = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];
                let last = LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())];
                let text = if name.contains("email") || name.contains("mail") {
                    let domain = DOMAINS[rng.gen_range(0..DOMAINS.len())];
                    let (first, last) = (first.to_lowercase(), last.to_lowercase());
                    format!("{first}.{last}{row}@{domain}")
                } else if name.contains("name") {
                    format!("{first} {last}")
                } else if name.contains("role") {
                    ROLES[rng.gen_range(0..ROLES.len())].to_string()
                } else if name.contains("department") || name.contains("dept") {
                    DEPARTMENTS[rng.gen_range(0..DEPARTMENTS.len())].to_string()
                } else {
                    let a = WORDS[rng.gen_range(0..WORDS.len())];
                    let b = WORDS[rng.gen_range(0..WORDS.len())];
                    format!("{a} {b}")
                };
                CellValue::Text(text)
            }
        }
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

fn row_rng(seed: u64, row: usize) -> StdRng {
    // splitmix style scramble so neighbouring rows get unrelated streams
    let mut z = seed ^ (row as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    StdRng::seed_from_u64(z ^ (z >> 31))
}

/// Synthesizes `count` rows for `fields`, numbering them from `first_row`.
/// Rows are built in parallel, the output order is `first_row..first_row + count`.
pub fn generate_rows(
    generator: &dyn RecordGenerator,
    fields: &[Field],
    first_row: usize,
    count: usize,
) -> Vec<HashMap<FieldId, CellValue>> {
    let start_time = Instant::now();
    let seed = generator.seed();
    let rows: Vec<HashMap<FieldId, CellValue>> = (first_row..first_row + count)
        .into_par_iter()
        .map(|row| {
            let mut rng = row_rng(seed, row);
            fields
                .iter()
                .map(|field| (field.id(), generator.value(field, row, &mut rng)))
                .collect()
        })
        .collect();
    let elapsed = start_time.elapsed().as_millis();
    info!("Generated {count} rows in {elapsed}ms");
    rows
}

pub const DEMO_SCHEMA: [(&str, FieldType); 5] = [
    ("Name", FieldType::Text),
    ("Email", FieldType::Text),
    ("Age", FieldType::Number),
    ("Role", FieldType::Text),
    ("Department", FieldType::Text),
];

/// The sample table shown when the host does not supply one.
pub fn demo_table(rows: usize, seed: u64) -> Table {
    let mut table = Table::new("Sample Table", &DEMO_SCHEMA);
    let ids: Vec<FieldId> = table.fields().iter().map(|f| f.id()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..rows)
        .map(|idx| {
            let values = [
                CellValue::Text(format!("User {}", idx + 1)),
                CellValue::Text(format!("user{}@company.com", idx + 1)),
                CellValue::Number(rng.gen_range(20..70) as f64),
                CellValue::Text(ROLES[idx % ROLES.len()].to_string()),
                CellValue::Text(DEPARTMENTS[idx % DEPARTMENTS.len()].to_string()),
            ];
            ids.iter().copied().zip(values).collect::<HashMap<_, _>>()
        })
        .collect();
    table.push_records(data);
    table
}

/// A fresh table with the demo schema, either empty or with `rows`
/// synthesized rows.
pub fn blank_table(name: &str, rows: usize, generator: &dyn RecordGenerator) -> Table {
    let mut table = Table::new(name, &DEMO_SCHEMA);
    if rows > 0 {
        let data = generate_rows(generator, table.fields(), 0, rows);
        table.push_records(data);
    }
    table
}
