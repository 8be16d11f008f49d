//! Column type sampling and schema inference.
//!
//! Each column is sampled over at most `sample_window` non-blank cells.
//! Every sample is classified in a fixed order (boolean, date, number,
//! string) and tallied; the type with the highest tally wins. Ties go to
//! the type checked first, so a column split evenly between `true` and
//! `42` is boolean. Scanning stops as soon as every column has a full
//! window, which keeps the cost per column independent of the row count.

use crate::error::{Error, Result};
use crate::header::HeaderNormalizer;
use crate::models::{ColumnDescriptor, DataType, SchemaDraft, SheetTable};
use crate::value::{parse_bool, parse_date, parse_number};

pub const DEFAULT_SAMPLE_WINDOW: usize = 100;
/// Upper bound on `common_values` per column.
pub const MAX_COMMON_VALUES: usize = 10;

/// Classify a single non-blank sample.
pub fn classify(value: &str) -> DataType {
    if parse_bool(value).is_some() {
        DataType::Boolean
    } else if parse_date(value).is_some() {
        DataType::Date
    } else if parse_number(value).is_some() {
        DataType::Number
    } else {
        DataType::String
    }
}

#[derive(Debug, Default, Clone)]
struct TypeTally {
    boolean: usize,
    date: usize,
    number: usize,
    string: usize,
}

impl TypeTally {
    fn record(&mut self, value: &str) {
        match classify(value) {
            DataType::Boolean => self.boolean += 1,
            DataType::Date => self.date += 1,
            DataType::Number => self.number += 1,
            DataType::String => self.string += 1,
        }
    }

    fn decide(&self) -> DataType {
        let ranked = [
            (DataType::Boolean, self.boolean),
            (DataType::Date, self.date),
            (DataType::Number, self.number),
            (DataType::String, self.string),
        ];
        let mut best = (DataType::String, 0);
        for (data_type, count) in ranked {
            if count > best.1 {
                best = (data_type, count);
            }
        }
        best.0
    }
}

#[derive(Debug, Default)]
struct ColumnSampler {
    tally: TypeTally,
    common_values: Vec<String>,
    sampled: usize,
    blanks: usize,
}

/// Infers [`ColumnDescriptor`]s from a [`SheetTable`].
#[derive(Debug, Clone)]
pub struct SchemaInferrer {
    sample_window: usize,
    max_common_values: usize,
    normalizer: HeaderNormalizer,
}

impl Default for SchemaInferrer {
    fn default() -> Self {
        Self {
            sample_window: DEFAULT_SAMPLE_WINDOW,
            max_common_values: MAX_COMMON_VALUES,
            normalizer: HeaderNormalizer::default(),
        }
    }
}

impl SchemaInferrer {
    /// `max_common_values` is clamped to [`MAX_COMMON_VALUES`].
    pub fn new(
        sample_window: usize,
        max_common_values: usize,
        normalizer: HeaderNormalizer,
    ) -> Result<Self> {
        if sample_window == 0 {
            return Err(Error::InvalidOptions(
                "sample_window must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            sample_window,
            max_common_values: max_common_values.min(MAX_COMMON_VALUES),
            normalizer,
        })
    }

    pub fn normalizer(&self) -> &HeaderNormalizer {
        &self.normalizer
    }

    pub fn sample_window(&self) -> usize {
        self.sample_window
    }

    pub fn infer(&self, table: &SheetTable) -> Vec<ColumnDescriptor> {
        let names = self.normalizer.normalize_all(&table.headers);
        let mut samplers: Vec<ColumnSampler> =
            table.headers.iter().map(|_| ColumnSampler::default()).collect();

        for row in &table.rows {
            if samplers.iter().all(|s| s.sampled >= self.sample_window) {
                break;
            }
            for (idx, sampler) in samplers.iter_mut().enumerate() {
                if sampler.sampled >= self.sample_window {
                    continue;
                }
                let cell = row.cells.get(idx).map(|c| c.trim()).unwrap_or("");
                if cell.is_empty() {
                    sampler.blanks += 1;
                    continue;
                }
                sampler.sampled += 1;
                sampler.tally.record(cell);
                if sampler.common_values.len() < self.max_common_values
                    && !sampler.common_values.iter().any(|v| v == cell)
                {
                    sampler.common_values.push(cell.to_string());
                }
            }
        }

        table
            .headers
            .iter()
            .zip(names)
            .zip(samplers)
            .map(|((raw, normalized), sampler)| ColumnDescriptor {
                name: raw.clone(),
                normalized_name: normalized,
                data_type: sampler.tally.decide(),
                is_required: sampler.sampled > 0 && sampler.blanks == 0,
                common_values: sampler.common_values,
            })
            .collect()
    }

    /// Infer columns and package them for the registry.
    pub fn draft(&self, table: &SheetTable, dataset_name: &str) -> SchemaDraft {
        SchemaDraft {
            dataset_name: dataset_name.to_string(),
            source_file: table.source_file.clone(),
            columns: self.infer(table),
        }
    }
}
