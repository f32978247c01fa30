use std::cmp::Ordering;
use std::collections::BTreeSet;

use tracing::warn;

use crate::model::{
    DatasetSummary, FieldKind, MetadataField, MetadataRecord, MetadataValue, SummaryValue,
};

/// Folds per-file metadata into dataset-level statistics.
///
/// Each field is aggregated over the records that carry it; a record missing a
/// field only drops out of that field's aggregate. The result depends on the
/// set of values seen, never on record order.
pub fn aggregate<'a, I>(records: I) -> DatasetSummary
where
    I: IntoIterator<Item = &'a MetadataRecord>,
{
    let records = records.into_iter().collect::<Vec<_>>();
    let mut summary = DatasetSummary::default();
    if records.is_empty() {
        return summary;
    }

    for field in MetadataField::ALL {
        let Some(key) = field.aggregate_key() else {
            continue;
        };
        let values = records
            .iter()
            .filter_map(|record| record.get(field))
            .collect::<Vec<_>>();
        if values.is_empty() {
            continue;
        }

        match field.kind() {
            FieldKind::Identifier => {
                let distinct = distinct_values(&values);
                summary.push(key, SummaryValue::Count(distinct.len() as u64));
            }
            FieldKind::Categorical => {
                let distinct = distinct_values(&values);
                summary.push(key, SummaryValue::Values(distinct.into_iter().collect()));
            }
            FieldKind::Measurement => {
                if let Some((minimum, maximum)) = value_range(field, &values) {
                    summary.push(
                        key,
                        SummaryValue::Range {
                            minimum: minimum.clone(),
                            maximum: maximum.clone(),
                        },
                    );
                }
            }
        }
    }

    summary
}

fn distinct_values(values: &[&MetadataValue]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn value_range<'a>(
    field: MetadataField,
    values: &[&'a MetadataValue],
) -> Option<(&'a MetadataValue, &'a MetadataValue)> {
    let mut numeric = Vec::with_capacity(values.len());
    for value in values {
        match value.as_f64() {
            Some(number) => numeric.push((number, *value)),
            None => warn!("ignoring non-numeric {field} value '{value}' in range aggregate"),
        }
    }

    let minimum = numeric.iter().min_by(|a, b| compare_measurements(a, b))?;
    let maximum = numeric.iter().max_by(|a, b| compare_measurements(a, b))?;
    Some((minimum.1, maximum.1))
}

// Equal magnitudes tie-break on their text so the chosen value is order independent.
fn compare_measurements(a: &(f64, &MetadataValue), b: &(f64, &MetadataValue)) -> Ordering {
    a.0.total_cmp(&b.0)
        .then_with(|| a.1.to_string().cmp(&b.1.to_string()))
}
