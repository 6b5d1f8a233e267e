use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, MathematicalOps};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::domain::{AggregateStatistic, EnrichedExpenseRecord};

type GroupKey = (String, String, String);

/// Per-entity statistics, largest total first.
///
/// Records without a region are left out. Groups keep first-seen order before the stable
/// sort, so equal totals come out in the order their entities first appeared. A group whose
/// total does not fit in a `Decimal` is logged and left out.
pub fn aggregate(records: &[EnrichedExpenseRecord]) -> Vec<AggregateStatistic> {
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<(GroupKey, Vec<Decimal>)> = Vec::new();
    let mut without_region = 0usize;

    for record in records {
        let Some(region) = record.region.as_ref() else {
            without_region += 1;
            continue;
        };
        let key = (record.tax_id.clone(), record.legal_name.clone(), region.clone());
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(record.expense_value);
    }
    debug!("{} records without region left out of aggregation", without_region);

    let mut stats: Vec<AggregateStatistic> = groups
        .into_iter()
        .filter_map(|((tax_id, legal_name, region), values)| {
            let Some(total) = checked_total(&values) else {
                warn!("⚠️ Total expense for {} overflows, group skipped", tax_id);
                return None;
            };
            let mean = total / Decimal::from(values.len());
            Some(AggregateStatistic {
                std_dev_expense: sample_std_dev(&values, mean),
                tax_id,
                legal_name,
                region,
                total_expense: total,
                mean_quarterly_expense: mean,
            })
        })
        .collect();

    stats.sort_by(|a, b| b.total_expense.cmp(&a.total_expense));
    info!("📊 Aggregated {} entities", stats.len());
    stats
}

fn checked_total(values: &[Decimal]) -> Option<Decimal> {
    values
        .iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))
}

/// Sample (n - 1) standard deviation; undefined below two observations.
///
/// Squared deviations can leave the `Decimal` range long before the values do; in that case
/// the result is computed in `f64` instead.
pub fn sample_std_dev(values: &[Decimal], mean: Decimal) -> Option<Decimal> {
    if values.len() < 2 {
        return None;
    }
    let squared = values.iter().try_fold(Decimal::ZERO, |acc, v| {
        let d = v.checked_sub(mean)?;
        acc.checked_add(d.checked_mul(d)?)
    });
    match squared {
        Some(squared) => (squared / Decimal::from(values.len() - 1)).sqrt(),
        None => {
            debug!("Squared deviations overflow Decimal, using f64");
            float_std_dev(values)
        }
    }
}

fn float_std_dev(values: &[Decimal]) -> Option<Decimal> {
    let floats: Vec<f64> = values.iter().filter_map(ToPrimitive::to_f64).collect();
    let n = floats.len() as f64;
    let mean = floats.iter().sum::<f64>() / n;
    let variance = floats.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = Decimal::from_f64(variance.sqrt());
    if std_dev.is_none() {
        warn!("⚠️ Standard deviation out of range, left empty");
    }
    std_dev
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(tax_id: &str, name: &str, region: Option<&str>, value: i64) -> EnrichedExpenseRecord {
        EnrichedExpenseRecord {
            tax_id: tax_id.into(),
            legal_name: name.into(),
            year: 2024,
            quarter: 1,
            expense_value: Decimal::new(value, 0),
            region: region.map(str::to_string),
        }
    }

    #[test]
    fn test_statistics_for_three_observations() {
        let records = vec![
            rec("1", "A", Some("SP"), 100),
            rec("1", "A", Some("SP"), 200),
            rec("1", "A", Some("SP"), 300),
        ];
        let out = aggregate(&records);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].total_expense, Decimal::new(600, 0));
        assert_eq!(out[0].mean_quarterly_expense, Decimal::new(200, 0));
        assert_eq!(out[0].std_dev_expense.map(|s| s.round_dp(2)), Some(Decimal::new(100, 0)));
    }

    #[test]
    fn test_single_observation_has_no_std_dev() {
        let out = aggregate(&[rec("1", "A", Some("SP"), 100)]);
        assert_eq!(out[0].std_dev_expense, None);
    }

    #[test]
    fn test_two_equal_observations_have_zero_std_dev() {
        let out = aggregate(&[rec("1", "A", Some("SP"), 5), rec("1", "A", Some("SP"), 5)]);
        assert_eq!(out[0].std_dev_expense, Some(Decimal::ZERO));
    }

    #[test]
    fn test_records_without_region_are_excluded() {
        let out = aggregate(&[
            rec("00000000000000", "SEM CADASTRO", None, 1000),
            rec("1", "A", Some("SP"), 10),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tax_id, "1");
    }

    #[test]
    fn test_sorted_descending_with_stable_ties() {
        let out = aggregate(&[
            rec("1", "FIRST", Some("SP"), 50),
            rec("2", "BIG", Some("RJ"), 500),
            rec("3", "SECOND", Some("MG"), 50),
            rec("1", "FIRST", Some("SP"), 0),
        ]);
        let order: Vec<&str> = out.iter().map(|s| s.legal_name.as_str()).collect();
        assert_eq!(order, vec!["BIG", "FIRST", "SECOND"]);
    }

    #[test]
    fn test_large_values_do_not_overflow_std_dev() {
        let big = |s: &str| {
            let mut r = rec("1", "A", Some("SP"), 0);
            r.expense_value = Decimal::from_str_exact(s).unwrap();
            r
        };
        let out = aggregate(&[big("1000000000000000.00"), big("3000000000000000.00")]);
        assert_eq!(out[0].total_expense, Decimal::new(4_000_000_000_000_000, 0));
        assert_eq!(out[0].mean_quarterly_expense, Decimal::new(2_000_000_000_000_000, 0));
        // sqrt(2) * 1e15
        let std_dev = out[0].std_dev_expense.unwrap();
        assert!((std_dev - Decimal::new(1_414_213_562_373_095, 0)).abs() < Decimal::ONE);
    }

    #[test]
    fn test_overflowing_total_skips_group() {
        let mut max = rec("1", "HUGE", Some("SP"), 0);
        max.expense_value = Decimal::MAX;
        let out = aggregate(&[max.clone(), max, rec("2", "B", Some("RJ"), 10)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].legal_name, "B");
    }

    #[test]
    fn test_same_tax_id_different_region_is_separate_group() {
        let out = aggregate(&[rec("1", "A", Some("SP"), 10), rec("1", "A", Some("RJ"), 10)]);
        assert_eq!(out.len(), 2);
    }
}
