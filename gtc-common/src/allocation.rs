//! Sampling allocation and quota apportionment
//!
//! Dataset weights are normalized to fractions and turned into integer quotas
//! with the largest-remainder method. Quotas always sum to the requested total
//! when any weight is positive. Both functions are pure and never fail.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Drop non-positive (and non-finite) weights and scale the rest to sum to 1.0
pub fn normalize_allocation(raw: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let positive: Vec<(&String, f64)> = raw
        .iter()
        .filter(|(_, w)| w.is_finite() && **w > 0.0)
        .map(|(k, w)| (k, *w))
        .collect();

    let total: f64 = positive.iter().map(|(_, w)| w).sum();
    if positive.is_empty() || !total.is_finite() || total <= 0.0 {
        return BTreeMap::new();
    }

    positive
        .into_iter()
        .map(|(k, w)| (k.clone(), w / total))
        .collect()
}

/// Integer quota per dataset for a sample of `total` items.
///
/// Every input key appears in the result; datasets without a positive weight
/// get 0. Leftover units after flooring go to the largest remainders, ties by
/// ascending dataset name. For totals beyond f64 precision the floors may
/// overshoot; the excess comes back off the smallest remainders.
pub fn compute_quotas(weights: &BTreeMap<String, f64>, total: usize) -> BTreeMap<String, usize> {
    let mut quotas: BTreeMap<String, usize> = weights.keys().map(|k| (k.clone(), 0)).collect();

    let normalized = normalize_allocation(weights);
    if normalized.is_empty() || total == 0 {
        return quotas;
    }

    let mut remainders: Vec<(&String, f64)> = Vec::with_capacity(normalized.len());
    // Floors can overshoot `total` once it exceeds f64's integer precision
    let mut assigned: u128 = 0;
    for (name, weight) in &normalized {
        let raw = weight * total as f64;
        let base = raw.floor();
        // `as` saturates; `total as f64` may round above `total`
        let base_units = (base as usize).min(total);
        quotas.insert(name.clone(), base_units);
        assigned = assigned.saturating_add(base_units as u128);
        remainders.push((name, raw - base));
    }

    // BTreeMap iteration is ascending by name; a stable sort keeps that order
    // among equal remainders.
    remainders.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let target = total as u128;
    if assigned < target {
        let mut deficit = target - assigned;
        for (name, _) in remainders.iter().cycle() {
            if deficit == 0 {
                break;
            }
            if let Some(q) = quotas.get_mut(*name) {
                *q += 1;
                deficit -= 1;
            }
        }
    } else if assigned > target {
        // Take back from the smallest remainders, ties by descending name
        let mut excess = assigned - target;
        for (name, _) in remainders.iter().rev().cycle() {
            if excess == 0 {
                break;
            }
            if let Some(q) = quotas.get_mut(*name) {
                if *q > 0 {
                    *q -= 1;
                    excess -= 1;
                }
            }
        }
    }

    quotas
}
