//! Multi-column clustering by Z-order (Morton) keys.
//!
//! Each clustering column is mapped to dense ranks (NULL first, then the
//! [`Value::total_cmp`] order) and the ranks' bits are interleaved into one
//! key. Sorting by that key keeps rows that are close in every column close
//! together, so per-file min/max ranges stay narrow on all of them.
use std::cmp::Ordering;

use crate::value::{Row, Value};

/// Most columns a Z-order key interleaves.
pub const MAX_ZORDER_COLUMNS: usize = 4;

/// Dense rank of each row's `column` value.
fn dense_ranks(rows: &[Row], column: &str) -> Vec<u32> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| rows[a].get(column).total_cmp(rows[b].get(column)));

    let mut ranks = vec![0u32; rows.len()];
    let mut rank = 0u32;
    let mut prev: Option<&Value> = None;
    for idx in order {
        let value = rows[idx].get(column);
        if prev.is_some_and(|p| p.total_cmp(value) != Ordering::Equal) {
            rank = rank.saturating_add(1);
        }
        ranks[idx] = rank;
        prev = Some(value);
    }
    ranks
}

/// Interleave the bits of `ranks`: bit `i` of column `j` lands at position
/// `i * ranks.len() + j`. At most [`MAX_ZORDER_COLUMNS`] ranks fit.
pub(crate) fn interleave(ranks: &[u32]) -> u128 {
    let k = ranks.len();
    let mut key = 0u128;
    for bit in 0..u32::BITS as usize {
        for (j, rank) in ranks.iter().enumerate() {
            if (rank >> bit) & 1 == 1 {
                key |= 1u128 << (bit * k + j);
            }
        }
    }
    key
}

/// Order `rows` by the Z-order key of `columns`. Ties keep input order.
pub(crate) fn zorder_sort(rows: Vec<Row>, columns: &[String]) -> Vec<Row> {
    if columns.is_empty() || rows.len() < 2 {
        return rows;
    }
    let per_column: Vec<Vec<u32>> = columns.iter().map(|c| dense_ranks(&rows, c)).collect();

    let mut keyed: Vec<(u128, Row)> = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let ranks: Vec<u32> = per_column.iter().map(|r| r[i]).collect();
            (interleave(&ranks), row)
        })
        .collect();
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, row)| row).collect()
}
