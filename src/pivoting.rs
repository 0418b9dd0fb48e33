//! Pivoting of sparse linear systems over GF(256).
//!
//! Two pivot-selection strategies are provided. *Inactivation* pivoting
//! picks pivots exclusively from singleton rows of the residual matrix and,
//! whenever none exists, declares the heaviest remaining column inactive;
//! the inactive columns end up as a small dense block in the lower-right
//! corner, so the leading sweep stays sparse. *Zlatev* pivoting is a
//! Markowitz-count strategy that scans the three lightest rows per step; it
//! is applied as an optional second round on the dense tail to sparsify it
//! further.
//!
//! Column occupancy is tracked with count-indexed bucket arrays rather than
//! linked lists; the contract (find any entry of minimum or maximum count,
//! decrement a key, remove an entry) is what the algorithms rely on.

use log::trace;

use crate::galois::{gf_div, region_madd};
use crate::gaussian::{forward_substitute, rows_pair_mut};

/// Rows examined per step by the Zlatev strategy.
const ZLATEVS: usize = 3;

/// Pivot `A x = B` with one round of inactivation pivoting.
///
/// On return `A` is block upper-triangular: a diagonal active block
/// followed by a dense `ias x ias` tail that has been forward-substituted,
/// with `B` processed accordingly. `otoc` receives the original-to-current
/// column mapping. Returns the field-operation count and the number of
/// inactivated columns.
pub fn pivot_matrix_oneround(
    nrow: usize,
    ncol_a: usize,
    ncol_b: usize,
    a: &mut [Vec<u8>],
    b: &mut [Vec<u8>],
    otoc: &mut [usize],
) -> (u64, usize) {
    let (row_order, col_order, ias) = inactivation_pivoting(nrow, ncol_a, a);
    trace!("inactivation pivoting: {}/{} columns inactivated", ias, ncol_a);
    for (k, &c) in col_order.iter().enumerate() {
        otoc[c] = k;
    }
    reshape_matrix(a, b, &row_order, &col_order);

    let mut operations = eliminate_active_block(nrow, ncol_a, ncol_b, ias, a, b);
    operations += tail_forward_substitute(nrow, ncol_a, ncol_b, ias, a, b);
    (operations, ias)
}

/// Two-round pivoting: inactivation over the whole matrix, then Zlatev
/// pivoting on the dense `ias x ias` tail before its forward substitution.
pub fn pivot_matrix_tworound(
    nrow: usize,
    ncol_a: usize,
    ncol_b: usize,
    a: &mut [Vec<u8>],
    b: &mut [Vec<u8>],
    otoc: &mut [usize],
) -> (u64, usize) {
    let (row_order, col_order, ias) = inactivation_pivoting(nrow, ncol_a, a);
    trace!("inactivation pivoting: {}/{} columns inactivated", ias, ncol_a);
    let mut ctoo = col_order.clone();
    for (k, &c) in col_order.iter().enumerate() {
        otoc[c] = k;
    }
    reshape_matrix(a, b, &row_order, &col_order);

    let mut operations = eliminate_active_block(nrow, ncol_a, ncol_b, ias, a, b);

    let active = ncol_a - ias;
    let tail_rows = nrow - active;
    if ias > 0 {
        // Lift the dense tail out, re-pivot it, and re-point both column
        // mappings and the tail columns of the upper rows.
        let mut sub_a: Vec<Vec<u8>> = (0..tail_rows)
            .map(|i| a[active + i][active..ncol_a].to_vec())
            .collect();
        let mut sub_b: Vec<Vec<u8>> = (0..tail_rows)
            .map(|i| b[active + i][..ncol_b].to_vec())
            .collect();

        let (row_order_2nd, col_order_2nd) = zlatev_pivoting(tail_rows, ias, &sub_a);
        trace!("zlatev second round re-ordered the {}-column tail", ias);

        let remapped: Vec<usize> = col_order_2nd.iter().map(|&c| ctoo[active + c]).collect();
        ctoo[active..].copy_from_slice(&remapped);
        for (k, &c) in ctoo.iter().enumerate() {
            otoc[c] = k;
        }

        reshape_matrix(&mut sub_a, &mut sub_b, &row_order_2nd, &col_order_2nd);

        let mut scratch = vec![0u8; ias];
        for row in a.iter_mut().take(active) {
            for (k, &c) in col_order_2nd.iter().enumerate() {
                scratch[k] = row[active + c];
            }
            row[active..ncol_a].copy_from_slice(&scratch);
        }

        operations += forward_substitute(tail_rows, ias, ncol_b, &mut sub_a, &mut sub_b);
        for i in 0..ias {
            a[active + i][active..ncol_a].copy_from_slice(&sub_a[i]);
            b[active + i][..ncol_b].copy_from_slice(&sub_b[i]);
        }
    }
    (operations, ias)
}

/// Eliminate below the diagonal of the active block. The active part is
/// diagonal by construction (each pivot row was a singleton), so fill is
/// confined to the inactive tail columns.
fn eliminate_active_block(
    nrow: usize,
    ncol_a: usize,
    ncol_b: usize,
    ias: usize,
    a: &mut [Vec<u8>],
    b: &mut [Vec<u8>],
) -> u64 {
    let mut operations: u64 = 0;
    let active = ncol_a - ias;
    for i in 0..active {
        for j in (i + 1)..nrow {
            if a[j][i] == 0 {
                continue;
            }
            let quotient = gf_div(a[j][i], a[i][i]);
            operations += 1;
            let (src, dst) = rows_pair_mut(a, i, j);
            region_madd(&mut dst[active..ncol_a], &src[active..ncol_a], quotient);
            operations += ias as u64;
            let (src, dst) = rows_pair_mut(b, i, j);
            region_madd(&mut dst[..ncol_b], &src[..ncol_b], quotient);
            operations += ncol_b as u64;
            a[j][i] = 0;
        }
    }
    operations
}

/// Forward-substitute the dense tail (all rows from the first inactive one
/// down) and write the resulting `ias` pivot rows back in place.
fn tail_forward_substitute(
    nrow: usize,
    ncol_a: usize,
    ncol_b: usize,
    ias: usize,
    a: &mut [Vec<u8>],
    b: &mut [Vec<u8>],
) -> u64 {
    if ias == 0 {
        return 0;
    }
    let active = ncol_a - ias;
    let tail_rows = nrow - active;
    let mut sub_a: Vec<Vec<u8>> = (0..tail_rows)
        .map(|i| a[active + i][active..ncol_a].to_vec())
        .collect();
    let mut sub_b: Vec<Vec<u8>> = (0..tail_rows)
        .map(|i| b[active + i][..ncol_b].to_vec())
        .collect();
    let operations = forward_substitute(tail_rows, ias, ncol_b, &mut sub_a, &mut sub_b);
    for i in 0..ias {
        a[active + i][active..ncol_a].copy_from_slice(&sub_a[i]);
        b[active + i][..ncol_b].copy_from_slice(&sub_b[i]);
    }
    operations
}

/// Inactivation pivoting.
///
/// Pivots are taken from singleton rows of the residual matrix. When no
/// singleton row remains, the column with the most nonzeros is declared
/// inactive and deducted from the row counts. Once every column is
/// resolved, the inactive columns are paired with still-available rows.
///
/// Returns the row pivot order, the column pivot order and the number of
/// inactivated columns (which occupy the tail of both orders).
fn inactivation_pivoting(
    nrow: usize,
    ncol: usize,
    a: &[Vec<u8>],
) -> (Vec<usize>, Vec<usize>, usize) {
    let mut row_counts = vec![0i64; nrow];
    let mut col_counts = vec![0usize; ncol];
    for i in 0..nrow {
        for j in 0..ncol {
            if a[i][j] != 0 {
                row_counts[i] += 1;
                col_counts[j] += 1;
            }
        }
    }
    let max_col1s = col_counts.iter().copied().max().unwrap_or(0);

    // Buckets of column indices keyed by their initial nonzero count; the
    // heaviest bucket is consulted when a column must be inactivated.
    let mut col_buckets: Vec<Vec<usize>> = vec![Vec::new(); max_col1s + 1];
    for j in 0..ncol {
        col_buckets[col_counts[j]].push(j);
    }

    // 0 = active, 1 = inactivated, 2 = removed (an entry became a pivot).
    let mut col_state = vec![0u8; ncol];
    let mut row_taken = vec![false; nrow];

    let mut row_pivots = Vec::with_capacity(ncol);
    let mut col_pivots = Vec::with_capacity(ncol);
    let mut inactivated = 0usize;
    let mut active = ncol;

    while active != 0 {
        let singleton = (0..nrow).find(|&i| !row_taken[i] && row_counts[i] == 1);
        if let Some(p_r) = singleton {
            let p_c = (0..ncol)
                .find(|&j| col_state[j] == 0 && a[p_r][j] != 0)
                .expect("singleton row lost its nonzero entry");
            row_pivots.push(p_r);
            col_pivots.push(p_c);
            row_taken[p_r] = true;
            for i in 0..nrow {
                if !row_taken[i] && a[i][p_c] != 0 {
                    row_counts[i] -= 1;
                }
            }
            col_state[p_c] = 2;
            active -= 1;
        } else {
            // No singleton row: inactivate the heaviest remaining column.
            'search: for bucket in (0..=max_col1s).rev() {
                while let Some(&c) = col_buckets[bucket].last() {
                    if col_state[c] != 0 {
                        col_buckets[bucket].pop();
                        continue;
                    }
                    col_state[c] = 1;
                    inactivated += 1;
                    active -= 1;
                    for i in 0..nrow {
                        if !row_taken[i] && a[i][c] != 0 {
                            row_counts[i] -= 1;
                        }
                    }
                    col_buckets[bucket].pop();
                    break 'search;
                }
            }
        }
    }

    // Pair the inactive columns with remaining rows; a row with a nonzero
    // entry in the column is preferred but any free row will do.
    for i in 0..ncol {
        if col_state[i] != 1 {
            continue;
        }
        let mut candidate = None;
        for j in 0..nrow {
            if !row_taken[j] {
                candidate = Some(j);
                if a[j][i] != 0 {
                    break;
                }
            }
        }
        let j = candidate.expect("ran out of rows while pairing inactive columns");
        row_pivots.push(j);
        col_pivots.push(i);
        row_taken[j] = true;
        col_state[i] = 2;
    }

    (row_pivots, col_pivots, inactivated)
}

/// Zlatev pivoting: greedy Markowitz-count selection scanning the three
/// lightest rows each step. Returns complete row and column pivot orders
/// over all `ncol` columns; if the matrix is rank deficient the remaining
/// all-zero columns are paired with leftover rows so that the orders stay
/// complete.
fn zlatev_pivoting(nrow: usize, ncol: usize, a: &[Vec<u8>]) -> (Vec<usize>, Vec<usize>) {
    let mut row_counts = vec![0usize; nrow];
    let mut col_counts = vec![0usize; ncol];
    for i in 0..nrow {
        for j in 0..ncol {
            if a[i][j] != 0 {
                row_counts[i] += 1;
                col_counts[j] += 1;
            }
        }
    }
    let max_row1s = row_counts.iter().copied().max().unwrap_or(0);
    let max_col1s = col_counts.iter().copied().max().unwrap_or(0);

    // Count-indexed buckets with lazy invalidation: an entry is live only
    // while it is alive and its current count still matches the bucket.
    let mut row_buckets: Vec<Vec<usize>> = vec![Vec::new(); max_row1s + 1];
    let mut col_buckets: Vec<Vec<usize>> = vec![Vec::new(); max_col1s + 1];
    for i in 0..nrow {
        row_buckets[row_counts[i]].push(i);
    }
    for j in 0..ncol {
        col_buckets[col_counts[j]].push(j);
    }
    let mut row_alive = vec![true; nrow];
    let mut col_alive = vec![true; ncol];

    let mut row_pivots = Vec::with_capacity(ncol);
    let mut col_pivots = Vec::with_capacity(ncol);
    let mut pivots_found = 0usize;

    while pivots_found != ncol {
        let mut potential: Option<(usize, usize, usize)> = None; // (row, col, markowitz)
        let mut searched_rows = 0usize;
        'rows: for i in 1..=max_row1s {
            for idx in (0..row_buckets[i].len()).rev() {
                let r = row_buckets[i][idx];
                if !row_alive[r] || row_counts[r] != i {
                    continue;
                }
                searched_rows += 1;
                for j in 1..=max_col1s {
                    for cdx in (0..col_buckets[j].len()).rev() {
                        let c = col_buckets[j][cdx];
                        if !col_alive[c] || col_counts[c] != j {
                            continue;
                        }
                        if a[r][c] == 0 {
                            continue;
                        }
                        let mc = (i - 1) * (j - 1);
                        if mc == 0 {
                            potential = Some((r, c, 0));
                            break 'rows;
                        }
                        match potential {
                            Some((_, _, best)) if best <= mc => {}
                            _ => potential = Some((r, c, mc)),
                        }
                    }
                }
                if searched_rows >= ZLATEVS {
                    break 'rows;
                }
            }
        }

        let Some((p_r, p_c, _)) = potential else {
            // Rank deficient: everything left is all-zero. Pair the
            // remaining columns with leftover rows so callers still get a
            // complete permutation; the zero diagonals report the
            // deficiency downstream.
            let rest_cols: Vec<usize> = (0..ncol).filter(|&c| col_alive[c]).collect();
            let mut rest_rows = (0..nrow).filter(|&r| row_alive[r]);
            trace!(
                "zlatev pivoting: {} columns reduced to all-zero",
                rest_cols.len()
            );
            for c in rest_cols {
                let r = rest_rows
                    .next()
                    .expect("fewer leftover rows than leftover columns");
                row_pivots.push(r);
                col_pivots.push(c);
            }
            return (row_pivots, col_pivots);
        };

        row_pivots.push(p_r);
        col_pivots.push(p_c);
        pivots_found += 1;

        for c in 0..ncol {
            if col_alive[c] && a[p_r][c] != 0 {
                if c == p_c {
                    col_alive[c] = false;
                } else {
                    col_counts[c] -= 1;
                    col_buckets[col_counts[c]].push(c);
                }
            }
        }
        for r in 0..nrow {
            if row_alive[r] && a[r][p_c] != 0 {
                if r == p_r {
                    row_alive[r] = false;
                } else {
                    row_counts[r] -= 1;
                    row_buckets[row_counts[r]].push(r);
                }
            }
        }
    }

    (row_pivots, col_pivots)
}

/// Re-order `A` and `B` so the i-th pivot lands on coordinate (i, i): pivot
/// rows first (leftover rows keep their relative order below), then columns
/// permuted by the column pivot order.
fn reshape_matrix(
    a: &mut [Vec<u8>],
    b: &mut [Vec<u8>],
    row_order: &[usize],
    col_order: &[usize],
) {
    let nrow = a.len();
    let mut taken = vec![false; nrow];
    let mut new_a: Vec<Vec<u8>> = Vec::with_capacity(nrow);
    let mut new_b: Vec<Vec<u8>> = Vec::with_capacity(nrow);
    for &r in row_order {
        taken[r] = true;
        new_a.push(std::mem::take(&mut a[r]));
        new_b.push(std::mem::take(&mut b[r]));
    }
    for r in 0..nrow {
        if !taken[r] {
            new_a.push(std::mem::take(&mut a[r]));
            new_b.push(std::mem::take(&mut b[r]));
        }
    }

    let mut scratch = vec![0u8; col_order.len()];
    for row in new_a.iter_mut() {
        for (k, &c) in col_order.iter().enumerate() {
            scratch[k] = row[c];
        }
        row[..col_order.len()].copy_from_slice(&scratch);
    }

    for (dst, src) in a.iter_mut().zip(new_a) {
        *dst = src;
    }
    for (dst, src) in b.iter_mut().zip(new_b) {
        *dst = src;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::galois::gf_mul;
    use crate::gaussian::back_substitute;
    use crate::rng::CodingRng;

    fn sparse_system(n: usize, extra: usize, seed: u64) -> (Vec<Vec<u8>>, Vec<Vec<u8>>, Vec<u8>) {
        let mut rng = CodingRng::new(seed);
        let x: Vec<u8> = (0..n).map(|_| rng.gf_element()).collect();
        let nrow = n + extra;
        let mut a = vec![vec![0u8; n]; nrow];
        for row in a.iter_mut() {
            // roughly 4 nonzeros per row
            for _ in 0..4 {
                let c = rng.below(n);
                row[c] = rng.gf_nonzero();
            }
        }
        let b: Vec<Vec<u8>> = a
            .iter()
            .map(|row| {
                let v = row
                    .iter()
                    .zip(x.iter())
                    .fold(0u8, |acc, (&c, &v)| acc ^ gf_mul(c, v));
                vec![v]
            })
            .collect();
        (a, b, x)
    }

    fn finish_and_check(
        n: usize,
        a: &mut [Vec<u8>],
        b: &mut [Vec<u8>],
        otoc: &[usize],
        ias: usize,
        x: &[u8],
    ) {
        let rank = (0..n).filter(|&i| a[i][i] != 0).count();
        if rank < n {
            // Sparse random fixtures can be deficient; the engine must have
            // reported it through zero diagonals without crashing.
            return;
        }
        // Solve the tail then clean the upper rows, as the decoders do.
        let active = n - ias;
        let mut tail_a: Vec<Vec<u8>> = (0..ias)
            .map(|i| a[active + i][active..n].to_vec())
            .collect();
        let mut tail_b: Vec<Vec<u8>> = (0..ias).map(|i| b[active + i].clone()).collect();
        back_substitute(ias, ias, 1, &mut tail_a, &mut tail_b);
        for i in 0..ias {
            b[active + i] = tail_b[i].clone();
            a[active + i][active..n].copy_from_slice(&tail_a[i]);
        }
        for i in 0..active {
            for j in active..n {
                if a[i][j] != 0 {
                    let q = a[i][j];
                    let add = gf_mul(q, b[j][0]);
                    b[i][0] ^= add;
                    a[i][j] = 0;
                }
            }
            if a[i][i] != 1 {
                b[i][0] = crate::galois::gf_div(b[i][0], a[i][i]);
                a[i][i] = 1;
            }
        }
        for orig in 0..n {
            assert_eq!(b[otoc[orig]][0], x[orig], "column {}", orig);
        }
    }

    #[test]
    fn oneround_solves_sparse_system() {
        let n = 48;
        let (mut a, mut b, x) = sparse_system(n, 6, 2);
        let mut otoc = vec![0usize; n];
        let (_ops, ias) = pivot_matrix_oneround(n + 6, n, 1, &mut a, &mut b, &mut otoc);
        assert!(ias < n);
        finish_and_check(n, &mut a, &mut b, &otoc, ias, &x);
    }

    #[test]
    fn tworound_solves_sparse_system() {
        let n = 48;
        let (mut a, mut b, x) = sparse_system(n, 6, 6);
        let mut otoc = vec![0usize; n];
        let (_ops, ias) = pivot_matrix_tworound(n + 6, n, 1, &mut a, &mut b, &mut otoc);
        finish_and_check(n, &mut a, &mut b, &otoc, ias, &x);
    }

    #[test]
    fn rank_deficient_input_reports_without_crash() {
        let n = 16;
        let mut rng = CodingRng::new(5);
        // Only 8 distinct rows duplicated: rank <= 8.
        let base: Vec<Vec<u8>> = (0..8)
            .map(|_| {
                let mut row = vec![0u8; n];
                for _ in 0..3 {
                    row[rng.below(n)] = rng.gf_nonzero();
                }
                row
            })
            .collect();
        let mut a: Vec<Vec<u8>> = (0..n).map(|i| base[i % 8].clone()).collect();
        let mut b: Vec<Vec<u8>> = vec![vec![0u8]; n];
        let mut otoc = vec![0usize; n];
        let (_ops, _ias) = pivot_matrix_tworound(n, n, 1, &mut a, &mut b, &mut otoc);
        let rank = (0..n).filter(|&i| a[i][i] != 0).count();
        assert!(rank < n);
    }

    #[test]
    fn otoc_is_a_permutation() {
        let n = 32;
        let (mut a, mut b, _x) = sparse_system(n, 4, 7);
        let mut otoc = vec![0usize; n];
        pivot_matrix_oneround(n + 4, n, 1, &mut a, &mut b, &mut otoc);
        let mut seen = vec![false; n];
        for &v in &otoc {
            assert!(!seen[v]);
            seen[v] = true;
        }
    }
}
