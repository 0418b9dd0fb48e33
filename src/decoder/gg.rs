//! Generation-by-generation (GG) decoder.
//!
//! Each subgeneration keeps a running matrix that is solved locally as soon
//! as it has enough rows. Freshly decoded packets feed two propagation
//! loops: iterative LDPC peeling over the precode graph, and substitution
//! into every other subgeneration that spans them, which in turn can make
//! further subgenerations decodable.

use log::trace;
use serde::{Deserialize, Serialize};

use super::Decode;
use crate::encoder::EncodeContext;
use crate::error::SncError;
use crate::galois::{gf_div, region_madd};
use crate::gaussian::{back_substitute, forward_substitute};
use crate::packet::SncPacket;
use crate::params::Parameters;

/// Per-subgeneration elimination state.
struct RunningMatrix {
    /// Linearly independent rows currently held.
    remaining_rows: usize,
    /// Source packets of this subgeneration still unknown.
    remaining_cols: usize,
    /// Columns already solved by substitution from elsewhere.
    erased: Vec<bool>,
    coefficient: Vec<Vec<u8>>,
    message: Vec<Vec<u8>>,
}

impl RunningMatrix {
    fn new(size_g: usize, size_p: usize) -> Self {
        RunningMatrix {
            remaining_rows: 0,
            remaining_cols: size_g,
            erased: vec![false; size_g],
            coefficient: vec![vec![0u8; size_g]; size_g],
            message: vec![vec![0u8; size_p]; size_g],
        }
    }
}

pub struct GgDecoder {
    sc: EncodeContext,
    /// Partial sums of check packets as their source neighbours decode.
    evolving_checks: Vec<Option<Vec<u8>>>,
    /// Remaining unknown neighbours per check, counted with multiplicity.
    /// Goes negative once a check's last neighbour was recovered through
    /// the check itself.
    check_degrees: Vec<i32>,
    finished: bool,
    decoded: usize,
    originals: usize,
    matrices: Vec<RunningMatrix>,
    /// Recently decoded packet ids pending propagation.
    recent: Vec<usize>,
    overhead: usize,
    operations: u64,
}

impl GgDecoder {
    pub fn new(params: Parameters) -> Result<Self, SncError> {
        let sc = EncodeContext::new(params, None)?;
        let size_g = params.size_g;
        let size_p = params.size_p;
        let cnum = sc.cnum();
        let check_degrees = (0..cnum)
            .map(|i| sc.graph.as_ref().map_or(0, |g| g.check_degree(i)) as i32)
            .collect();
        let matrices = (0..sc.gnum())
            .map(|_| RunningMatrix::new(size_g, size_p))
            .collect();
        Ok(GgDecoder {
            sc,
            evolving_checks: vec![None; cnum],
            check_degrees,
            finished: false,
            decoded: 0,
            originals: 0,
            matrices,
            recent: Vec::new(),
            overhead: 0,
            operations: 0,
        })
    }

    fn process_packet(&mut self, mut pkt: SncPacket) {
        self.overhead += 1;
        if self.finished {
            return;
        }

        if pkt.is_systematic() {
            let id = pkt.ucid as usize;
            if self.sc.pp[id].is_none() {
                self.sc.pp[id] = Some(std::mem::take(&mut pkt.syms));
                self.recent.push(id);
                self.perform_iterative_decoding();
            }
            return;
        }

        let gid = pkt.gid as usize;
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let bnc = self.sc.parameters().bnc;

        let r_rows = self.matrices[gid].remaining_rows;
        let r_cols = self.matrices[gid].remaining_cols;
        if r_cols == 0 {
            return; // this subgeneration is already solved
        }

        // Mask out already-solved columns, append the rest as a new row.
        let mut col = 0usize;
        for j in 0..size_g {
            let coe = pkt.coefficient(j, bnc);
            if self.matrices[gid].erased[j] {
                let src_id = self.sc.gene[gid].pktid[j];
                let src = self.sc.pp[src_id]
                    .as_ref()
                    .expect("erased column implies a decoded packet");
                region_madd(&mut pkt.syms, src, coe);
                self.operations += size_p as u64;
            } else {
                self.matrices[gid].coefficient[r_rows][col] = coe;
                col += 1;
            }
        }
        self.matrices[gid].message[r_rows].copy_from_slice(&pkt.syms);
        self.matrices[gid].remaining_rows += 1;

        if r_rows + 1 >= r_cols {
            let matrix = &mut self.matrices[gid];
            self.operations += forward_substitute(
                r_rows + 1,
                r_cols,
                size_p,
                &mut matrix.coefficient,
                &mut matrix.message,
            );
            let innovative = (0..r_cols)
                .filter(|&j| matrix.coefficient[j][j] != 0)
                .count();
            if innovative != r_cols {
                matrix.remaining_rows = innovative;
            } else {
                matrix.remaining_rows = r_cols;
                self.decode_generation(gid);
                self.perform_iterative_decoding();
            }
        }
    }

    /// Back-substitute a full-rank subgeneration and publish its packets.
    fn decode_generation(&mut self, gid: usize) {
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let matrix = &mut self.matrices[gid];
        let r_rows = matrix.remaining_rows;
        let r_cols = matrix.remaining_cols;
        trace!("decoding subgeneration {} ({} x {})", gid, r_rows, r_cols);

        self.operations += back_substitute(
            r_rows,
            r_cols,
            size_p,
            &mut matrix.coefficient,
            &mut matrix.message,
        );

        for i in 0..r_rows {
            // The i-th solved row belongs to the i-th still-unsolved column.
            for j in 0..size_g {
                if matrix.erased[j] {
                    continue;
                }
                matrix.erased[j] = true;
                let src_id = self.sc.gene[gid].pktid[j];
                if self.sc.pp[src_id].is_none() {
                    self.sc.pp[src_id] = Some(matrix.message[i].clone());
                    self.recent.push(src_id);
                }
                break;
            }
        }
        matrix.remaining_rows = 0;
        matrix.remaining_cols = 0;
    }

    /// Alternate LDPC peeling and cross-generation substitution until no
    /// further subgeneration becomes decodable.
    fn perform_iterative_decoding(&mut self) {
        loop {
            let mut idx = 0;
            while idx < self.recent.len() {
                let id = self.recent[idx];
                if id >= self.sc.snum() {
                    self.new_decoded_check_packet(id);
                } else {
                    self.new_decoded_source_packet(id);
                }
                self.check_for_new_recoverables();
                idx += 1;
            }
            self.update_generations();
            match self.check_for_new_decodables() {
                Some(gid) => self.decode_generation(gid),
                None => break,
            }
        }
    }

    /// A source packet decoded: fold it into the evolving buffers of its
    /// check neighbours and lower their degrees.
    fn new_decoded_source_packet(&mut self, pkt_id: usize) {
        self.decoded += 1;
        self.originals += 1;
        if self.originals == self.sc.snum() {
            self.finished = true;
        }
        let Some(graph) = self.sc.graph.as_ref() else {
            return;
        };
        let size_p = self.sc.parameters().size_p;
        for edge in &graph.r_nbrs_of_l[pkt_id] {
            let check_id = edge.index;
            let evolving = self.evolving_checks[check_id].get_or_insert_with(|| vec![0u8; size_p]);
            let src = self.sc.pp[pkt_id].as_ref().expect("decoded packet present");
            region_madd(evolving, src, edge.ce);
            self.operations += size_p as u64;
            self.check_degrees[check_id] -= 1;
        }
    }

    /// A check packet decoded from a subgeneration: seed or mask its
    /// evolving buffer.
    fn new_decoded_check_packet(&mut self, pkt_id: usize) {
        self.decoded += 1;
        let check_id = pkt_id - self.sc.snum();
        let size_p = self.sc.parameters().size_p;
        let content = self.sc.pp[pkt_id].as_ref().expect("decoded packet present");
        match &mut self.evolving_checks[check_id] {
            slot @ None => {
                // No source neighbour decoded yet; keep a copy to evolve.
                *slot = Some(content.clone());
            }
            Some(evolving) => {
                region_madd(evolving, content, 1);
                self.operations += size_p as u64;
            }
        }
    }

    /// Peel the precode: a known check with degree 1 recovers its last
    /// unknown neighbour; a check whose degree reached 0 is itself known.
    fn check_for_new_recoverables(&mut self) {
        let Some(graph) = self.sc.graph.as_ref() else {
            return;
        };
        let snum = self.sc.snum();
        let size_p = self.sc.parameters().size_p;
        for i in 0..self.sc.cnum() {
            if self.check_degrees[i] == 1
                && self.sc.pp[i + snum].is_some()
                && !self.recent.contains(&(i + snum))
            {
                let unknown = graph.l_nbrs_of_r[i]
                    .iter()
                    .find(|e| self.sc.pp[e.index].is_none());
                let Some(edge) = unknown else {
                    self.check_degrees[i] = 0;
                    continue;
                };
                let evolving = self.evolving_checks[i]
                    .as_ref()
                    .expect("known check has an evolving buffer");
                let mut row = vec![0u8; size_p];
                if edge.ce == 1 {
                    row.copy_from_slice(evolving);
                } else {
                    region_madd(&mut row, evolving, gf_div(1, edge.ce));
                    self.operations += size_p as u64 + 1;
                }
                trace!("source {} recovered from check {}", edge.index, i + snum);
                self.sc.pp[edge.index] = Some(row);
                self.recent.push(edge.index);
                self.check_degrees[i] = 0;
            }
            if self.sc.pp[i + snum].is_none() && self.check_degrees[i] == 0 {
                // All neighbours known: the check equals its evolving sum.
                let row = self.evolving_checks[i]
                    .clone()
                    .unwrap_or_else(|| vec![0u8; size_p]);
                self.sc.pp[i + snum] = Some(row);
                self.recent.push(i + snum);
            }
        }
    }

    /// Substitute every recently decoded packet into the other
    /// subgenerations that span it, then drain the worklist.
    fn update_generations(&mut self) {
        let size_p = self.sc.parameters().size_p;
        for idx in 0..self.recent.len() {
            let src_id = self.recent[idx];
            for gid in 0..self.sc.gnum() {
                if self.matrices[gid].remaining_cols == 0 {
                    continue;
                }
                let Some(position) = self.sc.gene[gid].position_of(src_id) else {
                    continue;
                };
                if self.matrices[gid].erased[position] {
                    continue;
                }
                let src = self.sc.pp[src_id].as_ref().expect("decoded packet present");
                self.operations +=
                    update_running_matrix(&mut self.matrices[gid], src, position, size_p);
            }
        }
        self.recent.clear();
    }

    fn check_for_new_decodables(&mut self) -> Option<usize> {
        let size_p = self.sc.parameters().size_p;
        for gid in 0..self.sc.gnum() {
            let matrix = &mut self.matrices[gid];
            if matrix.remaining_cols == 0 || matrix.remaining_rows < matrix.remaining_cols {
                continue;
            }
            let r_rows = matrix.remaining_rows;
            let r_cols = matrix.remaining_cols;
            self.operations += forward_substitute(
                r_rows,
                r_cols,
                size_p,
                &mut matrix.coefficient,
                &mut matrix.message,
            );
            let innovative = (0..r_cols)
                .filter(|&j| matrix.coefficient[j][j] != 0)
                .count();
            if innovative == r_cols {
                matrix.remaining_rows = r_cols;
                trace!("subgeneration {} became decodable by substitution", gid);
                return Some(gid);
            }
            matrix.remaining_rows = innovative;
        }
        None
    }

    pub(crate) fn snapshot(&self) -> GgSnapshot {
        GgSnapshot {
            decoded_pp: collect_rows(&self.sc.pp),
            evolving: collect_rows(&self.evolving_checks),
            check_degrees: self.check_degrees.clone(),
            finished: self.finished,
            decoded: self.decoded,
            originals: self.originals,
            matrices: self
                .matrices
                .iter()
                .map(|m| MatrixSnapshot {
                    remaining_rows: m.remaining_rows,
                    remaining_cols: m.remaining_cols,
                    erased: m.erased.clone(),
                    rows: (0..m.remaining_rows)
                        .map(|j| (m.coefficient[j].clone(), m.message[j].clone()))
                        .collect(),
                })
                .collect(),
            recent: self.recent.clone(),
            overhead: self.overhead,
            operations: self.operations,
        }
    }

    pub(crate) fn restore(params: Parameters, snap: GgSnapshot) -> Result<Self, SncError> {
        let mut dec = GgDecoder::new(params)?;
        if snap.matrices.len() != dec.matrices.len()
            || snap.check_degrees.len() != dec.check_degrees.len()
        {
            return Err(SncError::CorruptState(
                "snapshot does not match the code geometry".into(),
            ));
        }
        for (id, row) in snap.decoded_pp {
            dec.sc.pp[id] = Some(row);
        }
        for (id, row) in snap.evolving {
            dec.evolving_checks[id] = Some(row);
        }
        dec.check_degrees = snap.check_degrees;
        dec.finished = snap.finished;
        dec.decoded = snap.decoded;
        dec.originals = snap.originals;
        for (matrix, msnap) in dec.matrices.iter_mut().zip(snap.matrices) {
            matrix.remaining_rows = msnap.remaining_rows;
            matrix.remaining_cols = msnap.remaining_cols;
            matrix.erased = msnap.erased;
            for (j, (coefficient, message)) in msnap.rows.into_iter().enumerate() {
                matrix.coefficient[j] = coefficient;
                matrix.message[j] = message;
            }
        }
        dec.recent = snap.recent;
        dec.overhead = snap.overhead;
        dec.operations = snap.operations;
        Ok(dec)
    }
}

fn collect_rows(rows: &[Option<Vec<u8>>]) -> Vec<(usize, Vec<u8>)> {
    rows.iter()
        .enumerate()
        .filter_map(|(i, r)| r.as_ref().map(|v| (i, v.clone())))
        .collect()
}

/// Erase one column of a running matrix for a packet decoded elsewhere:
/// rotate it to the rightmost position, fold its contribution into the
/// message side, shrink the column count.
fn update_running_matrix(
    matrix: &mut RunningMatrix,
    src: &[u8],
    position: usize,
    size_p: usize,
) -> u64 {
    let r_rows = matrix.remaining_rows;
    let r_cols = matrix.remaining_cols;
    let mut operations = 0u64;

    let count = (0..position).filter(|&i| !matrix.erased[i]).count();
    for j in (count + 1)..r_cols {
        for row in matrix.coefficient.iter_mut().take(r_rows) {
            row.swap(j - 1, j);
        }
    }
    for i in 0..r_rows {
        let ce = matrix.coefficient[i][r_cols - 1];
        if ce == 0 {
            continue;
        }
        region_madd(&mut matrix.message[i], src, ce);
        operations += size_p as u64;
    }
    matrix.erased[position] = true;
    matrix.remaining_cols -= 1;
    operations
}

#[derive(Serialize, Deserialize)]
pub(crate) struct MatrixSnapshot {
    remaining_rows: usize,
    remaining_cols: usize,
    erased: Vec<bool>,
    rows: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct GgSnapshot {
    decoded_pp: Vec<(usize, Vec<u8>)>,
    evolving: Vec<(usize, Vec<u8>)>,
    check_degrees: Vec<i32>,
    finished: bool,
    decoded: usize,
    originals: usize,
    matrices: Vec<MatrixSnapshot>,
    recent: Vec<usize>,
    overhead: usize,
    operations: u64,
}

impl Decode for GgDecoder {
    fn process(&mut self, pkt: SncPacket) {
        self.process_packet(pkt);
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn overhead(&self) -> usize {
        self.overhead
    }

    fn cost(&self) -> u64 {
        self.operations
    }

    fn context(&self) -> &EncodeContext {
        &self.sc
    }
}
