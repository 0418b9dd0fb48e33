//! Compact band (CBD) decoder.
//!
//! Stores each decoding-matrix row as the nonzero tail that starts at its
//! pivot column: `min(size_g, numpp - pivot)` bytes before the precode is
//! applied. The price of compactness is that no pivoting is performed. For
//! codes that are not banded the decoder falls back to a naive mode where
//! rows are stored at full remaining width.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::{Decode, RowVector};
use crate::encoder::EncodeContext;
use crate::error::SncError;
use crate::galois::{gf_div, region_madd, region_mul};
use crate::gaussian::rows_pair_mut;
use crate::packet::SncPacket;
use crate::params::{CodeType, Parameters};

pub struct CbdDecoder {
    sc: EncodeContext,
    finished: bool,
    dof: usize,
    de_precode: bool,
    /// Naive mode: rows at full width, for non-band codes.
    naive: bool,
    row: Vec<Option<RowVector>>,
    message: Vec<Vec<u8>>,
    overhead: usize,
    operations: u64,
}

impl CbdDecoder {
    pub fn new(params: Parameters) -> Result<Self, SncError> {
        let naive = params.code_type != CodeType::Band;
        if naive {
            debug!(
                "CBD decoder on a {} code: falling back to naive row widths",
                params.code_type.name()
            );
        }
        let sc = EncodeContext::new(params, None)?;
        let numpp = sc.numpp();
        let size_p = params.size_p;
        Ok(CbdDecoder {
            sc,
            finished: false,
            dof: 0,
            de_precode: false,
            naive,
            row: (0..numpp).map(|_| None).collect(),
            message: vec![vec![0u8; size_p]; numpp],
            overhead: 0,
            operations: 0,
        })
    }

    fn process_packet(&mut self, mut pkt: SncPacket) {
        self.overhead += 1;
        if self.finished {
            return;
        }
        let size_g = self.sc.parameters().size_g;
        let bnc = self.sc.parameters().bnc;
        let numpp = self.sc.numpp();

        let mut ces = vec![0u8; numpp];
        if pkt.is_systematic() {
            ces[pkt.ucid as usize] = 1;
        } else {
            let gid = pkt.gid as usize;
            for i in 0..size_g {
                ces[self.sc.gene[gid].pktid[i]] = pkt.coefficient(i, bnc);
            }
        }

        let last_dof = self.dof;
        self.process_vector(&mut ces, &mut pkt.syms);
        trace!(
            "packet {} contributed {} DoF",
            self.overhead,
            self.dof - last_dof
        );

        if self.dof == self.sc.snum() && !self.de_precode {
            self.de_precode = true;
            let missing = self.apply_parity_check_matrix();
            trace!("{} DoF missing after parity augmentation", missing);
            self.dof = numpp - missing;
        }

        if self.dof == numpp {
            self.finish_recovering();
        }
    }

    /// Eliminate a full-length vector against the stored rows, keeping the
    /// matrix upper triangular; a surviving leading nonzero becomes a new
    /// compact row.
    fn process_vector(&mut self, vector: &mut [u8], message: &mut [u8]) -> Option<usize> {
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let numpp = self.sc.numpp();

        let mut pivot = None;
        for i in 0..numpp {
            if vector[i] == 0 {
                continue;
            }
            match &self.row[i] {
                Some(row) => {
                    debug_assert!(row.elem[0] != 0);
                    let quotient = gf_div(vector[i], row.elem[0]);
                    let len = row.elem.len();
                    region_madd(&mut vector[i..i + len], &row.elem, quotient);
                    region_madd(message, &self.message[i], quotient);
                    self.operations += 1 + len as u64 + size_p as u64;
                }
                None => {
                    pivot = Some(i);
                    break;
                }
            }
        }

        if let Some(pivot) = pivot {
            let len = if !self.de_precode && !self.naive {
                // Before the precode every row fits within the band.
                size_g.min(numpp - pivot)
            } else {
                numpp - pivot
            };
            self.row[pivot] = Some(RowVector {
                elem: vector[pivot..pivot + len].to_vec(),
            });
            self.message[pivot].copy_from_slice(message);
            self.dof += 1;
        }
        pivot
    }

    /// Feed each precode parity row (zero message) through the same vector
    /// path as received packets.
    fn apply_parity_check_matrix(&mut self) -> usize {
        let size_p = self.sc.parameters().size_p;
        let snum = self.sc.snum();
        let numpp = self.sc.numpp();

        let mut ces = vec![0u8; numpp];
        let mut msg = vec![0u8; size_p];
        for p in 0..self.sc.cnum() {
            ces.fill(0);
            msg.fill(0);
            if let Some(graph) = self.sc.graph.as_ref() {
                for edge in &graph.l_nbrs_of_r[p] {
                    ces[edge.index] ^= edge.ce;
                }
            }
            ces[snum + p] = 1;
            self.process_vector(&mut ces, &mut msg);
        }

        (0..numpp).filter(|&i| self.row[i].is_none()).count()
    }

    /// Sweep right to left to diagonalize, rescale, and publish.
    fn finish_recovering(&mut self) {
        let size_p = self.sc.parameters().size_p;
        let numpp = self.sc.numpp();
        for i in (0..numpp).rev() {
            let diagonal = self.row[i].as_ref().expect("full rank").elem[0];
            debug_assert!(diagonal != 0);
            for j in 0..i {
                let elem = {
                    let row_j = self.row[j].as_ref().expect("full rank");
                    if j + row_j.elem.len() <= i {
                        continue;
                    }
                    row_j.elem[i - j]
                };
                if elem == 0 {
                    continue;
                }
                let quotient = gf_div(elem, diagonal);
                let (msg_i, msg_j) = rows_pair_mut(&mut self.message, i, j);
                region_madd(msg_j, msg_i, quotient);
                self.operations += size_p as u64 + 1;
                self.row[j].as_mut().unwrap().elem[i - j] = 0;
            }
            if diagonal != 1 {
                region_mul(&mut self.message[i], gf_div(1, diagonal));
                self.operations += size_p as u64 + 1;
                self.row[i].as_mut().unwrap().elem[0] = 1;
            }
            self.sc.pp[i] = Some(self.message[i].clone());
        }
        self.finished = true;
        debug!("CBD decoding finished after {} packets", self.overhead);
    }

    pub(crate) fn snapshot(&self) -> CbdSnapshot {
        CbdSnapshot {
            finished: self.finished,
            dof: self.dof,
            de_precode: self.de_precode,
            naive: self.naive,
            rows: self
                .row
                .iter()
                .zip(self.message.iter())
                .map(|(r, m)| r.as_ref().map(|r| (r.elem.clone(), m.clone())))
                .collect(),
            overhead: self.overhead,
            operations: self.operations,
        }
    }

    pub(crate) fn restore(params: Parameters, snap: CbdSnapshot) -> Result<Self, SncError> {
        let mut dec = CbdDecoder::new(params)?;
        if snap.rows.len() != dec.row.len() {
            return Err(SncError::CorruptState(
                "snapshot does not match the code geometry".into(),
            ));
        }
        dec.finished = snap.finished;
        dec.dof = snap.dof;
        dec.de_precode = snap.de_precode;
        dec.naive = snap.naive;
        for (i, entry) in snap.rows.into_iter().enumerate() {
            if let Some((elem, message)) = entry {
                dec.row[i] = Some(RowVector { elem });
                dec.message[i] = message;
            }
        }
        if dec.finished {
            for i in 0..dec.sc.numpp() {
                dec.sc.pp[i] = Some(dec.message[i].clone());
            }
        }
        dec.overhead = snap.overhead;
        dec.operations = snap.operations;
        Ok(dec)
    }
}

/// Sparse rows persist `Option`-tagged: an absent row is `None`.
#[derive(Serialize, Deserialize)]
pub(crate) struct CbdSnapshot {
    finished: bool,
    dof: usize,
    de_precode: bool,
    naive: bool,
    rows: Vec<Option<(Vec<u8>, Vec<u8>)>>,
    overhead: usize,
    operations: u64,
}

impl Decode for CbdDecoder {
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
