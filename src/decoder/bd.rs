//! Band (BD) decoder.
//!
//! Applies only to BAND codes, whose coded packets lift to rows with all
//! nonzeros within `size_g` of the diagonal. The decoding matrix is kept
//! upper triangular and banded while packets stream in; once `snum` degrees
//! of freedom are held, the precode's parity rows are planted into the
//! zero-diagonal slots and the whole matrix is pivoted, after which the
//! band property no longer holds and elimination runs full width.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::Decode;
use crate::encoder::EncodeContext;
use crate::error::SncError;
use crate::galois::{gf_div, gf_mul, region_madd};
use crate::gaussian::{back_substitute, rows_pair_mut};
use crate::packet::SncPacket;
use crate::params::{CodeType, Parameters};
use crate::pivoting::pivot_matrix_oneround;

pub struct BdDecoder {
    sc: EncodeContext,
    finished: bool,
    dof: usize,
    /// Whether the parity-check rows have been applied (and the matrix
    /// therefore pivoted and re-ordered).
    de_precode: bool,
    inactivated: usize,
    coefficient: Vec<Vec<u8>>,
    message: Vec<Vec<u8>>,
    otoc: Vec<usize>,
    ctoo: Vec<usize>,
    overhead: usize,
    /// Received packets per subgeneration.
    overheads: Vec<usize>,
    operations: u64,
}

impl BdDecoder {
    pub fn new(params: Parameters) -> Result<Self, SncError> {
        if params.code_type != CodeType::Band {
            return Err(SncError::IncompatibleDecoder {
                kind: "BD",
                code: params.code_type.name(),
            });
        }
        let sc = EncodeContext::new(params, None)?;
        let numpp = sc.numpp();
        let size_p = params.size_p;
        let gnum = sc.gnum();
        Ok(BdDecoder {
            sc,
            finished: false,
            dof: 0,
            de_precode: false,
            inactivated: 0,
            coefficient: vec![vec![0u8; numpp]; numpp],
            message: vec![vec![0u8; size_p]; numpp],
            otoc: (0..numpp).collect(),
            ctoo: (0..numpp).collect(),
            overhead: 0,
            overheads: vec![0; gnum],
            operations: 0,
        })
    }

    fn process_packet(&mut self, mut pkt: SncPacket) {
        self.overhead += 1;
        if self.finished {
            return;
        }
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let bnc = self.sc.parameters().bnc;
        let numpp = self.sc.numpp();

        // Lift to a full-length coefficient vector, through the column
        // permutation when the matrix has already been pivoted.
        let mut ces = vec![0u8; numpp];
        if pkt.is_systematic() {
            let id = pkt.ucid as usize;
            let index = if self.de_precode { self.otoc[id] } else { id };
            ces[index] = 1;
        } else {
            let gid = pkt.gid as usize;
            self.overheads[gid] += 1;
            for i in 0..size_g {
                let orig = self.sc.gene[gid].pktid[i];
                let index = if self.de_precode { self.otoc[orig] } else { orig };
                ces[index] = pkt.coefficient(i, bnc);
            }
        }

        let mut pivot = None;
        for i in 0..numpp {
            if ces[i] == 0 {
                continue;
            }
            if self.coefficient[i][i] != 0 {
                let quotient = gf_div(ces[i], self.coefficient[i][i]);
                self.operations += 1;
                let width = if self.de_precode {
                    numpp - i
                } else {
                    // Rows stay banded until the parity rows come in.
                    size_g.min(numpp - i)
                };
                region_madd(&mut ces[i..i + width], &self.coefficient[i][i..i + width], quotient);
                self.operations += width as u64;
                region_madd(&mut pkt.syms, &self.message[i], quotient);
                self.operations += size_p as u64;
            } else {
                pivot = Some(i);
                break;
            }
        }

        if let Some(pivot) = pivot {
            self.coefficient[pivot].copy_from_slice(&ces);
            self.message[pivot].copy_from_slice(&pkt.syms);
            self.dof += 1;
        }

        if self.dof == self.sc.snum() && !self.de_precode {
            debug!("applying the parity-check matrix at DoF {}", self.dof);
            let allzeros = self.partially_diagonalize();
            trace!("{} all-zero rows before parity augmentation", allzeros);
            let missing = self.apply_parity_check_matrix();
            trace!("{} DoF missing after parity augmentation", missing);
            self.dof = numpp - missing;
            self.de_precode = true;
        }

        if self.dof == numpp {
            self.finish_recovering();
        }
    }

    /// Remove nonzeros above the nonzero diagonal entries. The upper
    /// triangular form is still banded, so only `size_g` rows above each
    /// pivot need attention; columns with a zero diagonal receive the
    /// corresponding correction terms.
    fn partially_diagonalize(&mut self) -> usize {
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let numpp = self.sc.numpp();
        let mut operations = 0u64;
        let mut nonzero_rows = 0usize;
        let mut zeropivots: Vec<usize> = Vec::new();

        for j in (0..numpp).rev() {
            if self.coefficient[j][j] == 0 {
                zeropivots.push(j);
                continue;
            }
            nonzero_rows += 1;
            let start_row = j.saturating_sub(size_g);
            for i in start_row..j {
                if self.coefficient[i][j] == 0 {
                    continue;
                }
                let quotient = gf_div(self.coefficient[i][j], self.coefficient[j][j]);
                operations += 1;
                let (row_j, row_i) = rows_pair_mut(&mut self.coefficient, j, i);
                row_i[j] = 0;
                for &l in &zeropivots {
                    if row_j[l] != 0 {
                        row_i[l] ^= gf_mul(row_j[l], quotient);
                        operations += 1;
                    }
                }
                let (msg_j, msg_i) = rows_pair_mut(&mut self.message, j, i);
                region_madd(msg_i, msg_j, quotient);
                operations += size_p as u64;
            }
        }
        self.operations += operations;
        numpp - nonzero_rows
    }

    /// Plant the precode parity rows into the zero-diagonal slots (their
    /// message side is all zero), then pivot and re-order the matrix.
    fn apply_parity_check_matrix(&mut self) -> usize {
        let size_p = self.sc.parameters().size_p;
        let snum = self.sc.snum();
        let numpp = self.sc.numpp();

        let mut p = 0usize;
        for i in 0..numpp {
            if self.coefficient[i][i] != 0 {
                continue;
            }
            let row = &mut self.coefficient[i];
            row.fill(0);
            if let Some(graph) = self.sc.graph.as_ref() {
                for edge in &graph.l_nbrs_of_r[p] {
                    row[edge.index] ^= edge.ce;
                }
            }
            row[snum + p] = 1;
            self.message[i].fill(0);
            p += 1;
        }
        debug_assert_eq!(p, self.sc.cnum());

        let (ops, inactivated) = pivot_matrix_oneround(
            numpp,
            numpp,
            size_p,
            &mut self.coefficient,
            &mut self.message,
            &mut self.otoc,
        );
        self.operations += ops;
        self.inactivated = inactivated;

        let mut missing = 0usize;
        for i in 0..numpp {
            if self.coefficient[i][i] == 0 {
                missing += 1;
            }
            self.ctoo[self.otoc[i]] = i;
        }
        missing
    }

    fn finish_recovering(&mut self) {
        let size_p = self.sc.parameters().size_p;
        let numpp = self.sc.numpp();
        self.operations += back_substitute(
            numpp,
            numpp,
            size_p,
            &mut self.coefficient,
            &mut self.message,
        );
        for i in 0..numpp {
            self.sc.pp[self.ctoo[i]] = Some(self.message[i].clone());
        }
        self.finished = true;
        debug!("BD decoding finished after {} packets", self.overhead);
    }

    pub(crate) fn snapshot(&self) -> BdSnapshot {
        BdSnapshot {
            finished: self.finished,
            dof: self.dof,
            de_precode: self.de_precode,
            inactivated: self.inactivated,
            coefficient: self.coefficient.clone(),
            message: self.message.clone(),
            otoc: self.otoc.clone(),
            ctoo: self.ctoo.clone(),
            decoded_pp: self
                .sc
                .pp
                .iter()
                .enumerate()
                .filter_map(|(i, r)| r.as_ref().map(|v| (i, v.clone())))
                .collect(),
            overhead: self.overhead,
            overheads: self.overheads.clone(),
            operations: self.operations,
        }
    }

    pub(crate) fn restore(params: Parameters, snap: BdSnapshot) -> Result<Self, SncError> {
        let mut dec = BdDecoder::new(params)?;
        if snap.coefficient.len() != dec.coefficient.len() {
            return Err(SncError::CorruptState(
                "snapshot does not match the code geometry".into(),
            ));
        }
        dec.finished = snap.finished;
        dec.dof = snap.dof;
        dec.de_precode = snap.de_precode;
        dec.inactivated = snap.inactivated;
        dec.coefficient = snap.coefficient;
        dec.message = snap.message;
        dec.otoc = snap.otoc;
        dec.ctoo = snap.ctoo;
        for (id, row) in snap.decoded_pp {
            dec.sc.pp[id] = Some(row);
        }
        dec.overhead = snap.overhead;
        dec.overheads = snap.overheads;
        dec.operations = snap.operations;
        Ok(dec)
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct BdSnapshot {
    finished: bool,
    dof: usize,
    de_precode: bool,
    inactivated: usize,
    coefficient: Vec<Vec<u8>>,
    message: Vec<Vec<u8>>,
    otoc: Vec<usize>,
    ctoo: Vec<usize>,
    decoded_pp: Vec<(usize, Vec<u8>)>,
    overhead: usize,
    overheads: Vec<usize>,
    operations: u64,
}

impl Decode for BdDecoder {
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
