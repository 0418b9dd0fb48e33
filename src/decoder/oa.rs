//! Overlap-aware (OA) decoder.
//!
//! Packets are first eliminated inside their own subgeneration. Once the
//! local degrees of freedom reach `snum` and enough overhead has been
//! collected, the local matrices are converted to row echelon form, lifted
//! into a global matrix together with the precode rows, and pivoted with
//! the inactivation engine. From then on packets are eliminated against the
//! global upper triangular directly.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::Decode;
use crate::encoder::EncodeContext;
use crate::error::SncError;
use crate::galois::{gf_div, gf_mul, region_madd, region_mul};
use crate::gaussian::{back_substitute, rows_pair_mut};
use crate::packet::SncPacket;
use crate::params::Parameters;
use crate::pivoting::{pivot_matrix_oneround, pivot_matrix_tworound};

struct LocalMatrix {
    coefficient: Vec<Vec<u8>>,
    message: Vec<Vec<u8>>,
}

pub struct OaDecoder {
    sc: EncodeContext,
    /// Allowed overhead: extra packets beyond `snum` collected before the
    /// global phase starts, to improve the odds of a full-rank matrix.
    aoh: usize,
    finished: bool,
    oa_ready: bool,
    local_dof: usize,
    global_dof: usize,
    /// Per-subgeneration matrices; dropped once the global matrix exists.
    matrices: Option<Vec<LocalMatrix>>,
    gdm_coefficient: Vec<Vec<u8>>,
    gdm_message: Vec<Vec<u8>>,
    /// Original-to-current and current-to-original column mappings of the
    /// pivoted global matrix.
    otoc: Vec<usize>,
    ctoo: Vec<usize>,
    inactives: usize,
    overhead: usize,
    operations: u64,
}

impl OaDecoder {
    pub fn new(params: Parameters, aoh: usize) -> Result<Self, SncError> {
        let sc = EncodeContext::new(params, None)?;
        let size_g = params.size_g;
        let size_p = params.size_p;
        let matrices = (0..sc.gnum())
            .map(|_| LocalMatrix {
                coefficient: vec![vec![0u8; size_g]; size_g],
                message: vec![vec![0u8; size_p]; size_g],
            })
            .collect();
        Ok(OaDecoder {
            sc,
            aoh,
            finished: false,
            oa_ready: false,
            local_dof: 0,
            global_dof: 0,
            matrices: Some(matrices),
            gdm_coefficient: Vec::new(),
            gdm_message: Vec::new(),
            otoc: Vec::new(),
            ctoo: Vec::new(),
            inactives: 0,
            overhead: 0,
            operations: 0,
        })
    }

    pub fn allowed_overhead(&self) -> usize {
        self.aoh
    }

    fn process_packet(&mut self, mut pkt: SncPacket) {
        self.overhead += 1;
        if self.finished {
            return;
        }
        if !self.oa_ready {
            self.process_local(&mut pkt);
            let snum = self.sc.snum();
            if self.local_dof >= snum && self.overhead >= snum + self.aoh {
                self.oa_ready = true;
                debug!(
                    "OA ready after {} packets ({} local DoF)",
                    self.overhead, self.local_dof
                );
                self.operations += self.running_matrices_to_ref();
                self.construct_gdm();
                if self.global_dof == self.sc.numpp() {
                    self.diagonalize_gdm();
                }
            }
        } else {
            self.process_global(&mut pkt);
        }
    }

    /// Eliminate a packet against its own subgeneration's local matrix.
    fn process_local(&mut self, pkt: &mut SncPacket) {
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let bnc = self.sc.parameters().bnc;

        let (gid, mut pkt_coes) = if pkt.is_systematic() {
            let id = pkt.ucid as usize;
            let gid = self
                .sc
                .generation_of(id)
                .expect("every packet index is covered by some subgeneration");
            let mut coes = vec![0u8; size_g];
            let pos = self.sc.gene[gid].position_of(id).unwrap();
            coes[pos] = 1;
            (gid, coes)
        } else {
            let gid = pkt.gid as usize;
            let coes = (0..size_g).map(|i| pkt.coefficient(i, bnc)).collect();
            (gid, coes)
        };

        let matrix = &mut self.matrices.as_mut().expect("local phase")[gid];
        let mut pivot = None;
        for i in 0..size_g {
            if pkt_coes[i] == 0 {
                continue;
            }
            if matrix.coefficient[i][i] != 0 {
                let quotient = gf_div(pkt_coes[i], matrix.coefficient[i][i]);
                region_madd(&mut pkt_coes[i..], &matrix.coefficient[i][i..], quotient);
                region_madd(&mut pkt.syms, &matrix.message[i], quotient);
                self.operations += 1 + (size_g - i) as u64 + size_p as u64;
            } else {
                pivot = Some(i);
                break;
            }
        }
        if let Some(pivot) = pivot {
            matrix.coefficient[pivot].copy_from_slice(&pkt_coes);
            matrix.message[pivot].copy_from_slice(&pkt.syms);
            self.local_dof += 1;
        }
    }

    /// Eliminate a packet against the pivoted global matrix.
    fn process_global(&mut self, pkt: &mut SncPacket) {
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let bnc = self.sc.parameters().bnc;
        let numpp = self.sc.numpp();

        // Translate to global coordinates under the pivot permutation.
        let mut re_ordered = vec![0u8; numpp];
        if pkt.is_systematic() {
            re_ordered[self.otoc[pkt.ucid as usize]] = 1;
        } else {
            let gid = pkt.gid as usize;
            for i in 0..size_g {
                let curr = self.otoc[self.sc.gene[gid].pktid[i]];
                re_ordered[curr] = pkt.coefficient(i, bnc);
            }
        }

        let mut pivot = None;
        for m in 0..numpp {
            if re_ordered[m] == 0 {
                continue;
            }
            if self.gdm_coefficient[m][m] != 0 {
                let quotient = gf_div(re_ordered[m], self.gdm_coefficient[m][m]);
                self.operations += 1;
                let active = numpp - self.inactives;
                if m < active {
                    // Rows of the active block only fill into the inactive
                    // tail, so the multiply-add can skip the middle.
                    region_madd(
                        &mut re_ordered[active..],
                        &self.gdm_coefficient[m][active..],
                        quotient,
                    );
                    re_ordered[m] = 0;
                    self.operations += self.inactives as u64;
                } else {
                    region_madd(
                        &mut re_ordered[m..],
                        &self.gdm_coefficient[m][m..],
                        quotient,
                    );
                    self.operations += (numpp - m) as u64;
                }
                region_madd(&mut pkt.syms, &self.gdm_message[m], quotient);
                self.operations += size_p as u64;
            } else {
                pivot = Some(m);
                break;
            }
        }

        if let Some(pivot) = pivot {
            self.gdm_coefficient[pivot].copy_from_slice(&re_ordered);
            self.gdm_message[pivot].copy_from_slice(&pkt.syms);
            self.global_dof += 1;
            if self.global_dof == numpp {
                self.diagonalize_gdm();
            }
        }
    }

    /// Convert every local matrix to row echelon form: above each nonzero
    /// diagonal everything is eliminated, with corrections applied at the
    /// positions of zero-diagonal columns.
    fn running_matrices_to_ref(&mut self) -> u64 {
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let mut operations = 0u64;
        for matrix in self.matrices.as_mut().expect("local phase").iter_mut() {
            let diag: Vec<u8> = (0..size_g).map(|m| matrix.coefficient[m][m]).collect();
            for k in (0..size_g).rev() {
                if diag[k] == 0 {
                    continue;
                }
                for l in 0..k {
                    let alk = matrix.coefficient[l][k];
                    if alk == 0 {
                        continue;
                    }
                    let quotient = gf_div(alk, diag[k]);
                    operations += 1;
                    let (row_k, row_l) = rows_pair_mut(&mut matrix.coefficient, k, l);
                    row_l[k] = 0;
                    for m in (k + 1)..size_g {
                        if diag[m] == 0 {
                            row_l[m] ^= gf_mul(row_k[m], quotient);
                            operations += 1;
                        }
                    }
                    let (msg_k, msg_l) = rows_pair_mut(&mut matrix.message, k, l);
                    region_madd(msg_l, msg_k, quotient);
                    operations += size_p as u64;
                }
            }
        }
        operations
    }

    /// Assemble the global matrix: precode rows at the bottom, every local
    /// pivot row lifted to global coordinates, then inactivation pivoting.
    fn construct_gdm(&mut self) {
        let snum = self.sc.snum();
        let cnum = self.sc.cnum();
        let numpp = self.sc.numpp();
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;

        self.gdm_coefficient = vec![vec![0u8; numpp]; numpp + self.aoh];
        self.gdm_message = vec![vec![0u8; size_p]; numpp + self.aoh];
        self.otoc = (0..numpp).collect();
        self.ctoo = (0..numpp).collect();

        if let Some(graph) = self.sc.graph.as_ref() {
            for i in 0..cnum {
                let row = &mut self.gdm_coefficient[snum + self.aoh + i];
                row[snum + i] = 1;
                for edge in &graph.l_nbrs_of_r[i] {
                    row[edge.index] ^= edge.ce;
                }
            }
        }

        let matrices = self.matrices.take().expect("local phase");
        let mut p_copy = 0usize;
        let mut global_ces = vec![0u8; numpp];
        for (gid, matrix) in matrices.iter().enumerate() {
            for j in 0..size_g {
                if matrix.coefficient[j][j] == 0 {
                    continue; // no local degree of freedom here
                }
                global_ces.fill(0);
                for k in 0..size_g {
                    global_ces[self.sc.gene[gid].pktid[k]] = matrix.coefficient[j][k];
                }
                debug_assert!(p_copy < snum + self.aoh);
                self.gdm_coefficient[p_copy].copy_from_slice(&global_ces);
                self.gdm_message[p_copy].copy_from_slice(&matrix.message[j]);
                p_copy += 1;
            }
        }
        trace!("{} local DoF lifted into the global matrix", p_copy);
        drop(matrices);

        let (ops, inactives) = if self.sc.parameters().oa_oneround {
            pivot_matrix_oneround(
                numpp + self.aoh,
                numpp,
                size_p,
                &mut self.gdm_coefficient,
                &mut self.gdm_message,
                &mut self.otoc,
            )
        } else {
            pivot_matrix_tworound(
                numpp + self.aoh,
                numpp,
                size_p,
                &mut self.gdm_coefficient,
                &mut self.gdm_message,
                &mut self.otoc,
            )
        };
        self.operations += ops;
        self.inactives = inactives;

        for i in 0..numpp {
            if self.gdm_coefficient[i][i] != 0 {
                self.global_dof += 1;
            }
            self.ctoo[self.otoc[i]] = i;
        }
        debug!(
            "global matrix pivoted: {} DoF, {} inactive columns",
            self.global_dof, self.inactives
        );
    }

    /// Finish: back-substitute the inactive tail, clean the inactive
    /// columns of the upper rows, rescale and publish everything.
    fn diagonalize_gdm(&mut self) {
        let numpp = self.sc.numpp();
        let size_p = self.sc.parameters().size_p;
        let ias = self.inactives;
        let active = numpp - ias;

        if ias > 0 {
            let mut sub_a: Vec<Vec<u8>> = (0..ias)
                .map(|i| self.gdm_coefficient[active + i][active..].to_vec())
                .collect();
            let mut sub_b: Vec<Vec<u8>> = (0..ias)
                .map(|i| std::mem::take(&mut self.gdm_message[active + i]))
                .collect();
            self.operations += back_substitute(ias, ias, size_p, &mut sub_a, &mut sub_b);
            for i in 0..ias {
                let pktid = self.ctoo[active + i];
                self.sc.pp[pktid] = Some(sub_b[i].clone());
                self.gdm_message[active + i] = std::mem::take(&mut sub_b[i]);
                self.gdm_coefficient[active + i][active..].copy_from_slice(&sub_a[i]);
            }
        }

        for i in 0..active {
            for j in active..numpp {
                let quotient = self.gdm_coefficient[i][j];
                if quotient == 0 {
                    continue;
                }
                let pktid = self.ctoo[j];
                region_madd(
                    &mut self.gdm_message[i],
                    self.sc.pp[pktid].as_ref().expect("inactive packet decoded"),
                    quotient,
                );
                self.gdm_coefficient[i][j] = 0;
                self.operations += size_p as u64;
            }
            let diagonal = self.gdm_coefficient[i][i];
            if diagonal != 1 {
                region_mul(&mut self.gdm_message[i], gf_div(1, diagonal));
                self.operations += size_p as u64;
                self.gdm_coefficient[i][i] = 1;
            }
            let pktid = self.ctoo[i];
            self.sc.pp[pktid] = Some(self.gdm_message[i].clone());
        }
        self.finished = true;
        debug!("OA decoding finished after {} packets", self.overhead);
    }

    pub(crate) fn snapshot(&self) -> OaSnapshot {
        OaSnapshot {
            aoh: self.aoh,
            finished: self.finished,
            oa_ready: self.oa_ready,
            local_dof: self.local_dof,
            global_dof: self.global_dof,
            matrices: self.matrices.as_ref().map(|ms| {
                ms.iter()
                    .map(|m| (m.coefficient.clone(), m.message.clone()))
                    .collect()
            }),
            gdm: if self.oa_ready {
                Some(GdmSnapshot {
                    coefficient: self.gdm_coefficient.clone(),
                    message: self.gdm_message.clone(),
                    otoc: self.otoc.clone(),
                    ctoo: self.ctoo.clone(),
                    inactives: self.inactives,
                })
            } else {
                None
            },
            decoded_pp: self
                .sc
                .pp
                .iter()
                .enumerate()
                .filter_map(|(i, r)| r.as_ref().map(|v| (i, v.clone())))
                .collect(),
            overhead: self.overhead,
            operations: self.operations,
        }
    }

    pub(crate) fn restore(params: Parameters, snap: OaSnapshot) -> Result<Self, SncError> {
        let mut dec = OaDecoder::new(params, snap.aoh)?;
        dec.finished = snap.finished;
        dec.oa_ready = snap.oa_ready;
        dec.local_dof = snap.local_dof;
        dec.global_dof = snap.global_dof;
        match snap.matrices {
            Some(ms) => {
                let matrices = dec.matrices.as_mut().expect("fresh decoder");
                if ms.len() != matrices.len() {
                    return Err(SncError::CorruptState(
                        "snapshot does not match the code geometry".into(),
                    ));
                }
                for (matrix, (coefficient, message)) in matrices.iter_mut().zip(ms) {
                    matrix.coefficient = coefficient;
                    matrix.message = message;
                }
            }
            None => dec.matrices = None,
        }
        if let Some(gdm) = snap.gdm {
            dec.gdm_coefficient = gdm.coefficient;
            dec.gdm_message = gdm.message;
            dec.otoc = gdm.otoc;
            dec.ctoo = gdm.ctoo;
            dec.inactives = gdm.inactives;
        }
        for (id, row) in snap.decoded_pp {
            dec.sc.pp[id] = Some(row);
        }
        dec.overhead = snap.overhead;
        dec.operations = snap.operations;
        Ok(dec)
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct GdmSnapshot {
    coefficient: Vec<Vec<u8>>,
    message: Vec<Vec<u8>>,
    otoc: Vec<usize>,
    ctoo: Vec<usize>,
    inactives: usize,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct OaSnapshot {
    aoh: usize,
    finished: bool,
    oa_ready: bool,
    local_dof: usize,
    global_dof: usize,
    matrices: Option<Vec<(Vec<Vec<u8>>, Vec<Vec<u8>>)>>,
    gdm: Option<GdmSnapshot>,
    decoded_pp: Vec<(usize, Vec<u8>)>,
    overhead: usize,
    operations: u64,
}

impl Decode for OaDecoder {
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
