//! Perpetual (PP) decoder.
//!
//! Applies to WINDWRAP codes without a precode, whose coded packets form a
//! band that wraps around the end of the packet array. Decoding runs in
//! three stages: a forward stage that files each packet under its leading
//! nonzero position modulo `numpp` with rows kept at their bandwidth, a
//! final-forward stage that lifts the bottom wrap-around rows to full
//! length and re-integrates them, and a final backward substitution.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::{Decode, RowVector};
use crate::encoder::EncodeContext;
use crate::error::SncError;
use crate::galois::{gf_div, region_madd, region_mul};
use crate::gaussian::rows_pair_mut;
use crate::packet::SncPacket;
use crate::params::{CodeType, Parameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Stage {
    Forward,
    FinalForward,
    FinalBackward,
}

pub struct PpDecoder {
    sc: EncodeContext,
    stage: Stage,
    /// Pivot candidates held (rows stored in the decoding matrix).
    pivots: usize,
    finished: bool,
    row: Vec<Option<RowVector>>,
    message: Vec<Vec<u8>>,
    overhead: usize,
    operations: u64,
}

impl PpDecoder {
    pub fn new(params: Parameters) -> Result<Self, SncError> {
        if params.code_type != CodeType::WindWrap || params.size_c != 0 {
            return Err(SncError::IncompatibleDecoder {
                kind: "PP",
                code: params.code_type.name(),
            });
        }
        let sc = EncodeContext::new(params, None)?;
        let numpp = sc.snum();
        let size_p = params.size_p;
        Ok(PpDecoder {
            sc,
            stage: Stage::Forward,
            pivots: 0,
            finished: false,
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
        let numpp = self.sc.snum();

        match self.stage {
            Stage::Forward => {
                self.forward_process(&mut pkt);
                if self.stage == Stage::Forward && self.pivots == self.sc.snum() {
                    self.final_forward();
                }
            }
            Stage::FinalForward => {
                let mut ces = self.full_length_vector(&pkt);
                self.insert_full_length(&mut ces, &mut pkt.syms);
            }
            Stage::FinalBackward => return,
        }

        if self.pivots == numpp && self.stage != Stage::FinalBackward {
            self.stage = Stage::FinalBackward;
            self.finish_recovering();
        }
    }

    /// Forward stage: reduce the packet's wrap-around window against the
    /// stored rows, advancing the pivot position past leading zeros until a
    /// free slot is found or the window empties out.
    fn forward_process(&mut self, pkt: &mut SncPacket) {
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let bnc = self.sc.parameters().bnc;
        let numpp = self.sc.snum();

        let (mut pivot, mut window): (usize, Vec<u8>) = if pkt.is_systematic() {
            (pkt.ucid as usize, vec![1u8])
        } else {
            let gid = pkt.gid as usize;
            let ces0: Vec<u8> = (0..size_g).map(|i| pkt.coefficient(i, bnc)).collect();
            let Some(shift) = ces0.iter().position(|&c| c != 0) else {
                return; // all-zero coefficients carry nothing
            };
            let base = self.sc.gene[gid].pktid[0];
            ((base + shift) % numpp, ces0[shift..].to_vec())
        };

        let mut operations = 0u64;
        while let Some(stored) = &self.row[pivot] {
            let quotient = gf_div(window[0], stored.elem[0]);
            if window.len() < stored.elem.len() {
                window.resize(stored.elem.len(), 0);
            }
            region_madd(&mut window[..stored.elem.len()], &stored.elem, quotient);
            region_madd(&mut pkt.syms, &self.message[pivot], quotient);
            operations += 1 + stored.elem.len() as u64 + size_p as u64;

            // The leading element is cancelled; hop to the next nonzero.
            let Some(shift) = window[1..].iter().position(|&c| c != 0).map(|s| s + 1) else {
                self.operations += operations;
                return; // reduced to zero, linearly dependent
            };
            pivot = (pivot + shift) % numpp;
            window.drain(..shift);
        }
        self.operations += operations;

        debug_assert!(window[0] != 0);
        self.row[pivot] = Some(RowVector { elem: window });
        self.message[pivot].copy_from_slice(&pkt.syms);
        self.pivots += 1;
        trace!(
            "pivot candidates {} after {} received",
            self.pivots,
            self.overhead
        );
    }

    /// Once `snum` candidates exist, lift the bottom `size_g` wrap-around
    /// rows to full length and integrate them with the band above.
    fn final_forward(&mut self) {
        let size_g = self.sc.parameters().size_g;
        let size_p = self.sc.parameters().size_p;
        let numpp = self.sc.snum();

        debug!("entering final forward with {} candidates", self.pivots);
        self.stage = Stage::FinalForward;
        self.pivots = numpp - size_g;

        let mut lifted: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(size_g);
        for i in 0..size_g {
            let index = numpp - size_g + i;
            let stored = self.row[index].take().expect("bottom rows are present");
            let mut full = vec![0u8; numpp];
            for (j, &v) in stored.elem.iter().enumerate() {
                full[(index + j) % numpp] = v;
            }
            let msg = std::mem::replace(&mut self.message[index], vec![0u8; size_p]);
            lifted.push((full, msg));
        }

        for (mut ces, mut msg) in lifted {
            self.insert_full_length(&mut ces, &mut msg);
        }
    }

    /// Eliminate a full-length vector against the stored rows and store it
    /// at its surviving pivot, if any.
    fn insert_full_length(&mut self, ces: &mut [u8], msg: &mut [u8]) {
        let size_p = self.sc.parameters().size_p;
        let numpp = self.sc.snum();
        for k in 0..numpp {
            if ces[k] == 0 {
                continue;
            }
            match &self.row[k] {
                Some(stored) => {
                    debug_assert!(stored.elem[0] != 0);
                    let quotient = gf_div(ces[k], stored.elem[0]);
                    let len = stored.elem.len();
                    region_madd(&mut ces[k..k + len], &stored.elem, quotient);
                    region_madd(msg, &self.message[k], quotient);
                    self.operations += 1 + len as u64 + size_p as u64;
                }
                None => {
                    self.row[k] = Some(RowVector {
                        elem: ces[k..].to_vec(),
                    });
                    self.message[k].copy_from_slice(msg);
                    self.pivots += 1;
                    break;
                }
            }
        }
    }

    /// Final backward substitution: diagonalize right to left, rescale and
    /// publish the recovered packets.
    fn finish_recovering(&mut self) {
        let size_p = self.sc.parameters().size_p;
        let numpp = self.sc.snum();
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
        debug!("PP decoding finished after {} packets", self.overhead);
    }

    fn full_length_vector(&self, pkt: &SncPacket) -> Vec<u8> {
        let size_g = self.sc.parameters().size_g;
        let bnc = self.sc.parameters().bnc;
        let numpp = self.sc.snum();
        let mut ces = vec![0u8; numpp];
        if pkt.is_systematic() {
            ces[pkt.ucid as usize] = 1;
        } else {
            let gid = pkt.gid as usize;
            for i in 0..size_g {
                ces[self.sc.gene[gid].pktid[i]] = pkt.coefficient(i, bnc);
            }
        }
        ces
    }

    pub(crate) fn snapshot(&self) -> PpSnapshot {
        PpSnapshot {
            finished: self.finished,
            stage: self.stage,
            pivots: self.pivots,
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

    pub(crate) fn restore(params: Parameters, snap: PpSnapshot) -> Result<Self, SncError> {
        let mut dec = PpDecoder::new(params)?;
        if snap.rows.len() != dec.row.len() {
            return Err(SncError::CorruptState(
                "snapshot does not match the code geometry".into(),
            ));
        }
        dec.finished = snap.finished;
        dec.stage = snap.stage;
        dec.pivots = snap.pivots;
        for (i, entry) in snap.rows.into_iter().enumerate() {
            if let Some((elem, message)) = entry {
                dec.row[i] = Some(RowVector { elem });
                dec.message[i] = message;
            }
        }
        if dec.finished {
            for i in 0..dec.sc.snum() {
                dec.sc.pp[i] = Some(dec.message[i].clone());
            }
        }
        dec.overhead = snap.overhead;
        dec.operations = snap.operations;
        Ok(dec)
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct PpSnapshot {
    finished: bool,
    stage: Stage,
    pivots: usize,
    rows: Vec<Option<(Vec<u8>, Vec<u8>)>>,
    overhead: usize,
    operations: u64,
}

impl Decode for PpDecoder {
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
