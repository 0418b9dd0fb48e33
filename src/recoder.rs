//! # Recode Buffer
//!
//! Intermediate nodes buffer a bounded number of coded packets per
//! subgeneration and emit fresh linear combinations of them without ever
//! decoding. Eviction is FIFO: when a subgeneration's buffer is full the
//! oldest packet is dropped in favour of the newcomer. Systematic packets
//! are kept on a side list and forwarded monotonically.

use log::trace;

use crate::encoder::{banded_nonuniform_sched, EncodeContext, Subgeneration};
use crate::error::SncError;
use crate::galois::region_madd;
use crate::packet::{set_bit, SncPacket};
use crate::params::{CodeType, Parameters};
use crate::rng::CodingRng;

/// Scheduling policy for picking the subgeneration to recode from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecodeSched {
    /// Uniform over all subgenerations, empty ones included.
    Triv,
    /// Uniform over non-empty subgenerations.
    Rand,
    /// Maximum local potential innovativeness: argmax of buffered minus
    /// scheduled counts.
    Mlpi,
    /// Biased banded scheduling, matching the encoder's non-uniform draw.
    NuRand,
    /// Forward pending systematic packets first, then fall back to `Rand`.
    RandSys,
    /// Forward pending systematic packets first, then fall back to `Mlpi`.
    MlpiSys,
}

/// Per-subgeneration FIFO packet buffer with recoding.
pub struct SncBuffer {
    params: Parameters,
    snum: usize,
    cnum: usize,
    gnum: usize,
    /// Buffer capacity per subgeneration.
    size: usize,
    /// Number of non-empty subgeneration buffers.
    nemp: usize,
    gbuf: Vec<Vec<Option<SncPacket>>>,
    /// Buffered packet count per subgeneration.
    nc: Vec<usize>,
    /// Next write position per subgeneration.
    pn: Vec<usize>,
    /// Times each subgeneration has been scheduled.
    nsched: Vec<usize>,
    /// Buffered systematic packets and the forwarding watermark.
    sysbuf: Vec<SncPacket>,
    sysptr: usize,
    /// Grouping replica, needed to place systematic packets inside
    /// subgenerations while recoding.
    gene: Vec<Subgeneration>,
    rng: CodingRng,
}

impl SncBuffer {
    /// Create a buffer holding up to `bufsize` packets per subgeneration.
    pub fn new(params: Parameters, bufsize: usize) -> Result<Self, SncError> {
        if bufsize == 0 {
            return Err(SncError::InvalidParameter("bufsize must be nonzero".into()));
        }
        params.verify()?;
        // Replicate the grouping so systematic packets can be mapped to
        // their positions inside subgenerations.
        let ctx = EncodeContext::new(params, None)?;
        let params = *ctx.parameters();
        let (snum, cnum, gnum) = (ctx.snum(), ctx.cnum(), ctx.gnum());
        let gene = ctx.subgenerations().to_vec();
        Ok(SncBuffer {
            params,
            snum,
            cnum,
            gnum,
            size: bufsize,
            nemp: 0,
            gbuf: (0..gnum)
                .map(|_| {
                    let mut slots = Vec::with_capacity(bufsize);
                    slots.resize_with(bufsize, || None);
                    slots
                })
                .collect(),
            nc: vec![0; gnum],
            pn: vec![0; gnum],
            nsched: vec![0; gnum],
            sysbuf: Vec::new(),
            sysptr: 0,
            gene,
            rng: CodingRng::new(params.seed as u64 ^ 0x5171_F00D),
        })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Store a packet. The buffer owns every packet handed to it; a full
    /// subgeneration buffer evicts its oldest occupant.
    pub fn buffer_packet(&mut self, pkt: SncPacket) {
        if pkt.is_systematic() {
            self.sysbuf.push(pkt);
            return;
        }
        let gid = pkt.gid as usize;
        if self.nc[gid] == 0 {
            self.gbuf[gid][0] = Some(pkt);
            self.nc[gid] += 1;
            self.nemp += 1;
        } else if self.nc[gid] == self.size {
            // FIFO eviction: the previous occupant of the write position is
            // dropped here and never referenced again.
            trace!("evicting oldest packet of subgeneration {}", gid);
            self.gbuf[gid][self.pn[gid]] = Some(pkt);
        } else {
            self.gbuf[gid][self.pn[gid]] = Some(pkt);
            self.nc[gid] += 1;
        }
        self.pn[gid] = (self.pn[gid] + 1) % self.size;
    }

    /// Recode a packet, allocating it.
    pub fn recode(&mut self, sched: RecodeSched) -> Result<SncPacket, SncError> {
        let mut pkt = SncPacket::empty(&self.params);
        self.recode_into(&mut pkt, sched)?;
        Ok(pkt)
    }

    /// Recode into existing storage.
    ///
    /// Fails with [`SncError::BufferExhausted`] when nothing is buffered and
    /// no systematic packet is pending.
    pub fn recode_into(&mut self, pkt: &mut SncPacket, sched: RecodeSched) -> Result<(), SncError> {
        let sched = if self.params.sys {
            sched
        } else {
            match sched {
                RecodeSched::RandSys => RecodeSched::Rand,
                RecodeSched::MlpiSys => RecodeSched::Mlpi,
                other => other,
            }
        };

        let Some(choice) = self.schedule(sched) else {
            return Err(SncError::BufferExhausted);
        };

        if choice == self.gnum {
            // Forward the latest pending systematic packet verbatim.
            let latest = &self.sysbuf[self.sysbuf.len() - 1];
            pkt.clear();
            pkt.gid = -1;
            pkt.ucid = latest.ucid;
            pkt.syms.copy_from_slice(&latest.syms);
            self.sysptr = self.sysbuf.len();
            return Ok(());
        }

        let gid = choice;
        pkt.clear();
        pkt.gid = gid as i32;
        pkt.ucid = -1;

        // Fold in buffered systematic packets that fall inside the
        // scheduled subgeneration, each at its relative index.
        for s in 0..self.sysbuf.len() {
            let ucid = self.sysbuf[s].ucid as usize;
            let Some(relative) = self.gene[gid].position_of(ucid) else {
                continue;
            };
            let co = if self.params.bnc {
                let bit = self.rng.bit();
                if bit == 1 {
                    set_bit(&mut pkt.coes, relative);
                }
                bit
            } else {
                let e = self.rng.gf_element();
                pkt.coes[relative] = e;
                e
            };
            region_madd(&mut pkt.syms, &self.sysbuf[s].syms, co);
        }

        // Combine the buffered coded packets with fresh coefficients.
        for slot in 0..self.nc[gid] {
            let stored = self.gbuf[gid][slot]
                .as_ref()
                .expect("buffered slot below nc is occupied");
            let co = if self.params.bnc {
                self.rng.bit()
            } else {
                self.rng.gf_element()
            };
            region_madd(&mut pkt.coes, &stored.coes, co);
            region_madd(&mut pkt.syms, &stored.syms, co);
        }
        Ok(())
    }

    /// Pick a subgeneration per the policy. `Some(gnum)` asks the caller to
    /// forward a systematic packet; `None` means nothing is schedulable.
    fn schedule(&mut self, sched: RecodeSched) -> Option<usize> {
        if self.nemp == 0 && self.sysbuf.is_empty() {
            return None;
        }

        if matches!(sched, RecodeSched::RandSys | RecodeSched::MlpiSys)
            && self.sysptr < self.sysbuf.len()
        {
            return Some(self.gnum);
        }

        match sched {
            RecodeSched::Triv => {
                let gid = self.rng.below(self.gnum);
                self.nsched[gid] += 1;
                Some(gid)
            }
            RecodeSched::Rand | RecodeSched::RandSys => {
                if self.nemp == 0 {
                    return None;
                }
                let index = self.rng.below(self.nemp);
                let gid = (0..self.gnum)
                    .filter(|&g| self.nc[g] != 0)
                    .nth(index)
                    .expect("nemp tracks non-empty buffers");
                self.nsched[gid] += 1;
                Some(gid)
            }
            RecodeSched::Mlpi | RecodeSched::MlpiSys => {
                let gid = (0..self.gnum)
                    .max_by_key(|&g| self.nc[g] as i64 - self.nsched[g] as i64)
                    .expect("gnum is nonzero");
                self.nsched[gid] += 1;
                Some(gid)
            }
            RecodeSched::NuRand => {
                if self.nemp == 0 {
                    return None;
                }
                loop {
                    let gid = banded_nonuniform_sched(
                        self.snum + self.cnum,
                        self.params.size_g,
                        self.gnum,
                        &mut self.rng,
                    );
                    if self.nc[gid] != 0 {
                        self.nsched[gid] += 1;
                        return Some(gid);
                    }
                }
            }
        }
    }
}
