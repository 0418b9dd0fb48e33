//! # Encode Context
//!
//! The encode context owns the source packet array, the subgeneration
//! grouping, the precode graph and the context PRNG. Coded packets are
//! synthesized on demand; with systematic emission enabled the first
//! `snum` packets leave uncoded.

use log::{debug, trace};

use crate::bipartite::BipartiteGraph;
use crate::error::SncError;
use crate::galois::{construct_field, region_madd};
use crate::packet::{set_bit, SncPacket};
use crate::params::{CodeType, Parameters};
use crate::rng::CodingRng;

/// Resampling cap per grouping slot; exceeding it aborts context creation
/// instead of spinning on a pathological parameter combination.
const MAX_GROUPING_ATTEMPTS: usize = 8;

/// An ordered set of `size_g` distinct packet indices spanned by one
/// subgeneration.
#[derive(Debug, Clone)]
pub struct Subgeneration {
    pub gid: usize,
    pub pktid: Vec<usize>,
}

impl Subgeneration {
    /// Position of `id` within this subgeneration, if present.
    pub fn position_of(&self, id: usize) -> Option<usize> {
        self.pktid.iter().position(|&p| p == id)
    }
}

/// Sparse network code encode context.
///
/// Decoders build the same context without source data and fill `pp` as
/// packets decode; the context PRNG guarantees that grouping and precode
/// edges come out identical on both sides for equal `Parameters`.
pub struct EncodeContext {
    params: Parameters,
    snum: usize,
    cnum: usize,
    gnum: usize,
    /// Source packets followed by parity packets; `None` until known.
    pub(crate) pp: Vec<Option<Vec<u8>>>,
    pub(crate) gene: Vec<Subgeneration>,
    pub(crate) graph: Option<BipartiteGraph>,
    rng: CodingRng,
    count: usize,
}

impl EncodeContext {
    /// Create a context from parameters and an optional source buffer.
    ///
    /// A seed of `-1` is replaced by a clock-derived one and written back
    /// into the stored parameters, so `parameters()` can be shipped to
    /// receivers for bit-exact reconstruction.
    pub fn new(mut params: Parameters, data: Option<&[u8]>) -> Result<Self, SncError> {
        params.verify()?;
        if params.seed == -1 {
            params.seed = clock_seed();
            debug!("derived seed {} from clock", params.seed);
        }
        let mut rng = CodingRng::new(params.seed as u64);

        let snum = params.snum();
        let cnum = params.cnum();
        let gnum = params.gnum();
        let numpp = snum + cnum;

        let gene = match params.code_type {
            CodeType::Rand => group_packets_rand(&params, numpp, gnum, &mut rng)?,
            CodeType::Band => group_packets_band(&params, numpp, gnum),
            CodeType::WindWrap => group_packets_windwrap(&params, numpp, gnum),
        };

        let graph = if cnum > 0 {
            Some(BipartiteGraph::new(
                snum,
                cnum,
                params.bpc,
                params.hdpc,
                &mut rng,
            ))
        } else {
            None
        };

        construct_field();

        let mut ctx = EncodeContext {
            params,
            snum,
            cnum,
            gnum,
            pp: vec![None; numpp],
            gene,
            graph,
            rng,
            count: 0,
        };

        if let Some(buf) = data {
            if buf.len() != ctx.params.datasize {
                return Err(SncError::InvalidParameter(format!(
                    "source buffer is {} bytes, datasize says {}",
                    buf.len(),
                    ctx.params.datasize
                )));
            }
            ctx.load_source(buf);
            ctx.perform_precoding();
        }
        Ok(ctx)
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn snum(&self) -> usize {
        self.snum
    }

    pub fn cnum(&self) -> usize {
        self.cnum
    }

    pub fn gnum(&self) -> usize {
        self.gnum
    }

    pub fn numpp(&self) -> usize {
        self.snum + self.cnum
    }

    /// The subgenerations of this code.
    pub fn subgenerations(&self) -> &[Subgeneration] {
        &self.gene
    }

    /// Index of some subgeneration containing packet `id`.
    pub(crate) fn generation_of(&self, id: usize) -> Option<usize> {
        self.gene.iter().position(|g| g.pktid.contains(&id))
    }

    fn load_source(&mut self, buf: &[u8]) {
        let mut read = 0usize;
        for i in 0..self.snum {
            let mut row = vec![0u8; self.params.size_p];
            let toread = self.params.size_p.min(self.params.datasize - read);
            row[..toread].copy_from_slice(&buf[read..read + toread]);
            read += toread;
            self.pp[i] = Some(row);
        }
        for i in 0..self.cnum {
            self.pp[self.snum + i] = Some(vec![0u8; self.params.size_p]);
        }
    }

    /// Systematic LDPC precoding: every parity row accumulates its left
    /// neighbours weighted by the edge coefficients.
    fn perform_precoding(&mut self) {
        let Some(graph) = &self.graph else {
            return;
        };
        let (sources, parities) = self.pp.split_at_mut(self.snum);
        for (i, parity) in parities.iter_mut().enumerate().take(self.cnum) {
            let dst = parity.as_mut().expect("parity row allocated");
            for edge in &graph.l_nbrs_of_r[i] {
                let src = sources[edge.index].as_ref().expect("source row loaded");
                region_madd(dst, src, edge.ce);
            }
        }
    }

    /// Generate a coded packet, allocating it.
    pub fn generate(&mut self) -> SncPacket {
        let mut pkt = SncPacket::empty(&self.params);
        let gid = self.schedule_generation();
        self.encode_packet(gid, &mut pkt);
        pkt
    }

    /// Generate a coded packet into existing storage, reusing allocations.
    pub fn generate_into(&mut self, pkt: &mut SncPacket) {
        debug_assert_eq!(pkt.coes.len(), self.params.coes_len());
        debug_assert_eq!(pkt.syms.len(), self.params.size_p);
        pkt.clear();
        let gid = self.schedule_generation();
        self.encode_packet(gid, pkt);
    }

    fn encode_packet(&mut self, gid: usize, pkt: &mut SncPacket) {
        if self.params.sys && self.count < self.snum {
            // Systematic prefix: forward the next source packet uncoded.
            let pktid = self.count;
            let src = self.pp[pktid]
                .as_ref()
                .expect("encode context has no source data");
            pkt.syms.copy_from_slice(src);
            pkt.gid = -1;
            pkt.ucid = pktid as i32;
            self.count += 1;
            return;
        }

        pkt.gid = gid as i32;
        pkt.ucid = -1;
        for i in 0..self.params.size_g {
            let pktid = self.gene[gid].pktid[i];
            let co = if self.params.bnc {
                let bit = self.rng.bit();
                if bit == 1 {
                    set_bit(&mut pkt.coes, i);
                }
                bit
            } else {
                let e = self.rng.gf_element();
                pkt.coes[i] = e;
                e
            };
            let src = self.pp[pktid]
                .as_ref()
                .expect("encode context has no source data");
            region_madd(&mut pkt.syms, src, co);
        }
        self.count += 1;
    }

    fn schedule_generation(&mut self) -> usize {
        if self.gnum == 1 {
            return 0;
        }
        if self.params.nonuniform {
            return banded_nonuniform_sched(
                self.numpp(),
                self.params.size_g,
                self.gnum,
                &mut self.rng,
            );
        }
        self.rng.below(self.gnum)
    }

    /// Concatenate the recovered source packets, truncating the zero padding
    /// of the last one.
    pub fn recover_data(&self) -> Result<Vec<u8>, SncError> {
        let mut data = Vec::with_capacity(self.params.datasize);
        let mut pc = 0usize;
        while data.len() < self.params.datasize {
            let row = self.pp[pc].as_ref().ok_or(SncError::DataIncomplete(pc))?;
            let towrite = self.params.size_p.min(self.params.datasize - data.len());
            data.extend_from_slice(&row[..towrite]);
            pc += 1;
        }
        Ok(data)
    }
}

fn clock_seed() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_millis() as i64) & 0x7FFF_FFFF
}

/// Pseudo-random grouping: the first `size_b` slots walk the packet array
/// with stride `size_b`, the rest are sampled from the context PRNG until
/// duplicate-free. Sampling is capped per slot.
fn group_packets_rand(
    params: &Parameters,
    numpp: usize,
    gnum: usize,
    rng: &mut CodingRng,
) -> Result<Vec<Subgeneration>, SncError> {
    let mut gene = Vec::with_capacity(gnum);
    for g in 0..gnum {
        let mut pktid = Vec::with_capacity(params.size_g);
        for j in 0..params.size_b {
            let mut index = (g * params.size_b + j) % numpp;
            let mut attempts = 0;
            while pktid.contains(&index) {
                index = rng.below(numpp);
                attempts += 1;
                if attempts > MAX_GROUPING_ATTEMPTS * numpp {
                    return Err(SncError::GroupingFailed { gid: g });
                }
            }
            pktid.push(index);
        }
        for _ in params.size_b..params.size_g {
            let mut index = rng.below(numpp);
            let mut attempts = 0;
            while pktid.contains(&index) {
                index = rng.below(numpp);
                attempts += 1;
                if attempts > MAX_GROUPING_ATTEMPTS * numpp {
                    return Err(SncError::GroupingFailed { gid: g });
                }
            }
            pktid.push(index);
        }
        gene.push(Subgeneration { gid: g, pktid });
    }
    Ok(gene)
}

/// Banded grouping: subgeneration `g` spans the contiguous block starting
/// at `min(g * size_b, numpp - size_g)`.
fn group_packets_band(params: &Parameters, numpp: usize, gnum: usize) -> Vec<Subgeneration> {
    let mut gene = Vec::with_capacity(gnum);
    for g in 0..gnum {
        let mut leading = g * params.size_b;
        if leading > numpp - params.size_g {
            trace!("band lead of gid {} clamped to the matrix edge", g);
            leading = numpp - params.size_g;
        }
        let pktid = (leading..leading + params.size_g).collect();
        gene.push(Subgeneration { gid: g, pktid });
    }
    gene
}

/// Wrap-around banded grouping.
fn group_packets_windwrap(params: &Parameters, numpp: usize, gnum: usize) -> Vec<Subgeneration> {
    let mut gene = Vec::with_capacity(gnum);
    for g in 0..gnum {
        let leading = g * params.size_b;
        let pktid = (0..params.size_g).map(|j| (leading + j) % numpp).collect();
        gene.push(Subgeneration { gid: g, pktid });
    }
    gene
}

/// Biased scheduling for banded codes with unit stride: the first and last
/// subgenerations overlap fewer neighbours, so they are drawn with weight
/// `G+1` while every interior one gets weight 2.
pub(crate) fn banded_nonuniform_sched(
    numpp: usize,
    size_g: usize,
    gnum: usize,
    rng: &mut CodingRng,
) -> usize {
    if gnum == 1 {
        return 0;
    }
    let m = numpp;
    let g = size_g;
    let upperb = 2 * (g + 1) + 2 * (m - g - 1);
    let selected = rng.below(upperb) + 1;
    if selected <= g + 1 {
        0
    } else if selected > g + 1 + 2 * (m - g - 1) {
        gnum - 1
    } else {
        (selected - (g + 1)) / 2 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::galois::gf_mul;

    fn params(code_type: CodeType) -> Parameters {
        Parameters {
            datasize: 1024,
            size_p: 32,
            size_c: 4,
            size_b: 4,
            size_g: 8,
            code_type,
            bpc: false,
            bnc: false,
            sys: false,
            seed: 42,
            hdpc: false,
            nonuniform: false,
            oa_oneround: false,
        }
    }

    fn payload(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn subgenerations_have_no_duplicates() {
        for ct in [CodeType::Rand, CodeType::Band, CodeType::WindWrap] {
            let ctx = EncodeContext::new(params(ct), None).unwrap();
            for gene in ctx.subgenerations() {
                let mut seen = gene.pktid.clone();
                seen.sort_unstable();
                seen.dedup();
                assert_eq!(seen.len(), gene.pktid.len(), "{:?} gid {}", ct, gene.gid);
            }
        }
    }

    #[test]
    fn rand_grouping_covers_every_packet() {
        let ctx = EncodeContext::new(params(CodeType::Rand), None).unwrap();
        let mut covered = vec![false; ctx.numpp()];
        for gene in ctx.subgenerations() {
            for &id in &gene.pktid {
                covered[id] = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn band_grouping_is_contiguous() {
        let ctx = EncodeContext::new(params(CodeType::Band), None).unwrap();
        for gene in ctx.subgenerations() {
            for w in gene.pktid.windows(2) {
                assert_eq!(w[1], w[0] + 1);
            }
        }
    }

    #[test]
    fn precode_rows_are_consistent() {
        let p = params(CodeType::Rand);
        let data = payload(p.datasize);
        let ctx = EncodeContext::new(p, Some(&data)).unwrap();
        let graph = ctx.graph.as_ref().unwrap();
        for i in 0..ctx.cnum() {
            let mut acc = ctx.pp[ctx.snum() + i].clone().unwrap();
            for edge in &graph.l_nbrs_of_r[i] {
                let src = ctx.pp[edge.index].as_ref().unwrap();
                for (a, s) in acc.iter_mut().zip(src.iter()) {
                    *a ^= gf_mul(edge.ce, *s);
                }
            }
            assert!(acc.iter().all(|&b| b == 0), "check row {}", i);
        }
    }

    #[test]
    fn same_seed_reproduces_grouping_and_packets() {
        let p = params(CodeType::Rand);
        let data = payload(p.datasize);
        let mut a = EncodeContext::new(p, Some(&data)).unwrap();
        let mut b = EncodeContext::new(p, Some(&data)).unwrap();
        for (ga, gb) in a.subgenerations().iter().zip(b.subgenerations()) {
            assert_eq!(ga.pktid, gb.pktid);
        }
        for _ in 0..1000 {
            assert_eq!(a.generate().to_bytes(), b.generate().to_bytes());
        }
    }

    #[test]
    fn seed_written_back_when_unset() {
        let mut p = params(CodeType::Band);
        p.size_c = 0;
        p.seed = -1;
        let ctx = EncodeContext::new(p, None).unwrap();
        assert_ne!(ctx.parameters().seed, -1);
    }

    #[test]
    fn systematic_prefix_covers_every_source_once() {
        let mut p = params(CodeType::Band);
        p.size_c = 0;
        p.sys = true;
        let data = payload(p.datasize);
        let mut ctx = EncodeContext::new(p, Some(&data)).unwrap();
        let snum = ctx.snum();
        let mut seen = vec![false; snum];
        for _ in 0..snum {
            let pkt = ctx.generate();
            assert!(pkt.is_systematic());
            let ucid = pkt.ucid as usize;
            assert!(!seen[ucid]);
            seen[ucid] = true;
            assert_eq!(&pkt.syms[..], &ctx.pp[ucid].as_ref().unwrap()[..]);
        }
        assert!(seen.iter().all(|&s| s));
        assert!(!ctx.generate().is_systematic());
    }

    #[test]
    fn recover_data_roundtrips_with_padding() {
        let mut p = params(CodeType::Band);
        p.size_c = 0;
        p.datasize = 1000; // not a multiple of size_p
        let data = payload(p.datasize);
        let ctx = EncodeContext::new(p, Some(&data)).unwrap();
        assert_eq!(ctx.recover_data().unwrap(), data);
    }

    #[test]
    fn nonuniform_sched_hits_edges_more_often() {
        let mut p = params(CodeType::Band);
        p.size_c = 0;
        p.size_b = 1;
        p.nonuniform = true;
        let mut ctx = EncodeContext::new(p, Some(&payload(1024))).unwrap();
        let gnum = ctx.gnum();
        let mut counts = vec![0usize; gnum];
        for _ in 0..20_000 {
            let pkt = ctx.generate();
            counts[pkt.gid as usize] += 1;
        }
        let interior_avg = counts[1..gnum - 1].iter().sum::<usize>() / (gnum - 2);
        assert!(counts[0] > 2 * interior_avg);
        assert!(counts[gnum - 1] > 2 * interior_avg);
    }
}
