//! Code parameters and derived sizes.

use serde::{Deserialize, Serialize};

use crate::error::SncError;

/// How source packets are grouped into subgenerations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeType {
    /// Packets are pseudo-randomly grouped.
    Rand,
    /// Packets are grouped into consecutively overlapping bands.
    Band,
    /// Like `Band`, but encoding vectors wrap around the end.
    WindWrap,
}

impl CodeType {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            CodeType::Rand => "RAND",
            CodeType::Band => "BAND",
            CodeType::WindWrap => "WINDWRAP",
        }
    }
}

/// Parameters of a sparse network code.
///
/// A receiver handed the same `Parameters` (seed included) reproduces the
/// sender's subgeneration grouping and precode graph bit-exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Payload size in bytes.
    pub datasize: usize,
    /// Symbol (packet) length in bytes.
    pub size_p: usize,
    /// Number of parity-check packets added by the precode; 0 disables it.
    pub size_c: usize,
    /// Base subgeneration stride.
    pub size_b: usize,
    /// Subgeneration size, `>= size_b`.
    pub size_g: usize,
    /// Grouping scheme.
    pub code_type: CodeType,
    /// Binary precode coefficients (edges carry 1 instead of random GF(256)).
    pub bpc: bool,
    /// Binary network coefficients (coded packets carry packed bits).
    pub bnc: bool,
    /// Systematic emission: the first `snum` generated packets are uncoded.
    pub sys: bool,
    /// PRNG seed. `-1` asks the encode context to derive one and write it
    /// back here on creation.
    pub seed: i64,
    /// Dense precode construction instead of the circulant LDPC code.
    pub hdpc: bool,
    /// Biased scheduling for banded codes with `size_b == 1`.
    pub nonuniform: bool,
    /// Overlap-aware decoder: single-round pivoting instead of the
    /// two-round variant with the Zlatev pass.
    pub oa_oneround: bool,
}

impl Parameters {
    /// Number of source packets the payload splits into.
    pub fn snum(&self) -> usize {
        self.datasize.div_ceil(self.size_p)
    }

    /// Number of parity-check packets.
    pub fn cnum(&self) -> usize {
        self.size_c
    }

    /// Total packet count (source + parity).
    pub fn numpp(&self) -> usize {
        self.snum() + self.cnum()
    }

    /// Number of subgenerations.
    pub fn gnum(&self) -> usize {
        let numpp = self.numpp();
        match self.code_type {
            CodeType::Band => (numpp - self.size_g).div_ceil(self.size_b) + 1,
            _ => numpp.div_ceil(self.size_b),
        }
    }

    /// Length in bytes of a packet's coefficient vector.
    pub fn coes_len(&self) -> usize {
        if self.bnc {
            self.size_g.div_ceil(8)
        } else {
            self.size_g
        }
    }

    pub(crate) fn verify(&self) -> Result<(), SncError> {
        if self.datasize == 0 || self.size_p == 0 {
            return Err(SncError::InvalidParameter(
                "datasize and size_p must be nonzero".into(),
            ));
        }
        if self.size_b > self.size_g {
            return Err(SncError::InvalidParameter(format!(
                "size_b ({}) > size_g ({})",
                self.size_b, self.size_g
            )));
        }
        if self.size_b == 0 {
            return Err(SncError::InvalidParameter("size_b must be nonzero".into()));
        }
        if self.size_g * self.size_p > self.datasize {
            return Err(SncError::InvalidParameter(format!(
                "size_g x size_p ({}) exceeds datasize ({})",
                self.size_g * self.size_p,
                self.datasize
            )));
        }
        if self.nonuniform && !(self.code_type == CodeType::Band && self.size_b == 1) {
            return Err(SncError::InvalidParameter(
                "nonuniform scheduling requires a BAND code with size_b == 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Parameters {
        Parameters {
            datasize: 1024,
            size_p: 32,
            size_c: 0,
            size_b: 4,
            size_g: 8,
            code_type: CodeType::Band,
            bpc: false,
            bnc: false,
            sys: false,
            seed: 42,
            hdpc: false,
            nonuniform: false,
            oa_oneround: false,
        }
    }

    #[test]
    fn derived_sizes_band() {
        let p = base();
        assert_eq!(p.snum(), 32);
        assert_eq!(p.numpp(), 32);
        // ceil((32 - 8) / 4) + 1
        assert_eq!(p.gnum(), 7);
    }

    #[test]
    fn derived_sizes_rand() {
        let mut p = base();
        p.code_type = CodeType::Rand;
        p.size_c = 4;
        assert_eq!(p.numpp(), 36);
        assert_eq!(p.gnum(), 9);
    }

    #[test]
    fn rejects_inverted_sizes() {
        let mut p = base();
        p.size_b = 16;
        assert!(p.verify().is_err());
        let mut p = base();
        p.size_g = 64;
        assert!(p.verify().is_err());
    }
}
