//! The coded packet record and its wire form.

use serde::{Deserialize, Serialize};

use crate::error::SncError;
use crate::params::Parameters;

/// A coded (or systematic) packet.
///
/// `gid` identifies the subgeneration the coefficients apply to. A
/// systematic packet carries `gid == -1` and `ucid >= 0`: its symbols are
/// the source packet `ucid` verbatim and `coes` is all zero.
///
/// With binary network coefficients the `coes` vector is bit-packed,
/// `ceil(size_g / 8)` bytes, bit 0 of byte 0 being coefficient 0; otherwise
/// it holds `size_g` GF(256) bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SncPacket {
    pub gid: i32,
    pub ucid: i32,
    pub coes: Vec<u8>,
    pub syms: Vec<u8>,
}

impl SncPacket {
    /// An all-zero packet shaped for the given code parameters.
    pub fn empty(params: &Parameters) -> Self {
        SncPacket {
            gid: -1,
            ucid: -1,
            coes: vec![0u8; params.coes_len()],
            syms: vec![0u8; params.size_p],
        }
    }

    pub fn is_systematic(&self) -> bool {
        self.gid == -1 && self.ucid >= 0
    }

    /// Reset to all-zero in place, keeping the allocations.
    pub fn clear(&mut self) {
        self.gid = -1;
        self.ucid = -1;
        self.coes.fill(0);
        self.syms.fill(0);
    }

    /// The `i`-th coefficient, expanding the packed representation when the
    /// code uses binary network coefficients.
    #[inline]
    pub fn coefficient(&self, i: usize, bnc: bool) -> u8 {
        if bnc {
            get_bit(&self.coes, i)
        } else {
            self.coes[i]
        }
    }

    /// Bit-exact wire encoding: little-endian `gid`, `ucid`, then the raw
    /// coefficient and symbol bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.coes.len() + self.syms.len());
        out.extend_from_slice(&self.gid.to_le_bytes());
        out.extend_from_slice(&self.ucid.to_le_bytes());
        out.extend_from_slice(&self.coes);
        out.extend_from_slice(&self.syms);
        out
    }

    /// Decode a packet from its wire form. Lengths of the coefficient and
    /// symbol fields are fixed by `params`.
    pub fn from_bytes(params: &Parameters, buf: &[u8]) -> Result<Self, SncError> {
        let clen = params.coes_len();
        let want = 8 + clen + params.size_p;
        if buf.len() != want {
            return Err(SncError::CorruptState(format!(
                "packet record is {} bytes, expected {}",
                buf.len(),
                want
            )));
        }
        let gid = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let ucid = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        Ok(SncPacket {
            gid,
            ucid,
            coes: buf[8..8 + clen].to_vec(),
            syms: buf[8 + clen..].to_vec(),
        })
    }
}

/// The `i`-th bit of a packed coefficient array.
///
/// Bit indices run `[7|6|5|4|3|2|1|0] [15|14|...|8] ...` within consecutive
/// bytes, so bit 0 of byte 0 is coefficient 0.
#[inline]
pub(crate) fn get_bit(bits: &[u8], i: usize) -> u8 {
    (bits[i / 8] >> (i % 8)) & 1
}

#[inline]
pub(crate) fn set_bit(bits: &mut [u8], i: usize) {
    bits[i / 8] |= 1 << (i % 8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CodeType;

    fn params(bnc: bool) -> Parameters {
        Parameters {
            datasize: 256,
            size_p: 16,
            size_c: 0,
            size_b: 2,
            size_g: 5,
            code_type: CodeType::Rand,
            bpc: false,
            bnc,
            sys: false,
            seed: 1,
            hdpc: false,
            nonuniform: false,
            oa_oneround: false,
        }
    }

    #[test]
    fn bit_order_is_lsb_first() {
        let mut bits = vec![0u8; 2];
        set_bit(&mut bits, 0);
        set_bit(&mut bits, 9);
        assert_eq!(bits[0], 0b0000_0001);
        assert_eq!(bits[1], 0b0000_0010);
        assert_eq!(get_bit(&bits, 0), 1);
        assert_eq!(get_bit(&bits, 1), 0);
        assert_eq!(get_bit(&bits, 9), 1);
    }

    #[test]
    fn wire_roundtrip() {
        for bnc in [false, true] {
            let p = params(bnc);
            let mut pkt = SncPacket::empty(&p);
            pkt.gid = 3;
            pkt.ucid = -1;
            pkt.coes.iter_mut().enumerate().for_each(|(i, c)| *c = i as u8 + 1);
            pkt.syms.iter_mut().enumerate().for_each(|(i, s)| *s = (i * 3) as u8);
            let bytes = pkt.to_bytes();
            assert_eq!(bytes.len(), 8 + p.coes_len() + p.size_p);
            let back = SncPacket::from_bytes(&p, &bytes).unwrap();
            assert_eq!(back, pkt);
        }
    }

    #[test]
    fn truncated_record_rejected() {
        let p = params(false);
        let pkt = SncPacket::empty(&p);
        let mut bytes = pkt.to_bytes();
        bytes.pop();
        assert!(SncPacket::from_bytes(&p, &bytes).is_err());
    }
}
