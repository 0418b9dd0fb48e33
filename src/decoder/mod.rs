// Copyright (c) 2025, The SNC Library Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # Decoders
//!
//! Five decoders share one algebraic object, the linear system implied by
//! the received coded packets:
//!
//! * **GG** decodes subgeneration by subgeneration with iterative LDPC
//!   peeling in between.
//! * **OA** is overlap-aware: local elimination per subgeneration, then a
//!   global matrix solved with inactivation pivoting.
//! * **BD** exploits the banded structure of BAND codes.
//! * **CBD** is the band decoder with compact row storage and no pivoting.
//! * **PP** decodes perpetual (wrap-around band) codes in three stages.
//!
//! [`SncDecoder`] is the tagged dispatcher over the five.

mod bd;
mod cbd;
mod gg;
mod oa;
mod pp;

pub use bd::BdDecoder;
pub use cbd::CbdDecoder;
pub use gg::GgDecoder;
pub use oa::OaDecoder;
pub use pp::PpDecoder;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::encoder::EncodeContext;
use crate::error::SncError;
use crate::packet::SncPacket;
use crate::params::Parameters;

/// Decoder selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderKind {
    Gg,
    Oa,
    Bd,
    Cbd,
    Pp,
}

/// The operations every decoder branch supports.
pub trait Decode {
    /// Absorb one packet. The decoder owns the packet from here on;
    /// linearly dependent packets are silently absorbed.
    fn process(&mut self, pkt: SncPacket);
    /// Whether the original payload is fully recovered.
    fn finished(&self) -> bool;
    /// Number of packets received so far.
    fn overhead(&self) -> usize;
    /// Number of finite field operations performed so far.
    fn cost(&self) -> u64;
    /// The encode context being reconstructed.
    fn context(&self) -> &EncodeContext;
}

/// A sparse network code decoder of one of the five kinds.
pub enum SncDecoder {
    Gg(GgDecoder),
    Oa(OaDecoder),
    Bd(BdDecoder),
    Cbd(CbdDecoder),
    Pp(PpDecoder),
}

impl SncDecoder {
    /// Create a decoder. `aoh` is the allowed overhead of the OA decoder
    /// (extra packets beyond `snum` collected before pivoting starts) and
    /// is ignored by the other kinds.
    pub fn new(params: Parameters, kind: DecoderKind, aoh: usize) -> Result<Self, SncError> {
        Ok(match kind {
            DecoderKind::Gg => SncDecoder::Gg(GgDecoder::new(params)?),
            DecoderKind::Oa => SncDecoder::Oa(OaDecoder::new(params, aoh)?),
            DecoderKind::Bd => SncDecoder::Bd(BdDecoder::new(params)?),
            DecoderKind::Cbd => SncDecoder::Cbd(CbdDecoder::new(params)?),
            DecoderKind::Pp => SncDecoder::Pp(PpDecoder::new(params)?),
        })
    }

    pub fn kind(&self) -> DecoderKind {
        match self {
            SncDecoder::Gg(_) => DecoderKind::Gg,
            SncDecoder::Oa(_) => DecoderKind::Oa,
            SncDecoder::Bd(_) => DecoderKind::Bd,
            SncDecoder::Cbd(_) => DecoderKind::Cbd,
            SncDecoder::Pp(_) => DecoderKind::Pp,
        }
    }

    fn as_decode(&self) -> &dyn Decode {
        match self {
            SncDecoder::Gg(d) => d,
            SncDecoder::Oa(d) => d,
            SncDecoder::Bd(d) => d,
            SncDecoder::Cbd(d) => d,
            SncDecoder::Pp(d) => d,
        }
    }

    pub fn process(&mut self, pkt: SncPacket) {
        match self {
            SncDecoder::Gg(d) => d.process(pkt),
            SncDecoder::Oa(d) => d.process(pkt),
            SncDecoder::Bd(d) => d.process(pkt),
            SncDecoder::Cbd(d) => d.process(pkt),
            SncDecoder::Pp(d) => d.process(pkt),
        }
    }

    pub fn finished(&self) -> bool {
        self.as_decode().finished()
    }

    pub fn overhead(&self) -> usize {
        self.as_decode().overhead()
    }

    pub fn cost(&self) -> u64 {
        self.as_decode().cost()
    }

    pub fn context(&self) -> &EncodeContext {
        self.as_decode().context()
    }

    /// Recover the payload once `finished()` reports true.
    pub fn recover_data(&self) -> Result<Vec<u8>, SncError> {
        self.context().recover_data()
    }

    /// Persist the decoder: parameters, kind tag, then branch state.
    pub fn save<W: Write>(&self, mut w: W) -> Result<(), SncError> {
        bincode::serialize_into(&mut w, self.context().parameters())?;
        bincode::serialize_into(&mut w, &self.kind())?;
        match self {
            SncDecoder::Gg(d) => bincode::serialize_into(&mut w, &d.snapshot())?,
            SncDecoder::Oa(d) => bincode::serialize_into(&mut w, &d.snapshot())?,
            SncDecoder::Bd(d) => bincode::serialize_into(&mut w, &d.snapshot())?,
            SncDecoder::Cbd(d) => bincode::serialize_into(&mut w, &d.snapshot())?,
            SncDecoder::Pp(d) => bincode::serialize_into(&mut w, &d.snapshot())?,
        }
        Ok(())
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), SncError> {
        let file = File::create(path)?;
        self.save(BufWriter::new(file))
    }

    /// Restore a decoder persisted with [`save`](Self::save). The encode
    /// context is rebuilt from the stored parameters (grouping and precode
    /// graph replay deterministically from the seed) and the decoding state
    /// reloaded on top.
    pub fn restore<R: Read>(mut r: R) -> Result<Self, SncError> {
        let params: Parameters = bincode::deserialize_from(&mut r)?;
        let kind: DecoderKind = bincode::deserialize_from(&mut r)?;
        Ok(match kind {
            DecoderKind::Gg => SncDecoder::Gg(GgDecoder::restore(
                params,
                bincode::deserialize_from(&mut r)?,
            )?),
            DecoderKind::Oa => SncDecoder::Oa(OaDecoder::restore(
                params,
                bincode::deserialize_from(&mut r)?,
            )?),
            DecoderKind::Bd => SncDecoder::Bd(BdDecoder::restore(
                params,
                bincode::deserialize_from(&mut r)?,
            )?),
            DecoderKind::Cbd => SncDecoder::Cbd(CbdDecoder::restore(
                params,
                bincode::deserialize_from(&mut r)?,
            )?),
            DecoderKind::Pp => SncDecoder::Pp(PpDecoder::restore(
                params,
                bincode::deserialize_from(&mut r)?,
            )?),
        })
    }

    pub fn restore_from_path<P: AsRef<Path>>(path: P) -> Result<Self, SncError> {
        let file = File::open(path)?;
        Self::restore(BufReader::new(file))
    }
}

/// A stored row of a compact decoding matrix: the nonzero tail starting at
/// the row's pivot column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RowVector {
    pub elem: Vec<u8>,
}
