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

//! # Sparse Network Coding Library
//!
//! Reliable bulk transfer over lossy, multi-hop, many-to-one networks. A
//! sender splits a payload into fixed-size symbols, groups them into
//! overlapping *subgenerations*, optionally augments them with an LDPC
//! parity precode, and emits a stream of linearly coded packets over
//! GF(256) or GF(2). Intermediate nodes may *recode* buffered packets into
//! fresh combinations without decoding; receivers decode by collecting
//! enough linearly independent packets to invert the implied system.
//!
//! The core is single-threaded, blocking and allocation-driven. Distinct
//! contexts may live on distinct threads, but a single context is not
//! reentrant. Transport, flow control and framing beyond [`SncPacket`] are
//! the embedder's business.

pub mod bipartite;
pub mod decoder;
pub mod encoder;
mod error;
pub mod galois;
mod packet;
mod params;
pub mod pivoting;
pub mod recoder;
mod rng;

pub(crate) mod gaussian;

pub use decoder::{
    BdDecoder, CbdDecoder, Decode, DecoderKind, GgDecoder, OaDecoder, PpDecoder, SncDecoder,
};
pub use encoder::{EncodeContext, Subgeneration};
pub use error::SncError;
pub use packet::SncPacket;
pub use params::{CodeType, Parameters};
pub use recoder::{RecodeSched, SncBuffer};
pub use rng::CodingRng;
