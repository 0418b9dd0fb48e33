//! Bipartite graph of the LDPC precode.
//!
//! The default construction is the circulant LDPC code of the Raptor FEC
//! standard (RFC 5053 sec. 5.4.2.3): every source column touches exactly
//! three check rows, shifted down one row per column within each circulant
//! block. A dense construction is available for development and testing.
//!
//! The adjacency is immutable once built; decoders track peeling progress
//! with their own per-check counters.

use crate::rng::CodingRng;

/// One edge of the precode graph with its coefficient.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    /// Index of the node on the other side.
    pub index: usize,
    /// Edge coefficient: 1 for binary precodes, random nonzero otherwise.
    pub ce: u8,
}

/// Precode incidence structure with adjacency kept in both directions.
#[derive(Debug, Clone)]
pub struct BipartiteGraph {
    pub nleft: usize,
    pub nright: usize,
    /// For each check (right) node, its source (left) neighbours.
    pub l_nbrs_of_r: Vec<Vec<Edge>>,
    /// For each source (left) node, its check (right) neighbours.
    pub r_nbrs_of_l: Vec<Vec<Edge>>,
}

impl BipartiteGraph {
    /// Build the precode graph for `nleft` source and `nright` check nodes.
    ///
    /// Edge coefficients are 1 when `binary` is set and otherwise sampled
    /// from `[1, 255]` with the caller's generator, so graph construction is
    /// reproducible from the code parameters alone.
    pub fn new(
        nleft: usize,
        nright: usize,
        binary: bool,
        dense: bool,
        rng: &mut CodingRng,
    ) -> Self {
        let mut graph = BipartiteGraph {
            nleft,
            nright,
            l_nbrs_of_r: vec![Vec::new(); nright],
            r_nbrs_of_l: vec![Vec::new(); nleft],
        };
        if nright == 0 {
            return graph;
        }
        if dense {
            graph.build_dense(binary, rng);
        } else {
            graph.build_circulant(binary, rng);
        }
        graph
    }

    /// Degree of check node `r`.
    pub fn check_degree(&self, r: usize) -> usize {
        self.l_nbrs_of_r[r].len()
    }

    fn include(&mut self, left: usize, right: usize, binary: bool, rng: &mut CodingRng) {
        let ce = if binary { 1 } else { rng.gf_nonzero() };
        self.l_nbrs_of_r[right].push(Edge { index: left, ce });
        self.r_nbrs_of_l[left].push(Edge { index: right, ce });
    }

    fn build_circulant(&mut self, binary: bool, rng: &mut CodingRng) {
        let nleft = self.nleft;
        let s = self.nright;
        let blocks = nleft.div_ceil(s);
        let mut touching_edge = false;
        for i in 0..blocks {
            if touching_edge {
                break;
            }
            // Non-zero rows of the first column in this circulant block:
            // rows 0, a-1 and b-1, each check connecting to three sources.
            let a = wrap_1s(i + 2, s);
            let b = wrap_1s(2 * (i + 1) + 1, s);
            self.include(i * s, 0, binary, rng);
            self.include(i * s, a - 1, binary, rng);
            self.include(i * s, b - 1, binary, rng);
            // Remaining columns shift the pattern down one row each.
            for j in 1..s {
                if i * s + j >= nleft {
                    touching_edge = true;
                    break;
                }
                let a = wrap_1s(i + 2 + j, s);
                let b = wrap_1s(2 * (i + 1) + 1 + j, s);
                self.include(i * s + j, j, binary, rng);
                self.include(i * s + j, a - 1, binary, rng);
                self.include(i * s + j, b - 1, binary, rng);
            }
        }
    }

    /// Dense construction: every (check, source) pair is an edge unless the
    /// generator rules it out (half of the pairs for binary precodes, 1 in
    /// 256 otherwise).
    fn build_dense(&mut self, binary: bool, rng: &mut CodingRng) {
        for i in 0..self.nright {
            for j in 0..self.nleft {
                let included = if binary {
                    rng.next_u32() % 2 != 0
                } else {
                    rng.next_u32() % 256 != 0
                };
                if included {
                    self.include(j, i, binary, rng);
                }
            }
        }
    }
}

/// `v mod s`, mapped into `[1, s]` instead of `[0, s)`.
#[inline]
fn wrap_1s(v: usize, s: usize) -> usize {
    let m = v % s;
    if m == 0 {
        s
    } else {
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circulant_gives_three_checks_per_source() {
        let mut rng = CodingRng::new(99);
        let g = BipartiteGraph::new(40, 7, false, false, &mut rng);
        for j in 0..40 {
            assert_eq!(g.r_nbrs_of_l[j].len(), 3, "source {}", j);
        }
        let total: usize = (0..7).map(|r| g.check_degree(r)).sum();
        assert_eq!(total, 120);
    }

    #[test]
    fn adjacency_is_symmetric() {
        let mut rng = CodingRng::new(3);
        let g = BipartiteGraph::new(25, 5, false, false, &mut rng);
        for r in 0..5 {
            for e in &g.l_nbrs_of_r[r] {
                assert!(g.r_nbrs_of_l[e.index]
                    .iter()
                    .any(|back| back.index == r && back.ce == e.ce));
            }
        }
    }

    #[test]
    fn same_seed_same_graph() {
        let mut r1 = CodingRng::new(1234);
        let mut r2 = CodingRng::new(1234);
        let a = BipartiteGraph::new(64, 11, false, false, &mut r1);
        let b = BipartiteGraph::new(64, 11, false, false, &mut r2);
        for r in 0..11 {
            let ea: Vec<(usize, u8)> = a.l_nbrs_of_r[r].iter().map(|e| (e.index, e.ce)).collect();
            let eb: Vec<(usize, u8)> = b.l_nbrs_of_r[r].iter().map(|e| (e.index, e.ce)).collect();
            assert_eq!(ea, eb);
        }
    }

    #[test]
    fn binary_edges_carry_unit_coefficients() {
        let mut rng = CodingRng::new(5);
        let g = BipartiteGraph::new(30, 5, true, false, &mut rng);
        for r in 0..5 {
            assert!(g.l_nbrs_of_r[r].iter().all(|e| e.ce == 1));
        }
    }
}
