//! An adjacency-list link configured to mirror a locally connected link
//! must compute the same weighted sums from either end, and keep doing so
//! through edit cycles and defragmentation.

use std::collections::HashMap;

use lattice_rs::link::{AdjacencyLink, LinkEnd, LinkShape, Local2dLink, SharedEdgeData};

const TOLERANCE: f32 = 1e-3;

struct Mirror {
    local2d: Local2dLink,
    adjacency: AdjacencyLink,
    /// weight per (end 0 node, end 1 node) pair
    weight_by_pair: HashMap<(usize, usize), f32>,
    adj_weights: SharedEdgeData<f32>,
    n0: usize,
    n1: usize,
}

fn rng_next(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((*state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
}

impl Mirror {
    /// Local 2D link with stride 2, atrous 2, 3x3 filter over an 8x8
    /// plane, plus an adjacency link holding a deliberately wrong initial
    /// edge set that `reconcile` fixes up.
    fn new() -> Mirror {
        let mut local2d = Local2dLink::with_params(-2, -2, 3, 3, 2, 2, 2, 2);
        local2d.set_dimensions(&[8, 8], &[4, 4]);
        let (n0, n1) = (64, 16);

        let mut weight_by_pair = HashMap::new();
        let mut seed = 0x5eed_1234u64;
        let max = local2d.max_progress(LinkEnd::Zero);
        local2d.for_each_edge(
            LinkEnd::Zero,
            |e| {
                let w = rng_next(&mut seed);
                assert!(
                    weight_by_pair.insert((e.near_node, e.far_node), w).is_none(),
                    "geometry must connect each node pair at most once"
                );
            },
            0,
            max,
        );

        let mut adjacency = AdjacencyLink::new();
        adjacency.set_dimensions(&[n0], &[n1]);
        let adj_weights = SharedEdgeData::<f32>::new();
        adjacency.attach_edge_data(
            Box::new(adj_weights.clone()),
            Box::new(SharedEdgeData::<f32>::new()),
        );
        // decoy edges, most of them wrong
        let decoys: Vec<(usize, usize)> = (0..n1).map(|i| (i * 3 % n0, i)).collect();
        adjacency.insert_edges(&decoys).unwrap();

        let mut mirror = Mirror {
            local2d,
            adjacency,
            weight_by_pair,
            adj_weights,
            n0,
            n1,
        };
        mirror.reconcile();
        mirror
    }

    /// Make the adjacency link hold exactly the local-2D edge set, then
    /// write the matching weight into each edge's data slot.
    fn reconcile(&mut self) {
        let mut current: Vec<(usize, usize)> = Vec::new();
        let max = self.adjacency.max_progress(LinkEnd::Zero);
        self.adjacency.for_each_edge(
            LinkEnd::Zero,
            |e| current.push((e.near_node, e.far_node)),
            0,
            max,
        );

        let stale: Vec<(usize, usize)> = current
            .iter()
            .copied()
            .filter(|pair| !self.weight_by_pair.contains_key(pair))
            .collect();
        let missing: Vec<(usize, usize)> = self
            .weight_by_pair
            .keys()
            .copied()
            .filter(|pair| !current.contains(pair))
            .collect();

        self.adjacency.remove_edges(&stale).unwrap();
        self.adjacency.insert_edges(&missing).unwrap();
        self.sync_weights();
    }

    /// Rewrite every adjacency edge's weight from the pair map.
    fn sync_weights(&mut self) {
        let mut slots: Vec<(usize, f32)> = Vec::new();
        let max = self.adjacency.max_progress(LinkEnd::Zero);
        self.adjacency.for_each_edge(
            LinkEnd::Zero,
            |e| {
                let w = self.weight_by_pair[&(e.near_node, e.far_node)];
                slots.push((e.near_edge, w));
            },
            0,
            max,
        );
        self.adj_weights.with(|v| {
            for (ix, w) in slots {
                v[ix] = w;
            }
        });
    }

    /// Weighted sum toward `which_end` for both links; panics when they
    /// disagree beyond tolerance.
    fn assert_outputs_match(&self, which_end: LinkEnd) {
        let (out_len, in_len) = match which_end {
            LinkEnd::Zero => (self.n0, self.n1),
            LinkEnd::One => (self.n1, self.n0),
        };
        let input: Vec<f32> = (0..in_len).map(|i| (i % 7) as f32 - 3.0).collect();

        let mut expected = vec![0.0f32; out_len];
        let max = self.local2d.max_progress(which_end);
        self.local2d.for_each_edge(
            which_end,
            |e| {
                let w = self.weight_by_pair[&match which_end {
                    LinkEnd::Zero => (e.near_node, e.far_node),
                    LinkEnd::One => (e.far_node, e.near_node),
                }];
                expected[e.near_node] += w * input[e.far_node];
            },
            0,
            max,
        );

        let weights = self.adj_weights.snapshot();
        let mut actual = vec![0.0f32; out_len];
        let max = self.adjacency.max_progress(which_end);
        self.adjacency.for_each_edge(
            which_end,
            |e| actual[e.near_node] += weights[e.near_edge] * input[e.far_node],
            0,
            max,
        );

        for (node, (a, b)) in expected.iter().zip(&actual).enumerate() {
            assert!(
                (a - b).abs() < TOLERANCE,
                "node {node}: local2d {a} vs adjacency {b} toward end {}",
                which_end.index()
            );
        }
    }
}

#[test]
fn mirrored_adjacency_matches_local2d_from_both_ends() {
    let mirror = Mirror::new();
    assert_eq!(
        mirror.adjacency.max_progress(LinkEnd::Zero),
        mirror.local2d.max_progress(LinkEnd::Zero),
        "edge counts must agree after reconciliation"
    );
    mirror.assert_outputs_match(LinkEnd::Zero);
    mirror.assert_outputs_match(LinkEnd::One);
}

#[test]
fn equivalence_survives_defragmentation() {
    let mut mirror = Mirror::new();
    // punch holes, then compact; data must travel with the renumbering
    let victims: Vec<(usize, usize)> = mirror
        .weight_by_pair
        .keys()
        .copied()
        .filter(|&(a, b)| (a + b) % 5 == 0)
        .collect();
    mirror.adjacency.remove_edges(&victims).unwrap();
    mirror.adjacency.defragment_edges();

    // restore the removed edges and their weights
    mirror.reconcile();
    mirror.assert_outputs_match(LinkEnd::Zero);
    mirror.assert_outputs_match(LinkEnd::One);

    // a second compaction with nothing removed must change nothing
    mirror.adjacency.defragment_edges();
    mirror.assert_outputs_match(LinkEnd::Zero);
    mirror.assert_outputs_match(LinkEnd::One);
}

#[test]
fn equivalence_survives_edit_cycles() {
    let mut mirror = Mirror::new();
    for round in 0..3 {
        let churn: Vec<(usize, usize)> = mirror
            .weight_by_pair
            .keys()
            .copied()
            .filter(|&(a, _)| a % 4 == round)
            .collect();
        mirror.adjacency.remove_edges(&churn).unwrap();
        if round == 1 {
            mirror.adjacency.defragment_edges();
        }
        mirror.reconcile();
        mirror.assert_outputs_match(LinkEnd::Zero);
        mirror.assert_outputs_match(LinkEnd::One);
    }
}
