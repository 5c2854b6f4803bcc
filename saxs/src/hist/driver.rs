//! The shared pair-evaluation driver behind all histogram builders.
//!
//! Atoms are partitioned into job blocks; each worker owns a thread-local
//! sink, walks its assigned block rows with the batched kernel and the
//! per-row sinks are reduced by summation in block order afterwards. The
//! reduction topology is fixed, so the result is bit-identical across runs
//! and independent of how the pool schedules the rows.

use super::compact::CompactCoordinates;
use crate::threads;
use rayon::prelude::*;

/// Number of atoms per job block.
pub(crate) const JOB_BLOCK_SIZE: usize = 8192;

/// A consumer of pair evaluations.
///
/// For self runs, `add` is called once per unordered pair `i < j`; for cross
/// runs, once per combination. The sink decides how a pair is counted (the
/// self categories use ordered counting and double each pair; the cross
/// categories count each combination once).
pub(crate) trait PairSink: Send {
    /// Consumes one pair: type indices, distance, weight product and the two
    /// individual weights.
    fn add(&mut self, ti: u8, tj: u8, distance: f32, wij: f32, wi: f32, wj: f32);

    /// Folds another sink into this one.
    fn merge(&mut self, other: Self);
}

fn blocks(n: usize) -> Vec<std::ops::Range<usize>> {
    (0..n.div_ceil(JOB_BLOCK_SIZE))
        .map(|b| b * JOB_BLOCK_SIZE..((b + 1) * JOB_BLOCK_SIZE).min(n))
        .collect()
}

#[inline]
fn evaluate_targets<S: PairSink>(
    sink: &mut S,
    coords: &CompactCoordinates,
    i: usize,
    targets: std::ops::Range<usize>,
) {
    let data = coords.data();
    let types = coords.types();
    let ci = data[i];
    let ti = types[i];

    let target_data = &data[targets.clone()];
    let target_types = &types[targets];

    let mut offset = 0;
    let mut chunks8 = target_data.chunks_exact(8);
    for chunk in &mut chunks8 {
        let batch = chunk.try_into().expect("chunk size is 8");
        let r = ci.evaluate8(batch);
        for k in 0..8 {
            sink.add(
                ti,
                target_types[offset + k],
                r.distances[k],
                r.weights[k],
                ci.w,
                chunk[k].w,
            );
        }
        offset += 8;
    }
    let remainder = chunks8.remainder();
    let mut chunks4 = remainder.chunks_exact(4);
    for chunk in &mut chunks4 {
        let batch = chunk.try_into().expect("chunk size is 4");
        let r = ci.evaluate4(batch);
        for k in 0..4 {
            sink.add(
                ti,
                target_types[offset + k],
                r.distances[k],
                r.weights[k],
                ci.w,
                chunk[k].w,
            );
        }
        offset += 4;
    }
    for (k, cj) in chunks4.remainder().iter().enumerate() {
        let r = ci.evaluate(cj);
        sink.add(ti, target_types[offset + k], r.distance, r.weight, ci.w, cj.w);
    }
}

/// Evaluates all unordered pairs `i < j` within `coords`.
///
/// The bin-0 self-correlation terms are *not* included; the managers add
/// them once from the summed squared weights.
pub(crate) fn accumulate_self<S, F>(coords: &CompactCoordinates, make: F) -> S
where
    S: PairSink,
    F: Fn() -> S + Sync,
{
    let blocks = blocks(coords.len());
    let rows: Vec<_> = threads::pool().install(|| {
        (0..blocks.len())
            .into_par_iter()
            .map(|jb| {
                let mut sink = make();
                for kb in jb..blocks.len() {
                    for i in blocks[jb].clone() {
                        let start = if jb == kb { i + 1 } else { blocks[kb].start };
                        evaluate_targets(&mut sink, coords, i, start..blocks[kb].end);
                    }
                }
                sink
            })
            .collect()
    });

    let mut total = make();
    for row in rows {
        total.merge(row);
    }
    total
}

/// Evaluates every combination between `a` and `b`, each exactly once.
pub(crate) fn accumulate_cross<S, F>(a: &CompactCoordinates, b: &CompactCoordinates, make: F) -> S
where
    S: PairSink,
    F: Fn() -> S + Sync,
{
    let a_blocks = blocks(a.len());
    let rows: Vec<_> = threads::pool().install(|| {
        (0..a_blocks.len())
            .into_par_iter()
            .map(|jb| {
                let mut sink = make();
                for i in a_blocks[jb].clone() {
                    let ci = a.data()[i];
                    let ti = a.types()[i];
                    let data = b.data();
                    let types = b.types();

                    let mut offset = 0;
                    let mut chunks8 = data.chunks_exact(8);
                    for chunk in &mut chunks8 {
                        let batch = chunk.try_into().expect("chunk size is 8");
                        let r = ci.evaluate8(batch);
                        for k in 0..8 {
                            sink.add(
                                ti,
                                types[offset + k],
                                r.distances[k],
                                r.weights[k],
                                ci.w,
                                chunk[k].w,
                            );
                        }
                        offset += 8;
                    }
                    for (k, cj) in chunks8.remainder().iter().enumerate() {
                        let r = ci.evaluate(cj);
                        sink.add(ti, types[offset + k], r.distance, r.weight, ci.w, cj.w);
                    }
                }
                sink
            })
            .collect()
    });

    let mut total = make();
    for row in rows {
        total.merge(row);
    }
    total
}

/// A sink accumulating into a single one-dimensional distribution.
#[derive(Clone, Debug)]
pub(crate) struct ScalarSink<E: super::distribution::BinEntry> {
    /// The accumulated distribution.
    pub p: super::distribution::Distribution1D<E>,
    factor: f64,
}

impl<E: super::distribution::BinEntry> ScalarSink<E> {
    /// A sink that doubles every pair: ordered counting for the
    /// self categories (aa, ww).
    pub fn doubled(bins: usize, bin_width: f64) -> Self {
        Self {
            p: super::distribution::Distribution1D::new(bins, bin_width),
            factor: 2.0,
        }
    }

    /// A sink that counts each combination once: the cross categories.
    pub fn single(bins: usize, bin_width: f64) -> Self {
        Self {
            p: super::distribution::Distribution1D::new(bins, bin_width),
            factor: 1.0,
        }
    }
}

impl<E: super::distribution::BinEntry> PairSink for ScalarSink<E> {
    #[inline]
    fn add(&mut self, _ti: u8, _tj: u8, distance: f32, wij: f32, _wi: f32, _wj: f32) {
        self.p.add(distance, self.factor * f64::from(wij));
    }

    fn merge(&mut self, other: Self) {
        self.p.merge(&other.p);
    }
}
