//! Provides distance calculations over vector slices.

use crate::numbers::FromAs;

const UNROLL: usize = 16;

/// Distance function over two vectors.
///
/// The engine only requires the result to be non-negative and totally
/// ordered; `A` and `B` may differ so that, e.g., `u8` vectors can be
/// compared against `f32` centroids.
pub trait Distance<A, B = A> {
    /// Calculates the distance between two vectors of the same length.
    fn distance(&self, xs: &[A], ys: &[B]) -> f32;
}

/// Squared Euclidean distance (L2²).
#[derive(Clone, Copy, Debug, Default)]
pub struct SquaredL2;

impl<A, B> Distance<A, B> for SquaredL2
where
    A: Copy,
    B: Copy,
    f32: FromAs<A> + FromAs<B>,
{
    fn distance(&self, xs: &[A], ys: &[B]) -> f32 {
        squared_distance(xs, ys)
    }
}

/// Calculates the squared Euclidean distance of given two vectors.
///
/// Unrolls loops to facilitate vectorization.
pub fn squared_distance<A, B>(xs: &[A], ys: &[B]) -> f32
where
    A: Copy,
    B: Copy,
    f32: FromAs<A> + FromAs<B>,
{
    assert_eq!(xs.len(), ys.len());
    const C: usize = UNROLL;
    if xs.len() < C {
        return squared_distance_naive(xs, ys);
    }
    let mut acc = [0.0f32; C];
    let r = xs.len() % C;
    if r != 0 {
        for i in 0..r {
            let d = f32::from_as(xs[i]) - f32::from_as(ys[i]);
            acc[i] = d * d;
        }
    }
    let xs = &xs[r..];
    let ys = &ys[r..];
    let mut i = 0;
    while i + C <= xs.len() {
        let xs = &xs[i..i + C];
        let ys = &ys[i..i + C];
        for j in 0..C {
            let d = f32::from_as(xs[j]) - f32::from_as(ys[j]);
            acc[j] += d * d;
        }
        i += C;
    }
    sum_naive(&acc[..])
}

/// Calculates the squared Euclidean distance of given two vectors.
pub fn squared_distance_naive<A, B>(xs: &[A], ys: &[B]) -> f32
where
    A: Copy,
    B: Copy,
    f32: FromAs<A> + FromAs<B>,
{
    assert_eq!(xs.len(), ys.len());
    let mut ans = 0.0f32;
    for i in 0..xs.len() {
        let d = f32::from_as(xs[i]) - f32::from_as(ys[i]);
        ans += d * d;
    }
    ans
}

// Sums all the elements in a given vector.
fn sum_naive(xs: &[f32]) -> f32 {
    let mut ans = 0.0f32;
    for x in xs {
        ans += *x;
    }
    ans
}
