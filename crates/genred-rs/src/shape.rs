//! Batch-dimension broadcasting checks.
//!
//! Reductions accept batched inputs whose leading dimensions must broadcast
//! under NumPy rules:
//!   1. The shorter shape is left-padded with 1s.
//!   2. Aligned dimensions are compatible if they are equal or one of them is 1.
//!   3. The merged dimension is the larger of the two.
//!
//! Examples:
//!   (1, 5) and (3, 5) → (3, 5)
//!   (5,)   and (3, 5) → (3, 5)
//!   (3, 4) and (2, 4) → error

use thiserror::Error;

/// Two batch shapes that cannot be broadcast together. Both shapes are kept
/// as given by the caller, before padding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("incompatible batch dimensions: {left:?} and {right:?}")]
pub struct IncompatibleShape {
    pub left: Vec<usize>,
    pub right: Vec<usize>,
}

/// Merges two optional batch shapes. `None` means "no constraint" and is the
/// identity: the other operand is returned unchanged.
pub fn merge_shapes(
    dims_1: Option<&[usize]>,
    dims_2: Option<&[usize]>,
) -> Result<Option<Vec<usize>>, IncompatibleShape> {
    match (dims_1, dims_2) {
        (None, other) | (other, None) => Ok(other.map(<[usize]>::to_vec)),
        (Some(left), Some(right)) => broadcast(left, right).map(Some),
    }
}

fn broadcast(left: &[usize], right: &[usize]) -> Result<Vec<usize>, IncompatibleShape> {
    let rank = left.len().max(right.len());
    let padded_left = padded(left, rank);
    let padded_right = padded(right, rank);

    padded_left
        .zip(padded_right)
        .map(|(l, r)| {
            if l == r || l == 1 || r == 1 {
                Ok(l.max(r))
            } else {
                Err(IncompatibleShape {
                    left: left.to_vec(),
                    right: right.to_vec(),
                })
            }
        })
        .collect()
}

fn padded(dims: &[usize], rank: usize) -> impl Iterator<Item = usize> + '_ {
    std::iter::repeat(1)
        .take(rank - dims.len())
        .chain(dims.iter().copied())
}

/// Folds [`merge_shapes`] over any number of optional shapes.
pub fn merge_all<'a, I>(shapes: I) -> Result<Option<Vec<usize>>, IncompatibleShape>
where
    I: IntoIterator<Item = Option<&'a [usize]>>,
{
    shapes.into_iter().try_fold(None, |acc: Option<Vec<usize>>, next| {
        merge_shapes(acc.as_deref(), next)
    })
}

/// Number of elements in a dense tensor of shape `dims`, or `None` when it
/// does not fit in `usize`.
pub fn checked_element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |count, &dim| count.checked_mul(dim))
}
