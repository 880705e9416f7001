//! Associative scan shared by the parallel LG-SSM and HMM passes

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::errors::Result;

/// Evaluate `f` at `0..n`, on the thread pool when `rayon` is enabled
pub(crate) fn map_indices<T, F>(n: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        (0..n).into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..n).map(f).collect()
    }
}

/// Hillis-Steele inclusive scan
///
/// Forward: element `i` becomes `e_0 ∘ … ∘ e_i`. Reverse: element `i` becomes
/// `e_i ∘ … ∘ e_{n-1}`. `op(earlier, later)` must be associative.
pub(crate) fn inclusive_scan<T, F>(mut elems: Vec<T>, op: F, reverse: bool) -> Result<Vec<T>>
where
    T: Clone + Send + Sync,
    F: Fn(&T, &T) -> Result<T> + Sync + Send,
{
    let n = elems.len();
    let mut offset = 1;
    while offset < n {
        let prev = elems;
        elems = map_indices(n, |i| {
            if reverse {
                match prev.get(i + offset) {
                    Some(later) => op(&prev[i], later),
                    None => Ok(prev[i].clone()),
                }
            } else if i >= offset {
                op(&prev[i - offset], &prev[i])
            } else {
                Ok(prev[i].clone())
            }
        })?;
        offset *= 2;
    }
    Ok(elems)
}
