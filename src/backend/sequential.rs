use crate::segment::{Index, Segment};

/// Visit every index of `segment` in increasing order.
#[inline]
pub fn for_range<F>(segment: Segment, mut f: F)
where
    F: FnMut(Index),
{
    for index in segment.range() {
        f(index);
    }
}
