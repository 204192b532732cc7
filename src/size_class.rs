//! Size-class partitioning: the pure mapping between a requested byte count
//! and a bucket index, and its inverse.
//!
//! Exactly one scheme is compiled in. Piecewise-linear is the default; the
//! `linear-partitioning` and `float-partitioning` features select the other
//! two. Enabling more than one is a compile error.

#[cfg(all(feature = "linear-partitioning", feature = "float-partitioning"))]
compile_error!("only one of `linear-partitioning` / `float-partitioning` may be enabled");

/// Upper bound on the number of size classes a single allocator can have.
pub const MAX_BUCKET_COUNT: usize = 62;

/// Minimum alignment every slot size is guaranteed to be a multiple of.
pub const MIN_VALID_ALIGNMENT: usize = 4;

/// Maps a positive byte count to a bucket index.
///
/// `n` must be nonzero; the facade never calls this with `n == 0` (zero-size
/// requests are poisoned before reaching the size-class table).
#[inline]
pub const fn idx(n: usize) -> usize {
    debug_assert!(n > 0);

    cfg_if::cfg_if! {
        if #[cfg(feature = "linear-partitioning")] {
            (n - 1) >> 4
        } else if #[cfg(feature = "float-partitioning")] {
            float::idx(n)
        } else {
            let size = n - 1;
            let p0 = size >> 4;
            let p1 = 7 + (size >> 7);
            let p2 = 13 + (size >> 9);
            if size <= 127 {
                p0
            } else if size > 1023 {
                p2
            } else {
                p1
            }
        }
    }
}

/// Maps a bucket index back to its slot size in bytes. Defined for every `i`
/// in `[0, MAX_BUCKET_COUNT)`.
#[inline]
pub const fn size(i: usize) -> usize {
    cfg_if::cfg_if! {
        if #[cfg(feature = "linear-partitioning")] {
            16 * (i + 1)
        } else if #[cfg(feature = "float-partitioning")] {
            float::size(i)
        } else {
            if i <= 7 {
                (i + 1) << 4
            } else if i > 14 {
                (i - 12) << 9
            } else {
                (i - 6) << 7
            }
        }
    }
}

/// Scans forward from `i` for the next bucket index whose slot size is a
/// multiple of `align`, bounded by `bucket_count`. Returns `bucket_count` if
/// none is found.
#[inline]
pub fn next_aligned(mut i: usize, align: usize, bucket_count: usize) -> usize {
    while i < bucket_count && size(i) % align != 0 {
        i += 1;
    }
    i
}

#[cfg(feature = "float-partitioning")]
mod float {
    //! 2-bit mantissa / 6-bit exponent floating-point partitioning, biased so
    //! that index 0 is 16 bytes.

    const MANTISSA_BITS: u32 = 2;
    const MANTISSA_VALUE: u32 = 1 << MANTISSA_BITS;
    const MANTISSA_MASK: u32 = MANTISSA_VALUE - 1;
    const BIAS: u32 = 12;

    #[inline]
    const fn uint_to_float_round_up(size: u32) -> u32 {
        if size < MANTISSA_VALUE {
            return size;
        }
        let highest_set_bit = 31 - size.leading_zeros();
        let mantissa_start_bit = highest_set_bit - MANTISSA_BITS;
        let exp = mantissa_start_bit + 1;
        let mut mantissa = (size >> mantissa_start_bit) & MANTISSA_MASK;
        let low_bits_mask = (1u32 << mantissa_start_bit) - 1;
        if size & low_bits_mask != 0 {
            mantissa += 1;
        }
        (exp << MANTISSA_BITS) + mantissa
    }

    #[inline]
    const fn float_to_uint(float_value: u32) -> u32 {
        let exponent = float_value >> MANTISSA_BITS;
        let mantissa = float_value & MANTISSA_MASK;
        if exponent == 0 {
            mantissa
        } else {
            (mantissa | MANTISSA_VALUE) << (exponent - 1)
        }
    }

    pub(super) const fn idx(n: usize) -> usize {
        debug_assert!(n < u32::MAX as usize);
        let raw = uint_to_float_round_up(n as u32);
        (if raw < BIAS { 0 } else { raw - BIAS }) as usize
    }

    pub(super) const fn size(i: usize) -> usize {
        float_to_uint(i as u32 + BIAS) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_non_decreasing_and_aligned() {
        let mut prev = 0;
        for i in 0..MAX_BUCKET_COUNT {
            let s = size(i);
            assert!(s >= prev, "size({i}) = {s} regressed below {prev}");
            assert_eq!(s % MIN_VALID_ALIGNMENT, 0, "size({i}) = {s} not 4-byte aligned");
            prev = s;
        }
    }

    #[test]
    fn idx_satisfies_size_lower_bound() {
        for n in 1..=size(MAX_BUCKET_COUNT - 1) {
            let i = idx(n);
            if i < MAX_BUCKET_COUNT {
                assert!(size(i) >= n, "size(idx({n})) = {} < {n}", size(i));
            }
        }
    }

    #[test]
    fn idx_is_non_decreasing() {
        let mut prev = idx(1);
        for n in 2..4096usize {
            let cur = idx(n);
            assert!(cur >= prev, "idx({n}) = {cur} regressed below idx({}) = {prev}", n - 1);
            prev = cur;
        }
    }

    #[test]
    fn first_class_is_16_bytes() {
        assert_eq!(size(0), 16);
    }

    #[test]
    fn next_aligned_scans_forward() {
        assert_eq!(next_aligned(0, 4, MAX_BUCKET_COUNT), 0);
        let wide = next_aligned(0, 4096, MAX_BUCKET_COUNT);
        assert!(wide <= MAX_BUCKET_COUNT);
    }
}
