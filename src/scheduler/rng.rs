//! Victim selection RNG.
//!
//! XorShift64 with Lemire's multiply-shift bounded sampling. Picking one of
//! a handful of workers needs neither quality nor cryptographic strength,
//! but it must be cheap and reproducible from a seed.

/// Per-worker generator. Deliberately not `Copy`: a copy would duplicate the
/// stream and make two workers pick the same victims.
#[derive(Clone, Debug)]
pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Zero is the one state XorShift never leaves; it is remapped.
    pub(crate) fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed };
        Self { state: seed }
    }

    /// Stream for worker `index`, derived from the scheduler seed.
    pub(crate) fn for_worker(seed: u64, index: usize) -> Self {
        Self::new(seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform value in `[0, upper)`.
    pub(crate) fn next_usize(&mut self, upper: usize) -> usize {
        debug_assert!(upper > 0, "XorShift64::next_usize: empty range");
        if upper.is_power_of_two() {
            return (self.next_u64() >> 32) as usize & (upper - 1);
        }
        let upper = upper as u64;
        // 2^64 mod upper: products whose low half falls below are biased.
        let threshold = upper.wrapping_neg() % upper;
        loop {
            let m = u128::from(self.next_u64()) * u128::from(upper);
            if m as u64 >= threshold {
                return (m >> 64) as usize;
            }
        }
    }
}
