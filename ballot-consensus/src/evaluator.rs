//! BFT threshold arithmetic.

/// Smallest committee that tolerates one faulty member (`3f+1`, `f = 1`).
pub const MIN_COMMITTEE_SIZE: usize = 4;

/// Faulty members tolerated by a committee of `n`.
pub fn fault_tolerance(n: usize) -> usize {
    n / 3
}

/// Signatures needed to move a phase forward: more than two thirds of the
/// committee, `floor(2n/3) + 1`. Any two quorums overlap in more than `f`
/// members.
pub fn bft_quorum(n: usize) -> usize {
    if n == 0 {
        return 1;
    }
    (n * 2 / 3 + 1).min(n)
}
