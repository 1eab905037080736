use crate::BlockId;
use uint::construct_uint;

construct_uint! {
    /// Little-endian 256-bit unsigned integer.
    pub struct Uint256(4);
}

/// A proof-of-work difficulty bound. A block id, read as a big-endian
/// 256-bit number, must not exceed the target of the block's slot.
///
/// Smaller targets are harder. The work of a target is the expected number
/// of hash attempts needed to meet it, and chain depth is the sum of the
/// work of every block on the chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Target(pub Uint256);

impl Target {
    /// The easiest possible target.
    pub fn max() -> Self {
        Target(Uint256::MAX)
    }

    pub fn from_uint(value: Uint256) -> Self {
        Target(value)
    }

    pub fn is_met_by(&self, id: BlockId) -> bool {
        Uint256::from_big_endian(&id.as_bytes()) <= self.0
    }

    /// The inverse of the target: expected hash attempts per block,
    /// `floor(2^256 - 1 / (target + 1)) + 1`.
    pub fn work(&self) -> Uint256 {
        if self.0 == Uint256::MAX {
            return Uint256::one();
        }
        Uint256::MAX / (self.0 + Uint256::one()) + Uint256::one()
    }

    /// Scales the target by `numerator / denominator`, saturating at the
    /// maximum. Used for retargeting with small clamped ratios, so the
    /// remainder term never overflows.
    pub fn scale(&self, numerator: u64, denominator: u64) -> Target {
        assert!(denominator != 0);
        let num = Uint256::from(numerator);
        let den = Uint256::from(denominator);
        let quotient = self.0 / den;
        let remainder = self.0 % den;
        let scaled = quotient.saturating_mul(num).saturating_add(remainder * num / den);
        Target(scaled)
    }
}
