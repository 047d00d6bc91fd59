//! Block subsidy schedule.

use crate::money::{Amount, COIN};
use crate::params::ConsensusParams;

/// Coinbase value created at `height`, excluding fees.
///
/// Genesis creates nothing. Below the flat-end height every block pays the
/// base amount; from there the payout follows the harmonic taper
/// `round(base * flat_end / (height + 1))`, evaluated in exact integer
/// arithmetic, until it ends entirely at the terminal height.
pub fn block_subsidy(height: i32, params: &ConsensusParams) -> Amount {
    if height <= 0 {
        return 0;
    }
    if height > params.subsidy_terminal_height {
        return 0;
    }
    if height < params.subsidy_flat_end_height {
        return params.subsidy_base * COIN;
    }
    let divisor = i64::from(height) + 1;
    let scaled = params.subsidy_base * i64::from(params.subsidy_flat_end_height);
    ((scaled + divisor / 2) / divisor) * COIN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{chain_params, Network};

    #[test]
    fn genesis_pays_nothing() {
        let params = chain_params(Network::Mainnet);
        assert_eq!(block_subsidy(0, &params), 0);
    }

    #[test]
    fn flat_region() {
        let params = chain_params(Network::Mainnet);
        assert_eq!(block_subsidy(1, &params), 5_000 * COIN);
        assert_eq!(block_subsidy(90_000, &params), 5_000 * COIN);
        assert_eq!(block_subsidy(143_499, &params), 5_000 * COIN);
    }

    // Vectors below were captured from the reference daemon's floating-point
    // expression `floor(0.5 + 5000.0 * 143500.0 / (height + 1))`.
    #[test]
    fn taper_vectors() {
        let params = chain_params(Network::Mainnet);
        assert_eq!(block_subsidy(143_500, &params), 5_000 * COIN);
        assert_eq!(block_subsidy(200_000, &params), 3_587 * COIN);
        assert_eq!(block_subsidy(287_001, &params), 2_500 * COIN);
        assert_eq!(block_subsidy(717_499, &params), 1_000 * COIN);
        assert_eq!(block_subsidy(1_434_999, &params), 500 * COIN);
    }

    #[test]
    fn taper_is_monotone_non_increasing() {
        let params = chain_params(Network::Mainnet);
        let mut last = block_subsidy(143_500, &params);
        for height in (143_501..500_000).step_by(9_973) {
            let subsidy = block_subsidy(height, &params);
            assert!(subsidy <= last, "subsidy rose at height {height}");
            last = subsidy;
        }
    }

    #[test]
    fn terminal_height_cuts_to_zero() {
        let params = chain_params(Network::Mainnet);
        assert!(block_subsidy(params.subsidy_terminal_height, &params) >= 0);
        assert_eq!(block_subsidy(params.subsidy_terminal_height + 1, &params), 0);
    }
}
