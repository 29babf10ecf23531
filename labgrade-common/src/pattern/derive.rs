//! Post-match assertions over captured values.
//!
//! The pattern language only captures values; relationships between them are
//! checked here, after matching, so a failing relationship reports both
//! numbers instead of a bare "pattern not found".

use crate::errors::{GradeError, GradeResult};

/// Parse a captured `0x`-prefixed hexadecimal token.
pub fn parse_hex(token: &str) -> GradeResult<u64> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16)
        .map_err(|e| GradeError::assertion(format!("'{token}' is not a hex value: {e}")))
}

/// `target == (source >> right) << left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftRelation {
    pub right: u32,
    pub left: u32,
}

/// RISC-V Sv39: a PTE holds the physical page number above 10 flag bits;
/// pages are 4096 bytes.
pub const PTE_TO_PA: ShiftRelation = ShiftRelation {
    right: 10,
    left: 12,
};

impl ShiftRelation {
    pub fn apply(&self, source: u64) -> u64 {
        source
            .checked_shr(self.right)
            .unwrap_or(0)
            .checked_shl(self.left)
            .unwrap_or(0)
    }

    /// Check the relation between two captured hex tokens.
    pub fn check(&self, source: &str, target: &str) -> GradeResult<()> {
        let src = parse_hex(source)?;
        let dst = parse_hex(target)?;
        let expected = self.apply(src);
        if dst == expected {
            Ok(())
        } else {
            Err(GradeError::assertion(format!(
                "{target} != ({source} >> {}) << {}: got {dst:#018x}, expected {expected:#018x}",
                self.right, self.left
            )))
        }
    }
}

/// Check that a captured `pa` is the page address encoded in `pte`.
pub fn check_pte_pa(pte: &str, pa: &str) -> GradeResult<()> {
    PTE_TO_PA.check(pte, pa)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x0000000021fda801").unwrap(), 0x21fd_a801);
        assert_eq!(parse_hex("ff").unwrap(), 255);
        assert!(matches!(
            parse_hex("0xzz"),
            Err(GradeError::AssertionFailure(_))
        ));
    }

    #[test]
    fn test_pte_pa_passing_fixture() {
        check_pte_pa("0x0000000021fda801", "0x0000000087f6a000").unwrap();
    }

    #[test]
    fn test_pte_pa_failing_fixture() {
        let err = check_pte_pa("0x0000000021fda801", "0x0000000087f6a001").unwrap_err();
        match err {
            GradeError::AssertionFailure(msg) => {
                assert!(msg.contains("0x0000000087f6a001"));
                assert!(msg.contains("0x0000000087f6a000"));
            }
            other => panic!("expected AssertionFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_all_lab_fixture_rows_satisfy_relation() {
        let rows = [
            ("0x0000000021fda401", "0x0000000087f69000"),
            ("0x0000000021fdac1f", "0x0000000087f6b000"),
            ("0x0000000021fda00f", "0x0000000087f68000"),
            ("0x0000000021fd9c1f", "0x0000000087f67000"),
            ("0x0000000021fdb401", "0x0000000087f6d000"),
            ("0x0000000021fdb001", "0x0000000087f6c000"),
            ("0x0000000021fdd807", "0x0000000087f76000"),
            ("0x000000002000200b", "0x0000000080008000"),
        ];
        for (pte, pa) in rows {
            check_pte_pa(pte, pa).unwrap();
        }
    }

    #[test]
    fn test_oversized_shift_saturates_to_zero() {
        let rel = ShiftRelation {
            right: 64,
            left: 0,
        };
        assert_eq!(rel.apply(u64::MAX), 0);
    }
}
