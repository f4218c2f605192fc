//! Conversion policy: a bitmask of independent allowances checked by the
//! conversion engine. Policies are monotone: anything that succeeds under a
//! policy succeeds identically under any superset.

use bitflags::bitflags;

bitflags! {
    /// Allowances for the conversion engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Policy: u32 {
        /// Numeric ↔ boolean (nonzero becomes true).
        const BOOL = 1 << 0;
        /// Widening among integer widths (`c` → `i` → `I`).
        const INTS = 1 << 1;
        /// Narrowing among integer widths, with a range check against the
        /// source value.
        const INTS_NARROWING = 1 << 2;
        /// Integer ↔ double, and boolean → double.
        const DOUBLE = 1 << 3;
        /// Wrapping into and unwrapping out of `a`.
        const ANY = 1 << 4;
        /// Decaying `expected` wrappers: `x`T → T, `x`T ↔ `X`.
        const EXPECTED = 1 << 5;
        /// Auxiliary unwraps: `o`T → T when present (absent yields the
        /// target default).
        const AUX = 1 << 6;
    }
}

impl Policy {
    /// No allowances; only identity conversions succeed.
    pub const NONE: Policy = Policy::empty();
    /// Every allowance.
    pub const ALL: Policy = Policy::all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_the_union_of_every_flag() {
        let union = Policy::BOOL
            | Policy::INTS
            | Policy::INTS_NARROWING
            | Policy::DOUBLE
            | Policy::ANY
            | Policy::EXPECTED
            | Policy::AUX;
        assert_eq!(union, Policy::ALL);
        assert!(Policy::NONE.is_empty());
    }
}
