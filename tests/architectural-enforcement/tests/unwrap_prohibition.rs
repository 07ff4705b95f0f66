//! Integration Test: Panic-Free Production Code
//!
//! **Policy**: Production code propagates errors with `?` and typed errors.
//! `unwrap()` and `expect(..)` are for tests only.

use architectural_enforcement::scan;

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = scan(|_, code| code.contains(".unwrap()") || code.contains(".expect("));

    if !violations.is_empty() {
        eprintln!("\n❌ unwrap/expect found in production code:\n");
        for v in &violations {
            eprintln!("  ❌ {v}");
        }
        panic!("Found {} unwrap/expect call(s)", violations.len());
    }
}
