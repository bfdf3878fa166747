//! Idempotency guard
//!
//! Controllers re-apply objects constantly. A reference whose host already is
//! the mirror host was rewritten by an earlier admission (or points at the
//! mirror on purpose) and must not be rewritten again. The provenance label
//! plays no part in this decision.

use kube::core::admission::Operation;
use zarf_transform::hosts_match;

/// Whether `current` still needs to be rewritten onto `mirror_host`
pub fn should_mutate(operation: &Operation, current: &str, mirror_host: &str) -> bool {
    match operation {
        Operation::Create => true,
        Operation::Update => !hosts_match(current, mirror_host),
        _ => false,
    }
}
