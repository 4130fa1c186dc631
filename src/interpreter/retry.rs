//! Retry policy evaluation

use crate::error::ShowRunError;
use crate::pack::flow::RetryPolicy;

/// Whether `error` qualifies for another attempt under `policy`, given how
/// many retry attempts have already been consumed.
#[must_use]
pub fn should_retry(policy: &RetryPolicy, error: &ShowRunError, attempts_used: u32) -> bool {
    if attempts_used >= policy.times {
        return false;
    }
    match &policy.only_on {
        None => true,
        Some(kinds) => kinds.iter().any(|k| {
            k.parse::<crate::error::ErrorKind>()
                .is_ok_and(|kind| kind == error.kind())
        }),
    }
}
