//! Flow computation.
//!
//! A flow groups requests that should share a fair queue (a tenant, a user,
//! a client). Callers pick the distinguishing attributes; the flow id is an
//! xxh3 hash of them, each followed by a zero byte so that `["ab", "c"]` and
//! `["a", "bc"]` land on different flows.

use std::sync::Arc;

use apf_fairqueue::FlowId;
use xxhash_rust::xxh3::xxh3_64;

/// Extracts the distinguishing attributes of a request.
pub type FlowDistinguisher<Req> = Arc<dyn Fn(&Req) -> Vec<String> + Send + Sync>;

/// Hashes `distinguishers` into a flow id. No distinguishers gives flow 0.
#[must_use]
pub fn compute_flow<S: AsRef<str>>(distinguishers: &[S]) -> FlowId {
    if distinguishers.is_empty() {
        return FlowId::default();
    }

    let len = distinguishers
        .iter()
        .map(|d| d.as_ref().len() + 1)
        .sum();
    let mut key = Vec::with_capacity(len);
    for distinguisher in distinguishers {
        key.extend_from_slice(distinguisher.as_ref().as_bytes());
        key.push(0);
    }
    FlowId::new(xxh3_64(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_flow_zero() {
        let none: [&str; 0] = [];
        assert_eq!(compute_flow(&none), FlowId::new(0));
    }

    #[test]
    fn test_deterministic() {
        let a = compute_flow(&["tenant-a", "alice"]);
        let b = compute_flow(&["tenant-a".to_string(), "alice".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, FlowId::new(0));
    }

    #[test]
    fn test_separator_prevents_concatenation_collisions() {
        assert_ne!(compute_flow(&["ab", "c"]), compute_flow(&["a", "bc"]));
        assert_ne!(compute_flow(&["abc"]), compute_flow(&["ab", "c"]));
    }

    #[test]
    fn test_distinct_tenants_distinct_flows() {
        assert_ne!(compute_flow(&["tenant-a"]), compute_flow(&["tenant-b"]));
    }
}
