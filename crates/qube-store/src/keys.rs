//! Store key layout (spec.md §6) — stable, as every node observes it.

/// `{prefix}:{queue}:groups` — set of group keys known to the queue.
pub fn groups_key(prefix: &str, queue: &str) -> String {
    format!("{prefix}:{queue}:groups")
}

/// `{prefix}:{queue}:group:{group}` — FIFO list of jobIds for one group.
pub fn group_key(prefix: &str, queue: &str, group: &str) -> String {
    format!("{prefix}:{queue}:group:{group}")
}

/// `{prefix}:queue:job:` — prefix the enqueue/dequeue scripts append a
/// jobId to. Deliberately not namespaced per-queue (spec.md §3's table).
pub fn job_key_prefix(prefix: &str) -> String {
    format!("{prefix}:queue:job:")
}

pub fn job_key(prefix: &str, job_id: u64) -> String {
    format!("{}{}", job_key_prefix(prefix), job_id)
}

/// `{prefix}:queue:seq` — monotonic counter the enqueue script increments.
pub fn counter_key(prefix: &str) -> String {
    format!("{prefix}:queue:seq")
}

/// Extract the plain group name from a group key, e.g.
/// `qube:orders:group:acct-1` -> `acct-1` (spec.md §4.4's "normalise").
pub fn group_name_from_key(group_key: &str) -> Option<&str> {
    group_key.rsplit_once(":group:").map(|(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_stable_layout() {
        assert_eq!(groups_key("qube", "orders"), "qube:orders:groups");
        assert_eq!(group_key("qube", "orders", "acct-1"), "qube:orders:group:acct-1");
        assert_eq!(job_key("qube", 42), "qube:queue:job:42");
        assert_eq!(counter_key("qube"), "qube:queue:seq");
    }

    #[test]
    fn group_name_extracted_from_key() {
        let key = group_key("qube", "orders", "acct-1");
        assert_eq!(group_name_from_key(&key), Some("acct-1"));
    }
}
