//! Atomic single-key hash operations on `activeGroupConsumers` (spec.md §4.3).

use deadpool_redis::Connection;
use redis::AsyncCommands;

use qube_common::ConsumerInfo;

use crate::error::Result;

const REGISTRY_KEY: &str = "activeGroupConsumers";

pub struct ConsumerRegistry;

impl ConsumerRegistry {
    fn field(queue: &str, group: &str, worker_id: &str) -> String {
        format!("qube:{queue}:{group}:{worker_id}")
    }

    fn prefix(queue: &str, group: &str) -> String {
        format!("qube:{queue}:{group}:")
    }

    pub async fn add(conn: &mut Connection, queue: &str, group: &str, worker_id: &str, info: &ConsumerInfo) -> Result<()> {
        let field = Self::field(queue, group, worker_id);
        let value = serde_json::to_string(info)?;
        let _: () = conn.hset(REGISTRY_KEY, field, value).await?;
        Ok(())
    }

    pub async fn get(conn: &mut Connection, queue: &str, group: &str, worker_id: &str) -> Result<Option<ConsumerInfo>> {
        let field = Self::field(queue, group, worker_id);
        let value: Option<String> = conn.hget(REGISTRY_KEY, field).await?;
        Ok(match value {
            Some(v) => Some(serde_json::from_str(&v)?),
            None => None,
        })
    }

    pub async fn set_should_stop(conn: &mut Connection, queue: &str, group: &str, worker_id: &str) -> Result<()> {
        if let Some(mut info) = Self::get(conn, queue, group, worker_id).await? {
            info.should_stop = true;
            Self::add(conn, queue, group, worker_id, &info).await?;
        }
        Ok(())
    }

    pub async fn delete(conn: &mut Connection, queue: &str, group: &str, worker_id: &str) -> Result<()> {
        let field = Self::field(queue, group, worker_id);
        let _: () = conn.hdel(REGISTRY_KEY, field).await?;
        Ok(())
    }

    /// Count live workers for `(queue, group)` across every node — the
    /// authoritative admission counter for invariant I3.
    pub async fn count_for_group(conn: &mut Connection, queue: &str, group: &str) -> Result<usize> {
        let fields: Vec<String> = conn.hkeys(REGISTRY_KEY).await?;
        let prefix = Self::prefix(queue, group);
        Ok(fields.iter().filter(|f| f.starts_with(&prefix)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_and_prefix_share_the_same_namespace() {
        let field = ConsumerRegistry::field("orders", "acct-1", "w-1");
        let prefix = ConsumerRegistry::prefix("orders", "acct-1");
        assert!(field.starts_with(&prefix));
        assert_eq!(field, "qube:orders:acct-1:w-1");
    }
}
