use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    partition::{MAX_OFFSET, ServiceCategory},
    store::KeyValue,
};

/// Metadata stored under a claimed slot, describing the process that holds
/// it. Lives exactly as long as the lease it is attached to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub node_id: u16,
    pub service_category: ServiceCategory,
    pub instance_id: String,
    pub hostname: String,
    pub start_time: DateTime<Utc>,
    pub last_renew_time: DateTime<Utc>,
}

impl InstanceRecord {
    pub(crate) fn encode(&self, key: &str) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::InvalidRecord {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }

    pub(crate) fn decode(kv: &KeyValue) -> Result<Self> {
        serde_json::from_slice(&kv.value).map_err(|e| Error::InvalidRecord {
            key: kv.key.clone(),
            reason: e.to_string(),
        })
    }
}

/// Key layout under one prefix:
///
/// ```text
/// /<prefix>/<category>/allocated/<offset>   instance record, leased
/// /<prefix>/<category>/lock                 allocation lock
/// ```
#[derive(Clone, Debug)]
pub(crate) struct Keys {
    root: String,
}

impl Keys {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            root: format!("/{}", prefix.trim_matches('/')),
        }
    }

    pub(crate) fn allocated(&self, category: ServiceCategory) -> String {
        format!("{}/{category}/allocated/", self.root)
    }

    pub(crate) fn slot(&self, category: ServiceCategory, offset: u16) -> String {
        format!("{}{offset}", self.allocated(category))
    }

    pub(crate) fn lock(&self, category: ServiceCategory) -> String {
        format!("{}/{category}/lock", self.root)
    }

    /// Offset encoded in a slot key, if `key` is one.
    pub(crate) fn offset_of(&self, category: ServiceCategory, key: &str) -> Option<u16> {
        key.strip_prefix(&self.allocated(category))?
            .parse::<u16>()
            .ok()
            .filter(|offset| *offset <= MAX_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let keys = Keys::new("/fleetflake/");
        assert_eq!(keys.slot(ServiceCategory::User, 7), "/fleetflake/user/allocated/7");
        assert_eq!(keys.lock(ServiceCategory::Order), "/fleetflake/order/lock");
        assert_eq!(
            keys.offset_of(ServiceCategory::User, "/fleetflake/user/allocated/1023"),
            Some(1023)
        );
        assert_eq!(
            keys.offset_of(ServiceCategory::User, "/fleetflake/user/allocated/1024"),
            None
        );
        assert_eq!(keys.offset_of(ServiceCategory::User, "/fleetflake/order/allocated/3"), None);
    }

    #[test]
    fn record_json_uses_snake_case_fields() {
        let now = Utc::now();
        let record = InstanceRecord {
            node_id: 1027,
            service_category: ServiceCategory::Order,
            instance_id: "i-1".into(),
            hostname: "host-a".into(),
            start_time: now,
            last_renew_time: now,
        };
        let json: serde_json::Value =
            serde_json::from_slice(&record.encode("k").unwrap()).unwrap();
        assert_eq!(json["node_id"], 1027);
        assert_eq!(json["service_category"], "order");
        assert!(json["last_renew_time"].is_string());

        let bad = KeyValue {
            key: "k".into(),
            value: b"{".to_vec(),
        };
        assert!(matches!(InstanceRecord::decode(&bad), Err(Error::InvalidRecord { .. })));
    }
}
