//! etcd v3 backend speaking the JSON gateway (`/v3/...` over HTTP).
//!
//! Keys and values travel base64-encoded and 64-bit integers come back as
//! strings, as the gateway renders protobuf `int64` fields. Endpoints are
//! tried in rotation; a transport failure moves on to the next endpoint
//! while an answer from any member is final.

use core::time::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

use crate::store::{CoordinationStore, KeyValue, LeaseId, LockHandle, StoreError};

/// A [`CoordinationStore`] backed by an etcd cluster.
#[derive(Debug)]
pub struct EtcdStore {
    http: Client,
    endpoints: Vec<String>,
    next: AtomicUsize,
    request_timeout: Duration,
}

/// Per-request deadline unless [`EtcdStore::with_request_timeout`] says
/// otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl EtcdStore {
    /// Builds a client for the given endpoints (`host:port` or full URLs).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no endpoint is given or the
    /// HTTP client cannot be built.
    pub fn new<I, S>(endpoints: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| normalize_endpoint(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(StoreError::Unavailable("no etcd endpoints configured".into()));
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            endpoints,
            next: AtomicUsize::new(0),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Caps every gateway request, including a blocking lock wait.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn call<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, StoreError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let start = self.next.load(Ordering::Relaxed);
        let mut last_err = String::new();

        for attempt in 0..self.endpoints.len() {
            let idx = (start + attempt) % self.endpoints.len();
            let url = format!("{}{path}", self.endpoints[idx]);

            let res = match self
                .http
                .post(&url)
                .timeout(self.request_timeout)
                .json(body)
                .send()
                .await {
                Ok(res) => res,
                Err(e) => {
                    tracing::debug!(
                        endpoint = %self.endpoints[idx],
                        error = %e,
                        "etcd endpoint unreachable"
                    );
                    last_err = e.to_string();
                    continue;
                }
            };
            self.next.store(idx, Ordering::Relaxed);

            let status = res.status();
            if !status.is_success() {
                let message = res
                    .json::<GatewayError>()
                    .await
                    .map(|e| if e.message.is_empty() { e.error } else { e.message })
                    .unwrap_or_default();
                return Err(StoreError::Upstream {
                    status: status.as_u16(),
                    message,
                });
            }

            return res
                .json::<Resp>()
                .await
                .map_err(|e| StoreError::Decode(e.to_string()));
        }

        Err(StoreError::Unavailable(last_err))
    }
}

fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    }
}

/// Smallest key strictly greater than every key starting with `prefix`.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // All 0xff: range to the end of the keyspace.
    vec![0]
}

fn lease_error(lease: LeaseId, err: StoreError) -> StoreError {
    match err {
        StoreError::Upstream { status, ref message }
            if status == StatusCode::NOT_FOUND.as_u16() || message.contains("lease not found") =>
        {
            StoreError::LeaseNotFound(lease)
        }
        other => other,
    }
}

fn decode_b64(raw: &str) -> Result<Vec<u8>, StoreError> {
    STANDARD
        .decode(raw)
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Str(String),
        Num(i64),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Num(n) => Ok(n),
        Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Default, Deserialize)]
struct GatewayError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct LeaseGrantRequest {
    #[serde(rename = "TTL")]
    ttl: i64,
}

#[derive(Serialize)]
struct LeaseRequest {
    #[serde(rename = "ID")]
    id: i64,
}

#[derive(Deserialize)]
struct LeaseGrantResponse {
    #[serde(rename = "ID", deserialize_with = "int64")]
    id: i64,
}

#[derive(Deserialize)]
struct KeepAliveResponse {
    #[serde(default)]
    result: Option<KeepAliveResult>,
}

#[derive(Deserialize)]
struct KeepAliveResult {
    #[serde(rename = "TTL", default, deserialize_with = "int64")]
    ttl: i64,
}

#[derive(Serialize)]
struct PutRequest {
    key: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease: Option<i64>,
}

#[derive(Serialize)]
struct RangeRequest {
    key: String,
    range_end: String,
}

#[derive(Serialize)]
struct DeleteRequest {
    key: String,
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<RawKeyValue>,
}

#[derive(Deserialize)]
struct RawKeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Serialize)]
struct LockRequest {
    name: String,
    lease: i64,
}

#[derive(Deserialize)]
struct LockResponse {
    key: String,
}

#[derive(Serialize)]
struct UnlockRequest {
    key: String,
}

#[derive(Deserialize)]
struct Empty {}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let ttl = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        let res: LeaseGrantResponse = self
            .call("/v3/lease/grant", &LeaseGrantRequest { ttl })
            .await?;
        Ok(LeaseId(res.id))
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, StoreError> {
        let res: KeepAliveResponse = self
            .call("/v3/lease/keepalive", &LeaseRequest { id: lease.0 })
            .await
            .map_err(|e| lease_error(lease, e))?;
        // An expired lease comes back without a TTL.
        match res.result {
            Some(KeepAliveResult { ttl }) if ttl > 0 => Ok(Duration::from_secs(ttl as u64)),
            _ => Err(StoreError::LeaseNotFound(lease)),
        }
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError> {
        let _: Empty = self
            .call("/v3/lease/revoke", &LeaseRequest { id: lease.0 })
            .await
            .map_err(|e| lease_error(lease, e))?;
        Ok(())
    }

    async fn lock(&self, name: &str, lease: LeaseId) -> Result<LockHandle, StoreError> {
        let req = LockRequest {
            name: STANDARD.encode(name),
            lease: lease.0,
        };
        let res: LockResponse = self
            .call("/v3/lock/lock", &req)
            .await
            .map_err(|e| lease_error(lease, e))?;
        Ok(LockHandle {
            name: name.to_owned(),
            key: decode_b64(&res.key)?,
            lease,
        })
    }

    async fn unlock(&self, handle: LockHandle) -> Result<(), StoreError> {
        let req = UnlockRequest {
            key: STANDARD.encode(&handle.key),
        };
        let _: Empty = self.call("/v3/lock/unlock", &req).await?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let req = RangeRequest {
            key: STANDARD.encode(prefix),
            range_end: STANDARD.encode(prefix_range_end(prefix.as_bytes())),
        };
        let res: RangeResponse = self.call("/v3/kv/range", &req).await?;

        res.kvs
            .into_iter()
            .map(|kv| {
                let key = String::from_utf8(decode_b64(&kv.key)?)
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                Ok(KeyValue {
                    key,
                    value: decode_b64(&kv.value)?,
                })
            })
            .collect()
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<(), StoreError> {
        let req = PutRequest {
            key: STANDARD.encode(key),
            value: STANDARD.encode(value),
            lease: lease.map(|l| l.0),
        };
        let res = self.call::<_, Empty>("/v3/kv/put", &req).await;
        match lease {
            Some(id) => res.map_err(|e| lease_error(id, e)).map(drop),
            None => res.map(drop),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let req = DeleteRequest {
            key: STANDARD.encode(key),
        };
        let _: Empty = self.call("/v3/kv/deleterange", &req).await?;
        Ok(())
    }
}
