use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use fleetflake::{FacadeConfig, ServiceCategory, StaticAssignment, StoreAllocatorConfig, Strategy};

/// Runtime configuration for the `fleetflake-agent` binary.
///
/// Every flag can also be set through its environment variable (or a `.env`
/// file). Defaults match the library's: 30s leases renewed every 10s, and a
/// 10s bound on waiting for the allocation lock.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fleetflake-agent",
    version,
    about = "Claims a fleet node id and generates Snowflake ids with it"
)]
pub struct CliArgs {
    /// Service category whose node-id range to allocate from.
    ///
    /// One of: user, order, payment, auth, gateway.
    ///
    /// Environment variable: `FLEETFLAKE_SERVICE_CATEGORY`
    #[arg(long, env = "FLEETFLAKE_SERVICE_CATEGORY")]
    pub category: ServiceCategory,

    /// Allocation strategy: auto, store, fingerprint, fallback or static.
    ///
    /// `auto` uses the coordination store when endpoints are given, the
    /// machine fingerprint when `--use-fingerprint` is set, and the fallback
    /// allocator otherwise.
    ///
    /// Environment variable: `FLEETFLAKE_STRATEGY`
    #[arg(long, env = "FLEETFLAKE_STRATEGY", default_value_t = Strategy::Auto)]
    pub strategy: Strategy,

    /// Comma-separated etcd endpoints, e.g. `10.0.0.1:2379,10.0.0.2:2379`.
    ///
    /// Environment variable: `FLEETFLAKE_STORE_ENDPOINTS`
    #[arg(long, env = "FLEETFLAKE_STORE_ENDPOINTS", value_delimiter = ',')]
    pub store_endpoints: Vec<String>,

    /// Pre-assigned fleet-wide node id.
    ///
    /// Environment variable: `FLEETFLAKE_NODE_ID`
    #[arg(long, env = "FLEETFLAKE_NODE_ID", conflicts_with = "instance_offset")]
    pub node_id: Option<u16>,

    /// Pre-assigned slot within the category's range (0-1023).
    ///
    /// Environment variable: `FLEETFLAKE_INSTANCE_OFFSET`
    #[arg(long, env = "FLEETFLAKE_INSTANCE_OFFSET", allow_negative_numbers = true)]
    pub instance_offset: Option<i64>,

    /// Derive the node id from this machine's fingerprint.
    ///
    /// Environment variable: `FLEETFLAKE_USE_FINGERPRINT`
    #[arg(long, env = "FLEETFLAKE_USE_FINGERPRINT", default_value_t = false)]
    pub use_fingerprint: bool,

    /// Fail instead of falling back when the coordination store cannot
    /// allocate.
    ///
    /// Environment variable: `FLEETFLAKE_NO_FALLBACK`
    #[arg(long, env = "FLEETFLAKE_NO_FALLBACK", default_value_t = false)]
    pub no_fallback: bool,

    /// First path segment of every key written to the store.
    ///
    /// Environment variable: `FLEETFLAKE_KEY_PREFIX`
    #[arg(long, env = "FLEETFLAKE_KEY_PREFIX", default_value_t = String::from("fleetflake"))]
    pub key_prefix: String,

    /// Lease TTL in seconds.
    ///
    /// Environment variable: `FLEETFLAKE_LEASE_TTL`
    #[arg(long, env = "FLEETFLAKE_LEASE_TTL", default_value_t = 30)]
    pub lease_ttl: u64,

    /// Lease renewal interval in seconds. Must be shorter than the TTL.
    ///
    /// Environment variable: `FLEETFLAKE_RENEW_INTERVAL`
    #[arg(long, env = "FLEETFLAKE_RENEW_INTERVAL", default_value_t = 10)]
    pub renew_interval: u64,

    /// Seconds to wait for the allocation lock before giving up.
    ///
    /// Environment variable: `FLEETFLAKE_ALLOCATE_TIMEOUT`
    #[arg(long, env = "FLEETFLAKE_ALLOCATE_TIMEOUT", default_value_t = 10)]
    pub allocate_timeout: u64,

    /// Print this many ids to stdout, release the node id and exit. Without
    /// it the agent holds the node id until SIGTERM or Ctrl+C.
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Emit logs as JSON lines instead of the pretty format.
    ///
    /// Environment variable: `FLEETFLAKE_LOG_JSON`
    #[arg(long, env = "FLEETFLAKE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub facade: FacadeConfig,
    pub count: Option<usize>,
    pub log_json: bool,
}

impl TryFrom<CliArgs> for AgentConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let static_assignment = match (args.node_id, args.instance_offset) {
            (Some(_), Some(_)) => {
                bail!("FLEETFLAKE_NODE_ID and FLEETFLAKE_INSTANCE_OFFSET are mutually exclusive")
            }
            (Some(raw), None) => Some(StaticAssignment::NodeId(raw)),
            (None, Some(offset)) => Some(StaticAssignment::Offset {
                category: args.category,
                offset,
            }),
            (None, None) => None,
        };

        if args.strategy == Strategy::Static && static_assignment.is_none() {
            bail!("the static strategy needs FLEETFLAKE_NODE_ID or FLEETFLAKE_INSTANCE_OFFSET");
        }

        let store = StoreAllocatorConfig {
            key_prefix: args.key_prefix,
            lease_ttl: Duration::from_secs(args.lease_ttl),
            renew_interval: Duration::from_secs(args.renew_interval),
            allocate_timeout: Duration::from_secs(args.allocate_timeout),
            auto_renew: true,
        };
        store.validate().context("invalid store allocator settings")?;

        let store_endpoints = args
            .store_endpoints
            .into_iter()
            .map(|e| e.trim().to_owned())
            .filter(|e| !e.is_empty())
            .collect();

        Ok(Self {
            facade: FacadeConfig {
                category: args.category,
                strategy: args.strategy,
                store_endpoints,
                static_assignment,
                use_fingerprint: args.use_fingerprint,
                store,
                fallback_on_store_failure: !args.no_fallback,
            },
            count: args.count,
            log_json: args.log_json,
        })
    }
}
