//! Mapping from service categories to reserved node-identifier ranges.
//!
//! Every [`ServiceCategory`] owns a disjoint block of [`NODES_PER_CATEGORY`]
//! node IDs starting at `category_index * 1024`:
//!
//! ```text
//!  category:   user        order         payment       auth          gateway
//!  node ids:   [0, 1023]   [1024, 2047]  [2048, 3071]  [3072, 4095]  [4096, 5119]
//! ```
//!
//! Only the category-relative offset (10 bits) is encoded into generated IDs.

use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of node IDs reserved for each service category.
pub const NODES_PER_CATEGORY: u16 = 1024;

/// Largest valid category-relative offset.
pub const MAX_OFFSET: u16 = NODES_PER_CATEGORY - 1;

/// A class of service sharing one reserved node-ID range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    User,
    Order,
    Payment,
    Auth,
    Gateway,
}

impl ServiceCategory {
    /// All categories, in index order.
    pub const ALL: [Self; 5] = [
        Self::User,
        Self::Order,
        Self::Payment,
        Self::Auth,
        Self::Gateway,
    ];

    /// Position of the category in the partition table.
    pub const fn index(self) -> u16 {
        match self {
            Self::User => 0,
            Self::Order => 1,
            Self::Payment => 2,
            Self::Auth => 3,
            Self::Gateway => 4,
        }
    }

    /// Stable lowercase name, used in store keys and fingerprints.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Order => "order",
            Self::Payment => "payment",
            Self::Auth => "auth",
            Self::Gateway => "gateway",
        }
    }

    /// First node ID of the category's range.
    pub const fn base(self) -> u16 {
        category_base(self)
    }

    /// Returns `true` if `node_id` lies inside this category's range.
    pub const fn contains(self, node_id: NodeId) -> bool {
        let base = self.base();
        node_id.0 >= base && node_id.0 <= base + MAX_OFFSET
    }

    fn from_index(index: u16) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownCategory(s.to_owned()))
    }
}

/// A fleet-wide node identifier in `[0, categories * 1024)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u16);

impl NodeId {
    /// Exclusive upper bound over all categories.
    pub const LIMIT: u16 = NODES_PER_CATEGORY * ServiceCategory::ALL.len() as u16;

    /// Wraps a raw node ID, rejecting values past the last category.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if `raw` is not below [`NodeId::LIMIT`].
    pub fn new(raw: u16) -> Result<Self> {
        if raw < Self::LIMIT {
            Ok(Self(raw))
        } else {
            Err(Error::OutOfRange {
                offset: i64::from(raw),
                max: Self::LIMIT - 1,
            })
        }
    }

    /// The raw fleet-wide value.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// The category-relative offset, the only part encoded into IDs.
    pub const fn offset(self) -> u16 {
        self.0 % NODES_PER_CATEGORY
    }

    /// The category whose range contains this node ID.
    pub fn category(self) -> ServiceCategory {
        // `new` guarantees the index is in bounds.
        ServiceCategory::from_index(self.0 / NODES_PER_CATEGORY).unwrap_or(ServiceCategory::User)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First node ID reserved for `category`.
pub const fn category_base(category: ServiceCategory) -> u16 {
    category.index() * NODES_PER_CATEGORY
}

/// Node ID for the `instance_offset`-th slot of `category`.
///
/// # Errors
///
/// Returns [`Error::OutOfRange`] unless `instance_offset` is in `[0, 1023]`.
///
/// # Example
///
/// ```
/// use fleetflake::{ServiceCategory, node_id};
///
/// assert_eq!(node_id(ServiceCategory::User, 5).unwrap().get(), 5);
/// assert_eq!(node_id(ServiceCategory::Order, 3).unwrap().get(), 1027);
/// assert!(node_id(ServiceCategory::Order, 1024).is_err());
/// ```
pub fn node_id(category: ServiceCategory, instance_offset: i64) -> Result<NodeId> {
    match u16::try_from(instance_offset) {
        Ok(offset) if offset <= MAX_OFFSET => Ok(NodeId(category_base(category) + offset)),
        _ => Err(Error::OutOfRange {
            offset: instance_offset,
            max: MAX_OFFSET,
        }),
    }
}

/// Base of the range containing a raw node ID.
pub const fn category_of(node_id: u16) -> u16 {
    (node_id / NODES_PER_CATEGORY) * NODES_PER_CATEGORY
}
