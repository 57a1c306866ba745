//! Chain records carried by the feeds.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─── BlockNumber ──────────────────────────────────────────────────────────────

/// A block parameter: a symbolic tag or an exact height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockNumber {
    Earliest,
    #[default]
    Latest,
    Pending,
    Number(u64),
}

impl BlockNumber {
    /// The exact height, if this is not a tag.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns `true` for the `pending` tag.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl From<u64> for BlockNumber {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => write!(f, "earliest"),
            Self::Latest => write!(f, "latest"),
            Self::Pending => write!(f, "pending"),
            Self::Number(n) => write!(f, "{}", quantity::to_hex(*n)),
        }
    }
}

impl FromStr for BlockNumber {
    type Err = String;

    /// Accepts the three tags, `0x` hex quantities, and plain decimals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            "pending" => Ok(Self::Pending),
            other if other.starts_with("0x") => quantity::parse(other).map(Self::Number),
            other => other
                .parse::<u64>()
                .map(Self::Number)
                .map_err(|_| format!("invalid block number: {s}")),
        }
    }
}

impl Serialize for BlockNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// A block's height and canonical hash.
///
/// Two refs name the same block iff their hashes match; position on the
/// chain is compared by number through [`BlockRef::cmp_height`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: String,
}

impl BlockRef {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
        }
    }

    /// Order two refs by height.
    pub fn cmp_height(&self, other: &BlockRef) -> Ordering {
        self.number.cmp(&other.number)
    }
}

impl PartialEq for BlockRef {
    fn eq(&self, other: &Self) -> bool {
        self.hash.eq_ignore_ascii_case(&other.hash)
    }
}

impl Eq for BlockRef {}

impl std::hash::Hash for BlockRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block as returned by `eth_getBlockByNumber` / `eth_getBlockByHash`.
///
/// Headers pushed by `newHeads` decode into the same shape with an empty
/// transaction list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(with = "quantity")]
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    #[serde(with = "quantity")]
    pub timestamp: u64,
    #[serde(default)]
    pub transactions: BlockTransactions,
}

impl Block {
    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.number, self.hash.clone())
    }

    /// Full transaction bodies, if the block was fetched with them.
    pub fn full_transactions(&self) -> &[Transaction] {
        match &self.transactions {
            BlockTransactions::Full(txs) => txs,
            BlockTransactions::Hashes(_) => &[],
        }
    }
}

/// Transactions of a block: hashes only, or full bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockTransactions {
    Full(Vec<Transaction>),
    Hashes(Vec<String>),
}

impl Default for BlockTransactions {
    fn default() -> Self {
        Self::Hashes(Vec::new())
    }
}

impl BlockTransactions {
    pub fn len(&self) -> usize {
        match self {
            Self::Full(txs) => txs.len(),
            Self::Hashes(hashes) => hashes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A transaction body. Pending transactions have no block coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    #[serde(with = "quantity")]
    pub nonce: u64,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default, with = "quantity::option")]
    pub block_number: Option<u64>,
    #[serde(default, with = "quantity::option")]
    pub transaction_index: Option<u64>,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    /// Wei amount as a hex quantity; kept verbatim (may exceed `u64`).
    pub value: String,
    #[serde(default)]
    pub input: String,
}

// ─── Log ──────────────────────────────────────────────────────────────────────

/// An event log as returned by `eth_getLogs`, `eth_getFilterChanges` or a
/// `logs` subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default, with = "quantity::option")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default, with = "quantity::option")]
    pub transaction_index: Option<u64>,
    #[serde(default, with = "quantity::option")]
    pub log_index: Option<u64>,
    /// Set when a re-org dropped the block this log was delivered from.
    #[serde(default)]
    pub removed: bool,
}

// ─── ChainItem ────────────────────────────────────────────────────────────────

/// Anything a feed can emit.
///
/// Generic stream components use it to match the replay/live seam and to
/// tag re-org retractions without knowing the concrete record.
pub trait ChainItem: Send + 'static {
    /// The block this item belongs to, when both height and hash are known.
    fn block_ref(&self) -> Option<BlockRef>;

    /// The height of the block this item belongs to.
    fn block_number(&self) -> Option<u64> {
        self.block_ref().map(|r| r.number)
    }

    /// Returns `true` if the node retracted this item.
    fn is_removed(&self) -> bool {
        false
    }
}

impl ChainItem for Block {
    fn block_ref(&self) -> Option<BlockRef> {
        Some(Block::block_ref(self))
    }
}

impl ChainItem for BlockRef {
    fn block_ref(&self) -> Option<BlockRef> {
        Some(self.clone())
    }
}

impl ChainItem for Transaction {
    fn block_ref(&self) -> Option<BlockRef> {
        Some(BlockRef::new(self.block_number?, self.block_hash.clone()?))
    }

    fn block_number(&self) -> Option<u64> {
        self.block_number
    }
}

impl ChainItem for Log {
    fn block_ref(&self) -> Option<BlockRef> {
        Some(BlockRef::new(self.block_number?, self.block_hash.clone()?))
    }

    fn block_number(&self) -> Option<u64> {
        self.block_number
    }

    fn is_removed(&self) -> bool {
        self.removed
    }
}

/// Block and transaction hashes from hash-only filters.
impl ChainItem for String {
    fn block_ref(&self) -> Option<BlockRef> {
        None
    }
}

// ─── Hex quantities ───────────────────────────────────────────────────────────

/// Serde helpers for `0x`-prefixed hex quantities.
pub mod quantity {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn to_hex(n: u64) -> String {
        format!("{n:#x}")
    }

    /// Parse a `0x` hex quantity (prefix optional).
    pub fn parse(s: &str) -> Result<u64, String> {
        let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        if digits.is_empty() {
            return Err(format!("empty quantity: {s:?}"));
        }
        u64::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {s:?}: {e}"))
    }

    pub(crate) fn from_value(v: &Value) -> Result<u64, String> {
        match v {
            Value::String(s) => parse(s),
            Value::Number(n) => n.as_u64().ok_or_else(|| format!("invalid quantity {n}")),
            other => Err(format!("expected quantity, found {other}")),
        }
    }

    pub fn serialize<S: Serializer>(n: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_hex(*n))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let v = Value::deserialize(deserializer)?;
        from_value(&v).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use serde_json::Value;

        pub fn serialize<S: Serializer>(n: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
            match n {
                Some(n) => super::serialize(n, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            match Value::deserialize(deserializer)? {
                Value::Null => Ok(None),
                v => super::from_value(&v).map(Some).map_err(serde::de::Error::custom),
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_number_round_trips_tags() {
        assert_eq!("latest".parse::<BlockNumber>().unwrap(), BlockNumber::Latest);
        assert_eq!("0x10".parse::<BlockNumber>().unwrap(), BlockNumber::Number(16));
        assert_eq!("100".parse::<BlockNumber>().unwrap(), BlockNumber::Number(100));
        assert!("-1".parse::<BlockNumber>().is_err());
        assert_eq!(BlockNumber::Number(255).to_string(), "0xff");
        assert_eq!(serde_json::to_value(BlockNumber::Earliest).unwrap(), json!("earliest"));
    }

    #[test]
    fn block_ref_identity_is_hash() {
        let a = BlockRef::new(10, "0xAA");
        let b = BlockRef::new(11, "0xaa");
        let c = BlockRef::new(10, "0xbb");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.cmp_height(&b), Ordering::Less);
    }

    #[test]
    fn decodes_block_with_hashes() {
        let block: Block = serde_json::from_value(json!({
            "number": "0x64",
            "hash": "0xabc",
            "parentHash": "0xabb",
            "timestamp": "0x5f5e100",
            "transactions": ["0x01", "0x02"]
        }))
        .unwrap();
        assert_eq!(block.number, 100);
        assert_eq!(block.transactions.len(), 2);
        assert!(block.full_transactions().is_empty());
    }

    #[test]
    fn decodes_head_without_transactions() {
        let head: Block = serde_json::from_value(json!({
            "number": "0x5",
            "hash": "0x05",
            "parentHash": "0x04",
            "timestamp": "0x1"
        }))
        .unwrap();
        assert!(head.transactions.is_empty());
    }

    #[test]
    fn decodes_pending_transaction() {
        let tx: Transaction = serde_json::from_value(json!({
            "hash": "0xt1",
            "nonce": "0x2",
            "blockHash": null,
            "blockNumber": null,
            "transactionIndex": null,
            "from": "0xf",
            "to": null,
            "value": "0xde0b6b3a7640000",
            "input": "0x"
        }))
        .unwrap();
        assert_eq!(tx.nonce, 2);
        assert!(tx.block_ref().is_none());
    }

    #[test]
    fn removed_log_reports_itself() {
        let log: Log = serde_json::from_value(json!({
            "address": "0xabc",
            "topics": ["0xddf2"],
            "data": "0x",
            "blockNumber": "0xc",
            "blockHash": "0x0c",
            "logIndex": "0x0",
            "removed": true
        }))
        .unwrap();
        assert!(log.is_removed());
        assert_eq!(ChainItem::block_number(&log), Some(12));
    }
}
