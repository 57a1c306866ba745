//! The tagged unit every stream delivers.

use chainstream_core::ChainItem;

/// One delivery on a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<T> {
    /// A new item.
    Data(T),
    /// Retraction of a previously delivered `Data` with the same identity
    /// (a log dropped by a re-org).
    Removed(T),
    /// Terminal marker of a bounded replay.
    End,
}

impl<T: ChainItem> StreamItem<T> {
    /// Tag an item as `Data` or `Removed` according to what it reports.
    pub fn classify(item: T) -> Self {
        if item.is_removed() {
            Self::Removed(item)
        } else {
            Self::Data(item)
        }
    }
}

impl<T> StreamItem<T> {
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Data(item) => Some(item),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Data(item) => Some(item),
            _ => None,
        }
    }

    /// The carried item of a `Data` or `Removed`.
    pub fn item(&self) -> Option<&T> {
        match self {
            Self::Data(item) | Self::Removed(item) => Some(item),
            Self::End => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstream_core::Log;

    fn log(removed: bool) -> Log {
        Log {
            address: "0xabc".into(),
            topics: vec![],
            data: "0x".into(),
            block_number: Some(3),
            block_hash: Some("0x03".into()),
            transaction_hash: None,
            transaction_index: None,
            log_index: Some(0),
            removed,
        }
    }

    #[test]
    fn classify_follows_removed_flag() {
        assert!(matches!(StreamItem::classify(log(false)), StreamItem::Data(_)));
        assert!(matches!(StreamItem::classify(log(true)), StreamItem::Removed(_)));
    }

    #[test]
    fn accessors() {
        let end: StreamItem<Log> = StreamItem::End;
        assert!(end.is_end());
        assert!(end.item().is_none());
        assert!(StreamItem::Removed(log(true)).data().is_none());
        assert!(StreamItem::Data(log(false)).into_data().is_some());
    }
}
