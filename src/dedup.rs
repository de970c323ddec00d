//! Record deduplication
//!
//! Collapses a sorted record stream so that only one record survives per
//! identity key. The stream arrives newest-first per user key, so the first
//! record seen for an identity key is the one that wins; later records with
//! an equal identity key are dropped without comparing sequence numbers.
//!
//! The identity key is the full user key, or only its comparator-defined
//! prefix in unique-prefixes mode.

use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::key::{Record, RecordStream};

/// Streaming adaptor dropping records whose identity key equals the
/// previously emitted record's.
pub struct Deduplicator<S> {
    inner: S,
    comparator: Arc<dyn Comparator>,
    unique_prefixes: bool,
    last_identity: Option<Vec<u8>>,
}

impl<S: RecordStream> Deduplicator<S> {
    pub fn new(inner: S, comparator: Arc<dyn Comparator>, unique_prefixes: bool) -> Self {
        Self {
            inner,
            comparator,
            unique_prefixes,
            last_identity: None,
        }
    }

    fn identity<'a>(&self, user_key: &'a [u8]) -> &'a [u8] {
        if self.unique_prefixes {
            self.comparator.prefix(user_key)
        } else {
            user_key
        }
    }
}

impl<S: RecordStream> RecordStream for Deduplicator<S> {
    fn next(&mut self) -> Result<Option<Record>> {
        while let Some(record) = self.inner.next()? {
            let identity = self.identity(&record.key.user_key);
            if let Some(last) = &self.last_identity {
                if self.comparator.equal(last, identity) {
                    continue;
                }
            }
            self.last_identity = Some(identity.to_vec());
            return Ok(Some(record));
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{BytewiseComparator, SeparatorSuffixComparator};
    use crate::key::{InternalKey, RecordKind, SeqNum};

    struct VecStream(std::vec::IntoIter<Record>);

    impl RecordStream for VecStream {
        fn next(&mut self) -> Result<Option<Record>> {
            Ok(self.0.next())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn rec(key: &[u8], seq: u64) -> Record {
        Record::new(
            InternalKey::new(key.to_vec(), SeqNum::Committed(seq), RecordKind::Set),
            None,
        )
    }

    #[test]
    fn first_record_per_key_survives() {
        let stream = VecStream(vec![rec(b"a", 9), rec(b"a", 5), rec(b"b", 3)].into_iter());
        let mut dedup = Deduplicator::new(stream, Arc::new(BytewiseComparator), false);
        let a = dedup.next().unwrap().unwrap();
        assert_eq!(a.key.seq, SeqNum::Committed(9));
        let b = dedup.next().unwrap().unwrap();
        assert_eq!(b.key.user_key, b"b");
        assert!(dedup.next().unwrap().is_none());
    }

    #[test]
    fn prefix_mode_collapses_suffixed_versions() {
        let stream = VecStream(
            vec![rec(b"k@v3", 9), rec(b"k@v2", 8), rec(b"m@v1", 7)].into_iter(),
        );
        let mut dedup =
            Deduplicator::new(stream, Arc::new(SeparatorSuffixComparator::default()), true);
        assert_eq!(dedup.next().unwrap().unwrap().key.user_key, b"k@v3");
        assert_eq!(dedup.next().unwrap().unwrap().key.user_key, b"m@v1");
        assert!(dedup.next().unwrap().is_none());
    }
}
