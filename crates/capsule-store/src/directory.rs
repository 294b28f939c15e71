use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use capsule_flash::Archive;
use capsule_types::{CapsuleHash, CapsuleOffset, HASH_LEN};

use crate::error::{StoreError, StoreResult};
use crate::locator::Container;
use crate::record::{CapsuleRecord, RecordHeader, HEADER_LEN, TERMINATOR_LEN};

/// Outcome of a directory lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "offset", rename_all = "lowercase")]
pub enum Slot {
    /// The capsule is stored; its header starts here.
    Found(CapsuleOffset),
    /// The capsule is not stored; free space starts here.
    Free(CapsuleOffset),
}

impl Slot {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn offset(&self) -> CapsuleOffset {
        match *self {
            Self::Found(offset) | Self::Free(offset) => offset,
        }
    }

    /// The `(found, offset)` pair.
    pub fn into_pair(self) -> (bool, CapsuleOffset) {
        (self.is_found(), self.offset())
    }
}

/// Walks the record list of a container from the first even address.
///
/// Iteration ends at the terminator, at the physical end of the container,
/// or after yielding one corruption error. [`offset`](Self::offset) then
/// reports where free space begins.
pub struct Records<'a, A: Archive + ?Sized> {
    archive: &'a A,
    container: Container,
    pos: u32,
    done: bool,
}

impl<'a, A: Archive + ?Sized> Records<'a, A> {
    pub fn new(archive: &'a A, container: Container) -> Self {
        Self {
            archive,
            pos: u32::from(container.first_offset().get()),
            container,
            done: false,
        }
    }

    /// Current scan position, relative to the container base.
    pub fn offset(&self) -> CapsuleOffset {
        CapsuleOffset::new(self.pos as u16)
    }

    fn read_hash(&self) -> StoreResult<CapsuleHash> {
        let mut bytes = [0u8; HASH_LEN];
        self.archive
            .read_bytes(self.container.address_of(self.pos + 2), &mut bytes)?;
        Ok(CapsuleHash::new(bytes))
    }

    fn corrupt(&mut self, length: u16, reason: String) -> StoreError {
        self.done = true;
        warn!(offset = self.pos, length, %reason, "corrupt capsule record");
        StoreError::CorruptRecord {
            offset: self.offset(),
            length,
            reason,
        }
    }
}

impl<A: Archive + ?Sized> Iterator for Records<'_, A> {
    type Item = StoreResult<CapsuleRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let capacity = u32::from(self.container.capacity());

        // No room left for a length field: a full container ends the list.
        if self.pos + u32::from(TERMINATOR_LEN) > capacity {
            self.done = true;
            return None;
        }

        let length = match self.archive.read_u16(self.container.address_of(self.pos)) {
            Ok(length) => length,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };

        if length == 0 {
            self.done = true;
            return None;
        }
        if length < HEADER_LEN {
            let reason = format!("length {length} is shorter than the record header");
            return Some(Err(self.corrupt(length, reason)));
        }
        // Checked before the hash is read: a truncated header at the tail
        // must not read past the container.
        let end = self.pos + u32::from(length);
        if end > capacity {
            let reason = format!("record ends at {end}, past the {capacity}-byte container");
            return Some(Err(self.corrupt(length, reason)));
        }

        let header = match self.read_hash() {
            Ok(hash) => RecordHeader { length, hash },
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let record = CapsuleRecord {
            offset: self.offset(),
            header,
        };
        self.pos = end;
        Some(Ok(record))
    }
}

/// Find the capsule `(length, hash)` or the first free offset.
///
/// The earliest matching record wins. Records are compared on their header
/// only; the code bytes are never read.
pub fn find_or_free_offset<A: Archive + ?Sized>(
    archive: &A,
    container: Container,
    length: u16,
    hash: &CapsuleHash,
) -> StoreResult<Slot> {
    debug!(length, %hash, "looking up capsule");
    let mut records = Records::new(archive, container);
    for record in records.by_ref() {
        let record = record?;
        if record.header.matches(length, hash) {
            debug!(offset = record.offset.get(), "capsule found");
            return Ok(Slot::Found(record.offset));
        }
        debug!(
            offset = record.offset.get(),
            skip = record.length(),
            "capsule does not match; skipping"
        );
    }
    let free = records.offset();
    debug!(offset = free.get(), "capsule not found; returning first free offset");
    Ok(Slot::Free(free))
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_flash::FlashImage;
    use capsule_types::FileType;
    use proptest::prelude::*;

    const H1: CapsuleHash = CapsuleHash::new([0x11, 0x11, 0x11, 0x11]);
    const H2: CapsuleHash = CapsuleHash::new([0x22, 0x22, 0x22, 0x22]);

    fn record(length: u16, hash: CapsuleHash, fill: u8) -> Vec<u8> {
        let mut out = RecordHeader { length, hash }.encode().to_vec();
        out.extend(std::iter::repeat(fill).take(usize::from(length - HEADER_LEN)));
        out
    }

    fn image_with(contents: &[u8], capacity: u32, odd: bool) -> (FlashImage, Container) {
        let mut builder = FlashImage::builder(0x1000);
        if odd {
            builder = builder.padding(1);
        }
        let mut image = builder.capsule_buffer(capacity).build();
        let container = Container::locate(&image, FileType::CAPSULE_BUFFER).unwrap();
        let start = container.address_of(u32::from(container.first_offset().get()));
        image.poke(start, contents).unwrap();
        (image, container)
    }

    #[test]
    fn empty_container_yields_offset_zero() {
        let (image, container) = image_with(&[], 32, false);
        let slot = find_or_free_offset(&image, container, 8, &H1).unwrap();
        assert_eq!(slot, Slot::Free(CapsuleOffset::ZERO));
    }

    #[test]
    fn empty_odd_container_yields_first_even_offset() {
        let (image, container) = image_with(&[], 32, true);
        let slot = find_or_free_offset(&image, container, 8, &H1).unwrap();
        assert_eq!(slot, Slot::Free(CapsuleOffset::new(1)));
        assert!(container.address_of(1).is_word_aligned());
    }

    #[test]
    fn miss_returns_free_slot() {
        let (image, container) = image_with(&record(10, H1, 0xAA), 64, false);
        let slot = find_or_free_offset(&image, container, 5, &H2).unwrap();
        assert_eq!(slot.into_pair(), (false, CapsuleOffset::new(10)));
    }

    #[test]
    fn first_duplicate_wins() {
        let mut contents = record(10, H1, 0xC1);
        contents.extend(record(10, H1, 0xC2));
        let (image, container) = image_with(&contents, 64, false);
        let slot = find_or_free_offset(&image, container, 10, &H1).unwrap();
        assert_eq!(slot, Slot::Found(CapsuleOffset::ZERO));
    }

    #[test]
    fn length_and_hash_must_both_match() {
        let mut contents = record(10, H1, 0);
        contents.extend(record(12, H2, 0));
        contents.extend(record(10, H2, 0));
        let (image, container) = image_with(&contents, 64, false);
        assert_eq!(
            find_or_free_offset(&image, container, 10, &H2).unwrap(),
            Slot::Found(CapsuleOffset::new(22))
        );
        assert_eq!(
            find_or_free_offset(&image, container, 12, &H1).unwrap(),
            Slot::Free(CapsuleOffset::new(32))
        );
    }

    #[test]
    fn full_container_ends_at_physical_end() {
        let contents = record(16, H1, 0xEE);
        let (image, container) = image_with(&contents, 16, false);
        assert_eq!(
            find_or_free_offset(&image, container, 6, &H2).unwrap(),
            Slot::Free(CapsuleOffset::new(16))
        );
    }

    #[test]
    fn maximal_record_followed_by_terminator() {
        // One byte of padding, one record filling all but the terminator.
        let capacity = 1 + 40 + 2;
        let (image, container) = image_with(&record(40, H1, 0x77), capacity, true);
        let slot = find_or_free_offset(&image, container, 40, &H2).unwrap();
        assert_eq!(slot, Slot::Free(CapsuleOffset::new(41)));
        assert!(u32::from(slot.offset().get()) + 2 <= capacity);
    }

    #[test]
    fn record_past_end_is_corruption() {
        let (image, container) = image_with(&record(10, H1, 0)[..8], 8, false);
        let err = find_or_free_offset(&image, container, 6, &H2).unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRecord { length: 10, .. }
        ));
    }

    #[test]
    fn undersized_length_is_corruption() {
        let (image, container) = image_with(&[3, 0, 1, 2, 3, 4], 16, false);
        let err = find_or_free_offset(&image, container, 6, &H2).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { length: 3, .. }));
    }

    #[test]
    fn truncated_header_at_end_of_memory_is_corruption() {
        let mut image = FlashImage::builder(0x100).capsule_buffer(9).build();
        let container = Container::locate(&image, FileType::CAPSULE_BUFFER).unwrap();
        image
            .poke(container.base(), &[6, 0, 1, 1, 1, 1, 6, 0, 0])
            .unwrap();

        let err = find_or_free_offset(&image, container, 8, &H1).unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRecord { length: 6, offset, .. } if offset == CapsuleOffset::new(6)
        ));
    }

    #[test]
    fn scan_stays_inside_container_between_files() {
        let mut image = FlashImage::builder(0x1000)
            .file(FileType::LIBRARY, &[0x11; 5])
            .capsule_buffer(15)
            .file(FileType::TABLES, &[0x04, 0x00, 0xEE, 0xEE])
            .build();
        let container = Container::locate(&image, FileType::CAPSULE_BUFFER).unwrap();
        assert_eq!(container.index(), 1);
        assert_eq!(container.first_offset(), CapsuleOffset::new(1));

        let mut contents = record(8, H1, 0xAA);
        contents.extend(record(6, H2, 0));
        let start = container.address_of(1);
        image.poke(start, &contents).unwrap();

        assert_eq!(
            find_or_free_offset(&image, container, 6, &H2).unwrap(),
            Slot::Found(CapsuleOffset::new(9))
        );
        assert_eq!(
            find_or_free_offset(&image, container, 8, &H2).unwrap(),
            Slot::Free(CapsuleOffset::new(15))
        );
    }

    #[test]
    fn records_iterates_in_order() {
        let mut contents = record(8, H1, 0);
        contents.extend(record(12, H2, 0));
        let (image, container) = image_with(&contents, 64, false);
        let mut records = Records::new(&image, container);
        let all: Vec<_> = records.by_ref().collect::<StoreResult<_>>().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].offset, CapsuleOffset::ZERO);
        assert_eq!(all[1].offset, CapsuleOffset::new(8));
        assert_eq!(all[1].hash(), H2);
        assert_eq!(records.offset(), CapsuleOffset::new(20));
    }

    #[test]
    fn slot_serializes_with_status() {
        let json = serde_json::to_string(&Slot::Free(CapsuleOffset::new(4))).unwrap();
        assert_eq!(json, r#"{"status":"free","offset":4}"#);
    }

    #[test]
    fn terminator_ignores_trailing_bytes() {
        let mut contents = record(8, H1, 0);
        contents.extend([0, 0, 0xAB, 0xCD]);
        let (image, container) = image_with(&contents, 32, false);
        assert_eq!(
            find_or_free_offset(&image, container, 8, &H2).unwrap(),
            Slot::Free(CapsuleOffset::new(8))
        );
    }

    proptest! {
        #[test]
        fn lookup_is_deterministic(
            lengths in proptest::collection::vec(6u16..40, 0..6),
            query_len in 6u16..40,
            query_hash in any::<[u8; 4]>(),
            odd in any::<bool>(),
        ) {
            let mut contents = Vec::new();
            for (i, len) in lengths.iter().enumerate() {
                contents.extend(record(*len, CapsuleHash::new([i as u8; 4]), 0x5A));
            }
            let (image, container) = image_with(&contents, 512, odd);
            let hash = CapsuleHash::new(query_hash);
            let first = find_or_free_offset(&image, container, query_len, &hash).unwrap();
            let second = find_or_free_offset(&image, container, query_len, &hash).unwrap();
            prop_assert_eq!(first, second);
            prop_assert!(first.offset() >= container.first_offset());
        }
    }
}
