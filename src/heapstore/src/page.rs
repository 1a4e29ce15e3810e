use common::ids::PageId;
use common::EngineError;
use std::collections::hash_map::DefaultHasher;
use std::convert::TryInto;
use std::hash::{Hash, Hasher};
use std::mem;

/// Bytes of page metadata: page id, local depth and entry count.
pub const HEADER_SIZE: usize = 8;
/// Bytes per stored fingerprint.
pub const ENTRY_SIZE: usize = 16;

/// 128-bit fingerprint of a key, built from two independently seeded 64-bit
/// hashes. The directory of the hash index is addressed by the low bits of `lo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub hi: u64,
    pub lo: u64,
}

impl Fingerprint {
    /// Fingerprints the given bytes.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Key to fingerprint, usually a canonical row encoding.
    pub fn of(bytes: &[u8]) -> Self {
        let mut h1 = DefaultHasher::new();
        0u8.hash(&mut h1);
        bytes.hash(&mut h1);
        let mut h2 = DefaultHasher::new();
        1u8.hash(&mut h2);
        bytes.hash(&mut h2);
        Fingerprint {
            hi: h1.finish(),
            lo: h2.finish(),
        }
    }
}

/*  struct BucketPage
 *  Purpose:
 *      A bucket of the extendible hash index, serialized into one spill page
 *  Elements:
 *      page_id: the identifier of the page in the spill file
 *      local_depth: how many low fingerprint bits all entries of the bucket share
 *      entries: the fingerprints held by the bucket
 *  Layout:
 *      |page_id u32|local_depth u16|count u16|count x (hi u64|lo u64)|zero padding|
 */
#[derive(Debug, Clone, PartialEq)]
pub struct BucketPage {
    pub page_id: PageId,
    pub local_depth: u16,
    pub entries: Vec<Fingerprint>,
}

impl BucketPage {
    /*  new
     *      purpose: creates an empty bucket
     *  inputs:
     *      page_id: the way to identify the new page
     *      local_depth: the bits shared by every entry that will go in
     *  outputs:
     *      a new page with no entries
     */
    pub fn new(page_id: PageId, local_depth: u16) -> Self {
        BucketPage {
            page_id,
            local_depth,
            entries: Vec::new(),
        }
    }

    /// Number of entries a page of the given size holds. Never more than the
    /// 16-bit count in the header can record.
    pub fn capacity(page_size: usize) -> usize {
        (page_size.saturating_sub(HEADER_SIZE) / ENTRY_SIZE).min(u16::MAX as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.entries.iter().any(|e| e == fp)
    }

    /*  to_bytes
     *      purpose: serialize the page into exactly page_size bytes
     *  inputs:
     *      &self: the page to serialize
     *      page_size: the size of a page in the spill file
     *  outputs:
     *      the bytes of the page, or an error if the entries do not fit
     */
    pub fn to_bytes(&self, page_size: usize) -> Result<Vec<u8>, EngineError> {
        if self.entries.len() > Self::capacity(page_size) {
            return Err(EngineError::InternalError(format!(
                "bucket page {} holds {} entries, capacity is {}",
                self.page_id,
                self.entries.len(),
                Self::capacity(page_size)
            )));
        }
        let mut bytes = Vec::with_capacity(page_size);
        bytes.extend_from_slice(&self.page_id.to_le_bytes());
        bytes.extend_from_slice(&self.local_depth.to_le_bytes());
        bytes.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for fp in &self.entries {
            bytes.extend_from_slice(&fp.hi.to_le_bytes());
            bytes.extend_from_slice(&fp.lo.to_le_bytes());
        }
        bytes.resize(page_size, 0);
        Ok(bytes)
    }

    /*  from_bytes
     *      purpose: rebuild a page from its serialized form
     *  inputs:
     *      data: the bytes read from the spill file
     *  outputs:
     *      the page, or an error if the bytes are truncated
     */
    pub fn from_bytes(data: &[u8]) -> Result<Self, EngineError> {
        let corrupt = || EngineError::InternalError(String::from("corrupt bucket page"));
        if data.len() < HEADER_SIZE {
            return Err(corrupt());
        }
        let page_id = PageId::from_le_bytes(data[0..4].try_into().map_err(|_| corrupt())?);
        let local_depth = u16::from_le_bytes(data[4..6].try_into().map_err(|_| corrupt())?);
        let count = u16::from_le_bytes(data[6..8].try_into().map_err(|_| corrupt())?) as usize;
        if data.len() < HEADER_SIZE + count * ENTRY_SIZE {
            return Err(corrupt());
        }
        let mut entries = Vec::with_capacity(count);
        let half = mem::size_of::<u64>();
        for i in 0..count {
            let start = HEADER_SIZE + i * ENTRY_SIZE;
            let hi = u64::from_le_bytes(
                data[start..start + half]
                    .try_into()
                    .map_err(|_| corrupt())?,
            );
            let lo = u64::from_le_bytes(
                data[start + half..start + ENTRY_SIZE]
                    .try_into()
                    .map_err(|_| corrupt())?,
            );
            entries.push(Fingerprint { hi, lo });
        }
        Ok(BucketPage {
            page_id,
            local_depth,
            entries,
        })
    }
}
