//! # UniqueKey - Packed Grain Key
//!
//! ## Purpose
//!
//! The 128-bit identity payload underneath every grain and activation id: two
//! 64-bit words (`n0`, `n1`), a 64-bit `type_code_data` word carrying the key
//! category in its top byte and the application type code in its low 32 bits,
//! and an optional UTF-8 extension string for keys whose natural identity is
//! a string suffix. Immutable after construction; both hash codes are
//! computed lazily and memoized.
//!
//! ## Key Shapes
//!
//! - **Guid key**: `n0`/`n1` hold the 16 guid bytes.
//! - **Long key**: `n0 == 0`, `n1` holds the integer key.
//! - **System-target key**: `n1` packs `address<<32 | system_id<<16 | port`
//!   so a per-silo system target is addressable without a registry.
//! - **Extension key**: category `KeyExtGrain`, extension string present.
//!   An empty extension is a valid extension, distinct from "no extension".

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{IdentityError, Result};
use crate::hashing;

/// Key category, stored in the top byte of `type_code_data`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Category {
    None = 0,
    SystemTarget = 1,
    SystemGrain = 2,
    Grain = 3,
    ClientGrain = 4,
    Task = 5,
    KeyExtGrain = 6,
    ClientAddressableObject = 7,
}

const CATEGORY_SHIFT: u32 = 56;
const TYPE_CODE_MASK: u64 = 0xFFFF_FFFF;

/// Minimum byte-form length: three u64 words plus the extension-present flag
const MIN_BYTE_LEN: usize = 25;
/// Hex-form length of the three packed words
const HEX_WORDS_LEN: usize = 48;

/// Packed grain key. See module docs for the field layout.
pub struct UniqueKey {
    n0: u64,
    n1: u64,
    type_code_data: u64,
    key_ext: Option<String>,
    // Memoized hashes, 0 = not yet computed. A legitimately zero hash is
    // recomputed on every call, which is harmless.
    fast_hash: AtomicU32,
    uniform_hash: AtomicU32,
}

impl UniqueKey {
    fn from_parts(n0: u64, n1: u64, type_code_data: u64, key_ext: Option<String>) -> Self {
        Self {
            n0,
            n1,
            type_code_data,
            key_ext,
            fast_hash: AtomicU32::new(0),
            uniform_hash: AtomicU32::new(0),
        }
    }

    fn pack_type_code(category: Category, type_code: u32) -> u64 {
        ((u8::from(category) as u64) << CATEGORY_SHIFT) | (type_code as u64 & TYPE_CODE_MASK)
    }

    fn check_legal_to_create(
        category: Category,
        key_ext: &Option<String>,
    ) -> Result<()> {
        if category == Category::SystemTarget {
            return Err(IdentityError::invalid_key(
                "system-target keys must be created through new_system_target_key",
            ));
        }
        match (category, key_ext) {
            (Category::KeyExtGrain, None) => Err(IdentityError::invalid_key(
                "extension keys require an extension string",
            )),
            (Category::KeyExtGrain, Some(_)) => Ok(()),
            (_, Some(_)) => Err(IdentityError::invalid_key(
                "key extension is only legal for extension keys",
            )),
            (_, None) => Ok(()),
        }
    }

    /// Create a key from a guid payload.
    pub fn new_key_from_guid(
        guid: Uuid,
        category: Category,
        type_code: u32,
        key_ext: Option<String>,
    ) -> Result<Self> {
        Self::check_legal_to_create(category, &key_ext)?;
        let bytes = guid.into_bytes();
        let mut w0 = [0u8; 8];
        let mut w1 = [0u8; 8];
        w0.copy_from_slice(&bytes[0..8]);
        w1.copy_from_slice(&bytes[8..16]);
        Ok(Self::from_parts(
            u64::from_le_bytes(w0),
            u64::from_le_bytes(w1),
            Self::pack_type_code(category, type_code),
            key_ext,
        ))
    }

    /// Create a long key (`n0 == 0`).
    pub fn new_key_from_long(
        key: i64,
        category: Category,
        type_code: u32,
        key_ext: Option<String>,
    ) -> Result<Self> {
        Self::check_legal_to_create(category, &key_ext)?;
        Ok(Self::from_parts(
            0,
            key as u64,
            Self::pack_type_code(category, type_code),
            key_ext,
        ))
    }

    /// Create a system-target key, packing the silo endpoint into `n1` so
    /// the same numbered system target on different silos gets distinct keys.
    pub fn new_system_target_key(system_id: u16, endpoint: Option<SocketAddr>) -> Self {
        let (addr_word, port) = match endpoint {
            Some(ep) => (Self::address_word(ep.ip()), ep.port()),
            None => (0, 0),
        };
        let n1 = ((addr_word as u64) << 32) | ((system_id as u64) << 16) | port as u64;
        Self::from_parts(0, n1, Self::pack_type_code(Category::SystemTarget, 0), None)
    }

    fn address_word(ip: IpAddr) -> u32 {
        match ip {
            IpAddr::V4(v4) => u32::from_be_bytes(v4.octets()),
            IpAddr::V6(v6) => hashing::jenkins_hash(&v6.octets()),
        }
    }

    /// Create a fresh random grain key.
    pub fn random() -> Self {
        // Random keys always construct legally, so the factory cannot fail.
        Self::from_parts(
            {
                let bytes = Uuid::new_v4().into_bytes();
                let mut w = [0u8; 8];
                w.copy_from_slice(&bytes[0..8]);
                u64::from_le_bytes(w)
            },
            {
                let bytes = Uuid::new_v4().into_bytes();
                let mut w = [0u8; 8];
                w.copy_from_slice(&bytes[8..16]);
                u64::from_le_bytes(w)
            },
            Self::pack_type_code(Category::Grain, 0),
            None,
        )
    }

    /// Decode a key from its byte form.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_BYTE_LEN {
            return Err(IdentityError::malformed_bytes(format!(
                "key buffer too short: {} bytes, need at least {}",
                data.len(),
                MIN_BYTE_LEN
            )));
        }
        let mut w = [0u8; 8];
        w.copy_from_slice(&data[0..8]);
        let n0 = u64::from_le_bytes(w);
        w.copy_from_slice(&data[8..16]);
        let n1 = u64::from_le_bytes(w);
        w.copy_from_slice(&data[16..24]);
        let type_code_data = u64::from_le_bytes(w);

        let category_byte = ((type_code_data >> CATEGORY_SHIFT) & 0xFF) as u8;
        Category::try_from(category_byte).map_err(|_| {
            IdentityError::malformed_bytes(format!("unknown key category {}", category_byte))
        })?;

        let key_ext = match data[24] {
            0 => None,
            1 => {
                let ext = std::str::from_utf8(&data[MIN_BYTE_LEN..]).map_err(|e| {
                    IdentityError::malformed_bytes(format!("key extension is not UTF-8: {}", e))
                })?;
                Some(ext.to_string())
            }
            flag => {
                return Err(IdentityError::malformed_bytes(format!(
                    "invalid extension-present flag {}",
                    flag
                )))
            }
        };
        Ok(Self::from_parts(n0, n1, type_code_data, key_ext))
    }

    /// Encode the key to its byte form. Round-trips through [`from_bytes`],
    /// including the extension-present flag.
    ///
    /// [`from_bytes`]: UniqueKey::from_bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let ext_len = self.key_ext.as_ref().map(|e| e.len()).unwrap_or(0);
        let mut out = Vec::with_capacity(MIN_BYTE_LEN + ext_len);
        out.extend_from_slice(&self.n0.to_le_bytes());
        out.extend_from_slice(&self.n1.to_le_bytes());
        out.extend_from_slice(&self.type_code_data.to_le_bytes());
        match &self.key_ext {
            Some(ext) => {
                out.push(1);
                out.extend_from_slice(ext.as_bytes());
            }
            None => out.push(0),
        }
        out
    }

    /// Encode the key as fixed-width hex words plus the extension suffix.
    pub fn to_hex_string(&self) -> String {
        let mut s = format!(
            "{:016x}{:016x}{:016x}",
            self.n0, self.n1, self.type_code_data
        );
        if self.has_key_ext() {
            s.push('+');
            match &self.key_ext {
                Some(ext) => s.push_str(ext),
                None => s.push_str("null"),
            }
        }
        s
    }

    /// Parse a key from its hex string form. A plain guid string is also
    /// accepted and produces a grain-category guid key.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.len() < HEX_WORDS_LEN {
            let guid = Uuid::parse_str(trimmed).map_err(|e| {
                IdentityError::parse(format!("not a key or guid: {}", e), trimmed)
            })?;
            return Self::new_key_from_guid(guid, Category::Grain, 0, None);
        }

        // trimmed.len() counts bytes, so a multi-byte character can satisfy
        // the length check while breaking the fixed word offsets. get()
        // rejects non-boundary slices instead of panicking.
        let hex_word = |range: std::ops::Range<usize>, name: &'static str| {
            trimmed
                .get(range)
                .ok_or_else(|| IdentityError::parse(format!("bad {} word", name), trimmed))
        };
        let n0 = u64::from_str_radix(hex_word(0..16, "n0")?, 16)
            .map_err(|e| IdentityError::parse(format!("bad n0 word: {}", e), trimmed))?;
        let n1 = u64::from_str_radix(hex_word(16..32, "n1")?, 16)
            .map_err(|e| IdentityError::parse(format!("bad n1 word: {}", e), trimmed))?;
        let type_code_data = u64::from_str_radix(hex_word(32..48, "type-code")?, 16)
            .map_err(|e| IdentityError::parse(format!("bad type-code word: {}", e), trimmed))?;

        let category_byte = ((type_code_data >> CATEGORY_SHIFT) & 0xFF) as u8;
        Category::try_from(category_byte).map_err(|_| {
            IdentityError::parse(format!("unknown key category {}", category_byte), trimmed)
        })?;

        let key_ext = if trimmed.len() > HEX_WORDS_LEN {
            let suffix = trimmed.get(HEX_WORDS_LEN..).ok_or_else(|| {
                IdentityError::parse("malformed extension suffix", trimmed)
            })?;
            let ext = suffix.strip_prefix('+').ok_or_else(|| {
                IdentityError::parse("extension suffix must start with '+'", trimmed)
            })?;
            if ext == "null" {
                None
            } else {
                Some(ext.to_string())
            }
        } else {
            None
        };
        Ok(Self::from_parts(n0, n1, type_code_data, key_ext))
    }

    /// Key category from the top byte of `type_code_data`.
    pub fn category(&self) -> Category {
        let byte = ((self.type_code_data >> CATEGORY_SHIFT) & 0xFF) as u8;
        // The byte is validated by every construction path.
        Category::try_from(byte).unwrap_or(Category::None)
    }

    /// Application type code from the low 32 bits of `type_code_data`.
    pub fn type_code(&self) -> u32 {
        (self.type_code_data & TYPE_CODE_MASK) as u32
    }

    /// True iff the payload is a long key (`n0 == 0`).
    pub fn is_long_key(&self) -> bool {
        self.n0 == 0
    }

    /// True iff the key carries a string extension.
    pub fn has_key_ext(&self) -> bool {
        self.category() == Category::KeyExtGrain
    }

    pub fn is_system_target_key(&self) -> bool {
        self.category() == Category::SystemTarget
    }

    /// Extract the long primary key. Fails unless the key is a long key
    /// without an extension.
    pub fn primary_key_to_long(&self) -> Result<i64> {
        if self.has_key_ext() {
            return Err(IdentityError::invalid_access(
                "key has an extension; use primary_key_to_long_with_ext",
            ));
        }
        self.long_key_value()
    }

    /// Extract the long primary key along with the extension, if any.
    pub fn primary_key_to_long_with_ext(&self) -> Result<(i64, Option<&str>)> {
        Ok((self.long_key_value()?, self.key_ext.as_deref()))
    }

    fn long_key_value(&self) -> Result<i64> {
        if !self.is_long_key() {
            return Err(IdentityError::invalid_access(
                "key is not a long key (n0 != 0)",
            ));
        }
        Ok(self.n1 as i64)
    }

    /// Extract the guid primary key. Fails if the key has an extension.
    pub fn primary_key_to_guid(&self) -> Result<Uuid> {
        if self.has_key_ext() {
            return Err(IdentityError::invalid_access(
                "key has an extension; use primary_key_to_guid_with_ext",
            ));
        }
        Ok(self.guid_value())
    }

    /// Extract the guid primary key along with the extension, if any.
    pub fn primary_key_to_guid_with_ext(&self) -> (Uuid, Option<&str>) {
        (self.guid_value(), self.key_ext.as_deref())
    }

    fn guid_value(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&self.n0.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.n1.to_le_bytes());
        Uuid::from_bytes(bytes)
    }

    /// Extract the system id packed into a system-target key.
    pub fn primary_key_to_system_id(&self) -> Result<u16> {
        if !self.is_system_target_key() {
            return Err(IdentityError::invalid_access(
                "key is not a system-target key",
            ));
        }
        Ok(((self.n1 >> 16) & 0xFFFF) as u16)
    }

    pub fn key_ext(&self) -> Option<&str> {
        self.key_ext.as_deref()
    }

    /// Fast bucket hash, memoized on first call.
    pub fn hash_code(&self) -> u32 {
        let cached = self.fast_hash.load(AtomicOrdering::Relaxed);
        if cached != 0 {
            return cached;
        }
        let mut hash = hashing::knuth_hash(self.n0, self.n1, self.type_code_data);
        if let Some(ext) = &self.key_ext {
            hash ^= hashing::jenkins_hash(ext.as_bytes());
        }
        self.fast_hash.store(hash, AtomicOrdering::Relaxed);
        hash
    }

    /// Uniform avalanche hash for consistent-ring placement, memoized.
    pub fn uniform_hash_code(&self) -> u32 {
        let cached = self.uniform_hash.load(AtomicOrdering::Relaxed);
        if cached != 0 {
            return cached;
        }
        let hash = if self.key_ext.is_some() {
            hashing::jenkins_hash(&self.to_bytes())
        } else {
            hashing::jenkins_hash_words(self.type_code_data, self.n0, self.n1)
        };
        self.uniform_hash.store(hash, AtomicOrdering::Relaxed);
        hash
    }
}

impl Clone for UniqueKey {
    fn clone(&self) -> Self {
        Self {
            n0: self.n0,
            n1: self.n1,
            type_code_data: self.type_code_data,
            key_ext: self.key_ext.clone(),
            fast_hash: AtomicU32::new(self.fast_hash.load(AtomicOrdering::Relaxed)),
            uniform_hash: AtomicU32::new(self.uniform_hash.load(AtomicOrdering::Relaxed)),
        }
    }
}

impl PartialEq for UniqueKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_code_data == other.type_code_data
            && self.n0 == other.n0
            && self.n1 == other.n1
            && self.key_ext == other.key_ext
    }
}

impl Eq for UniqueKey {}

impl PartialOrd for UniqueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UniqueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_code_data
            .cmp(&other.type_code_data)
            .then_with(|| self.n0.cmp(&other.n0))
            .then_with(|| self.n1.cmp(&other.n1))
            .then_with(|| self.key_ext.cmp(&other.key_ext))
    }
}

impl std::hash::Hash for UniqueKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash_code());
    }
}

impl fmt::Debug for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueKey")
            .field("n0", &self.n0)
            .field("n1", &self.n1)
            .field("type_code_data", &self.type_code_data)
            .field("key_ext", &self.key_ext)
            .finish()
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl Serialize for UniqueKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_string())
    }
}

impl<'de> Deserialize<'de> for UniqueKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        UniqueKey::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn guid_key(category: Category, ext: Option<&str>) -> UniqueKey {
        UniqueKey::new_key_from_guid(Uuid::new_v4(), category, 42, ext.map(String::from)).unwrap()
    }

    #[test]
    fn test_byte_roundtrip_plain() {
        let key = guid_key(Category::Grain, None);
        let decoded = UniqueKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn test_byte_roundtrip_with_ext() {
        let key = guid_key(Category::KeyExtGrain, Some("tenant-7"));
        let decoded = UniqueKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(key, decoded);
        assert_eq!(decoded.key_ext(), Some("tenant-7"));
    }

    #[test]
    fn test_empty_ext_distinct_from_none() {
        let with_empty = guid_key(Category::KeyExtGrain, Some(""));
        let decoded = UniqueKey::from_bytes(&with_empty.to_bytes()).unwrap();
        assert_eq!(decoded.key_ext(), Some(""));
        assert_eq!(with_empty, decoded);
    }

    #[test]
    fn test_hex_roundtrip() {
        let key = guid_key(Category::Grain, None);
        let parsed = UniqueKey::parse(&key.to_hex_string()).unwrap();
        assert_eq!(key, parsed);

        let ext_key = guid_key(Category::KeyExtGrain, Some("suffix"));
        let parsed = UniqueKey::parse(&ext_key.to_hex_string()).unwrap();
        assert_eq!(ext_key, parsed);
    }

    #[test]
    fn test_parse_plain_guid() {
        let guid = Uuid::new_v4();
        let key = UniqueKey::parse(&guid.to_string()).unwrap();
        assert_eq!(key.category(), Category::Grain);
        assert_eq!(key.primary_key_to_guid().unwrap(), guid);
    }

    #[test]
    fn test_parse_rejects_multibyte_input() {
        // Byte lengths that pass the hex-words length check while a
        // multi-byte character straddles a word boundary.
        let mut straddles_last_word = "0".repeat(47);
        straddles_last_word.push('é');
        let mut straddles_first_word = "0".repeat(15);
        straddles_first_word.push('é');
        straddles_first_word.push_str(&"0".repeat(32));
        let mut bad_suffix = "0".repeat(46);
        bad_suffix.push('é');
        for input in [straddles_last_word, straddles_first_word, bad_suffix] {
            assert!(matches!(
                UniqueKey::parse(&input),
                Err(IdentityError::Parse { .. })
            ));
        }
    }

    #[test]
    fn test_new_key_rejects_system_target() {
        let err = UniqueKey::new_key_from_guid(Uuid::new_v4(), Category::SystemTarget, 0, None);
        assert!(err.is_err());
    }

    #[test]
    fn test_new_key_rejects_misplaced_ext() {
        let err = UniqueKey::new_key_from_guid(
            Uuid::new_v4(),
            Category::Grain,
            0,
            Some("ext".to_string()),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_long_key_shape() {
        let key = UniqueKey::new_key_from_long(12345, Category::Grain, 7, None).unwrap();
        assert!(key.is_long_key());
        assert_eq!(key.primary_key_to_long().unwrap(), 12345);
        assert_eq!(key.type_code(), 7);

        let guid = guid_key(Category::Grain, None);
        if !guid.is_long_key() {
            assert!(guid.primary_key_to_long().is_err());
        }
    }

    #[test]
    fn test_ext_key_blocks_ext_agnostic_accessors() {
        let key = UniqueKey::new_key_from_long(
            99,
            Category::KeyExtGrain,
            0,
            Some("ext".to_string()),
        )
        .unwrap();
        assert!(key.primary_key_to_long().is_err());
        let (value, ext) = key.primary_key_to_long_with_ext().unwrap();
        assert_eq!(value, 99);
        assert_eq!(ext, Some("ext"));
    }

    #[test]
    fn test_system_target_key_packing() {
        let ep: SocketAddr = "10.0.0.1:11111".parse().unwrap();
        let key = UniqueKey::new_system_target_key(12, Some(ep));
        assert!(key.is_system_target_key());
        assert_eq!(key.primary_key_to_system_id().unwrap(), 12);

        // Same system id on a different silo must produce a distinct key.
        let ep2: SocketAddr = "10.0.0.2:11111".parse().unwrap();
        let key2 = UniqueKey::new_system_target_key(12, Some(ep2));
        assert_ne!(key, key2);
    }

    #[test]
    fn test_hash_stability() {
        let key = guid_key(Category::Grain, None);
        assert_eq!(key.hash_code(), key.hash_code());
        assert_eq!(key.uniform_hash_code(), key.uniform_hash_code());

        let copy = key.clone();
        assert_eq!(key.hash_code(), copy.hash_code());
        assert_eq!(key.uniform_hash_code(), copy.uniform_hash_code());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = UniqueKey::new_key_from_long(1, Category::Grain, 0, None).unwrap();
        let b = UniqueKey::new_key_from_long(2, Category::Grain, 0, None).unwrap();
        assert!(a < b);

        let low_cat = UniqueKey::new_key_from_long(5, Category::SystemGrain, 0, None).unwrap();
        let high_cat = UniqueKey::new_key_from_long(1, Category::Grain, 0, None).unwrap();
        assert!(low_cat < high_cat);
    }

    #[test]
    fn test_serde_hex_form() {
        let key = guid_key(Category::Grain, None);
        let json = serde_json::to_string(&key).unwrap();
        let back: UniqueKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }

    proptest! {
        #[test]
        fn prop_byte_roundtrip(n1 in any::<i64>(), type_code in any::<u32>(), ext in proptest::option::of("[a-zA-Z0-9+_./-]{0,32}")) {
            let category = if ext.is_some() { Category::KeyExtGrain } else { Category::Grain };
            let key = UniqueKey::new_key_from_long(n1, category, type_code, ext).unwrap();
            let decoded = UniqueKey::from_bytes(&key.to_bytes()).unwrap();
            prop_assert_eq!(&key, &decoded);
            let parsed = UniqueKey::parse(&key.to_hex_string()).unwrap();
            // The hex form cannot distinguish a literal "null" extension.
            if key.key_ext() != Some("null") {
                prop_assert_eq!(&key, &parsed);
            }
        }
    }
}
