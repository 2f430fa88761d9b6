// String table: interning of short strings, lazy hashing of long ones
//
// Short strings (<= LUAI_MAXSHORTLEN bytes) are unique per VM: equal
// contents always yield the same StringId. The table is a power-of-two
// array of chains threaded through `LuaString::hnext`.
//
// Long strings are never interned. Their hash is computed on first use
// and cached.

use tracing::debug;

use crate::gc::{GC, GcBody, StringId};
use crate::lua_value::{LuaString, LuaValue};
use crate::lua_vm::lua_limits::{
    LUAI_HASHLIMIT, LUAI_MAXSHORTLEN, MAX_INT, MAX_SIZE, MEMERRMSG, MINSTRTABSIZE, STRCACHE_M,
    STRCACHE_N, STRING_HEADER_SIZE,
};
use crate::lua_vm::{LuaError, LuaResult};

/// Lua 5.3 reserved words, in token order
pub const RESERVED_WORDS: [&str; 22] = [
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Seeded string hash (luaS_hash). Strings longer than 32 bytes are
/// sampled with a stride, walking backward from the end.
pub fn lua_hash(bytes: &[u8], seed: u32) -> u32 {
    let mut l = bytes.len();
    let mut h = seed ^ (l as u32);
    let step = (l >> LUAI_HASHLIMIT) + 1;
    while l >= step {
        h ^= (h << 5)
            .wrapping_add(h >> 2)
            .wrapping_add(bytes[l - 1] as u32);
        l -= step;
    }
    h
}

/// Bucket of a hash in a power-of-two table
#[inline(always)]
fn lmod(h: u32, size: usize) -> usize {
    debug_assert!(size.is_power_of_two());
    h as usize & (size - 1)
}

/// Bytes charged for a string object of `len` bytes
#[inline(always)]
pub fn string_size(len: usize) -> usize {
    STRING_HEADER_SIZE + len + 1
}

pub struct StringInterner {
    buckets: Vec<Option<StringId>>,
    nuse: usize,
    seed: u32,
    /// API literal cache, rows selected by literal address
    cache: Vec<[StringId; STRCACHE_M]>,
    memerrmsg: Option<StringId>,
}

impl StringInterner {
    pub fn new(size: usize, seed: u32) -> Self {
        let size = size.max(MINSTRTABSIZE).next_power_of_two();
        Self {
            buckets: vec![None; size],
            nuse: 0,
            seed,
            cache: Vec::new(),
            memerrmsg: None,
        }
    }

    /// Create the memory-error message and the reserved words, pin them,
    /// and fill the literal cache (luaS_init + luaX_init)
    pub fn init(&mut self, gc: &mut GC) -> LuaResult<()> {
        let msg = self.intern(gc, MEMERRMSG.as_bytes())?;
        gc.fix_object(msg.gc_ref());
        self.memerrmsg = Some(msg);
        self.cache = vec![[msg; STRCACHE_M]; STRCACHE_N];

        for (i, word) in RESERVED_WORDS.iter().enumerate() {
            let id = self.intern(gc, word.as_bytes())?;
            gc.fix_object(id.gc_ref());
            gc.pool.string_mut(id).extra = (i + 1) as u8;
        }
        Ok(())
    }

    #[inline(always)]
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Number of buckets
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Number of interned strings
    #[inline(always)]
    pub fn nuse(&self) -> usize {
        self.nuse
    }

    pub fn memerrmsg(&self) -> Option<StringId> {
        self.memerrmsg
    }

    /// Create a string value; short ones are interned, long ones are not
    pub fn new_string(&mut self, gc: &mut GC, bytes: &[u8]) -> LuaResult<LuaValue> {
        if bytes.len() <= LUAI_MAXSHORTLEN {
            self.intern(gc, bytes).map(LuaValue::ShortString)
        } else {
            self.create_long(gc, bytes).map(LuaValue::LongString)
        }
    }

    /// Find or create the unique short string with these bytes (internshrstr)
    pub fn intern(&mut self, gc: &mut GC, bytes: &[u8]) -> LuaResult<StringId> {
        debug_assert!(bytes.len() <= LUAI_MAXSHORTLEN);
        let h = lua_hash(bytes, self.seed);
        let mut cur = self.buckets[lmod(h, self.buckets.len())];
        while let Some(id) = cur {
            let s = gc.pool.string(id);
            if s.as_bytes() == bytes {
                // found, but maybe waiting to be swept: bring it back
                if gc.is_dead(id.gc_ref()) {
                    gc.header_mut(id.gc_ref()).change_white();
                }
                return Ok(id);
            }
            cur = s.hnext;
        }

        if self.nuse >= self.buckets.len() && self.buckets.len() <= MAX_INT / 2 {
            self.resize(gc, self.buckets.len() * 2);
        }

        let r = gc.allocate_with(string_size(bytes.len()), || {
            GcBody::String(LuaString::new_short(bytes, h))
        })?;
        let id = StringId(r.0);
        let b = lmod(h, self.buckets.len());
        gc.pool.string_mut(id).hnext = self.buckets[b];
        self.buckets[b] = Some(id);
        self.nuse += 1;
        Ok(id)
    }

    /// Reject lengths that cannot be represented as a string object
    pub fn check_long_len(len: usize) -> LuaResult<()> {
        if len >= MAX_SIZE - STRING_HEADER_SIZE {
            Err(LuaError::SizeExceeded)
        } else {
            Ok(())
        }
    }

    /// Standalone long string; hashed lazily
    pub fn create_long(&mut self, gc: &mut GC, bytes: &[u8]) -> LuaResult<StringId> {
        Self::check_long_len(bytes.len())?;
        let seed = self.seed;
        let r = gc.allocate_with(string_size(bytes.len()), || {
            GcBody::String(LuaString::new_long(bytes, seed))
        })?;
        Ok(StringId(r.0))
    }

    /// Hash of a long string, computed on first request (luaS_hashlongstr)
    pub fn hash_long_string(gc: &mut GC, id: StringId) -> u32 {
        let s = gc.pool.string_mut(id);
        debug_assert!(!s.is_short());
        if s.extra == 0 {
            s.hash = lua_hash(s.as_bytes(), s.hash);
            s.extra = 1;
        }
        s.hash
    }

    /// Rehash every chain into `new_size` buckets (luaS_resize)
    pub fn resize(&mut self, gc: &mut GC, new_size: usize) {
        let old_size = self.buckets.len();
        debug_assert!(new_size.is_power_of_two());
        if new_size > old_size {
            self.buckets.resize(new_size, None);
        }
        for i in 0..old_size {
            let mut p = self.buckets[i].take();
            while let Some(id) = p {
                let s = gc.pool.string_mut(id);
                p = s.hnext;
                let h = lmod(s.hash, new_size);
                s.hnext = self.buckets[h];
                self.buckets[h] = Some(id);
            }
        }
        if new_size < old_size {
            debug_assert!(
                self.buckets[new_size..].iter().all(Option::is_none),
                "vacated string-table buckets must be empty"
            );
            self.buckets.truncate(new_size);
            self.buckets.shrink_to_fit();
        }
        debug!(old_size, new_size, nuse = self.nuse, "string table resized");
    }

    /// Shrink when under a quarter full (collector's checkSizes)
    pub fn check_size(&mut self, gc: &mut GC) {
        let size = self.buckets.len();
        if self.nuse < size / 4 && size / 2 >= MINSTRTABSIZE {
            self.resize(gc, size / 2);
        }
    }

    /// Unlink a short string from its chain (luaS_remove)
    pub fn remove(&mut self, gc: &mut GC, id: StringId) {
        let (hash, next) = {
            let s = gc.pool.string(id);
            (s.hash, s.hnext)
        };
        let b = lmod(hash, self.buckets.len());
        if self.buckets[b] == Some(id) {
            self.buckets[b] = next;
        } else {
            let mut cur = self.buckets[b];
            loop {
                match cur {
                    Some(p) if gc.pool.string(p).hnext == Some(id) => {
                        gc.pool.string_mut(p).hnext = next;
                        break;
                    }
                    Some(p) => cur = gc.pool.string(p).hnext,
                    None => panic!("string {:?} is not in the string table", id),
                }
            }
        }
        self.nuse -= 1;
    }

    /// Memoized creation of a static literal (luaS_new). The row is picked
    /// by the literal's address; hits are confirmed by content.
    pub fn create_literal(&mut self, gc: &mut GC, s: &'static str) -> LuaResult<LuaValue> {
        let row = s.as_ptr() as usize % STRCACHE_N;
        if self.cache.is_empty() {
            return self.new_string(gc, s.as_bytes());
        }
        for &id in &self.cache[row] {
            if gc.pool.string(id).as_bytes() == s.as_bytes() {
                return Ok(as_value(gc, id));
            }
        }
        let value = self.new_string(gc, s.as_bytes())?;
        if let Some(id) = value.as_string_id() {
            let entries = &mut self.cache[row];
            entries.copy_within(0..STRCACHE_M - 1, 1);
            entries[0] = id;
        }
        Ok(value)
    }

    /// Drop cache entries the collector is about to reclaim (luaS_clearcache)
    pub fn clear_cache(&mut self, gc: &GC) {
        let Some(msg) = self.memerrmsg else {
            return;
        };
        for entry in self.cache.iter_mut().flatten() {
            if gc.header(entry.gc_ref()).is_white() {
                *entry = msg;
            }
        }
    }

    /// Ids currently held by the literal cache
    pub fn cached_literals(&self) -> impl Iterator<Item = StringId> + '_ {
        self.cache.iter().flatten().copied()
    }

    /// Every interned string, bucket by bucket
    pub fn iter(&self, gc: &GC) -> Vec<StringId> {
        let mut out = Vec::with_capacity(self.nuse);
        for head in &self.buckets {
            let mut cur = *head;
            while let Some(id) = cur {
                out.push(id);
                cur = gc.pool.string(id).hnext;
            }
        }
        out
    }
}

fn as_value(gc: &GC, id: StringId) -> LuaValue {
    if gc.pool.string(id).is_short() {
        LuaValue::ShortString(id)
    } else {
        LuaValue::LongString(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_seeded() {
        assert_ne!(lua_hash(b"hello", 1), lua_hash(b"hello", 2));
        assert_eq!(lua_hash(b"hello", 7), lua_hash(b"hello", 7));
    }

    #[test]
    fn test_hash_empty_is_seed_xor_len() {
        assert_eq!(lua_hash(b"", 0x1234), 0x1234);
    }

    #[test]
    fn test_long_hash_samples_bytes() {
        // 64 bytes: stride 3, so byte 0 (index l-64) is never read
        let mut a = vec![b'x'; 64];
        let b = a.clone();
        a[0] = b'y';
        assert_eq!(lua_hash(&a, 9), lua_hash(&b, 9));
        a[63] = b'z';
        assert_ne!(lua_hash(&a, 9), lua_hash(&b, 9));
    }
}
