//! The two hash-accelerated name lookups over the dynamic symbol table: the
//! classic SysV `.hash` and the GNU `.gnu.hash` flavor with its bloom
//! filter. Both answer find(name) with the symbol's table index, or nothing.
use super::io::{Layout, Reader};
use super::symbols::{SymbolSection, SymbolTableEntry};
use std::error::Error;
use std::sync::Arc;

/// Culled from the System V Application Binary Interface.
pub fn elf_hash(name: &str) -> u32 {
    let mut h: u32 = 0;
    for c in name.bytes() {
        h = (h << 4).wrapping_add(c as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// The djb2-style hash used by .gnu.hash.
pub fn gnu_hash(name: &str) -> u32 {
    let mut h: u32 = 5381;
    for c in name.bytes() {
        h = (h << 5).wrapping_add(h).wrapping_add(c as u32);
    }
    h
}

/// Classic SysV hash section: two counts, then the buckets, then the chains.
/// The table is small so it's read into memory up front.
pub struct SymHash {
    syms: SymbolSection,
    buckets: Vec<u32>,
    chains: Vec<u32>,
}

impl SymHash {
    pub fn new(
        layout: Layout,
        hash: Arc<dyn Reader>,
        syms: Arc<dyn Reader>,
        strings: Arc<dyn Reader>,
    ) -> Result<Self, Box<dyn Error>> {
        let nbucket = hash.read_word(layout, 0)?;
        let nchain = hash.read_word(layout, 4)?;
        let mut buckets = Vec::with_capacity(nbucket as usize);
        for i in 0..nbucket as u64 {
            buckets.push(hash.read_word(layout, 8 + i * 4)?);
        }
        let mut chains = Vec::with_capacity(nchain as usize);
        for i in 0..nchain as u64 {
            chains.push(hash.read_word(layout, 8 + (nbucket as u64 + i) * 4)?);
        }
        Ok(SymHash {
            syms: SymbolSection::new(layout, syms, strings),
            buckets,
            chains,
        })
    }

    /// Walk the bucket's chain comparing names until a hit or STN_UNDEF.
    pub fn find(&self, name: &str) -> Option<(u32, SymbolTableEntry)> {
        if self.buckets.is_empty() {
            return None;
        }
        let bucket = elf_hash(name) as usize % self.buckets.len();
        let mut i = self.buckets[bucket];
        while i != 0 {
            let candidate = self.syms.entry(i as usize).ok()?;
            if self.syms.name(&candidate).ok()? == name {
                return Some((i, candidate));
            }
            i = *self.chains.get(i as usize)?;
        }
        None
    }
}

/// GNU hash section: a fixed header, bloom filter words sized to the ELF
/// class, the buckets, then one chain word per symbol from symoffset on.
pub struct GnuHash {
    layout: Layout,
    hash: Arc<dyn Reader>,
    syms: SymbolSection,
    nbuckets: u32,
    symoffset: u32,
    bloom_size: u32,
    bloom_shift: u32,
}

impl GnuHash {
    pub fn new(
        layout: Layout,
        hash: Arc<dyn Reader>,
        syms: Arc<dyn Reader>,
        strings: Arc<dyn Reader>,
    ) -> Result<Self, Box<dyn Error>> {
        let nbuckets = hash.read_word(layout, 0)?;
        let symoffset = hash.read_word(layout, 4)?;
        let bloom_size = hash.read_word(layout, 8)?;
        let bloom_shift = hash.read_word(layout, 12)?;
        Ok(GnuHash {
            layout,
            hash,
            syms: SymbolSection::new(layout, syms, strings),
            nbuckets,
            symoffset,
            bloom_size,
            bloom_shift,
        })
    }

    fn bloom_word(&self, index: u64) -> Result<u64, Box<dyn Error>> {
        let word = self.layout.addr_size();
        self.hash.read_addr(self.layout, 16 + index * word)
    }

    fn bucket(&self, index: u64) -> Result<u32, Box<dyn Error>> {
        let blooms = 16 + self.bloom_size as u64 * self.layout.addr_size();
        self.hash.read_word(self.layout, blooms + index * 4)
    }

    fn chain(&self, index: u64) -> Result<u32, Box<dyn Error>> {
        let buckets =
            16 + self.bloom_size as u64 * self.layout.addr_size() + self.nbuckets as u64 * 4;
        self.hash.read_word(self.layout, buckets + index * 4)
    }

    pub fn find(&self, name: &str) -> Option<(u32, SymbolTableEntry)> {
        if self.nbuckets == 0 || self.bloom_size == 0 {
            return None;
        }
        let symhash = gnu_hash(name);
        let bits = self.layout.addr_size() as u32 * 8;

        let bloom = self
            .bloom_word((symhash / bits) as u64 % self.bloom_size as u64)
            .ok()?;
        let mask: u64 =
            1 << (symhash % bits) | 1 << ((symhash >> self.bloom_shift) % bits);
        if bloom & mask != mask {
            return None;
        }

        let mut idx = self.bucket(symhash as u64 % self.nbuckets as u64).ok()?;
        if idx < self.symoffset {
            return None;
        }
        loop {
            let chainhash = self.chain((idx - self.symoffset) as u64).ok()?;
            // bit 0 of the chain word is the end-of-chain marker, the rest
            // must match the hash
            if (chainhash | 1) == (symhash | 1) {
                let candidate = self.syms.entry(idx as usize).ok()?;
                if self.syms.name(&candidate).ok()? == name {
                    return Some((idx, candidate));
                }
            }
            if chainhash & 1 != 0 {
                return None;
            }
            idx += 1;
        }
    }
}
