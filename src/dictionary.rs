use log::debug;

use crate::header::Header;
use crate::text;
use crate::zbytes;

/// A dictionary entry: the decoded word (at most 6 characters in version
/// 3) and the byte address of the entry in the image.
#[derive(Debug, Clone)]
pub struct DictEntry {
    pub word: String,
    pub addr: u16,
}

/// The game dictionary, parsed once at load: the separator characters the
/// tokenizer treats as standalone tokens, plus every entry with its
/// decoded text.
#[derive(Debug, Clone)]
pub struct Dictionary {
    pub separators: Vec<char>,
    pub entry_len: u8,
    pub entries: Vec<DictEntry>,
}

impl Dictionary {
    /// Layout: one count byte, the separator bytes, one entry-length
    /// byte, a two-byte entry count, then the entries themselves. Each
    /// entry begins with a packed Z-string.
    pub fn parse(mem: &[u8], header: &Header, abbrevs: &[String]) -> Result<Dictionary, String> {
        let base = header.dictionary as u32;
        let read_byte = |addr: u32| -> Result<u8, String> {
            mem.get(addr as usize)
                .copied()
                .ok_or_else(|| format!("Dictionary truncated at {:05x}", addr))
        };

        let num_sep = read_byte(base)? as u32;
        let mut separators = Vec::with_capacity(num_sep as usize);
        for i in 0..num_sep {
            separators.push(read_byte(base + 1 + i)? as char);
        }

        let entry_len = read_byte(base + 1 + num_sep)?;
        if entry_len < 4 {
            return Err(format!(
                "Dictionary entry length {} too short for packed text",
                entry_len
            ));
        }
        let num_entries = zbytes::read_word(mem, base + 2 + num_sep)?;
        let start = base + 2 + num_sep + 2;

        let mut entries = Vec::with_capacity(num_entries as usize);
        for i in 0..num_entries as u32 {
            let addr = start + i * entry_len as u32;
            let (word, _) = text::decode_string(mem, addr, abbrevs)?;
            entries.push(DictEntry {
                word,
                addr: addr as u16,
            });
        }

        debug!(
            "Dictionary: {} entries, {} separators, entry length {}",
            entries.len(),
            separators.len(),
            entry_len
        );

        Ok(Dictionary {
            separators,
            entry_len,
            entries,
        })
    }

    pub fn is_separator(&self, c: char) -> bool {
        self.separators.contains(&c)
    }

    /// Find the entry for `word`, normalized to lowercase. Entries are
    /// stored truncated, so an entry matches when its text is a prefix of
    /// the input word; the longest such entry wins. A miss returns an
    /// entry with address 0.
    pub fn lookup(&self, word: &str) -> DictEntry {
        let word = word.to_lowercase();
        let mut best = DictEntry {
            word: String::new(),
            addr: 0,
        };
        for entry in &self.entries {
            if word.starts_with(&entry.word) && entry.word.len() > best.word.len() {
                best = entry.clone();
            }
        }
        best
    }
}
