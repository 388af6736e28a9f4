use log::{debug, trace};

/// The three alphabets for Z-string decoding. Position 0 of A2 is the
/// ZSCII escape and position 1 is newline; both are handled before the
/// table lookup, so their slots here are placeholders.
pub const ALPHABET_A0: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHABET_A1: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHABET_A2: &[u8] = b" \n0123456789.,!?_#'\"/\\-:()";

/// Decode the packed Z-string at `addr`.
///
/// Each 16-bit word packs three 5-bit Z-characters; the high bit of a word
/// marks the end of the string, with the characters of that word still
/// decoded. Abbreviation references splice in the pre-decoded strings from
/// `abbrevs` (pass an empty slice when decoding the abbreviation table
/// itself, since abbreviations do not nest).
///
/// Returns the decoded string and the number of words consumed.
pub fn decode_string(
    mem: &[u8],
    addr: u32,
    abbrevs: &[String],
) -> Result<(String, usize), String> {
    // Collect all z-characters first, then run the stateful walk.
    let mut zchars = Vec::new();
    let mut offset = addr as usize;
    loop {
        if offset + 1 >= mem.len() {
            return Err(format!(
                "Unterminated Z-string at {:05x} runs off the end of the image",
                addr
            ));
        }
        let word = ((mem[offset] as u16) << 8) | mem[offset + 1] as u16;
        offset += 2;

        zchars.push(((word >> 10) & 0x1F) as u8);
        zchars.push(((word >> 5) & 0x1F) as u8);
        zchars.push((word & 0x1F) as u8);
        trace!("Z-word {:04x}, end={}", word, word & 0x8000 != 0);

        if word & 0x8000 != 0 {
            break;
        }
    }

    let mut result = String::new();
    let mut alphabet = 0u8; // 0=A0, 1=A1, 2=A2; shifts are one-shot in v3
    let mut abbrev_bank = 0u8;

    let mut i = 0;
    while i < zchars.len() {
        let zc = zchars[i];
        i += 1;

        if abbrev_bank > 0 {
            let index = (abbrev_bank - 1) as usize * 32 + zc as usize;
            match abbrevs.get(index) {
                Some(s) => result.push_str(s),
                None => debug!("Abbreviation {} not in table, skipping", index),
            }
            abbrev_bank = 0;
            alphabet = 0;
            continue;
        }

        match zc {
            0 => result.push(' '),
            1..=3 => abbrev_bank = zc,
            4 => alphabet = 1,
            5 => alphabet = 2,
            6 if alphabet == 2 => {
                // ZSCII escape: the next two z-characters form a 10-bit code.
                if i + 1 < zchars.len() {
                    let code = ((zchars[i] as u16) << 5) | zchars[i + 1] as u16;
                    i += 2;
                    if (32..=126).contains(&code) {
                        result.push(code as u8 as char);
                    } else {
                        debug!("ZSCII escape {} outside printable range", code);
                        result.push('\0');
                    }
                } else {
                    debug!("ZSCII escape truncated at end of string");
                }
                alphabet = 0;
            }
            7 if alphabet == 2 => {
                result.push('\n');
                alphabet = 0;
            }
            _ => {
                let table = match alphabet {
                    0 => ALPHABET_A0,
                    1 => ALPHABET_A1,
                    _ => ALPHABET_A2,
                };
                result.push(table[(zc - 6) as usize] as char);
                alphabet = 0;
            }
        }
    }

    Ok((result, (offset - addr as usize) / 2))
}

/// Map a ZSCII output code to a character. Codes 32 to 126 are ASCII,
/// 13 is newline and 0 is nothing at all; everything else is dropped
/// with a debug note.
pub fn zscii_char(code: u16) -> Option<char> {
    match code {
        0 => None,
        13 => Some('\n'),
        32..=126 => Some(code as u8 as char),
        _ => {
            debug!("ZSCII output code {} not printable, dropped", code);
            None
        }
    }
}
