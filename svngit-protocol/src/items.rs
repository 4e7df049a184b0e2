//! ra_svn wire item codec
//!
//! The svn:// protocol is a stream of four item kinds: numbers, words,
//! counted strings and parenthesized lists. The parser is incremental: it
//! either yields one complete item plus the number of bytes it consumed, or
//! reports that more input is needed without consuming anything. Every item
//! the writer emits is followed by a single space, which is the canonical
//! framing svnserve produces.

use bytes::Bytes;
use svngit_core::{BridgeError, Result};

/// One protocol item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Number(u64),
    Word(String),
    Str(Bytes),
    List(Vec<Item>),
}

impl Item {
    pub fn word(w: &str) -> Item {
        Item::Word(w.to_string())
    }

    pub fn str(s: &str) -> Item {
        Item::Str(Bytes::copy_from_slice(s.as_bytes()))
    }

    pub fn list(items: Vec<Item>) -> Item {
        Item::List(items)
    }

    pub fn as_number(&self) -> Result<u64> {
        match self {
            Item::Number(n) => Ok(*n),
            other => Err(malformed(format!("expected number, got {:?}", other))),
        }
    }

    pub fn as_word(&self) -> Result<&str> {
        match self {
            Item::Word(w) => Ok(w),
            other => Err(malformed(format!("expected word, got {:?}", other))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Item::Str(s) => {
                std::str::from_utf8(s).map_err(|_| malformed("non-utf8 string item".into()))
            }
            other => Err(malformed(format!("expected string, got {:?}", other))),
        }
    }

    pub fn as_bytes(&self) -> Result<&Bytes> {
        match self {
            Item::Str(s) => Ok(s),
            other => Err(malformed(format!("expected string, got {:?}", other))),
        }
    }

    pub fn as_list(&self) -> Result<&[Item]> {
        match self {
            Item::List(items) => Ok(items),
            other => Err(malformed(format!("expected list, got {:?}", other))),
        }
    }

    /// Word items double as booleans on the wire
    pub fn as_bool(&self) -> Result<bool> {
        match self.as_word()? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(malformed(format!("expected true/false, got '{}'", other))),
        }
    }
}

pub fn malformed(msg: String) -> BridgeError {
    BridgeError::ProtocolViolation(msg)
}

fn is_ws(b: u8) -> bool {
    b == b' ' || b == b'\n' || b == b'\r' || b == b'\t'
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

enum Step {
    Incomplete,
    Done(Item),
}

impl<'a> Cursor<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.buf.len() && is_ws(self.buf[self.pos]) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// A number or word must be terminated by whitespace (or, inside a
    /// list, by the closing paren's preceding space); until the terminator
    /// arrives the atom could still grow, so it counts as incomplete.
    fn read_atom(&mut self) -> Result<Step> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_ws(b) || b == b':' {
                break;
            }
            self.pos += 1;
        }
        let Some(terminator) = self.peek() else {
            return Ok(Step::Incomplete);
        };
        let atom = &self.buf[start..self.pos];

        if terminator == b':' {
            // Counted string: <len>:<bytes>
            let len = parse_decimal(atom)?;
            self.pos += 1;
            let end = self
                .pos
                .checked_add(len as usize)
                .ok_or_else(|| malformed("string length overflow".into()))?;
            if end > self.buf.len() {
                return Ok(Step::Incomplete);
            }
            let data = Bytes::copy_from_slice(&self.buf[self.pos..end]);
            self.pos = end;
            return Ok(Step::Done(Item::Str(data)));
        }

        self.pos += 1; // consume the whitespace terminator
        if atom.is_empty() {
            return Err(malformed("empty item".into()));
        }
        if atom[0].is_ascii_digit() {
            return Ok(Step::Done(Item::Number(parse_decimal(atom)?)));
        }
        if !atom[0].is_ascii_alphabetic() {
            return Err(malformed(format!(
                "invalid item starting with 0x{:02x}",
                atom[0]
            )));
        }
        let word = std::str::from_utf8(atom)
            .map_err(|_| malformed("non-ascii word".into()))?
            .to_string();
        Ok(Step::Done(Item::Word(word)))
    }

    fn read_item(&mut self) -> Result<Step> {
        self.skip_ws();
        let Some(b) = self.peek() else {
            return Ok(Step::Incomplete);
        };
        if b == b'(' {
            self.pos += 1;
            let mut items = Vec::new();
            loop {
                self.skip_ws();
                match self.peek() {
                    None => return Ok(Step::Incomplete),
                    Some(b')') => {
                        self.pos += 1;
                        return Ok(Step::Done(Item::List(items)));
                    }
                    Some(_) => match self.read_item()? {
                        Step::Incomplete => return Ok(Step::Incomplete),
                        Step::Done(item) => items.push(item),
                    },
                }
            }
        }
        self.read_atom()
    }
}

fn parse_decimal(digits: &[u8]) -> Result<u64> {
    if digits.is_empty() {
        return Err(malformed("empty number".into()));
    }
    let mut value: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(malformed(format!("bad digit 0x{:02x} in number", b)));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as u64))
            .ok_or_else(|| malformed("number overflow".into()))?;
    }
    Ok(value)
}

/// Try to parse one complete item from the front of `buf`
///
/// `Ok(None)` means the buffer holds only a prefix of an item; nothing is
/// consumed and the caller should read more bytes.
pub fn parse_item(buf: &[u8]) -> Result<Option<(Item, usize)>> {
    let mut cursor = Cursor { buf, pos: 0 };
    match cursor.read_item()? {
        Step::Incomplete => Ok(None),
        Step::Done(item) => Ok(Some((item, cursor.pos))),
    }
}

/// Append the canonical encoding of `item` to `out`
pub fn write_item(out: &mut Vec<u8>, item: &Item) {
    match item {
        Item::Number(n) => {
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(b' ');
        }
        Item::Word(w) => {
            out.extend_from_slice(w.as_bytes());
            out.push(b' ');
        }
        Item::Str(s) => {
            out.extend_from_slice(s.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(s);
            out.push(b' ');
        }
        Item::List(items) => {
            out.extend_from_slice(b"( ");
            for item in items {
                write_item(out, item);
            }
            out.extend_from_slice(b") ");
        }
    }
}

pub fn encode(item: &Item) -> Vec<u8> {
    let mut out = Vec::new();
    write_item(&mut out, item);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Item> {
        let mut out = Vec::new();
        let mut pos = 0;
        while let Some((item, used)) = parse_item(&input[pos..]).unwrap() {
            out.push(item);
            pos += used;
        }
        out
    }

    #[test]
    fn test_atoms() {
        assert_eq!(parse_all(b"42 "), vec![Item::Number(42)]);
        assert_eq!(parse_all(b"edit-pipeline "), vec![Item::word("edit-pipeline")]);
        assert_eq!(parse_all(b"5:hello "), vec![Item::str("hello")]);
        // Counted strings may contain anything, including spaces and parens.
        assert_eq!(parse_all(b"4:( ) "), vec![Item::str("( )")]);
        assert_eq!(parse_all(b"0: "), vec![Item::str("")]);
    }

    #[test]
    fn test_nested_list() {
        let items = parse_all(b"( success ( 2 2 ( ) ( edit-pipeline ) ) ) ");
        assert_eq!(items.len(), 1);
        let outer = items[0].as_list().unwrap();
        assert_eq!(outer[0].as_word().unwrap(), "success");
        let inner = outer[1].as_list().unwrap();
        assert_eq!(inner[0].as_number().unwrap(), 2);
        assert!(inner[2].as_list().unwrap().is_empty());
    }

    #[test]
    fn test_incremental_parse_consumes_nothing() {
        // Prefixes of each item kind are all "need more".
        for prefix in [&b"( success ( 2"[..], b"42", b"5:hel", b"wor"] {
            assert!(parse_item(prefix).unwrap().is_none());
        }
        // A complete item followed by trailing garbage reports its own length.
        let (item, used) = parse_item(b"7 ( incomplete").unwrap().unwrap();
        assert_eq!(item, Item::Number(7));
        assert_eq!(used, 2);
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        assert!(parse_item(b"12x ").is_err());
        assert!(parse_item(b"99999999999999999999999 ").is_err());
        assert!(parse_item(b"( !bad ) ").is_err());
    }

    #[test]
    fn test_write_round_trip() {
        let item = Item::list(vec![
            Item::word("success"),
            Item::list(vec![Item::Number(12), Item::str("svn://host/repo")]),
        ]);
        let encoded = encode(&item);
        let (parsed, used) = parse_item(&encoded).unwrap().unwrap();
        assert_eq!(parsed, item);
        assert_eq!(used, encoded.len());
    }

    #[test]
    fn test_bool_words() {
        assert!(Item::word("true").as_bool().unwrap());
        assert!(!Item::word("false").as_bool().unwrap());
        assert!(Item::word("maybe").as_bool().is_err());
    }
}
