use crate::header::GcHeader;
use smol_str::SmolStr;

/// Interned short string: no outgoing references, always blackened on the
/// spot by `reallymark` (§4.4, "no outgoing refs").
#[derive(Debug)]
pub struct ShortString {
    pub header: GcHeader,
    pub content: SmolStr,
    pub hash: u64,
}

/// Long strings may wrap an externally-allocated payload (e.g. a buffer the
/// host handed in); `external` gates whether sweep must invoke the host's
/// release callback instead of just dropping `content` (§5 "release callback").
#[derive(Debug)]
pub struct LongString {
    pub header: GcHeader,
    pub content: Box<[u8]>,
    pub external: bool,
}

impl ShortString {
    pub fn new(header: GcHeader, content: impl Into<SmolStr>, hash: u64) -> Self {
        ShortString {
            header,
            content: content.into(),
            hash,
        }
    }
}

impl LongString {
    pub fn new(header: GcHeader, content: Box<[u8]>, external: bool) -> Self {
        LongString {
            header,
            content,
            external,
        }
    }
}
