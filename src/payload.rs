//! Response payload decoding.
//!
//! Responses are zlib streams holding pseudo-XML: a run of `<parm>` records
//! that is not guaranteed to be a well-formed document. Fields are pulled out
//! tag by tag instead of through a full XML parser.

use std::io::Write;
use std::sync::LazyLock;

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use regex::Regex;

use crate::error::{Result, StbError};

/// Output growth step while inflating.
const INFLATE_CHUNK: usize = 8192;

static RECORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<parm>(.*?)</parm>").expect("record pattern is valid"));

/// Inflate a zlib stream into text.
///
/// Fails when the stream is corrupt or ends before the zlib trailer. Invalid
/// UTF-8 sequences are replaced rather than rejected.
pub fn inflate(compressed: &[u8]) -> Result<String> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(compressed.len().saturating_mul(4).max(INFLATE_CHUNK));

    loop {
        out.reserve(INFLATE_CHUNK);
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();

        let status = inflater
            .decompress_vec(&compressed[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| StbError::decompress(e.to_string()))?;

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if inflater.total_in() as usize == consumed && inflater.total_out() == produced {
                    return Err(StbError::decompress("truncated zlib stream"));
                }
            }
        }
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Compress bytes into a zlib stream.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// First `<tag>…</tag>` value in `xml`, or `""` if absent.
///
/// Matches the shortest body, which may span lines.
pub fn extract_tag<'a>(xml: &'a str, tag: &str) -> &'a str {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let Some(start) = xml.find(&open).map(|i| i + open.len()) else {
        return "";
    };
    match xml[start..].find(&close) {
        Some(len) => &xml[start..start + len],
        None => "",
    }
}

/// Inner content of every `<parm>` record, in document order.
pub fn extract_records(xml: &str) -> impl Iterator<Item = &str> {
    RECORD_PATTERN
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
}
