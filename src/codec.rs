//! GMScreen wire codec for tokio.
//!
//! Requests and responses use different framings:
//!
//! ```text
//! Request (client → device), ASCII header + UTF-8 XML:
//! +-------+-----------------+-----+----------------------------------+
//! | Start | 7-digit length  | End | <?xml ...?><Command request="N"> |
//! +-------+-----------------+-----+----------------------------------+
//!
//! Response (device → client), binary header + zlib stream:
//! +------+--------------+----------+-------------------------------+
//! | GCDH | len (u32 LE) | 8 bytes  | zlib payload (`len` bytes)    |
//! +------+--------------+----------+-------------------------------+
//!  0      4              8          16
//! ```
//!
//! The response stream may carry garbage before a marker, and a marker-like
//! byte sequence may appear where no frame starts. [`StbCodec`] discards the
//! garbage and resynchronizes on implausible lengths.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::error::{Result, StbError};
use crate::payload;
use crate::types::{Channel, CommandCode};

/// Marker that starts every response frame.
pub const FRAME_MARKER: [u8; 4] = *b"GCDH";

/// Fixed response header length, marker included.
pub const RESPONSE_HEADER_LEN: usize = 16;

/// Largest accepted response payload. Anything above is a false marker.
pub const MAX_RESPONSE_PAYLOAD: usize = 500_000;

/// Request header prefix.
pub const REQUEST_START: &[u8] = b"Start";

/// Request header suffix.
pub const REQUEST_END: &[u8] = b"End";

/// Digits in the zero-padded request length field.
pub const LENGTH_DIGITS: usize = 7;

/// `Start` + length + `End`.
pub const REQUEST_HEADER_LEN: usize = REQUEST_START.len() + LENGTH_DIGITS + REQUEST_END.len();

/// XML declaration the device expects on every request.
pub const XML_DECLARATION: &str = "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>";

/// Pseudo MAC appended to the instance id in the identify command.
pub const PSEUDO_MAC_SUFFIX: &str = "-02:00:00:00:00:00";

/// An outgoing command.
///
/// The payload is inserted verbatim into the `<Command>` element. Nothing is
/// XML-escaped: callers must not put `<` or `&` into dynamic values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Request code
    pub code: CommandCode,
    /// Inner XML content, if any
    pub payload: Option<String>,
}

impl Command {
    /// Create a command without payload.
    pub fn new(code: CommandCode) -> Self {
        Self {
            code,
            payload: None,
        }
    }

    /// Create a command with inner XML content.
    pub fn with_payload(code: CommandCode, payload: impl Into<String>) -> Self {
        Self {
            code,
            payload: Some(payload.into()),
        }
    }

    /// Handshake identification.
    pub fn identify(device_model: &str, instance_id: &str) -> Self {
        Self::with_payload(
            CommandCode::Identify,
            format!("<data>{device_model}</data><uuid>{instance_id}{PSEUDO_MAC_SUFFIX}</uuid>"),
        )
    }

    /// Handshake status request.
    pub fn status() -> Self {
        Self::new(CommandCode::Status)
    }

    /// Channel page `[from, to]`, both inclusive.
    pub fn get_channels(from: u32, to: u32) -> Self {
        Self::with_payload(
            CommandCode::GetChannels,
            format!("<parm><FromIndex>{from}</FromIndex><ToIndex>{to}</ToIndex></parm>"),
        )
    }

    /// Favorite group list.
    pub fn get_favorite_groups() -> Self {
        Self::new(CommandCode::GetFavoriteGroups)
    }

    /// Device identity and channel count.
    pub fn get_stb_info() -> Self {
        Self::new(CommandCode::GetStbInfo)
    }

    /// Device clock.
    pub fn get_time() -> Self {
        Self::new(CommandCode::GetTime)
    }

    /// Zap to a program.
    pub fn change_channel(program_id: &str) -> Self {
        Self::with_payload(
            CommandCode::ChangeChannel,
            format!("<parm><TvState>0</TvState><ProgramId>{program_id}</ProgramId></parm>"),
        )
    }

    /// Write a channel's favorite membership.
    pub fn set_favorite(channel: &Channel) -> Self {
        Self::with_payload(
            CommandCode::SetFavorite,
            format!(
                "<TvState>0</TvState><FavMark>{}</FavMark><FavorGroupID>{}</FavorGroupID><ProgramId>{}</ProgramId>",
                channel.fav_mark(),
                channel.favor_group_id_string(),
                channel.program_id
            ),
        )
    }

    /// Remote-control key press.
    pub fn send_key(key_code: u32) -> Self {
        Self::with_payload(
            CommandCode::SendKey,
            format!("<parm><KeyVal>{key_code}</KeyVal></parm>"),
        )
    }

    /// Full XML document for this command.
    pub fn to_xml(&self) -> String {
        let code = self.code.as_u16();
        match &self.payload {
            Some(payload) => {
                format!("{XML_DECLARATION}<Command request=\"{code}\">{payload}</Command>")
            }
            None => format!("{XML_DECLARATION}<Command request=\"{code}\" />"),
        }
    }

    /// Encode the full request frame into `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) {
        let xml = self.to_xml();
        dst.reserve(REQUEST_HEADER_LEN + xml.len());
        dst.put_slice(REQUEST_START);
        dst.put_slice(format!("{:0width$}", xml.len(), width = LENGTH_DIGITS).as_bytes());
        dst.put_slice(REQUEST_END);
        dst.put_slice(xml.as_bytes());
    }

    /// Encode the full request frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_to(&mut buf);
        buf.freeze()
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// A request as seen by the device side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    /// Numeric request code
    pub code: u16,
    /// XML byte length declared in the header
    pub length: usize,
    /// Inner content of `<Command>`, `None` for the self-closing form
    pub payload: Option<String>,
}

/// Decode the XML length from a request header.
///
/// Returns `Ok(None)` until `REQUEST_HEADER_LEN` bytes are available.
pub fn decode_request_header(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < REQUEST_HEADER_LEN {
        return Ok(None);
    }
    let digits_end = REQUEST_START.len() + LENGTH_DIGITS;
    if &buf[..REQUEST_START.len()] != REQUEST_START || &buf[digits_end..REQUEST_HEADER_LEN] != REQUEST_END {
        return Err(StbError::invalid_frame("missing Start/End request header"));
    }
    let digits = &buf[REQUEST_START.len()..digits_end];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(StbError::invalid_frame("non-numeric request length"));
    }
    // All ASCII digits, so both conversions succeed.
    let length = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StbError::invalid_frame("bad request length"))?;
    Ok(Some(length))
}

/// Parse the request code and inner content of a request XML document.
pub fn parse_request_xml(xml: &str) -> Result<DecodedRequest> {
    const ATTR: &str = "request=\"";

    let start = xml
        .find(ATTR)
        .ok_or_else(|| StbError::invalid_frame("missing request attribute"))?
        + ATTR.len();
    let end = xml[start..]
        .find('"')
        .ok_or_else(|| StbError::invalid_frame("unterminated request attribute"))?
        + start;
    let code = xml[start..end]
        .parse()
        .map_err(|_| StbError::invalid_frame("non-numeric request code"))?;

    let rest = &xml[end + 1..];
    let payload = if rest.trim_start().starts_with("/>") {
        None
    } else {
        let open = rest
            .find('>')
            .ok_or_else(|| StbError::invalid_frame("unterminated Command element"))?;
        let close = rest
            .rfind("</Command>")
            .ok_or_else(|| StbError::invalid_frame("missing </Command>"))?;
        if close < open {
            return Err(StbError::invalid_frame("malformed Command element"));
        }
        Some(rest[open + 1..close].to_string())
    };

    Ok(DecodedRequest {
        code,
        length: xml.len(),
        payload,
    })
}

/// Outcome of scanning a response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// No marker yet; keep reading.
    NoMarker,
    /// Marker at `offset`, header incomplete.
    Partial { offset: usize },
    /// Marker at `offset` with a length outside `(0, MAX_RESPONSE_PAYLOAD]`.
    /// Skip the four marker bytes and scan again.
    Desync { offset: usize, declared: u32 },
    /// Complete header at `offset` announcing `length` payload bytes.
    Header { offset: usize, length: usize },
}

/// Scan a response buffer for the next frame header.
///
/// Bytes before the returned offset are garbage.
pub fn scan_for_frame(buf: &[u8]) -> Scan {
    let Some(offset) = buf.windows(FRAME_MARKER.len()).position(|w| w == FRAME_MARKER) else {
        return Scan::NoMarker;
    };
    let header = &buf[offset..];
    if header.len() < RESPONSE_HEADER_LEN {
        return Scan::Partial { offset };
    }
    let declared = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if declared == 0 || declared as usize > MAX_RESPONSE_PAYLOAD {
        return Scan::Desync { offset, declared };
    }
    Scan::Header {
        offset,
        length: declared as usize,
    }
}

/// One response frame: the compressed payload after the 16-byte header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub payload: Bytes,
}

impl ResponseEnvelope {
    /// Inflate the payload into text.
    pub fn inflate(&self) -> Result<String> {
        payload::inflate(&self.payload)
    }
}

/// Encode a device response frame around `xml`.
pub fn encode_response(xml: &str) -> Result<Bytes> {
    let compressed = payload::deflate(xml.as_bytes())?;
    let length = u32::try_from(compressed.len())
        .map_err(|_| StbError::invalid_frame("response payload too large"))?;

    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + compressed.len());
    buf.put_slice(&FRAME_MARKER);
    buf.put_u32_le(length);
    buf.put_bytes(0, RESPONSE_HEADER_LEN - FRAME_MARKER.len() - 4);
    buf.put_slice(&compressed);
    Ok(buf.freeze())
}

/// Client-side GMScreen codec.
///
/// Encodes [`Command`]s and decodes [`ResponseEnvelope`]s. Bytes after a
/// complete frame stay in the buffer for the next one.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use stb_gmscreen::codec::{Command, StbCodec};
///
/// let stream = TcpStream::connect("192.168.1.12:20000").await?;
/// let mut framed = Framed::new(stream, StbCodec::new());
///
/// framed.send(Command::get_stb_info()).await?;
/// if let Some(envelope) = framed.next().await {
///     println!("{}", envelope?.inflate()?);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct StbCodec {
    state: DecodeState,
}

#[derive(Debug, Clone, Copy, Default)]
enum DecodeState {
    #[default]
    WaitingForHeader,
    WaitingForPayload {
        length: usize,
    },
}

impl StbCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for StbCodec {
    type Item = ResponseEnvelope;
    type Error = StbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.state {
                DecodeState::WaitingForHeader => match scan_for_frame(src) {
                    Scan::NoMarker => {
                        // Keep a possible marker prefix split across reads
                        let keep = FRAME_MARKER.len() - 1;
                        if src.len() > keep {
                            src.advance(src.len() - keep);
                        }
                        return Ok(None);
                    }
                    Scan::Partial { offset } => {
                        src.advance(offset);
                        return Ok(None);
                    }
                    Scan::Desync { offset, declared } => {
                        debug!(declared, "implausible response length, resyncing");
                        src.advance(offset + FRAME_MARKER.len());
                    }
                    Scan::Header { offset, length } => {
                        if offset > 0 {
                            trace!(skipped = offset, "discarding bytes before marker");
                        }
                        src.advance(offset);
                        self.state = DecodeState::WaitingForPayload { length };
                    }
                },

                DecodeState::WaitingForPayload { length } => {
                    let total = RESPONSE_HEADER_LEN + length;
                    if src.len() < total {
                        src.reserve(total - src.len());
                        return Ok(None);
                    }

                    let mut frame = src.split_to(total);
                    frame.advance(RESPONSE_HEADER_LEN);
                    self.state = DecodeState::WaitingForHeader;
                    trace!(length, "response frame complete");
                    return Ok(Some(ResponseEnvelope {
                        payload: frame.freeze(),
                    }));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // Trailing garbage or a truncated frame at EOF is dropped
                src.clear();
                self.state = DecodeState::WaitingForHeader;
                Ok(None)
            }
        }
    }
}

impl Encoder<Command> for StbCodec {
    type Error = StbError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        item.encode_to(dst);
        Ok(())
    }
}

/// Device-side GMScreen codec.
///
/// Decodes requests and encodes XML responses. Used by device emulators and
/// the test harness.
#[derive(Debug, Clone, Default)]
pub struct StbRequestCodec;

impl StbRequestCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for StbRequestCodec {
    type Item = DecodedRequest;
    type Error = StbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let length = match decode_request_header(src) {
                Ok(Some(length)) => length,
                Ok(None) => return Ok(None),
                Err(_) => {
                    // Skip one byte and look for the next header
                    src.advance(1);
                    continue;
                }
            };

            let total = REQUEST_HEADER_LEN + length;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let mut frame = src.split_to(total);
            frame.advance(REQUEST_HEADER_LEN);
            let xml = std::str::from_utf8(&frame)
                .map_err(|_| StbError::invalid_frame("request is not UTF-8"))?;
            let mut request = parse_request_xml(xml)?;
            request.length = length;
            return Ok(Some(request));
        }
    }
}

impl Encoder<&str> for StbRequestCodec {
    type Error = StbError;

    fn encode(&mut self, xml: &str, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&encode_response(xml)?);
        Ok(())
    }
}
