// Wire frames: 1 type byte, big-endian i32 length (including itself), body.

use bytes::{BufMut, Bytes};
use thiserror::Error;

/// Largest frame either side accepts.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Type byte plus length prefix.
pub const HEADER_LEN: usize = 5;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Incomplete message")]
    Incomplete,
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
    #[error("Frame of {0} bytes exceeds the 64 MiB limit")]
    TooLarge(usize),
}

/// Client → server.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    GetFlightInfo { command: Vec<u8> },
    DoGet { ticket: Vec<u8> },
    /// `data` is an IPC stream of parameter batches, possibly empty.
    DoPut { command: Vec<u8>, data: Vec<u8> },
    DoAction { action_type: String, body: Vec<u8> },
    Terminate,
}

/// Server → client.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    FlightInfo { schema: Vec<u8>, ticket: Vec<u8>, total_records: i64, total_bytes: i64 },
    DataStream { data: Vec<u8> },
    PutResult { app_metadata: Vec<u8> },
    ActionResult { body: Vec<u8> },
    ErrorResponse { code: String, message: String },
}

/// Bounds-checked reader over a frame body.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Incomplete);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_be_bytes(raw))
    }

    /// Null-terminated UTF-8 string.
    pub fn read_cstring(&mut self) -> Result<String, ProtocolError> {
        let rest = &self.buf[self.pos..];
        let end = rest.iter().position(|b| *b == 0).ok_or(ProtocolError::Incomplete)?;
        let s = String::from_utf8(rest[..end].to_vec())
            .map_err(|e| ProtocolError::InvalidFormat(e.to_string()))?;
        self.pos += end + 1;
        Ok(s)
    }

    /// Length-prefixed bytes; `-1` is absent.
    pub fn read_opt_blob(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(ProtocolError::InvalidFormat(format!("Negative length {len}")));
        }
        Ok(Some(self.take(len as usize)?.to_vec()))
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.read_opt_blob()?.unwrap_or_default())
    }

    pub fn read_opt_string(&mut self) -> Result<Option<String>, ProtocolError> {
        self.read_opt_blob()?
            .map(|b| String::from_utf8(b).map_err(|e| ProtocolError::InvalidFormat(e.to_string())))
            .transpose()
    }
}

pub fn put_cstring(buf: &mut Vec<u8>, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

pub fn put_blob(buf: &mut Vec<u8>, data: &[u8]) {
    buf.put_i32(data.len() as i32);
    buf.put_slice(data);
}

pub fn put_opt_string(buf: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => put_blob(buf, s.as_bytes()),
        None => buf.put_i32(-1),
    }
}

fn frame(msg_type: u8, body: Vec<u8>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(msg_type);
    buf.put_i32((4 + body.len()) as i32);
    buf.put_slice(&body);
    buf
}

/// Validate a frame header and return (type, body length).
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(u8, usize), ProtocolError> {
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len < 4 {
        return Err(ProtocolError::InvalidFormat(format!("Invalid frame length {len}")));
    }
    let len = len as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge(len));
    }
    Ok((header[0], len - 4))
}

fn split_frame(buf: &Bytes) -> Result<(u8, &[u8]), ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::Incomplete);
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buf[..HEADER_LEN]);
    let (msg_type, body_len) = parse_header(&header)?;
    let body = &buf[HEADER_LEN..];
    if body.len() < body_len {
        return Err(ProtocolError::Incomplete);
    }
    Ok((msg_type, &body[..body_len]))
}

impl FrontendMessage {
    /// Parse a complete frame (type byte included).
    pub fn parse(buf: &Bytes) -> Result<Self, ProtocolError> {
        let (msg_type, body) = split_frame(buf)?;
        let mut cur = Cursor::new(body);
        match msg_type {
            b'F' => Ok(FrontendMessage::GetFlightInfo { command: cur.read_blob()? }),
            b'G' => Ok(FrontendMessage::DoGet { ticket: cur.read_blob()? }),
            b'P' => {
                let command = cur.read_blob()?;
                let data = cur.read_blob()?;
                Ok(FrontendMessage::DoPut { command, data })
            }
            b'A' => {
                let action_type = cur.read_cstring()?;
                let body = cur.read_blob()?;
                Ok(FrontendMessage::DoAction { action_type, body })
            }
            b'X' => Ok(FrontendMessage::Terminate),
            _ => Err(ProtocolError::InvalidMessageType(msg_type)),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let msg_type = match self {
            FrontendMessage::GetFlightInfo { command } => {
                put_blob(&mut body, command);
                b'F'
            }
            FrontendMessage::DoGet { ticket } => {
                put_blob(&mut body, ticket);
                b'G'
            }
            FrontendMessage::DoPut { command, data } => {
                put_blob(&mut body, command);
                put_blob(&mut body, data);
                b'P'
            }
            FrontendMessage::DoAction { action_type, body: action_body } => {
                put_cstring(&mut body, action_type);
                put_blob(&mut body, action_body);
                b'A'
            }
            FrontendMessage::Terminate => b'X',
        };
        frame(msg_type, body)
    }
}

impl BackendMessage {
    pub fn parse(buf: &Bytes) -> Result<Self, ProtocolError> {
        let (msg_type, body) = split_frame(buf)?;
        let mut cur = Cursor::new(body);
        match msg_type {
            b'I' => {
                let schema = cur.read_blob()?;
                let ticket = cur.read_blob()?;
                let total_records = cur.read_i64()?;
                let total_bytes = cur.read_i64()?;
                Ok(BackendMessage::FlightInfo { schema, ticket, total_records, total_bytes })
            }
            b'D' => Ok(BackendMessage::DataStream { data: cur.read_blob()? }),
            b'M' => Ok(BackendMessage::PutResult { app_metadata: cur.read_blob()? }),
            b'R' => Ok(BackendMessage::ActionResult { body: cur.read_blob()? }),
            b'E' => {
                let code = cur.read_cstring()?;
                let message = cur.read_cstring()?;
                Ok(BackendMessage::ErrorResponse { code, message })
            }
            _ => Err(ProtocolError::InvalidMessageType(msg_type)),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let msg_type = match self {
            BackendMessage::FlightInfo { schema, ticket, total_records, total_bytes } => {
                put_blob(&mut body, schema);
                put_blob(&mut body, ticket);
                body.put_i64(*total_records);
                body.put_i64(*total_bytes);
                b'I'
            }
            BackendMessage::DataStream { data } => {
                put_blob(&mut body, data);
                b'D'
            }
            BackendMessage::PutResult { app_metadata } => {
                put_blob(&mut body, app_metadata);
                b'M'
            }
            BackendMessage::ActionResult { body: result } => {
                put_blob(&mut body, result);
                b'R'
            }
            BackendMessage::ErrorResponse { code, message } => {
                put_cstring(&mut body, code);
                put_cstring(&mut body, message);
                b'E'
            }
        };
        frame(msg_type, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_parse_get_flight_info() {
        // hand-built frame: 'F', length, blob(len 3, "abc")
        let mut buf = BytesMut::new();
        buf.put_u8(b'F');
        buf.put_i32(4 + 4 + 3);
        buf.put_i32(3);
        buf.put_slice(b"abc");
        let msg = FrontendMessage::parse(&buf.freeze()).unwrap();
        assert_eq!(msg, FrontendMessage::GetFlightInfo { command: b"abc".to_vec() });
    }

    #[test]
    fn test_frontend_frames_round_trip() {
        let messages = vec![
            FrontendMessage::DoGet { ticket: vec![1, 2, 3] },
            FrontendMessage::DoPut { command: vec![9], data: vec![] },
            FrontendMessage::DoAction { action_type: "ClosePreparedStatement".into(), body: vec![0; 5] },
            FrontendMessage::Terminate,
        ];
        for msg in messages {
            let bytes = Bytes::from(msg.serialize());
            assert_eq!(FrontendMessage::parse(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_backend_frames_round_trip() {
        let messages = vec![
            BackendMessage::FlightInfo { schema: vec![1], ticket: vec![2], total_records: -1, total_bytes: -1 },
            BackendMessage::DataStream { data: vec![3; 10] },
            BackendMessage::PutResult { app_metadata: vec![] },
            BackendMessage::ActionResult { body: vec![4] },
            BackendMessage::ErrorResponse { code: "NOT_FOUND".into(), message: "gone".into() },
        ];
        for msg in messages {
            let bytes = Bytes::from(msg.serialize());
            assert_eq!(BackendMessage::parse(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_serialize_error_response_layout() {
        let bytes = BackendMessage::ErrorResponse { code: "X".into(), message: "m".into() }.serialize();
        assert_eq!(bytes, vec![b'E', 0, 0, 0, 8, b'X', 0, b'm', 0]);
    }

    #[test]
    fn test_truncated_frame_is_incomplete() {
        let full = FrontendMessage::DoGet { ticket: vec![1, 2, 3] }.serialize();
        let cut = Bytes::from(full[..full.len() - 1].to_vec());
        assert!(matches!(FrontendMessage::parse(&cut), Err(ProtocolError::Incomplete)));
    }

    #[test]
    fn test_unknown_type_byte() {
        let bytes = Bytes::from(vec![b'Z', 0, 0, 0, 4]);
        assert!(matches!(
            FrontendMessage::parse(&bytes),
            Err(ProtocolError::InvalidMessageType(b'Z'))
        ));
    }

    #[test]
    fn test_header_limits() {
        assert!(matches!(parse_header(&[b'F', 0, 0, 0, 2]), Err(ProtocolError::InvalidFormat(_))));
        let too_big = ((MAX_FRAME_SIZE + 1) as i32).to_be_bytes();
        let header = [b'F', too_big[0], too_big[1], too_big[2], too_big[3]];
        assert!(matches!(parse_header(&header), Err(ProtocolError::TooLarge(_))));
        assert_eq!(parse_header(&[b'X', 0, 0, 0, 4]).unwrap(), (b'X', 0));
    }

    #[test]
    fn test_cursor_optional_values() {
        let mut buf = Vec::new();
        put_opt_string(&mut buf, Some("a"));
        put_opt_string(&mut buf, None);
        let mut cur = Cursor::new(&buf);
        assert_eq!(cur.read_opt_string().unwrap(), Some("a".to_string()));
        assert_eq!(cur.read_opt_string().unwrap(), None);
        assert_eq!(cur.remaining(), 0);
    }
}
