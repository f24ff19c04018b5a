//! A minimal header record, encoded with a small fixed "static table" of
//! known values instead of full QPACK.
//!
//! spec.md treats QPACK static-table header encoding/decoding as an external
//! collaborator (section 1) and scopes dynamic tables out entirely (section
//! 1 Non-goals). No such crate exists in this corpus's dependency graph —
//! `web-transport-proto::ConnectRequest` leans on a sibling `qpack` crate
//! that isn't part of the retrieved workspace — so this module stands in
//! with just enough of a static table to cover the fields spec.md's data
//! model actually needs: method, path, content-type, and status. See
//! DESIGN.md for the open-question resolution.

use bytes::{Buf, BufMut};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Connect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    None,
    TextHtml,
    TextPlain,
}

impl ContentType {
    fn tag(self) -> u8 {
        match self {
            ContentType::None => 0,
            ContentType::TextHtml => 1,
            ContentType::TextPlain => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ContentType::None),
            1 => Some(ContentType::TextHtml),
            2 => Some(ContentType::TextPlain),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    #[error("unexpected end of header block")]
    UnexpectedEnd,
    #[error("unknown method tag {0:x}")]
    UnknownMethod(u8),
    #[error("unknown content-type tag {0:x}")]
    UnknownContentType(u8),
    #[error("path too long for a single byte length prefix")]
    PathTooLong,
}

/// A decoded request HEADERS block: method + path, nothing else (this
/// endpoint doesn't use any other request header per spec.md's data model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub method: Method,
    pub path: Vec<u8>,
}

impl RequestHeader {
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), HeaderError> {
        if self.path.len() > u8::MAX as usize {
            return Err(HeaderError::PathTooLong);
        }

        let method_tag = match self.method {
            Method::Get => 0u8,
            Method::Post => 1,
            Method::Connect => 2,
        };
        buf.put_u8(method_tag);
        buf.put_u8(self.path.len() as u8);
        buf.put_slice(&self.path);
        Ok(())
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, HeaderError> {
        if buf.remaining() < 2 {
            return Err(HeaderError::UnexpectedEnd);
        }

        let method = match buf.get_u8() {
            0 => Method::Get,
            1 => Method::Post,
            2 => Method::Connect,
            tag => return Err(HeaderError::UnknownMethod(tag)),
        };

        let path_len = buf.get_u8() as usize;
        if buf.remaining() < path_len {
            return Err(HeaderError::UnexpectedEnd);
        }

        let mut path = vec![0u8; path_len];
        buf.copy_to_slice(&mut path);

        Ok(Self { method, path })
    }
}

/// A response HEADERS block: status + content-type.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeader {
    pub status: u16,
    pub content_type: ContentType,
}

impl ResponseHeader {
    pub fn ok(content_type: ContentType) -> Self {
        Self { status: 200, content_type }
    }

    pub fn not_found() -> Self {
        Self { status: 404, content_type: ContentType::None }
    }

    pub fn not_implemented() -> Self {
        Self { status: 501, content_type: ContentType::None }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.status);
        buf.put_u8(self.content_type.tag());
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, HeaderError> {
        if buf.remaining() < 3 {
            return Err(HeaderError::UnexpectedEnd);
        }
        let status = buf.get_u16();
        let content_type = ContentType::from_tag(buf.get_u8())
            .ok_or(HeaderError::UnknownContentType(status as u8))?;
        Ok(Self { status, content_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_roundtrip() {
        let req = RequestHeader { method: Method::Post, path: b"/echo".to_vec() };
        let mut buf = Vec::new();
        req.encode(&mut buf).unwrap();

        let mut cursor: &[u8] = &buf;
        let decoded = RequestHeader::decode(&mut cursor).unwrap();
        assert_eq!(decoded.method, Method::Post);
        assert_eq!(decoded.path, b"/echo");
    }

    #[test]
    fn response_header_roundtrip() {
        let resp = ResponseHeader::ok(ContentType::TextPlain);
        let mut buf = Vec::new();
        resp.encode(&mut buf);

        let mut cursor: &[u8] = &buf;
        let decoded = ResponseHeader::decode(&mut cursor).unwrap();
        assert_eq!(decoded.status, 200);
        assert_eq!(decoded.content_type, ContentType::TextPlain);
    }

    #[test]
    fn truncated_request_header_errors() {
        let mut cursor: &[u8] = &[0u8];
        assert_eq!(RequestHeader::decode(&mut cursor).unwrap_err(), HeaderError::UnexpectedEnd);
    }
}
