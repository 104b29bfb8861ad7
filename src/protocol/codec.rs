//! Wire codec for request and response frames
//!
//! Pure functions: no I/O and no shared state. [`FrameDecoder`] cuts complete
//! frames out of a read buffer; the `decode_*` functions parse one frame.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use thiserror::Error;

use super::{
    Request, Response, DEFAULT_MAX_FRAME_SIZE, FIELD_SEPARATOR, FIXED_HEADER_SIZE,
    LENGTH_PREFIX_SIZE, PAIR_SEPARATOR,
};

/// Codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Header length {0} is shorter than the fixed header")]
    HeaderTooShort(u32),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Frame length mismatch: header declares {declared} bytes, frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Stale {field} length: stored {stored}, actual {actual}")]
    StaleLength {
        field: &'static str,
        stored: u32,
        actual: u32,
    },

    #[error("Invalid {field}: {value:?} contains a frame separator")]
    InvalidField { field: &'static str, value: String },

    #[error("Malformed frame: {0}")]
    Malformed(&'static str),

    #[error("Invalid UTF-8 in {0}")]
    Utf8(&'static str),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// The fixed 15 byte prefix shared by requests and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub header_length: u32,
    pub body_length: u32,
    pub message_id: u32,
    pub version: u8,
    pub compressor: u8,
    pub serializer: u8,
}

impl FrameHeader {
    /// Parse the fixed prefix from the start of `buf`
    pub fn parse(buf: &[u8]) -> CodecResult<Self> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: FIXED_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let header_length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (header_length as usize) < FIXED_HEADER_SIZE {
            return Err(CodecError::HeaderTooShort(header_length));
        }

        Ok(Self {
            header_length,
            body_length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            message_id: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            version: buf[12],
            compressor: buf[13],
            serializer: buf[14],
        })
    }

    /// Total bytes the frame occupies on the wire
    pub fn frame_length(&self) -> usize {
        self.header_length as usize + self.body_length as usize
    }

    fn check_frame(&self, actual: usize) -> CodecResult<()> {
        let declared = self.frame_length();
        if declared != actual {
            return Err(CodecError::LengthMismatch { declared, actual });
        }
        Ok(())
    }
}

fn check_field(field: &'static str, value: &str) -> CodecResult<()> {
    if value
        .bytes()
        .any(|b| b == FIELD_SEPARATOR || b == PAIR_SEPARATOR)
    {
        return Err(CodecError::InvalidField {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn check_length(field: &'static str, stored: u32, actual: usize) -> CodecResult<()> {
    let actual = u32::try_from(actual)
        .map_err(|_| CodecError::FrameTooLarge(actual, u32::MAX as usize))?;
    if stored != actual {
        return Err(CodecError::StaleLength {
            field,
            stored,
            actual,
        });
    }
    Ok(())
}

fn put_fixed_header(
    buf: &mut BytesMut,
    header_length: u32,
    body_length: u32,
    message_id: u32,
    codes: [u8; 3],
) {
    buf.put_u32(header_length);
    buf.put_u32(body_length);
    buf.put_u32(message_id);
    buf.put_slice(&codes);
}

/// Encode a request. Its lengths must have been refreshed beforehand.
pub fn encode_request(req: &Request) -> CodecResult<Bytes> {
    check_field("service name", &req.service_name)?;
    check_field("method name", &req.method_name)?;
    for (key, value) in &req.meta {
        check_field("meta key", key)?;
        check_field("meta value", value)?;
    }
    check_length("header", req.header_length, req.expected_header_length())?;
    check_length("body", req.body_length, req.data.len())?;

    let mut buf =
        BytesMut::with_capacity(req.header_length as usize + req.body_length as usize);
    put_fixed_header(
        &mut buf,
        req.header_length,
        req.body_length,
        req.message_id,
        [req.version, req.compressor, req.serializer],
    );

    buf.put_slice(req.service_name.as_bytes());
    buf.put_u8(FIELD_SEPARATOR);
    buf.put_slice(req.method_name.as_bytes());
    buf.put_u8(FIELD_SEPARATOR);
    for (key, value) in &req.meta {
        buf.put_slice(key.as_bytes());
        buf.put_u8(PAIR_SEPARATOR);
        buf.put_slice(value.as_bytes());
        buf.put_u8(FIELD_SEPARATOR);
    }
    buf.put_slice(&req.data);

    Ok(buf.freeze())
}

/// Split off everything before the next `\n`, consuming the separator
fn take_field<'a>(rest: &mut &'a [u8]) -> Option<&'a [u8]> {
    let index = rest.iter().position(|&b| b == FIELD_SEPARATOR)?;
    let field = &rest[..index];
    *rest = &rest[index + 1..];
    Some(field)
}

fn to_string(field: &'static str, bytes: &[u8]) -> CodecResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::Utf8(field))
}

/// Decode one complete request frame
pub fn decode_request(frame: Bytes) -> CodecResult<Request> {
    let header = FrameHeader::parse(&frame)?;
    header.check_frame(frame.len())?;

    let header_end = header.header_length as usize;
    let mut rest = &frame[FIXED_HEADER_SIZE..header_end];

    let service_name = take_field(&mut rest)
        .ok_or(CodecError::Malformed("service name is not terminated"))?;
    let service_name = to_string("service name", service_name)?;
    let method_name =
        take_field(&mut rest).ok_or(CodecError::Malformed("method name is not terminated"))?;
    let method_name = to_string("method name", method_name)?;

    let mut meta = HashMap::new();
    while !rest.is_empty() {
        let pair = take_field(&mut rest)
            .ok_or(CodecError::Malformed("metadata pair is not terminated"))?;
        let split = pair
            .iter()
            .position(|&b| b == PAIR_SEPARATOR)
            .ok_or(CodecError::Malformed("metadata pair has no key/value separator"))?;
        meta.insert(
            to_string("meta key", &pair[..split])?,
            to_string("meta value", &pair[split + 1..])?,
        );
    }

    Ok(Request {
        header_length: header.header_length,
        body_length: header.body_length,
        message_id: header.message_id,
        version: header.version,
        compressor: header.compressor,
        serializer: header.serializer,
        service_name,
        method_name,
        meta,
        data: frame.slice(header_end..),
    })
}

/// Encode a response. Its lengths must have been refreshed beforehand.
pub fn encode_response(resp: &Response) -> CodecResult<Bytes> {
    check_length("header", resp.header_length, resp.expected_header_length())?;
    check_length("body", resp.body_length, resp.data.len())?;

    let mut buf =
        BytesMut::with_capacity(resp.header_length as usize + resp.body_length as usize);
    put_fixed_header(
        &mut buf,
        resp.header_length,
        resp.body_length,
        resp.message_id,
        [resp.version, resp.compressor, resp.serializer],
    );
    buf.put_slice(&resp.error);
    buf.put_slice(&resp.data);

    Ok(buf.freeze())
}

/// Decode one complete response frame
pub fn decode_response(frame: Bytes) -> CodecResult<Response> {
    let header = FrameHeader::parse(&frame)?;
    header.check_frame(frame.len())?;

    let header_end = header.header_length as usize;
    Ok(Response {
        header_length: header.header_length,
        body_length: header.body_length,
        message_id: header.message_id,
        version: header.version,
        compressor: header.compressor,
        serializer: header.serializer,
        error: frame.slice(FIXED_HEADER_SIZE..header_end),
        data: frame.slice(header_end..),
    })
}

/// Cuts complete frames out of a growing read buffer
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Attempt to take one frame from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> CodecResult<Option<Bytes>> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let header_length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let body_length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if (header_length as usize) < FIXED_HEADER_SIZE {
            return Err(CodecError::HeaderTooShort(header_length));
        }

        let length = header_length as usize + body_length as usize;
        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge(length, self.max_frame_size));
        }

        if buf.len() < length {
            buf.reserve(length - buf.len());
            return Ok(None);
        }

        Ok(Some(buf.split_to(length).freeze()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DEADLINE_META_KEY, ONEWAY_META_KEY};

    fn sample_request() -> Request {
        let mut req = Request::new("user-service", "GetById");
        req.message_id = 7;
        req.compressor = 1;
        req.serializer = 2;
        req.meta
            .insert(ONEWAY_META_KEY.to_string(), "true".to_string());
        req.meta
            .insert(DEADLINE_META_KEY.to_string(), "1700000000000".to_string());
        req.data = Bytes::from_static(b"{\"id\":123}");
        req.refresh_lengths();
        req
    }

    #[test]
    fn test_request_roundtrip() {
        let req = sample_request();
        let encoded = encode_request(&req).unwrap();
        assert_eq!(
            encoded.len(),
            req.header_length as usize + req.body_length as usize
        );

        let decoded = decode_request(encoded).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_request_without_meta() {
        let mut req = Request::new("svc", "M");
        req.data = Bytes::from_static(b"X");
        req.refresh_lengths();

        let decoded = decode_request(encode_request(&req).unwrap()).unwrap();
        assert_eq!(decoded.service_name, "svc");
        assert_eq!(decoded.method_name, "M");
        assert_eq!(decoded.data, Bytes::from_static(b"X"));
        assert_eq!(decoded.body_length, 1);
        assert!(decoded.meta.is_empty());
    }

    #[test]
    fn test_request_exact_bytes() {
        let mut req = Request::new("s", "m");
        req.message_id = 0x0102_0304;
        req.compressor = 4;
        req.serializer = 1;
        req.meta.insert("k".to_string(), "v".to_string());
        req.data = Bytes::from_static(b"DATA");
        req.refresh_lengths();

        let encoded = encode_request(&req).unwrap();
        let mut expected = vec![0, 0, 0, 23, 0, 0, 0, 4, 1, 2, 3, 4, 0, 4, 1];
        expected.extend_from_slice(b"s\nm\nk\rv\nDATA");
        assert_eq!(&encoded[..], &expected[..]);
    }

    #[test]
    fn test_stale_lengths_rejected() {
        let mut req = sample_request();
        req.data = Bytes::from_static(b"longer payload than before");
        assert!(matches!(
            encode_request(&req),
            Err(CodecError::StaleLength { field: "body", .. })
        ));

        req.meta.insert("extra".to_string(), "1".to_string());
        req.calculate_body_length();
        assert!(matches!(
            encode_request(&req),
            Err(CodecError::StaleLength { field: "header", .. })
        ));
    }

    #[test]
    fn test_lengths_past_u32_rejected() {
        let too_long = u32::MAX as usize + 1;
        assert_eq!(
            check_length("body", u32::MAX, too_long),
            Err(CodecError::FrameTooLarge(too_long, u32::MAX as usize))
        );
        // Too large regardless of the stored value
        assert_eq!(
            check_length("header", 0, too_long + 10),
            Err(CodecError::FrameTooLarge(too_long + 10, u32::MAX as usize))
        );
        assert!(check_length("body", 4, 4).is_ok());
    }

    #[test]
    fn test_separator_in_field_rejected() {
        let mut req = Request::new("bad\nname", "M");
        req.refresh_lengths();
        assert!(matches!(
            encode_request(&req),
            Err(CodecError::InvalidField {
                field: "service name",
                ..
            })
        ));

        let mut req = Request::new("svc", "M");
        req.meta.insert("key".to_string(), "a\rb".to_string());
        req.refresh_lengths();
        assert!(matches!(
            encode_request(&req),
            Err(CodecError::InvalidField {
                field: "meta value",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_request_malformed() {
        // Header declares 18 bytes but the names are not terminated
        let mut frame = vec![0, 0, 0, 18, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1];
        frame.extend_from_slice(b"svc");
        assert_eq!(
            decode_request(Bytes::from(frame)),
            Err(CodecError::Malformed("service name is not terminated"))
        );

        let mut frame = vec![0, 0, 0, 23, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1];
        frame.extend_from_slice(b"s\nm\nkey\n");
        assert_eq!(
            decode_request(Bytes::from(frame)),
            Err(CodecError::Malformed("metadata pair has no key/value separator"))
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let req = sample_request();
        let encoded = encode_request(&req).unwrap();
        let truncated = encoded.slice(..encoded.len() - 1);
        assert!(matches!(
            decode_request(truncated),
            Err(CodecError::LengthMismatch { .. })
        ));

        assert!(matches!(
            decode_response(Bytes::from_static(&[0, 0, 0, 15])),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_response_roundtrip() {
        let req = sample_request();
        let mut resp = Response::reply_to(&req);
        resp.set_error("method not found: Missing");
        resp.refresh_lengths();

        let decoded = decode_response(encode_response(&resp).unwrap()).unwrap();
        assert_eq!(decoded, resp);
        assert_eq!(
            decoded.error_message().as_deref(),
            Some("method not found: Missing")
        );

        let mut ok = Response::reply_to(&req);
        ok.data = Bytes::from_static(b"{\"msg\":\"Tom\"}");
        ok.refresh_lengths();
        let decoded = decode_response(encode_response(&ok).unwrap()).unwrap();
        assert!(decoded.error.is_empty());
        assert_eq!(decoded.data, ok.data);
        assert_eq!(decoded.header_length, 15);
    }

    #[test]
    fn test_frame_decoder_partial() {
        let encoded = encode_request(&sample_request()).unwrap();
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&encoded[..5]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&encoded[5..20]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&encoded[20..]);
        buf.extend_from_slice(&encoded[..3]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, encoded);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_frame_decoder_limits() {
        let mut decoder = FrameDecoder::new(64);

        let mut buf = BytesMut::from(&[0u8, 0, 0, 15, 0, 0, 1, 0][..]);
        assert_eq!(
            decoder.decode(&mut buf),
            Err(CodecError::FrameTooLarge(271, 64))
        );

        let mut buf = BytesMut::from(&[0u8, 0, 0, 3, 0, 0, 0, 0][..]);
        assert_eq!(decoder.decode(&mut buf), Err(CodecError::HeaderTooShort(3)));
    }
}
