//! Gateway Wire Protocol
//!
//! Messages exchanged between the gateway client and the receptionist.
//! Frames are a `u32` big-endian length followed by the bincode encoding of
//! a [`Frame`].
//!
//! A session connection starts with `OpenSession` / `SessionOpened`, then
//! carries `Request` frames towards the receptionist and `Reply` frames back.
//! An ask connection carries exactly one `Ask` answered by `AskReply` or
//! `AskFailure`.

use bincode::{Decode, Encode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::PayloadEnvelope;
use crate::error::{FailureReason, ProtocolError, TransportError};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u8 = 1;

/// Default upper bound for a single frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// A command sent from the client to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Request {
    /// Deliver to exactly one actor registered at `path`
    Send {
        path: String,
        payload: PayloadEnvelope,
        prefer_local: bool,
    },
    /// Deliver to every actor registered at `path`
    SendToAll {
        path: String,
        payload: PayloadEnvelope,
    },
    /// Deliver to every subscriber of `topic`
    Publish {
        topic: String,
        payload: PayloadEnvelope,
    },
}

impl Request {
    /// Variant name for logging and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Send { .. } => "send",
            Request::SendToAll { .. } => "send_to_all",
            Request::Publish { .. } => "publish",
        }
    }

    pub fn payload(&self) -> &PayloadEnvelope {
        match self {
            Request::Send { payload, .. }
            | Request::SendToAll { payload, .. }
            | Request::Publish { payload, .. } => payload,
        }
    }

    /// Path or topic the request is addressed to
    pub fn destination(&self) -> &str {
        match self {
            Request::Send { path, .. } | Request::SendToAll { path, .. } => path,
            Request::Publish { topic, .. } => topic,
        }
    }
}

/// Payload of the one-shot ask path
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SendRequest {
    pub path: String,
    pub payload: PayloadEnvelope,
    pub prefer_local: bool,
}

impl From<SendRequest> for Request {
    fn from(req: SendRequest) -> Self {
        Request::Send {
            path: req.path,
            payload: req.payload,
            prefer_local: req.prefer_local,
        }
    }
}

/// A reply flowing back from the cluster
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Reply {
    pub payload: PayloadEnvelope,
}

/// Everything that travels over a gateway connection
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Frame {
    /// Client asks for a streaming session
    OpenSession { version: u8 },
    /// Receptionist accepted the session
    SessionOpened { session_id: String },
    Request(Request),
    Reply(Reply),
    /// One-shot request
    Ask { version: u8, request: SendRequest },
    /// Answer to `Ask`
    AskReply(Reply),
    /// `Ask` could not be answered
    AskFailure {
        reason: FailureReason,
        message: String,
    },
    /// Orderly close of a session connection
    Goodbye,
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    /// Decode a frame body; trailing bytes are rejected
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, read) = bincode::decode_from_slice(data, bincode::config::standard())?;
        if read != data.len() {
            return Err(ProtocolError::Malformed(format!(
                "{} trailing bytes after {}",
                data.len() - read,
                Frame::type_name(&frame)
            )));
        }
        Ok(frame)
    }

    /// Get the frame type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::OpenSession { .. } => "OpenSession",
            Frame::SessionOpened { .. } => "SessionOpened",
            Frame::Request(_) => "Request",
            Frame::Reply(_) => "Reply",
            Frame::Ask { .. } => "Ask",
            Frame::AskReply(_) => "AskReply",
            Frame::AskFailure { .. } => "AskFailure",
            Frame::Goodbye => "Goodbye",
        }
    }
}

/// Reject peers speaking another protocol version
pub fn check_version(theirs: u8) -> Result<(), ProtocolError> {
    if theirs != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            ours: PROTOCOL_VERSION,
            theirs,
        });
    }
    Ok(())
}

/// Frame a message with length prefix for TCP transmission
pub fn frame_message(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let payload = frame.encode()?;
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);

    Ok(out)
}

/// Read one frame. Returns None when the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::Io(e)),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        }
        .into());
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Frame::decode(&body)?))
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame_message(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn envelope(text: &str) -> PayloadEnvelope {
        PayloadEnvelope {
            bytes: text.as_bytes().to_vec(),
            codec_id: 20,
            type_tag: String::new(),
        }
    }

    #[test]
    fn test_request_accessors() {
        let req = Request::Publish {
            topic: "news".to_string(),
            payload: envelope("hi"),
        };
        assert_eq!(req.kind(), "publish");
        assert_eq!(req.destination(), "news");
        assert_eq!(req.payload().bytes, b"hi".to_vec());
    }

    #[test]
    fn test_send_request_into_request() {
        let req: Request = SendRequest {
            path: "/user/svc".to_string(),
            payload: envelope("ping"),
            prefer_local: true,
        }
        .into();
        assert_eq!(
            req,
            Request::Send {
                path: "/user/svc".to_string(),
                payload: envelope("ping"),
                prefer_local: true,
            }
        );
    }

    #[test]
    fn test_frame_message() {
        let frame = Frame::Request(Request::Send {
            path: "/user/svc".to_string(),
            payload: envelope("ping"),
            prefer_local: false,
        });
        let bytes = frame_message(&frame).unwrap();

        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len() - 4);
        assert_eq!(Frame::decode(&bytes[4..]).unwrap(), frame);
    }

    #[test]
    fn test_unknown_variant_is_malformed() {
        let err = Frame::decode(&[99]).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Frame::Goodbye.encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_check_version() {
        assert!(check_version(PROTOCOL_VERSION).is_ok());
        assert_eq!(
            check_version(PROTOCOL_VERSION + 1),
            Err(ProtocolError::VersionMismatch {
                ours: PROTOCOL_VERSION,
                theirs: PROTOCOL_VERSION + 1,
            })
        );
    }

    #[tokio::test]
    async fn test_read_write_over_stream() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frames = vec![
            Frame::OpenSession {
                version: PROTOCOL_VERSION,
            },
            Frame::AskFailure {
                reason: FailureReason::Timeout,
                message: "no reply".to_string(),
            },
            Frame::Goodbye,
        ];
        for frame in &frames {
            write_frame(&mut a, frame).await.unwrap();
        }
        drop(a);

        for expected in frames {
            let got = read_frame(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
            assert_eq!(got, Some(expected));
        }
        assert_eq!(read_frame(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frame = Frame::Reply(Reply {
            payload: envelope(&"x".repeat(128)),
        });
        write_frame(&mut a, &frame).await.unwrap();

        let err = read_frame(&mut b, 16).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::FrameTooLarge { max: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let frame = Frame::SessionOpened {
            session_id: "abc".to_string(),
        };
        let bytes = frame_message(&frame).unwrap();
        let mut reader = tokio_test::io::Builder::new()
            .read(&bytes[..2])
            .read(&bytes[2..7])
            .read(&bytes[7..])
            .build();

        assert_eq!(
            read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap(),
            Some(frame)
        );
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let bytes = frame_message(&Frame::Goodbye).unwrap();
        let mut padded = bytes[..4].to_vec();
        padded[3] += 8;
        let mut reader = tokio_test::io::Builder::new()
            .read(&padded)
            .read(&bytes[4..])
            .build();

        assert!(read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.is_err());
    }

    #[tokio::test]
    async fn test_write_frame_bytes() {
        let frame = Frame::Goodbye;
        let bytes = frame_message(&frame).unwrap();
        let mut writer = tokio_test::io::Builder::new().write(&bytes).build();
        write_frame(&mut writer, &frame).await.unwrap();
    }
}
