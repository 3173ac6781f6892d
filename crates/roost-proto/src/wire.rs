// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CBOR framing helpers for peer messages: len (u32, BE) + CBOR payload.

use thiserror::Error;

use crate::PeerMessage;

/// Errors raised by the framing codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// The message failed to serialize.
    #[error("failed to encode peer message: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// The frame body failed to deserialize.
    #[error("failed to decode peer message: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
    /// Fewer bytes than the length prefix promises.
    #[error("incomplete frame: have {have} bytes, need {need}")]
    Incomplete {
        /// Bytes available.
        have: usize,
        /// Bytes required for the full frame.
        need: usize,
    },
}

/// Encodes a message into a length-prefixed CBOR frame.
pub fn encode_frame(msg: &PeerMessage) -> Result<Vec<u8>, WireError> {
    let mut body = Vec::new();
    ciborium::into_writer(msg, &mut body)?;
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&u32::try_from(body.len()).unwrap_or(u32::MAX).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes one frame from the buffer, returning the message and the bytes
/// consumed. Callers retry with more data on [`WireError::Incomplete`].
pub fn decode_frame(stream: &[u8]) -> Result<(PeerMessage, usize), WireError> {
    if stream.len() < 4 {
        return Err(WireError::Incomplete {
            have: stream.len(),
            need: 4,
        });
    }
    let len = u32::from_be_bytes([stream[0], stream[1], stream[2], stream[3]]) as usize;
    if stream.len() < 4 + len {
        return Err(WireError::Incomplete {
            have: stream.len(),
            need: 4 + len,
        });
    }
    let msg = ciborium::from_reader(&stream[4..4 + len])?;
    Ok((msg, 4 + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerSubtype;

    #[test]
    fn frames_round_trip() {
        let msg = PeerMessage::crmd("1", None, PeerSubtype::Vote, "r1").with_payload("<vote/>");
        let frame = encode_frame(&msg).expect("encode");
        let (decoded, consumed) = decode_frame(&frame).expect("decode");
        assert_eq!(decoded, msg);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn short_reads_report_incomplete() {
        let msg = PeerMessage::crmd("1", None, PeerSubtype::Ping, "r2");
        let frame = encode_frame(&msg).expect("encode");
        let err = decode_frame(&frame[..frame.len() - 1]).expect_err("truncated");
        assert!(matches!(err, WireError::Incomplete { .. }));
    }

    #[test]
    fn back_to_back_frames_decode_in_sequence() {
        let a = PeerMessage::crmd("1", Some("2"), PeerSubtype::JoinAnnounce, "r3");
        let b = PeerMessage::crmd("2", Some("1"), PeerSubtype::JoinOffer, "r4");
        let mut buf = encode_frame(&a).expect("encode a");
        buf.extend(encode_frame(&b).expect("encode b"));
        let (first, used) = decode_frame(&buf).expect("first");
        let (second, _) = decode_frame(&buf[used..]).expect("second");
        assert_eq!(first, a);
        assert_eq!(second, b);
    }
}
