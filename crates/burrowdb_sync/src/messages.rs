//! Sync protocol messages.
//!
//! The wire format matches the log codec's conventions: a type byte, then
//! fixed little-endian fields, then length-prefixed blobs. Decode must
//! consume the buffer exactly.

use burrowdb_core::Lsn;

use crate::error::{SyncError, SyncResult};

/// Identifier of a replication site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SiteId(pub u32);

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "site:{}", self.0)
    }
}

/// A replication verification message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Client asks the master for the record at `lsn`.
    VerifyRequest {
        /// LSN of a candidate identification record.
        lsn: Lsn,
    },
    /// Master answers with its raw record bytes at `lsn`.
    Verify {
        /// The requested LSN.
        lsn: Lsn,
        /// The master's record payload at that LSN, undecoded.
        record: Vec<u8>,
    },
    /// Master no longer retains the record at `lsn`.
    VerifyFail {
        /// The requested LSN.
        lsn: Lsn,
    },
    /// Client asks for every record after `from` once a match is found.
    AllRecordsRequest {
        /// The match point; streaming resumes just past it.
        from: Lsn,
    },
    /// Client requests full internal initialization from scratch.
    UpdateRequest,
}

impl SyncMessage {
    /// Returns the message type code.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Self::VerifyRequest { .. } => 1,
            Self::Verify { .. } => 2,
            Self::VerifyFail { .. } => 3,
            Self::AllRecordsRequest { .. } => 4,
            Self::UpdateRequest => 5,
        }
    }

    /// Serializes the message.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.type_code()];
        match self {
            Self::VerifyRequest { lsn } | Self::VerifyFail { lsn } => {
                put_lsn(&mut buf, *lsn);
            }
            Self::Verify { lsn, record } => {
                put_lsn(&mut buf, *lsn);
                buf.extend_from_slice(&(record.len() as u32).to_le_bytes());
                buf.extend_from_slice(record);
            }
            Self::AllRecordsRequest { from } => {
                put_lsn(&mut buf, *from);
            }
            Self::UpdateRequest => {}
        }
        buf
    }

    /// Deserializes a message from a buffer holding exactly one message.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidMessage`] on an unknown type code,
    /// short buffer, or trailing bytes.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        let (&code, rest) = bytes
            .split_first()
            .ok_or_else(|| SyncError::invalid_message("empty message"))?;
        let mut cursor = 0usize;
        let message = match code {
            1 => Self::VerifyRequest {
                lsn: read_lsn(rest, &mut cursor)?,
            },
            2 => {
                let lsn = read_lsn(rest, &mut cursor)?;
                let len = read_u32(rest, &mut cursor)? as usize;
                let end = cursor.checked_add(len).filter(|&e| e <= rest.len());
                let Some(end) = end else {
                    return Err(SyncError::invalid_message("record blob past end"));
                };
                let record = rest[cursor..end].to_vec();
                cursor = end;
                Self::Verify { lsn, record }
            }
            3 => Self::VerifyFail {
                lsn: read_lsn(rest, &mut cursor)?,
            },
            4 => Self::AllRecordsRequest {
                from: read_lsn(rest, &mut cursor)?,
            },
            5 => Self::UpdateRequest,
            other => {
                return Err(SyncError::invalid_message(format!(
                    "unknown type code {other}"
                )))
            }
        };
        if cursor != rest.len() {
            return Err(SyncError::invalid_message(format!(
                "trailing bytes: consumed {cursor} of {}",
                rest.len()
            )));
        }
        Ok(message)
    }
}

fn put_lsn(buf: &mut Vec<u8>, lsn: Lsn) {
    buf.extend_from_slice(&lsn.file.to_le_bytes());
    buf.extend_from_slice(&lsn.offset.to_le_bytes());
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> SyncResult<u32> {
    let end = cursor
        .checked_add(4)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| SyncError::invalid_message("message too short"))?;
    let raw: [u8; 4] = bytes[*cursor..end]
        .try_into()
        .map_err(|_| SyncError::invalid_message("invalid field"))?;
    *cursor = end;
    Ok(u32::from_le_bytes(raw))
}

fn read_lsn(bytes: &[u8], cursor: &mut usize) -> SyncResult<Lsn> {
    let file = read_u32(bytes, cursor)?;
    let offset = read_u32(bytes, cursor)?;
    Ok(Lsn::new(file, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &SyncMessage) {
        let decoded = SyncMessage::decode(&message.encode()).unwrap();
        assert_eq!(message, &decoded);
    }

    #[test]
    fn all_messages_roundtrip() {
        roundtrip(&SyncMessage::VerifyRequest {
            lsn: Lsn::new(3, 128),
        });
        roundtrip(&SyncMessage::Verify {
            lsn: Lsn::new(2, 64),
            record: vec![1, 2, 3, 4],
        });
        roundtrip(&SyncMessage::Verify {
            lsn: Lsn::ZERO,
            record: Vec::new(),
        });
        roundtrip(&SyncMessage::VerifyFail { lsn: Lsn::new(1, 0) });
        roundtrip(&SyncMessage::AllRecordsRequest {
            from: Lsn::new(3, 0),
        });
        roundtrip(&SyncMessage::UpdateRequest);
    }

    #[test]
    fn unknown_type_code_fails() {
        assert!(matches!(
            SyncMessage::decode(&[99]),
            Err(SyncError::InvalidMessage { .. })
        ));
    }

    #[test]
    fn truncated_message_fails() {
        let encoded = SyncMessage::Verify {
            lsn: Lsn::new(1, 1),
            record: vec![0; 16],
        }
        .encode();
        for cut in 1..encoded.len() {
            assert!(SyncMessage::decode(&encoded[..cut]).is_err(), "cut {cut}");
        }
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut encoded = SyncMessage::UpdateRequest.encode();
        encoded.push(0);
        assert!(SyncMessage::decode(&encoded).is_err());
    }
}
