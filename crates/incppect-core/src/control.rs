//! Client→server control messages
//!
//! Every inbound message opens with a little-endian `i32` kind:
//!
//! | kind | name           | body |
//! |------|----------------|------|
//! | 1    | register-paths | whitespace-separated text groups `path req_id n_idx idx…` |
//! | 2    | activate       | `(len − 4) / 4` request ids forming the new active set |
//! | 3    | refresh        | empty; re-stamps the previous active set |
//! | 4    | custom         | opaque bytes for the application handler |
//!
//! An index of `-1` in a register group is a placeholder for the client's
//! own id; substitution happens in the engine, which knows the id.

use bytes::Bytes;

use crate::error::{Error, Result};

pub const KIND_REGISTER: i32 = 1;
pub const KIND_ACTIVATE: i32 = 2;
pub const KIND_REFRESH: i32 = 3;
pub const KIND_CUSTOM: i32 = 4;

/// One group of a register-paths message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEntry {
    pub path: String,
    pub request_id: i32,
    pub idxs: Vec<i32>,
}

/// A parsed control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Register(Vec<RegisterEntry>),
    Activate(Vec<i32>),
    Refresh,
    Custom(Bytes),
}

/// Parse an inbound control message.
///
/// A malformed message is rejected whole; the caller logs and drops it
/// without touching per-client state.
pub fn parse(data: &[u8]) -> Result<ControlMessage> {
    if data.len() < 4 {
        return Err(Error::BufferTooSmall {
            needed: 4,
            have: data.len(),
        });
    }

    let kind = i32::from_le_bytes(data[..4].try_into().unwrap());
    let body = &data[4..];

    match kind {
        KIND_REGISTER => parse_register(body).map(ControlMessage::Register),
        KIND_ACTIVATE => {
            if body.len() % 4 != 0 {
                return Err(Error::InvalidActivateLength(body.len()));
            }
            let ids = body
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Ok(ControlMessage::Activate(ids))
        }
        KIND_REFRESH => Ok(ControlMessage::Refresh),
        KIND_CUSTOM => Ok(ControlMessage::Custom(Bytes::copy_from_slice(body))),
        other => Err(Error::UnknownMessageKind(other)),
    }
}

fn parse_register(body: &[u8]) -> Result<Vec<RegisterEntry>> {
    let text = String::from_utf8_lossy(body);
    let mut tokens = text.split_ascii_whitespace();
    let mut entries = Vec::new();

    while let Some(path) = tokens.next() {
        let request_id = next_int(&mut tokens, path)?;
        let n_idx = next_int(&mut tokens, path)?;
        if n_idx < 0 {
            return Err(Error::MalformedRegisterGroup(path.to_string()));
        }
        let mut idxs = Vec::with_capacity(n_idx as usize);
        for _ in 0..n_idx {
            idxs.push(next_int(&mut tokens, path)?);
        }
        entries.push(RegisterEntry {
            path: path.to_string(),
            request_id,
            idxs,
        });
    }

    Ok(entries)
}

fn next_int<'a>(tokens: &mut impl Iterator<Item = &'a str>, path: &str) -> Result<i32> {
    tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| Error::MalformedRegisterGroup(path.to_string()))
}

/// Encode a control message; the inverse of [`parse`].
///
/// The server never sends these; clients (and tests) do.
pub fn encode(msg: &ControlMessage) -> Bytes {
    let mut out: Vec<u8> = Vec::new();
    match msg {
        ControlMessage::Register(entries) => {
            out.extend_from_slice(&KIND_REGISTER.to_le_bytes());
            let mut text = String::new();
            for e in entries {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&e.path);
                text.push_str(&format!(" {} {}", e.request_id, e.idxs.len()));
                for idx in &e.idxs {
                    text.push_str(&format!(" {idx}"));
                }
            }
            out.extend_from_slice(text.as_bytes());
        }
        ControlMessage::Activate(ids) => {
            out.extend_from_slice(&KIND_ACTIVATE.to_le_bytes());
            for id in ids {
                out.extend_from_slice(&id.to_le_bytes());
            }
        }
        ControlMessage::Refresh => out.extend_from_slice(&KIND_REFRESH.to_le_bytes()),
        ControlMessage::Custom(body) => {
            out.extend_from_slice(&KIND_CUSTOM.to_le_bytes());
            out.extend_from_slice(body);
        }
    }
    out.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_groups_parse() {
        let msg = b"\x01\x00\x00\x00var_a 1 0 var_b[%d] 2 1 3 var_c[%d].x[%d] 5 2 -1 7";
        match parse(msg).unwrap() {
            ControlMessage::Register(entries) => {
                assert_eq!(entries.len(), 3);
                assert_eq!(entries[0].path, "var_a");
                assert_eq!(entries[0].request_id, 1);
                assert!(entries[0].idxs.is_empty());
                assert_eq!(entries[1].idxs, vec![3]);
                assert_eq!(entries[2].idxs, vec![-1, 7]);
            }
            other => panic!("expected register, got {other:?}"),
        }
    }

    #[test]
    fn register_truncated_group_is_rejected() {
        let msg = b"\x01\x00\x00\x00var_a 1 2 5";
        assert!(matches!(
            parse(msg),
            Err(Error::MalformedRegisterGroup(p)) if p == "var_a"
        ));
    }

    #[test]
    fn register_bad_count_is_rejected() {
        let msg = b"\x01\x00\x00\x00var_a 1 -2";
        assert!(parse(msg).is_err());
    }

    #[test]
    fn activate_parses_ids() {
        let mut msg = vec![2, 0, 0, 0];
        for id in [7i32, 9, 11] {
            msg.extend_from_slice(&id.to_le_bytes());
        }
        assert_eq!(
            parse(&msg).unwrap(),
            ControlMessage::Activate(vec![7, 9, 11])
        );
    }

    #[test]
    fn activate_ragged_length_is_rejected() {
        let msg = [2, 0, 0, 0, 7, 0, 0];
        assert!(matches!(
            parse(&msg),
            Err(Error::InvalidActivateLength(3))
        ));
    }

    #[test]
    fn refresh_and_custom() {
        assert_eq!(parse(&[3, 0, 0, 0]).unwrap(), ControlMessage::Refresh);
        match parse(&[4, 0, 0, 0, 0xAB, 0xCD]).unwrap() {
            ControlMessage::Custom(body) => assert_eq!(&body[..], &[0xAB, 0xCD]),
            other => panic!("expected custom, got {other:?}"),
        }
    }

    #[test]
    fn short_and_unknown_kinds_are_rejected() {
        assert!(matches!(
            parse(&[1, 0]),
            Err(Error::BufferTooSmall { needed: 4, have: 2 })
        ));
        assert!(matches!(
            parse(&[9, 0, 0, 0]),
            Err(Error::UnknownMessageKind(9))
        ));
    }

    #[test]
    fn encode_parse_roundtrip() {
        let msgs = [
            ControlMessage::Register(vec![RegisterEntry {
                path: "grid[%d]".into(),
                request_id: 4,
                idxs: vec![-1],
            }]),
            ControlMessage::Activate(vec![1, 2, 3]),
            ControlMessage::Refresh,
            ControlMessage::Custom(Bytes::from_static(b"ping")),
        ];
        for msg in msgs {
            assert_eq!(parse(&encode(&msg)).unwrap(), msg);
        }
    }
}
