// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! bincode encoding of envelopes.
//!
//! Fixed-int encoding keeps frame ids and payload lengths at stable widths
//! across versions of the encoder.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, Result};

fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Serialize an envelope to wire bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config())
        .map_err(|error| ProtocolError::Encode(error.to_string()))
}

/// Deserialize an envelope from wire bytes.
///
/// Trailing bytes are rejected: one message is exactly one envelope.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, config())
        .map_err(|error| ProtocolError::Decode(error.to_string()))?;
    if read != bytes.len() {
        return Err(ProtocolError::Decode(format!(
            "envelope had {} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Frame, FromClient, PayloadType, ToClient, Welcome};

    #[test]
    fn input_envelope_round_trip() {
        let message = FromClient::Input {
            source_name: "camera".to_string(),
            frame_id: 42,
            target_engines: vec!["ocr".to_string()],
            frame: Frame::new(PayloadType::Image, vec![0xde, 0xad, 0xbe, 0xef]),
        };
        let bytes = encode(&message).unwrap();
        let decoded: FromClient = decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn welcome_envelope_round_trip() {
        let message = ToClient::Welcome(Welcome {
            sources_consumed: vec!["camera".to_string(), "audio".to_string()],
            num_tokens_per_source: 2,
        });
        let bytes = encode(&message).unwrap();
        let decoded: ToClient = decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let result: Result<FromClient> = decode(&[0xff; 16]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode(&FromClient::Heartbeat).unwrap();
        bytes.push(0);
        let result: Result<FromClient> = decode(&bytes);
        assert!(result.is_err());
    }
}
