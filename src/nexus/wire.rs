// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire encoding for SM packets carried over the control transport.
//!
//! +--------+----------------------+----------------------+-----------------+
//! | kind   | client_endpoint_id   | server_endpoint_id    | variant fields  |
//! | (1B)   | (1B)                 | (1B)                  | ...             |
//! +--------+----------------------+----------------------+-----------------+
//!
//! Native byte order (big-endian) is used throughout; this is an
//! intra-cluster protocol run only between peers built from this crate, so
//! no portability claim beyond that is made (§6). `Reset` never appears on
//! the wire — the SM thread synthesizes it locally.

use crate::hook::{SmPacket, SmResetReason};

const KIND_CONNECT_REQUEST: u8 = 0;
const KIND_CONNECT_RESPONSE: u8 = 1;
const KIND_DISCONNECT_REQUEST: u8 = 2;
const KIND_DISCONNECT_RESPONSE: u8 = 3;

/// Serialize an SM packet for transmission. Returns `None` for `Reset`,
/// which is never sent over the wire.
#[must_use]
pub fn encode(packet: &SmPacket) -> Option<Vec<u8>> {
    let mut buf = Vec::with_capacity(16);
    match *packet {
        SmPacket::ConnectRequest {
            client_endpoint_id,
            server_endpoint_id,
            session_num_client,
        } => {
            buf.push(KIND_CONNECT_REQUEST);
            buf.push(client_endpoint_id);
            buf.push(server_endpoint_id);
            buf.extend_from_slice(&session_num_client.to_be_bytes());
        }
        SmPacket::ConnectResponse {
            client_endpoint_id,
            server_endpoint_id,
            session_num_client,
            session_num_server,
            accepted,
        } => {
            buf.push(KIND_CONNECT_RESPONSE);
            buf.push(client_endpoint_id);
            buf.push(server_endpoint_id);
            buf.extend_from_slice(&session_num_client.to_be_bytes());
            buf.extend_from_slice(&session_num_server.to_be_bytes());
            buf.push(u8::from(accepted));
        }
        SmPacket::DisconnectRequest {
            client_endpoint_id,
            server_endpoint_id,
            session_num_client,
            session_num_server,
        } => {
            buf.push(KIND_DISCONNECT_REQUEST);
            buf.push(client_endpoint_id);
            buf.push(server_endpoint_id);
            buf.extend_from_slice(&session_num_client.to_be_bytes());
            buf.extend_from_slice(&session_num_server.to_be_bytes());
        }
        SmPacket::DisconnectResponse {
            client_endpoint_id,
            server_endpoint_id,
            session_num_client,
        } => {
            buf.push(KIND_DISCONNECT_RESPONSE);
            buf.push(client_endpoint_id);
            buf.push(server_endpoint_id);
            buf.extend_from_slice(&session_num_client.to_be_bytes());
        }
        SmPacket::Reset { .. } => return None,
    }
    Some(buf)
}

/// Parse a received SM packet. Returns `None` on a malformed/truncated
/// frame (logged by the caller, never panics — wire input is untrusted).
#[must_use]
pub fn decode(bytes: &[u8]) -> Option<SmPacket> {
    let kind = *bytes.first()?;
    let client_endpoint_id = *bytes.get(1)?;
    let server_endpoint_id = *bytes.get(2)?;
    let rest = bytes.get(3..)?;

    match kind {
        KIND_CONNECT_REQUEST => {
            let session_num_client = u32::from_be_bytes(rest.get(0..4)?.try_into().ok()?);
            Some(SmPacket::ConnectRequest {
                client_endpoint_id,
                server_endpoint_id,
                session_num_client,
            })
        }
        KIND_CONNECT_RESPONSE => {
            let session_num_client = u32::from_be_bytes(rest.get(0..4)?.try_into().ok()?);
            let session_num_server = u32::from_be_bytes(rest.get(4..8)?.try_into().ok()?);
            let accepted = *rest.get(8)? != 0;
            Some(SmPacket::ConnectResponse {
                client_endpoint_id,
                server_endpoint_id,
                session_num_client,
                session_num_server,
                accepted,
            })
        }
        KIND_DISCONNECT_REQUEST => {
            let session_num_client = u32::from_be_bytes(rest.get(0..4)?.try_into().ok()?);
            let session_num_server = u32::from_be_bytes(rest.get(4..8)?.try_into().ok()?);
            Some(SmPacket::DisconnectRequest {
                client_endpoint_id,
                server_endpoint_id,
                session_num_client,
                session_num_server,
            })
        }
        KIND_DISCONNECT_RESPONSE => {
            let session_num_client = u32::from_be_bytes(rest.get(0..4)?.try_into().ok()?);
            Some(SmPacket::DisconnectResponse {
                client_endpoint_id,
                server_endpoint_id,
                session_num_client,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_round_trips() {
        let pkt = SmPacket::ConnectRequest {
            client_endpoint_id: 7,
            server_endpoint_id: 9,
            session_num_client: 42,
        };
        let bytes = encode(&pkt).unwrap();
        assert_eq!(decode(&bytes), Some(pkt));
    }

    #[test]
    fn connect_response_round_trips() {
        let pkt = SmPacket::ConnectResponse {
            client_endpoint_id: 7,
            server_endpoint_id: 9,
            session_num_client: 42,
            session_num_server: 99,
            accepted: true,
        };
        let bytes = encode(&pkt).unwrap();
        assert_eq!(decode(&bytes), Some(pkt));
    }

    #[test]
    fn disconnect_request_and_response_round_trip() {
        let req = SmPacket::DisconnectRequest {
            client_endpoint_id: 1,
            server_endpoint_id: 2,
            session_num_client: 5,
            session_num_server: 6,
        };
        assert_eq!(decode(&encode(&req).unwrap()), Some(req));

        let resp = SmPacket::DisconnectResponse {
            client_endpoint_id: 1,
            server_endpoint_id: 2,
            session_num_client: 5,
        };
        assert_eq!(decode(&encode(&resp).unwrap()), Some(resp));
    }

    #[test]
    fn reset_is_never_encoded() {
        let pkt = SmPacket::Reset {
            reason: SmResetReason::PeerDisconnected,
        };
        assert!(encode(&pkt).is_none());
    }

    #[test]
    fn truncated_frame_decodes_to_none() {
        assert_eq!(decode(&[KIND_CONNECT_REQUEST, 1]), None);
        assert_eq!(decode(&[]), None);
    }
}
