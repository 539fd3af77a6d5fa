use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tracing::debug;

/// Tag byte identifying a server-to-client control frame header.
pub const CONTROL_TAG: u8 = 0x01;

/// Builds the wire payload: comma-joined `connect <key>`/`disconnect <key>`
/// intents immediately followed by the raw hosts blob. There is no
/// separator between the two segments — the in-VM client locates the end
/// of the intents segment structurally rather than by a delimiter byte
/// (§4.3, and the open question in §9 about hosts-block framing).
pub fn encode_payload(intents: &HashMap<String, bool>, hosts: &[u8]) -> Vec<u8> {
    let mut parts: Vec<String> = intents
        .iter()
        .map(|(key, &connect)| {
            if connect {
                format!("connect {key}")
            } else {
                format!("disconnect {key}")
            }
        })
        .collect();
    // HashMap iteration order isn't stable; sort so repeated encodes of an
    // unchanged table produce byte-identical frames.
    parts.sort();

    let mut payload = parts.join(",").into_bytes();
    payload.extend_from_slice(hosts);
    payload
}

/// Sends one control frame (3-byte header, then the payload chunked to at
/// most `mtu` bytes per datagram) to `peer`. If the payload is empty, no
/// header is sent at all — there is nothing to tell the client (§4.3).
///
/// The header is sent before any fragment, and no other send on `socket`
/// is allowed to interleave between the header and the last fragment;
/// callers must hold whatever serializes sends on this socket for the
/// duration of this call (§5 ordering guarantees).
pub async fn push(socket: &UdpSocket, peer: SocketAddr, payload: &[u8], mtu: usize) -> Result<()> {
    if payload.is_empty() {
        debug!(%peer, "control push skipped: empty payload");
        return Ok(());
    }

    let len = payload.len();
    let header = [CONTROL_TAG, (len >> 8) as u8, (len & 0xFF) as u8];
    socket
        .send_to(&header, peer)
        .await
        .context("failed to send control header")?;

    let chunk_size = mtu.max(1);
    for chunk in payload.chunks(chunk_size) {
        socket
            .send_to(chunk, peer)
            .await
            .context("failed to send control payload fragment")?;
    }

    debug!(%peer, bytes = len, fragments = payload.len().div_ceil(chunk_size), "control frame pushed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_intents_and_hosts_back_to_back() {
        let mut intents = HashMap::new();
        intents.insert("10.0.1.0+10.0.2.0".to_string(), true);
        intents.insert("10.0.3.0-10.0.4.0".to_string(), false);

        let payload = encode_payload(&intents, b"1.1.1.1 a\n");
        let text = String::from_utf8(payload.clone()).unwrap();

        assert!(text.contains("connect 10.0.1.0+10.0.2.0"));
        assert!(text.contains("disconnect 10.0.3.0-10.0.4.0"));
        assert!(text.ends_with("1.1.1.1 a\n"));
        assert_eq!(payload.len(), text.len());
    }

    #[test]
    fn empty_table_and_hosts_yields_empty_payload() {
        let payload = encode_payload(&HashMap::new(), b"");
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn push_sends_header_then_fragments_in_order() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let hosts = vec![b'a'; 3200];
        let payload = encode_payload(&HashMap::new(), &hosts);
        push(&server, client_addr, &payload, 1400).await.unwrap();

        let mut buf = [0u8; 4096];

        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf[0], CONTROL_TAG);
        let len = ((buf[1] as usize) << 8) | buf[2] as usize;
        assert_eq!(len, 3200);

        let mut received = Vec::new();
        let expected_sizes = [1400usize, 1400, 400];
        for expected in expected_sizes {
            let (n, _) = client.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, expected);
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, hosts);
    }

    #[tokio::test]
    async fn empty_payload_sends_nothing() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        push(&server, client_addr, &[], 1400).await.unwrap();

        // Prove nothing arrived by racing a short timeout against recv.
        let mut buf = [0u8; 16];
        let res = tokio::time::timeout(std::time::Duration::from_millis(50), client.recv_from(&mut buf)).await;
        assert!(res.is_err(), "expected no datagram, got one");
    }
}
