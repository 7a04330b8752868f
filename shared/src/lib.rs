//! Wire protocol shared by the chat server and the console client.
//!
//! Every message travels as one frame: a 4-byte big-endian length followed by
//! a bincode-encoded [`Packet`]. The login exchange is strict request/response
//! (the server sends a [`Packet::Prompt`], the client answers with a
//! [`Packet::Reply`]); once authenticated the client keeps sending replies
//! holding command lines and the server pushes notices and relayed chat at
//! any time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Smallest accepted number of consecutive failed password attempts
pub const MIN_FAILURE_BOUND: u8 = 1;
/// Largest accepted number of consecutive failed password attempts
pub const MAX_FAILURE_BOUND: u8 = 5;
/// Upper bound for a single encoded packet
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Server asks for a line of input
    Prompt { text: String },
    /// Client answer to a prompt, or a command line once logged in
    Reply { text: String },
    /// Informational or error line from the server
    Notice { text: String },
    /// Message relayed from another user
    Chat {
        from: String,
        text: String,
        broadcast: bool,
    },
    /// Answer to a `setupprivate` request
    PeerSession(PeerSetup),
    /// Sent right before the server closes the session
    Disconnected { reason: String },
}

impl Packet {
    pub fn prompt(text: impl Into<String>) -> Self {
        Packet::Prompt { text: text.into() }
    }

    pub fn reply(text: impl Into<String>) -> Self {
        Packet::Reply { text: text.into() }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Packet::Notice { text: text.into() }
    }
}

/// Outcome of asking the server for another user's peer endpoint
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum PeerSetup {
    /// Target is online; connect to the address it uses towards the server
    Ready { username: String, addr: SocketAddr },
    /// Requester asked for a session with itself
    SelfTarget,
    /// Target has blocked the requester
    Blocked,
    /// Target exists but is not logged in
    Offline,
    /// No such user
    Invalid,
}

impl fmt::Display for PeerSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerSetup::Ready { username, addr } => {
                write!(f, "startprivate,{},{},{}", username, addr.ip(), addr.port())
            }
            PeerSetup::SelfTarget => write!(f, "startprivate,self"),
            PeerSetup::Blocked => write!(f, "startprivate,blocked"),
            PeerSetup::Offline => write!(f, "startprivate,offline"),
            PeerSetup::Invalid => write!(f, "startprivate,invalid"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the frame size limit")]
    TooLarge(u32),
}

/// Serializes a packet into a length-prefixed frame
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, FrameError> {
    let payload = bincode::serialize(packet)?;
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Returns true if `packet` encodes to a frame within [`MAX_FRAME_LEN`]
pub fn fits_in_frame(packet: &Packet) -> bool {
    bincode::serialized_size(packet)
        .map(|len| len <= u64::from(MAX_FRAME_LEN))
        .unwrap_or(false)
}

/// Writes one packet and flushes the stream
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one packet.
///
/// Returns `Ok(None)` when the peer closed the stream between frames.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(bincode::deserialize(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_frame_header_matches_payload_length() {
        let packet = Packet::prompt("Username: ");
        let frame = encode_frame(&packet).unwrap();

        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        assert_eq!(len as usize, frame.len() - 4);
        assert_eq!(
            bincode::deserialize::<Packet>(&frame[4..]).unwrap(),
            packet
        );
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let packet = Packet::notice("x".repeat(MAX_FRAME_LEN as usize + 1));
        assert!(matches!(
            encode_frame(&packet),
            Err(FrameError::TooLarge(_))
        ));
    }

    #[test]
    fn test_fits_in_frame_at_the_limit() {
        // Reply payload: 4-byte variant tag, 8-byte length, then the text
        let at_limit = Packet::reply("x".repeat(MAX_FRAME_LEN as usize - 12));
        assert!(fits_in_frame(&at_limit));
        assert_ok!(encode_frame(&at_limit));

        let over = Packet::reply("x".repeat(MAX_FRAME_LEN as usize - 11));
        assert!(!fits_in_frame(&over));
        assert_err!(encode_frame(&over));
    }

    #[tokio::test]
    async fn test_write_packet_emits_single_frame() {
        let packet = Packet::reply("alice");
        let expected = encode_frame(&packet).unwrap();

        let mut mock = Builder::new().write(&expected).build();
        assert_ok!(write_packet(&mut mock, &packet).await);
    }

    #[tokio::test]
    async fn test_read_packets_split_across_reads() {
        let first = encode_frame(&Packet::prompt("Password: ")).unwrap();
        let second = encode_frame(&Packet::notice("=== Error: Invalid Username ===")).unwrap();

        let mut mock = Builder::new()
            .read(&first[..2])
            .read(&first[2..])
            .read(&second)
            .build();

        assert_eq!(
            read_packet(&mut mock).await.unwrap(),
            Some(Packet::prompt("Password: "))
        );
        assert_eq!(
            read_packet(&mut mock).await.unwrap(),
            Some(Packet::notice("=== Error: Invalid Username ==="))
        );
        assert_eq!(read_packet(&mut mock).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_header() {
        let header = (MAX_FRAME_LEN + 1).to_be_bytes();
        let mut mock = Builder::new().read(&header).build();

        let result = read_packet(&mut mock).await;
        assert!(matches!(result, Err(FrameError::TooLarge(len)) if len == MAX_FRAME_LEN + 1));
    }

    #[tokio::test]
    async fn test_read_rejects_garbage_payload() {
        let mut frame = 3u32.to_be_bytes().to_vec();
        frame.extend_from_slice(&[0xff, 0xff, 0xff]);
        let mut mock = Builder::new().read(&frame).build();

        assert_err!(read_packet(&mut mock).await);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_an_error() {
        let frame = encode_frame(&Packet::reply("secret")).unwrap();
        let mut mock = Builder::new().read(&frame[..frame.len() - 1]).build();

        assert!(matches!(
            read_packet(&mut mock).await,
            Err(FrameError::Io(_))
        ));
    }

    #[test]
    fn test_peer_setup_display() {
        let ready = PeerSetup::Ready {
            username: "bob".to_string(),
            addr: "127.0.0.1:5000".parse().unwrap(),
        };
        assert_eq!(ready.to_string(), "startprivate,bob,127.0.0.1,5000");
        assert_eq!(PeerSetup::SelfTarget.to_string(), "startprivate,self");
        assert_eq!(PeerSetup::Blocked.to_string(), "startprivate,blocked");
        assert_eq!(PeerSetup::Offline.to_string(), "startprivate,offline");
        assert_eq!(PeerSetup::Invalid.to_string(), "startprivate,invalid");
    }

    #[test]
    fn test_failure_bound_range() {
        assert!(MIN_FAILURE_BOUND <= MAX_FAILURE_BOUND);
        assert_eq!(MIN_FAILURE_BOUND, 1);
        assert_eq!(MAX_FAILURE_BOUND, 5);
    }
}
