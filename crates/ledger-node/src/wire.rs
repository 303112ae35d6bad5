//! Length-prefixed bincode frames: a big-endian `u32` body length followed by
//! the encoded [`Message`]. One frame per connection.

use crate::constants::MAX_FRAME_SIZE;
use crate::message::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
}

pub fn encode(message: &Message) -> Result<Vec<u8>, WireError> {
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode(body: &[u8]) -> Result<Message, WireError> {
    Ok(bincode::deserialize(body)?)
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), WireError> {
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, WireError> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Payload, PeerAddress};
    use ledger_core::{hash, Block, MerkleTree, Transaction, GENESIS};

    fn block_message() -> Message {
        let mut tree: MerkleTree = ["A", "B", "C"].into_iter().map(Transaction::new).collect();
        let block = Block::new(tree.root(), GENESIS, 0);
        Message::new(PeerAddress::localhost(8081), Payload::NewBlock { block, tree })
    }

    #[test]
    fn frame_carries_body_length() {
        let frame = encode(&block_message()).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
    }

    #[test]
    fn block_message_survives_codec() {
        let message = block_message();
        let frame = encode(&message).unwrap();
        let decoded = decode(&frame[4..]).unwrap();
        assert_eq!(decoded, message);
        if let Payload::NewBlock { block, tree } = decoded.payload {
            assert!(tree.is_valid());
            assert_eq!(tree.built_root(), Some(block.merkle_root));
        } else {
            panic!("wrong payload");
        }
    }

    #[test]
    fn need_block_digest_is_fixed_width() {
        let message = Message::new(PeerAddress::localhost(1), Payload::NeedBlock(hash("x")));
        let frame = encode(&message).unwrap();
        let decoded = decode(&frame[4..]).unwrap();
        assert_eq!(decoded.payload, Payload::NeedBlock(hash("x")));
    }

    #[test]
    fn garbage_body_is_rejected() {
        assert!(matches!(decode(&[0xFF; 3]), Err(WireError::Codec(_))));
    }

    #[tokio::test]
    async fn oversized_frame_header_is_rejected() {
        let header = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        let mut reader = &header[..];
        assert!(matches!(
            read_message(&mut reader).await,
            Err(WireError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn stream_round_trip() {
        let message = Message::new(
            PeerAddress::localhost(9),
            Payload::PeerList(vec![PeerAddress::localhost(10), PeerAddress::localhost(11)]),
        );
        let mut buf = Vec::new();
        write_message(&mut buf, &message).await.unwrap();
        let mut reader = &buf[..];
        assert_eq!(read_message(&mut reader).await.unwrap(), message);
    }
}
