//! Tagged wire format of the data channel.
//!
//! Every logical message is exchanged in three framed steps:
//!
//! ```text
//! sender                          receiver
//! [1-byte probe][1-byte tag]  ->
//!                             <-  [1-byte ack]           (Data only)
//! [u32 BE value count]        ->                         (Data only)
//! [count x f64, BE bits]      ->                         (Data only)
//! ```
//!
//! The ack and the length prefix let the receiver allocate an exactly
//! sized buffer before the bulk payload arrives. Tags form a closed set;
//! anything else is a protocol error and ends the stream.

use crate::config::ChannelLimits;
use crate::{CadenceError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Tag announcing a payload of f64 values.
pub const TAG_DATA: u8 = 0;
/// Tag marking a synchronization-window boundary. No payload.
pub const TAG_END_OF_WINDOW: u8 = 1;
/// Tag announcing the peer is terminating. No payload.
pub const TAG_END_OF_STREAM: u8 = 2;

const PROBE: u8 = 0x2b;
const ACK: u8 = 0x06;

/// One message on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Data(Vec<f64>),
    EndOfWindow,
    EndOfStream,
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::Data(_) => TAG_DATA,
            Message::EndOfWindow => TAG_END_OF_WINDOW,
            Message::EndOfStream => TAG_END_OF_STREAM,
        }
    }
}

/// Write one message, running the ack exchange for `Data` payloads.
pub(crate) async fn write_message<S>(stream: &mut S, message: &Message) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Message::Data(values) = message {
        if values.len() > ChannelLimits::MAX_PAYLOAD_VALUES {
            return Err(CadenceError::Protocol {
                message: format!(
                    "refusing to send {} values, the limit is {}",
                    values.len(),
                    ChannelLimits::MAX_PAYLOAD_VALUES
                ),
            });
        }
    }

    stream.write_all(&[PROBE, message.tag()]).await?;
    stream.flush().await?;

    if let Message::Data(values) = message {
        let mut ack = [0u8; 1];
        stream.read_exact(&mut ack).await?;
        if ack[0] != ACK {
            return Err(CadenceError::Protocol {
                message: format!("unexpected ack byte 0x{:02x}", ack[0]),
            });
        }
        stream.write_all(&(values.len() as u32).to_be_bytes()).await?;
        stream.write_all(&encode_values(values)).await?;
        stream.flush().await?;
    }
    Ok(())
}

/// Read one message.
///
/// Returns `None` when the peer is gone: a clean EOF while waiting for the
/// probe, or any transport fault mid-message. Callers treat `None` as end
/// of stream. Unknown tags and corrupt length prefixes stay hard errors.
pub(crate) async fn read_message<S>(stream: &mut S) -> Result<Option<Message>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            debug!("peer closed the channel");
            return Ok(None);
        }
        Err(e) => {
            warn!("transport fault while waiting for a message: {e}");
            return Ok(None);
        }
    }

    if header[0] != PROBE {
        return Err(CadenceError::Protocol {
            message: format!("stream desynchronized, probe byte was 0x{:02x}", header[0]),
        });
    }

    match read_body(stream, header[1]).await {
        Ok(message) => Ok(Some(message)),
        Err(CadenceError::Io { message, .. }) => {
            warn!("transport fault mid-message: {message}");
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

async fn read_body<S>(stream: &mut S, tag: u8) -> Result<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tag {
        TAG_DATA => {
            // Ack first: the sender holds the payload until we are ready
            // to size the buffer.
            stream.write_all(&[ACK]).await?;
            stream.flush().await?;

            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await?;
            let count = u32::from_be_bytes(len_buf) as usize;
            if count > ChannelLimits::MAX_PAYLOAD_VALUES {
                return Err(CadenceError::Protocol {
                    message: format!(
                        "payload of {count} values exceeds the limit of {}",
                        ChannelLimits::MAX_PAYLOAD_VALUES
                    ),
                });
            }

            let mut payload = vec![0u8; count * 8];
            stream.read_exact(&mut payload).await?;
            Ok(Message::Data(decode_values(&payload)))
        }
        TAG_END_OF_WINDOW => Ok(Message::EndOfWindow),
        TAG_END_OF_STREAM => Ok(Message::EndOfStream),
        tag => Err(CadenceError::UnknownTag { tag }),
    }
}

pub(crate) fn encode_values(values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        bytes.extend_from_slice(&value.to_bits().to_be_bytes());
    }
    bytes
}

pub(crate) fn decode_values(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_bits(u64::from_be_bytes(raw))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_value_codec_roundtrip() {
        let values = vec![0.0, -1.5, f64::MAX, f64::MIN_POSITIVE, 1e-300];
        assert_eq!(decode_values(&encode_values(&values)), values);
    }

    #[tokio::test]
    async fn test_data_roundtrip_with_ack_exchange() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let payload = vec![1.5, -2.0, 3.25];

        let data_msg = Message::Data(payload.clone());
        let (sent, received) = tokio::join!(
            write_message(&mut a, &data_msg),
            read_message(&mut b)
        );

        sent.unwrap();
        assert_eq!(received.unwrap(), Some(Message::Data(payload)));
    }

    #[tokio::test]
    async fn test_control_messages_have_no_payload_phase() {
        let (mut a, mut b) = tokio::io::duplex(64);

        write_message(&mut a, &Message::EndOfWindow).await.unwrap();
        write_message(&mut a, &Message::EndOfStream).await.unwrap();

        assert_eq!(read_message(&mut b).await.unwrap(), Some(Message::EndOfWindow));
        assert_eq!(read_message(&mut b).await.unwrap(), Some(Message::EndOfStream));
    }

    #[tokio::test]
    async fn test_unknown_tag_is_fatal() {
        let (mut a, mut b) = tokio::io::duplex(64);

        a.write_all(&[PROBE, 9]).await.unwrap();

        match read_message(&mut b).await {
            Err(CadenceError::UnknownTag { tag: 9 }) => {}
            other => panic!("expected UnknownTag, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_desynchronized_probe_is_fatal() {
        let (mut a, mut b) = tokio::io::duplex(64);

        a.write_all(&[0xff, TAG_END_OF_WINDOW]).await.unwrap();

        assert!(matches!(
            read_message(&mut b).await,
            Err(CadenceError::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_reads_as_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);

        assert_eq!(read_message(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_is_fatal() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let writer = async {
            a.write_all(&[PROBE, TAG_DATA]).await.unwrap();
            let mut ack = [0u8; 1];
            a.read_exact(&mut ack).await.unwrap();
            let count = (ChannelLimits::MAX_PAYLOAD_VALUES + 1) as u32;
            a.write_all(&count.to_be_bytes()).await.unwrap();
        };

        let (_, received) = tokio::join!(writer, read_message(&mut b));
        assert!(matches!(received, Err(CadenceError::Protocol { .. })));
    }
}
