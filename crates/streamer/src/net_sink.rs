//! Network sink: frames serialized with a fixed header onto a TCP or UDP
//! endpoint. TCP delivers ordered and reliable and therefore blocks the
//! producer under backpressure; UDP is best effort and drops instead.

use std::io::{self, Write};
use std::net::{TcpStream, UdpSocket};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::info;

use stream_types::{SampleFrame, TransportKind};

use crate::queue::OverflowPolicy;
use crate::sink::{Sink, SinkError, SinkStatus};

/// Fixed wire header preceding every frame:
/// `{sequence: u32, channel_count: u8, resolution_bits: u8, payload_len: u32}`,
/// little endian, followed by `payload_len` bytes of per-channel packed
/// samples.
pub const FRAME_HEADER_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub seq: u32,
    pub channel_count: u8,
    pub resolution_bits: u8,
    pub payload_len: u32,
}

/// Serialize a frame into one contiguous wire buffer.
pub fn encode_frame(frame: &SampleFrame) -> Vec<u8> {
    let payload_len = frame.payload_len();
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload_len as usize);
    // Writes into a Vec cannot fail.
    let _ = buf.write_u32::<LittleEndian>(frame.seq());
    let _ = buf.write_u8(frame.channel_count());
    let _ = buf.write_u8(frame.resolution().bits());
    let _ = buf.write_u32::<LittleEndian>(payload_len);
    for channel in frame.channels() {
        buf.extend_from_slice(channel);
    }
    buf
}

pub fn decode_header(mut buf: &[u8]) -> io::Result<FrameHeader> {
    let seq = buf.read_u32::<LittleEndian>()?;
    let channel_count = buf.read_u8()?;
    let resolution_bits = buf.read_u8()?;
    let payload_len = buf.read_u32::<LittleEndian>()?;
    Ok(FrameHeader {
        seq,
        channel_count,
        resolution_bits,
        payload_len,
    })
}

enum Transport {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

pub struct NetSink {
    transport: Transport,
}

impl NetSink {
    pub fn connect(kind: TransportKind, host: &str, port: u16) -> Result<Self, SinkError> {
        let transport = match kind {
            TransportKind::Tcp => {
                let stream = TcpStream::connect((host, port)).map_err(SinkError::Net)?;
                stream.set_nodelay(true).map_err(SinkError::Net)?;
                info!(host, port, "tcp sink connected");
                Transport::Tcp(stream)
            }
            TransportKind::Udp => {
                let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(SinkError::Net)?;
                socket.connect((host, port)).map_err(SinkError::Net)?;
                info!(host, port, "udp sink ready");
                Transport::Udp(socket)
            }
            TransportKind::File => {
                return Err(SinkError::Net(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "file transport is not a network sink",
                )))
            }
        };
        Ok(Self { transport })
    }
}

impl Sink for NetSink {
    fn write_frame(&mut self, frame: &SampleFrame) -> Result<SinkStatus, SinkError> {
        let buf = encode_frame(frame);
        match &mut self.transport {
            // write_all rides out partial writes and TCP flow control.
            Transport::Tcp(stream) => stream.write_all(&buf).map_err(SinkError::Net)?,
            // One frame per datagram. Loss in flight is acceptable; an
            // OS-level send error is not.
            Transport::Udp(socket) => {
                socket.send(&buf).map_err(SinkError::Net)?;
            }
        }
        Ok(SinkStatus::Continue)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Transport::Tcp(stream) = &mut self.transport {
            stream.flush().map_err(SinkError::Net)?;
        }
        Ok(())
    }

    fn overflow_policy(&self) -> OverflowPolicy {
        match self.transport {
            Transport::Tcp(_) => OverflowPolicy::Block,
            Transport::Udp(_) => OverflowPolicy::DropOldest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Read;
    use std::net::TcpListener;
    use stream_types::Resolution;

    fn two_channel_frame(seq: u32) -> SampleFrame {
        SampleFrame::new(
            seq,
            Resolution::Bits16,
            1,
            vec![Bytes::from(vec![1u8; 8]), Bytes::from(vec![2u8; 8])],
            4,
        )
    }

    #[test]
    fn header_round_trip() {
        let frame = two_channel_frame(42);
        let buf = encode_frame(&frame);
        assert_eq!(buf.len(), FRAME_HEADER_LEN + 16);
        let header = decode_header(&buf).unwrap();
        assert_eq!(header.seq, 42);
        assert_eq!(header.channel_count, 2);
        assert_eq!(header.resolution_bits, 16);
        assert_eq!(header.payload_len, 16);
        // Channel payloads follow in channel order.
        assert_eq!(&buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + 8], &[1u8; 8]);
        assert_eq!(&buf[FRAME_HEADER_LEN + 8..], &[2u8; 8]);
    }

    #[test]
    fn tcp_sink_delivers_frames_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let reader = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut data = Vec::new();
            stream.read_to_end(&mut data).unwrap();
            data
        });

        let mut sink = NetSink::connect(TransportKind::Tcp, "127.0.0.1", addr.port()).unwrap();
        assert_eq!(sink.overflow_policy(), OverflowPolicy::Block);
        for seq in 0..3 {
            assert_eq!(
                sink.write_frame(&two_channel_frame(seq)).unwrap(),
                SinkStatus::Continue
            );
        }
        sink.flush().unwrap();
        drop(sink);

        let data = reader.join().unwrap();
        let frame_len = FRAME_HEADER_LEN + 16;
        assert_eq!(data.len(), 3 * frame_len);
        for seq in 0..3u32 {
            let header = decode_header(&data[seq as usize * frame_len..]).unwrap();
            assert_eq!(header.seq, seq);
        }
    }

    #[test]
    fn udp_sink_sends_one_datagram_per_frame() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();
        let mut sink = NetSink::connect(TransportKind::Udp, "127.0.0.1", addr.port()).unwrap();
        assert_eq!(sink.overflow_policy(), OverflowPolicy::DropOldest);

        sink.write_frame(&two_channel_frame(9)).unwrap();
        let mut buf = [0u8; 128];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, FRAME_HEADER_LEN + 16);
        assert_eq!(decode_header(&buf[..n]).unwrap().seq, 9);
    }

    #[test]
    fn file_transport_is_rejected() {
        assert!(NetSink::connect(TransportKind::File, "127.0.0.1", 1).is_err());
    }
}
