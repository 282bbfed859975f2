use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use socket2::Socket;
use spark_codec_nul::{NulFramer, encode_into};
use tracing::{debug, warn};

use crate::backpressure::{PressureVerdict, WritePressure};
use crate::config::TransportConfig;
use crate::error::is_would_block;
use crate::socket::SocketHandle;

/// 链路被拆除的原因。
#[derive(Debug, thiserror::Error)]
pub(crate) enum CloseReason {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),
    #[error("receive failed: {0}")]
    RecvFailed(#[source] io::Error),
    #[error("outbound buffer holds {buffered} bytes, above the {limit} byte high-water mark")]
    OutboundOverflow { buffered: usize, limit: usize },
    #[error("socket is already closed")]
    SocketClosed,
}

/// 一条已建立 TCP 连接的收发状态：套接字、入站分帧器、出站字节缓冲。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 服务端的每条连接记录与客户端的唯一连接执行完全相同的收发算法，
///   把它收敛到同一个结构里，两种角色只在“失败后如何处置”上有所区别。
///
/// ## 逻辑 (How)
/// - 出站：[`PeerLink::enqueue`] 把整条消息连同分隔符追加进 `outbound`；
///   [`PeerLink::flush`] 尽量多地写入内核，只移除已发送的前缀；
/// - 入站：[`PeerLink::receive`] 在每帧读取次数上限内反复 `recv`，每次读到的字节立刻交给分帧器。
///
/// ## 契约 (What)
/// - `outbound` 的首字节总是某条消息的起点：部分发送只会截掉前缀，不会破坏消息边界；
/// - 返回 `Err(CloseReason)` 时链路已不可用，调用方负责关闭并移除它。
#[derive(Debug)]
pub(crate) struct PeerLink {
    socket: SocketHandle,
    inbound: NulFramer,
    outbound: BytesMut,
    pressure: WritePressure,
}

impl PeerLink {
    pub(crate) fn new(socket: SocketHandle, config: &TransportConfig) -> Self {
        Self {
            socket,
            inbound: NulFramer::with_capacity(config.recv_chunk_size),
            outbound: BytesMut::new(),
            pressure: WritePressure::new(),
        }
    }

    /// 追加一条出站消息。文本已在入队时校验过，不含分隔符。
    pub(crate) fn enqueue(&mut self, text: &str) {
        if let Err(err) = encode_into(text, &mut self.outbound) {
            warn!(error = %err, code = err.code(), "dropping outbound message that cannot be framed");
        }
    }

    #[cfg(test)]
    pub(crate) fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    #[cfg(test)]
    pub(crate) fn inbound_pending_len(&self) -> usize {
        self.inbound.pending_len()
    }

    /// 尽量多地发送出站缓冲。`WouldBlock` 表示留待下一帧；对端持续不读取且缓冲超过高水位时返回错误。
    pub(crate) fn flush(&mut self, config: &TransportConfig) -> Result<(), CloseReason> {
        let Some(socket) = self.socket.get() else {
            return Err(CloseReason::SocketClosed);
        };
        let mut writer: &Socket = socket;
        let mut blocked = false;
        let mut sent_total = 0;
        while !self.outbound.is_empty() {
            match writer.write(&self.outbound) {
                Ok(0) => {
                    return Err(CloseReason::SendFailed(io::ErrorKind::WriteZero.into()));
                }
                Ok(sent) => {
                    self.outbound.advance(sent);
                    sent_total += sent;
                }
                Err(err) if is_would_block(&err) => {
                    blocked = true;
                    break;
                }
                Err(err) => return Err(CloseReason::SendFailed(err)),
            }
        }

        match self
            .pressure
            .after_send(self.outbound.len(), sent_total, blocked, config)
        {
            PressureVerdict::Healthy => Ok(()),
            PressureVerdict::Stalled { frames } => {
                debug!(
                    frames,
                    buffered = self.outbound.len(),
                    "peer has not drained its socket for several frames"
                );
                Ok(())
            }
            PressureVerdict::Overflow { buffered, limit } => {
                Err(CloseReason::OutboundOverflow { buffered, limit })
            }
        }
    }

    /// 在本帧读取预算内接收数据，并把分帧得到的消息交给 `sink`。
    ///
    /// 对端关闭前已经到达的完整消息仍会先交给 `sink`。
    pub(crate) fn receive<F>(
        &mut self,
        config: &TransportConfig,
        scratch: &mut [u8],
        mut sink: F,
    ) -> Result<(), CloseReason>
    where
        F: FnMut(String),
    {
        let Some(socket) = self.socket.get() else {
            return Err(CloseReason::SocketClosed);
        };
        let mut reader: &Socket = socket;
        for _ in 0..config.max_recv_calls_per_frame {
            match reader.read(scratch) {
                Ok(0) => return Err(CloseReason::PeerClosed),
                Ok(received) => {
                    self.inbound.extend_from_slice(&scratch[..received]);
                    self.inbound.drain_messages(&mut sink);
                }
                Err(err) if is_would_block(&err) => break,
                Err(err) => return Err(CloseReason::RecvFailed(err)),
            }
        }
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.socket.close();
        self.inbound.clear();
        self.outbound.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn loopback_pair(config: &TransportConfig) -> (PeerLink, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let remote = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (accepted, _) = listener.accept().expect("accept");
        accepted.set_nonblocking(true).expect("non-blocking");
        let link = PeerLink::new(SocketHandle::from_socket(Socket::from(accepted)), config);
        (link, remote)
    }

    fn receive_until(
        link: &mut PeerLink,
        config: &TransportConfig,
        expected: usize,
    ) -> Vec<String> {
        let mut scratch = vec![0; config.recv_chunk_size];
        let mut messages = Vec::new();
        for _ in 0..200 {
            link.receive(config, &mut scratch, |text| messages.push(text))
                .expect("link stays open");
            if messages.len() >= expected {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        messages
    }

    #[test]
    fn partial_message_waits_for_its_delimiter() {
        let config = TransportConfig::default();
        let (mut link, mut remote) = loopback_pair(&config);

        remote.write_all(b"AB").expect("write fragment");
        thread::sleep(Duration::from_millis(20));
        assert!(receive_until(&mut link, &config, 1).is_empty());
        assert_eq!(link.inbound_pending_len(), 2);

        remote.write_all(b"CD\0").expect("write tail");
        assert_eq!(receive_until(&mut link, &config, 1), ["ABCD"]);
    }

    #[test]
    fn flush_writes_whole_messages() {
        let config = TransportConfig::default();
        let (mut link, mut remote) = loopback_pair(&config);
        link.enqueue("HELLO");
        link.enqueue("WORLD");
        link.flush(&config).expect("flush succeeds");
        assert_eq!(link.outbound_len(), 0);

        let mut received = [0u8; 12];
        remote.read_exact(&mut received).expect("read both messages");
        assert_eq!(&received, b"HELLO\0WORLD\0");
    }

    #[test]
    fn peer_close_is_reported_after_pending_messages() {
        let config = TransportConfig::default();
        let (mut link, mut remote) = loopback_pair(&config);
        remote.write_all(b"BYE\0").expect("write");
        drop(remote);

        let mut scratch = vec![0; config.recv_chunk_size];
        let mut messages = Vec::new();
        let mut outcome = Ok(());
        for _ in 0..200 {
            outcome = link.receive(&config, &mut scratch, |text| messages.push(text));
            if outcome.is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(matches!(outcome, Err(CloseReason::PeerClosed)));
        assert_eq!(messages, ["BYE"]);
    }

    #[test]
    fn closed_link_refuses_io() {
        let config = TransportConfig::default();
        let (mut link, _remote) = loopback_pair(&config);
        link.close();
        assert!(matches!(link.flush(&config), Err(CloseReason::SocketClosed)));
    }
}
