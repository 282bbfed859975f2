use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;

use crate::config::TransportConfig;
use crate::link::{CloseReason, PeerLink};
use crate::socket::SocketHandle;

/// 服务端为每条已接受连接分配的标识，进程内单调递增、永不复用。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 返回原始数值。
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// 入站消息的来源。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    /// 客户端角色下，来自所连接的服务端。
    Server,
    /// 服务端角色下，来自某条已接受连接。
    Client(ConnectionId),
}

/// 一条完整的入站消息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// 消息来源。
    pub origin: Origin,
    /// 消息文本（不含分隔符）。
    pub text: String,
}

/// 服务端的单条连接记录。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把一个已接受对端所需的全部状态收拢在一起：套接字与缓冲由 [`PeerLink`] 持有，
///   另有一条只发给该对端的私有消息队列；
/// - 收发过程中出错时先记下原因，等本帧收发全部结束后再统一移除，
///   保证同一帧内其他连接照常处理。
///
/// ## 契约 (What)
/// - [`ConnectionRecord::merge_outbound`] 先追加广播消息，再追加私有队列，之后私有队列为空；
/// - 一旦被标记关闭，本帧不再对其执行接收。
#[derive(Debug)]
pub(crate) struct ConnectionRecord {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    link: PeerLink,
    private_queue: VecDeque<String>,
    close_reason: Option<CloseReason>,
}

impl ConnectionRecord {
    pub(crate) fn new(
        id: ConnectionId,
        socket: SocketHandle,
        peer_addr: Option<SocketAddr>,
        config: &TransportConfig,
    ) -> Self {
        Self {
            id,
            peer_addr,
            link: PeerLink::new(socket, config),
            private_queue: VecDeque::new(),
            close_reason: None,
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub(crate) fn queue_private(&mut self, text: String) {
        self.private_queue.push_back(text);
    }

    pub(crate) fn merge_outbound(&mut self, broadcast: &VecDeque<String>) {
        for text in broadcast {
            self.link.enqueue(text);
        }
        for text in self.private_queue.drain(..) {
            self.link.enqueue(&text);
        }
    }

    pub(crate) fn flush(&mut self, config: &TransportConfig) {
        if let Err(reason) = self.link.flush(config) {
            self.mark_closed(reason);
        }
    }

    pub(crate) fn receive<F>(&mut self, config: &TransportConfig, scratch: &mut [u8], sink: F)
    where
        F: FnMut(String),
    {
        if self.is_marked() {
            return;
        }
        if let Err(reason) = self.link.receive(config, scratch, sink) {
            self.mark_closed(reason);
        }
    }

    pub(crate) fn mark_closed(&mut self, reason: CloseReason) {
        if self.close_reason.is_none() {
            self.close_reason = Some(reason);
        }
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.close_reason.is_some()
    }

    pub(crate) fn take_close_reason(&mut self) -> Option<CloseReason> {
        self.close_reason.take()
    }

    #[cfg(test)]
    pub(crate) fn outbound_len(&self) -> usize {
        self.link.outbound_len()
    }

    pub(crate) fn close(&mut self) {
        self.private_queue.clear();
        self.link.close();
    }
}
