use std::collections::VecDeque;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::connection::{ConnectionId, ConnectionRecord, InboundMessage, Origin};
use crate::error::{self, TransportError, is_would_block};
use crate::link::CloseReason;
use crate::socket::{self, SocketHandle};

/// 服务端角色：监听套接字与全部已接受连接。
///
/// # 教案式注释
///
/// ## 逻辑 (How)
/// 每帧依次执行：
/// 1. 接受所有挂起连接，直到 `accept` 报告会阻塞；
/// 2. 有连接时，把共享出站队列合并进每条连接（广播在前、私有在后），随后清空共享队列；
/// 3. 依次发送，再依次接收；任何一步失败只标记该连接；
/// 4. 统一移除被标记的连接。
///
/// ## 契约 (What)
/// - 没有连接时共享队列原样保留，等待第一位对端；
/// - 单条连接的故障不影响同一帧内其他连接的收发。
#[derive(Debug)]
pub(crate) struct ServerRole {
    listener: SocketHandle,
    local_addr: Option<SocketAddr>,
    connections: Vec<ConnectionRecord>,
    next_id: u64,
}

impl ServerRole {
    pub(crate) fn listen(port: u16, config: &TransportConfig) -> Result<Self, TransportError> {
        let listener = socket::open_listener(port, config.listen_backlog)?;
        let local_addr = listener.get().and_then(socket::local_addr);
        Ok(Self {
            listener,
            local_addr,
            connections: Vec::new(),
            next_id: 1,
        })
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub(crate) fn pump(
        &mut self,
        outbound: &mut VecDeque<String>,
        inbound: &mut VecDeque<InboundMessage>,
        scratch: &mut [u8],
        config: &TransportConfig,
    ) {
        self.accept_pending(config);

        if !self.connections.is_empty() {
            for record in &mut self.connections {
                record.merge_outbound(outbound);
            }
            outbound.clear();
        }

        for record in &mut self.connections {
            record.flush(config);
        }

        for record in &mut self.connections {
            let origin = Origin::Client(record.id());
            record.receive(config, scratch, |text| {
                inbound.push_back(InboundMessage { origin, text });
            });
        }

        self.connections.retain_mut(|record| {
            let Some(reason) = record.take_close_reason() else {
                return true;
            };
            log_close(record.id(), record.peer_addr(), &reason);
            record.close();
            false
        });
    }

    fn accept_pending(&mut self, config: &TransportConfig) {
        let Some(listener) = self.listener.get() else {
            return;
        };
        loop {
            match socket::accept(listener) {
                Ok((accepted, peer)) => {
                    if let Err(err) = accepted.set_nonblocking(true) {
                        warn!(
                            error = %err,
                            code = error::CONFIGURE.code,
                            peer = ?peer,
                            "dropping accepted connection that cannot be made non-blocking"
                        );
                        continue;
                    }
                    let id = ConnectionId::new(self.next_id);
                    self.next_id += 1;
                    info!(connection = %id, peer = ?peer, "accepted connection");
                    self.connections.push(ConnectionRecord::new(
                        id,
                        SocketHandle::from_socket(accepted),
                        peer,
                        config,
                    ));
                }
                Err(err) if is_would_block(&err) => break,
                Err(err) => {
                    warn!(error = %err, code = error::ACCEPT.code, "accept failed");
                    break;
                }
            }
        }
    }

    /// 把消息排入指定连接的私有队列；连接不存在时返回 `false`。
    pub(crate) fn queue_to(&mut self, id: ConnectionId, text: String) -> bool {
        match self.connections.iter_mut().find(|record| record.id() == id) {
            Some(record) => {
                record.queue_private(text);
                true
            }
            None => false,
        }
    }

    pub(crate) fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(ConnectionRecord::id).collect()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections
            .iter()
            .find(|record| record.id() == id)
            .and_then(ConnectionRecord::peer_addr)
    }

    pub(crate) fn close(&mut self) {
        for record in &mut self.connections {
            record.close();
        }
        self.connections.clear();
        self.listener.close();
    }
}

fn log_close(id: ConnectionId, peer: Option<SocketAddr>, reason: &CloseReason) {
    match reason {
        CloseReason::PeerClosed => {
            info!(connection = %id, peer = ?peer, "connection closed by peer");
        }
        CloseReason::OutboundOverflow { .. } => {
            warn!(connection = %id, peer = ?peer, reason = %reason, "dropping slow connection");
        }
        CloseReason::SocketClosed => {
            debug!(connection = %id, peer = ?peer, "removing connection without a socket");
        }
        CloseReason::SendFailed(_) | CloseReason::RecvFailed(_) => {
            warn!(connection = %id, peer = ?peer, reason = %reason, "connection failed");
        }
    }
}
