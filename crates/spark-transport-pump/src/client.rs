use std::collections::VecDeque;
use std::net::{SocketAddr, SocketAddrV4};

use crate::config::TransportConfig;
use crate::connection::{InboundMessage, Origin};
use crate::error::TransportError;
use crate::link::{CloseReason, PeerLink};
use crate::socket::{self, ConnectStatus, SocketHandle};

/// 已发起、尚未确认的客户端连接。
#[derive(Debug)]
pub(crate) struct ConnectingClient {
    socket: SocketHandle,
    remote: SocketAddrV4,
}

impl ConnectingClient {
    pub(crate) fn connect(remote: SocketAddrV4) -> Result<Self, TransportError> {
        let socket = socket::open_connecting(remote)?;
        Ok(Self { socket, remote })
    }

    pub(crate) fn remote(&self) -> SocketAddrV4 {
        self.remote
    }

    /// 零等待地检查连接结果。
    pub(crate) fn poll(&self) -> ConnectStatus {
        match self.socket.get() {
            Some(socket) => socket::poll_connect(socket),
            None => ConnectStatus::Failed(std::io::ErrorKind::NotConnected.into()),
        }
    }

    /// 连接确认后转入已连接状态，套接字所有权随之转移。
    pub(crate) fn into_connected(self, config: &TransportConfig) -> ConnectedClient {
        ConnectedClient {
            link: PeerLink::new(self.socket, config),
            remote: self.remote,
        }
    }

    pub(crate) fn close(&mut self) {
        self.socket.close();
    }
}

/// 已连接的客户端：唯一一条链路，没有私有队列。
#[derive(Debug)]
pub(crate) struct ConnectedClient {
    link: PeerLink,
    remote: SocketAddrV4,
}

impl ConnectedClient {
    pub(crate) fn remote(&self) -> SocketAddr {
        SocketAddr::V4(self.remote)
    }

    /// 排空共享出站队列、发送、接收。返回错误时连接已不可用。
    pub(crate) fn pump(
        &mut self,
        outbound: &mut VecDeque<String>,
        inbound: &mut VecDeque<InboundMessage>,
        scratch: &mut [u8],
        config: &TransportConfig,
    ) -> Result<(), CloseReason> {
        for text in outbound.drain(..) {
            self.link.enqueue(&text);
        }
        self.link.flush(config)?;
        self.link.receive(config, scratch, |text| {
            inbound.push_back(InboundMessage {
                origin: Origin::Server,
                text,
            });
        })
    }

    pub(crate) fn close(&mut self) {
        self.link.close();
    }
}
