use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use spark_codec_nul::validate_payload;
use tracing::{debug, info, warn};

use crate::client::{ConnectedClient, ConnectingClient};
use crate::config::{ConfigError, TransportConfig};
use crate::connection::{ConnectionId, InboundMessage};
use crate::error::{self, TransportError};
use crate::server::ServerRole;
use crate::socket::ConnectStatus;

/// 传输当前所处的模式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportMode {
    /// 尚未启动，或已经关闭。
    Inactive,
    /// 已启动，未承担任何角色。
    Idle,
    /// 服务端，正在监听。
    ServerListening,
    /// 客户端，连接尚未确认。
    ClientConnecting,
    /// 客户端，已连接。
    ClientConnected,
}

impl TransportMode {
    /// 模式的稳定文本表示，用于日志字段。
    pub fn as_str(self) -> &'static str {
        match self {
            TransportMode::Inactive => "inactive",
            TransportMode::Idle => "idle",
            TransportMode::ServerListening => "server-listening",
            TransportMode::ClientConnecting => "client-connecting",
            TransportMode::ClientConnected => "client-connected",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 角色与其独占资源。每个变体只携带该模式下有意义的状态。
#[derive(Debug)]
enum Role {
    Inactive,
    Idle,
    Server(ServerRole),
    ClientConnecting(ConnectingClient),
    ClientConnected(ConnectedClient),
}

impl Role {
    fn mode(&self) -> TransportMode {
        match self {
            Role::Inactive => TransportMode::Inactive,
            Role::Idle => TransportMode::Idle,
            Role::Server(_) => TransportMode::ServerListening,
            Role::ClientConnecting(_) => TransportMode::ClientConnecting,
            Role::ClientConnected(_) => TransportMode::ClientConnected,
        }
    }
}

/// 帧驱动的 TCP 传输。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 宿主在自己的主循环中每帧调用一次 [`FrameTransport::begin_frame_pump`] 与
///   [`FrameTransport::end_frame_pump`]，传输层不创建线程、不阻塞；
/// - 同一时刻只承担一个角色：服务端或客户端。
///
/// ## 逻辑 (How)
/// - `role` 是一个和类型，监听套接字、连接列表、客户端链路只存在于对应变体中，
///   切换角色即替换变体，旧资源随之关闭；
/// - 出站消息先进入共享队列，由泵按角色分发；入站消息进入共享入站队列，由宿主取走。
///
/// ## 契约 (What)
/// - 启动类操作失败时模式与队列保持不变，不残留任何套接字；
/// - 运行期的连接故障不以错误形式返回，只体现为连接被移除或模式变化，并记录日志；
/// - 断开请求在下一次 `end_frame_pump` 生效，此前排队的消息会尽量先发出。
#[derive(Debug)]
pub struct FrameTransport {
    config: TransportConfig,
    role: Role,
    outbound: VecDeque<String>,
    inbound: VecDeque<InboundMessage>,
    disconnect_pending: bool,
    scratch: Vec<u8>,
}

impl Default for FrameTransport {
    fn default() -> Self {
        Self::with_valid_config(TransportConfig::default())
    }
}

impl FrameTransport {
    /// 使用给定配置创建传输，初始模式为 `Inactive`。
    pub fn new(config: TransportConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: TransportConfig) -> Self {
        Self {
            scratch: vec![0; config.recv_chunk_size],
            config,
            role: Role::Inactive,
            outbound: VecDeque::new(),
            inbound: VecDeque::new(),
            disconnect_pending: false,
        }
    }

    /// 当前模式。
    pub fn mode(&self) -> TransportMode {
        self.role.mode()
    }

    /// 当前配置。
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// 进入 `Idle`。已经启动时不做任何事。
    pub fn startup(&mut self) {
        if matches!(self.role, Role::Inactive) {
            self.role = Role::Idle;
            debug!("transport started");
        } else {
            debug!(mode = %self.mode(), "startup ignored; transport already started");
        }
    }

    /// 关闭所有套接字、清空队列，回到 `Inactive`。
    pub fn shutdown(&mut self) {
        match mem::replace(&mut self.role, Role::Inactive) {
            Role::Server(mut server) => server.close(),
            Role::ClientConnecting(mut client) => client.close(),
            Role::ClientConnected(mut client) => client.close(),
            Role::Inactive | Role::Idle => {}
        }
        self.outbound.clear();
        self.inbound.clear();
        self.disconnect_pending = false;
        debug!("transport shut down");
    }

    /// 在 `0.0.0.0:port` 上开始监听。`port` 为 0 时由系统分配。
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn start_server(&mut self, port: u16) -> Result<(), TransportError> {
        self.require_idle("start_server")?;
        match ServerRole::listen(port, &self.config) {
            Ok(server) => {
                info!(local = ?server.local_addr(), "server listening");
                self.reset_queues();
                self.role = Role::Server(server);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, code = err.code(), "failed to start server");
                Err(err)
            }
        }
    }

    /// 停止监听并关闭所有连接。非服务端模式下不做任何事。
    pub fn stop_server(&mut self) {
        if !matches!(self.role, Role::Server(_)) {
            return;
        }
        if let Role::Server(mut server) = mem::replace(&mut self.role, Role::Idle) {
            server.close();
            info!("server stopped");
        }
        self.disconnect_pending = false;
    }

    /// 向 `address:port` 发起非阻塞连接。`address` 必须是点分十进制 IPv4 地址。
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn start_client(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
        self.require_idle("start_client")?;
        let ip: Ipv4Addr = address
            .parse()
            .map_err(|_| TransportError::InvalidAddress {
                address: address.to_owned(),
            })?;
        match ConnectingClient::connect(SocketAddrV4::new(ip, port)) {
            Ok(client) => {
                debug!(remote = %client.remote(), "connect in progress");
                self.reset_queues();
                self.role = Role::ClientConnecting(client);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, code = err.code(), "failed to start client");
                Err(err)
            }
        }
    }

    /// 关闭客户端套接字。非客户端模式下不做任何事。
    pub fn stop_client(&mut self) {
        match mem::replace(&mut self.role, Role::Idle) {
            Role::ClientConnecting(mut client) => {
                client.close();
                info!("client stopped before connecting");
            }
            Role::ClientConnected(mut client) => {
                client.close();
                info!("client stopped");
            }
            other => {
                self.role = other;
                return;
            }
        }
        self.disconnect_pending = false;
    }

    /// 每帧开始时调用：推进连接、发送、接收。
    pub fn begin_frame_pump(&mut self) {
        self.pump_role();
    }

    /// 每帧结束时调用：有挂起的断开请求时，再推进一次以送出已排队消息，然后离开当前角色。
    pub fn end_frame_pump(&mut self) {
        if self.disconnect_pending {
            self.pump_role();
            match self.mode() {
                TransportMode::ServerListening => self.stop_server(),
                TransportMode::ClientConnecting | TransportMode::ClientConnected => {
                    self.stop_client()
                }
                TransportMode::Inactive | TransportMode::Idle => {}
            }
            self.disconnect_pending = false;
        }
    }

    fn pump_role(&mut self) {
        if matches!(self.role, Role::ClientConnecting(_)) {
            self.finish_connect();
        }
        let lost = match &mut self.role {
            Role::Server(server) => {
                server.pump(
                    &mut self.outbound,
                    &mut self.inbound,
                    &mut self.scratch,
                    &self.config,
                );
                None
            }
            Role::ClientConnected(client) => client
                .pump(
                    &mut self.outbound,
                    &mut self.inbound,
                    &mut self.scratch,
                    &self.config,
                )
                .err()
                .map(|reason| (client.remote(), reason)),
            Role::Inactive | Role::Idle | Role::ClientConnecting(_) => None,
        };
        if let Some((remote, reason)) = lost {
            warn!(remote = %remote, reason = %reason, "connection to server lost");
            self.stop_client();
        }
    }

    fn finish_connect(&mut self) {
        let Role::ClientConnecting(client) = &self.role else {
            return;
        };
        match client.poll() {
            ConnectStatus::Pending => {}
            ConnectStatus::Connected(peer) => {
                if let Role::ClientConnecting(client) = mem::replace(&mut self.role, Role::Idle) {
                    info!(remote = %client.remote(), peer = ?peer, "connected to server");
                    self.role = Role::ClientConnected(client.into_connected(&self.config));
                }
            }
            ConnectStatus::Failed(err) => {
                warn!(
                    error = %err,
                    code = error::CONNECT.code,
                    remote = %client.remote(),
                    "connection attempt failed"
                );
                self.stop_client();
            }
        }
    }

    /// 排入一条出站消息。服务端广播给所有连接，客户端发往服务端。
    ///
    /// 文本含有分隔符时拒绝入队。
    pub fn queue_outgoing_string(&mut self, text: impl Into<String>) -> Result<(), TransportError> {
        let text = text.into();
        validate_payload(&text)?;
        self.outbound.push_back(text);
        Ok(())
    }

    /// 排入一条只发往指定连接的消息。
    ///
    /// 非服务端模式或连接已不存在时，消息被丢弃并记录日志。
    pub fn queue_outgoing_string_to_client(
        &mut self,
        id: ConnectionId,
        text: impl Into<String>,
    ) -> Result<(), TransportError> {
        let text = text.into();
        validate_payload(&text)?;
        match &mut self.role {
            Role::Server(server) => {
                if !server.queue_to(id, text) {
                    debug!(connection = %id, "dropping message for unknown connection");
                }
            }
            role => {
                debug!(connection = %id, mode = %role.mode(), "dropping unicast message outside server mode");
            }
        }
        Ok(())
    }

    /// 取走所有已收到的消息文本，按到达顺序排列。
    pub fn retrieve_incoming_strings(&mut self) -> Vec<String> {
        self.inbound.drain(..).map(|message| message.text).collect()
    }

    /// 取走所有已收到的消息及其来源。
    pub fn retrieve_incoming_messages(&mut self) -> Vec<InboundMessage> {
        self.inbound.drain(..).collect()
    }

    /// 请求在下一次 `end_frame_pump` 时断开。
    pub fn request_disconnect(&mut self) {
        self.disconnect_pending = true;
    }

    /// 直接设置断开标志。
    pub fn set_disconnect_pending(&mut self, pending: bool) {
        self.disconnect_pending = pending;
    }

    /// 是否有挂起的断开请求。
    pub fn is_disconnect_pending(&self) -> bool {
        self.disconnect_pending
    }

    /// 服务端实际监听的地址。
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        match &self.role {
            Role::Server(server) => server.local_addr(),
            _ => None,
        }
    }

    /// 客户端的目标地址。
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.role {
            Role::ClientConnecting(client) => Some(SocketAddr::V4(client.remote())),
            Role::ClientConnected(client) => Some(client.remote()),
            _ => None,
        }
    }

    /// 当前所有连接的标识，按接受顺序排列。
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        match &self.role {
            Role::Server(server) => server.connection_ids(),
            _ => Vec::new(),
        }
    }

    /// 当前连接数。
    pub fn connection_count(&self) -> usize {
        match &self.role {
            Role::Server(server) => server.connection_count(),
            _ => 0,
        }
    }

    /// 指定连接的对端地址。
    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        match &self.role {
            Role::Server(server) => server.peer_addr(id),
            _ => None,
        }
    }

    /// 共享出站队列中尚未分发的消息数。
    pub fn pending_outgoing(&self) -> usize {
        self.outbound.len()
    }

    fn reset_queues(&mut self) {
        self.outbound.clear();
        self.inbound.clear();
        self.disconnect_pending = false;
    }

    fn require_idle(&self, operation: &'static str) -> Result<(), TransportError> {
        match self.role {
            Role::Idle => Ok(()),
            _ => Err(TransportError::InvalidMode {
                operation,
                mode: self.mode(),
            }),
        }
    }
}

impl Drop for FrameTransport {
    fn drop(&mut self) {
        if !matches!(self.role, Role::Inactive) {
            self.shutdown();
        }
    }
}
