use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::trace;

use crate::error::{self, TransportError, map_io_error};

/// 单个操作系统套接字的独占句柄。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 每个套接字只归属一个所有者：监听套接字、客户端套接字或某条连接记录；
///   句柄不可复制，杜绝同一描述符被两处关闭；
/// - 句柄可以处于“无效”状态，关闭后自动回到该状态，重复关闭不会产生副作用。
///
/// ## 契约 (What)
/// - [`SocketHandle::invalid`]：不持有任何套接字；
/// - [`SocketHandle::close`]：唯一的关闭入口，幂等；
/// - 句柄被丢弃时同样会关闭仍持有的套接字。
#[derive(Debug, Default)]
pub(crate) struct SocketHandle {
    socket: Option<Socket>,
}

impl SocketHandle {
    /// 不持有套接字的句柄。
    #[cfg(test)]
    pub(crate) const fn invalid() -> Self {
        Self { socket: None }
    }

    pub(crate) fn from_socket(socket: Socket) -> Self {
        Self {
            socket: Some(socket),
        }
    }

    /// 是否仍持有套接字。
    #[cfg(test)]
    pub(crate) fn is_valid(&self) -> bool {
        self.socket.is_some()
    }

    pub(crate) fn get(&self) -> Option<&Socket> {
        self.socket.as_ref()
    }

    /// 关闭套接字并回到无效状态。
    pub(crate) fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            trace!(local = ?local_addr(&socket), "closing socket");
            drop(socket);
        }
    }
}

/// 连接尝试在某一帧的状态。
#[derive(Debug)]
pub(crate) enum ConnectStatus {
    Pending,
    Connected(Option<SocketAddr>),
    Failed(io::Error),
}

/// 创建绑定在 `0.0.0.0:port` 上的非阻塞监听套接字。
///
/// 任一步失败时，尝试中的套接字随返回值一起被关闭。
pub(crate) fn open_listener(port: u16, backlog: i32) -> Result<SocketHandle, TransportError> {
    let socket = new_stream_socket()?;
    socket
        .set_reuse_address(true)
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    let addr = SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket
        .bind(&addr)
        .map_err(|err| map_io_error(error::BIND, err))?;
    socket
        .listen(backlog)
        .map_err(|err| map_io_error(error::LISTEN, err))?;
    Ok(SocketHandle::from_socket(socket))
}

/// 创建非阻塞套接字并发起连接。
///
/// “会阻塞”或“正在进行中”都视为目前为止成功，结果由后续帧的 [`poll_connect`] 确认。
pub(crate) fn open_connecting(remote: SocketAddrV4) -> Result<SocketHandle, TransportError> {
    let socket = new_stream_socket()?;
    match socket.connect(&SockAddr::from(remote)) {
        Ok(()) => {}
        Err(err) if connect_in_progress(&err) => {}
        Err(err) => return Err(map_io_error(error::CONNECT, err)),
    }
    Ok(SocketHandle::from_socket(socket))
}

/// 以零等待检查连接是否建立。
///
/// 先读取 `SO_ERROR`，有挂起错误即判定失败；否则能拿到对端地址即判定已连接，
/// 对端地址尚不可用则继续等待下一帧。
pub(crate) fn poll_connect(socket: &Socket) -> ConnectStatus {
    match socket.take_error() {
        Ok(Some(err)) | Err(err) => return ConnectStatus::Failed(err),
        Ok(None) => {}
    }
    match socket.peer_addr() {
        Ok(peer) => ConnectStatus::Connected(peer.as_socket()),
        Err(err) if err.kind() == io::ErrorKind::NotConnected || is_pending(&err) => {
            ConnectStatus::Pending
        }
        Err(err) => ConnectStatus::Failed(err),
    }
}

/// 接受一个挂起连接，返回已切换为非阻塞模式前的原始套接字。
pub(crate) fn accept(listener: &Socket) -> io::Result<(Socket, Option<SocketAddr>)> {
    let (socket, addr) = listener.accept()?;
    Ok((socket, addr.as_socket()))
}

pub(crate) fn local_addr(socket: &Socket) -> Option<SocketAddr> {
    socket.local_addr().ok().and_then(|addr| addr.as_socket())
}

fn new_stream_socket() -> Result<Socket, TransportError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|err| map_io_error(error::SOCKET, err))?;
    socket
        .set_nonblocking(true)
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    Ok(socket)
}

fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || is_pending(err)
}

#[cfg(unix)]
fn is_pending(err: &io::Error) -> bool {
    use nix::errno::Errno;
    matches!(
        err.raw_os_error(),
        Some(code) if code == Errno::EINPROGRESS as i32 || code == Errno::EALREADY as i32
    )
}

#[cfg(not(unix))]
fn is_pending(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}
