#![doc = r#"
# spark-transport-pump

## 设计动机（Why）
- **定位**：为单线程主循环（游戏循环、仿真步进、嵌入式宿主）提供一个帧驱动的 TCP 传输，
  宿主每帧调用一次泵，传输层自身不创建线程、不阻塞、不依赖异步运行时；
- **架构角色**：同一时刻只承担一个角色，要么是监听 `0.0.0.0:port` 的服务端，
  要么是连向某个 IPv4 地址的客户端；
- **线协议**：UTF-8 文本消息，每条以单个 `0x00` 字节结束，分帧由 `spark-codec-nul` 完成。

## 核心契约（What）
- **生命周期**：`Inactive → Idle → {ServerListening | ClientConnecting → ClientConnected} → Idle → Inactive`；
  启动类操作只能在 `Idle` 下调用，失败时不残留套接字；
- **出站**：服务端把共享队列中的消息广播给所有连接，另可向单个连接排入私有消息；
  客户端把共享队列发往服务端；没有连接时共享队列保留，等待第一位对端；
- **入站**：完整消息按到达顺序进入入站队列，半条消息跨帧保留；
- **故障隔离**：单条连接的收发错误只移除该连接；客户端失去连接后回到 `Idle`；
- **断开**：`request_disconnect` 在下一次 `end_frame_pump` 生效，先再泵一次以尽量送出已排队消息。

## 实现策略（How）
- 套接字由 `socket2` 创建并置为非阻塞；连接结果以零等待方式轮询 `SO_ERROR` 与对端地址；
- 出站缓冲使用 `BytesMut`，部分发送只推进游标；
- 每帧读取量由 [`TransportConfig`] 限定；出站缓冲超过高水位且连续多帧没有读走任何字节的对端会被断开，
  仍在读取的对端不受突发大小限制；
- 运行期事件通过 `tracing` 记录，错误附带稳定错误码。

## 风险与考量（Trade-offs）
- 仅支持 IPv4，不做 DNS 解析；
- 没有重连、心跳与加密，这些属于宿主或上层协议的职责。
"#]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backpressure;
mod client;
mod config;
mod connection;
mod error;
mod link;
mod server;
mod socket;
mod transport;

pub use config::{
    ConfigError, DEFAULT_LISTEN_BACKLOG, DEFAULT_MAX_OUTBOUND_BUFFER,
    DEFAULT_MAX_RECV_CALLS_PER_FRAME, DEFAULT_RECV_CHUNK_SIZE, DEFAULT_STALL_WARNING_FRAMES,
    TransportConfig,
};
pub use connection::{ConnectionId, InboundMessage, Origin};
pub use error::{ErrorCategory, OperationKind, TransportError};
pub use transport::{FrameTransport, TransportMode};
