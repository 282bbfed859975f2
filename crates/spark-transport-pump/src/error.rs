use std::io;

use spark_codec_nul::FrameError;

use crate::transport::TransportMode;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    /// 稳定错误码。
    pub code: &'static str,
    /// 日志与错误文案中使用的操作名。
    pub message: &'static str,
}

pub(crate) const SOCKET: OperationKind = OperationKind {
    code: "spark.transport.pump.socket_failed",
    message: "tcp socket",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.transport.pump.configure_failed",
    message: "tcp configure",
};
pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.transport.pump.bind_failed",
    message: "tcp bind",
};
pub(crate) const LISTEN: OperationKind = OperationKind {
    code: "spark.transport.pump.listen_failed",
    message: "tcp listen",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.transport.pump.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.transport.pump.connect_failed",
    message: "tcp connect",
};

const INVALID_MODE_CODE: &str = "spark.transport.pump.invalid_mode";
const INVALID_ADDRESS_CODE: &str = "spark.transport.pump.invalid_address";

/// 传输层对调用方可见的错误。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 帧驱动传输只在“进入角色”时向调用方报告失败，其余运行期故障都被吸收为状态变化；
///   本枚举覆盖的正是这些同步可见的失败；
/// - 每个变体都能映射到稳定错误码，便于日志聚合。
///
/// ## 契约 (What)
/// - `InvalidMode`：当前模式不允许该操作，调用没有产生任何副作用；
/// - `InvalidAddress`：客户端目标不是点分十进制 IPv4 地址；
/// - `Io`：某一步套接字操作失败，尝试中的套接字已被关闭；
/// - `Frame`：文本中含有分隔符，消息未入队。
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 当前模式不允许执行 `operation`。
    #[error("{operation} is not allowed while the transport is {mode}")]
    InvalidMode {
        /// 被拒绝的操作名。
        operation: &'static str,
        /// 调用时的模式。
        mode: TransportMode,
    },
    /// 无法解析的 IPv4 地址。
    #[error("`{address}` is not a dotted-decimal IPv4 address")]
    InvalidAddress {
        /// 调用方传入的原始文本。
        address: String,
    },
    /// 套接字操作失败。
    #[error("{}: {source}", .kind.message)]
    Io {
        /// 失败的操作。
        kind: OperationKind,
        /// 操作系统返回的原始错误。
        #[source]
        source: io::Error,
    },
    /// 消息文本无法分帧。
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl TransportError {
    /// 返回错误对应的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::InvalidMode { .. } => INVALID_MODE_CODE,
            TransportError::InvalidAddress { .. } => INVALID_ADDRESS_CODE,
            TransportError::Io { kind, .. } => kind.code,
            TransportError::Frame(err) => err.code(),
        }
    }

    /// 返回错误分类，供调用方决定是否稍后重试。
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransportError::Io { source, .. } => categorize_io_error(source),
            _ => ErrorCategory::NonRetryable,
        }
    }
}

/// 错误的粗粒度分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 暂时性失败，换一帧或稍后重试即可。
    Retryable,
    /// 非暂时性失败。
    NonRetryable,
}

/// 将 IO 错误映射为传输层错误。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> TransportError {
    TransportError::Io {
        kind,
        source: error,
    }
}

/// 非阻塞套接字上“本帧没有进展”的信号，不是错误。
pub(crate) fn is_would_block(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

pub(crate) fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::WouldBlock
        | ErrorKind::Interrupted
        | ErrorKind::TimedOut
        | ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}
