use serde::Deserialize;

/// 单次 `recv` 读取的默认字节数。
pub const DEFAULT_RECV_CHUNK_SIZE: usize = 2048;
/// 每条连接每帧最多调用 `recv` 的默认次数。
pub const DEFAULT_MAX_RECV_CALLS_PER_FRAME: u32 = 10;
/// 监听队列默认长度。
pub const DEFAULT_LISTEN_BACKLOG: i32 = 128;
/// 出站缓冲默认高水位（8 MiB）。
pub const DEFAULT_MAX_OUTBOUND_BUFFER: usize = 8 * 1024 * 1024;
/// 连续多少帧发送停滞后记录一次“对端停滞”日志。
pub const DEFAULT_STALL_WARNING_FRAMES: u32 = 30;

/// 帧驱动传输的运行参数。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把每帧工作量的上限（读取块大小、读取次数）与出站高水位集中成一份显式配置，
///   宿主可以按帧预算调节，而不必改动代码；
/// - 这些参数只约束单帧延迟与内存占用，不影响线协议。
///
/// ## 契约（What）
/// - `recv_chunk_size`：每次 `recv` 的缓冲大小，必须大于 0；
/// - `max_recv_calls_per_frame`：每条连接每帧最多读取次数，必须大于 0；
/// - `listen_backlog`：`listen` 的队列长度，必须大于 0；
/// - `max_outbound_buffer`：未发出字节的上限；超过上限且对端已连续停滞
///   [`TransportConfig::stall_window`] 帧时断开该对端；`0` 表示不设上限；
/// - `stall_warning_frames`：发送连续停滞（受阻且未写出任何字节）达到该帧数时记录日志，
///   `0` 表示不记录，此时停滞一帧即可触发高水位断开。
///
/// ## 逻辑（How）
/// - 支持从 TOML 反序列化，缺省字段取默认值；也可通过 `with_*` 方法链式构造；
/// - [`TransportConfig::validate`] 在进入角色前被调用，拒绝会让泵无法前进的取值。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// 单次 `recv` 的缓冲大小。
    pub recv_chunk_size: usize,
    /// 每条连接每帧最多调用 `recv` 的次数。
    pub max_recv_calls_per_frame: u32,
    /// 监听队列长度。
    pub listen_backlog: i32,
    /// 出站缓冲高水位，只对持续停滞的对端生效；`0` 表示不限制。
    pub max_outbound_buffer: usize,
    /// 发送连续停滞多少帧后记录日志，同时作为高水位断开的判定窗口；`0` 表示关闭日志。
    pub stall_warning_frames: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_chunk_size: DEFAULT_RECV_CHUNK_SIZE,
            max_recv_calls_per_frame: DEFAULT_MAX_RECV_CALLS_PER_FRAME,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            max_outbound_buffer: DEFAULT_MAX_OUTBOUND_BUFFER,
            stall_warning_frames: DEFAULT_STALL_WARNING_FRAMES,
        }
    }
}

impl TransportConfig {
    /// 创建默认配置。
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本解析配置并校验。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// 设置单次读取块大小。
    pub fn with_recv_chunk_size(mut self, size: usize) -> Self {
        self.recv_chunk_size = size;
        self
    }

    /// 设置每帧读取次数上限。
    pub fn with_max_recv_calls_per_frame(mut self, calls: u32) -> Self {
        self.max_recv_calls_per_frame = calls;
        self
    }

    /// 设置监听队列长度。
    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// 设置出站缓冲高水位，`None` 表示不限制。
    pub fn with_max_outbound_buffer(mut self, limit: Option<usize>) -> Self {
        self.max_outbound_buffer = limit.unwrap_or(0);
        self
    }

    /// 设置停滞日志阈值。
    pub fn with_stall_warning_frames(mut self, frames: u32) -> Self {
        self.stall_warning_frames = frames;
        self
    }

    /// 出站高水位；`None` 表示不限制。
    pub fn outbound_limit(&self) -> Option<usize> {
        (self.max_outbound_buffer > 0).then_some(self.max_outbound_buffer)
    }

    /// 判定对端“持续不读取”所需的连续停滞帧数，至少为 1。
    pub fn stall_window(&self) -> u32 {
        self.stall_warning_frames.max(1)
    }

    /// 校验取值范围。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recv_chunk_size == 0 {
            return Err(ConfigError::OutOfRange {
                field: "recv_chunk_size",
                detail: "must be greater than zero",
            });
        }
        if self.max_recv_calls_per_frame == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_recv_calls_per_frame",
                detail: "must be greater than zero",
            });
        }
        if self.listen_backlog <= 0 {
            return Err(ConfigError::OutOfRange {
                field: "listen_backlog",
                detail: "must be positive",
            });
        }
        Ok(())
    }
}

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML 语法或字段类型错误。
    #[error("invalid transport configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// 字段取值越界。
    #[error("transport configuration field `{field}` {detail}")]
    OutOfRange {
        /// 字段名。
        field: &'static str,
        /// 约束说明。
        detail: &'static str,
    },
}
