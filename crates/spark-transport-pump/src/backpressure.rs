use crate::config::TransportConfig;

/// 一次发送尝试之后的背压判定。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PressureVerdict {
    /// 缓冲已清空或仍在高水位以内。
    Healthy,
    /// 发送已连续停滞 `frames` 帧，恰好达到阈值时返回一次。
    Stalled { frames: u32 },
    /// 剩余字节超过高水位且对端持续停滞，应断开该对端。
    Overflow { buffered: usize, limit: usize },
}

/// 管理单条链路写路径的背压统计。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 出站缓冲没有被对端读走时只会继续增长；本结构把“连续无进展的帧数”与
///   “剩余字节数”转化为统一判定，供发送路径决定是记录日志还是断开连接；
/// - 只要对端仍在读取，哪怕单次突发远大于高水位，也不会被断开。
///
/// ## 逻辑 (How)
/// - 一帧发送遇到 `WouldBlock` 且一个字节都没写出，记为一次“停滞”；
///   写出任意字节或缓冲清空都会把计数归零；
/// - 每帧发送结束调用 [`WritePressure::after_send`]：剩余字节超过高水位、
///   且停滞已持续 [`TransportConfig::stall_window`] 帧时判定溢出；否则在计数恰好达到
///   `stall_warning_frames` 时报告一次停滞。
///
/// ## 契约 (What)
/// - **前置条件**：每条链路每帧最多调用一次 `after_send`；
/// - **后置条件**：`Stalled` 只在计数恰好达到阈值的那一帧返回，避免日志刷屏；
///   `Overflow` 只会在对端持续不读取时返回。
#[derive(Debug, Default)]
pub(crate) struct WritePressure {
    stalled_frames: u32,
}

impl WritePressure {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 发送尝试结束后调用。`sent` 为本帧写出的字节数，`blocked` 表示是否遇到 `WouldBlock`。
    pub(crate) fn after_send(
        &mut self,
        buffered: usize,
        sent: usize,
        blocked: bool,
        config: &TransportConfig,
    ) -> PressureVerdict {
        if buffered == 0 || !blocked || sent > 0 {
            self.stalled_frames = 0;
            return PressureVerdict::Healthy;
        }
        self.stalled_frames = self.stalled_frames.saturating_add(1);
        if let Some(limit) = config.outbound_limit()
            && buffered > limit
            && self.stalled_frames >= config.stall_window()
        {
            return PressureVerdict::Overflow { buffered, limit };
        }
        if config.stall_warning_frames > 0 && self.stalled_frames == config.stall_warning_frames {
            PressureVerdict::Stalled {
                frames: self.stalled_frames,
            }
        } else {
            PressureVerdict::Healthy
        }
    }

    #[cfg(test)]
    pub(crate) fn stalled_frames(&self) -> u32 {
        self.stalled_frames
    }
}
