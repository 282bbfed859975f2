#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! `spark-codec-nul` 提供以单个 NUL 字节（`0x00`）结尾的文本分帧。
//!
//! # 教案背景（Why）
//! - 帧驱动传输（`spark-transport-pump`）需要一个与套接字无关的纯逻辑分帧器，
//!   以便在任意分片到达的字节流中还原出完整消息，且可以脱离网络独立测试；
//! - 协议只有一条约定：每条消息是 UTF-8 文本，后面紧跟一个 NUL 字节，
//!   没有长度前缀、没有报头，也没有版本协商。
//!
//! # 使用概览（How）
//! - 入站：把每次 `recv` 得到的字节交给 [`NulFramer::extend_from_slice`]，
//!   随后通过 [`NulFramer::messages`] 取出全部已完整到达的消息；
//! - 出站：调用 [`encode_into`] 把文本与分隔符追加进发送缓冲。
//!
//! # 合约说明（What）
//! - 分隔符本身永远不属于消息内容，文本中出现 NUL 会被 [`FrameError::EmbeddedDelimiter`] 拒绝；
//! - 分帧器不设最大消息长度，未结束的消息只会让缓冲继续增长；
//! - 非法 UTF-8 字节按替换字符（U+FFFD）解码，不会中断后续分帧。
//!
//! # 风险提示与后续（Trade-offs）
//! - 协议不含转义策略，二进制负载不在支持范围内；
//! - 缓冲基于 `BytesMut` 的读游标实现，已消费的前缀在后续 `reserve` 时统一回收，
//!   避免每帧一次的整体前移拷贝。

extern crate alloc;

mod framer;

pub use crate::framer::{DELIMITER, Messages, NulFramer, encode_into, encoded_len, validate_payload};

/// 稳定错误码，供日志与指标聚合使用。
pub mod codes {
    /// 文本负载中包含分隔符。
    pub const EMBEDDED_DELIMITER: &str = "spark.codec.nul.embedded_delimiter";
}

/// 分帧编码阶段的错误。
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    /// 文本在 `offset` 处包含 NUL 字节，无法作为单条消息发送。
    #[error("payload contains the NUL delimiter at byte offset {offset}")]
    EmbeddedDelimiter {
        /// 首个 NUL 字节的偏移。
        offset: usize,
    },
}

impl FrameError {
    /// 返回错误对应的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            FrameError::EmbeddedDelimiter { .. } => codes::EMBEDDED_DELIMITER,
        }
    }
}
