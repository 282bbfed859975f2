use alloc::borrow::ToOwned;
use alloc::string::String;

use bytes::{BufMut, Bytes, BytesMut};

use crate::FrameError;

/// 消息分隔符。
pub const DELIMITER: u8 = 0;

/// NUL 分帧器：累积入站字节，并切出所有已经完整到达的消息。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - TCP 只保证字节序，不保证消息边界；每次 `recv` 可能拿到半条消息、
///   多条消息，甚至只有一个分隔符，分帧器负责把这些分片重新拼成消息；
/// - 无论字节以何种方式切片送入，输出的消息序列都与一次性送入完全一致。
///
/// ## 逻辑 (How)
/// - `buffer` 只保存尚未被切出的字节，首字节总是某条消息的起点；
/// - `scanned` 记录上次已确认不含分隔符的前缀长度，新字节到达后从该偏移继续查找，
///   缓慢增长的长消息不会被重复扫描；
/// - 找到分隔符后通过 `split_to` 以 O(1) 切出一帧并去掉末尾的分隔符。
///
/// ## 契约 (What)
/// - **后置条件**：任意时刻 `pending()` 中不含分隔符，即最多只残留一条未完成的消息；
/// - 空消息（连续两个分隔符）会被如实切出为空串。
#[derive(Debug, Default)]
pub struct NulFramer {
    buffer: BytesMut,
    scanned: usize,
}

impl NulFramer {
    /// 创建空分帧器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建预留 `capacity` 字节的分帧器。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            scanned: 0,
        }
    }

    /// 追加一段新到达的字节。
    pub fn extend_from_slice(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// 切出下一条完整消息的原始字节（不含分隔符）。
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let found = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == DELIMITER);
        match found {
            Some(pos) => {
                let end = self.scanned + pos;
                let mut frame = self.buffer.split_to(end + 1);
                frame.truncate(end);
                self.scanned = 0;
                Some(frame.freeze())
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// 切出下一条完整消息并解码为文本。
    pub fn next_message(&mut self) -> Option<String> {
        self.next_frame().map(|frame| decode_text(&frame))
    }

    /// 以迭代器形式取出所有已完整到达的消息。
    pub fn messages(&mut self) -> Messages<'_> {
        Messages { framer: self }
    }

    /// 把所有完整消息依次交给 `sink`，返回切出的条数。
    pub fn drain_messages<F>(&mut self, mut sink: F) -> usize
    where
        F: FnMut(String),
    {
        let mut count = 0;
        for message in self.messages() {
            sink(message);
            count += 1;
        }
        count
    }

    /// 尚未结束的残留字节。
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// 残留字节数。
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// 是否没有任何残留字节。
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// 丢弃全部残留字节。
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

/// [`NulFramer::messages`] 返回的迭代器。
#[derive(Debug)]
pub struct Messages<'a> {
    framer: &'a mut NulFramer,
}

impl Iterator for Messages<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_message()
    }
}

/// 校验文本可以作为单条消息发送。
pub fn validate_payload(text: &str) -> Result<(), FrameError> {
    match text.bytes().position(|byte| byte == DELIMITER) {
        Some(offset) => Err(FrameError::EmbeddedDelimiter { offset }),
        None => Ok(()),
    }
}

/// 编码后占用的字节数（文本 + 分隔符）。
pub fn encoded_len(text: &str) -> usize {
    text.len() + 1
}

/// 将文本与分隔符追加到 `dst`。
///
/// - **前置条件**：`text` 不含 NUL，否则返回错误且 `dst` 保持不变；
/// - **后置条件**：`dst` 末尾恰好是一条完整消息，消息边界不被破坏。
pub fn encode_into(text: &str, dst: &mut BytesMut) -> Result<(), FrameError> {
    validate_payload(text)?;
    dst.reserve(encoded_len(text));
    dst.extend_from_slice(text.as_bytes());
    dst.put_u8(DELIMITER);
    Ok(())
}

fn decode_text(frame: &[u8]) -> String {
    match core::str::from_utf8(frame) {
        Ok(text) => text.to_owned(),
        Err(_) => String::from_utf8_lossy(frame).into_owned(),
    }
}
