//! NALU 分割器: 把任意切分的字节流重组为完整的 NALU 载荷.
//!
//! # Annex B 格式
//!
//! 使用起始码 (start code) 分隔 NAL 单元:
//! - 3 字节起始码: `00 00 01`
//! - 4 字节起始码: `00 00 00 01`
//!
//! 最后一个起始码之后的字节被扣留在尾部缓冲中: 只有当后续输入出现
//! 下一个起始码 (证明前一个 NALU 已完整), 或调用方通过
//! `assume_aligned`/`flush` 声明对齐时才发出.
//!
//! # AVCC (length-prefixed) 格式
//!
//! 每个 NALU 前有 `nalu_length_size` 字节的大端长度前缀:
//! ```text
//! [length: 1/2/4 bytes BE] [NAL data: length bytes]
//! ```
//! 长度头与载荷都齐全时立即发出.

use bytes::Bytes;
use log::warn;

use jie_core::{JieError, JieResult};

/// 分割出的一个 NALU (尚未解析)
#[derive(Debug, Clone)]
pub struct SplitNalu {
    /// 输入封装中位于载荷之前的字节 (起始码或长度前缀)
    pub prefix: Bytes,
    /// NALU 数据 (首字节为 NAL 头部)
    pub payload: Bytes,
}

#[derive(Clone, Copy)]
enum Framing {
    /// Annex B 起始码扫描
    AnnexB,
    /// 大端长度前缀
    LengthPrefixed {
        /// 长度前缀字节数 (1/2/4)
        nalu_length_size: usize,
    },
}

/// NALU 分割器状态机
///
/// 状态只有未消费的输入尾部; 同一实例在整条流上连续使用.
pub struct NaluSplitter {
    framing: Framing,
    buffer: Vec<u8>,
}

impl NaluSplitter {
    /// 创建 Annex B 分割器
    pub fn annex_b() -> Self {
        Self {
            framing: Framing::AnnexB,
            buffer: Vec::new(),
        }
    }

    /// 创建长度前缀分割器
    pub fn length_prefixed(nalu_length_size: usize) -> JieResult<Self> {
        if !matches!(nalu_length_size, 1 | 2 | 4) {
            return Err(JieError::InvalidArgument(format!(
                "nalu_length_size 非法, value={}",
                nalu_length_size
            )));
        }
        Ok(Self {
            framing: Framing::LengthPrefixed { nalu_length_size },
            buffer: Vec::new(),
        })
    }

    /// 输入一段字节, 返回其中完整的 NALU
    ///
    /// `assume_aligned` 表示本段输入结束于 NALU 边界
    /// (等价于紧接着调用一次 [`flush`](Self::flush)).
    pub fn split(&mut self, data: &[u8], assume_aligned: bool) -> Vec<SplitNalu> {
        self.buffer.extend_from_slice(data);
        let mut nalus = match self.framing {
            Framing::AnnexB => self.split_annex_b(),
            Framing::LengthPrefixed { nalu_length_size } => {
                self.split_length_prefixed(nalu_length_size)
            }
        };
        if assume_aligned && let Some(last) = self.flush() {
            nalus.push(last);
        }
        nalus
    }

    /// 发出尾部缓冲中扣留的最后一个 NALU (流结束或外部已声明对齐)
    pub fn flush(&mut self) -> Option<SplitNalu> {
        match self.framing {
            Framing::AnnexB => {
                let buffer = std::mem::take(&mut self.buffer);
                let codes = scan_start_codes(&buffer);
                let &(offset, len) = codes.first()?;
                let payload = &buffer[offset + len..];
                if payload.is_empty() {
                    return None;
                }
                Some(SplitNalu {
                    prefix: Bytes::copy_from_slice(&buffer[offset..offset + len]),
                    payload: Bytes::copy_from_slice(payload),
                })
            }
            Framing::LengthPrefixed { .. } => {
                if !self.buffer.is_empty() {
                    warn!(
                        "H264: 丢弃 {} 字节不完整的长度前缀 NALU 尾部",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                }
                None
            }
        }
    }

    fn split_annex_b(&mut self) -> Vec<SplitNalu> {
        let codes = scan_start_codes(&self.buffer);
        let Some(&(first_offset, _)) = codes.first() else {
            // 尚无起始码: 全部字节留在缓冲中等待后续输入
            return Vec::new();
        };

        if first_offset > 0 {
            // 首个起始码之前的字节不属于任何 NALU
            warn!("H264: 丢弃首个起始码之前的 {} 字节", first_offset);
        }

        let mut nalus = Vec::new();
        for window in codes.windows(2) {
            let (offset, len) = window[0];
            let (next_offset, _) = window[1];
            let payload = &self.buffer[offset + len..next_offset];
            if payload.is_empty() {
                continue;
            }
            nalus.push(SplitNalu {
                prefix: Bytes::copy_from_slice(&self.buffer[offset..offset + len]),
                payload: Bytes::copy_from_slice(payload),
            });
        }

        // 尾部缓冲从最后一个起始码开始
        let (last_offset, _) = *codes.last().expect("codes 非空");
        self.buffer.drain(..last_offset);
        nalus
    }

    fn split_length_prefixed(&mut self, nalu_length_size: usize) -> Vec<SplitNalu> {
        let mut nalus = Vec::new();
        let mut pos = 0;

        while self.buffer.len() >= pos + nalu_length_size {
            let mut nal_len = 0usize;
            for i in 0..nalu_length_size {
                nal_len = (nal_len << 8) | self.buffer[pos + i] as usize;
            }
            if self.buffer.len() < pos + nalu_length_size + nal_len {
                break;
            }
            if nal_len == 0 {
                warn!("H264: 跳过长度为 0 的 NALU");
                pos += nalu_length_size;
                continue;
            }
            let prefix_end = pos + nalu_length_size;
            nalus.push(SplitNalu {
                prefix: Bytes::copy_from_slice(&self.buffer[pos..prefix_end]),
                payload: Bytes::copy_from_slice(&self.buffer[prefix_end..prefix_end + nal_len]),
            });
            pos = prefix_end + nal_len;
        }

        self.buffer.drain(..pos);
        nalus
    }
}

/// 扫描全部起始码, 返回 (偏移, 长度) 列表
///
/// 同一锚点优先匹配最长形式: `00 00 01` 前紧邻一个 0x00 时
/// 按 4 字节起始码 `00 00 00 01` 处理, 更早的零字节归前一个
/// NALU 的尾部.
fn scan_start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut codes = Vec::new();
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x01 {
            if i > 0 && data[i - 1] == 0x00 {
                codes.push((i - 1, 4));
            } else {
                codes.push((i, 3));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    codes
}
