//! # Jie (解)
//!
//! 纯 Rust 实现的 H.264 码流解析框架.
//!
//! Jie 把 H.264/AVC 裸流 (Annex B 或 AVC1/AVC3 封装) 重组为带
//! 元数据的访问单元序列, 供下游解码器或封装器使用:
//!
//! - **NALU 分割**: 起始码扫描与长度前缀两种成帧方式, 支持任意切分的输入
//! - **语法解析**: 声明式语法方案驱动的 SPS / PPS / 切片头位级解析
//! - **访问单元组装**: ITU-T H.264 §7.4.1.2.4 的首个 VCL NALU 检测
//! - **封装转换**: Annex B ↔ AVC1/AVC3, 含 DCR 生成与参数集缓存
//! - **时间戳**: 输入透传或恒定帧率合成 (带 B 帧重排 DTS 偏移)
//!
//! # 快速开始
//!
//! ```rust
//! use jie::h264::{H264Parser, InputBuffer, InputFormat, ParserOptions};
//!
//! let mut parser = H264Parser::new(ParserOptions::default()).unwrap();
//! parser.handle_format(InputFormat::ByteStream).unwrap();
//! let events = parser.handle_buffer(InputBuffer {
//!     data: bytes::Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x09, 0xF0]),
//!     pts: None,
//!     dts: None,
//! }).unwrap();
//! assert!(events.is_empty()); // 访问单元尚未完整
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `jie-core` | 错误类型、比特流读写、有理数 |
//! | `jie-h264` | H.264 码流解析 (分割、语法、访问单元、封装) |

/// 核心类型与位流工具
pub use jie_core as core;

/// H.264 码流解析
pub use jie_h264 as h264;

/// 获取 Jie 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
