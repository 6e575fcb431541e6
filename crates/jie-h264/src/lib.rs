//! # jie-h264
//!
//! Jie 框架 H.264/AVC 码流解析库.
//!
//! 把 H.264 裸流 (Annex B 或 AVC1/AVC3 封装) 解析为按访问单元
//! 组织的结构化输出:
//!
//! - NALU 分割与类型识别 (起始码扫描 / 长度前缀)
//! - 声明式语法方案驱动的 SPS / PPS / 切片头解析
//! - 按 ITU-T H.264 §7.4.1.2.4 组装访问单元
//! - Annex B ↔ AVC1/AVC3 封装转换与 DCR 编解码
//! - 参数集缓存、关键帧门限、恒定帧率时间戳生成
//!
//! [`filter::H264Parser`] 是面向宿主的协调层; 各子模块也可单独使用.

pub mod au;
pub mod dcr;
pub mod expgolomb;
pub mod filter;
pub mod format;
pub mod nalu;
pub mod parser;
pub mod scheme;
pub mod schemes;
pub mod splitter;
pub mod timestamps;

// 重导出常用类型
pub use au::{AccessUnit, AuSplitter};
pub use dcr::DecoderConfigRecord;
pub use filter::{
    H264Parser, InputBuffer, NaluMetadata, OutputAlignment, OutputBuffer, ParserEvent,
    ParserOptions,
};
pub use format::{
    Alignment, InputFormat, InputStructure, OutputFormat, Profile, StreamStructure,
};
pub use nalu::{Nalu, NaluStatus, NaluType};
pub use parser::NaluParser;
pub use splitter::{NaluSplitter, SplitNalu};
pub use timestamps::{TimestampGenerationOptions, TimestampGenerator};
