//! 统一错误类型定义.
//!
//! 所有 Jie crate 共用的错误类型, 支持跨模块传播.
//!
//! 码流解析中的错误分为两类:
//! - 可恢复错误 ([`MalformedHeader`](JieError::MalformedHeader),
//!   [`SpsUnavailable`](JieError::SpsUnavailable),
//!   [`MalformedField`](JieError::MalformedField)): 影响范围限于单个
//!   NALU 及其所在的访问单元, 码流继续解析.
//! - 致命错误 (其余变体): 向宿主传播, 整条流终止.

use thiserror::Error;

/// Jie 框架统一错误类型
#[derive(Debug, Error)]
pub enum JieError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// NALU 头部损坏 (forbidden_zero_bit 非 0 或头部截断)
    #[error("NALU 头部损坏: {0}")]
    MalformedHeader(String),

    /// 切片引用了尚未出现的参数集
    #[error("参数集不可用: {0}")]
    SpsUnavailable(String),

    /// 位级字段解析失败
    #[error("字段解析失败: {0}")]
    MalformedField(String),

    /// 配置提供的参数集与 DCR 携带的参数集冲突
    #[error("参数集冲突: {0}")]
    ParameterSetConflict(String),

    /// 流结构在流中途发生不兼容变化 (Annex B ↔ AVC 或 length_size 改变)
    #[error("不支持的流结构变化: {0}")]
    StreamStructureChange(String),

    /// 对会发生帧重排序的 profile 请求了时间戳生成
    #[error("不支持的时间戳生成: {0}")]
    UnsupportedTimestampGeneration(String),

    /// AVCDecoderConfigurationRecord 解析失败
    #[error("DCR 损坏: {0}")]
    MalformedDcr(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl JieError {
    /// 该错误是否限于单个 NALU (其所在访问单元被丢弃, 码流继续)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader(_) | Self::SpsUnavailable(_) | Self::MalformedField(_)
        )
    }
}

/// Jie 框架统一 Result 类型
pub type JieResult<T> = Result<T, JieError>;
