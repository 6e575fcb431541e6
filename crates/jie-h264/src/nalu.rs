//! H.264 NAL (Network Abstraction Layer) 单元模型.
//!
//! # NAL 头部 (1 字节)
//! ```text
//! ┌─────────────────────────────────────┐
//! │ forbidden(1) | ref_idc(2) | type(5) │
//! └─────────────────────────────────────┘
//! ```
//!
//! NALU 的 `payload` 统一为 "头部字节 + 原始载荷", 不含任何外层封装
//! (起始码或长度前缀); 输入封装字节保留在 `stripped_prefix` 中,
//! 以便按字节复原输入封装.

use bytes::Bytes;

use crate::scheme::FieldMap;

/// NAL 单元类型 (nal_unit_type, 0-31 全集)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// 未指定 (0, 24-31)
    Unspecified(u8),
    /// 非 IDR 图像切片 (P/B slice)
    NonIdr,
    /// 数据分区 A (DPA)
    PartA,
    /// 数据分区 B (DPB)
    PartB,
    /// 数据分区 C (DPC)
    PartC,
    /// IDR 图像切片 (关键帧)
    Idr,
    /// 增补增强信息 (SEI)
    Sei,
    /// 序列参数集 (SPS)
    Sps,
    /// 图像参数集 (PPS)
    Pps,
    /// 访问单元分隔符 (AUD)
    Aud,
    /// 序列结束
    EndOfSeq,
    /// 流结束
    EndOfStream,
    /// 填充数据
    FillerData,
    /// SPS 扩展
    SpsExtension,
    /// 前缀 NAL 单元
    PrefixNalUnit,
    /// 子集 SPS (SVC/MVC)
    SubsetSps,
    /// 保留 (16-18, 21-23)
    Reserved(u8),
    /// 辅助图像切片 (非分区)
    AuxiliaryNonPart,
    /// 切片扩展 (SVC/MVC)
    Extension,
}

impl NaluType {
    /// 从 NAL 类型编号创建
    pub fn from_type_id(type_id: u8) -> Self {
        match type_id {
            1 => Self::NonIdr,
            2 => Self::PartA,
            3 => Self::PartB,
            4 => Self::PartC,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSeq,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            13 => Self::SpsExtension,
            14 => Self::PrefixNalUnit,
            15 => Self::SubsetSps,
            16..=18 | 21..=23 => Self::Reserved(type_id),
            19 => Self::AuxiliaryNonPart,
            20 => Self::Extension,
            _ => Self::Unspecified(type_id & 0x1F),
        }
    }

    /// 获取类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Unspecified(id) => *id,
            Self::NonIdr => 1,
            Self::PartA => 2,
            Self::PartB => 3,
            Self::PartC => 4,
            Self::Idr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSeq => 10,
            Self::EndOfStream => 11,
            Self::FillerData => 12,
            Self::SpsExtension => 13,
            Self::PrefixNalUnit => 14,
            Self::SubsetSps => 15,
            Self::Reserved(id) => *id,
            Self::AuxiliaryNonPart => 19,
            Self::Extension => 20,
        }
    }

    /// 是否为 VCL (Video Coding Layer) NAL
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            Self::NonIdr | Self::PartA | Self::PartB | Self::PartC | Self::Idr
        )
    }

    /// 是否为主编码图像 NAL (访问单元边界检测的参考对象)
    ///
    /// 数据分区 B/C 只携带残差, 不含切片头, 不参与边界检测.
    pub fn is_primary_coded_slice(&self) -> bool {
        matches!(self, Self::NonIdr | Self::PartA | Self::Idr)
    }

    /// 是否为关键帧 (IDR)
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::Idr)
    }

    /// 出现在两个 VCL NALU 之间时, 是否强制开启新的访问单元
    ///
    /// ITU-T H.264 §7.4.1.2.3: AUD, SPS, PPS, SEI 以及类型 14-18
    /// 只能出现在访问单元的首个 VCL NALU 之前.
    pub fn starts_new_access_unit(&self) -> bool {
        matches!(
            self,
            Self::Sei | Self::Sps | Self::Pps | Self::Aud | Self::PrefixNalUnit | Self::SubsetSps
        ) || matches!(self, Self::Reserved(16..=18))
    }
}

impl std::fmt::Display for NaluType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified(id) => write!(f, "Unspecified({id})"),
            Self::NonIdr => write!(f, "Slice"),
            Self::PartA => write!(f, "SliceDPA"),
            Self::PartB => write!(f, "SliceDPB"),
            Self::PartC => write!(f, "SliceDPC"),
            Self::Idr => write!(f, "IDR"),
            Self::Sei => write!(f, "SEI"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::Aud => write!(f, "AUD"),
            Self::EndOfSeq => write!(f, "EndOfSeq"),
            Self::EndOfStream => write!(f, "EndOfStream"),
            Self::FillerData => write!(f, "Filler"),
            Self::SpsExtension => write!(f, "SPSExt"),
            Self::PrefixNalUnit => write!(f, "PrefixNALU"),
            Self::SubsetSps => write!(f, "SubsetSPS"),
            Self::Reserved(id) => write!(f, "Reserved({id})"),
            Self::AuxiliaryNonPart => write!(f, "AuxSlice"),
            Self::Extension => write!(f, "SliceExt"),
        }
    }
}

/// NALU 解析状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluStatus {
    /// 解析成功
    Valid,
    /// 头部或载荷语法损坏 (所在访问单元将被丢弃)
    Error,
}

/// 解析后的 NAL 单元
#[derive(Debug, Clone)]
pub struct Nalu {
    /// 语法字段表 (头部字段 + 载荷字段)
    pub parsed_fields: FieldMap,
    /// NAL 单元类型
    pub nalu_type: NaluType,
    /// 输入封装中位于载荷之前的字节 (起始码或长度前缀), 原样保留
    pub stripped_prefix: Bytes,
    /// NAL 单元原始数据 (不含封装前缀, 首字节为 NAL 头部)
    pub payload: Bytes,
    /// 解析状态
    pub status: NaluStatus,
    /// 显示时间戳 (纳秒)
    pub pts: Option<i64>,
    /// 解码时间戳 (纳秒)
    pub dts: Option<i64>,
}

impl Nalu {
    /// nal_ref_idc (参考重要性, 0-3); 头部解析失败时为 0
    pub fn ref_idc(&self) -> u32 {
        self.parsed_fields.uint("nal_ref_idc").unwrap_or(0)
    }
}

/// 移除 emulation prevention 字节 (0x00 0x00 0x03 → 0x00 0x00)
///
/// H.264 规范要求在 RBSP 中, 如果出现连续两个 0x00,
/// 后面必须插入 0x03 以防止与起始码混淆.
/// 解析 SPS/PPS/切片头之前需要移除这些 0x03 字节.
pub fn rbsp_unescape(data: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        // 只要命中 `00 00 03` 序列就移除中间 0x03.
        let is_emulation_prevention =
            i + 2 < data.len() && data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x03;
        if is_emulation_prevention {
            rbsp.push(0x00);
            rbsp.push(0x00);
            i += 3; // 跳过 0x03
        } else {
            rbsp.push(data[i]);
            i += 1;
        }
    }

    rbsp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nalu_type_create() {
        assert_eq!(NaluType::from_type_id(7), NaluType::Sps);
        assert_eq!(NaluType::from_type_id(8), NaluType::Pps);
        assert_eq!(NaluType::from_type_id(5), NaluType::Idr);
        assert_eq!(NaluType::from_type_id(1), NaluType::NonIdr);
        assert_eq!(NaluType::from_type_id(9), NaluType::Aud);
        assert_eq!(NaluType::from_type_id(0), NaluType::Unspecified(0));
        assert_eq!(NaluType::from_type_id(16), NaluType::Reserved(16));
        assert_eq!(NaluType::from_type_id(19), NaluType::AuxiliaryNonPart);
        assert_eq!(NaluType::from_type_id(20), NaluType::Extension);
        assert_eq!(NaluType::from_type_id(24), NaluType::Unspecified(24));
    }

    #[test]
    fn test_nalu_type_type_id_roundtrip() {
        for id in 0..=31u8 {
            let nt = NaluType::from_type_id(id);
            assert_eq!(nt.type_id(), id, "type_id 往返失败: id={}", id);
        }
    }

    #[test]
    fn test_nalu_type_property() {
        assert!(NaluType::Idr.is_vcl());
        assert!(NaluType::Idr.is_idr());
        assert!(NaluType::Idr.is_primary_coded_slice());
        assert!(NaluType::NonIdr.is_vcl());
        assert!(!NaluType::NonIdr.is_idr());
        assert!(NaluType::PartA.is_primary_coded_slice());
        assert!(NaluType::PartB.is_vcl());
        assert!(!NaluType::PartB.is_primary_coded_slice());
        assert!(!NaluType::Sps.is_vcl());
        assert!(!NaluType::Pps.is_vcl());
    }

    #[test]
    fn test_nalu_type_starts_new_access_unit() {
        assert!(NaluType::Sps.starts_new_access_unit());
        assert!(NaluType::Pps.starts_new_access_unit());
        assert!(NaluType::Sei.starts_new_access_unit());
        assert!(NaluType::Aud.starts_new_access_unit());
        assert!(NaluType::PrefixNalUnit.starts_new_access_unit());
        assert!(NaluType::Reserved(17).starts_new_access_unit());
        assert!(!NaluType::FillerData.starts_new_access_unit());
        assert!(!NaluType::EndOfSeq.starts_new_access_unit());
        assert!(!NaluType::Reserved(22).starts_new_access_unit());
        assert!(!NaluType::Idr.starts_new_access_unit());
    }

    #[test]
    fn test_emulation_prevention_remove() {
        // 00 00 03 → 00 00
        let data = [0x01, 0x00, 0x00, 0x03, 0x02, 0x03];
        let rbsp = rbsp_unescape(&data);
        assert_eq!(rbsp, vec![0x01, 0x00, 0x00, 0x02, 0x03]);
    }

    #[test]
    fn test_emulation_prevention_consecutive() {
        let data = [0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x01];
        let rbsp = rbsp_unescape(&data);
        assert_eq!(rbsp, vec![0x00, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_emulation_prevention_remove_when_next_gt_03() {
        // `00 00 03` 统一移除, 即使后一个字节 > 0x03.
        let data = [0x11, 0x00, 0x00, 0x03, 0x04, 0x22];
        let rbsp = rbsp_unescape(&data);
        assert_eq!(rbsp, vec![0x11, 0x00, 0x00, 0x04, 0x22]);
    }

    #[test]
    fn test_emulation_prevention_remove_when_next_lte_03() {
        // `00 00 03 03` 中的首个 0x03 为防竞争字节, 需要删除.
        let data = [0x00, 0x00, 0x03, 0x03, 0x80];
        let rbsp = rbsp_unescape(&data);
        assert_eq!(rbsp, vec![0x00, 0x00, 0x03, 0x80]);
    }
}
