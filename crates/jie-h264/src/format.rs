//! 流结构、流格式与 SPS 推导.
//!
//! - [`StreamStructure`]: NALU 的字节级封装方式 (Annex B / AVC1 / AVC3)
//! - [`InputFormat`] / [`OutputFormat`]: 与宿主交换的流格式描述
//! - [`Profile`]: profile_idc + constraint_set 标志的识别表
//! - SPS 字段表 → 像素尺寸 / 帧率 的推导

use bytes::Bytes;

use jie_core::{JieError, JieResult, Rational};

use crate::scheme::FieldMap;

/// NALU 字节级封装方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStructure {
    /// Annex B 起始码封装
    AnnexB,
    /// AVC1: 长度前缀封装, 参数集仅在 DCR 中 (带内不携带)
    Avc1 {
        /// 长度前缀字节数 (1/2/4)
        nalu_length_size: usize,
    },
    /// AVC3: 长度前缀封装, 参数集允许带内携带
    Avc3 {
        /// 长度前缀字节数 (1/2/4)
        nalu_length_size: usize,
    },
}

impl StreamStructure {
    /// 是否为长度前缀封装 (AVC1/AVC3)
    pub fn is_avc(&self) -> bool {
        !matches!(self, Self::AnnexB)
    }

    /// 长度前缀字节数; Annex B 返回 None
    pub fn nalu_length_size(&self) -> Option<usize> {
        match self {
            Self::AnnexB => None,
            Self::Avc1 { nalu_length_size } | Self::Avc3 { nalu_length_size } => {
                Some(*nalu_length_size)
            }
        }
    }

    /// 流中途是否允许从 `self` 切换到 `other`
    ///
    /// Annex B ↔ AVC 的切换以及 length_size 的改变都被拒绝.
    pub fn can_change_to(&self, other: &StreamStructure) -> bool {
        self == other
    }
}

impl std::fmt::Display for StreamStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AnnexB => write!(f, "annexb"),
            Self::Avc1 { nalu_length_size } => write!(f, "avc1(len={nalu_length_size})"),
            Self::Avc3 { nalu_length_size } => write!(f, "avc3(len={nalu_length_size})"),
        }
    }
}

/// 缓冲对齐方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// 每个缓冲是一个访问单元
    Au,
    /// 每个缓冲是一个 NALU
    Nalu,
}

/// 输入流的字节级封装声明
///
/// AVC1/AVC3 输入必须随格式携带 DCR, 长度前缀字节数以 DCR 为准.
#[derive(Debug, Clone)]
pub enum InputStructure {
    /// Annex B 起始码封装
    AnnexB,
    /// AVC1 + 带外参数集
    Avc1 {
        /// AVCDecoderConfigurationRecord 原始字节
        dcr: Bytes,
    },
    /// AVC3 + 带外参数集
    Avc3 {
        /// AVCDecoderConfigurationRecord 原始字节
        dcr: Bytes,
    },
}

/// 宿主提供的输入流格式
#[derive(Debug, Clone)]
pub enum InputFormat {
    /// 任意切分的字节流, 按 Annex B 解释
    ByteStream,
    /// 已按 NALU 或访问单元对齐的 H.264 流
    H264 {
        /// 输入缓冲的对齐方式
        alignment: Alignment,
        /// 字节级封装
        structure: InputStructure,
    },
}

/// 发往宿主的输出流格式
#[derive(Debug, Clone)]
pub struct OutputFormat {
    /// 输出缓冲的对齐方式
    pub alignment: Alignment,
    /// 像素宽度 (由 SPS 推导)
    pub width: u32,
    /// 像素高度 (由 SPS 推导)
    pub height: u32,
    /// 识别出的 profile
    pub profile: Option<Profile>,
    /// 帧率 (配置优先, 否则取 SPS VUI timing_info)
    pub framerate: Option<Rational>,
    /// 输出字节级封装
    pub structure: StreamStructure,
    /// AVC1/AVC3 输出时生成的 DCR
    pub dcr: Option<Bytes>,
    /// 输出缓冲始终携带逐 NALU 元数据
    pub nalu_in_metadata: bool,
}

/// H.264 profile (ITU-T H.264 Annex A)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Baseline (66)
    Baseline,
    /// Constrained Baseline (66 + constraint_set1)
    ConstrainedBaseline,
    /// Main (77)
    Main,
    /// Extended (88)
    Extended,
    /// High (100)
    High,
    /// Progressive High (100 + constraint_set4)
    ProgressiveHigh,
    /// Constrained High (100 + constraint_set4 + constraint_set5)
    ConstrainedHigh,
    /// High 10 (110)
    High10,
    /// High 10 Intra (110 + constraint_set3)
    High10Intra,
    /// High 4:2:2 (122)
    High422,
    /// High 4:2:2 Intra (122 + constraint_set3)
    High422Intra,
    /// High 4:4:4 Predictive (244)
    High444Predictive,
    /// High 4:4:4 Intra (244 + constraint_set3)
    High444Intra,
    /// CAVLC 4:4:4 Intra (44)
    HighCavlc444Intra,
}

/// 识别表条目: (profile_idc, 必须置位的 constraint_set 下标, profile)
///
/// 自上而下首个匹配生效, 更特化的条目在前.
const PROFILE_TABLE: &[(u32, &[u32], Profile)] = &[
    (44, &[], Profile::HighCavlc444Intra),
    (66, &[1], Profile::ConstrainedBaseline),
    (66, &[], Profile::Baseline),
    (77, &[], Profile::Main),
    (88, &[], Profile::Extended),
    (100, &[4, 5], Profile::ConstrainedHigh),
    (100, &[4], Profile::ProgressiveHigh),
    (100, &[], Profile::High),
    (110, &[3], Profile::High10Intra),
    (110, &[], Profile::High10),
    (122, &[3], Profile::High422Intra),
    (122, &[], Profile::High422),
    (244, &[3], Profile::High444Intra),
    (244, &[], Profile::High444Predictive),
];

impl Profile {
    /// 按 (profile_idc, constraint_set 标志) 识别 profile
    pub fn recognize(sps: &FieldMap) -> Option<Profile> {
        let profile_idc = sps.uint("profile_idc")?;
        let flag = |idx: u32| {
            let name = match idx {
                0 => "constraint_set0_flag",
                1 => "constraint_set1_flag",
                2 => "constraint_set2_flag",
                3 => "constraint_set3_flag",
                4 => "constraint_set4_flag",
                _ => "constraint_set5_flag",
            };
            sps.flag(name) == Some(true)
        };

        PROFILE_TABLE
            .iter()
            .find(|(idc, required, _)| {
                *idc == profile_idc && required.iter().all(|&idx| flag(idx))
            })
            .map(|(_, _, profile)| *profile)
    }

    /// 是否不会发生帧重排序 (PTS=DTS 可以安全成立)
    pub fn is_reorder_free(&self) -> bool {
        matches!(self, Profile::Baseline | Profile::ConstrainedBaseline)
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Profile::Baseline => "baseline",
            Profile::ConstrainedBaseline => "constrained_baseline",
            Profile::Main => "main",
            Profile::Extended => "extended",
            Profile::High => "high",
            Profile::ProgressiveHigh => "progressive_high",
            Profile::ConstrainedHigh => "constrained_high",
            Profile::High10 => "high_10",
            Profile::High10Intra => "high_10_intra",
            Profile::High422 => "high_4_2_2",
            Profile::High422Intra => "high_4_2_2_intra",
            Profile::High444Predictive => "high_4_4_4_predictive",
            Profile::High444Intra => "high_4_4_4_intra",
            Profile::HighCavlc444Intra => "high_cavlc_4_4_4_intra",
        };
        f.write_str(name)
    }
}

/// 从 SPS 字段表推导像素尺寸 (已应用 cropping)
pub fn resolution_from_sps(sps: &FieldMap) -> JieResult<(u32, u32)> {
    let width_in_mbs = sps.require_uint("pic_width_in_mbs_minus1")? + 1;
    let height_in_map_units = sps.require_uint("pic_height_in_map_units_minus1")? + 1;
    let frame_mbs_only = sps.flag("frame_mbs_only_flag").unwrap_or(true);
    let chroma_format_idc = sps.uint("chroma_format_idc").unwrap_or(1);
    let separate_colour_planes = sps.flag("separate_colour_plane_flag") == Some(true);

    let field_mult = if frame_mbs_only { 1 } else { 2 };
    let height_in_mbs = height_in_map_units
        .checked_mul(field_mult)
        .ok_or_else(|| JieError::InvalidData("H264: 计算高度时发生溢出".into()))?;

    // 色度子采样 (sub_width_c, sub_height_c)
    let (sub_width_c, sub_height_c) = match chroma_format_idc {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1), // 0 (单色) 与 3 (4:4:4)
    };

    // 裁剪单位
    let chroma_array_type = if separate_colour_planes {
        0
    } else {
        chroma_format_idc
    };
    let (crop_unit_x, crop_unit_y) = if chroma_array_type == 0 {
        (1, field_mult)
    } else {
        (sub_width_c, sub_height_c * field_mult)
    };

    let crop_left = sps.uint("frame_crop_left_offset").unwrap_or(0);
    let crop_right = sps.uint("frame_crop_right_offset").unwrap_or(0);
    let crop_top = sps.uint("frame_crop_top_offset").unwrap_or(0);
    let crop_bottom = sps.uint("frame_crop_bottom_offset").unwrap_or(0);

    let raw_width = width_in_mbs
        .checked_mul(16)
        .ok_or_else(|| JieError::InvalidData("H264: 计算宽度时发生溢出".into()))?;
    let raw_height = height_in_mbs
        .checked_mul(16)
        .ok_or_else(|| JieError::InvalidData("H264: 计算高度时发生溢出".into()))?;
    let crop_x = crop_left
        .checked_add(crop_right)
        .and_then(|v| v.checked_mul(crop_unit_x))
        .ok_or_else(|| JieError::InvalidData("H264: 计算水平裁剪时发生溢出".into()))?;
    let crop_y = crop_top
        .checked_add(crop_bottom)
        .and_then(|v| v.checked_mul(crop_unit_y))
        .ok_or_else(|| JieError::InvalidData("H264: 计算垂直裁剪时发生溢出".into()))?;

    if crop_x >= raw_width || crop_y >= raw_height {
        return Err(JieError::InvalidData(format!(
            "H264: 裁剪参数非法, raw={}x{}, crop_x={}, crop_y={}",
            raw_width, raw_height, crop_x, crop_y
        )));
    }

    Ok((raw_width - crop_x, raw_height - crop_y))
}

/// 从 SPS VUI timing_info 推导帧率
///
/// H.264 定义: fps = time_scale / (2 * num_units_in_tick).
/// 无 timing_info 或字段非法时返回 None.
pub fn framerate_from_sps(sps: &FieldMap) -> Option<Rational> {
    if sps.flag("timing_info_present_flag") != Some(true) {
        return None;
    }
    let num_units = sps.uint("num_units_in_tick")?;
    let time_scale = sps.uint("time_scale")?;
    if num_units == 0 || time_scale == 0 {
        return None;
    }
    let doubled = num_units.checked_mul(2)?;
    let num = i32::try_from(time_scale).ok()?;
    let den = i32::try_from(doubled).ok()?;
    Some(Rational::new(num, den).reduce())
}
