//! SPS (Sequence Parameter Set) 语法方案.
//!
//! 覆盖 ITU-T H.264 §7.3.2.1.1 的完整 SPS 语法, 包括 High Profile
//! 扩展字段、scaling list、VUI (含 timing_info 与 HRD 参数).
//! 解析结束后以 seq_parameter_set_id 为键存入全局 SPS 缓存.

use jie_core::bitreader::BitReader;
use jie_core::{JieError, JieResult};

use crate::expgolomb::{read_se, read_ue};
use crate::scheme::{Directive, FieldKind, FieldMap, FieldValue, GlobalState, Namespace};

/// 带扩展字段的 profile (ITU-T H.264 §7.3.2.1.1 的 High Profile 系列)
fn is_high_profile(m: &FieldMap) -> bool {
    matches!(
        m.uint("profile_idc"),
        Some(100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128)
    )
}

fn chroma_is_444(m: &FieldMap) -> bool {
    m.uint("chroma_format_idc") == Some(3)
}

fn scaling_matrix_present(m: &FieldMap) -> bool {
    m.flag("seq_scaling_matrix_present_flag") == Some(true)
}

fn poc_type_0(m: &FieldMap) -> bool {
    m.uint("pic_order_cnt_type") == Some(0)
}

fn poc_type_1(m: &FieldMap) -> bool {
    m.uint("pic_order_cnt_type") == Some(1)
}

fn interlaced(m: &FieldMap) -> bool {
    m.flag("frame_mbs_only_flag") == Some(false)
}

fn cropping_present(m: &FieldMap) -> bool {
    m.flag("frame_cropping_flag") == Some(true)
}

fn vui_present(m: &FieldMap) -> bool {
    m.flag("vui_parameters_present_flag") == Some(true)
}

/// High Profile 扩展字段
const HIGH_PROFILE_EXT: &[Directive] = &[
    Directive::Field {
        name: "chroma_format_idc",
        kind: FieldKind::Ue,
    },
    Directive::If {
        cond: chroma_is_444,
        then: &[Directive::Field {
            name: "separate_colour_plane_flag",
            kind: FieldKind::Flag,
        }],
    },
    Directive::Field {
        name: "bit_depth_luma_minus8",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "bit_depth_chroma_minus8",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "qpprime_y_zero_transform_bypass_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "seq_scaling_matrix_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: scaling_matrix_present,
        then: &[Directive::Execute(exec_seq_scaling_lists)],
    },
];

/// 非 High Profile 时的缺省推导
const BASELINE_DEFAULTS: &[Directive] = &[
    Directive::Calculate {
        name: "chroma_format_idc",
        calc: |_| Ok(FieldValue::Uint(1)), // 4:2:0
    },
    Directive::Calculate {
        name: "bit_depth_luma_minus8",
        calc: |_| Ok(FieldValue::Uint(0)),
    },
    Directive::Calculate {
        name: "bit_depth_chroma_minus8",
        calc: |_| Ok(FieldValue::Uint(0)),
    },
];

const POC_TYPE_0: &[Directive] = &[Directive::Field {
    name: "log2_max_pic_order_cnt_lsb_minus4",
    kind: FieldKind::Ue,
}];

const POC_TYPE_1: &[Directive] = &[
    Directive::Field {
        name: "delta_pic_order_always_zero_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "offset_for_non_ref_pic",
        kind: FieldKind::Se,
    },
    Directive::Field {
        name: "offset_for_top_to_bottom_field",
        kind: FieldKind::Se,
    },
    Directive::Field {
        name: "num_ref_frames_in_pic_order_cnt_cycle",
        kind: FieldKind::Ue,
    },
    Directive::For {
        counter: "i",
        count: |m| m.require_uint("num_ref_frames_in_pic_order_cnt_cycle"),
        body: &[Directive::Field {
            name: "offset_for_ref_frame",
            kind: FieldKind::Se,
        }],
    },
];

const CROPPING: &[Directive] = &[
    Directive::Field {
        name: "frame_crop_left_offset",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "frame_crop_right_offset",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "frame_crop_top_offset",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "frame_crop_bottom_offset",
        kind: FieldKind::Ue,
    },
];

// ============================================================
// VUI (Annex E)
// ============================================================

const VUI_ASPECT_RATIO: &[Directive] = &[
    Directive::Field {
        name: "aspect_ratio_idc",
        kind: FieldKind::U(8),
    },
    Directive::If {
        cond: |m| m.uint("aspect_ratio_idc") == Some(255), // Extended_SAR
        then: &[
            Directive::Field {
                name: "sar_width",
                kind: FieldKind::U(16),
            },
            Directive::Field {
                name: "sar_height",
                kind: FieldKind::U(16),
            },
        ],
    },
];

const VUI_VIDEO_SIGNAL: &[Directive] = &[
    Directive::Field {
        name: "video_format",
        kind: FieldKind::U(3),
    },
    Directive::Field {
        name: "video_full_range_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "colour_description_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: |m| m.flag("colour_description_present_flag") == Some(true),
        then: &[
            Directive::Field {
                name: "colour_primaries",
                kind: FieldKind::U(8),
            },
            Directive::Field {
                name: "transfer_characteristics",
                kind: FieldKind::U(8),
            },
            Directive::Field {
                name: "matrix_coefficients",
                kind: FieldKind::U(8),
            },
        ],
    },
];

const VUI_TIMING: &[Directive] = &[
    Directive::Field {
        name: "num_units_in_tick",
        kind: FieldKind::U(32),
    },
    Directive::Field {
        name: "time_scale",
        kind: FieldKind::U(32),
    },
    Directive::Field {
        name: "fixed_frame_rate_flag",
        kind: FieldKind::Flag,
    },
];

const VUI_BITSTREAM_RESTRICTION: &[Directive] = &[
    Directive::Field {
        name: "motion_vectors_over_pic_boundaries_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "max_bytes_per_pic_denom",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "max_bits_per_mb_denom",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "log2_max_mv_length_horizontal",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "log2_max_mv_length_vertical",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "max_num_reorder_frames",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "max_dec_frame_buffering",
        kind: FieldKind::Ue,
    },
];

const VUI: &[Directive] = &[
    Directive::Field {
        name: "aspect_ratio_info_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: |m| m.flag("aspect_ratio_info_present_flag") == Some(true),
        then: VUI_ASPECT_RATIO,
    },
    Directive::Field {
        name: "overscan_info_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: |m| m.flag("overscan_info_present_flag") == Some(true),
        then: &[Directive::Field {
            name: "overscan_appropriate_flag",
            kind: FieldKind::Flag,
        }],
    },
    Directive::Field {
        name: "video_signal_type_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: |m| m.flag("video_signal_type_present_flag") == Some(true),
        then: VUI_VIDEO_SIGNAL,
    },
    Directive::Field {
        name: "chroma_loc_info_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: |m| m.flag("chroma_loc_info_present_flag") == Some(true),
        then: &[
            Directive::Field {
                name: "chroma_sample_loc_type_top_field",
                kind: FieldKind::Ue,
            },
            Directive::Field {
                name: "chroma_sample_loc_type_bottom_field",
                kind: FieldKind::Ue,
            },
        ],
    },
    Directive::Field {
        name: "timing_info_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: |m| m.flag("timing_info_present_flag") == Some(true),
        then: VUI_TIMING,
    },
    Directive::Field {
        name: "nal_hrd_parameters_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: |m| m.flag("nal_hrd_parameters_present_flag") == Some(true),
        then: &[Directive::Execute(exec_hrd_parameters)],
    },
    Directive::Field {
        name: "vcl_hrd_parameters_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: |m| m.flag("vcl_hrd_parameters_present_flag") == Some(true),
        then: &[Directive::Execute(exec_hrd_parameters)],
    },
    Directive::If {
        cond: |m| {
            m.flag("nal_hrd_parameters_present_flag") == Some(true)
                || m.flag("vcl_hrd_parameters_present_flag") == Some(true)
        },
        then: &[Directive::Field {
            name: "low_delay_hrd_flag",
            kind: FieldKind::Flag,
        }],
    },
    Directive::Field {
        name: "pic_struct_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "bitstream_restriction_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: |m| m.flag("bitstream_restriction_flag") == Some(true),
        then: VUI_BITSTREAM_RESTRICTION,
    },
];

/// SPS 语法方案
pub static SCHEME: &[Directive] = &[
    Directive::Field {
        name: "profile_idc",
        kind: FieldKind::U(8),
    },
    Directive::Field {
        name: "constraint_set0_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "constraint_set1_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "constraint_set2_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "constraint_set3_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "constraint_set4_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "constraint_set5_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "reserved_zero_2bits",
        kind: FieldKind::U(2),
    },
    Directive::Field {
        name: "level_idc",
        kind: FieldKind::U(8),
    },
    Directive::Field {
        name: "seq_parameter_set_id",
        kind: FieldKind::Ue,
    },
    Directive::IfElse {
        cond: is_high_profile,
        then: HIGH_PROFILE_EXT,
        otherwise: BASELINE_DEFAULTS,
    },
    Directive::Field {
        name: "log2_max_frame_num_minus4",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "pic_order_cnt_type",
        kind: FieldKind::Ue,
    },
    Directive::If {
        cond: poc_type_0,
        then: POC_TYPE_0,
    },
    Directive::If {
        cond: poc_type_1,
        then: POC_TYPE_1,
    },
    Directive::Field {
        name: "max_num_ref_frames",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "gaps_in_frame_num_value_allowed_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "pic_width_in_mbs_minus1",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "pic_height_in_map_units_minus1",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "frame_mbs_only_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: interlaced,
        then: &[Directive::Field {
            name: "mb_adaptive_frame_field_flag",
            kind: FieldKind::Flag,
        }],
    },
    Directive::Field {
        name: "direct_8x8_inference_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "frame_cropping_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: cropping_present,
        then: CROPPING,
    },
    Directive::Field {
        name: "vui_parameters_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::If {
        cond: vui_present,
        then: VUI,
    },
    Directive::SaveGlobal {
        namespace: Namespace::Sps,
        key: |m| m.require_uint("seq_parameter_set_id"),
    },
];

// ============================================================
// 自定义处理器
// ============================================================

/// 消费 seq_scaling_list 语法 (ITU-T H.264 §7.3.2.1.1.1)
///
/// 量化矩阵不影响封装层, 只需语法正确地跳过;
/// 回退规则 (delta_scale 链) 仍按规范推进读指针.
fn exec_seq_scaling_lists(
    br: &mut BitReader,
    local: &mut FieldMap,
    _global: &mut GlobalState,
) -> JieResult<()> {
    let chroma_format_idc = local.require_uint("chroma_format_idc")?;
    let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
    for list_idx in 0..list_count {
        let present = br.read_bit()?;
        if present == 1 {
            let size = if list_idx < 6 { 16 } else { 64 };
            skip_scaling_list(br, size)?;
        }
    }
    Ok(())
}

/// 跳过单个 scaling list
fn skip_scaling_list(br: &mut BitReader, size: usize) -> JieResult<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = read_se(br)?;
            next_scale = (last_scale + delta_scale).rem_euclid(256);
        }
        last_scale = if next_scale == 0 {
            last_scale
        } else {
            next_scale
        };
    }
    Ok(())
}

/// 消费 hrd_parameters 语法 (ITU-T H.264 Annex E.1.2)
///
/// NAL HRD 与 VCL HRD 共用同一读取过程; 字段不保留.
fn exec_hrd_parameters(
    br: &mut BitReader,
    _local: &mut FieldMap,
    _global: &mut GlobalState,
) -> JieResult<()> {
    let cpb_cnt_minus1 = read_ue(br)?;
    if cpb_cnt_minus1 > 31 {
        return Err(JieError::MalformedField(format!(
            "cpb_cnt_minus1 超出范围, value={}",
            cpb_cnt_minus1
        )));
    }
    br.read_bits(4)?; // bit_rate_scale
    br.read_bits(4)?; // cpb_size_scale
    for _ in 0..=cpb_cnt_minus1 {
        read_ue(br)?; // bit_rate_value_minus1
        read_ue(br)?; // cpb_size_value_minus1
        br.read_bit()?; // cbr_flag
    }
    br.read_bits(5)?; // initial_cpb_removal_delay_length_minus1
    br.read_bits(5)?; // cpb_removal_delay_length_minus1
    br.read_bits(5)?; // dpb_output_delay_length_minus1
    br.read_bits(5)?; // time_offset_length
    Ok(())
}
