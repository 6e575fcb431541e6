//! PPS (Picture Parameter Set) 语法方案.
//!
//! 覆盖 ITU-T H.264 §7.3.2.2 的主体语法 (到 redundant_pic_cnt_present_flag
//! 为止, 封装层不需要 transform_8x8 扩展). 解析结束后以
//! pic_parameter_set_id 为键存入全局 PPS 缓存.

use jie_core::bitreader::BitReader;
use jie_core::{JieError, JieResult};

use crate::expgolomb::read_ue;
use crate::scheme::{Directive, FieldKind, FieldMap, GlobalState, Namespace};

fn slice_groups_present(m: &FieldMap) -> bool {
    matches!(m.uint("num_slice_groups_minus1"), Some(n) if n > 0)
}

/// PPS 语法方案
pub static SCHEME: &[Directive] = &[
    Directive::Field {
        name: "pic_parameter_set_id",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "seq_parameter_set_id",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "entropy_coding_mode_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "bottom_field_pic_order_in_frame_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "num_slice_groups_minus1",
        kind: FieldKind::Ue,
    },
    Directive::If {
        cond: slice_groups_present,
        then: &[Directive::Execute(exec_slice_groups)],
    },
    Directive::Field {
        name: "num_ref_idx_l0_default_active_minus1",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "num_ref_idx_l1_default_active_minus1",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "weighted_pred_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "weighted_bipred_idc",
        kind: FieldKind::U(2),
    },
    Directive::Field {
        name: "pic_init_qp_minus26",
        kind: FieldKind::Se,
    },
    Directive::Field {
        name: "pic_init_qs_minus26",
        kind: FieldKind::Se,
    },
    Directive::Field {
        name: "chroma_qp_index_offset",
        kind: FieldKind::Se,
    },
    Directive::Field {
        name: "deblocking_filter_control_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "constrained_intra_pred_flag",
        kind: FieldKind::Flag,
    },
    Directive::Field {
        name: "redundant_pic_cnt_present_flag",
        kind: FieldKind::Flag,
    },
    Directive::SaveGlobal {
        namespace: Namespace::Pps,
        key: |m| m.require_uint("pic_parameter_set_id"),
    },
];

/// 消费 slice group 语法 (ITU-T H.264 §7.3.2.2, FMO)
///
/// 封装层不使用 slice group 映射, 只需语法正确地推进读指针.
fn exec_slice_groups(
    br: &mut BitReader,
    local: &mut FieldMap,
    _global: &mut GlobalState,
) -> JieResult<()> {
    let num_slice_groups_minus1 = local.require_uint("num_slice_groups_minus1")?;
    if num_slice_groups_minus1 > 7 {
        return Err(JieError::MalformedField(format!(
            "num_slice_groups_minus1 超出范围, value={}",
            num_slice_groups_minus1
        )));
    }

    let slice_group_map_type = read_ue(br)?;
    match slice_group_map_type {
        0 => {
            for _ in 0..=num_slice_groups_minus1 {
                read_ue(br)?; // run_length_minus1
            }
        }
        1 => {}
        2 => {
            for _ in 0..num_slice_groups_minus1 {
                read_ue(br)?; // top_left
                read_ue(br)?; // bottom_right
            }
        }
        3..=5 => {
            br.read_bit()?; // slice_group_change_direction_flag
            read_ue(br)?; // slice_group_change_rate_minus1
        }
        6 => {
            let pic_size_in_map_units_minus1 = read_ue(br)?;
            let group_count = num_slice_groups_minus1 + 1;
            let bits_per_id = bits_for_slice_group_id(group_count);
            for _ in 0..=pic_size_in_map_units_minus1 {
                if bits_per_id > 0 {
                    br.read_bits(bits_per_id)?; // slice_group_id
                }
            }
        }
        _ => {
            return Err(JieError::MalformedField(format!(
                "slice_group_map_type 非法, value={}",
                slice_group_map_type
            )));
        }
    }
    Ok(())
}

fn bits_for_slice_group_id(group_count: u32) -> u32 {
    if group_count <= 1 {
        0
    } else {
        u32::BITS - (group_count - 1).leading_zeros()
    }
}
