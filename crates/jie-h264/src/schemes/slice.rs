//! 切片头语法方案 (前缀部分).
//!
//! 只解析到主编码图像边界检测所需的字段为止
//! (ITU-T H.264 §7.4.1.2.4 比较的字段集):
//! frame_num, 场标志, idr_pic_id, POC 相关字段.
//!
//! 方案执行中途通过 `LoadGlobal` 引入被引用的 PPS 及其 SPS,
//! 后续字段的位宽与存在性取决于引入的参数集字段.

use crate::scheme::{Directive, FieldKind, FieldMap, Namespace};

fn separate_colour_planes(m: &FieldMap) -> bool {
    m.flag("separate_colour_plane_flag") == Some(true)
}

fn interlaced(m: &FieldMap) -> bool {
    m.flag("frame_mbs_only_flag") == Some(false)
}

fn field_picture(m: &FieldMap) -> bool {
    m.flag("field_pic_flag") == Some(true)
}

fn is_idr(m: &FieldMap) -> bool {
    m.uint("nal_unit_type") == Some(5)
}

fn poc_type_0(m: &FieldMap) -> bool {
    m.uint("pic_order_cnt_type") == Some(0)
}

/// pic_order_cnt_type == 1 且 delta 字段显式编码
fn poc_type_1_with_deltas(m: &FieldMap) -> bool {
    m.uint("pic_order_cnt_type") == Some(1)
        && m.flag("delta_pic_order_always_zero_flag") == Some(false)
}

/// 帧图像且 PPS 指示 bottom field POC 字段存在
fn bottom_field_order_present(m: &FieldMap) -> bool {
    m.flag("bottom_field_pic_order_in_frame_present_flag") == Some(true) && !field_picture(m)
}

/// 切片头语法方案 (边界检测所需前缀)
pub static SCHEME: &[Directive] = &[
    Directive::Field {
        name: "first_mb_in_slice",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "slice_type",
        kind: FieldKind::Ue,
    },
    Directive::Field {
        name: "pic_parameter_set_id",
        kind: FieldKind::Ue,
    },
    Directive::LoadGlobal {
        namespace: Namespace::Pps,
        key: |m| m.require_uint("pic_parameter_set_id"),
    },
    Directive::LoadGlobal {
        namespace: Namespace::Sps,
        key: |m| m.require_uint("seq_parameter_set_id"),
    },
    Directive::If {
        cond: separate_colour_planes,
        then: &[Directive::Field {
            name: "colour_plane_id",
            kind: FieldKind::U(2),
        }],
    },
    Directive::Field {
        name: "frame_num",
        kind: FieldKind::Uv(|m| Ok(m.require_uint("log2_max_frame_num_minus4")? + 4)),
    },
    Directive::If {
        cond: interlaced,
        then: &[
            Directive::Field {
                name: "field_pic_flag",
                kind: FieldKind::Flag,
            },
            Directive::If {
                cond: field_picture,
                then: &[Directive::Field {
                    name: "bottom_field_flag",
                    kind: FieldKind::Flag,
                }],
            },
        ],
    },
    Directive::If {
        cond: is_idr,
        then: &[Directive::Field {
            name: "idr_pic_id",
            kind: FieldKind::Ue,
        }],
    },
    Directive::If {
        cond: poc_type_0,
        then: &[
            Directive::Field {
                name: "pic_order_cnt_lsb",
                kind: FieldKind::Uv(|m| {
                    Ok(m.require_uint("log2_max_pic_order_cnt_lsb_minus4")? + 4)
                }),
            },
            Directive::If {
                cond: bottom_field_order_present,
                then: &[Directive::Field {
                    name: "delta_pic_order_cnt_bottom",
                    kind: FieldKind::Se,
                }],
            },
        ],
    },
    Directive::If {
        cond: poc_type_1_with_deltas,
        then: &[
            Directive::Field {
                name: "delta_pic_order_cnt_0",
                kind: FieldKind::Se,
            },
            Directive::If {
                cond: bottom_field_order_present,
                then: &[Directive::Field {
                    name: "delta_pic_order_cnt_1",
                    kind: FieldKind::Se,
                }],
            },
        ],
    },
];
