//! 各类 NALU 的语法方案定义.
//!
//! 每个方案是一个 `static` 指令序列, 字段名与 ITU-T H.264 的语法
//! 元素名一致. 载荷方案假定 NALU 头部字段已在同一局部字段表中
//! (解析器先执行 [`HEADER`], 再按类型分派载荷方案).

pub mod pps;
pub mod slice;
pub mod sps;

use crate::scheme::{Directive, FieldKind};

/// NALU 头部方案 (1 字节)
///
/// forbidden_zero_bit 为 1 时由解析器判定为头部损坏,
/// 方案本身不中止读取.
pub static HEADER: &[Directive] = &[
    Directive::Field {
        name: "forbidden_zero_bit",
        kind: FieldKind::U(1),
    },
    Directive::Field {
        name: "nal_ref_idc",
        kind: FieldKind::U(2),
    },
    Directive::Field {
        name: "nal_unit_type",
        kind: FieldKind::U(5),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{FieldMap, GlobalState, run_scheme};
    use jie_core::bitreader::BitReader;

    #[test]
    fn test_header_scheme_sps_byte() {
        // 0x67 = forbidden=0, ref_idc=3, type=7 (SPS)
        let data = [0x67];
        let mut br = BitReader::new(&data);
        let mut local = FieldMap::new();
        let mut global = GlobalState::new();
        run_scheme(HEADER, &mut br, &mut local, &mut global).expect("头部方案执行失败");

        assert_eq!(local.uint("forbidden_zero_bit"), Some(0));
        assert_eq!(local.uint("nal_ref_idc"), Some(3));
        assert_eq!(local.uint("nal_unit_type"), Some(7));
    }

    #[test]
    fn test_header_scheme_forbidden_bit_set() {
        // 0xE7: forbidden=1
        let data = [0xE7];
        let mut br = BitReader::new(&data);
        let mut local = FieldMap::new();
        let mut global = GlobalState::new();
        run_scheme(HEADER, &mut br, &mut local, &mut global).expect("头部方案执行失败");
        assert_eq!(local.uint("forbidden_zero_bit"), Some(1), "应读出置位的 forbidden 位");
    }

    #[test]
    fn test_header_scheme_empty_payload() {
        let mut br = BitReader::new(&[]);
        let mut local = FieldMap::new();
        let mut global = GlobalState::new();
        assert!(run_scheme(HEADER, &mut br, &mut local, &mut global).is_err());
    }
}
