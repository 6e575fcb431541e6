//! 访问单元 (Access Unit) 分割器.
//!
//! 按 ITU-T H.264 §7.4.1.2.4 的 "首个 VCL NALU 检测" 规则把解析后的
//! NALU 序列组装为访问单元. 边界出现在某个主编码切片 (non_idr /
//! part_a / idr) 之前, 当:
//!
//! - 它与前一个主编码切片属于不同图像 (字段比较), 或
//! - 它之前出现过 AUD / SPS / PPS / SEI / 类型 14-18 的 NALU.
//!
//! 分割器持有一个保持缓冲 (至多一个访问单元) 以及上一个主编码
//! 切片的字段表; `flush` 在流结束时发出最后一个访问单元.

use log::debug;

use crate::nalu::{Nalu, NaluStatus};
use crate::scheme::FieldMap;

/// 访问单元: 恰好一幅编码图像及其关联的非 VCL NALU
#[derive(Debug, Clone, Default)]
pub struct AccessUnit {
    /// 按输入顺序排列的 NALU
    pub nalus: Vec<Nalu>,
}

impl AccessUnit {
    /// 是否为关键帧 (含 IDR 切片)
    pub fn key_frame(&self) -> bool {
        self.nalus.iter().any(|n| n.nalu_type.is_idr())
    }

    /// 是否含有解析失败的 NALU (整个访问单元应被丢弃)
    pub fn has_error(&self) -> bool {
        self.nalus.iter().any(|n| n.status == NaluStatus::Error)
    }

    /// 是否含有主编码图像切片
    pub fn has_primary_picture(&self) -> bool {
        self.nalus
            .iter()
            .any(|n| n.nalu_type.is_primary_coded_slice())
    }

    /// 全部 NALU 载荷字节数之和 (不含封装前缀)
    pub fn payload_len(&self) -> usize {
        self.nalus.iter().map(|n| n.payload.len()).sum()
    }

    /// 访问单元携带的显示/解码时间戳 (取首个带时间戳的 NALU)
    pub fn timestamps(&self) -> (Option<i64>, Option<i64>) {
        for nalu in &self.nalus {
            if nalu.pts.is_some() || nalu.dts.is_some() {
                return (nalu.pts, nalu.dts);
            }
        }
        (None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// 正在收集首个主编码切片之前的非 VCL NALU
    First,
    /// 当前访问单元已有主编码切片
    Second,
}

/// 访问单元分割器状态机
pub struct AuSplitter {
    /// 保持缓冲: 当前访问单元 + 可能属于下一单元的尾部非 VCL
    buffer: Vec<Nalu>,
    /// 缓冲中属于下一访问单元的起始下标 (上一个 VCL 之后出现的
    /// 强制开启新单元的非 VCL)
    pending_start: Option<usize>,
    /// 上一个主编码切片的字段表
    last_primary: Option<FieldMap>,
    phase: Phase,
}

impl AuSplitter {
    /// 创建分割器
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            pending_start: None,
            last_primary: None,
            phase: Phase::First,
        }
    }

    /// 送入一个解析后的 NALU, 可能产出一个完整的访问单元
    pub fn push(&mut self, nalu: Nalu) -> Option<AccessUnit> {
        // 解析失败的主编码切片无法参与字段比较, 保守地判定为新图像:
        // 前一个 (完好的) 访问单元正常发出, 损坏的单元由上层丢弃.
        if nalu.status == NaluStatus::Error {
            if !nalu.nalu_type.is_primary_coded_slice() {
                self.buffer.push(nalu);
                return None;
            }
            let finished = match self.phase {
                Phase::First => None,
                Phase::Second => {
                    let split_at = self.pending_start.take().unwrap_or(self.buffer.len());
                    let drained: Vec<Nalu> = self.buffer.drain(..split_at).collect();
                    Some(AccessUnit { nalus: drained })
                }
            };
            self.last_primary = None;
            self.pending_start = None;
            self.buffer.push(nalu);
            self.phase = Phase::Second;
            return finished.filter(|au| !au.nalus.is_empty());
        }

        if !nalu.nalu_type.is_primary_coded_slice() {
            if self.phase == Phase::Second
                && nalu.nalu_type.starts_new_access_unit()
                && self.pending_start.is_none()
            {
                self.pending_start = Some(self.buffer.len());
            }
            self.buffer.push(nalu);
            return None;
        }

        // 主编码切片
        match self.phase {
            Phase::First => {
                self.last_primary = Some(nalu.parsed_fields.clone());
                self.buffer.push(nalu);
                self.phase = Phase::Second;
                self.pending_start = None;
                None
            }
            Phase::Second => {
                let boundary = self.pending_start.is_some()
                    || match &self.last_primary {
                        Some(prev) => new_picture(prev, &nalu.parsed_fields),
                        None => true,
                    };
                if !boundary {
                    // 同一图像的后续切片
                    self.buffer.push(nalu);
                    return None;
                }

                let split_at = self.pending_start.take().unwrap_or(self.buffer.len());
                let finished: Vec<Nalu> = self.buffer.drain(..split_at).collect();
                self.last_primary = Some(nalu.parsed_fields.clone());
                self.buffer.push(nalu);
                Some(AccessUnit { nalus: finished })
            }
        }
    }

    /// 流结束: 发出保持缓冲中的最后一个访问单元
    ///
    /// 不含主编码图像的残余 (如流尾孤立的参数集) 被丢弃.
    pub fn flush(&mut self) -> Option<AccessUnit> {
        let split_at = self.pending_start.take().unwrap_or(self.buffer.len());
        let trailing = self.buffer.len() - split_at;
        if trailing > 0 {
            debug!("H264: 流结束, 丢弃 {} 个不成访问单元的尾部 NALU", trailing);
        }
        let finished: Vec<Nalu> = self.buffer.drain(..split_at).collect();
        self.buffer.clear();
        self.phase = Phase::First;
        self.last_primary = None;

        let au = AccessUnit { nalus: finished };
        if au.nalus.is_empty() {
            None
        } else if !au.has_primary_picture() && !au.has_error() {
            debug!("H264: 流结束, 丢弃不含编码图像的 {} 个 NALU", au.nalus.len());
            None
        } else {
            Some(au)
        }
    }
}

impl Default for AuSplitter {
    fn default() -> Self {
        Self::new()
    }
}

/// 两个主编码切片是否属于不同图像 (ITU-T H.264 §7.4.1.2.4)
fn new_picture(prev: &FieldMap, cur: &FieldMap) -> bool {
    if prev.uint("frame_num") != cur.uint("frame_num") {
        return true;
    }
    if prev.uint("pic_parameter_set_id") != cur.uint("pic_parameter_set_id") {
        return true;
    }
    if prev.uint("field_pic_flag") != cur.uint("field_pic_flag") {
        return true;
    }
    // bottom_field_flag 仅在双方都存在时比较
    if let (Some(prev_bottom), Some(cur_bottom)) =
        (prev.uint("bottom_field_flag"), cur.uint("bottom_field_flag"))
        && prev_bottom != cur_bottom
    {
        return true;
    }
    // nal_ref_idc 恰好一方为 0
    if (prev.uint("nal_ref_idc") == Some(0)) != (cur.uint("nal_ref_idc") == Some(0)) {
        return true;
    }
    // IDR 性质不同; 都是 IDR 时比较 idr_pic_id
    let prev_idr = prev.uint("nal_unit_type") == Some(5);
    let cur_idr = cur.uint("nal_unit_type") == Some(5);
    if prev_idr != cur_idr {
        return true;
    }
    if prev_idr && cur_idr && prev.uint("idr_pic_id") != cur.uint("idr_pic_id") {
        return true;
    }
    // POC 字段
    match cur.uint("pic_order_cnt_type") {
        Some(0) => {
            if prev.uint("pic_order_cnt_lsb") != cur.uint("pic_order_cnt_lsb") {
                return true;
            }
            if prev.int("delta_pic_order_cnt_bottom").unwrap_or(0)
                != cur.int("delta_pic_order_cnt_bottom").unwrap_or(0)
            {
                return true;
            }
        }
        Some(1) => {
            if prev.int("delta_pic_order_cnt_0").unwrap_or(0)
                != cur.int("delta_pic_order_cnt_0").unwrap_or(0)
            {
                return true;
            }
            if prev.int("delta_pic_order_cnt_1").unwrap_or(0)
                != cur.int("delta_pic_order_cnt_1").unwrap_or(0)
            {
                return true;
            }
        }
        _ => {}
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nalu::NaluType;
    use crate::scheme::FieldValue;
    use bytes::Bytes;

    /// 构造测试 NALU; `fields` 为 (字段名, 无符号值) 列表
    fn make_nalu(type_id: u8, fields: &[(&'static str, u32)]) -> Nalu {
        let mut map = FieldMap::new();
        map.insert("nal_unit_type", FieldValue::Uint(u32::from(type_id)));
        map.insert("nal_ref_idc", FieldValue::Uint(1));
        for &(name, value) in fields {
            map.insert(name, FieldValue::Uint(value));
        }
        Nalu {
            parsed_fields: map,
            nalu_type: NaluType::from_type_id(type_id),
            stripped_prefix: Bytes::from_static(&[0x00, 0x00, 0x00, 0x01]),
            payload: Bytes::from_static(&[0xFF, 0xEE]),
            status: NaluStatus::Valid,
            pts: None,
            dts: None,
        }
    }

    fn slice(frame_num: u32) -> Nalu {
        make_nalu(
            1,
            &[
                ("frame_num", frame_num),
                ("pic_parameter_set_id", 0),
                ("pic_order_cnt_type", 0),
                ("pic_order_cnt_lsb", frame_num * 2),
            ],
        )
    }

    fn idr(frame_num: u32, idr_pic_id: u32) -> Nalu {
        make_nalu(
            5,
            &[
                ("frame_num", frame_num),
                ("pic_parameter_set_id", 0),
                ("pic_order_cnt_type", 0),
                ("pic_order_cnt_lsb", 0),
                ("idr_pic_id", idr_pic_id),
            ],
        )
    }

    fn types(au: &AccessUnit) -> Vec<NaluType> {
        au.nalus.iter().map(|n| n.nalu_type).collect()
    }

    #[test]
    fn test_au_split_by_frame_num() {
        let mut splitter = AuSplitter::new();
        assert!(splitter.push(make_nalu(7, &[])).is_none());
        assert!(splitter.push(make_nalu(8, &[])).is_none());
        assert!(splitter.push(idr(0, 0)).is_none());

        // 新图像 (frame_num 改变) 关闭上一个访问单元
        let au = splitter.push(slice(1)).expect("应发出访问单元");
        assert_eq!(
            types(&au),
            vec![NaluType::Sps, NaluType::Pps, NaluType::Idr]
        );
        assert!(au.key_frame());
        assert!(au.has_primary_picture());
        assert_eq!(au.payload_len(), 6, "三个 NALU 各 2 字节载荷");

        let au = splitter.flush().expect("flush 应发出最后一个访问单元");
        assert_eq!(types(&au), vec![NaluType::NonIdr]);
        assert!(!au.key_frame());
    }

    #[test]
    fn test_au_same_picture_multiple_slices() {
        let mut splitter = AuSplitter::new();
        // 同一图像的两个切片 (字段全部一致)
        assert!(splitter.push(slice(0)).is_none());
        assert!(splitter.push(slice(0)).is_none());
        let au = splitter.push(slice(1)).expect("新图像应关闭访问单元");
        assert_eq!(au.nalus.len(), 2, "同图像的切片应在同一访问单元");
    }

    #[test]
    fn test_au_boundary_forced_by_parameter_set() {
        let mut splitter = AuSplitter::new();
        assert!(splitter.push(slice(0)).is_none());
        // SPS 出现在两个 VCL 之间: 即使切片字段相同也强制开启新单元
        assert!(splitter.push(make_nalu(7, &[])).is_none());
        let au = splitter.push(slice(0)).expect("参数集应强制边界");
        assert_eq!(types(&au), vec![NaluType::NonIdr]);

        let au = splitter.flush().unwrap();
        assert_eq!(types(&au), vec![NaluType::Sps, NaluType::NonIdr]);
    }

    #[test]
    fn test_au_boundary_by_idr_pic_id() {
        let mut splitter = AuSplitter::new();
        assert!(splitter.push(idr(0, 0)).is_none());
        let au = splitter.push(idr(0, 1)).expect("idr_pic_id 改变应是边界");
        assert_eq!(au.nalus.len(), 1);
    }

    #[test]
    fn test_au_boundary_by_idr_transition() {
        let mut splitter = AuSplitter::new();
        assert!(splitter.push(idr(0, 0)).is_none());
        // IDR → 非 IDR, frame_num 相同
        let mut non_idr = slice(0);
        non_idr.parsed_fields.insert("pic_order_cnt_lsb", FieldValue::Uint(0));
        let au = splitter.push(non_idr).expect("IDR 性质改变应是边界");
        assert!(au.key_frame());
    }

    #[test]
    fn test_au_boundary_by_ref_idc_zero_transition() {
        let mut splitter = AuSplitter::new();
        let mut a = slice(3);
        a.parsed_fields.insert("nal_ref_idc", FieldValue::Uint(2));
        let mut b = slice(3);
        b.parsed_fields.insert("nal_ref_idc", FieldValue::Uint(0));
        assert!(splitter.push(a).is_none());
        assert!(
            splitter.push(b).is_some(),
            "nal_ref_idc 恰好一方为 0 应是边界"
        );
    }

    #[test]
    fn test_au_boundary_by_poc_lsb() {
        let mut splitter = AuSplitter::new();
        let a = make_nalu(
            1,
            &[
                ("frame_num", 4),
                ("pic_parameter_set_id", 0),
                ("pic_order_cnt_type", 0),
                ("pic_order_cnt_lsb", 8),
            ],
        );
        let b = make_nalu(
            1,
            &[
                ("frame_num", 4),
                ("pic_parameter_set_id", 0),
                ("pic_order_cnt_type", 0),
                ("pic_order_cnt_lsb", 10),
            ],
        );
        assert!(splitter.push(a).is_none());
        assert!(splitter.push(b).is_some(), "pic_order_cnt_lsb 改变应是边界");
    }

    #[test]
    fn test_au_non_forcing_nalu_stays_in_current_unit() {
        let mut splitter = AuSplitter::new();
        assert!(splitter.push(slice(0)).is_none());
        // 填充数据归当前访问单元
        assert!(splitter.push(make_nalu(12, &[])).is_none());
        let au = splitter.push(slice(1)).unwrap();
        assert_eq!(types(&au), vec![NaluType::NonIdr, NaluType::FillerData]);
    }

    #[test]
    fn test_au_flush_discards_orphan_parameter_sets() {
        let mut splitter = AuSplitter::new();
        assert!(splitter.push(make_nalu(7, &[])).is_none());
        assert!(splitter.push(make_nalu(8, &[])).is_none());
        assert!(
            splitter.flush().is_none(),
            "不含编码图像的残余应在流结束时丢弃"
        );
    }

    #[test]
    fn test_au_flush_splits_trailing_pending() {
        let mut splitter = AuSplitter::new();
        assert!(splitter.push(idr(0, 0)).is_none());
        // 尾部 SPS 属于未完成的下一单元, flush 时应被丢弃
        assert!(splitter.push(make_nalu(7, &[])).is_none());
        let au = splitter.flush().expect("应发出含图像的最后一个单元");
        assert_eq!(types(&au), vec![NaluType::Idr]);
    }

    #[test]
    fn test_au_error_slice_isolated_from_neighbors() {
        let mut splitter = AuSplitter::new();
        let mut bad = slice(0);
        bad.status = NaluStatus::Error;

        // 完好的 IDR 单元 | 损坏切片 | 完好的 IDR 单元
        assert!(splitter.push(idr(0, 0)).is_none());
        let first = splitter.push(bad).expect("损坏切片应关闭前一个单元");
        assert!(!first.has_error(), "前一个完好单元不应被污染");
        assert!(first.key_frame());

        let poisoned = splitter.push(idr(0, 1)).expect("后续切片应关闭损坏单元");
        assert!(poisoned.has_error(), "损坏单元应被标记");

        let last = splitter.flush().unwrap();
        assert!(!last.has_error());
        assert!(last.key_frame());
    }

    #[test]
    fn test_au_error_non_vcl_rides_in_current_unit() {
        let mut splitter = AuSplitter::new();
        let mut bad_sps = make_nalu(7, &[]);
        bad_sps.status = NaluStatus::Error;
        assert!(splitter.push(bad_sps).is_none());
        assert!(splitter.push(idr(0, 0)).is_none());
        let au = splitter.flush().unwrap();
        assert!(au.has_error(), "损坏的非 VCL NALU 应污染所在单元");
    }

    #[test]
    fn test_au_timestamps_from_first_carrier() {
        let mut splitter = AuSplitter::new();
        let mut sps = make_nalu(7, &[]);
        sps.pts = Some(1000);
        sps.dts = Some(900);
        assert!(splitter.push(sps).is_none());
        assert!(splitter.push(idr(0, 0)).is_none());
        let au = splitter.flush().unwrap();
        assert_eq!(au.timestamps(), (Some(1000), Some(900)));
    }
}
