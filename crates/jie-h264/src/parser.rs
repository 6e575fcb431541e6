//! NALU 解析器: 头部解析 → 按类型分派载荷方案 → 错误 NALU 合成.
//!
//! 载荷语法错误不会向上传播: 解析器合成 `status = Error` 的 NALU,
//! 由上层决定丢弃哪个访问单元. 全局解析状态 (参数集缓存) 只在
//! 方案成功执行后更新, 错误的 NALU 不会污染它.

use bytes::Bytes;
use log::{debug, warn};

use jie_core::bitreader::BitReader;
use jie_core::{JieError, JieResult};

use crate::format::StreamStructure;
use crate::nalu::{Nalu, NaluStatus, NaluType, rbsp_unescape};
use crate::scheme::{Directive, FieldMap, GlobalState, run_scheme};
use crate::schemes;
use crate::splitter::SplitNalu;

/// NALU 解析器
///
/// 持有跨 NALU 的全局解析状态 (SPS/PPS 字段表缓存).
pub struct NaluParser {
    global: GlobalState,
}

impl NaluParser {
    /// 创建解析器
    pub fn new() -> Self {
        Self {
            global: GlobalState::new(),
        }
    }

    /// 访问全局解析状态
    pub fn state(&self) -> &GlobalState {
        &self.global
    }

    /// 解析一个分割出的 NALU
    ///
    /// 头部或载荷语法失败时返回 `status = Error` 的 NALU,
    /// 不影响后续解析.
    pub fn parse(&mut self, split: SplitNalu, pts: Option<i64>, dts: Option<i64>) -> Nalu {
        let SplitNalu { prefix, payload } = split;
        debug_assert!(!payload.is_empty(), "分割器不应发出空载荷");

        let mut fields = FieldMap::new();
        let mut status = NaluStatus::Valid;

        // 头部 (1 字节)
        if let Err(e) = self.run(schemes::HEADER, &payload[..1.min(payload.len())], &mut fields) {
            let err = JieError::MalformedHeader(e.to_string());
            warn!("H264: {}", err);
            return Nalu {
                parsed_fields: fields,
                nalu_type: NaluType::Unspecified(0),
                stripped_prefix: prefix,
                payload,
                status: NaluStatus::Error,
                pts,
                dts,
            };
        }

        let nalu_type = NaluType::from_type_id(fields.uint("nal_unit_type").unwrap_or(0) as u8);

        // forbidden_zero_bit 置位只标记损坏, 不中止类型识别
        if fields.uint("forbidden_zero_bit") != Some(0) {
            let err = JieError::MalformedHeader("forbidden_zero_bit 非 0".into());
            warn!("H264: {}", err);
            status = NaluStatus::Error;
        }

        // 载荷 (仅携带语法的类型)
        if status == NaluStatus::Valid
            && let Some(scheme) = body_scheme(nalu_type)
        {
            let body = rbsp_unescape(&payload[1..]);
            if let Err(e) = self.run(scheme, &body, &mut fields) {
                debug!("H264: {} 载荷解析失败: {}", nalu_type, e);
                status = NaluStatus::Error;
            }
        }

        if status == NaluStatus::Valid {
            self.global.nalu_count += 1;
        }

        Nalu {
            parsed_fields: fields,
            nalu_type,
            stripped_prefix: prefix,
            payload,
            status,
            pts,
            dts,
        }
    }

    fn run(
        &mut self,
        scheme: &'static [Directive],
        data: &[u8],
        fields: &mut FieldMap,
    ) -> JieResult<()> {
        let mut br = BitReader::new(data);
        run_scheme(scheme, &mut br, fields, &mut self.global).map_err(|e| {
            // 自定义处理器可能直接透传位流错误, 统一归类为字段解析失败
            if e.is_recoverable() {
                e
            } else {
                JieError::MalformedField(e.to_string())
            }
        })
    }
}

impl Default for NaluParser {
    fn default() -> Self {
        Self::new()
    }
}

/// 按 NALU 类型选择载荷方案
fn body_scheme(nalu_type: NaluType) -> Option<&'static [Directive]> {
    match nalu_type {
        NaluType::Sps => Some(schemes::sps::SCHEME),
        NaluType::Pps => Some(schemes::pps::SCHEME),
        // 数据分区 A 携带完整切片头; B/C 只有残差, 无需解析
        NaluType::NonIdr | NaluType::Idr | NaluType::PartA => Some(schemes::slice::SCHEME),
        _ => None,
    }
}

/// 生成输出封装下的 NALU 前缀
///
/// - Annex B 输出: 输入前缀本身是起始码时原样复用 (字节级保持),
///   否则 (格式转换或前缀缺失) 统一使用 4 字节起始码;
/// - AVC 输出: 按配置的 length_size 生成大端长度前缀.
pub fn output_prefix(nalu: &Nalu, structure: &StreamStructure) -> JieResult<Bytes> {
    match structure {
        StreamStructure::AnnexB => {
            let prefix = nalu.stripped_prefix.as_ref();
            if prefix == [0x00, 0x00, 0x01] || prefix == [0x00, 0x00, 0x00, 0x01] {
                Ok(nalu.stripped_prefix.clone())
            } else {
                Ok(Bytes::from_static(&[0x00, 0x00, 0x00, 0x01]))
            }
        }
        StreamStructure::Avc1 { nalu_length_size }
        | StreamStructure::Avc3 { nalu_length_size } => {
            let len = nalu.payload.len();
            let max = match nalu_length_size {
                1 => 0xFF,
                2 => 0xFFFF,
                _ => u32::MAX as usize,
            };
            if len > max {
                return Err(JieError::InvalidData(format!(
                    "H264: NALU 长度 {} 超出 {} 字节长度前缀的表示范围",
                    len, nalu_length_size
                )));
            }
            let be = (len as u32).to_be_bytes();
            Ok(Bytes::copy_from_slice(&be[4 - nalu_length_size..]))
        }
    }
}
