//! 解析过滤器: 组合分割器、解析器与访问单元分割器的协调层.
//!
//! 过滤器是完全同步的纯状态机: 宿主每送入一个流格式或一个输入
//! 缓冲, 得到零或多个输出动作 (流格式 / 输出缓冲). 内部不挂起,
//! 不产生后台任务; 输出缓冲严格按访问单元顺序发出, 流格式动作
//! 先于依赖它的缓冲.
//!
//! 职责 (按输入缓冲的处理顺序):
//! 1. 把待注入的帧前缀 (DCR 或配置提供的参数集) 拼到载荷之前;
//! 2. NALU 分割 (对齐模式下附加 flush);
//! 3. NALU 解析, 按对齐模式保留输入时间戳;
//! 4. 访问单元分割 (访问单元对齐模式下附加 flush);
//! 5. 参数集缓存合并 → 必要时发出新的输出流格式;
//! 6. AVC1 输出剥离带内参数集 / 可选地在 IDR 前重复参数集;
//! 7. 时间戳指派, 关键帧等待门限, 输出缓冲与元数据组装.

use std::collections::BTreeMap;

use bytes::Bytes;
use log::{debug, warn};

use jie_core::{JieError, JieResult, Rational};

use crate::au::{AccessUnit, AuSplitter};
use crate::dcr::DecoderConfigRecord;
use crate::format::{
    Alignment, InputFormat, InputStructure, OutputFormat, Profile, StreamStructure,
    framerate_from_sps, resolution_from_sps,
};
use crate::nalu::{Nalu, NaluType};
use crate::parser::{NaluParser, output_prefix};
use crate::scheme::FieldMap;
use crate::splitter::NaluSplitter;
use crate::timestamps::{TimestampGenerationOptions, TimestampGenerator};

/// 过滤器配置
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// 预置的 SPS 载荷 (仅 Annex B 输出时允许)
    pub spss: Vec<Bytes>,
    /// 预置的 PPS 载荷 (仅 Annex B 输出时允许)
    pub ppss: Vec<Bytes>,
    /// 输出流格式中通告的帧率 (优先于 SPS VUI 推导值)
    pub framerate: Option<Rational>,
    /// 输出对齐方式
    pub output_alignment: OutputAlignment,
    /// 首个关键帧之前丢弃访问单元
    pub skip_until_keyframe: bool,
    /// 每个 IDR 访问单元前重复缓存的参数集
    pub repeat_parameter_sets: bool,
    /// 输出封装 (None = 跟随输入)
    pub output_structure: Option<StreamStructure>,
    /// 输入无时间戳时按恒定帧率生成
    pub generate_timestamps: Option<TimestampGenerationOptions>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            spss: Vec::new(),
            ppss: Vec::new(),
            framerate: None,
            output_alignment: OutputAlignment::Au,
            skip_until_keyframe: true,
            repeat_parameter_sets: false,
            output_structure: None,
            generate_timestamps: None,
        }
    }
}

/// 输出对齐方式 (缺省按访问单元)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputAlignment {
    /// 每个输出缓冲一个访问单元
    #[default]
    Au,
    /// 每个输出缓冲一个 NALU
    Nalu,
}

/// 宿主送入的一个输入缓冲
#[derive(Debug, Clone)]
pub struct InputBuffer {
    /// 载荷字节
    pub data: Bytes,
    /// 显示时间戳 (纳秒)
    pub pts: Option<i64>,
    /// 解码时间戳 (纳秒)
    pub dts: Option<i64>,
}

/// 输出缓冲中单个 NALU 的元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaluMetadata {
    /// NALU 类型
    pub nalu_type: NaluType,
    /// 含封装前缀的 (偏移, 长度), 相对输出缓冲载荷
    pub prefixed_poslen: (usize, usize),
    /// 不含前缀的 (偏移, 长度)
    pub unprefixed_poslen: (usize, usize),
    /// 是否为访问单元的首个 NALU
    pub new_access_unit: bool,
    /// 是否为访问单元的最后一个 NALU
    pub end_access_unit: bool,
}

/// 发往宿主的输出缓冲
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    /// 载荷 (按输出封装拼接的 NALU)
    pub data: Bytes,
    /// 显示时间戳 (纳秒)
    pub pts: Option<i64>,
    /// 解码时间戳 (纳秒)
    pub dts: Option<i64>,
    /// 是否为关键帧 (所在访问单元含 IDR)
    pub key_frame: bool,
    /// 按序排列的 NALU 元数据
    pub nalus: Vec<NaluMetadata>,
}

/// 过滤器产出的动作
#[derive(Debug, Clone)]
pub enum ParserEvent {
    /// 新的输出流格式 (先于依赖它的缓冲发出)
    OutputFormat(OutputFormat),
    /// 输出缓冲
    Buffer(OutputBuffer),
}

/// 输入模式, 由首个流格式决定后固定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// 任意切分的字节流
    ByteStream,
    /// 每个输入缓冲一个 NALU
    NaluAligned,
    /// 每个输入缓冲一个访问单元
    AuAligned,
}

/// H.264 解析过滤器
pub struct H264Parser {
    options: ParserOptions,

    mode: Option<Mode>,
    input_structure: Option<StreamStructure>,
    output_structure: Option<StreamStructure>,

    splitter: Option<NaluSplitter>,
    parser: NaluParser,
    au_splitter: AuSplitter,
    ts_generator: Option<TimestampGenerator>,
    profile_checked: bool,

    /// 参数集缓存: 整个 NALU 按 id 存放
    sps_cache: BTreeMap<u32, Nalu>,
    pps_cache: BTreeMap<u32, Nalu>,
    /// 最近一次解析成功的 SPS 字段表 (输出格式推导来源)
    active_sps: Option<FieldMap>,
    /// 缓存自上次发出输出格式后发生过变化
    format_dirty: bool,

    seen_keyframe: bool,
    /// 注入到下一个输入缓冲之前的字节 (输入封装下的参数集)
    frame_prefix: Option<Vec<u8>>,
}

impl H264Parser {
    /// 创建过滤器
    pub fn new(options: ParserOptions) -> JieResult<Self> {
        if let Some(structure) = &options.output_structure
            && let Some(size) = structure.nalu_length_size()
            && !matches!(size, 1 | 2 | 4)
        {
            return Err(JieError::InvalidArgument(format!(
                "输出 nalu_length_size 非法, value={}",
                size
            )));
        }

        let ts_generator = options
            .generate_timestamps
            .map(TimestampGenerator::new)
            .transpose()?;

        Ok(Self {
            options,
            mode: None,
            input_structure: None,
            output_structure: None,
            splitter: None,
            parser: NaluParser::new(),
            au_splitter: AuSplitter::new(),
            ts_generator,
            profile_checked: false,
            sps_cache: BTreeMap::new(),
            pps_cache: BTreeMap::new(),
            active_sps: None,
            format_dirty: false,
            seen_keyframe: false,
            frame_prefix: None,
        })
    }

    /// 处理宿主的流格式信号
    ///
    /// 首个信号固定输入模式与封装; 之后只接受完全相同的封装
    /// (新的 DCR 参数集会作为帧前缀重新注入).
    pub fn handle_format(&mut self, format: InputFormat) -> JieResult<()> {
        let (mode, structure, dcr) = match &format {
            InputFormat::ByteStream => (Mode::ByteStream, StreamStructure::AnnexB, None),
            InputFormat::H264 {
                alignment,
                structure,
            } => {
                let mode = match alignment {
                    Alignment::Nalu => Mode::NaluAligned,
                    Alignment::Au => Mode::AuAligned,
                };
                match structure {
                    InputStructure::AnnexB => (mode, StreamStructure::AnnexB, None),
                    InputStructure::Avc1 { dcr } => {
                        let record = DecoderConfigRecord::parse(dcr)?;
                        let structure = StreamStructure::Avc1 {
                            nalu_length_size: record.nalu_length_size,
                        };
                        (mode, structure, Some(record))
                    }
                    InputStructure::Avc3 { dcr } => {
                        let record = DecoderConfigRecord::parse(dcr)?;
                        let structure = StreamStructure::Avc3 {
                            nalu_length_size: record.nalu_length_size,
                        };
                        (mode, structure, Some(record))
                    }
                }
            }
        };

        match (self.mode, self.input_structure) {
            (None, _) => self.first_format(mode, structure, dcr),
            (Some(old_mode), Some(old_structure)) => {
                if old_mode != mode {
                    return Err(JieError::Unsupported(
                        "输入对齐方式不允许在流中途改变".into(),
                    ));
                }
                if !old_structure.can_change_to(&structure) {
                    return Err(JieError::StreamStructureChange(format!(
                        "{} → {}",
                        old_structure, structure
                    )));
                }
                if let Some(record) = dcr {
                    self.inject_parameter_sets(&record, &structure)?;
                }
                Ok(())
            }
            (Some(_), None) => Err(JieError::Internal("输入封装缺失".into())),
        }
    }

    fn first_format(
        &mut self,
        mode: Mode,
        structure: StreamStructure,
        dcr: Option<DecoderConfigRecord>,
    ) -> JieResult<()> {
        let output_structure = self.options.output_structure.unwrap_or(structure);

        let has_option_ps = !self.options.spss.is_empty() || !self.options.ppss.is_empty();
        if has_option_ps && output_structure != StreamStructure::AnnexB {
            return Err(JieError::InvalidArgument(
                "配置提供的参数集仅在 Annex B 输出时允许".into(),
            ));
        }
        if let Some(record) = &dcr
            && has_option_ps
            && (!record.spss.is_empty() || !record.ppss.is_empty())
        {
            return Err(JieError::ParameterSetConflict(
                "配置与 DCR 同时携带参数集".into(),
            ));
        }

        self.splitter = Some(match structure.nalu_length_size() {
            None => NaluSplitter::annex_b(),
            Some(size) => NaluSplitter::length_prefixed(size)?,
        });

        if let Some(record) = dcr {
            self.inject_parameter_sets(&record, &structure)?;
        } else if has_option_ps {
            // 配置参数集作为合成帧前缀 (输入封装)
            let mut prefix = Vec::new();
            for ps in self.options.spss.iter().chain(self.options.ppss.iter()) {
                append_framed(&mut prefix, ps, &structure)?;
            }
            if !prefix.is_empty() {
                self.frame_prefix = Some(prefix);
            }
        }

        debug!(
            "H264: 输入模式 {:?}, 封装 {}, 输出封装 {}",
            mode, structure, output_structure
        );
        self.mode = Some(mode);
        self.input_structure = Some(structure);
        self.output_structure = Some(output_structure);
        Ok(())
    }

    /// 把 DCR 携带的参数集编码为输入封装下的帧前缀
    fn inject_parameter_sets(
        &mut self,
        record: &DecoderConfigRecord,
        structure: &StreamStructure,
    ) -> JieResult<()> {
        let mut prefix = self.frame_prefix.take().unwrap_or_default();
        for ps in record.spss.iter().chain(record.ppss.iter()) {
            append_framed(&mut prefix, ps, structure)?;
        }
        if !prefix.is_empty() {
            self.frame_prefix = Some(prefix);
        }
        Ok(())
    }

    /// 处理一个输入缓冲
    pub fn handle_buffer(&mut self, buffer: InputBuffer) -> JieResult<Vec<ParserEvent>> {
        let mode = self
            .mode
            .ok_or_else(|| JieError::InvalidArgument("尚未收到输入流格式".into()))?;

        // 1. 帧前缀注入
        let data: Bytes = match self.frame_prefix.take() {
            Some(mut prefix) => {
                prefix.extend_from_slice(&buffer.data);
                Bytes::from(prefix)
            }
            None => buffer.data,
        };

        // 2. NALU 分割; 对齐模式下输入缓冲保证结束于 NALU 边界
        let aligned = mode != Mode::ByteStream;
        let splitter = self.splitter.as_mut().expect("模式已设置则分割器存在");
        let split_nalus = splitter.split(&data, aligned);

        // 3. 解析; 输入时间戳只保留在本缓冲的首个 NALU 上
        let mut events = Vec::new();
        let mut completed = Vec::new();
        for (index, split_nalu) in split_nalus.into_iter().enumerate() {
            let (pts, dts) = if index == 0 && mode != Mode::ByteStream {
                (buffer.pts, buffer.dts)
            } else {
                (None, None)
            };
            let nalu = self.parser.parse(split_nalu, pts, dts);
            // 4. 访问单元分割
            completed.extend(self.au_splitter.push(nalu));
        }
        if mode == Mode::AuAligned {
            completed.extend(self.au_splitter.flush());
        }

        for au in completed {
            self.process_au(au, &mut events)?;
        }
        Ok(events)
    }

    /// 流结束: 冲刷全部内部缓冲
    pub fn finish(&mut self) -> JieResult<Vec<ParserEvent>> {
        let mut events = Vec::new();
        let Some(splitter) = self.splitter.as_mut() else {
            return Ok(events);
        };

        let mut completed = Vec::new();
        if let Some(split_nalu) = splitter.flush() {
            let nalu = self.parser.parse(split_nalu, None, None);
            completed.extend(self.au_splitter.push(nalu));
        }
        completed.extend(self.au_splitter.flush());

        for au in completed {
            self.process_au(au, &mut events)?;
        }
        debug!("H264: 流结束, 共解析 {} 个 NALU", self.parser.state().nalu_count);
        Ok(events)
    }

    // ============================================================
    // 访问单元处理
    // ============================================================

    fn process_au(&mut self, au: AccessUnit, events: &mut Vec<ParserEvent>) -> JieResult<()> {
        // 含语法错误的访问单元整体丢弃, 码流继续
        if au.has_error() {
            warn!("H264: 丢弃含损坏 NALU 的访问单元 ({} 个 NALU)", au.nalus.len());
            return Ok(());
        }

        // 参数集缓存合并
        self.merge_parameter_sets(&au);

        // 缓存变化 → 发出新的输出流格式 (先于本单元的缓冲)
        if self.format_dirty && self.active_sps.is_some() {
            let format = self.build_output_format()?;
            self.check_timestamp_generation(&format)?;
            events.push(ParserEvent::OutputFormat(format));
            self.format_dirty = false;
        }

        // 关键帧等待门限
        if self.options.skip_until_keyframe && !self.seen_keyframe {
            if au.key_frame() {
                self.seen_keyframe = true;
            } else {
                debug!("H264: 尚未出现关键帧, 丢弃访问单元");
                return Ok(());
            }
        }

        // 时间戳: 输入值优先, 缺失时按恒定帧率生成
        let (mut pts, mut dts) = au.timestamps();
        if let Some(ts_generator) = self.ts_generator.as_mut() {
            let (generated_pts, generated_dts) = ts_generator.next_timestamps();
            if pts.is_none() {
                pts = Some(generated_pts);
                dts = Some(generated_dts);
            }
        }

        let output_structure = self
            .output_structure
            .ok_or_else(|| JieError::Internal("输出封装未解析".into()))?;

        // AVC1 输出: 带内参数集剥离 (仅经 DCR 传递)
        let mut nalus: Vec<Nalu> = if matches!(output_structure, StreamStructure::Avc1 { .. }) {
            au.nalus
                .into_iter()
                .filter(|n| !matches!(n.nalu_type, NaluType::Sps | NaluType::Pps))
                .collect()
        } else {
            au.nalus
        };

        // IDR 前重复参数集 (相同载荷去重)
        if self.options.repeat_parameter_sets
            && !matches!(output_structure, StreamStructure::Avc1 { .. })
            && nalus.iter().any(|n| n.nalu_type.is_idr())
        {
            nalus = self.prepend_parameter_sets(nalus);
        }

        if nalus.is_empty() {
            return Ok(());
        }

        let key_frame = nalus.iter().any(|n| n.nalu_type.is_idr());
        match self.options.output_alignment {
            OutputAlignment::Au => {
                events.push(ParserEvent::Buffer(assemble_au_buffer(
                    &nalus,
                    &output_structure,
                    pts,
                    dts,
                    key_frame,
                )?));
            }
            OutputAlignment::Nalu => {
                let last = nalus.len() - 1;
                for (index, nalu) in nalus.iter().enumerate() {
                    events.push(ParserEvent::Buffer(assemble_nalu_buffer(
                        nalu,
                        &output_structure,
                        pts,
                        dts,
                        key_frame,
                        index == 0,
                        index == last,
                    )?));
                }
            }
        }
        Ok(())
    }

    /// 把访问单元携带的 SPS/PPS 并入缓存, 载荷变化时标记格式待发
    fn merge_parameter_sets(&mut self, au: &AccessUnit) {
        for nalu in &au.nalus {
            match nalu.nalu_type {
                NaluType::Sps => {
                    let Some(id) = nalu.parsed_fields.uint("seq_parameter_set_id") else {
                        continue;
                    };
                    let changed = self
                        .sps_cache
                        .get(&id)
                        .is_none_or(|cached| cached.payload != nalu.payload);
                    if changed {
                        debug!("H264: 缓存 SPS id={}", id);
                        self.sps_cache.insert(id, nalu.clone());
                        self.format_dirty = true;
                    }
                    self.active_sps = Some(nalu.parsed_fields.clone());
                }
                NaluType::Pps => {
                    let Some(id) = nalu.parsed_fields.uint("pic_parameter_set_id") else {
                        continue;
                    };
                    let changed = self
                        .pps_cache
                        .get(&id)
                        .is_none_or(|cached| cached.payload != nalu.payload);
                    if changed {
                        debug!("H264: 缓存 PPS id={}", id);
                        self.pps_cache.insert(id, nalu.clone());
                        self.format_dirty = true;
                    }
                }
                _ => {}
            }
        }
    }

    /// 从最近的 SPS 推导输出流格式
    fn build_output_format(&self) -> JieResult<OutputFormat> {
        let sps = self
            .active_sps
            .as_ref()
            .ok_or_else(|| JieError::Internal("缺少已解析的 SPS".into()))?;
        let structure = self
            .output_structure
            .ok_or_else(|| JieError::Internal("输出封装未解析".into()))?;

        let (width, height) = resolution_from_sps(sps)?;
        let profile = Profile::recognize(sps);
        let framerate = self.options.framerate.or_else(|| framerate_from_sps(sps));

        let dcr = if structure.is_avc() && !self.sps_cache.is_empty() {
            let spss: Vec<Bytes> = self.sps_cache.values().map(|n| n.payload.clone()).collect();
            let ppss: Vec<Bytes> = self.pps_cache.values().map(|n| n.payload.clone()).collect();
            let length_size = structure.nalu_length_size().unwrap_or(4);
            Some(DecoderConfigRecord::build(&spss, &ppss, length_size)?)
        } else {
            None
        };

        Ok(OutputFormat {
            alignment: match self.options.output_alignment {
                OutputAlignment::Au => Alignment::Au,
                OutputAlignment::Nalu => Alignment::Nalu,
            },
            width,
            height,
            profile,
            framerate,
            structure,
            dcr,
            nalu_in_metadata: true,
        })
    }

    /// 首个 SPS 处校验时间戳生成配置, 并更新重排深度
    fn check_timestamp_generation(&mut self, format: &OutputFormat) -> JieResult<()> {
        let Some(ts_generator) = self.ts_generator.as_mut() else {
            return Ok(());
        };
        if let Some(sps) = &self.active_sps
            && let Some(reorder) = sps.uint("max_num_reorder_frames")
        {
            ts_generator.set_reorder_frames(reorder);
        }
        if !self.profile_checked {
            ts_generator.check_profile(format.profile)?;
            self.profile_checked = true;
        }
        Ok(())
    }

    /// IDR 访问单元前重复缓存的参数集 (已存在相同载荷则跳过)
    fn prepend_parameter_sets(&self, nalus: Vec<Nalu>) -> Vec<Nalu> {
        let mut result = Vec::with_capacity(nalus.len() + 2);
        for cached in self.sps_cache.values().chain(self.pps_cache.values()) {
            let duplicate = nalus.iter().any(|n| n.payload == cached.payload);
            if !duplicate {
                let mut ps = cached.clone();
                ps.pts = None;
                ps.dts = None;
                result.push(ps);
            }
        }
        result.extend(nalus);
        result
    }
}

/// 按输入封装为参数集编码前缀并追加到帧前缀缓冲
fn append_framed(prefix: &mut Vec<u8>, ps: &[u8], structure: &StreamStructure) -> JieResult<()> {
    match structure.nalu_length_size() {
        None => {
            prefix.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            prefix.extend_from_slice(ps);
        }
        Some(length_size) => {
            let len = ps.len();
            let max = match length_size {
                1 => 0xFF,
                2 => 0xFFFF,
                _ => u32::MAX as usize,
            };
            if len == 0 || len > max {
                return Err(JieError::MalformedDcr(format!(
                    "参数集长度 {} 无法用 {} 字节前缀表示",
                    len, length_size
                )));
            }
            let be = (len as u32).to_be_bytes();
            prefix.extend_from_slice(&be[4 - length_size..]);
            prefix.extend_from_slice(ps);
        }
    }
    Ok(())
}

// ============================================================
// 输出缓冲组装
// ============================================================

/// 组装访问单元对齐的输出缓冲
///
/// 元数据不变式: prefixed_poslen 连续无缝地铺满整个载荷,
/// unprefixed_poslen 位于对应前缀之后.
fn assemble_au_buffer(
    nalus: &[Nalu],
    structure: &StreamStructure,
    pts: Option<i64>,
    dts: Option<i64>,
    key_frame: bool,
) -> JieResult<OutputBuffer> {
    let mut data = Vec::new();
    let mut metadata = Vec::with_capacity(nalus.len());
    let last = nalus.len() - 1;

    for (index, nalu) in nalus.iter().enumerate() {
        let prefix = output_prefix(nalu, structure)?;
        let start = data.len();
        data.extend_from_slice(&prefix);
        let payload_start = data.len();
        data.extend_from_slice(&nalu.payload);

        metadata.push(NaluMetadata {
            nalu_type: nalu.nalu_type,
            prefixed_poslen: (start, data.len() - start),
            unprefixed_poslen: (payload_start, nalu.payload.len()),
            new_access_unit: index == 0,
            end_access_unit: index == last,
        });
    }

    Ok(OutputBuffer {
        data: Bytes::from(data),
        pts,
        dts,
        key_frame,
        nalus: metadata,
    })
}

/// 组装 NALU 对齐的输出缓冲 (一个 NALU 一个缓冲)
fn assemble_nalu_buffer(
    nalu: &Nalu,
    structure: &StreamStructure,
    pts: Option<i64>,
    dts: Option<i64>,
    key_frame: bool,
    new_access_unit: bool,
    end_access_unit: bool,
) -> JieResult<OutputBuffer> {
    let prefix = output_prefix(nalu, structure)?;
    let mut data = Vec::with_capacity(prefix.len() + nalu.payload.len());
    data.extend_from_slice(&prefix);
    data.extend_from_slice(&nalu.payload);

    let metadata = NaluMetadata {
        nalu_type: nalu.nalu_type,
        prefixed_poslen: (0, data.len()),
        unprefixed_poslen: (prefix.len(), nalu.payload.len()),
        new_access_unit,
        end_access_unit,
    };

    Ok(OutputBuffer {
        data: Bytes::from(data),
        pts,
        dts,
        key_frame,
        nalus: vec![metadata],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jie_core::bitwriter::BitWriter;

    use crate::expgolomb::{write_se, write_ue};

    // ============================================================
    // 测试码流构造
    // ============================================================

    /// 构造 320x240 Baseline SPS NALU (含头部字节)
    fn build_sps() -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(66, 8); // profile_idc
        bw.write_bits(0xC0, 8); // constraint_set0/1
        bw.write_bits(30, 8); // level_idc
        write_ue(&mut bw, 0); // seq_parameter_set_id
        write_ue(&mut bw, 0); // log2_max_frame_num_minus4
        write_ue(&mut bw, 0); // pic_order_cnt_type
        write_ue(&mut bw, 0); // log2_max_pic_order_cnt_lsb_minus4
        write_ue(&mut bw, 4); // max_num_ref_frames
        bw.write_bit(0); // gaps_in_frame_num_value_allowed_flag
        write_ue(&mut bw, 19); // pic_width_in_mbs_minus1 (320)
        write_ue(&mut bw, 14); // pic_height_in_map_units_minus1 (240)
        bw.write_bit(1); // frame_mbs_only_flag
        bw.write_bit(0); // direct_8x8_inference_flag
        bw.write_bit(0); // frame_cropping_flag
        bw.write_bit(0); // vui_parameters_present_flag
        bw.write_bit(1); // rbsp_stop_one_bit

        let mut nal = vec![0x67];
        nal.extend(bw.finish());
        nal
    }

    /// 构造最小 PPS NALU (含头部字节)
    fn build_pps() -> Vec<u8> {
        let mut bw = BitWriter::new();
        write_ue(&mut bw, 0); // pic_parameter_set_id
        write_ue(&mut bw, 0); // seq_parameter_set_id
        bw.write_bit(0); // entropy_coding_mode_flag
        bw.write_bit(0); // bottom_field_pic_order_in_frame_present_flag
        write_ue(&mut bw, 0); // num_slice_groups_minus1
        write_ue(&mut bw, 0); // num_ref_idx_l0_default_active_minus1
        write_ue(&mut bw, 0); // num_ref_idx_l1_default_active_minus1
        bw.write_bit(0); // weighted_pred_flag
        bw.write_bits(0, 2); // weighted_bipred_idc
        write_se(&mut bw, 0); // pic_init_qp_minus26
        write_se(&mut bw, 0); // pic_init_qs_minus26
        write_se(&mut bw, 0); // chroma_qp_index_offset
        bw.write_bit(0); // deblocking_filter_control_present_flag
        bw.write_bit(0); // constrained_intra_pred_flag
        bw.write_bit(0); // redundant_pic_cnt_present_flag
        bw.write_bit(1); // rbsp_stop_one_bit

        let mut nal = vec![0x68];
        nal.extend(bw.finish());
        nal
    }

    /// 构造切片 NALU 头部字段 (IDR 或非 IDR), 附带少量伪切片数据
    fn build_slice(idr: bool, frame_num: u32, idr_pic_id: u32, poc_lsb: u32) -> Vec<u8> {
        let mut bw = BitWriter::new();
        write_ue(&mut bw, 0); // first_mb_in_slice
        write_ue(&mut bw, if idr { 7 } else { 5 }); // slice_type
        write_ue(&mut bw, 0); // pic_parameter_set_id
        bw.write_bits(frame_num, 4); // frame_num
        if idr {
            write_ue(&mut bw, idr_pic_id);
        }
        bw.write_bits(poc_lsb, 4); // pic_order_cnt_lsb
        bw.write_bit(1); // 伪切片数据
        bw.align_to_byte();

        let mut nal = vec![if idr { 0x65 } else { 0x41 }];
        nal.extend(bw.finish());
        nal.extend_from_slice(&[0x9A, 0x5B, 0x7C]); // 伪切片数据
        nal
    }

    fn annex_b(nalus: &[Vec<u8>]) -> Bytes {
        let mut data = Vec::new();
        for nal in nalus {
            data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            data.extend_from_slice(nal);
        }
        Bytes::from(data)
    }

    fn input(data: Bytes) -> InputBuffer {
        InputBuffer {
            data,
            pts: None,
            dts: None,
        }
    }

    fn buffers(events: &[ParserEvent]) -> Vec<&OutputBuffer> {
        events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Buffer(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    fn formats(events: &[ParserEvent]) -> Vec<&OutputFormat> {
        events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::OutputFormat(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    // ============================================================
    // 协调层行为
    // ============================================================

    #[test]
    fn test_bytestream_minimal_idr_pipeline() {
        let mut parser = H264Parser::new(ParserOptions::default()).unwrap();
        parser.handle_format(InputFormat::ByteStream).unwrap();

        let stream = annex_b(&[build_sps(), build_pps(), build_slice(true, 0, 0, 0)]);
        let mut events = parser.handle_buffer(input(stream)).unwrap();
        events.extend(parser.finish().unwrap());

        let fmts = formats(&events);
        assert_eq!(fmts.len(), 1, "应发出一次输出流格式");
        assert_eq!((fmts[0].width, fmts[0].height), (320, 240));
        assert_eq!(fmts[0].profile, Some(Profile::ConstrainedBaseline));
        assert_eq!(fmts[0].structure, StreamStructure::AnnexB);

        let bufs = buffers(&events);
        assert_eq!(bufs.len(), 1, "应发出一个访问单元缓冲");
        let buf = bufs[0];
        assert!(buf.key_frame);
        assert_eq!(buf.nalus.len(), 3);
        assert_eq!(buf.nalus[0].nalu_type, NaluType::Sps);
        assert_eq!(buf.nalus[1].nalu_type, NaluType::Pps);
        assert_eq!(buf.nalus[2].nalu_type, NaluType::Idr);
        assert!(buf.nalus[0].new_access_unit);
        assert!(buf.nalus[2].end_access_unit);

        // 元数据不变式: prefixed 跨度连续铺满载荷
        let mut expected_offset = 0;
        for meta in &buf.nalus {
            assert_eq!(meta.prefixed_poslen.0, expected_offset, "跨度应无缝连续");
            expected_offset += meta.prefixed_poslen.1;
        }
        assert_eq!(expected_offset, buf.data.len(), "跨度应覆盖整个载荷");

        // 格式先于缓冲
        assert!(matches!(events[0], ParserEvent::OutputFormat(_)));
    }

    #[test]
    fn test_buffer_before_format_rejected() {
        let mut parser = H264Parser::new(ParserOptions::default()).unwrap();
        let err = parser
            .handle_buffer(input(Bytes::from_static(&[0x00, 0x00, 0x01, 0x67])))
            .expect_err("流格式之前的缓冲应被拒绝");
        assert!(matches!(err, JieError::InvalidArgument(_)));
    }

    #[test]
    fn test_structure_change_rejected() {
        let mut parser = H264Parser::new(ParserOptions::default()).unwrap();
        parser
            .handle_format(InputFormat::H264 {
                alignment: Alignment::Nalu,
                structure: InputStructure::AnnexB,
            })
            .unwrap();

        let dcr = DecoderConfigRecord::build(&[Bytes::from(build_sps())], &[], 4).unwrap();
        let err = parser
            .handle_format(InputFormat::H264 {
                alignment: Alignment::Nalu,
                structure: InputStructure::Avc1 { dcr },
            })
            .expect_err("Annex B → AVC1 应为致命错误");
        assert!(matches!(err, JieError::StreamStructureChange(_)));
    }

    #[test]
    fn test_alignment_change_rejected() {
        let mut parser = H264Parser::new(ParserOptions::default()).unwrap();
        parser
            .handle_format(InputFormat::H264 {
                alignment: Alignment::Nalu,
                structure: InputStructure::AnnexB,
            })
            .unwrap();
        let err = parser
            .handle_format(InputFormat::H264 {
                alignment: Alignment::Au,
                structure: InputStructure::AnnexB,
            })
            .expect_err("对齐方式中途改变应被拒绝");
        assert!(matches!(err, JieError::Unsupported(_)));
    }

    #[test]
    fn test_option_parameter_sets_require_annexb_output() {
        let options = ParserOptions {
            spss: vec![Bytes::from(build_sps())],
            output_structure: Some(StreamStructure::Avc1 {
                nalu_length_size: 4,
            }),
            ..ParserOptions::default()
        };
        let mut parser = H264Parser::new(options).unwrap();
        let err = parser
            .handle_format(InputFormat::ByteStream)
            .expect_err("预置参数集 + AVC 输出应被拒绝");
        assert!(matches!(err, JieError::InvalidArgument(_)));
    }

    #[test]
    fn test_parameter_set_conflict_with_dcr() {
        let options = ParserOptions {
            spss: vec![Bytes::from(build_sps())],
            output_structure: Some(StreamStructure::AnnexB),
            ..ParserOptions::default()
        };
        let mut parser = H264Parser::new(options).unwrap();

        let dcr = DecoderConfigRecord::build(
            &[Bytes::from(build_sps())],
            &[Bytes::from(build_pps())],
            4,
        )
        .unwrap();
        let err = parser
            .handle_format(InputFormat::H264 {
                alignment: Alignment::Au,
                structure: InputStructure::Avc1 { dcr },
            })
            .expect_err("配置与 DCR 同时携带参数集应为致命错误");
        assert!(matches!(err, JieError::ParameterSetConflict(_)));
    }

    #[test]
    fn test_corrupt_au_dropped_stream_continues() {
        let options = ParserOptions {
            skip_until_keyframe: false,
            ..ParserOptions::default()
        };
        let mut parser = H264Parser::new(options).unwrap();
        parser.handle_format(InputFormat::ByteStream).unwrap();

        // 完好 IDR | forbidden_zero_bit 置位的损坏切片 | 完好 IDR
        let mut corrupt = build_slice(false, 1, 0, 2);
        corrupt[0] |= 0x80;
        let stream = annex_b(&[
            build_sps(),
            build_pps(),
            build_slice(true, 0, 0, 0),
            corrupt,
            build_slice(true, 0, 1, 0),
        ]);

        let mut events = parser.handle_buffer(input(stream)).unwrap();
        events.extend(parser.finish().unwrap());

        let bufs = buffers(&events);
        assert_eq!(bufs.len(), 2, "损坏的访问单元应被丢弃, 其余保留");
        assert!(bufs.iter().all(|b| b.key_frame));
    }

    #[test]
    fn test_nalu_aligned_output_alignment() {
        let options = ParserOptions {
            output_alignment: OutputAlignment::Nalu,
            ..ParserOptions::default()
        };
        let mut parser = H264Parser::new(options).unwrap();
        parser.handle_format(InputFormat::ByteStream).unwrap();

        let stream = annex_b(&[build_sps(), build_pps(), build_slice(true, 0, 0, 0)]);
        let mut events = parser.handle_buffer(input(stream)).unwrap();
        events.extend(parser.finish().unwrap());

        let bufs = buffers(&events);
        assert_eq!(bufs.len(), 3, "NALU 对齐时每个 NALU 一个缓冲");
        assert!(bufs[0].nalus[0].new_access_unit);
        assert!(!bufs[1].nalus[0].new_access_unit);
        assert!(bufs[2].nalus[0].end_access_unit);
        assert!(bufs.iter().all(|b| b.key_frame), "关键帧单元的全部缓冲应标记关键帧");
    }

    #[test]
    fn test_generated_timestamps_advance_per_unit() {
        let options = ParserOptions {
            skip_until_keyframe: false,
            generate_timestamps: Some(TimestampGenerationOptions {
                framerate: Rational::new(25, 1),
                add_dts_offset: false,
            }),
            ..ParserOptions::default()
        };
        let mut parser = H264Parser::new(options).unwrap();
        parser.handle_format(InputFormat::ByteStream).unwrap();

        let stream = annex_b(&[
            build_sps(),
            build_pps(),
            build_slice(true, 0, 0, 0),
            build_slice(false, 1, 0, 2),
            build_slice(false, 2, 0, 4),
        ]);
        let mut events = parser.handle_buffer(input(stream)).unwrap();
        events.extend(parser.finish().unwrap());

        let bufs = buffers(&events);
        assert_eq!(bufs.len(), 3);
        assert_eq!(bufs[0].pts, Some(0));
        assert_eq!(bufs[1].pts, Some(40_000_000));
        assert_eq!(bufs[2].pts, Some(80_000_000));
        assert_eq!(bufs[2].dts, bufs[2].pts, "无偏移时 DTS=PTS");
    }

    #[test]
    fn test_timestamp_generation_rejects_reordering_profile() {
        // High profile SPS + 无 DTS 偏移的生成配置 → 首个 SPS 处致命
        let mut bw = BitWriter::new();
        bw.write_bits(100, 8); // profile_idc = High
        bw.write_bits(0x00, 8);
        bw.write_bits(40, 8);
        write_ue(&mut bw, 0); // seq_parameter_set_id
        write_ue(&mut bw, 1); // chroma_format_idc
        write_ue(&mut bw, 0); // bit_depth_luma_minus8
        write_ue(&mut bw, 0); // bit_depth_chroma_minus8
        bw.write_bit(0); // qpprime_y_zero_transform_bypass_flag
        bw.write_bit(0); // seq_scaling_matrix_present_flag
        write_ue(&mut bw, 0); // log2_max_frame_num_minus4
        write_ue(&mut bw, 0); // pic_order_cnt_type
        write_ue(&mut bw, 0); // log2_max_pic_order_cnt_lsb_minus4
        write_ue(&mut bw, 4); // max_num_ref_frames
        bw.write_bit(0);
        write_ue(&mut bw, 19);
        write_ue(&mut bw, 14);
        bw.write_bit(1);
        bw.write_bit(0);
        bw.write_bit(0);
        bw.write_bit(0);
        bw.write_bit(1);
        let mut high_sps = vec![0x67];
        high_sps.extend(bw.finish());

        let options = ParserOptions {
            skip_until_keyframe: false,
            generate_timestamps: Some(TimestampGenerationOptions {
                framerate: Rational::new(25, 1),
                add_dts_offset: false,
            }),
            ..ParserOptions::default()
        };
        let mut parser = H264Parser::new(options).unwrap();
        parser.handle_format(InputFormat::ByteStream).unwrap();

        let stream = annex_b(&[high_sps, build_pps(), build_slice(true, 0, 0, 0)]);
        let result = match parser.handle_buffer(input(stream)) {
            Ok(events) => {
                assert!(formats(&events).is_empty(), "格式发出前就应失败");
                parser.finish()
            }
            Err(e) => Err(e),
        };
        let err = result.expect_err("重排序 profile 的时间戳生成应为致命错误");
        assert!(matches!(err, JieError::UnsupportedTimestampGeneration(_)));
    }

    #[test]
    fn test_format_emitted_once_for_identical_parameter_sets() {
        let options = ParserOptions {
            skip_until_keyframe: false,
            ..ParserOptions::default()
        };
        let mut parser = H264Parser::new(options).unwrap();
        parser.handle_format(InputFormat::ByteStream).unwrap();

        // 相同参数集在第二个访问单元前重复出现
        let stream1 = annex_b(&[build_sps(), build_pps(), build_slice(true, 0, 0, 0)]);
        let stream2 = annex_b(&[build_sps(), build_pps(), build_slice(true, 1, 1, 2)]);
        let mut events = parser.handle_buffer(input(stream1)).unwrap();
        events.extend(parser.handle_buffer(input(stream2)).unwrap());
        events.extend(parser.finish().unwrap());

        assert_eq!(
            formats(&events).len(),
            1,
            "缓存无变化时不应重发输出流格式"
        );
        assert_eq!(buffers(&events).len(), 2);
    }
}
