//! AVCDecoderConfigurationRecord (DCR) 编解码.
//!
//! DCR 是 AVC1/AVC3 封装的带外参数集载体 (ISO/IEC 14496-15 §5.2.4.1):
//!
//! ```text
//! configurationVersion(8) = 1
//! AVCProfileIndication(8) | profile_compatibility(8) | AVCLevelIndication(8)
//! 0b111111 | lengthSizeMinusOne(2)
//! 0b111 | numOfSequenceParameterSets(5), 每个 SPS 前有 u16 长度
//! numOfPictureParameterSets(8), 每个 PPS 前有 u16 长度
//! ```

use bytes::Bytes;

use jie_core::{JieError, JieResult};

/// 解析后的 DCR
#[derive(Debug, Clone)]
pub struct DecoderConfigRecord {
    /// AVCProfileIndication (SPS 的 profile_idc)
    pub profile: u8,
    /// profile_compatibility (constraint_set 标志字节)
    pub compatibility: u8,
    /// AVCLevelIndication (SPS 的 level_idc)
    pub level: u8,
    /// NALU 长度前缀字节数 (1/2/4)
    pub nalu_length_size: usize,
    /// SPS NALU 列表 (含头部字节, 原样保留)
    pub spss: Vec<Bytes>,
    /// PPS NALU 列表 (含头部字节, 原样保留)
    pub ppss: Vec<Bytes>,
}

impl DecoderConfigRecord {
    /// 解析 DCR
    pub fn parse(data: &[u8]) -> JieResult<Self> {
        if data.len() < 7 {
            return Err(JieError::MalformedDcr("数据太短".into()));
        }

        let version = data[0];
        if version != 1 {
            return Err(JieError::MalformedDcr(format!(
                "configurationVersion 非法, value={}",
                version
            )));
        }
        let profile = data[1];
        let compatibility = data[2];
        let level = data[3];
        let nalu_length_size = ((data[4] & 0x03) + 1) as usize;
        if nalu_length_size == 3 {
            return Err(JieError::MalformedDcr(
                "lengthSizeMinusOne=2 (3 字节长度前缀) 不被允许".into(),
            ));
        }

        let num_sps = (data[5] & 0x1F) as usize;
        let mut pos = 6;
        let mut spss = Vec::with_capacity(num_sps);
        for i in 0..num_sps {
            let blob = read_u16_prefixed(data, &mut pos, "SPS", i)?;
            spss.push(blob);
        }

        if pos >= data.len() {
            return Err(JieError::MalformedDcr(
                "缺少 numOfPictureParameterSets 字段".into(),
            ));
        }
        let num_pps = data[pos] as usize;
        pos += 1;
        let mut ppss = Vec::with_capacity(num_pps);
        for i in 0..num_pps {
            let blob = read_u16_prefixed(data, &mut pos, "PPS", i)?;
            ppss.push(blob);
        }

        Ok(Self {
            profile,
            compatibility,
            level,
            nalu_length_size,
            spss,
            ppss,
        })
    }

    /// 构建 DCR
    ///
    /// profile/compatibility/level 取自首个 SPS 的第 2-4 字节;
    /// 参数集载荷按字节原样写入.
    pub fn build(spss: &[Bytes], ppss: &[Bytes], nalu_length_size: usize) -> JieResult<Bytes> {
        let Some(sps0) = spss.first() else {
            return Err(JieError::InvalidData(
                "H264: 构建 DCR 需要至少一个 SPS".into(),
            ));
        };
        if sps0.len() < 4 {
            return Err(JieError::InvalidData("H264: SPS 数据太短".into()));
        }
        if !matches!(nalu_length_size, 1 | 2 | 4) {
            return Err(JieError::InvalidArgument(format!(
                "nalu_length_size 非法, value={}",
                nalu_length_size
            )));
        }
        if spss.len() > 31 {
            return Err(JieError::InvalidData(format!(
                "H264: SPS 数量超出 DCR 上限, count={}",
                spss.len()
            )));
        }
        if ppss.len() > 255 {
            return Err(JieError::InvalidData(format!(
                "H264: PPS 数量超出 DCR 上限, count={}",
                ppss.len()
            )));
        }

        let mut out = vec![
            1,                                  // configurationVersion
            sps0[1],                            // AVCProfileIndication
            sps0[2],                            // profile_compatibility
            sps0[3],                            // AVCLevelIndication
            0xFC | ((nalu_length_size as u8) - 1), // lengthSizeMinusOne
            0xE0 | (spss.len() as u8),          // numOfSequenceParameterSets
        ];
        for sps in spss {
            write_u16_prefixed(&mut out, sps)?;
        }
        out.push(ppss.len() as u8);
        for pps in ppss {
            write_u16_prefixed(&mut out, pps)?;
        }

        Ok(Bytes::from(out))
    }
}

fn read_u16_prefixed(data: &[u8], pos: &mut usize, kind: &str, index: usize) -> JieResult<Bytes> {
    if *pos + 2 > data.len() {
        return Err(JieError::MalformedDcr(format!(
            "{} 长度字段截断, index={}",
            kind, index
        )));
    }
    let len = ((data[*pos] as usize) << 8) | data[*pos + 1] as usize;
    *pos += 2;
    if len == 0 {
        return Err(JieError::MalformedDcr(format!(
            "{} 长度非法, index={}, len=0",
            kind, index
        )));
    }
    if *pos + len > data.len() {
        return Err(JieError::MalformedDcr(format!(
            "{} 数据截断, index={}, declared_len={}, remain={}",
            kind,
            index,
            len,
            data.len().saturating_sub(*pos)
        )));
    }
    let blob = Bytes::copy_from_slice(&data[*pos..*pos + len]);
    *pos += len;
    Ok(blob)
}

fn write_u16_prefixed(out: &mut Vec<u8>, blob: &Bytes) -> JieResult<()> {
    let len = u16::try_from(blob.len()).map_err(|_| {
        JieError::InvalidData(format!("H264: 参数集超过 u16 长度上限, len={}", blob.len()))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(blob);
    Ok(())
}
