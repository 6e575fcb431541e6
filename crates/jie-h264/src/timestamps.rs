//! 恒定帧率时间戳生成.
//!
//! 输入不携带时间戳时, 按配置的帧率为每个访问单元合成 PTS/DTS
//! (纳秒). DTS 默认等于 PTS; 开启 DTS 偏移后, DTS 提前
//! "最大 B 帧重排深度 × 帧周期", 保证重排序下 DTS ≤ PTS 仍成立.
//!
//! 重排深度优先取 SPS VUI bitstream_restriction 的
//! max_num_reorder_frames, 否则使用缺省值 2.

use jie_core::{JieError, JieResult, Rational};

use crate::format::Profile;

/// 每秒纳秒数 (宿主时间单位)
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// 未从 SPS 获得 max_num_reorder_frames 时的缺省重排深度
const DEFAULT_REORDER_FRAMES: u32 = 2;

/// 时间戳生成配置
#[derive(Debug, Clone, Copy)]
pub struct TimestampGenerationOptions {
    /// 帧率 (帧数/秒数)
    pub framerate: Rational,
    /// 是否为 DTS 施加重排偏移
    pub add_dts_offset: bool,
}

/// 恒定帧率 PTS/DTS 生成器
pub struct TimestampGenerator {
    framerate: Rational,
    add_dts_offset: bool,
    reorder_frames: u32,
    au_count: u64,
}

impl TimestampGenerator {
    /// 创建生成器
    pub fn new(options: TimestampGenerationOptions) -> JieResult<Self> {
        if !options.framerate.is_valid() || options.framerate.num <= 0 || options.framerate.den <= 0
        {
            return Err(JieError::InvalidArgument(format!(
                "时间戳生成帧率非法: {}",
                options.framerate
            )));
        }
        Ok(Self {
            framerate: options.framerate,
            add_dts_offset: options.add_dts_offset,
            reorder_frames: DEFAULT_REORDER_FRAMES,
            au_count: 0,
        })
    }

    /// 用 SPS 的 max_num_reorder_frames 更新重排深度
    pub fn set_reorder_frames(&mut self, frames: u32) {
        self.reorder_frames = frames;
    }

    /// 校验 profile 是否支持当前的生成模式
    ///
    /// 未开启 DTS 偏移时, 只有不发生帧重排序的 profile
    /// (baseline / constrained_baseline) 可以安全地使用 PTS=DTS;
    /// 其余 profile (含未识别的) 在首个 SPS 处拒绝.
    pub fn check_profile(&self, profile: Option<Profile>) -> JieResult<()> {
        if self.add_dts_offset {
            return Ok(());
        }
        match profile {
            Some(p) if p.is_reorder_free() => Ok(()),
            Some(p) => Err(JieError::UnsupportedTimestampGeneration(format!(
                "profile {} 会发生帧重排序, 需要显式的 DTS 偏移",
                p
            ))),
            None => Err(JieError::UnsupportedTimestampGeneration(
                "无法识别 profile, 需要显式的 DTS 偏移".into(),
            )),
        }
    }

    /// 为下一个访问单元生成 (pts, dts)
    pub fn next_timestamps(&mut self) -> (i64, i64) {
        let pts = self.pts_at(self.au_count);
        self.au_count += 1;

        let dts = if self.add_dts_offset {
            pts - self.reorder_offset()
        } else {
            pts
        };
        (pts, dts)
    }

    /// pts(n) = floor(n · den · 10^9 / num)
    ///
    /// 交叉乘法在 i128 上进行, 避免中间溢出与浮点精度损失.
    fn pts_at(&self, n: u64) -> i64 {
        let num = i128::from(self.framerate.num);
        let den = i128::from(self.framerate.den);
        let value = i128::from(n) * den * i128::from(NANOS_PER_SECOND) / num;
        value as i64
    }

    /// 重排偏移: reorder_frames 个帧周期
    fn reorder_offset(&self) -> i64 {
        let num = i128::from(self.framerate.num);
        let den = i128::from(self.framerate.den);
        let value = i128::from(self.reorder_frames) * den * i128::from(NANOS_PER_SECOND) / num;
        value as i64
    }
}
