//! Exp-Golomb 可变长编码.
//!
//! H.264 语法中大量使用 Exp-Golomb 编码:
//! - `ue(v)`: 无符号 Exp-Golomb
//! - `se(v)`: 有符号 Exp-Golomb
//!
//! 编码结构: N 个前导零 + 终止位 1 + N 位后缀, 解码值为
//! `(1 << N) - 1 + 后缀`.

use jie_core::bitreader::BitReader;
use jie_core::bitwriter::BitWriter;
use jie_core::{JieError, JieResult};

/// 读取无符号 Exp-Golomb 编码值 ue(v)
pub fn read_ue(br: &mut BitReader) -> JieResult<u32> {
    let mut leading_zeros = 0u32;
    loop {
        let bit = br.read_bit()?;
        if bit == 1 {
            break;
        }
        leading_zeros += 1;
        if leading_zeros > 31 {
            return Err(JieError::MalformedField(
                "Exp-Golomb 前导零过多".into(),
            ));
        }
    }

    if leading_zeros == 0 {
        return Ok(0);
    }

    let suffix = br.read_bits(leading_zeros)?;
    Ok((1 << leading_zeros) - 1 + suffix)
}

/// 读取有符号 Exp-Golomb 编码值 se(v)
pub fn read_se(br: &mut BitReader) -> JieResult<i32> {
    let code = read_ue(br)?;
    // 映射: 0→0, 1→1, 2→-1, 3→2, 4→-2, ...
    let value = code.div_ceil(2) as i32;
    if code & 1 == 0 { Ok(-value) } else { Ok(value) }
}

/// 写入无符号 Exp-Golomb 编码值 ue(v)
pub fn write_ue(bw: &mut BitWriter, val: u32) {
    debug_assert!(val < u32::MAX, "write_ue: val 超出可编码范围");
    let code = val + 1;
    let num_bits = 32 - code.leading_zeros();
    // 前导零
    for _ in 0..num_bits - 1 {
        bw.write_bit(0);
    }
    bw.write_bits(code, num_bits);
}

/// 写入有符号 Exp-Golomb 编码值 se(v)
pub fn write_se(bw: &mut BitWriter, val: i32) {
    let code_num = if val <= 0 {
        (val.unsigned_abs()) * 2
    } else {
        (val as u32) * 2 - 1
    };
    write_ue(bw, code_num);
}
