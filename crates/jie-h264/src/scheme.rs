//! 声明式语法解析方案 (scheme) 解释器.
//!
//! SPS/PPS/切片头共享大量子结构, 且字段之间存在条件依赖
//! (后续字段的存在与位宽取决于已读字段). 与其为每种 NALU 手写
//! 解析器, 不如把语法描述为静态的指令树, 由统一的解释器对
//! `(位流, 局部字段表, 全局状态)` 求值:
//!
//! - 指令树是 `static` 数据 (所有回调为普通 `fn` 指针), 无动态分发;
//! - 局部字段表在 NALU 之间清空, 全局状态跨 NALU 持续存在;
//! - 解析失败只向上传播错误, 不触碰全局状态
//!   (`SaveGlobal` 在整个方案成功后才生效).

use std::collections::HashMap;

use jie_core::bitreader::BitReader;
use jie_core::{JieError, JieResult};

use crate::expgolomb::{read_se, read_ue};

/// 语法字段值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// 无符号整数 (标志位按 0/1 存储)
    Uint(u32),
    /// 有符号整数 (se(v) 字段)
    Int(i32),
    /// 循环读取产生的值序列
    List(Vec<FieldValue>),
}

/// 语法字段表
///
/// 字段名到字段值的映射. 字段名全部来自静态的语法方案定义.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: HashMap<&'static str, FieldValue>,
}

impl FieldMap {
    /// 创建空字段表
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入字段
    pub fn insert(&mut self, name: &'static str, value: FieldValue) {
        self.entries.insert(name, value);
    }

    /// 读取字段
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.get(name)
    }

    /// 读取无符号整数字段
    pub fn uint(&self, name: &str) -> Option<u32> {
        match self.entries.get(name) {
            Some(FieldValue::Uint(v)) => Some(*v),
            _ => None,
        }
    }

    /// 读取有符号整数字段
    pub fn int(&self, name: &str) -> Option<i32> {
        match self.entries.get(name) {
            Some(FieldValue::Int(v)) => Some(*v),
            Some(FieldValue::Uint(v)) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// 读取标志字段 (按 0/1 存储的 Uint)
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.uint(name).map(|v| v != 0)
    }

    /// 读取必需的无符号整数字段, 缺失时返回错误
    pub fn require_uint(&self, name: &str) -> JieResult<u32> {
        self.uint(name)
            .ok_or_else(|| JieError::MalformedField(format!("缺少字段 {}", name)))
    }

    /// 将另一个字段表的字段并入本表
    ///
    /// 已存在的同名字段保持不变: 切片头在执行中途引入参数集字段时,
    /// 自身已读出的字段 (如 NALU 头部) 不能被参数集里缓存的同名
    /// 字段覆盖.
    pub fn merge_from(&mut self, other: &FieldMap) {
        for (&name, value) in &other.entries {
            self.entries.entry(name).or_insert_with(|| value.clone());
        }
    }
}

/// 跨 NALU 的解析器全局状态
///
/// 按 id 缓存已解析的参数集字段表, 供切片头解析时引用.
/// 只在语法方案成功执行后更新, 单调增长.
#[derive(Debug, Clone, Default)]
pub struct GlobalState {
    /// 已解析的 SPS, 按 seq_parameter_set_id 索引 (至多 32 个)
    pub spss: HashMap<u32, FieldMap>,
    /// 已解析的 PPS, 按 pic_parameter_set_id 索引 (至多 256 个)
    pub ppss: HashMap<u32, FieldMap>,
    /// 已成功解析的 NALU 计数
    pub nalu_count: u64,
}

impl GlobalState {
    /// 创建空状态
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(&self, ns: Namespace) -> &HashMap<u32, FieldMap> {
        match ns {
            Namespace::Sps => &self.spss,
            Namespace::Pps => &self.ppss,
        }
    }

    fn namespace_mut(&mut self, ns: Namespace) -> &mut HashMap<u32, FieldMap> {
        match ns {
            Namespace::Sps => &mut self.spss,
            Namespace::Pps => &mut self.ppss,
        }
    }
}

/// 全局状态中的命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// SPS 缓存 (按 seq_parameter_set_id)
    Sps,
    /// PPS 缓存 (按 pic_parameter_set_id)
    Pps,
}

impl Namespace {
    fn describe(&self) -> &'static str {
        match self {
            Namespace::Sps => "SPS",
            Namespace::Pps => "PPS",
        }
    }
}

/// 条件谓词: 基于已读字段判断分支走向
pub type CondFn = fn(&FieldMap) -> bool;
/// 从已读字段计算一个无符号整数 (动态位宽、循环次数、保存键)
pub type UintFn = fn(&FieldMap) -> JieResult<u32>;
/// 从已读字段推导新字段值
pub type CalcFn = fn(&FieldMap) -> JieResult<FieldValue>;
/// 自定义处理器, 可同时访问位流、局部字段表与全局状态
pub type ExecFn = fn(&mut BitReader, &mut FieldMap, &mut GlobalState) -> JieResult<()>;

/// 字段的读取方式
#[derive(Clone, Copy)]
pub enum FieldKind {
    /// 固定位宽无符号整数 u(n)
    U(u32),
    /// 动态位宽无符号整数, 位宽由已读字段决定
    Uv(UintFn),
    /// 固定位宽有符号整数 s(n) (二进制补码)
    S(u32),
    /// 无符号 Exp-Golomb ue(v)
    Ue,
    /// 有符号 Exp-Golomb se(v)
    Se,
    /// 单个标志位, 按 0/1 存储
    Flag,
}

/// 语法方案指令
///
/// 一个语法方案是 `&'static [Directive]`, 自上而下顺序求值.
pub enum Directive {
    /// 读取一个字段并存入局部字段表
    Field {
        /// 字段名
        name: &'static str,
        /// 读取方式
        kind: FieldKind,
    },
    /// 条件执行
    If {
        /// 条件谓词
        cond: CondFn,
        /// 条件成立时执行的指令序列
        then: &'static [Directive],
    },
    /// 条件分支
    IfElse {
        /// 条件谓词
        cond: CondFn,
        /// 条件成立分支
        then: &'static [Directive],
        /// 条件不成立分支
        otherwise: &'static [Directive],
    },
    /// 循环执行, 循环体内读取的字段按序追加到同名列表
    For {
        /// 循环计数器字段名 (每轮更新为当前下标)
        counter: &'static str,
        /// 循环次数
        count: UintFn,
        /// 循环体
        body: &'static [Directive],
    },
    /// 从已读字段推导新字段
    Calculate {
        /// 目标字段名
        name: &'static str,
        /// 推导函数
        calc: CalcFn,
    },
    /// 执行自定义处理器 (scaling list 等无法用字段指令表达的语法)
    Execute(ExecFn),
    /// 方案成功结束后, 将局部字段表存入全局命名空间
    SaveGlobal {
        /// 目标命名空间
        namespace: Namespace,
        /// 保存键 (基于局部字段计算)
        key: UintFn,
    },
    /// 立即将全局命名空间中的条目并入局部字段表
    LoadGlobal {
        /// 来源命名空间
        namespace: Namespace,
        /// 查找键 (基于局部字段计算)
        key: UintFn,
    },
}

/// 对一个 NALU 载荷执行语法方案
///
/// 成功时局部字段表包含全部已读字段, 且所有 `SaveGlobal` 生效;
/// 失败时全局状态保持原样.
pub fn run_scheme(
    scheme: &'static [Directive],
    br: &mut BitReader,
    local: &mut FieldMap,
    global: &mut GlobalState,
) -> JieResult<()> {
    let mut pending_saves: Vec<(Namespace, UintFn)> = Vec::new();
    run_directives(scheme, br, local, global, &mut pending_saves, false)?;

    for (namespace, key_fn) in pending_saves {
        let key = key_fn(local)?;
        global.namespace_mut(namespace).insert(key, local.clone());
    }
    Ok(())
}

fn run_directives(
    directives: &'static [Directive],
    br: &mut BitReader,
    local: &mut FieldMap,
    global: &mut GlobalState,
    pending_saves: &mut Vec<(Namespace, UintFn)>,
    in_loop: bool,
) -> JieResult<()> {
    for directive in directives {
        match *directive {
            Directive::Field { name, kind } => {
                let value = read_field(br, name, kind, local)?;
                if in_loop {
                    append_to_list(local, name, value);
                } else {
                    local.insert(name, value);
                }
            }
            Directive::If { cond, then } => {
                if cond(local) {
                    run_directives(then, br, local, global, pending_saves, in_loop)?;
                }
            }
            Directive::IfElse {
                cond,
                then,
                otherwise,
            } => {
                let branch = if cond(local) { then } else { otherwise };
                run_directives(branch, br, local, global, pending_saves, in_loop)?;
            }
            Directive::For {
                counter,
                count,
                body,
            } => {
                let n = count(local)?;
                for i in 0..n {
                    local.insert(counter, FieldValue::Uint(i));
                    run_directives(body, br, local, global, pending_saves, true)?;
                }
            }
            Directive::Calculate { name, calc } => {
                let value = calc(local)?;
                local.insert(name, value);
            }
            Directive::Execute(handler) => {
                handler(br, local, global)?;
            }
            Directive::SaveGlobal { namespace, key } => {
                pending_saves.push((namespace, key));
            }
            Directive::LoadGlobal { namespace, key } => {
                let id = key(local)?;
                let entry = global.namespace(namespace).get(&id).ok_or_else(|| {
                    JieError::SpsUnavailable(format!(
                        "切片引用的 {} id={} 尚未出现",
                        namespace.describe(),
                        id
                    ))
                })?;
                let entry = entry.clone();
                local.merge_from(&entry);
            }
        }
    }
    Ok(())
}

/// 按指定方式读取一个字段值
fn read_field(
    br: &mut BitReader,
    name: &'static str,
    kind: FieldKind,
    local: &FieldMap,
) -> JieResult<FieldValue> {
    let value = match kind {
        FieldKind::U(n) => br.read_bits(n).map(FieldValue::Uint),
        FieldKind::Uv(width) => {
            let n = width(local)?;
            br.read_bits(n).map(FieldValue::Uint)
        }
        FieldKind::S(n) => br.read_bits_signed(n).map(FieldValue::Int),
        FieldKind::Ue => read_ue(br).map(FieldValue::Uint),
        FieldKind::Se => read_se(br).map(FieldValue::Int),
        FieldKind::Flag => br.read_bit().map(FieldValue::Uint),
    };
    value.map_err(|e| JieError::MalformedField(format!("读取字段 {} 失败: {}", name, e)))
}

/// 将值追加到局部字段表中的同名列表
fn append_to_list(local: &mut FieldMap, name: &'static str, value: FieldValue) {
    match local.entries.get_mut(name) {
        Some(FieldValue::List(list)) => list.push(value),
        _ => {
            local.insert(name, FieldValue::List(vec![value]));
        }
    }
}
