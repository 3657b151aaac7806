//! 上传文件扩展名过滤规则（白名单 / 黑名单）。

use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Whitelist,
    Blacklist,
    /// 无法识别的模式，按拒绝全部处理。
    Unrecognized,
}

impl FilterMode {
    /// 解析模式名称（忽略大小写），未知名称返回 `Unrecognized`。
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "whitelist" => FilterMode::Whitelist,
            "blacklist" => FilterMode::Blacklist,
            _ => FilterMode::Unrecognized,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterMode::Whitelist => "whitelist",
            FilterMode::Blacklist => "blacklist",
            FilterMode::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExtensionRule {
    mode: FilterMode,
    extensions: HashSet<String>,
}

impl ExtensionRule {
    /// 构建规则；扩展名统一转为小写并去掉前导 `.`。
    pub fn new<I, S>(mode: FilterMode, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self { mode, extensions }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn extensions(&self) -> &HashSet<String> {
        &self.extensions
    }

    /// 判断文件名是否满足规则。
    pub fn allows(&self, filename: &str) -> bool {
        let ext = extension_of(filename);
        match self.mode {
            FilterMode::Whitelist => self.extensions.contains(&ext),
            FilterMode::Blacklist => !self.extensions.contains(&ext),
            FilterMode::Unrecognized => false,
        }
    }
}

/// 未配置规则时一律放行。
pub fn is_allowed(filename: &str, rule: Option<&ExtensionRule>) -> bool {
    rule.is_none_or(|rule| rule.allows(filename))
}

/// 最后一个 `.` 之后的部分（小写），无 `.` 时为空串。
pub fn extension_of(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}
