//! 模型输出中的 JSON 提取与修复
//!
//! - extract_json：找到第一个 `{` / `[`，按嵌套深度（跳过字符串内部）找到匹配的闭合位置
//! - fix_json：尽力修复常见格式问题（单引号 / 智能引号、未加引号的键、多余空白、
//!   尾随逗号、相邻对象缺逗号、未闭合的括号与字符串）
//! - auto_fix_json：修复后仍合法才返回
//!
//! fix_json 的输出在字符串外不含空白，重复修复结果不变。

/// 提取文本中第一个 JSON 对象或数组。
/// 找不到闭合位置时返回从起点到末尾的部分，交给 fix_json 补全。
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(&['{', '['][..])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

pub fn is_valid_json(s: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(s).is_ok()
}

/// 修复后合法则返回修复结果
pub fn auto_fix_json(s: &str) -> Option<String> {
    let fixed = fix_json(s);
    if is_valid_json(&fixed) {
        Some(fixed)
    } else {
        None
    }
}

/// 尽力修复 JSON 文本
pub fn fix_json(s: &str) -> String {
    restructure(&normalize_quotes(s))
}

/// 字符串统一为双引号：单引号 / 智能引号包裹的字符串改写为双引号字符串
fn normalize_quotes(s: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Out,
        Double { smart: bool },
        Single,
    }

    let mut out = String::with_capacity(s.len());
    let mut state = State::Out;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match state {
            State::Out => match c {
                '"' => {
                    out.push('"');
                    state = State::Double { smart: false };
                }
                '\u{201c}' | '\u{201d}' => {
                    out.push('"');
                    state = State::Double { smart: true };
                }
                '\'' | '\u{2018}' | '\u{2019}' => {
                    out.push('"');
                    state = State::Single;
                }
                _ => out.push(c),
            },
            State::Double { smart } => match c {
                '\\' => {
                    out.push('\\');
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '"' => {
                    out.push('"');
                    state = State::Out;
                }
                '\u{201d}' if smart => {
                    out.push('"');
                    state = State::Out;
                }
                _ => out.push(c),
            },
            State::Single => match c {
                '\\' => match chars.next() {
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push('\\'),
                },
                '"' => out.push_str("\\\""),
                '\'' | '\u{2019}' => {
                    out.push('"');
                    state = State::Out;
                }
                _ => out.push(c),
            },
        }
    }
    out
}

fn is_structural(c: char) -> bool {
    matches!(c, '{' | '}' | '[' | ']' | ',' | ':')
}

/// 在字符串外：去掉结构字符两侧的空白、给裸键加引号、`}{` 之间补逗号、
/// 去掉尾随逗号、补齐未闭合的字符串与括号
fn restructure(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;

        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i) {
                    out.push(next);
                    i += 1;
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        let space_before = std::mem::take(&mut pending_space);

        match c {
            '"' => {
                if space_before && out.chars().last().is_some_and(|p| !is_structural(p)) {
                    out.push(' ');
                }
                in_string = true;
                out.push(c);
            }
            '{' | '[' => {
                if c == '{' && out.ends_with('}') {
                    out.push(',');
                }
                out.push(c);
                stack.push(c);
                if c == '{' {
                    i = quote_bare_key(&chars, i, &mut out);
                }
            }
            '}' | ']' => {
                if out.ends_with(',') {
                    out.pop();
                }
                out.push(c);
                let opener = if c == '}' { '{' } else { '[' };
                if stack.last() == Some(&opener) {
                    stack.pop();
                }
            }
            ',' => {
                out.push(c);
                if stack.last() == Some(&'{') {
                    i = quote_bare_key(&chars, i, &mut out);
                }
            }
            ':' => out.push(c),
            _ => {
                if space_before && out.chars().last().is_some_and(|p| !is_structural(p)) {
                    out.push(' ');
                }
                out.push(c);
            }
        }
    }

    if in_string {
        out.push('"');
    }
    if out.ends_with(',') {
        out.pop();
    }
    while let Some(open) = stack.pop() {
        out.push(if open == '{' { '}' } else { ']' });
    }
    out
}

/// 键位置上的裸标识符（后跟 `:`）加上双引号；返回新的读取位置
fn quote_bare_key(chars: &[char], mut i: usize, out: &mut String) -> usize {
    let start = i;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    let ident_start = i;
    if i >= chars.len() || !(chars[i].is_alphabetic() || chars[i] == '_') {
        return start;
    }
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
        i += 1;
    }
    let ident_end = i;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    if i < chars.len() && chars[i] == ':' {
        out.push('"');
        out.extend(&chars[ident_start..ident_end]);
        out.push('"');
        ident_end
    } else {
        start
    }
}
