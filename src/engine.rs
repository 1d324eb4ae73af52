// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 动态内容引擎模块
//!
//! 该模块负责把四类动态内容源文件编译为可重复执行的产物（Artifact）：
//! - 模板页（`.tpl`）：HTML 中的 `{{ name }}` 占位符按请求数据替换。
//! - 内联脚本（`.jss`）：逐行指令程序，可写出内容、设置响应头和状态码。
//! - 转译脚本（`.sjs`）：同一指令集的另一种简写语法，转译后复用同一程序结构。
//! - 样式表（`.styl`）：支持 `$变量: 值;` 定义的 CSS 预处理。
//!
//! 编译产物由 `cache::ArtifactCache` 以 mtime 为键缓存，本模块只管编译与执行。
//! 所有编译/执行错误都携带源文件行号，供 500 页面定位代码摘录。

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::exception::Exception;

lazy_static! {
    /// 模板占位符：`{{ name }}`，变量名限定为标识符
    static ref TEMPLATE_VAR: Regex = Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap();
}

/// 文本段中不允许再出现 `{{`：要么是未闭合的占位符，要么是占位符内容非法
fn check_no_placeholder(
    path: &str,
    source: &str,
    offset: usize,
    text: &str,
) -> Result<(), Exception> {
    if let Some(pos) = text.find("{{") {
        let line = source[..offset + pos].matches('\n').count() + 1;
        return Err(script_error(path, line, "未闭合或非法的 {{ 占位符"));
    }
    Ok(())
}

fn script_error(path: &str, line: usize, message: impl Into<String>) -> Exception {
    Exception::ScriptError {
        path: path.to_string(),
        line,
        message: message.into(),
    }
}

// --- 模板页 ---

/// 模板编译产物：按占位符切分后的段落序列。
#[derive(Debug, PartialEq)]
pub enum Segment {
    Text(String),
    Var(String),
}

#[derive(Debug)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// 将模板源文本编译为段落序列。
    ///
    /// 残缺的 `{{`（没有闭合的 `}}`）视为编译错误，行号指向残缺处。
    pub fn compile(path: &str, source: &str) -> Result<Self, Exception> {
        let mut segments = Vec::new();
        let mut cursor = 0;
        for captures in TEMPLATE_VAR.captures_iter(source) {
            let whole = captures.get(0).unwrap();
            if whole.start() > cursor {
                let text = &source[cursor..whole.start()];
                check_no_placeholder(path, source, cursor, text)?;
                segments.push(Segment::Text(text.to_string()));
            }
            segments.push(Segment::Var(captures[1].to_string()));
            cursor = whole.end();
        }
        let rest = &source[cursor..];
        check_no_placeholder(path, source, cursor, rest)?;
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    /// 以请求数据渲染模板。缺失的变量渲染为空字符串。
    pub fn render(&self, data: &HashMap<String, String>) -> String {
        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Var(name) => {
                    if let Some(value) = data.get(name) {
                        output.push_str(value);
                    }
                }
            }
        }
        output
    }

    #[cfg(test)]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

// --- 脚本程序 ---

/// 表达式项：字符串字面量、请求数据变量（`$name`）或脚本局部变量。
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Literal(String),
    Data(String),
    Local(String),
}

/// 表达式：若干项以 `+` 连接。
#[derive(Debug, Clone, PartialEq)]
pub struct Expr(pub Vec<Term>);

/// 脚本语句。每条语句保留源文件行号。
#[derive(Debug, PartialEq)]
pub enum Statement {
    Let { name: String, expr: Expr },
    Echo(Expr),
    Header { name: String, value: Expr },
    Status(u16),
    Stop,
}

/// 脚本编译产物：带行号的语句序列。
#[derive(Debug)]
pub struct Program {
    statements: Vec<(usize, Statement)>,
}

/// 脚本执行的输出端，由响应对象实现。
///
/// 引擎只通过该接口与响应交互，不直接依赖 HTTP 层。
pub trait ScriptOutput {
    fn echo(&mut self, text: &str);
    fn header(&mut self, name: &str, value: &str);
    fn status(&mut self, code: u16);
}

impl Program {
    /// 编译内联脚本（`.jss`）语法。
    ///
    /// 支持的指令：
    /// - `let 名字 = 表达式`
    /// - `echo 表达式`
    /// - `header 名字: 表达式`
    /// - `status 状态码`
    /// - `stop`
    /// 以 `#` 开头的行与空行被忽略。
    pub fn compile(path: &str, source: &str) -> Result<Self, Exception> {
        let mut statements = Vec::new();
        for (index, raw_line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let statement = Self::parse_statement(path, line_no, line)?;
            statements.push((line_no, statement));
        }
        Ok(Self { statements })
    }

    /// 将转译脚本（`.sjs`）的简写语法转译为内联脚本指令后编译。
    ///
    /// 对应关系：
    /// - `名字 := 表达式`  → `let 名字 = 表达式`
    /// - `> 表达式`        → `echo 表达式`
    /// - `! 名字: 表达式`  → `header 名字: 表达式`
    /// - `~ 状态码`        → `status 状态码`
    /// - `.`               → `stop`
    /// 以 `;` 开头的行是注释。
    pub fn transpile(path: &str, source: &str) -> Result<Self, Exception> {
        let mut statements = Vec::new();
        for (index, raw_line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let canonical = if line == "." {
                "stop".to_string()
            } else if let Some(rest) = line.strip_prefix("> ") {
                format!("echo {}", rest)
            } else if let Some(rest) = line.strip_prefix("! ") {
                format!("header {}", rest)
            } else if let Some(rest) = line.strip_prefix("~ ") {
                format!("status {}", rest)
            } else if let Some((name, expr)) = line.split_once(":=") {
                format!("let {} = {}", name.trim(), expr.trim())
            } else {
                return Err(script_error(path, line_no, "无法识别的指令"));
            };
            let statement = Self::parse_statement(path, line_no, &canonical)?;
            statements.push((line_no, statement));
        }
        Ok(Self { statements })
    }

    fn parse_statement(path: &str, line_no: usize, line: &str) -> Result<Statement, Exception> {
        if line == "stop" {
            return Ok(Statement::Stop);
        }
        if let Some(rest) = line.strip_prefix("let ") {
            let (name, expr) = rest
                .split_once('=')
                .ok_or_else(|| script_error(path, line_no, "let 语句缺少 ="))?;
            let name = name.trim();
            if !is_identifier(name) {
                return Err(script_error(path, line_no, format!("非法的变量名：{}", name)));
            }
            return Ok(Statement::Let {
                name: name.to_string(),
                expr: Self::parse_expr(path, line_no, expr.trim())?,
            });
        }
        if let Some(rest) = line.strip_prefix("echo ") {
            return Ok(Statement::Echo(Self::parse_expr(path, line_no, rest.trim())?));
        }
        if let Some(rest) = line.strip_prefix("header ") {
            let (name, value) = rest
                .split_once(':')
                .ok_or_else(|| script_error(path, line_no, "header 语句缺少 :"))?;
            return Ok(Statement::Header {
                name: name.trim().to_string(),
                value: Self::parse_expr(path, line_no, value.trim())?,
            });
        }
        if let Some(rest) = line.strip_prefix("status ") {
            let code: u16 = rest
                .trim()
                .parse()
                .map_err(|_| script_error(path, line_no, format!("非法的状态码：{}", rest.trim())))?;
            return Ok(Statement::Status(code));
        }
        Err(script_error(path, line_no, format!("无法识别的指令：{}", line)))
    }

    /// 解析以 `+` 连接的表达式。字面量用双引号包围，支持 `\"`、`\\`、`\n` 转义。
    fn parse_expr(path: &str, line_no: usize, text: &str) -> Result<Expr, Exception> {
        let mut terms = Vec::new();
        for part in split_terms(text) {
            let part = part.trim();
            if part.is_empty() {
                return Err(script_error(path, line_no, "表达式中存在空项"));
            }
            if part.starts_with('"') {
                if part.len() < 2 || !part.ends_with('"') {
                    return Err(script_error(path, line_no, "未闭合的字符串字面量"));
                }
                terms.push(Term::Literal(unescape(&part[1..part.len() - 1])));
            } else if let Some(name) = part.strip_prefix('$') {
                if !is_identifier(name) {
                    return Err(script_error(path, line_no, format!("非法的数据变量：{}", part)));
                }
                terms.push(Term::Data(name.to_string()));
            } else if is_identifier(part) {
                terms.push(Term::Local(part.to_string()));
            } else {
                return Err(script_error(path, line_no, format!("无法解析的表达式项：{}", part)));
            }
        }
        if terms.is_empty() {
            return Err(script_error(path, line_no, "空表达式"));
        }
        Ok(Expr(terms))
    }

    /// 依次执行语句。`stop` 终止执行，属于正常完成而非错误。
    ///
    /// 求值规则：`$name` 从请求数据取值，缺失时取空串；脚本局部变量
    /// 未定义即引用是错误。
    pub fn run(
        &self,
        path: &str,
        data: &HashMap<String, String>,
        out: &mut dyn ScriptOutput,
    ) -> Result<(), Exception> {
        let mut locals: HashMap<String, String> = HashMap::new();
        for (line_no, statement) in &self.statements {
            match statement {
                Statement::Let { name, expr } => {
                    let value = self.eval(path, *line_no, expr, data, &locals)?;
                    locals.insert(name.clone(), value);
                }
                Statement::Echo(expr) => {
                    let value = self.eval(path, *line_no, expr, data, &locals)?;
                    out.echo(&value);
                }
                Statement::Header { name, value } => {
                    let value = self.eval(path, *line_no, value, data, &locals)?;
                    out.header(name, &value);
                }
                Statement::Status(code) => out.status(*code),
                Statement::Stop => break,
            }
        }
        Ok(())
    }

    fn eval(
        &self,
        path: &str,
        line_no: usize,
        expr: &Expr,
        data: &HashMap<String, String>,
        locals: &HashMap<String, String>,
    ) -> Result<String, Exception> {
        let mut value = String::new();
        for term in &expr.0 {
            match term {
                Term::Literal(text) => value.push_str(text),
                Term::Data(name) => {
                    if let Some(v) = data.get(name) {
                        value.push_str(v);
                    }
                }
                Term::Local(name) => match locals.get(name) {
                    Some(v) => value.push_str(v),
                    None => {
                        return Err(script_error(
                            path,
                            line_no,
                            format!("未定义的变量：{}", name),
                        ))
                    }
                },
            }
        }
        Ok(value)
    }

    #[cfg(test)]
    pub fn statements(&self) -> &[(usize, Statement)] {
        &self.statements
    }
}

/// 在引号外按 `+` 切分表达式
fn split_terms(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                current.push(ch);
            }
            '+' => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

fn unescape(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => output.push('\n'),
            Some('t') => output.push('\t'),
            Some('"') => output.push('"'),
            Some('\\') => output.push('\\'),
            Some(other) => {
                output.push('\\');
                output.push(other);
            }
            None => output.push('\\'),
        }
    }
    output
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// --- 样式表 ---

lazy_static! {
    /// 样式表变量定义行：`$name: value;`
    static ref STYLE_DEF: Regex =
        Regex::new(r"(?m)^\s*\$([A-Za-z_][A-Za-z0-9_-]*)\s*:\s*([^;]+);\s*$").unwrap();
}

/// 预处理样式表：剥离 `/* */` 注释，收集 `$var: value;` 定义并在
/// 余下文本中替换所有 `$var` 引用，产物是纯 CSS 文本。
pub fn compile_stylesheet(path: &str, source: &str) -> Result<String, Exception> {
    let without_comments = strip_css_comments(path, source)?;

    let mut variables: Vec<(String, String)> = Vec::new();
    for captures in STYLE_DEF.captures_iter(&without_comments) {
        variables.push((captures[1].to_string(), captures[2].trim().to_string()));
    }
    // 变量名长的优先替换，避免 $main 吃掉 $main-dark 的前缀
    variables.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut output = STYLE_DEF.replace_all(&without_comments, "").to_string();
    for (name, value) in &variables {
        output = output.replace(&format!("${}", name), value);
    }
    Ok(output)
}

fn strip_css_comments(path: &str, source: &str) -> Result<String, Exception> {
    let mut output = String::with_capacity(source.len());
    let mut rest = source;
    let mut consumed = 0;
    while let Some(start) = rest.find("/*") {
        output.push_str(&rest[..start]);
        match rest[start..].find("*/") {
            Some(offset) => {
                consumed += start + offset + 2;
                rest = &source[consumed..];
            }
            None => {
                let line = source[..consumed + start].matches('\n').count() + 1;
                return Err(script_error(path, line, "未闭合的注释"));
            }
        }
    }
    output.push_str(rest);
    Ok(output)
}
