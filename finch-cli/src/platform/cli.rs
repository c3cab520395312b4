//! CLI 格式化输出
//!
//! 提供命令行友好的错误显示和源码上下文打印。

use finch_api::{FinchError, MAIN_MODULE};
use std::fmt::Write;

/// 打印错误；`json` 时输出一行 ErrorReport JSON
pub fn print_error(e: &FinchError, source: &str, json: bool) {
    let report = e.to_report();
    if json {
        match report.to_json() {
            Ok(line) => eprintln!("{line}"),
            Err(_) => eprintln!("{report}"),
        }
        return;
    }

    eprintln!("error: {report}");
    // 只有入口模块的源码在手边
    if let (Some(MAIN_MODULE), Some(line)) = (e.module(), e.line()) {
        eprint!("{}", print_source_context(source, line));
    }
}

/// 渲染错误行前后几行源码
pub fn print_source_context(source: &str, error_line: usize) -> String {
    const CONTEXT_LINES: usize = 2;

    let lines: Vec<&str> = source.lines().collect();
    let mut out = String::new();
    if error_line == 0 || error_line > lines.len() {
        return out;
    }

    let start_line = error_line.saturating_sub(CONTEXT_LINES).max(1);
    let end_line = (error_line + CONTEXT_LINES).min(lines.len());
    let width = end_line.to_string().len();

    let _ = writeln!(out, "{}|--", "-".repeat(width + 1));
    for line_no in start_line..=end_line {
        let content = lines[line_no - 1];
        let _ = writeln!(out, "{line_no:>width$} | {content}");
        if line_no == error_line {
            let indent = content.len() - content.trim_start().len();
            let marker = "^".repeat(content.trim().len().max(1));
            let _ = writeln!(out, "{} | {}{}", " ".repeat(width), " ".repeat(indent), marker);
        }
    }
    let _ = writeln!(out, "{}|--", "-".repeat(width + 1));
    out
}
