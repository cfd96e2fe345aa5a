//! Printing unit failures to stderr.
use std::{ops::Range, path::Path};

use codesnake::{Block, CodeWidth, Label, LineIndex};
use jackc::{lexer::line_col, CompileError};
use yansi::Paint;

use crate::batch::Failure;

pub fn report(path: &Path, source: &str, failure: &Failure) {
    match failure {
        Failure::Io(error) => eprintln!("{}: {error:#}", failure.kind_name().red().bold()),
        Failure::Compile(error) => report_compile_error(path, source, error),
    }
}

fn report_compile_error(path: &Path, source: &str, error: &CompileError) {
    let span = error.span();
    let (line, column) = line_col(source, span.start);
    eprintln!(
        "{}: {error}\n  at {}:{line}:{column}",
        error.kind_name().red().bold(),
        path.display()
    );

    let idx = LineIndex::new(source);
    let label = Label::new(visible_range(source, span))
        .with_text(error.to_string().red().to_string())
        .with_style(|s| s.red().to_string());
    let Some(block) = Block::new(&idx, [label]) else {
        return;
    };
    let block = block.map_code(|c| CodeWidth::new(c, c.len()));
    eprintln!("{}[{}]", block.prologue(), path.display());
    eprint!("{block}");
    eprintln!("{}", block.epilogue());
}

/// Widens an empty span to the character it points at, or the last one at
/// end of input, so the label has something to underline.
fn visible_range(source: &str, span: Range<usize>) -> Range<usize> {
    let start = span.start.min(source.len());
    let end = span.end.clamp(start, source.len());
    if start < end {
        return start..end;
    }
    if let Some(c) = source[start..].chars().next() {
        return start..start + c.len_utf8();
    }
    match source[..start].chars().next_back() {
        Some(c) => start - c.len_utf8()..start,
        None => start..end,
    }
}
