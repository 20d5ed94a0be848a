//! Indented text output for generated sources.

/// Accumulates generated Rust source with four-space indentation tracking.
#[derive(Debug, Default)]
pub struct CodeWriter {
    buf: String,
    depth: usize,
}

impl CodeWriter {
    pub fn new() -> CodeWriter {
        CodeWriter::default()
    }

    pub fn into_string(self) -> String {
        self.buf
    }

    fn push_indent(&mut self) {
        for _ in 0..self.depth {
            self.buf.push_str("    ");
        }
    }

    /// Appends one indented line.
    pub fn line(&mut self, line: impl AsRef<str>) {
        self.push_indent();
        self.buf.push_str(line.as_ref());
        self.buf.push('\n');
    }

    /// Appends an empty line, collapsing runs of them.
    pub fn blank(&mut self) {
        if !self.buf.ends_with("\n\n") && !self.buf.is_empty() {
            self.buf.push('\n');
        }
    }

    /// Appends `head` followed by ` {` and indents until [`close`].
    ///
    /// [`close`]: CodeWriter::close
    pub fn open(&mut self, head: impl AsRef<str>) {
        self.push_indent();
        self.buf.push_str(head.as_ref());
        self.buf.push_str(" {\n");
        self.depth += 1;
    }

    /// Dedents and closes the innermost `{` with `}`.
    pub fn close(&mut self) {
        self.close_with("}");
    }

    /// Continues the innermost `if` with `} else {` at the same depth.
    pub fn open_else(&mut self) {
        debug_assert!(self.depth > 0, "unbalanced else");
        self.depth -= 1;
        self.line("} else {");
        self.depth += 1;
    }

    /// Dedents and closes with custom text, e.g. `});` or `},`.
    pub fn close_with(&mut self, tail: impl AsRef<str>) {
        debug_assert!(self.depth > 0, "unbalanced close");
        self.depth -= 1;
        self.line(tail.as_ref());
    }

    /// Appends `// ` comment lines.
    pub fn comment(&mut self, text: impl AsRef<str>) {
        for line in text.as_ref().lines() {
            if line.is_empty() {
                self.line("//");
            } else {
                self.line(format!("// {}", line));
            }
        }
    }

    /// Appends `/// ` doc comment lines.
    pub fn doc(&mut self, text: impl AsRef<str>) {
        for line in text.as_ref().lines() {
            if line.is_empty() {
                self.line("///");
            } else {
                self.line(format!("/// {}", line));
            }
        }
    }
}
