//! Line-buffered cursor over input text.
//!
//! Lines keep their terminating newline, and the cursor only ever moves
//! forward through `skip`. There is no arbitrary seek, which is what lets the
//! tokenizer treat `column == 0` as "start of line" without extra bookkeeping.

#[derive(Debug, Clone)]
pub struct InputWindow {
    lines: Vec<String>,
    row: usize,
    column: usize,
}

impl InputWindow {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            row: 0,
            column: 0,
        }
    }

    /// Splits `input` into lines that retain their trailing `\n` (the last
    /// line keeps none if the source doesn't end in one).
    pub fn from_str(input: &str) -> Self {
        let mut lines = Vec::new();
        let mut current = String::new();
        for ch in input.chars() {
            current.push(ch);
            if ch == '\n' {
                lines.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        Self::new(lines)
    }

    /// The substring of the current line from `column` to its end. Empty at
    /// end of file.
    pub fn current_view(&self) -> &str {
        if self.at_eof() {
            return "";
        }
        &self.lines[self.row][self.column..]
    }

    pub fn at_eof(&self) -> bool {
        self.row >= self.lines.len()
    }

    pub fn position(&self) -> (usize, usize) {
        (self.row, self.column)
    }

    pub fn column(&self) -> usize {
        self.column
    }

    /// The only cursor motion primitive. Advances `column` by `n`; if that
    /// runs past the end of the current line, resets to column 0 on the next
    /// row.
    pub fn skip(&mut self, n: usize) {
        self.column += n;
        if self.at_eof() {
            return;
        }
        if self.column >= self.lines[self.row].len() {
            self.column = 0;
            self.row += 1;
        }
    }
}
