//! Delimited-text output: `# key: value` metadata lines, then a CSV table.

/// Sentinel written for `Next cursor` once there are no more pages.
pub const NO_MORE_PAGES: &str = "none";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    meta: Vec<(String, String)>,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            meta: Vec::new(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn meta(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.meta.push((key.to_string(), value.to_string()));
        self
    }

    /// Append a row. Short rows are padded, long rows truncated, so the
    /// column count always matches the header.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Render to text. An empty table still emits its header line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.meta {
            out.push_str("# ");
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&single_line(value));
            out.push('\n');
        }
        write_record(&mut out, self.columns.iter().map(String::as_str));
        for row in &self.rows {
            write_record(&mut out, row.iter().map(String::as_str));
        }
        out
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

fn write_record<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    for (idx, cell) in cells.enumerate() {
        if idx > 0 {
            out.push(',');
        }
        push_cell(out, cell);
    }
    out.push('\n');
}

fn push_cell(out: &mut String, cell: &str) {
    if cell.contains([',', '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&cell.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(cell);
    }
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
