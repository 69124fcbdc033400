//! Append-only record of headers and operation lines.

/// First line of every Knitout file.
pub const KNITOUT_VERSION: &str = ";!knitout-2";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationLog {
    headers: Vec<(String, String)>,
    operations: Vec<String>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, or replace the value of an existing one in place.
    pub fn append_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some(header) => header.1 = value,
            None => self.headers.push((key, value)),
        }
    }

    /// Append an operation line and return its 1-based line number.
    pub fn append_operation(&mut self, text: impl Into<String>) -> usize {
        self.operations.push(text.into());
        self.operations.len()
    }

    /// Line number the next operation will get.
    pub fn next_line(&self) -> usize {
        self.operations.len() + 1
    }

    /// Operation lines so far. Headers are not counted.
    pub fn line_count(&self) -> usize {
        self.operations.len()
    }

    /// Line in the serialized file where operation `line` lands.
    pub fn file_line(&self, line: usize) -> usize {
        line + self.headers.len() + 1
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    /// Version line, headers, then operations, newline-terminated.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(16 * (self.operations.len() + self.headers.len() + 1));
        out.push_str(KNITOUT_VERSION);
        out.push('\n');
        for (key, value) in &self.headers {
            out.push_str(&format!(";;{key}: {value}\n"));
        }
        for op in &self.operations {
            out.push_str(op);
            out.push('\n');
        }
        out
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_numbers_skip_headers() {
        let mut log = OperationLog::new();
        log.append_header("Machine", "SWGN2");
        assert_eq!(log.next_line(), 1);
        assert_eq!(log.append_operation("inhook 1"), 1);
        assert_eq!(log.append_operation("tuck + f0 1"), 2);
        assert_eq!(log.line_count(), 2);
        assert_eq!(log.file_line(2), 4);
    }

    #[test]
    fn test_header_replaced_in_place() {
        let mut log = OperationLog::new();
        log.append_header("Machine", "SWGN2");
        log.append_header("Gauge", "15");
        log.append_header("Machine", "Kniterate");
        assert_eq!(
            log.headers(),
            &[
                ("Machine".to_string(), "Kniterate".to_string()),
                ("Gauge".to_string(), "15".to_string())
            ]
        );
    }

    #[test]
    fn test_serialize() {
        let mut log = OperationLog::new();
        log.append_operation("in 1");
        log.append_header("Carriers", "1 2");
        log.append_operation("out 1");
        assert_eq!(log.serialize(), ";!knitout-2\n;;Carriers: 1 2\nin 1\nout 1\n");

        log.clear_operations();
        assert_eq!(log.serialize(), ";!knitout-2\n;;Carriers: 1 2\n");
    }
}
