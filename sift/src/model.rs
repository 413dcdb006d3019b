///
/// The raw shape of a file straight after decoding - trimmed header strings and
/// string cells. Nothing is coerced here; the cleaner owns type conversion so the
/// original formatting survives into issue details.
///
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}
