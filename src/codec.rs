//! Delimited-text tables: a header row of column names followed by data rows.
//!
//! Comma separated, RFC 4180 quoting (fields containing a comma, quote or line
//! break are wrapped in double quotes, embedded quotes doubled). Both `\n` and
//! `\r\n` line endings are accepted on read; `\n` is written.

use std::fmt;

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// A parsed shard body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub header: Vec<String>,
    /// Data rows paired with their 1-based line number in the source text.
    pub rows: Vec<(usize, Vec<String>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for CodecError {}

/// Parse a delimited-text body. An empty body yields an empty table.
pub fn parse_table(text: &str) -> Result<Table, CodecError> {
    let mut records = split_records(text)?.into_iter();

    let header = match records.next() {
        Some((_, header)) => header,
        None => return Ok(Table::default()),
    };

    let mut rows = Vec::new();
    for (line, fields) in records {
        if fields.len() != header.len() {
            return Err(CodecError {
                line,
                reason: format!(
                    "expected {} fields, found {}",
                    header.len(),
                    fields.len()
                ),
            });
        }
        rows.push((line, fields));
    }

    Ok(Table { header, rows })
}

/// Render a header and rows. Every row must have the header's width.
pub fn write_table(header: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    write_record(&mut out, header);
    for row in rows {
        write_record(&mut out, row);
    }
    out
}

fn write_record(out: &mut String, fields: &[String]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        if field.contains([DELIMITER, QUOTE, '\n', '\r']) {
            out.push(QUOTE);
            out.push_str(&field.replace(QUOTE, "\"\""));
            out.push(QUOTE);
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Split text into records, skipping blank lines outside quotes.
fn split_records(text: &str) -> Result<Vec<(usize, Vec<String>)>, CodecError> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                QUOTE if chars.peek() == Some(&QUOTE) => {
                    chars.next();
                    field.push(QUOTE);
                }
                QUOTE => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            QUOTE if field.is_empty() => in_quotes = true,
            DELIMITER => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                finish_record(&mut records, &mut fields, &mut field, record_line);
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(CodecError {
            line: record_line,
            reason: "unterminated quoted field".into(),
        });
    }
    finish_record(&mut records, &mut fields, &mut field, record_line);

    Ok(records)
}

fn finish_record(
    records: &mut Vec<(usize, Vec<String>)>,
    fields: &mut Vec<String>,
    field: &mut String,
    line: usize,
) {
    if fields.is_empty() && field.is_empty() {
        return;
    }
    fields.push(std::mem::take(field));
    records.push((line, std::mem::take(fields)));
}
