//! JSONL flow record source

use std::io::BufRead;

use crate::error::{Error, Result};
use crate::models::FlowRecord;

/// Forward-only reader yielding one flow record per non-blank line.
///
/// A line that is not a JSON object comes out as
/// [`Error::MalformedRecord`]; the caller decides whether to skip it.
/// I/O failures end the stream.
pub struct FlowSource<R> {
    reader: R,
    line: usize,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> FlowSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: Vec::new(),
            done: false,
        }
    }

    /// Number of lines consumed so far
    #[cfg(test)]
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for FlowSource<R> {
    type Item = Result<FlowRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    let line = self.line;

                    let text = match std::str::from_utf8(&self.buf) {
                        Ok(text) => text.trim(),
                        Err(e) => {
                            return Some(Err(Error::MalformedRecord {
                                line,
                                reason: format!("invalid UTF-8: {e}"),
                            }));
                        }
                    };
                    if text.is_empty() {
                        continue;
                    }

                    return Some(
                        FlowRecord::from_json_line(text)
                            .map_err(|reason| Error::MalformedRecord { line, reason }),
                    );
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::Io(e)));
                }
            }
        }
        None
    }
}
