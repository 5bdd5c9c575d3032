use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};

const BUFFER_SIZE: usize = 64 * 1024;

/// Buffered input from a file or, for "-", from stdin.
pub struct InputReader {
    reader: Box<dyn BufRead + Send>,
    is_pipe: bool,
    len: Option<u64>,
}

impl InputReader {
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path = input_path.as_ref();
        let is_pipe = path.to_string_lossy() == "-";

        let (reader, len): (Box<dyn BufRead + Send>, _) = if is_pipe {
            (Box::new(BufReader::with_capacity(BUFFER_SIZE, io::stdin())), None)
        } else {
            let file = File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let len = file.metadata().ok().map(|m| m.len());
            (Box::new(BufReader::with_capacity(BUFFER_SIZE, file)), len)
        };

        Ok(Self {
            reader,
            is_pipe,
            len,
        })
    }

    pub fn is_pipe(&self) -> bool {
        self.is_pipe
    }

    /// Size of the input if it is a regular file.
    pub fn len(&self) -> Option<u64> {
        self.len
    }
}

impl Read for InputReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl BufRead for InputReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}
