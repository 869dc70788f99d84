use std::io::{self, Write};

/// The shell's own output and error streams plus its prompt.
pub struct Console {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    prompt: String,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>, prompt: &str) -> Self {
        Self {
            out,
            err,
            prompt: prompt.to_string(),
        }
    }

    pub fn stdio(prompt: &str) -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()), prompt)
    }

    pub fn out(&mut self) -> &mut dyn Write {
        &mut self.out
    }

    pub fn prompt(&mut self) -> io::Result<()> {
        if self.prompt.is_empty() {
            return Ok(());
        }
        self.out.write_all(self.prompt.as_bytes())?;
        self.out.flush()
    }

    /// One-line diagnostic on the error stream.
    pub fn error(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.err, "{}", text)?;
        self.err.flush()
    }
}
