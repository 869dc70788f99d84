//! Quote-aware command line parsing.
//!
//! A job command line is split into pipeline stages on unquoted `|`, every
//! stage gets its `<`/`>` redirections cut out, and a trailing `&` token on
//! the whole line marks the job as background. Nothing here touches the OS.

use std::path::PathBuf;

use crate::config::{MAX_CMDLINE, MAX_STAGES};
use crate::error::ParseError;

const QUOTE: char = '"';
const ESCAPE: char = '\\';
const PIPE: char = '|';
const REDIRECT_IN: char = '<';
const REDIRECT_OUT: char = '>';
const BACKGROUND: &str = "&";

/// Everything needed to spawn one stage of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessDescriptor {
    /// Executable name with any quoting removed.
    pub application: String,
    /// Full argument string, application token included, redirections removed.
    pub arguments: String,
    pub input_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    /// stdin comes from the previous stage.
    pub piped_input: bool,
    /// stdout goes to the next stage.
    pub piped_output: bool,
}

impl ProcessDescriptor {
    /// Argument vector for the OS: quote-aware split with the quotes removed.
    /// The first element is always the application name.
    pub fn argv(&self) -> Vec<String> {
        let mut argv: Vec<String> = Tokens::new(&self.arguments)
            .map(|(start, end)| unquote(&self.arguments[start..end]))
            .collect();
        if argv.is_empty() {
            argv.push(self.application.clone());
        } else {
            argv[0] = self.application.clone();
        }
        argv
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedJob {
    pub stages: Vec<ProcessDescriptor>,
    pub foreground: bool,
    /// The trimmed line as typed, kept for job listings.
    pub command_line: String,
}

#[derive(Clone, Copy, Debug)]
pub struct Parser {
    max_cmdline: usize,
    max_stages: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(MAX_CMDLINE, MAX_STAGES)
    }
}

/// Parses `line` with the default limits.
pub fn parse(line: &str) -> Result<ParsedJob, ParseError> {
    Parser::default().parse(line)
}

impl Parser {
    pub fn new(max_cmdline: usize, max_stages: usize) -> Self {
        Self {
            max_cmdline,
            max_stages,
        }
    }

    pub fn parse(&self, line: &str) -> Result<ParsedJob, ParseError> {
        let len = line.chars().count();
        if len > self.max_cmdline {
            return Err(ParseError::CommandLineTooLong {
                len,
                max: self.max_cmdline,
            });
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyCommandLine);
        }

        let (body, foreground) = split_background(trimmed);
        if body.trim().is_empty() {
            return Err(ParseError::EmptyCommandLine);
        }

        let stage_lines = split_stages(body)?;
        if stage_lines.len() > self.max_stages {
            return Err(ParseError::TooManyStages {
                count: stage_lines.len(),
                max: self.max_stages,
            });
        }

        let last = stage_lines.len() - 1;
        let stages = stage_lines
            .into_iter()
            .enumerate()
            .map(|(i, stage)| parse_stage(stage, i > 0, i < last))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ParsedJob {
            stages,
            foreground,
            command_line: trimmed.to_string(),
        })
    }
}

/// Byte index of the first `target` that is outside double quotes.
/// `\"` never opens or closes a quoted region.
pub fn find_unquoted(s: &str, target: char) -> Option<usize> {
    let mut quoted = false;
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == ESCAPE && matches!(chars.peek(), Some((_, QUOTE))) {
            chars.next();
            continue;
        }
        if c == QUOTE {
            quoted = !quoted;
        } else if c == target && !quoted {
            return Some(i);
        }
    }
    None
}

/// Byte index just past the first whitespace-delimited token of `s`.
/// `s` must not start with whitespace. An unterminated quote runs to the end.
fn token_end(s: &str) -> usize {
    let mut quoted = false;
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == ESCAPE && matches!(chars.peek(), Some((_, QUOTE))) {
            chars.next();
            continue;
        }
        if c == QUOTE {
            quoted = !quoted;
        } else if c.is_whitespace() && !quoted {
            return i;
        }
    }
    s.len()
}

/// Iterator over `(start, end)` byte ranges of the tokens of a string.
struct Tokens<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(s: &'a str) -> Self {
        Self { s, pos: 0 }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.s[self.pos..];
        let skipped = rest.len() - rest.trim_start().len();
        let start = self.pos + skipped;
        if start >= self.s.len() {
            self.pos = self.s.len();
            return None;
        }
        let end = start + token_end(&self.s[start..]);
        self.pos = end;
        Some((start, end))
    }
}

/// Strips a trailing `&` token. Returns the remaining line and whether the
/// job runs in the foreground.
fn split_background(line: &str) -> (&str, bool) {
    match Tokens::new(line).last() {
        Some((start, end)) if &line[start..end] == BACKGROUND => (&line[..start], false),
        _ => (line, true),
    }
}

fn split_stages(line: &str) -> Result<Vec<&str>, ParseError> {
    let mut stages = Vec::new();
    let mut rest = line;
    loop {
        let stage = rest.trim_start();
        match find_unquoted(stage, PIPE) {
            Some(pipe) => {
                let (head, tail) = (&stage[..pipe], &stage[pipe + 1..]);
                if head.trim().is_empty() {
                    return Err(ParseError::EmptyPipeStage);
                }
                stages.push(head);
                rest = tail;
            }
            None => {
                if stage.trim().is_empty() {
                    return Err(ParseError::EmptyPipeStage);
                }
                stages.push(stage);
                return Ok(stages);
            }
        }
    }
}

fn parse_stage(
    stage: &str,
    piped_input: bool,
    piped_output: bool,
) -> Result<ProcessDescriptor, ParseError> {
    let mut arguments = stage.to_string();
    let input_file = take_redirection(&mut arguments, REDIRECT_IN);
    let output_file = take_redirection(&mut arguments, REDIRECT_OUT);

    let arguments = arguments.trim();
    let (start, end) = Tokens::new(arguments)
        .next()
        .ok_or(ParseError::EmptyPipeStage)?;
    let token = &arguments[start..end];
    let application = unquote(token);
    let arguments = if token.contains(QUOTE) {
        format!("{}{}", requote(token), &arguments[end..])
    } else {
        arguments.to_string()
    };

    Ok(ProcessDescriptor {
        application,
        arguments,
        input_file,
        output_file,
        piped_input,
        piped_output,
    })
}

/// Cuts the first unquoted `marker` and the token after it out of `args`.
/// Returns the unquoted file name, if there was one.
fn take_redirection(args: &mut String, marker: char) -> Option<PathBuf> {
    let at = find_unquoted(args, marker)?;
    let after = at + marker.len_utf8();
    let rest = &args[after..];
    let file_start = after + (rest.len() - rest.trim_start().len());
    let file_end = file_start + token_end(&args[file_start..]);
    let file = unquote(&args[file_start..file_end]);
    args.replace_range(at..file_end, " ");
    if file.is_empty() {
        None
    } else {
        Some(PathBuf::from(file))
    }
}

/// Drops unescaped quotes and turns `\"` into `"`.
fn unquote(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE if chars.peek() == Some(&QUOTE) => {
                out.push(QUOTE);
                chars.next();
            }
            QUOTE => {}
            c => out.push(c),
        }
    }
    out
}

/// Merges every quoted run of `token` into one outer quoted run:
/// `"/opt/my dir"/bin` becomes `"/opt/my dir/bin"`.
fn requote(token: &str) -> String {
    let mut out = String::with_capacity(token.len() + 2);
    out.push(QUOTE);
    let mut chars = token.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE if chars.peek() == Some(&QUOTE) => {
                out.push(ESCAPE);
                out.push(QUOTE);
                chars.next();
            }
            QUOTE => {}
            c => out.push(c),
        }
    }
    out.push(QUOTE);
    out
}
