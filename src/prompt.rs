use anyhow::{bail, Context, Result};
use std::io::{BufRead, Write};
use std::path::PathBuf;

use crate::config::SourceSpec;

/// Input kind picked at the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChoice {
    File,
    Camera,
}

/// Accepts a line only if it parses as the integer 1 or 2
///
/// The whole trimmed line must be the number: a leading integer followed by
/// other text (`1abc`, `2 2`, `1.5`) is rejected rather than read as its prefix.
pub fn parse_choice(line: &str) -> Option<SourceChoice> {
    match line.trim().parse::<i64>() {
        Ok(1) => Some(SourceChoice::File),
        Ok(2) => Some(SourceChoice::Camera),
        _ => None,
    }
}

/// Ask for the input source until a valid choice is entered.
///
/// A file choice reads one more line as the path, with only the line
/// ending removed. `camera_index` is used when the camera is chosen.
pub fn prompt_source<R, W>(input: &mut R, output: &mut W, camera_index: u32) -> Result<SourceSpec>
where
    R: BufRead,
    W: Write,
{
    let choice = loop {
        writeln!(output, "Enter 1 for a video file, or 2 for using the webcam.")?;
        output.flush()?;

        let line = read_line(input)?
            .context("Console input closed before a valid choice was entered")?;

        match parse_choice(&line) {
            Some(choice) => break choice,
            None => writeln!(output, "Invalid number, please try again")?,
        }
    };

    let number = match choice {
        SourceChoice::File => 1,
        SourceChoice::Camera => 2,
    };
    writeln!(output, "You entered: {}\n", number)?;

    match choice {
        SourceChoice::File => {
            writeln!(output, "Enter the full file path of the video file.")?;
            output.flush()?;
            let Some(path) = read_line(input)? else {
                bail!("Console input closed before a file path was entered");
            };
            Ok(SourceSpec::File(PathBuf::from(path)))
        }
        SourceChoice::Camera => Ok(SourceSpec::Camera(camera_index)),
    }
}

/// One line without its terminator, or `None` at end of input
fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .context("Failed to read console input")?;
    if read == 0 {
        return Ok(None);
    }

    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}
