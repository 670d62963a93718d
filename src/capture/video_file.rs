use super::CaptureSource;
use crate::error::SourceError;
use anyhow::Result;
use image::RgbImage;
use std::ffi::OsString;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

const COMMON_TOOL_DIRS: [&str; 3] = ["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

/// Frames decoded from a video file by an `ffmpeg` child process
///
/// The decoder writes raw `rgb24` frames to its stdout; frame geometry comes
/// from `ffprobe` before decoding starts.
pub struct VideoFileCapture {
    path: PathBuf,
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    frames_read: u64,
    finished: bool,
}

impl VideoFileCapture {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        tracing::info!("Opening video file {}", path.display());

        if is_local_path(path) && !path.is_file() {
            return Err(open_error(path, "no such file"));
        }

        let ffprobe = find_executable("ffprobe")?;
        let ffmpeg = find_executable("ffmpeg")?;
        let (width, height) = probe_dimensions(&ffprobe, path)?;

        let mut child = Command::new(&ffmpeg)
            .args(decoder_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| open_error(path, format!("failed to start ffmpeg: {}", e)))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(open_error(path, "decoder has no output pipe"));
        };

        tracing::info!("Decoding {} at {}x{}", path.display(), width, height);

        Ok(Self {
            path: path.to_path_buf(),
            child,
            stdout: BufReader::new(stdout),
            width,
            height,
            frames_read: 0,
            finished: false,
        })
    }

    /// Decoder exit status, once it has finished writing
    fn decoder_failed(&mut self) -> Option<String> {
        match self.child.wait() {
            Ok(status) if status.success() => None,
            Ok(status) => Some(format!("decoder exited with {}", status)),
            Err(e) => Some(format!("failed to wait for decoder: {}", e)),
        }
    }
}

impl CaptureSource for VideoFileCapture {
    fn capture_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
        let read = read_frame(&mut self.stdout, &mut buffer).map_err(|e| SourceError::Read {
            source_name: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        match read {
            FrameRead::Complete => {
                self.frames_read += 1;
                let frame = RgbImage::from_raw(self.width, self.height, buffer).ok_or_else(|| {
                    SourceError::Read {
                        source_name: self.path.display().to_string(),
                        reason: "frame buffer does not match frame size".to_string(),
                    }
                })?;
                Ok(Some(frame))
            }
            FrameRead::Truncated(bytes) => {
                tracing::warn!(
                    "Dropping truncated final frame ({} of {} bytes)",
                    bytes,
                    buffer.len()
                );
                self.finished = true;
                Ok(None)
            }
            FrameRead::Eof => {
                self.finished = true;
                if let Some(reason) = self.decoder_failed() {
                    if self.frames_read == 0 {
                        return Err(open_error(&self.path, reason).into());
                    }
                    tracing::warn!("{}", reason);
                }
                tracing::info!(
                    "Reached end of {} after {} frames",
                    self.path.display(),
                    self.frames_read
                );
                Ok(None)
            }
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for VideoFileCapture {
    fn drop(&mut self) {
        if self.child.try_wait().ok().flatten().is_none() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum FrameRead {
    Complete,
    Truncated(usize),
    Eof,
}

/// Fill `buffer` with one frame, telling a clean end of stream from a cut-off frame
fn read_frame<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<FrameRead> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(match filled {
        0 => FrameRead::Eof,
        n if n == buffer.len() => FrameRead::Complete,
        n => FrameRead::Truncated(n),
    })
}

/// Decoder arguments whose output geometry matches what `probe_dimensions` reports
fn decoder_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_os_string());
    args.extend(
        ["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

/// Stream URLs and numbered image sequences are left for ffprobe to resolve
fn is_local_path(path: &Path) -> bool {
    let text = path.to_string_lossy();
    !text.contains("://") && !text.contains('%')
}

fn open_error(path: &Path, reason: impl Into<String>) -> SourceError {
    SourceError::Open {
        source_name: path.display().to_string(),
        reason: reason.into(),
    }
}

fn find_executable(name: &'static str) -> Result<PathBuf, SourceError> {
    // Try to find it in PATH
    if let Ok(output) = Command::new("which").arg(name).output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }

    COMMON_TOOL_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| candidate.exists())
        .ok_or(SourceError::ToolMissing(name))
}

fn probe_dimensions(ffprobe: &Path, path: &Path) -> Result<(u32, u32), SourceError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0:s=x",
        ])
        .arg(path)
        .output()
        .map_err(|e| open_error(path, format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(open_error(path, format!("ffprobe failed: {}", stderr.trim())));
    }

    parse_dimensions(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| open_error(path, "no decodable video stream"))
}

/// Parse ffprobe's `WIDTHxHEIGHT` line
fn parse_dimensions(probe_output: &str) -> Option<(u32, u32)> {
    let line = probe_output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split('x').filter(|p| !p.is_empty());
    let width = parts.next()?.parse::<u32>().ok()?;
    let height = parts.next()?.parse::<u32>().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}
