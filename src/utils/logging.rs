use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::api::{ChatMessage, Role};

/// Plain-text transcript of a chat, appended as turns complete.
pub struct TranscriptLog {
    path: PathBuf,
}

impl TranscriptLog {
    /// Opens (or creates) `path` for appending; fails early if it is not writable.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        Self::append_handle(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_message(&self, message: &ChatMessage) -> io::Result<()> {
        let file = Self::append_handle(&self.path)?;
        let mut writer = BufWriter::new(file);
        write_entry(&mut writer, message)?;
        writer.flush()
    }

    /// Writes a `## note` line, e.g. when a reply was cut short.
    pub fn log_note(&self, note: &str) -> io::Result<()> {
        let file = Self::append_handle(&self.path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "## {note}")?;
        writeln!(writer)?;
        writer.flush()
    }

    /// Replace the file with exactly `messages`, used after the transcript
    /// was edited in place (resend, clear).
    pub fn rewrite(&self, messages: &[ChatMessage]) -> io::Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp_file = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(temp_file.as_file_mut());
            for message in messages {
                write_entry(&mut writer, message)?;
            }
            writer.flush()?;
        }
        temp_file.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn append_handle(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }
}

fn write_entry(writer: &mut impl Write, message: &ChatMessage) -> io::Result<()> {
    let prefix = match message.role {
        Role::User => "You: ",
        Role::Assistant => "",
        Role::System => "## ",
    };
    let mut lines = message.content.lines();
    if let Some(first) = lines.next() {
        writeln!(writer, "{prefix}{first}")?;
    }
    for line in lines {
        writeln!(writer, "{line}")?;
    }
    // Blank line between entries
    writeln!(writer)
}
