use std::fs;
use std::io;
use std::path::PathBuf;

/// Writes a liveness marker file for the container supervisor. Each
/// long-running command writes its marker once at startup.
#[derive(Clone, Debug)]
pub struct StatusWriter {
    path: PathBuf,
    message: String,
}

impl StatusWriter {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        StatusWriter {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn write(&self) -> Result<(), io::Error> {
        fs::write(&self.path, self.message.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_the_marker_message() {
        let path = std::env::temp_dir().join("delver_status_writer_test");
        let writer = StatusWriter::new(&path, "event watcher starting\n");

        writer.write().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "event watcher starting\n"
        );
        fs::remove_file(&path).unwrap();
    }
}
