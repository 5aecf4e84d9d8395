//! Fixtures shared by the analyzer benchmarks.

/// Which analyzer a fixture is fed to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeadKind {
    Request,
    Response,
}

/// A message head read from `resources/`.
#[derive(Debug, Copy, Clone)]
pub struct HeadFile {
    file_name: &'static str,
    kind: HeadKind,
    content: &'static str,
}

impl HeadFile {
    pub const fn request(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, kind: HeadKind::Request, content }
    }

    pub const fn response(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, kind: HeadKind::Response, content }
    }

    pub fn bytes(&self) -> &'static [u8] {
        self.content.as_bytes()
    }

    pub fn kind(&self) -> HeadKind {
        self.kind
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }
}

/// A fixture delivered whole, or in chunks of `chunk` bytes.
#[derive(Debug, Copy, Clone)]
pub struct BenchCase {
    name: &'static str,
    file: HeadFile,
    chunk: Option<usize>,
}

impl BenchCase {
    pub fn whole(name: &'static str, file: HeadFile) -> Self {
        Self { name, file, chunk: None }
    }

    pub fn chunked(name: &'static str, file: HeadFile, chunk: usize) -> Self {
        Self { name, file, chunk: Some(chunk.max(1)) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn file(&self) -> &HeadFile {
        &self.file
    }

    /// Splits the fixture the way it is delivered to the analyzer.
    pub fn pieces(&self) -> impl Iterator<Item = &'static [u8]> {
        let bytes = self.file.bytes();
        bytes.chunks(self.chunk.unwrap_or(bytes.len().max(1)))
    }
}
