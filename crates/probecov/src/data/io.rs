//! Execution data stream format.
//!
//! A stream is a sequence of blocks, each starting with a type byte:
//!
//! | block | content |
//! |---|---|
//! | `0x01` header | magic `0xC0C0` (u16), version (u16) |
//! | `0x10` session | id (UTF), start (i64), dump (i64) |
//! | `0x11` execution data | class id (i64), name (UTF), kind (u8), probes |
//!
//! Probes of kind `0` (flags) are a varint length followed by bits packed
//! LSB first; kind `1` (counts) is a varint length followed by one varint
//! per probe. Integers are big endian, strings are length-prefixed modified
//! UTF-8. Streams may be concatenated, so headers can repeat.

use super::execution_data::ExecutionData;
use super::probes::ProbeArray;
use super::session::{SessionInfo, SessionInfoStore};
use super::store::ExecutionDataStore;
use crate::classfile::mutf8;
use crate::config::ProbeMode;
use crate::result::{CoverageError, CoverageResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Header block type
pub const BLOCK_HEADER: u8 = 0x01;
/// Session info block type
pub const BLOCK_SESSION_INFO: u8 = 0x10;
/// Execution data block type
pub const BLOCK_EXECUTION_DATA: u8 = 0x11;
/// Header magic number
pub const MAGIC_NUMBER: u16 = 0xC0C0;
/// Stream format version
pub const FORMAT_VERSION: u16 = 0x1010;

/// Receives the records of an execution data stream
pub trait ExecDataVisitor {
    /// A session record
    fn visit_session_info(&mut self, info: &SessionInfo) -> CoverageResult<()> {
        let _ = info;
        Ok(())
    }

    /// A class record
    fn visit_class_execution(&mut self, data: &ExecutionData) -> CoverageResult<()>;
}

/// Writes execution data blocks
#[derive(Debug)]
pub struct ExecDataWriter<W: Write> {
    out: W,
}

impl<W: Write> ExecDataWriter<W> {
    /// Start a stream, writing the header block
    pub fn new(mut out: W) -> CoverageResult<Self> {
        out.write_u8(BLOCK_HEADER)?;
        out.write_u16::<BigEndian>(MAGIC_NUMBER)?;
        out.write_u16::<BigEndian>(FORMAT_VERSION)?;
        Ok(Self { out })
    }

    /// Write a session block
    pub fn write_session_info(&mut self, info: &SessionInfo) -> CoverageResult<()> {
        self.out.write_u8(BLOCK_SESSION_INFO)?;
        write_utf(&mut self.out, &info.id)?;
        self.out.write_i64::<BigEndian>(info.start)?;
        self.out.write_i64::<BigEndian>(info.dump)?;
        Ok(())
    }

    /// Write a class block; entries without hits are skipped
    pub fn write_execution_data(&mut self, data: &ExecutionData) -> CoverageResult<()> {
        if !data.has_hits() {
            return Ok(());
        }
        self.out.write_u8(BLOCK_EXECUTION_DATA)?;
        self.out.write_i64::<BigEndian>(data.id() as i64)?;
        write_utf(&mut self.out, data.name())?;
        let probes = data.probes();
        self.out.write_u8(probes.mode().tag())?;
        match probes {
            ProbeArray::Flags(_) => write_flags(&mut self.out, &probes.covered())?,
            ProbeArray::Counts(_) => {
                let counts = probes.counts();
                write_var_int(&mut self.out, counts.len() as u32)?;
                for count in counts {
                    write_var_int(&mut self.out, count)?;
                }
            }
        }
        Ok(())
    }

    /// Flush the underlying writer
    pub fn flush(&mut self) -> CoverageResult<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ExecDataVisitor for ExecDataWriter<W> {
    fn visit_session_info(&mut self, info: &SessionInfo) -> CoverageResult<()> {
        self.write_session_info(info)
    }

    fn visit_class_execution(&mut self, data: &ExecutionData) -> CoverageResult<()> {
        self.write_execution_data(data)
    }
}

/// Reads execution data blocks
#[derive(Debug)]
pub struct ExecDataReader<R: Read> {
    input: R,
    first_block: bool,
}

impl<R: Read> ExecDataReader<R> {
    /// Wrap a reader positioned at the start of a stream
    pub fn new(input: R) -> Self {
        Self {
            input,
            first_block: true,
        }
    }

    /// Read every block until end of input
    pub fn read(&mut self, visitor: &mut dyn ExecDataVisitor) -> CoverageResult<()> {
        loop {
            let block = match self.input.read_u8() {
                Ok(block) => block,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            if self.first_block && block != BLOCK_HEADER {
                return Err(CoverageError::invalid_exec_data("missing header block"));
            }
            self.first_block = false;
            self.read_block(block, visitor).map_err(truncation)?;
        }
    }

    fn read_block(&mut self, block: u8, visitor: &mut dyn ExecDataVisitor) -> CoverageResult<()> {
        match block {
            BLOCK_HEADER => {
                let magic = self.input.read_u16::<BigEndian>()?;
                if magic != MAGIC_NUMBER {
                    return Err(CoverageError::invalid_exec_data(format!(
                        "bad magic number 0x{magic:04x}"
                    )));
                }
                let version = self.input.read_u16::<BigEndian>()?;
                if version != FORMAT_VERSION {
                    return Err(CoverageError::IncompatibleExecVersion { version });
                }
                Ok(())
            }
            BLOCK_SESSION_INFO => {
                let id = read_utf(&mut self.input)?;
                let start = self.input.read_i64::<BigEndian>()?;
                let dump = self.input.read_i64::<BigEndian>()?;
                visitor.visit_session_info(&SessionInfo::new(id, start, dump))
            }
            BLOCK_EXECUTION_DATA => {
                let id = self.input.read_i64::<BigEndian>()? as u64;
                let name = read_utf(&mut self.input)?;
                let tag = self.input.read_u8()?;
                let probes = match ProbeMode::from_tag(tag) {
                    Some(ProbeMode::Exists) => ProbeArray::from_flags(&read_flags(&mut self.input)?),
                    Some(ProbeMode::Count) => {
                        let len = read_var_int(&mut self.input)?;
                        let mut counts = Vec::with_capacity((len as usize).min(1 << 16));
                        for _ in 0..len {
                            counts.push(read_var_int(&mut self.input)?);
                        }
                        ProbeArray::from_counts(&counts)
                    }
                    None => return Err(CoverageError::UnknownProbeKind { tag }),
                };
                visitor.visit_class_execution(&ExecutionData::with_probes(id, name, probes))
            }
            other => Err(CoverageError::invalid_exec_data(format!(
                "unknown block type 0x{other:02x}"
            ))),
        }
    }
}

fn truncation(err: CoverageError) -> CoverageError {
    match err {
        CoverageError::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
            CoverageError::invalid_exec_data("truncated block")
        }
        other => other,
    }
}

fn write_utf(out: &mut impl Write, value: &str) -> CoverageResult<()> {
    let bytes = mutf8::encode(value);
    let len = u16::try_from(bytes.len())
        .map_err(|_| CoverageError::invalid_exec_data("string too long"))?;
    out.write_u16::<BigEndian>(len)?;
    out.write_all(&bytes)?;
    Ok(())
}

fn read_utf(input: &mut impl Read) -> CoverageResult<String> {
    let len = input.read_u16::<BigEndian>()?;
    let mut bytes = vec![0u8; usize::from(len)];
    input.read_exact(&mut bytes)?;
    mutf8::decode(&bytes).map_err(|e| CoverageError::invalid_exec_data(e.to_string()))
}

/// Write an unsigned varint: 7 bits per byte, low group first
pub fn write_var_int(out: &mut impl Write, mut value: u32) -> io::Result<()> {
    while value & !0x7F != 0 {
        out.write_u8((value & 0x7F) as u8 | 0x80)?;
        value >>= 7;
    }
    out.write_u8(value as u8)
}

/// Read an unsigned varint written by [`write_var_int`]
pub fn read_var_int(input: &mut impl Read) -> CoverageResult<u32> {
    let mut value = 0u32;
    for shift in (0..35).step_by(7) {
        let byte = input.read_u8()?;
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CoverageError::invalid_exec_data("varint too long"))
}

fn write_flags(out: &mut impl Write, flags: &[bool]) -> CoverageResult<()> {
    write_var_int(out, flags.len() as u32)?;
    for chunk in flags.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (bit, set)| acc | (u8::from(*set) << bit));
        out.write_u8(byte)?;
    }
    Ok(())
}

fn read_flags(input: &mut impl Read) -> CoverageResult<Vec<bool>> {
    let len = read_var_int(input)? as usize;
    let mut flags = Vec::with_capacity(len.min(1 << 16));
    let mut byte = 0u8;
    for index in 0..len {
        if index % 8 == 0 {
            byte = input.read_u8()?;
        }
        flags.push(byte & (1 << (index % 8)) != 0);
    }
    Ok(flags)
}

/// Loads exec files into one store and writes them back
#[derive(Debug, Default)]
pub struct ExecFileLoader {
    store: ExecutionDataStore,
    sessions: SessionInfoStore,
}

impl ExecFileLoader {
    /// Create an empty loader
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a stream, merging its content into the loader
    pub fn load_reader(&mut self, input: impl Read) -> CoverageResult<()> {
        ExecDataReader::new(input).read(self)
    }

    /// Read an exec file
    pub fn load(&mut self, path: &Path) -> CoverageResult<()> {
        debug!(path = %path.display(), "loading execution data");
        self.load_reader(BufReader::new(File::open(path)?))
    }

    /// Write everything as one stream
    pub fn write_to(&self, out: impl Write) -> CoverageResult<()> {
        let mut writer = ExecDataWriter::new(out)?;
        for info in self.sessions.infos() {
            writer.write_session_info(&info)?;
        }
        self.store.accept(&mut writer)?;
        writer.flush()
    }

    /// Write an exec file, appending to an existing one if `append` is set
    pub fn save(&self, path: &Path, append: bool) -> CoverageResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        self.write_to(BufWriter::new(file))
    }

    /// Loaded execution data
    #[must_use]
    pub const fn store(&self) -> &ExecutionDataStore {
        &self.store
    }

    /// Loaded sessions
    #[must_use]
    pub const fn sessions(&self) -> &SessionInfoStore {
        &self.sessions
    }
}

impl ExecDataVisitor for ExecFileLoader {
    fn visit_session_info(&mut self, info: &SessionInfo) -> CoverageResult<()> {
        self.sessions.add(info.clone());
        Ok(())
    }

    fn visit_class_execution(&mut self, data: &ExecutionData) -> CoverageResult<()> {
        self.store.put(data.snapshot())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::io::Cursor;

    #[derive(Debug, Default)]
    struct Recorder {
        sessions: Vec<SessionInfo>,
        classes: Vec<(u64, String, Vec<u32>, ProbeMode)>,
    }

    impl ExecDataVisitor for Recorder {
        fn visit_session_info(&mut self, info: &SessionInfo) -> CoverageResult<()> {
            self.sessions.push(info.clone());
            Ok(())
        }

        fn visit_class_execution(&mut self, data: &ExecutionData) -> CoverageResult<()> {
            self.classes.push((
                data.id(),
                data.name().to_string(),
                data.probes().counts(),
                data.probes().mode(),
            ));
            Ok(())
        }
    }

    fn read_all(bytes: &[u8]) -> CoverageResult<Recorder> {
        let mut recorder = Recorder::default();
        ExecDataReader::new(Cursor::new(bytes)).read(&mut recorder)?;
        Ok(recorder)
    }

    #[test]
    fn test_header_bytes() {
        let writer = ExecDataWriter::new(Vec::new()).unwrap();
        assert_eq!(writer.into_inner(), vec![0x01, 0xC0, 0xC0, 0x10, 0x10]);
    }

    #[test]
    fn test_flags_are_packed_lsb_first() {
        let mut writer = ExecDataWriter::new(Vec::new()).unwrap();
        let flags = [true, false, true, false, false, false, false, false, true];
        writer
            .write_execution_data(&ExecutionData::with_probes(
                0x10,
                "a",
                ProbeArray::from_flags(&flags),
            ))
            .unwrap();
        let bytes = writer.into_inner();
        // header, block, id, name "a", kind, len 9, bits
        assert_eq!(
            &bytes[5..],
            &[0x11, 0, 0, 0, 0, 0, 0, 0, 0x10, 0, 1, b'a', 0, 9, 0b0000_0101, 0b0000_0001]
        );
    }

    #[test]
    fn test_concatenated_streams() {
        let mut bytes = Vec::new();
        for (session, id) in [("s1", 1u64), ("s2", 2u64)] {
            let mut writer = ExecDataWriter::new(Vec::new()).unwrap();
            writer
                .write_session_info(&SessionInfo::new(session, 10, 20))
                .unwrap();
            writer
                .write_execution_data(&ExecutionData::with_probes(
                    id,
                    "p/C",
                    ProbeArray::from_counts(&[0, 300]),
                ))
                .unwrap();
            bytes.extend(writer.into_inner());
        }
        let recorder = read_all(&bytes).unwrap();
        assert_eq!(recorder.sessions.len(), 2);
        assert_eq!(recorder.classes.len(), 2);
        assert_eq!(recorder.classes[1].2, vec![0, 300]);
        assert_eq!(recorder.classes[1].3, ProbeMode::Count);
    }

    #[test]
    fn test_unknown_probe_kind_is_fatal() {
        let mut bytes = ExecDataWriter::new(Vec::new()).unwrap().into_inner();
        bytes.extend_from_slice(&[0x11, 0, 0, 0, 0, 0, 0, 0, 1, 0, 1, b'a', 9, 0]);
        let err = read_all(&bytes).unwrap_err();
        assert!(matches!(err, CoverageError::UnknownProbeKind { tag: 9 }));
    }

    #[test]
    fn test_first_block_must_be_header() {
        let err = read_all(&[0x10, 0, 0]).unwrap_err();
        assert!(matches!(err, CoverageError::InvalidExecData { .. }));
    }

    #[test]
    fn test_version_check() {
        let err = read_all(&[0x01, 0xC0, 0xC0, 0x10, 0x07]).unwrap_err();
        assert!(matches!(
            err,
            CoverageError::IncompatibleExecVersion { version: 0x1007 }
        ));
    }

    #[test]
    fn test_unknown_block() {
        let err = read_all(&[0x01, 0xC0, 0xC0, 0x10, 0x10, 0x7F]).unwrap_err();
        assert!(matches!(err, CoverageError::InvalidExecData { .. }));
    }

    #[test]
    fn test_truncated_block() {
        let err = read_all(&[0x01, 0xC0, 0xC0, 0x10, 0x10, 0x10, 0x00]).unwrap_err();
        assert!(matches!(err, CoverageError::InvalidExecData { .. }));
    }

    #[test]
    fn test_empty_stream_is_accepted() {
        let recorder = read_all(&[]).unwrap();
        assert!(recorder.classes.is_empty());
    }

    #[test]
    fn test_var_int_boundaries() {
        for value in [0u32, 0x7F, 0x80, 0x3FFF, 0x4000, u32::MAX] {
            let mut buf = Vec::new();
            write_var_int(&mut buf, value).unwrap();
            assert_eq!(read_var_int(&mut Cursor::new(buf)).unwrap(), value);
        }
    }

    #[test]
    fn test_loader_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probecov.exec");

        let mut loader = ExecFileLoader::new();
        loader.sessions.add(SessionInfo::new("run", 1, 2));
        loader
            .store
            .put(ExecutionData::with_probes(
                5,
                "a/A",
                ProbeArray::from_flags(&[true, false]),
            ))
            .unwrap();
        loader.save(&path, false).unwrap();
        loader.save(&path, true).unwrap();

        let mut reloaded = ExecFileLoader::new();
        reloaded.load(&path).unwrap();
        assert_eq!(reloaded.sessions().infos().len(), 2);
        assert_eq!(reloaded.store().len(), 1);
        assert_eq!(
            reloaded.store().get(5).unwrap().probes().covered(),
            vec![true, false]
        );
    }
}
