use crate::config::{ColumnMapping, PipelineSettings};
use crate::domain::model::RawRecord;
use crate::utils::error::{SourceError, SourceErrorKind};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Up to `chunk_size` consecutive input records.
#[derive(Debug, Clone)]
pub struct RecordChunk {
    /// 1-based position of the chunk in the input.
    pub index: usize,
    pub records: Vec<RawRecord>,
    /// Input bytes consumed once this chunk was read.
    pub bytes_read: u64,
}

impl RecordChunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Lazily reads a delimited input in bounded chunks.
///
/// Only one chunk is held in memory at a time. The first error ends the
/// sequence: after yielding `Err` the iterator returns `None`, so a caller
/// cannot mistake a truncated input for a short one.
pub struct ChunkReader<R: Read> {
    reader: csv::Reader<R>,
    headers: Arc<csv::StringRecord>,
    chunk_size: usize,
    total_bytes: Option<u64>,
    chunks_read: usize,
    finished: bool,
}

impl ChunkReader<BufReader<File>> {
    /// Opens `path`, reporting a missing file as `SourceErrorKind::NotFound`.
    pub fn open_path(path: impl AsRef<Path>, settings: &PipelineSettings) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SourceError::not_found(format!("{}: file not found", path.display())),
            _ => SourceError::io_failure(format!("{}: {}", path.display(), e)),
        })?;
        let total_bytes = file.metadata().ok().map(|m| m.len());

        let mut reader = Self::from_reader(BufReader::new(file), settings)?;
        reader.total_bytes = total_bytes;
        Ok(reader)
    }
}

impl<R: Read> ChunkReader<R> {
    /// Wraps any byte stream. The header row is read and checked immediately.
    pub fn from_reader(input: R, settings: &PipelineSettings) -> Result<Self, SourceError> {
        let delimiter = settings
            .delimiter_byte()
            .map_err(|e| SourceError::malformed_header(e.to_string()))?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let headers = reader
            .headers()
            .map_err(|e| SourceError::malformed_header(format!("unreadable header row: {}", e)))?
            .clone();
        check_headers(&headers, &settings.columns)?;

        Ok(Self {
            reader,
            headers: Arc::new(headers),
            chunk_size: settings.chunk_size.max(1),
            total_bytes: None,
            chunks_read: 0,
            finished: false,
        })
    }

    pub fn headers(&self) -> &csv::StringRecord {
        &self.headers
    }

    /// Size of the input in bytes, when it is a regular file.
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    fn read_chunk(&mut self) -> Result<Option<RecordChunk>, SourceError> {
        let mut records = Vec::with_capacity(self.chunk_size);
        let mut values = csv::StringRecord::new();

        while records.len() < self.chunk_size {
            let more = self.reader.read_record(&mut values).map_err(|e| {
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                SourceError::io_failure(format!("read failed near line {}: {}", line, e))
            })?;
            if !more {
                break;
            }
            // a line with no fields at all (e.g. trailing blank lines) carries no record
            if values.len() == 1 && values.get(0) == Some("") {
                continue;
            }

            let line = values.position().map(|p| p.line()).unwrap_or_default();
            records.push(RawRecord::new(Arc::clone(&self.headers), values.clone(), line));
        }

        if records.is_empty() {
            return Ok(None);
        }

        self.chunks_read += 1;
        Ok(Some(RecordChunk {
            index: self.chunks_read,
            records,
            bytes_read: self.reader.position().byte(),
        }))
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<RecordChunk, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn check_headers(headers: &csv::StringRecord, columns: &ColumnMapping) -> Result<(), SourceError> {
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(SourceError::malformed_header("input has no header row"));
    }

    let missing: Vec<&str> = columns
        .headers()
        .into_iter()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();

    if !missing.is_empty() {
        return Err(SourceError::new(
            SourceErrorKind::MalformedHeader,
            format!(
                "header is missing column(s) {}; found: {}",
                missing.join(", "),
                headers.iter().collect::<Vec<_>>().join(", ")
            ),
        ));
    }

    Ok(())
}

/// Drives a `ChunkReader` on the blocking pool and hands chunks over a bounded channel.
///
/// At most `capacity` chunks wait in the channel, so the reader can run ahead
/// of the committer without the input ever being buffered whole. Dropping the
/// receiver stops the reader at the next chunk boundary.
pub fn spawn_chunk_feed<R>(reader: ChunkReader<R>, capacity: usize) -> mpsc::Receiver<Result<RecordChunk, SourceError>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::task::spawn_blocking(move || {
        for item in reader {
            if tx.blocking_send(item).is_err() {
                tracing::debug!("chunk receiver dropped, stopping reader");
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "Situação;Irmão;Vencimento;Valor;Descrição;Tipo;Forma de Pagamento";

    fn input(rows: usize) -> String {
        let mut text = String::from(HEADER);
        text.push('\n');
        for i in 0..rows {
            text.push_str(&format!("Pago;{};10/05/2024;{},00;mensalidade;fee;pix\n", i, i));
        }
        text
    }

    fn settings(chunk_size: usize) -> PipelineSettings {
        PipelineSettings {
            chunk_size,
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn test_chunks_preserve_order_and_size() {
        let reader = ChunkReader::from_reader(Cursor::new(input(25)), &settings(10)).unwrap();
        let chunks: Vec<RecordChunk> = reader.map(|c| c.unwrap()).collect();

        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![1, 2, 3]);

        let ids: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.records.iter())
            .map(|r| r.get("Irmão").unwrap().to_string())
            .collect();
        assert_eq!(ids, (0..25).map(|i| i.to_string()).collect::<Vec<_>>());

        // bytes are monotonic and end at the input size
        assert!(chunks.windows(2).all(|w| w[0].bytes_read < w[1].bytes_read));
        assert_eq!(chunks.last().unwrap().bytes_read, input(25).len() as u64);
    }

    #[test]
    fn test_header_only_input_yields_no_chunks() {
        let mut reader = ChunkReader::from_reader(Cursor::new(input(0)), &settings(10)).unwrap();
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_records_carry_line_numbers() {
        let mut reader = ChunkReader::from_reader(Cursor::new(input(3)), &settings(10)).unwrap();
        let chunk = reader.next().unwrap().unwrap();
        let lines: Vec<u64> = chunk.records.iter().map(|r| r.line()).collect();
        assert_eq!(lines, vec![2, 3, 4]);
    }

    #[test]
    fn test_missing_column_is_malformed_header() {
        let text = "Situação;Irmão;Vencimento;Valor\n1;Jo;10/05/2024;1,00\n";
        let err = ChunkReader::from_reader(Cursor::new(text), &settings(10)).err().unwrap();
        assert_eq!(err.kind, SourceErrorKind::MalformedHeader);
        assert!(err.message.contains("Descrição"));
        assert!(err.message.contains("Forma de Pagamento"));
    }

    #[test]
    fn test_wrong_delimiter_is_malformed_header() {
        let text = input(2).replace(';', ",");
        let err = ChunkReader::from_reader(Cursor::new(text), &settings(10)).err().unwrap();
        assert_eq!(err.kind, SourceErrorKind::MalformedHeader);
    }

    #[test]
    fn test_empty_input_is_malformed_header() {
        let err = ChunkReader::from_reader(Cursor::new(""), &settings(10)).err().unwrap();
        assert_eq!(err.kind, SourceErrorKind::MalformedHeader);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = ChunkReader::open_path("/definitely/not/here.csv", &settings(10)).err().unwrap();
        assert_eq!(err.kind, SourceErrorKind::NotFound);
    }

    #[test]
    fn test_open_path_knows_total_bytes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), input(4)).unwrap();
        let reader = ChunkReader::open_path(file.path(), &settings(10)).unwrap();
        assert_eq!(reader.total_bytes(), Some(input(4).len() as u64));
    }

    #[test]
    fn test_invalid_utf8_ends_sequence_with_error() {
        let mut bytes = input(3).into_bytes();
        bytes.extend_from_slice(b"Pago;\xff\xfe;10/05/2024;1,00;x;y;z\n");
        bytes.extend_from_slice(b"Pago;9;10/05/2024;1,00;x;y;z\n");

        let mut reader = ChunkReader::from_reader(Cursor::new(bytes), &settings(2)).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().len(), 2);
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::IoFailure);
        // nothing after the failure, not even the valid trailing row
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let text = format!("{}\n\n", input(2));
        let reader = ChunkReader::from_reader(Cursor::new(text), &settings(10)).unwrap();
        let total: usize = reader.map(|c| c.unwrap().len()).sum();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_chunk_feed_delivers_everything_in_order() {
        let reader = ChunkReader::from_reader(Cursor::new(input(23)), &settings(5)).unwrap();
        let mut feed = spawn_chunk_feed(reader, 1);

        let mut indexes = Vec::new();
        let mut rows = 0;
        while let Some(chunk) = feed.recv().await {
            let chunk = chunk.unwrap();
            indexes.push(chunk.index);
            rows += chunk.len();
        }
        assert_eq!(indexes, vec![1, 2, 3, 4, 5]);
        assert_eq!(rows, 23);
    }
}
