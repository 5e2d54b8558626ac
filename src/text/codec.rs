//! Chunked full-text compression.
//!
//! Files are read in bounded chunks that end on a line break, validated as
//! UTF-8 (with lossy conversion as the fallback), tokenised into the word
//! map, and streamed through a zlib encoder. Reading stops at
//! `MAX_INDEX_TEXT_LENGTH` decoded bytes. The stored byte sequence is
//! losslessly round-trippable through [`decompress`].

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::text::parser::{parse_text, WordMap, WordParseConfig};

pub const TEXT_BUFFER: usize = 64 * 1024;
pub const MAX_INDEX_TEXT_LENGTH: usize = 1024 * 1024;
const MAX_ITERATIONS: usize = 10000;

/// One-shot compression of an in-memory string, same framing as
/// [`compress_file`].
pub fn compress_text(text: &str) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(e.to_string()))
}

/// Inverse of the compressor; rejects blobs that do not decode to UTF-8.
pub fn decompress(data: &[u8]) -> Result<String> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| Error::Compression(e.to_string()))?;
    Ok(out)
}

/// Read `path` in chunks, scoring tokens into `words` and compressing the
/// text. Returns the blob, or `None` for content too small to store.
///
/// Word scores accumulate into the caller's map as chunks are read, so on a
/// compression error everything tokenised before the abort is kept; only the
/// blob is skipped. `throttle` in [0..99] sleeps `throttle * 100` µs between
/// chunks when above 9, keeping the disk responsive during bulk indexing.
pub fn compress_file(
    path: &Path,
    cfg: &WordParseConfig,
    throttle: u32,
    words: &mut WordMap,
) -> Result<Option<Vec<u8>>> {
    let mut file = std::fs::File::open(path)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());

    let mut buf = vec![0u8; TEXT_BUFFER];
    let mut bytes_read = 0usize;
    let mut iterations = 0usize;
    let mut finished = false;

    while !finished {
        iterations += 1;
        if iterations > MAX_ITERATIONS {
            return Err(Error::Compression("too many iterations".to_string()));
        }

        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }

        let mut chunk = &buf[..n];
        if n == TEXT_BUFFER {
            // rewind to the last line break so the chunk ends on a word
            // boundary; a chunk with no break at all ends extraction
            match chunk.iter().rposition(|&b| b == b'\n') {
                Some(pos) => {
                    let backtrack = (n - pos) as i64;
                    file.seek(SeekFrom::Current(-backtrack))?;
                    chunk = &chunk[..pos];
                }
                None => {
                    return Err(Error::Compression(
                        "no line break in text chunk".to_string(),
                    ));
                }
            }
        } else {
            finished = true;
        }

        let text = match std::str::from_utf8(chunk) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let converted = String::from_utf8_lossy(chunk).into_owned();
                if converted.is_empty() {
                    return Err(Error::Compression(
                        "could not convert text to valid utf8".to_string(),
                    ));
                }
                converted
            }
        };

        bytes_read += text.len();
        parse_text(words, &text, 1, cfg, true, false);
        encoder
            .write_all(text.as_bytes())
            .map_err(|e| Error::Compression(e.to_string()))?;

        if bytes_read >= MAX_INDEX_TEXT_LENGTH {
            finished = true;
        }

        if throttle > 9 {
            std::thread::sleep(Duration::from_micros(u64::from(throttle) * 100));
        }
    }

    let compressed = encoder
        .finish()
        .map_err(|e| Error::Compression(e.to_string()))?;

    Ok(if bytes_read > 2 {
        Some(compressed)
    } else {
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_small() {
        let text = "hello world\nsecond line & <tags>\n";
        let compressed = compress_text(text).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), text);
    }

    #[test]
    fn round_trip_large_multibyte() {
        let mut text = String::new();
        for i in 0..20000 {
            text.push_str(&format!("zeile {i} mit wörtern über ähnliche straßen\n"));
        }
        let compressed = compress_text(&text).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), text);
    }

    #[test]
    fn file_pipeline_counts_words_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello world hello\n").unwrap();

        let mut words = WordMap::new();
        let blob = compress_file(&path, &WordParseConfig::default(), 0, &mut words)
            .unwrap()
            .unwrap();
        assert_eq!(words.get("hello"), Some(&2));
        assert_eq!(words.get("world"), Some(&1));
        assert_eq!(decompress(&blob).unwrap(), "hello world hello\n");
    }

    #[test]
    fn chunks_end_on_line_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        let mut expected = String::new();
        // several chunks worth of lines
        for i in 0..12000 {
            let line = format!("line number {i} with some repeated payload text\n");
            expected.push_str(&line);
            file.write_all(line.as_bytes()).unwrap();
        }
        drop(file);

        let mut words = WordMap::new();
        let blob = compress_file(&path, &WordParseConfig::default(), 0, &mut words)
            .unwrap()
            .unwrap();
        let decoded = decompress(&blob).unwrap();
        assert!(expected.starts_with(&decoded) || decoded == expected);
        assert!(decoded.len() >= MAX_INDEX_TEXT_LENGTH.min(expected.len()) / 2);
        assert!(decoded.ends_with('\n'));
        assert!(words.contains_key("payload"));
    }

    #[test]
    fn invalid_utf8_falls_back_to_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, b"caf\xe9 ole word\n").unwrap();

        let mut words = WordMap::new();
        let blob =
            compress_file(&path, &WordParseConfig::default(), 0, &mut words).unwrap();
        assert!(blob.is_some());
        assert!(words.contains_key("word"));
    }

    #[test]
    fn tiny_files_store_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.txt");
        std::fs::write(&path, "a\n").unwrap();

        let mut words = WordMap::new();
        let blob =
            compress_file(&path, &WordParseConfig::default(), 0, &mut words).unwrap();
        assert!(blob.is_none());
    }

    #[test]
    fn abort_keeps_words_from_earlier_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        // a chunk's worth of normal lines, then one endless row
        for _ in 0..500 {
            file.write_all(b"alpha beta gamma\n").unwrap();
        }
        file.write_all("x".repeat(2 * TEXT_BUFFER).as_bytes())
            .unwrap();
        drop(file);

        let mut words = WordMap::new();
        let err = compress_file(&path, &WordParseConfig::default(), 0, &mut words);
        assert!(matches!(err, Err(Error::Compression(_))));
        // the blob is skipped but the scored tokens survive
        assert_eq!(words.get("alpha"), Some(&500));
        assert_eq!(words.get("beta"), Some(&500));
    }
}
