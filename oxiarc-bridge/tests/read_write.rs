//! End-to-end tests: archives written through `ArchiveWriter` and read back
//! through `ArchiveReader` with the frame engine.

mod common;

use common::{EngineStats, FrameBuilder, FrameReader, FrameWriter, collect_entries};
use oxiarc_bridge::{
    ArchiveReader, ArchiveWriter, EntryHeader, OxiArcError, ReaderOptions, ReaderState,
    SeekableStream, SequentialStream, SinkStream, WriterOptions,
};
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn write_archive(files: &[(&str, &[u8])]) -> Result<Vec<u8>, OxiArcError> {
    let mut writer = ArchiveWriter::new(
        FrameWriter::default(),
        SinkStream::new(Vec::new()),
        WriterOptions::default(),
    )?;
    for (path, data) in files {
        writer.add_file(path, data)?;
    }
    Ok(writer.into_inner()?.into_inner())
}

fn open(bytes: Vec<u8>, options: ReaderOptions) -> (ArchiveReader<FrameReader>, Arc<EngineStats>) {
    let (engine, stats) = FrameReader::new();
    let reader = ArchiveReader::open(engine, SeekableStream::new(Cursor::new(bytes)), options)
        .expect("open archive");
    (reader, stats)
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_two_entries_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = write_archive(&[("test1.txt", b"Hello world"), ("test2.txt", b"Hello again")])?;

    let (mut reader, stats) = open(bytes, ReaderOptions::default());
    let entries = collect_entries(&mut reader)?;

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "test1.txt");
    assert_eq!(entries[0].1, b"Hello world");
    assert_eq!(entries[1].0, "test2.txt");
    assert_eq!(entries[1].1, b"Hello again");
    assert!(entries.iter().all(|(_, data)| data.len() == 11));
    assert_eq!(reader.state(), ReaderState::Finished);
    assert_eq!(stats.released.load(Ordering::SeqCst), 2);

    reader.close()?;
    assert!(matches!(
        reader.next_entry(),
        Err(OxiArcError::AlreadyDisposed { .. })
    ));
    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_large_entry_through_small_buffers() -> Result<(), Box<dyn std::error::Error>> {
    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let bytes = write_archive(&[("big.bin", &data), ("tail.txt", b"tail")])?;

    let (mut reader, _) = open(bytes, ReaderOptions::new().with_buffer_size(7));
    let entries = collect_entries(&mut reader)?;
    assert_eq!(entries[0].1, data);
    assert_eq!(entries[1].1, b"tail");
    Ok(())
}

#[test]
fn test_sequential_source() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = write_archive(&[("a", b"alpha"), ("b", b"beta"), ("c", b"gamma")])?;
    let (engine, _) = FrameReader::new();
    let mut reader = ArchiveReader::open(
        engine,
        SequentialStream::new(Cursor::new(bytes)),
        ReaderOptions::new().with_skip_seek_threshold(0),
    )?;

    reader.next_entry()?.expect("entry a");
    let mut entry = reader.next_entry()?.expect("entry b");
    assert_eq!(entry.read_to_vec()?, b"beta");
    drop(entry);
    let mut entry = reader.next_entry()?.expect("entry c");
    assert_eq!(entry.read_to_vec()?, b"gamma");
    Ok(())
}

#[test]
fn test_directory_and_unsized_entries() -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = ArchiveWriter::new(
        FrameWriter::default(),
        SinkStream::new(Vec::new()),
        WriterOptions::default(),
    )?;
    writer.add_directory("docs/")?;
    let mut header = EntryHeader::file("docs/stream.log", 0);
    header.size = None;
    let mut data: &[u8] = b"spooled bytes";
    writer.add_header(header, Some(&mut data))?;
    let bytes = writer.into_inner()?.into_inner();

    let (mut reader, _) = open(bytes, ReaderOptions::default());
    {
        let mut dir = reader.next_entry()?.expect("directory");
        assert!(dir.header().is_dir());
        assert!(dir.read_to_vec()?.is_empty());
    }
    let mut file = reader.next_entry()?.expect("file");
    assert_eq!(file.header().size, Some(13));
    assert_eq!(file.read_to_vec()?, b"spooled bytes");
    Ok(())
}

// ============================================================================
// Draining
// ============================================================================

#[test]
fn test_ignored_entry_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let a = vec![b'a'; 1000];
    let b = vec![b'b'; 1000];
    let c = vec![b'c'; 1000];
    let bytes = FrameBuilder::new()
        .chunked("a", &a, 100)
        .chunked("b", &b, 100)
        .chunked("c", &c, 100)
        .build();

    let (mut reader, stats) = open(bytes, ReaderOptions::default());
    assert_eq!(reader.next_entry()?.expect("entry 0").read_to_vec()?, a);
    {
        let ignored = reader.next_entry()?.expect("entry 1");
        assert_eq!(ignored.index(), 1);
        assert_eq!(ignored.header().path, "b");
    }
    let mut third = reader.next_entry()?.expect("entry 2");
    assert_eq!(third.index(), 2);
    assert_eq!(third.read_to_vec()?, c);
    drop(third);

    assert!(reader.next_entry()?.is_none());
    assert_eq!(stats.skip_payloads.load(Ordering::SeqCst), 1);
    // Entry 1's ten blocks were never pulled.
    assert_eq!(stats.blocks.load(Ordering::SeqCst), 20);
    Ok(())
}

#[test]
fn test_partially_read_entry_is_read_drained() -> Result<(), Box<dyn std::error::Error>> {
    let first = vec![7u8; 500];
    let bytes = FrameBuilder::new()
        .chunked("first", &first, 50)
        .file("second", b"second payload")
        .build();

    let (mut reader, stats) = open(bytes, ReaderOptions::default());
    {
        let mut entry = reader.next_entry()?.expect("first");
        let mut payload = entry.payload()?;
        let mut head = [0u8; 60];
        payload.read_exact(&mut head)?;
        assert!(head.iter().all(|&b| b == 7));
    }
    assert_eq!(reader.state(), ReaderState::Consuming);

    let mut second = reader.next_entry()?.expect("second");
    assert_eq!(second.read_to_vec()?, b"second payload");
    assert_eq!(stats.skip_payloads.load(Ordering::SeqCst), 0);
    assert_eq!(stats.blocks.load(Ordering::SeqCst), 11);
    Ok(())
}

#[test]
fn test_explicit_skip() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = FrameBuilder::new()
        .file("a", b"skip me")
        .file("b", b"keep me")
        .build();
    let (mut reader, stats) = open(bytes, ReaderOptions::default());
    {
        let mut entry = reader.next_entry()?.expect("a");
        entry.skip()?;
        entry.skip()?;
        assert!(entry.next_block()?.is_none());
        // The skipped bytes are gone rather than zero-filled.
        assert!(matches!(
            entry.read_to_vec(),
            Err(OxiArcError::PayloadUnavailable { op: "payload", .. })
        ));
    }
    assert_eq!(stats.skip_payloads.load(Ordering::SeqCst), 1);
    assert_eq!(reader.next_entry()?.expect("b").read_to_vec()?, b"keep me");
    Ok(())
}

// ============================================================================
// Greedy mode and replay
// ============================================================================

#[test]
fn test_greedy_reads_payload_on_positioning() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = FrameBuilder::new()
        .chunked("a", b"0123456789", 3)
        .file("b", b"xyz")
        .build();
    let (mut reader, stats) = open(bytes, ReaderOptions::GREEDY);

    {
        let entry = reader.next_entry()?.expect("a");
        assert_eq!(stats.blocks.load(Ordering::SeqCst), 4);
        assert_eq!(entry.header().path, "a");
    }
    let mut entry = reader.next_entry()?.expect("b");
    assert_eq!(entry.read_to_vec()?, b"xyz");
    assert_eq!(stats.skip_payloads.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_greedy_payload_still_readable() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = FrameBuilder::new().chunked("a", b"0123456789", 4).build();
    let (mut reader, _) = open(bytes, ReaderOptions::GREEDY);
    let mut entry = reader.next_entry()?.expect("a");
    let offsets: Vec<u64> = entry
        .blocks()
        .map(|block| block.map(|b| b.offset))
        .collect::<Result<_, _>>()?;
    assert_eq!(offsets, vec![0, 4, 8]);
    Ok(())
}

#[test]
fn test_materialize_and_replay() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = FrameBuilder::new().chunked("a", b"replayable", 3).build();
    let (mut reader, _) = open(bytes, ReaderOptions::default());
    let mut entry = reader.next_entry()?.expect("a");

    assert_eq!(entry.materialize()?, b"replayable");
    assert_eq!(entry.read_to_vec()?, b"replayable");

    let mut text = String::new();
    entry.payload()?.read_to_string(&mut text)?;
    assert_eq!(text, "replayable");
    Ok(())
}

#[test]
fn test_payload_is_single_pass() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = FrameBuilder::new().chunked("a", b"single pass", 2).build();
    let (mut reader, _) = open(bytes, ReaderOptions::default());
    let mut entry = reader.next_entry()?.expect("a");

    let mut first = [0u8; 4];
    entry.payload()?.read_exact(&mut first)?;
    assert_eq!(&first, b"sing");
    assert!(matches!(
        entry.payload(),
        Err(OxiArcError::PayloadUnavailable { .. })
    ));
    assert!(matches!(
        entry.materialize(),
        Err(OxiArcError::PayloadUnavailable { .. })
    ));
    Ok(())
}

// ============================================================================
// Lazy opening
// ============================================================================

#[test]
fn test_reader_opens_engine_lazily() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = FrameBuilder::new().file("late", b"added later").build();
    let (engine, stats) = FrameReader::new();
    let mut reader = ArchiveReader::new(engine, ReaderOptions::default())?;
    reader.add_volume(SeekableStream::new(Cursor::new(bytes)))?;
    assert_eq!(stats.headers.load(Ordering::SeqCst), 0);

    let entries = collect_entries(&mut reader)?;
    assert_eq!(entries, vec![("late".to_string(), b"added later".to_vec())]);
    assert_eq!(reader.entries_read(), 1);
    Ok(())
}

#[test]
fn test_drop_closes_engine() {
    let bytes = FrameBuilder::new().file("a", b"x").build();
    let (mut reader, stats) = open(bytes, ReaderOptions::default());
    reader.next_entry().expect("advance").expect("entry");
    drop(reader);
    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
    assert_eq!(stats.released.load(Ordering::SeqCst), 1);
}
